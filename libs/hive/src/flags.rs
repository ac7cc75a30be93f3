//! Configuration flag binder.
//!
//! Every configuration section declares its options through [`Flagger`].
//! Before argument parsing the hive registers one `--flag` per option on the
//! application's `clap::Command`; after parsing, each section is extracted
//! with figment from these layers (later wins):
//!
//! 1. the section's declared defaults
//! 2. values from a config file, keyed by flag name
//! 3. environment variables `<PREFIX><FLAG>` (upper-cased, `-` → `_`)
//! 4. flags given explicitly on the command line
//!
//! A flag `foo-bar` binds to the field `foo_bar`.

use std::sync::Arc;

use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::error::HiveError;
use crate::inject::Value;
use crate::registry::ConfigEntry;

pub const DEFAULT_ENV_PREFIX: &str = "HIVE_";

/// Implemented by configuration sections to declare their flags.
///
/// ```rust,ignore
/// impl Flagger for ServerConfig {
///     fn flags(&self, flags: &mut FlagSet) {
///         flags.add("http-port", self.http_port, "Port for the HTTP server");
///     }
/// }
/// ```
pub trait Flagger {
    fn flags(&self, flags: &mut FlagSet);
}

/// One declared option.
#[derive(Clone, Debug, PartialEq)]
pub struct Flag {
    pub name: String,
    pub default: Json,
    pub help: String,
}

impl Flag {
    /// Name of the struct field this flag binds to.
    pub fn field(&self) -> String {
        self.name.replace('-', "_")
    }
}

#[derive(Clone, Debug, Default)]
pub struct FlagSet {
    flags: Vec<Flag>,
}

impl FlagSet {
    /// Declare an option. A default that cannot be represented as JSON is
    /// registered without a default value.
    pub fn add<V: Serialize>(&mut self, name: impl Into<String>, default: V, help: impl Into<String>) {
        self.flags.push(Flag {
            name: name.into(),
            default: serde_json::to_value(default).unwrap_or(Json::Null),
            help: help.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.flags.iter()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Default value as shown in `--help` and handed to clap.
pub(crate) fn render_default(default: &Json) -> Option<String> {
    match default {
        Json::Null => None,
        Json::String(s) => Some(s.clone()),
        Json::Array(items) => Some(
            items
                .iter()
                .filter_map(render_default)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}

/// Parse a raw flag value using the declared default as the type template.
pub(crate) fn parse_flag_value(flag: &Flag, raw: &str) -> Result<Json, HiveError> {
    let invalid = |reason: String| HiveError::InvalidFlagValue {
        flag: flag.name.clone(),
        value: raw.to_string(),
        reason,
    };

    match &flag.default {
        Json::Bool(_) => raw
            .parse::<bool>()
            .map(Json::Bool)
            .map_err(|e| invalid(e.to_string())),
        Json::Number(n) if n.is_u64() => raw
            .parse::<u64>()
            .map(Json::from)
            .map_err(|e| invalid(e.to_string())),
        Json::Number(n) if n.is_i64() => raw
            .parse::<i64>()
            .map(Json::from)
            .map_err(|e| invalid(e.to_string())),
        Json::Number(_) => raw
            .parse::<f64>()
            .map_err(|e| invalid(e.to_string()))
            .and_then(|f| {
                serde_json::Number::from_f64(f)
                    .map(Json::Number)
                    .ok_or_else(|| invalid("not a finite number".to_string()))
            }),
        Json::Array(_) => Ok(Json::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Json::String(s.to_string()))
                .collect(),
        )),
        Json::Object(_) => serde_json::from_str(raw).map_err(|e| invalid(e.to_string())),
        Json::String(_) | Json::Null => Ok(Json::String(raw.to_string())),
    }
}

/// Register one argument per declared flag on `cmd`.
pub(crate) fn register(mut cmd: Command, configs: &[ConfigEntry]) -> Command {
    for section in configs {
        for flag in section.flags.iter() {
            let mut arg = Arg::new(flag.name.clone())
                .long(flag.name.clone())
                .help(flag.help.clone())
                .action(ArgAction::Set);
            if flag.default.is_boolean() {
                arg = arg.num_args(0..=1).default_missing_value("true");
            }
            if let Some(default) = render_default(&flag.default) {
                arg = arg.default_value(default);
            }
            cmd = cmd.arg(arg);
        }
    }
    cmd
}

/// Collect the flags that were given explicitly on the command line, typed
/// after their declared defaults and keyed by flag name.
pub(crate) fn collect_explicit(matches: &ArgMatches, configs: &[ConfigEntry]) -> Result<Map<String, Json>, HiveError> {
    let mut values = Map::new();
    for flag in configs.iter().flat_map(|c| c.flags.iter()) {
        if matches.value_source(&flag.name) != Some(ValueSource::CommandLine) {
            continue;
        }
        if let Ok(Some(raw)) = matches.try_get_one::<String>(&flag.name) {
            values.insert(flag.name.clone(), parse_flag_value(flag, raw)?);
        }
    }
    Ok(values)
}

/// Inputs for binding configuration sections.
#[derive(Clone, Debug)]
pub(crate) struct ConfigLayers {
    pub file: Map<String, Json>,
    pub explicit: Map<String, Json>,
    pub env_prefix: String,
}

impl Default for ConfigLayers {
    fn default() -> Self {
        Self {
            file: Map::new(),
            explicit: Map::new(),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }
}

impl ConfigLayers {
    /// Layers above the defaults for one section, with keys renamed to fields.
    ///
    /// Environment values are typed after the flag defaults, like flags.
    pub fn figment_for(&self, section: &ConfigEntry) -> Result<Figment, HiveError> {
        let mut file = Map::new();
        let mut env = Map::new();
        let mut explicit = Map::new();
        let fields: Vec<String> = section.flags.iter().map(Flag::field).collect();
        let only: Vec<&str> = fields.iter().map(String::as_str).collect();
        let vars: Vec<_> = Env::prefixed(&self.env_prefix).only(&only).iter().collect();

        for (flag, field) in section.flags.iter().zip(fields.iter()) {
            if let Some(v) = self.file.get(&flag.name) {
                file.insert(field.clone(), v.clone());
            }
            if let Some((_, raw)) = vars.iter().find(|(key, _)| key.as_str().eq_ignore_ascii_case(field)) {
                env.insert(field.clone(), parse_flag_value(flag, raw)?);
            }
            if let Some(v) = self.explicit.get(&flag.name) {
                explicit.insert(field.clone(), v.clone());
            }
        }

        Ok(Figment::new()
            .merge(Serialized::defaults(file))
            .merge(Serialized::defaults(env))
            .merge(Serialized::defaults(explicit)))
    }

    pub fn bind(&self, section: &ConfigEntry) -> Result<Value, HiveError> {
        (section.extract)(&section.defaults, self.figment_for(section)?).map_err(|source| {
            HiveError::Config {
                section: section.name.clone(),
                source: source.into(),
            }
        })
    }
}

/// Monomorphized extraction of one section: defaults first, then `layers`.
pub(crate) fn extract_section<C>(defaults: &Value, layers: Figment) -> Result<Value, figment::Error>
where
    C: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let defaults = defaults
        .clone()
        .downcast::<C>()
        .map_err(|_| figment::Error::from(format!("defaults are not a {}", std::any::type_name::<C>())))?;
    let value: C = Figment::from(Serialized::defaults(&*defaults))
        .merge(layers)
        .extract()?;
    Ok(Arc::new(value))
}
