use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Application configuration: logging sections plus a flat bag of cell
/// configuration values keyed by flag name (`http-port: 8080`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Logging configuration (optional, uses defaults if None).
    pub logging: Option<LoggingConfig>,
    /// Base directory for relative log file paths.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Directory of extra YAML files merged into `cells` (optional).
    #[serde(default)]
    pub cells_dir: Option<String>,
    /// Cell configuration values, handed to the hive as its config-file layer.
    #[serde(default)]
    pub cells: Map<String, Value>,
}

/// Logging configuration - maps subsystem names to their logging settings.
/// Key "default" is the catch-all for logs that don't match explicit subsystems.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    #[serde(default)]
    pub file: String, // "logs/hive.log"; empty disables the file sink
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

fn default_log_dir() -> String {
    ".".to_string()
}

/// Create a default logging configuration.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: "logs/hive.log".to_string(),
            file_level: "debug".to_string(),
            max_age_days: Some(7),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: Some(default_logging_config()),
            log_dir: default_log_dir(),
            cells_dir: None,
            cells: Map::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        // Start from a base where logging is None, so it stays None unless
        // the YAML or the environment provides it.
        let base = AppConfig {
            logging: None,
            ..Default::default()
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(config_path.as_ref()))
            // Example: APP__LOG_DIR=/var/log/hive maps to log_dir
            .merge(Env::prefixed("APP__").split("__"));

        let mut config: AppConfig = figment
            .extract()
            .context("Failed to extract config from figment")?;

        if let Some(dir) = config.cells_dir.clone() {
            merge_cell_files(&mut config.cells, dir)?;
        }

        Ok(config)
    }

    /// Load configuration from file or fall back to the defaults.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => Ok(Self::default()),
        }
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(default_section) = logging.get_mut("default") {
            match args.verbose {
                0 => {}
                1 => default_section.console_level = "debug".to_string(),
                _ => default_section.console_level = "trace".to_string(),
            }
        }
    }

    /// Base directory for log files, as an absolute path when possible.
    pub fn log_base_dir(&self) -> PathBuf {
        let dir = PathBuf::from(&self.log_dir);
        if dir.is_absolute() {
            return dir;
        }
        std::env::current_dir()
            .map(|cwd| cwd.join(&dir))
            .unwrap_or(dir)
    }
}

/// Command line arguments relevant to the bootstrap.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub print_config: bool,
    pub verbose: u8,
}

/// Merge the top-level keys of every `*.yml` / `*.yaml` file in `dir` into
/// `bag`. Files are read in name order; later files win.
fn merge_cell_files(bag: &mut Map<String, Value>, dir: impl AsRef<Path>) -> Result<()> {
    use std::fs;
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(());
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            let ext = p
                .extension()
                .and_then(|s| s.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            ext == "yml" || ext == "yaml"
        })
        .collect();
    paths.sort();

    for path in paths {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let val: serde_yaml::Value = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        match serde_json::to_value(val)? {
            Value::Object(map) => bag.extend(map),
            Value::Null => {}
            _ => anyhow::bail!("{} must contain a mapping of flag values", path.display()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_structure() {
        let config = AppConfig::default();
        let logging = config.logging.as_ref().unwrap();
        let default_section = &logging["default"];
        assert_eq!(default_section.console_level, "info");
        assert_eq!(default_section.file, "logs/hive.log");
        assert_eq!(config.log_dir, ".");
        assert!(config.cells.is_empty());
    }

    #[test]
    fn test_minimal_yaml_config() {
        let tmp = tempdir().unwrap();
        let cfg_path = tmp.path().join("cfg.yaml");
        let yaml = r#"
cells:
  http-port: 9000
  greeting: "hi"
"#;
        fs::write(&cfg_path, yaml).unwrap();

        let config = AppConfig::load_layered(&cfg_path).unwrap();
        assert_eq!(config.cells["http-port"], 9000);
        assert_eq!(config.cells["greeting"], "hi");
        assert!(config.logging.is_none());
        assert_eq!(config.log_dir, ".");
    }

    #[test]
    fn test_cells_dir_is_merged() {
        let tmp = tempdir().unwrap();
        let cfg_path = tmp.path().join("app.yaml");
        let cells_dir = tmp.path().join("cells");
        fs::create_dir_all(&cells_dir).unwrap();
        fs::write(cells_dir.join("a.yaml"), "tick-interval-ms: 250\n").unwrap();
        fs::write(cells_dir.join("b.yml"), "http-port: 7070\n").unwrap();
        fs::write(cells_dir.join("notes.txt"), "ignored").unwrap();

        let cells_dir_str = cells_dir.to_string_lossy().replace('\\', "/");
        let yaml = format!(
            r#"
cells_dir: "{cells_dir_str}"
cells:
  http-port: 8000
  greeting: "hello"
"#
        );
        fs::write(&cfg_path, yaml).unwrap();

        let config = AppConfig::load_layered(&cfg_path).unwrap();
        assert_eq!(config.cells["tick-interval-ms"], 250);
        assert_eq!(config.cells["http-port"], 7070);
        assert_eq!(config.cells["greeting"], "hello");
    }

    #[test]
    fn test_cli_verbose_levels_matrix() {
        for (verbose_level, expected) in [(0, "info"), (1, "debug"), (2, "trace"), (3, "trace")] {
            let mut config = AppConfig::default();
            let args = CliArgs {
                verbose: verbose_level,
                ..Default::default()
            };
            config.apply_cli_overrides(&args);

            let logging = config.logging.as_ref().unwrap();
            assert_eq!(logging["default"].console_level, expected);
        }
    }

    #[test]
    fn test_to_yaml_roundtrip_basic() {
        let mut config = AppConfig::default();
        config.cells.insert("http-port".into(), 8080.into());
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("logging:"));
        assert!(yaml.contains("cells:"));

        let roundtrip: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(roundtrip.cells["http-port"], 8080);
    }

    #[test]
    fn test_unknown_top_level_key_is_rejected() {
        let result: Result<AppConfig, _> = serde_yaml::from_str("server:\n  port: 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_or_default(None::<&str>).unwrap();
        assert!(config.logging.is_some());
    }
}
