//! Diagnostic naming for types and functions.
//!
//! Every name printed by the hive (errors, the `hive` inspection command,
//! hook logs) goes through this module so it stays short and stable:
//! module paths matching the internal prefix pattern are stripped, closure
//! suffixes are dropped and source locations are cut down to a
//! repository-relative looking path.

use std::fmt;
use std::panic::Location;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// Strips any run of lower-case module path segments in front of an identifier,
/// e.g. `alloc::sync::Arc<hive_example::server::Server>` renders as `Arc<Server>`.
pub const DEFAULT_INTERNAL_PREFIX: &str = r"\b(?:[a-z_][a-z0-9_]*::)+";

/// Directory names that usually mark the root of the interesting part of a path.
/// Purely a heuristic.
pub const COMMON_ROOTS: &[&str] = &["apps", "cmd", "crates", "libs", "pkg"];

const CLOSURE_SUFFIX: &str = "::{{closure}}";

/// Source location of a declared function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl From<&Location<'_>> for SourceLocation {
    fn from(loc: &Location<'_>) -> Self {
        Self {
            file: loc.file().to_string(),
            line: loc.line(),
        }
    }
}

/// What the hive knows about a declared function: its qualified name and,
/// when available, where it was declared.
///
/// Rust has no runtime function introspection, so the name comes from
/// [`std::any::type_name`] of the function (or closure) type and the location
/// from `#[track_caller]` at the declaration site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub location: Option<SourceLocation>,
}

impl Symbol {
    /// Symbol for a function value of type `F` declared at `location`.
    pub fn of<F: ?Sized>(location: &Location<'_>) -> Self {
        Self {
            name: std::any::type_name::<F>().to_string(),
            location: Some(location.into()),
        }
    }

    /// Symbol without location metadata.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: None,
        }
    }

    pub fn at(name: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        Self {
            name: name.into(),
            location: Some(SourceLocation {
                file: file.into(),
                line,
            }),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&func_name_and_location(self))
    }
}

/// Renders names with a configurable internal prefix pattern.
#[derive(Clone, Debug)]
pub struct Namer {
    prefix: Regex,
}

impl Namer {
    pub fn new(internal_prefix: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            prefix: Regex::new(internal_prefix)?,
        })
    }

    /// Remove every match of the internal prefix pattern from `name`.
    pub fn trim_name(&self, name: &str) -> String {
        self.prefix.replace_all(name, "").into_owned()
    }

    pub fn pretty_type<T: ?Sized>(&self) -> String {
        self.trim_name(std::any::type_name::<T>())
    }

    /// `"<name> (<short-path>:<line>)"`, or just the name when the symbol has
    /// no location.
    pub fn func_name_and_location(&self, symbol: &Symbol) -> String {
        let mut raw = symbol.name.as_str();
        while let Some(stripped) = raw.strip_suffix(CLOSURE_SUFFIX) {
            raw = stripped;
        }
        let name = self.trim_name(raw);
        match &symbol.location {
            Some(loc) => format!("{} ({}:{})", name, useful_path_segment(&loc.file), loc.line),
            None => name,
        }
    }
}

impl Default for Namer {
    fn default() -> Self {
        default_namer().clone()
    }
}

fn default_namer() -> &'static Namer {
    static NAMER: OnceLock<Namer> = OnceLock::new();
    NAMER.get_or_init(|| Namer {
        prefix: Regex::new(DEFAULT_INTERNAL_PREFIX).expect("default internal prefix is valid"),
    })
}

pub fn trim_name(name: &str) -> String {
    default_namer().trim_name(name)
}

pub fn pretty_type<T: ?Sized>() -> String {
    default_namer().pretty_type::<T>()
}

pub fn func_name_and_location(symbol: &Symbol) -> String {
    default_namer().func_name_and_location(symbol)
}

/// Cut `file` at the last path segment (scanning from the end) that is one of
/// [`COMMON_ROOTS`]. The cleaned path is returned as-is when none matches.
pub fn useful_path_segment(file: &str) -> String {
    let cleaned = clean_path(Path::new(file));
    let segments: Vec<&str> = cleaned
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    // A relative path never cuts at its first segment.
    let first = if cleaned.has_root() { 0 } else { 1 };
    for i in (first..segments.len()).rev() {
        if COMMON_ROOTS.contains(&segments[i]) {
            return segments[i..].join("/");
        }
    }
    cleaned.to_string_lossy().into_owned()
}

fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Foo;

    fn sample_fn() {}

    #[test]
    fn trims_configured_internal_prefix() {
        let namer = Namer::new(r"internal(?:\.\w+)*\.").unwrap();
        assert_eq!(namer.trim_name("internal.pkg.v2.Foo"), "Foo");
        assert_eq!(namer.trim_name("external.Foo"), "external.Foo");
    }

    #[test]
    fn default_pattern_strips_module_paths_inside_generics() {
        assert_eq!(
            trim_name("alloc::sync::Arc<hive_example::server::Server>"),
            "Arc<Server>"
        );
        assert_eq!(pretty_type::<Foo>(), "Foo");
        assert_eq!(pretty_type::<std::sync::Arc<Foo>>(), "Arc<Foo>");
    }

    #[test]
    fn function_name_with_location() {
        let symbol = Symbol::at(
            "pkg::server::handler::do_thing",
            "/home/build/pkg/server/handler.rs",
            42,
        );
        assert_eq!(
            func_name_and_location(&symbol),
            "do_thing (pkg/server/handler.rs:42)"
        );
    }

    #[test]
    fn function_name_without_location_is_bare() {
        let symbol = Symbol::named("pkg::server::handler::do_thing");
        assert_eq!(func_name_and_location(&symbol), "do_thing");
    }

    #[test]
    fn closure_suffix_is_stripped() {
        let symbol = Symbol::named("my_app::jobs::new_jobs::{{closure}}::{{closure}}");
        assert_eq!(func_name_and_location(&symbol), "new_jobs");
    }

    #[test]
    fn symbol_of_captures_type_name_and_caller() {
        fn symbol_of<F>(_: &F) -> Symbol {
            Symbol::of::<F>(Location::caller())
        }
        let symbol = symbol_of(&sample_fn);
        assert!(symbol.name.ends_with("sample_fn"), "{}", symbol.name);
        let rendered = func_name_and_location(&symbol);
        assert!(rendered.starts_with("sample_fn ("), "{rendered}");
    }

    #[test]
    fn path_without_common_root_is_kept() {
        assert_eq!(useful_path_segment("/srv/app/main.rs"), "/srv/app/main.rs");
        assert_eq!(useful_path_segment("src/./main.rs"), "src/main.rs");
    }

    #[test]
    fn absolute_path_may_cut_at_its_first_segment() {
        assert_eq!(useful_path_segment("/pkg/server/h.rs"), "pkg/server/h.rs");
        assert_eq!(useful_path_segment("pkg/server/h.rs"), "pkg/server/h.rs");
    }

    #[test]
    fn path_is_cut_at_last_common_root() {
        assert_eq!(
            useful_path_segment("/home/libs/build/libs/hive/src/cell.rs"),
            "libs/hive/src/cell.rs"
        );
    }
}
