use crate::config::{LoggingConfig, Section};
use parking_lot::Mutex;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};

// Keep a guard for non-blocking console to avoid being dropped.
static CONSOLE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

fn parse_tracing_level(s: &str) -> Option<Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        "off" | "none" => None,
        _ => Some(Level::INFO),
    }
}

/// Returns true if target == crate_name or target starts with "crate_name::"
fn matches_crate_prefix(target: &str, crate_name: &str) -> bool {
    target == crate_name
        || target
            .strip_prefix(crate_name)
            .is_some_and(|rest| rest.starts_with("::"))
}

// ================= rotating writer for files =================

#[derive(Clone)]
struct RotWriter(Arc<Mutex<FileRotate<AppendTimestamp>>>);

impl Write for RotWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().flush()
    }
}

/// A writer that drops everything when no file is routed to.
struct RoutedWriter(Option<RotWriter>);

impl Write for RoutedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.0 {
            Some(w) => w.write(buf),
            None => Ok(buf.len()),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.0 {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

/// Route log records to different files by target prefix, e.g. "hive" or
/// "hive_example::server".
#[derive(Clone, Default)]
struct FileRouter {
    default: Option<RotWriter>,
    by_prefix: Vec<(String, RotWriter)>,
}

impl FileRouter {
    fn resolve_for(&self, target: &str) -> Option<RotWriter> {
        // Longest prefix first so "app::server" wins over "app".
        self.by_prefix
            .iter()
            .find(|(prefix, _)| matches_crate_prefix(target, prefix))
            .map(|(_, w)| w.clone())
            .or_else(|| self.default.clone())
    }

    fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_prefix.is_empty()
    }
}

impl<'a> fmt::MakeWriter<'a> for FileRouter {
    type Writer = RoutedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RoutedWriter(self.default.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        RoutedWriter(self.resolve_for(meta.target()))
    }
}

fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn open_rotating_writer(section: &Section, base_dir: &Path) -> std::io::Result<RotWriter> {
    let log_path = resolve_log_path(&section.file, base_dir);
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let max_bytes = section.max_size_mb.unwrap_or(100) as usize * 1024 * 1024;
    // Prefer a backup count when given, else retention by age.
    let limit = match section.max_backups {
        Some(n) => FileLimit::MaxFiles(n),
        None => FileLimit::Age(chrono::Duration::days(
            section.max_age_days.unwrap_or(1) as i64,
        )),
    };

    let rot = FileRotate::new(
        log_path,
        AppendTimestamp::default(limit),
        ContentLimit::BytesSurpassed(max_bytes),
        // The newest backup stays plain; older ones are gzipped.
        Compression::OnRotate(1),
        None,
    );
    Ok(RotWriter(Arc::new(Mutex::new(rot))))
}

fn build_file_router(cfg: &LoggingConfig, base_dir: &Path) -> FileRouter {
    let mut router = FileRouter::default();
    for (name, section) in cfg {
        if section.file.trim().is_empty() {
            continue;
        }
        match open_rotating_writer(section, base_dir) {
            Ok(writer) if name == "default" => router.default = Some(writer),
            Ok(writer) => router.by_prefix.push((name.clone(), writer)),
            Err(e) => eprintln!(
                "Failed to init log file for '{}': {} ({})",
                name,
                resolve_log_path(&section.file, base_dir).display(),
                e
            ),
        }
    }
    router
        .by_prefix
        .sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    router
}

#[derive(Clone, Copy)]
enum Sink {
    Console,
    File { has_default_file: bool },
}

fn build_targets(cfg: &LoggingConfig, sink: Sink) -> Targets {
    let level_of = |s: &Section| match sink {
        Sink::Console => parse_tracing_level(&s.console_level),
        Sink::File { .. } => parse_tracing_level(&s.file_level),
    };

    let fallback = match sink {
        Sink::Console => LevelFilter::INFO,
        Sink::File { has_default_file: true } => LevelFilter::INFO,
        Sink::File { has_default_file: false } => LevelFilter::OFF,
    };
    let default_level = match cfg.get("default") {
        Some(section) => level_of(section).map_or(LevelFilter::OFF, LevelFilter::from_level),
        None => fallback,
    };

    let mut targets = Targets::new().with_default(default_level);
    for (name, section) in cfg.iter().filter(|(k, _)| k.as_str() != "default") {
        // A subsystem only writes to files when it has a file of its own.
        if matches!(sink, Sink::File { .. }) && section.file.trim().is_empty() {
            continue;
        }
        let level = level_of(section).map_or(LevelFilter::OFF, LevelFilter::from_level);
        targets = targets.with_target(name.clone(), level);
    }
    targets
}

/// Install the global subscriber: a console layer on non-blocking stderr and,
/// when any section names a file, a JSON layer writing to rotated files.
/// `RUST_LOG` (if set) caps both.
///
/// Relative file paths are resolved against `base_dir`. Calling this more
/// than once keeps the first subscriber.
pub fn init_logging(cfg: &LoggingConfig, base_dir: &Path) {
    // Bridge `log` → `tracing` *before* installing the subscriber
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("LogTracer init skipped: {e}");
    }

    if cfg.is_empty() {
        init_minimal();
        return;
    }

    let router = build_file_router(cfg, base_dir);
    let console_targets = build_targets(cfg, Sink::Console);
    let file_targets = build_targets(
        cfg,
        Sink::File {
            has_default_file: router.default.is_some(),
        },
    );

    let env: Option<EnvFilter> = EnvFilter::try_from_default_env().ok();

    let (nb_stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);

    let console_layer = fmt::layer()
        .with_writer(nb_stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console_targets);

    let file_layer = (!router.is_empty()).then(|| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_level(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(router)
            .with_filter(file_targets)
    });

    let _ = Registry::default()
        .with(env)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

/// INFO to the console; honors `RUST_LOG`.
pub fn init_minimal() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let _ = Registry::default().with(env).with(fmt_layer).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn section(console: &str, file: &str, file_level: &str) -> Section {
        Section {
            console_level: console.into(),
            file: file.into(),
            file_level: file_level.into(),
            max_age_days: None,
            max_backups: Some(2),
            max_size_mb: Some(1),
        }
    }

    #[test]
    fn crate_prefix_matching() {
        assert!(matches_crate_prefix("hive", "hive"));
        assert!(matches_crate_prefix("hive::lifecycle", "hive"));
        assert!(!matches_crate_prefix("hive_example", "hive"));
    }

    #[test]
    fn levels_parse_with_info_fallback() {
        assert_eq!(parse_tracing_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_tracing_level("off"), None);
        assert_eq!(parse_tracing_level("loud"), Some(Level::INFO));
    }

    #[test]
    fn router_prefers_longest_prefix() {
        let tmp = tempdir().unwrap();
        let mut cfg = LoggingConfig::new();
        cfg.insert("default".into(), section("info", "logs/all.log", "debug"));
        cfg.insert("app".into(), section("info", "logs/app.log", "debug"));
        cfg.insert("app::server".into(), section("info", "logs/server.log", "debug"));

        let router = build_file_router(&cfg, tmp.path());
        assert!(router.default.is_some());
        assert_eq!(router.by_prefix[0].0, "app::server");
        assert!(router.resolve_for("app::server::http").is_some());
        assert!(router.resolve_for("other").is_some());
        assert!(tmp.path().join("logs").is_dir());
    }

    #[test]
    fn older_backups_are_compressed() {
        let tmp = tempdir().unwrap();
        let mut writer = open_rotating_writer(&section("info", "logs/rot.log", "info"), tmp.path()).unwrap();
        let chunk = vec![b'x'; 1536 * 1024];
        for _ in 0..4 {
            writer.write_all(&chunk).unwrap();
        }
        writer.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(tmp.path().join("logs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.ends_with(".gz")), "{names:?}");
    }

    #[test]
    fn sections_without_files_open_nothing() {
        let tmp = tempdir().unwrap();
        let mut cfg = LoggingConfig::new();
        cfg.insert("default".into(), section("debug", "", "info"));
        let router = build_file_router(&cfg, tmp.path());
        assert!(router.is_empty());
    }
}
