//! Config file discovery, loading, and environment variable overlay.

use crate::bootstrap::{DeviceKind, SnapshotDuration, CHANNEL_COUNT};
use crate::{ConfigError, MyoConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/myocast/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("myocast/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("myocast.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file and overlay every key it sets onto `config`.
pub fn overlay_file(config: &mut MyoConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    overlay_toml(config, &contents, path)
}

/// Overlay the keys present in `contents`; absent keys keep their current value.
pub(crate) fn overlay_toml(
    config: &mut MyoConfig,
    contents: &str,
    path: &Path,
) -> Result<(), ConfigError> {
    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let table: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| parse_err(e.to_string()))?;

    if let Some(paths) = table.get("paths").and_then(|v| v.as_table()) {
        if let Some(v) = paths.get("data_dir").and_then(|v| v.as_str()) {
            config.infra.paths.data_dir = expand_path(v);
        }
    }

    if let Some(bind) = table.get("bind").and_then(|v| v.as_table()) {
        if let Some(v) = bind.get("host").and_then(|v| v.as_str()) {
            config.infra.bind.host = v.to_string();
        }
        if let Some(v) = bind.get("http_port").and_then(|v| v.as_integer()) {
            config.infra.bind.http_port =
                u16::try_from(v).map_err(|_| parse_err(format!("http_port out of range: {v}")))?;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("otlp_endpoint").and_then(|v| v.as_str()) {
            config.infra.telemetry.otlp_endpoint = non_empty(v);
        }
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.infra.telemetry.log_level = v.to_string();
        }
    }

    if let Some(capture) = table.get("capture").and_then(|v| v.as_table()) {
        if let Some(v) = capture.get("ring_capacity").and_then(|v| v.as_integer()) {
            if v <= 0 {
                return Err(parse_err(format!("ring_capacity must be positive, got {v}")));
            }
            config.capture.ring_capacity = v as usize;
        }
        if let Some(mask) = capture.get("channel_mask").and_then(|v| v.as_array()) {
            let flags = mask
                .iter()
                .map(|v| v.as_bool())
                .collect::<Option<Vec<bool>>>()
                .and_then(|flags| <[bool; CHANNEL_COUNT]>::try_from(flags).ok())
                .ok_or_else(|| parse_err(format!("channel_mask needs {CHANNEL_COUNT} booleans")))?;
            config.capture.channel_mask = flags;
        }
        if let Some(v) = capture.get("flush_interval_ms").and_then(|v| v.as_integer()) {
            config.capture.flush_interval_ms = v.max(1) as u64;
        }
        if let Some(v) = capture.get("writer_queue").and_then(|v| v.as_integer()) {
            config.capture.writer_queue = v.max(1) as usize;
        }
        if let Some(v) = capture.get("snapshot_interval_ms").and_then(|v| v.as_integer()) {
            config.capture.snapshot_interval_ms = v.max(0) as u64;
        }
        if let Some(v) = capture.get("snapshot_duration") {
            let text = match v {
                toml::Value::String(s) => s.clone(),
                toml::Value::Integer(n) => n.to_string(),
                other => return Err(parse_err(format!("invalid snapshot_duration: {other}"))),
            };
            config.capture.snapshot_duration = Some(
                SnapshotDuration::parse(&text)
                    .ok_or_else(|| parse_err(format!("invalid snapshot_duration: {text:?}")))?,
            );
        }

        if let Some(device) = capture.get("device").and_then(|v| v.as_table()) {
            if let Some(v) = device.get("kind").and_then(|v| v.as_str()) {
                config.capture.device.kind = DeviceKind::parse(v)
                    .ok_or_else(|| parse_err(format!("unknown device kind: {v}")))?;
            }
            if let Some(v) = device.get("rate_hz").and_then(|v| v.as_integer()) {
                config.capture.device.rate_hz = v.max(1) as u32;
            }
            if let Some(v) = device.get("replay_path").and_then(|v| v.as_str()) {
                config.capture.device.replay_path = Some(expand_path(v));
            }
            if let Some(v) = device.get("replay_loop").and_then(|v| v.as_bool()) {
                config.capture.device.replay_loop = v;
            }
            if let Some(v) = device.get("seed").and_then(|v| v.as_integer()) {
                config.capture.device.seed = v as u64;
            }
        }
    }

    Ok(())
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut MyoConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, env::vars());
}

/// Apply overrides from an arbitrary `(key, value)` iterator.
pub fn apply_overrides_from(
    config: &mut MyoConfig,
    sources: &mut ConfigSources,
    vars: impl IntoIterator<Item = (String, String)>,
) {
    let mut rust_log = None;

    for (key, value) in vars {
        let applied = match key.as_str() {
            "MYOCAST_DATA_DIR" => {
                config.infra.paths.data_dir = expand_path(&value);
                true
            }
            "MYOCAST_HOST" => {
                config.infra.bind.host = value;
                true
            }
            "MYOCAST_HTTP_PORT" => match value.parse() {
                Ok(port) => {
                    config.infra.bind.http_port = port;
                    true
                }
                Err(_) => false,
            },
            // Also support the standard OTEL env var
            "MYOCAST_OTLP_ENDPOINT" | "OTEL_EXPORTER_OTLP_ENDPOINT" => {
                config.infra.telemetry.otlp_endpoint = non_empty(&value);
                true
            }
            "MYOCAST_LOG_LEVEL" => {
                config.infra.telemetry.log_level = value;
                true
            }
            "RUST_LOG" => {
                rust_log = Some(value);
                false
            }
            "MYOCAST_RING_CAPACITY" => match value.parse::<usize>() {
                Ok(n) if n > 0 => {
                    config.capture.ring_capacity = n;
                    true
                }
                _ => false,
            },
            "MYOCAST_DEVICE" => match DeviceKind::parse(&value) {
                Some(kind) => {
                    config.capture.device.kind = kind;
                    true
                }
                None => false,
            },
            "MYOCAST_SNAPSHOT_INTERVAL_MS" => match value.parse::<u64>() {
                Ok(ms) => {
                    config.capture.snapshot_interval_ms = ms;
                    true
                }
                Err(_) => false,
            },
            "MYOCAST_SNAPSHOT_DURATION" => match SnapshotDuration::parse(&value) {
                Some(duration) => {
                    config.capture.snapshot_duration = Some(duration);
                    true
                }
                None => false,
            },
            "MYOCAST_REPLAY_PATH" => {
                config.capture.device.replay_path = Some(expand_path(&value));
                true
            }
            _ => false,
        };

        if applied {
            sources.env_overrides.push(key);
        }
    }

    // RUST_LOG wins over MYOCAST_LOG_LEVEL regardless of iteration order
    if let Some(v) = rust_log {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

fn non_empty(v: &str) -> Option<String> {
    let v = v.trim();
    (!v.is_empty()).then(|| v.to_string())
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        return match stripped.split_once('/') {
            Some((var_name, rest)) => env::var(var_name)
                .map(|v| PathBuf::from(v).join(rest))
                .unwrap_or_else(|_| PathBuf::from(path)),
            None => env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path)),
        };
    }

    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::DurationUnit;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_overlay_minimal_toml() {
        let mut config = MyoConfig::default();
        overlay_toml(
            &mut config,
            "[paths]\ndata_dir = \"/custom/data\"\n",
            Path::new("test.toml"),
        )
        .unwrap();

        assert_eq!(config.infra.paths.data_dir, PathBuf::from("/custom/data"));
        // Other values should be defaults
        assert_eq!(config.infra.bind.http_port, 5000);
        assert_eq!(config.capture.ring_capacity, 512);
    }

    #[test]
    fn test_overlay_full_toml() {
        let toml = r#"
[paths]
data_dir = "/data/myocast"

[bind]
host = "127.0.0.1"
http_port = 9000

[telemetry]
otlp_endpoint = "127.0.0.1:4317"
log_level = "debug"

[capture]
ring_capacity = 256
channel_mask = [true, true, false, true, true, true, true, false]
flush_interval_ms = 250

[capture.device]
kind = "replay"
rate_hz = 50
replay_path = "/data/session_1.csv"
replay_loop = false
"#;
        let mut config = MyoConfig::default();
        overlay_toml(&mut config, toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.infra.paths.data_dir, PathBuf::from("/data/myocast"));
        assert_eq!(config.infra.bind.addr(), "127.0.0.1:9000");
        assert_eq!(
            config.infra.telemetry.otlp_endpoint.as_deref(),
            Some("127.0.0.1:4317")
        );
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert_eq!(config.capture.ring_capacity, 256);
        assert_eq!(
            config.capture.channel_mask,
            [true, true, false, true, true, true, true, false]
        );
        assert_eq!(config.capture.flush_interval_ms, 250);
        assert_eq!(config.capture.device.kind, DeviceKind::Replay);
        assert_eq!(config.capture.device.rate_hz, 50);
        assert_eq!(
            config.capture.device.replay_path,
            Some(PathBuf::from("/data/session_1.csv"))
        );
        assert!(!config.capture.device.replay_loop);
    }

    #[test]
    fn test_later_overlay_wins_only_for_keys_it_sets() {
        let mut config = MyoConfig::default();
        overlay_toml(
            &mut config,
            "[bind]\nhttp_port = 7000\n[capture]\nring_capacity = 64\n",
            Path::new("system.toml"),
        )
        .unwrap();
        overlay_toml(&mut config, "[bind]\nhttp_port = 7001\n", Path::new("local.toml")).unwrap();

        assert_eq!(config.infra.bind.http_port, 7001);
        assert_eq!(config.capture.ring_capacity, 64);
    }

    #[test]
    fn test_bad_channel_mask_is_rejected() {
        let mut config = MyoConfig::default();
        let err = overlay_toml(
            &mut config,
            "[capture]\nchannel_mask = [true, false]\n",
            Path::new("bad.toml"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_channel_mask_rejects_non_booleans() {
        let mut config = MyoConfig::default();
        let err = overlay_toml(
            &mut config,
            "[capture]\nchannel_mask = [true, 1, true, true, true, true, true, true, true]\n",
            Path::new("bad.toml"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(config.capture.channel_mask, [true; CHANNEL_COUNT]);
    }

    #[test]
    fn test_snapshot_schedule_keys() {
        let mut config = MyoConfig::default();
        overlay_toml(
            &mut config,
            "[capture]\nsnapshot_interval_ms = 1000\nsnapshot_duration = \"10 minutes\"\n",
            Path::new("test.toml"),
        )
        .unwrap();
        assert_eq!(config.capture.snapshot_interval_ms, 1000);
        assert_eq!(
            config.capture.snapshot_duration,
            Some(SnapshotDuration::new(10, DurationUnit::Minutes))
        );

        let err = overlay_toml(
            &mut config,
            "[capture]\nsnapshot_duration = \"3 days\"\n",
            Path::new("bad.toml"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("3 days"));
    }

    #[test]
    fn test_unknown_device_is_rejected() {
        let mut config = MyoConfig::default();
        let err = overlay_toml(
            &mut config,
            "[capture.device]\nkind = \"bluetooth\"\n",
            Path::new("bad.toml"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("bluetooth"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = MyoConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_from(
            &mut config,
            &mut sources,
            vars(&[
                ("RUST_LOG", "trace"),
                ("MYOCAST_LOG_LEVEL", "warn"),
                ("MYOCAST_HTTP_PORT", "6100"),
                ("MYOCAST_HTTP_PORTX", "1"),
                ("MYOCAST_DEVICE", "replay"),
                ("MYOCAST_RING_CAPACITY", "0"),
                ("MYOCAST_SNAPSHOT_INTERVAL_MS", "500"),
                ("MYOCAST_SNAPSHOT_DURATION", "2h"),
            ]),
        );

        assert_eq!(config.capture.snapshot_interval_ms, 500);
        assert_eq!(
            config.capture.snapshot_duration,
            Some(SnapshotDuration::new(2, DurationUnit::Hours))
        );

        assert_eq!(config.infra.bind.http_port, 6100);
        assert_eq!(config.infra.telemetry.log_level, "trace");
        assert_eq!(config.capture.device.kind, DeviceKind::Replay);
        assert_eq!(config.capture.ring_capacity, 512);
        assert!(sources.env_overrides.contains(&"MYOCAST_HTTP_PORT".to_string()));
        assert!(!sources.env_overrides.contains(&"MYOCAST_RING_CAPACITY".to_string()));
    }
}
