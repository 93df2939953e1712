use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::{FixedOffset, Local, Offset};

/// Application-level constants
pub const APP_NAME: &str = "VisionAgenda";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Local storage key holding the active organization id.
pub const ACTIVE_ORG_KEY: &str = "va_active_org_id";
/// Local storage key holding the display mode (`light` / `dark`).
pub const THEME_KEY: &str = "theme";

const DEFAULT_BIND: &str = "127.0.0.1:8787";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "visionagenda=info,visionagenda_lib=info,tower_http=warn"
}

/// Get the application data directory.
/// ~/VisionAgenda/ on all platforms; falls back to the working directory
/// when no home directory can be determined.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(APP_NAME))
}

/// Which gateway backs the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayKind {
    /// Managed backend over HTTP.
    Rest { url: String, anon_key: String },
    /// Embedded SQLite system of record.
    Local,
}

/// Errors while reading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gateway: GatewayKind,
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    /// Offset used to turn picker wall-clock values into instants and
    /// instants back into calendar days.
    pub utc_offset: FixedOffset,
    pub static_dir: Option<PathBuf>,
    pub http_timeout_secs: u64,
    /// First vendor super admin, created when the local gateway is empty.
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// Read configuration from `VA_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup` (tests inject a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let gateway = match lookup("VA_GATEWAY").as_deref().unwrap_or("local") {
            "local" => GatewayKind::Local,
            "rest" => GatewayKind::Rest {
                url: lookup("VA_GATEWAY_URL").ok_or(ConfigError::Missing("VA_GATEWAY_URL"))?,
                anon_key: lookup("VA_GATEWAY_ANON_KEY")
                    .ok_or(ConfigError::Missing("VA_GATEWAY_ANON_KEY"))?,
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "VA_GATEWAY",
                    value: other.to_string(),
                })
            }
        };

        let bind_raw = lookup("VA_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            key: "VA_BIND",
            value: bind_raw.clone(),
        })?;

        let data_dir = lookup("VA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(app_data_dir);

        let utc_offset = match lookup("VA_UTC_OFFSET") {
            Some(raw) => parse_utc_offset(&raw).ok_or(ConfigError::Invalid {
                key: "VA_UTC_OFFSET",
                value: raw,
            })?,
            None => Local::now().offset().fix(),
        };

        let http_timeout_secs = match lookup("VA_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "VA_HTTP_TIMEOUT_SECS",
                value: raw,
            })?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        let bootstrap_admin = match (lookup("VA_BOOTSTRAP_EMAIL"), lookup("VA_BOOTSTRAP_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            (Some(_), None) => return Err(ConfigError::Missing("VA_BOOTSTRAP_PASSWORD")),
            _ => None,
        };

        Ok(Self {
            gateway,
            bind,
            data_dir,
            utc_offset,
            static_dir: lookup("VA_STATIC_DIR").map(PathBuf::from),
            http_timeout_secs,
            bootstrap_admin,
        })
    }

    /// Client-local preference store (active organization, theme).
    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.db")
    }

    /// Embedded gateway database, used when `VA_GATEWAY=local`.
    pub fn local_gateway_path(&self) -> PathBuf {
        self.data_dir.join("gateway.db")
    }
}

/// Parse `+HH:MM` / `-HH:MM` / `Z` into a fixed offset.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => (1, raw),
    };
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = h.parse().ok()?;
    let minutes: i32 = m.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_local_gateway() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("VA_UTC_OFFSET", "-03:00")])).unwrap();
        assert_eq!(cfg.gateway, GatewayKind::Local);
        assert_eq!(cfg.bind.to_string(), DEFAULT_BIND);
        assert_eq!(cfg.utc_offset.local_minus_utc(), -3 * 3600);
        assert_eq!(cfg.http_timeout_secs, 30);
    }

    #[test]
    fn rest_gateway_requires_url_and_key() {
        let err = AppConfig::from_lookup(lookup_from(&[("VA_GATEWAY", "rest")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("VA_GATEWAY_URL")));

        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("VA_GATEWAY", "rest"),
            ("VA_GATEWAY_URL", "https://example.test"),
            ("VA_GATEWAY_ANON_KEY", "anon"),
        ]))
        .unwrap();
        assert!(matches!(cfg.gateway, GatewayKind::Rest { .. }));
    }

    #[test]
    fn unknown_gateway_is_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[("VA_GATEWAY", "ftp")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "VA_GATEWAY", .. }));
    }

    #[test]
    fn data_paths_under_data_dir() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("VA_DATA_DIR", "/tmp/va")])).unwrap();
        assert!(cfg.preferences_path().starts_with("/tmp/va"));
        assert!(cfg.local_gateway_path().ends_with("gateway.db"));
    }

    #[test]
    fn bootstrap_admin_needs_both_values() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("VA_BOOTSTRAP_EMAIL", "root@vendor.com"),
            ("VA_BOOTSTRAP_PASSWORD", "pw"),
        ]))
        .unwrap();
        let admin = cfg.bootstrap_admin.unwrap();
        assert_eq!(admin.email, "root@vendor.com");
        assert!(!format!("{admin:?}").contains("pw"));

        let err = AppConfig::from_lookup(lookup_from(&[("VA_BOOTSTRAP_EMAIL", "a@b.com")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("VA_BOOTSTRAP_PASSWORD")));
    }

    #[test]
    fn utc_offset_parsing() {
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_utc_offset("+05:30").unwrap().local_minus_utc(), 19800);
        assert_eq!(parse_utc_offset("-03").unwrap().local_minus_utc(), -10800);
        assert!(parse_utc_offset("+25:00").is_none());
        assert!(parse_utc_offset("abc").is_none());
    }

    #[test]
    fn app_name_is_visionagenda() {
        assert_eq!(APP_NAME, "VisionAgenda");
    }
}
