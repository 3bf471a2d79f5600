use std::time::Duration;

/// Default base URL of the DevCraft API.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";
/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Default status polling cadence in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
/// Default number of consecutive failed status queries before giving up.
pub const DEFAULT_MAX_POLL_FAILURES: u32 = 5;

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Where and how to reach the DevCraft API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP base URL, e.g. `http://localhost:8000`.
    pub api_url: String,
    /// WebSocket base URL, e.g. `ws://localhost:8000`.
    pub ws_url: String,
    /// Per-request timeout for HTTP calls.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_api_url(DEFAULT_API_URL)
    }
}

impl ClientConfig {
    /// Build a config for `api_url`, deriving the WebSocket URL from it.
    pub fn for_api_url(api_url: &str) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        Self {
            ws_url: derive_ws_url(&api_url),
            api_url,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                  |
    /// |---------------------------------|--------------------------|
    /// | `DEVCRAFT_API_URL`              | `http://localhost:8000`  |
    /// | `DEVCRAFT_WS_URL`               | derived from the API URL |
    /// | `DEVCRAFT_REQUEST_TIMEOUT_SECS` | `30`                     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("DEVCRAFT_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: "DEVCRAFT_API_URL",
                value: api_url,
                reason: "must start with http:// or https://".into(),
            });
        }

        let mut config = Self::for_api_url(&api_url);

        if let Some(ws_url) = lookup("DEVCRAFT_WS_URL") {
            if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
                return Err(ConfigError::Invalid {
                    var: "DEVCRAFT_WS_URL",
                    value: ws_url,
                    reason: "must start with ws:// or wss://".into(),
                });
            }
            config.ws_url = ws_url.trim_end_matches('/').to_string();
        }

        let timeout_secs = parse_var(
            &lookup,
            "DEVCRAFT_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        config.request_timeout = Duration::from_secs(timeout_secs);

        Ok(config)
    }
}

/// Tracking policy for one session.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Delay between status queries. The first query is issued immediately.
    pub poll_interval: Duration,
    /// Consecutive failed status queries that end the session with
    /// `"status unavailable"`.
    pub max_consecutive_failures: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_consecutive_failures: DEFAULT_MAX_POLL_FAILURES,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `DEVCRAFT_POLL_INTERVAL_MS`  | `1000`  |
    /// | `DEVCRAFT_MAX_POLL_FAILURES` | `5`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let interval_ms = parse_var(&lookup, "DEVCRAFT_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        if interval_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "DEVCRAFT_POLL_INTERVAL_MS",
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }

        let max_failures =
            parse_var(&lookup, "DEVCRAFT_MAX_POLL_FAILURES", DEFAULT_MAX_POLL_FAILURES)?;
        if max_failures == 0 {
            return Err(ConfigError::Invalid {
                var: "DEVCRAFT_MAX_POLL_FAILURES",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            poll_interval: Duration::from_millis(interval_ms),
            max_consecutive_failures: max_failures,
        })
    }
}

/// Map `http://` to `ws://` and `https://` to `wss://`.
pub fn derive_ws_url(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_url.to_string()
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => {
            let parsed: Result<T, T::Err> = value.trim().parse();
            parsed.map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use assert_matches::assert_matches;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn client_defaults() {
        let config = ClientConfig::from_lookup(vars(&[])).unwrap();
        assert_eq!(config.api_url, "http://localhost:8000");
        assert_eq!(config.ws_url, "ws://localhost:8000");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn https_api_derives_wss() {
        let config =
            ClientConfig::from_lookup(vars(&[("DEVCRAFT_API_URL", "https://devcraft.example/")]))
                .unwrap();
        assert_eq!(config.api_url, "https://devcraft.example");
        assert_eq!(config.ws_url, "wss://devcraft.example");
    }

    #[test]
    fn explicit_ws_url_wins() {
        let config = ClientConfig::from_lookup(vars(&[
            ("DEVCRAFT_API_URL", "http://api:8000"),
            ("DEVCRAFT_WS_URL", "ws://logs:9000"),
        ]))
        .unwrap();
        assert_eq!(config.ws_url, "ws://logs:9000");
    }

    #[test]
    fn bad_scheme_rejected() {
        assert_matches!(
            ClientConfig::from_lookup(vars(&[("DEVCRAFT_API_URL", "ftp://x")])),
            Err(ConfigError::Invalid { var: "DEVCRAFT_API_URL", .. })
        );
    }

    #[test]
    fn tracker_defaults_match_observed_cadence() {
        let config = TrackerConfig::from_lookup(vars(&[])).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.max_consecutive_failures, 5);
    }

    #[test]
    fn tracker_overrides_parse() {
        let config = TrackerConfig::from_lookup(vars(&[
            ("DEVCRAFT_POLL_INTERVAL_MS", "250"),
            ("DEVCRAFT_MAX_POLL_FAILURES", "3"),
        ]))
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.max_consecutive_failures, 3);
    }

    #[test]
    fn zero_values_rejected() {
        assert!(TrackerConfig::from_lookup(vars(&[("DEVCRAFT_POLL_INTERVAL_MS", "0")])).is_err());
        assert!(TrackerConfig::from_lookup(vars(&[("DEVCRAFT_MAX_POLL_FAILURES", "0")])).is_err());
    }

    #[test]
    fn non_numeric_value_rejected() {
        assert_matches!(
            TrackerConfig::from_lookup(vars(&[("DEVCRAFT_POLL_INTERVAL_MS", "fast")])),
            Err(ConfigError::Invalid { var: "DEVCRAFT_POLL_INTERVAL_MS", .. })
        );
    }
}
