/// Realtime hub configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// Heartbeat interval advertised to clients in `hello` (ms). A connection
    /// silent for 1.5x this long is closed.
    pub heartbeat_interval_ms: u64,
    /// Allowed CORS origin. `None` allows any origin.
    pub cors_allow_origin: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a variable is set but invalid.
    pub fn from_env() -> Self {
        Self {
            port: parsed_var("PORT", 4003),
            heartbeat_interval_ms: nonzero(
                "HEARTBEAT_INTERVAL_MS",
                parsed_var("HEARTBEAT_INTERVAL_MS", 41250),
            ),
            cors_allow_origin: std::env::var("CORS_ALLOW_ORIGIN")
                .ok()
                .filter(|s| !s.is_empty() && s != "*"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4003,
            heartbeat_interval_ms: 41250,
            cors_allow_origin: None,
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v
            .parse()
            .unwrap_or_else(|_| panic!("{name} env var is invalid: {v:?}")),
        _ => default,
    }
}

fn nonzero(name: &str, value: u64) -> u64 {
    if value == 0 {
        panic!("{name} env var must be greater than zero");
    }
    value
}
