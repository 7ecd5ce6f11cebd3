use std::path::PathBuf;

/// Server configuration, read once from the environment at startup.
/// Library components never touch the environment themselves.
#[derive(Clone, Debug)]
pub struct Config {
    pub listen: String,
    /// SQLite file path; `None` keeps the catalog in memory.
    pub db_path: Option<PathBuf>,
    /// Accepted bearer tokens; empty disables the auth check.
    pub auth_tokens: Vec<String>,
    /// Requests per second for the global limiter.
    pub rate_limit_per_sec: f64,
    pub rate_limit_burst: f64,
    /// Register the in-memory demo adapter and subgraph at startup.
    pub demo: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9400".into(),
            db_path: None,
            auth_tokens: Vec::new(),
            rate_limit_per_sec: 200.0,
            rate_limit_burst: 400.0,
            demo: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen: env_string("DICTAMESH_LISTEN").unwrap_or(defaults.listen),
            db_path: env_string("DICTAMESH_DB").map(PathBuf::from),
            auth_tokens: env_string("DICTAMESH_TOKENS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            rate_limit_per_sec: env_string("DICTAMESH_RATE_LIMIT")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(defaults.rate_limit_per_sec),
            rate_limit_burst: env_string("DICTAMESH_RATE_BURST")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(defaults.rate_limit_burst),
            demo: env_string("DICTAMESH_DEMO").is_some_and(|raw| raw == "1" || raw == "true"),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
