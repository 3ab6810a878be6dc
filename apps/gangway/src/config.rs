use std::env;

/// Gangway client configuration sourced from the environment. CLI flags
/// override these values.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway control API base url.
    pub gateway: String,
    /// Operator auth token presented to the gateway.
    pub auth_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let gateway =
            env::var("GANGWAY_GATEWAY").unwrap_or_else(|_| "127.0.0.1:8088".to_string());
        let auth_token = env::var("GANGWAY_TOKEN")
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        Self {
            gateway,
            auth_token,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: "127.0.0.1:8088".to_string(),
            auth_token: None,
        }
    }
}
