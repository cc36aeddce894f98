use std::time::Duration;

use parley_shared::constants::{DEFAULT_PAGE_SIZE, TYPING_IDLE_MS};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL, e.g. `http://localhost:8080`.
    pub base_url: String,

    /// Encoded session credential from the identity provider.
    pub token: String,

    /// History page size.
    pub page_size: u32,

    /// Idle period after the last keystroke before typing-stop is sent.
    pub typing_idle: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            page_size: DEFAULT_PAGE_SIZE,
            typing_idle: Duration::from_millis(TYPING_IDLE_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("http://localhost:8080/", "tok");
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.page_size, 30);
        assert_eq!(config.typing_idle, Duration::from_secs(3));
    }
}
