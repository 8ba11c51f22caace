//! Server configuration.

use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum actions accepted in one batch request.
    pub max_batch: u32,
    /// Maximum page size the change feed will serve for paginated pulls.
    pub max_page: u32,
    /// Hard cap on the legacy non-paginated change-feed variant.
    pub legacy_cap: u32,
    /// How many recent idempotency keys are remembered per account.
    pub idempotency_window: usize,
    /// Deadline for applying one action.
    pub processing_deadline: Duration,
    /// Realtime sessions missing pings for this long are considered dead.
    pub heartbeat_timeout: Duration,
    /// Buffered notifications per realtime channel before lagging sessions
    /// start losing frames (they recover through the change feed).
    pub broadcast_capacity: usize,
    /// Whether realtime subscriptions require a token.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// Token lifetime.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            max_batch: 100,
            max_page: 500,
            legacy_cap: 1000,
            idempotency_window: 1024,
            processing_deadline: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(60),
            broadcast_capacity: 256,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the maximum batch size.
    pub fn with_max_batch(mut self, max: u32) -> Self {
        self.max_batch = max;
        self
    }

    /// Sets the maximum change-feed page size.
    pub fn with_max_page(mut self, max: u32) -> Self {
        self.max_page = max;
        self
    }

    /// Sets the legacy-pull hard cap.
    pub fn with_legacy_cap(mut self, cap: u32) -> Self {
        self.legacy_cap = cap;
        self
    }

    /// Sets the idempotency window size.
    pub fn with_idempotency_window(mut self, window: usize) -> Self {
        self.idempotency_window = window;
        self
    }

    /// Sets the per-action processing deadline.
    pub fn with_processing_deadline(mut self, deadline: Duration) -> Self {
        self.processing_deadline = deadline;
        self
    }

    /// Sets the heartbeat timeout for realtime sessions.
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Enables realtime-channel authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_batch, 100);
        assert!(!config.require_auth);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_batch(10)
            .with_max_page(50)
            .with_auth(vec![1, 2, 3, 4]);

        assert_eq!(config.max_batch, 10);
        assert_eq!(config.max_page, 50);
        assert!(config.require_auth);
        assert_eq!(config.auth_secret, Some(vec![1, 2, 3, 4]));
    }
}
