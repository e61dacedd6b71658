//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the client runs with zero
//! configuration against a local development swarm.

use std::time::Duration;

/// Tunables for polling, job retry, and group key handling.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the swarm storage node this client talks to.
    /// Env: `UMBRA_SWARM_URL`
    /// Default: `http://127.0.0.1:22021`
    pub swarm_url: String,

    /// Poll interval bounds for the user's own swarm.
    pub user_poll_min: Duration,
    pub user_poll_max: Duration,

    /// Poll interval bounds for group swarms.
    pub group_poll_min: Duration,
    pub group_poll_max: Duration,

    /// Poll interval bounds for community servers.
    pub community_poll_min: Duration,
    pub community_poll_max: Duration,

    /// Consecutive failures after which a target that is not user-visible
    /// is dropped instead of retried forever.
    /// Env: `UMBRA_PRUNE_THRESHOLD`
    /// Default: `10`
    pub prune_failure_threshold: u32,

    /// Base delay for job retry backoff (doubles per failure).
    pub job_retry_base: Duration,

    /// Ceiling for job retry backoff.
    /// Env: `UMBRA_JOB_MAX_BACKOFF_SECS`
    /// Default: 600 seconds
    pub job_max_backoff: Duration,

    /// How often the job runner re-checks the store for due jobs.
    pub job_tick: Duration,

    /// How long superseded group keys are retained for trial decryption.
    pub key_retention: Duration,

    /// Window for aggregating group-operation failure notifications.
    pub failure_debounce: Duration,

    /// Time-to-live requested when storing messages in a swarm.
    pub message_ttl_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            swarm_url: "http://127.0.0.1:22021".to_string(),
            user_poll_min: Duration::from_secs(3),
            user_poll_max: Duration::from_secs(60),
            group_poll_min: Duration::from_secs(5),
            group_poll_max: Duration::from_secs(300),
            community_poll_min: Duration::from_secs(10),
            community_poll_max: Duration::from_secs(600),
            prune_failure_threshold: 10,
            job_retry_base: Duration::from_secs(2),
            job_max_backoff: Duration::from_secs(600),
            job_tick: Duration::from_secs(1),
            key_retention: Duration::from_secs(14 * 24 * 60 * 60),
            failure_debounce: Duration::from_millis(1500),
            message_ttl_ms: umbra_shared::constants::DEFAULT_MESSAGE_TTL_MS,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("UMBRA_SWARM_URL") {
            if !url.is_empty() {
                config.swarm_url = url;
            }
        }

        if let Ok(val) = std::env::var("UMBRA_PRUNE_THRESHOLD") {
            match val.parse::<u32>() {
                Ok(n) => config.prune_failure_threshold = n,
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid UMBRA_PRUNE_THRESHOLD, using default");
                }
            }
        }

        if let Ok(val) = std::env::var("UMBRA_JOB_MAX_BACKOFF_SECS") {
            match val.parse::<u64>() {
                Ok(n) => config.job_max_backoff = Duration::from_secs(n),
                Err(_) => {
                    tracing::warn!(
                        value = %val,
                        "Invalid UMBRA_JOB_MAX_BACKOFF_SECS, using default"
                    );
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ClientConfig::default();
        assert!(config.user_poll_min < config.user_poll_max);
        assert!(config.group_poll_min < config.group_poll_max);
        assert!(config.community_poll_min < config.community_poll_max);
        assert!(config.job_retry_base < config.job_max_backoff);
        assert_eq!(config.prune_failure_threshold, 10);
    }
}
