//! Engine timing and storage configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ─── Config ───────────────────────────────────────────────────────────────

/// Configuration for [`SyncEngine`](crate::SyncEngine).
///
/// Every delay is in milliseconds. Missing fields in a config file fall back
/// to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Pause after a storage notification before reading, so the external
    /// app can finish its own write. Default: **50**.
    pub settle_delay_ms: u64,

    /// Delay before another drain pass when notifications arrived during the
    /// previous one. Default: **100**.
    pub requeue_delay_ms: u64,

    /// Quiet window before an autosave fires. Must exceed the external app's
    /// own save latency so reads observe settled state. Default: **500**.
    pub autosave_debounce_ms: u64,

    /// Quiet window for rapid document selections. Default: **250**.
    pub switch_debounce_ms: u64,

    /// Bound on waiting for a sync event to be acknowledged. Default: **3000**.
    pub ack_timeout_ms: u64,

    /// Grace delay between writing a document and requesting a reload.
    /// Default: **100**.
    pub reload_grace_ms: u64,

    /// Operations older than this are never allowed to commit. Default: **10000**.
    pub staleness_ms: u64,

    /// Retries after a failed sync before a terminal error. Default: **3**.
    pub max_retries: u32,

    /// First retry delay; doubles on every further attempt. Default: **1000**.
    pub retry_base_delay_ms: u64,

    /// Request a host reload after loading a document. Default: **true**.
    pub force_reload: bool,

    /// Storage slot holding the bare record array.
    pub elements_key: String,

    /// Storage slot holding the view-state map.
    pub view_state_key: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 50,
            requeue_delay_ms: 100,
            autosave_debounce_ms: 500,
            switch_debounce_ms: 250,
            ack_timeout_ms: 3000,
            reload_grace_ms: 100,
            staleness_ms: 10_000,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            force_reload: true,
            elements_key: "excalidraw".to_string(),
            view_state_key: "excalidraw-state".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),

    #[error("storage slot keys must be distinct and non-empty")]
    SlotKeys,

    #[error(
        "retry {attempt} waits {delay_ms}ms plus {ack_timeout_ms}ms for acknowledgement, \
         past the {staleness_ms}ms staleness bound"
    )]
    RetryOutlivesStaleness {
        attempt: u32,
        delay_ms: u64,
        ack_timeout_ms: u64,
        staleness_ms: u64,
    },
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("autosave_debounce_ms", self.autosave_debounce_ms),
            ("switch_debounce_ms", self.switch_debounce_ms),
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("staleness_ms", self.staleness_ms),
            ("retry_base_delay_ms", self.retry_base_delay_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }

        if self.elements_key.is_empty()
            || self.view_state_key.is_empty()
            || self.elements_key == self.view_state_key
        {
            return Err(ConfigError::SlotKeys);
        }

        // The longest retry must still be valid when it finally commits.
        if self.max_retries > 0 {
            let delay = self.retry_delay(self.max_retries).as_millis() as u64;
            if delay.saturating_add(self.ack_timeout_ms) >= self.staleness_ms {
                return Err(ConfigError::RetryOutlivesStaleness {
                    attempt: self.max_retries,
                    delay_ms: delay,
                    ack_timeout_ms: self.ack_timeout_ms,
                    staleness_ms: self.staleness_ms,
                });
            }
        }
        Ok(())
    }

    /// Backoff before retry `attempt` (1-based): `base * 2^(attempt - 1)`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(1u64 << exponent))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn switch_debounce(&self) -> Duration {
        Duration::from_millis(self.switch_debounce_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn reload_grace(&self) -> Duration {
        Duration::from_millis(self.reload_grace_ms)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_millis(self.staleness_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(SyncConfig::default().validate(), Ok(()));
    }

    #[test]
    fn retry_delays_strictly_increase() {
        let config = SyncConfig::default();
        let delays: Vec<Duration> = (1..=5).map(|n| config.retry_delay(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]), "{delays:?}");
        assert_eq!(delays[0], Duration::from_millis(1000));
        assert_eq!(delays[2], Duration::from_millis(4000));
    }

    #[test]
    fn rejects_retry_that_would_be_stale() {
        let config = SyncConfig {
            max_retries: 5,
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RetryOutlivesStaleness { attempt: 5, .. })
        ));
    }

    #[test]
    fn rejects_zero_debounce_and_shared_slot() {
        let zero = SyncConfig {
            autosave_debounce_ms: 0,
            ..SyncConfig::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::Zero("autosave_debounce_ms")));

        let shared = SyncConfig {
            view_state_key: "excalidraw".into(),
            ..SyncConfig::default()
        };
        assert_eq!(shared.validate(), Err(ConfigError::SlotKeys));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{ "autosave_debounce_ms": 800, "force_reload": false }"#)
                .unwrap();
        assert_eq!(config.autosave_debounce_ms, 800);
        assert!(!config.force_reload);
        assert_eq!(config.max_retries, 3);
    }
}
