use crate::config::SyncConfig;
use std::time::Duration;

/// Wait before the next attempt after `failed_attempts` consecutive failures
///
/// Doubles from `base_backoff_ms` and never exceeds `max_backoff_ms`.
pub fn backoff_delay(config: &SyncConfig, failed_attempts: u32) -> Duration {
    let mut delay = config.base_backoff_ms;
    for _ in 1..failed_attempts {
        if delay == 0 || delay >= config.max_backoff_ms {
            break;
        }
        delay = delay.saturating_mul(2);
    }
    Duration::from_millis(delay.min(config.max_backoff_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: u64, max: u64) -> SyncConfig {
        SyncConfig {
            retry_limit: 3,
            base_backoff_ms: base,
            max_backoff_ms: max,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let config = config(100, 10_000);
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = config(1_000, 5_000);
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(5_000));
        assert_eq!(backoff_delay(&config, u32::MAX), Duration::from_millis(5_000));
    }
}
