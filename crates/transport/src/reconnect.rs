//! Reconnect delay tiers.

use std::time::Duration;

use cb_domain::config::ReconnectConfig;

use crate::types::DisconnectClass;

/// How long to wait before reconnecting after a disconnect.
///
/// `attempts` is the reconnect counter *after* the close has been counted,
/// so the first generic drop is attempt 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub generic_base: Duration,
    pub max_delay: Duration,
    pub replaced_step: Duration,
    /// Replaced-session reconnects stop once attempts exceed this.
    pub replaced_max_attempts: u32,
    pub logged_out_delay: Duration,
    /// A connection open at least this long resets the counter on close.
    pub stability_threshold: Duration,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(c: &ReconnectConfig) -> Self {
        Self {
            generic_base: Duration::from_millis(c.generic_base_ms),
            max_delay: Duration::from_millis(c.max_delay_ms),
            replaced_step: Duration::from_millis(c.replaced_step_ms),
            replaced_max_attempts: c.replaced_max_attempts,
            logged_out_delay: Duration::from_millis(c.logged_out_delay_ms),
            stability_threshold: Duration::from_millis(c.stability_threshold_ms),
            connect_timeout: Duration::from_millis(c.connect_timeout_ms),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt, or `None` to stop reconnecting.
    pub fn delay_for(&self, class: DisconnectClass, attempts: u32) -> Option<Duration> {
        match class {
            DisconnectClass::SessionInvalidated => Some(self.logged_out_delay),
            DisconnectClass::Replaced => {
                if self.gives_up(class, attempts) {
                    return None;
                }
                Some(self.replaced_step.saturating_mul(attempts).min(self.max_delay))
            }
            DisconnectClass::Generic => {
                let exp = attempts.saturating_sub(1).min(31);
                Some(self.generic_base.saturating_mul(1u32 << exp).min(self.max_delay))
            }
        }
    }

    /// Whether `attempts` is past the ceiling for this class.  Only the
    /// replaced-session tier has one.
    pub fn gives_up(&self, class: DisconnectClass, attempts: u32) -> bool {
        class == DisconnectClass::Replaced && attempts > self.replaced_max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(d: Option<Duration>) -> u64 {
        d.map(|d| d.as_millis() as u64).unwrap_or(u64::MAX)
    }

    #[test]
    fn default_policy_values() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.generic_base, Duration::from_secs(2));
        assert_eq!(p.max_delay, Duration::from_secs(60));
        assert_eq!(p.replaced_max_attempts, 10);
        assert_eq!(p.stability_threshold, Duration::from_secs(20));
    }

    #[test]
    fn generic_grows_exponentially_then_caps() {
        let p = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=7)
            .map(|n| ms(p.delay_for(DisconnectClass::Generic, n)))
            .collect();
        assert_eq!(delays, vec![2_000, 4_000, 8_000, 16_000, 32_000, 60_000, 60_000]);
    }

    #[test]
    fn generic_never_overflows() {
        let p = ReconnectPolicy::default();
        assert_eq!(ms(p.delay_for(DisconnectClass::Generic, u32::MAX)), 60_000);
    }

    #[test]
    fn replaced_grows_linearly_then_caps() {
        let p = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=7)
            .map(|n| ms(p.delay_for(DisconnectClass::Replaced, n)))
            .collect();
        assert_eq!(delays, vec![10_000, 20_000, 30_000, 40_000, 50_000, 60_000, 60_000]);
    }

    #[test]
    fn replaced_stops_past_ceiling() {
        let p = ReconnectPolicy::default();
        assert!(p.delay_for(DisconnectClass::Replaced, 10).is_some());
        assert!(p.delay_for(DisconnectClass::Replaced, 11).is_none());
        assert!(p.gives_up(DisconnectClass::Replaced, 11));
        assert!(!p.gives_up(DisconnectClass::Generic, 1_000));
    }

    #[test]
    fn logged_out_uses_fixed_delay() {
        let p = ReconnectPolicy::default();
        assert_eq!(ms(p.delay_for(DisconnectClass::SessionInvalidated, 0)), 3_000);
        assert_eq!(ms(p.delay_for(DisconnectClass::SessionInvalidated, 9)), 3_000);
    }

    #[test]
    fn built_from_config() {
        let cfg = ReconnectConfig {
            generic_base_ms: 100,
            max_delay_ms: 250,
            ..Default::default()
        };
        let p = ReconnectPolicy::from(&cfg);
        assert_eq!(ms(p.delay_for(DisconnectClass::Generic, 1)), 100);
        assert_eq!(ms(p.delay_for(DisconnectClass::Generic, 2)), 200);
        assert_eq!(ms(p.delay_for(DisconnectClass::Generic, 3)), 250);
    }
}
