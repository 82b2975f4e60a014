//! Engine tunables.
//!
//! Promoted from the fixed preprocessor constants (`BUFSIZE`, `SLEEPTIME`) a
//! C rewrite of this engine would hardcode, so callers — and tests — can
//! override them without touching engine internals.

use std::time::Duration;

/// Tunables recognized by the engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Size of the stack buffer used for each receive call.
    pub buf_size: usize,
    /// Base back-off interval slept after an `EINTR` storm on the readiness
    /// wait, before retrying.
    pub sleep_time: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            buf_size: 8192,
            sleep_time: Duration::from_millis(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let cfg = EngineConfig::default();
        assert!(cfg.buf_size > 0);
        assert!(cfg.sleep_time > Duration::ZERO);
    }
}
