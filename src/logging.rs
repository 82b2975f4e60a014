//! Diagnostic logging for the proxy engine.
//!
//! The engine logs sparingly: readiness-wait retry storms, peer resets, and
//! call-level entry/exit. Per-byte or per-iteration tracing would defeat the
//! point of a byte-shovelling loop, so nothing in the hot path logs.
//!
//! With the `logwise` feature enabled, messages go through `logwise`'s
//! structured, privacy-aware sync logging macros. Without it, they fall back
//! to stderr.

/// Logs an informational diagnostic (retry storms, call boundaries).
pub fn info(str: &str) {
    #[cfg(feature = "logwise")]
    {
        logwise::info_sync!("{msg}", msg = str);
    }
    #[cfg(not(feature = "logwise"))]
    {
        eprintln!("{}", str);
    }
}

/// Logs a warning-level diagnostic (peer reset, socket torn down mid-call).
pub fn warn(str: &str) {
    #[cfg(feature = "logwise")]
    {
        logwise::warn_sync!("{msg}", msg = str);
    }
    #[cfg(not(feature = "logwise"))]
    {
        eprintln!("warning: {}", str);
    }
}
