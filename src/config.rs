//! Facade configuration and FUSE capability negotiation.

use std::fmt;
use std::time::Duration;

bitflags::bitflags! {
    /// The subset of FUSE `init` capability flags this translator
    /// negotiates. Pinned to exactly the bits the translator ever sets or
    /// clears, rather than the full capability set a general FUSE session
    /// would track.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InitCapabilities: u64 {
        const EXPORT_SUPPORT = 1 << 4;
        const SPLICE_WRITE = 1 << 7;
        const SPLICE_READ = 1 << 9;
        const FLOCK_LOCKS = 1 << 10;
        const WRITEBACK_CACHE = 1 << 16;
    }
}

/// Negotiates the capability flags to request from the host, given the
/// peer's advertised flags and whether a non-zero cache timeout is
/// configured. `EXPORT_SUPPORT` and `FLOCK_LOCKS` are always requested;
/// `WRITEBACK_CACHE` only if the peer supports it and a timeout was
/// configured; `SPLICE_READ`/`SPLICE_WRITE` are always cleared, since
/// splicing is incompatible with the virtio-fs transport.
pub fn negotiate_capabilities(peer_flags: InitCapabilities, timeout: Duration) -> InitCapabilities {
    let mut flags = InitCapabilities::EXPORT_SUPPORT | InitCapabilities::FLOCK_LOCKS;
    if !timeout.is_zero() && peer_flags.contains(InitCapabilities::WRITEBACK_CACHE) {
        flags |= InitCapabilities::WRITEBACK_CACHE;
    }
    flags &= !(InitCapabilities::SPLICE_READ | InitCapabilities::SPLICE_WRITE);
    flags
}

/// The facade's configuration surface.
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    pub server: String,
    pub export: String,
    pub debug: bool,
    pub timeout: Duration,
    pub nthreads: usize,
    pub pool_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid translator configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl TranslatorConfig {
    /// Validates the configuration before any network I/O starts. `export`
    /// must be an absolute path: a relative export is a fatal startup
    /// error, not a runtime one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.export.starts_with('/') {
            return Err(ConfigError(format!(
                "export path {:?} must be absolute (start with '/')",
                self.export
            )));
        }
        if self.server.is_empty() {
            return Err(ConfigError("server address must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_relative_export() {
        let config = TranslatorConfig {
            server: "127.0.0.1".into(),
            export: "srv/data".into(),
            debug: false,
            timeout: Duration::ZERO,
            nthreads: 1,
            pool_capacity: 64,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_absolute_export() {
        let config = TranslatorConfig {
            server: "127.0.0.1".into(),
            export: "/srv/data".into(),
            debug: false,
            timeout: Duration::ZERO,
            nthreads: 1,
            pool_capacity: 64,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn negotiate_clears_splice_flags_unconditionally() {
        let peer = InitCapabilities::all();
        let flags = negotiate_capabilities(peer, Duration::from_secs(1));
        assert!(!flags.contains(InitCapabilities::SPLICE_READ));
        assert!(!flags.contains(InitCapabilities::SPLICE_WRITE));
        assert!(flags.contains(InitCapabilities::WRITEBACK_CACHE));
    }

    #[test]
    fn negotiate_skips_writeback_cache_at_zero_timeout() {
        let peer = InitCapabilities::all();
        let flags = negotiate_capabilities(peer, Duration::ZERO);
        assert!(!flags.contains(InitCapabilities::WRITEBACK_CACHE));
        assert!(flags.contains(InitCapabilities::EXPORT_SUPPORT));
        assert!(flags.contains(InitCapabilities::FLOCK_LOCKS));
    }
}
