//! Tracing setup and log-safe text fingerprints.

use sha2::{Digest, Sha256};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber once.
///
/// Filter from `RUST_LOG`, else `LOG_LEVEL`, else `default_filter`.
/// `LOG_FORMAT=json` switches to JSON lines. A second call is a no-op.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().compact().with_target(true)).try_init()
    };
}

/// Short stable digest of a text, for logging without leaking email content.
pub fn text_fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_short_and_stable() {
        let a = text_fingerprint("Please confirm my booking.");
        assert_eq!(a.len(), 12);
        assert_eq!(a, text_fingerprint("Please confirm my booking."));
        assert_ne!(a, text_fingerprint("Please confirm my booking!"));
    }

    #[test]
    fn init_twice_does_not_panic() {
        init_tracing("warn");
        init_tracing("warn");
    }
}
