//! Rendezvous port negotiation
//!
//! The debugger listens on a local TCP port that the debuggee connects to.
//! A crashed earlier session may still hold the last port, so the search
//! starts just after it and wraps around the configured range.

use std::net::TcpListener;

use crate::common::{Error, Result};

/// Find a bindable port in `[min, max]`
///
/// Candidates are tried starting at `preferred + 1`, wrapping from `max` back
/// to `min`; `preferred` itself is tried last. A `preferred` outside the
/// range is clamped into it. Each test listener is dropped immediately.
pub fn negotiate(host: &str, preferred: u16, min: u16, max: u16) -> Result<u16> {
    if min > max {
        return Err(Error::PortExhausted { min, max });
    }

    let preferred = preferred.clamp(min, max);
    let span = u32::from(max - min) + 1;
    let offset = u32::from(preferred - min);

    for step in 1..=span {
        let candidate = (u32::from(min) + (offset + step) % span) as u16;
        match TcpListener::bind((host, candidate)) {
            Ok(listener) => {
                drop(listener);
                tracing::debug!(port = candidate, "Rendezvous port available");
                return Ok(candidate);
            }
            Err(e) => {
                tracing::trace!(port = candidate, error = %e, "Port busy");
            }
        }
    }

    tracing::warn!(min, max, "No free rendezvous port");
    Err(Error::PortExhausted { min, max })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bind an OS-assigned port and report it, keeping it occupied
    fn occupied() -> (TcpListener, u16) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_single_port_range_busy_fails() {
        let (_guard, port) = occupied();
        let err = negotiate("127.0.0.1", port, port, port).unwrap_err();
        assert!(matches!(err, Error::PortExhausted { min, max } if min == port && max == port));
    }

    #[test]
    fn test_single_port_range_free_succeeds() {
        let (guard, port) = occupied();
        drop(guard);
        assert_eq!(negotiate("127.0.0.1", port, port, port).unwrap(), port);
    }

    #[test]
    fn test_result_stays_in_range() {
        let (guard, port) = occupied();
        drop(guard);
        let min = port.saturating_sub(5).max(1024);
        let max = min.saturating_add(10);
        for preferred in [min, port, max, 1, u16::MAX] {
            let found = negotiate("127.0.0.1", preferred, min, max).unwrap();
            assert!((min..=max).contains(&found), "{} outside {}..={}", found, min, max);
        }
    }

    #[test]
    fn test_never_returns_a_busy_port() {
        let (_busy, port) = occupied();
        let max = port.saturating_add(1);
        match negotiate("127.0.0.1", port, port, max) {
            Ok(found) => assert_eq!(found, max),
            Err(e) => assert!(matches!(e, Error::PortExhausted { .. })),
        }
    }

    #[test]
    fn test_inverted_range_fails() {
        assert!(matches!(
            negotiate("127.0.0.1", 10, 20, 10),
            Err(Error::PortExhausted { .. })
        ));
    }
}
