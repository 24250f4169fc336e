//! Port availability checks used for boot-time crash recovery detection.
//!
//! Models in this gateway use fixed, configured ports rather than dynamic
//! allocation, so this module only ever answers "is this port free" — it
//! never hands out a port of its own choosing.

use std::net::TcpListener;

/// Check if a port is available by binding to it and immediately dropping
/// the listener, which releases it back to the OS.
#[must_use]
pub fn is_port_available(port: u16) -> bool {
    match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener.local_addr().is_ok(),
        Err(_) => false,
    }
}

/// Scan every configured port at boot and report which are already bound by
/// some other process. An inherited listener on a configured port is a hard
/// configuration error rather than something the gateway silently adopts or
/// steals.
#[must_use]
pub fn find_occupied_ports<'a, I>(ports: I) -> Vec<u16>
where
    I: IntoIterator<Item = &'a u16>,
{
    ports
        .into_iter()
        .copied()
        .filter(|&port| !is_port_available(port))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_a_port_held_open() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(!is_port_available(port));

        let occupied = find_occupied_ports(&[port]);
        assert_eq!(occupied, vec![port]);

        drop(listener);
        assert!(is_port_available(port));
    }

    #[test]
    fn reports_nothing_occupied_for_free_ports() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let free_port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(find_occupied_ports(&[free_port]).is_empty());
    }
}
