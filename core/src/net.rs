//! Node address helpers
//!
//! Small utilities for validating and splitting node addresses, plus
//! best-effort detection of the address other members should use to reach
//! this node.

use crate::process::Process;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use schema::IoDirection;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr};
use tracing::{debug, warn};

/// Shell pipeline printing the first global IPv4 address of this host
pub const DEFAULT_IP_PROBE: &str =
    "ip -o -4 addr show scope global | awk '{ split($4, a, \"/\"); print a[1]; exit }'";

/// Whether `addr` is an IPv4 or IPv6 literal
///
/// IPv6 literals may be enclosed in brackets.
pub fn check_ip(addr: &str) -> bool {
    let addr = addr.trim();
    let literal = addr
        .strip_prefix('[')
        .and_then(|a| a.strip_suffix(']'))
        .unwrap_or(addr);
    literal.parse::<IpAddr>().is_ok()
}

/// Length in bytes of the host part of an `address[:port]` string
///
/// A bracketed IPv6 host includes both brackets. Otherwise the host ends at
/// the first `:` or at the end of the string.
pub fn host_len(addr: &str) -> usize {
    if addr.starts_with('[') {
        if let Some(close) = addr.find(']') {
            return close + 1;
        }
    }
    addr.find(':').unwrap_or(addr.len())
}

/// Guess the address this node should advertise
///
/// In order of preference:
/// 1. `bind_address`, if it is a specific (non-wildcard) IP
/// 2. the first line printed by `probe_cmd`, if it is an IP
/// 3. the first IPv4 address of a non-loopback interface
pub fn guess_ip(bind_address: Option<&str>, probe_cmd: &str) -> Option<String> {
    if let Some(addr) = bind_address.map(str::trim).filter(|a| !a.is_empty()) {
        match addr.parse::<IpAddr>() {
            Ok(ip) if !ip.is_unspecified() => return Some(ip.to_string()),
            Ok(_) => debug!("Bind address {} is a wildcard, probing", addr),
            Err(_) => warn!("Bind address '{}' is not an IP address, probing", addr),
        }
    }

    if !probe_cmd.trim().is_empty() {
        if let Some(ip) = probe_with_command(probe_cmd) {
            return Some(ip);
        }
    }

    first_interface_address()
}

fn probe_with_command(cmd: &str) -> Option<String> {
    let mut probe = Process::new(cmd, IoDirection::Read, None, true);
    if probe.error() != 0 {
        warn!("Failed to run address probe '{}': errno {}", cmd, probe.error());
        return None;
    }

    let mut output = String::new();
    let read = probe
        .pipe()
        .map(|pipe| pipe.read_to_string(&mut output));
    let status = probe.wait();

    if status != 0 {
        warn!("Address probe '{}' exited with {}", cmd, status);
        return None;
    }
    if let Some(Err(e)) = read {
        warn!("Failed to read output of address probe '{}': {}", cmd, e);
        return None;
    }

    let candidate = output.lines().next().unwrap_or_default().trim();
    if check_ip(candidate) {
        debug!("Address probe reported {}", candidate);
        Some(candidate.to_string())
    } else {
        warn!("Address probe '{}' printed '{}', not an IP address", cmd, candidate);
        None
    }
}

fn first_interface_address() -> Option<String> {
    let addrs = match getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            warn!("Failed to enumerate network interfaces: {}", e);
            return None;
        }
    };

    addrs
        .filter(|ifaddr| !ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK))
        .filter_map(|ifaddr| {
            let sin = ifaddr.address.as_ref()?.as_sockaddr_in()?;
            let ip = Ipv4Addr::from(sin.ip());
            debug!("Using address {} of interface {}", ip, ifaddr.interface_name);
            Some(ip.to_string())
        })
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_ip() {
        assert!(check_ip("192.168.1.10"));
        assert!(check_ip("::1"));
        assert!(check_ip("[fe80::1]"));
        assert!(check_ip(" 10.0.0.1 "));
        assert!(!check_ip("node1.example.com"));
        assert!(!check_ip("192.168.1.300"));
        assert!(!check_ip(""));
        assert!(!check_ip("[10.0.0.1"));
    }

    #[test]
    fn test_host_len() {
        assert_eq!(host_len("192.168.1.10:4567"), 12);
        assert_eq!(host_len("192.168.1.10"), 12);
        assert_eq!(host_len("[::1]:4567"), 5);
        assert_eq!(host_len("[fe80::1]"), 9);
        assert_eq!(host_len("node1:4444"), 5);
        assert_eq!(host_len(""), 0);
    }

    #[test]
    fn test_guess_ip_prefers_bind_address() {
        assert_eq!(
            guess_ip(Some("10.1.2.3"), "echo 10.9.9.9").as_deref(),
            Some("10.1.2.3")
        );
    }

    #[test]
    fn test_guess_ip_probes_when_bind_is_wildcard() {
        assert_eq!(
            guess_ip(Some("0.0.0.0"), "echo 10.9.9.9; echo 10.8.8.8").as_deref(),
            Some("10.9.9.9")
        );
        assert_eq!(guess_ip(None, "printf '172.16.0.4\\n'").as_deref(), Some("172.16.0.4"));
    }

    #[test]
    fn test_failed_probe_falls_back_to_interfaces() {
        // The fallback depends on the host's interfaces; it must only ever
        // yield a valid IPv4 address.
        if let Some(ip) = guess_ip(None, "echo not-an-address") {
            assert!(ip.parse::<Ipv4Addr>().is_ok());
        }
        if let Some(ip) = guess_ip(Some("bogus"), "exit 1") {
            assert!(ip.parse::<Ipv4Addr>().is_ok());
        }
    }
}
