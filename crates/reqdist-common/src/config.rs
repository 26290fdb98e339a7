//! Process-wide settings read from the environment.
//!
//! | variable | meaning | default |
//! |---|---|---|
//! | `REQDIST_BASE_IP` | prefix of the local address to advertise | unset |
//! | `REQDIST_CLOCK_AMOUNT` | declared clock capacity (MHz) | probed |
//! | `REQDIST_MEMORY_AMOUNT` | declared memory capacity (MB) | probed |
//! | `REQDIST_VERIFICATION_INTERVAL_MS` | connection check period while connected | 30000 |
//! | `REQDIST_RECONNECTION_INTERVAL_MS` | retry period while disconnected | 5000 |
//! | `REQDIST_CONNECT_TIMEOUT_MS` | TCP connect timeout | 10000 |

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::str::FromStr;
use std::time::Duration;

use crate::protocol::error::{ReqdistError, Result};

pub const BASE_IP_VAR: &str = "REQDIST_BASE_IP";
pub const CLOCK_AMOUNT_VAR: &str = "REQDIST_CLOCK_AMOUNT";
pub const MEMORY_AMOUNT_VAR: &str = "REQDIST_MEMORY_AMOUNT";
pub const VERIFICATION_INTERVAL_VAR: &str = "REQDIST_VERIFICATION_INTERVAL_MS";
pub const RECONNECTION_INTERVAL_VAR: &str = "REQDIST_RECONNECTION_INTERVAL_MS";
pub const CONNECT_TIMEOUT_VAR: &str = "REQDIST_CONNECT_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Prefix used to pick which local address to advertise.
    pub base_ip: Option<String>,
    /// Declared clock capacity, overriding the probe.
    pub clock_amount: Option<i64>,
    /// Declared memory capacity, overriding the probe.
    pub memory_amount: Option<i64>,
    pub verification_interval: Duration,
    pub reconnection_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_ip: None,
            clock_amount: None,
            memory_amount: None,
            verification_interval: Duration::from_millis(30_000),
            reconnection_interval: Duration::from_millis(5_000),
            connect_timeout: Duration::from_millis(10_000),
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults for
    /// missing variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            base_ip: read(BASE_IP_VAR),
            clock_amount: read(CLOCK_AMOUNT_VAR).map(|v| parse(CLOCK_AMOUNT_VAR, &v)).transpose()?,
            memory_amount: read(MEMORY_AMOUNT_VAR).map(|v| parse(MEMORY_AMOUNT_VAR, &v)).transpose()?,
            verification_interval: read(VERIFICATION_INTERVAL_VAR)
                .map(|v| parse_millis(VERIFICATION_INTERVAL_VAR, &v))
                .transpose()?
                .unwrap_or(defaults.verification_interval),
            reconnection_interval: read(RECONNECTION_INTERVAL_VAR)
                .map(|v| parse_millis(RECONNECTION_INTERVAL_VAR, &v))
                .transpose()?
                .unwrap_or(defaults.reconnection_interval),
            connect_timeout: read(CONNECT_TIMEOUT_VAR)
                .map(|v| parse_millis(CONNECT_TIMEOUT_VAR, &v))
                .transpose()?
                .unwrap_or(defaults.connect_timeout),
        })
    }

    /// The local address this process should advertise to its peers.
    pub fn advertised_ip(&self) -> IpAddr {
        select_advertised_ip(&local_candidates(), self.base_ip.as_deref())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ReqdistError::InvalidConfig(format!("{}={}: {}", key, value, e)))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    let millis: u64 = parse(key, value)?;
    if millis == 0 {
        return Err(ReqdistError::InvalidConfig(format!("{} must be greater than zero", key)));
    }
    Ok(Duration::from_millis(millis))
}

/// Picks the address to advertise among `candidates`.
///
/// IPv6 addresses are skipped. With a prefix, an exact match wins at once
/// and the last address starting with the prefix is the fallback. Without a
/// prefix the last non-loopback address is used. If nothing qualifies the
/// result is `127.0.0.1`.
pub fn select_advertised_ip(candidates: &[IpAddr], base_prefix: Option<&str>) -> IpAddr {
    let mut candidate = None;

    for address in candidates.iter().filter(|a| a.is_ipv4()) {
        let text = address.to_string();
        match base_prefix {
            Some(prefix) if text == prefix => return *address,
            Some(prefix) if text.starts_with(prefix) => candidate = Some(*address),
            Some(_) => {}
            None if !address.is_loopback() => candidate = Some(*address),
            None => {}
        }
    }

    candidate.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Local addresses this host can advertise: the address used for outbound
/// traffic (if any) and the loopback address.
pub fn local_candidates() -> Vec<IpAddr> {
    let mut candidates = vec![IpAddr::V4(Ipv4Addr::LOCALHOST)];
    // Connecting a UDP socket sends nothing, it only selects a route
    let outbound = UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("192.0.2.1:9")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip());
    if let Ok(ip) = outbound {
        if !ip.is_unspecified() {
            candidates.push(ip);
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.verification_interval, Duration::from_secs(30));
        assert_eq!(settings.reconnection_interval, Duration::from_secs(5));
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert!(settings.base_ip.is_none());
        assert!(settings.clock_amount.is_none());
        assert!(settings.memory_amount.is_none());
    }

    #[test]
    fn test_settings_from_empty_lookup() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_settings_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            (BASE_IP_VAR, "10.1."),
            (CLOCK_AMOUNT_VAR, "2400"),
            (MEMORY_AMOUNT_VAR, " 8192 "),
            (VERIFICATION_INTERVAL_VAR, "1000"),
            (RECONNECTION_INTERVAL_VAR, "250"),
            (CONNECT_TIMEOUT_VAR, "1500"),
        ]))
        .unwrap();

        assert_eq!(settings.base_ip.as_deref(), Some("10.1."));
        assert_eq!(settings.clock_amount, Some(2400));
        assert_eq!(settings.memory_amount, Some(8192));
        assert_eq!(settings.verification_interval, Duration::from_secs(1));
        assert_eq!(settings.reconnection_interval, Duration::from_millis(250));
        assert_eq!(settings.connect_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_settings_invalid_number() {
        let err = Settings::from_lookup(lookup(&[(CLOCK_AMOUNT_VAR, "fast")])).unwrap_err();
        assert!(matches!(err, ReqdistError::InvalidConfig(_)));
    }

    #[test]
    fn test_settings_zero_interval_rejected() {
        let err = Settings::from_lookup(lookup(&[(RECONNECTION_INTERVAL_VAR, "0")])).unwrap_err();
        assert!(matches!(err, ReqdistError::InvalidConfig(_)));
    }

    #[test]
    fn test_select_exact_match_wins() {
        let candidates = [ip("10.0.0.5"), ip("10.0.0.1"), ip("10.0.0.7")];
        assert_eq!(select_advertised_ip(&candidates, Some("10.0.0.1")), ip("10.0.0.1"));
    }

    #[test]
    fn test_select_prefix_match() {
        let candidates = [ip("127.0.0.1"), ip("192.168.1.20"), ip("10.0.0.3")];
        assert_eq!(select_advertised_ip(&candidates, Some("192.168.")), ip("192.168.1.20"));
    }

    #[test]
    fn test_select_prefix_may_pick_loopback() {
        let candidates = [ip("127.0.0.1"), ip("10.0.0.3")];
        assert_eq!(select_advertised_ip(&candidates, Some("127.")), ip("127.0.0.1"));
    }

    #[test]
    fn test_select_without_prefix_skips_loopback_and_ipv6() {
        let candidates = [ip("127.0.0.1"), ip("::1"), ip("fe80::1"), ip("172.16.0.9")];
        assert_eq!(select_advertised_ip(&candidates, None), ip("172.16.0.9"));
    }

    #[test]
    fn test_select_falls_back_to_localhost() {
        assert_eq!(select_advertised_ip(&[ip("127.0.0.1")], None), ip("127.0.0.1"));
        assert_eq!(select_advertised_ip(&[ip("10.0.0.1")], Some("192.")), ip("127.0.0.1"));
        assert_eq!(select_advertised_ip(&[], None), ip("127.0.0.1"));
    }

    #[test]
    fn test_local_candidates_include_loopback() {
        assert!(local_candidates().contains(&ip("127.0.0.1")));
    }
}
