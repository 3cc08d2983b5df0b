use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Probe protocol, fixed for the whole scan.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(format!("Invalid protocol: {} (expected tcp or udp)", s)),
        }
    }
}

/// How probe traffic reaches the target. Fixed for the whole scan.
///
/// UDP probing is only defined for `Direct`; combining UDP with a proxy or
/// the overlay yields `Outcome::Unsupported` per port rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMode {
    /// Plain sockets straight to the target.
    Direct,
    /// HTTP forward proxy, `host:port` form.
    ForwardProxy(String),
    /// Anonymizing overlay network reached via its local SOCKS endpoint
    /// (a running Tor client, typically 127.0.0.1:9050).
    Overlay(std::net::SocketAddr),
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Direct => write!(f, "direct"),
            TransportMode::ForwardProxy(ep) => write!(f, "proxy({})", ep),
            TransportMode::Overlay(socks) => write!(f, "overlay({})", socks),
        }
    }
}

/// Closed set of probe failure kinds, so callers can branch on kind instead
/// of parsing message text.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeErrorKind {
    Timeout,
    Refused,
    Reset,
    TransportFailure,
}

impl fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeErrorKind::Timeout => write!(f, "timeout"),
            ProbeErrorKind::Refused => write!(f, "refused"),
            ProbeErrorKind::Reset => write!(f, "reset"),
            ProbeErrorKind::TransportFailure => write!(f, "transport failure"),
        }
    }
}

/// A contained per-probe failure. Never aborts the scan; it is recorded as
/// the port's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}{}", match .detail { Some(d) => format!(": {d}"), None => String::new() })]
pub struct ProbeError {
    pub kind: ProbeErrorKind,
    pub detail: Option<String>,
}

impl ProbeError {
    pub fn new(kind: ProbeErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    pub fn bare(kind: ProbeErrorKind) -> Self {
        Self { kind, detail: None }
    }
}

/// Classified reachability of one scanned port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Target accepted a connection / replied to the probe.
    Open,
    /// Target actively refused or reset the probe.
    Closed,
    /// UDP only: no reply within the timeout, which does not prove closure.
    PossiblyOpen,
    /// Configuration combination the scanner does not implement
    /// (UDP routed through a proxy or the overlay).
    Unsupported,
    /// Transport failure during this port's check.
    Error(ProbeError),
}

impl Outcome {
    /// Short status word for tabular output.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Open => "open",
            Outcome::Closed => "closed",
            Outcome::PossiblyOpen => "possibly-open",
            Outcome::Unsupported => "unsupported",
            Outcome::Error(_) => "error",
        }
    }

    /// Supplementary diagnostic for tabular output, empty when none exists.
    pub fn detail(&self) -> String {
        match self {
            Outcome::Error(e) => e.to_string(),
            _ => String::new(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Error(e) => write!(f, "error ({})", e),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Error types for port range parsing
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PortRangeError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid port number: {0}")]
    InvalidPort(String),

    #[error("Port range start is greater than end: {0} > {1}")]
    RangeStartGreaterThanEnd(u16, u16),
}

/// Inclusive range of ports to scan, each in [1, 65535].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, PortRangeError> {
        if start == 0 || end == 0 {
            return Err(PortRangeError::InvalidPort("0".to_string()));
        }
        if start > end {
            return Err(PortRangeError::RangeStartGreaterThanEnd(start, end));
        }
        Ok(Self { start, end })
    }

    /// Parse `"S-E"` or a single `"P"` (treated as `P-P`).
    pub fn parse(s: &str) -> Result<Self, PortRangeError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PortRangeError::InvalidFormat(s.to_string()));
        }

        let parse_port = |p: &str| -> Result<u16, PortRangeError> {
            p.trim()
                .parse::<u16>()
                .map_err(|_| PortRangeError::InvalidPort(p.trim().to_string()))
        };

        match s.split_once('-') {
            Some((a, b)) => Self::new(parse_port(a)?, parse_port(b)?),
            None => {
                let p = parse_port(s)?;
                Self::new(p, p)
            }
        }
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Ports in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Per-class counts over a finished result collection, consumed by the
/// chart, table footer and PDF summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub open: usize,
    pub closed: usize,
    pub possibly_open: usize,
    pub unsupported: usize,
    pub errors: usize,
}

/// Finished scan: target identity, per-port outcomes, and timing.
///
/// Only ever constructed after the worker pool has fully drained, so readers
/// never observe partial results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub target: String,
    pub target_ip: IpAddr,
    pub protocol: Protocol,
    pub results: BTreeMap<u16, Outcome>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip, default)]
    pub elapsed: Duration,
}

impl ScanReport {
    pub fn new(
        target: String,
        target_ip: IpAddr,
        protocol: Protocol,
        results: HashMap<u16, Outcome>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self {
            target,
            target_ip,
            protocol,
            results: results.into_iter().collect(),
            start_time,
            end_time,
            elapsed,
        }
    }

    pub fn summary(&self) -> ScanSummary {
        let mut s = ScanSummary::default();
        for outcome in self.results.values() {
            match outcome {
                Outcome::Open => s.open += 1,
                Outcome::Closed => s.closed += 1,
                Outcome::PossiblyOpen => s.possibly_open += 1,
                Outcome::Unsupported => s.unsupported += 1,
                Outcome::Error(_) => s.errors += 1,
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_range() {
        let r = PortRange::parse("20-25").unwrap();
        assert_eq!(r, PortRange { start: 20, end: 25 });
        assert_eq!(r.len(), 6);
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![20, 21, 22, 23, 24, 25]);
    }

    #[test]
    fn parse_single_port_as_range() {
        let r = PortRange::parse("443").unwrap();
        assert_eq!(r, PortRange { start: 443, end: 443 });
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn parse_rejects_inverted_range() {
        assert_eq!(
            PortRange::parse("100-20"),
            Err(PortRangeError::RangeStartGreaterThanEnd(100, 20))
        );
    }

    #[test]
    fn parse_rejects_port_zero_and_garbage() {
        assert!(PortRange::parse("0-10").is_err());
        assert!(PortRange::parse("80-").is_err());
        assert!(PortRange::parse("abc").is_err());
        assert!(PortRange::parse("1-70000").is_err());
        assert!(PortRange::parse("").is_err());
    }

    #[test]
    fn protocol_from_str() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("UDP".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert!("icmp".parse::<Protocol>().is_err());
    }

    #[test]
    fn outcome_labels_and_detail() {
        assert_eq!(Outcome::Open.label(), "open");
        assert_eq!(Outcome::PossiblyOpen.label(), "possibly-open");
        let err = Outcome::Error(ProbeError::new(
            ProbeErrorKind::TransportFailure,
            "proxy unreachable",
        ));
        assert_eq!(err.label(), "error");
        assert_eq!(err.detail(), "transport failure: proxy unreachable");
        assert_eq!(Outcome::Closed.detail(), "");
    }

    #[test]
    fn summary_counts_every_class() {
        let mut results = HashMap::new();
        results.insert(1u16, Outcome::Open);
        results.insert(2, Outcome::Closed);
        results.insert(3, Outcome::Closed);
        results.insert(4, Outcome::PossiblyOpen);
        results.insert(5, Outcome::Unsupported);
        results.insert(6, Outcome::Error(ProbeError::bare(ProbeErrorKind::Timeout)));
        let now = Utc::now();
        let report = ScanReport::new(
            "host".into(),
            "127.0.0.1".parse().unwrap(),
            Protocol::Tcp,
            results,
            now,
            now,
            Duration::ZERO,
        );
        let s = report.summary();
        assert_eq!(s.open, 1);
        assert_eq!(s.closed, 2);
        assert_eq!(s.possibly_open, 1);
        assert_eq!(s.unsupported, 1);
        assert_eq!(s.errors, 1);
        // BTreeMap keeps presentation order ascending
        assert_eq!(
            report.results.keys().copied().collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5, 6]
        );
    }
}
