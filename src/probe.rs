use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::models::{Outcome, ProbeError, ProbeErrorKind, Protocol, TransportMode};

/// One connectivity check strategy, selected once per scan from the
/// protocol/transport pair instead of re-branching on the transport inside
/// every call.
///
/// `check` performs exactly one bounded-time probe and never returns an
/// error to the caller: every failure mode becomes an [`Outcome`] variant.
/// Sockets are plain locals, so they are released on every exit path.
#[derive(Debug, Clone)]
pub enum Probe {
    /// Direct TCP connect.
    TcpConnect { limit: Duration },
    /// TCP reachability via an HTTP forward proxy (CONNECT tunnel).
    TcpViaProxy { proxy: String, limit: Duration },
    /// TCP reachability via the overlay's local SOCKS5 endpoint.
    TcpViaOverlay { socks: SocketAddr, limit: Duration },
    /// Direct zero-length UDP datagram, then wait for any reply.
    UdpDatagram { limit: Duration },
    /// UDP combined with a proxy or the overlay: not implemented, reported
    /// per port without any network I/O.
    Unsupported,
}

impl Probe {
    pub fn new(protocol: Protocol, transport: &TransportMode, limit: Duration) -> Self {
        match (protocol, transport) {
            (Protocol::Tcp, TransportMode::Direct) => Probe::TcpConnect { limit },
            (Protocol::Tcp, TransportMode::ForwardProxy(ep)) => Probe::TcpViaProxy {
                proxy: ep.clone(),
                limit,
            },
            (Protocol::Tcp, TransportMode::Overlay(socks)) => Probe::TcpViaOverlay {
                socks: *socks,
                limit,
            },
            (Protocol::Udp, TransportMode::Direct) => Probe::UdpDatagram { limit },
            (Protocol::Udp, _) => Probe::Unsupported,
        }
    }

    /// Probe one `(address, port)` pair and classify the result.
    pub async fn check(&self, target: SocketAddr) -> Outcome {
        match self {
            Probe::TcpConnect { limit } => tcp_connect(target, *limit).await,
            Probe::TcpViaProxy { proxy, limit } => tcp_via_proxy(proxy, target, *limit).await,
            Probe::TcpViaOverlay { socks, limit } => tcp_via_socks(*socks, target, *limit).await,
            Probe::UdpDatagram { limit } => udp_datagram(target, *limit).await,
            Probe::Unsupported => Outcome::Unsupported,
        }
    }
}

/// Direct TCP connect bounded by the per-probe timeout.
///
/// Refusal, reset and timeout all mean the port did not accept a connection
/// and classify as Closed; only error kinds distinct from those surface as
/// probe errors.
async fn tcp_connect(target: SocketAddr, limit: Duration) -> Outcome {
    match timeout(limit, TcpStream::connect(target)).await {
        Ok(Ok(_stream)) => Outcome::Open,
        Ok(Err(e)) => match e.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut => Outcome::Closed,
            _ => Outcome::Error(ProbeError::new(
                ProbeErrorKind::TransportFailure,
                e.to_string(),
            )),
        },
        Err(_) => {
            debug!("connect to {} exceeded {:?}", target, limit);
            Outcome::Closed
        }
    }
}

/// Establish a CONNECT tunnel through the forward proxy. A 2xx status from
/// the proxy means it reached the target port; any other status means it
/// could not.
async fn tcp_via_proxy(proxy: &str, target: SocketAddr, limit: Duration) -> Outcome {
    let attempt = async {
        let mut stream = TcpStream::connect(proxy).await.map_err(|e| {
            ProbeError::new(
                ProbeErrorKind::TransportFailure,
                format!("proxy connect failed: {}", e),
            )
        })?;

        let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
        stream.write_all(request.as_bytes()).await.map_err(|e| {
            ProbeError::new(
                ProbeErrorKind::TransportFailure,
                format!("proxy write failed: {}", e),
            )
        })?;

        let mut buf = [0u8; 512];
        let n = stream.read(&mut buf).await.map_err(|e| {
            ProbeError::new(
                ProbeErrorKind::TransportFailure,
                format!("proxy read failed: {}", e),
            )
        })?;
        if n == 0 {
            return Err(ProbeError::new(
                ProbeErrorKind::Reset,
                "proxy closed the connection",
            ));
        }

        // "HTTP/1.1 200 Connection established"
        let head = String::from_utf8_lossy(&buf[..n]);
        let status = head
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| {
                ProbeError::new(ProbeErrorKind::TransportFailure, "malformed proxy response")
            })?;
        Ok((200..300).contains(&status))
    };

    match timeout(limit, attempt).await {
        Ok(Ok(true)) => Outcome::Open,
        Ok(Ok(false)) => Outcome::Closed,
        Ok(Err(e)) => Outcome::Error(e),
        Err(_) => Outcome::Error(ProbeError::bare(ProbeErrorKind::Timeout)),
    }
}

/// SOCKS5 CONNECT through the overlay's local endpoint (RFC 1928, no
/// authentication). Reply code 0 means the circuit reached the target port;
/// any other reply code means it did not.
async fn tcp_via_socks(socks: SocketAddr, target: SocketAddr, limit: Duration) -> Outcome {
    let attempt = async {
        let transport = |e: std::io::Error, what: &str| {
            ProbeError::new(
                ProbeErrorKind::TransportFailure,
                format!("socks {}: {}", what, e),
            )
        };

        let mut stream = TcpStream::connect(socks)
            .await
            .map_err(|e| transport(e, "connect"))?;

        // Greeting: version 5, one method, no auth.
        stream
            .write_all(&[0x05, 0x01, 0x00])
            .await
            .map_err(|e| transport(e, "greeting"))?;
        let mut method = [0u8; 2];
        stream
            .read_exact(&mut method)
            .await
            .map_err(|e| transport(e, "method reply"))?;
        if method != [0x05, 0x00] {
            return Err(ProbeError::new(
                ProbeErrorKind::TransportFailure,
                "socks endpoint rejected no-auth method",
            ));
        }

        // CONNECT request for the target address and port.
        let mut request = vec![0x05, 0x01, 0x00];
        match target.ip() {
            std::net::IpAddr::V4(v4) => {
                request.push(0x01);
                request.extend_from_slice(&v4.octets());
            }
            std::net::IpAddr::V6(v6) => {
                request.push(0x04);
                request.extend_from_slice(&v6.octets());
            }
        }
        request.extend_from_slice(&target.port().to_be_bytes());
        stream
            .write_all(&request)
            .await
            .map_err(|e| transport(e, "request"))?;

        let mut reply = [0u8; 4];
        stream
            .read_exact(&mut reply)
            .await
            .map_err(|e| transport(e, "reply"))?;
        if reply[0] != 0x05 {
            return Err(ProbeError::new(
                ProbeErrorKind::TransportFailure,
                "malformed socks reply",
            ));
        }
        Ok(reply[1] == 0x00)
    };

    match timeout(limit, attempt).await {
        Ok(Ok(true)) => Outcome::Open,
        Ok(Ok(false)) => Outcome::Closed,
        Ok(Err(e)) => Outcome::Error(e),
        Err(_) => Outcome::Error(ProbeError::bare(ProbeErrorKind::Timeout)),
    }
}

/// Send a zero-length datagram, then wait up to the timeout for any reply.
///
/// UDP probing is inherently ambiguous: a reply proves the port open, an
/// ICMP port-unreachable (surfacing as ConnectionRefused/Reset on the
/// connected socket) proves it closed, and silence proves nothing.
async fn udp_datagram(target: SocketAddr, limit: Duration) -> Outcome {
    let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = match UdpSocket::bind(bind_addr).await {
        Ok(s) => s,
        Err(e) => {
            return Outcome::Error(ProbeError::new(
                ProbeErrorKind::TransportFailure,
                format!("udp bind failed: {}", e),
            ))
        }
    };

    // Connect pins the peer and lets ICMP errors surface on recv.
    if let Err(e) = socket.connect(target).await {
        return Outcome::Error(ProbeError::new(
            ProbeErrorKind::TransportFailure,
            format!("udp connect failed: {}", e),
        ));
    }
    if let Err(e) = socket.send(b"").await {
        return Outcome::Error(ProbeError::new(
            ProbeErrorKind::TransportFailure,
            format!("udp send failed: {}", e),
        ));
    }

    let mut buf = [0u8; 512];
    match timeout(limit, socket.recv(&mut buf)).await {
        Ok(Ok(_)) => Outcome::Open,
        Ok(Err(e)) => match e.kind() {
            ErrorKind::ConnectionRefused => Outcome::Closed,
            ErrorKind::ConnectionReset => Outcome::Closed,
            _ => Outcome::Error(ProbeError::new(
                ProbeErrorKind::TransportFailure,
                e.to_string(),
            )),
        },
        Err(_) => Outcome::PossiblyOpen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_with_proxy_or_overlay_dispatches_to_unsupported() {
        let proxy = TransportMode::ForwardProxy("127.0.0.1:8080".to_string());
        let overlay = TransportMode::Overlay("127.0.0.1:9050".parse().unwrap());
        assert!(matches!(
            Probe::new(Protocol::Udp, &proxy, Duration::from_secs(1)),
            Probe::Unsupported
        ));
        assert!(matches!(
            Probe::new(Protocol::Udp, &overlay, Duration::from_secs(1)),
            Probe::Unsupported
        ));
    }

    #[tokio::test]
    async fn unsupported_probe_resolves_without_network_io() {
        // Unroutable target: any I/O attempt would hit the timeout, so an
        // instant Unsupported shows no socket was touched.
        let probe = Probe::Unsupported;
        let target: SocketAddr = "203.0.113.1:53".parse().unwrap();
        let started = std::time::Instant::now();
        let outcome = probe.check(target).await;
        assert_eq!(outcome, Outcome::Unsupported);
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn tcp_dispatch_matches_transport() {
        let limit = Duration::from_secs(1);
        assert!(matches!(
            Probe::new(Protocol::Tcp, &TransportMode::Direct, limit),
            Probe::TcpConnect { .. }
        ));
        assert!(matches!(
            Probe::new(
                Protocol::Tcp,
                &TransportMode::ForwardProxy("p:1".into()),
                limit
            ),
            Probe::TcpViaProxy { .. }
        ));
        assert!(matches!(
            Probe::new(
                Protocol::Tcp,
                &TransportMode::Overlay("127.0.0.1:9050".parse().unwrap()),
                limit
            ),
            Probe::TcpViaOverlay { .. }
        ));
    }
}
