use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::domain::error::LinkError;

/// Address and port of a transport peer or a local bind target.
///
/// Endpoints are immutable once constructed; the host may be an IP literal or
/// a name resolved at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// A bracketed IPv6 host such as `[::1]` is stored without brackets.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(inner) => inner.to_string(),
            None => host,
        };
        Self { host, port }
    }

    /// Wildcard IPv4 bind target for the given port.
    pub fn any(port: u16) -> Self {
        Self::new("0.0.0.0", port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The endpoint as a socket address, if the host is an IP literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.host
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(addr.into());
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| LinkError::InvalidInput(format!("Missing port in endpoint '{}'", s)))?;

        if host.is_empty() {
            return Err(LinkError::InvalidInput(format!("Missing host in endpoint '{}'", s)));
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| LinkError::InvalidInput(format!("Invalid port in endpoint '{}': {}", s, e)))?;

        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("127.0.0.1", 8080).to_string(), "127.0.0.1:8080");
        assert_eq!(Endpoint::new("::1", 80).to_string(), "[::1]:80");
        assert_eq!(Endpoint::new("localhost", 9000).to_string(), "localhost:9000");
    }

    #[test]
    fn test_endpoint_parse() {
        let ep: Endpoint = "localhost:9000".parse().unwrap();
        assert_eq!(ep.host(), "localhost");
        assert_eq!(ep.port(), 9000);

        let ep: Endpoint = "[::1]:443".parse().unwrap();
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.port(), 443);

        assert!("localhost".parse::<Endpoint>().is_err());
        assert!(":80".parse::<Endpoint>().is_err());
        assert!("host:99999".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_endpoint_socket_addr() {
        let addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let ep = Endpoint::from(addr);
        assert_eq!(ep.socket_addr(), Some(addr));
        assert_eq!(Endpoint::new("example.com", 80).socket_addr(), None);
    }

    #[test]
    fn test_bracketed_host_is_normalized() {
        let ep = Endpoint::new("[::1]", 7000);
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.to_string(), "[::1]:7000");
        assert_eq!(ep.socket_addr(), Some("[::1]:7000".parse().unwrap()));
        assert_eq!(ep, Endpoint::new("::1", 7000));
    }
}
