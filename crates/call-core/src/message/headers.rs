//! Header value types carried by requests and responses.
//!
//! These are plain values; parsing and serialization of the wire format
//! belong to the transport stack.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use super::method::Method;
use crate::error::{CallError, CallResult};

/// Length of generated From/To tags
const TAG_LENGTH: usize = 16;

/// Call-ID header value, the primary key of the call registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(String);

impl CallId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// From/To tag distinguishing the legs of a dialog
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag(String);

impl Tag {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh random alphanumeric tag
    pub fn random() -> Self {
        let value: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TAG_LENGTH)
            .map(char::from)
            .collect();
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport protocol advertised in Via headers and used for the listening point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    #[default]
    Udp,
    Tcp,
    Tls,
    Ws,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Udp => "UDP",
            TransportProtocol::Tcp => "TCP",
            TransportProtocol::Tls => "TLS",
            TransportProtocol::Ws => "WS",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportProtocol {
    type Err = CallError;

    fn from_str(s: &str) -> CallResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(TransportProtocol::Udp),
            "tcp" => Ok(TransportProtocol::Tcp),
            "tls" => Ok(TransportProtocol::Tls),
            "ws" => Ok(TransportProtocol::Ws),
            other => Err(CallError::Config(format!("unsupported transport protocol: {}", other))),
        }
    }
}

/// A `sip:` URI reduced to what the call core needs: user, host and port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uri {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl Uri {
    pub fn new(user: Option<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            user,
            host: host.into(),
            port,
        }
    }

    /// Parse a dial target such as `bob@10.0.0.2`, filling in `default_port`
    /// when the target carries none
    pub fn parse_target(target: &str, default_port: u16) -> CallResult<Self> {
        let mut uri: Uri = target.parse()?;
        if uri.port.is_none() {
            uri.port = Some(default_port);
        }
        Ok(uri)
    }

    /// `host:port`, or just `host` without a port
    pub fn host_port(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sip:")?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host_port())
    }
}

impl FromStr for Uri {
    type Err = CallError;

    fn from_str(s: &str) -> CallResult<Self> {
        let invalid = || CallError::InvalidTarget(s.to_string());

        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .unwrap_or(trimmed);
        let rest = trimmed.strip_prefix("sip:").unwrap_or(trimmed);

        let (user, host_port) = match rest.rsplit_once('@') {
            Some((user, host_port)) if !user.is_empty() => (Some(user.to_string()), host_port),
            Some(_) => return Err(invalid()),
            None => (None, rest),
        };

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => (host, Some(port.parse::<u16>().map_err(|_| invalid())?)),
            None => (host_port, None),
        };

        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(invalid());
        }

        Ok(Uri::new(user, host, port))
    }
}

/// Address with an optional tag, as found in From and To
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameAddr {
    pub uri: Uri,
    pub tag: Option<Tag>,
}

impl NameAddr {
    pub fn new(uri: Uri) -> Self {
        Self { uri, tag: None }
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.uri)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }
        Ok(())
    }
}

/// Via header value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Via {
    pub transport: TransportProtocol,
    pub host: String,
    pub port: u16,
    /// Assigned by the transport stack when the client transaction is opened
    pub branch: Option<String>,
}

impl Via {
    pub fn new(transport: TransportProtocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            transport,
            host: host.into(),
            port,
            branch: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}:{}", self.transport, self.host, self.port)?;
        if let Some(branch) = &self.branch {
            write!(f, ";branch={}", branch)?;
        }
        Ok(())
    }
}

/// CSeq header value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(seq: u32, method: Method) -> Self {
        Self { seq, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_applies_default_port() {
        let uri = Uri::parse_target("bob@10.0.0.2", 5060).unwrap();
        assert_eq!(uri.user.as_deref(), Some("bob"));
        assert_eq!(uri.host, "10.0.0.2");
        assert_eq!(uri.port, Some(5060));
        assert_eq!(uri.to_string(), "sip:bob@10.0.0.2:5060");
    }

    #[test]
    fn test_parse_target_keeps_explicit_port() {
        let uri = Uri::parse_target("sip:jamesj@127.0.0.1:5080", 5060).unwrap();
        assert_eq!(uri.port, Some(5080));
    }

    #[test]
    fn test_parse_rejects_malformed_targets() {
        assert!("".parse::<Uri>().is_err());
        assert!("@host".parse::<Uri>().is_err());
        assert!("bob@host:port".parse::<Uri>().is_err());
        assert!("bob@".parse::<Uri>().is_err());
    }

    #[test]
    fn test_random_tags_differ() {
        let a = Tag::random();
        let b = Tag::random();
        assert_eq!(a.as_str().len(), TAG_LENGTH);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_header_display() {
        let from = NameAddr::new(Uri::new(Some("alice".into()), "127.0.0.1", Some(5070)))
            .with_tag(Tag::new("abc"));
        assert_eq!(from.to_string(), "<sip:alice@127.0.0.1:5070>;tag=abc");

        let via = Via::new(TransportProtocol::Udp, "127.0.0.1", 5070).with_branch("z9hG4bK1");
        assert_eq!(via.to_string(), "SIP/2.0/UDP 127.0.0.1:5070;branch=z9hG4bK1");

        assert_eq!(CSeq::new(1, Method::Invite).to_string(), "1 INVITE");
    }

    #[test]
    fn test_transport_protocol_parse() {
        assert_eq!("UDP".parse::<TransportProtocol>().unwrap(), TransportProtocol::Udp);
        assert!("sctp".parse::<TransportProtocol>().is_err());
    }
}
