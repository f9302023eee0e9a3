//! Configuration for a call agent
//!
//! ## Examples
//!
//! ```rust
//! use rvoip_call_core::config::CallConfig;
//! use rvoip_call_core::message::TransportProtocol;
//!
//! let config = CallConfig::new("alice", "192.168.1.10".parse().unwrap(), 5070)
//!     .with_transport(TransportProtocol::Tcp)
//!     .with_max_forwards(30);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.contact_uri().to_string(), "sip:alice@192.168.1.10:5070");
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{CallError, CallResult};
use crate::message::{TransportProtocol, Uri};

/// Settings shared by every service of a call agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// User part of From and Contact on originated requests
    pub user: String,

    /// Address advertised in Via and Contact
    pub bind_ip: IpAddr,

    /// Port advertised in Via and Contact
    pub bind_port: u16,

    /// Transport of the listening point
    pub transport: TransportProtocol,

    /// Max-Forwards on originated requests
    pub max_forwards: u8,

    /// Port used for dial targets that carry none
    pub default_remote_port: u16,

    /// Capacity of the stack event and call notification channels
    pub event_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            user: "rvoip".to_string(),
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            bind_port: 5070,
            transport: TransportProtocol::Udp,
            max_forwards: 70,
            default_remote_port: 5060,
            event_capacity: 100,
        }
    }
}

impl CallConfig {
    pub fn new(user: impl Into<String>, bind_ip: IpAddr, bind_port: u16) -> Self {
        Self {
            user: user.into(),
            bind_ip,
            bind_port,
            ..Default::default()
        }
    }

    pub fn with_transport(mut self, transport: TransportProtocol) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_max_forwards(mut self, max_forwards: u8) -> Self {
        self.max_forwards = max_forwards;
        self
    }

    pub fn with_default_remote_port(mut self, port: u16) -> Self {
        self.default_remote_port = port;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Reject settings the agent cannot start with
    pub fn validate(&self) -> CallResult<()> {
        if self.user.trim().is_empty() {
            return Err(CallError::Config("user must not be empty".to_string()));
        }
        if self.bind_port == 0 {
            return Err(CallError::Config("bind_port must be greater than 0".to_string()));
        }
        if self.default_remote_port == 0 {
            return Err(CallError::Config(
                "default_remote_port must be greater than 0".to_string(),
            ));
        }
        if self.max_forwards == 0 {
            return Err(CallError::Config("max_forwards must be greater than 0".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(CallError::Config("event_capacity must be greater than 0".to_string()));
        }
        Ok(())
    }

    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.bind_port)
    }

    /// `sip:<user>@<ip>:<port>`
    pub fn contact_uri(&self) -> Uri {
        Uri::new(
            Some(self.user.clone()),
            self.bind_ip.to_string(),
            Some(self.bind_port),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CallConfig::default();
        assert_eq!(config.user, "rvoip");
        assert_eq!(config.bind_port, 5070);
        assert_eq!(config.max_forwards, 70);
        assert_eq!(config.transport, TransportProtocol::Udp);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CallConfig::default();
        config.user = "  ".to_string();
        assert!(matches!(config.validate(), Err(CallError::Config(_))));

        let config = CallConfig::default().with_max_forwards(0);
        assert!(config.validate().is_err());

        let mut config = CallConfig::default();
        config.bind_port = 0;
        assert!(config.validate().is_err());

        let config = CallConfig::default().with_event_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CallConfig = toml::from_str(
            r#"
            user = "jamesj"
            bind_port = 5080
            transport = "tcp"
            "#,
        )
        .unwrap();
        assert_eq!(config.user, "jamesj");
        assert_eq!(config.bind_port, 5080);
        assert_eq!(config.transport, TransportProtocol::Tcp);
        assert_eq!(config.default_remote_port, 5060);
        assert_eq!(config.contact_uri().to_string(), "sip:jamesj@127.0.0.1:5080");
    }
}
