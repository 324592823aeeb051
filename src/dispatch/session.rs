//! Client sessions and source addressing

use crate::error::Result;
use crate::messages::Response;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use uuid::Uuid;

/// Where a request came from
///
/// At most one of the two addresses is set for any real transport; both may
/// be absent for in-process callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceAddress {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl SourceAddress {
    pub fn unknown() -> Self {
        Self::default()
    }
}

impl From<SocketAddr> for SourceAddress {
    fn from(addr: SocketAddr) -> Self {
        match addr.ip() {
            IpAddr::V4(ipv4) => Self {
                ipv4: Some(ipv4),
                ipv6: None,
            },
            IpAddr::V6(ipv6) => Self {
                ipv4: None,
                ipv6: Some(ipv6),
            },
        }
    }
}

/// A bidirectional connection to one client
///
/// Transports implement this so that handlers can push responses outside
/// the request/response cycle, e.g. room subscriptions.
pub trait Session: Send + Sync {
    /// Stable identifier for the lifetime of the session
    fn id(&self) -> Uuid;

    /// Push a response to the client
    fn send(&self, response: &Response) -> Result<()>;
}
