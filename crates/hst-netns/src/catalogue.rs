//! The closed set of topology shapes suites can ask for.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::addr::AddressFamily;

/// One endpoint of a link in a shape description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Logical role name, looked up with `Topology::get_interface_by_name`.
    pub role: &'static str,
    /// Role of the namespace the endpoint lives in.
    pub namespace: &'static str,
}

/// A point-to-point link between two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSpec {
    pub a: EndpointSpec,
    pub b: EndpointSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyShape {
    /// Server and client namespaces joined by one IPv4 veth pair.
    TwoPeerVeth,
    /// Same as [`TopologyShape::TwoPeerVeth`] with IPv6 addressing.
    TwoPeerVeth6,
}

const TWO_PEER_LINKS: &[LinkSpec] = &[LinkSpec {
    a: EndpointSpec {
        role: "srv",
        namespace: "srv",
    },
    b: EndpointSpec {
        role: "cln",
        namespace: "cln",
    },
}];

impl TopologyShape {
    pub const ALL: [TopologyShape; 2] = [TopologyShape::TwoPeerVeth, TopologyShape::TwoPeerVeth6];

    pub fn name(&self) -> &'static str {
        match self {
            TopologyShape::TwoPeerVeth => "2peerVeth",
            TopologyShape::TwoPeerVeth6 => "2peerVeth6",
        }
    }

    pub fn family(&self) -> AddressFamily {
        match self {
            TopologyShape::TwoPeerVeth => AddressFamily::V4,
            TopologyShape::TwoPeerVeth6 => AddressFamily::V6,
        }
    }

    /// Namespace roles in creation order.
    pub fn namespaces(&self) -> &'static [&'static str] {
        match self {
            TopologyShape::TwoPeerVeth | TopologyShape::TwoPeerVeth6 => &["srv", "cln"],
        }
    }

    pub fn links(&self) -> &'static [LinkSpec] {
        match self {
            TopologyShape::TwoPeerVeth | TopologyShape::TwoPeerVeth6 => TWO_PEER_LINKS,
        }
    }
}

impl fmt::Display for TopologyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned for names outside the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown topology '{0}'")]
pub struct UnknownShape(pub String);

impl FromStr for TopologyShape {
    type Err = UnknownShape;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopologyShape::ALL
            .into_iter()
            .find(|shape| shape.name() == s)
            .ok_or_else(|| UnknownShape(s.to_string()))
    }
}
