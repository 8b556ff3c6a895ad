//! Network namespace topologies for the host-stack test harness.
//!
//! Provides Linux network namespace management over `ip netns`, veth link
//! creation, per-suite address pools and a closed catalogue of topology
//! shapes that suites materialise once during suite setup.

pub mod addr;
pub mod catalogue;
pub mod namespace;
pub mod topology;

pub mod test_util;

pub use addr::{AddressFamily, AddressPool, InterfaceAddress};
pub use catalogue::{TopologyShape, UnknownShape};
pub use namespace::Namespace;
pub use topology::{Link, NetInterface, Topology, TopologyError, TopologyPlan};
