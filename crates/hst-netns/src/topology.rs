use thiserror::Error;
use tracing::{debug, info};

use crate::addr::{AddressFamily, AddressPool, InterfaceAddress};
use crate::catalogue::{TopologyShape, UnknownShape};
use crate::namespace::Namespace;
use crate::test_util::unique_name;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error(transparent)]
    UnknownShape(#[from] UnknownShape),
    #[error("address pool for slot {slot} exhausted")]
    AddressExhausted { slot: u16 },
    #[error("failed to build topology '{topology}': {reason}")]
    Build { topology: String, reason: String },
    #[error("no interface named '{0}' in topology")]
    UnknownInterface(String),
    #[error("no namespace named '{0}' in topology")]
    UnknownNamespace(String),
}

/// One end of a link, as seen by the suites.
///
/// `role` is the logical name (`srv`, `cln`); `device` is the unique kernel
/// device name inside `namespace`. The address belongs to whichever process
/// attaches to the device, not to the kernel end itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    role: String,
    device: String,
    namespace: String,
    address: InterfaceAddress,
    peer: String,
}

impl NetInterface {
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Kernel device name; processes attaching raw sockets use this.
    pub fn name(&self) -> &str {
        &self.device
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Role of the interface on the other end of the link.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn address(&self) -> InterfaceAddress {
        self.address
    }

    /// The address with its prefix, e.g. `10.10.0.1/24`.
    pub fn address_with_prefix(&self) -> String {
        self.address.to_string()
    }

    /// The bare IPv4 address, empty if the interface is IPv6.
    pub fn ip4_address_string(&self) -> String {
        match self.address.family() {
            AddressFamily::V4 => self.address.addr.to_string(),
            AddressFamily::V6 => String::new(),
        }
    }

    /// The bare IPv6 address, empty if the interface is IPv4.
    pub fn ip6_address_string(&self) -> String {
        match self.address.family() {
            AddressFamily::V6 => self.address.addr.to_string(),
            AddressFamily::V4 => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub a: String,
    pub b: String,
}

/// Names and addresses for a topology, computed before anything touches
/// the host.
#[derive(Debug, Clone)]
pub struct TopologyPlan {
    pub shape: TopologyShape,
    pub slot: u16,
    /// `(role, namespace name)` in creation order.
    pub namespaces: Vec<(String, String)>,
    pub interfaces: Vec<NetInterface>,
    pub links: Vec<Link>,
}

impl TopologyPlan {
    pub fn new(shape: TopologyShape, slot: u16) -> Result<Self, TopologyError> {
        let namespaces: Vec<(String, String)> = shape
            .namespaces()
            .iter()
            .map(|role| (role.to_string(), unique_name(role)))
            .collect();
        let ns_name = |role: &str| {
            namespaces
                .iter()
                .find(|(r, _)| r == role)
                .map(|(_, n)| n.clone())
                .ok_or_else(|| TopologyError::UnknownNamespace(role.to_string()))
        };

        let mut pool = AddressPool::new(slot);
        let mut interfaces = Vec::new();
        let mut links = Vec::new();
        for link in shape.links() {
            for (this, other) in [(link.a, link.b), (link.b, link.a)] {
                let address = pool
                    .allocate(shape.family())
                    .ok_or(TopologyError::AddressExhausted { slot })?;
                interfaces.push(NetInterface {
                    role: this.role.to_string(),
                    device: unique_name(this.role),
                    namespace: ns_name(this.namespace)?,
                    address,
                    peer: other.role.to_string(),
                });
            }
            links.push(Link {
                a: link.a.role.to_string(),
                b: link.b.role.to_string(),
            });
        }

        Ok(Self {
            shape,
            slot,
            namespaces,
            interfaces,
            links,
        })
    }

    fn interface(&self, role: &str) -> Result<&NetInterface, TopologyError> {
        self.interfaces
            .iter()
            .find(|i| i.role == role)
            .ok_or_else(|| TopologyError::UnknownInterface(role.to_string()))
    }

    /// Create the namespaces and links on the host.
    ///
    /// On failure everything created so far is dropped, which deletes the
    /// namespaces and the veth ends inside them.
    pub fn materialize(self) -> Result<Topology, TopologyError> {
        let build_err = |e: anyhow::Error| TopologyError::Build {
            topology: self.shape.name().to_string(),
            reason: format!("{e:#}"),
        };

        let mut created: Vec<(String, Namespace)> = Vec::with_capacity(self.namespaces.len());
        for (role, name) in &self.namespaces {
            let ns = Namespace::new(name).map_err(build_err)?;
            created.push((role.clone(), ns));
        }
        let find_ns = |name: &str| {
            created
                .iter()
                .find(|(_, ns)| ns.name == name)
                .map(|(_, ns)| ns)
                .ok_or_else(|| TopologyError::UnknownNamespace(name.to_string()))
        };

        for link in &self.links {
            let a = self.interface(&link.a)?;
            let b = self.interface(&link.b)?;
            find_ns(&a.namespace)?
                .add_veth_link(find_ns(&b.namespace)?, &a.device, &b.device, None, None)
                .map_err(build_err)?;
            debug!(a = %a.device, b = %b.device, "link up");
        }

        info!(
            topology = %self.shape,
            slot = self.slot,
            namespaces = created.len(),
            links = self.links.len(),
            "topology configured"
        );

        Ok(Topology {
            shape: self.shape,
            slot: self.slot,
            namespace_names: self.namespaces,
            live: created,
            interfaces: self.interfaces,
            links: self.links,
        })
    }

    /// A topology with the planned names and addresses but nothing created
    /// on the host. Used by simulated runs.
    pub fn detached(self) -> Topology {
        info!(topology = %self.shape, slot = self.slot, "topology planned (detached)");
        Topology {
            shape: self.shape,
            slot: self.slot,
            namespace_names: self.namespaces,
            live: Vec::new(),
            interfaces: self.interfaces,
            links: self.links,
        }
    }
}

/// A materialised topology. Immutable after construction; torn down
/// explicitly with [`Topology::teardown`] or on drop.
#[derive(Debug)]
pub struct Topology {
    shape: TopologyShape,
    slot: u16,
    namespace_names: Vec<(String, String)>,
    live: Vec<(String, Namespace)>,
    interfaces: Vec<NetInterface>,
    links: Vec<Link>,
}

impl Topology {
    /// Resolve `name` against the catalogue and plan it for `slot`.
    pub fn plan(name: &str, slot: u16) -> Result<TopologyPlan, TopologyError> {
        let shape: TopologyShape = name.parse()?;
        TopologyPlan::new(shape, slot)
    }

    /// Resolve `name` against the catalogue and build it for `slot`.
    pub fn configure(name: &str, slot: u16) -> Result<Self, TopologyError> {
        Self::plan(name, slot)?.materialize()
    }

    pub fn shape(&self) -> TopologyShape {
        self.shape
    }

    pub fn slot(&self) -> u16 {
        self.slot
    }

    pub fn get_interface_by_name(&self, role: &str) -> Result<&NetInterface, TopologyError> {
        self.interfaces
            .iter()
            .find(|i| i.role == role)
            .ok_or_else(|| TopologyError::UnknownInterface(role.to_string()))
    }

    pub fn interfaces(&self) -> &[NetInterface] {
        &self.interfaces
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Whether the namespaces exist on the host.
    pub fn is_live(&self) -> bool {
        !self.live.is_empty()
    }

    /// Live namespace for a role declared by the shape (`srv`, `cln`).
    pub fn namespace(&self, role: &str) -> Result<&Namespace, TopologyError> {
        self.live
            .iter()
            .find(|(r, _)| r == role)
            .map(|(_, ns)| ns)
            .ok_or_else(|| TopologyError::UnknownNamespace(role.to_string()))
    }

    /// Namespace name for a role, live or planned.
    pub fn namespace_name(&self, role: &str) -> Result<&str, TopologyError> {
        self.namespace_names
            .iter()
            .find(|(r, _)| r == role)
            .map(|(_, n)| n.as_str())
            .ok_or_else(|| TopologyError::UnknownNamespace(role.to_string()))
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.namespace_names.iter().map(|(_, n)| n.clone()).collect()
    }

    /// Remove every namespace. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        for (_, ns) in self.live.iter_mut().rev() {
            ns.delete();
        }
        info!(topology = %self.shape, slot = self.slot, "topology torn down");
    }
}

impl Drop for Topology {
    fn drop(&mut self) {
        for (_, ns) in self.live.iter_mut() {
            ns.delete();
        }
    }
}
