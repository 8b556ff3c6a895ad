//! Per-topology address pools.
//!
//! Every topology instance draws its addresses from a subnet derived from
//! its suite slot, so concurrently built topologies never hand out the same
//! address and a single topology never repeats one within a family.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// An address plus its prefix length, rendered as `addr/prefix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceAddress {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl InterfaceAddress {
    pub fn family(&self) -> AddressFamily {
        match self.addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Hands out host addresses from the slot's IPv4 `/24` and IPv6 `/64`.
///
/// Slot `n` owns `10.(10 + n / 256).(n % 256).0/24` and `fd00:0:0:n::/64`.
#[derive(Debug)]
pub struct AddressPool {
    slot: u16,
    next_v4: u8,
    next_v6: u16,
}

impl AddressPool {
    pub fn new(slot: u16) -> Self {
        Self {
            slot,
            next_v4: 1,
            next_v6: 1,
        }
    }

    pub fn slot(&self) -> u16 {
        self.slot
    }

    /// Next unused address in `family`, or `None` once the subnet is spent.
    pub fn allocate(&mut self, family: AddressFamily) -> Option<InterfaceAddress> {
        match family {
            AddressFamily::V4 => {
                if self.next_v4 == u8::MAX {
                    return None;
                }
                let host = self.next_v4;
                self.next_v4 += 1;
                let hi = 10u16 + self.slot / 256;
                if hi > u8::MAX as u16 {
                    return None;
                }
                let addr = Ipv4Addr::new(10, hi as u8, (self.slot % 256) as u8, host);
                Some(InterfaceAddress {
                    addr: IpAddr::V4(addr),
                    prefix: 24,
                })
            }
            AddressFamily::V6 => {
                if self.next_v6 == u16::MAX {
                    return None;
                }
                let host = self.next_v6;
                self.next_v6 += 1;
                let addr = Ipv6Addr::new(0xfd00, 0, 0, self.slot, 0, 0, 0, host);
                Some(InterfaceAddress {
                    addr: IpAddr::V6(addr),
                    prefix: 64,
                })
            }
        }
    }
}
