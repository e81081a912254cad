//! Raw Ethernet network stack.
//!
//! The stack is driven from two execution contexts: frames are pushed into
//! [`TcpStack::process`] as they arrive, and [`TcpStack::service`] is called
//! once per 10 ms tick to run timers and drain outbound data.
//!
//! # Architecture
//!
//! - `EtherDriver`: transmit side of the Ethernet link
//! - `MacResolver`: maps a peer IPv4 address to its MAC address (ARP)
//! - `NetInfo`: local MAC, address and subnet mask
//! - `tcp`: the connection pool, the state machines and the wire codec
//! - `arp`: ARP responder and resolver

use std::io;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use pnet::datalink::DataLinkSender;
use pnet::util::MacAddr;

pub use tcp::{Descriptor, OpenError, RecvState, SendState, TcpConfig, TcpStack};

pub mod arp;
pub mod tcp;

/// Local interface configuration shared across components.
#[derive(Clone, Copy, Debug)]
pub struct NetInfo {
    /// MAC address of the interface
    pub mac: MacAddr,
    /// IPv4 address of the interface
    pub addr: Ipv4Addr,
    /// Subnet mask of the attached network
    pub mask: Ipv4Addr,
}

impl NetInfo {
    pub fn new(mac: MacAddr, addr: Ipv4Addr, mask: Ipv4Addr) -> Self {
        Self { mac, addr, mask }
    }

    /// Checks if the address is within the local subnet.
    pub fn in_subnet(&self, addr: Ipv4Addr) -> bool {
        is_same_subnet(self.addr, addr, self.mask)
    }

    /// Limited broadcast, or the directed broadcast of the local subnet.
    pub fn is_broadcast(&self, addr: Ipv4Addr) -> bool {
        if addr.is_broadcast() {
            return true;
        }

        let mask = self.mask.to_bits();
        mask != u32::MAX && self.in_subnet(addr) && addr.to_bits() | mask == u32::MAX
    }
}

/// Transmit side of an Ethernet driver.
pub trait EtherDriver {
    /// Acquires a transmit buffer of `len` bytes, lets `build` fill it and
    /// sends it.
    ///
    /// Fails when no transmit buffer is available.
    fn transmit(&mut self, len: usize, build: &mut dyn FnMut(&mut [u8])) -> io::Result<()>;

    /// Masks (`false`) or unmasks (`true`) frame reception while the polled
    /// context holds a transmit buffer.
    fn enable_interrupt(&mut self, _enable: bool) {}
}

/// Resolves the MAC address of a peer.
pub trait MacResolver {
    /// Returns `None` while resolution is still pending.
    fn resolve(&mut self, addr: Ipv4Addr) -> Option<MacAddr>;
}

impl<T: MacResolver> MacResolver for Arc<Mutex<T>> {
    fn resolve(&mut self, addr: Ipv4Addr) -> Option<MacAddr> {
        self.lock().ok()?.resolve(addr)
    }
}

/// Thread-safe sender over a pnet data link channel.
#[derive(Clone)]
pub struct LinkSender {
    /// Data link layer transmitter (thread-safe)
    datalink_tx: Arc<Mutex<Box<dyn DataLinkSender>>>,
}

impl LinkSender {
    pub fn new(datalink_tx: Box<dyn DataLinkSender>) -> Self {
        Self {
            datalink_tx: Arc::new(Mutex::new(datalink_tx)),
        }
    }
}

impl EtherDriver for LinkSender {
    fn transmit(&mut self, len: usize, build: &mut dyn FnMut(&mut [u8])) -> io::Result<()> {
        let mut tx = self
            .datalink_tx
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "data link sender poisoned"))?;

        tx.build_and_send(1, len, build).unwrap_or_else(|| {
            Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "no transmit buffer available",
            ))
        })
    }
}

/// Checks if two IPv4 addresses are in the same subnet.
#[inline]
fn is_same_subnet(addr1: Ipv4Addr, addr2: Ipv4Addr, subnet_mask: Ipv4Addr) -> bool {
    let mask = subnet_mask.to_bits();
    let a1 = addr1.to_bits();
    let a2 = addr2.to_bits();
    a1 & mask == a2 & mask
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> NetInfo {
        NetInfo::new(
            MacAddr::new(0x02, 0, 0, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(255, 255, 255, 0),
        )
    }

    #[test]
    fn test_in_subnet() {
        let info = info();
        assert!(info.in_subnet(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(!info.in_subnet(Ipv4Addr::new(10, 0, 1, 5)));
    }

    #[test]
    fn test_is_broadcast() {
        let info = info();
        assert!(info.is_broadcast(Ipv4Addr::BROADCAST));
        assert!(info.is_broadcast(Ipv4Addr::new(10, 0, 0, 255)));
        assert!(!info.is_broadcast(Ipv4Addr::new(10, 0, 1, 255)));
        assert!(!info.is_broadcast(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(!info.is_broadcast(Ipv4Addr::UNSPECIFIED));
    }
}
