use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use pnet::packet::arp::{
    ArpHardwareTypes, ArpOperation, ArpOperations, ArpPacket, MutableArpPacket,
};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::{MutablePacket, Packet};
use pnet::util::MacAddr;

use crate::net::{EtherDriver, MacResolver, NetInfo};

const ARP_FRAME_LEN: usize = 42;
const REQUEST_INTERVAL: Duration = Duration::from_secs(1);
const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Answers ARP requests for the local address and resolves peers on the
/// local subnet for active opens.
pub struct ArpTable<E> {
    info: NetInfo,
    tx: E,
    active_time: Instant,
    caches: HashMap<Ipv4Addr, MacAddr>,
    requested: HashMap<Ipv4Addr, Instant>,
}

impl<E: EtherDriver> ArpTable<E> {
    pub fn new(info: NetInfo, tx: E) -> Self {
        Self {
            info,
            tx,
            active_time: Instant::now(),
            caches: HashMap::new(),
            requested: HashMap::new(),
        }
    }

    pub fn lookup(&self, addr: Ipv4Addr) -> Option<MacAddr> {
        self.caches.get(&addr).copied()
    }

    /// Asks the cached peers again every 30 seconds so their tables keep us.
    pub fn heartbeat(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.active_time) < REFRESH_INTERVAL {
            return;
        }

        self.active_time = now;
        let peers: Vec<_> = self.caches.iter().map(|(ip, mac)| (*ip, *mac)).collect();
        for (ip, mac) in peers {
            self.send_arp_packet(mac, ip, ArpOperations::Request);
        }
    }

    pub fn handle_packet(&mut self, request: &EthernetPacket) {
        let Some(arp_packet) = ArpPacket::new(request.payload()) else {
            return;
        };

        let source_mac = arp_packet.get_sender_hw_addr();
        let source_ip = arp_packet.get_sender_proto_addr();
        let operation = arp_packet.get_operation();

        if operation == ArpOperations::Reply {
            if arp_packet.get_target_proto_addr() == self.info.addr {
                debug!("ARP {} is at {}", source_ip, source_mac);
                self.requested.remove(&source_ip);
                self.caches.insert(source_ip, source_mac);
            }
            return;
        }

        if operation != ArpOperations::Request || arp_packet.get_target_proto_addr() != self.info.addr {
            return;
        }

        self.send_arp_packet(source_mac, source_ip, ArpOperations::Reply);
        self.caches.insert(source_ip, source_mac);
    }

    fn send_arp_packet(
        &mut self,
        destination_mac: MacAddr,
        destination_ip: Ipv4Addr,
        operation: ArpOperation,
    ) {
        let mac = self.info.mac;
        let addr = self.info.addr;
        let target_hw_addr = if operation == ArpOperations::Request {
            MacAddr::zero()
        } else {
            destination_mac
        };

        let result = self.tx.transmit(ARP_FRAME_LEN, &mut |buffer: &mut [u8]| {
            let Some(mut ethernet_packet) = MutableEthernetPacket::new(buffer) else {
                return;
            };
            ethernet_packet.set_destination(destination_mac);
            ethernet_packet.set_source(mac);
            ethernet_packet.set_ethertype(EtherTypes::Arp);

            let Some(mut arp_packet) = MutableArpPacket::new(ethernet_packet.payload_mut()) else {
                return;
            };
            arp_packet.set_hardware_type(ArpHardwareTypes::Ethernet);
            arp_packet.set_protocol_type(EtherTypes::Ipv4);
            arp_packet.set_hw_addr_len(6);
            arp_packet.set_proto_addr_len(4);
            arp_packet.set_operation(operation);
            arp_packet.set_sender_hw_addr(mac);
            arp_packet.set_sender_proto_addr(addr);
            arp_packet.set_target_hw_addr(target_hw_addr);
            arp_packet.set_target_proto_addr(destination_ip);
        });

        match result {
            Ok(()) => info!(
                "ARP {:?} to {}[{}]",
                operation, destination_ip, destination_mac
            ),
            Err(e) => warn!("ARP {:?} to {} failed: {}", operation, destination_ip, e),
        }
    }
}

impl<E: EtherDriver> MacResolver for ArpTable<E> {
    /// Cached address, or `None` after broadcasting a request (at most one
    /// per second and peer).
    fn resolve(&mut self, addr: Ipv4Addr) -> Option<MacAddr> {
        if let Some(mac) = self.lookup(addr) {
            return Some(mac);
        }

        if !self.info.in_subnet(addr) {
            trace!("ARP {} is outside the local subnet", addr);
            return None;
        }

        let now = Instant::now();
        let due = self
            .requested
            .get(&addr)
            .map_or(true, |last| now.duration_since(*last) >= REQUEST_INTERVAL);
        if due {
            self.requested.insert(addr, now);
            self.send_arp_packet(MacAddr::broadcast(), addr, ArpOperations::Request);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Default)]
    struct Recorder {
        frames: Vec<Vec<u8>>,
    }

    impl EtherDriver for Recorder {
        fn transmit(&mut self, len: usize, build: &mut dyn FnMut(&mut [u8])) -> io::Result<()> {
            let mut frame = vec![0; len];
            build(&mut frame);
            self.frames.push(frame);
            Ok(())
        }
    }

    fn info() -> NetInfo {
        NetInfo::new(
            MacAddr::new(0x02, 0, 0, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(255, 255, 255, 0),
        )
    }

    fn arp_frame(operation: ArpOperation, sender: (MacAddr, Ipv4Addr), target: Ipv4Addr) -> Vec<u8> {
        let mut buffer = vec![0u8; ARP_FRAME_LEN];
        let mut ethernet_packet = MutableEthernetPacket::new(&mut buffer).unwrap();
        ethernet_packet.set_destination(MacAddr::broadcast());
        ethernet_packet.set_source(sender.0);
        ethernet_packet.set_ethertype(EtherTypes::Arp);

        let mut arp_packet = MutableArpPacket::new(ethernet_packet.payload_mut()).unwrap();
        arp_packet.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp_packet.set_protocol_type(EtherTypes::Ipv4);
        arp_packet.set_hw_addr_len(6);
        arp_packet.set_proto_addr_len(4);
        arp_packet.set_operation(operation);
        arp_packet.set_sender_hw_addr(sender.0);
        arp_packet.set_sender_proto_addr(sender.1);
        arp_packet.set_target_proto_addr(target);
        buffer
    }

    #[test]
    fn test_reply_to_request() {
        let mut table = ArpTable::new(info(), Recorder::default());
        let peer = (MacAddr::new(0x02, 0, 0, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 5));

        let frame = arp_frame(ArpOperations::Request, peer, Ipv4Addr::new(10, 0, 0, 1));
        table.handle_packet(&EthernetPacket::new(&frame).unwrap());

        assert_eq!(table.tx.frames.len(), 1);
        let reply = EthernetPacket::new(&table.tx.frames[0]).unwrap();
        assert_eq!(reply.get_destination(), peer.0);
        let arp_packet = ArpPacket::new(reply.payload()).unwrap();
        assert_eq!(arp_packet.get_operation(), ArpOperations::Reply);
        assert_eq!(arp_packet.get_sender_proto_addr(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(arp_packet.get_target_hw_addr(), peer.0);
        assert_eq!(table.lookup(peer.1), Some(peer.0));
    }

    #[test]
    fn test_request_for_other_host_ignored() {
        let mut table = ArpTable::new(info(), Recorder::default());
        let peer = (MacAddr::new(0x02, 0, 0, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 5));

        let frame = arp_frame(ArpOperations::Request, peer, Ipv4Addr::new(10, 0, 0, 9));
        table.handle_packet(&EthernetPacket::new(&frame).unwrap());
        assert!(table.tx.frames.is_empty());
        assert_eq!(table.lookup(peer.1), None);
    }

    #[test]
    fn test_resolve_sends_one_request() {
        let mut table = ArpTable::new(info(), Recorder::default());
        let peer = (MacAddr::new(0x02, 0, 0, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 5));

        assert_eq!(table.resolve(peer.1), None);
        assert_eq!(table.resolve(peer.1), None);
        assert_eq!(table.tx.frames.len(), 1);
        let request = EthernetPacket::new(&table.tx.frames[0]).unwrap();
        assert_eq!(request.get_destination(), MacAddr::broadcast());

        let frame = arp_frame(ArpOperations::Reply, peer, Ipv4Addr::new(10, 0, 0, 1));
        table.handle_packet(&EthernetPacket::new(&frame).unwrap());
        assert_eq!(table.resolve(peer.1), Some(peer.0));
    }

    #[test]
    fn test_resolve_outside_subnet() {
        let mut table = ArpTable::new(info(), Recorder::default());
        assert_eq!(table.resolve(Ipv4Addr::new(192, 168, 1, 1)), None);
        assert!(table.tx.frames.is_empty());
    }
}
