use std::io;
use std::net::Ipv4Addr;

use log::{debug, trace, warn};

use crate::net::tcp::config::TcpConfig;
use crate::net::tcp::context::Context;
use crate::net::tcp::error::OpenError;
use crate::net::tcp::fsm::Step;
use crate::net::tcp::link::Link;
use crate::net::tcp::segment;
use crate::net::tcp::slots::SlotTable;
use crate::net::tcp::types::{Descriptor, RecvState, SendState};
use crate::net::{EtherDriver, MacResolver, NetInfo};
use crate::prometheus::metrics::{TCP_CHECKSUM_ERRORS, TCP_CONNS, TCP_RX_SEGMENTS};

/// A pool of `N` TCP connections over one Ethernet link.
///
/// `process` is fed every received IPv4 frame, `service` is called once per
/// tick. Both skip slots the other one holds locked.
pub struct TcpStack<E, R, const N: usize> {
    pub(super) slots: SlotTable<N>,
    pub(super) link: Link<E, R>,
    last_error: Option<OpenError>,
}

impl<E: EtherDriver, R: MacResolver, const N: usize> TcpStack<E, R, N> {
    pub fn new(driver: E, resolver: R, info: NetInfo, config: TcpConfig) -> Self {
        Self {
            slots: SlotTable::new(),
            link: Link::new(driver, resolver, info, config),
            last_error: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    pub fn info(&self) -> &NetInfo {
        &self.link.info
    }

    pub fn driver(&self) -> &E {
        &self.link.driver
    }

    pub fn driver_mut(&mut self) -> &mut E {
        &mut self.link.driver
    }

    /// Opens a connection.
    ///
    /// A server listens on local `port` for `addr`, or for the first peer
    /// that shows up when `addr` is `UNSPECIFIED`. A client connects from an
    /// ephemeral port to `addr:port` once the peer MAC address is resolved.
    pub fn open(&mut self, addr: Ipv4Addr, port: u16, server: bool) -> Result<Descriptor, OpenError> {
        let result = self.try_open(addr, port, server);
        match result {
            Ok(_) => self.last_error = None,
            Err(e) => {
                // repeated failures of a reopen loop are logged once
                if self.last_error != Some(e) {
                    warn!("TCP open {}:{} failed: {}", addr, port, e);
                    self.last_error = Some(e);
                }
            }
        }
        result
    }

    fn try_open(&mut self, addr: Ipv4Addr, port: u16, server: bool) -> Result<Descriptor, OpenError> {
        if port == 0 {
            return Err(OpenError::FailPort);
        }
        if self.link.info.is_broadcast(addr) {
            return Err(OpenError::FailAdrs);
        }
        if addr.is_unspecified() && !server {
            return Err(OpenError::FailAny);
        }

        // a port value is held by the listener on it or the client to it
        if self
            .slots
            .iter()
            .any(|ctx| ctx.local_port == port || (!ctx.server && ctx.remote_port == port))
        {
            return Err(OpenError::EvenPort);
        }

        let local_port = if server {
            port
        } else {
            self.free_ephemeral_port()
        };

        let mut ctx = Context::new(addr, local_port, server, &self.link.config);
        if !server {
            ctx.remote_port = port;
        }

        let idx = self.slots.alloc(ctx).ok_or(OpenError::ContextEmpty)?;
        if let Some(ctx) = self.slots.get(idx) {
            debug!("{}: open, free slots: {}", ctx, self.slots.free_count());
        }
        self.slots.unlock(idx);
        TCP_CONNS.inc();

        Ok(Descriptor(idx))
    }

    fn free_ephemeral_port(&mut self) -> u16 {
        let mut port = self.link.ephemeral_port();
        for _ in 0..16 {
            if !self.slots.iter().any(|ctx| ctx.local_port == port) {
                break;
            }
            port = self.link.ephemeral_port();
        }
        port
    }

    fn context(&self, desc: Descriptor) -> io::Result<&Context> {
        self.slots.get(desc.0).ok_or_else(|| invalid_descriptor(desc))
    }

    fn context_mut(&mut self, desc: Descriptor) -> io::Result<&mut Context> {
        self.slots.get_mut(desc.0).ok_or_else(|| invalid_descriptor(desc))
    }

    /// Whether the slot is still allocated.
    pub fn probe(&self, desc: Descriptor) -> bool {
        self.slots.is_alloc(desc.0)
    }

    pub fn connected(&self, desc: Descriptor) -> bool {
        self.slots.get(desc.0).is_some_and(Context::is_established)
    }

    /// `false` once a FIN was seen in either direction.
    pub fn is_open(&self, desc: Descriptor) -> bool {
        self.slots
            .get(desc.0)
            .is_some_and(|ctx| !ctx.recv_fin && !ctx.send_fin)
    }

    pub fn state(&self, desc: Descriptor) -> Option<(RecvState, SendState)> {
        self.slots
            .get(desc.0)
            .map(|ctx| (ctx.recv_state, ctx.send_state))
    }

    /// Peer address, `UNSPECIFIED` while a listener waits for its first peer.
    pub fn get_ip(&self, desc: Descriptor) -> Option<Ipv4Addr> {
        self.slots.get(desc.0).map(|ctx| ctx.addr)
    }

    /// Local port of the connection.
    pub fn get_port(&self, desc: Descriptor) -> Option<u16> {
        self.slots.get(desc.0).map(|ctx| ctx.local_port)
    }

    /// Peer port, 0 while a listener waits for its first peer.
    pub fn peer_port(&self, desc: Descriptor) -> Option<u16> {
        self.slots.get(desc.0).map(|ctx| ctx.remote_port)
    }

    /// Round trip time of the handshake in ticks.
    pub fn rtt_ticks(&self, desc: Descriptor) -> Option<u32> {
        self.slots
            .get(desc.0)
            .filter(|ctx| ctx.rtt_ticks > 0)
            .map(|ctx| ctx.rtt_ticks)
    }

    /// Bytes sent and waiting for their acknowledgement.
    pub fn in_flight(&self, desc: Descriptor) -> Option<usize> {
        self.slots.get(desc.0).map(|ctx| ctx.send_len as usize)
    }

    /// Queues as much of `data` as fits in the outbound buffer.
    ///
    /// Bytes go out on the following ticks.
    pub fn send(&mut self, desc: Descriptor, data: &[u8]) -> io::Result<usize> {
        let ctx = self.context_mut(desc)?;
        if ctx.close_req || ctx.send_fin {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("connection {} is closing", desc),
            ));
        }
        Ok(ctx.send.put(data))
    }

    /// Moves received bytes into `buf`.
    pub fn recv(&mut self, desc: Descriptor, buf: &mut [u8]) -> io::Result<usize> {
        let ctx = self.context_mut(desc)?;
        Ok(ctx.recv.get(buf, true))
    }

    /// Bytes queued for sending, including those in flight.
    pub fn get_send_length(&self, desc: Descriptor) -> io::Result<usize> {
        Ok(self.context(desc)?.send.len())
    }

    pub fn get_recv_length(&self, desc: Descriptor) -> io::Result<usize> {
        Ok(self.context(desc)?.recv.len())
    }

    /// Starts closing the connection.
    ///
    /// FIN goes out right away when nothing is waiting to be sent, otherwise
    /// once the outbound buffer drained. The slot is released when the peer
    /// acknowledged the FIN, or after the close timeout.
    pub fn close(&mut self, desc: Descriptor) {
        let Some(ctx) = self.slots.get_mut(desc.0) else {
            return;
        };

        ctx.close_req = true;
        match ctx.recv_state {
            RecvState::Idle | RecvState::Listen | RecvState::SynSent => {
                ctx.recv_state = RecvState::Closed;
            }
            RecvState::Closed => {}
            _ => {
                if !ctx.send_fin && ctx.send_len == 0 && ctx.send.is_empty() {
                    self.link.send_fin(ctx);
                }
            }
        }
        debug!("{}: close requested", ctx);
    }

    /// Handles one received frame.
    ///
    /// Returns `true` when a connection took the segment.
    pub fn process(&mut self, frame: &[u8]) -> bool {
        let segment = match segment::parse(frame) {
            Ok(segment) => segment,
            Err(e) if e.is_checksum() => {
                TCP_CHECKSUM_ERRORS.inc();
                warn!("TCP segment dropped: {}", e);
                return false;
            }
            Err(e) => {
                trace!("frame ignored: {}", e);
                return false;
            }
        };
        TCP_RX_SEGMENTS.inc();

        if segment.dst_addr != self.link.info.addr {
            trace!("TCP segment for {} ignored", segment.dst_addr);
            return false;
        }

        for idx in 0..N {
            if !self.slots.is_alloc(idx) || self.slots.is_lock(idx) {
                continue;
            }
            if !self
                .slots
                .get(idx)
                .is_some_and(|ctx| ctx.matches(&segment))
            {
                continue;
            }

            self.slots.lock(idx);
            let handled = match self.slots.get_mut(idx) {
                Some(ctx) => {
                    if ctx.remote_port == 0 {
                        ctx.remote_port = segment.src_port;
                        debug!("{}: peer port bound", ctx);
                    }
                    self.link.handle_segment(ctx, &segment)
                }
                None => false,
            };
            self.slots.unlock(idx);
            return handled;
        }

        trace!(
            "no connection for {}:{} -> {}",
            segment.src_addr,
            segment.src_port,
            segment.dst_port
        );
        false
    }

    /// Runs one tick: timers, retransmits, pending data and slot release.
    pub fn service(&mut self) {
        self.link.tick();

        for idx in 0..N {
            if !self.slots.is_alloc(idx) || self.slots.is_lock(idx) {
                continue;
            }

            let step = match self.slots.get_mut(idx) {
                Some(ctx) => self.link.service_slot(ctx),
                None => continue,
            };

            if step == Step::Reap {
                self.slots.lock(idx);
                if let Some(ctx) = self.slots.get(idx) {
                    debug!("{}: released", ctx);
                }
                self.slots.erase(idx);
                TCP_CONNS.dec();
            }
        }
    }
}

fn invalid_descriptor(desc: Descriptor) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no connection for descriptor {}", desc),
    )
}
