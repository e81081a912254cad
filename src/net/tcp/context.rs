use std::fmt::Display;
use std::net::{Ipv4Addr, SocketAddrV4};

use pnet::util::MacAddr;

use crate::net::tcp::config::TcpConfig;
use crate::net::tcp::ring_buffer::RingBuffer;
use crate::net::tcp::segment::Segment;
use crate::net::tcp::types::{RecvState, SendState};

/// Full state of one connection slot.
pub(super) struct Context {
    /// Peer address, `UNSPECIFIED` until a listener binds its first client
    pub(super) addr: Ipv4Addr,
    pub(super) mac: MacAddr,
    pub(super) local_port: u16,
    /// Peer port, 0 until learned from the first segment
    pub(super) remote_port: u16,
    pub(super) server: bool,

    // IPv4 header fields
    pub(super) mss: u16,
    pub(super) id: u16,
    pub(super) offset: u16,
    pub(super) ttl: u8,

    pub(super) recv_state: RecvState,
    pub(super) send_state: SendState,

    pub(super) recv: RingBuffer,
    pub(super) send: RingBuffer,

    /// Tick at which the SYN-ACK went out
    pub(super) timer_ref: u32,
    /// Handshake round trip in ticks, never 0 once measured
    pub(super) rtt_ticks: u32,
    /// Tick of the last data (or SYN) transmission
    pub(super) send_time: u32,

    pub(super) send_seq: u32,
    pub(super) send_ack: u32,
    pub(super) flags: u8,
    pub(super) window: u16,
    pub(super) urgent_ptr: u16,

    /// Ticks spent in `SynReceived`
    pub(super) syn_wait: u32,
    pub(super) resend_cnt: u16,
    /// Bytes sent and not yet acknowledged
    pub(super) send_len: u16,
    /// Ticks to wait for the acknowledgement of `send_len` bytes
    pub(super) send_wait: u32,

    pub(super) recv_fin: bool,
    pub(super) send_fin: bool,
    /// Sequence number our FIN went out with
    pub(super) fin_seq: u32,
    pub(super) close_req: bool,
    /// Remaining ticks of the close handshake
    pub(super) close_time: u32,
}

impl Context {
    pub(super) fn new(addr: Ipv4Addr, local_port: u16, server: bool, config: &TcpConfig) -> Self {
        let (recv_state, send_state) = if server {
            (RecvState::Listen, SendState::Main)
        } else {
            (RecvState::Idle, SendState::SyncMac)
        };

        Self {
            addr,
            mac: MacAddr::zero(),
            local_port,
            remote_port: 0,
            server,
            mss: config.mss,
            id: 0,
            offset: 0,
            ttl: config.ttl,
            recv_state,
            send_state,
            recv: RingBuffer::new(config.recv_buffer),
            send: RingBuffer::new(config.send_buffer),
            timer_ref: 0,
            rtt_ticks: 0,
            send_time: 0,
            send_seq: 0,
            send_ack: 0,
            flags: 0,
            window: config.window,
            urgent_ptr: 0,
            syn_wait: 0,
            resend_cnt: 0,
            send_len: 0,
            send_wait: 0,
            recv_fin: false,
            send_fin: false,
            fin_seq: 0,
            close_req: false,
            close_time: 0,
        }
    }

    pub(super) fn peer(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.addr, self.remote_port)
    }

    /// Whether an arriving segment belongs to this connection.
    pub(super) fn matches(&self, segment: &Segment) -> bool {
        if !self.addr.is_unspecified() && self.addr != segment.src_addr {
            return false;
        }
        if self.remote_port != 0 && self.remote_port != segment.src_port {
            return false;
        }
        self.local_port == segment.dst_port
    }

    pub(super) fn is_established(&self) -> bool {
        self.recv_state == RecvState::Established
    }

    /// First sequence number not taken yet by the SYN or by data in flight.
    pub(super) fn next_seq(&self) -> u32 {
        if self.recv_state == RecvState::SynReceived {
            // SYN sent, handshake ACK still missing
            self.send_seq.wrapping_add(1)
        } else {
            self.send_seq.wrapping_add(self.send_len as u32)
        }
    }
}

impl Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {})[{}/{}]",
            self.local_port,
            self.peer(),
            self.recv_state,
            self.send_state
        )
    }
}
