use std::io;

use log::{trace, warn};

use crate::net::tcp::config::{TcpConfig, MAX_MSS};
use crate::net::tcp::context::Context;
use crate::net::tcp::rand::Rand;
use crate::net::tcp::segment::{self, SegmentHeader};
use crate::net::tcp::types::{RecvState, SendState};
use crate::net::{EtherDriver, MacResolver, NetInfo};
use crate::prometheus::metrics::{TCP_TX_BYTES, TCP_TX_SEGMENTS};
use pnet::packet::tcp::TcpFlags;

/// Everything the state machines share besides the slot table: the link,
/// the clock and the random source.
pub(super) struct Link<E, R> {
    pub(super) driver: E,
    pub(super) resolver: R,
    pub(super) info: NetInfo,
    pub(super) config: TcpConfig,
    rand: Rand,
    ticks: u32,
}

impl<E: EtherDriver, R: MacResolver> Link<E, R> {
    pub(super) fn new(driver: E, resolver: R, info: NetInfo, mut config: TcpConfig) -> Self {
        let mss = config.mss.clamp(1, MAX_MSS);
        if mss != config.mss {
            warn!("TCP mss {} out of range, use {}", config.mss, mss);
            config.mss = mss;
        }

        Self {
            driver,
            resolver,
            info,
            rand: Rand::new(config.seed),
            config,
            ticks: 0,
        }
    }

    pub(super) fn ticks(&self) -> u32 {
        self.ticks
    }

    pub(super) fn tick(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
    }

    /// Ticks elapsed since `since`, across counter wrap.
    pub(super) fn elapsed(&self, since: u32) -> u32 {
        self.ticks.wrapping_sub(since)
    }

    pub(super) fn initial_seq(&mut self) -> u32 {
        self.rand.rand_u32() & 0xff7f_ffff
    }

    pub(super) fn ephemeral_port(&mut self) -> u16 {
        49152 + self.rand.below(16384) as u16
    }

    /// Retransmit wait with jitter, so connections do not resend in lockstep.
    pub(super) fn resend_wait(&mut self) -> u32 {
        let jitter = self.rand.below(self.config.resend_span);
        self.config.resend_wait.saturating_sub(jitter).max(1)
    }

    /// Sends a segment carrying `ctx.flags` to the peer.
    ///
    /// With `data` set, an established connection with nothing in flight
    /// also carries the next chunk of the outbound buffer, marked PSH, and
    /// the retransmit timer is armed for it. The chunk stays in the buffer
    /// until it is acknowledged.
    pub(super) fn emit(&mut self, ctx: &mut Context, data: bool) -> io::Result<()> {
        let mut payload = Vec::new();
        if data
            && ctx.send_len == 0
            && !ctx.send_fin
            && ctx.recv_state == RecvState::Established
            && matches!(ctx.send_state, SendState::Main | SendState::SyncClose)
            && !ctx.send.is_empty()
        {
            payload.resize(ctx.send.len().min(ctx.mss as usize), 0);
            let len = ctx.send.get(&mut payload, false);
            payload.truncate(len);

            ctx.send_len = len as u16;
            ctx.flags |= TcpFlags::PSH;
            ctx.send_wait = self.resend_wait();
            ctx.send_time = self.ticks;
        }

        let seq = if ctx.flags & TcpFlags::FIN != 0 {
            ctx.fin_seq = ctx.next_seq();
            ctx.fin_seq
        } else {
            ctx.send_seq
        };

        let header = SegmentHeader {
            src_mac: self.info.mac,
            dst_mac: ctx.mac,
            src_addr: self.info.addr,
            dst_addr: ctx.addr,
            src_port: ctx.local_port,
            dst_port: ctx.remote_port,
            seq,
            ack: ctx.send_ack,
            flags: ctx.flags,
            window: ctx.window,
            urgent_ptr: ctx.urgent_ptr,
            identification: ctx.id,
            fragment_offset: ctx.offset,
            ttl: ctx.ttl,
        };

        let mut built = false;
        self.driver
            .transmit(segment::frame_len(payload.len()), &mut |buffer: &mut [u8]| {
                built = segment::build(buffer, &header, &payload).is_some();
            })?;
        if !built {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "transmit buffer too small",
            ));
        }

        TCP_TX_SEGMENTS.inc();
        TCP_TX_BYTES.inc_by(payload.len() as u64);
        trace!(
            "{}: send flags: {:08b}, seq: {}, ack: {}, payload size: {}",
            ctx,
            header.flags,
            header.seq,
            header.ack,
            payload.len()
        );
        Ok(())
    }

    /// `emit` from the polled context, with frame reception masked.
    pub(super) fn emit_polled(&mut self, ctx: &mut Context, data: bool) -> io::Result<()> {
        self.driver.enable_interrupt(false);
        let result = self.emit(ctx, data);
        self.driver.enable_interrupt(true);
        result
    }
}
