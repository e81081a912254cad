//! Receive side and send side state machines.
//!
//! `handle_segment` runs in the frame arrival context and only moves
//! `recv_state`, except for a reset which closes both sides. `service_slot`
//! runs once per tick in the polled context and owns `send_state`: it
//! retransmits, waits for MAC resolution and decides when a slot is released.

use log::{debug, trace, warn};
use pnet::packet::tcp::TcpFlags;

use crate::net::tcp::context::Context;
use crate::net::tcp::link::Link;
use crate::net::tcp::segment::Segment;
use crate::net::tcp::types::{seq_ge, RecvState, SendState};
use crate::net::{EtherDriver, MacResolver};
use crate::prometheus::metrics::{TCP_RESENDS, TCP_RESETS, TCP_RX_BYTES};

/// Outcome of one service tick for a slot.
#[derive(PartialEq, Eq, Debug)]
pub(super) enum Step {
    Keep,
    Reap,
}

impl<E: EtherDriver, R: MacResolver> Link<E, R> {
    /// Applies one segment to its connection and sends the reply, if any.
    ///
    /// Returns `false` only when a reply was due but could not be sent.
    pub(super) fn handle_segment(&mut self, ctx: &mut Context, segment: &Segment) -> bool {
        ctx.flags = 0;
        trace!(
            "{}: recv flags: {:08b}, seq: {}, ack: {}, win: {}, payload size: {}",
            ctx,
            segment.flags,
            segment.seq,
            segment.ack,
            segment.window,
            segment.payload.len()
        );

        let send = match ctx.recv_state {
            RecvState::Listen => self.state_listen(ctx, segment),
            RecvState::SynSent => self.state_syn_sent(ctx, segment),
            RecvState::SynReceived => self.state_syn_received(ctx, segment),
            RecvState::Established => self.state_established(ctx, segment),
            RecvState::SyncClose => self.state_sync_close(ctx, segment),
            RecvState::Idle | RecvState::Closed => false,
        };

        if !send {
            return true;
        }

        match self.emit(ctx, false) {
            Ok(()) => true,
            Err(e) => {
                warn!("{}: reply dropped: {}", ctx, e);
                false
            }
        }
    }

    fn state_listen(&mut self, ctx: &mut Context, segment: &Segment) -> bool {
        if ctx.server && ctx.addr.is_unspecified() {
            ctx.addr = segment.src_addr;
            debug!("{}: bound to first contact", ctx);
        }
        ctx.mac = segment.src_mac;

        let mut send = false;
        if segment.has(TcpFlags::SYN) {
            ctx.send_seq = self.initial_seq();
            ctx.send_ack = segment.seq.wrapping_add(1);
            ctx.flags |= TcpFlags::SYN | TcpFlags::ACK;
            ctx.timer_ref = self.ticks();
            ctx.syn_wait = 0;
            ctx.recv_state = RecvState::SynReceived;
            trace!("{}: SYN, ISN: {}", ctx, segment.seq);
            send = true;
        }

        if segment.has(TcpFlags::FIN) {
            if !segment.has(TcpFlags::SYN) {
                ctx.send_ack = segment
                    .seq
                    .wrapping_add(segment.payload.len() as u32)
                    .wrapping_add(1);
            }
            ctx.recv_fin = true;
            ctx.flags |= TcpFlags::ACK;
            ctx.recv_state = RecvState::SyncClose;
            debug!("{}: FIN before handshake", ctx);
            send = true;
        }

        send
    }

    fn state_syn_sent(&mut self, ctx: &mut Context, segment: &Segment) -> bool {
        if segment.has(TcpFlags::RST) {
            self.reset_closed(ctx);
            return false;
        }

        if segment.has(TcpFlags::SYN)
            && segment.has(TcpFlags::ACK)
            && segment.ack == ctx.send_seq.wrapping_add(1)
        {
            ctx.rtt_ticks = self.elapsed(ctx.timer_ref).max(1);
            ctx.send_seq = ctx.send_seq.wrapping_add(1);
            ctx.send_ack = segment.seq.wrapping_add(1);
            ctx.resend_cnt = 0;
            ctx.send_wait = 0;
            ctx.flags |= TcpFlags::ACK;
            ctx.recv_state = RecvState::Established;
            debug!("{}: established, rtt: {} ticks", ctx, ctx.rtt_ticks);
            return true;
        }

        false
    }

    fn state_syn_received(&mut self, ctx: &mut Context, segment: &Segment) -> bool {
        if segment.has(TcpFlags::RST) {
            self.reset_closed(ctx);
            return false;
        }

        if segment.has(TcpFlags::ACK)
            && segment.seq == ctx.send_ack
            && segment.ack == ctx.send_seq.wrapping_add(1)
        {
            ctx.rtt_ticks = self.elapsed(ctx.timer_ref).max(1);
            ctx.send_seq = ctx.send_seq.wrapping_add(1);
            ctx.recv_state = RecvState::Established;
            debug!("{}: established, rtt: {} ticks", ctx, ctx.rtt_ticks);

            if !segment.payload.is_empty() || segment.has(TcpFlags::FIN) {
                return self.state_established(ctx, segment);
            }
            return false;
        }

        let mut send = false;
        if segment.has(TcpFlags::SYN) && segment.seq.wrapping_add(1) == ctx.send_ack {
            trace!("{}: SYN again, resend SYN-ACK", ctx);
            ctx.flags |= TcpFlags::SYN | TcpFlags::ACK;
            send = true;
        }

        if segment.has(TcpFlags::FIN) && self.accept_fin(ctx, segment) {
            ctx.flags |= TcpFlags::ACK;
            ctx.recv_state = RecvState::SyncClose;
            send = true;
        }

        send
    }

    fn state_established(&mut self, ctx: &mut Context, segment: &Segment) -> bool {
        if segment.has(TcpFlags::RST) {
            self.reset_closed(ctx);
            return false;
        }

        self.release_acked(ctx, segment);

        let mut send = false;
        if !segment.payload.is_empty() {
            let len = segment.payload.len();
            if segment.ack == ctx.send_seq && segment.seq == ctx.send_ack && len <= ctx.recv.free()
            {
                ctx.recv.put(segment.payload);
                ctx.send_ack = ctx.send_ack.wrapping_add(len as u32);
                TCP_RX_BYTES.inc_by(len as u64);
            } else {
                trace!(
                    "{}: payload [{}, +{}) not accepted, expect seq: {}, free: {}",
                    ctx,
                    segment.seq,
                    len,
                    ctx.send_ack,
                    ctx.recv.free()
                );
            }
            ctx.flags |= TcpFlags::ACK;
            send = true;
        }

        if segment.has(TcpFlags::FIN) && self.accept_fin(ctx, segment) {
            ctx.flags |= TcpFlags::ACK;
            if !ctx.send_fin {
                ctx.flags |= TcpFlags::FIN;
                ctx.send_fin = true;
            }
            ctx.recv_state = RecvState::SyncClose;
            debug!("{}: FIN received", ctx);
            send = true;
        }

        send
    }

    fn state_sync_close(&mut self, ctx: &mut Context, segment: &Segment) -> bool {
        if segment.has(TcpFlags::RST) {
            self.reset_closed(ctx);
            return false;
        }

        // data still in flight when the peer's FIN came in
        self.release_acked(ctx, segment);

        if ctx.send_fin
            && segment.has(TcpFlags::ACK)
            && segment.ack == ctx.fin_seq.wrapping_add(1)
            && segment.seq == ctx.send_ack
        {
            ctx.send_seq = ctx.fin_seq.wrapping_add(1);
            ctx.send_len = 0;
            ctx.recv_state = RecvState::Closed;
            debug!("{}: FIN acknowledged", ctx);
        }

        let mut send = false;
        if segment.has(TcpFlags::FIN) && self.accept_fin(ctx, segment) {
            ctx.flags |= TcpFlags::ACK;
            send = true;
        }

        if !segment.payload.is_empty() {
            debug!(
                "{}: payload while closing ignored, size: {}",
                ctx,
                segment.payload.len()
            );
        }

        send
    }

    /// Drops the chunk in flight from the outbound buffer once the peer
    /// acknowledged all of it.
    fn release_acked(&self, ctx: &mut Context, segment: &Segment) {
        if !segment.has(TcpFlags::ACK) || ctx.send_len == 0 {
            return;
        }

        let end = ctx.send_seq.wrapping_add(ctx.send_len as u32);
        if segment.seq == ctx.send_ack && seq_ge(segment.ack, end) {
            trace!("{}: {} bytes acknowledged", ctx, ctx.send_len);
            ctx.send.advance(ctx.send_len as usize);
            ctx.send_seq = end;
            ctx.send_len = 0;
            ctx.send_wait = 0;
            ctx.resend_cnt = 0;
        }
    }

    /// Takes a FIN into account when it sits right after the received data.
    ///
    /// A retransmitted FIN that was already counted is acknowledged again
    /// without moving `send_ack`.
    fn accept_fin(&self, ctx: &mut Context, segment: &Segment) -> bool {
        let fin_seq = segment.seq.wrapping_add(segment.payload.len() as u32);
        if fin_seq == ctx.send_ack {
            ctx.send_ack = ctx.send_ack.wrapping_add(1);
            ctx.recv_fin = true;
            return true;
        }

        ctx.recv_fin && fin_seq.wrapping_add(1) == ctx.send_ack
    }

    fn reset_closed(&self, ctx: &mut Context) {
        ctx.recv_state = RecvState::Closed;
        ctx.send_state = SendState::Close;
        debug!("{}: RST received", ctx);
    }

    /// Advances the send side of one slot by a tick.
    pub(super) fn service_slot(&mut self, ctx: &mut Context) -> Step {
        match ctx.send_state {
            SendState::Idle => Step::Keep,
            SendState::SyncMac => {
                if ctx.close_req {
                    ctx.send_state = SendState::Close;
                } else {
                    self.sync_mac(ctx);
                }
                Step::Keep
            }
            SendState::Main => {
                self.send_main(ctx);
                if ctx.send_state == SendState::Main && (ctx.recv_fin || ctx.close_req) {
                    ctx.send_state = SendState::SyncClose;
                    ctx.close_time = self.config.close_timeout;
                    debug!("{}: start close", ctx);
                }
                Step::Keep
            }
            SendState::SyncClose => {
                if ctx.close_req && ctx.recv_state == RecvState::Closed {
                    return Step::Reap;
                }

                // nothing more goes out once the peer's FIN is in
                if !ctx.recv_fin {
                    self.send_main(ctx);
                    self.send_deferred_fin(ctx);
                }

                if ctx.close_time > 0 {
                    ctx.close_time -= 1;
                    if ctx.close_time == 0 {
                        debug!("{}: close timeout", ctx);
                    }
                    Step::Keep
                } else {
                    Step::Reap
                }
            }
            SendState::Close => Step::Reap,
        }
    }

    fn sync_mac(&mut self, ctx: &mut Context) {
        let Some(mac) = self.resolver.resolve(ctx.addr) else {
            return;
        };

        ctx.mac = mac;
        ctx.send_seq = self.initial_seq();
        ctx.flags = TcpFlags::SYN;
        ctx.timer_ref = self.ticks();
        ctx.send_time = self.ticks();
        ctx.send_wait = self.resend_wait();
        ctx.resend_cnt = 0;
        ctx.recv_state = RecvState::SynSent;
        ctx.send_state = SendState::Main;
        debug!("{}: peer MAC {}, send SYN", ctx, mac);

        if let Err(e) = self.emit_polled(ctx, false) {
            warn!("{}: SYN dropped: {}", ctx, e);
        }
    }

    fn send_main(&mut self, ctx: &mut Context) {
        match ctx.recv_state {
            RecvState::SynSent => self.resend_syn(ctx),
            RecvState::SynReceived => {
                ctx.syn_wait += 1;
                if ctx.syn_wait >= self.config.syn_timeout {
                    debug!("{}: SYN_RCVD timeout", ctx);
                    ctx.close_req = true;
                    self.send_fin(ctx);
                }
            }
            RecvState::Established => self.send_data(ctx),
            _ => {}
        }
    }

    fn resend_syn(&mut self, ctx: &mut Context) {
        if self.elapsed(ctx.send_time) < ctx.send_wait {
            return;
        }

        ctx.resend_cnt += 1;
        if ctx.resend_cnt >= self.config.resend_limit {
            warn!("{}: no answer to SYN, give up", ctx);
            ctx.recv_state = RecvState::Closed;
            ctx.send_state = SendState::Close;
            return;
        }

        TCP_RESENDS.inc();
        ctx.flags = TcpFlags::SYN;
        ctx.send_time = self.ticks();
        ctx.send_wait = self.resend_wait();
        if let Err(e) = self.emit_polled(ctx, false) {
            warn!("{}: SYN dropped: {}", ctx, e);
        }
    }

    /// Sends the next chunk of outbound data, or resends the chunk in flight
    /// once its wait expired.
    fn send_data(&mut self, ctx: &mut Context) {
        if ctx.send_len > 0 {
            if self.elapsed(ctx.send_time) < ctx.send_wait {
                return;
            }

            ctx.resend_cnt += 1;
            if ctx.resend_cnt >= self.config.resend_limit {
                warn!("{}: resend limit reached, send RST", ctx);
                TCP_RESETS.inc();
                ctx.flags = TcpFlags::RST;
                if let Err(e) = self.emit_polled(ctx, false) {
                    warn!("{}: RST dropped: {}", ctx, e);
                }
                ctx.recv_state = RecvState::Closed;
                ctx.send_state = SendState::Close;
                return;
            }

            TCP_RESENDS.inc();
            debug!(
                "{}: resend {} bytes ({}/{})",
                ctx, ctx.send_len, ctx.resend_cnt, self.config.resend_limit
            );
            // staged again from the buffer at the same sequence number
            ctx.send_len = 0;
        } else if ctx.send.is_empty() {
            return;
        }

        ctx.flags = TcpFlags::ACK;
        if let Err(e) = self.emit_polled(ctx, true) {
            warn!("{}: data dropped: {}", ctx, e);
        }
    }

    /// FIN held back by `close` until the outbound buffer drained.
    fn send_deferred_fin(&mut self, ctx: &mut Context) {
        if ctx.close_req
            && !ctx.send_fin
            && ctx.send_len == 0
            && ctx.send.is_empty()
            && matches!(
                ctx.recv_state,
                RecvState::Established | RecvState::SynReceived
            )
        {
            self.send_fin(ctx);
        }
    }

    /// Sends FIN from the polled context and waits for its acknowledgement.
    pub(super) fn send_fin(&mut self, ctx: &mut Context) {
        ctx.flags = TcpFlags::FIN | TcpFlags::ACK;
        match self.emit_polled(ctx, false) {
            Ok(()) => {
                ctx.send_fin = true;
                if ctx.recv_state != RecvState::Closed {
                    ctx.recv_state = RecvState::SyncClose;
                }
            }
            Err(e) => warn!("{}: FIN dropped: {}", ctx, e),
        }
    }
}
