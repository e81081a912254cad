/// Largest payload that fits a 1500 byte IPv4 MTU.
pub const MAX_MSS: u16 = 1460;

/// Tunables of the TCP stack.
///
/// Every timer is counted in service ticks (10 ms each).
#[derive(Clone, Debug)]
pub struct TcpConfig {
    /// Largest payload carried by one segment, within `1..=MAX_MSS`
    pub mss: u16,
    /// Ticks to wait for the handshake ACK after a SYN-ACK
    pub syn_timeout: u32,
    /// Base retransmit wait
    pub resend_wait: u32,
    /// Jitter subtracted from `resend_wait`, drawn from `0..resend_span`
    pub resend_span: u32,
    /// Consecutive timeouts that reset the connection
    pub resend_limit: u16,
    /// Ticks to wait for the close handshake before the slot is released
    pub close_timeout: u32,
    /// Advertised receive window
    pub window: u16,
    /// IPv4 time to live
    pub ttl: u8,
    pub recv_buffer: usize,
    pub send_buffer: usize,
    /// Seed of the pseudo random source
    pub seed: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            mss: MAX_MSS,
            syn_timeout: 30 * 100,
            resend_wait: 90,
            resend_span: 20,
            resend_limit: 7,
            close_timeout: 5 * 1000 / 10,
            window: 0xffff,
            ttl: 255,
            recv_buffer: 4096,
            send_buffer: 4096,
            seed: 1,
        }
    }
}
