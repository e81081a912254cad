use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

lazy_static! {
    pub static ref METRICS_COUNTER: IntCounter =
        register_int_counter!("metrics_counter", "metrics pull counter").unwrap();
    pub static ref TCP_CONNS: IntGauge =
        register_int_gauge!("tcp_conns", "allocated tcp connection slots").unwrap();
    pub static ref TCP_TX_SEGMENTS: IntCounter =
        register_int_counter!("tcp_tx_segments", "tcp sent segments").unwrap();
    pub static ref TCP_RX_SEGMENTS: IntCounter =
        register_int_counter!("tcp_rx_segments", "tcp received segments").unwrap();
    pub static ref TCP_TX_BYTES: IntCounter =
        register_int_counter!("tcp_tx_bytes", "tcp send payload bytes").unwrap();
    pub static ref TCP_RX_BYTES: IntCounter =
        register_int_counter!("tcp_rx_bytes", "tcp recv payload bytes").unwrap();
    pub static ref TCP_CHECKSUM_ERRORS: IntCounter =
        register_int_counter!("tcp_checksum_errors", "dropped segments with a bad checksum")
            .unwrap();
    pub static ref TCP_RESENDS: IntCounter =
        register_int_counter!("tcp_resends", "tcp retransmitted segments").unwrap();
    pub static ref TCP_RESETS: IntCounter =
        register_int_counter!("tcp_resets", "connections reset after the resend limit").unwrap();
}
