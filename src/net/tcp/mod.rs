//! TCP over raw Ethernet frames.
//!
//! Each connection lives in a slot of a fixed pool and carries two state
//! machines: the receive side follows arriving segments, the send side is
//! driven by the service tick. Only one chunk of data is in flight at a time.

mod config;
mod context;
mod error;
mod fsm;
mod link;
mod rand;
mod ring_buffer;
pub mod segment;
mod slots;
mod stack;
mod types;


pub use config::{TcpConfig, MAX_MSS};
pub use error::OpenError;
pub use ring_buffer::RingBuffer;
pub use stack::TcpStack;
pub use types::{Descriptor, RecvState, SendState};
