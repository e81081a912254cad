pub mod net;
pub mod prometheus;
