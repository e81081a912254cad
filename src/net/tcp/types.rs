use std::fmt::Display;

/// Receive side protocol state, advanced by arriving segments.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum RecvState {
    Idle,
    Listen,
    SynSent,
    SynReceived,
    Established,
    SyncClose,
    Closed,
}

impl Display for RecvState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_str())
    }
}

impl RecvState {
    pub fn to_str(&self) -> &'static str {
        match self {
            RecvState::Idle => "Idle",
            RecvState::Listen => "Listen",
            RecvState::SynSent => "SynSent",
            RecvState::SynReceived => "SynReceived",
            RecvState::Established => "Established",
            RecvState::SyncClose => "SyncClose",
            RecvState::Closed => "Closed",
        }
    }
}

/// Send side state, advanced by the service tick.
///
/// `SyncClose` is only entered once the peer's FIN was seen or the
/// application asked to close.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum SendState {
    Idle,
    SyncMac,
    Main,
    SyncClose,
    Close,
}

impl Display for SendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_str())
    }
}

impl SendState {
    pub fn to_str(&self) -> &'static str {
        match self {
            SendState::Idle => "Idle",
            SendState::SyncMac => "SyncMac",
            SendState::Main => "Main",
            SendState::SyncClose => "SyncClose",
            SendState::Close => "Close",
        }
    }
}

/// Handle of an open connection; the index of its slot.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Descriptor(pub(super) usize);

impl Display for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// `a >= b` in sequence space.
#[inline]
pub(super) fn seq_ge(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) as i32 >= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_ge() {
        assert!(seq_ge(1, 0));
        assert!(seq_ge(0, 0));
        assert!(!seq_ge(0, 1));
        assert!(seq_ge(0, u32::MAX));
        assert!(seq_ge(20, u32::MAX));
        assert!(!seq_ge(u32::MAX, 20));
    }
}
