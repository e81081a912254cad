use std::fmt::Display;

/// Reasons `open` refuses to allocate a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenError {
    /// Port 0 was requested
    FailPort,
    /// The address is a broadcast address
    FailAdrs,
    /// A client connection needs a concrete peer address
    FailAny,
    /// The port is already bound by another connection
    EvenPort,
    /// Every slot of the pool is in use
    ContextEmpty,
}

impl OpenError {
    pub fn to_str(&self) -> &'static str {
        match self {
            OpenError::FailPort => "FAIL_PORT",
            OpenError::FailAdrs => "FAIL_ADRS",
            OpenError::FailAny => "FAIL_ANY",
            OpenError::EvenPort => "EVEN_PORT",
            OpenError::ContextEmpty => "CONTEXT_EMPTY",
        }
    }
}

impl Display for OpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_str())
    }
}

impl std::error::Error for OpenError {}
