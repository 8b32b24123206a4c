use std::io;

/// Errors surfaced by the tracer.
///
/// Allocation failure is reported after its log line has been written, so the
/// trace still shows the attempt with a `0x0` address.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("frame stack underflow: pop without a matching push")]
    StackUnderflow,

    #[error("allocator could not provide {size} bytes")]
    OutOfMemory { size: usize },

    #[error("address {address:#x} was not allocated by this tracer")]
    UnknownAddress { address: usize },

    #[error("failed to write to the log sink")]
    Sink(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TraceError>;
