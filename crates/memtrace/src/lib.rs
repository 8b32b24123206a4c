//! Allocation tracing with explicit call paths.
//!
//! A [`Tracer`] keeps a stack of frame names pushed by the traced program and
//! wraps an allocator. Each traced allocation, reallocation or release writes
//! one line to a [`LogSink`] naming the source location, the current call path
//! and the address, before the memory operation is carried out:
//!
//! ```text
//! File src/main.rs, line 12, function helper:main:global allocated new memory segment at address 0x5581a0e0 to of size 16
//! ```
//!
//! ```rust
//! use memtrace::{MemorySink, Tracer};
//!
//! let tracer = Tracer::new(MemorySink::new());
//! let _main = tracer.enter("main");
//! let block = memtrace::traced_alloc!(tracer, 16).unwrap();
//! memtrace::traced_free!(tracer, block.as_ptr()).unwrap();
//!
//! assert_eq!(tracer.sink().lines()[0].path, "main:global");
//! ```

extern crate self as memtrace;

pub use memtrace_macros::{main, trace};

mod config;
mod error;
mod guard;
pub mod local;
mod record;
mod sink;
mod stack;
mod tracer;

pub use config::{Format, TraceConfig};
pub use error::{Result, TraceError};
pub use guard::FrameGuard;
pub use record::{LogLine, Operation};
pub use sink::{JsonLines, LogSink, MemorySink, Output, SharedSink, TextLines};
pub use stack::CallStack;
pub use tracer::{Allocation, BLOCK_ALIGN, Tracer};

/// Allocates through a tracer, recording the call site.
///
/// `traced_alloc!(size)` uses the thread's [`local::tracer`],
/// `traced_alloc!(tracer, size)` the given one.
#[macro_export]
macro_rules! traced_alloc {
    ($tracer:expr, $size:expr) => {
        $tracer.traced_allocate($size, file!(), line!())
    };
    ($size:expr) => {
        $crate::local::tracer().traced_allocate($size, file!(), line!())
    };
}

#[macro_export]
macro_rules! traced_realloc {
    ($tracer:expr, $addr:expr, $size:expr) => {
        $tracer.traced_reallocate($addr, $size, file!(), line!())
    };
    ($addr:expr, $size:expr) => {
        $crate::local::tracer().traced_reallocate($addr, $size, file!(), line!())
    };
}

#[macro_export]
macro_rules! traced_free {
    ($tracer:expr, $addr:expr) => {
        $tracer.traced_release($addr, file!(), line!())
    };
    ($addr:expr) => {
        $crate::local::tracer().traced_release($addr, file!(), line!())
    };
}

/// Runs `$expr` inside a frame named `$label` on the thread's tracer.
#[macro_export]
macro_rules! trace_block {
    ($label:expr, $expr:expr) => {{
        // Enforce the label is a &'static str at compile-time
        let __label_static: &'static str = $label;

        let _guard = $crate::local::enter(__label_static);
        $expr
    }};
}
