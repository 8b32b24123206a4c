//! Per-thread default tracer used by `#[memtrace::trace]`, `#[memtrace::main]`
//! and the `traced_*!` macros when no tracer is passed explicitly.
//!
//! It is created on first use with a text sink on stdout and lives for the
//! rest of the thread.

use crate::guard::FrameGuard;
use crate::sink::{LogSink, Output, TextLines};
use crate::tracer::Tracer;
use std::cell::Cell;
use std::path::Path;

pub type LocalTracer = Tracer<Box<dyn LogSink>>;
pub type LocalFrameGuard = FrameGuard<'static, Box<dyn LogSink>>;

thread_local! {
    static TRACER: Cell<Option<&'static LocalTracer>> = const { Cell::new(None) };
}

/// The calling thread's tracer.
pub fn tracer() -> &'static LocalTracer {
    TRACER.with(|slot| {
        if let Some(tracer) = slot.get() {
            return tracer;
        }
        let sink: Box<dyn LogSink> = Box::new(TextLines::new(Output::stdout()));
        let tracer: &'static LocalTracer = Box::leak(Box::new(Tracer::new(sink)));
        slot.set(Some(tracer));
        tracer
    })
}

/// Sends this thread's trace to `sink`, returning the previous sink.
pub fn redirect(sink: impl LogSink + 'static) -> Box<dyn LogSink> {
    tracer().replace_sink(Box::new(sink))
}

/// Sends this thread's trace, as text, to a freshly truncated file.
pub fn redirect_to_file(path: impl AsRef<Path>) -> std::io::Result<()> {
    let output = Output::file(path)?;
    redirect(TextLines::new(output));
    Ok(())
}

pub fn enter(id: &'static str) -> LocalFrameGuard {
    tracer().enter(id)
}

#[doc(hidden)]
pub fn enter_main(id: &'static str, output: Option<&str>) -> LocalFrameGuard {
    if let Some(path) = output
        && let Err(err) = redirect_to_file(path)
    {
        panic!("memtrace: cannot open trace output {path}: {err}");
    }
    enter(id)
}
