use crate::sink::LogSink;
use crate::tracer::Tracer;
use std::alloc::{GlobalAlloc, System};

/// Keeps a frame on the tracer's stack for as long as it is alive.
///
/// The frame is popped when the guard drops, whichever way the scope is left.
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct FrameGuard<'t, S: LogSink, A: GlobalAlloc = System> {
    tracer: &'t Tracer<S, A>,
    id: &'static str,
}

impl<'t, S: LogSink, A: GlobalAlloc> FrameGuard<'t, S, A> {
    #[inline]
    pub fn new(tracer: &'t Tracer<S, A>, id: &'static str) -> Self {
        tracer.push(id);
        Self { tracer, id }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }
}

impl<S: LogSink, A: GlobalAlloc> Drop for FrameGuard<'_, S, A> {
    #[inline]
    fn drop(&mut self) {
        match self.tracer.try_pop() {
            Ok(popped) => debug_assert_eq!(popped, self.id, "frame guards dropped out of order"),
            // Popping twice while unwinding would abort the process.
            Err(err) if !std::thread::panicking() => panic!("{err}"),
            Err(_) => {}
        }
    }
}
