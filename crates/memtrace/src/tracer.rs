use crate::config::TraceConfig;
use crate::error::{Result, TraceError};
use crate::guard::FrameGuard;
use crate::record::{LogLine, Operation};
use crate::sink::LogSink;
use crate::stack::CallStack;
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::io;
use std::ptr::NonNull;

/// Alignment of every traced block, the same guarantee `malloc` gives.
pub const BLOCK_ALIGN: usize = 16;

/// A live block handed out by [`Tracer::traced_allocate`] or
/// [`Tracer::traced_reallocate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    ptr: NonNull<u8>,
    size: usize,
}

impl Allocation {
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn addr(&self) -> usize {
        self.ptr.as_ptr().addr()
    }

    /// Size requested by the caller. The underlying block may be larger.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Call-path aware allocation logger.
///
/// Owns a frame stack and a log sink, and wraps an allocator. Every traced
/// operation writes exactly one [`LogLine`] to the sink. The state sits behind
/// `RefCell`, so a tracer belongs to one thread. Use one tracer per thread or
/// the per-thread instance in [`crate::local`].
pub struct Tracer<S: LogSink, A: GlobalAlloc = System> {
    config: TraceConfig,
    stack: RefCell<CallStack>,
    sink: RefCell<S>,
    live: RefCell<HashMap<usize, (NonNull<u8>, Layout)>>,
    allocator: A,
}

impl<S: LogSink> Tracer<S> {
    pub fn new(sink: S) -> Self {
        Self::with_config(sink, TraceConfig::default())
    }

    pub fn with_config(sink: S, config: TraceConfig) -> Self {
        Self::with_allocator(sink, config, System)
    }
}

impl<S: LogSink, A: GlobalAlloc> Tracer<S, A> {
    pub fn with_allocator(sink: S, config: TraceConfig, allocator: A) -> Self {
        Self {
            stack: RefCell::new(CallStack::new(config.root_label)),
            config,
            sink: RefCell::new(sink),
            live: RefCell::new(HashMap::new()),
            allocator,
        }
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn push(&self, id: &'static str) {
        let mut stack = self.stack.borrow_mut();
        stack.push(id);
        tracing::trace!(frame = id, depth = stack.depth(), "push frame");
    }

    pub fn try_pop(&self) -> Result<&'static str> {
        let mut stack = self.stack.borrow_mut();
        let id = stack.try_pop()?;
        tracing::trace!(frame = id, depth = stack.depth(), "pop frame");
        Ok(id)
    }

    /// Pops the most recent frame.
    ///
    /// # Panics
    ///
    /// On underflow: more pops than pushes is a bug in the traced program.
    pub fn pop(&self) -> &'static str {
        match self.try_pop() {
            Ok(id) => id,
            Err(err) => panic!("{err}"),
        }
    }

    /// Pushes `id` and returns a guard that pops it when dropped.
    pub fn enter(&self, id: &'static str) -> FrameGuard<'_, S, A> {
        FrameGuard::new(self, id)
    }

    /// Current call path, for example `helper:main:global`.
    pub fn render(&self) -> String {
        self.stack.borrow().render(&self.config)
    }

    pub fn depth(&self) -> usize {
        self.stack.borrow().depth()
    }

    pub fn sink(&self) -> Ref<'_, S> {
        self.sink.borrow()
    }

    pub fn sink_mut(&self) -> RefMut<'_, S> {
        self.sink.borrow_mut()
    }

    pub fn replace_sink(&self, sink: S) -> S {
        tracing::debug!("replacing log sink");
        self.sink.replace(sink)
    }

    /// Number of blocks allocated and not yet released.
    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    /// Allocates `size` bytes and logs an `allocated` line.
    ///
    /// The address only exists once the allocator has run, so the line is
    /// written between the allocation and the return. On failure the line
    /// shows address `0x0` and [`TraceError::OutOfMemory`] is returned.
    pub fn traced_allocate(&self, size: usize, file: &'static str, line: u32) -> Result<Allocation> {
        let block = block_layout(size).and_then(|layout| {
            // SAFETY: block_layout never produces a zero-sized layout.
            let raw = unsafe { self.allocator.alloc(layout) };
            NonNull::new(raw).map(|ptr| (ptr, layout))
        });
        let address = block.map_or(0, |(ptr, _)| ptr.as_ptr().addr());

        if let Err(err) = self.emit(file, line, address, Operation::Allocated { size }) {
            if let Some((ptr, layout)) = block {
                // SAFETY: the block was just allocated with this layout and never handed out.
                unsafe { self.allocator.dealloc(ptr.as_ptr(), layout) };
            }
            return Err(err.into());
        }

        let (ptr, layout) = block.ok_or(TraceError::OutOfMemory { size })?;
        self.live.borrow_mut().insert(address, (ptr, layout));
        Ok(Allocation { ptr, size })
    }

    /// Logs a `reallocated` line naming the current address, then resizes.
    ///
    /// The returned block may live at a new address. If the allocator fails
    /// the old block is untouched and stays live.
    pub fn traced_reallocate(
        &self,
        address: NonNull<u8>,
        new_size: usize,
        file: &'static str,
        line: u32,
    ) -> Result<Allocation> {
        let old = address.as_ptr().addr();
        self.emit(file, line, old, Operation::Reallocated { new_size })?;

        let (ptr, layout) = self.lookup(old)?;
        let new_layout = block_layout(new_size).ok_or(TraceError::OutOfMemory { size: new_size })?;

        // SAFETY: `ptr` came from this allocator with `layout` and is still live;
        // the new size is non-zero and was validated by `block_layout`.
        let raw = unsafe { self.allocator.realloc(ptr.as_ptr(), layout, new_layout.size()) };
        let new_ptr = NonNull::new(raw).ok_or(TraceError::OutOfMemory { size: new_size })?;

        let mut live = self.live.borrow_mut();
        live.remove(&old);
        live.insert(new_ptr.as_ptr().addr(), (new_ptr, new_layout));

        Ok(Allocation {
            ptr: new_ptr,
            size: new_size,
        })
    }

    /// Logs a `deallocated` line, then releases the block.
    pub fn traced_release(&self, address: NonNull<u8>, file: &'static str, line: u32) -> Result<()> {
        let addr = address.as_ptr().addr();
        self.emit(file, line, addr, Operation::Deallocated)?;

        let (ptr, layout) = self.lookup(addr)?;
        self.live.borrow_mut().remove(&addr);

        // SAFETY: `ptr` came from this allocator with `layout` and was live until now.
        unsafe { self.allocator.dealloc(ptr.as_ptr(), layout) };
        Ok(())
    }

    fn lookup(&self, address: usize) -> Result<(NonNull<u8>, Layout)> {
        self.live
            .borrow()
            .get(&address)
            .copied()
            .ok_or(TraceError::UnknownAddress { address })
    }

    fn emit(&self, file: &'static str, line: u32, address: usize, op: Operation) -> io::Result<()> {
        let record = LogLine {
            file,
            line,
            path: self.render(),
            address,
            op,
        };
        self.sink.borrow_mut().record(&record)
    }
}

impl<S: LogSink, A: GlobalAlloc> Drop for Tracer<S, A> {
    fn drop(&mut self) {
        let live = self.live.get_mut();
        if live.is_empty() {
            return;
        }

        tracing::warn!(
            blocks = live.len(),
            "releasing blocks still live when the tracer was dropped"
        );
        for (_, (ptr, layout)) in live.drain() {
            // SAFETY: every entry is a live block from this allocator with its layout.
            unsafe { self.allocator.dealloc(ptr.as_ptr(), layout) };
        }
    }
}

fn block_layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size.max(1), BLOCK_ALIGN).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySink, TextLines};
    use std::cell::Cell;
    use std::rc::Rc;

    fn tracer() -> Tracer<MemorySink> {
        Tracer::new(MemorySink::new())
    }

    struct Exhausted;

    unsafe impl GlobalAlloc for Exhausted {
        unsafe fn alloc(&self, _layout: Layout) -> *mut u8 {
            std::ptr::null_mut()
        }

        unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {}
    }

    /// Counts releases and reallocations so sinks can observe whether the
    /// allocator already ran.
    #[derive(Default)]
    struct CountingSystem {
        released: Rc<Cell<usize>>,
        reallocated: Rc<Cell<usize>>,
    }

    unsafe impl GlobalAlloc for CountingSystem {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            unsafe { System.alloc(layout) }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            self.released.set(self.released.get() + 1);
            unsafe { System.dealloc(ptr, layout) }
        }

        unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
            self.reallocated.set(self.reallocated.get() + 1);
            unsafe { System.realloc(ptr, layout, new_size) }
        }
    }

    /// Records the value of `counter` at the moment each line is written.
    struct ObservingSink {
        counter: Rc<Cell<usize>>,
        seen: Vec<usize>,
    }

    impl LogSink for ObservingSink {
        fn record(&mut self, _line: &LogLine) -> io::Result<()> {
            self.seen.push(self.counter.get());
            Ok(())
        }
    }

    /// Accepts `accepted` lines, then fails every write.
    struct BrokenSink {
        accepted: usize,
    }

    impl LogSink for BrokenSink {
        fn record(&mut self, _line: &LogLine) -> io::Result<()> {
            match self.accepted.checked_sub(1) {
                Some(left) => {
                    self.accepted = left;
                    Ok(())
                }
                None => Err(io::Error::other("disk full")),
            }
        }
    }

    #[test]
    fn test_allocate_then_release_logs_same_address() {
        let tracer = tracer();
        let block = tracer.traced_allocate(64, "x.c", 10).unwrap();
        tracer.traced_release(block.as_ptr(), "x.c", 11).unwrap();

        let sink = tracer.sink();
        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].op, Operation::Allocated { size: 64 });
        assert_eq!(lines[0].address, block.addr());
        assert_eq!(lines[1].op, Operation::Deallocated);
        assert_eq!(lines[1].address, block.addr());
        assert_eq!((lines[1].file, lines[1].line), ("x.c", 11));
        assert_eq!(tracer.live_count(), 0);
    }

    #[test]
    fn test_reallocate_logs_previous_address() {
        let tracer = tracer();
        let block = tracer.traced_allocate(8, "x.c", 1).unwrap();
        let grown = tracer
            .traced_reallocate(block.as_ptr(), 4096, "x.c", 2)
            .unwrap();

        {
            let sink = tracer.sink();
            let realloc = &sink.lines()[1];
            assert_eq!(realloc.address, block.addr());
            assert_eq!(realloc.op, Operation::Reallocated { new_size: 4096 });
        }
        assert_eq!(grown.size(), 4096);
        assert_eq!(tracer.live_count(), 1);

        tracer.traced_release(grown.as_ptr(), "x.c", 3).unwrap();
        assert_eq!(tracer.sink().lines()[2].address, grown.addr());
    }

    #[test]
    fn test_reallocate_preserves_contents() {
        let tracer = tracer();
        let block = tracer.traced_allocate(4, "x.c", 1).unwrap();
        unsafe {
            block
                .as_ptr()
                .as_ptr()
                .copy_from_nonoverlapping(b"abcd".as_ptr(), 4)
        };

        let grown = tracer
            .traced_reallocate(block.as_ptr(), 1024, "x.c", 2)
            .unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(grown.as_ptr().as_ptr(), 4) };
        assert_eq!(bytes, b"abcd");

        tracer.traced_release(grown.as_ptr(), "x.c", 3).unwrap();
    }

    #[test]
    fn test_nested_frames_end_to_end() {
        let tracer = tracer();
        tracer.push("main");
        tracer.push("helper");
        let first = tracer.traced_allocate(16, "a.c", 5).unwrap();
        tracer.pop();
        let second = tracer.traced_allocate(16, "a.c", 7).unwrap();

        {
            let sink = tracer.sink();
            assert_eq!(sink.lines()[0].path, "helper:main:global");
            assert_eq!(sink.lines()[1].path, "main:global");
            assert_eq!(
                sink.lines()[0].to_string(),
                format!(
                    "File a.c, line 5, function helper:main:global allocated new memory segment at address {:#x} to of size 16",
                    first.addr()
                )
            );
        }

        tracer.traced_release(first.as_ptr(), "a.c", 8).unwrap();
        tracer.traced_release(second.as_ptr(), "a.c", 9).unwrap();
        tracer.pop();
        assert_eq!(tracer.render(), "global");
    }

    #[test]
    fn test_untraced_scope_logs_global() {
        let tracer = tracer();
        let block = tracer.traced_allocate(1, "x.c", 1).unwrap();
        assert_eq!(tracer.sink().lines()[0].path, "global");
        tracer.traced_release(block.as_ptr(), "x.c", 2).unwrap();
    }

    #[test]
    #[should_panic(expected = "frame stack underflow")]
    fn test_pop_on_empty_stack_panics() {
        tracer().pop();
    }

    #[test]
    fn test_try_pop_on_empty_stack_errors() {
        let tracer = tracer();
        assert!(matches!(tracer.try_pop(), Err(TraceError::StackUnderflow)));
        assert_eq!(tracer.render(), "global");
    }

    #[test]
    fn test_failed_allocation_is_logged_and_returned() {
        let tracer = Tracer::with_allocator(MemorySink::new(), TraceConfig::default(), Exhausted);
        let result = tracer.traced_allocate(64, "x.c", 10);

        assert!(matches!(result, Err(TraceError::OutOfMemory { size: 64 })));
        let sink = tracer.sink();
        assert_eq!(sink.lines().len(), 1);
        assert_eq!(sink.lines()[0].address, 0);
        assert!(sink.lines()[0].to_string().contains("address 0x0 to of size 64"));
    }

    #[test]
    fn test_oversized_request_fails_without_allocating() {
        let tracer = tracer();
        let result = tracer.traced_allocate(usize::MAX, "x.c", 1);

        assert!(matches!(result, Err(TraceError::OutOfMemory { .. })));
        assert_eq!(tracer.sink().lines()[0].address, 0);
        assert_eq!(tracer.live_count(), 0);
    }

    #[test]
    fn test_failed_reallocation_keeps_old_block() {
        let tracer = tracer();
        let block = tracer.traced_allocate(8, "x.c", 1).unwrap();
        let result = tracer.traced_reallocate(block.as_ptr(), usize::MAX, "x.c", 2);

        assert!(matches!(result, Err(TraceError::OutOfMemory { .. })));
        assert_eq!(tracer.sink().lines().len(), 2);
        assert_eq!(tracer.live_count(), 1);
        tracer.traced_release(block.as_ptr(), "x.c", 3).unwrap();
    }

    #[test]
    fn test_zero_sized_allocation() {
        let tracer = tracer();
        let block = tracer.traced_allocate(0, "x.c", 1).unwrap();

        assert_eq!(block.size(), 0);
        assert_eq!(tracer.sink().lines()[0].op, Operation::Allocated { size: 0 });
        tracer.traced_release(block.as_ptr(), "x.c", 2).unwrap();
    }

    #[test]
    fn test_release_unknown_address_is_logged_then_rejected() {
        let tracer = tracer();
        let bogus = NonNull::<u8>::dangling();
        let result = tracer.traced_release(bogus, "x.c", 1);

        assert!(matches!(result, Err(TraceError::UnknownAddress { .. })));
        assert_eq!(tracer.sink().lines()[0].op, Operation::Deallocated);
    }

    #[test]
    fn test_double_release_is_rejected() {
        let tracer = tracer();
        let block = tracer.traced_allocate(8, "x.c", 1).unwrap();
        tracer.traced_release(block.as_ptr(), "x.c", 2).unwrap();

        let result = tracer.traced_release(block.as_ptr(), "x.c", 3);
        assert!(matches!(result, Err(TraceError::UnknownAddress { address }) if address == block.addr()));
    }

    #[test]
    fn test_release_is_logged_before_memory_is_freed() {
        let allocator = CountingSystem::default();
        let released = Rc::clone(&allocator.released);
        let tracer = Tracer::with_allocator(
            ObservingSink {
                counter: Rc::clone(&released),
                seen: Vec::new(),
            },
            TraceConfig::default(),
            allocator,
        );

        let block = tracer.traced_allocate(32, "x.c", 1).unwrap();
        tracer.traced_release(block.as_ptr(), "x.c", 2).unwrap();

        assert_eq!(tracer.sink().seen, vec![0, 0]);
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_sink_failure_discards_fresh_block() {
        let tracer = Tracer::new(BrokenSink { accepted: 0 });
        let result = tracer.traced_allocate(8, "x.c", 1);
        assert!(matches!(result, Err(TraceError::Sink(_))));
        assert_eq!(tracer.live_count(), 0);
    }

    #[test]
    fn test_sink_failure_skips_reallocation() {
        let allocator = CountingSystem::default();
        let reallocated = Rc::clone(&allocator.reallocated);
        let tracer =
            Tracer::with_allocator(BrokenSink { accepted: 1 }, TraceConfig::default(), allocator);

        let block = tracer.traced_allocate(8, "x.c", 1).unwrap();
        let result = tracer.traced_reallocate(block.as_ptr(), 64, "x.c", 2);

        assert!(matches!(result, Err(TraceError::Sink(_))));
        assert_eq!(reallocated.get(), 0);
        assert_eq!(tracer.live_count(), 1);
    }

    #[test]
    fn test_sink_failure_skips_release() {
        let allocator = CountingSystem::default();
        let released = Rc::clone(&allocator.released);
        let tracer =
            Tracer::with_allocator(BrokenSink { accepted: 1 }, TraceConfig::default(), allocator);

        let block = tracer.traced_allocate(8, "x.c", 1).unwrap();
        let result = tracer.traced_release(block.as_ptr(), "x.c", 2);

        assert!(matches!(result, Err(TraceError::Sink(_))));
        assert_eq!(released.get(), 0);
        assert_eq!(tracer.live_count(), 1);

        drop(tracer);
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_reallocate_unknown_address_is_logged_then_rejected() {
        let allocator = CountingSystem::default();
        let reallocated = Rc::clone(&allocator.reallocated);
        let tracer = Tracer::with_allocator(MemorySink::new(), TraceConfig::default(), allocator);

        let bogus = NonNull::<u8>::dangling();
        let result = tracer.traced_reallocate(bogus, 32, "x.c", 1);

        assert!(
            matches!(result, Err(TraceError::UnknownAddress { address }) if address == bogus.as_ptr().addr())
        );
        assert_eq!(tracer.sink().lines()[0].op, Operation::Reallocated { new_size: 32 });
        assert_eq!(reallocated.get(), 0);
        assert_eq!(tracer.live_count(), 0);
    }

    #[test]
    fn test_reallocate_is_logged_before_resizing() {
        let allocator = CountingSystem::default();
        let reallocated = Rc::clone(&allocator.reallocated);
        let tracer = Tracer::with_allocator(
            ObservingSink {
                counter: Rc::clone(&reallocated),
                seen: Vec::new(),
            },
            TraceConfig::default(),
            allocator,
        );

        let block = tracer.traced_allocate(8, "x.c", 1).unwrap();
        let grown = tracer.traced_reallocate(block.as_ptr(), 512, "x.c", 2).unwrap();
        tracer.traced_release(grown.as_ptr(), "x.c", 3).unwrap();

        assert_eq!(tracer.sink().seen, vec![0, 0, 1]);
        assert_eq!(reallocated.get(), 1);
    }

    #[test]
    fn test_logged_path_respects_char_limit() {
        let tracer = Tracer::with_config(MemorySink::new(), TraceConfig::default().max_chars(12));
        tracer.push("main");
        tracer.push("parse_input");
        let block = tracer.traced_allocate(4, "x.c", 1).unwrap();
        tracer.push("a_frame_name_longer_than_the_limit");
        tracer.traced_release(block.as_ptr(), "x.c", 2).unwrap();

        let sink = tracer.sink();
        assert_eq!(sink.lines()[0].path, "parse_input");
        assert_eq!(sink.lines()[1].path, "a_frame_nam");
        assert!(sink.lines().iter().all(|line| line.path.len() < 12));
    }

    #[test]
    fn test_drop_releases_outstanding_blocks() {
        let allocator = CountingSystem::default();
        let released = Rc::clone(&allocator.released);
        let tracer = Tracer::with_allocator(MemorySink::new(), TraceConfig::default(), allocator);
        tracer.traced_allocate(8, "x.c", 1).unwrap();
        tracer.traced_allocate(8, "x.c", 2).unwrap();

        drop(tracer);
        assert_eq!(released.get(), 2);
    }

    #[test]
    fn test_text_sink_output() {
        let tracer = Tracer::new(TextLines::new(Vec::<u8>::new()));
        let _main = tracer.enter("main");
        let block = tracer.traced_allocate(10, "mem_tracer.rs", 42).unwrap();
        tracer.traced_release(block.as_ptr(), "mem_tracer.rs", 43).unwrap();

        let text = String::from_utf8(tracer.sink().get_ref().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                format!(
                    "File mem_tracer.rs, line 42, function main:global allocated new memory segment at address {:#x} to of size 10",
                    block.addr()
                ),
                format!(
                    "File mem_tracer.rs, line 43, function main:global deallocated the memory segment at address {:#x}",
                    block.addr()
                ),
            ]
        );
    }
}
