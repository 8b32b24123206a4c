use eyre::Result;
use memtrace::{Allocation, TraceError, traced_alloc, traced_free, traced_realloc};
use std::io::Write;
use std::mem::size_of;
use std::ptr::NonNull;

/// Location of one stored line.
#[derive(Clone, Copy)]
struct Slot {
    ptr: NonNull<u8>,
    len: usize,
}

/// Table of strings whose storage is allocated, grown and released by hand,
/// every step going through the thread's tracer.
pub struct LineTable {
    slots: Allocation,
    capacity: usize,
    len: usize,
}

impl LineTable {
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let slots = traced_alloc!(table_bytes(capacity)?)?;
        Ok(Self {
            slots,
            capacity,
            len: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Copies `line` into its own block and stores it in the next slot.
    pub fn push(&mut self, line: &str) -> Result<usize> {
        assert!(!self.is_full(), "line table is full, grow it first");

        let block = traced_alloc!(line.len())?;
        // SAFETY: the block holds at least `line.len()` bytes and is fresh.
        unsafe {
            block
                .as_ptr()
                .as_ptr()
                .copy_from_nonoverlapping(line.as_ptr(), line.len());
        }

        let index = self.len;
        // SAFETY: index < capacity, and the slot table is 16-byte aligned.
        unsafe {
            self.slot_ptr(index).write(Slot {
                ptr: block.as_ptr(),
                len: line.len(),
            });
        }
        self.len += 1;
        Ok(index)
    }

    /// Resizes the slot table to `capacity` slots through a traced reallocate.
    pub fn grow_to(&mut self, capacity: usize) -> Result<()> {
        debug_assert!(capacity >= self.len);
        self.slots = traced_realloc!(self.slots.as_ptr(), table_bytes(capacity)?)?;
        self.capacity = capacity;
        Ok(())
    }

    pub fn get(&self, index: usize) -> &str {
        assert!(index < self.len, "line {index} out of range");
        // SAFETY: slots below `len` were written by `push` and point at copies
        // of valid UTF-8 that stay allocated until `free_strings`.
        unsafe {
            let slot = self.slot_ptr(index).read();
            let bytes = std::slice::from_raw_parts(slot.ptr.as_ptr(), slot.len);
            std::str::from_utf8_unchecked(bytes)
        }
    }

    pub fn write_all(&self, out: &mut impl Write) -> Result<()> {
        for index in 0..self.len {
            writeln!(out, "{}", self.get(index))?;
        }
        Ok(())
    }

    #[memtrace::trace]
    pub fn free_strings(&mut self) -> Result<()> {
        while self.len > 0 {
            self.len -= 1;
            // SAFETY: the slot was written by `push`.
            let slot = unsafe { self.slot_ptr(self.len).read() };
            traced_free!(slot.ptr)?;
        }
        Ok(())
    }

    /// Releases the slot table. Strings must be freed first.
    pub fn release(self) -> Result<()> {
        debug_assert_eq!(self.len, 0);
        traced_free!(self.slots.as_ptr())?;
        Ok(())
    }

    fn slot_ptr(&self, index: usize) -> *mut Slot {
        debug_assert!(index < self.capacity);
        // SAFETY: callers keep `index` within the table.
        unsafe { self.slots.as_ptr().cast::<Slot>().as_ptr().add(index) }
    }
}

fn table_bytes(capacity: usize) -> std::result::Result<usize, TraceError> {
    capacity
        .checked_mul(size_of::<Slot>())
        .ok_or(TraceError::OutOfMemory { size: usize::MAX })
}

struct Node {
    index: usize,
    next: Option<NonNull<Node>>,
}

/// Linked stack of line indices, each node a traced block.
#[derive(Default)]
pub struct StringStack {
    top: Option<NonNull<Node>>,
}

impl StringStack {
    pub fn new() -> Self {
        Self::default()
    }

    #[memtrace::trace]
    pub fn push_string(&mut self, index: usize) -> Result<()> {
        let block = traced_alloc!(size_of::<Node>())?;
        let node = block.as_ptr().cast::<Node>();
        // SAFETY: the block is fresh, large enough and 16-byte aligned.
        unsafe {
            node.as_ptr().write(Node {
                index,
                next: self.top,
            });
        }
        self.top = Some(node);
        Ok(())
    }

    #[memtrace::trace]
    pub fn pop_string(&mut self) -> Result<Option<usize>> {
        let Some(node) = self.top else {
            return Ok(None);
        };
        // SAFETY: every node on the stack was written by `push_string`.
        let Node { index, next } = unsafe { node.as_ptr().read() };
        self.top = next;
        traced_free!(node.cast::<u8>())?;
        Ok(Some(index))
    }

    /// Prints the stored lines oldest first by recursing to the bottom.
    pub fn print_strings(&self, table: &LineTable, out: &mut impl Write) -> Result<()> {
        match self.top {
            Some(node) => print_strings(node, table, out),
            None => Ok(()),
        }
    }

    #[memtrace::trace("free_string_stack")]
    pub fn free(&mut self) -> Result<()> {
        while self.pop_string()?.is_some() {}
        Ok(())
    }
}

#[memtrace::trace]
fn print_strings(node: NonNull<Node>, table: &LineTable, out: &mut dyn Write) -> Result<()> {
    // SAFETY: nodes stay allocated until popped, which needs `&mut StringStack`.
    let Node { index, next } = unsafe { node.as_ptr().read() };
    if let Some(next) = next {
        print_strings(next, table, out)?;
    }
    writeln!(out, "array[{index}] = {}", table.get(index))?;
    Ok(())
}
