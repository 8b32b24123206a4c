//! Nested traced functions: every line of the trace names the full call path.
//! Run with `cargo run --example nested_frames` and read `memtrace.out`.

#[memtrace::trace]
fn allocate_inner(size: usize) -> memtrace::Result<memtrace::Allocation> {
    memtrace::traced_alloc!(size)
}

#[memtrace::trace]
fn allocate_outer(inner_size: usize, outer_size: usize) -> memtrace::Result<()> {
    let outer = memtrace::traced_alloc!(outer_size)?;
    let inner = allocate_inner(inner_size)?;

    let grown = memtrace::traced_realloc!(inner.as_ptr(), inner_size * 2)?;

    memtrace::traced_free!(grown.as_ptr())?;
    memtrace::traced_free!(outer.as_ptr())?;
    Ok(())
}

#[memtrace::main(output = "memtrace.out")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Tracing nested allocations into memtrace.out");

    allocate_outer(500, 1000)?;

    println!("Live blocks left: {}", memtrace::local::tracer().live_count());
    Ok(())
}
