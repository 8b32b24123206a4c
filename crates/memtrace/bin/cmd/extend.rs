use super::TraceArgs;
use super::lines::{LineTable, StringStack};
use clap::Args;
use eyre::Result;
use memtrace::local;
use std::io::{self, BufRead, Write};

/// Slots added to the table every time it fills up.
pub const GROWTH: usize = 10;

#[derive(Debug, Args)]
pub struct ExtendArgs {
    #[command(flatten)]
    trace: TraceArgs,
}

impl ExtendArgs {
    pub fn run(&self) -> Result<()> {
        self.trace.install()?;
        let _main = local::enter("main");

        let stdin = io::stdin();
        let stdout = io::stdout();
        make_extend_array(stdin.lock(), &mut stdout.lock())
    }
}

/// Stores every input line in a table that grows by [`GROWTH`] slots, keeps
/// a stack of their indices, prints them back and frees everything.
#[memtrace::trace]
pub fn make_extend_array(input: impl BufRead, out: &mut impl Write) -> Result<()> {
    let mut table = LineTable::with_capacity(GROWTH)?;
    let mut stack = StringStack::new();

    for line in input.lines() {
        let line = line?;
        let index = table.push(&line)?;
        stack.push_string(index)?;

        if table.is_full() {
            table.grow_to(table.capacity() + GROWTH)?;
        }
    }
    tracing::debug!(lines = table.len(), capacity = table.capacity(), "input consumed");

    stack.print_strings(&table, out)?;
    stack.free()?;
    table.free_strings()?;
    table.release()?;
    Ok(())
}
