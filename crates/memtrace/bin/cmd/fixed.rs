use super::TraceArgs;
use super::lines::LineTable;
use clap::Args;
use eyre::Result;
use memtrace::local;
use std::io::{self, BufRead, Write};

pub const ROWS: usize = 10;

#[derive(Debug, Args)]
pub struct FixedArgs {
    #[command(flatten)]
    trace: TraceArgs,
}

impl FixedArgs {
    pub fn run(&self) -> Result<()> {
        self.trace.install()?;
        let _main = local::enter("main");

        let stdin = io::stdin();
        let stdout = io::stdout();
        read_fixed_rows(stdin.lock(), &mut stdout.lock())
    }
}

/// Reads up to [`ROWS`] lines, doubles the table, reads up to [`ROWS`] more,
/// prints everything and frees it. Stops reading early at end of input.
#[memtrace::trace]
pub fn read_fixed_rows(input: impl BufRead, out: &mut impl Write) -> Result<()> {
    let mut lines = input.lines();
    let mut table = LineTable::with_capacity(ROWS)?;

    fill(&mut table, &mut lines)?;
    table.grow_to(2 * ROWS)?;
    fill(&mut table, &mut lines)?;

    table.write_all(out)?;
    table.free_strings()?;
    table.release()?;
    Ok(())
}

fn fill(table: &mut LineTable, lines: &mut impl Iterator<Item = io::Result<String>>) -> Result<()> {
    while !table.is_full() {
        let Some(line) = lines.next() else {
            break;
        };
        table.push(&line?)?;
    }
    Ok(())
}
