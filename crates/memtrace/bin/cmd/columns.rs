use super::TraceArgs;
use clap::Args;
use eyre::Result;
use memtrace::{TraceError, local, traced_alloc, traced_free, traced_realloc};
use std::io::{self, Write};
use std::mem::size_of;
use std::ptr::NonNull;

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    #[arg(long, default_value_t = 4, help = "Number of rows in the grid")]
    rows: usize,

    #[arg(long, default_value_t = 4, help = "Columns to grow every row to")]
    columns: usize,

    #[command(flatten)]
    trace: TraceArgs,
}

impl ColumnsArgs {
    pub fn run(&self) -> Result<()> {
        self.trace.install()?;
        let _main = local::enter("main");

        let mut grid = Grid::new(self.rows)?;
        while grid.columns() < self.columns {
            grid.add_column()?;
        }

        let stdout = io::stdout();
        grid.write_all(&mut stdout.lock())?;
        grid.free()
    }
}

/// Rows of cells, each row its own traced block, widened one column at a
/// time with a traced reallocate per row.
pub struct Grid {
    rows: Vec<NonNull<u8>>,
    columns: usize,
}

impl Grid {
    /// Allocates `rows` single-column rows holding `10 * row`.
    pub fn new(rows: usize) -> Result<Self> {
        let mut grid = Self {
            rows: Vec::with_capacity(rows),
            columns: 1,
        };
        for row in 0..rows {
            let block = traced_alloc!(row_bytes(1)?)?;
            grid.rows.push(block.as_ptr());
            // SAFETY: the row was just allocated with room for one cell.
            unsafe { grid.cell_ptr(row, 0).write(cell_value(row, 0)) };
        }
        Ok(grid)
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Grows every row by one cell holding `10 * row + column`.
    /// Returns the new column count.
    #[memtrace::trace]
    pub fn add_column(&mut self) -> Result<usize> {
        let column = self.columns;
        let bytes = row_bytes(column + 1)?;
        for row in 0..self.rows.len() {
            self.rows[row] = traced_realloc!(self.rows[row], bytes)?.as_ptr();
            // SAFETY: the row now holds `column + 1` cells.
            unsafe { self.cell_ptr(row, column).write(cell_value(row, column)) };
        }
        self.columns += 1;
        Ok(self.columns)
    }

    pub fn get(&self, row: usize, column: usize) -> usize {
        assert!(row < self.rows.len() && column < self.columns, "cell out of range");
        // SAFETY: every cell below `columns` was written by `new` or `add_column`.
        unsafe { self.cell_ptr(row, column).read() }
    }

    pub fn write_all(&self, out: &mut impl Write) -> Result<()> {
        for row in 0..self.rows.len() {
            let cells: Vec<String> = (0..self.columns)
                .map(|column| self.get(row, column).to_string())
                .collect();
            writeln!(out, "row[{row}] = {}", cells.join(" "))?;
        }
        Ok(())
    }

    #[memtrace::trace("free_grid")]
    pub fn free(self) -> Result<()> {
        for row in self.rows {
            traced_free!(row)?;
        }
        Ok(())
    }

    fn cell_ptr(&self, row: usize, column: usize) -> *mut usize {
        // SAFETY: callers keep `column` within the row's allocated cells.
        unsafe { self.rows[row].cast::<usize>().as_ptr().add(column) }
    }
}

fn row_bytes(columns: usize) -> std::result::Result<usize, TraceError> {
    columns
        .checked_mul(size_of::<usize>())
        .ok_or(TraceError::OutOfMemory { size: usize::MAX })
}

fn cell_value(row: usize, column: usize) -> usize {
    10 * row + column
}
