pub mod columns;
pub mod extend;
pub mod fixed;
pub mod lines;

use clap::Args;
use eyre::{Result, WrapErr};
use memtrace::{Format, JsonLines, Output, TextLines, local};
use std::path::PathBuf;

/// Where and how the allocation trace is written.
#[derive(Debug, Args)]
pub struct TraceArgs {
    #[arg(
        long,
        default_value = "memtrace.out",
        help = "Trace file, truncated on start; `-` writes to stdout"
    )]
    output: PathBuf,

    #[arg(long, value_enum, default_value_t = Format::Text, help = "Trace line encoding")]
    format: Format,
}

impl TraceArgs {
    /// Points this thread's tracer at the requested output.
    pub fn install(&self) -> Result<()> {
        let output = if self.output.as_os_str() == "-" {
            Output::stdout()
        } else {
            Output::file(&self.output)
                .wrap_err_with(|| format!("failed to open {}", self.output.display()))?
        };

        match self.format {
            Format::Text => {
                local::redirect(TextLines::new(output));
            }
            Format::Json => {
                local::redirect(JsonLines::new(output));
            }
        }

        tracing::debug!(output = %self.output.display(), format = ?self.format, "trace output ready");
        Ok(())
    }
}
