mod cmd;
use clap::{Parser, Subcommand};
use cmd::columns::ColumnsArgs;
use cmd::extend::ExtendArgs;
use cmd::fixed::FixedArgs;
use eyre::Result;
use tracing_subscriber::EnvFilter;

#[derive(Subcommand, Debug)]
pub enum MTSubcommand {
    #[command(
        about = "Read stdin into a table that grows by 10 slots, echo it back and free everything"
    )]
    Extend(ExtendArgs),

    #[command(about = "Read 10 lines, grow the table to 20, read 10 more, print and free")]
    Fixed(FixedArgs),

    #[command(about = "Grow every row of an integer grid one column at a time")]
    Columns(ColumnsArgs),
}

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "memtrace: run a demo program with every allocation, reallocation and
release logged together with the call path that made it"
)]
pub struct MTArgs {
    #[command(subcommand)]
    pub cmd: MTSubcommand,
}

fn main() -> Result<()> {
    // Diagnostics go to stderr so they never mix with the trace or the echoed lines.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let root_args = MTArgs::parse();

    match root_args.cmd {
        MTSubcommand::Extend(args) => {
            args.run()?;
        }
        MTSubcommand::Fixed(args) => {
            args.run()?;
        }
        MTSubcommand::Columns(args) => {
            args.run()?;
        }
    }

    Ok(())
}
