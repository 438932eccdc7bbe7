use clap::Parser;
use tradeloop::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
