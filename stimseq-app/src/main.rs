mod app;
mod cli;
mod devices;
mod logging;
mod session;

use clap::Parser;

use app::App;
use cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_format, cli.verbose);

    match cli.command {
        Command::Run(args) => App::new(args)?.run(),
        Command::Check(args) => app::check(&args),
    }
}
