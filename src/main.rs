//! cycleflow CLI entry point.

use clap::Parser;

use cycleflow::cli::{commands, handle_error, App, Cli, Commands};
use cycleflow::domain::models::Config;
use cycleflow::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A missing or broken config surfaces from the command itself; logging
    // falls back to defaults so `init` works in an empty directory.
    let logging = App::load_config(cli.config.as_deref())
        .map(|c| c.logging)
        .unwrap_or_else(|_| Config::default().logging);
    let _logger = match LoggerImpl::init(&logging) {
        Ok(logger) => Some(logger),
        Err(e) => {
            eprintln!("warning: logging disabled: {e}");
            None
        }
    };

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
        Commands::Catalog(args) => commands::catalog::execute(args, config, cli.json).await,
        Commands::Workflow(args) => commands::workflow::execute(args, config, cli.json).await,
        Commands::Activity(args) => commands::activity::execute(args, config, cli.json).await,
        Commands::Signal(args) => commands::signal::execute(args, config, cli.json).await,
        Commands::Event(args) => commands::event::execute(args, config, cli.json).await,
        Commands::Actionable(args) => commands::actionable::execute(args, config, cli.json).await,
        Commands::Audit(args) => commands::audit::execute(args, config, cli.json).await,
        Commands::Sla(args) => commands::sla::execute(args, config, cli.json).await,
        Commands::Context(args) => commands::context::execute(args, config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
