mod cli;
mod commands;
mod observability;
mod output;
mod settings;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands, ConfigCommands};
use commands::App;
use output::print_error;
use settings::Settings;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    observability::init_tracing(level);

    if let Commands::Config(args) = &cli.command {
        return match args.command {
            ConfigCommands::Show => commands::maintenance::show_config(&settings),
        };
    }

    let app = App::open(settings).await?;
    match &cli.command {
        Commands::Init => commands::maintenance::init(&app).await?,
        Commands::Reap(args) => commands::maintenance::reap(&app, args.once).await?,
        Commands::Inspect(args) => commands::tokens::inspect(&app, args).await?,
        Commands::Revoke(args) => commands::tokens::revoke(&app, args).await?,
        Commands::Client(args) => commands::accounts::client(&app, &args.command).await?,
        Commands::User(args) => commands::accounts::user(&app, &args.command).await?,
        Commands::Config(_) => {}
    }
    Ok(())
}
