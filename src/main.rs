//! FlowShield - Main Entry Point

use clap::Parser;

mod cli;

use cli::{run_command, Cli};

#[tokio::main]
async fn main() {
    // .env first so clap's env fallbacks see it
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    if let Some(path) = &cli.env_file {
        if let Err(e) = dotenvy::from_path(path) {
            eprintln!("Error: cannot load {}: {}", path.display(), e);
            std::process::exit(2);
        }
    }

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    if let Err(e) = run_command(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
