mod listener;
mod logging;
mod message;
mod metrics;
mod smoke;
mod storage;
mod stream;
mod web;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use crate::web::Config;

#[derive(Parser)]
#[command(name = "abort-stream")]
#[command(about = "Relays check abort notifications to connected agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stream server
    Serve { config: String },
    /// Validate a configuration file
    Validate { config: String },
    /// Abort a throwaway check on a running server and follow it end to end
    SmokeTest { config: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => serve(&config).await,
        Commands::Validate { config } => validate(&config),
        Commands::SmokeTest { config } => smoke_test(&config).await,
    }
}

fn load_config(path: &str) -> Option<Config> {
    match Config::from_file(path) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("Cannot load configuration file {}: {}", path, e);
            None
        }
    }
}

async fn serve(path: &str) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };

    if let Err(e) = logging::init(&config.log) {
        eprintln!("Cannot initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    log::info!("Starting abort stream");

    match web::run_server(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Server stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn validate(path: &str) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };

    println!("Configuration is valid");
    println!("  bind:           {}", config.web.bind);
    println!("  store ttl:      {}", humantime::format_duration(config.store.ttl));
    println!(
        "  refresh period: {}",
        humantime::format_duration(config.store.refresh_period)
    );
    println!(
        "  ping interval:  {}",
        humantime::format_duration(config.stream.ping_interval)
    );
    match &config.listener {
        Some(listener) => println!("  listener:       channel {}", listener.channel),
        None => println!("  listener:       disabled"),
    }
    ExitCode::SUCCESS
}

async fn smoke_test(path: &str) -> ExitCode {
    let Some(config) = load_config(path) else {
        return ExitCode::FAILURE;
    };

    if let Err(e) = logging::init(&config.log) {
        eprintln!("Cannot initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match smoke::run(&config).await {
        Ok(()) => {
            println!("Smoke test passed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Smoke test failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
