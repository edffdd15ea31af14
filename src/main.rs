//! repath CLI - runs one endpoint of the multi-path control plane.

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

use repath::cli::*;
use repath::config::{init_logging, Config};
use repath::engine::{Endpoint, EngineEvent};
use repath::error::{Error, Result};
use repath::transport::UdpNic;
use repath::util::SystemClock;
use repath::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config if specified
    let mut config = if let Some(ref path) = cli.config {
        Config::load(path)?
    } else if Config::default_path().exists() {
        Config::load(Config::default_path())?
    } else {
        Config::default()
    };

    if let Some(level) = cli.log_level.clone() {
        config.logging.level = level;
    }
    if let Some(format) = cli.format {
        config.logging.format = format.as_str().into();
    }
    if cli.no_color {
        config.logging.color = false;
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Run(args) => run_endpoint(args, config).await,
        Commands::Config(args) => run_config(&args),
    }
}

/// Run one endpoint until Ctrl-C or the requested duration elapses.
async fn run_endpoint(args: RunArgs, mut config: Config) -> Result<()> {
    if let Some(role) = args.role {
        config.role = role;
    }
    if let Some(bind) = args.bind {
        config.nic.bind = bind;
    }
    if args.peer.is_some() {
        config.nic.peer = args.peer;
    }
    if let Some(path) = args.initial_path {
        config.engine.initial_path = path;
    }
    if let Some(interval) = args.probe_interval {
        config.engine.probe_interval = interval;
    }

    init_logging(&config.logging)?;
    print_banner(&config);

    let endpoint = Endpoint::new(config, Arc::new(SystemClock))?;
    let nic = UdpNic::bind(&endpoint.config().nic, endpoint.pool())?;
    println!(
        "  {} {}",
        "Listening on:".bright_white(),
        nic.local_addr()?.to_string().cyan()
    );
    println!();

    let mut events = endpoint.subscribe();
    let tasks = endpoint.spawn(nic);

    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    match args.duration {
        Some(limit) => {
            tokio::select! {
                _ = signal::ctrl_c() => {}
                _ = tokio::time::sleep(limit) => {}
            }
        }
        None => {
            let _ = signal::ctrl_c().await;
        }
    }

    println!();
    println!("{} Shutting down...", "→".cyan());
    endpoint.stop();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "endpoint loop ended abnormally");
        }
    }
    reporter.abort();

    let stats = endpoint.stats().snapshot();
    let active = endpoint.active_path().snapshot();
    println!("{} {}", "Final:".bright_white().bold(), stats);
    println!(
        "  {} {} ({} switches)",
        "Active path:".bright_white(),
        active.path.to_string().bright_green(),
        active.switches
    );

    Ok(())
}

fn print_banner(config: &Config) {
    println!(
        "{}",
        "╔══════════════════════════════════════════╗".bright_cyan()
    );
    println!(
        "{}",
        format!("║     REPATH {:<8}                      ║", config.role.to_string().to_uppercase())
            .bright_cyan()
    );
    println!(
        "{}",
        format!("║     Version {VERSION:<8}                     ║").bright_cyan()
    );
    println!(
        "{}",
        "╚══════════════════════════════════════════╝".bright_cyan()
    );
    println!();
    println!(
        "  {} {}",
        "Initial path:".bright_white(),
        config.engine.initial_path
    );
    println!(
        "  {} {}",
        "Control port:".bright_white(),
        config.envelope.control_port
    );
    println!(
        "  {} {}-{}",
        "Path ports:".bright_white(),
        config.envelope.base_port,
        config.envelope.last_path_port()
    );
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::BestPathChanged { from, to } => {
            println!("{} best path {} → {}", "•".cyan(), from, to);
        }
        EngineEvent::NegotiationStarted { target, sequence } => {
            println!(
                "{} proposing path {} (seq {})",
                "→".yellow(),
                target,
                sequence
            );
        }
        EngineEvent::PathSwitched { from, to, cause } => {
            println!(
                "{} switched {} → {} ({:?})",
                "✓".green(),
                from,
                to.to_string().bright_green(),
                cause
            );
        }
        EngineEvent::NegotiationAbandoned { target, attempts } => {
            println!(
                "{} gave up on path {} after {} attempts",
                "⚠".yellow(),
                target,
                attempts
            );
        }
    }
}

fn run_config(args: &ConfigArgs) -> Result<()> {
    let receiver = Config::example();
    let config = if args.sender {
        receiver.mirrored(repath::Role::Sender)
    } else {
        receiver
    };

    let output =
        toml::to_string_pretty(&config).map_err(|e| Error::Config(e.to_string()))?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &output)?;
        println!(
            "{} Configuration written to {}",
            "✓".green(),
            path.display()
        );
    } else {
        println!("{output}");
    }

    Ok(())
}
