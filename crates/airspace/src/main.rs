//! `airspace` - CLI for the airspace monitor
//!
//! Serves the display feed, runs one-off polls and inspects the contact
//! store.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::info;

use airspace_monitor::api::{self, AppState, SiteInfo};
use airspace_monitor::cli::{Cli, Command, ConfigCommand, ContactsCommand, PollCommand, ServeCommand};
use airspace_monitor::storage::{open_backend, ContactStore};
use airspace_monitor::{init_logging, Config, DisplayEntry, PollOrchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    match cli.command {
        Command::Serve(cmd) => handle_serve(&load_config(cli.config)?, cmd).await,
        Command::Poll(cmd) => handle_poll(&load_config(cli.config)?, &cmd).await,
        Command::Contacts(cmd) => handle_contacts(&load_config(cli.config)?, &cmd),
        Command::Prune => handle_prune(&load_config(cli.config)?),
        Command::Config(cmd) => handle_config(cli.config, cmd),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Config::load_from(path).context("failed to load configuration")
}

async fn handle_serve(config: &Config, cmd: ServeCommand) -> anyhow::Result<()> {
    let poller = Arc::new(PollOrchestrator::from_config(config)?);

    if let Some(secs) = cmd.poll_every.filter(|s| *s > 0) {
        let background = Arc::clone(&poller);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                background.poll_once().await;
            }
        });
        info!(every_secs = secs, "Background polling enabled");
    }

    let bind = cmd.bind.unwrap_or_else(|| config.server.bind.clone());
    let state = AppState::new(
        poller,
        SiteInfo::from_config(config),
        config.server.poll_secret.clone(),
    );
    api::serve(state, &bind).await?;
    Ok(())
}

async fn handle_poll(config: &Config, cmd: &PollCommand) -> anyhow::Result<()> {
    let poller = PollOrchestrator::from_config(config)?;
    let outcome = poller.poll_once().await;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!("{} ({:?})", config.display.title, outcome.source);
    println!();
    print_entries(&outcome.aircraft);
    if let Some(metrics) = outcome.metrics {
        println!();
        println!(
            "{} states, {} in radius, {} eligible, {} marked past, {} evicted",
            metrics.total_states,
            metrics.in_radius,
            metrics.eligible,
            metrics.marked_past,
            metrics.evicted
        );
    }
    Ok(())
}

fn print_entries(entries: &[DisplayEntry]) {
    if entries.is_empty() {
        println!("No aircraft.");
        return;
    }
    println!(
        "{:<6} {:<24} {:<8} {:<4} {:<12} {:>7} {:>6} {:>6}",
        "TIME", "CALLSIGN", "CODE", "DIR", "STATUS", "ALT", "SPD", "KM"
    );
    for entry in entries {
        println!(
            "{:<6} {:<24} {:<8} {:<4} {:<12} {:>7.0} {:>6.0} {:>6.1}",
            entry.time,
            entry.callsign,
            entry.code,
            entry.direction,
            entry.status,
            entry.altitude,
            entry.speed,
            entry.distance
        );
    }
}

fn open_store(config: &Config) -> anyhow::Result<ContactStore> {
    let path = config.storage_path();
    let backend = open_backend(config.storage.backend, path.clone())
        .with_context(|| format!("failed to open contact store at {}", path.display()))?;
    Ok(ContactStore::open(backend))
}

fn handle_contacts(config: &Config, cmd: &ContactsCommand) -> anyhow::Result<()> {
    let store = open_store(config)?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(store.records())?);
        return Ok(());
    }

    println!(
        "{} contacts in {} ({})",
        store.len(),
        config.storage_path().display(),
        store.backend_kind()
    );
    for (callsign, record) in store.records() {
        let direction = record
            .direction
            .map_or("-", |d| d.label(config.display.language));
        println!(
            "  {callsign:<8} {:<7} first {}  dir {direction}",
            record.status.to_string(),
            record.first_time.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

fn handle_prune(config: &Config) -> anyhow::Result<()> {
    let mut store = open_store(config)?;
    let evicted = store.prune(&config.retention_policy(), &BTreeSet::new(), Utc::now());
    if evicted.is_empty() {
        println!("Nothing to prune.");
    } else {
        println!("Evicted {}: {}", evicted.len(), evicted.join(", "));
    }
    Ok(())
}

fn handle_config(path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = load_config(path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Monitoring]");
                println!(
                    "  Center:             {:.4}, {:.4}",
                    config.monitoring.lat, config.monitoring.lon
                );
                println!("  Radius (km):        {}", config.monitoring.radius_km);
                println!(
                    "  Categories:         {:?}",
                    config.monitoring.category_allowlist
                );
                println!();
                println!("[Display]");
                println!("  Title:              {}", config.display.title);
                println!("  Max entries:        {}", config.display.max_display_count);
                println!("  Language:           {:?}", config.display.language);
                println!();
                println!("[Data]");
                println!(
                    "  Min poll interval:  {}s",
                    config.data.rate_limit_delay_seconds
                );
                println!("  Cache TTL:          {}s", config.data.cache_timeout_seconds);
                println!(
                    "  Past retention:     {} min",
                    config.data.past_retention_minutes
                );
                println!("  Max past records:   {}", config.data.max_past_records);
                println!();
                println!("[Storage]");
                println!("  Backend:            {}", config.storage.backend);
                println!("  Path:               {}", config.storage_path().display());
                println!();
                println!("[Upstream]");
                println!("  API:                {}", config.upstream.base_url);
                println!("  Credentials:        {}", config.has_credentials());
                println!("  Airline prefixes:   {}", config.airlines.len());
            }
        }
        ConfigCommand::Path => {
            println!(
                "{}",
                path.unwrap_or_else(Config::default_config_path).display()
            );
        }
        ConfigCommand::Validate { file } => {
            let target = file
                .or(path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", target.display());
            match Config::load_from(Some(target)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => anyhow::bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
