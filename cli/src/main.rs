// netlayer: command-line driver for the forwarding engine
//
// Replays JSON scenarios against a single node and prints what the engine
// transmitted, delivered and reported.

mod config;
mod scenario;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use netlayer_core::{CaptureHook, EngineOutput, NetfilterHook, StaticNetworkProtocol};
use scenario::{Event, Scenario};
use std::path::PathBuf;
use std::sync::Arc;

/// Notification re-submission rounds per event
const MAX_NOTIFICATION_ROUNDS: usize = 8;

#[derive(Parser)]
#[command(name = "netlayer")]
#[command(about = "Network-layer forwarding engine simulator", long_about = None)]
#[command(version)]
struct Cli {
    /// Debug logging (overrides the configured filter, not RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario file
    Simulate {
        scenario: PathBuf,
        /// Trace every hook stage
        #[arg(short, long)]
        capture: bool,
        /// Print final counters as JSON
        #[arg(long)]
        json: bool,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    /// Print every setting
    #[command(alias = "list")]
    Show,
    /// Restore defaults
    Reset,
    /// Print the config file location
    Path,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    let default_filter = if cli.verbose { "debug" } else { config.log_filter.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::Simulate { scenario, capture, json } => cmd_simulate(config, scenario, capture, json),
        Commands::Config { action } => cmd_config(config, action),
    }
}

fn cmd_simulate(config: config::Config, path: PathBuf, capture: bool, json: bool) -> Result<()> {
    let scenario = Scenario::load(&path)?;
    let mut engine = scenario.build_engine(&config.engine)?;

    let tap = Arc::new(CaptureHook::new());
    if capture || config.capture {
        let hook: Arc<dyn NetfilterHook> = tap.clone();
        engine.register_hook(0, hook)?;
    }

    let title = scenario.name.clone().unwrap_or_else(|| path.display().to_string());
    println!("{} {}", "Simulating".bold(), title.bright_cyan());
    println!(
        "  {} interfaces, forwarding {}",
        scenario.interfaces.len(),
        if scenario.forwarding { "on".green() } else { "off".yellow() }
    );
    println!();

    for (n, event) in scenario.events.iter().enumerate() {
        let now = event.at_ms();
        let result = match event {
            Event::Arrive { interface, datagram, .. } => {
                println!(
                    "{} t={}ms  {} > {} arrives on {}",
                    format!("[{}]", n + 1).dimmed(),
                    now,
                    datagram.src,
                    datagram.dest,
                    interface
                );
                engine.handle_packet_from_network(datagram.build(), *interface, now)
            }
            Event::Send { packet, .. } => {
                println!(
                    "{} t={}ms  send {} bytes to {}",
                    format!("[{}]", n + 1).dimmed(),
                    now,
                    packet.length,
                    packet.dest
                );
                engine.send_packet(packet.build(), now)
            }
        };
        if let Err(e) = result {
            println!("  {} {}", "✗".red(), e);
        }
        print_outputs(&mut engine);
        send_notifications(&mut engine, now);
    }

    println!();
    print_summary(&engine, json)?;

    if capture || config.capture {
        println!();
        println!("{}", "Hook trace".bold());
        for record in tap.records() {
            println!(
                "  {:<12} #{:<4} {} > {} ttl {} in {} out {}",
                record.stage.to_string().bright_cyan(),
                record.datagram.as_u64(),
                record.src,
                record.dest,
                record.ttl,
                record.in_interface.map_or_else(|| "-".to_string(), |i| i.to_string()),
                record.out_interface.map_or_else(|| "-".to_string(), |i| i.to_string()),
            );
        }
    }

    Ok(())
}

/// Feed queued ICMP notifications back through the engine as locally sent traffic
fn send_notifications(engine: &mut StaticNetworkProtocol, now: u64) {
    for _ in 0..MAX_NOTIFICATION_ROUNDS {
        let notifications = engine.reporter_mut().take_notifications();
        if notifications.is_empty() {
            return;
        }
        for packet in notifications {
            println!("  {} notification to {}", "↺".yellow(), packet.control.dest);
            if let Err(e) = engine.send_packet(packet, now) {
                println!("  {} {}", "✗".red(), e);
            }
            print_outputs(engine);
        }
    }
    let left = engine.reporter_mut().take_notifications().len();
    if left > 0 {
        tracing::warn!("Notification rounds exhausted, dropping {} more", left);
    }
}

fn print_outputs(engine: &mut StaticNetworkProtocol) {
    for output in engine.drain_outputs() {
        match output {
            EngineOutput::Transmit(t) => {
                let d = &t.datagram;
                let fragment = if d.is_fragment() {
                    format!(" frag@{}{}", d.fragment_offset, if d.more_fragments { "+" } else { "" })
                } else {
                    String::new()
                };
                println!(
                    "  {} {} via {}  {} > {} ttl {} len {}{}",
                    "→".green(),
                    t.interface,
                    t.next_hop,
                    d.src,
                    d.dest,
                    d.ttl,
                    d.byte_length(),
                    fragment
                );
            }
            EngineOutput::Deliver(d) => {
                println!(
                    "  {} deliver proto {} from {} on {} ({} bytes)",
                    "↓".bright_blue(),
                    d.protocol,
                    d.control.src,
                    d.control.interface.map_or_else(|| "-".to_string(), |i| i.to_string()),
                    d.payload.len()
                );
            }
        }
    }
}

fn print_summary(engine: &StaticNetworkProtocol, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(engine.stats())?);
        return Ok(());
    }

    println!("{}", "Summary".bold());
    let summary = engine.stats().summary();
    println!("  {}", if summary.is_empty() { "(idle)".dimmed().to_string() } else { summary });

    let reports = engine.reporter().reports();
    if !reports.is_empty() {
        println!();
        println!("{}", "Reports".bold());
        for report in reports {
            println!(
                "  {} {} > {}: {}{}",
                "!".red(),
                report.src,
                report.dest,
                report.error,
                if report.notified { "" } else { " (no notification)" }
            );
        }
    }

    let pending = engine.fragment_buffer().len();
    if pending > 0 {
        println!("  {} reassembly entries still waiting", pending);
    }
    Ok(())
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::Show => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<24} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Reset => {
            config::Config::default().save()?;
            println!("{} Configuration reset to defaults", "✓".green());
        }

        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }

    Ok(())
}
