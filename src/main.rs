mod cli;

use clap::Parser;
use ctscope::capture::engine;
use ctscope::config::{Config, ConfigError};
use ctscope::pipeline::{self, router, OwnedPacket, PipelineConfig};
use ctscope::{display, table};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Records listed at exit when not exporting.
const LIST_LIMIT: usize = 20;

fn main() {
    let args = cli::Cli::parse();

    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    if args.list_interfaces {
        list_interfaces();
        return;
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
        eprintln!("\nInterrupt received, stopping capture...");
    }) {
        eprintln!("error: failed to set Ctrl-C handler: {}", err);
        std::process::exit(1);
    }

    if let Err(e) = run_tracking(&config, &running) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn list_interfaces() {
    match engine::list_interfaces() {
        Ok(devices) => {
            println!("Available network interfaces:");
            println!("{:<20} {:<20} {}", "Name", "Description", "Addresses");
            println!("{}", "-".repeat(70));
            for device in &devices {
                let desc = device.desc.as_deref().unwrap_or("");
                let addrs: Vec<String> = device
                    .addresses
                    .iter()
                    .map(|a| format!("{}", a.addr))
                    .collect();
                println!("{:<20} {:<20} {}", device.name, desc, addrs.join(", "));
            }
            if devices.is_empty() {
                println!("  (no interfaces found, try running with sudo)");
            }
        }
        Err(e) => {
            eprintln!("error listing interfaces: {}", e);
            eprintln!("hint: try running with sudo");
        }
    }
}

/// Read frames, route TCP ones to the worker shards and report.
fn run_tracking(
    config: &Config,
    running: &Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut cap = engine::open(&config.capture)?;
    let mut pipeline = pipeline::spawn(PipelineConfig::from_config(config), running.clone())?;
    let num_workers = pipeline.num_workers();

    println!("ctscope v{}", env!("CARGO_PKG_VERSION"));
    match (&config.capture.read_file, &config.capture.interface) {
        (Some(path), _) => println!("Reading: {}", path.display()),
        (None, Some(name)) => println!("Capturing on interface: {}", name),
        (None, None) => println!("Capturing on interface: (default)"),
    }
    if let Some(filter) = &config.capture.filter {
        println!("Filter: {}", filter);
    }
    println!(
        "Workers: {} | liberal: {} | loose: {} | checksums: {}",
        num_workers,
        config.tracking.liberal,
        config.tracking.loose,
        if config.tracking.verify_checksum { "on" } else { "off" }
    );
    println!();

    let mut frames: u64 = 0;
    let mut skipped: u64 = 0;
    let mut capture_error = None;

    while running.load(Ordering::SeqCst) {
        if config.run.count > 0 && frames >= config.run.count {
            break;
        }

        let packet = match cap.next_packet() {
            Ok(packet) => Some(packet),
            Err(pcap::Error::TimeoutExpired) => None,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                tracing::error!(error = %e, "capture error");
                capture_error = Some(e);
                break;
            }
        };

        if let Some(packet) = packet {
            frames += 1;

            match router::shard_for_frame(packet.data, num_workers) {
                Some(shard) => {
                    let ts = packet.header.ts.tv_sec as f64
                        + packet.header.ts.tv_usec as f64 / 1_000_000.0;
                    let owned = OwnedPacket {
                        id: frames,
                        ts,
                        wire_len: packet.header.len as u64,
                        data: packet.data.to_vec(),
                    };
                    if pipeline.senders[shard].send(owned).is_err() {
                        tracing::warn!(shard, "worker channel closed");
                        break;
                    }
                }
                None => skipped += 1,
            }
        }

        if config.stats.enabled {
            if let Some(tick) = pipeline.aggregator.take_tick() {
                display::print_stats_tick(&tick);
            }
        }
    }

    pipeline.shutdown();
    if let Some(e) = capture_error {
        return Err(Box::new(e));
    }

    let conns = pipeline.aggregator.take_final_snapshots();
    let stats = pipeline.aggregator.final_stats();
    display::print_summary(frames, skipped, &stats, conns.len());

    match &config.output.export_json {
        Some(path) => {
            table::write_conn_json(path, &conns)?;
            println!("  Connection export (JSON): {}", path.display());
        }
        None if !config.output.quiet => display::print_connections(&conns, LIST_LIMIT),
        None => {}
    }

    Ok(())
}

/// File settings first, then command-line overrides.
fn load_config(args: &cli::Cli) -> Result<Config, ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    apply_args(&mut config, args);
    Ok(config)
}

fn apply_args(config: &mut Config, args: &cli::Cli) {
    if let Some(value) = &args.interface {
        config.capture.interface = Some(value.clone());
        config.capture.read_file = None;
    }
    if let Some(value) = &args.read {
        config.capture.read_file = Some(value.clone());
    }
    if let Some(value) = &args.filter {
        config.capture.filter = Some(value.clone());
    }
    if let Some(value) = args.count {
        config.run.count = value;
    }
    if let Some(value) = args.workers {
        config.run.workers = value;
    }
    if let Some(value) = args.max_conns {
        config.table.max_conns = value;
    }
    if let Some(value) = args.loose {
        config.tracking.loose = value;
    }
    if let Some(value) = args.max_retrans {
        config.tracking.max_retrans = value;
    }
    if let Some(value) = &args.export_json {
        config.output.export_json = Some(value.clone());
    }

    if args.liberal {
        config.tracking.liberal = true;
    }
    if args.no_checksum {
        config.tracking.verify_checksum = false;
    }
    if args.stats {
        config.stats.enabled = true;
    }
    if args.quiet {
        config.output.quiet = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let mut config: Config = toml::from_str(
            r#"
            [capture]
            interface = "eth1"

            [tracking]
            loose = 5
            "#,
        )
        .unwrap();
        let args = cli::Cli::parse_from([
            "ctscope",
            "-r",
            "trace.pcap",
            "--loose",
            "0",
            "--no-checksum",
        ]);
        apply_args(&mut config, &args);

        assert_eq!(config.capture.read_file.as_deref(), Some(std::path::Path::new("trace.pcap")));
        assert_eq!(config.tracking.loose, 0);
        assert!(!config.tracking.verify_checksum);
        // Untouched values come from the file or the defaults.
        assert_eq!(config.capture.interface.as_deref(), Some("eth1"));
        assert_eq!(config.tracking.max_retrans, 3);
    }
}
