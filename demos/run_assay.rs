//! Run Assay Example
//!
//! Runs a full experiment from a YAML configuration file:
//! - Loading and validating the configuration
//! - Opening the relay board (interactive port selection as a fallback)
//! - Running entrainment, experiment runs, and recovery
//! - Writing the run-length-compressed status log to a CSV file
//!
//! Usage:
//!   cargo run --example run_assay -- assay.yaml
//!   cargo run --example run_assay -- assay.yaml custom_log.csv
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=debug cargo run --example run_assay -- assay.yaml
//!   RUST_LOG=info cargo run --example run_assay -- assay.yaml

use inquire::Select;
use log::info;
use sleep_assay::{Assay, AssayConfig, CsvSink, RelayBoard, Result};
use std::path::Path;

/// Interactive serial port selection using inquire
fn select_port() -> Result<String> {
    let ports = RelayBoard::list_ports()?;

    if ports.is_empty() {
        eprintln!("No serial ports found!");
        std::process::exit(1);
    }

    let port_names: Vec<String> = ports
        .iter()
        .map(|p| format!("{} - {:?}", p.port_name, p.port_type))
        .collect();

    let selection = Select::new("Select a serial port:", port_names)
        .prompt()
        .map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Selection cancelled: {}", e),
            )
        })?;

    // Extract just the port name (before " - ")
    let port_name = selection.split(" - ").next().unwrap().to_string();
    Ok(port_name)
}

fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG is not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "assay.yaml".to_string());
    let log_path = std::env::args()
        .nth(2)
        .unwrap_or_else(|| "assay_log.csv".to_string());

    let mut config = AssayConfig::from_file(Path::new(&config_path))?;
    if config.port == "select" {
        config.port = select_port()?;
    }

    info!("Connecting to relay board on {}...", config.port);
    let mut board = RelayBoard::open_with_baud(&config.port, config.baud_rate)?;

    info!(
        "Starting assay: {} experiment run(s), log -> {}",
        config.experiment.len(),
        log_path
    );
    let mut sink = CsvSink::new(std::fs::File::create(&log_path)?);
    Assay::new(&mut board, &config, &mut sink).run()?;

    info!("Assay complete; stopping all pulses");
    board.close()?;

    Ok(())
}
