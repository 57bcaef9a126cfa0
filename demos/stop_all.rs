//! Stop All Example
//!
//! Emergency stop: opens the relay board and stops every running pulse.
//! Useful after aborting an assay mid-run, since the board keeps executing
//! issued patterns on its own.
//!
//! Usage:
//!   cargo run --example stop_all                  # Interactive mode
//!   cargo run --example stop_all -- /dev/ttyUSB0  # Specify port

use inquire::Select;
use log::info;
use sleep_assay::{RelayBoard, Result};

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

    let port_name = selection.split(" - ").next().unwrap().to_string();
    Ok(port_name)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let port_name = std::env::args()
        .nth(1)
        .map(Ok)
        .unwrap_or_else(select_port)?;

    info!("Connecting to relay board on {}...", port_name);
    let board = RelayBoard::open(&port_name)?;

    info!("Stopping all pulses");
    board.close()?;

    Ok(())
}
