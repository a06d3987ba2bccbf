//! Send G-code Example
//!
//! Streams a G-code file to the controller, one fully acknowledged command
//! at a time, while printing any joystick/telemetry lines that arrive on the
//! side channel.
//!
//! Usage:
//!   cargo run --example send_gcode -- /dev/ttyUSB0 part.nc
//!   cargo run --example send_gcode -- COM3 part.nc
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=debug cargo run --example send_gcode -- /dev/ttyUSB0 part.nc

use cnc_link::{Controller, LinkOptions, Result, SerialConnection};
use log::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let (Some(port_name), Some(file)) = (args.next(), args.next()) else {
        eprintln!("usage: send_gcode <port> <gcode-file>");
        eprintln!("available ports:");
        for port in SerialConnection::available_ports()? {
            eprintln!("  {} - {:?}", port.port_name, port.port_type);
        }
        std::process::exit(1);
    };

    let program = std::fs::read_to_string(&file)?;
    let lines: Vec<&str> = program
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(';'))
        .collect();
    info!("loaded {} commands from {}", lines.len(), file);

    info!("connecting to controller on {}...", port_name);
    let connection = SerialConnection::open(&port_name, 115_200)?;
    let controller = Controller::start(connection, LinkOptions::default())?;

    // print telemetry without holding up dispatch
    let mut notifications = controller.notifications().expect("first take");
    tokio::spawn(async move {
        while let Some(line) = notifications.recv().await {
            info!("telemetry: {}", line);
        }
    });

    for (index, line) in lines.iter().enumerate() {
        let reply = controller.send_command(line).await?;
        info!("[{}/{}] {} -> {}", index + 1, lines.len(), line, reply);
    }

    let history_file = std::env::temp_dir().join("cnc_link_commands.txt");
    controller.write_command_history(&history_file)?;
    info!("command history written to {}", history_file.display());

    controller.close();
    Ok(())
}
