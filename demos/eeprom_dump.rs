//! EEPROM Dump Example
//!
//! Reads the machine parameter block from the controller, prints the decoded
//! fields and saves the equivalent `$slot=value` command sequence to a file
//! so it can be replayed later.
//!
//! Usage:
//!   cargo run --example eeprom_dump -- /dev/ttyUSB0
//!   cargo run --example eeprom_dump -- /dev/ttyUSB0 eeprom.nc

use cnc_link::eeprom::{get_eeprom_words, Eeprom, EepromV1};
use cnc_link::{Controller, LinkOptions, Result, SerialConnection};
use log::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let Some(port_name) = args.next() else {
        eprintln!("usage: eeprom_dump <port> [output-file]");
        std::process::exit(1);
    };
    let output = args.next().unwrap_or_else(|| "eeprom.nc".to_string());

    info!("connecting to controller on {}...", port_name);
    let connection = SerialConnection::open(&port_name, 115_200)?;
    let controller = Controller::start(connection, LinkOptions::default())?;

    info!("reading parameter block ($?)...");
    let words = get_eeprom_words(&controller).await?;
    info!("controller reported {} words", words.len());

    let view = EepromV1::try_from_words(words)?;
    let eeprom = Eeprom::decode(&view)?;

    println!("axes: {} (use mask {:#04x})", eeprom.num_axis, eeprom.use_axis);
    for (index, axis) in eeprom.axis.iter().take(eeprom.num_axis as usize).enumerate() {
        println!(
            "axis {}: size {}, ref {:?}, sequence {:?}",
            index, axis.size, axis.ref_move, axis.ref_sequence
        );
    }
    println!("ref move step rate: {}", eeprom.ref_move_step_rate);
    println!("move away from reference: {}", eeprom.move_away_from_reference);
    println!("max step rate: {}", eeprom.max_step_rate);
    println!("acc / dec: {} / {}", eeprom.acc, eeprom.dec);
    println!("steps per mm*1000: {}", eeprom.steps_per_mm_1000);

    view.dump(&output)?;
    info!("command sequence saved to {}", output);

    controller.close();
    Ok(())
}
