//! # CNC Link
//!
//! A Rust library for driving Arduino-based CNC and stepper-motor
//! controllers over a serial link. It implements the communication layer of
//! a machine control application: ordered asynchronous command dispatch over
//! a newline-delimited protocol, reply classification with configurable
//! terminator tags, a bounded command history, and a binary EEPROM parameter
//! codec for reading and programming machine settings.
//!
//! ## Features
//!
//! - Strict FIFO command dispatch: one command in flight, replies matched in
//!   send order, per-command timeouts
//! - Unsolicited telemetry (joystick lines and friends) routed to a bounded
//!   side channel without stalling reply matching
//! - Capped command history with snapshots and file export
//! - Versioned EEPROM image codec with per-axis parameter views
//!
//! ## Example
//!
//! ```no_run
//! use cnc_link::{Controller, LinkOptions, SerialConnection};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> cnc_link::Result<()> {
//!     let connection = SerialConnection::open("/dev/ttyUSB0", 115_200)?;
//!     let controller = Controller::start(connection, LinkOptions::default())?;
//!     let reply = controller.send_command("G0 X10 Y10").await?;
//!     println!("controller said: {reply}");
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod constants;
pub mod eeprom;
pub mod error;
pub mod history;
pub mod protocol;
pub mod reply;

pub use connection::{Connection, SerialConnection};
pub use error::{CncError, Result};
pub use history::{CommandHistory, CommandState, SentCommand};
pub use protocol::{Controller, LinkOptions};
