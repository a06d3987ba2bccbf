//! Protocol constants for controller communication.
//!
//! This module defines the defaults used on the serial link to the
//! controller: reply tags, timing parameters, queue capacities and the
//! EEPROM image geometry.

use std::time::Duration;

/// Default baud rate for Arduino-class controller boards
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Reply line that terminates a command
pub const DEFAULT_OK_TAG: &str = "ok";

/// Reply line prefix reporting a firmware error (still terminates the command)
pub const DEFAULT_ERROR_TAG: &str = "error:";

/// Reply line prefix for informational output (does not terminate)
pub const DEFAULT_INFO_TAG: &str = "info:";

/// Prefix marking an unsolicited notification line (e.g. joystick telemetry)
pub const DEFAULT_NOTIFY_PREFIX: &str = ";";

/// Serial read timeout; doubles as the idle poll interval of the link thread
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default per-command reply deadline
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for `$?` EEPROM reads, which stream many reply lines
pub const EEPROM_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of commands retained in the history ring
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Capacity of the unsolicited-notification channel
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;

/// Capacity of the outgoing command queue
pub const SEND_QUEUE_CAPACITY: usize = 32;

/// Marker stored in EEPROM word 0 of a v1 parameter block
pub const EEPROM_SIGNATURE: u32 = 0x2143_6587;

/// Number of 32-bit words in a v1 EEPROM image
pub const EEPROM_WORDS: usize = 22;

/// Maximum number of axes a v1 image describes
pub const MAX_AXES: usize = 6;
