//! Text command/response protocol spoken by the radio modem.
//!
//! A command is one line. Its response is complete once the modem has echoed
//! the command, printed a terminal marker and, when requested, a line matching
//! the expected pattern. Unsolicited indications are read separately through
//! [`AtChannel::read_detached`].

pub mod command;
pub mod engine;
pub mod error;

pub use command::{AtCommand, Response, Status};
pub use engine::{AtChannel, AtEngine, DetachedMode, POWER_DOWN_MARKER, SharedChannel};
pub use error::AtError;
