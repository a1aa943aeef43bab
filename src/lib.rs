//! OpenAFE host driver.
//!
//! The OpenAFE is an electrochemical analog front-end driven over a serial
//! link (115200 baud) with a line protocol:
//!
//! ```text
//! $<payload>*<CC>\r\n        CC = XOR of the payload bytes, two uppercase hex digits
//! ```
//!
//! The host sends a command (`CMD,CUR,<range>`, `CVW,...`, `DPV,...`,
//! `SWV,...`), the device answers with one frame (`ERR,...` rejects it), then
//! streams `<OP>,<voltage>,<current>` points until `MSG,END`.
//!
//! # Layers
//!
//! 1. [`checksum`] / [`frame`]: envelope encoding and integrity checks
//! 2. [`command`]: payload builders for each technique
//! 3. [`receiver`]: classification and the session state machine, no I/O
//! 4. [`transport`]: blocking line I/O over a serial port or any stream
//! 5. [`session`]: ties the above together and delivers points to the caller

pub mod checksum;
pub mod command;
pub mod config;
mod errors;
pub mod frame;
pub mod logging;
#[cfg(feature = "python")]
mod python;
pub mod receiver;
pub mod session;
pub mod transport;

pub use checksum::{compute_checksum, decode_checksum, encode_checksum};
pub use command::{
    Command, CyclicVoltammetry, DifferentialPulseVoltammetry, Measurement, Opcode,
    SquareWaveVoltammetry,
};
pub use config::{RunConfig, SessionConfig};
pub use errors::*;
pub use frame::{decode_frame, encode_frame};
pub use receiver::{
    Acknowledgement, Message, SessionState, StreamEvent, StreamPolicy, VoltammetryPoint,
};
pub use session::{Callbacks, Events, MeasurementHandler, RunSummary, Session};
pub use transport::{LineTransport, SerialTransport, Transport, BAUD_RATE};
