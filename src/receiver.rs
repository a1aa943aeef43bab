//! Receive state machine.
//!
//! Decoded payloads are classified into [`Message`]s and fed through
//! [`Receiver`], which tracks where the session stands:
//!
//! ```text
//! AwaitingReady -> Idle -> AwaitingAcknowledgement -> Streaming -> Ended
//!                   ^            |                         |
//!                   +------------+  (non-measurement)      +-> Faulted
//! ```
//!
//! `Ended` accepts a new command, `Faulted` is terminal. The receiver does no
//! I/O: the session reads a line, decodes it, and hands the result over here.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::command::Opcode;
use crate::errors::{DriverError, FrameError, Result};

pub const READY: &str = "MSG,RDY";
pub const END: &str = "MSG,END";
const ERROR_PREFIX: &str = "ERR";

// ============================================================================
// Data Types
// ============================================================================

/// One sample of a running measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoltammetryPoint {
    /// Millivolts.
    pub voltage: f64,
    /// Microamps.
    pub current: f64,
}

impl VoltammetryPoint {
    #[inline]
    pub fn new(voltage: f64, current: f64) -> Self {
        Self { voltage, current }
    }
}

/// A checksum-valid payload, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ready,
    End,
    /// Any payload starting with `ERR`; the code is whatever follows, device specific.
    Error { code: String },
    Point(VoltammetryPoint),
}

/// What a running measurement yields to its consumer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamEvent {
    Point(VoltammetryPoint),
    End,
}

/// Outcome of the one-frame exchange that follows every command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    Accepted,
    Rejected { code: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingReady,
    Idle,
    AwaitingAcknowledgement,
    Streaming,
    Ended,
    Faulted,
}

/// What to do with a line that fails framing or checksum validation while streaming.
///
/// The handshake and acknowledgement phases always fail fast regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPolicy {
    /// Fault the session on the first corrupt frame. A corrupt line cannot be
    /// told apart from a corrupt `MSG,END` or `ERR`.
    #[default]
    FailFast,
    /// Log the corrupt frame, count it and keep reading.
    SkipCorrupt,
}

// ============================================================================
// Classification
// ============================================================================

/// Classify a decoded payload.
///
/// `opcode` is the code of the running measurement; when given, a data point
/// must carry that prefix.
pub fn classify(payload: &str, opcode: Option<Opcode>) -> Result<Message> {
    match payload {
        READY => return Ok(Message::Ready),
        END => return Ok(Message::End),
        _ => {}
    }
    if let Some(code) = error_code(payload) {
        return Ok(Message::Error { code });
    }
    parse_point(payload, opcode).map(Message::Point)
}

/// `Some(code)` for any payload starting with `ERR`; the code is whatever
/// follows, minus an optional leading `,`.
pub fn error_code(payload: &str) -> Option<String> {
    let rest = payload.strip_prefix(ERROR_PREFIX)?;
    Some(rest.strip_prefix(',').unwrap_or(rest).to_string())
}

/// Parse `<OP>,<voltage>,<current>`.
pub fn parse_point(payload: &str, opcode: Option<Opcode>) -> Result<VoltammetryPoint> {
    let malformed = || DriverError::MalformedPoint(payload.to_string());

    let (op, values) = payload.split_once(',').ok_or_else(malformed)?;
    if op.len() != 3 || !op.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(malformed());
    }
    if let Some(expected) = opcode {
        if op != expected.as_str() {
            return Err(malformed());
        }
    }

    let mut fields = values.split(',');
    let (Some(voltage), Some(current), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(malformed());
    };
    let voltage: f64 = voltage.trim().parse().map_err(|_| malformed())?;
    let current: f64 = current.trim().parse().map_err(|_| malformed())?;
    if !voltage.is_finite() || !current.is_finite() {
        return Err(malformed());
    }

    Ok(VoltammetryPoint::new(voltage, current))
}

// ============================================================================
// Receiver
// ============================================================================

/// Session-level protocol state, independent of any transport.
#[derive(Debug)]
pub struct Receiver {
    state: SessionState,
    policy: StreamPolicy,
    /// Measurement awaiting acknowledgement or currently streaming.
    opcode: Option<Opcode>,
    /// Event carried by the acknowledgement frame, delivered before the next read.
    pending: Option<StreamEvent>,
    skipped_frames: usize,
}

impl Receiver {
    pub fn new(policy: StreamPolicy) -> Self {
        Self {
            state: SessionState::AwaitingReady,
            policy,
            opcode: None,
            pending: None,
            skipped_frames: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn policy(&self) -> StreamPolicy {
        self.policy
    }

    pub fn opcode(&self) -> Option<Opcode> {
        self.opcode
    }

    /// Corrupt frames dropped under [`StreamPolicy::SkipCorrupt`] since the last command.
    pub fn skipped_frames(&self) -> usize {
        self.skipped_frames
    }

    /// Move to `Faulted` and hand the error back for propagation.
    pub fn fault(&mut self, err: DriverError) -> DriverError {
        if self.state != SessionState::Faulted {
            warn!("session faulted in state {:?}: {}", self.state, err);
        }
        self.state = SessionState::Faulted;
        self.pending = None;
        err
    }

    /// Handle the first frame after the port opened. Only `MSG,RDY` is acceptable.
    pub fn accept_handshake(&mut self, decoded: std::result::Result<String, FrameError>) -> Result<()> {
        self.expect_state(&[SessionState::AwaitingReady], "handshake")?;

        let payload = decoded.map_err(|e| self.fault(e.into()))?;
        if payload != READY {
            return Err(self.fault(DriverError::NotReady(format!(
                "expected {READY}, got {payload:?}"
            ))));
        }

        info!("device ready");
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Record that a command went out. `opcode` is set for measurement starts.
    pub fn command_sent(&mut self, opcode: Option<Opcode>) -> Result<()> {
        self.expect_state(&[SessionState::Idle, SessionState::Ended], "sending a command")?;
        self.state = SessionState::AwaitingAcknowledgement;
        self.opcode = opcode;
        self.pending = None;
        self.skipped_frames = 0;
        Ok(())
    }

    /// Handle the single frame that answers a command.
    ///
    /// The device never confirms success explicitly: anything but `ERR` accepts
    /// the command. A rejected measurement start faults the session; a rejected
    /// configuration command leaves it idle.
    pub fn accept_acknowledgement(
        &mut self,
        decoded: std::result::Result<String, FrameError>,
    ) -> Result<Acknowledgement> {
        self.expect_state(&[SessionState::AwaitingAcknowledgement], "acknowledgement")?;

        let payload = decoded.map_err(|e| self.fault(e.into()))?;

        if let Some(code) = error_code(&payload) {
            warn!("command rejected by device: code={:?}", code);
            match self.opcode {
                Some(_) => {
                    self.fault(DriverError::DeviceRejected { code: code.clone() });
                }
                None => self.state = SessionState::Idle,
            }
            return Ok(Acknowledgement::Rejected { code });
        }

        match self.opcode {
            Some(opcode) => {
                match classify(&payload, Some(opcode)) {
                    Ok(Message::Point(p)) => self.pending = Some(StreamEvent::Point(p)),
                    Ok(Message::End) => self.pending = Some(StreamEvent::End),
                    _ => debug!("acknowledgement payload={payload}"),
                }
                info!("measurement {} started", opcode);
                self.state = SessionState::Streaming;
            }
            None => {
                debug!("acknowledgement payload={payload}");
                self.state = SessionState::Idle;
            }
        }
        Ok(Acknowledgement::Accepted)
    }

    /// Event held over from the acknowledgement frame, if any.
    pub fn take_pending(&mut self) -> Option<StreamEvent> {
        let event = self.pending.take();
        if event == Some(StreamEvent::End) {
            self.finish();
        }
        event
    }

    /// Handle one frame while streaming.
    ///
    /// `Ok(None)` means the frame was corrupt and skipped under
    /// [`StreamPolicy::SkipCorrupt`].
    pub fn accept_stream_frame(
        &mut self,
        decoded: std::result::Result<String, FrameError>,
    ) -> Result<Option<StreamEvent>> {
        self.expect_state(&[SessionState::Streaming], "reading points")?;

        let payload = match decoded {
            Ok(payload) => payload,
            Err(e) => {
                return match self.policy {
                    StreamPolicy::FailFast => Err(self.fault(e.into())),
                    StreamPolicy::SkipCorrupt => {
                        self.skipped_frames += 1;
                        warn!(
                            "skipping corrupt frame ({} so far): {}",
                            self.skipped_frames, e
                        );
                        Ok(None)
                    }
                };
            }
        };

        match classify(&payload, self.opcode) {
            Ok(Message::Point(p)) => Ok(Some(StreamEvent::Point(p))),
            Ok(Message::End) => {
                self.finish();
                Ok(Some(StreamEvent::End))
            }
            Ok(Message::Error { code }) => Err(self.fault(DriverError::DeviceRejected { code })),
            Ok(Message::Ready) => Err(self.fault(DriverError::NotReady(
                "device restarted during measurement".into(),
            ))),
            Err(e) => Err(self.fault(e)),
        }
    }

    fn finish(&mut self) {
        info!(
            "measurement {} finished",
            self.opcode.map(Opcode::as_str).unwrap_or("?")
        );
        self.state = SessionState::Ended;
        self.opcode = None;
    }

    fn expect_state(&self, allowed: &[SessionState], what: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DriverError::InvalidState(format!(
                "{what} not allowed in state {:?}",
                self.state
            )))
        }
    }
}
