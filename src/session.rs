//! OpenAFE device session.
//!
//! A [`Session`] owns its transport for its whole life and drives the
//! [`Receiver`] state machine: handshake on open, one acknowledgement frame per
//! command, then a blocking read per point until `MSG,END` or a fault.
//!
//! Everything runs on the calling thread. Points reach the caller in the order
//! their frames arrived, either pulled from [`Session::events`] or pushed into a
//! [`MeasurementHandler`] by [`Session::run`].

use std::time::Duration;

use log::{debug, info, warn};

use crate::command::{
    Command, CyclicVoltammetry, DifferentialPulseVoltammetry, Measurement, Opcode,
    SquareWaveVoltammetry,
};
use crate::config::SessionConfig;
use crate::errors::{DriverError, FrameError, Result};
use crate::frame::{decode_frame, encode_frame};
use crate::receiver::{
    Acknowledgement, Receiver, SessionState, StreamEvent, StreamPolicy, VoltammetryPoint,
};
use crate::transport::{SerialTransport, Transport};

// ============================================================================
// Consumer Interface
// ============================================================================

/// Receives the output of a running measurement.
pub trait MeasurementHandler {
    fn on_point(&mut self, point: VoltammetryPoint);

    fn on_end(&mut self) {}
}

/// Adapter turning a pair of closures into a [`MeasurementHandler`].
pub struct Callbacks<P, E> {
    on_point: P,
    on_end: E,
}

impl<P, E> Callbacks<P, E>
where
    P: FnMut(VoltammetryPoint),
    E: FnMut(),
{
    pub fn new(on_point: P, on_end: E) -> Self {
        Self { on_point, on_end }
    }
}

impl<P, E> MeasurementHandler for Callbacks<P, E>
where
    P: FnMut(VoltammetryPoint),
    E: FnMut(),
{
    fn on_point(&mut self, point: VoltammetryPoint) {
        (self.on_point)(point)
    }

    fn on_end(&mut self) {
        (self.on_end)()
    }
}

/// Totals of one [`Session::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub points: usize,
    /// Corrupt frames dropped under [`StreamPolicy::SkipCorrupt`].
    pub skipped_frames: usize,
}

// ============================================================================
// Session
// ============================================================================

/// Connection to one OpenAFE instrument.
///
/// # Example
/// ```ignore
/// let mut session = Session::connect(&SessionConfig::new("/dev/ttyACM0"))?;
/// session.configure_current_range(200)?;
/// session.cyclic_voltammetry(CyclicVoltammetry::default())?;
/// session.run_with(|p| println!("{},{}", p.voltage, p.current), || println!("done"))?;
/// ```
pub struct Session<T: Transport> {
    transport: T,
    receiver: Receiver,
}

impl Session<SerialTransport> {
    /// Open the configured serial port and wait for the device to report ready.
    pub fn connect(config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        let timeout = Duration::from_millis(config.read_timeout_ms);
        let transport = SerialTransport::open(&config.port, timeout)?;
        info!("connecting to OpenAFE on {}", config.port);
        Self::open(transport, config.stream_policy)
    }
}

impl<T: Transport> Session<T> {
    /// Take ownership of `transport` and block until `MSG,RDY` arrives.
    ///
    /// Anything else as the first frame fails the open.
    pub fn open(transport: T, policy: StreamPolicy) -> Result<Self> {
        let mut session = Self {
            transport,
            receiver: Receiver::new(policy),
        };
        let decoded = session.read_decoded()?;
        session.receiver.accept_handshake(decoded)?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.receiver.state()
    }

    pub fn policy(&self) -> StreamPolicy {
        self.receiver.policy()
    }

    /// Opcode of the measurement being acknowledged or streamed.
    pub fn opcode(&self) -> Option<Opcode> {
        self.receiver.opcode()
    }

    /// Release the transport, e.g. to reopen a session after a fault.
    pub fn into_transport(self) -> T {
        self.transport
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Send `command` and read the one frame that answers it.
    pub fn exchange(&mut self, command: &Command) -> Result<Acknowledgement> {
        let opcode = match command {
            Command::Start(m) => Some(m.opcode()),
            Command::SetCurrentRange(_) => None,
        };
        self.receiver.command_sent(opcode)?;

        let payload = command.payload();
        debug!("sending command payload={payload}");
        if let Err(e) = self.transport.write_bytes(&encode_frame(&payload)) {
            return Err(self.receiver.fault(e));
        }

        let decoded = self.read_decoded()?;
        self.receiver.accept_acknowledgement(decoded)
    }

    /// Select the current range in µA.
    ///
    /// Returns `false` when the device rejects the range; the session stays usable.
    pub fn configure_current_range(&mut self, range: u32) -> Result<bool> {
        match self.exchange(&Command::SetCurrentRange(range))? {
            Acknowledgement::Accepted => {
                info!("current range set to {range} uA");
                Ok(true)
            }
            Acknowledgement::Rejected { code } => {
                warn!("current range {range} uA rejected: code={code:?}");
                Ok(false)
            }
        }
    }

    /// Start a measurement. A rejection is fatal to the session.
    pub fn start_measurement(&mut self, measurement: &Measurement) -> Result<()> {
        match self.exchange(&Command::Start(*measurement))? {
            Acknowledgement::Accepted => Ok(()),
            Acknowledgement::Rejected { code } => Err(DriverError::DeviceRejected { code }),
        }
    }

    pub fn cyclic_voltammetry(&mut self, params: CyclicVoltammetry) -> Result<()> {
        self.start_measurement(&params.into())
    }

    pub fn differential_pulse_voltammetry(
        &mut self,
        params: DifferentialPulseVoltammetry,
    ) -> Result<()> {
        self.start_measurement(&params.into())
    }

    pub fn square_wave_voltammetry(&mut self, params: SquareWaveVoltammetry) -> Result<()> {
        self.start_measurement(&params.into())
    }

    // ------------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------------

    /// Block for the next event of the running measurement.
    ///
    /// Returns `Ok(None)` once the measurement has ended.
    pub fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        if let Some(event) = self.receiver.take_pending() {
            return Ok(Some(event));
        }
        match self.receiver.state() {
            SessionState::Streaming => {}
            SessionState::Ended => return Ok(None),
            state => {
                return Err(DriverError::InvalidState(format!(
                    "no measurement running (state {state:?})"
                )))
            }
        }

        loop {
            let decoded = self.read_decoded()?;
            if let Some(event) = self.receiver.accept_stream_frame(decoded)? {
                return Ok(Some(event));
            }
        }
    }

    /// Pull-based view of the running measurement.
    ///
    /// The iterator ends after [`StreamEvent::End`] or the first error.
    pub fn events(&mut self) -> Events<'_, T> {
        Events {
            session: self,
            done: false,
        }
    }

    /// Give up on the running measurement.
    ///
    /// The rest of the stream is still on the wire with no way to resynchronise,
    /// so the session faults; reopen from [`Session::into_transport`] to go on.
    pub fn abort(&mut self, reason: &str) {
        if self.receiver.state() == SessionState::Faulted {
            return;
        }
        info!("measurement aborted: {reason}");
        self.receiver
            .fault(DriverError::InvalidState(format!("measurement aborted: {reason}")));
    }

    /// Deliver every point to `handler` until the measurement ends or faults.
    pub fn run<H: MeasurementHandler + ?Sized>(&mut self, handler: &mut H) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for event in self.events() {
            match event? {
                StreamEvent::Point(point) => {
                    summary.points += 1;
                    handler.on_point(point);
                }
                StreamEvent::End => handler.on_end(),
            }
        }
        summary.skipped_frames = self.receiver.skipped_frames();
        Ok(summary)
    }

    /// [`Session::run`] with closures in place of a handler.
    pub fn run_with<P, E>(&mut self, on_point: P, on_end: E) -> Result<RunSummary>
    where
        P: FnMut(VoltammetryPoint),
        E: FnMut(),
    {
        self.run(&mut Callbacks::new(on_point, on_end))
    }

    /// Read and decode one line. Transport failures fault the session; frame
    /// failures are left to the state machine.
    fn read_decoded(&mut self) -> Result<std::result::Result<String, FrameError>> {
        match self.transport.read_line() {
            Ok(line) => {
                debug!("received line={:?}", String::from_utf8_lossy(&line).trim_end());
                Ok(decode_frame(&line))
            }
            Err(e) => Err(self.receiver.fault(e)),
        }
    }
}

/// Iterator returned by [`Session::events`].
pub struct Events<'a, T: Transport> {
    session: &'a mut Session<T>,
    done: bool,
}

impl<T: Transport> Iterator for Events<'_, T> {
    type Item = Result<StreamEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.session.next_event() {
            Ok(Some(StreamEvent::End)) => {
                self.done = true;
                Some(Ok(StreamEvent::End))
            }
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<T: Transport> std::iter::FusedIterator for Events<'_, T> {}
