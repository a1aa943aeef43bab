use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use _core::{
    compute_checksum, encode_checksum, encode_frame, CyclicVoltammetry, DriverError, FrameError,
    MeasurementHandler, Session, SessionState, SquareWaveVoltammetry, StreamEvent, StreamPolicy,
    Transport, VoltammetryPoint,
};

/// Replays scripted lines and records everything written.
#[derive(Default)]
struct ScriptedPort {
    lines: VecDeque<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedPort {
    fn new(lines: &[Vec<u8>]) -> Self {
        Self {
            lines: lines.iter().cloned().collect(),
            written: Arc::default(),
        }
    }
}

impl Transport for ScriptedPort {
    fn write_bytes(&mut self, bytes: &[u8]) -> _core::Result<()> {
        self.written.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn read_line(&mut self) -> _core::Result<Vec<u8>> {
        self.lines.pop_front().ok_or(DriverError::Disconnected)
    }
}

fn frame(payload: &str) -> Vec<u8> {
    encode_frame(payload)
}

fn corrupt(payload: &str) -> Vec<u8> {
    let cs = compute_checksum(payload.as_bytes()) ^ 0x01;
    format!("${payload}*{}\r\n", encode_checksum(cs)).into_bytes()
}

#[derive(Default)]
struct Recorder {
    points: Vec<VoltammetryPoint>,
    ends: usize,
    points_after_end: usize,
}

impl MeasurementHandler for Recorder {
    fn on_point(&mut self, point: VoltammetryPoint) {
        if self.ends > 0 {
            self.points_after_end += 1;
        }
        self.points.push(point);
    }

    fn on_end(&mut self) {
        self.ends += 1;
    }
}

fn open(lines: &[Vec<u8>], policy: StreamPolicy) -> (Session<ScriptedPort>, Arc<Mutex<Vec<u8>>>) {
    let port = ScriptedPort::new(lines);
    let written = port.written.clone();
    let session = Session::open(port, policy).expect("handshake");
    (session, written)
}

#[test]
fn full_cyclic_voltammetry_run() {
    let (mut session, written) = open(
        &[
            frame("MSG,RDY"),
            frame("MSG,OK"),
            frame("MSG,OK"),
            frame("CVW,-500,0.12"),
            frame("CVW,-495,0.15"),
            frame("CVW,1.5,-0.25"),
            frame("MSG,END"),
            // anything after the end must not be read
            frame("CVW,9,9"),
        ],
        StreamPolicy::FailFast,
    );
    assert_eq!(session.state(), SessionState::Idle);

    assert!(session.configure_current_range(200).unwrap());
    session
        .cyclic_voltammetry(CyclicVoltammetry {
            settling_time_ms: 1000.0,
            start_potential_mv: -500.0,
            end_potential_mv: 500.0,
            scan_rate_mv_s: 200.0,
            step_size_mv: 5.0,
            cycles: 2,
        })
        .unwrap();
    assert_eq!(session.state(), SessionState::Streaming);

    let mut recorder = Recorder::default();
    let summary = session.run(&mut recorder).unwrap();

    assert_eq!(summary.points, 3);
    assert_eq!(summary.skipped_frames, 0);
    assert_eq!(recorder.ends, 1);
    assert_eq!(recorder.points_after_end, 0);
    assert_eq!(
        recorder.points,
        vec![
            VoltammetryPoint::new(-500.0, 0.12),
            VoltammetryPoint::new(-495.0, 0.15),
            VoltammetryPoint::new(1.5, -0.25),
        ]
    );
    assert_eq!(session.state(), SessionState::Ended);

    let mut expected = frame("CMD,CUR,200");
    expected.extend(frame("CVW,1000,-500,500,200,5,2"));
    assert_eq!(*written.lock().unwrap(), expected);

    let cs = encode_checksum(compute_checksum(b"CVW,1000,-500,500,200,5,2"));
    assert!(String::from_utf8(expected)
        .unwrap()
        .ends_with(&format!("$CVW,1000,-500,500,200,5,2*{cs}\r\n")));
}

#[test]
fn handshake_rejects_other_messages() {
    let port = ScriptedPort::new(&[frame("MSG,END")]);
    assert!(matches!(
        Session::open(port, StreamPolicy::FailFast),
        Err(DriverError::NotReady(_))
    ));

    let port = ScriptedPort::new(&[corrupt("MSG,RDY")]);
    assert!(matches!(
        Session::open(port, StreamPolicy::FailFast),
        Err(DriverError::Frame(FrameError::ChecksumMismatch { .. }))
    ));

    let port = ScriptedPort::new(&[]);
    let err = Session::open(port, StreamPolicy::FailFast).err().unwrap();
    assert!(err.is_connectivity());
}

#[test]
fn rejected_current_range_is_not_fatal() {
    let (mut session, _) = open(
        &[frame("MSG,RDY"), frame("ERR,05"), frame("MSG,OK")],
        StreamPolicy::FailFast,
    );
    assert!(!session.configure_current_range(999_999).unwrap());
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.configure_current_range(200).unwrap());
}

#[test]
fn rejected_measurement_faults_session() {
    let (mut session, _) = open(&[frame("MSG,RDY"), frame("ERR,02")], StreamPolicy::FailFast);
    let err = session
        .square_wave_voltammetry(SquareWaveVoltammetry::default())
        .unwrap_err();
    assert!(matches!(err, DriverError::DeviceRejected { ref code } if code == "02"));
    assert_eq!(session.state(), SessionState::Faulted);
    assert!(matches!(
        session.configure_current_range(200),
        Err(DriverError::InvalidState(_))
    ));
}

#[test]
fn unseparated_error_code_rejects_measurement() {
    let (mut session, _) = open(&[frame("MSG,RDY"), frame("ERR01")], StreamPolicy::FailFast);
    let err = session
        .cyclic_voltammetry(CyclicVoltammetry::default())
        .unwrap_err();
    assert!(matches!(err, DriverError::DeviceRejected { ref code } if code == "01"));
    assert_eq!(session.state(), SessionState::Faulted);
}

#[test]
fn unseparated_error_code_mid_stream() {
    let (mut session, _) = open(
        &[
            frame("MSG,RDY"),
            frame("MSG,OK"),
            frame("CVW,1,2"),
            frame("ERR02"),
        ],
        StreamPolicy::SkipCorrupt,
    );
    session.cyclic_voltammetry(CyclicVoltammetry::default()).unwrap();

    let mut points = 0;
    let err = session.run_with(|_| points += 1, || {}).unwrap_err();
    assert!(matches!(err, DriverError::DeviceRejected { ref code } if code == "02"));
    assert_eq!(points, 1);
    assert_eq!(session.state(), SessionState::Faulted);
}

#[test]
fn reopen_after_fault() {
    let (mut session, written) = open(
        &[
            frame("MSG,RDY"),
            frame("ERR,02"),
            frame("MSG,RDY"),
            frame("MSG,OK"),
        ],
        StreamPolicy::FailFast,
    );
    assert!(session
        .square_wave_voltammetry(SquareWaveVoltammetry::default())
        .is_err());
    assert_eq!(session.state(), SessionState::Faulted);

    let mut session = Session::open(session.into_transport(), StreamPolicy::FailFast).unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.configure_current_range(200).unwrap());
    assert!(written.lock().unwrap().ends_with(&frame("CMD,CUR,200")));
}

#[test]
fn abort_faults_running_measurement() {
    let (mut session, _) = open(
        &[
            frame("MSG,RDY"),
            frame("MSG,OK"),
            frame("CVW,1,2"),
            frame("CVW,3,4"),
            frame("MSG,END"),
        ],
        StreamPolicy::FailFast,
    );
    session.cyclic_voltammetry(CyclicVoltammetry::default()).unwrap();
    assert!(matches!(session.next_event(), Ok(Some(StreamEvent::Point(_)))));

    session.abort("consumer gave up");
    assert_eq!(session.state(), SessionState::Faulted);
    assert!(matches!(
        session.next_event(),
        Err(DriverError::InvalidState(_))
    ));
}

#[test]
fn error_mid_stream_stops_without_point() {
    let (mut session, _) = open(
        &[
            frame("MSG,RDY"),
            frame("MSG,OK"),
            frame("CVW,1,2"),
            frame("ERR,1F"),
            frame("CVW,3,4"),
        ],
        StreamPolicy::FailFast,
    );
    session.cyclic_voltammetry(CyclicVoltammetry::default()).unwrap();

    let mut points = Vec::new();
    let mut ended = false;
    let err = session
        .run_with(|p| points.push(p), || ended = true)
        .unwrap_err();

    assert!(matches!(err, DriverError::DeviceRejected { .. }));
    assert_eq!(points, vec![VoltammetryPoint::new(1.0, 2.0)]);
    assert!(!ended);
    assert_eq!(session.state(), SessionState::Faulted);
}

#[test]
fn corrupt_frame_policy() {
    let lines = [
        frame("MSG,RDY"),
        frame("MSG,OK"),
        frame("CVW,1,2"),
        corrupt("CVW,3,4"),
        b"garbage\r\n".to_vec(),
        frame("CVW,5,6"),
        frame("MSG,END"),
    ];

    let (mut session, _) = open(&lines, StreamPolicy::FailFast);
    session.cyclic_voltammetry(CyclicVoltammetry::default()).unwrap();
    let mut recorder = Recorder::default();
    assert!(matches!(
        session.run(&mut recorder),
        Err(DriverError::Frame(FrameError::ChecksumMismatch { .. }))
    ));
    assert_eq!(recorder.points.len(), 1);
    assert_eq!(recorder.ends, 0);

    let (mut session, _) = open(&lines, StreamPolicy::SkipCorrupt);
    session.cyclic_voltammetry(CyclicVoltammetry::default()).unwrap();
    let mut recorder = Recorder::default();
    let summary = session.run(&mut recorder).unwrap();
    assert_eq!(summary.points, 2);
    assert_eq!(summary.skipped_frames, 2);
    assert_eq!(recorder.ends, 1);
}

#[test]
fn acknowledgement_carrying_a_point_is_not_lost() {
    let (mut session, _) = open(
        &[
            frame("MSG,RDY"),
            frame("SWV,-500,0.5"),
            frame("SWV,-490,0.6"),
            frame("MSG,END"),
        ],
        StreamPolicy::FailFast,
    );
    session
        .square_wave_voltammetry(SquareWaveVoltammetry::default())
        .unwrap();

    let events: Vec<StreamEvent> = session.events().collect::<Result<_, _>>().unwrap();
    assert_eq!(
        events,
        vec![
            StreamEvent::Point(VoltammetryPoint::new(-500.0, 0.5)),
            StreamEvent::Point(VoltammetryPoint::new(-490.0, 0.6)),
            StreamEvent::End,
        ]
    );
}

#[test]
fn disconnect_mid_stream_is_connectivity_error() {
    let (mut session, _) = open(
        &[frame("MSG,RDY"), frame("MSG,OK"), frame("CVW,1,2")],
        StreamPolicy::SkipCorrupt,
    );
    session.cyclic_voltammetry(CyclicVoltammetry::default()).unwrap();

    let mut events = session.events();
    assert!(matches!(events.next(), Some(Ok(StreamEvent::Point(_)))));
    let err = events.next().unwrap().unwrap_err();
    assert!(err.is_connectivity());
    assert!(events.next().is_none());
    drop(events);
    assert_eq!(session.state(), SessionState::Faulted);
}

#[test]
fn second_measurement_after_end() {
    let (mut session, _) = open(
        &[
            frame("MSG,RDY"),
            frame("MSG,OK"),
            frame("MSG,END"),
            frame("MSG,OK"),
            frame("CVW,7,8"),
            frame("MSG,END"),
        ],
        StreamPolicy::FailFast,
    );

    session.cyclic_voltammetry(CyclicVoltammetry::default()).unwrap();
    let first = session.run_with(|_| {}, || {}).unwrap();
    assert_eq!(first.points, 0);

    session.cyclic_voltammetry(CyclicVoltammetry::default()).unwrap();
    let second = session.run_with(|_| {}, || {}).unwrap();
    assert_eq!(second.points, 1);
    assert_eq!(session.state(), SessionState::Ended);
}

#[test]
fn streaming_before_start_is_invalid() {
    let (mut session, _) = open(&[frame("MSG,RDY")], StreamPolicy::FailFast);
    assert!(matches!(
        session.next_event(),
        Err(DriverError::InvalidState(_))
    ));
}
