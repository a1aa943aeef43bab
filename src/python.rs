//! Python bindings.
//!
//! Mirrors the `OpenAFE` Python class API (constructor opens the port and
//! waits for ready, one method per technique, a blocking `receive_points`
//! with optional callbacks) on top of [`Session`].

use pyo3::exceptions::{PyConnectionError, PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyAny, PyDict};

use crate::checksum::compute_checksum;
use crate::command::{CyclicVoltammetry, DifferentialPulseVoltammetry, SquareWaveVoltammetry};
use crate::config::SessionConfig;
use crate::errors::DriverError;
use crate::frame::{decode_frame, encode_frame};
use crate::receiver::{StreamEvent, StreamPolicy, VoltammetryPoint};
use crate::session::Session;
use crate::transport::{SerialTransport, BAUD_RATE};

fn to_py_err(e: DriverError) -> PyErr {
    match e {
        e if e.is_connectivity() => PyConnectionError::new_err(e.to_string()),
        e @ (DriverError::Frame(_) | DriverError::MalformedPoint(_)) => {
            PyIOError::new_err(e.to_string())
        }
        e @ DriverError::Config(_) => PyValueError::new_err(e.to_string()),
        e => PyRuntimeError::new_err(e.to_string()),
    }
}

/// One voltammetry sample.
///
/// Attributes:
///     voltage: Applied potential in millivolts.
///     current: Measured current in microamps.
#[pyclass(name = "Point", frozen, eq)]
#[derive(Clone, PartialEq)]
struct PyPoint {
    #[pyo3(get)]
    voltage: f64,
    #[pyo3(get)]
    current: f64,
}

#[pymethods]
impl PyPoint {
    #[new]
    fn new(voltage: f64, current: f64) -> Self {
        PyPoint { voltage, current }
    }

    fn __repr__(&self) -> String {
        format!("Point(voltage={}, current={})", self.voltage, self.current)
    }

    fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict = PyDict::new(py);
        dict.set_item("voltage", self.voltage)?;
        dict.set_item("current", self.current)?;
        Ok(dict)
    }
}

impl From<VoltammetryPoint> for PyPoint {
    fn from(p: VoltammetryPoint) -> Self {
        PyPoint {
            voltage: p.voltage,
            current: p.current,
        }
    }
}

/// OpenAFE device driver.
///
/// Example:
///     >>> afe = OpenAFE("/dev/ttyACM0")
///     >>> afe.set_current_range(200)
///     >>> afe.cyclic_voltammetry(1000, -500, 500, 200, 5, 2)
///     >>> afe.receive_points(lambda v, i: print(v, i), lambda: print("done"))
#[pyclass(name = "OpenAFE", unsendable)]
struct PyOpenAfe {
    inner: Session<SerialTransport>,
}

#[pymethods]
impl PyOpenAfe {
    /// Open the serial port and wait for the device to report ready.
    ///
    /// Args:
    ///     port: Serial port path (e.g. "/dev/ttyACM0" or "COM14").
    ///     timeout_ms: Deadline for each line read. Default: 10000.
    ///     skip_corrupt: Drop corrupt frames during a measurement instead of aborting.
    ///
    /// Raises:
    ///     ConnectionError: If the port cannot be opened or read.
    ///     IOError: If the first frame is corrupt (bad checksum or framing).
    ///     RuntimeError: If the device answers anything other than MSG,RDY.
    #[new]
    #[pyo3(signature = (port, timeout_ms=None, skip_corrupt=false))]
    fn new(port: &str, timeout_ms: Option<u64>, skip_corrupt: bool) -> PyResult<Self> {
        let mut config = SessionConfig::new(port);
        if let Some(timeout_ms) = timeout_ms {
            config.read_timeout_ms = timeout_ms;
        }
        if skip_corrupt {
            config.stream_policy = StreamPolicy::SkipCorrupt;
        }
        Session::connect(&config)
            .map(|inner| PyOpenAfe { inner })
            .map_err(to_py_err)
    }

    /// Select the current range in microamps.
    ///
    /// Returns:
    ///     True if the device accepted the range, False if it answered ERR.
    fn set_current_range(&mut self, current_range: u32) -> PyResult<bool> {
        self.inner
            .configure_current_range(current_range)
            .map_err(to_py_err)
    }

    /// Start a cyclic voltammetry (times in ms, potentials in mV, scan rate in mV/s).
    #[pyo3(signature = (
        settling_time=1000.0,
        start_potential=-500.0,
        end_potential=500.0,
        scan_rate=200.0,
        step_size=5.0,
        cycles=2
    ))]
    fn cyclic_voltammetry(
        &mut self,
        settling_time: f64,
        start_potential: f64,
        end_potential: f64,
        scan_rate: f64,
        step_size: f64,
        cycles: u32,
    ) -> PyResult<()> {
        self.inner
            .cyclic_voltammetry(CyclicVoltammetry {
                settling_time_ms: settling_time,
                start_potential_mv: start_potential,
                end_potential_mv: end_potential,
                scan_rate_mv_s: scan_rate,
                step_size_mv: step_size,
                cycles,
            })
            .map_err(to_py_err)
    }

    /// Start a differential pulse voltammetry.
    #[pyo3(signature = (
        settling_time=1000.0,
        start_potential=-500.0,
        end_potential=500.0,
        pulse_potential=100.0,
        step_potential=5.0,
        pulse_width=2.0,
        base_width=20.0,
        sample_period_pulse=1.0,
        sample_period_base=2.0
    ))]
    #[allow(clippy::too_many_arguments)]
    fn differential_pulse_voltammetry(
        &mut self,
        settling_time: f64,
        start_potential: f64,
        end_potential: f64,
        pulse_potential: f64,
        step_potential: f64,
        pulse_width: f64,
        base_width: f64,
        sample_period_pulse: f64,
        sample_period_base: f64,
    ) -> PyResult<()> {
        self.inner
            .differential_pulse_voltammetry(DifferentialPulseVoltammetry {
                settling_time_ms: settling_time,
                start_potential_mv: start_potential,
                end_potential_mv: end_potential,
                pulse_potential_mv: pulse_potential,
                step_potential_mv: step_potential,
                pulse_width_ms: pulse_width,
                base_width_ms: base_width,
                sample_period_pulse_ms: sample_period_pulse,
                sample_period_base_ms: sample_period_base,
            })
            .map_err(to_py_err)
    }

    /// Start a square wave voltammetry (pulse frequency in Hz).
    #[pyo3(signature = (
        settling_time=1000.0,
        start_potential=-500.0,
        end_potential=500.0,
        scan_rate=200.0,
        pulse_potential=100.0,
        pulse_frequency=10.0,
        sample_period_pulse=1.0
    ))]
    #[allow(clippy::too_many_arguments)]
    fn square_wave_voltammetry(
        &mut self,
        settling_time: f64,
        start_potential: f64,
        end_potential: f64,
        scan_rate: f64,
        pulse_potential: f64,
        pulse_frequency: f64,
        sample_period_pulse: f64,
    ) -> PyResult<()> {
        self.inner
            .square_wave_voltammetry(SquareWaveVoltammetry {
                settling_time_ms: settling_time,
                start_potential_mv: start_potential,
                end_potential_mv: end_potential,
                scan_rate_mv_s: scan_rate,
                pulse_potential_mv: pulse_potential,
                pulse_frequency_hz: pulse_frequency,
                sample_period_pulse_ms: sample_period_pulse,
            })
            .map_err(to_py_err)
    }

    /// Block until the running measurement ends.
    ///
    /// Args:
    ///     on_point: Called as on_point(voltage, current) for every point.
    ///     on_end: Called once when the device reports the end.
    ///
    /// Returns:
    ///     Number of points received.
    ///
    /// An exception raised by a callback stops the loop and propagates. The
    /// unread rest of the measurement leaves the session faulted (state
    /// "Faulted"); open a new OpenAFE to continue.
    #[pyo3(signature = (on_point=None, on_end=None))]
    fn receive_points(
        &mut self,
        on_point: Option<Bound<'_, PyAny>>,
        on_end: Option<Bound<'_, PyAny>>,
    ) -> PyResult<usize> {
        let mut points = 0usize;
        while let Some(event) = self.inner.next_event().map_err(to_py_err)? {
            let delivered = match event {
                StreamEvent::Point(p) => {
                    points += 1;
                    match &on_point {
                        Some(cb) => cb.call1((p.voltage, p.current)).map(drop),
                        None => Ok(()),
                    }
                }
                StreamEvent::End => {
                    let done = match &on_end {
                        Some(cb) => cb.call0().map(drop),
                        None => Ok(()),
                    };
                    done?;
                    break;
                }
            };
            if let Err(e) = delivered {
                self.inner.abort("point callback raised");
                return Err(e);
            }
        }
        Ok(points)
    }

    /// Collect every point of the running measurement into a list.
    fn read_points(&mut self) -> PyResult<Vec<PyPoint>> {
        let mut points = Vec::new();
        for event in self.inner.events() {
            if let StreamEvent::Point(p) = event.map_err(to_py_err)? {
                points.push(PyPoint::from(p));
            }
        }
        Ok(points)
    }

    /// Current session state name (e.g. "Idle", "Streaming", "Faulted").
    #[getter]
    fn state(&self) -> String {
        format!("{:?}", self.inner.state())
    }

    fn __repr__(&self) -> String {
        format!("OpenAFE(state={:?})", self.inner.state())
    }
}

/// XOR checksum of a payload.
#[pyfunction]
fn checksum(payload: &str) -> u8 {
    compute_checksum(payload.as_bytes())
}

/// Full wire frame for a payload, CRLF included.
#[pyfunction(name = "encode_frame")]
fn py_encode_frame(payload: &str) -> String {
    String::from_utf8_lossy(&encode_frame(payload)).into_owned()
}

/// Validate a received line and return its payload.
#[pyfunction(name = "decode_frame")]
fn py_decode_frame(line: &str) -> PyResult<String> {
    decode_frame(line.as_bytes()).map_err(|e| to_py_err(e.into()))
}

/// Set the minimum level of driver logs forwarded to Python's `logging`.
#[pyfunction]
#[pyo3(signature = (level=None))]
fn set_log_level(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
    crate::logging::set_python_log_level_str(py, level)
}

/// The Python module definition
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    crate::logging::init_python_logging(m.py())?;

    m.add_class::<PyOpenAfe>()?;
    m.add_class::<PyPoint>()?;
    m.add_function(wrap_pyfunction!(checksum, m)?)?;
    m.add_function(wrap_pyfunction!(py_encode_frame, m)?)?;
    m.add_function(wrap_pyfunction!(py_decode_frame, m)?)?;
    m.add_function(wrap_pyfunction!(set_log_level, m)?)?;

    m.add("BAUD_RATE", BAUD_RATE)?;

    Ok(())
}
