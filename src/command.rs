//! Payload builders for the instrument's ASCII commands.
//!
//! Units are carried by field name only (ms, mV, mV/s, Hz, µA). Nothing here
//! range-checks a value: the device answers `ERR,...` for anything it cannot
//! generate.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Opcodes
// ============================================================================

/// Three-letter operation code that starts a measurement and prefixes its points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Opcode {
    /// Cyclic voltammetry
    Cvw,
    /// Differential pulse voltammetry
    Dpv,
    /// Square wave voltammetry
    Swv,
}

impl Opcode {
    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::Cvw => "CVW",
            Opcode::Dpv => "DPV",
            Opcode::Swv => "SWV",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Measurement parameters
// ============================================================================

/// Cyclic voltammetry sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CyclicVoltammetry {
    pub settling_time_ms: f64,
    pub start_potential_mv: f64,
    pub end_potential_mv: f64,
    pub scan_rate_mv_s: f64,
    /// Potential increment per step, may be negative.
    pub step_size_mv: f64,
    pub cycles: u32,
}

impl Default for CyclicVoltammetry {
    fn default() -> Self {
        Self {
            settling_time_ms: 1000.0,
            start_potential_mv: -500.0,
            end_potential_mv: 500.0,
            scan_rate_mv_s: 200.0,
            step_size_mv: 5.0,
            cycles: 2,
        }
    }
}

impl CyclicVoltammetry {
    /// `CVW,<settling>,<start>,<end>,<scan rate>,<step>,<cycles>`
    pub fn payload(&self) -> String {
        join(
            Opcode::Cvw,
            &[
                fmt_num(self.settling_time_ms),
                fmt_num(self.start_potential_mv),
                fmt_num(self.end_potential_mv),
                fmt_num(self.scan_rate_mv_s),
                fmt_num(self.step_size_mv),
                self.cycles.to_string(),
            ],
        )
    }
}

/// Differential pulse voltammetry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentialPulseVoltammetry {
    pub settling_time_ms: f64,
    pub start_potential_mv: f64,
    pub end_potential_mv: f64,
    pub pulse_potential_mv: f64,
    pub step_potential_mv: f64,
    pub pulse_width_ms: f64,
    pub base_width_ms: f64,
    pub sample_period_pulse_ms: f64,
    pub sample_period_base_ms: f64,
}

impl Default for DifferentialPulseVoltammetry {
    fn default() -> Self {
        Self {
            settling_time_ms: 1000.0,
            start_potential_mv: -500.0,
            end_potential_mv: 500.0,
            pulse_potential_mv: 100.0,
            step_potential_mv: 5.0,
            pulse_width_ms: 2.0,
            base_width_ms: 20.0,
            sample_period_pulse_ms: 1.0,
            sample_period_base_ms: 2.0,
        }
    }
}

impl DifferentialPulseVoltammetry {
    pub fn payload(&self) -> String {
        join(
            Opcode::Dpv,
            &[
                fmt_num(self.settling_time_ms),
                fmt_num(self.start_potential_mv),
                fmt_num(self.end_potential_mv),
                fmt_num(self.pulse_potential_mv),
                fmt_num(self.step_potential_mv),
                fmt_num(self.pulse_width_ms),
                fmt_num(self.base_width_ms),
                fmt_num(self.sample_period_pulse_ms),
                fmt_num(self.sample_period_base_ms),
            ],
        )
    }
}

/// Square wave voltammetry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SquareWaveVoltammetry {
    pub settling_time_ms: f64,
    pub start_potential_mv: f64,
    pub end_potential_mv: f64,
    pub scan_rate_mv_s: f64,
    pub pulse_potential_mv: f64,
    pub pulse_frequency_hz: f64,
    /// How long before the pulse ends the sample is taken.
    pub sample_period_pulse_ms: f64,
}

impl Default for SquareWaveVoltammetry {
    fn default() -> Self {
        Self {
            settling_time_ms: 1000.0,
            start_potential_mv: -500.0,
            end_potential_mv: 500.0,
            scan_rate_mv_s: 200.0,
            pulse_potential_mv: 100.0,
            pulse_frequency_hz: 10.0,
            sample_period_pulse_ms: 1.0,
        }
    }
}

impl SquareWaveVoltammetry {
    pub fn payload(&self) -> String {
        join(
            Opcode::Swv,
            &[
                fmt_num(self.settling_time_ms),
                fmt_num(self.start_potential_mv),
                fmt_num(self.end_potential_mv),
                fmt_num(self.scan_rate_mv_s),
                fmt_num(self.pulse_potential_mv),
                fmt_num(self.pulse_frequency_hz),
                fmt_num(self.sample_period_pulse_ms),
            ],
        )
    }
}

/// Any measurement the instrument can stream points for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measurement {
    Cyclic(CyclicVoltammetry),
    DifferentialPulse(DifferentialPulseVoltammetry),
    SquareWave(SquareWaveVoltammetry),
}

impl Measurement {
    pub fn opcode(&self) -> Opcode {
        match self {
            Measurement::Cyclic(_) => Opcode::Cvw,
            Measurement::DifferentialPulse(_) => Opcode::Dpv,
            Measurement::SquareWave(_) => Opcode::Swv,
        }
    }

    pub fn payload(&self) -> String {
        match self {
            Measurement::Cyclic(p) => p.payload(),
            Measurement::DifferentialPulse(p) => p.payload(),
            Measurement::SquareWave(p) => p.payload(),
        }
    }
}

impl From<CyclicVoltammetry> for Measurement {
    fn from(p: CyclicVoltammetry) -> Self {
        Measurement::Cyclic(p)
    }
}

impl From<DifferentialPulseVoltammetry> for Measurement {
    fn from(p: DifferentialPulseVoltammetry) -> Self {
        Measurement::DifferentialPulse(p)
    }
}

impl From<SquareWaveVoltammetry> for Measurement {
    fn from(p: SquareWaveVoltammetry) -> Self {
        Measurement::SquareWave(p)
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Everything the host can send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// `CMD,CUR,<range>`, range in µA.
    SetCurrentRange(u32),
    Start(Measurement),
}

impl Command {
    pub fn payload(&self) -> String {
        match self {
            Command::SetCurrentRange(range) => format!("CMD,CUR,{range}"),
            Command::Start(m) => m.payload(),
        }
    }
}

fn join(opcode: Opcode, fields: &[String]) -> String {
    let mut out = String::from(opcode.as_str());
    for field in fields {
        out.push(',');
        out.push_str(field);
    }
    out
}

/// Integral values print without a fractional part (`1000.0` -> `1000`).
fn fmt_num(value: f64) -> String {
    format!("{value}")
}
