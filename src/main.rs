use std::path::PathBuf;
use std::process::exit;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use _core::logging::init_rust_logging;
use _core::{
    CyclicVoltammetry, DifferentialPulseVoltammetry, Measurement, RunConfig, Session,
    SessionConfig, SquareWaveVoltammetry, StreamPolicy, VoltammetryPoint,
};

#[derive(Parser, Debug)]
#[command(name = "openafe", about = "Run voltammetry measurements on an OpenAFE device")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List available serial ports
    Ports,
    /// Run the measurement described in a .json or .toml file
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[command(flatten)]
        output: Output,
    },
    /// Cyclic voltammetry
    Cv {
        #[command(flatten)]
        conn: Connection,
        #[arg(long, default_value_t = 1000.0)]
        settling_time_ms: f64,
        #[arg(long, default_value_t = -500.0, allow_negative_numbers = true)]
        start_mv: f64,
        #[arg(long, default_value_t = 500.0, allow_negative_numbers = true)]
        end_mv: f64,
        #[arg(long, default_value_t = 200.0)]
        scan_rate: f64,
        #[arg(long, default_value_t = 5.0, allow_negative_numbers = true)]
        step_mv: f64,
        #[arg(long, default_value_t = 2)]
        cycles: u32,
    },
    /// Differential pulse voltammetry
    Dpv {
        #[command(flatten)]
        conn: Connection,
        #[arg(long, default_value_t = 1000.0)]
        settling_time_ms: f64,
        #[arg(long, default_value_t = -500.0, allow_negative_numbers = true)]
        start_mv: f64,
        #[arg(long, default_value_t = 500.0, allow_negative_numbers = true)]
        end_mv: f64,
        #[arg(long, default_value_t = 100.0, allow_negative_numbers = true)]
        pulse_mv: f64,
        #[arg(long, default_value_t = 5.0, allow_negative_numbers = true)]
        step_mv: f64,
        #[arg(long, default_value_t = 2.0)]
        pulse_width_ms: f64,
        #[arg(long, default_value_t = 20.0)]
        base_width_ms: f64,
        #[arg(long, default_value_t = 1.0)]
        sample_pulse_ms: f64,
        #[arg(long, default_value_t = 2.0)]
        sample_base_ms: f64,
    },
    /// Square wave voltammetry
    Swv {
        #[command(flatten)]
        conn: Connection,
        #[arg(long, default_value_t = 1000.0)]
        settling_time_ms: f64,
        #[arg(long, default_value_t = -500.0, allow_negative_numbers = true)]
        start_mv: f64,
        #[arg(long, default_value_t = 500.0, allow_negative_numbers = true)]
        end_mv: f64,
        #[arg(long, default_value_t = 200.0)]
        scan_rate: f64,
        #[arg(long, default_value_t = 100.0, allow_negative_numbers = true)]
        pulse_mv: f64,
        #[arg(long, default_value_t = 10.0)]
        frequency_hz: f64,
        #[arg(long, default_value_t = 1.0)]
        sample_pulse_ms: f64,
    },
}

#[derive(Args, Debug)]
struct Connection {
    /// Serial port (e.g. /dev/ttyACM0, COM14)
    #[arg(short, long)]
    port: String,
    /// Current range in uA
    #[arg(long, default_value_t = _core::config::DEFAULT_CURRENT_RANGE)]
    current_range: u32,
    /// Per-line read timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
    /// Skip corrupt frames instead of aborting the measurement
    #[arg(long)]
    skip_corrupt: bool,
    #[command(flatten)]
    output: Output,
}

#[derive(Args, Debug, Clone, Copy)]
struct Output {
    /// Print points as JSON lines instead of CSV
    #[arg(long)]
    json: bool,
}

impl Connection {
    fn into_run(self, measurement: Measurement) -> (RunConfig, Output) {
        let session = SessionConfig {
            port: self.port,
            read_timeout_ms: self.timeout_ms,
            stream_policy: if self.skip_corrupt {
                StreamPolicy::SkipCorrupt
            } else {
                StreamPolicy::FailFast
            },
        };
        let run = RunConfig {
            session,
            current_range: self.current_range,
            measurement,
        };
        (run, self.output)
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_rust_logging(cli.verbose);

    let (config, output) = match cli.command {
        Cmd::Ports => return list_ports(),
        Cmd::Run { config, output } => {
            let run = RunConfig::load_from_file(&config)
                .with_context(|| format!("Failed to load run config {}", config.display()))?;
            (run, output)
        }
        Cmd::Cv {
            conn,
            settling_time_ms,
            start_mv,
            end_mv,
            scan_rate,
            step_mv,
            cycles,
        } => conn.into_run(
            CyclicVoltammetry {
                settling_time_ms,
                start_potential_mv: start_mv,
                end_potential_mv: end_mv,
                scan_rate_mv_s: scan_rate,
                step_size_mv: step_mv,
                cycles,
            }
            .into(),
        ),
        Cmd::Dpv {
            conn,
            settling_time_ms,
            start_mv,
            end_mv,
            pulse_mv,
            step_mv,
            pulse_width_ms,
            base_width_ms,
            sample_pulse_ms,
            sample_base_ms,
        } => conn.into_run(
            DifferentialPulseVoltammetry {
                settling_time_ms,
                start_potential_mv: start_mv,
                end_potential_mv: end_mv,
                pulse_potential_mv: pulse_mv,
                step_potential_mv: step_mv,
                pulse_width_ms,
                base_width_ms,
                sample_period_pulse_ms: sample_pulse_ms,
                sample_period_base_ms: sample_base_ms,
            }
            .into(),
        ),
        Cmd::Swv {
            conn,
            settling_time_ms,
            start_mv,
            end_mv,
            scan_rate,
            pulse_mv,
            frequency_hz,
            sample_pulse_ms,
        } => conn.into_run(
            SquareWaveVoltammetry {
                settling_time_ms,
                start_potential_mv: start_mv,
                end_potential_mv: end_mv,
                scan_rate_mv_s: scan_rate,
                pulse_potential_mv: pulse_mv,
                pulse_frequency_hz: frequency_hz,
                sample_period_pulse_ms: sample_pulse_ms,
            }
            .into(),
        ),
    };

    measure(&config, output)
}

fn list_ports() -> Result<()> {
    let ports = _core::SerialTransport::available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("{}\t{:?}", port.port_name, port.port_type);
    }
    Ok(())
}

fn measure(config: &RunConfig, output: Output) -> Result<()> {
    let mut session = Session::connect(&config.session).with_context(|| {
        format!(
            "Could not initiate communication with the OpenAFE on {}",
            config.session.port
        )
    })?;

    if !session.configure_current_range(config.current_range)? {
        anyhow::bail!(
            "Device rejected current range {} uA",
            config.current_range
        );
    }

    let opcode = config.measurement.opcode();
    session
        .start_measurement(&config.measurement)
        .with_context(|| format!("Could not start {opcode} measurement"))?;
    info!("{} started: {}", opcode, config.measurement.payload());

    if !output.json {
        println!("voltage_mv,current_ua");
    }
    let summary = session
        .run_with(
            |p: VoltammetryPoint| print_point(p, output),
            || eprintln!("INFO: Voltammetry finished!"),
        )
        .with_context(|| format!("{opcode} measurement aborted"))?;

    info!(
        "received {} points ({} corrupt frames skipped)",
        summary.points, summary.skipped_frames
    );
    Ok(())
}

fn print_point(point: VoltammetryPoint, output: Output) {
    if output.json {
        match serde_json::to_string(&point) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("failed to serialize point: {e}"),
        }
    } else {
        println!("{},{}", point.voltage, point.current);
    }
}
