//! Log setup: `env_logger` for the binary, a bridge into Python's `logging`
//! for the extension module.

use std::sync::Once;

use env_logger::Env;
use log::LevelFilter;

static RUST_LOG_ONCE: Once = Once::new();

/// Level from `OPENAFE_LOG`, then `RUST_LOG`, then `info`.
pub fn env_level() -> LevelFilter {
    std::env::var("OPENAFE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .as_deref()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}

pub fn parse_level(input: Option<&str>) -> Option<LevelFilter> {
    input.and_then(|s| s.parse::<LevelFilter>().ok())
}

/// Step `level` up `by` notches, saturating at `Trace`.
pub fn raise_level(level: LevelFilter, by: u8) -> LevelFilter {
    (0..by).fold(level, |level, _| match level {
        LevelFilter::Off => LevelFilter::Error,
        LevelFilter::Error => LevelFilter::Warn,
        LevelFilter::Warn => LevelFilter::Info,
        LevelFilter::Info => LevelFilter::Debug,
        LevelFilter::Debug | LevelFilter::Trace => LevelFilter::Trace,
    })
}

/// Initialize logging for the binary (stderr formatter) based on `OPENAFE_LOG`/`RUST_LOG`.
///
/// `verbosity` raises the level by one step per count (as given by `-v` flags).
pub fn init_rust_logging(verbosity: u8) {
    let level = raise_level(env_level(), verbosity);
    RUST_LOG_ONCE.call_once(|| {
        let env = Env::default().default_filter_or(level.as_str().to_lowercase());
        env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(true)
            .init();
    });
}

#[cfg(feature = "python")]
pub use python_bridge::{init_python_logging, set_python_log_level, set_python_log_level_str};

#[cfg(feature = "python")]
mod python_bridge {
    use std::collections::HashMap;
    use std::sync::{Mutex, Once};

    use log::{Level, LevelFilter, Log, Metadata, Record};
    use once_cell::sync::OnceCell;
    use pyo3::prelude::*;
    use pyo3::types::{PyAny, PyModule};

    use super::{env_level, parse_level};

    static PY_LOG_ONCE: Once = Once::new();
    static PY_LOGGER: OnceCell<&'static PyLogger> = OnceCell::new();

    /// Forwards `log` records to `logging.getLogger(<target>)`.
    struct PyLogger {
        top_filter: Mutex<LevelFilter>,
        logging_mod: Py<PyModule>,
        loggers: Mutex<HashMap<String, Py<PyAny>>>,
    }

    impl PyLogger {
        fn new(py: Python<'_>, top_filter: LevelFilter) -> PyResult<Self> {
            let logging = py.import("logging")?;
            Ok(Self {
                top_filter: Mutex::new(top_filter),
                logging_mod: logging.into(),
                loggers: Mutex::new(HashMap::new()),
            })
        }

        fn python_level(level: Level) -> u32 {
            match level {
                Level::Error => 40,
                Level::Warn => 30,
                Level::Info => 20,
                Level::Debug => 10,
                Level::Trace => 5,
            }
        }

        fn top(&self) -> LevelFilter {
            self.top_filter
                .lock()
                .map(|lf| *lf)
                .unwrap_or(LevelFilter::Off)
        }

        fn logger_for(&self, py: Python<'_>, target: &str) -> PyResult<Py<PyAny>> {
            let Ok(mut loggers) = self.loggers.lock() else {
                return self.fetch_logger(py, target);
            };
            if let Some(logger) = loggers.get(target) {
                return Ok(logger.clone_ref(py));
            }
            let logger = self.fetch_logger(py, target)?;
            loggers.insert(target.to_string(), logger.clone_ref(py));
            Ok(logger)
        }

        fn fetch_logger(&self, py: Python<'_>, target: &str) -> PyResult<Py<PyAny>> {
            let logger = self
                .logging_mod
                .bind(py)
                .getattr("getLogger")?
                .call1((target,))?;
            Ok(logger.unbind())
        }
    }

    impl Log for PyLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level().to_level_filter() <= self.top()
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            let target = record.target().replace("::", ".");
            let level = Self::python_level(record.level());
            let message = record.args().to_string();

            Python::attach(|py| {
                let result = self
                    .logger_for(py, &target)
                    .and_then(|logger| logger.bind(py).call_method1("log", (level, message)));
                if let Err(e) = result {
                    e.restore(py);
                }
            });
        }

        fn flush(&self) {}
    }

    /// Install the bridge so driver logs flow into Python's `logging`.
    /// Safe to call multiple times; only the first call installs it.
    pub fn init_python_logging(py: Python<'_>) -> PyResult<()> {
        let level = env_level();
        PY_LOG_ONCE.call_once(|| match PyLogger::new(py, level) {
            Ok(logger) => {
                let leaked: &'static PyLogger = Box::leak(Box::new(logger));
                if log::set_logger(leaked).is_ok() {
                    log::set_max_level(level);
                    let _ = PY_LOGGER.set(leaked);
                }
            }
            Err(e) => e.restore(py),
        });
        Ok(())
    }

    pub fn set_python_log_level(py: Python<'_>, level: LevelFilter) -> PyResult<()> {
        init_python_logging(py)?;
        if let Some(logger) = PY_LOGGER.get() {
            if let Ok(mut lf) = logger.top_filter.lock() {
                *lf = level;
            }
            if let Ok(mut loggers) = logger.loggers.lock() {
                loggers.clear();
            }
        }
        log::set_max_level(level);
        Ok(())
    }

    /// Parse a level name (falling back to the environment) and apply it.
    pub fn set_python_log_level_str(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
        let lvl = parse_level(level).unwrap_or(env_level());
        set_python_log_level(py, lvl)
    }
}
