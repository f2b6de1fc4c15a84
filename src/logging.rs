use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Local;
use env_logger::{Builder, Target};
use log::log;

use crate::error::{Error, Result};

pub type LevelFilter = log::LevelFilter;
pub type Level = log::Level;

/// Where and how verbosely to log.
///
/// # Fields
///
/// * `log_file` - File receiving a copy of every record.
/// * `log_level` - Maximum level to emit.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_file: String,
    pub log_level: LevelFilter,
}
impl LogConfig {
    pub fn new(log_file: String, log_level: LevelFilter) -> Self {
        Self { log_file, log_level }
    }
}

pub struct Logger;

impl Logger {
    /// Install the global logger, writing to stdout and to `config.log_file`.
    ///
    /// # Returns
    ///
    /// * `Ok(Logger)` - The logger handle.
    /// * `Err(Error::Io)` - The log file or its directory could not be created.
    /// * `Err(Error::Logger)` - Another global logger is already installed.
    pub fn init(config: LogConfig) -> Result<Self> {
        if let Some(parent) = Path::new(&config.log_file).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file)?;

        let multi_writer = MultiWriter {
            writers: vec![
                Box::new(std::io::stdout()),
                Box::new(file),
            ],
        };

        Builder::new()
            .format(|buf, record| {
                writeln!(buf, "{} [{}] {} {} - {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.module_path().unwrap_or("unknown"),
                    record.file().unwrap_or("unknown"),
                    record.args())
            })
            .filter(None, config.log_level)
            .target(Target::Pipe(Box::new(multi_writer)))
            .try_init()
            .map_err(|e| Error::Logger(e.to_string()))?;

        Ok(Self)
    }

    pub fn log_event(
        &self,
        level: Level,
        event: &str,
        details: Option<&str>,
        error: Option<&dyn std::error::Error>,
    ) {
        match (details, error) {
            (Some(d), Some(e)) => log!(level, "{}: {} - {}", event, d, e),
            (Some(d), None) => log!(level, "{}: {}", event, d),
            (None, Some(e)) => log!(level, "{} - {}", event, e),
            (None, None) => log!(level, "{}", event),
        }
    }
}

struct MultiWriter {
    writers: Vec<Box<dyn Write + Send + Sync>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for writer in &mut self.writers {
            writer.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        for writer in &mut self.writers {
            writer.flush()?;
        }
        Ok(())
    }
}
