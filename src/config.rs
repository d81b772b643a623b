use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

use crate::address::valid_path;
use crate::model::DEFAULT_IBI_BUFFER_SIZE;
use crate::sensor::DEFAULT_SCAN_DURATION;


#[derive(Debug, Clone, Parser)]
#[command(name = "hrconnect", version, about = "Scan for and connect to a BLE heart rate / ECG sensor")]
pub struct Config {
    /// Seconds to listen for advertising sensors per scan
    #[arg(long, default_value_t = DEFAULT_SCAN_DURATION.as_secs())]
    pub scan_secs: u64,

    /// Number of inter-beat intervals kept in memory
    #[arg(long, default_value_t = DEFAULT_IBI_BUFFER_SIZE)]
    pub ibi_buffer_size: usize,

    /// Use simulated sensors instead of the Bluetooth adapter
    #[arg(long)]
    pub demo: bool,

    /// Also write the diagnostic log to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.scan_secs == 0 {
            bail!("--scan-secs must be at least 1");
        }
        if self.ibi_buffer_size == 0 {
            bail!("--ibi-buffer-size must be at least 1");
        }
        if let Some(path) = &self.log_file {
            if !valid_path(&path.to_string_lossy()) {
                bail!("cannot write log file {}", path.display());
            }
        }
        Ok(())
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }
}
