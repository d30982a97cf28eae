use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::DetectorConfig;

#[derive(Parser, Debug)]
#[command(name = "mitm-guard", version, disable_help_subcommand = true)]
/// Per-packet MITM detection on a live interface or a pcap replay.
pub struct Cmd {
    /// Set the log verbose.
    #[arg(
        short = 'v',
        long = "verbose",
        default_value = "info",
        value_name = "verbose",
        global = true,
        value_parser = ["debug", "info", "warn", "error"]
    )]
    pub verbose: String,

    /// YAML configuration file; command line flags override it.
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub sub_cmd: Option<SubCmd>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCmd {
    /// Capture and classify packets until interrupted (default)
    Run(RunArgs),

    /// List capture interfaces and the one that would be auto-selected
    Interfaces,

    /// Load the model artifacts and optionally score a labeled CSV sample
    Check(CheckArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Capture interface (auto-selected when omitted)
    #[arg(short = 'i', long = "iface")]
    pub interface: Option<String>,

    /// Capture filter, e.g. "tcp and not port 22"
    #[arg(short = 'f', long)]
    pub filter: Option<String>,

    /// Stop after this many packets
    #[arg(short = 'n', long = "count")]
    pub packet_limit: Option<u64>,

    #[arg(long)]
    pub model: Option<PathBuf>,

    #[arg(long)]
    pub scaler: Option<PathBuf>,

    /// Also append every result to this CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Read frames from a pcap file instead of a live interface
    #[arg(long)]
    pub replay: Option<PathBuf>,

    #[arg(long)]
    pub sink_capacity: Option<usize>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub sink_timeout: Option<Duration>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub read_timeout: Option<Duration>,

    /// Don't print per-packet lines to stdout
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

impl RunArgs {
    pub fn apply(&self, config: &mut DetectorConfig) {
        if let Some(interface) = &self.interface {
            config.interface = Some(interface.clone());
        }
        if let Some(filter) = &self.filter {
            config.filter = filter.clone();
        }
        if self.packet_limit.is_some() {
            config.packet_limit = self.packet_limit;
        }
        if let Some(model) = &self.model {
            config.model_path = model.clone();
        }
        if let Some(scaler) = &self.scaler {
            config.scaler_path = scaler.clone();
        }
        if self.csv.is_some() {
            config.csv_output = self.csv.clone();
        }
        if self.replay.is_some() {
            config.replay = self.replay.clone();
        }
        if let Some(capacity) = self.sink_capacity {
            config.sink_capacity = capacity;
        }
        if let Some(timeout) = self.sink_timeout {
            config.sink_timeout = timeout;
        }
        if let Some(timeout) = self.read_timeout {
            config.read_timeout = timeout;
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    #[arg(long)]
    pub model: Option<PathBuf>,

    #[arg(long)]
    pub scaler: Option<PathBuf>,

    /// CSV with the five feature columns and an optional Label column
    #[arg(long)]
    pub sample: Option<PathBuf>,

    /// Score at most this many rows
    #[arg(long)]
    pub limit: Option<usize>,
}
