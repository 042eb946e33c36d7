use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::{LevelFilter, info};
use samfw_core::adb::AdbBackend;
use samfw_core::config::Config;
use samfw_core::metadata::FotaClient;
use samfw_core::pipeline::{Outcome, Pipeline};

mod console;
mod logging;
mod output;

use console::Console;

/// CLI-compatible ADB backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AdbBackendArg {
    /// Built-in ADB implementation (no external dependencies)
    Builtin,
    /// Use system-installed adb binary
    System,
}

impl From<AdbBackendArg> for AdbBackend {
    fn from(arg: AdbBackendArg) -> Self {
        match arg {
            AdbBackendArg::Builtin => AdbBackend::Builtin,
            AdbBackendArg::System => AdbBackend::System,
        }
    }
}

#[derive(Parser)]
#[command(name = "samfw")]
#[command(about = "Download and unpack the latest Samsung firmware for an attached device")]
#[command(
    long_about = "Download and unpack the latest Samsung firmware for an attached device.\n\n\
    Files land in <root>/firmware/<model>/. Don't run two instances against the same root."
)]
#[command(version)]
pub struct Cli {
    /// ADB backend [default: from config, builtin if unset]
    #[arg(short = 'B', long = "backend", value_enum)]
    backend: Option<AdbBackendArg>,

    /// Device serial number (skips the device menu)
    #[arg(short, long)]
    device: Option<String>,

    /// Directory under which `firmware/<model>/` is created
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Config file [default: <config dir>/samfw/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// More console logging (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    const fn console_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        }
    }
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    if let Some(log_file) = logging::setup_logger(cli.console_level())? {
        info!("Logging to {}", log_file.display());
    }

    let mut config = match cli.config.clone().or_else(Config::default_path) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    if let Some(backend) = cli.backend {
        config.general.backend = backend.into();
    }
    if let Some(root) = cli.root {
        config.general.work_root = root;
    }
    info!(
        "ADB backend: {}, work root: {}",
        config.general.backend,
        config.general.work_root.display()
    );

    let pipeline = Pipeline {
        bridge: config.general.backend,
        versions: FotaClient::new(&config.metadata.base_url, config.metadata.timeout()),
        downloader: config.downloader,
        tools: config.tools,
        work_root: config.general.work_root,
    };

    match pipeline.run(&mut Console::new(cli.device)) {
        Outcome::Success(report) => {
            output::step("Done.");
            output::field("Reference assets", report.extraction.pristine.display());
            if report.extraction.pristine_kept {
                output::line("    (kept from an earlier run)");
            }
            output::field("Customizable assets", report.extraction.customizable.display());
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Failed { stage, error } => {
            output::failure(format_args!("{stage} failed: {error}"));
            Ok(ExitCode::FAILURE)
        }
    }
}
