use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use sml_gridmeter::{
    init_logger, log_error, log_info, log_warn, AppConfig, CrcAlgorithm, JsonLinesPublisher,
    MeterReader, PollingLoop, SerialByteSource, SmlError,
};

#[derive(Parser)]
#[command(name = "sml-gridmeter")]
#[command(about = "Reads an SML energy meter over an optical head and publishes grid meter values")]
struct Cli {
    /// Serial device of the optical head (overrides the config file)
    port: Option<String>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    baudrate: Option<u32>,

    /// CRC variant of the transport checksum
    #[arg(long, value_parser = ["x25", "kermit"])]
    crc: Option<String>,

    /// Write JSON lines to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Skip reading the meter identity before polling
    #[arg(long)]
    no_identify: bool,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    if let Some(port) = &cli.port {
        config.port = port.clone();
    }
    if let Some(baudrate) = cli.baudrate {
        config.baud_rate = baudrate;
    }
    if let Some(crc) = cli.crc.as_deref() {
        config.crc = match crc {
            "kermit" => CrcAlgorithm::Kermit,
            _ => CrcAlgorithm::X25,
        };
    }
    if cli.output.is_some() {
        config.output = cli.output.clone();
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file.clone();
    }
    if cli.no_identify {
        config.identify_on_startup = false;
    }
    match cli.verbose {
        0 => {}
        1 => config.log_level = "debug".to_string(),
        _ => config.log_level = "trace".to_string(),
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn open_output(config: &AppConfig) -> Result<Box<dyn Write>, SmlError> {
    match &config.output {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| SmlError::Config(format!("output {}: {e}", path.display())))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

async fn run(config: AppConfig) -> Result<std::convert::Infallible, SmlError> {
    log_info(&format!("Starting sml-gridmeter on {}", config.port));

    let source = SerialByteSource::open(&config.port, &config.serial())
        .map_err(|e| SmlError::Startup(e.to_string()))?;
    let mut reader =
        MeterReader::new(source, config.crc).with_cycle_deadline(config.cycle_deadline());

    if config.identify_on_startup {
        let identity = reader.identify().await?;
        log_info(&format!("Meter: {identity}"));
    } else {
        log_warn("Skipping meter identification");
    }

    let publisher = JsonLinesPublisher::new(open_output(&config)?);
    let mut polling = PollingLoop::new(reader, publisher, config.derivation(), config.polling());
    polling.run().await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("sml-gridmeter: {e:#}");
            return ExitCode::from(SmlError::Config(String::new()).exit_code());
        }
    };

    if let Err(e) = init_logger(&config.log_level, config.log_file.as_deref()) {
        eprintln!("sml-gridmeter: {e}");
        return ExitCode::from(e.exit_code());
    }

    match run(config).await {
        Ok(never) => match never {},
        Err(e) => {
            log_error(&format!("Terminating: {e}"));
            ExitCode::from(e.exit_code())
        }
    }
}
