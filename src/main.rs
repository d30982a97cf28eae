use std::process::ExitCode;

use clap::Parser;
use env_logger::{Builder, Env};
use log::{error, info, warn};

use mitm_guard::capture::live::LiveCaptureConfig;
use mitm_guard::capture::{CaptureBackend, PnetBackend, ReplayBackend};
use mitm_guard::check;
use mitm_guard::cli::{CheckArgs, Cmd, RunArgs, SubCmd};
use mitm_guard::config::DetectorConfig;
use mitm_guard::error::{ConfigError, PipelineError};
use mitm_guard::interface;
use mitm_guard::model;
use mitm_guard::pipeline::Pipeline;
use mitm_guard::sink::{ConsoleSink, CsvSink, ResultSink};

fn main() -> ExitCode {
    let cmd = Cmd::parse();
    Builder::from_env(Env::default().default_filter_or(cmd.verbose.as_str())).init();

    let result = load_config(&cmd).and_then(|config| match cmd.sub_cmd {
        None => run(config, &RunArgs::default()),
        Some(SubCmd::Run(ref args)) => run(config, args),
        Some(SubCmd::Interfaces) => list_interfaces(&config),
        Some(SubCmd::Check(ref args)) => check_artifacts(config, args),
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("mitm-guard: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn load_config(cmd: &Cmd) -> Result<DetectorConfig, PipelineError> {
    match &cmd.config {
        Some(path) => {
            let config = DetectorConfig::load_config_path(path)?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        }
        None => Ok(DetectorConfig::default()),
    }
}

fn live_backend(config: &DetectorConfig) -> PnetBackend {
    PnetBackend::new(LiveCaptureConfig {
        read_timeout: config.read_timeout,
        promiscuous: config.promiscuous,
        ..Default::default()
    })
}

fn run(mut config: DetectorConfig, args: &RunArgs) -> Result<(), PipelineError> {
    args.apply(&mut config);
    config.validate()?;

    // Output files are only touched once the model is known to be usable.
    let artifact = model::load(&config.model_path, &config.scaler_path)?;
    info!("Model loaded successfully");

    let mut sinks: Vec<Box<dyn ResultSink>> = Vec::new();
    if !args.quiet {
        sinks.push(Box::new(ConsoleSink::stdout()));
    }
    if let Some(path) = &config.csv_output {
        let sink = CsvSink::append(path).map_err(|source| ConfigError::Output {
            path: path.clone(),
            source,
        })?;
        info!("Writing results to {}", path.display());
        sinks.push(Box::new(sink));
    }
    if sinks.is_empty() {
        warn!("No result sinks enabled; only the run summary will be reported");
    }

    let backend: Box<dyn CaptureBackend> = match &config.replay {
        Some(path) => Box::new(ReplayBackend::pcap(path.clone())),
        None => Box::new(live_backend(&config)),
    };

    let mut pipeline = Pipeline::new(config, backend).with_artifact(artifact);
    let stop = pipeline.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Ctrl+C received, stopping capture...");
        stop.stop();
    }) {
        warn!("Cannot install Ctrl+C handler: {}", e);
    }

    let summary = pipeline.run(sinks)?;
    println!("{}", summary);
    Ok(())
}

fn list_interfaces(config: &DetectorConfig) -> Result<(), PipelineError> {
    let interfaces = live_backend(config)
        .interfaces()
        .map_err(PipelineError::CaptureStart)?;
    if interfaces.is_empty() {
        return Err(PipelineError::NoInterfaceFound { available: vec![] });
    }

    let selected = interface::resolve(config.interface.as_deref(), &interfaces);
    println!("Available Network Interfaces:");
    for (i, iface) in interfaces.iter().enumerate() {
        let marker = if Some(iface.name.as_str()) == selected { "*" } else { " " };
        let mut notes = Vec::new();
        if iface.is_loopback {
            notes.push("loopback");
        }
        if !iface.is_up {
            notes.push("down");
        }
        if interface::is_ethernet_like(iface) {
            notes.push("ethernet");
        }
        println!(
            "{} [{}] {} {} {}",
            marker,
            i,
            iface.name,
            if notes.is_empty() { String::new() } else { format!("({})", notes.join(", ")) },
            iface.description
        );
    }
    Ok(())
}

fn check_artifacts(mut config: DetectorConfig, args: &CheckArgs) -> Result<(), PipelineError> {
    if let Some(model) = &args.model {
        config.model_path = model.clone();
    }
    if let Some(scaler) = &args.scaler {
        config.scaler_path = scaler.clone();
    }
    config.validate()?;

    let artifact = model::load(&config.model_path, &config.scaler_path)?;
    println!(
        "Model OK: {} + {} ({} features)",
        config.model_path.display(),
        config.scaler_path.display(),
        artifact.scaler().n_features()
    );

    if let Some(sample) = &args.sample {
        let report = check::check_sample(&artifact, sample, args.limit)?;
        println!(
            "{} rows: {} malicious, {} normal, {} unreadable",
            report.rows, report.malicious, report.normal, report.skipped
        );
        if let Some(agreement) = report.agreement() {
            println!(
                "Agreement with Label: {}/{} ({:.1}%)",
                report.agreeing,
                report.labeled,
                agreement * 100.0
            );
        }
    }
    Ok(())
}
