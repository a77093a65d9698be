mod cli;

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use kagura_host::audio::AudioOutput;
use kagura_host::{Bridge, BridgeConfig, RunStatus, SmokeReport, WasmtimeRuntime, loader, runtime};
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, RunArgs};

/// How long boot waits for the audio worklet before running frames.
const AUDIO_SETTLE: Duration = Duration::from_millis(500);

fn main() -> ExitCode {
    let cli = cli::parse();
    initialise_tracing();
    match cli.command {
        Command::Run(args) => run(&args),
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &RunArgs) -> ExitCode {
    let report = execute(args).unwrap_or_else(|err| {
        tracing::error!(error = %format!("{err:#}"), "boot failed");
        SmokeReport::failed(&err)
    });
    println!("{}", report.to_json());
    match report.status {
        RunStatus::Ok => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

fn load_config(args: &RunArgs) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    if args.force_fallback {
        config.gfx.force_fallback = true;
    }
    if args.headless {
        config.surface.headless = true;
    }
    Ok(config)
}

/// Boot errors are returned; a guest trap after boot ends the run with a
/// `failed` report that still carries everything observed so far.
fn execute(args: &RunArgs) -> Result<SmokeReport> {
    let config = load_config(args)?;
    let audio = match &args.audio_wav {
        Some(path) => AudioOutput::Wav(path.clone()),
        None => AudioOutput::Null,
    };

    let engine = runtime::engine()?;
    let module = loader::load_file(&engine, &args.module)
        .with_context(|| format!("failed to load {}", args.module.display()))?;
    let bridge = Bridge::with_wgpu(&config, audio);
    let mut rt = WasmtimeRuntime::boot(&engine, &module, bridge)?;
    rt.settle_audio(AUDIO_SETTLE);

    let outcome = rt.run(args.frames);
    if let Err(err) = &outcome {
        tracing::error!(error = %format!("{err:#}"), "guest failed");
    }

    if let Some(path) = &args.capture_png {
        let gfx = rt.bridge().gfx();
        match gfx.capture() {
            Some(rgba) => write_png(path, gfx.capture_size(), rgba)?,
            None => tracing::warn!(path = %path.display(), "no frame was captured; PNG not written"),
        }
    }

    let mut report = rt.report();
    if let Err(err) = rt.shutdown() {
        tracing::warn!(error = %format!("{err:#}"), "guest shutdown hook failed");
    }
    if let Err(err) = outcome {
        report.status = RunStatus::Failed;
        report.error = Some(format!("{err:#}"));
    }
    Ok(report)
}

fn write_png(path: &Path, size: u32, rgba: &[u8]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), size, size);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header().context("failed to write PNG header")?;
    writer.write_image_data(rgba).context("failed to write PNG data")?;
    tracing::info!(path = %path.display(), size, "capture written");
    Ok(())
}
