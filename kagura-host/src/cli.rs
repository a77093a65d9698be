use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "kagura-host",
    author,
    version,
    about = "Run a kagura game module headlessly and report what it rendered"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Boot a module, drive frames and audio blocks, print a JSON report.
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Guest module (`.wasm` binary or `.wat` text).
    #[arg(value_name = "MODULE")]
    pub module: PathBuf,

    /// Number of animation frames to run.
    #[arg(long, default_value_t = 3)]
    pub frames: u64,

    /// Bridge configuration (TOML). Flags below override it.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Skip GPU acquisition and render everything on the raster backend.
    #[arg(long, env = "KAGURA_FORCE_FALLBACK")]
    pub force_fallback: bool,

    /// Write the captured frame sample as a PNG.
    #[arg(long, value_name = "FILE")]
    pub capture_png: Option<PathBuf>,

    /// Write the audio output as a 32-bit float WAV.
    #[arg(long, value_name = "FILE")]
    pub audio_wav: Option<PathBuf>,

    /// Run without a canvas; the surface uses the guest's fallback size.
    #[arg(long)]
    pub headless: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["kagura-host", "run", "guest.wat"]).unwrap();
        let Command::Run(args) = cli.command;
        assert_eq!(args.module, PathBuf::from("guest.wat"));
        assert_eq!(args.frames, 3);
        assert!(args.capture_png.is_none());
        assert!(!args.headless);
    }

    #[test]
    fn run_with_flags() {
        let cli = Cli::try_parse_from([
            "kagura-host",
            "run",
            "guest.wasm",
            "--frames",
            "10",
            "--force-fallback",
            "--headless",
            "--capture-png",
            "out.png",
        ])
        .unwrap();
        let Command::Run(args) = cli.command;
        assert_eq!(args.frames, 10);
        assert!(args.force_fallback);
        assert!(args.headless);
        assert_eq!(args.capture_png, Some(PathBuf::from("out.png")));
    }
}
