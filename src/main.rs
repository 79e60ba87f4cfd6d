use std::process::ExitCode;

use clap::Parser;
use pcm_loopback::audio::{self, Backend, CpalBackend, Direction};
use pcm_loopback::format::{
    self, PcmSample, SampleKind, TestFormat, DEFAULT_FORMAT, FORMATS_ENV,
};
use pcm_loopback::loopback::{self, LoopbackConfig, DEFAULT_EXCLUDED_PCM};
use pcm_loopback::ConfigError;

#[derive(Parser, Debug)]
#[command(version, about = "ALSA playback and loopback self-test", long_about = None)]
struct Cli {
    /// Scenario to run: playback, loopback, list-formats or list-devices
    scenario: String,

    /// Seconds of tone to play
    #[arg(short = 'd', value_name = "SECONDS", default_value_t = 1.0)]
    duration: f32,

    /// Sample format and rate, see list-formats
    #[arg(long, value_name = "FORMAT", default_value = DEFAULT_FORMAT)]
    format: String,

    /// Device to record from
    #[arg(long = "capture-pcm", value_name = "DEVICE", default_value = "default")]
    capture_pcm: String,

    /// Device to play on
    #[arg(long = "playback-pcm", value_name = "DEVICE", default_value = "default")]
    playback_pcm: String,

    /// Device the fallback search must never use (repeatable)
    #[arg(long = "exclude-pcm", value_name = "DEVICE", default_value = DEFAULT_EXCLUDED_PCM)]
    exclude_pcm: Vec<String>,

    /// Log driver details
    #[arg(short, long)]
    verbose: bool,
}

/// Runs `$f::<T, _>($args)` with `T` chosen by a [`SampleKind`].
macro_rules! with_sample_type {
    ($kind:expr, $f:ident($($args:expr),* $(,)?)) => {
        match $kind {
            SampleKind::Int8 => $f::<i8, _>($($args),*),
            SampleKind::Uint8 => $f::<u8, _>($($args),*),
            SampleKind::Int16 => $f::<i16, _>($($args),*),
            SampleKind::Uint16 => $f::<u16, _>($($args),*),
            SampleKind::Float => $f::<f32, _>($($args),*),
            SampleKind::Float64 => $f::<f64, _>($($args),*),
        }
    };
}

fn playback_scenario<T: PcmSample, B: Backend>(
    backend: &B,
    config: &LoopbackConfig,
    cli: &Cli,
) -> bool {
    match loopback::playback_test::<T, B>(backend, config, &cli.playback_pcm) {
        Ok(()) => true,
        Err(e) => {
            log::error!("Playback failed: {}", e);
            false
        }
    }
}

fn loopback_scenario<T: PcmSample, B: Backend>(
    backend: &B,
    config: &LoopbackConfig,
    cli: &Cli,
) -> bool {
    loopback::run_loopback::<T, B>(backend, config, &cli.capture_pcm, &cli.playback_pcm)
}

fn list_formats() -> bool {
    let allow_list = std::env::var(FORMATS_ENV).ok();
    for f in format::listed_formats(allow_list.as_deref()) {
        println!("format: {}", f.name);
        println!("description: {}", f.description);
        println!();
    }
    true
}

fn list_devices<B: Backend>(backend: &B) -> bool {
    let devices = backend.devices().unwrap_or_else(|e| {
        log::warn!("Couldn't get the device list: {}", e);
        Vec::new()
    });

    println!("Playback devices: ");
    for name in audio::device_names(&devices, Direction::Playback) {
        println!("{}", name);
    }
    println!("\n\nRecording devices: ");
    for name in audio::device_names(&devices, Direction::Capture) {
        println!("{}", name);
    }
    true
}

fn run(cli: &Cli) -> Result<bool, ConfigError> {
    //
    // Validate the format before any device is touched.
    //
    let format = TestFormat::find(&cli.format)?;
    log::debug!(
        "Using format: {:?} and sampling rate: {}",
        format.kind,
        format.rate
    );

    let passed = match cli.scenario.as_str() {
        "list-formats" => list_formats(),
        "list-devices" => list_devices(&CpalBackend::new()),
        "playback" | "loopback" => {
            let config = LoopbackConfig::new(cli.duration, format.rate)?
                .with_excluded(cli.exclude_pcm.clone());
            let backend = CpalBackend::new();
            if cli.scenario == "playback" {
                with_sample_type!(format.kind, playback_scenario(&backend, &config, cli))
            } else {
                with_sample_type!(format.kind, loopback_scenario(&backend, &config, cli))
            }
        }
        other => {
            eprintln!("{} scenario not found!", other);
            false
        }
    };
    Ok(passed)
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    //
    // Initialize logging: info by default, debug with -v. RUST_LOG overrides.
    //
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
