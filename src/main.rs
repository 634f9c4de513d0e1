use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use deepvoice_rust_core::*;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Capture,
    File,
}

/// Score live or recorded audio for synthetic voice.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured audio source.
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// WAV file to score; implies file mode.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Stop after this many seconds.
    #[arg(short, long)]
    duration: Option<u64>,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    if let Some(input) = &args.input {
        config.source.mode = SourceMode::File;
        config.source.file.path = Some(input.clone());
    }
    match args.mode {
        Some(Mode::Capture) => config.source.mode = SourceMode::Capture,
        Some(Mode::File) => config.source.mode = SourceMode::File,
        None => {}
    }
    config.validate()?;
    Ok(config)
}

fn source_factory(config: &Config) -> anyhow::Result<Arc<dyn SourceFactory>> {
    let input_len = config.model.input_len();
    let factory: Arc<dyn SourceFactory> = match config.source.mode {
        SourceMode::Capture => Arc::new(SamplerFactory::new(config.source.capture.clone(), input_len)),
        SourceMode::File => {
            let path = config
                .source
                .file
                .path
                .clone()
                .context("file mode needs source.file.path or --input")?;
            match config.source.file.frame_len {
                Some(frame_len) => Arc::new(WavSourceFactory::new(path, frame_len)),
                None => Arc::new(WavSourceFactory::for_model(path, input_len)),
            }
        }
        SourceMode::Tap => bail!("tap mode needs an embedding call engine, use capture or file"),
    };
    Ok(factory)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;
    log::debug!("configuration: {:?}", config);

    let queue = MainQueue::new();
    let bridge = EventBridge::new(Arc::new(queue.handle()));
    let session = DetectionSession::new(
        config.pipeline_settings(),
        Arc::new(OnnxModelLoader::new(&config.model)),
        source_factory(&config)?,
        bridge,
    );

    let failed = Arc::new(AtomicBool::new(false));
    let failed2 = failed.clone();
    session.bridge().listen(Arc::new(move |event: &DetectionEvent| match event {
        DetectionEvent::Score(score) => println!("{:.4}", score),
        DetectionEvent::Error { kind, message } => {
            eprintln!("{}: {}", kind, message);
            failed2.store(true, Ordering::SeqCst);
        }
    }));

    session.start().context("failed to start detection")?;

    let deadline = match args.duration {
        Some(secs) => Instant::now() + Duration::from_secs(secs),
        // Effectively unbounded; capture runs until interrupted.
        None => Instant::now() + Duration::from_secs(60 * 60 * 24 * 365),
    };
    let tick = Duration::from_millis(200);
    while Instant::now() < deadline && session.state() == SessionState::Running {
        queue.run_until((Instant::now() + tick).min(deadline), || false);
    }

    session.stop();
    queue.run_pending();

    if failed.load(Ordering::SeqCst) {
        bail!("detection ended with an error");
    }
    Ok(())
}
