//! `audio-stream`: render audio files through the streaming effects pipeline.
//!
//! - `render`: decode, apply tempo/pitch/volume/balance and write raw interleaved PCM.
//! - `info`: print codec, layout and duration of a file.

mod cli;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use audio_stream::{
    Channel, OutputFormat, PipelineConfig, StreamPipeline, StretchPreset, SymphoniaProducer,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_stream=info")
        }))
        .with_writer(io::stderr)
        .init();

    match args.cmd {
        cli::Command::Render(render) => run_render(&render),
        cli::Command::Info { path } => print_info(&path),
    }
}

fn run_render(args: &cli::RenderArgs) -> Result<()> {
    if args.chunk_bytes == 0 {
        return Err(anyhow!("--chunk-bytes must be positive"));
    }
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_for_signal = cancel.clone();
    let _ = ctrlc::set_handler(move || {
        cancel_for_signal.store(true, Ordering::Relaxed);
    });

    let mut config = PipelineConfig::default();
    config.queue.max_frames = args.max_frames;
    if args.cheaper {
        config.stretch = StretchPreset::Cheaper;
    }
    let output = OutputFormat {
        channels: args.channels,
        format: args.format.into(),
    };
    let mut pipeline = StreamPipeline::open_file(&args.path, output, &config)?;
    if args.start_ms > 0 {
        pipeline
            .seek(args.start_ms)
            .with_context(|| format!("seek to {} ms", args.start_ms))?;
    }

    let effects = pipeline.effects();
    effects.set_volume(args.volume, Channel::All);
    effects.set_volume_balance(args.balance);
    effects.set_tempo(args.tempo);
    effects.set_semitones(args.semitones);

    let sink: Box<dyn Write> = match &args.out {
        Some(path) => Box::new(File::create(path).with_context(|| format!("create {:?}", path))?),
        None => Box::new(io::stdout().lock()),
    };
    let mut sink = BufWriter::new(sink);

    let spec = pipeline.spec();
    tracing::info!(
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        format = spec.format.name(),
        "rendering"
    );

    let mut buf = vec![0u8; args.chunk_bytes.max(spec.frame_bytes())];
    while !pipeline.is_end() {
        if cancel.load(Ordering::Relaxed) {
            tracing::warn!("cancelled");
            break;
        }
        let n = pipeline.read(&mut buf).context("read pipeline")?;
        sink.write_all(&buf[..n]).context("write output")?;
    }
    sink.flush().context("flush output")?;

    let status = pipeline.status();
    pipeline.close();
    tracing::info!(
        bytes = status.bytes_read,
        elapsed_ms = status.elapsed_ms,
        tempo = status.tempo,
        semitones = status.semitones,
        "render finished"
    );
    Ok(())
}

fn print_info(path: &Path) -> Result<()> {
    let (producer, info) = SymphoniaProducer::open(path, OutputFormat::default())?;
    let spec = producer.spec();
    println!("path:        {}", path.display());
    println!("codec:       {}", info.codec.as_deref().unwrap_or("unknown"));
    println!("container:   {}", info.container.as_deref().unwrap_or("unknown"));
    println!("sample rate: {} Hz", info.sample_rate);
    println!("channels:    {}", info.channels);
    match info.bit_depth {
        Some(bits) => println!("bit depth:   {bits}"),
        None => println!("bit depth:   unknown"),
    }
    match info.duration_ms {
        Some(ms) => println!("duration:    {}.{:03} s", ms / 1000, ms % 1000),
        None => println!("duration:    unknown"),
    }
    println!("decoded as:  {} x{}", spec.format.name(), spec.channels);
    Ok(())
}
