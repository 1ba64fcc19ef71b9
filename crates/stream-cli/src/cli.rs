//! Command-line interface definitions.

use std::path::PathBuf;

use audio_stream::SampleFormat;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "audio-stream", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a file through the effects pipeline and write raw interleaved PCM
    Render(RenderArgs),

    /// Probe a file and print what the decoder sees
    Info {
        /// Path to audio file
        path: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
pub struct RenderArgs {
    /// Path to audio file
    pub path: PathBuf,

    /// Output file for raw PCM (stdout when omitted)
    #[arg(long, short)]
    pub out: Option<PathBuf>,

    /// Output sample format (native endian)
    #[arg(long, value_enum, default_value_t = FormatArg::S16)]
    pub format: FormatArg,

    /// Output channel count (defaults to the source layout)
    #[arg(long)]
    pub channels: Option<usize>,

    /// Tempo ratio; pitch is preserved
    #[arg(long, default_value_t = 1.0)]
    pub tempo: f32,

    /// Pitch shift in semitones (-12..=12)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub semitones: i32,

    /// Global volume (0.0..=1.0)
    #[arg(long, default_value_t = 1.0)]
    pub volume: f32,

    /// Stereo balance (-1.0 = right attenuated .. 1.0 = left attenuated)
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub balance: f32,

    /// Start rendering this many milliseconds into the file
    #[arg(long, default_value_t = 0)]
    pub start_ms: u64,

    /// Use the cheaper, lower-quality time-stretch preset
    #[arg(long)]
    pub cheaper: bool,

    /// Bytes requested per read from the pipeline
    #[arg(long, default_value_t = 4096)]
    pub chunk_bytes: usize,

    /// Frame queue capacity (decoded packets)
    #[arg(long, default_value_t = 200)]
    pub max_frames: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    U8,
    S16,
    S32,
    S64,
    F32,
    F64,
}

impl From<FormatArg> for SampleFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::U8 => SampleFormat::U8,
            FormatArg::S16 => SampleFormat::S16,
            FormatArg::S32 => SampleFormat::S32,
            FormatArg::S64 => SampleFormat::S64,
            FormatArg::F32 => SampleFormat::F32,
            FormatArg::F64 => SampleFormat::F64,
        }
    }
}
