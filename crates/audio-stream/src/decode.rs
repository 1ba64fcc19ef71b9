//! Symphonia-backed frame producer.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode packets of the default track into interleaved `f32`
//! - map channels and convert to the requested [`SampleFormat`], one [`Frame`] per packet

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, CodecType, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::format::{AudioSpec, SampleFormat, encode_samples};
use crate::frame::{BufferPool, Frame, FrameProducer, FrameRelease};

/// Idle buffers kept for reuse between decoded packets.
const POOL_BUFFERS: usize = 32;

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Source bit depth (best-effort).
    pub bit_depth: Option<u16>,
    /// Container/extension hint (best-effort).
    pub container: Option<String>,
    pub duration_ms: Option<u64>,
    pub sample_rate: u32,
    pub channels: usize,
}

/// Layout the producer converts decoded audio into.
#[derive(Clone, Copy, Debug)]
pub struct OutputFormat {
    /// Output channel count; `None` keeps the source layout.
    pub channels: Option<usize>,
    pub format: SampleFormat,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            channels: None,
            format: SampleFormat::S16,
        }
    }
}

pub struct SymphoniaProducer {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: AudioSpec,
    pool: Arc<BufferPool>,
    mapped: Vec<f32>,
    /// Source frames still to discard after a seek that landed before its target.
    skip_frames: u64,
    finished: bool,
}

impl SymphoniaProducer {
    /// Probe `path` and prepare a decoder for its default track.
    pub fn open(path: &Path, output: OutputFormat) -> Result<(Self, SourceInfo)> {
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let (producer, mut info) = Self::from_media_source(Box::new(file), hint, output)?;
        info.container = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        Ok((producer, info))
    }

    /// Probe an arbitrary Symphonia [`MediaSource`] (seekable or not).
    pub fn from_media_source(
        source: Box<dyn MediaSource>,
        hint: Hint,
        output: OutputFormat,
    ) -> Result<(Self, SourceInfo)> {
        let mss = MediaSourceStream::new(source, Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .context("probe media")?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let track_id = track.id;
        let codec_params: CodecParameters = track.codec_params.clone();

        let source_channels = codec_params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();
        let rate = codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .context("create decoder")?;

        let spec = AudioSpec::new(
            rate,
            output.channels.unwrap_or(source_channels),
            output.format,
        );
        let info = SourceInfo {
            codec: codec_label(codec_params.codec).map(str::to_string),
            bit_depth: codec_params
                .bits_per_sample
                .or(codec_params.bits_per_coded_sample)
                .and_then(|v| u16::try_from(v).ok()),
            container: None,
            duration_ms: declared_duration_ms(&codec_params),
            sample_rate: rate,
            channels: source_channels,
        };
        tracing::info!(
            codec = info.codec.as_deref().unwrap_or("unknown"),
            sample_rate = rate,
            source_channels,
            output_channels = spec.channels,
            output_format = spec.format.name(),
            "decoder ready"
        );

        Ok((
            Self {
                format,
                decoder,
                track_id,
                spec,
                pool: Arc::new(BufferPool::new(POOL_BUFFERS)),
                mapped: Vec::new(),
                skip_frames: 0,
                finished: false,
            },
            info,
        ))
    }

    /// Layout of the frames this producer emits.
    pub fn spec(&self) -> AudioSpec {
        self.spec
    }

    fn end(&mut self, reason: &str) {
        self.finished = true;
        tracing::debug!(reason, "decoder finished");
    }
}

impl FrameProducer for SymphoniaProducer {
    fn produce_next(&mut self) -> Result<Vec<Frame>> {
        if self.finished {
            return Ok(Vec::new());
        }
        let packet = match self.format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.end("end of stream");
                return Ok(Vec::new());
            }
            Err(SymphoniaError::ResetRequired) => {
                self.end("stream reset required");
                return Ok(Vec::new());
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                return Err(anyhow!("malformed packet: {msg}"));
            }
            Err(e) => {
                self.finished = true;
                return Err(e).context("read packet");
            }
        };
        if packet.track_id() != self.track_id {
            return Ok(Vec::new());
        }

        let decoded = match self.decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => return Err(anyhow!("decode error: {msg}")),
            Err(e) => {
                self.finished = true;
                return Err(e).context("decode packet");
            }
        };
        if decoded.frames() == 0 {
            return Ok(Vec::new());
        }

        let source_channels = decoded.spec().channels.count().max(1);
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        let mut samples = sample_buf.samples();
        if self.skip_frames > 0 {
            let frames = (samples.len() / source_channels) as u64;
            let dropped = self.skip_frames.min(frames);
            self.skip_frames -= dropped;
            samples = &samples[dropped as usize * source_channels..];
            if samples.is_empty() {
                return Ok(Vec::new());
            }
        }
        map_channels(
            samples,
            source_channels,
            self.spec.channels,
            &mut self.mapped,
        );

        let mut bytes = self.pool.take(self.mapped.len() * self.spec.bytes_per_sample());
        bytes.resize(self.mapped.len() * self.spec.bytes_per_sample(), 0);
        let written = encode_samples(self.spec.format, &self.mapped, &mut bytes);
        bytes.truncate(written);
        Ok(vec![Frame::new(bytes)])
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn seek(&mut self, ms: u64) -> Result<()> {
        let time = Time::new(ms / 1000, (ms % 1000) as f64 / 1000.0);
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .with_context(|| format!("seek to {ms} ms"))?;
        self.decoder.reset();
        self.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        self.finished = false;
        tracing::debug!(
            ms,
            ts = seeked.actual_ts,
            skip_frames = self.skip_frames,
            "decoder seek"
        );
        Ok(())
    }

    fn releaser(&self) -> Arc<dyn FrameRelease> {
        self.pool.clone()
    }
}

/// Remix interleaved `input` from `src` to `dst` channels into `out`.
///
/// Mono is duplicated, downmix to mono averages, anything else maps channel `c` to `c % src`.
fn map_channels(input: &[f32], src: usize, dst: usize, out: &mut Vec<f32>) {
    out.clear();
    let src = src.max(1);
    if src == dst {
        out.extend_from_slice(input);
        return;
    }
    for frame in input.chunks_exact(src) {
        if dst == 1 {
            out.push(frame.iter().sum::<f32>() / src as f32);
        } else if src == 1 {
            out.extend(std::iter::repeat_n(frame[0], dst));
        } else {
            out.extend((0..dst).map(|c| frame[c % src]));
        }
    }
}

/// Stream length declared by the track header. Streams without a frame count or with a zero
/// sample rate have none.
fn declared_duration_ms(params: &CodecParameters) -> Option<u64> {
    let frames = params.n_frames?;
    match params.sample_rate? {
        0 => None,
        rate => Some(frames.saturating_mul(1000) / u64::from(rate)),
    }
}

/// Short name of `codec` in Symphonia's codec registry, e.g. `pcm_s16le` or `flac`.
fn codec_label(codec: CodecType) -> Option<&'static str> {
    symphonia::default::get_codecs()
        .get_codec(codec)
        .map(|descriptor| descriptor.short_name)
}

/// Build a canonical 16-bit PCM WAV file in memory.
#[cfg(test)]
pub(crate) fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use symphonia::core::codecs::*;

    fn wav_hint() -> Hint {
        let mut hint = Hint::new();
        hint.with_extension("wav");
        hint
    }

    fn decode_all(producer: &mut SymphoniaProducer) -> Vec<u8> {
        let mut out = Vec::new();
        while !producer.is_finished() {
            for frame in producer.produce_next().unwrap() {
                out.extend_from_slice(frame.as_bytes());
            }
        }
        out
    }

    fn open_wav(wav: Vec<u8>, output: OutputFormat) -> (SymphoniaProducer, SourceInfo) {
        SymphoniaProducer::from_media_source(Box::new(Cursor::new(wav)), wav_hint(), output)
            .unwrap()
    }

    #[test]
    fn source_info_describes_a_wav_stream() {
        let wav = wav_bytes(16_000, 1, &vec![0i16; 24_000]);
        let (_, info) = open_wav(wav, OutputFormat::default());
        assert_eq!(info.codec.as_deref(), Some("pcm_s16le"));
        assert_eq!(info.bit_depth, Some(16));
        assert_eq!(info.duration_ms, Some(1_500));
        assert_eq!(info.sample_rate, 16_000);
        assert_eq!(info.channels, 1);
    }

    #[test]
    fn declared_duration_needs_frames_and_a_rate() {
        let header = CodecParameters::new()
            .with_sample_rate(44_100)
            .with_n_frames(441)
            .clone();
        assert_eq!(declared_duration_ms(&header), Some(10));

        let silent_rate = CodecParameters::new()
            .with_sample_rate(0)
            .with_n_frames(441)
            .clone();
        assert_eq!(declared_duration_ms(&silent_rate), None);

        let open_ended = CodecParameters::new().with_sample_rate(44_100).clone();
        assert_eq!(declared_duration_ms(&open_ended), None);
    }

    #[test]
    fn codec_labels_come_from_the_registry() {
        assert_eq!(codec_label(CODEC_TYPE_FLAC), Some("flac"));
        assert_eq!(codec_label(CODEC_TYPE_NULL), None);
    }

    #[test]
    fn map_channels_variants() {
        let mut out = Vec::new();
        map_channels(&[0.5, -0.5], 1, 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5, -0.5, -0.5]);

        map_channels(&[0.2, 0.4, -1.0, 0.0], 2, 1, &mut out);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!((out[1] + 0.5).abs() < 1e-6);

        map_channels(&[1.0, 2.0, 3.0], 3, 2, &mut out);
        assert_eq!(out, vec![1.0, 2.0]);

        map_channels(&[1.0, 2.0], 2, 2, &mut out);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn decodes_wav_to_native_s16() {
        let samples: Vec<i16> = (0..2_000).map(|i| ((i * 37) % 20_000 - 10_000) as i16).collect();
        let wav = wav_bytes(8_000, 2, &samples);
        let (mut producer, info) = SymphoniaProducer::from_media_source(
            Box::new(Cursor::new(wav)),
            wav_hint(),
            OutputFormat::default(),
        )
        .unwrap();

        assert_eq!(info.sample_rate, 8_000);
        assert_eq!(info.channels, 2);
        assert_eq!(info.codec.as_deref(), Some("pcm_s16le"));
        assert_eq!(producer.spec(), AudioSpec::new(8_000, 2, SampleFormat::S16));

        let expected: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        assert_eq!(decode_all(&mut producer), expected);
        assert!(producer.produce_next().unwrap().is_empty());
    }

    #[test]
    fn downmixes_to_requested_mono() {
        let samples: Vec<i16> = [1000i16, 3000].repeat(500);
        let wav = wav_bytes(8_000, 2, &samples);
        let (mut producer, _) = SymphoniaProducer::from_media_source(
            Box::new(Cursor::new(wav)),
            wav_hint(),
            OutputFormat {
                channels: Some(1),
                format: SampleFormat::S16,
            },
        )
        .unwrap();

        let out = decode_all(&mut producer);
        assert_eq!(out.len(), 500 * 2);
        let first = i16::from_ne_bytes([out[0], out[1]]);
        assert!((first - 2000).abs() <= 1, "got {first}");
    }

    #[test]
    fn released_frames_return_to_the_pool() {
        let wav = wav_bytes(8_000, 1, &vec![0i16; 4_000]);
        let (mut producer, _) = SymphoniaProducer::from_media_source(
            Box::new(Cursor::new(wav)),
            wav_hint(),
            OutputFormat::default(),
        )
        .unwrap();
        let releaser = producer.releaser();
        let frame = loop {
            if let Some(f) = producer.produce_next().unwrap().pop() {
                break f;
            }
        };
        releaser.release(frame);
        assert_eq!(producer.pool.idle(), 1);
    }

    #[test]
    fn garbage_input_fails_to_probe() {
        let junk = vec![0u8; 64];
        let result = SymphoniaProducer::from_media_source(
            Box::new(Cursor::new(junk)),
            Hint::new(),
            OutputFormat::default(),
        );
        assert!(result.is_err());
    }

    fn first_sample(producer: &mut SymphoniaProducer) -> i16 {
        loop {
            if let Some(frame) = producer.produce_next().unwrap().first() {
                let b = frame.as_bytes();
                return i16::from_ne_bytes([b[0], b[1]]);
            }
            assert!(!producer.is_finished(), "stream ended before any frame");
        }
    }

    #[test]
    fn seek_lands_on_the_requested_sample() {
        let ramp: Vec<i16> = (0..8_000).collect();
        let (mut producer, _) = open_wav(wav_bytes(8_000, 1, &ramp), OutputFormat::default());
        assert_eq!(first_sample(&mut producer), 0);

        producer.seek(500).unwrap();
        assert_eq!(first_sample(&mut producer), 4_000);

        let rest = decode_all(&mut producer);
        let last = i16::from_ne_bytes([rest[rest.len() - 2], rest[rest.len() - 1]]);
        assert_eq!(last, 7_999);
    }

    #[test]
    fn seek_after_the_end_resumes_decoding() {
        let ramp: Vec<i16> = (0..4_000).collect();
        let (mut producer, _) = open_wav(wav_bytes(8_000, 1, &ramp), OutputFormat::default());
        decode_all(&mut producer);
        assert!(producer.is_finished());

        producer.seek(125).unwrap();
        assert!(!producer.is_finished());
        assert_eq!(first_sample(&mut producer), 1_000);
    }
}
