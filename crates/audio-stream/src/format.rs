//! PCM layout shared by the queue, the effects stage and the data sources.
//!
//! All buffers moving through the pipeline are **interleaved, native-endian** PCM:
//! `frame0[ch0], frame0[ch1], ..., frame1[ch0], frame1[ch1], ...`
//!
//! The effects stage works on `f32` internally; [`decode_samples`] and [`encode_samples`]
//! convert between the wire format and that representation.

/// Sample encoding of a PCM byte stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Unsigned 8-bit, midpoint 128.
    U8,
    S16,
    S32,
    S64,
    F32,
    F64,
}

impl SampleFormat {
    /// Size of one sample of one channel.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
            SampleFormat::S64 | SampleFormat::F64 => 8,
        }
    }

    /// Short lowercase label (`s16`, `f32`, ...), matching `ffplay -f` names without endianness.
    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::S64 => "s64",
            SampleFormat::F32 => "f32",
            SampleFormat::F64 => "f64",
        }
    }
}

/// Stream layout: rate, channel count and sample encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: usize,
    pub format: SampleFormat,
}

impl AudioSpec {
    pub fn new(sample_rate: u32, channels: usize, format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            format,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.format.bytes_per_sample()
    }

    /// Bytes of one sample-frame across all channels (the read alignment unit).
    pub fn frame_bytes(&self) -> usize {
        self.channels * self.format.bytes_per_sample()
    }

    /// Round `len` down to a whole number of sample-frames.
    pub fn align_down(&self, len: usize) -> usize {
        len - len % self.frame_bytes()
    }

    /// Playback duration of `bytes` in milliseconds (0 for a zero sample rate).
    pub fn bytes_to_ms(&self, bytes: u64) -> u64 {
        let frames = bytes / self.frame_bytes() as u64;
        if self.sample_rate == 0 {
            return 0;
        }
        frames.saturating_mul(1000) / self.sample_rate as u64
    }

    /// Byte length of `ms` milliseconds of audio, in whole sample-frames.
    pub fn ms_to_bytes(&self, ms: u64) -> u64 {
        let frames = ms.saturating_mul(self.sample_rate as u64) / 1000;
        frames.saturating_mul(self.frame_bytes() as u64)
    }
}

const S32_SCALE: f64 = 2_147_483_648.0;
const S64_SCALE: f64 = 9_223_372_036_854_775_808.0;

/// Append the samples in `bytes` to `out` as `f32` in `[-1.0, 1.0]` (floats pass through).
///
/// Trailing bytes that do not form a whole sample are ignored.
pub fn decode_samples(format: SampleFormat, bytes: &[u8], out: &mut Vec<f32>) {
    match format {
        SampleFormat::U8 => out.extend(bytes.iter().map(|&b| (b as f32 - 128.0) / 128.0)),
        SampleFormat::S16 => out.extend(
            bytes
                .chunks_exact(2)
                .map(|c| i16::from_ne_bytes([c[0], c[1]]) as f32 / 32_768.0),
        ),
        SampleFormat::S32 => out.extend(
            bytes
                .chunks_exact(4)
                .map(|c| (i32::from_ne_bytes([c[0], c[1], c[2], c[3]]) as f64 / S32_SCALE) as f32),
        ),
        SampleFormat::S64 => out.extend(bytes.chunks_exact(8).map(|c| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(c);
            (i64::from_ne_bytes(raw) as f64 / S64_SCALE) as f32
        })),
        SampleFormat::F32 => out.extend(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]])),
        ),
        SampleFormat::F64 => out.extend(bytes.chunks_exact(8).map(|c| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(c);
            f64::from_ne_bytes(raw) as f32
        })),
    }
}

/// Write `samples` into `out` in `format`, clamping integer formats to their range.
///
/// Stops at whichever runs out first and returns the number of bytes written.
pub fn encode_samples(format: SampleFormat, samples: &[f32], out: &mut [u8]) -> usize {
    let size = format.bytes_per_sample();
    let count = samples.len().min(out.len() / size);
    for (s, dst) in samples[..count].iter().zip(out.chunks_exact_mut(size)) {
        match format {
            SampleFormat::U8 => {
                dst[0] = (s * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8;
            }
            SampleFormat::S16 => {
                let v = (s * 32_768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                dst.copy_from_slice(&v.to_ne_bytes());
            }
            SampleFormat::S32 => {
                let v = (*s as f64 * S32_SCALE)
                    .round()
                    .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
                dst.copy_from_slice(&v.to_ne_bytes());
            }
            SampleFormat::S64 => {
                // `as` saturates at the i64 bounds.
                let v = (*s as f64 * S64_SCALE).round() as i64;
                dst.copy_from_slice(&v.to_ne_bytes());
            }
            SampleFormat::F32 => dst.copy_from_slice(&s.to_ne_bytes()),
            SampleFormat::F64 => dst.copy_from_slice(&(*s as f64).to_ne_bytes()),
        }
    }
    count * size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bytes_and_alignment() {
        let spec = AudioSpec::new(44_100, 2, SampleFormat::S16);
        assert_eq!(spec.frame_bytes(), 4);
        assert_eq!(spec.align_down(4097), 4096);
        assert_eq!(spec.align_down(3), 0);

        let f64_mono = AudioSpec::new(48_000, 1, SampleFormat::F64);
        assert_eq!(f64_mono.frame_bytes(), 8);
    }

    #[test]
    fn milliseconds_map_to_whole_frames() {
        let spec = AudioSpec::new(44_100, 2, SampleFormat::S16);
        assert_eq!(spec.ms_to_bytes(1000), 176_400);
        // 10 ms at 44.1 kHz is 441 frames; 1 ms rounds down to 44.
        assert_eq!(spec.ms_to_bytes(10), 441 * 4);
        assert_eq!(spec.ms_to_bytes(1), 44 * 4);
        assert_eq!(spec.bytes_to_ms(spec.ms_to_bytes(2_500)), 2_500);
    }

    #[test]
    fn zero_channels_is_treated_as_mono() {
        let spec = AudioSpec::new(8_000, 0, SampleFormat::U8);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.frame_bytes(), 1);
    }

    #[test]
    fn bytes_to_ms_uses_whole_frames() {
        let spec = AudioSpec::new(48_000, 2, SampleFormat::F32);
        assert_eq!(spec.bytes_to_ms(48_000 * 8), 1000);
        assert_eq!(AudioSpec::new(0, 2, SampleFormat::F32).bytes_to_ms(800), 0);
    }

    #[test]
    fn s16_survives_decode_encode_exactly() {
        let values: [i16; 5] = [i16::MIN, -1234, 0, 77, i16::MAX];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();

        let mut samples = Vec::new();
        decode_samples(SampleFormat::S16, &bytes, &mut samples);
        assert_eq!(samples.len(), 5);

        let mut back = vec![0u8; bytes.len()];
        assert_eq!(encode_samples(SampleFormat::S16, &samples, &mut back), bytes.len());
        assert_eq!(back, bytes);
    }

    #[test]
    fn u8_is_centered_on_128() {
        let mut samples = Vec::new();
        decode_samples(SampleFormat::U8, &[128, 0, 255], &mut samples);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], -1.0);
        assert!(samples[2] > 0.99);
    }

    #[test]
    fn encode_clamps_out_of_range_values() {
        let mut out = [0u8; 4];
        encode_samples(SampleFormat::S16, &[2.0, -2.0], &mut out);
        assert_eq!(i16::from_ne_bytes([out[0], out[1]]), i16::MAX);
        assert_eq!(i16::from_ne_bytes([out[2], out[3]]), i16::MIN);

        let mut out = [0u8; 2];
        encode_samples(SampleFormat::U8, &[3.0, -3.0], &mut out);
        assert_eq!(out, [255, 0]);
    }

    #[test]
    fn encode_stops_at_shorter_side() {
        let mut out = [0u8; 6];
        let written = encode_samples(SampleFormat::F32, &[0.5, 0.25, 0.125], &mut out);
        assert_eq!(written, 4);
        assert_eq!(f32::from_ne_bytes([out[0], out[1], out[2], out[3]]), 0.5);
    }

    #[test]
    fn decode_ignores_partial_trailing_sample() {
        let mut samples = Vec::new();
        decode_samples(SampleFormat::S32, &[0, 0, 0, 0, 1, 2], &mut samples);
        assert_eq!(samples, vec![0.0]);
    }
}
