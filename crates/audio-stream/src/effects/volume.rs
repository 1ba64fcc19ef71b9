//! In-place gain on interleaved PCM in its native sample format.

use crate::format::SampleFormat;

/// Scale every sample of `data` by `gain(sample_index % channels)`.
///
/// `gain` is evaluated per sample, so callers can read live settings without collecting them
/// first.
///
/// - `U8` is re-centred on 128 before scaling and re-offset after.
/// - Signed integers scale in a wider float accumulator and clamp to the type's bounds.
/// - Floats scale directly and clamp to the finite range.
pub(crate) fn apply_gains(
    format: SampleFormat,
    data: &mut [u8],
    channels: usize,
    gain: impl Fn(usize) -> f32,
) {
    if channels == 0 || (0..channels).all(|c| gain(c) == 1.0) {
        return;
    }
    let gains = Gains { channels, gain };
    match format {
        SampleFormat::U8 => scale_each::<1, _>(data, &gains, |[b], g| {
            let scaled = ((b as i32 - 128) as f32 * g).clamp(-128.0, 127.0);
            [(scaled as i32 + 128).clamp(0, 255) as u8]
        }),
        SampleFormat::S16 => scale_each::<2, _>(data, &gains, |b, g| {
            let scaled = (i16::from_ne_bytes(b) as f32 * g).clamp(i16::MIN as f32, i16::MAX as f32);
            (scaled as i16).to_ne_bytes()
        }),
        SampleFormat::S32 => scale_each::<4, _>(data, &gains, |b, g| {
            let scaled =
                (i32::from_ne_bytes(b) as f64 * g as f64).clamp(i32::MIN as f64, i32::MAX as f64);
            (scaled as i32).to_ne_bytes()
        }),
        SampleFormat::S64 => scale_each::<8, _>(data, &gains, |b, g| {
            let scaled =
                (i64::from_ne_bytes(b) as f64 * g as f64).clamp(i64::MIN as f64, i64::MAX as f64);
            (scaled as i64).to_ne_bytes()
        }),
        SampleFormat::F32 => scale_each::<4, _>(data, &gains, |b, g| {
            (f32::from_ne_bytes(b) * g).clamp(f32::MIN, f32::MAX).to_ne_bytes()
        }),
        SampleFormat::F64 => scale_each::<8, _>(data, &gains, |b, g| {
            (f64::from_ne_bytes(b) * g as f64)
                .clamp(f64::MIN, f64::MAX)
                .to_ne_bytes()
        }),
    }
}

struct Gains<G> {
    channels: usize,
    gain: G,
}

fn scale_each<const N: usize, G: Fn(usize) -> f32>(
    data: &mut [u8],
    gains: &Gains<G>,
    f: impl Fn([u8; N], f32) -> [u8; N],
) {
    for (i, chunk) in data.chunks_exact_mut(N).enumerate() {
        let Ok(sample) = <[u8; N]>::try_from(&*chunk) else {
            continue;
        };
        chunk.copy_from_slice(&f(sample, (gains.gain)(i % gains.channels)));
    }
}
