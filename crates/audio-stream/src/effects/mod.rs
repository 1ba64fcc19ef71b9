//! Effects stage: volume, stereo balance, tempo and pitch applied to PCM byte buffers.
//!
//! [`EffectsTransform::process`] runs the time-stretch engine first and volume second, in
//! place. Gains, tempo and pitch are atomics so a control thread can change them while a
//! reader is inside `process`; the engine itself sits in a mutex-guarded slot that is locked
//! only for feeding, receiving and swapping it.

mod stretch;
mod volume;

pub use stretch::{
    SignalsmithStretcher, StretchFactory, StretchSetup, TimeStretch, signalsmith_factory,
};

use std::collections::TryReserveError;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::config::{EffectsConfig, StretchPreset};
use crate::format::{AudioSpec, decode_samples, encode_samples};
use crate::queue::lock;

/// Tempo values at or below this are rejected rather than clamped.
const MIN_ACCEPTED_TEMPO: f32 = 0.1;
const MAX_SEMITONES: i32 = 12;

/// Outcome of [`EffectsTransform::process`].
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    /// The buffer now holds this many transformed bytes.
    Success(usize),
    /// Input was accepted but nothing is ready yet; call again with more input.
    Again,
    /// Unrecoverable failure; do not retry.
    Error,
}

/// Which gain a volume call addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// The global multiplier applied on top of every channel gain.
    All,
    Index(usize),
}

struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(v: f32) -> Self {
        Self(AtomicU32::new(v.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, v: f32) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
}

struct StretchSlot {
    /// `None` while tempo is 1 and pitch is 0.
    engine: Option<Box<dyn TimeStretch>>,
    /// Flushed tail of a replaced engine; always emitted before new engine output.
    pending: VecDeque<f32>,
    flushed: bool,
    decoded: Vec<f32>,
    received: Vec<f32>,
}

impl StretchSlot {
    fn buffered_samples(&self) -> usize {
        self.pending.len() + self.engine.as_ref().map_or(0, |e| e.available_samples())
    }

    /// Fill `received` with up to `capacity` samples: pending tail first, then engine output.
    fn collect(&mut self, capacity: usize) -> Result<usize, TryReserveError> {
        self.received.clear();
        self.received.try_reserve(capacity)?;
        let from_pending = capacity.min(self.pending.len());
        self.received.extend(self.pending.drain(..from_pending));
        if let Some(engine) = self.engine.as_mut() {
            let start = self.received.len();
            if capacity > start {
                self.received.resize(capacity, 0.0);
                let got = engine.receive_samples(&mut self.received[start..]);
                self.received.truncate(start + got);
            }
        }
        Ok(self.received.len())
    }
}

/// Stateful volume / balance / tempo / pitch transform over interleaved PCM bytes.
pub struct EffectsTransform {
    spec: AudioSpec,
    min_tempo: f32,
    max_tempo: f32,
    preset: StretchPreset,
    volume: AtomicF32,
    channel_volumes: Vec<AtomicF32>,
    balance: AtomicF32,
    tempo: AtomicF32,
    semitones: AtomicI32,
    factory: StretchFactory,
    /// Serializes engine rebuilds so concurrent setters cannot interleave.
    reconfigure: Mutex<()>,
    stretch: Mutex<StretchSlot>,
}

impl EffectsTransform {
    pub fn new(config: &EffectsConfig) -> Self {
        Self::with_factory(config, signalsmith_factory())
    }

    /// Build a transform that uses `factory` whenever a time-stretch engine is needed.
    pub fn with_factory(config: &EffectsConfig, factory: StretchFactory) -> Self {
        let min_tempo = config.min_tempo.max(MIN_ACCEPTED_TEMPO);
        let max_tempo = config.max_tempo.max(min_tempo);
        Self {
            spec: config.spec,
            min_tempo,
            max_tempo,
            preset: config.stretch,
            volume: AtomicF32::new(1.0),
            channel_volumes: (0..config.spec.channels).map(|_| AtomicF32::new(1.0)).collect(),
            balance: AtomicF32::new(0.0),
            tempo: AtomicF32::new(1.0),
            semitones: AtomicI32::new(0),
            factory,
            reconfigure: Mutex::new(()),
            stretch: Mutex::new(StretchSlot {
                engine: None,
                pending: VecDeque::new(),
                flushed: false,
                decoded: Vec::new(),
                received: Vec::new(),
            }),
        }
    }

    pub fn spec(&self) -> AudioSpec {
        self.spec
    }

    /// Set a gain in `[0, 1]` (clamped). NaN and unknown channels are ignored.
    pub fn set_volume(&self, volume: f32, channel: Channel) {
        if volume.is_nan() {
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        match channel {
            Channel::All => self.volume.store(volume),
            Channel::Index(i) => match self.channel_volumes.get(i) {
                Some(v) => v.store(volume),
                None => tracing::debug!(channel = i, "volume for unknown channel ignored"),
            },
        }
    }

    /// Current gain; `None` for an unknown channel.
    pub fn volume(&self, channel: Channel) -> Option<f32> {
        match channel {
            Channel::All => Some(self.volume.load()),
            Channel::Index(i) => self.channel_volumes.get(i).map(AtomicF32::load),
        }
    }

    /// Stereo balance in `[-1, 1]`: positive attenuates the left channel, negative the right.
    ///
    /// Ignored for non-stereo streams and out-of-range input.
    pub fn set_volume_balance(&self, balance: f32) {
        if self.spec.channels != 2 || !(-1.0..=1.0).contains(&balance) {
            return;
        }
        let (left, right) = if balance > 0.0 {
            (1.0 - balance, 1.0)
        } else {
            (1.0, 1.0 + balance)
        };
        self.channel_volumes[0].store(left);
        self.channel_volumes[1].store(right);
        self.balance.store(balance);
    }

    pub fn volume_balance(&self) -> f32 {
        self.balance.load()
    }

    /// Set the tempo ratio, clamped to `[min_tempo, max_tempo]`.
    ///
    /// Non-finite values and values at or below 0.1 are ignored. Samples buffered in the
    /// current engine are flushed and played before output of the new one.
    pub fn set_tempo(&self, tempo: f32) {
        if !tempo.is_finite() || tempo <= MIN_ACCEPTED_TEMPO {
            tracing::debug!(tempo, "tempo rejected");
            return;
        }
        let tempo = tempo.clamp(self.min_tempo, self.max_tempo);
        let _cfg = lock(&self.reconfigure);
        if self.tempo.load() == tempo {
            return;
        }
        self.tempo.store(tempo);
        self.replace_engine();
    }

    pub fn tempo(&self) -> f32 {
        self.tempo.load()
    }

    /// Shift pitch by whole semitones, clamped to `[-12, 12]`.
    pub fn set_semitones(&self, semitones: i32) {
        let semitones = semitones.clamp(-MAX_SEMITONES, MAX_SEMITONES);
        let _cfg = lock(&self.reconfigure);
        if self.semitones.load(Ordering::Relaxed) == semitones {
            return;
        }
        self.semitones.store(semitones, Ordering::Relaxed);
        self.replace_engine();
    }

    pub fn semitones(&self) -> i32 {
        self.semitones.load(Ordering::Relaxed)
    }

    /// Swap in an engine for the current tempo/pitch. Caller holds `reconfigure`.
    fn replace_engine(&self) {
        let tempo = self.tempo();
        let semitones = self.semitones();
        let next = if tempo == 1.0 && semitones == 0 {
            None
        } else {
            Some((self.factory)(&StretchSetup {
                sample_rate: self.spec.sample_rate,
                channels: self.spec.channels,
                tempo: tempo as f64,
                semitones,
                preset: self.preset,
            }))
        };

        let mut slot = lock(&self.stretch);
        if let Some(mut old) = slot.engine.take() {
            old.flush();
            let mut tail = vec![0.0f32; old.available_samples()];
            let got = old.receive_samples(&mut tail);
            slot.pending.extend(&tail[..got]);
        }
        slot.engine = next;
        slot.flushed = false;
        tracing::debug!(
            tempo,
            semitones,
            carried_samples = slot.pending.len(),
            "time-stretch engine replaced"
        );
    }

    /// Transform the first `len` bytes of `buf` in place.
    ///
    /// The result may be shorter or longer than `len` (bounded by `buf.len()`), or empty
    /// while the engine accumulates input (`Again`). `len == 0` only collects output that is
    /// already buffered.
    pub fn process(&self, buf: &mut [u8], len: usize) -> ProcessResult {
        if len > buf.len() {
            tracing::warn!(len, capacity = buf.len(), "process length exceeds buffer");
            return ProcessResult::Error;
        }
        let len = self.spec.align_down(len);
        match self.apply_stretch(buf, len) {
            Ok(Some(out)) => {
                self.apply_volume(&mut buf[..out]);
                ProcessResult::Success(out)
            }
            Ok(None) => ProcessResult::Again,
            Err(e) => {
                tracing::error!("effects scratch allocation failed: {e}");
                ProcessResult::Error
            }
        }
    }

    fn apply_stretch(&self, buf: &mut [u8], len: usize) -> Result<Option<usize>, TryReserveError> {
        let mut guard = lock(&self.stretch);
        let slot = &mut *guard;
        if len > 0 {
            slot.flushed = false;
        }
        if slot.engine.is_none() && slot.pending.is_empty() {
            return Ok((len > 0).then_some(len));
        }

        if len > 0 {
            let format = self.spec.format;
            slot.decoded.clear();
            slot.decoded.try_reserve(len / format.bytes_per_sample())?;
            decode_samples(format, &buf[..len], &mut slot.decoded);
            match slot.engine.as_mut() {
                Some(engine) => engine.put_samples(&slot.decoded),
                None => slot.pending.extend(slot.decoded.iter().copied()),
            }
        }

        let capacity = buf.len() / self.spec.frame_bytes() * self.spec.channels;
        let n = slot.collect(capacity)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(encode_samples(self.spec.format, &slot.received[..n], buf)))
    }

    fn apply_volume(&self, data: &mut [u8]) {
        let global = self.volume.load();
        let channels = &self.channel_volumes;
        volume::apply_gains(self.spec.format, data, channels.len(), |c| {
            channels[c].load() * global
        });
    }

    /// Flush the engine once and report how many bytes it now holds.
    ///
    /// A second call without new input returns 0.
    pub fn flush_remaining(&self) -> usize {
        let mut slot = lock(&self.stretch);
        if slot.flushed {
            return 0;
        }
        slot.flushed = true;
        if let Some(engine) = slot.engine.as_mut() {
            engine.flush();
        }
        slot.buffered_samples() * self.spec.bytes_per_sample()
    }

    /// Drain up to `buf.len()` bytes (whole frames) of buffered output, with volume applied.
    pub fn receive_remaining(&self, buf: &mut [u8]) -> usize {
        let capacity = buf.len() / self.spec.frame_bytes() * self.spec.channels;
        let written = {
            let mut slot = lock(&self.stretch);
            match slot.collect(capacity) {
                Ok(n) => encode_samples(self.spec.format, &slot.received[..n], buf),
                Err(e) => {
                    tracing::error!("effects scratch allocation failed: {e}");
                    0
                }
            }
        };
        self.apply_volume(&mut buf[..written]);
        written
    }

    /// Bytes of transformed output waiting inside the transform.
    pub fn buffered_bytes(&self) -> usize {
        lock(&self.stretch).buffered_samples() * self.spec.bytes_per_sample()
    }

    /// Discard engine state (for a reopened stream). Settings are kept.
    pub fn reset(&self) {
        let mut slot = lock(&self.stretch);
        if let Some(engine) = slot.engine.as_mut() {
            engine.clear();
        }
        slot.pending.clear();
        slot.flushed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;
    use std::sync::Arc;
    use std::thread;

    fn s16_spec(channels: usize) -> AudioSpec {
        AudioSpec::new(8_000, channels, SampleFormat::S16)
    }

    fn transform(channels: usize) -> EffectsTransform {
        EffectsTransform::new(&EffectsConfig::new(s16_spec(channels)))
    }

    fn s16(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    fn to_s16(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]))
            .collect()
    }

    /// Engine that delays everything by one `put_samples` call and holds the last batch
    /// until flushed.
    struct DelayLine {
        held: Vec<f32>,
        ready: VecDeque<f32>,
    }

    impl TimeStretch for DelayLine {
        fn put_samples(&mut self, samples: &[f32]) {
            self.ready.extend(self.held.drain(..));
            self.held.extend_from_slice(samples);
        }
        fn receive_samples(&mut self, out: &mut [f32]) -> usize {
            let n = out.len().min(self.ready.len());
            for (dst, src) in out.iter_mut().zip(self.ready.drain(..n)) {
                *dst = src;
            }
            n
        }
        fn flush(&mut self) {
            self.ready.extend(self.held.drain(..));
        }
        fn available_samples(&self) -> usize {
            self.ready.len()
        }
        fn clear(&mut self) {
            self.held.clear();
            self.ready.clear();
        }
    }

    fn delay_factory() -> StretchFactory {
        Arc::new(|_: &StretchSetup| {
            Box::new(DelayLine {
                held: Vec::new(),
                ready: VecDeque::new(),
            }) as Box<dyn TimeStretch>
        })
    }

    #[test]
    fn volume_is_clamped() {
        let fx = transform(2);
        fx.set_volume(-0.5, Channel::All);
        assert_eq!(fx.volume(Channel::All), Some(0.0));
        fx.set_volume(1.5, Channel::All);
        assert_eq!(fx.volume(Channel::All), Some(1.0));
        fx.set_volume(1.5, Channel::Index(1));
        assert_eq!(fx.volume(Channel::Index(1)), Some(1.0));
        fx.set_volume(f32::NAN, Channel::All);
        assert_eq!(fx.volume(Channel::All), Some(1.0));
    }

    #[test]
    fn unknown_channel_is_ignored() {
        let fx = transform(2);
        fx.set_volume(0.3, Channel::Index(5));
        assert_eq!(fx.volume(Channel::Index(5)), None);
        assert_eq!(fx.volume(Channel::Index(0)), Some(1.0));
    }

    #[test]
    fn global_and_channel_gains_multiply() {
        let fx = transform(2);
        fx.set_volume(0.5, Channel::All);
        fx.set_volume(0.5, Channel::Index(1));
        let mut buf = s16(&[1000, 1000]);
        assert_eq!(fx.process(&mut buf, 4), ProcessResult::Success(4));
        assert_eq!(to_s16(&buf), vec![500, 250]);
    }

    #[test]
    fn balance_attenuates_one_side() {
        let fx = transform(2);
        fx.set_volume_balance(0.5);
        let mut buf = s16(&[1000, 1000, 2000, 2000]);
        assert_eq!(fx.process(&mut buf, 8), ProcessResult::Success(8));
        assert_eq!(to_s16(&buf), vec![500, 1000, 1000, 2000]);
        assert_eq!(fx.volume_balance(), 0.5);

        fx.set_volume_balance(-0.25);
        assert_eq!(fx.volume(Channel::Index(0)), Some(1.0));
        assert_eq!(fx.volume(Channel::Index(1)), Some(0.75));
    }

    #[test]
    fn balance_is_a_noop_for_mono_and_out_of_range() {
        let mono = transform(1);
        mono.set_volume_balance(0.5);
        assert_eq!(mono.volume(Channel::Index(0)), Some(1.0));
        let mut buf = s16(&[1000]);
        assert_eq!(mono.process(&mut buf, 2), ProcessResult::Success(2));
        assert_eq!(to_s16(&buf), vec![1000]);

        let stereo = transform(2);
        stereo.set_volume_balance(1.5);
        assert_eq!(stereo.volume(Channel::Index(0)), Some(1.0));
        assert_eq!(stereo.volume(Channel::Index(1)), Some(1.0));
    }

    #[test]
    fn unity_tempo_is_byte_identity() {
        let fx = transform(2);
        let original = s16(&[1, -2, 300, -400, 5, 6]);
        let mut buf = original.clone();
        assert_eq!(fx.process(&mut buf, original.len()), ProcessResult::Success(12));
        assert_eq!(buf, original);
        assert_eq!(fx.flush_remaining(), 0);
    }

    #[test]
    fn tempo_is_clamped_and_tiny_values_rejected() {
        let fx = transform(2);
        fx.set_tempo(5.0);
        assert_eq!(fx.tempo(), 2.0);
        fx.set_tempo(0.3);
        assert_eq!(fx.tempo(), 0.5);
        fx.set_tempo(0.05);
        assert_eq!(fx.tempo(), 0.5);
        fx.set_tempo(f32::NAN);
        assert_eq!(fx.tempo(), 0.5);
    }

    #[test]
    fn semitones_are_clamped() {
        let fx = transform(1);
        fx.set_semitones(40);
        assert_eq!(fx.semitones(), 12);
        fx.set_semitones(-40);
        assert_eq!(fx.semitones(), -12);
    }

    #[test]
    fn engine_accumulation_reports_again() {
        let fx = EffectsTransform::with_factory(&EffectsConfig::new(s16_spec(1)), delay_factory());
        fx.set_tempo(1.5);

        let mut buf = s16(&[10, 20]);
        assert_eq!(fx.process(&mut buf, 4), ProcessResult::Again);

        let mut buf = s16(&[30, 40]);
        assert_eq!(fx.process(&mut buf, 4), ProcessResult::Success(4));
        assert_eq!(to_s16(&buf), vec![10, 20]);
    }

    #[test]
    fn flush_remaining_is_idempotent() {
        let fx = EffectsTransform::with_factory(&EffectsConfig::new(s16_spec(1)), delay_factory());
        fx.set_tempo(1.5);
        let mut buf = s16(&[7, 8, 9]);
        assert_eq!(fx.process(&mut buf, 6), ProcessResult::Again);

        assert_eq!(fx.flush_remaining(), 6);
        assert_eq!(fx.flush_remaining(), 0);

        let mut out = [0u8; 4];
        assert_eq!(fx.receive_remaining(&mut out), 4);
        assert_eq!(to_s16(&out), vec![7, 8]);
        assert_eq!(fx.receive_remaining(&mut out), 2);
        assert_eq!(to_s16(&out[..2]), vec![9]);
        assert_eq!(fx.receive_remaining(&mut out), 0);
    }

    #[test]
    fn new_input_rearms_flush() {
        let fx = EffectsTransform::with_factory(&EffectsConfig::new(s16_spec(1)), delay_factory());
        fx.set_tempo(1.5);
        let mut buf = s16(&[1]);
        let _ = fx.process(&mut buf, 2);
        assert_eq!(fx.flush_remaining(), 2);
        let mut out = [0u8; 2];
        assert_eq!(fx.receive_remaining(&mut out), 2);

        let mut buf = s16(&[2]);
        let _ = fx.process(&mut buf, 2);
        assert_eq!(fx.flush_remaining(), 2);
    }

    #[test]
    fn tempo_change_keeps_buffered_tail() {
        let fx = EffectsTransform::with_factory(&EffectsConfig::new(s16_spec(1)), delay_factory());
        fx.set_tempo(1.5);
        let mut buf = s16(&[11, 12]);
        assert_eq!(fx.process(&mut buf, 4), ProcessResult::Again);

        // Back to unity: the held samples must come out before new input.
        fx.set_tempo(1.0);
        assert_eq!(fx.buffered_bytes(), 4);
        let mut buf = s16(&[13, 14, 0, 0]);
        assert_eq!(fx.process(&mut buf, 4), ProcessResult::Success(8));
        assert_eq!(to_s16(&buf), vec![11, 12, 13, 14]);
        assert_eq!(fx.buffered_bytes(), 0);
    }

    #[test]
    fn volume_applies_to_flushed_tail() {
        let fx = EffectsTransform::with_factory(&EffectsConfig::new(s16_spec(1)), delay_factory());
        fx.set_tempo(0.8);
        fx.set_volume(0.5, Channel::All);
        let mut buf = s16(&[1000]);
        let _ = fx.process(&mut buf, 2);
        fx.flush_remaining();
        let mut out = [0u8; 2];
        assert_eq!(fx.receive_remaining(&mut out), 2);
        assert_eq!(to_s16(&out), vec![500]);
    }

    #[test]
    fn process_rejects_length_beyond_buffer() {
        let fx = transform(1);
        let mut buf = [0u8; 4];
        assert_eq!(fx.process(&mut buf, 8), ProcessResult::Error);
    }

    #[test]
    fn reset_discards_buffered_samples() {
        let fx = EffectsTransform::with_factory(&EffectsConfig::new(s16_spec(1)), delay_factory());
        fx.set_tempo(1.2);
        let mut buf = s16(&[1, 2]);
        let _ = fx.process(&mut buf, 4);
        fx.flush_remaining();
        assert_eq!(fx.buffered_bytes(), 4);
        fx.reset();
        assert_eq!(fx.buffered_bytes(), 0);
    }

    #[test]
    fn builtin_engine_changes_length() {
        let fx = transform(1);
        fx.set_tempo(2.0);
        let mut total = 0usize;
        let input = s16(&vec![1000i16; 800]);
        for _ in 0..10 {
            let mut buf = input.clone();
            if let ProcessResult::Success(n) = fx.process(&mut buf, input.len()) {
                total += n;
            }
        }
        fx.flush_remaining();
        let mut out = vec![0u8; 4096];
        loop {
            let n = fx.receive_remaining(&mut out);
            if n == 0 {
                break;
            }
            total += n;
        }
        // 8000 input frames at tempo 2 → 4000 frames of s16.
        assert_eq!(total / 2, 4000);
    }

    #[test]
    fn setters_are_safe_during_processing() {
        let fx = Arc::new(transform(2));
        let fx_ui = fx.clone();
        let ui = thread::spawn(move || {
            for i in 0..200 {
                fx_ui.set_tempo(if i % 2 == 0 { 1.25 } else { 1.0 });
                fx_ui.set_volume((i % 10) as f32 / 10.0, Channel::All);
                fx_ui.set_volume_balance(((i % 5) as f32 - 2.0) / 2.0);
            }
        });
        let input = s16(&vec![500i16; 512]);
        for _ in 0..200 {
            let mut buf = input.clone();
            let result = fx.process(&mut buf, input.len());
            assert_ne!(result, ProcessResult::Error);
        }
        ui.join().unwrap();
    }
}
