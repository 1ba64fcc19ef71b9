//! Time-stretch engines.
//!
//! [`TimeStretch`] is the seam between the effects stage and a concrete algorithm. The
//! built-in [`SignalsmithStretcher`] wraps `signalsmith_stretch::Stretch`: the tempo ratio is
//! the ratio of input to output frames handed to each `process` call, pitch is the engine's
//! transpose factor.

use std::collections::VecDeque;
use std::sync::Arc;

use signalsmith_stretch::Stretch;

use crate::config::StretchPreset;

/// Interleaved `f32` time-stretch engine.
///
/// Output length is not a fixed multiple of input length: the engine buffers input until it
/// has enough to emit audio, and holds the tail until [`flush`](TimeStretch::flush).
pub trait TimeStretch: Send {
    /// Feed interleaved samples (whole frames).
    fn put_samples(&mut self, samples: &[f32]);

    /// Move up to `out.len()` ready samples (whole frames) into `out`; returns samples written.
    fn receive_samples(&mut self, out: &mut [f32]) -> usize;

    /// Process everything still buffered so it becomes receivable. The next `put_samples`
    /// starts a fresh stream.
    fn flush(&mut self);

    /// Ready samples waiting in the output buffer.
    fn available_samples(&self) -> usize;

    /// Discard all buffered input and output.
    fn clear(&mut self);
}

/// Everything an engine factory needs to build an engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StretchSetup {
    pub sample_rate: u32,
    pub channels: usize,
    pub tempo: f64,
    pub semitones: i32,
    pub preset: StretchPreset,
}

pub type StretchFactory = Arc<dyn Fn(&StretchSetup) -> Box<dyn TimeStretch> + Send + Sync>;

/// Factory building the built-in [`SignalsmithStretcher`].
pub fn signalsmith_factory() -> StretchFactory {
    Arc::new(|setup: &StretchSetup| {
        Box::new(SignalsmithStretcher::new(setup)) as Box<dyn TimeStretch>
    })
}

/// Streaming adapter over `signalsmith_stretch::Stretch`.
///
/// Each stream starts by dropping the engine's latency from the output and ends (on `flush`)
/// by pushing `input_latency` frames of silence through it and draining the rest, so the
/// stream comes out exactly `round(frames_in / tempo)` frames long and time-aligned.
pub struct SignalsmithStretcher {
    stretch: Stretch,
    channels: usize,
    tempo: f64,
    /// Output frames still to drop at the start of the current stream.
    skip: usize,
    /// Real input frames of the current stream.
    frames_in: u64,
    /// Input frames handed to the engine, flush padding included.
    fed_in: u64,
    /// Output frames requested from the engine.
    fed_out: u64,
    /// Output frames of the current stream moved to `output`.
    emitted: u64,
    scratch: Vec<f32>,
    output: VecDeque<f32>,
}

impl SignalsmithStretcher {
    pub fn new(setup: &StretchSetup) -> Self {
        let channels = setup.channels.max(1);
        let sample_rate = setup.sample_rate.max(1);
        let mut stretch = match setup.preset {
            StretchPreset::Default => Stretch::preset_default(channels as u32, sample_rate),
            StretchPreset::Cheaper => Stretch::preset_cheaper(channels as u32, sample_rate),
        };
        if setup.semitones != 0 {
            stretch.set_transpose_factor_semitones(setup.semitones as f32, None);
        }
        let tempo = if setup.tempo.is_finite() && setup.tempo > 0.0 {
            setup.tempo
        } else {
            1.0
        };

        let mut engine = Self {
            stretch,
            channels,
            tempo,
            skip: 0,
            frames_in: 0,
            fed_in: 0,
            fed_out: 0,
            emitted: 0,
            scratch: Vec::new(),
            output: VecDeque::new(),
        };
        engine.skip = engine.latency_frames();
        engine
    }

    /// Output frames by which the engine lags its input.
    pub fn latency_frames(&self) -> usize {
        let input = (self.stretch.input_latency() as f64 / self.tempo).round() as usize;
        input + self.stretch.output_latency()
    }

    /// Run `input` through the engine, requesting as many output frames as the tempo owes.
    fn feed(&mut self, input: &[f32]) {
        let ch = self.channels;
        self.fed_in += (input.len() / ch) as u64;
        let owed = (self.fed_in as f64 / self.tempo).round() as u64;
        let frames = owed.saturating_sub(self.fed_out) as usize;
        self.fed_out += frames as u64;

        self.scratch.clear();
        self.scratch.resize(frames * ch, 0.0);
        self.stretch.process(input, &mut self.scratch[..]);
        self.emit_scratch();
    }

    fn emit_scratch(&mut self) {
        let ch = self.channels;
        let frames = self.scratch.len() / ch;
        let skipped = frames.min(self.skip);
        self.skip -= skipped;
        self.emitted += (frames - skipped) as u64;
        self.output.extend(self.scratch[skipped * ch..].iter().copied());
    }

    /// Trim or pad the current stream to `target` frames.
    fn fit_to(&mut self, target: u64) {
        let ch = self.channels;
        if self.emitted > target {
            let excess = (self.emitted - target) as usize * ch;
            self.output.truncate(self.output.len() - excess);
        } else {
            let missing = (target - self.emitted) as usize * ch;
            self.output.extend(std::iter::repeat_n(0.0, missing));
        }
        self.emitted = target;
    }

    fn restart(&mut self) {
        self.stretch.reset();
        self.frames_in = 0;
        self.fed_in = 0;
        self.fed_out = 0;
        self.emitted = 0;
        self.skip = self.latency_frames();
    }
}

impl TimeStretch for SignalsmithStretcher {
    fn put_samples(&mut self, samples: &[f32]) {
        let ch = self.channels;
        let whole = samples.len() - samples.len() % ch;
        if whole == 0 {
            return;
        }
        self.frames_in += (whole / ch) as u64;
        self.feed(&samples[..whole]);
    }

    fn receive_samples(&mut self, out: &mut [f32]) -> usize {
        let ch = self.channels;
        let n = (out.len() - out.len() % ch).min(self.output.len());
        for (dst, src) in out[..n].iter_mut().zip(self.output.drain(..n)) {
            *dst = src;
        }
        n
    }

    fn flush(&mut self) {
        if self.frames_in == 0 {
            return;
        }
        let ch = self.channels;
        let target = (self.frames_in as f64 / self.tempo).round() as u64;

        let silence = vec![0.0f32; self.stretch.input_latency() * ch];
        self.feed(&silence);
        self.scratch.clear();
        self.scratch.resize(self.stretch.output_latency() * ch, 0.0);
        self.stretch.flush(&mut self.scratch[..]);
        self.emit_scratch();

        self.fit_to(target);
        self.restart();
    }

    fn available_samples(&self) -> usize {
        self.output.len()
    }

    fn clear(&mut self) {
        self.output.clear();
        self.scratch.clear();
        self.restart();
    }
}
