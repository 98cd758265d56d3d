//! Per-source resampling stream: the "AudioStream" external collaborator
//! from the specification, implemented here with `rubato`.
//!
//! Mono/stereo interleaved float32 PCM goes in at the buffer's native
//! sample rate; converted PCM at the context's output sample rate
//! (optionally re-ratioed for pitch) comes out. This is also the lock
//! shared by the mixer and the API thread for one source (see `Source`).

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::buffer::BufferFormat;

/// Pushed-pulled resampling stream for a single source.
///
/// Input is buffered as planar `Vec<f32>` per channel (rubato's native
/// shape); output is read back out as interleaved float32.
pub struct ResampleStream {
    channels: usize,
    resampler: Option<FastFixedIn<f32>>,
    input_fifo: Vec<Vec<f32>>,
    output_fifo: Vec<f32>,
    ratio: f64,
}

impl ResampleStream {
    /// Build a stream converting from `input_format` into
    /// `output_channels` at `output_rate`, with an initial pitch ratio of
    /// 1.0 (unchanged playback speed).
    pub fn new(input_format: BufferFormat, output_channels: usize, output_rate: u32) -> Self {
        let channels = input_format.channels as usize;
        let ratio = output_rate as f64 / input_format.sample_rate as f64;

        let resampler = if (ratio - 1.0).abs() < f64::EPSILON {
            None
        } else {
            FastFixedIn::new(ratio, 4.0, PolynomialDegree::Cubic, 1024, channels).ok()
        };

        let _ = output_channels; // channel up/downmix happens in the mixer's kernels, not here

        Self {
            channels,
            resampler,
            input_fifo: vec![Vec::new(); channels],
            output_fifo: Vec::new(),
            ratio,
        }
    }

    /// Adjust the playback frequency ratio (pitch). `factor` of 1.0 is
    /// unchanged; >1.0 plays faster/higher.
    pub fn set_pitch_ratio(&mut self, factor: f64) {
        if let Some(r) = self.resampler.as_mut() {
            let _ = r.set_resample_ratio(self.ratio * factor, true);
        }
    }

    /// Push interleaved PCM for this stream's declared input format.
    pub fn push_interleaved(&mut self, interleaved: &[f32]) {
        for (i, frame) in interleaved.chunks_exact(self.channels).enumerate() {
            for (ch, &sample) in frame.iter().enumerate() {
                let _ = i;
                self.input_fifo[ch].push(sample);
            }
        }
    }

    /// Pull up to `frames` interleaved frames of converted output,
    /// returning fewer if the input has run dry. Consumes whatever input
    /// it needed to produce them.
    pub fn pull_interleaved(&mut self, frames: usize) -> Vec<f32> {
        self.fill_output_fifo(frames);
        let want = (frames * self.channels).min(self.output_fifo.len());
        self.output_fifo.drain(..want).collect()
    }

    fn fill_output_fifo(&mut self, frames: usize) {
        while self.output_fifo.len() < frames * self.channels {
            let Some(resampler) = self.resampler.as_mut() else {
                // 1:1 ratio: pass input straight through.
                let available = self.input_fifo[0].len();
                if available == 0 {
                    return;
                }
                for ch in 0..self.channels {
                    self.output_fifo.extend(self.input_fifo[ch].drain(..));
                    if ch + 1 < self.channels {
                        // interleave below once all channels drained; see note
                    }
                }
                self.interleave_in_place();
                return;
            };

            let needed = resampler.input_frames_next();
            if self.input_fifo[0].len() < needed {
                return;
            }

            let chunk: Vec<Vec<f32>> = self
                .input_fifo
                .iter_mut()
                .map(|ch| ch.drain(..needed).collect())
                .collect();

            match resampler.process(&chunk, None) {
                Ok(out) => {
                    let out_frames = out[0].len();
                    for f in 0..out_frames {
                        for ch in out.iter() {
                            self.output_fifo.push(ch[f]);
                        }
                    }
                }
                Err(e) => {
                    log::warn!("resampler process failed: {e}");
                    return;
                }
            }
        }
    }

    /// Deinterleave bypass path for the 1:1-ratio case only reaches here
    /// with planar channel buffers already drained into `output_fifo` in
    /// channel-major order; flip it to frame-major (interleaved) order.
    fn interleave_in_place(&mut self) {
        if self.channels <= 1 || self.output_fifo.is_empty() {
            return;
        }
        let frames = self.output_fifo.len() / self.channels;
        let mut interleaved = Vec::with_capacity(self.output_fifo.len());
        for f in 0..frames {
            for ch in 0..self.channels {
                interleaved.push(self.output_fifo[ch * frames + f]);
            }
        }
        self.output_fifo = interleaved;
    }

    /// Drop all buffered input/output, e.g. on seek or stop.
    pub fn clear(&mut self) {
        for ch in &mut self.input_fifo {
            ch.clear();
        }
        self.output_fifo.clear();
        if let Some(r) = self.resampler.as_mut() {
            r.reset();
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}
