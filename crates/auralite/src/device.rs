//! The OpenAL-level device: buffer storage, attached contexts, and the
//! capture ring buffer. Not to be confused with `audio::device`, which
//! enumerates the host's physical output devices.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::BufferStore;
use crate::context::Context;
use crate::error::{AlError, AlResult, LastErrorSlot};
use crate::spatial::ChannelLayout;

/// Discard-oldest-on-overflow capture buffer. Never yields a partial read:
/// `read` only succeeds once at least `frames` samples are queued.
pub struct CaptureBuffer {
    channels: usize,
    capacity_frames: usize,
    ring: Mutex<VecDeque<f32>>,
}

impl CaptureBuffer {
    pub fn new(channels: usize, capacity_frames: usize) -> Self {
        Self { channels, capacity_frames, ring: Mutex::new(VecDeque::with_capacity(channels * capacity_frames)) }
    }

    /// Push newly captured interleaved PCM, discarding the oldest frames if
    /// the ring is full.
    pub fn push(&self, interleaved: &[f32]) {
        let mut ring = self.ring.lock().unwrap();
        let cap_samples = self.channels * self.capacity_frames;
        for &s in interleaved {
            if ring.len() >= cap_samples {
                ring.pop_front();
            }
            ring.push_back(s);
        }
    }

    pub fn available_frames(&self) -> usize {
        self.ring.lock().unwrap().len() / self.channels
    }

    /// Read exactly `frames` frames, or fail with InvalidValue if fewer are
    /// available. No partial reads.
    pub fn read(&self, frames: usize) -> AlResult<Vec<f32>> {
        let mut ring = self.ring.lock().unwrap();
        let want = frames * self.channels;
        if ring.len() < want {
            return Err(AlError::InvalidValue);
        }
        Ok(ring.drain(..want).collect())
    }
}

pub struct Device {
    pub name: String,
    connected: AtomicBool,
    pub errors: LastErrorSlot,
    pub buffers: BufferStore,
    contexts: Mutex<Vec<Arc<Context>>>,
    pub capture: CaptureBuffer,
    pub output_rate: u32,
    pub layout: ChannelLayout,
    /// Pre-allocated so `process_all` never allocates from the audio
    /// callback; sized once for the largest buffer this device will ever
    /// be asked to fill.
    scratch: Mutex<crate::types::FrameBuffer>,
}

/// Largest block size `process_all` is ever asked to fill in one callback.
const MAX_CALLBACK_FRAMES: usize = 8192;

impl Device {
    pub fn open(name: impl Into<String>, output_rate: u32, layout: ChannelLayout) -> Arc<Self> {
        let channels = layout.channel_count();
        Arc::new(Self {
            name: name.into(),
            connected: AtomicBool::new(true),
            errors: LastErrorSlot::new(),
            buffers: BufferStore::new(),
            contexts: Mutex::new(Vec::new()),
            capture: CaptureBuffer::new(1, output_rate as usize * 2),
            output_rate,
            layout,
            scratch: Mutex::new(crate::types::FrameBuffer::with_capacity(channels, MAX_CALLBACK_FRAMES)),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Mark the device disconnected. Per spec §4.7, subsequent `Play` calls
    /// on its sources are accepted (state advances) but never reach the
    /// mixer, since there is no hardware callback left to drive it.
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    pub fn create_context(self: &Arc<Self>) -> Arc<Context> {
        let ctx = Context::new(self.output_rate, self.layout);
        self.contexts.lock().unwrap().push(ctx.clone());
        ctx
    }

    pub fn destroy_context(&self, ctx: &Arc<Context>) {
        self.contexts.lock().unwrap().retain(|c| !Arc::ptr_eq(c, ctx));
    }

    /// Allocate buffer names, recording any failure on this device's error
    /// slot (mirrors `alGenBuffers`).
    pub fn generate_buffers(&self, n: usize) -> AlResult<Vec<u32>> {
        let result = self.buffers.generate(n);
        if let Err(e) = result.as_ref() {
            self.errors.record(*e);
        }
        result
    }

    /// Delete buffer names, recording any failure on this device's error
    /// slot (mirrors `alDeleteBuffers`).
    pub fn delete_buffers(&self, names: &[u32]) -> AlResult<()> {
        let result = self.buffers.delete(names);
        if let Err(e) = result {
            self.errors.record(e);
        }
        result
    }

    /// Upload PCM into a buffer, recording any failure on this device's
    /// error slot (mirrors `alBufferData`).
    pub fn buffer_data(&self, name: u32, format: crate::buffer::BufferFormat, payload: Vec<f32>) -> AlResult<()> {
        let result = self.buffers.load(name, format, payload);
        if let Err(e) = result {
            self.errors.record(e);
        }
        result
    }

    /// Read and clear this device's sticky error slot (mirrors
    /// `alcGetError`).
    pub fn get_error(&self) -> Option<AlError> {
        self.errors.take()
    }

    /// Mix every attached context into `out`, summing their contributions.
    /// Called from the audio callback. While disconnected, forces every
    /// playing or paused source across every context to STOPPED (draining
    /// its pending buffers into processed) and outputs silence instead of
    /// mixing, per spec §4.5's disconnect model.
    pub fn process_all(&self, out: &mut crate::types::FrameBuffer, frames: usize) {
        out.set_len_from_capacity(frames);
        out.fill_silence();

        let contexts = self.contexts.lock().unwrap();
        if contexts.is_empty() {
            return;
        }

        if !self.is_connected() {
            for ctx in contexts.iter() {
                ctx.force_stop_all();
            }
            return;
        }

        let mut scratch = self.scratch.lock().unwrap();
        scratch.set_len_from_capacity(frames);
        for ctx in contexts.iter() {
            ctx.process(&self.buffers, &mut scratch, frames);
            for (dst, src) in out.as_mut_slice().iter_mut().zip(scratch.as_slice()) {
                *dst += src;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_buffer_discards_oldest_on_overflow() {
        let cap = CaptureBuffer::new(1, 4);
        cap.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(cap.available_frames(), 4);
        let out = cap.read(4).unwrap();
        assert_eq!(out, vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn capture_read_rejects_partial_reads() {
        let cap = CaptureBuffer::new(1, 4);
        cap.push(&[1.0, 2.0]);
        assert_eq!(cap.read(4).unwrap_err(), AlError::InvalidValue);
    }

    #[test]
    fn play_on_disconnected_source_is_forced_to_stopped_on_next_tick() {
        let device = Device::open("test", 48000, ChannelLayout::Stereo);
        let ctx = device.create_context();
        let names = ctx.gen_sources(1).unwrap();
        let buf = device.generate_buffers(1).unwrap();
        device.buffer_data(buf[0], crate::buffer::BufferFormat { channels: 1, sample_rate: 48000 }, vec![0.0; 32]).unwrap();
        ctx.queue_source_buffers(&device.buffers, names[0], &buf).unwrap();
        device.mark_disconnected();

        // Scenario 4 from spec §8: play on a disconnected device still
        // transitions the source to PLAYING immediately...
        let source = ctx.get_source(names[0]).unwrap();
        source.play();
        assert_eq!(source.state(), crate::source::SourceState::Playing);
        assert!(!device.is_connected());

        // ...but within one mixer tick it is forced to STOPPED with its
        // queued buffer moved into processed.
        let mut out = crate::types::FrameBuffer::with_capacity(2, 64);
        device.process_all(&mut out, 32);
        assert_eq!(source.state(), crate::source::SourceState::Stopped);
        assert_eq!(source.buffers_processed(), 1);
        assert!(out.as_slice().iter().all(|&s| s == 0.0));
    }
}
