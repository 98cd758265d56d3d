//! Context: the per-application-view of listener state, the source name
//! space, and the mixer. `MakeCurrent` / thread-local override mirror the
//! ALC context-switch contract.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::BufferStore;
use crate::error::{AlError, AlResult, LastErrorSlot};
use crate::mixer::Mixer;
use crate::source::{OffsetUnit, Source, SourceState};
use crate::spatial::{ChannelLayout, DistanceModel, ListenerState};
use crate::types::FrameBuffer;

thread_local! {
    static THREAD_CONTEXT: RefCell<Option<Arc<Context>>> = RefCell::new(None);
}

static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(1);

pub struct Context {
    pub id: usize,
    pub listener: Mutex<ListenerState>,
    sources: Mutex<Vec<Option<Arc<Source>>>>,
    free_source_names: Mutex<Vec<u32>>,
    mixer: Mutex<Mixer>,
    pub errors: LastErrorSlot,
    processing: AtomicBool,
    pub distance_model: Mutex<DistanceModel>,
    pub doppler_factor: Mutex<f32>,
    pub speed_of_sound: Mutex<f32>,
}

impl Context {
    pub fn new(output_rate: u32, layout: ChannelLayout) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            listener: Mutex::new(ListenerState::default()),
            sources: Mutex::new(Vec::new()),
            free_source_names: Mutex::new(Vec::new()),
            mixer: Mutex::new(Mixer::new(output_rate, layout)),
            errors: LastErrorSlot::new(),
            processing: AtomicBool::new(true),
            distance_model: Mutex::new(DistanceModel::default()),
            doppler_factor: Mutex::new(1.0),
            speed_of_sound: Mutex::new(343.3),
        })
    }

    /// Make this context current on the calling thread and as the
    /// process-wide default (spec §4.6's dual-level contract).
    pub fn make_current(self: &Arc<Self>) {
        THREAD_CONTEXT.with(|c| *c.borrow_mut() = Some(self.clone()));
    }

    /// Clear the calling thread's context override.
    pub fn clear_thread_current() {
        THREAD_CONTEXT.with(|c| *c.borrow_mut() = None);
    }

    pub fn current() -> Option<Arc<Context>> {
        THREAD_CONTEXT.with(|c| c.borrow().clone())
    }

    pub fn gen_sources(&self, n: usize) -> AlResult<Vec<u32>> {
        let mut sources = self.sources.lock().unwrap();
        let mut free = self.free_source_names.lock().unwrap();
        let mut names = Vec::with_capacity(n);

        for _ in 0..n {
            let (idx, name) = if let Some(name) = free.pop() {
                ((name - 1) as usize, name)
            } else {
                sources.push(None);
                (sources.len() - 1, sources.len() as u32)
            };
            sources[idx] = Some(Arc::new(Source::new(name)));
            names.push(name);
        }
        Ok(names)
    }

    pub fn delete_sources(&self, names: &[u32]) -> AlResult<()> {
        let result = (|| {
            let sources = self.sources.lock().unwrap();
            for &name in names {
                let slot = sources.get((name.wrapping_sub(1)) as usize).ok_or(AlError::InvalidName)?;
                let source = slot.as_ref().ok_or(AlError::InvalidName)?;
                if source.is_mixer_accessible() {
                    return Err(AlError::InvalidOperation);
                }
            }
            drop(sources);

            let mut sources = self.sources.lock().unwrap();
            let mut free = self.free_source_names.lock().unwrap();
            for &name in names {
                sources[(name - 1) as usize] = None;
                free.push(name);
            }
            Ok(())
        })();
        if let Err(e) = result {
            self.errors.record(e);
        }
        result
    }

    pub fn get_source(&self, name: u32) -> AlResult<Arc<Source>> {
        let result = self
            .sources
            .lock()
            .unwrap()
            .get((name.wrapping_sub(1)) as usize)
            .and_then(|s| s.clone())
            .ok_or(AlError::InvalidName);
        if let Err(e) = result {
            self.errors.record(e);
        }
        result
    }

    pub fn play_source(&self, buffers: &BufferStore, name: u32) -> AlResult<()> {
        let source = self.get_source(name)?;
        source.play();
        self.mixer.lock().unwrap().admit(source);
        Ok(())
    }

    /// Bind a buffer to a source, recording any failure on this context's
    /// error slot (mirrors `alSourcei(AL_BUFFER)`).
    pub fn set_source_buffer(&self, buffers: &BufferStore, source_name: u32, buffer_name: u32) -> AlResult<()> {
        let source = self.get_source(source_name)?;
        let result = source.set_buffer(buffers, buffer_name);
        if let Err(e) = result {
            self.errors.record(e);
        }
        result
    }

    /// Queue buffers onto a streaming source (mirrors `alSourceQueueBuffers`).
    pub fn queue_source_buffers(&self, buffers: &BufferStore, source_name: u32, buffer_names: &[u32]) -> AlResult<()> {
        let source = self.get_source(source_name)?;
        let result = source.queue_buffers(buffers, buffer_names);
        if let Err(e) = result {
            self.errors.record(e);
        }
        result
    }

    /// Unqueue processed buffers from a source (mirrors
    /// `alSourceUnqueueBuffers`).
    pub fn unqueue_source_buffers(&self, buffers: &BufferStore, source_name: u32, n: usize) -> AlResult<Vec<u32>> {
        let source = self.get_source(source_name)?;
        let result = source.unqueue_buffers(buffers, n);
        if let Err(e) = result {
            self.errors.record(e);
        }
        result
    }

    /// Seek a source (mirrors `alSourcef(AL_(SEC|SAMPLE|BYTE)_OFFSET)`).
    pub fn set_source_offset(&self, source_name: u32, unit: OffsetUnit, value: f64, sample_rate: u32, channels: u8) -> AlResult<()> {
        let source = self.get_source(source_name)?;
        let result = source.set_offset(unit, value, sample_rate, channels);
        if let Err(e) = result {
            self.errors.record(e);
        }
        result
    }

    /// Read and clear this context's sticky error slot (mirrors
    /// `alGetError`).
    pub fn get_error(&self) -> Option<AlError> {
        self.errors.take()
    }

    pub fn suspend(&self) {
        self.processing.store(false, Ordering::Release);
    }

    pub fn resume(&self) {
        self.processing.store(true, Ordering::Release);
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Mix one block into `out`. Fills `out` with silence instead of mixing
    /// while suspended.
    pub fn process(&self, buffers: &BufferStore, out: &mut FrameBuffer, frames: usize) {
        if !self.is_processing() {
            out.set_len_from_capacity(frames);
            out.fill_silence();
            return;
        }
        let listener = *self.listener.lock().unwrap();
        self.mixer.lock().unwrap().mix_block(buffers, &listener, out, frames);
    }

    /// Force every PLAYING/PAUSED source to STOPPED, draining its pending
    /// buffers into processed, and drop the mixer's playlist without
    /// mixing. Called once per tick while the owning device is
    /// disconnected (spec §4.5).
    pub fn force_stop_all(&self) {
        let sources = self.sources.lock().unwrap();
        for source in sources.iter().flatten() {
            if matches!(source.state(), SourceState::Playing | SourceState::Paused) {
                source.stop();
            }
        }
        drop(sources);
        self.mixer.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gen_then_delete_frees_name_for_reuse() {
        let ctx = Context::new(48000, ChannelLayout::Stereo);
        let names = ctx.gen_sources(2).unwrap();
        assert_eq!(names, vec![1, 2]);
        ctx.delete_sources(&[1]).unwrap();
        let more = ctx.gen_sources(1).unwrap();
        assert_eq!(more, vec![1]);
    }

    #[test]
    fn delete_mixer_accessible_source_is_invalid_operation() {
        let ctx = Context::new(48000, ChannelLayout::Stereo);
        let names = ctx.gen_sources(1).unwrap();
        let buffers = BufferStore::new();
        ctx.play_source(&buffers, names[0]).unwrap();
        let err = ctx.delete_sources(&names).unwrap_err();
        assert_eq!(err, AlError::InvalidOperation);
    }

    #[test]
    fn make_current_sets_thread_local() {
        let ctx = Context::new(48000, ChannelLayout::Stereo);
        ctx.make_current();
        assert!(Context::current().is_some());
        Context::clear_thread_current();
        assert!(Context::current().is_none());
    }

    #[test]
    fn suspended_context_outputs_silence() {
        let ctx = Context::new(48000, ChannelLayout::Stereo);
        ctx.suspend();
        let buffers = BufferStore::new();
        let mut out = FrameBuffer::with_capacity(2, 64);
        out.set_len_from_capacity(32);
        out.as_mut_slice().fill(0.5);
        ctx.process(&buffers, &mut out, 32);
        assert!(out.as_slice().iter().all(|&s| s == 0.0));
    }
}
