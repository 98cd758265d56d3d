//! The source: a playable emitter with a state machine, buffer binding or
//! queue, and offset bookkeeping.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::buffer::BufferStore;
use crate::error::{AlError, AlResult};
use crate::queue::{BufferQueue, BufferQueueItem};
use crate::spatial::{DistanceModel, SpatialOutput};
use crate::stream::ResampleStream;
use crate::types::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceState {
    Initial = 0,
    Playing = 1,
    Paused = 2,
    Stopped = 3,
}

impl SourceState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SourceState::Playing,
            2 => SourceState::Paused,
            3 => SourceState::Stopped,
            _ => SourceState::Initial,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Undetermined,
    Static,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetUnit {
    Seconds,
    Samples,
    Bytes,
}

/// Scalar/vector parameters an application can set on a source. Mirrors
/// spec §3's Source parameter list, minus the bookkeeping fields that live
/// directly on `Source` (state, type, buffer bindings).
#[derive(Debug, Clone)]
pub struct SourceParams {
    pub position: Vec3,
    pub velocity: Vec3,
    pub direction: Vec3,
    pub gain: f32,
    pub min_gain: f32,
    pub max_gain: f32,
    pub reference_distance: f32,
    pub max_distance: f32,
    pub rolloff: f32,
    pub pitch: f32,
    pub cone_inner_angle_deg: f32,
    pub cone_outer_angle_deg: f32,
    pub cone_outer_gain: f32,
    pub distance_model: Option<DistanceModel>,
    pub looping: bool,
    pub source_relative: bool,
}

impl Default for SourceParams {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            direction: Vec3::ZERO,
            gain: 1.0,
            min_gain: 0.0,
            max_gain: 1.0,
            reference_distance: 1.0,
            max_distance: f32::MAX,
            rolloff: 1.0,
            pitch: 1.0,
            cone_inner_angle_deg: 360.0,
            cone_outer_angle_deg: 360.0,
            cone_outer_gain: 0.0,
            distance_model: None,
            looping: false,
            source_relative: false,
        }
    }
}

/// Mutable playback bookkeeping, guarded by the same lock as the
/// resampling stream (spec §5: "a single lock serves both purposes").
struct PlaybackState {
    bound_buffer: Option<u32>,
    offset_frames: usize,
    pending_offset_frames: Option<usize>,
    stream: Option<ResampleStream>,
    current_pending_item: Option<BufferQueueItem>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            bound_buffer: None,
            offset_frames: 0,
            pending_offset_frames: None,
            stream: None,
            current_pending_item: None,
        }
    }
}

pub struct Source {
    pub name: u32,
    state: AtomicU8,
    source_type: Mutex<SourceType>,
    mixer_accessible: AtomicBool,
    recalc: AtomicBool,
    pub params: Mutex<SourceParams>,
    playback: Mutex<PlaybackState>,
    pub pending: BufferQueue,
    pub processed: BufferQueue,
    pub cached_spatial: Mutex<SpatialOutput>,
}

impl Source {
    pub fn new(name: u32) -> Self {
        Self {
            name,
            state: AtomicU8::new(SourceState::Initial as u8),
            source_type: Mutex::new(SourceType::Undetermined),
            mixer_accessible: AtomicBool::new(false),
            recalc: AtomicBool::new(true),
            params: Mutex::new(SourceParams::default()),
            playback: Mutex::new(PlaybackState::default()),
            pending: BufferQueue::new(),
            processed: BufferQueue::new(),
            cached_spatial: Mutex::new(SpatialOutput::default()),
        }
    }

    pub fn state(&self) -> SourceState {
        SourceState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SourceState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn source_type(&self) -> SourceType {
        *self.source_type.lock().unwrap()
    }

    pub fn is_mixer_accessible(&self) -> bool {
        self.mixer_accessible.load(Ordering::Acquire)
    }

    pub fn set_mixer_accessible(&self, v: bool) {
        self.mixer_accessible.store(v, Ordering::Release);
    }

    pub fn mark_recalc(&self) {
        self.recalc.store(true, Ordering::Release);
    }

    pub fn take_recalc(&self) -> bool {
        self.recalc.swap(false, Ordering::AcqRel)
    }

    /// Bind a single static buffer. Permitted only from INITIAL or STOPPED.
    pub fn set_buffer(&self, buffers: &BufferStore, name: u32) -> AlResult<()> {
        match self.state() {
            SourceState::Initial | SourceState::Stopped => {}
            _ => return Err(AlError::InvalidOperation),
        }

        let mut playback = self.playback.lock().unwrap();
        let mut source_type = self.source_type.lock().unwrap();

        if let Some(old) = playback.bound_buffer.take() {
            buffers.get(old)?.decref();
        }
        for item in self.pending.take_all() {
            buffers.get(item.buffer_name)?.decref();
        }
        for item in self.processed.take_all() {
            buffers.get(item.buffer_name)?.decref();
        }

        if name == 0 {
            *source_type = SourceType::Undetermined;
            playback.bound_buffer = None;
        } else {
            buffers.get(name)?.incref();
            *source_type = SourceType::Static;
            playback.bound_buffer = Some(name);
        }
        playback.offset_frames = 0;
        playback.stream = None;
        Ok(())
    }

    /// Queue buffers onto a streaming source. Rolls back refcounts for any
    /// names already processed in this call if a later name is invalid.
    pub fn queue_buffers(&self, buffers: &BufferStore, names: &[u32]) -> AlResult<()> {
        if self.source_type() == SourceType::Static {
            return Err(AlError::InvalidOperation);
        }

        let mut format_ref: Option<(u8, u32)> = None;
        {
            let playback = self.playback.lock().unwrap();
            if let Some(bound) = playback.bound_buffer {
                if let Ok(slot) = buffers.get(bound) {
                    if let Some(rec) = slot.record() {
                        format_ref = Some((rec.format.channels, rec.format.sample_rate));
                    }
                }
            }
        }
        if format_ref.is_none() {
            if let Some(front) = self.pending.front().or_else(|| self.processed.front()) {
                if let Ok(slot) = buffers.get(front.buffer_name) {
                    if let Some(rec) = slot.record() {
                        format_ref = Some((rec.format.channels, rec.format.sample_rate));
                    }
                }
            }
        }

        let mut acquired = Vec::with_capacity(names.len());
        for &name in names {
            let slot = match buffers.get(name) {
                Ok(s) => s,
                Err(e) => {
                    for acquired_name in &acquired {
                        let _ = buffers.get(*acquired_name).map(|s| s.decref());
                    }
                    return Err(e);
                }
            };
            let rec = match slot.record() {
                Some(r) => r,
                None => {
                    for acquired_name in &acquired {
                        let _ = buffers.get(*acquired_name).map(|s| s.decref());
                    }
                    return Err(AlError::InvalidValue);
                }
            };
            if let Some((ch, hz)) = format_ref {
                if rec.format.channels != ch || rec.format.sample_rate != hz {
                    for acquired_name in &acquired {
                        let _ = buffers.get(*acquired_name).map(|s| s.decref());
                    }
                    return Err(AlError::InvalidValue);
                }
            } else {
                format_ref = Some((rec.format.channels, rec.format.sample_rate));
            }
            slot.incref();
            acquired.push(name);
        }

        let items = acquired.iter().map(|&name| {
            let frame_count = buffers.get(name).ok().and_then(|s| s.record()).map(|r| r.frame_count()).unwrap_or(0);
            BufferQueueItem { buffer_name: name, frame_count }
        });
        self.pending.append(items);
        *self.source_type.lock().unwrap() = SourceType::Streaming;
        Ok(())
    }

    /// Unqueue the first `n` processed buffers, FIFO.
    pub fn unqueue_buffers(&self, buffers: &BufferStore, n: usize) -> AlResult<Vec<u32>> {
        self.processed.drain_into_local();
        if self.processed.len() < n {
            return Err(AlError::InvalidValue);
        }
        let mut names = Vec::with_capacity(n);
        for _ in 0..n {
            let item = self.processed.pop_front().expect("checked length above");
            buffers.get(item.buffer_name)?.decref();
            names.push(item.buffer_name);
        }
        Ok(names)
    }

    /// Pending plus processed, plus the one item actively being mixed (if
    /// any), which sits in neither queue while it's current.
    pub fn buffers_queued(&self) -> usize {
        let active = self.playback.lock().unwrap().current_pending_item.is_some() as usize;
        self.pending.len() + self.processed.len() + active
    }

    pub fn buffers_processed(&self) -> usize {
        self.processed.len()
    }

    pub fn play(&self) {
        let mut playback = self.playback.lock().unwrap();
        match self.state() {
            SourceState::Paused => {}
            _ => {
                if let Some(frames) = playback.pending_offset_frames.take() {
                    playback.offset_frames = frames;
                } else {
                    playback.offset_frames = 0;
                }
                playback.stream = None;
            }
        }
        self.set_state(SourceState::Playing);
        self.set_mixer_accessible(true);
        self.mark_recalc();
    }

    pub fn pause(&self) {
        if self.state() == SourceState::Playing {
            self.set_state(SourceState::Paused);
        }
    }

    pub fn stop(&self) {
        let state = self.state();
        if state == SourceState::Playing || state == SourceState::Paused {
            let mut playback = self.playback.lock().unwrap();
            if let Some(item) = playback.current_pending_item.take() {
                self.processed.append([item]);
            }
            for item in self.pending.take_all() {
                self.processed.append([item]);
            }
            playback.stream = None;
        }
        self.set_state(SourceState::Stopped);
    }

    pub fn rewind(&self) {
        let mut playback = self.playback.lock().unwrap();
        playback.offset_frames = 0;
        playback.pending_offset_frames = None;
        playback.stream = None;
        self.set_state(SourceState::Initial);
    }

    /// spec §9 open question: rejected for STREAMING sources.
    pub fn set_offset(&self, unit: OffsetUnit, value: f64, sample_rate: u32, channels: u8) -> AlResult<()> {
        if self.source_type() == SourceType::Streaming {
            return Err(AlError::InvalidOperation);
        }
        let frames = offset_to_frames(unit, value, sample_rate, channels);
        let mut playback = self.playback.lock().unwrap();
        if self.state() == SourceState::Playing {
            playback.offset_frames = frames;
            playback.stream = None;
        } else {
            playback.pending_offset_frames = Some(frames);
        }
        Ok(())
    }

    pub fn get_offset(&self, unit: OffsetUnit, sample_rate: u32, channels: u8) -> f64 {
        let playback = self.playback.lock().unwrap();
        let frames = if self.source_type() == SourceType::Streaming {
            self.processed.total_frames() + playback.offset_frames
        } else {
            playback.offset_frames
        };
        frames_to_offset(unit, frames, sample_rate, channels)
    }

    pub(crate) fn playback_offset_frames(&self) -> usize {
        self.playback.lock().unwrap().offset_frames
    }

    pub(crate) fn set_playback_offset_frames(&self, frames: usize) {
        self.playback.lock().unwrap().offset_frames = frames;
    }

    pub(crate) fn take_stream(&self) -> Option<ResampleStream> {
        self.playback.lock().unwrap().stream.take()
    }

    pub(crate) fn put_stream(&self, stream: ResampleStream) {
        self.playback.lock().unwrap().stream = Some(stream);
    }

    pub(crate) fn has_stream(&self) -> bool {
        self.playback.lock().unwrap().stream.is_some()
    }

    pub(crate) fn bound_buffer(&self) -> Option<u32> {
        self.playback.lock().unwrap().bound_buffer
    }

    pub(crate) fn current_pending_item(&self) -> Option<BufferQueueItem> {
        self.playback.lock().unwrap().current_pending_item
    }

    pub(crate) fn set_current_pending_item(&self, item: Option<BufferQueueItem>) {
        self.playback.lock().unwrap().current_pending_item = item;
    }

    pub fn looping(&self) -> bool {
        self.params.lock().unwrap().looping
    }
}

fn offset_to_frames(unit: OffsetUnit, value: f64, sample_rate: u32, channels: u8) -> usize {
    match unit {
        OffsetUnit::Seconds => (value * sample_rate as f64).round() as usize,
        OffsetUnit::Samples => value.round() as usize,
        OffsetUnit::Bytes => {
            let bytes_per_frame = (channels as usize) * std::mem::size_of::<f32>();
            (value / bytes_per_frame as f64).round() as usize
        }
    }
}

fn frames_to_offset(unit: OffsetUnit, frames: usize, sample_rate: u32, channels: u8) -> f64 {
    match unit {
        OffsetUnit::Seconds => frames as f64 / sample_rate as f64,
        OffsetUnit::Samples => frames as f64,
        OffsetUnit::Bytes => {
            let bytes_per_frame = (channels as usize) * std::mem::size_of::<f32>();
            frames as f64 * bytes_per_frame as f64
        }
    }
}
