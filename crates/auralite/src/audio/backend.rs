//! Host audio backend glue: negotiates a device/config with `cpal` and
//! drives the engine's mixer from the resulting stream callback.

use std::sync::Arc;

use crate::config::{AudioEngineConfig, BufferSizePreference};
use crate::device::Device;

use super::error::AudioResult;

/// Maximum frames we ever pre-allocate output buffers for, regardless of
/// the negotiated stream buffer size.
pub const MAX_BUFFER_SIZE: usize = 8192;
pub const DEFAULT_BUFFER_SIZE: u32 = 512;
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Keeps the output stream alive; dropping it stops audio.
pub struct AudioHandle {
    _stream: super::cpal_backend::CpalStream,
    sample_rate: u32,
    buffer_size: u32,
}

impl AudioHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }
}

/// Open the host's audio output and start driving `device`'s contexts.
pub fn start_audio_system(config: &AudioEngineConfig, device: Arc<Device>) -> AudioResult<AudioHandle> {
    let (stream, sample_rate, buffer_size) = super::cpal_backend::build_output_stream(config, device)?;
    Ok(AudioHandle { _stream: stream, sample_rate, buffer_size })
}

pub fn buffer_frames_for(preference: BufferSizePreference) -> u32 {
    match preference {
        BufferSizePreference::Default => DEFAULT_BUFFER_SIZE,
        BufferSizePreference::Fixed(frames) => frames.clamp(64, MAX_BUFFER_SIZE as u32),
        BufferSizePreference::LowLatency => 256,
    }
}
