//! `cpal`-backed output stream: negotiates a device/config, then drives the
//! device's mixer from the stream callback.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, StreamConfig};

use crate::config::AudioEngineConfig;
use crate::device::Device;
use crate::types::FrameBuffer;

use super::backend::{buffer_frames_for, DEFAULT_SAMPLE_RATE, MAX_BUFFER_SIZE};
use super::device::{find_device_by_name, get_cpal_default_device};
use super::error::{AudioError, AudioResult};

pub struct CpalStream {
    _stream: cpal::Stream,
}

/// Negotiated output configuration: (cpal config, buffer size in frames).
fn negotiate_output_config(device: &cpal::Device, config: &AudioEngineConfig) -> AudioResult<(cpal::SupportedStreamConfig, u32)> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();
    if supported.is_empty() {
        return Err(AudioError::ConfigError("no supported output configurations".to_string()));
    }

    let target_rate = config.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);

    let best = supported
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .find(|c| target_rate >= c.min_sample_rate().0 && target_rate <= c.max_sample_rate().0)
        .or_else(|| supported.iter().find(|c| c.sample_format() == SampleFormat::F32))
        .or_else(|| supported.first())
        .ok_or_else(|| AudioError::ConfigError("no suitable output configuration".to_string()))?;

    let rate = if target_rate >= best.min_sample_rate().0 && target_rate <= best.max_sample_rate().0 {
        cpal::SampleRate(target_rate)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!("device doesn't support {}Hz, falling back to {}Hz", target_rate, fallback.0);
        fallback
    };

    let stream_config = best.clone().with_sample_rate(rate);
    let buffer_size = buffer_frames_for(config.buffer_size).min(MAX_BUFFER_SIZE as u32);

    Ok((stream_config, buffer_size))
}

pub fn build_output_stream(config: &AudioEngineConfig, device: Arc<Device>) -> AudioResult<(CpalStream, u32, u32)> {
    let cpal_device = match &config.output_device {
        Some(name) => find_device_by_name(name)?,
        None => get_cpal_default_device()?,
    };

    let device_name = cpal_device.name().unwrap_or_else(|_| "unknown".to_string());
    log::info!("using audio device: {}", device_name);

    let (supported, buffer_size) = negotiate_output_config(&cpal_device, config)?;
    let sample_rate = supported.sample_rate().0;

    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: CpalBufferSize::Fixed(buffer_size),
    };

    log::info!(
        "audio config: {} channels, {}Hz, {} frames (~{:.1}ms latency)",
        stream_config.channels,
        sample_rate,
        buffer_size,
        (buffer_size as f32 / sample_rate as f32) * 1000.0,
    );

    let channels = stream_config.channels as usize;
    let scratch = Arc::new(Mutex::new(FrameBuffer::with_capacity(channels, MAX_BUFFER_SIZE)));

    let stream = cpal_device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let n_frames = data.len() / channels;
                let mut buf = scratch.lock().unwrap();
                device.process_all(&mut buf, n_frames);

                let produced = buf.as_slice();
                for (frame, src) in data.chunks_mut(channels).zip(produced.chunks(channels)) {
                    frame.copy_from_slice(src);
                }
            },
            |err| log::error!("audio stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    stream.play().map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    Ok((CpalStream { _stream: stream }, sample_rate, buffer_size))
}
