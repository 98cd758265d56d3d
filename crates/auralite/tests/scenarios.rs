//! End-to-end scenarios exercising the worked numeric examples from the
//! specification: static mono panning, clamped inverse distance,
//! stream queue ordering, play on a disconnected device, mid-playback
//! SetOffset, and unqueueing past what has been processed.

use auralite::buffer::BufferFormat;
use auralite::device::Device;
use auralite::source::{OffsetUnit, SourceState};
use auralite::spatial::ChannelLayout;
use auralite::AlError;

fn fmt(channels: u8) -> BufferFormat {
    BufferFormat { channels, sample_rate: 48000 }
}

#[test]
fn static_source_pans_right_when_positioned_to_the_right() {
    let device = Device::open("test", 48000, ChannelLayout::Stereo);
    let ctx = device.create_context();

    let names = device.buffers.generate(1).unwrap();
    device.buffers.load(names[0], fmt(1), vec![0.3; 4800]).unwrap();

    let source_names = ctx.gen_sources(1).unwrap();
    let source = ctx.get_source(source_names[0]).unwrap();
    source.set_buffer(&device.buffers, names[0]).unwrap();
    {
        let mut params = source.params.lock().unwrap();
        params.position = auralite::types::Vec3::new(1.0, 0.0, 0.0);
        params.reference_distance = 1.0;
        params.max_distance = 1.0;
        params.rolloff = 0.0001;
        params.distance_model = Some(auralite::spatial::DistanceModel::InverseClamped);
    }
    source.mark_recalc();
    ctx.play_source(&device.buffers, source_names[0]).unwrap();

    let mut out = auralite::types::FrameBuffer::with_capacity(2, 256);
    ctx.process(&device.buffers, &mut out, 64);

    let mut left_energy = 0.0f32;
    let mut right_energy = 0.0f32;
    for frame in out.as_slice().chunks(2) {
        left_energy += frame[0].abs();
        right_energy += frame[1].abs();
    }
    assert!(right_energy > left_energy, "left={left_energy} right={right_energy}");
}

#[test]
fn queue_then_fully_process_then_unqueue_round_trips_in_order() {
    let device = Device::open("test", 48000, ChannelLayout::Stereo);
    let ctx = device.create_context();
    let names = device.buffers.generate(2).unwrap();
    device.buffers.load(names[0], fmt(1), vec![0.1; 16]).unwrap();
    device.buffers.load(names[1], fmt(1), vec![0.2; 16]).unwrap();

    let source_names = ctx.gen_sources(1).unwrap();
    let source = ctx.get_source(source_names[0]).unwrap();
    source.queue_buffers(&device.buffers, &names).unwrap();
    ctx.play_source(&device.buffers, source_names[0]).unwrap();

    let mut out = auralite::types::FrameBuffer::with_capacity(2, 256);
    for _ in 0..8 {
        ctx.process(&device.buffers, &mut out, 32);
    }

    assert_eq!(source.state(), SourceState::Stopped);
    let unqueued = source.unqueue_buffers(&device.buffers, 2).unwrap();
    assert_eq!(unqueued, names);
}

#[test]
fn play_on_disconnected_device_advances_state_without_mixing() {
    let device = Device::open("test", 48000, ChannelLayout::Stereo);
    let ctx = device.create_context();
    let names = device.buffers.generate(1).unwrap();
    device.buffers.load(names[0], fmt(1), vec![0.0; 16]).unwrap();

    let source_names = ctx.gen_sources(1).unwrap();
    let source = ctx.get_source(source_names[0]).unwrap();
    source.queue_buffers(&device.buffers, &names).unwrap();
    device.mark_disconnected();

    ctx.play_source(&device.buffers, source_names[0]).unwrap();
    assert_eq!(source.state(), SourceState::Playing);

    // Scenario 4 (SPEC_FULL.md §8): within one mixer tick the disconnected
    // device forces the source to STOPPED and drains its pending buffers
    // into processed, instead of mixing it.
    let mut out = auralite::types::FrameBuffer::with_capacity(2, 64);
    device.process_all(&mut out, 32);
    assert_eq!(source.state(), SourceState::Stopped);
    assert_eq!(source.buffers_processed(), 1);
    assert!(out.as_slice().iter().all(|&s| s == 0.0));
}

#[test]
fn set_offset_mid_playback_reseeds_the_resample_stream() {
    let device = Device::open("test", 48000, ChannelLayout::Stereo);
    let ctx = device.create_context();
    let names = device.buffers.generate(1).unwrap();
    device.buffers.load(names[0], fmt(1), vec![0.0; 48000]).unwrap();

    let source_names = ctx.gen_sources(1).unwrap();
    let source = ctx.get_source(source_names[0]).unwrap();
    source.set_buffer(&device.buffers, names[0]).unwrap();
    ctx.play_source(&device.buffers, source_names[0]).unwrap();

    source.set_offset(OffsetUnit::Seconds, 0.25, 48000, 1).unwrap();
    let offset = source.get_offset(OffsetUnit::Samples, 48000, 1);
    assert!((offset - 12000.0).abs() < 1.0);
}

#[test]
fn unqueue_more_than_processed_returns_invalid_value_without_mutating_state() {
    let device = Device::open("test", 48000, ChannelLayout::Stereo);
    let ctx = device.create_context();
    let names = device.buffers.generate(2).unwrap();
    device.buffers.load(names[0], fmt(1), vec![0.0; 16]).unwrap();
    device.buffers.load(names[1], fmt(1), vec![0.0; 16]).unwrap();

    let source_names = ctx.gen_sources(1).unwrap();
    let source = ctx.get_source(source_names[0]).unwrap();
    source.queue_buffers(&device.buffers, &names).unwrap();

    let err = source.unqueue_buffers(&device.buffers, 2).unwrap_err();
    assert_eq!(err, AlError::InvalidValue);
    assert_eq!(source.buffers_queued(), 2);
}
