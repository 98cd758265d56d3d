//! The mixer: pulls one block of audio from every playing source into the
//! output accumulator each callback.

use std::sync::Arc;

use crate::buffer::BufferStore;
use crate::source::{Source, SourceState, SourceType};
use crate::spatial::{self, ChannelLayout, ListenerState, SourceSpatialParams};
use crate::stream::ResampleStream;
use crate::types::FrameBuffer;

/// One live slot in the mixer's playlist: a source plus the spatial
/// parameters snapshotted the last time its recalc flag fired.
struct PlaylistEntry {
    source: Arc<Source>,
}

/// Walks the playing sources and fills the output accumulator. Modelled as
/// an index-walked `Vec` rather than an intrusive linked list: removing a
/// finished source mid-walk is a swap_remove, which keeps the hot path free
/// of pointer patching at the cost of the list being unordered (acceptable;
/// spec places no ordering requirement on mix order).
pub struct Mixer {
    playlist: Vec<PlaylistEntry>,
    output_rate: u32,
    layout: ChannelLayout,
}

impl Mixer {
    pub fn new(output_rate: u32, layout: ChannelLayout) -> Self {
        Self { playlist: Vec::new(), output_rate, layout }
    }

    /// Add a source to the mix if it isn't already present.
    pub fn admit(&mut self, source: Arc<Source>) {
        if self.playlist.iter().any(|e| Arc::ptr_eq(&e.source, &source)) {
            return;
        }
        source.set_mixer_accessible(true);
        self.playlist.push(PlaylistEntry { source });
    }

    pub fn len(&self) -> usize {
        self.playlist.len()
    }

    /// Drop every source from the playlist without mixing, marking each as
    /// no longer mixer-accessible. Used when the owning device disconnects
    /// mid-stream: the sources themselves are stopped by the caller first.
    pub fn clear(&mut self) {
        for entry in self.playlist.drain(..) {
            entry.source.set_mixer_accessible(false);
        }
    }

    /// Mix one block. `out` must already be sized to `frames` frames at
    /// `self.layout`'s channel count.
    pub fn mix_block(&mut self, buffers: &BufferStore, listener: &ListenerState, out: &mut FrameBuffer, frames: usize) {
        out.set_len_from_capacity(frames);
        out.fill_silence();

        let mut i = 0;
        while i < self.playlist.len() {
            let finished = {
                let entry = &self.playlist[i];
                if entry.source.state() != SourceState::Playing {
                    false
                } else {
                    self.mix_one(buffers, listener, &self.playlist[i].source, out, frames)
                }
            };

            if finished || self.playlist[i].source.state() != SourceState::Playing {
                let entry = self.playlist.swap_remove(i);
                entry.source.set_mixer_accessible(false);
            } else {
                i += 1;
            }
        }
    }

    /// Mix one source's contribution into `out`. Returns true if the source
    /// ran out of material and stopped itself this block.
    fn mix_one(&self, buffers: &BufferStore, listener: &ListenerState, source: &Arc<Source>, out: &mut FrameBuffer, frames: usize) -> bool {
        let out_channels = self.layout.channel_count();

        if source.take_recalc() {
            self.refresh_spatial(buffers, listener, source);
        }
        let spatial_out = *source.cached_spatial.lock().unwrap();

        let Some((pcm, src_channels)) = self.pull_pcm(buffers, source, frames) else {
            source.stop();
            return true;
        };
        let produced_frames = pcm.len() / src_channels.max(1);
        let ran_dry = produced_frames < frames;

        let gains = spatial_out.gains;
        let speakers = spatial_out.speakers;

        let out_slice = out.as_mut_slice();
        if src_channels <= 1 {
            for f in 0..produced_frames {
                let sample = pcm[f];
                for (slot, &ch) in speakers.iter().enumerate() {
                    if gains[slot] == 0.0 {
                        continue;
                    }
                    let idx = f * out_channels + ch;
                    if idx < out_slice.len() {
                        out_slice[idx] += sample * gains[slot];
                    }
                }
            }
        } else {
            // Non-spatialised path (spec §4.4 step 1): a multi-channel
            // source is never panned, so every one of its channels is
            // mixed straight into its matching output channel.
            for f in 0..produced_frames {
                for sc in 0..src_channels {
                    let sample = pcm[f * src_channels + sc];
                    let slot = sc.min(speakers.len() - 1);
                    if gains[slot] == 0.0 {
                        continue;
                    }
                    let idx = f * out_channels + speakers[slot];
                    if idx < out_slice.len() {
                        out_slice[idx] += sample * gains[slot];
                    }
                }
            }
        }

        if ran_dry {
            if source.looping() && source.source_type() == SourceType::Static {
                source.set_playback_offset_frames(0);
            } else if source.source_type() == SourceType::Streaming {
                self.advance_streaming_queue(source);
                if source.current_pending_item().is_none() && source.pending.is_empty() {
                    source.stop();
                    return true;
                }
            } else {
                source.stop();
                return true;
            }
        }

        false
    }

    fn refresh_spatial(&self, buffers: &BufferStore, listener: &ListenerState, source: &Arc<Source>) {
        let params = source.params.lock().unwrap().clone();
        let sp = SourceSpatialParams {
            position: params.position,
            source_relative: params.source_relative,
            gain: params.gain,
            min_gain: params.min_gain,
            max_gain: params.max_gain,
            reference_distance: params.reference_distance,
            max_distance: params.max_distance,
            rolloff: params.rolloff,
            direction: params.direction,
            cone_inner_angle_deg: params.cone_inner_angle_deg,
            cone_outer_angle_deg: params.cone_outer_angle_deg,
            cone_outer_gain: params.cone_outer_gain,
            distance_model: params.distance_model.unwrap_or_default(),
            source_channels: self.source_channel_count(buffers, source),
        };
        let out = spatial::spatialise(listener, &sp, self.layout);
        *source.cached_spatial.lock().unwrap() = out;
    }

    /// The channel count of whatever buffer a source is currently bound to
    /// or playing from. Falls back to mono when nothing is bound yet (a
    /// freshly generated source has no format to report).
    fn source_channel_count(&self, buffers: &BufferStore, source: &Source) -> u8 {
        let name = match source.source_type() {
            SourceType::Static => source.bound_buffer(),
            SourceType::Streaming => {
                source.pending.drain_into_local();
                source.current_pending_item().or_else(|| source.pending.front()).map(|i| i.buffer_name)
            }
            SourceType::Undetermined => None,
        };
        name.and_then(|n| buffers.get(n).ok())
            .and_then(|slot| slot.record())
            .map(|r| r.format.channels)
            .unwrap_or(1)
    }

    /// Pull `frames` frames of PCM (at the output sample rate) from the
    /// source's bound buffer or pending queue, lazily creating the
    /// resampling stream on first touch. Returns `(samples, channels)`.
    fn pull_pcm(&self, buffers: &BufferStore, source: &Arc<Source>, frames: usize) -> Option<(Vec<f32>, usize)> {
        match source.source_type() {
            SourceType::Static => self.pull_static(buffers, source, frames),
            SourceType::Streaming => self.pull_streaming(buffers, source, frames),
            SourceType::Undetermined => None,
        }
    }

    fn pull_static(&self, buffers: &BufferStore, source: &Arc<Source>, frames: usize) -> Option<(Vec<f32>, usize)> {
        let name = source.bound_buffer()?;
        let slot = buffers.get(name).ok()?;
        let record = slot.record()?;
        let channels = record.format.channels as usize;

        if !source.has_stream() {
            source.put_stream(ResampleStream::new(record.format, self.layout.channel_count(), self.output_rate));
        }

        let offset = source.playback_offset_frames();
        let available = record.frame_count().saturating_sub(offset);
        let to_push = available.min(frames * 4 + 1);
        if to_push > 0 {
            let start = offset * channels;
            let end = (offset + to_push) * channels;
            let mut stream = source.take_stream().unwrap();
            stream.push_interleaved(&record.payload[start..end]);
            let out = stream.pull_interleaved(frames);
            source.set_playback_offset_frames(offset + to_push);
            source.put_stream(stream);
            Some((out, channels))
        } else {
            let mut stream = source.take_stream().unwrap();
            let out = stream.pull_interleaved(frames);
            source.put_stream(stream);
            Some((out, channels))
        }
    }

    fn pull_streaming(&self, buffers: &BufferStore, source: &Arc<Source>, frames: usize) -> Option<(Vec<f32>, usize)> {
        source.pending.drain_into_local();
        if source.current_pending_item().is_none() {
            self.advance_streaming_queue(source);
        }
        let item = source.current_pending_item()?;
        let slot = buffers.get(item.buffer_name).ok()?;
        let record = slot.record()?;
        let channels = record.format.channels as usize;

        if !source.has_stream() {
            source.put_stream(ResampleStream::new(record.format, self.layout.channel_count(), self.output_rate));
        }

        let offset = source.playback_offset_frames();
        let available = record.frame_count().saturating_sub(offset);
        let to_push = available.min(frames * 4 + 1);
        let mut stream = source.take_stream().unwrap();
        if to_push > 0 {
            let start = offset * channels;
            let end = (offset + to_push) * channels;
            stream.push_interleaved(&record.payload[start..end]);
            source.set_playback_offset_frames(offset + to_push);
        }
        let out = stream.pull_interleaved(frames);
        source.put_stream(stream);
        Some((out, channels))
    }

    /// Move the current pending item to processed once exhausted and pop
    /// the next one, resetting the per-item offset and resample stream.
    fn advance_streaming_queue(&self, source: &Arc<Source>) {
        if let Some(item) = source.current_pending_item() {
            source.processed.append([item]);
        }
        source.pending.drain_into_local();
        let next = source.pending.pop_front();
        source.set_current_pending_item(next);
        source.set_playback_offset_frames(0);
        source.take_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferFormat;

    fn fmt() -> BufferFormat {
        BufferFormat { channels: 1, sample_rate: 48000 }
    }

    #[test]
    fn static_non_looping_source_stops_after_buffer_exhausted() {
        let buffers = BufferStore::new();
        let names = buffers.generate(1).unwrap();
        buffers.load(names[0], fmt(), vec![0.1; 100]).unwrap();

        let source = Arc::new(Source::new(1));
        source.set_buffer(&buffers, names[0]).unwrap();
        source.play();

        let mut mixer = Mixer::new(48000, ChannelLayout::Stereo);
        mixer.admit(source.clone());

        let listener = ListenerState::default();
        let mut out = FrameBuffer::with_capacity(2, 256);

        for _ in 0..5 {
            mixer.mix_block(&buffers, &listener, &mut out, 64);
        }

        assert_eq!(mixer.len(), 0);
        assert_eq!(source.state(), SourceState::Stopped);
    }

    #[test]
    fn looping_static_source_keeps_playing_past_buffer_end() {
        let buffers = BufferStore::new();
        let names = buffers.generate(1).unwrap();
        buffers.load(names[0], fmt(), vec![0.1; 32]).unwrap();

        let source = Arc::new(Source::new(1));
        source.set_buffer(&buffers, names[0]).unwrap();
        source.params.lock().unwrap().looping = true;
        source.play();

        let mut mixer = Mixer::new(48000, ChannelLayout::Stereo);
        mixer.admit(source.clone());

        let listener = ListenerState::default();
        let mut out = FrameBuffer::with_capacity(2, 256);

        for _ in 0..10 {
            mixer.mix_block(&buffers, &listener, &mut out, 64);
        }

        assert_eq!(mixer.len(), 1, "looping source should remain in the playlist");
    }

    #[test]
    fn streaming_source_advances_through_queued_buffers_in_order() {
        let buffers = BufferStore::new();
        let names = buffers.generate(2).unwrap();
        buffers.load(names[0], fmt(), vec![0.2; 16]).unwrap();
        buffers.load(names[1], fmt(), vec![0.4; 16]).unwrap();

        let source = Arc::new(Source::new(1));
        source.queue_buffers(&buffers, &names).unwrap();
        source.play();

        let mut mixer = Mixer::new(48000, ChannelLayout::Stereo);
        mixer.admit(source.clone());

        let listener = ListenerState::default();
        let mut out = FrameBuffer::with_capacity(2, 256);
        for _ in 0..8 {
            mixer.mix_block(&buffers, &listener, &mut out, 32);
        }

        assert_eq!(mixer.len(), 0);
        assert_eq!(source.state(), SourceState::Stopped);
        assert_eq!(source.buffers_processed(), 2);
    }
}
