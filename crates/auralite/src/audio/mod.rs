//! Cross-platform audio output backend, built on `cpal`.

mod backend;
mod cpal_backend;
mod device;
mod error;

pub use backend::{start_audio_system, AudioHandle, DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE, MAX_BUFFER_SIZE};
pub use device::{get_output_devices, OutputDeviceInfo};
pub use error::{AudioError, AudioResult};
