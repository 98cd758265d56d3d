//! Domain error types and the sticky last-error slot.

use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

/// The seven OpenAL domain error kinds.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlError {
    #[error("invalid name")]
    InvalidName,
    #[error("invalid enum")]
    InvalidEnum,
    #[error("invalid value")]
    InvalidValue,
    #[error("invalid operation")]
    InvalidOperation,
    #[error("invalid device")]
    InvalidDevice,
    #[error("invalid context")]
    InvalidContext,
    #[error("out of memory")]
    OutOfMemory,
}

pub type AlResult<T> = Result<T, AlError>;

impl AlError {
    fn as_code(self) -> u8 {
        match self {
            AlError::InvalidName => 1,
            AlError::InvalidEnum => 2,
            AlError::InvalidValue => 3,
            AlError::InvalidOperation => 4,
            AlError::InvalidDevice => 5,
            AlError::InvalidContext => 6,
            AlError::OutOfMemory => 7,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(AlError::InvalidName),
            2 => Some(AlError::InvalidEnum),
            3 => Some(AlError::InvalidValue),
            4 => Some(AlError::InvalidOperation),
            5 => Some(AlError::InvalidDevice),
            6 => Some(AlError::InvalidContext),
            7 => Some(AlError::OutOfMemory),
            _ => None,
        }
    }
}

/// A per-context / per-device "last error" slot.
///
/// Coalescing rule: a new error only overwrites an empty slot — the first
/// error sticks until queried. `take()` returns the current value and
/// resets the slot to empty, mirroring `alGetError`/`alcGetError`.
#[derive(Debug, Default)]
pub struct LastErrorSlot {
    code: AtomicU8,
}

impl LastErrorSlot {
    pub fn new() -> Self {
        Self { code: AtomicU8::new(0) }
    }

    /// Record `err`, but only if the slot is currently empty.
    pub fn record(&self, err: AlError) {
        let _ = self.code.compare_exchange(
            0,
            err.as_code(),
            Ordering::Release,
            Ordering::Relaxed,
        );
    }

    /// Read and clear the slot.
    pub fn take(&self) -> Option<AlError> {
        let code = self.code.swap(0, Ordering::AcqRel);
        AlError::from_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_sticks_until_queried() {
        let slot = LastErrorSlot::new();
        slot.record(AlError::InvalidName);
        slot.record(AlError::OutOfMemory);
        assert_eq!(slot.take(), Some(AlError::InvalidName));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn slot_accepts_new_error_after_clear() {
        let slot = LastErrorSlot::new();
        slot.record(AlError::InvalidValue);
        assert_eq!(slot.take(), Some(AlError::InvalidValue));
        slot.record(AlError::InvalidOperation);
        assert_eq!(slot.take(), Some(AlError::InvalidOperation));
    }
}
