use thiserror::Error;

use crate::display::Handle;

/// Errors surfaced by the frame bridge and its pools.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Reserving buffer memory failed. The bridge that hit this is shut down.
    #[error("failed to allocate {bytes} bytes of frame memory")]
    AllocationFailure { bytes: usize },

    #[error("bridge has been shut down")]
    Closed,

    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("handle table: {0}")]
    Handle(#[from] HandleError),

    #[error("{kind:?} video needs {expected} textures, got {actual}")]
    TextureCount {
        kind: crate::display::VideoKind,
        expected: usize,
        actual: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

/// Shape problems detected while validating an incoming I420 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("zero-sized frame {width}x{height}")]
    Empty { width: u32, height: u32 },

    #[error("plane {plane} stride {stride} is narrower than its row width {row}")]
    StrideTooSmall {
        plane: usize,
        stride: usize,
        row: usize,
    },

    #[error("plane {plane} holds {len} bytes but {needed} are required")]
    PlaneTooShort {
        plane: usize,
        len: usize,
        needed: usize,
    },

    #[error("packet holds {actual} bytes, expected {expected} for {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    /// Every slot of the 16-bit slot space is bound.
    #[error("all {0} handle slots are in use")]
    CapacityExceeded(usize),

    #[error("stale or unknown handle {0}")]
    Stale(Handle),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
