//! Common error type and geometry helpers shared by the tilenav crates

mod geometry;
mod math;

pub use geometry::*;
pub use math::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input mesh: {0}")]
    InvalidMesh(String),

    #[error("invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("tile ({x}, {y}) build failed: {reason}")]
    TileBuild { x: i32, y: i32, reason: String },

    #[error("unknown obstacle handle {0:#010x}")]
    UnknownHandle(u32),

    #[error("tile ({x}, {y}) is outside the {width}x{height} tile grid")]
    OutOfBounds {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },

    #[error("invalid obstacle volume: {0}")]
    InvalidObstacle(String),

    #[error("obstacle limit of {0} reached")]
    ObstacleLimit(usize),

    #[error("navigation mesh generation failed: {0}")]
    NavMeshGeneration(String),

    #[error("corrupt tile layer: {0}")]
    CorruptLayer(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("a writer panicked while holding a tile cache lock")]
    LockPoisoned,

    #[cfg(feature = "std")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for failures that only affect a single tile
    pub fn is_tile_local(&self) -> bool {
        matches!(self, Error::TileBuild { .. } | Error::NavMeshGeneration(_))
    }
}

/// Result type for tilenav operations
pub type Result<T> = std::result::Result<T, Error>;
