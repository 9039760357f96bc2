//! Surface layout planning and tiled address resolution.
//!
//! Pure, deterministic services: a surface description goes in, per-level
//! byte placement and texel-to-byte address math come out. Nothing here
//! touches memory or the command stream; the copy scheduler and the
//! tile-pass orchestrator consume these results.

pub mod addressing;
pub mod device;
pub mod format;
pub mod layout;

pub use addressing::{TexelAddress, TileGeometry, compose, resolve, texel_offset, tile_geometry};
pub use device::{DeviceConfig, GpuGeneration};
pub use format::{PixelFormat, transfer_compatible};
pub use layout::{
    ConfigurationError, LayoutError, LevelDesc, Surface, SurfaceDesc, SurfaceLayout, SurfaceUsage,
    TargetKind, TilingMode,
};
