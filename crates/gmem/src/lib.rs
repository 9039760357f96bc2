//! Tile-pass orchestration over a fixed on-chip memory partition.
//!
//! The frame driver builds a [`Batch`] (framebuffer, partition, masks,
//! draw queue); [`TilePass::run`] turns it into an ordered op stream that
//! restores attachment tiles into on-chip memory, replays draws, and
//! resolves results back to their true main-memory placement.

pub mod model;
pub mod pass;

pub use model::{
    Attachment, AttachmentError, AttachmentMask, AttachmentSlot, Batch, BatchBuildError,
    BatchBuilder, DrawTemplate, DrawVisibility, Framebuffer, FramebufferError, GmemPartition,
    InvalidSlotError, MAX_COLOR_TARGETS,
};
pub use pass::{PassError, PassReport, Tile, TilePass, tile_grid};
