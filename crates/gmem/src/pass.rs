//! The tile-pass orchestrator.
//!
//! A pass switches the command processor into tiled rendering, visits
//! every tile of the partition grid row-major, and around each tile's
//! draw replay moves attachment data between main memory and the fixed
//! on-chip partition offsets. On-chip bytes are one shared resource, so
//! the restore -> render -> resolve order is strict within a tile and
//! across tiles alike; everything runs on the single thread owning the
//! command stream.

use blit::TransferError;
use cmdstream::{CmdOp, CombineOp, CommandStream, RenderMode, VisibilityMode};
use surface::DeviceConfig;
use thiserror::Error;
use tracing::{debug, trace};

use crate::model::{AttachmentSlot, Batch, DrawVisibility};

/// One cell of the partition grid. Nominal bin size, clamped to the
/// framebuffer extent on the last row and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Row-major tile grid covering `[0, width) x [0, height)` exactly.
pub fn tile_grid(width: u32, height: u32, bin_width: u32, bin_height: u32) -> Vec<Tile> {
    let mut tiles = Vec::with_capacity(
        (width.div_ceil(bin_width) * height.div_ceil(bin_height)) as usize,
    );
    let mut y = 0;
    while y < height {
        let tile_height = bin_height.min(height - y);
        let mut x = 0;
        while x < width {
            let tile_width = bin_width.min(width - x);
            tiles.push(Tile {
                x,
                y,
                width: tile_width,
                height: tile_height,
            });
            x += bin_width;
        }
        y += bin_height;
    }
    tiles
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PassError {
    /// A restore or resolve transfer failed. With a built batch the only
    /// reachable cause is resource pressure; the whole batch is aborted
    /// and the caller must discard the pending submission wholesale.
    #[error("tile pass aborted: {0}")]
    Transfer(#[from] TransferError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub tiles: usize,
    pub restores: usize,
    pub resolves: usize,
    pub draws_replayed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassPhase {
    PassInit,
    TilePrep,
    Render,
    PassFini,
}

impl PassPhase {
    fn advance(&mut self, next: PassPhase) {
        let legal = matches!(
            (*self, next),
            (PassPhase::PassInit, PassPhase::TilePrep)
                | (PassPhase::TilePrep, PassPhase::Render)
                | (PassPhase::Render, PassPhase::TilePrep)
                | (PassPhase::PassInit, PassPhase::PassFini)
                | (PassPhase::Render, PassPhase::PassFini)
        );
        debug_assert!(legal, "illegal phase transition {self:?} -> {next:?}");
        *self = next;
    }
}

/// Executes one batch against a command stream. Stateless between runs;
/// a batch is consumed by value and cannot replay.
#[derive(Debug, Clone, Copy)]
pub struct TilePass<'a> {
    config: &'a DeviceConfig,
}

impl<'a> TilePass<'a> {
    pub fn new(config: &'a DeviceConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, batch: Batch, stream: &mut CommandStream) -> Result<PassReport, PassError> {
        let engine = blit::CopyEngine::new(self.config);
        let tiles = tile_grid(
            batch.framebuffer.width(),
            batch.framebuffer.height(),
            batch.partition.bin_width,
            batch.partition.bin_height,
        );
        debug!(
            tiles = tiles.len(),
            draws = batch.draws.len(),
            "tile pass begin"
        );

        let mut phase = PassPhase::PassInit;
        stream.push(CmdOp::SetRenderMode(RenderMode::Gmem));

        let mut report = PassReport::default();
        for tile in &tiles {
            phase.advance(PassPhase::TilePrep);
            trace!(tile.x, tile.y, tile.width, tile.height, "tile prep");
            stream.push(CmdOp::WindowScissor {
                x1: tile.x,
                y1: tile.y,
                x2: tile.x + tile.width - 1,
                y2: tile.y + tile.height - 1,
            });
            stream.push(CmdOp::WindowOffset {
                x: tile.x,
                y: tile.y,
            });

            for slot in batch.restore_mask.slots() {
                let Some(attachment) = batch.framebuffer.attachment(slot) else {
                    debug_assert!(false, "masked slot {slot:?} lost its attachment");
                    continue;
                };
                let gmem = batch.gmem_region(slot, attachment.cpp());
                engine.emit(
                    stream,
                    &attachment.region(),
                    &gmem,
                    tile_rect(*tile, TransferSide::ImageIsSource),
                    CombineOp::Copy,
                )?;
                report.restores += 1;
            }

            phase.advance(PassPhase::Render);
            for draw in &batch.draws {
                let visibility = match draw.visibility {
                    DrawVisibility::Fixed(mode) => mode,
                    DrawVisibility::LateBound if batch.use_visibility_stream => {
                        VisibilityMode::UseStream
                    }
                    DrawVisibility::LateBound => VisibilityMode::Ignore,
                };
                stream.push(CmdOp::DrawReplay {
                    draw_id: draw.draw_id,
                    visibility,
                });
                report.draws_replayed += 1;
            }

            for slot in batch.resolve_mask.slots() {
                let Some(attachment) = batch.framebuffer.attachment(slot) else {
                    debug_assert!(false, "masked slot {slot:?} lost its attachment");
                    continue;
                };
                let gmem = batch.gmem_region(slot, attachment.cpp());
                engine.emit(
                    stream,
                    &gmem,
                    &attachment.region(),
                    tile_rect(*tile, TransferSide::ImageIsDest),
                    CombineOp::Copy,
                )?;
                report.resolves += 1;
            }
            report.tiles += 1;
        }

        phase.advance(PassPhase::PassFini);
        stream.push(CmdOp::CacheFlush);
        stream.push(CmdOp::SetRenderMode(RenderMode::Bypass));
        debug!(?report, "tile pass end");
        Ok(report)
    }
}

#[derive(Clone, Copy)]
enum TransferSide {
    ImageIsSource,
    ImageIsDest,
}

/// Restore reads the tile rectangle out of the image into on-chip offset
/// (0,0); resolve is the exact mirror.
fn tile_rect(tile: Tile, side: TransferSide) -> blit::CopyRect {
    let (src, dst) = match side {
        TransferSide::ImageIsSource => ((tile.x, tile.y), (0, 0)),
        TransferSide::ImageIsDest => ((0, 0), (tile.x, tile.y)),
    };
    blit::CopyRect {
        src_x: src.0,
        src_y: src.1,
        dst_x: dst.0,
        dst_y: dst.1,
        width: tile.width,
        height: tile.height,
    }
}
