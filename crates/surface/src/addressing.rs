//! Tiled and linear address resolution.
//!
//! `resolve` splits a sheet-absolute block coordinate into a hardware
//! base offset plus residual coordinates; `compose` is its exact inverse.
//! Tiled pages are 4096 bytes with a row-major interior; linear rows are
//! addressed at cacheline granularity, with the discarded low bits of the
//! start offset folded back into the X residual.

use static_assertions::const_assert_eq;

use crate::layout::TilingMode;

pub const TILE_BYTES: u32 = 4096;
pub const LINEAR_ALIGN: u32 = 64;

const TILED_A_WIDTH_BYTES: u32 = 512;
const TILED_A_ROWS: u32 = 8;
const TILED_B_WIDTH_BYTES: u32 = 128;
const TILED_B_ROWS: u32 = 32;

const_assert_eq!(TILED_A_WIDTH_BYTES * TILED_A_ROWS, TILE_BYTES);
const_assert_eq!(TILED_B_WIDTH_BYTES * TILED_B_ROWS, TILE_BYTES);

/// Texel footprint of one hardware-addressable tile. A fixed lookup per
/// (tiling mode, block size), not a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    pub width_el: u32,
    pub height_el: u32,
    pub size_bytes: u32,
}

/// `None` for linear surfaces or block sizes the tiled paths cannot
/// address (anything outside 1/2/4/8/16).
pub fn tile_geometry(tiling: TilingMode, cpp: u32) -> Option<TileGeometry> {
    let (width_bytes, rows) = match tiling {
        TilingMode::Linear => return None,
        TilingMode::TiledA => (TILED_A_WIDTH_BYTES, TILED_A_ROWS),
        TilingMode::TiledB => (TILED_B_WIDTH_BYTES, TILED_B_ROWS),
    };
    match cpp {
        1 | 2 | 4 | 8 | 16 => Some(TileGeometry {
            width_el: width_bytes / cpp,
            height_el: rows,
            size_bytes: TILE_BYTES,
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexelAddress {
    pub block_offset: u64,
    pub residual_x: u32,
    pub residual_y: u32,
}

/// Resolve a block coordinate to a base offset plus residuals.
///
/// Linear: the base is the row-start byte offset rounded down to the
/// access granularity; the rounding remainder becomes extra X residual
/// (requires `pitch_bytes % cpp == 0`, which the planner guarantees).
/// Tiled: the base is the containing page, always a `TILE_BYTES`
/// multiple, and residuals lie inside the tile footprint.
pub fn resolve(pitch_bytes: u32, tiling: TilingMode, cpp: u32, x_el: u32, y_el: u32) -> TexelAddress {
    match tile_geometry(tiling, cpp) {
        None => {
            let raw = y_el as u64 * pitch_bytes as u64 + x_el as u64 * cpp as u64;
            let block_offset = raw & !(LINEAR_ALIGN as u64 - 1);
            let delta = raw - block_offset;
            debug_assert_eq!(delta % cpp as u64, 0, "pitch must be a cpp multiple");
            TexelAddress {
                block_offset,
                residual_x: (delta / cpp as u64) as u32,
                residual_y: 0,
            }
        }
        Some(geom) => {
            debug_assert_eq!(pitch_bytes % (geom.width_el * cpp), 0);
            let tile_row = (y_el / geom.height_el) as u64;
            let tile_col = (x_el as u64 * cpp as u64) / (geom.width_el as u64 * cpp as u64);
            TexelAddress {
                block_offset: tile_row * pitch_bytes as u64 * geom.height_el as u64
                    + tile_col * geom.size_bytes as u64,
                residual_x: x_el % geom.width_el,
                residual_y: y_el % geom.height_el,
            }
        }
    }
}

/// Exact inverse of [`resolve`].
pub fn compose(pitch_bytes: u32, tiling: TilingMode, cpp: u32, addr: TexelAddress) -> (u32, u32) {
    match tile_geometry(tiling, cpp) {
        None => {
            let raw = addr.block_offset + addr.residual_x as u64 * cpp as u64;
            let y = raw / pitch_bytes as u64;
            let x = (raw % pitch_bytes as u64) / cpp as u64;
            (x as u32, y as u32)
        }
        Some(geom) => {
            let tile_row_bytes = pitch_bytes as u64 * geom.height_el as u64;
            let tile_row = addr.block_offset / tile_row_bytes;
            let tile_col = (addr.block_offset % tile_row_bytes) / geom.size_bytes as u64;
            (
                tile_col as u32 * geom.width_el + addr.residual_x,
                tile_row as u32 * geom.height_el + addr.residual_y,
            )
        }
    }
}

/// Full byte offset of one block, consistent with `resolve` plus a
/// row-major walk of the tile interior. This is the reference the test
/// executors address memory with.
pub fn texel_offset(pitch_bytes: u32, tiling: TilingMode, cpp: u32, x_el: u32, y_el: u32) -> u64 {
    match tile_geometry(tiling, cpp) {
        None => y_el as u64 * pitch_bytes as u64 + x_el as u64 * cpp as u64,
        Some(geom) => {
            let addr = resolve(pitch_bytes, tiling, cpp, x_el, y_el);
            addr.block_offset
                + addr.residual_y as u64 * (geom.width_el * cpp) as u64
                + addr.residual_x as u64 * cpp as u64
        }
    }
}
