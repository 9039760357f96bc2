//! Surface shapes and the layout planner.
//!
//! `SurfaceLayout::plan` maps a surface description to per-level byte
//! layout under the hardware packing rules. The mip-pyramid packing here
//! (pitch widened to w1+w2 when that outgrows level 0, levels 2+ stacked
//! beside level 1) reproduces observed hardware behavior and is a
//! compatibility contract: changing it changes total footprints and
//! breaks address compatibility with existing encoded surfaces.

use thiserror::Error;

use crate::device::DeviceConfig;
use crate::format::PixelFormat;

pub const ALLOCATION_CAP_BYTES: u64 = 4 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TilingMode {
    Linear,
    TiledA,
    TiledB,
}

impl TilingMode {
    pub const fn is_tiled(self) -> bool {
        !matches!(self, TilingMode::Linear)
    }

    /// Byte width of one tiled page row; pitch is padded to this.
    pub const fn tile_width_bytes(self) -> u32 {
        match self {
            TilingMode::Linear => 1,
            TilingMode::TiledA => 512,
            TilingMode::TiledB => 128,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    D1,
    D1Array,
    D2,
    D2Array,
    D3,
    Cube,
}

impl TargetKind {
    const fn is_1d(self) -> bool {
        matches!(self, TargetKind::D1 | TargetKind::D1Array)
    }
}

/// Alignment class the planner applies: cache-granularity alignment for
/// anything the render backend writes, minimal alignment for buffer-like
/// staging surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceUsage {
    RenderTarget,
    DepthStencil,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub layers: u32,
    pub levels: u32,
    pub samples: u32,
    pub format: PixelFormat,
    pub tiling: TilingMode,
    pub target: TargetKind,
    pub usage: SurfaceUsage,
}

impl SurfaceDesc {
    /// Convenience constructor for the common single-level 2D case.
    pub fn plain_2d(width: u32, height: u32, format: PixelFormat, tiling: TilingMode) -> Self {
        Self {
            width,
            height,
            depth: 1,
            layers: 1,
            levels: 1,
            samples: 1,
            format,
            tiling,
            target: TargetKind::D2,
            usage: SurfaceUsage::RenderTarget,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("surface extent must be non-zero")]
    ZeroExtent,
    #[error("surface needs at least one layer and one mip level")]
    ZeroCount,
    #[error("mip count {got} exceeds full chain length {max}")]
    MipChainTooLong { got: u32, max: u32 },
    #[error("sample count must be a power of two")]
    BadSampleCount,
    #[error("multisampled surfaces cannot carry mip chains")]
    MultisampledMips,
    #[error("multisampled surfaces cannot be block-compressed")]
    MultisampledCompressed,
    #[error("cube surfaces need a layer count that is a multiple of 6")]
    BadCubeLayers,
    #[error("3d surfaces carry depth slices, not array layers")]
    ArrayOf3d,
}

/// An immutable image resource. Construction validates the shape and
/// resolves the address-math format: formats without a native transfer
/// encoding are substituted by a same-byte-size placeholder and the
/// surface is flagged ineligible for tiling-aware transfer paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    desc: SurfaceDesc,
    address_format: PixelFormat,
    tiling: TilingMode,
    transfer_eligible: bool,
}

impl Surface {
    pub fn new(desc: SurfaceDesc) -> Result<Self, ConfigurationError> {
        if desc.width == 0 || desc.height == 0 || desc.depth == 0 {
            return Err(ConfigurationError::ZeroExtent);
        }
        if desc.layers == 0 || desc.levels == 0 {
            return Err(ConfigurationError::ZeroCount);
        }
        let max_extent = desc.width.max(desc.height).max(desc.depth);
        let full_chain = 32 - max_extent.leading_zeros();
        if desc.levels > full_chain {
            return Err(ConfigurationError::MipChainTooLong {
                got: desc.levels,
                max: full_chain,
            });
        }
        if desc.samples == 0 || !desc.samples.is_power_of_two() {
            return Err(ConfigurationError::BadSampleCount);
        }
        if desc.samples > 1 && desc.levels > 1 {
            return Err(ConfigurationError::MultisampledMips);
        }
        if desc.samples > 1 && desc.format.is_compressed() {
            return Err(ConfigurationError::MultisampledCompressed);
        }
        if matches!(desc.target, TargetKind::Cube) && desc.layers % 6 != 0 {
            return Err(ConfigurationError::BadCubeLayers);
        }
        if matches!(desc.target, TargetKind::D3) && desc.layers > 1 {
            return Err(ConfigurationError::ArrayOf3d);
        }

        let (address_format, tiling, transfer_eligible) = match desc.format.transfer_substitute() {
            Some(sub) => (
                sub,
                desc.tiling,
                desc.format.has_native_transfer_encoding(),
            ),
            // No placeholder: lay out linearly, block-size alignment only.
            None => (desc.format, TilingMode::Linear, false),
        };

        Ok(Self {
            desc,
            address_format,
            tiling,
            transfer_eligible,
        })
    }

    pub fn desc(&self) -> &SurfaceDesc {
        &self.desc
    }

    pub fn samples(&self) -> u32 {
        self.desc.samples
    }

    pub fn levels(&self) -> u32 {
        self.desc.levels
    }

    /// Effective tiling after format substitution.
    pub fn tiling(&self) -> TilingMode {
        self.tiling
    }

    /// Format used for layout and address math.
    pub fn address_format(&self) -> PixelFormat {
        self.address_format
    }

    pub fn cpp(&self) -> u32 {
        self.address_format.block_bytes()
    }

    pub fn transfer_eligible(&self) -> bool {
        self.transfer_eligible
    }

    /// Array-or-depth extent multiplying the per-slice footprint.
    pub fn slice_count(&self) -> u32 {
        match self.desc.target {
            TargetKind::D3 => self.desc.depth,
            _ => self.desc.layers,
        }
    }

    /// Logical extent of one level, in blocks.
    pub fn level_extent_el(&self, level: u32) -> (u32, u32) {
        let w = (self.desc.width >> level).max(1);
        let h = (self.desc.height >> level).max(1);
        (
            w.div_ceil(self.desc.format.block_width()),
            h.div_ceil(self.desc.format.block_height()),
        )
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    #[error("surface footprint of {bytes} bytes exceeds the 4 GiB allocation cap")]
    AllocationOverflow { bytes: u64 },
    #[error("row pitch of {bytes} bytes is not addressable")]
    PitchOverflow { bytes: u64 },
}

/// Per-level placement inside the packed surface sheet. Origins are in
/// block units relative to the sheet; `offset_bytes` is the linear byte
/// offset of the origin for layer 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelDesc {
    pub x_origin_el: u32,
    pub y_origin_el: u32,
    pub offset_bytes: u64,
    pub width_el: u32,
    pub height_el: u32,
    pub slice_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceLayout {
    pub tiling: TilingMode,
    pub cpp: u32,
    pub pitch_bytes: u32,
    pub qpitch_rows: u32,
    pub levels: Vec<LevelDesc>,
    pub total_bytes: u64,
}

// Extent math runs in u64 (footprints in u128) so a surface the
// constructor accepts can never wrap the planner into a small answer;
// anything oversized falls out as PitchOverflow or AllocationOverflow.
fn align(value: u64, to: u64) -> u64 {
    value.div_ceil(to) * to
}

impl SurfaceLayout {
    /// Plan the byte layout of `surface`. Deterministic and side-effect
    /// free; two plans of the same surface are bit-identical.
    pub fn plan(surface: &Surface, config: &DeviceConfig) -> Result<Self, LayoutError> {
        let cpp = surface.cpp();
        let (halign, valign) = match surface.desc().usage {
            SurfaceUsage::RenderTarget | SurfaceUsage::DepthStencil => (4, 4),
            SurfaceUsage::Transfer => (1, 1),
        };

        let level_count = surface.levels() as usize;
        let mut widths = Vec::with_capacity(level_count);
        let mut heights = Vec::with_capacity(level_count);
        for level in 0..surface.levels() {
            let (w, h) = surface.level_extent_el(level);
            widths.push(align(w as u64, halign));
            heights.push(align(h as u64, valign));
        }

        if surface.desc().target.is_1d() {
            return Self::plan_1d(surface, &widths);
        }

        // Mip-pyramid packing: level 1 below level 0, levels 2+ stacked in
        // the column beside level 1. Pitch widens only when levels 1 and 2
        // together outgrow level 0.
        let pitch_el = if level_count >= 3 {
            widths[0].max(widths[1] + widths[2])
        } else {
            widths[0]
        };
        let pitch_raw = pitch_el * cpp as u64;
        let pitch_align = match (surface.tiling(), surface.desc().usage) {
            (TilingMode::TiledA, _) => 512,
            (TilingMode::TiledB, _) => 128,
            (TilingMode::Linear, SurfaceUsage::Transfer) => cpp,
            (TilingMode::Linear, _) => config.linear_align,
        };
        let pitch_bytes = align(pitch_raw, pitch_align as u64);
        let pitch_bytes =
            u32::try_from(pitch_bytes).map_err(|_| LayoutError::PitchOverflow { bytes: pitch_bytes })?;

        let below_rows: u64 = if level_count > 1 {
            let stacked: u64 = heights[2..].iter().sum();
            heights[1].max(stacked)
        } else {
            0
        };
        let qpitch = heights[0] + below_rows;

        let total = surface.slice_count() as u128 * qpitch as u128 * pitch_bytes as u128;
        if total > ALLOCATION_CAP_BYTES as u128 {
            return Err(LayoutError::AllocationOverflow {
                bytes: u64::try_from(total).unwrap_or(u64::MAX),
            });
        }
        let total_bytes = total as u64;
        let qpitch_rows = u32::try_from(qpitch)
            .map_err(|_| LayoutError::AllocationOverflow { bytes: total_bytes })?;

        // Past the cap check every origin fits u32: y origins are bounded
        // by qpitch, x origins by the pitch.
        let mut levels = Vec::with_capacity(level_count);
        let mut stacked_y = heights[0];
        for (index, &ah) in heights.iter().enumerate() {
            let (x_origin_el, y_origin_el) = match index {
                0 => (0, 0),
                1 => (0, heights[0]),
                _ => {
                    let origin = (widths[1], stacked_y);
                    stacked_y += ah;
                    origin
                }
            };
            let (width_el, height_el) = surface.level_extent_el(index as u32);
            levels.push(LevelDesc {
                x_origin_el: x_origin_el as u32,
                y_origin_el: y_origin_el as u32,
                offset_bytes: y_origin_el * pitch_bytes as u64 + x_origin_el * cpp as u64,
                width_el,
                height_el,
                slice_bytes: ah * pitch_bytes as u64,
            });
        }

        Ok(Self {
            tiling: surface.tiling(),
            cpp,
            pitch_bytes,
            qpitch_rows,
            levels,
            total_bytes,
        })
    }

    /// 1D targets pack levels side by side along X; pitch is one block and
    /// qpitch accumulates the total aligned width.
    fn plan_1d(surface: &Surface, widths: &[u64]) -> Result<Self, LayoutError> {
        let cpp = surface.cpp();
        let total_width: u64 = widths.iter().sum();
        let total = surface.slice_count() as u128 * total_width as u128 * cpp as u128;
        if total > ALLOCATION_CAP_BYTES as u128 {
            return Err(LayoutError::AllocationOverflow {
                bytes: u64::try_from(total).unwrap_or(u64::MAX),
            });
        }
        let total_bytes = total as u64;
        let qpitch_rows = u32::try_from(total_width)
            .map_err(|_| LayoutError::AllocationOverflow { bytes: total_bytes })?;

        let mut levels = Vec::with_capacity(widths.len());
        let mut cursor = 0u64;
        for (index, &aw) in widths.iter().enumerate() {
            let (width_el, _) = surface.level_extent_el(index as u32);
            levels.push(LevelDesc {
                x_origin_el: cursor as u32,
                y_origin_el: 0,
                offset_bytes: cursor * cpp as u64,
                width_el,
                height_el: 1,
                slice_bytes: aw * cpp as u64,
            });
            cursor += aw;
        }
        Ok(Self {
            tiling: TilingMode::Linear,
            cpp,
            pitch_bytes: cpp,
            qpitch_rows,
            levels,
            total_bytes,
        })
    }

    pub fn level(&self, level: u32) -> &LevelDesc {
        &self.levels[level as usize]
    }

    /// Sheet-absolute block origin of (level, layer). Array and depth
    /// slices are qpitch rows apart.
    pub fn image_origin(&self, level: u32, layer: u32) -> (u32, u32) {
        let desc = self.level(level);
        (
            desc.x_origin_el,
            layer * self.qpitch_rows + desc.y_origin_el,
        )
    }
}
