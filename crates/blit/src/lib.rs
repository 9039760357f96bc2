//! Chunked transfer scheduling for the copy engine.
//!
//! A copy request between two addressable regions is first screened by the
//! engine's rejection predicates, then split into hardware-legal chunks,
//! each independently addressed through the surface resolver, and finally
//! emitted atomically after an aperture pressure check. A rejected
//! transfer emits nothing; the caller falls back to a general-purpose copy
//! path outside this crate.

use cmdstream::{
    CmdOp, CombineOp, CommandStream, EndpointTiling, FillOp, TransferEncoding, TransferEndpoint,
    TransferOp,
};
use surface::addressing::{TexelAddress, resolve, tile_geometry};
use surface::{DeviceConfig, PixelFormat, Surface, SurfaceLayout, TilingMode, transfer_compatible};
use thiserror::Error;
use tracing::{debug, warn};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UnsupportedReason {
    #[error("endpoint is multisampled")]
    Multisampled,
    #[error("pixel encodings are not copy-compatible")]
    IncompatibleFormats,
    #[error("endpoint format has no native transfer encoding")]
    TransferIneligible,
    #[error("pitch exceeds the engine's addressable limit")]
    PitchTooLarge,
    #[error("linear pitch is not dword-aligned")]
    UnalignedLinearPitch,
    #[error("start offset violates the encoding's alignment rules")]
    UnalignedOffset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("transfer rejected: {0}")]
    Unsupported(#[from] UnsupportedReason),
    #[error("command stream aperture exhausted after flush-and-retry")]
    ResourcePressure,
}

/// A surface plus its planned layout; the pair every image endpoint
/// addresses through.
#[derive(Debug, Clone, Copy)]
pub struct ImageRef<'a> {
    pub surface: &'a Surface,
    pub layout: &'a SurfaceLayout,
}

/// One endpoint of a copy: a (level, layer) image of a surface, or a flat
/// byte region such as an on-chip staging area.
#[derive(Debug, Clone, Copy)]
pub enum CopyRegion<'a> {
    Image {
        image: ImageRef<'a>,
        level: u32,
        layer: u32,
        /// Invert the rectangle vertically (scanline order included).
        flip: bool,
    },
    Flat {
        base_offset: u64,
        pitch_bytes: u32,
    },
}

impl<'a> CopyRegion<'a> {
    pub fn image(image: ImageRef<'a>, level: u32, layer: u32) -> Self {
        CopyRegion::Image {
            image,
            level,
            layer,
            flip: false,
        }
    }

    fn samples(&self) -> u32 {
        match self {
            CopyRegion::Image { image, .. } => image.surface.samples(),
            CopyRegion::Flat { .. } => 1,
        }
    }

    fn transfer_eligible(&self) -> bool {
        match self {
            CopyRegion::Image { image, .. } => image.surface.transfer_eligible(),
            CopyRegion::Flat { .. } => true,
        }
    }

    fn format(&self) -> Option<PixelFormat> {
        match self {
            CopyRegion::Image { image, .. } => Some(image.surface.desc().format),
            CopyRegion::Flat { .. } => None,
        }
    }

    fn cpp(&self) -> Option<u32> {
        match self {
            CopyRegion::Image { image, .. } => Some(image.layout.cpp),
            CopyRegion::Flat { .. } => None,
        }
    }

    fn tiling(&self) -> TilingMode {
        match self {
            CopyRegion::Image { image, .. } => image.layout.tiling,
            CopyRegion::Flat { .. } => TilingMode::Linear,
        }
    }

    fn pitch_bytes(&self) -> u32 {
        match self {
            CopyRegion::Image { image, .. } => image.layout.pitch_bytes,
            CopyRegion::Flat { pitch_bytes, .. } => *pitch_bytes,
        }
    }

    /// Pitch in blt units: bytes for linear endpoints, dwords for tiled.
    fn blt_pitch(&self) -> u32 {
        let pitch = self.pitch_bytes();
        if self.tiling().is_tiled() { pitch / 4 } else { pitch }
    }

    fn base_offset(&self) -> u64 {
        match self {
            CopyRegion::Image { .. } => 0,
            CopyRegion::Flat { base_offset, .. } => *base_offset,
        }
    }

    fn flip(&self) -> bool {
        match self {
            CopyRegion::Image { flip, .. } => *flip,
            CopyRegion::Flat { .. } => false,
        }
    }

    fn level_height_el(&self) -> u32 {
        match self {
            CopyRegion::Image { image, level, .. } => image.layout.level(*level).height_el,
            CopyRegion::Flat { .. } => 0,
        }
    }

    /// Sheet-absolute origin of the addressed image.
    fn origin_el(&self) -> (u32, u32) {
        match self {
            CopyRegion::Image { image, level, layer, .. } => image.layout.image_origin(*level, *layer),
            CopyRegion::Flat { .. } => (0, 0),
        }
    }

    /// Bytes this endpoint keeps resident while its transfers are in
    /// flight. On-chip regions never occupy the aperture.
    fn resident_bytes(&self) -> u64 {
        match self {
            CopyRegion::Image { image, .. } => image.layout.total_bytes,
            CopyRegion::Flat { .. } => 0,
        }
    }

    fn endpoint_tiling(&self, cpp: u32) -> EndpointTiling {
        match tile_geometry(self.tiling(), cpp) {
            None => EndpointTiling::Linear,
            Some(geom) => EndpointTiling::Tiled {
                tile_width_bytes: geom.width_el * cpp,
                tile_rows: geom.height_el,
            },
        }
    }
}

/// Copy rectangle in block units, with independent start coordinates per
/// endpoint (relative to the addressed level/region).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRect {
    pub src_x: u32,
    pub src_y: u32,
    pub dst_x: u32,
    pub dst_y: u32,
    pub width: u32,
    pub height: u32,
}

/// The chunked transfer scheduler. Stateless; all hardware parameters
/// come from the device config resolved at context creation.
#[derive(Debug, Clone, Copy)]
pub struct CopyEngine<'a> {
    config: &'a DeviceConfig,
}

impl<'a> CopyEngine<'a> {
    pub fn new(config: &'a DeviceConfig) -> Self {
        Self { config }
    }

    /// Screen the endpoint pair against the rejection predicates without
    /// scheduling anything. Used by batch validation to refuse work that
    /// could otherwise only fail mid-pass.
    pub fn check_pair(&self, src: &CopyRegion<'_>, dst: &CopyRegion<'_>) -> Result<(), UnsupportedReason> {
        if src.samples() > 1 || dst.samples() > 1 {
            return Err(UnsupportedReason::Multisampled);
        }
        if !src.transfer_eligible() || !dst.transfer_eligible() {
            return Err(UnsupportedReason::TransferIneligible);
        }
        if let (Some(src_format), Some(dst_format)) = (src.format(), dst.format())
            && !transfer_compatible(src_format, dst_format)
        {
            return Err(UnsupportedReason::IncompatibleFormats);
        }
        if src.blt_pitch() >= self.config.blt_pitch_limit
            || dst.blt_pitch() >= self.config.blt_pitch_limit
        {
            return Err(UnsupportedReason::PitchTooLarge);
        }
        for endpoint in [src, dst] {
            if !endpoint.tiling().is_tiled() && endpoint.pitch_bytes() % 4 != 0 {
                return Err(UnsupportedReason::UnalignedLinearPitch);
            }
        }
        Ok(())
    }

    /// Split one rectangular copy into hardware-legal transfer ops.
    ///
    /// Pure: nothing is appended to any stream. Either every chunk of the
    /// rectangle is representable and all ops are returned, or the whole
    /// transfer is rejected with no ops.
    pub fn schedule(
        &self,
        src: &CopyRegion<'_>,
        dst: &CopyRegion<'_>,
        rect: CopyRect,
        combine: CombineOp,
    ) -> Result<Vec<TransferOp>, TransferError> {
        if let Err(reason) = self.check_pair(src, dst) {
            debug!(%reason, "copy engine falling back");
            return Err(reason.into());
        }

        let cpp = src.cpp().or_else(|| dst.cpp()).unwrap_or(1);

        // Flips resolve to a different start row once, up front; chunking
        // below never re-applies them. Callers keep rectangles inside the
        // level extent, so the fold cannot underflow.
        let mut src_y = rect.src_y;
        let mut dst_y = rect.dst_y;
        if src.flip() {
            debug_assert!(
                src_y + rect.height <= src.level_height_el(),
                "flip rectangle exceeds the source level extent"
            );
            src_y = src.level_height_el() - src_y - rect.height;
        }
        if dst.flip() {
            debug_assert!(
                dst_y + rect.height <= dst.level_height_el(),
                "flip rectangle exceeds the destination level extent"
            );
            dst_y = dst.level_height_el() - dst_y - rect.height;
        }
        let negate_src_pitch = src.flip() != dst.flip();

        let (src_origin_x, src_origin_y) = src.origin_el();
        let (dst_origin_x, dst_origin_y) = dst.origin_el();
        let src_x = rect.src_x + src_origin_x;
        let dst_x = rect.dst_x + dst_origin_x;
        src_y += src_origin_y;
        dst_y += dst_origin_y;

        let edge = self.config.max_chunk_edge;
        let mut ops = Vec::new();
        let mut chunk_y = 0;
        while chunk_y < rect.height {
            let chunk_h = edge.min(rect.height - chunk_y);
            let mut chunk_x = 0;
            while chunk_x < rect.width {
                let chunk_w = edge.min(rect.width - chunk_x);
                let src_addr = resolve(
                    src.pitch_bytes(),
                    src.tiling(),
                    cpp,
                    src_x + chunk_x,
                    src_y + chunk_y,
                );
                let dst_addr = resolve(
                    dst.pitch_bytes(),
                    dst.tiling(),
                    cpp,
                    dst_x + chunk_x,
                    dst_y + chunk_y,
                );
                ops.push(self.encode_chunk(
                    src,
                    dst,
                    cpp,
                    combine,
                    src_addr,
                    dst_addr,
                    chunk_w,
                    chunk_h,
                    negate_src_pitch,
                )?);
                chunk_x += edge;
            }
            chunk_y += edge;
        }
        Ok(ops)
    }

    /// Pick the encoding for one chunk and build its op.
    #[allow(clippy::too_many_arguments)]
    fn encode_chunk(
        &self,
        src: &CopyRegion<'_>,
        dst: &CopyRegion<'_>,
        cpp: u32,
        combine: CombineOp,
        src_addr: TexelAddress,
        dst_addr: TexelAddress,
        width: u32,
        height: u32,
        negate_src_pitch: bool,
    ) -> Result<TransferOp, TransferError> {
        let src_base = src.base_offset() + src_addr.block_offset;
        let dst_base = dst.base_offset() + dst_addr.block_offset;

        let fast = self.config.supports_fast_encoding
            && combine == CombineOp::Copy
            && !negate_src_pitch
            && src.tiling().is_tiled()
            && dst.tiling().is_tiled()
            && cpp.is_power_of_two()
            && cpp <= 16
            && (src_addr.residual_x as u64 * cpp as u64) % 16 == 0
            && (dst_addr.residual_x as u64 * cpp as u64) % 16 == 0
            && src_base % 64 == 0
            && dst_base % 64 == 0;

        if fast {
            return Ok(TransferOp {
                encoding: TransferEncoding::Fast,
                cpp,
                src: TransferEndpoint {
                    base_offset: src_base,
                    pitch: src.pitch_bytes() as i32,
                    tiling: src.endpoint_tiling(cpp),
                    x: src_addr.residual_x,
                    y: src_addr.residual_y,
                },
                dst: TransferEndpoint {
                    base_offset: dst_base,
                    pitch: dst.pitch_bytes() as i32,
                    tiling: dst.endpoint_tiling(cpp),
                    x: dst_addr.residual_x,
                    y: dst_addr.residual_y,
                },
                width,
                height,
                combine,
            });
        }

        // General encoding addresses at most 4 bytes per column; wider
        // texels are reinterpreted as narrow columns with X scaled.
        let (op_cpp, x_scale) = if cpp > 4 {
            if cpp % 4 == 2 {
                (2, cpp / 2)
            } else {
                debug_assert_eq!(cpp % 4, 0);
                (4, cpp / 4)
            }
        } else {
            (cpp, 1)
        };

        for (endpoint, base) in [(src, src_base), (dst, dst_base)] {
            let aligned = if endpoint.tiling().is_tiled() {
                base % self.config.tile_bytes as u64 == 0
            } else {
                base % self.config.linear_align as u64 == 0
            };
            if !aligned || base % op_cpp as u64 != 0 || endpoint.pitch_bytes() % 4 != 0 {
                debug!(base, "general encoding cannot address chunk start");
                return Err(UnsupportedReason::UnalignedOffset.into());
            }
        }

        let src_pitch = src.pitch_bytes() as i32;
        Ok(TransferOp {
            encoding: TransferEncoding::General,
            cpp: op_cpp,
            src: TransferEndpoint {
                base_offset: src_base,
                pitch: if negate_src_pitch { -src_pitch } else { src_pitch },
                tiling: src.endpoint_tiling(cpp),
                x: src_addr.residual_x * x_scale,
                y: src_addr.residual_y,
            },
            dst: TransferEndpoint {
                base_offset: dst_base,
                pitch: dst.pitch_bytes() as i32,
                tiling: dst.endpoint_tiling(cpp),
                x: dst_addr.residual_x * x_scale,
                y: dst_addr.residual_y,
            },
            width: width * x_scale,
            height,
            combine,
        })
    }

    /// Alpha-fill ops covering the destination rectangle, needed when an
    /// alpha-less source lands in an alpha-carrying destination through
    /// the channel-fill whitelist pair.
    fn alpha_fill_ops(
        &self,
        src: &CopyRegion<'_>,
        dst: &CopyRegion<'_>,
        rect: CopyRect,
    ) -> Vec<FillOp> {
        let needs_fill = match (src.format(), dst.format()) {
            (Some(src_format), Some(dst_format)) => {
                !src_format.has_alpha() && dst_format.has_alpha()
            }
            _ => false,
        };
        if !needs_fill {
            return Vec::new();
        }

        let cpp = dst.cpp().unwrap_or(1);
        let (origin_x, origin_y) = dst.origin_el();
        let mut dst_y = rect.dst_y;
        if dst.flip() {
            debug_assert!(
                dst_y + rect.height <= dst.level_height_el(),
                "flip rectangle exceeds the destination level extent"
            );
            dst_y = dst.level_height_el() - dst_y - rect.height;
        }
        let dst_x = rect.dst_x + origin_x;
        dst_y += origin_y;

        let edge = self.config.max_chunk_edge;
        let mut fills = Vec::new();
        let mut chunk_y = 0;
        while chunk_y < rect.height {
            let chunk_h = edge.min(rect.height - chunk_y);
            let mut chunk_x = 0;
            while chunk_x < rect.width {
                let chunk_w = edge.min(rect.width - chunk_x);
                let addr = resolve(
                    dst.pitch_bytes(),
                    dst.tiling(),
                    cpp,
                    dst_x + chunk_x,
                    dst_y + chunk_y,
                );
                fills.push(FillOp {
                    cpp,
                    dst: TransferEndpoint {
                        base_offset: dst.base_offset() + addr.block_offset,
                        pitch: dst.pitch_bytes() as i32,
                        tiling: dst.endpoint_tiling(cpp),
                        x: addr.residual_x,
                        y: addr.residual_y,
                    },
                    width: chunk_w,
                    height: chunk_h,
                    value: 0xffff_ffff,
                    alpha_only: true,
                });
                chunk_x += edge;
            }
            chunk_y += edge;
        }
        fills
    }

    /// Schedule and append atomically: the ops land in the stream only
    /// after the whole transfer passed the aperture pressure check, so a
    /// failure never leaves a partially written rectangle behind.
    pub fn emit(
        &self,
        stream: &mut CommandStream,
        src: &CopyRegion<'_>,
        dst: &CopyRegion<'_>,
        rect: CopyRect,
        combine: CombineOp,
    ) -> Result<usize, TransferError> {
        let ops = self.schedule(src, dst, rect, combine)?;
        let fills = self.alpha_fill_ops(src, dst, rect);

        let op_bytes: u64 = ops
            .iter()
            .map(|op| CmdOp::Transfer(*op).encoded_bytes())
            .chain(fills.iter().map(|fill| CmdOp::Fill(*fill).encoded_bytes()))
            .sum();
        let resident = src.resident_bytes() + dst.resident_bytes();
        let working_set = resident + op_bytes;

        if !stream.fits(working_set) {
            warn!(
                pending = stream.pending_bytes(),
                working_set, "copy working set exceeds aperture, flushing stream"
            );
            stream.flush();
            if !stream.fits(working_set) {
                debug!(working_set, "aperture still exhausted after flush");
                return Err(TransferError::ResourcePressure);
            }
        }

        stream.note_resident(resident);
        let count = ops.len() + fills.len();
        for op in ops {
            stream.push(CmdOp::Transfer(op));
        }
        for fill in fills {
            stream.push(CmdOp::Fill(fill));
        }
        Ok(count)
    }

    /// Flat buffer-to-buffer copy of `size` bytes, expressed as wide
    /// dword-pitched rectangles plus a final short row. Start offsets are
    /// rounded down to the access granularity with the remainder carried
    /// in X, the same fold the linear resolver applies.
    pub fn linear_copy(
        &self,
        stream: &mut CommandStream,
        mut src_offset: u64,
        mut dst_offset: u64,
        mut size: u64,
    ) -> Result<(), TransferError> {
        const MAX_ROW: u64 = (1 << 15) - 64;

        while size > 0 {
            let span = size.min(MAX_ROW);
            let row_bytes = span & !3;
            let (width, height) = if row_bytes == 0 {
                // short tail, less than one dword
                (size as u32, 1u64)
            } else {
                (row_bytes as u32, size / row_bytes)
            };
            let pitch = (width as u64 + 3) as u32 & !3;

            let src_x = (src_offset % self.config.linear_align as u64) as u32;
            let dst_x = (dst_offset % self.config.linear_align as u64) as u32;
            let src = CopyRegion::Flat {
                base_offset: src_offset - src_x as u64,
                pitch_bytes: pitch,
            };
            let dst = CopyRegion::Flat {
                base_offset: dst_offset - dst_x as u64,
                pitch_bytes: pitch,
            };
            self.emit(
                stream,
                &src,
                &dst,
                CopyRect {
                    src_x,
                    src_y: 0,
                    dst_x,
                    dst_y: 0,
                    width,
                    height: height as u32,
                },
                CombineOp::Copy,
            )?;

            let consumed = width as u64 * height;
            src_offset += consumed;
            dst_offset += consumed;
            size -= consumed;
        }
        Ok(())
    }
}
