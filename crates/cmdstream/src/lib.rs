//! Command-stream protocol for the tiled rendering and copy engines.
//!
//! This crate defines the ordered op stream handed to the external command
//! processor, plus the in-flight aperture accounting the copy scheduler
//! uses for its flush-and-retry pressure check. Ops are plain data; the
//! register-level encoding of each op is owned by the consumer.

use smallvec::SmallVec;

pub const DEFAULT_APERTURE_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Gmem,
    Bypass,
}

/// Late-bound draw visibility, resolved at replay time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityMode {
    UseStream,
    Ignore,
}

/// Logical combine applied by the general transfer encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombineOp {
    Clear,
    And,
    Copy,
    Noop,
    Xor,
    Or,
    Invert,
    Set,
}

impl CombineOp {
    /// 8-bit raster code understood by the transfer engine.
    pub const fn raster_code(self) -> u8 {
        match self {
            CombineOp::Clear => 0x00,
            CombineOp::And => 0x88,
            CombineOp::Copy => 0xCC,
            CombineOp::Noop => 0xAA,
            CombineOp::Xor => 0x66,
            CombineOp::Or => 0xEE,
            CombineOp::Invert => 0x55,
            CombineOp::Set => 0xFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// Tiling-aware high-throughput encoding; stricter alignment rules.
    Fast,
    /// General encoding; supports combine ops and reinterpreted wide texels.
    General,
}

/// How one endpoint of a transfer is addressed. Tiled endpoints carry the
/// interior geometry so the consumer can walk texels without knowing which
/// tiling family produced the op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointTiling {
    Linear,
    Tiled {
        tile_width_bytes: u32,
        tile_rows: u32,
    },
}

/// One fully resolved side of a rectangular copy. `base_offset` is already
/// tile-page (tiled) or cacheline (linear) aligned; `x`/`y` carry the
/// residual element coordinates. A negative pitch walks rows downward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferEndpoint {
    pub base_offset: u64,
    pub pitch: i32,
    pub tiling: EndpointTiling,
    pub x: u32,
    pub y: u32,
}

/// One scheduled rectangular copy. Either fully emitted or never emitted;
/// the scheduler guarantees no partial destination writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOp {
    pub encoding: TransferEncoding,
    pub cpp: u32,
    pub src: TransferEndpoint,
    pub dst: TransferEndpoint,
    pub width: u32,
    pub height: u32,
    pub combine: CombineOp,
}

/// Constant fill of a rectangle, optionally restricted to the alpha
/// channel (used after an alpha-less source lands in an alpha format).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillOp {
    pub cpp: u32,
    pub dst: TransferEndpoint,
    pub width: u32,
    pub height: u32,
    pub value: u32,
    pub alpha_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdOp {
    SetRenderMode(RenderMode),
    /// Inclusive clip window in framebuffer coordinates.
    WindowScissor { x1: u32, y1: u32, x2: u32, y2: u32 },
    /// Coordinate offset making later addressing tile-relative.
    WindowOffset { x: u32, y: u32 },
    Transfer(TransferOp),
    Fill(FillOp),
    DrawReplay { draw_id: u64, visibility: VisibilityMode },
    CacheFlush,
}

impl CmdOp {
    /// Estimated encoded size, used only for aperture accounting.
    pub fn encoded_bytes(&self) -> u64 {
        match self {
            CmdOp::SetRenderMode(_) | CmdOp::CacheFlush => 8,
            CmdOp::WindowScissor { .. } | CmdOp::WindowOffset { .. } => 12,
            CmdOp::Transfer(_) => 40,
            CmdOp::Fill(_) => 28,
            CmdOp::DrawReplay { .. } => 16,
        }
    }
}

/// Append-only op stream with in-flight working-set accounting.
///
/// The stream is produced on a single thread and consumed asynchronously
/// by the external command processor; `flush` hands off everything queued
/// so far and resets the pending accounting. The op list itself is kept so
/// callers (and tests) can inspect the full emission order.
#[derive(Debug)]
pub struct CommandStream {
    ops: Vec<CmdOp>,
    aperture_bytes: u64,
    pending_bytes: u64,
    flush_marks: SmallVec<[usize; 4]>,
}

impl CommandStream {
    pub fn new(aperture_bytes: u64) -> Self {
        Self {
            ops: Vec::new(),
            aperture_bytes,
            pending_bytes: 0,
            flush_marks: SmallVec::new(),
        }
    }

    pub fn with_default_aperture() -> Self {
        Self::new(DEFAULT_APERTURE_BYTES)
    }

    /// Whether `extra` more in-flight bytes still fit the aperture.
    pub fn fits(&self, extra: u64) -> bool {
        self.pending_bytes.saturating_add(extra) <= self.aperture_bytes
    }

    pub fn push(&mut self, op: CmdOp) {
        self.pending_bytes = self.pending_bytes.saturating_add(op.encoded_bytes());
        self.ops.push(op);
    }

    /// Account referenced resource bytes (surfaces addressed by queued
    /// transfers) against the aperture until the next flush.
    pub fn note_resident(&mut self, bytes: u64) {
        self.pending_bytes = self.pending_bytes.saturating_add(bytes);
    }

    /// Hand queued work to the consumer and reset pending accounting.
    pub fn flush(&mut self) {
        self.flush_marks.push(self.ops.len());
        self.pending_bytes = 0;
    }

    pub fn flush_count(&self) -> usize {
        self.flush_marks.len()
    }

    pub fn pending_bytes(&self) -> u64 {
        self.pending_bytes
    }

    pub fn ops(&self) -> &[CmdOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
