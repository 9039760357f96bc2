//! Render-pass data model: attachments, framebuffers, the on-chip memory
//! partition, and the batch handed to the orchestrator.
//!
//! A batch is validated completely at build time: every attachment a
//! restore or resolve mask names must be bound, extent-matched, and able
//! to take the copy engine's transfer path. The pass itself can then only
//! fail on resource pressure, never on a malformed attachment.

use bitvec::prelude::{BitVec, Lsb0};
use blit::{CopyEngine, CopyRegion, ImageRef, UnsupportedReason};
use cmdstream::VisibilityMode;
use surface::{DeviceConfig, LayoutError, Surface, SurfaceLayout};
use thiserror::Error;

pub const MAX_COLOR_TARGETS: usize = 8;
const SLOT_COUNT: usize = MAX_COLOR_TARGETS + 2;

/// A render-target binding point. Depth and stencil are separate slots
/// with separate mask bits even when backed by the same logical buffer,
/// so each plane restores and resolves independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentSlot {
    Color(usize),
    Depth,
    Stencil,
}

impl AttachmentSlot {
    /// A color index past `MAX_COLOR_TARGETS` names a slot no
    /// framebuffer has; it must never reach a mask, where it would alias
    /// the depth or stencil bit.
    fn index(self) -> Result<usize, InvalidSlotError> {
        match self {
            AttachmentSlot::Color(index) if index < MAX_COLOR_TARGETS => Ok(index),
            AttachmentSlot::Color(index) => Err(InvalidSlotError { index }),
            AttachmentSlot::Depth => Ok(MAX_COLOR_TARGETS),
            AttachmentSlot::Stencil => Ok(MAX_COLOR_TARGETS + 1),
        }
    }

    fn from_index(index: usize) -> Self {
        match index {
            MAX_COLOR_TARGETS => AttachmentSlot::Depth,
            i if i == MAX_COLOR_TARGETS + 1 => AttachmentSlot::Stencil,
            i => AttachmentSlot::Color(i),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("no attachment slot at color index {index}")]
pub struct InvalidSlotError {
    pub index: usize,
}

/// Bitset over attachment slots, used for the restore and resolve masks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentMask {
    bits: BitVec<usize, Lsb0>,
}

impl AttachmentMask {
    pub fn empty() -> Self {
        Self {
            bits: BitVec::repeat(false, SLOT_COUNT),
        }
    }

    pub fn set(&mut self, slot: AttachmentSlot) -> Result<(), InvalidSlotError> {
        self.bits.set(slot.index()?, true);
        Ok(())
    }

    pub fn contains(&self, slot: AttachmentSlot) -> bool {
        slot.index().is_ok_and(|index| self.bits[index])
    }

    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    /// Set slots in index order: colors first, then depth, then stencil.
    pub fn slots(&self) -> impl Iterator<Item = AttachmentSlot> + '_ {
        self.bits.iter_ones().map(AttachmentSlot::from_index)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("mip level {level} out of range")]
    LevelOutOfRange { level: u32 },
    #[error("array layer {layer} out of range")]
    LayerOutOfRange { layer: u32 },
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// One bound render target: a surface plus the (level, layer) image the
/// pass actually renders into. Owns the planned layout so restore and
/// resolve address the true main-memory placement of that image.
#[derive(Debug, Clone)]
pub struct Attachment {
    surface: Surface,
    layout: SurfaceLayout,
    level: u32,
    layer: u32,
}

impl Attachment {
    pub fn new(
        surface: Surface,
        level: u32,
        layer: u32,
        config: &DeviceConfig,
    ) -> Result<Self, AttachmentError> {
        if level >= surface.levels() {
            return Err(AttachmentError::LevelOutOfRange { level });
        }
        if layer >= surface.slice_count() {
            return Err(AttachmentError::LayerOutOfRange { layer });
        }
        let layout = SurfaceLayout::plan(&surface, config)?;
        Ok(Self {
            surface,
            layout,
            level,
            layer,
        })
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn layout(&self) -> &SurfaceLayout {
        &self.layout
    }

    /// Extent of the addressed image, in blocks.
    pub fn extent(&self) -> (u32, u32) {
        self.surface.level_extent_el(self.level)
    }

    pub fn cpp(&self) -> u32 {
        self.layout.cpp
    }

    pub(crate) fn region(&self) -> CopyRegion<'_> {
        CopyRegion::image(
            ImageRef {
                surface: &self.surface,
                layout: &self.layout,
            },
            self.level,
            self.layer,
        )
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferError {
    #[error("framebuffer needs at least one attachment")]
    NoAttachments,
    #[error("more than {MAX_COLOR_TARGETS} color attachments")]
    TooManyColorTargets,
    #[error("attachments disagree on sample count")]
    MismatchedSampleCounts,
    #[error("attachments disagree on extent")]
    MismatchedExtents,
}

/// Ordered color attachments plus optional depth and stencil planes. All
/// bound attachments share one extent and sample count; the tile grid is
/// derived from that extent.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    colors: Vec<Option<Attachment>>,
    depth: Option<Attachment>,
    stencil: Option<Attachment>,
    width: u32,
    height: u32,
    samples: u32,
}

impl Framebuffer {
    pub fn new(
        colors: Vec<Option<Attachment>>,
        depth: Option<Attachment>,
        stencil: Option<Attachment>,
    ) -> Result<Self, FramebufferError> {
        if colors.len() > MAX_COLOR_TARGETS {
            return Err(FramebufferError::TooManyColorTargets);
        }
        let mut shape: Option<((u32, u32), u32)> = None;
        let all = colors
            .iter()
            .flatten()
            .chain(depth.iter())
            .chain(stencil.iter());
        for attachment in all {
            let this = (attachment.extent(), attachment.surface.samples());
            match shape {
                None => shape = Some(this),
                Some((extent, samples)) => {
                    if samples != this.1 {
                        return Err(FramebufferError::MismatchedSampleCounts);
                    }
                    if extent != this.0 {
                        return Err(FramebufferError::MismatchedExtents);
                    }
                }
            }
        }
        let Some(((width, height), samples)) = shape else {
            return Err(FramebufferError::NoAttachments);
        };
        Ok(Self {
            colors,
            depth,
            stencil,
            width,
            height,
            samples,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn attachment(&self, slot: AttachmentSlot) -> Option<&Attachment> {
        match slot {
            AttachmentSlot::Color(index) => self.colors.get(index).and_then(Option::as_ref),
            AttachmentSlot::Depth => self.depth.as_ref(),
            AttachmentSlot::Stencil => self.stencil.as_ref(),
        }
    }
}

/// Externally planned carve-up of on-chip memory: the nominal tile (bin)
/// size plus one fixed base offset per attachment slot. Consumed
/// read-only; the capacity planner that produces it lives outside this
/// subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GmemPartition {
    pub bin_width: u32,
    pub bin_height: u32,
    pub color_base: [u32; MAX_COLOR_TARGETS],
    pub zs_base: [u32; 2],
}

impl GmemPartition {
    pub fn base_for(&self, slot: AttachmentSlot) -> u32 {
        match slot {
            AttachmentSlot::Color(index) => self.color_base[index],
            AttachmentSlot::Depth => self.zs_base[0],
            AttachmentSlot::Stencil => self.zs_base[1],
        }
    }
}

/// Draw visibility as recorded in a template. `LateBound` is a
/// placeholder resolved once at replay time; the template itself is never
/// rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawVisibility {
    Fixed(VisibilityMode),
    LateBound,
}

/// An immutable queued draw. Replay binds the late-bound visibility
/// parameter per pass without touching the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawTemplate {
    pub draw_id: u64,
    pub visibility: DrawVisibility,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BatchBuildError {
    #[error("partition bin dimensions must be non-zero")]
    EmptyBin,
    #[error(transparent)]
    InvalidSlot(#[from] InvalidSlotError),
    #[error("mask names slot {slot:?} with no bound attachment")]
    MissingAttachment { slot: AttachmentSlot },
    #[error("partition base for slot {slot:?} is not access-aligned")]
    UnalignedPartitionBase { slot: AttachmentSlot },
    #[error("attachment in slot {slot:?} cannot take the transfer path: {reason}")]
    UntransferableAttachment {
        slot: AttachmentSlot,
        reason: UnsupportedReason,
    },
}

/// One render-pass instance: framebuffer, partition, restore/resolve
/// masks, and the ordered draw queue. Built once, consumed exactly once
/// by the orchestrator, then gone.
#[derive(Debug)]
pub struct Batch {
    pub(crate) framebuffer: Framebuffer,
    pub(crate) partition: GmemPartition,
    pub(crate) restore_mask: AttachmentMask,
    pub(crate) resolve_mask: AttachmentMask,
    pub(crate) draws: Vec<DrawTemplate>,
    pub(crate) use_visibility_stream: bool,
}

impl Batch {
    /// On-chip destination for one attachment's tile rectangle: a flat
    /// region at the slot's fixed base, row stride of one full bin.
    pub(crate) fn gmem_region(&self, slot: AttachmentSlot, cpp: u32) -> CopyRegion<'static> {
        CopyRegion::Flat {
            base_offset: self.partition.base_for(slot) as u64,
            pitch_bytes: self.partition.bin_width * cpp,
        }
    }
}

pub struct BatchBuilder {
    framebuffer: Framebuffer,
    partition: GmemPartition,
    restore_slots: Vec<AttachmentSlot>,
    resolve_slots: Vec<AttachmentSlot>,
    draws: Vec<DrawTemplate>,
    use_visibility_stream: bool,
}

impl BatchBuilder {
    pub fn new(framebuffer: Framebuffer, partition: GmemPartition) -> Self {
        Self {
            framebuffer,
            partition,
            restore_slots: Vec::new(),
            resolve_slots: Vec::new(),
            draws: Vec::new(),
            use_visibility_stream: false,
        }
    }

    /// Load this attachment's main-memory content into on-chip memory
    /// before the tile's draws. A slot left out of the mask keeps stale
    /// on-chip bytes; the caller guarantees draws overwrite every texel.
    pub fn restore(mut self, slot: AttachmentSlot) -> Self {
        self.restore_slots.push(slot);
        self
    }

    /// Write this attachment's tile back to main memory after the draws.
    pub fn resolve(mut self, slot: AttachmentSlot) -> Self {
        self.resolve_slots.push(slot);
        self
    }

    pub fn draw(mut self, template: DrawTemplate) -> Self {
        self.draws.push(template);
        self
    }

    pub fn visibility_stream(mut self, use_stream: bool) -> Self {
        self.use_visibility_stream = use_stream;
        self
    }

    /// Validate every masked slot and attachment against the copy
    /// engine so the pass can never hit an unsupported transfer
    /// mid-tile. Slot range is checked here too: a color index past the
    /// framebuffer's slots must not fold into the depth or stencil bit.
    pub fn build(self, config: &DeviceConfig) -> Result<Batch, BatchBuildError> {
        if self.partition.bin_width == 0 || self.partition.bin_height == 0 {
            return Err(BatchBuildError::EmptyBin);
        }
        let mut restore_mask = AttachmentMask::empty();
        for slot in self.restore_slots {
            restore_mask.set(slot)?;
        }
        let mut resolve_mask = AttachmentMask::empty();
        for slot in self.resolve_slots {
            resolve_mask.set(slot)?;
        }
        let batch = Batch {
            framebuffer: self.framebuffer,
            partition: self.partition,
            restore_mask,
            resolve_mask,
            draws: self.draws,
            use_visibility_stream: self.use_visibility_stream,
        };

        let engine = CopyEngine::new(config);
        for slot in batch.restore_mask.slots().chain(batch.resolve_mask.slots()) {
            let Some(attachment) = batch.framebuffer.attachment(slot) else {
                return Err(BatchBuildError::MissingAttachment { slot });
            };
            if batch.partition.base_for(slot) % config.linear_align != 0 {
                return Err(BatchBuildError::UnalignedPartitionBase { slot });
            }
            let gmem = batch.gmem_region(slot, attachment.cpp());
            engine
                .check_pair(&attachment.region(), &gmem)
                .map_err(|reason| BatchBuildError::UntransferableAttachment { slot, reason })?;
        }
        Ok(batch)
    }
}
