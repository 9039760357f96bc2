//! Pixel formats as the layout planner and copy engine see them: a block
//! size in bytes, a block footprint in texels, and whether the transfer
//! engine has a native encoding for the format.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8,
    R16,
    Rg8,
    R32Float,
    Rgba8,
    Rgbx8,
    Bgra8,
    Bgrx8,
    Rgba16Float,
    Rgba32Float,
    /// 12 bytes per texel; no same-size placeholder exists, so surfaces in
    /// this format are laid out linearly and never take a tiled copy path.
    Rgb32Float,
    /// Packed shared-exponent format; addressable as raw 32-bit words only.
    Rgb9e5,
    Depth32Float,
    Stencil8,
    Bc1,
    Bc3,
    /// Placeholder formats substituted for address math when a format has
    /// no native transfer encoding.
    Raw8,
    Raw16,
    Raw32,
    Raw64,
    Raw128,
}

impl PixelFormat {
    /// Bytes per block (per texel for uncompressed formats).
    pub const fn block_bytes(self) -> u32 {
        match self {
            PixelFormat::R8 | PixelFormat::Stencil8 | PixelFormat::Raw8 => 1,
            PixelFormat::R16 | PixelFormat::Rg8 | PixelFormat::Raw16 => 2,
            PixelFormat::R32Float
            | PixelFormat::Rgba8
            | PixelFormat::Rgbx8
            | PixelFormat::Bgra8
            | PixelFormat::Bgrx8
            | PixelFormat::Rgb9e5
            | PixelFormat::Depth32Float
            | PixelFormat::Raw32 => 4,
            PixelFormat::Rgba16Float | PixelFormat::Bc1 | PixelFormat::Raw64 => 8,
            PixelFormat::Rgba32Float | PixelFormat::Bc3 | PixelFormat::Raw128 => 16,
            PixelFormat::Rgb32Float => 12,
        }
    }

    pub const fn block_width(self) -> u32 {
        match self {
            PixelFormat::Bc1 | PixelFormat::Bc3 => 4,
            _ => 1,
        }
    }

    pub const fn block_height(self) -> u32 {
        match self {
            PixelFormat::Bc1 | PixelFormat::Bc3 => 4,
            _ => 1,
        }
    }

    pub const fn is_compressed(self) -> bool {
        matches!(self, PixelFormat::Bc1 | PixelFormat::Bc3)
    }

    /// True when the transfer engine can address this format directly.
    pub const fn has_native_transfer_encoding(self) -> bool {
        !matches!(self, PixelFormat::Rgb32Float | PixelFormat::Rgb9e5)
    }

    /// Format to use for layout and address math. `None` means the block
    /// size has no 1/2/4/8/16-byte placeholder; such surfaces are laid out
    /// with minimal alignment and are transfer-ineligible.
    pub const fn transfer_substitute(self) -> Option<PixelFormat> {
        if self.has_native_transfer_encoding() {
            return Some(self);
        }
        match self.block_bytes() {
            1 => Some(PixelFormat::Raw8),
            2 => Some(PixelFormat::Raw16),
            4 => Some(PixelFormat::Raw32),
            8 => Some(PixelFormat::Raw64),
            16 => Some(PixelFormat::Raw128),
            _ => None,
        }
    }

    const fn alpha_drop_class(self) -> Option<u8> {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Rgbx8 => Some(0),
            PixelFormat::Bgra8 | PixelFormat::Bgrx8 => Some(1),
            _ => None,
        }
    }

    /// Whether the format carries a real alpha channel (as opposed to an
    /// unused last channel).
    pub const fn has_alpha(self) -> bool {
        matches!(
            self,
            PixelFormat::Rgba8
                | PixelFormat::Bgra8
                | PixelFormat::Rgba16Float
                | PixelFormat::Rgba32Float
        )
    }
}

/// The copy engine does no format conversion. Equal formats are always
/// compatible; beyond that only the literal alpha-drop/alpha-fill pairs of
/// equal byte width are allowed. This list is closed by review, not
/// extensible.
pub fn transfer_compatible(src: PixelFormat, dst: PixelFormat) -> bool {
    if src == dst {
        return true;
    }
    match (src.alpha_drop_class(), dst.alpha_drop_class()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
