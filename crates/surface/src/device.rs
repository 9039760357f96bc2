//! Per-device configuration, resolved once at context creation.
//!
//! Generation-specific behavior is dispatched through this one value
//! instead of process-wide driver state or per-call capability lookups.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuGeneration {
    Gen8,
    Gen9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub generation: GpuGeneration,
    /// Addressable pitch limit of the copy engine, in blt pitch units
    /// (bytes for linear surfaces, dwords for tiled ones).
    pub blt_pitch_limit: u32,
    /// Chunk edge cap for large copies. Half the engine's absolute
    /// 32768 scan-line limit so intratile start offsets always fit.
    pub max_chunk_edge: u32,
    /// Access granularity for linear addressing (cacheline).
    pub linear_align: u32,
    /// Fixed byte size of one tiled page.
    pub tile_bytes: u32,
    pub supports_fast_encoding: bool,
}

impl DeviceConfig {
    pub fn new(generation: GpuGeneration) -> Self {
        Self {
            generation,
            blt_pitch_limit: 32768,
            max_chunk_edge: 16384,
            linear_align: 64,
            tile_bytes: 4096,
            supports_fast_encoding: matches!(generation, GpuGeneration::Gen9),
        }
    }
}
