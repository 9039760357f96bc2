use cmdstream::{CmdOp, CombineOp, CommandStream, TransferEncoding};
use surface::{
    DeviceConfig, GpuGeneration, PixelFormat, Surface, SurfaceDesc, SurfaceLayout, TilingMode,
};

use super::*;

fn config() -> DeviceConfig {
    DeviceConfig::new(GpuGeneration::Gen9)
}

struct Img {
    surface: Surface,
    layout: SurfaceLayout,
}

impl Img {
    fn new(desc: SurfaceDesc) -> Self {
        let surface = Surface::new(desc).expect("valid surface");
        let layout = SurfaceLayout::plan(&surface, &config()).expect("plannable surface");
        Self { surface, layout }
    }

    fn plain(width: u32, height: u32, format: PixelFormat, tiling: TilingMode) -> Self {
        Self::new(SurfaceDesc::plain_2d(width, height, format, tiling))
    }

    fn region(&self) -> CopyRegion<'_> {
        CopyRegion::image(
            ImageRef {
                surface: &self.surface,
                layout: &self.layout,
            },
            0,
            0,
        )
    }

    fn flipped(&self) -> CopyRegion<'_> {
        CopyRegion::Image {
            image: ImageRef {
                surface: &self.surface,
                layout: &self.layout,
            },
            level: 0,
            layer: 0,
            flip: true,
        }
    }
}

fn rect(width: u32, height: u32) -> CopyRect {
    CopyRect {
        src_x: 0,
        src_y: 0,
        dst_x: 0,
        dst_y: 0,
        width,
        height,
    }
}

fn transfer_ops(stream: &CommandStream) -> Vec<TransferOp> {
    stream
        .ops()
        .iter()
        .filter_map(|op| match op {
            CmdOp::Transfer(t) => Some(*t),
            _ => None,
        })
        .collect()
}

#[test]
fn rejection_predicates_fire_in_order() {
    let config = config();
    let engine = CopyEngine::new(&config);

    let plain = Img::plain(64, 64, PixelFormat::Rgba8, TilingMode::TiledA);
    let msaa = Img::new(SurfaceDesc {
        samples: 2,
        ..SurfaceDesc::plain_2d(64, 64, PixelFormat::Rgba8, TilingMode::TiledA)
    });
    assert_eq!(
        engine.check_pair(&msaa.region(), &plain.region()),
        Err(UnsupportedReason::Multisampled)
    );

    // multisampling screens before eligibility
    let packed = Img::plain(64, 64, PixelFormat::Rgb9e5, TilingMode::TiledA);
    let msaa_packed = Img::new(SurfaceDesc {
        samples: 2,
        ..SurfaceDesc::plain_2d(64, 64, PixelFormat::Rgb9e5, TilingMode::TiledA)
    });
    assert_eq!(
        engine.check_pair(&msaa_packed.region(), &packed.region()),
        Err(UnsupportedReason::Multisampled)
    );
    assert_eq!(
        engine.check_pair(&packed.region(), &packed.region()),
        Err(UnsupportedReason::TransferIneligible)
    );

    let bgra = Img::plain(64, 64, PixelFormat::Bgra8, TilingMode::TiledA);
    assert_eq!(
        engine.check_pair(&plain.region(), &bgra.region()),
        Err(UnsupportedReason::IncompatibleFormats)
    );

    // 8192 * 4 bytes of linear pitch hits the limit; the same width tiled
    // is measured in dwords and stays addressable
    let wide_linear = Img::plain(8192, 64, PixelFormat::Rgba8, TilingMode::Linear);
    let wide_tiled = Img::plain(8192, 64, PixelFormat::Rgba8, TilingMode::TiledA);
    assert_eq!(
        engine.check_pair(&wide_linear.region(), &wide_linear.region()),
        Err(UnsupportedReason::PitchTooLarge)
    );
    assert_eq!(
        engine.check_pair(&wide_tiled.region(), &wide_tiled.region()),
        Ok(())
    );

    let ragged = CopyRegion::Flat {
        base_offset: 0,
        pitch_bytes: 30,
    };
    let flat = CopyRegion::Flat {
        base_offset: 0,
        pitch_bytes: 64,
    };
    assert_eq!(
        engine.check_pair(&ragged, &flat),
        Err(UnsupportedReason::UnalignedLinearPitch)
    );
}

#[test]
fn rejected_transfer_emits_nothing() {
    let config = config();
    let engine = CopyEngine::new(&config);
    let rgba = Img::plain(64, 64, PixelFormat::Rgba8, TilingMode::TiledA);
    let bgra = Img::plain(64, 64, PixelFormat::Bgra8, TilingMode::TiledA);

    let mut stream = CommandStream::with_default_aperture();
    let err = engine
        .emit(&mut stream, &rgba.region(), &bgra.region(), rect(16, 16), CombineOp::Copy)
        .unwrap_err();
    assert_eq!(
        err,
        TransferError::Unsupported(UnsupportedReason::IncompatibleFormats)
    );
    assert!(stream.is_empty());
    assert_eq!(stream.pending_bytes(), 0);
}

#[test]
fn oversized_rectangles_split_into_edge_capped_chunks() {
    let config = config();
    let engine = CopyEngine::new(&config);
    let src = CopyRegion::Flat {
        base_offset: 0,
        pitch_bytes: 4096,
    };
    let dst = CopyRegion::Flat {
        base_offset: 1 << 20,
        pitch_bytes: 4096,
    };

    let ops = engine
        .schedule(&src, &dst, rect(20_000, 17_000), CombineOp::Copy)
        .unwrap();
    assert_eq!(ops.len(), 4);
    for op in &ops {
        assert!(op.width <= config.max_chunk_edge);
        assert!(op.height <= config.max_chunk_edge);
        assert_eq!(op.encoding, TransferEncoding::General);
    }
    // row-major: full corner first, then the right and bottom remainders
    assert_eq!((ops[0].width, ops[0].height), (16384, 16384));
    assert_eq!((ops[1].width, ops[1].height), (20_000 - 16384, 16384));
    assert_eq!((ops[3].width, ops[3].height), (20_000 - 16384, 17_000 - 16384));

    let covered: u64 = ops.iter().map(|op| op.width as u64 * op.height as u64).sum();
    assert_eq!(covered, 20_000 * 17_000);
}

#[test]
fn flip_folds_start_row_and_negates_source_pitch() {
    let config = config();
    let engine = CopyEngine::new(&config);
    let src = Img::plain(256, 256, PixelFormat::Rgba8, TilingMode::TiledA);
    let dst = Img::plain(256, 256, PixelFormat::Rgba8, TilingMode::TiledA);

    let ops = engine
        .schedule(
            &src.flipped(),
            &dst.region(),
            CopyRect {
                src_x: 0,
                src_y: 10,
                dst_x: 0,
                dst_y: 0,
                width: 64,
                height: 20,
            },
            CombineOp::Copy,
        )
        .unwrap();
    assert_eq!(ops.len(), 1);
    let op = ops[0];
    // folded start row 256 - 10 - 20 = 226: tile row 28, in-tile row 2
    assert_eq!(op.src.base_offset, 28 * 1024 * 8);
    assert_eq!(op.src.y, 2);
    assert_eq!(op.encoding, TransferEncoding::General);
    assert_eq!(op.src.pitch, -1024);
    assert_eq!(op.dst.pitch, 1024);

    // matching flips cancel: orientation agrees, pitch stays positive
    let ops = engine
        .schedule(&src.flipped(), &dst.flipped(), rect(64, 20), CombineOp::Copy)
        .unwrap();
    assert!(ops[0].src.pitch > 0);
}

#[test]
#[should_panic(expected = "flip rectangle")]
fn flip_rectangle_past_the_level_extent_is_a_caller_bug() {
    let config = config();
    let engine = CopyEngine::new(&config);
    let src = Img::plain(256, 256, PixelFormat::Rgba8, TilingMode::TiledA);
    let dst = Img::plain(256, 512, PixelFormat::Rgba8, TilingMode::TiledA);

    // src_y + height runs past the 256-row source level
    let _ = engine.schedule(
        &src.flipped(),
        &dst.region(),
        CopyRect {
            src_x: 0,
            src_y: 200,
            dst_x: 0,
            dst_y: 0,
            width: 64,
            height: 100,
        },
        CombineOp::Copy,
    );
}

#[test]
fn fast_encoding_requires_aligned_tiled_endpoints() {
    let config = config();
    let engine = CopyEngine::new(&config);
    let src = Img::plain(256, 256, PixelFormat::Rgba8, TilingMode::TiledA);
    let dst = Img::plain(256, 256, PixelFormat::Rgba8, TilingMode::TiledA);

    let aligned = CopyRect {
        src_x: 0,
        src_y: 0,
        dst_x: 64,
        dst_y: 0,
        width: 64,
        height: 64,
    };
    let ops = engine
        .schedule(&src.region(), &dst.region(), aligned, CombineOp::Copy)
        .unwrap();
    assert_eq!(ops[0].encoding, TransferEncoding::Fast);
    assert_eq!(ops[0].cpp, 4);
    assert_eq!(ops[0].dst.x, 64);

    // 65 * 4 bytes is not a 16-byte multiple
    let ops = engine
        .schedule(
            &src.region(),
            &dst.region(),
            CopyRect { dst_x: 65, ..aligned },
            CombineOp::Copy,
        )
        .unwrap();
    assert_eq!(ops[0].encoding, TransferEncoding::General);

    // non-copy combines always take the general encoding
    let ops = engine
        .schedule(&src.region(), &dst.region(), aligned, CombineOp::Xor)
        .unwrap();
    assert_eq!(ops[0].encoding, TransferEncoding::General);

    // older generations have no fast path at all
    let gen8 = DeviceConfig::new(GpuGeneration::Gen8);
    let engine = CopyEngine::new(&gen8);
    let ops = engine
        .schedule(&src.region(), &dst.region(), aligned, CombineOp::Copy)
        .unwrap();
    assert_eq!(ops[0].encoding, TransferEncoding::General);
}

#[test]
fn wide_texels_reinterpret_as_narrow_columns() {
    let config = config();
    let engine = CopyEngine::new(&config);

    // 16-byte texels address as four dword columns
    let src = Img::plain(64, 64, PixelFormat::Rgba32Float, TilingMode::TiledA);
    let dst = Img::plain(64, 64, PixelFormat::Rgba32Float, TilingMode::TiledA);
    let ops = engine
        .schedule(
            &src.region(),
            &dst.region(),
            CopyRect {
                src_x: 3,
                src_y: 0,
                dst_x: 0,
                dst_y: 0,
                width: 32,
                height: 8,
            },
            CombineOp::Xor,
        )
        .unwrap();
    let op = ops[0];
    assert_eq!(op.cpp, 4);
    assert_eq!(op.width, 32 * 4);
    assert_eq!(op.src.x, 3 * 4);

    // 8-byte texels scale by two
    let src = Img::plain(64, 64, PixelFormat::Rgba16Float, TilingMode::TiledA);
    let dst = Img::plain(64, 64, PixelFormat::Rgba16Float, TilingMode::TiledA);
    let ops = engine
        .schedule(&src.region(), &dst.region(), rect(32, 8), CombineOp::Xor)
        .unwrap();
    assert_eq!(ops[0].cpp, 4);
    assert_eq!(ops[0].width, 64);
}

#[test]
fn pressure_flushes_once_then_rejects() {
    let config = config();
    let engine = CopyEngine::new(&config);
    // two 256 KiB surfaces: each transfer keeps 512 KiB resident
    let src = Img::plain(256, 256, PixelFormat::Rgba8, TilingMode::TiledA);
    let dst = Img::plain(256, 256, PixelFormat::Rgba8, TilingMode::TiledA);
    assert_eq!(src.layout.total_bytes, 256 * 1024);

    let mut stream = CommandStream::new(600_000);
    engine
        .emit(&mut stream, &src.region(), &dst.region(), rect(64, 64), CombineOp::Copy)
        .unwrap();
    assert_eq!(stream.flush_count(), 0);

    // second working set no longer fits alongside the first; one flush
    // makes room and the emit succeeds
    engine
        .emit(&mut stream, &src.region(), &dst.region(), rect(64, 64), CombineOp::Copy)
        .unwrap();
    assert_eq!(stream.flush_count(), 1);
    assert_eq!(stream.len(), 2);

    // an aperture the working set can never fit rejects after the retry,
    // with nothing appended
    let mut tiny = CommandStream::new(1000);
    let err = engine
        .emit(&mut tiny, &src.region(), &dst.region(), rect(64, 64), CombineOp::Copy)
        .unwrap_err();
    assert_eq!(err, TransferError::ResourcePressure);
    assert!(tiny.is_empty());
    assert_eq!(tiny.flush_count(), 1);
}

#[test]
fn channel_fill_pair_schedules_alpha_fill() {
    let config = config();
    let engine = CopyEngine::new(&config);
    let src = Img::plain(64, 64, PixelFormat::Rgbx8, TilingMode::TiledA);
    let dst = Img::plain(64, 64, PixelFormat::Rgba8, TilingMode::TiledA);

    let mut stream = CommandStream::with_default_aperture();
    let count = engine
        .emit(&mut stream, &src.region(), &dst.region(), rect(64, 64), CombineOp::Copy)
        .unwrap();
    assert_eq!(count, 2);
    match stream.ops() {
        [CmdOp::Transfer(_), CmdOp::Fill(fill)] => {
            assert!(fill.alpha_only);
            assert_eq!(fill.value, 0xffff_ffff);
            assert_eq!(fill.cpp, 4);
            assert_eq!((fill.width, fill.height), (64, 64));
        }
        other => panic!("unexpected op sequence: {other:?}"),
    }

    // dropping alpha needs no fill
    let mut stream = CommandStream::with_default_aperture();
    let count = engine
        .emit(&mut stream, &dst.region(), &src.region(), rect(64, 64), CombineOp::Copy)
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(stream.len(), 1);
}

#[test]
fn linear_copy_rounds_offsets_down_into_x() {
    let config = config();
    let engine = CopyEngine::new(&config);
    let mut stream = CommandStream::with_default_aperture();

    engine.linear_copy(&mut stream, 68, 4, 100).unwrap();
    let ops = transfer_ops(&stream);
    assert_eq!(ops.len(), 1);
    let op = ops[0];
    assert_eq!(op.src.base_offset, 64);
    assert_eq!(op.src.x, 4);
    assert_eq!(op.dst.base_offset, 0);
    assert_eq!(op.dst.x, 4);
    assert_eq!((op.width, op.height), (100, 1));
}

#[test]
fn linear_copy_covers_large_and_ragged_sizes() {
    let config = config();
    let engine = CopyEngine::new(&config);

    // 1 MiB: one wide multi-row pass (split at the chunk edge) plus the
    // remainder row
    let mut stream = CommandStream::with_default_aperture();
    engine.linear_copy(&mut stream, 0, 1 << 24, 1 << 20).unwrap();
    let ops = transfer_ops(&stream);
    let covered: u64 = ops.iter().map(|op| op.width as u64 * op.height as u64).sum();
    assert_eq!(covered, 1 << 20);
    assert_eq!(ops.len(), 3);

    // a size with a sub-dword tail emits a final short row
    let mut stream = CommandStream::with_default_aperture();
    engine.linear_copy(&mut stream, 0, 4096, 10).unwrap();
    let ops = transfer_ops(&stream);
    assert_eq!(ops.len(), 2);
    assert_eq!((ops[0].width, ops[0].height), (8, 1));
    assert_eq!((ops[1].width, ops[1].height), (2, 1));
    assert_eq!(ops[1].src.base_offset, 0);
    assert_eq!(ops[1].src.x, 8);
}
