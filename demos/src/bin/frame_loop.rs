//! # Frame Loop
//!
//! Runs the renderer against a headless surface. Each frame uploads a block
//! of per-frame constants through the transfer pool, fills a scratch buffer
//! that is destroyed right after submission, and presents. Ring, pool and
//! garbage statistics are logged periodically.
//!
//! ```bash
//! cargo run -p tempo-demos --bin frame_loop -- --frames 1000 --frames-in-flight 3
//! ```

use bytemuck::{Pod, Zeroable};
use clap::Parser;

use tempo_demos::CommonArgs;
use tempo_graphics::{
    Access, BufferDescriptor, BufferUsage, HeadlessSurface, PresentationSurface, Renderer,
    RendererConfig, Resource,
};

#[derive(Debug, Parser)]
#[command(version, about = "Run the frame loop on a headless surface")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Number of frames to render before exiting.
    #[arg(long, default_value_t = 600)]
    frames: u64,

    /// Number of images in the headless swap chain.
    #[arg(long, default_value_t = 3)]
    images: u32,

    /// Log statistics every N frames.
    #[arg(long, default_value_t = 100)]
    report_interval: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FrameConstants {
    frame: u32,
    slot: u32,
    time: f32,
    _padding: u32,
    tint: [f32; 4],
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tempo_demos::init_logging();
    tempo_graphics::init();

    let args = Args::parse();
    let config = args.common.renderer_config(
        RendererConfig::new()
            .with_frames_in_flight(2)
            .with_transfer_pool_capacity(64 * 1024),
    )?;

    let mut renderer = Renderer::new(config)?;
    let mut surface = HeadlessSurface::new(renderer.device(), args.images);
    let constants = renderer.device().create_buffer(
        &BufferDescriptor::new(
            std::mem::size_of::<FrameConstants>() as u64,
            BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        )
        .with_label("frame_constants"),
    )?;

    let start = std::time::Instant::now();
    let mut skipped_uploads = 0u64;
    let mut released = 0usize;

    for frame in 0..args.frames {
        let slot = renderer.acquire_next_slot().index();
        released += renderer.collect_garbage();

        let image = surface.acquire_next_image()?;
        let mut encoder = renderer.record().with_label(format!("frame_{frame}"));

        let upload = FrameConstants {
            frame: frame as u32,
            slot: slot as u32,
            time: start.elapsed().as_secs_f32(),
            _padding: 0,
            tint: [1.0, 0.5, 0.25, 1.0],
        };
        match renderer.allocate_transfer(std::mem::size_of::<FrameConstants>() as u64, 16) {
            Ok(mut staging) => {
                staging.write_pod(&[upload]);
                encoder
                    .copy_from_transfer(&staging, constants, 0)
                    .pipeline_barrier(Access::TRANSFER_WRITE, Access::ALL);
            }
            Err(e) => {
                log::warn!("Frame {}: skipping constants upload: {}", frame, e);
                skipped_uploads += 1;
            }
        }

        let scratch = renderer.device().create_buffer(
            &BufferDescriptor::new(4096, BufferUsage::STORAGE).with_label("scratch"),
        )?;
        encoder.fill_buffer(scratch, 0, 4096, frame as u32);

        renderer.submit(slot, encoder.complete())?;
        renderer.destroy(Resource::Buffer(scratch));
        renderer.present(&mut surface, image)?;

        if args.report_interval > 0 && (frame + 1) % args.report_interval == 0 {
            let pool = renderer.transfer_pool();
            log::info!(
                "Frame {}: slot {}, {} submissions completed, pool {}/{} bytes claimed, {} garbage pending, {} released",
                frame + 1,
                slot,
                renderer.device().completed_submission().value(),
                pool.claimed(),
                pool.capacity(),
                renderer.device().pending_destructions(),
                released
            );
        }
    }

    renderer.wait_idle()?;
    released += renderer.collect_garbage();

    let elapsed = start.elapsed();
    log::info!(
        "{} frames in {:.2?} ({:.1} fps) on {}: {} presented, {} uploads skipped, {} buffers released",
        args.frames,
        elapsed,
        args.frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        renderer.device().name(),
        surface.presented_count(),
        skipped_uploads,
        released
    );
    Ok(())
}
