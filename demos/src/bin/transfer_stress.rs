//! # Transfer Stress
//!
//! Streams a handful of `u32` values per frame through a deliberately tiny
//! transfer pool and copies each batch into a result buffer. After the GPU
//! goes idle every element is read back and checked, so any allocation that
//! reused memory the GPU had not copied yet shows up as a mismatch.
//!
//! ```bash
//! cargo run -p tempo-demos --bin transfer_stress -- --backend dummy --iterations 5000
//! ```

use clap::Parser;

use tempo_demos::CommonArgs;
use tempo_graphics::{Access, AllocationError, BufferDescriptor, Renderer, RendererConfig};

#[derive(Debug, Parser)]
#[command(version, about = "Stream uploads through a small transfer pool and verify them")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Number of frames to run.
    #[arg(long, default_value_t = 1000)]
    iterations: u32,

    /// Number of `u32` values uploaded per frame.
    #[arg(long, default_value_t = 17)]
    elements: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tempo_demos::init_logging();
    tempo_graphics::init();

    let args = Args::parse();
    let config = args.common.renderer_config(
        RendererConfig::new()
            .with_frames_in_flight(2)
            .with_transfer_pool_capacity(256)
            .with_transfer_pool_label("stress_pool"),
    )?;

    let frame_bytes = u64::from(args.elements) * 4;
    let mut renderer = Renderer::new(config)?;
    let results = renderer.device().create_buffer(
        &BufferDescriptor::readback(u64::from(args.iterations) * frame_bytes).with_label("results"),
    )?;

    let mut stalls = 0u32;
    for frame in 0..args.iterations {
        let slot = renderer.acquire_next_slot().index();
        renderer.collect_garbage();

        let values: Vec<u32> = (0..args.elements)
            .map(|k| frame * args.elements + k)
            .collect();

        let mut encoder = renderer.record().with_label(format!("stress_{frame}"));
        {
            let mut staging = match renderer.allocate_transfer(frame_bytes, 4) {
                Ok(staging) => staging,
                Err(e @ AllocationError::Exhausted { .. }) => {
                    log::warn!("Frame {}: {}, waiting for the GPU", frame, e);
                    stalls += 1;
                    renderer.wait_idle()?;
                    renderer.allocate_transfer(frame_bytes, 4)?
                }
                Err(e) => return Err(e.into()),
            };
            staging.write_pod(&values);
            encoder.copy_from_transfer(&staging, results, u64::from(frame) * frame_bytes);
        }
        renderer.submit(slot, encoder.complete())?;
    }

    let mut encoder = renderer.record().with_label("flush_results");
    encoder.pipeline_barrier(Access::TRANSFER_WRITE, Access::HOST_READ);
    let slot = renderer.acquire_next_slot().index();
    renderer.submit(slot, encoder.complete())?;
    renderer.wait_idle()?;

    let mut readback = vec![0u32; (args.iterations * args.elements) as usize];
    renderer
        .device()
        .read_buffer(results, 0, bytemuck::cast_slice_mut(&mut readback))?;

    let mismatches = readback
        .iter()
        .enumerate()
        .filter(|&(i, &value)| value != i as u32)
        .count();

    log::info!(
        "{} frames on {}: {} stalls, {} failed allocations, {} mismatched elements",
        args.iterations,
        renderer.device().name(),
        stalls,
        renderer.transfer_pool().failed_allocations(),
        mismatches
    );

    if mismatches > 0 {
        return Err(format!("{mismatches} elements were overwritten before the GPU copied them").into());
    }
    Ok(())
}
