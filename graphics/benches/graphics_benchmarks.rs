use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use tempo_graphics::{
    Access, BackendType, BufferDescriptor, BufferUsage, DeviceDescriptor, GraphicsDevice,
    Renderer, RendererConfig, Submission, TransferMemoryPool,
};

fn dummy_device() -> Arc<GraphicsDevice> {
    GraphicsDevice::new(&DeviceDescriptor::new().with_backend(BackendType::Dummy))
        .expect("dummy device")
}

// ---------------------------------------------------------------------------
// Transfer pool
// ---------------------------------------------------------------------------

fn bench_transfer_allocate(c: &mut Criterion) {
    let device = dummy_device();
    let pool = TransferMemoryPool::new(&device, 1 << 20, "bench").unwrap();
    let timeline = device.create_timeline_semaphore(Some("bench")).unwrap();
    let mut value = 0;

    c.bench_function("transfer_pool_allocate_64_per_batch", |b| {
        b.iter(|| {
            for _ in 0..64 {
                black_box(pool.allocate(256, 16).unwrap());
            }
            value += 1;
            let list = device.create_command_encoder().complete();
            let index = device
                .submit(Submission::new(list).signal_timeline(&timeline, value))
                .unwrap();
            pool.record_usage(&timeline, value);
            device.wait_for_submission(index);
            pool.collect();
        });
    });
}

fn bench_transfer_write_pod(c: &mut Criterion) {
    let device = dummy_device();
    let pool = TransferMemoryPool::new(&device, 1 << 20, "bench").unwrap();
    let data = vec![0x5A5A_5A5Au32; 1024];

    c.bench_function("transfer_pool_write_4k", |b| {
        b.iter(|| {
            let mut allocation = pool.allocate_slice::<u32>(data.len()).unwrap();
            allocation.write_pod(black_box(&data));
            drop(allocation);
            let (timeline, value) = pool.submission_signal();
            let list = device.create_command_encoder().complete();
            device
                .submit(Submission::new(list).signal_timeline(&timeline, value))
                .unwrap();
            timeline.wait_for_value(value);
            pool.collect();
        });
    });
}

// ---------------------------------------------------------------------------
// Recording and submission
// ---------------------------------------------------------------------------

fn bench_record_commands(c: &mut Criterion) {
    let device = dummy_device();
    let src = device
        .create_buffer(&BufferDescriptor::new(
            4096,
            BufferUsage::STORAGE | BufferUsage::COPY_SRC,
        ))
        .unwrap();
    let dst = device
        .create_buffer(&BufferDescriptor::new(
            4096,
            BufferUsage::STORAGE | BufferUsage::COPY_DST,
        ))
        .unwrap();

    c.bench_function("record_256_copies", |b| {
        b.iter(|| {
            let mut encoder = device.create_command_encoder();
            for i in 0..256u64 {
                encoder.copy_buffer_to_buffer(src, i * 16, dst, i * 16, 16);
            }
            encoder.pipeline_barrier(Access::TRANSFER_WRITE, Access::ALL);
            black_box(encoder.complete());
        });
    });
}

fn bench_submit_empty(c: &mut Criterion) {
    let device = dummy_device();

    c.bench_function("dummy_submit_empty_and_wait", |b| {
        b.iter(|| {
            let list = device.create_command_encoder().complete();
            let index = device.submit(Submission::new(list)).unwrap();
            device.wait_for_submission(black_box(index));
        });
    });
}

// ---------------------------------------------------------------------------
// Frame loop
// ---------------------------------------------------------------------------

fn bench_frame_loop(c: &mut Criterion) {
    let mut renderer = Renderer::new(
        RendererConfig::new()
            .with_frames_in_flight(3)
            .with_transfer_pool_capacity(64 * 1024)
            .with_device(DeviceDescriptor::new().with_backend(BackendType::Dummy)),
    )
    .unwrap();
    let uniforms = renderer
        .device()
        .create_buffer(&BufferDescriptor::new(
            256,
            BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        ))
        .unwrap();
    let data = [1.0f32; 64];

    c.bench_function("frame_loop_upload_256_bytes", |b| {
        b.iter(|| {
            let slot = renderer.acquire_next_slot().index();
            let mut encoder = renderer.record();
            {
                let mut staging = renderer.allocate_transfer(256, 16).unwrap();
                staging.write_pod(&data);
                encoder.copy_from_transfer(&staging, uniforms, 0);
            }
            renderer.submit(slot, encoder.complete()).unwrap();
            black_box(renderer.collect_garbage());
        });
    });
}

fn bench_garbage_collect(c: &mut Criterion) {
    let device = dummy_device();

    c.bench_function("destroy_and_collect_64_buffers", |b| {
        b.iter(|| {
            for _ in 0..64 {
                let buffer = device
                    .create_buffer(&BufferDescriptor::new(256, BufferUsage::STORAGE))
                    .unwrap();
                device.destroy_buffer(buffer);
            }
            black_box(device.collect_garbage());
        });
    });
}

criterion_group!(
    benches,
    bench_transfer_allocate,
    bench_transfer_write_pod,
    bench_record_commands,
    bench_submit_empty,
    bench_frame_loop,
    bench_garbage_collect,
);
criterion_main!(benches);
