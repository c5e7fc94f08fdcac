use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redlilium_rhi::{
    BackendType, Device, DeviceParameters, DrawArguments, DrawItem, DrawListContext,
    DrawListSortType, DrawPacketBuilder, DrawRequest, Fence, PipelineStateHandle, sort_draw_list,
};

fn dummy_device() -> Arc<Device> {
    Device::new(DeviceParameters::new().with_backend(BackendType::Dummy)).unwrap()
}

// ---------------------------------------------------------------------------
// Draw lists
// ---------------------------------------------------------------------------

fn bench_draw_list_finalize(c: &mut Criterion) {
    let device = dummy_device();
    let registry = device.draw_list_tag_registry();
    let opaque = registry.acquire_tag("bench_opaque");
    let shadow = registry.acquire_tag("bench_shadow");

    let packets: Vec<_> = (0..1024u64)
        .map(|i| {
            let item = || {
                DrawItem::new(
                    PipelineStateHandle(i % 16),
                    DrawArguments::Linear {
                        vertex_count: 36,
                        first_vertex: 0,
                    },
                )
            };
            DrawPacketBuilder::new()
                .add_draw_item(DrawRequest::new(opaque, item()).with_sort_key(i % 16))
                .add_draw_item(DrawRequest::new(shadow, item()))
                .build()
        })
        .collect();

    c.bench_function("draw_list_finalize_1024_packets_4_threads", |b| {
        let mut context = DrawListContext::new(device.validation());
        context.init([opaque, shadow].into_iter().collect());
        b.iter(|| {
            std::thread::scope(|scope| {
                for chunk in packets.chunks(256) {
                    let context = &context;
                    scope.spawn(move || {
                        for (depth, packet) in chunk.iter().enumerate() {
                            context.add_draw_packet(packet, depth as f32);
                        }
                    });
                }
            });
            context.finalize_lists();
            black_box(context.get_list(opaque).len());
        });
    });

    c.bench_function("draw_list_sort_2048_items", |b| {
        let mut context = DrawListContext::new(device.validation());
        context.init([opaque].into_iter().collect());
        for (depth, packet) in packets.iter().chain(&packets).enumerate() {
            context.add_draw_packet(packet, (depth % 97) as f32);
        }
        context.finalize_lists();
        let list = context.get_list(opaque).to_vec();
        b.iter(|| {
            let mut list = list.clone();
            sort_draw_list(&mut list, DrawListSortType::KeyThenDepth);
            black_box(list);
        });
    });
}

// ---------------------------------------------------------------------------
// Fences
// ---------------------------------------------------------------------------

fn bench_fence_increment(c: &mut Criterion) {
    let device = dummy_device();
    let fence = Fence::new(&device).unwrap();

    c.bench_function("fence_increment", |b| {
        b.iter(|| black_box(fence.increment()));
    });

    c.bench_function("fence_signal_and_wait_cpu", |b| {
        b.iter(|| {
            let value = fence.increment();
            fence.signal_from_cpu_value(value).unwrap();
            fence.wait_on_cpu_value(value).unwrap();
        });
    });
}

criterion_group!(benches, bench_draw_list_finalize, bench_fence_increment);
criterion_main!(benches);
