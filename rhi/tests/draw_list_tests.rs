//! Draw list integration tests.
//!
//! Producer threads add draw packets to a shared [`DrawListContext`] while
//! the main thread finalizes and reads the merged lists.

mod common;

use std::sync::Arc;

use rstest::rstest;

use common::{Backend, TestContext, triangle};
use redlilium_rhi::{
    DrawArguments, DrawItem, DrawItemProperties, DrawListContext, DrawListMask, DrawListSortType,
    DrawListTag, DrawPacketBuilder, DrawRequest, PipelineStateHandle, sort_draw_list,
};

fn packet_item(pipeline: u64) -> DrawItem {
    DrawItem::new(
        PipelineStateHandle(pipeline),
        DrawArguments::Linear {
            vertex_count: 3,
            first_vertex: 0,
        },
    )
}

/// Two producer threads each add three packets; all six land in the list.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_draw_lists_from_multiple_threads(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let registry = ctx.device.draw_list_tag_registry();
    let opaque = registry.acquire_tag("integration_opaque");
    let shadow = registry.acquire_tag("integration_shadow");
    assert!(opaque.is_valid() && shadow.is_valid());

    let mut context = DrawListContext::new(ctx.device.validation());
    context.init([opaque, shadow].into_iter().collect());

    std::thread::scope(|scope| {
        for thread in 0..2u64 {
            let context = &context;
            scope.spawn(move || {
                for i in 0..3u64 {
                    let packet = DrawPacketBuilder::new()
                        .add_draw_item(
                            DrawRequest::new(opaque, packet_item(thread)).with_sort_key(i),
                        )
                        .build();
                    context.add_draw_packet(&packet, (thread * 3 + i) as f32);
                }
            });
        }
    });

    context.finalize_lists();
    let mut list = context.get_list(opaque).to_vec();
    assert_eq!(list.len(), 6);
    sort_draw_list(&mut list, DrawListSortType::KeyThenDepth);
    let keys: Vec<u64> = list.iter().map(|p| p.sort_key).collect();
    assert_eq!(keys, vec![0, 0, 1, 1, 2, 2]);
    assert!(context.get_list(shadow).is_empty());

    context.shutdown();
    registry.release_tag(opaque);
    registry.release_tag(shadow);
}

/// Items for tags outside the context mask are skipped.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_packet_items_outside_mask_ignored(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let registry = ctx.device.draw_list_tag_registry();
    let forward = registry.acquire_tag("integration_forward");
    let depth = registry.acquire_tag("integration_depth");

    let mut context = DrawListContext::new(ctx.device.validation());
    let mut mask = DrawListMask::empty();
    mask.set(forward);
    context.init(mask);

    let packet = DrawPacketBuilder::new()
        .add_draw_item(DrawRequest::new(forward, packet_item(1)))
        .add_draw_item(DrawRequest::new(depth, packet_item(2)))
        .build();
    assert_eq!(packet.draw_item_count(), 2);
    context.add_draw_packet(&packet, 1.0);
    context.finalize_lists();

    assert_eq!(context.get_list(forward).len(), 1);
    assert!(context.get_list(depth).is_empty());
    assert!(context.get_list(DrawListTag::NULL).is_empty());

    registry.release_tag(forward);
    registry.release_tag(depth);
}

/// A released tag name resolves to the same tag while still referenced.
#[test]
fn test_tag_registry_shared_between_producers() {
    let Some(ctx) = TestContext::new(Backend::Dummy) else {
        return;
    };
    let registry = ctx.device.draw_list_tag_registry();

    let first = registry.acquire_tag("integration_shared");
    let second = registry.acquire_tag("integration_shared");
    assert_eq!(first, second);

    registry.release_tag(first);
    assert_eq!(registry.find_tag("integration_shared"), first);
    registry.release_tag(second);
    assert!(registry.find_tag("integration_shared").is_null());
}

#[test]
fn test_sort_types_over_merged_list() {
    let item = triangle(1);
    let mut list: Vec<DrawItemProperties> = [(2, 0.5), (1, 2.0), (1, 1.0)]
        .into_iter()
        .map(|(key, depth)| {
            DrawItemProperties::new(Arc::clone(&item))
                .with_sort_key(key)
                .with_depth(depth)
        })
        .collect();

    sort_draw_list(&mut list, DrawListSortType::KeyThenDepth);
    let order: Vec<(u64, f32)> = list.iter().map(|p| (p.sort_key, p.depth)).collect();
    assert_eq!(order, vec![(1, 1.0), (1, 2.0), (2, 0.5)]);

    sort_draw_list(&mut list, DrawListSortType::ReverseDepthThenKey);
    let depths: Vec<f32> = list.iter().map(|p| p.depth).collect();
    assert_eq!(depths, vec![2.0, 1.0, 0.5]);
}
