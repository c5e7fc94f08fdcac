//! Fence and memory integration tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use common::{Backend, TestContext, generate_test_pattern};
use redlilium_rhi::memory::HostHeap;
use redlilium_rhi::{
    BufferDescriptor, BufferUsage, Fence, FenceSet, HardwareQueueClass, HostMemoryAccess,
    QueueSubmission,
};

// ============================================================================
// Fences
// ============================================================================

/// Every queue signals its fence from an empty submission.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_fence_set_signaled_by_every_queue(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut fences = FenceSet::new(Arc::clone(&ctx.device)).unwrap();
    for frame in 1..=3u64 {
        for queue in HardwareQueueClass::ALL {
            let fence = fences.fence(queue);
            assert_eq!(fence.increment(), frame);
            let mut submission = QueueSubmission::new();
            fence.signal_from_gpu(&mut submission);
            ctx.device.submit(queue, submission).unwrap();
        }
        fences.wait().unwrap();
    }
    assert!(fences.fences().iter().all(|fence| fence.completed_value() == 3));

    ctx.device.wait_idle().unwrap();
    fences.reset().unwrap();
    assert!(fences.fences().iter().all(|fence| fence.pending_value() == 0));
}

/// A host signal releases a thread blocked on the fence.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_cpu_signal_releases_waiter(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let fence = Arc::new(Fence::new(&ctx.device).unwrap());
    let value = fence.increment();

    let waiter = {
        let fence = Arc::clone(&fence);
        std::thread::spawn(move || fence.wait_on_cpu_value(value))
    };
    std::thread::sleep(Duration::from_millis(10));
    assert!(!fence.is_signaled(value));

    fence.signal_from_cpu().unwrap();
    waiter.join().unwrap().unwrap();
    assert!(fence.is_signaled(value));
}

/// A queue waiting on a fence does not signal until the fence is reached.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_gpu_wait_on_host_signal(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let gate = Fence::new(&ctx.device).unwrap();
    let done = Fence::new(&ctx.device).unwrap();
    let gate_value = gate.increment();
    let done_value = done.increment();

    let mut submission = QueueSubmission::new();
    gate.wait_on_gpu(&mut submission, gate_value);
    done.signal_from_gpu(&mut submission);
    ctx.device
        .submit(HardwareQueueClass::Compute, submission)
        .unwrap();

    std::thread::sleep(Duration::from_millis(20));
    assert!(!done.is_signaled(done_value));

    gate.signal_from_cpu().unwrap();
    done.wait_on_cpu_value(done_value).unwrap();
}

/// Values handed out concurrently are unique.
#[test]
fn test_concurrent_increments_unique() {
    let Some(ctx) = TestContext::new(Backend::Dummy) else {
        return;
    };
    let fence = Fence::new(&ctx.device).unwrap();

    let mut values: Vec<u64> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| (0..100).map(|_| fence.increment()).collect::<Vec<_>>()))
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect()
    });
    values.sort_unstable();
    assert_eq!(values, (1..=400).collect::<Vec<u64>>());
}

// ============================================================================
// Memory
// ============================================================================

/// Host-visible buffer memory survives a write map and a read map.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_buffer_map_roundtrip(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let buffer = ctx
        .device
        .create_buffer(&BufferDescriptor::new(
            4096,
            BufferUsage::MAP_WRITE | BufferUsage::MAP_READ,
        ))
        .unwrap();
    let data = generate_test_pattern(1000);
    buffer.write(48, &data).unwrap();
    assert_eq!(buffer.read(48, data.len()).unwrap(), data);

    let memory = buffer.memory();
    assert!(memory.size() >= 4096);
    // The block is looked up from the allocator and holds the allocation
    assert!(memory.offset() + memory.size() <= memory.block_size());
    assert!(memory.map(HostMemoryAccess::Read).is_some());
    memory.unmap(HostMemoryAccess::Read);
}

/// Compaction repacks live allocations and keeps their contents.
#[test]
fn test_host_heap_compaction_keeps_data() {
    let heap = HostHeap::new(1024);
    let keep: Vec<_> = (0..4)
        .map(|i| {
            let allocation = heap.allocate(400);
            let ptr = allocation.map(HostMemoryAccess::Write).unwrap();
            // SAFETY: the mapping covers the whole allocation.
            unsafe { std::ptr::write_bytes(ptr.as_ptr(), i as u8 + 1, 400) };
            allocation.unmap(HostMemoryAccess::Write);
            allocation
        })
        .collect();
    let freed: Vec<_> = (0..4).map(|_| heap.allocate(400)).collect();
    drop(freed);

    let before = heap.stats();
    assert_eq!(before.allocation_count, 4);
    heap.compact();
    let after = heap.stats();
    assert!(after.block_count <= before.block_count);
    assert_eq!(after.allocated_bytes, 1600);

    for (i, allocation) in keep.iter().enumerate() {
        let ptr = allocation.map(HostMemoryAccess::Read).unwrap();
        // SAFETY: the mapping covers the whole allocation.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 400) };
        assert!(bytes.iter().all(|byte| *byte == i as u8 + 1));
        allocation.unmap(HostMemoryAccess::Read);
    }
}
