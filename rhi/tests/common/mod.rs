//! Common utilities for RHI integration tests.
//!
//! This module provides shared test infrastructure that can be reused
//! across different backend implementations.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use redlilium_rhi::{
    BackendType, Buffer, BufferDescriptor, BufferUsage, Device, DeviceParameters, DrawArguments,
    DrawItem, DrawItemProperties, FrameGraphExecuteContext, PipelineStateHandle, Scope,
    ScopeDescriptor,
};

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Dummy backend (host memory, software queues).
    Dummy,
    /// Vulkan backend (native via ash).
    Vulkan,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Dummy => true,
            #[cfg(feature = "vulkan-backend")]
            Backend::Vulkan => true,
            #[cfg(not(feature = "vulkan-backend"))]
            Backend::Vulkan => false,
        }
    }

    /// Convert to DeviceParameters for creating a Device.
    pub fn to_device_parameters(self) -> DeviceParameters {
        match self {
            Backend::Dummy => DeviceParameters::new().with_backend(BackendType::Dummy),
            Backend::Vulkan => DeviceParameters::new().with_backend(BackendType::Vulkan),
        }
    }

    /// Whether resources of this backend can be read back through a mapping.
    #[allow(dead_code)]
    pub fn has_host_visible_images(&self) -> bool {
        matches!(self, Backend::Dummy)
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// Initialize logging for test output.
pub fn init_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

/// Test context providing access to a device.
pub struct TestContext {
    #[allow(dead_code)]
    pub backend: Backend,
    pub device: Arc<Device>,
}

impl TestContext {
    /// Create a new test context for the given backend.
    ///
    /// Returns `None` if the backend is not available or has no device
    /// on this machine.
    pub fn new(backend: Backend) -> Option<Self> {
        init_logging();
        if !backend.is_available() {
            return None;
        }

        let device = match Device::new(backend.to_device_parameters()) {
            Ok(device) => device,
            Err(e) => {
                log::info!("Device creation for {backend:?} failed: {e}");
                return None;
            }
        };
        Some(Self { backend, device })
    }

    /// Create a buffer that uploads can target and tests can read back.
    #[allow(dead_code)]
    pub fn create_readback_buffer(&self, size: u64) -> Arc<Buffer> {
        self.device
            .create_buffer(
                &BufferDescriptor::new(size, BufferUsage::COPY_DST | BufferUsage::MAP_READ)
                    .with_label("readback"),
            )
            .expect("Failed to create buffer")
    }
}

// ============================================================================
// Data Helpers
// ============================================================================

/// Generate a test pattern of bytes.
#[allow(dead_code)]
pub fn generate_test_pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// A draw item drawing one triangle with `pipeline`.
#[allow(dead_code)]
pub fn triangle(pipeline: u64) -> Arc<DrawItem> {
    Arc::new(DrawItem::new(
        PipelineStateHandle(pipeline),
        DrawArguments::Linear {
            vertex_count: 3,
            first_vertex: 0,
        },
    ))
}

// ============================================================================
// Scopes
// ============================================================================

/// Scope submitting the slice of its draw list given by each context's
/// submit range.
#[allow(dead_code)]
pub struct DrawListScope {
    pub descriptor: ScopeDescriptor,
    pub items: Vec<DrawItemProperties>,
    pub executed: AtomicU32,
}

#[allow(dead_code)]
impl DrawListScope {
    pub fn new(descriptor: ScopeDescriptor, items: Vec<DrawItemProperties>) -> Arc<Self> {
        let descriptor = descriptor.with_estimated_item_count(items.len() as u32);
        Arc::new(Self {
            descriptor,
            items,
            executed: AtomicU32::new(0),
        })
    }

    pub fn executed_count(&self) -> u32 {
        self.executed.load(Ordering::Acquire)
    }
}

impl Scope for DrawListScope {
    fn descriptor(&self) -> &ScopeDescriptor {
        &self.descriptor
    }

    fn execute(&self, context: &mut FrameGraphExecuteContext<'_>) {
        self.executed.fetch_add(1, Ordering::AcqRel);
        context.submit_draw_list(&self.items);
    }
}
