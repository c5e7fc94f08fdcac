//! Per-thread draw item collection merged per draw list tag.

use std::collections::HashMap;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};

use crate::profiling::profile_scope;
use crate::validation::ValidationMode;

use super::item::{DrawItemProperties, DrawPacket};
use super::tag::{DrawListMask, DrawListTag, MAX_DRAW_LIST_TAGS};

type DrawListsByTag = Vec<Vec<DrawItemProperties>>;

fn empty_lists() -> DrawListsByTag {
    (0..MAX_DRAW_LIST_TAGS).map(|_| Vec::new()).collect()
}

/// Collects draw items from many producer threads and merges them per tag.
///
/// Producers call [`add_draw_packet`](Self::add_draw_packet) and
/// [`add_draw_item`](Self::add_draw_item) through a shared reference; each
/// thread appends to its own buckets. [`finalize_lists`](Self::finalize_lists)
/// takes `&mut self`, so it cannot overlap with producers.
///
/// Within a tag, each thread's insertion order is preserved. The order
/// between threads is unspecified; sort in the consuming pass with
/// [`sort_draw_list`](super::sort_draw_list).
#[derive(Debug)]
pub struct DrawListContext {
    mask: DrawListMask,
    validation: ValidationMode,
    thread_lists: RwLock<HashMap<ThreadId, Mutex<DrawListsByTag>>>,
    merged_lists: DrawListsByTag,
}

impl DrawListContext {
    /// Create an uninitialized context.
    pub fn new(validation: ValidationMode) -> Self {
        Self {
            mask: DrawListMask::empty(),
            validation,
            thread_lists: RwLock::new(HashMap::new()),
            merged_lists: empty_lists(),
        }
    }

    /// Set the tags this context accepts.
    ///
    /// Initializing twice without [`shutdown`](Self::shutdown) is a
    /// programming error.
    pub fn init(&mut self, mask: DrawListMask) {
        if !self.mask.is_empty() {
            log::error!("DrawListContext::init called twice without shutdown");
            debug_assert!(false, "DrawListContext is already initialized");
            return;
        }
        self.mask = mask;
    }

    /// Tags this context accepts.
    pub fn draw_list_mask(&self) -> DrawListMask {
        self.mask
    }

    fn with_thread_lists(&self, f: impl FnOnce(&mut DrawListsByTag)) {
        let id = thread::current().id();
        {
            let lists = self.thread_lists.read();
            if let Some(thread_lists) = lists.get(&id) {
                f(&mut thread_lists.lock());
                return;
            }
        }
        let mut lists = self.thread_lists.write();
        let thread_lists = lists
            .entry(id)
            .or_insert_with(|| Mutex::new(empty_lists()));
        f(thread_lists.get_mut());
    }

    /// Add every item of `packet` whose tag is in the mask, at view `depth`.
    pub fn add_draw_packet(&self, packet: &DrawPacket, depth: f32) {
        if !self.mask.intersects(packet.draw_list_mask()) {
            return;
        }
        let mask = self.mask;
        self.with_thread_lists(|lists| {
            for (tag, properties) in packet.draw_items() {
                if mask.contains(tag) {
                    lists[tag.index()].push(DrawItemProperties {
                        depth,
                        ..properties.clone()
                    });
                }
            }
        });
    }

    /// Add one item to the list for `tag`.
    ///
    /// An invalid tag is reported and ignored under validation.
    pub fn add_draw_item(&self, tag: DrawListTag, properties: DrawItemProperties) {
        if self.validation.is_enabled() && !tag.is_valid() {
            log::error!("DrawListContext::add_draw_item with an invalid draw list tag");
            return;
        }
        if !self.mask.contains(tag) {
            return;
        }
        self.with_thread_lists(|lists| lists[tag.index()].push(properties));
    }

    /// Rebuild the merged list of every tag in the mask from the thread
    /// buckets and drop the buckets. Threads that produce again next frame
    /// get fresh ones.
    pub fn finalize_lists(&mut self) {
        profile_scope!("finalize_lists");

        for tag in self.mask.iter() {
            self.merged_lists[tag.index()].clear();
        }
        let thread_lists = self.thread_lists.get_mut();
        let thread_count = thread_lists.len();
        for (_, lists) in thread_lists.drain() {
            let mut lists = lists.into_inner();
            for tag in self.mask.iter() {
                self.merged_lists[tag.index()].append(&mut lists[tag.index()]);
            }
        }
        log::trace!(
            "DrawListContext: finalized {} tags from {thread_count} threads",
            self.mask.count()
        );
    }

    /// Merged list for `tag`. Invalid tags give an empty list.
    pub fn get_list(&self, tag: DrawListTag) -> &[DrawItemProperties] {
        if !tag.is_valid() {
            return &[];
        }
        &self.merged_lists[tag.index()]
    }

    /// Drop every list and clear the mask so the context can be initialized
    /// again.
    pub fn shutdown(&mut self) {
        self.thread_lists.get_mut().clear();
        for list in &mut self.merged_lists {
            list.clear();
        }
        self.mask = DrawListMask::empty();
    }
}

impl Default for DrawListContext {
    fn default() -> Self {
        Self::new(ValidationMode::default())
    }
}

static_assertions::assert_impl_all!(DrawListContext: Send, Sync);
