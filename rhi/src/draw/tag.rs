//! Draw list tags, masks and the tag registry.

use parking_lot::RwLock;

/// Maximum number of distinct draw list tags.
pub const MAX_DRAW_LIST_TAGS: usize = 64;

/// Identifies a logical bucket of draw items ("opaque", "shadow", ...).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawListTag(u8);

impl DrawListTag {
    /// The invalid tag.
    pub const NULL: Self = Self(u8::MAX);

    /// Create a tag from an index below [`MAX_DRAW_LIST_TAGS`]. Larger
    /// indices produce [`NULL`](Self::NULL).
    pub fn new(index: u8) -> Self {
        if (index as usize) < MAX_DRAW_LIST_TAGS {
            Self(index)
        } else {
            Self::NULL
        }
    }

    /// Index of the tag.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether the tag addresses a bucket.
    pub fn is_valid(self) -> bool {
        (self.0 as usize) < MAX_DRAW_LIST_TAGS
    }

    /// Whether the tag is [`NULL`](Self::NULL).
    pub fn is_null(self) -> bool {
        !self.is_valid()
    }
}

impl Default for DrawListTag {
    fn default() -> Self {
        Self::NULL
    }
}

impl std::fmt::Debug for DrawListTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "DrawListTag({})", self.0)
        } else {
            write!(f, "DrawListTag::NULL")
        }
    }
}

/// A set of draw list tags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DrawListMask(u64);

impl DrawListMask {
    /// The empty mask.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Mask with every tag set.
    pub const fn all() -> Self {
        Self(u64::MAX)
    }

    /// Mask from raw bits.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Add a tag. Invalid tags are ignored.
    pub fn set(&mut self, tag: DrawListTag) {
        if tag.is_valid() {
            self.0 |= 1 << tag.index();
        }
    }

    /// Remove a tag.
    pub fn reset(&mut self, tag: DrawListTag) {
        if tag.is_valid() {
            self.0 &= !(1 << tag.index());
        }
    }

    /// Whether the tag is in the mask.
    pub fn contains(self, tag: DrawListTag) -> bool {
        tag.is_valid() && self.0 & (1 << tag.index()) != 0
    }

    /// Whether the masks share a tag.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether no tag is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of tags set.
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Tags in ascending order.
    pub fn iter(self) -> impl Iterator<Item = DrawListTag> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let index = bits.trailing_zeros();
            bits &= bits - 1;
            Some(DrawListTag(index as u8))
        })
    }
}

impl FromIterator<DrawListTag> for DrawListMask {
    fn from_iter<I: IntoIterator<Item = DrawListTag>>(iter: I) -> Self {
        let mut mask = Self::empty();
        for tag in iter {
            mask.set(tag);
        }
        mask
    }
}

impl std::fmt::Debug for DrawListMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DrawListMask({:#b})", self.0)
    }
}

#[derive(Debug)]
struct TagEntry {
    name: String,
    ref_count: u32,
}

/// Reference-counted allocation of draw list tags by name.
///
/// Acquiring an existing name returns its tag and bumps the count; the slot is
/// freed when every acquisition has been released.
#[derive(Debug)]
pub struct DrawListTagRegistry {
    entries: RwLock<Vec<Option<TagEntry>>>,
}

impl DrawListTagRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new((0..MAX_DRAW_LIST_TAGS).map(|_| None).collect()),
        }
    }

    /// Acquire the tag for `name`, allocating one if needed.
    ///
    /// Returns [`DrawListTag::NULL`] when every tag is in use.
    pub fn acquire_tag(&self, name: &str) -> DrawListTag {
        let mut entries = self.entries.write();

        if let Some((index, entry)) = entries
            .iter_mut()
            .enumerate()
            .find_map(|(index, entry)| {
                entry
                    .as_mut()
                    .filter(|entry| entry.name == name)
                    .map(|entry| (index, entry))
            })
        {
            entry.ref_count += 1;
            return DrawListTag(index as u8);
        }

        match entries.iter().position(Option::is_none) {
            Some(index) => {
                entries[index] = Some(TagEntry {
                    name: name.to_string(),
                    ref_count: 1,
                });
                log::debug!("Allocated draw list tag {index} for {name:?}");
                DrawListTag(index as u8)
            }
            None => {
                log::warn!("Out of draw list tags, cannot allocate {name:?}");
                DrawListTag::NULL
            }
        }
    }

    /// Release one acquisition of `tag`.
    pub fn release_tag(&self, tag: DrawListTag) {
        if !tag.is_valid() {
            return;
        }
        let mut entries = self.entries.write();
        let slot = &mut entries[tag.index()];
        match slot {
            Some(entry) if entry.ref_count > 1 => entry.ref_count -= 1,
            Some(_) => *slot = None,
            None => log::warn!("Released unallocated draw list tag {tag:?}"),
        }
    }

    /// Tag registered for `name`, or [`DrawListTag::NULL`].
    pub fn find_tag(&self, name: &str) -> DrawListTag {
        self.entries
            .read()
            .iter()
            .position(|entry| entry.as_ref().is_some_and(|entry| entry.name == name))
            .map_or(DrawListTag::NULL, |index| DrawListTag(index as u8))
    }

    /// Name registered for `tag`.
    pub fn tag_name(&self, tag: DrawListTag) -> Option<String> {
        if !tag.is_valid() {
            return None;
        }
        self.entries.read()[tag.index()]
            .as_ref()
            .map(|entry| entry.name.clone())
    }

    /// Number of tags in use.
    pub fn allocated_tag_count(&self) -> usize {
        self.entries.read().iter().flatten().count()
    }
}

impl Default for DrawListTagRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_validity() {
        assert!(DrawListTag::new(0).is_valid());
        assert!(DrawListTag::new(63).is_valid());
        assert!(DrawListTag::new(64).is_null());
        assert!(DrawListTag::default().is_null());
    }

    #[test]
    fn test_mask_operations() {
        let mut mask = DrawListMask::empty();
        assert!(mask.is_empty());
        mask.set(DrawListTag::new(3));
        mask.set(DrawListTag::new(40));
        mask.set(DrawListTag::NULL);
        assert_eq!(mask.count(), 2);
        assert!(mask.contains(DrawListTag::new(40)));
        assert!(!mask.contains(DrawListTag::NULL));

        let tags: Vec<_> = mask.iter().map(DrawListTag::index).collect();
        assert_eq!(tags, vec![3, 40]);

        mask.reset(DrawListTag::new(3));
        assert_eq!(mask.count(), 1);
        assert_eq!(
            [DrawListTag::new(40)].into_iter().collect::<DrawListMask>(),
            mask
        );
    }

    #[test]
    fn test_registry_ref_counting() {
        let registry = DrawListTagRegistry::new();
        let opaque = registry.acquire_tag("opaque");
        let shadow = registry.acquire_tag("shadow");
        assert_ne!(opaque, shadow);
        assert_eq!(registry.acquire_tag("opaque"), opaque);
        assert_eq!(registry.allocated_tag_count(), 2);

        registry.release_tag(opaque);
        assert_eq!(registry.find_tag("opaque"), opaque);
        registry.release_tag(opaque);
        assert!(registry.find_tag("opaque").is_null());
        assert_eq!(registry.tag_name(shadow).as_deref(), Some("shadow"));
    }

    #[test]
    fn test_registry_exhaustion() {
        let registry = DrawListTagRegistry::new();
        for i in 0..MAX_DRAW_LIST_TAGS {
            assert!(registry.acquire_tag(&format!("tag{i}")).is_valid());
        }
        assert!(registry.acquire_tag("one too many").is_null());

        registry.release_tag(DrawListTag::new(10));
        assert_eq!(registry.acquire_tag("reused").index(), 10);
    }
}
