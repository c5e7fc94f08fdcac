//! Consumer-side ordering of merged draw lists.

use std::cmp::Ordering;

use super::item::DrawItemProperties;

/// Ordering applied to a draw list before recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrawListSortType {
    /// Sort key, then front-to-back depth.
    #[default]
    KeyThenDepth,
    /// Sort key, then back-to-front depth.
    KeyThenReverseDepth,
    /// Front-to-back depth, then sort key.
    DepthThenKey,
    /// Back-to-front depth, then sort key.
    ReverseDepthThenKey,
}

/// Stable sort of `list` by `sort_type`.
pub fn sort_draw_list(list: &mut [DrawItemProperties], sort_type: DrawListSortType) {
    let by_key = |a: &DrawItemProperties, b: &DrawItemProperties| a.sort_key.cmp(&b.sort_key);
    let by_depth = |a: &DrawItemProperties, b: &DrawItemProperties| a.depth.total_cmp(&b.depth);

    list.sort_by(|a, b| -> Ordering {
        match sort_type {
            DrawListSortType::KeyThenDepth => by_key(a, b).then_with(|| by_depth(a, b)),
            DrawListSortType::KeyThenReverseDepth => {
                by_key(a, b).then_with(|| by_depth(b, a))
            }
            DrawListSortType::DepthThenKey => by_depth(a, b).then_with(|| by_key(a, b)),
            DrawListSortType::ReverseDepthThenKey => {
                by_depth(b, a).then_with(|| by_key(a, b))
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::draw::{DrawArguments, DrawItem, PipelineStateHandle};

    fn list() -> Vec<DrawItemProperties> {
        let item = Arc::new(DrawItem::new(
            PipelineStateHandle(1),
            DrawArguments::Linear {
                vertex_count: 3,
                first_vertex: 0,
            },
        ));
        [(1, 5.0), (0, 2.0), (1, 1.0), (0, 9.0)]
            .into_iter()
            .map(|(key, depth)| {
                DrawItemProperties::new(Arc::clone(&item))
                    .with_sort_key(key)
                    .with_depth(depth)
            })
            .collect()
    }

    fn order(list: &[DrawItemProperties]) -> Vec<(u64, f32)> {
        list.iter().map(|p| (p.sort_key, p.depth)).collect()
    }

    #[test]
    fn test_key_then_depth() {
        let mut list = list();
        sort_draw_list(&mut list, DrawListSortType::KeyThenDepth);
        assert_eq!(
            order(&list),
            vec![(0, 2.0), (0, 9.0), (1, 1.0), (1, 5.0)]
        );
    }

    #[test]
    fn test_key_then_reverse_depth() {
        let mut list = list();
        sort_draw_list(&mut list, DrawListSortType::KeyThenReverseDepth);
        assert_eq!(
            order(&list),
            vec![(0, 9.0), (0, 2.0), (1, 5.0), (1, 1.0)]
        );
    }

    #[test]
    fn test_reverse_depth_then_key() {
        let mut list = list();
        sort_draw_list(&mut list, DrawListSortType::ReverseDepthThenKey);
        assert_eq!(
            order(&list),
            vec![(0, 9.0), (1, 5.0), (0, 2.0), (1, 1.0)]
        );
    }
}
