//! Table of contents assembly from an NCX navigation map

use crate::{
    path::PathResolver,
    types::{MetaItem, NavPoint, NavigationMap},
};

/// Head metadata whose non-zero value marks a fixed layout book
const PAGE_COUNT_META: [&str; 2] = ["dtb:totalPageCount", "dtb:maxPageNumber"];

/// Flattens the navigation tree into `(label, public path)` pairs
///
/// Points are emitted in pre-order: a parent comes before its children,
/// which come before the parent's next sibling. `playOrder` plays no part
/// in the ordering. The walk keeps its own stack, so arbitrarily deep maps
/// do not grow the call stack.
pub fn flatten_nav_map(map: &NavigationMap, resolver: &PathResolver) -> Vec<(String, String)> {
    let mut table = Vec::new();
    let mut stack = map.nav_points.iter().rev().collect::<Vec<&NavPoint>>();

    while let Some(nav_point) = stack.pop() {
        let path = resolver.resolve(nav_point.content.trim()).public;
        table.push((nav_point.label.clone(), path));

        stack.extend(nav_point.children.iter().rev());
    }

    table
}

/// Whether the NCX head declares a page count or page number other than zero
pub fn detect_fixed_layout(head: &[MetaItem]) -> bool {
    head.iter().any(|meta| {
        let content = meta.content.trim();
        PAGE_COUNT_META.contains(&meta.name.as_str()) && !content.is_empty() && content != "0"
    })
}
