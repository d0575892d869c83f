//! Incremental cart reconciliation.

use std::collections::BTreeMap;

use cartwheel_core::ProductId;

/// One backend call needed to bring the backend cart in line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineChange {
    Remove(ProductId),
    Add(ProductId, u32),
    Update(ProductId, u32),
}

/// Backend calls turning `synced` into `current`: removals first, then
/// additions, then quantity updates. Unchanged products produce nothing.
#[must_use]
pub fn diff(
    synced: &BTreeMap<ProductId, u32>,
    current: &BTreeMap<ProductId, u32>,
) -> Vec<LineChange> {
    let removes = synced
        .keys()
        .filter(|id| !current.contains_key(id))
        .map(|&id| LineChange::Remove(id));

    let adds = current
        .iter()
        .filter(|(id, _)| !synced.contains_key(id))
        .map(|(&id, &quantity)| LineChange::Add(id, quantity));

    let updates = current.iter().filter_map(|(&id, &quantity)| {
        synced
            .get(&id)
            .filter(|&&previous| previous != quantity)
            .map(|_| LineChange::Update(id, quantity))
    });

    removes.chain(adds).chain(updates).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(i64, u32)]) -> BTreeMap<ProductId, u32> {
        entries.iter().map(|&(id, q)| (ProductId::new(id), q)).collect()
    }

    #[test]
    fn test_remove_add_and_skip_unchanged() {
        let changes = diff(&map(&[(1, 1), (2, 2)]), &map(&[(1, 1), (3, 3)]));
        assert_eq!(
            changes,
            vec![
                LineChange::Remove(ProductId::new(2)),
                LineChange::Add(ProductId::new(3), 3),
            ]
        );
    }

    #[test]
    fn test_quantity_change_is_update() {
        let changes = diff(&map(&[(1, 1)]), &map(&[(1, 4)]));
        assert_eq!(changes, vec![LineChange::Update(ProductId::new(1), 4)]);
    }

    #[test]
    fn test_identical_maps_need_nothing() {
        assert!(diff(&map(&[(1, 1), (2, 2)]), &map(&[(1, 1), (2, 2)])).is_empty());
        assert!(diff(&BTreeMap::new(), &BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_everything_removed() {
        let changes = diff(&map(&[(1, 1), (2, 2)]), &BTreeMap::new());
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| matches!(c, LineChange::Remove(_))));
    }
}
