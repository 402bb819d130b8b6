//! Layered map merging.

use std::hash::Hash;

use indexmap::IndexMap;

/// Merges override layers from lowest to highest priority.
///
/// A key defined in a later layer overrides the same key in every earlier
/// layer. Keys keep the position at which they were first inserted.
///
/// ```
/// use cbd::merge::merge_layers;
/// use indexmap::IndexMap;
///
/// let fixed = IndexMap::from([("vdd", 1.8), ("temp", 27.0)]);
/// let corner = IndexMap::from([("temp", 125.0)]);
/// let merged = merge_layers([&fixed, &corner]);
///
/// assert_eq!(merged, IndexMap::from([("vdd", 1.8), ("temp", 125.0)]));
/// ```
pub fn merge_layers<'a, K, V>(
    layers: impl IntoIterator<Item = &'a IndexMap<K, V>>,
) -> IndexMap<K, V>
where
    K: Hash + Eq + Clone + 'a,
    V: Clone + 'a,
{
    let mut merged = IndexMap::new();
    for layer in layers {
        for (k, v) in layer {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}
