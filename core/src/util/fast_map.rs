//! Fx-hashed maps for id-keyed lookups. Iteration order is unspecified, so
//! anything that reaches output goes through [`sorted_entries`].

pub type FastHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

pub type FastHashSet<K> = rustc_hash::FxHashSet<K>;

#[inline]
pub fn fast_hash_map_new<K, V>() -> FastHashMap<K, V> {
    rustc_hash::FxHashMap::default()
}

#[inline]
pub fn fast_hash_set_new<K>() -> FastHashSet<K> {
    rustc_hash::FxHashSet::default()
}

/// Copy the entries of `map` out in key order.
pub fn sorted_entries<K: Ord + Copy, V: Copy>(map: &FastHashMap<K, V>) -> Vec<(K, V)> {
    let mut out: Vec<(K, V)> = map.iter().map(|(k, v)| (*k, *v)).collect();
    out.sort_unstable_by_key(|(k, _)| *k);
    out
}
