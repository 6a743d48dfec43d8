//! Natural-key deduplication across record batches.

use std::collections::HashMap;

/// Merges record batches into a single sequence keyed by `key_fn`.
///
/// Output order is the first occurrence of each key across the concatenated
/// input, so file output stays reproducible; the value is taken from the last
/// batch that produced the key, so freshly fetched data overrides stale cached
/// data. Records with an empty key are not identifiable and are dropped.
pub fn merge<T, F>(batches: Vec<Vec<T>>, key_fn: F) -> Vec<T>
where
    F: Fn(&T) -> String,
{
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, T> = HashMap::new();
    for batch in batches {
        for record in batch {
            let key = key_fn(&record);
            if key.is_empty() {
                continue;
            }
            if !by_key.contains_key(&key) {
                order.push(key.clone());
            }
            by_key.insert(key, record);
        }
    }
    order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &str, val: u32) -> (String, u32) {
        (key.to_string(), val)
    }

    #[test]
    fn later_batch_wins_but_order_is_first_seen() {
        let a = vec![kv("p1", 1), kv("p2", 2)];
        let b = vec![kv("p3", 3), kv("p1", 10)];
        let merged = merge(vec![a, b], |(k, _)| k.clone());
        assert_eq!(merged, vec![kv("p1", 10), kv("p2", 2), kv("p3", 3)]);
    }

    #[test]
    fn merge_is_idempotent() {
        let batch = vec![kv("a", 1), kv("b", 2)];
        let once = merge(vec![batch.clone()], |(k, _)| k.clone());
        let twice = merge(vec![once.clone(), once.clone()], |(k, _)| k.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn records_without_a_key_are_dropped() {
        let batch = vec![kv("", 1), kv("p1", 2), kv("", 3)];
        let merged = merge(vec![batch], |(k, _)| k.clone());
        assert_eq!(merged, vec![kv("p1", 2)]);
    }
}
