//! Incremental sync planning: which requested entities still need work.

use std::collections::HashSet;

/// Operating mode of a sync run, mapped straight from the CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Fetch only entities without a persisted artifact.
    Normal,
    /// Re-fetch everything that was requested.
    Force,
    /// Like `Normal`, then truncate to the first `n` entities in the
    /// requested order. Keeping the original order (rather than sampling)
    /// makes repeated limited runs deterministic and forward-moving.
    Limit(usize),
}

/// Selects the subset of `requested` that still requires fetching. Pure: the
/// persisted set comes from a filesystem listing done by the store module.
pub fn plan<T, F>(requested: &[T], persisted: &HashSet<String>, id_of: F, mode: SyncMode) -> Vec<T>
where
    T: Clone,
    F: Fn(&T) -> String,
{
    let kept: Vec<T> = match mode {
        SyncMode::Force => requested.to_vec(),
        SyncMode::Normal | SyncMode::Limit(_) => requested
            .iter()
            .filter(|entity| !persisted.contains(&id_of(entity)))
            .cloned()
            .collect(),
    };
    match mode {
        SyncMode::Limit(n) => kept.into_iter().take(n).collect(),
        _ => kept,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn persisted(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normal_mode_is_set_difference() {
        let requested = ids(&["a", "b", "c"]);
        assert_eq!(
            plan(&requested, &persisted(&[]), Clone::clone, SyncMode::Normal),
            requested
        );
        assert_eq!(
            plan(&requested, &persisted(&["a", "b", "c"]), Clone::clone, SyncMode::Normal),
            Vec::<String>::new()
        );
        assert_eq!(
            plan(&requested, &persisted(&["b"]), Clone::clone, SyncMode::Normal),
            ids(&["a", "c"])
        );
    }

    #[test]
    fn force_mode_keeps_everything() {
        let requested = ids(&["a", "b"]);
        assert_eq!(
            plan(&requested, &persisted(&["a", "b"]), Clone::clone, SyncMode::Force),
            requested
        );
    }

    #[test]
    fn limit_truncates_in_requested_order() {
        let requested = ids(&["d", "a", "c", "b"]);
        let planned = plan(&requested, &persisted(&[]), Clone::clone, SyncMode::Limit(3));
        assert_eq!(planned, ids(&["d", "a", "c"]));

        let planned = plan(&requested, &persisted(&[]), Clone::clone, SyncMode::Limit(9));
        assert_eq!(planned.len(), 4);
    }

    #[test]
    fn limit_applies_after_filtering() {
        let requested = ids(&["a", "b", "c", "d"]);
        let planned = plan(&requested, &persisted(&["a", "b"]), Clone::clone, SyncMode::Limit(1));
        assert_eq!(planned, ids(&["c"]));
    }
}
