//! Version vectors for causal ordering of cluster views

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{MeshworkError, MeshworkResult};

/// Upper bound on entries accepted from the wire
pub const MAX_VERSION_VECTOR_ENTRIES: usize = 65_535;

/// Longest node identifier a vector will track
pub const MAX_NODE_ID_LEN: usize = 256;

/// Counters stop short of this value so they stay representable as i64
pub const MAX_COUNTER: u64 = i64::MAX as u64;

/// Causal relationship between two version vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    Equal,
    /// Self happened before other
    Before,
    /// Self happened after other
    After,
    Concurrent,
}

/// Immutable mapping from node id to event counter.
///
/// Every operation returns a new vector. Entries are kept sorted so iteration
/// and encoding are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    counters: BTreeMap<String, u64>,
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(id, counter)` pairs, as decoded from the wire
    pub fn from_entries<I>(entries: I) -> MeshworkResult<Self>
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let mut counters = BTreeMap::new();
        for (id, counter) in entries {
            validate_node_id(&id)?;
            if counter > MAX_COUNTER {
                return Err(MeshworkError::invalid_version_vector(format!(
                    "counter for {} exceeds maximum",
                    id
                )));
            }
            counters.insert(id, counter);
            if counters.len() > MAX_VERSION_VECTOR_ENTRIES {
                return Err(MeshworkError::invalid_version_vector("too many entries"));
            }
        }
        Ok(Self { counters })
    }

    /// Counter for `id`, zero when absent
    pub fn get(&self, id: &str) -> u64 {
        self.counters.get(id).copied().unwrap_or(0)
    }

    pub fn increment(&self, id: &str) -> MeshworkResult<Self> {
        validate_node_id(id)?;
        let current = self.get(id);
        if current >= MAX_COUNTER {
            return Err(MeshworkError::invalid_version_vector(format!(
                "counter for {} would overflow",
                id
            )));
        }
        let mut counters = self.counters.clone();
        counters.insert(id.to_string(), current + 1);
        Ok(Self { counters })
    }

    /// Pointwise maximum of both vectors
    pub fn merge(&self, other: &VersionVector) -> Self {
        let mut counters = self.counters.clone();
        for (id, &theirs) in &other.counters {
            let entry = counters.entry(id.clone()).or_insert(0);
            if theirs > *entry {
                *entry = theirs;
            }
        }
        Self { counters }
    }

    pub fn compare(&self, other: &VersionVector) -> CausalOrder {
        let mut less = false;
        let mut greater = false;

        let ids: BTreeSet<&String> = self.counters.keys().chain(other.counters.keys()).collect();
        for id in ids {
            let ours = self.get(id);
            let theirs = other.get(id);
            if ours < theirs {
                less = true;
            } else if ours > theirs {
                greater = true;
            }
            if less && greater {
                return CausalOrder::Concurrent;
            }
        }

        match (less, greater) {
            (false, false) => CausalOrder::Equal,
            (true, false) => CausalOrder::Before,
            (false, true) => CausalOrder::After,
            (true, true) => CausalOrder::Concurrent,
        }
    }

    /// True when this vector has seen everything `other` has
    pub fn dominates_or_equals(&self, other: &VersionVector) -> bool {
        matches!(self.compare(other), CausalOrder::After | CausalOrder::Equal)
    }

    /// Keep only entries for ids in `active`
    pub fn prune<'a, I>(&self, active: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let active: BTreeSet<&str> = active.into_iter().collect();
        let counters = self
            .counters
            .iter()
            .filter(|(id, _)| active.contains(id.as_str()))
            .map(|(id, c)| (id.clone(), *c))
            .collect();
        Self { counters }
    }

    /// Keep only active ids, and of those at most `max_entries`, retaining the
    /// lexicographically smallest so every replica prunes identically
    pub fn prune_with_max<'a, I>(&self, active: I, max_entries: usize) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let pruned = self.prune(active);
        if pruned.counters.len() <= max_entries {
            return pruned;
        }
        let counters = pruned.counters.into_iter().take(max_entries).collect();
        Self { counters }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Sorted `(id, counter)` pairs
    pub fn entries(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(id, c)| (id.as_str(), *c))
    }
}

fn validate_node_id(id: &str) -> MeshworkResult<()> {
    if id.is_empty() {
        return Err(MeshworkError::invalid_version_vector("empty node id"));
    }
    if id.len() > MAX_NODE_ID_LEN {
        return Err(MeshworkError::invalid_version_vector(format!(
            "node id longer than {} bytes",
            MAX_NODE_ID_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vv(entries: &[(&str, u64)]) -> VersionVector {
        VersionVector::from_entries(entries.iter().map(|(k, v)| (k.to_string(), *v))).unwrap()
    }

    #[test]
    fn test_increment_only_touches_one_entry() {
        let a = vv(&[("n1", 3), ("n2", 1)]);
        let b = a.increment("n2").unwrap();
        assert_eq!(b.get("n1"), 3);
        assert_eq!(b.get("n2"), 2);
        // Receiver untouched
        assert_eq!(a.get("n2"), 1);
    }

    #[test]
    fn test_increment_rejects_bad_ids() {
        let a = VersionVector::new();
        assert!(a.increment("").is_err());
        assert!(a.increment(&"x".repeat(MAX_NODE_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_increment_overflow() {
        let a = vv(&[("n1", MAX_COUNTER)]);
        assert!(a.increment("n1").is_err());
    }

    #[test]
    fn test_compare() {
        let a = vv(&[("n1", 1), ("n2", 2)]);
        let b = vv(&[("n1", 2), ("n2", 2)]);
        let c = vv(&[("n1", 0), ("n2", 3)]);

        assert_eq!(a.compare(&a), CausalOrder::Equal);
        assert_eq!(a.compare(&b), CausalOrder::Before);
        assert_eq!(b.compare(&a), CausalOrder::After);
        assert_eq!(b.compare(&c), CausalOrder::Concurrent);
    }

    #[test]
    fn test_missing_entries_count_as_zero() {
        let a = vv(&[("n1", 1)]);
        let b = vv(&[("n1", 1), ("n2", 0)]);
        assert_eq!(a.compare(&b), CausalOrder::Equal);
        assert_eq!(VersionVector::new().compare(&a), CausalOrder::Before);
    }

    #[test]
    fn test_merge_is_pointwise_max() {
        let a = vv(&[("n1", 4), ("n2", 1)]);
        let b = vv(&[("n2", 7), ("n3", 2)]);
        assert_eq!(a.merge(&b), vv(&[("n1", 4), ("n2", 7), ("n3", 2)]));
    }

    #[test]
    fn test_prune_with_max_keeps_smallest_ids() {
        let full = vv(&[("e", 1), ("c", 1), ("a", 1), ("d", 1), ("b", 1)]);
        let pruned = full.prune_with_max(["a", "b", "c", "d", "e"], 3);

        let kept: Vec<&str> = pruned.entries().map(|(id, _)| id).collect();
        assert_eq!(kept, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_prune_drops_inactive() {
        let full = vv(&[("a", 1), ("b", 2)]);
        let pruned = full.prune(["b", "zzz"]);
        assert_eq!(pruned, vv(&[("b", 2)]));
    }

    #[test]
    fn test_entries_sorted() {
        let a = vv(&[("zeta", 1), ("alpha", 2), ("mid", 3)]);
        let ids: Vec<&str> = a.entries().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }
}
