use crate::types::AgentRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Default number of entries the shared memory retains.
pub const DEFAULT_MEMORY_CAPACITY: usize = 100;

/// Caller-supplied note, before the store assigns an id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntrySpec {
    #[serde(rename = "type")]
    pub entry_type: String,
    pub source: AgentRole,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub relevance: f64,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl MemoryEntrySpec {
    pub fn new(entry_type: impl Into<String>, source: AgentRole, content: serde_json::Value) -> Self {
        Self {
            entry_type: entry_type.into(),
            source,
            tags: BTreeSet::new(),
            relevance: 0.0,
            content,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = relevance;
        self
    }
}

/// A single note in shared memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub source: AgentRole,
    pub tags: BTreeSet<String>,
    pub relevance: f64,
    pub timestamp: DateTime<Utc>,
    pub content: serde_json::Value,
}

/// Query over shared memory. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFilter {
    #[serde(default, rename = "type")]
    pub entry_type: Option<String>,
    /// Entry must carry at least one of these tags. Empty means no tag filter.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: Option<AgentRole>,
}

impl MemoryFilter {
    pub fn of_type(mut self, entry_type: impl Into<String>) -> Self {
        self.entry_type = Some(entry_type.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_source(mut self, source: AgentRole) -> Self {
        self.source = Some(source);
        self
    }

    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        if let Some(t) = &self.entry_type {
            if &entry.entry_type != t {
                return false;
            }
        }
        if let Some(source) = self.source {
            if entry.source != source {
                return false;
            }
        }
        self.tags.is_empty() || self.tags.iter().any(|t| entry.tags.contains(t))
    }
}

/// Bounded, relevance-ranked note store shared by all agents.
///
/// Inserting past capacity re-sorts the store by relevance (descending,
/// stable) and keeps the top `capacity` entries. Age plays no part in
/// eviction, and after the first eviction the internal order is relevance
/// order rather than insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedMemory {
    entries: Vec<MemoryEntry>,
    capacity: usize,
}

impl SharedMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Store a note and return it with its assigned id and timestamp.
    ///
    /// The returned entry may already have been evicted if its relevance is
    /// below every retained entry. A NaN relevance is stored as `0.0`.
    pub fn add(&mut self, spec: MemoryEntrySpec) -> MemoryEntry {
        let relevance = if spec.relevance.is_nan() {
            tracing::debug!(source = %spec.source, "NaN relevance stored as 0.0");
            0.0
        } else {
            spec.relevance
        };
        let entry = MemoryEntry {
            id: Uuid::new_v4(),
            entry_type: spec.entry_type,
            source: spec.source,
            tags: spec.tags,
            relevance,
            timestamp: Utc::now(),
            content: spec.content,
        };
        self.entries.push(entry.clone());

        if self.entries.len() > self.capacity {
            self.entries
                .sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
            let evicted = self.entries.len() - self.capacity;
            self.entries.truncate(self.capacity);
            tracing::debug!(evicted, capacity = self.capacity, "Shared memory evicted low-relevance entries");
        }
        entry
    }

    /// Entries matching every set field of `filter`, in store order.
    pub fn query(&self, filter: &MemoryFilter) -> Vec<MemoryEntry> {
        self.entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SharedMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn note(relevance: f64) -> MemoryEntrySpec {
        MemoryEntrySpec::new("insight", AgentRole::Analyzer, json!({ "r": relevance }))
            .with_relevance(relevance)
    }

    #[test]
    fn test_add_assigns_id_and_timestamp() {
        let mut memory = SharedMemory::default();
        let a = memory.add(note(0.5));
        let b = memory.add(note(0.5));
        assert_ne!(a.id, b.id);
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.capacity(), DEFAULT_MEMORY_CAPACITY);
    }

    #[test]
    fn test_insertion_order_kept_below_capacity() {
        let mut memory = SharedMemory::new(10);
        memory.add(note(0.1));
        memory.add(note(0.9));
        memory.add(note(0.5));
        let order: Vec<f64> = memory.entries().iter().map(|e| e.relevance).collect();
        assert_eq!(order, vec![0.1, 0.9, 0.5]);
    }

    #[test]
    fn test_nan_relevance_is_evictable() {
        let mut memory = SharedMemory::new(2);
        let nan = memory.add(note(f64::NAN));
        assert_eq!(nan.relevance, 0.0);
        memory.add(note(0.5));
        memory.add(note(0.7));

        assert_eq!(memory.len(), 2);
        assert!(memory.entries().iter().all(|e| e.id != nan.id));
    }

    #[test]
    fn test_eviction_keeps_top_relevance() {
        let mut memory = SharedMemory::new(100);
        // A very old but very relevant entry.
        let keeper = memory.add(note(1000.0));
        for i in 0..100 {
            memory.add(note(i as f64));
        }
        assert_eq!(memory.len(), 100);
        assert!(memory.entries().iter().any(|e| e.id == keeper.id));
        // Relevance 0.0 was the lowest of 101 and is gone.
        assert!(memory.entries().iter().all(|e| e.relevance > 0.0));
        // Store order is now relevance-descending.
        let order: Vec<f64> = memory.entries().iter().map(|e| e.relevance).collect();
        let mut sorted = order.clone();
        sorted.sort_by(|a, b| b.total_cmp(a));
        assert_eq!(order, sorted);
    }

    #[test]
    fn test_new_low_relevance_entry_is_evicted_immediately() {
        let mut memory = SharedMemory::new(2);
        memory.add(note(0.8));
        memory.add(note(0.9));
        let weak = memory.add(note(0.1));
        assert_eq!(memory.len(), 2);
        assert!(memory.entries().iter().all(|e| e.id != weak.id));
    }

    #[test]
    fn test_query_filters() {
        let mut memory = SharedMemory::default();
        memory.add(
            MemoryEntrySpec::new("program", AgentRole::Researcher, json!("EIC Accelerator"))
                .with_tags(["eu", "deeptech"]),
        );
        memory.add(
            MemoryEntrySpec::new("program", AgentRole::Researcher, json!("SBIR Phase I"))
                .with_tags(["us"]),
        );
        memory.add(
            MemoryEntrySpec::new("feedback", AgentRole::Reviewer, json!("tighten budget"))
                .with_tags(["eu"]),
        );

        assert_eq!(memory.query(&MemoryFilter::default()).len(), 3);
        assert_eq!(memory.query(&MemoryFilter::default().of_type("program")).len(), 2);
        assert_eq!(
            memory
                .query(&MemoryFilter::default().from_source(AgentRole::Reviewer))
                .len(),
            1
        );

        // Tag filter: at least one tag in common.
        let eu_or_us = memory.query(&MemoryFilter::default().with_tags(["eu", "us"]));
        assert_eq!(eu_or_us.len(), 3);

        let eu_programs = memory.query(
            &MemoryFilter::default()
                .of_type("program")
                .with_tags(["eu"]),
        );
        assert_eq!(eu_programs.len(), 1);
        assert_eq!(eu_programs[0].content, json!("EIC Accelerator"));

        assert!(memory
            .query(&MemoryFilter::default().with_tags(["asia"]))
            .is_empty());
    }
}
