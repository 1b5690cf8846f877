//! Catalog of every distinct set of chunks sharing at least one module.
//!
//! Chunks get dense integer indices by first appearance; a set's identity is
//! its sorted, comma-joined indices. The registry is deduplicated by identity
//! and bucketed by cardinality, so subset queries only scan buckets of
//! strictly smaller sets. Combinations and per-filter selections are
//! memoized, keyed by registered set and filter tag.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use fixedbitset::FixedBitSet;
use indexmap::IndexSet;
use itertools::Itertools;
use tidepack_core::chunk::ChunkId;
use tidepack_core::chunk_graph::ChunkGraph;

use crate::options::ChunkFilter;

/// Key of a registered chunk set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ChunkSetId(u32);

impl ChunkSetId {
  fn index(self) -> usize {
    self.0 as usize
  }
}

/// Identity of a chunk filter for selection memoization. Builtin filters are
/// shared across rules; predicates are keyed by the rule that owns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FilterKey {
  All,
  Initial,
  Async,
  Global,
  Rule(u32),
}

impl FilterKey {
  pub(crate) fn for_rule(filter: &ChunkFilter, rule: u32) -> Self {
    match filter {
      ChunkFilter::All => FilterKey::All,
      ChunkFilter::Initial => FilterKey::Initial,
      ChunkFilter::Async => FilterKey::Async,
      ChunkFilter::Predicate(_) => FilterKey::Rule(rule),
    }
  }

  pub(crate) fn for_global(filter: &ChunkFilter) -> Self {
    match filter {
      ChunkFilter::All => FilterKey::All,
      ChunkFilter::Initial => FilterKey::Initial,
      ChunkFilter::Async => FilterKey::Async,
      ChunkFilter::Predicate(_) => FilterKey::Global,
    }
  }
}

/// A registered set's chunks after a filter, with the filtered identity used
/// to key unnamed candidates.
#[derive(Debug)]
pub(crate) struct SelectedChunks {
  pub(crate) chunks: Vec<ChunkId>,
  pub(crate) identity: String,
}

#[derive(Debug)]
struct ChunkSetEntry {
  /// Membership order of the module that first realized the set.
  chunks: Vec<ChunkId>,
  mask: FixedBitSet,
}

#[derive(Debug, Default)]
pub(crate) struct ChunkSetIndexer {
  chunk_indices: IndexSet<ChunkId>,
  sets: Vec<ChunkSetEntry>,
  ids_by_identity: HashMap<String, ChunkSetId>,
  by_count: BTreeMap<usize, Vec<ChunkSetId>>,
  combinations: HashMap<ChunkSetId, Rc<[ChunkSetId]>>,
  selections: HashMap<(ChunkSetId, FilterKey), Rc<SelectedChunks>>,
}

impl ChunkSetIndexer {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Dense index of a chunk, assigned on first sight.
  pub(crate) fn index_of(&mut self, chunk: ChunkId) -> u32 {
    let (index, _) = self.chunk_indices.insert_full(chunk);
    u32::try_from(index).expect("too many chunks to key")
  }

  /// Canonical identity of an arbitrary chunk collection: sorted indices,
  /// comma joined.
  pub(crate) fn identity_of(&mut self, chunks: impl IntoIterator<Item = ChunkId>) -> String {
    let mut indices: Vec<u32> = chunks.into_iter().map(|chunk| self.index_of(chunk)).collect();
    indices.sort_unstable();
    indices.iter().join(",")
  }

  /// Registers a set, deduplicating by identity. Re-registering an already
  /// known set returns its existing id.
  pub(crate) fn register(&mut self, chunks: Vec<ChunkId>) -> ChunkSetId {
    let mut indices: Vec<u32> = chunks.iter().map(|&chunk| self.index_of(chunk)).collect();
    indices.sort_unstable();
    let identity = indices.iter().join(",");
    if let Some(&id) = self.ids_by_identity.get(identity.as_str()) {
      return id;
    }

    let capacity = indices.last().map_or(0, |&last| last as usize + 1);
    let mut mask = FixedBitSet::with_capacity(capacity);
    for &index in &indices {
      mask.insert(index as usize);
    }

    let id = ChunkSetId(u32::try_from(self.sets.len()).expect("too many chunk sets to key"));
    self.by_count.entry(chunks.len()).or_default().push(id);
    self.sets.push(ChunkSetEntry { chunks, mask });
    self.ids_by_identity.insert(identity, id);
    id
  }

  pub(crate) fn chunks_of(&self, id: ChunkSetId) -> &[ChunkId] {
    &self.sets[id.index()].chunks
  }

  pub(crate) fn cardinality(&self, id: ChunkSetId) -> usize {
    self.sets[id.index()].chunks.len()
  }

  /// The owning set plus every registered strictly smaller subset, largest
  /// cardinality first, registration order within a cardinality.
  pub(crate) fn combinations_for(&mut self, id: ChunkSetId) -> Rc<[ChunkSetId]> {
    if let Some(memo) = self.combinations.get(&id) {
      return Rc::clone(memo);
    }
    let entry = &self.sets[id.index()];
    let mut result = vec![id];
    for bucket in self
      .by_count
      .range(..entry.chunks.len())
      .rev()
      .map(|(_, bucket)| bucket)
    {
      for &candidate in bucket {
        if self.sets[candidate.index()].mask.is_subset(&entry.mask) {
          result.push(candidate);
        }
      }
    }
    let memo: Rc<[ChunkSetId]> = result.into();
    self.combinations.insert(id, Rc::clone(&memo));
    memo
  }

  /// Applies a chunk filter to a registered set, memoized per (set, filter).
  pub(crate) fn select(
    &mut self,
    id: ChunkSetId,
    filter: &ChunkFilter,
    filter_key: FilterKey,
    graph: &ChunkGraph,
  ) -> Rc<SelectedChunks> {
    if let Some(memo) = self.selections.get(&(id, filter_key)) {
      return Rc::clone(memo);
    }
    let chunks: Vec<ChunkId> = self.sets[id.index()]
      .chunks
      .iter()
      .copied()
      .filter(|&chunk| filter.accepts(chunk, graph))
      .collect();
    let identity = self.identity_of(chunks.iter().copied());
    let selected = Rc::new(SelectedChunks { chunks, identity });
    self.selections.insert((id, filter_key), Rc::clone(&selected));
    selected
  }
}
