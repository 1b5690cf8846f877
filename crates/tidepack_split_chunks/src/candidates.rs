//! Split candidates and the insertion-ordered pending map the selection
//! loop drains.

use std::cmp::Ordering;

use indexmap::{IndexMap, IndexSet};
use tidepack_core::chunk::ChunkId;
use tidepack_core::module::{Module, ModuleId, ModuleList};

use crate::cache_group::{CacheGroupId, CacheGroupResolver};
use crate::sizes::{total_size, SizeMap};

/// What distinguishes two candidates of the same cache group: a resolved
/// name funnels every matching chunk set into one candidate, unnamed
/// candidates stay separate per filtered chunk-set identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CandidateScope {
  Name(String),
  Chunks(String),
}

pub(crate) type CandidateKey = (CacheGroupId, CandidateScope);

/// Accumulator for modules that might be extracted into one shared chunk.
#[derive(Debug)]
pub(crate) struct SplitCandidate {
  pub(crate) cache_group: CacheGroupId,
  pub(crate) name: Option<String>,
  pub(crate) modules: IndexSet<ModuleId>,
  /// Running totals, only maintained when the owning group tracks sizes.
  pub(crate) sizes: SizeMap,
  /// Real chunks the candidate spans.
  pub(crate) chunks: IndexSet<ChunkId>,
  chunk_identities: IndexSet<String>,
  track_sizes: bool,
}

impl SplitCandidate {
  fn new(cache_group: CacheGroupId, name: Option<String>, track_sizes: bool) -> Self {
    Self {
      cache_group,
      name,
      modules: IndexSet::new(),
      sizes: SizeMap::new(),
      chunks: IndexSet::new(),
      chunk_identities: IndexSet::new(),
      track_sizes,
    }
  }

  /// Adds a module, accumulating its sizes only when it was not a member
  /// yet.
  pub(crate) fn add_module(&mut self, id: ModuleId, module: &dyn Module) {
    if self.modules.insert(id) && self.track_sizes {
      for ty in module.source_types() {
        *self.sizes.entry(ty.clone()).or_insert(0.0) += module.size(ty);
      }
    }
  }

  /// Removes a module and its size contribution. Returns whether it was a
  /// member.
  pub(crate) fn remove_module(&mut self, id: ModuleId, module: &dyn Module) -> bool {
    if !self.modules.shift_remove(&id) {
      return false;
    }
    if self.track_sizes {
      for ty in module.source_types() {
        if let Some(size) = self.sizes.get_mut(ty) {
          *size -= module.size(ty);
        }
      }
    }
    true
  }

  /// Widens the span by a filtered chunk set, once per distinct identity.
  pub(crate) fn fold_chunks(&mut self, identity: &str, chunks: &[ChunkId]) {
    if self.chunk_identities.insert(identity.to_string()) {
      self.chunks.extend(chunks.iter().copied());
    }
  }

  pub(crate) fn track_sizes(&self) -> bool {
    self.track_sizes
  }
}

/// Total order over candidates; `Greater` means better. Ranks by group
/// priority, spanned chunk count, estimated bytes saved by deduplication,
/// then module count.
pub(crate) fn compare_candidates(
  a: &SplitCandidate,
  b: &SplitCandidate,
  resolver: &CacheGroupResolver,
  modules: &ModuleList,
) -> Ordering {
  let by_priority = resolver
    .group(a.cache_group)
    .priority
    .cmp(&resolver.group(b.cache_group).priority);
  if by_priority != Ordering::Equal {
    return by_priority;
  }
  let by_chunk_count = a.chunks.len().cmp(&b.chunks.len());
  if by_chunk_count != Ordering::Equal {
    return by_chunk_count;
  }
  let a_saved = total_size(&a.sizes) * a.chunks.len().saturating_sub(1) as f64;
  let b_saved = total_size(&b.sizes) * b.chunks.len().saturating_sub(1) as f64;
  let by_saved = a_saved.total_cmp(&b_saved);
  if by_saved != Ordering::Equal {
    return by_saved;
  }
  let by_module_count = a.modules.len().cmp(&b.modules.len());
  if by_module_count != Ordering::Equal {
    return by_module_count;
  }
  // The final tie-break is inverted on purpose: the candidate whose sorted
  // module identifiers compare LOWER wins. Generated chunk names depend on
  // which candidate materializes first, so flipping this reorders output.
  let a_identifiers = sorted_identifiers(a, modules);
  let b_identifiers = sorted_identifiers(b, modules);
  for (a_id, b_id) in a_identifiers.iter().zip(&b_identifiers) {
    match a_id.cmp(b_id) {
      Ordering::Less => return Ordering::Greater,
      Ordering::Greater => return Ordering::Less,
      Ordering::Equal => {}
    }
  }
  Ordering::Equal
}

fn sorted_identifiers<'m>(candidate: &SplitCandidate, modules: &'m ModuleList) -> Vec<&'m str> {
  let mut identifiers: Vec<&str> = candidate
    .modules
    .iter()
    .map(|&id| modules.get(id).identifier())
    .collect();
  identifiers.sort_unstable();
  identifiers
}

/// Pending candidates in insertion order. Ties in the total order keep the
/// earliest-inserted candidate, so insertion order is part of determinism.
#[derive(Debug, Default)]
pub(crate) struct CandidateMap {
  entries: IndexMap<CandidateKey, SplitCandidate>,
}

impl CandidateMap {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn entry(
    &mut self,
    key: CandidateKey,
    name: Option<String>,
    track_sizes: bool,
  ) -> &mut SplitCandidate {
    let cache_group = key.0;
    self
      .entries
      .entry(key)
      .or_insert_with(|| SplitCandidate::new(cache_group, name, track_sizes))
  }

  pub(crate) fn len(&self) -> usize {
    self.entries.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub(crate) fn retain(&mut self, keep: impl FnMut(&CandidateKey, &mut SplitCandidate) -> bool) {
    self.entries.retain(keep);
  }

  /// Removes and returns the best pending candidate.
  pub(crate) fn pop_best(
    &mut self,
    resolver: &CacheGroupResolver,
    modules: &ModuleList,
  ) -> Option<SplitCandidate> {
    let mut best: Option<usize> = None;
    for index in 0..self.entries.len() {
      match best {
        None => best = Some(index),
        Some(current) => {
          if compare_candidates(&self.entries[current], &self.entries[index], resolver, modules)
            == Ordering::Less
          {
            best = Some(index);
          }
        }
      }
    }
    let (_, candidate) = self.entries.shift_remove_index(best?)?;
    Some(candidate)
  }
}
