//! One optimization pass over a sealed chunk graph.
//!
//! Three phases run in order. `scan` indexes every module's chunk membership
//! and builds the pending candidate map. `select` drains that map best-first,
//! materializing each winner into a real chunk and retracting its modules
//! from the losers. `partition` subdivides any resulting chunk that exceeds
//! its recorded size ceiling.

use indexmap::{IndexMap, IndexSet};
use tidepack_core::chunk::ChunkId;
use tidepack_core::chunk_graph::ChunkGraph;
use tidepack_core::module::{Module, ModuleId, ModuleList};
use tracing::{debug, instrument};

use crate::cache_group::{CacheGroup, CacheGroupResolver};
use crate::candidates::{CandidateMap, CandidateScope};
use crate::chunk_sets::{ChunkSetId, ChunkSetIndexer};
use crate::errors::{SplitChunksError, SplitChunksWarning};
use crate::max_size::{enforce_size_ceilings, MaxSizeRecord};
use crate::options::{ChunkName, NormalizedOptions};
use crate::sizes::{check_min_size, check_min_size_reduction, combine_size_maps};
use crate::{SplitChunksOutcome, SplitChunksStats};

pub(crate) struct SplitChunksPass<'a> {
  modules: &'a ModuleList,
  options: &'a NormalizedOptions,
  resolver: CacheGroupResolver<'a>,
  indexer: ChunkSetIndexer,
  candidates: CandidateMap,
  /// Pending size constraints per real chunk, consumed by the partitioner.
  max_size_records: IndexMap<ChunkId, MaxSizeRecord>,
  warnings: Vec<SplitChunksWarning>,
  warned_names: IndexSet<String>,
  stats: SplitChunksStats,
}

impl<'a> SplitChunksPass<'a> {
  pub(crate) fn new(options: &'a NormalizedOptions, modules: &'a ModuleList) -> Self {
    Self {
      modules,
      options,
      resolver: CacheGroupResolver::new(options),
      indexer: ChunkSetIndexer::new(),
      candidates: CandidateMap::new(),
      max_size_records: IndexMap::new(),
      warnings: Vec::new(),
      warned_names: IndexSet::new(),
      stats: SplitChunksStats::default(),
    }
  }

  /// Claims the graph and runs all three phases. A graph stays claimed until
  /// `reset_seal`, so a second run without a reset fails fast.
  pub(crate) fn run(mut self, graph: &mut ChunkGraph) -> Result<SplitChunksOutcome, SplitChunksError> {
    if graph.is_sealed() {
      return Err(SplitChunksError::AlreadyOptimized);
    }
    graph.seal();

    self.scan(graph);
    self.select(graph)?;
    self.partition(graph);

    self.stats.modules = self.modules.len();
    self.stats.chunks = graph.num_chunks();
    Ok(SplitChunksOutcome {
      warnings: self.warnings,
      stats: self.stats,
    })
  }

  // ----------------------------
  // Scan
  // ----------------------------

  /// Registers every module's membership set, then offers every module to
  /// every matching cache group across every registered combination of its
  /// set.
  #[instrument(level = "debug", skip_all)]
  fn scan(&mut self, graph: &ChunkGraph) {
    // Registration must complete before combinations are requested, so a
    // module can split along the smaller sets other modules realize.
    let mut membership: Vec<(ModuleId, ChunkSetId)> = Vec::with_capacity(self.modules.len());
    for (module_id, _) in self.modules.iter() {
      let chunks: Vec<ChunkId> = graph.module_chunks(module_id).collect();
      if chunks.is_empty() {
        continue;
      }
      membership.push((module_id, self.indexer.register(chunks)));
    }

    for (module_id, owner) in membership {
      let module = self.modules.get(module_id);
      let group_ids = self.resolver.matching_groups(module);
      if group_ids.is_empty() {
        continue;
      }
      let combinations = self.indexer.combinations_for(owner);
      for group_id in group_ids {
        let group = self.resolver.group(group_id);
        for &combination in combinations.iter() {
          if self.indexer.cardinality(combination) < group.min_chunks as usize {
            continue;
          }
          let selected = self
            .indexer
            .select(combination, &group.chunks, group.filter_key, graph);
          if selected.chunks.len() < group.min_chunks as usize {
            continue;
          }

          let name = resolve_name(group, module, &selected.chunks, graph);
          if let Some(name) = &name {
            // The colliding name is kept; selection folds the modules into
            // the chunk that owns it.
            if graph.chunk_by_name(name).is_some() && self.warned_names.insert(name.clone()) {
              self.warnings.push(SplitChunksWarning::NameCollision {
                cache_group: group.key.clone(),
                name: name.clone(),
              });
            }
          }
          let scope = match &name {
            Some(name) => CandidateScope::Name(name.clone()),
            None => CandidateScope::Chunks(selected.identity.clone()),
          };
          let candidate = self
            .candidates
            .entry((group_id, scope), name, group.track_sizes);
          candidate.add_module(module_id, module);
          candidate.fold_chunks(&selected.identity, &selected.chunks);
        }
      }
    }
    self.stats.candidates = self.candidates.len();
    debug!(
      modules = self.modules.len(),
      candidates = self.candidates.len(),
      "scan: built split candidates"
    );

    // Candidates that already miss their thresholds never enter selection.
    let resolver = &self.resolver;
    let mut discarded = 0usize;
    self.candidates.retain(|key, candidate| {
      let group = resolver.group(key.0);
      let keep = (!candidate.track_sizes() || check_min_size(&candidate.sizes, &group.min_size))
        && check_min_size_reduction(
          &candidate.sizes,
          &group.min_size_reduction,
          candidate.chunks.len(),
        );
      if !keep {
        discarded += 1;
      }
      keep
    });
    self.stats.discarded_candidates += discarded;
  }

  // ----------------------------
  // Select
  // ----------------------------

  /// Drains the candidate map best-first, materializing each winner.
  #[instrument(level = "debug", skip_all)]
  fn select(&mut self, graph: &mut ChunkGraph) -> Result<(), SplitChunksError> {
    while let Some(mut item) = self.candidates.pop_best(&self.resolver, self.modules) {
      let group = self.resolver.group(item.cache_group);

      let mut target: Option<ChunkId> = None;
      let mut is_existing_chunk = false;
      let mut is_reused_with_all_modules = false;
      if let Some(name) = item.name.clone() {
        // A chunk already carrying the name absorbs the candidate.
        if let Some(chunk) = graph.chunk_by_name(&name) {
          target = Some(chunk);
          is_existing_chunk = item.chunks.shift_remove(&chunk);
        }
      } else if group.reuse_existing_chunk {
        if let Some(chunk) = find_reusable_chunk(&item.modules, &item.chunks, graph) {
          item.chunks.shift_remove(&chunk);
          target = Some(chunk);
          is_existing_chunk = true;
          is_reused_with_all_modules = true;
        }
      }

      let original_spanned = item.chunks.len();
      let mut used: IndexSet<ChunkId> = item.chunks.clone();
      if used.is_empty() && !is_existing_chunk {
        self.stats.discarded_candidates += 1;
        continue;
      }

      // Chunks already at their request budget cannot take another split.
      if group.max_initial_requests.is_some() || group.max_async_requests.is_some() {
        used.retain(|&chunk| match request_limit(group, chunk, graph) {
          Some(limit) => graph.requests(chunk) < limit,
          None => true,
        });
      }
      // Retractions may have emptied a chunk of every candidate module.
      used.retain(|&chunk| {
        item
          .modules
          .iter()
          .any(|&module| graph.is_module_in_chunk(module, chunk))
      });

      if used.len() < original_spanned {
        // The span changed, so the candidate must requalify. The trimmed
        // set gets a fresh identity-keyed entry with the name cleared.
        if is_existing_chunk {
          if let Some(chunk) = target {
            used.insert(chunk);
          }
        }
        if used.len() >= group.min_chunks as usize {
          let span: Vec<ChunkId> = used.iter().copied().collect();
          let identity = self.indexer.identity_of(span.iter().copied());
          let requeued = self.candidates.entry(
            (item.cache_group, CandidateScope::Chunks(identity.clone())),
            None,
            group.track_sizes,
          );
          for &module in &item.modules {
            requeued.add_module(module, self.modules.get(module));
          }
          requeued.fold_chunks(&identity, &span);
        } else {
          self.stats.discarded_candidates += 1;
        }
        continue;
      }

      let new_chunk = if let (Some(chunk), true) = (target, is_existing_chunk) {
        self.stats.reused_chunks += 1;
        chunk
      } else {
        // A name collision resolves to the existing chunk here.
        let before = graph.num_chunks();
        let chunk = graph.add_chunk(item.name.as_deref());
        if graph.num_chunks() > before {
          self.stats.created_chunks += 1;
        } else {
          self.stats.reused_chunks += 1;
        }
        chunk
      };

      for &chunk in &used {
        graph.split(chunk, new_chunk);
      }

      let mut reason = String::from(if is_reused_with_all_modules {
        "reused as split chunk"
      } else {
        "split chunk"
      });
      reason.push_str(&format!(" (cache group: {})", group.key));
      if let Some(name) = &item.name {
        reason.push_str(&format!(" (name: {name})"));
      }
      graph.chunk_mut(new_chunk).add_reason(&reason);

      if let Some(name) = &item.name {
        // The split chunk takes over an entrypoint of the same name.
        if graph.remove_entrypoint(name).is_some() {
          graph.disconnect_entries(new_chunk);
        }
      }

      if let Some(filename) = &group.filename {
        if !graph.is_only_initial(new_chunk) {
          return Err(SplitChunksError::FilenameOnNonInitialChunk {
            cache_group: group.key.clone(),
          });
        }
        graph.chunk_mut(new_chunk).filename = Some(filename.clone());
      }
      if !group.id_hint.is_empty() {
        graph.chunk_mut(new_chunk).id_hints.insert(group.id_hint.clone());
      }

      if is_reused_with_all_modules {
        // The reused chunk holds every module already; only the other used
        // chunks give theirs up.
        for &module in &item.modules {
          for &chunk in &used {
            graph.disconnect(chunk, module);
          }
        }
      } else {
        for &module in &item.modules {
          if !self.modules.get(module).chunk_condition(new_chunk, graph) {
            continue;
          }
          graph.connect(new_chunk, module);
          for &chunk in &used {
            graph.disconnect(chunk, module);
          }
        }
      }
      debug!(
        cache_group = group.key.as_str(),
        chunks = used.len(),
        modules = item.modules.len(),
        "selection: materialized candidate"
      );

      if !group.max_size.is_empty() {
        let merged = match self.max_size_records.get(&new_chunk) {
          Some(prior) => MaxSizeRecord {
            min_size: combine_size_maps(&prior.min_size, &group.min_size, f64::max),
            max_size: combine_size_maps(&prior.max_size, &group.max_size, f64::min),
            automatic_name_delimiter: group.automatic_name_delimiter.clone(),
            keys: {
              let mut keys = prior.keys.clone();
              keys.push(group.key.clone());
              keys
            },
          },
          None => MaxSizeRecord {
            min_size: group.min_size.clone(),
            max_size: group.max_size.clone(),
            automatic_name_delimiter: group.automatic_name_delimiter.clone(),
            keys: vec![group.key.clone()],
          },
        };
        self.max_size_records.insert(new_chunk, merged);
      }

      // Retract the materialized modules from every overlapping candidate.
      let resolver = &self.resolver;
      let modules = self.modules;
      let mut discarded = 0usize;
      self.candidates.retain(|key, info| {
        if !info.chunks.iter().any(|chunk| used.contains(chunk)) {
          return true;
        }
        let mut updated = false;
        for &module in &item.modules {
          if info.remove_module(module, modules.get(module)) {
            updated = true;
          }
        }
        if !updated {
          return true;
        }
        if info.modules.is_empty() {
          discarded += 1;
          return false;
        }
        let info_group = resolver.group(key.0);
        if info.track_sizes() && !check_min_size(&info.sizes, &info_group.min_size) {
          discarded += 1;
          return false;
        }
        if !check_min_size_reduction(&info.sizes, &info_group.min_size_reduction, info.chunks.len())
        {
          discarded += 1;
          return false;
        }
        true
      });
      self.stats.discarded_candidates += discarded;
    }
    Ok(())
  }

  // ----------------------------
  // Partition
  // ----------------------------

  #[instrument(level = "debug", skip_all)]
  fn partition(&mut self, graph: &mut ChunkGraph) {
    self.stats.max_size_splits = enforce_size_ceilings(
      graph,
      self.modules,
      &self.max_size_records,
      self.options,
      &mut self.warnings,
    );
  }
}

fn resolve_name(
  group: &CacheGroup,
  module: &dyn Module,
  chunks: &[ChunkId],
  graph: &ChunkGraph,
) -> Option<String> {
  match &group.name {
    Some(ChunkName::Fixed(name)) => Some(name.clone()),
    Some(ChunkName::Resolver(resolver)) => resolver(module, chunks, graph, &group.key),
    None => None,
  }
}

/// Searches `spanned` for a chunk whose membership equals the candidate's
/// module set exactly. Preference among matches: an unnamed incumbent loses
/// to any later match, named ones prefer the shorter then lexicographically
/// smaller name.
fn find_reusable_chunk(
  modules: &IndexSet<ModuleId>,
  spanned: &IndexSet<ChunkId>,
  graph: &ChunkGraph,
) -> Option<ChunkId> {
  let mut best: Option<ChunkId> = None;
  'chunks: for &chunk in spanned {
    if graph.num_chunk_modules(chunk) != modules.len() {
      continue;
    }
    if spanned.len() > 1 && graph.num_entry_modules(chunk) > 0 {
      continue;
    }
    for &module in modules {
      if !graph.is_module_in_chunk(module, chunk) {
        continue 'chunks;
      }
    }
    let replace = match best {
      None => true,
      Some(current) => match (&graph.chunk(chunk).name, &graph.chunk(current).name) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(challenger), Some(incumbent)) => {
          challenger.len() < incumbent.len()
            || (challenger.len() == incumbent.len() && challenger < incumbent)
        }
      },
    };
    if replace {
      best = Some(chunk);
    }
  }
  best
}

/// Applicable request ceiling for one chunk: initial budget for startup-only
/// chunks, async budget for on-demand ones, the tighter of the two when the
/// chunk is reachable both ways.
fn request_limit(group: &CacheGroup, chunk: ChunkId, graph: &ChunkGraph) -> Option<u32> {
  if graph.is_only_initial(chunk) {
    group.max_initial_requests
  } else if graph.can_be_initial(chunk) {
    match (group.max_initial_requests, group.max_async_requests) {
      (Some(initial), Some(r#async)) => Some(initial.min(r#async)),
      (Some(initial), None) => Some(initial),
      (None, r#async) => r#async,
    }
  } else {
    group.max_async_requests
  }
}
