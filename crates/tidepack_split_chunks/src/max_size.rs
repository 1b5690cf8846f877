//! Post-pass that subdivides chunks whose size exceeds a configured ceiling.
//!
//! The selection loop records one pending constraint per chunk it touches;
//! every other chunk falls back to the fallback cache group where its filter
//! applies. The ceiling never breaks a single module apart and always yields
//! to the minSize floor.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tidepack_core::chunk::ChunkId;
use tidepack_core::chunk_graph::ChunkGraph;
use tidepack_core::hash::short_hash;
use tidepack_core::module::{Module, ModuleId, ModuleList};
use tracing::debug;

use crate::deterministic_grouping::{group_items, GroupingItem};
use crate::errors::SplitChunksWarning;
use crate::options::NormalizedOptions;
use crate::sizes::SizeMap;

/// Longest chunk name emitted before truncating and re-hashing.
const MAX_NAME_LENGTH: usize = 100;

/// Strips loader prefixes (`...!`) and query strings (`?...`) off a module
/// request, leaving the path part that is meaningful in a chunk name.
static REQUEST_TRIMMER: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^.*!|\?[^?!]*$").expect("request trimmer regex"));

/// Size constraint accumulated for one chunk across every cache group that
/// materialized into it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MaxSizeRecord {
  pub(crate) min_size: SizeMap,
  pub(crate) max_size: SizeMap,
  pub(crate) automatic_name_delimiter: String,
  /// Contributing cache group keys, only used to label and deduplicate
  /// min/max inversion warnings.
  pub(crate) keys: Vec<String>,
}

/// Splits every over-ceiling chunk into deterministic sub-chunks. Returns the
/// number of chunks split off; warnings are appended in place.
pub(crate) fn enforce_size_ceilings(
  graph: &mut ChunkGraph,
  modules: &ModuleList,
  records: &IndexMap<ChunkId, MaxSizeRecord>,
  options: &NormalizedOptions,
  warnings: &mut Vec<SplitChunksWarning>,
) -> usize {
  let mut splits = 0;
  let mut warned: HashSet<String> = HashSet::new();
  // Shared across chunks, so a module grouped under two records keeps the
  // key it was first assigned, delimiter included.
  let mut key_cache: HashMap<ModuleId, String> = HashMap::new();

  // Chunks split off below are never revisited.
  let chunk_ids: Vec<ChunkId> = graph.chunk_ids().collect();
  for chunk in chunk_ids {
    let record = records.get(&chunk);
    if record.is_none() && !options.fallback.chunks.accepts(chunk, graph) {
      continue;
    }
    let (min_size, mut max_size, delimiter, keys) = match record {
      Some(record) => (
        record.min_size.clone(),
        record.max_size.clone(),
        record.automatic_name_delimiter.clone(),
        Some(record.keys.as_slice()),
      ),
      None => (
        options.fallback.min_size.clone(),
        options.fallback.max_size.clone(),
        options.fallback.automatic_name_delimiter.clone(),
        None,
      ),
    };
    if max_size.is_empty() {
      continue;
    }

    // The floor outranks an inverted ceiling; raising the ceiling to the
    // floor also makes it the effective grouping bound.
    let mut inverted: Vec<String> = Vec::new();
    let mut inverted_values: Vec<String> = Vec::new();
    for (dimension, &floor) in &min_size {
      let Some(ceiling) = max_size.get_mut(dimension) else {
        continue;
      };
      if floor > *ceiling {
        inverted.push(dimension.to_string());
        inverted_values.push(format!("{dimension}:{floor}:{ceiling}"));
        *ceiling = floor;
      }
    }
    if !inverted.is_empty() {
      let label = match keys {
        Some(keys) if !keys.is_empty() => {
          let mut sorted: Vec<&str> = keys.iter().map(String::as_str).collect();
          sorted.sort_unstable();
          sorted.dedup();
          sorted.join(", ")
        }
        _ => "fallback cache group".to_string(),
      };
      if warned.insert(format!("{label}|{}", inverted_values.join(","))) {
        warnings.push(SplitChunksWarning::MinSizeExceedsMaxSize {
          cache_groups: label,
          keys: inverted,
        });
      }
    }

    let items: Vec<GroupingItem> = graph
      .chunk_modules(chunk)
      .map(|module_id| {
        let module = modules.get(module_id);
        let key = key_cache
          .entry(module_id)
          .or_insert_with(|| grouping_key(module, &delimiter))
          .clone();
        GroupingItem {
          module: module_id,
          key,
          size: module_sizes(module),
        }
      })
      .collect();

    let results = group_items(items, &min_size, &max_size);
    if results.len() <= 1 {
      continue;
    }
    debug!(
      chunk = chunk.index(),
      parts = results.len(),
      "max size: subdividing chunk"
    );

    let last = results.len() - 1;
    let original_name = graph.chunk(chunk).name.clone();
    for (index, group) in results.into_iter().enumerate() {
      let key_part = if options.hide_path_info {
        short_hash(&group.key)
      } else {
        group.key
      };
      let name = original_name
        .as_ref()
        .map(|base| compose_part_name(base, &delimiter, &key_part));

      if index == last {
        // The final group keeps the original chunk, renamed in place.
        graph.set_chunk_name(chunk, name);
        continue;
      }
      let new_chunk = graph.add_chunk(name.as_deref());
      graph.split(chunk, new_chunk);
      let reason = graph.chunk(chunk).reason.clone();
      graph.chunk_mut(new_chunk).reason = reason;
      splits += 1;
      for module_id in group.modules {
        if !modules.get(module_id).chunk_condition(new_chunk, graph) {
          continue;
        }
        graph.connect(new_chunk, module_id);
        graph.disconnect(chunk, module_id);
      }
    }
  }
  splits
}

fn compose_part_name(base: &str, delimiter: &str, key_part: &str) -> String {
  let mut name = format!("{base}{delimiter}{key_part}");
  if name.len() > MAX_NAME_LENGTH {
    let hash = short_hash(&name);
    let mut cut = MAX_NAME_LENGTH;
    while !name.is_char_boundary(cut) {
      cut -= 1;
    }
    name.truncate(cut);
    name.push_str(delimiter);
    name.push_str(&hash);
  }
  name
}

fn grouping_key(module: &dyn Module, delimiter: &str) -> String {
  let identifier = module.identifier();
  let base = match module.name_for_condition() {
    Some(name) => name.to_string(),
    None => REQUEST_TRIMMER.replace_all(identifier, "").into_owned(),
  };
  format!("{base}{delimiter}{}", short_hash(identifier))
}

fn module_sizes(module: &dyn Module) -> SizeMap {
  module
    .source_types()
    .iter()
    .map(|source_type| (source_type.clone(), module.size(source_type)))
    .collect()
}
