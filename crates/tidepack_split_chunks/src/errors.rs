//! Fatal errors and soft conflicts surfaced by the split pass.
//!
//! Fatal errors abort the pass and must be treated as fatal to the enclosing
//! build; the graph may already be partially rewritten and there is no
//! rollback. Warnings are collected in the outcome and deduplicated by a
//! composite key so the same conflict is reported once per build, not once
//! per module.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SplitChunksError {
  /// The graph is still sealed from a previous pass. Callers re-running a
  /// build must reset the seal first.
  #[error("chunk graph has already been optimized for this seal")]
  AlreadyOptimized,

  /// An explicit filename is only legal for a chunk that is loaded
  /// exclusively at startup.
  #[error(
    "cache group '{cache_group}' declares a filename but produced a chunk that can be loaded on demand"
  )]
  FilenameOnNonInitialChunk { cache_group: String },
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SplitChunksWarning {
  /// A computed split name is already taken by a chunk the build named
  /// elsewhere. The pass keeps using the name, folding modules into the
  /// existing chunk.
  #[error("cache group '{cache_group}' computed the name '{name}' which is already used by another chunk")]
  NameCollision { cache_group: String, name: String },

  /// minSize exceeds maxSize in at least one dimension, so the floor wins
  /// and the ceiling cannot be honored.
  #[error("{}", min_max_label(.cache_groups, .keys))]
  MinSizeExceedsMaxSize {
    cache_groups: String,
    keys: Vec<String>,
  },
}

fn min_max_label(cache_groups: &str, keys: &[String]) -> String {
  format!(
    "cache group '{cache_groups}' has minSize larger than maxSize for {}; minSize takes effect",
    keys.join(", ")
  )
}
