//! Shared-chunk extraction for the tidepack bundler.
//!
//! The optimizer takes a chunk graph whose modules already sit in output
//! chunks and pulls modules that repeat across several chunks out into new
//! shared chunks, within the size and request budgets configured through
//! [`SplitChunksOptions`]. Oversized results are then subdivided along
//! name-similarity boundaries so emitted files stay under their ceilings.
//!
//! A pass runs synchronously over one exclusively borrowed graph:
//!
//! ```ignore
//! let optimizer = SplitChunksOptimizer::new(options)?;
//! let outcome = optimizer.optimize(&mut chunk_graph, &modules)?;
//! ```

mod cache_group;
mod candidates;
mod chunk_sets;
mod deterministic_grouping;
pub mod errors;
mod max_size;
pub mod options;
mod pass;
pub mod sizes;

#[cfg(test)]
mod test_util;

use anyhow::Context;
use serde::Serialize;
use tidepack_core::chunk_graph::ChunkGraph;
use tidepack_core::module::ModuleList;

pub use crate::errors::{SplitChunksError, SplitChunksWarning};
pub use crate::options::{
  CacheGroupOptions, ChunkFilter, ChunkName, FallbackCacheGroupOptions, ModuleMatcher,
  SplitChunksOptions,
};
pub use crate::sizes::{SizeMap, SizeSpec};

use crate::options::NormalizedOptions;
use crate::pass::SplitChunksPass;

/// Counters describing what one pass did, for logs and assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitChunksStats {
  /// Modules in the arena when the pass ran.
  pub modules: usize,
  /// Chunks in the graph after the pass, including everything it created.
  pub chunks: usize,
  /// Split candidates assembled during the scan phase.
  pub candidates: usize,
  /// Candidates dropped for missing a threshold or losing their modules.
  pub discarded_candidates: usize,
  pub created_chunks: usize,
  /// Candidates that landed in a chunk that already existed.
  pub reused_chunks: usize,
  /// Extra chunks produced by subdividing oversized results.
  pub max_size_splits: usize,
}

/// What a pass hands back besides the mutated graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SplitChunksOutcome {
  /// Soft conflicts, deduplicated. The pass completed despite these.
  pub warnings: Vec<SplitChunksWarning>,
  pub stats: SplitChunksStats,
}

/// Entry point of the optimization. Holds the validated configuration and
/// can be applied to any number of independent graphs.
#[derive(Debug)]
pub struct SplitChunksOptimizer {
  options: NormalizedOptions,
}

impl SplitChunksOptimizer {
  pub fn new(options: SplitChunksOptions) -> anyhow::Result<Self> {
    let options = options
      .normalize()
      .context("normalizing split chunks options")?;
    Ok(Self { options })
  }

  /// Runs one pass over `graph`. The graph is sealed on entry and stays
  /// sealed, so a repeated run without [`ChunkGraph::reset_seal`] returns
  /// [`SplitChunksError::AlreadyOptimized`] instead of splitting twice.
  pub fn optimize(
    &self,
    graph: &mut ChunkGraph,
    modules: &ModuleList,
  ) -> Result<SplitChunksOutcome, SplitChunksError> {
    SplitChunksPass::new(&self.options, modules).run(graph)
  }
}
