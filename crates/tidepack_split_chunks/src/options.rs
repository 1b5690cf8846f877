//! User-facing configuration and its normalized form.
//!
//! Configuration is an in-memory structure: plain structs built with
//! struct-update syntax over [`Default`], validated once when the optimizer
//! is constructed. Everything downstream works on [`NormalizedOptions`],
//! where every size spec has been spread into a concrete per-type map.

use std::fmt;
use std::sync::Arc;

use anyhow::{ensure, Result};
use indexmap::IndexMap;
use regex::Regex;
use tidepack_core::chunk::ChunkId;
use tidepack_core::chunk_graph::ChunkGraph;
use tidepack_core::module::{Module, SourceType};

use crate::sizes::{merge_size_maps, SizeMap, SizeSpec};

pub type ModulePredicate = Arc<dyn Fn(&dyn Module) -> bool + Send + Sync>;
pub type ChunkPredicate = Arc<dyn Fn(ChunkId, &ChunkGraph) -> bool + Send + Sync>;
pub type NameResolver =
  Arc<dyn Fn(&dyn Module, &[ChunkId], &ChunkGraph, &str) -> Option<String> + Send + Sync>;

/// How a cache group decides whether a module belongs to it.
#[derive(Clone, Default)]
pub enum ModuleMatcher {
  /// Matches every module.
  #[default]
  Always,
  /// Matches no module. Lets a rule be switched off without deleting it.
  Never,
  /// Matches when the module's condition name starts with this prefix.
  Prefix(String),
  /// Matches when the pattern is found in the module's condition name.
  Pattern(Regex),
  /// Arbitrary predicate over the module.
  Predicate(ModulePredicate),
}

impl ModuleMatcher {
  /// Modules without a condition name never match a prefix or pattern.
  pub(crate) fn matches(&self, module: &dyn Module) -> bool {
    match self {
      ModuleMatcher::Always => true,
      ModuleMatcher::Never => false,
      ModuleMatcher::Prefix(prefix) => module
        .name_for_condition()
        .is_some_and(|name| name.starts_with(prefix.as_str())),
      ModuleMatcher::Pattern(pattern) => module
        .name_for_condition()
        .is_some_and(|name| pattern.is_match(name)),
      ModuleMatcher::Predicate(predicate) => predicate(module),
    }
  }
}

impl fmt::Debug for ModuleMatcher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModuleMatcher::Always => f.write_str("Always"),
      ModuleMatcher::Never => f.write_str("Never"),
      ModuleMatcher::Prefix(prefix) => f.debug_tuple("Prefix").field(prefix).finish(),
      ModuleMatcher::Pattern(pattern) => f.debug_tuple("Pattern").field(&pattern.as_str()).finish(),
      ModuleMatcher::Predicate(_) => f.write_str("Predicate(..)"),
    }
  }
}

/// Which chunks a rule considers drawing modules out of.
#[derive(Clone, Default)]
pub enum ChunkFilter {
  /// Every chunk.
  #[default]
  All,
  /// Chunks that can be loaded at startup.
  Initial,
  /// Chunks only ever loaded on demand.
  Async,
  /// Arbitrary predicate over the chunk.
  Predicate(ChunkPredicate),
}

impl ChunkFilter {
  pub(crate) fn accepts(&self, chunk: ChunkId, graph: &ChunkGraph) -> bool {
    match self {
      ChunkFilter::All => true,
      ChunkFilter::Initial => graph.can_be_initial(chunk),
      ChunkFilter::Async => !graph.can_be_initial(chunk),
      ChunkFilter::Predicate(predicate) => predicate(chunk, graph),
    }
  }
}

impl fmt::Debug for ChunkFilter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ChunkFilter::All => f.write_str("All"),
      ChunkFilter::Initial => f.write_str("Initial"),
      ChunkFilter::Async => f.write_str("Async"),
      ChunkFilter::Predicate(_) => f.write_str("Predicate(..)"),
    }
  }
}

/// Where a rule's chunk name comes from. Absent means the split chunk stays
/// unnamed and candidates are keyed by their chunk-set identity instead.
#[derive(Clone)]
pub enum ChunkName {
  /// Every match funnels into one chunk of this name.
  Fixed(String),
  /// Computed per module from the selected chunks and the rule key.
  Resolver(NameResolver),
}

impl fmt::Debug for ChunkName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ChunkName::Fixed(name) => f.debug_tuple("Fixed").field(name).finish(),
      ChunkName::Resolver(_) => f.write_str("Resolver(..)"),
    }
  }
}

impl From<&str> for ChunkName {
  fn from(name: &str) -> Self {
    ChunkName::Fixed(name.to_string())
  }
}

/// One named extraction rule, as users write it.
#[derive(Debug, Clone, Default)]
pub struct CacheGroupOptions {
  pub test: ModuleMatcher,
  /// Restricts the rule to modules carrying this source type.
  pub source_type: Option<SourceType>,
  pub priority: i32,
  /// Falls back to the global filter when absent.
  pub chunks: Option<ChunkFilter>,
  pub min_size: SizeSpec,
  pub min_size_reduction: SizeSpec,
  pub max_size: SizeSpec,
  pub min_chunks: Option<u32>,
  pub max_async_requests: Option<u32>,
  pub max_initial_requests: Option<u32>,
  pub automatic_name_delimiter: Option<String>,
  pub name: Option<ChunkName>,
  pub filename: Option<String>,
  /// Defaults to the rule key.
  pub id_hint: Option<String>,
  pub reuse_existing_chunk: bool,
  /// Bypasses the global minSize/minChunks/request defaults entirely instead
  /// of merging with them.
  pub enforce: bool,
}

/// Size constraints the max-size pass applies to chunks no explicit rule
/// constrained. Absent fields inherit the globals.
#[derive(Debug, Clone, Default)]
pub struct FallbackCacheGroupOptions {
  pub chunks: Option<ChunkFilter>,
  pub min_size: SizeSpec,
  pub max_size: SizeSpec,
  pub automatic_name_delimiter: Option<String>,
}

/// Top-level configuration of the split pass.
#[derive(Debug, Clone)]
pub struct SplitChunksOptions {
  pub chunks: ChunkFilter,
  /// Size types a uniform [`SizeSpec`] spreads over.
  pub default_size_types: Vec<SourceType>,
  pub min_size: SizeSpec,
  pub min_size_reduction: SizeSpec,
  pub max_size: SizeSpec,
  pub min_chunks: u32,
  /// `None` is unlimited.
  pub max_async_requests: Option<u32>,
  /// `None` is unlimited.
  pub max_initial_requests: Option<u32>,
  pub automatic_name_delimiter: String,
  /// Hash module paths out of generated chunk names.
  pub hide_path_info: bool,
  pub fallback_cache_group: FallbackCacheGroupOptions,
  /// Rules in declaration order. Order is observable: it decides candidate
  /// insertion order and thereby tie-breaks.
  pub cache_groups: IndexMap<String, CacheGroupOptions>,
}

impl Default for SplitChunksOptions {
  fn default() -> Self {
    Self {
      chunks: ChunkFilter::All,
      default_size_types: vec![SourceType::default()],
      min_size: SizeSpec::default(),
      min_size_reduction: SizeSpec::default(),
      max_size: SizeSpec::default(),
      min_chunks: 1,
      max_async_requests: None,
      max_initial_requests: None,
      automatic_name_delimiter: "~".to_string(),
      hide_path_info: false,
      fallback_cache_group: FallbackCacheGroupOptions::default(),
      cache_groups: IndexMap::new(),
    }
  }
}

impl SplitChunksOptions {
  /// Validates thresholds and spreads every size spec over the default size
  /// types.
  pub fn normalize(self) -> Result<NormalizedOptions> {
    ensure!(self.min_chunks >= 1, "`min_chunks` must be at least 1");
    ensure!(
      self.max_async_requests != Some(0),
      "`max_async_requests` must be at least 1"
    );
    ensure!(
      self.max_initial_requests != Some(0),
      "`max_initial_requests` must be at least 1"
    );
    ensure!(
      !self.automatic_name_delimiter.is_empty(),
      "`automatic_name_delimiter` must not be empty"
    );
    ensure!(
      !self.default_size_types.is_empty(),
      "`default_size_types` must name at least one size type"
    );
    ensure_non_negative("min_size", &self.min_size)?;
    ensure_non_negative("min_size_reduction", &self.min_size_reduction)?;
    ensure_non_negative("max_size", &self.max_size)?;
    ensure_non_negative(
      "fallback_cache_group.min_size",
      &self.fallback_cache_group.min_size,
    )?;
    ensure_non_negative(
      "fallback_cache_group.max_size",
      &self.fallback_cache_group.max_size,
    )?;

    let types = &self.default_size_types;
    let min_size = self.min_size.normalize(types);
    let min_size_reduction = self.min_size_reduction.normalize(types);
    let max_size = self.max_size.normalize(types);

    let mut rules = Vec::with_capacity(self.cache_groups.len());
    for (key, group) in &self.cache_groups {
      ensure!(!key.is_empty(), "cache group keys must not be empty");
      ensure!(
        group.min_chunks != Some(0),
        "cache group '{key}': `min_chunks` must be at least 1"
      );
      ensure!(
        group.max_async_requests != Some(0),
        "cache group '{key}': `max_async_requests` must be at least 1"
      );
      ensure!(
        group.max_initial_requests != Some(0),
        "cache group '{key}': `max_initial_requests` must be at least 1"
      );
      if let Some(delimiter) = &group.automatic_name_delimiter {
        ensure!(
          !delimiter.is_empty(),
          "cache group '{key}': `automatic_name_delimiter` must not be empty"
        );
      }
      ensure_non_negative(&format!("cache group '{key}' min_size"), &group.min_size)?;
      ensure_non_negative(
        &format!("cache group '{key}' min_size_reduction"),
        &group.min_size_reduction,
      )?;
      ensure_non_negative(&format!("cache group '{key}' max_size"), &group.max_size)?;

      rules.push(CacheGroupRule {
        key: key.clone(),
        test: group.test.clone(),
        source_type: group.source_type.clone(),
        priority: group.priority,
        chunks: group.chunks.clone(),
        min_size: group.min_size.normalize(types),
        min_size_reduction: group.min_size_reduction.normalize(types),
        max_size: group.max_size.normalize(types),
        min_chunks: group.min_chunks,
        max_async_requests: group.max_async_requests,
        max_initial_requests: group.max_initial_requests,
        automatic_name_delimiter: group.automatic_name_delimiter.clone(),
        name: group.name.clone(),
        filename: group.filename.clone(),
        id_hint: group.id_hint.clone(),
        reuse_existing_chunk: group.reuse_existing_chunk,
        enforce: group.enforce,
      });
    }

    let fallback = NormalizedFallback {
      chunks: self
        .fallback_cache_group
        .chunks
        .clone()
        .unwrap_or_else(|| self.chunks.clone()),
      min_size: merge_size_maps(
        &min_size,
        &self.fallback_cache_group.min_size.normalize(types),
      ),
      max_size: merge_size_maps(
        &max_size,
        &self.fallback_cache_group.max_size.normalize(types),
      ),
      automatic_name_delimiter: self
        .fallback_cache_group
        .automatic_name_delimiter
        .clone()
        .unwrap_or_else(|| self.automatic_name_delimiter.clone()),
    };

    Ok(NormalizedOptions {
      chunks: self.chunks,
      min_size,
      min_size_reduction,
      max_size,
      min_chunks: self.min_chunks,
      max_async_requests: self.max_async_requests,
      max_initial_requests: self.max_initial_requests,
      automatic_name_delimiter: self.automatic_name_delimiter,
      hide_path_info: self.hide_path_info,
      fallback,
      rules,
    })
  }
}

fn ensure_non_negative(label: &str, spec: &SizeSpec) -> Result<()> {
  let negative = match spec {
    SizeSpec::Uniform(value) => *value < 0.0,
    SizeSpec::PerType(map) => map.values().any(|value| *value < 0.0),
  };
  ensure!(!negative, "`{label}` must not be negative");
  Ok(())
}

/// Validated configuration. All thresholds are concrete [`SizeMap`]s.
#[derive(Debug)]
pub struct NormalizedOptions {
  pub(crate) chunks: ChunkFilter,
  pub(crate) min_size: SizeMap,
  pub(crate) min_size_reduction: SizeMap,
  pub(crate) max_size: SizeMap,
  pub(crate) min_chunks: u32,
  pub(crate) max_async_requests: Option<u32>,
  pub(crate) max_initial_requests: Option<u32>,
  pub(crate) automatic_name_delimiter: String,
  pub(crate) hide_path_info: bool,
  pub(crate) fallback: NormalizedFallback,
  pub(crate) rules: Vec<CacheGroupRule>,
}

/// A rule after size normalization, before the per-pass merge with the
/// global defaults.
#[derive(Debug)]
pub(crate) struct CacheGroupRule {
  pub(crate) key: String,
  pub(crate) test: ModuleMatcher,
  pub(crate) source_type: Option<SourceType>,
  pub(crate) priority: i32,
  pub(crate) chunks: Option<ChunkFilter>,
  pub(crate) min_size: SizeMap,
  pub(crate) min_size_reduction: SizeMap,
  pub(crate) max_size: SizeMap,
  pub(crate) min_chunks: Option<u32>,
  pub(crate) max_async_requests: Option<u32>,
  pub(crate) max_initial_requests: Option<u32>,
  pub(crate) automatic_name_delimiter: Option<String>,
  pub(crate) name: Option<ChunkName>,
  pub(crate) filename: Option<String>,
  pub(crate) id_hint: Option<String>,
  pub(crate) reuse_existing_chunk: bool,
  pub(crate) enforce: bool,
}

#[derive(Debug)]
pub(crate) struct NormalizedFallback {
  pub(crate) chunks: ChunkFilter,
  pub(crate) min_size: SizeMap,
  pub(crate) max_size: SizeMap,
  pub(crate) automatic_name_delimiter: String,
}
