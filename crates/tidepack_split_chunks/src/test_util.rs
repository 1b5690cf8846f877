//! Hand-built graphs and configurable in-memory modules for the tests in
//! this crate.

use std::collections::HashMap;

use tidepack_core::chunk::ChunkId;
use tidepack_core::chunk_graph::ChunkGraph;
use tidepack_core::chunk_group::{ChunkGroupId, ChunkGroupKind};
use tidepack_core::module::{Module, ModuleId, ModuleList, SourceType};

use crate::{SplitChunksError, SplitChunksOptimizer, SplitChunksOptions, SplitChunksOutcome};

/// Test module with every knob the optimizer reads.
#[derive(Debug)]
pub(crate) struct TestModule {
  identifier: String,
  condition_name: Option<String>,
  source_types: Vec<SourceType>,
  sizes: HashMap<SourceType, f64>,
  rejected_chunk_names: Vec<String>,
}

impl TestModule {
  /// A module of `size` bytes under the default source type. The identifier
  /// doubles as the condition name until a builder call says otherwise.
  pub(crate) fn new(identifier: &str, size: f64) -> Self {
    let default_type = SourceType::default();
    Self {
      identifier: identifier.to_string(),
      condition_name: Some(identifier.to_string()),
      source_types: vec![default_type.clone()],
      sizes: HashMap::from([(default_type, size)]),
      rejected_chunk_names: Vec::new(),
    }
  }

  pub(crate) fn condition_name(mut self, name: &str) -> Self {
    self.condition_name = Some(name.to_string());
    self
  }

  /// Strips the condition name, like a module synthesized from raw source.
  pub(crate) fn no_condition_name(mut self) -> Self {
    self.condition_name = None;
    self
  }

  /// Adds `source_type` to the module with the given size.
  pub(crate) fn size(mut self, source_type: &str, size: f64) -> Self {
    let source_type = SourceType::from(source_type);
    if !self.source_types.contains(&source_type) {
      self.source_types.push(source_type.clone());
    }
    self.sizes.insert(source_type, size);
    self
  }

  /// Makes `chunk_condition` veto any chunk carrying this name.
  pub(crate) fn rejecting_chunks_named(mut self, name: &str) -> Self {
    self.rejected_chunk_names.push(name.to_string());
    self
  }
}

impl Module for TestModule {
  fn identifier(&self) -> &str {
    &self.identifier
  }

  fn name_for_condition(&self) -> Option<&str> {
    self.condition_name.as_deref()
  }

  fn source_types(&self) -> &[SourceType] {
    &self.source_types
  }

  fn size(&self, source_type: &SourceType) -> f64 {
    self.sizes.get(source_type).copied().unwrap_or(0.0)
  }

  fn chunk_condition(&self, chunk: ChunkId, graph: &ChunkGraph) -> bool {
    match &graph.chunk(chunk).name {
      Some(name) => !self.rejected_chunk_names.contains(name),
      None => true,
    }
  }
}

/// A chunk graph under construction plus the module arena backing it.
#[derive(Debug, Default)]
pub(crate) struct GraphFixture {
  pub(crate) graph: ChunkGraph,
  pub(crate) modules: ModuleList,
}

impl GraphFixture {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Named chunk registered as the entry chunk of an entrypoint of the same
  /// name, so it is only ever loaded at startup.
  pub(crate) fn entry_chunk(&mut self, name: &str) -> ChunkId {
    let chunk = self.graph.add_chunk(Some(name));
    self.graph.add_entrypoint(name, chunk);
    chunk
  }

  /// Named chunk in its own on-demand group.
  pub(crate) fn async_chunk(&mut self, name: &str) -> ChunkId {
    let chunk = self.graph.add_chunk(Some(name));
    let group = self.graph.add_group(ChunkGroupKind::Dynamic);
    self.graph.connect_group(group, chunk);
    chunk
  }

  /// Extra on-demand group over existing chunks. Widens the owning groups,
  /// which is what the request accounting reads.
  pub(crate) fn dynamic_group(&mut self, chunks: &[ChunkId]) -> ChunkGroupId {
    let group = self.graph.add_group(ChunkGroupKind::Dynamic);
    for &chunk in chunks {
      self.graph.connect_group(group, chunk);
    }
    group
  }

  pub(crate) fn module(&mut self, module: TestModule, chunks: &[ChunkId]) -> ModuleId {
    let id = self.modules.add(module);
    for &chunk in chunks {
      self.graph.connect(chunk, id);
    }
    id
  }

  /// Identifiers of a chunk's members, in membership order.
  pub(crate) fn members(&self, chunk: ChunkId) -> Vec<String> {
    self
      .graph
      .chunk_modules(chunk)
      .map(|id| self.modules.get(id).identifier().to_string())
      .collect()
  }

  pub(crate) fn run(&mut self, options: SplitChunksOptions) -> SplitChunksOutcome {
    self.try_run(options).expect("split pass failed")
  }

  pub(crate) fn try_run(
    &mut self,
    options: SplitChunksOptions,
  ) -> Result<SplitChunksOutcome, SplitChunksError> {
    let optimizer = SplitChunksOptimizer::new(options).expect("options should validate");
    optimizer.optimize(&mut self.graph, &self.modules)
  }
}
