use std::fmt;

use crate::chunk::ChunkId;
use crate::chunk_graph::ChunkGraph;

/// Output dimension a module contributes bytes to.
///
/// Sizes, thresholds and ceilings are tracked per source type, so one chunk
/// can respect separate limits for e.g. its javascript and css payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceType(String);

impl SourceType {
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl Default for SourceType {
  fn default() -> Self {
    Self("default".into())
  }
}

impl fmt::Display for SourceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for SourceType {
  fn from(name: &str) -> Self {
    Self(name.into())
  }
}

/// Build artifact participating in chunk assignment.
///
/// Implemented by the host build; optimizers only read these accessors and
/// never mutate a module. `identifier` must be unique and stable because it
/// drives every deterministic ordering and generated name.
pub trait Module: fmt::Debug {
  fn identifier(&self) -> &str;

  /// Human meaningful name used by matchers and derived chunk names, usually
  /// the resolved file path without loaders or query strings.
  fn name_for_condition(&self) -> Option<&str> {
    None
  }

  /// Output dimensions this module contributes to.
  fn source_types(&self) -> &[SourceType];

  /// Byte size contributed to one source type.
  fn size(&self, source_type: &SourceType) -> f64;

  /// Whether the runtime tolerates this module failing to load.
  fn is_optional(&self) -> bool {
    false
  }

  /// Placement veto: returning false keeps this module out of `chunk`.
  fn chunk_condition(&self, _chunk: ChunkId, _graph: &ChunkGraph) -> bool {
    true
  }
}

/// Key of a module in a [`ModuleList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) u32);

impl ModuleId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

/// Arena of the host build's modules. Ids are dense and assigned in
/// insertion order, which is also the order optimizers visit modules in.
#[derive(Debug, Default)]
pub struct ModuleList {
  modules: Vec<Box<dyn Module>>,
}

impl ModuleList {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, module: impl Module + 'static) -> ModuleId {
    self.push(Box::new(module))
  }

  pub fn push(&mut self, module: Box<dyn Module>) -> ModuleId {
    let id = ModuleId(u32::try_from(self.modules.len()).expect("too many modules to key"));
    self.modules.push(module);
    id
  }

  pub fn get(&self, id: ModuleId) -> &dyn Module {
    self.modules[id.index()].as_ref()
  }

  pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &dyn Module)> + '_ {
    self
      .modules
      .iter()
      .enumerate()
      .map(|(index, module)| (ModuleId(index as u32), module.as_ref()))
  }

  pub fn len(&self) -> usize {
    self.modules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.modules.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug)]
  struct PlainModule {
    identifier: String,
    source_types: Vec<SourceType>,
  }

  impl Module for PlainModule {
    fn identifier(&self) -> &str {
      &self.identifier
    }

    fn source_types(&self) -> &[SourceType] {
      &self.source_types
    }

    fn size(&self, _source_type: &SourceType) -> f64 {
      1.0
    }
  }

  fn plain(identifier: &str) -> PlainModule {
    PlainModule {
      identifier: identifier.to_string(),
      source_types: vec![SourceType::default()],
    }
  }

  #[test]
  fn arena_assigns_dense_ids_in_insertion_order() {
    let mut modules = ModuleList::new();
    let a = modules.add(plain("a.js"));
    let b = modules.add(plain("b.js"));

    assert_eq!(a.index(), 0);
    assert_eq!(b.index(), 1);
    assert_eq!(modules.get(b).identifier(), "b.js");

    let order: Vec<&str> = modules.iter().map(|(_, m)| m.identifier()).collect();
    assert_eq!(order, vec!["a.js", "b.js"]);
  }

  #[test]
  fn default_hooks_are_permissive() {
    let module = plain("a.js");
    let graph = ChunkGraph::new();
    assert!(module.name_for_condition().is_none());
    assert!(!module.is_optional());
    assert!(module.chunk_condition(ChunkId(0), &graph));
  }
}
