use indexmap::{IndexMap, IndexSet};

use crate::chunk::{Chunk, ChunkId};
use crate::chunk_group::{ChunkGroup, ChunkGroupId, ChunkGroupKind};
use crate::module::ModuleId;

/// Authoritative many-to-many relation between modules and chunks, plus the
/// relation between chunks and the groups they load in.
///
/// Every membership set is insertion ordered and iteration order is part of
/// the observable contract: generated names and split decisions depend on it.
#[derive(Debug, Default)]
pub struct ChunkGraph {
  chunks: Vec<Chunk>,
  groups: Vec<ChunkGroup>,

  chunk_modules: Vec<IndexSet<ModuleId>>,
  module_chunks: IndexMap<ModuleId, IndexSet<ChunkId>>,
  chunk_groups: Vec<IndexSet<ChunkGroupId>>,
  entry_modules: Vec<IndexSet<ModuleId>>,

  named_chunks: IndexMap<String, ChunkId>,
  entrypoints: IndexMap<String, ChunkGroupId>,

  sealed: bool,
}

impl ChunkGraph {
  pub fn new() -> Self {
    Self::default()
  }

  // ----------------------------
  // Chunks
  // ----------------------------

  /// Adds a chunk. Passing a name that is already taken returns the existing
  /// chunk instead of creating a second one.
  pub fn add_chunk(&mut self, name: Option<&str>) -> ChunkId {
    if let Some(name) = name {
      if let Some(&existing) = self.named_chunks.get(name) {
        return existing;
      }
    }
    let id = ChunkId(u32::try_from(self.chunks.len()).expect("too many chunks to key"));
    self.chunks.push(Chunk::new(name.map(str::to_string)));
    self.chunk_modules.push(IndexSet::new());
    self.chunk_groups.push(IndexSet::new());
    self.entry_modules.push(IndexSet::new());
    if let Some(name) = name {
      self.named_chunks.insert(name.to_string(), id);
    }
    id
  }

  pub fn chunk(&self, chunk: ChunkId) -> &Chunk {
    &self.chunks[chunk.index()]
  }

  pub fn chunk_mut(&mut self, chunk: ChunkId) -> &mut Chunk {
    &mut self.chunks[chunk.index()]
  }

  pub fn num_chunks(&self) -> usize {
    self.chunks.len()
  }

  pub fn chunk_ids(&self) -> impl Iterator<Item = ChunkId> {
    (0..self.chunks.len() as u32).map(ChunkId)
  }

  pub fn chunk_by_name(&self, name: &str) -> Option<ChunkId> {
    self.named_chunks.get(name).copied()
  }

  /// Renames a chunk while keeping the name index coherent. When the new
  /// name is already taken the index keeps its first owner and only the
  /// chunk's own field changes.
  pub fn set_chunk_name(&mut self, chunk: ChunkId, name: Option<String>) {
    if let Some(old) = self.chunks[chunk.index()].name.take() {
      if self.named_chunks.get(&old) == Some(&chunk) {
        self.named_chunks.shift_remove(&old);
      }
    }
    if let Some(name) = name {
      self.named_chunks.entry(name.clone()).or_insert(chunk);
      self.chunks[chunk.index()].name = Some(name);
    }
  }

  // ----------------------------
  // Module membership
  // ----------------------------

  pub fn connect(&mut self, chunk: ChunkId, module: ModuleId) {
    self.chunk_modules[chunk.index()].insert(module);
    self.module_chunks.entry(module).or_default().insert(chunk);
  }

  pub fn disconnect(&mut self, chunk: ChunkId, module: ModuleId) {
    self.chunk_modules[chunk.index()].shift_remove(&module);
    if let Some(chunks) = self.module_chunks.get_mut(&module) {
      chunks.shift_remove(&chunk);
    }
  }

  pub fn is_module_in_chunk(&self, module: ModuleId, chunk: ChunkId) -> bool {
    self.chunk_modules[chunk.index()].contains(&module)
  }

  pub fn chunk_modules(&self, chunk: ChunkId) -> impl Iterator<Item = ModuleId> + '_ {
    self.chunk_modules[chunk.index()].iter().copied()
  }

  pub fn num_chunk_modules(&self, chunk: ChunkId) -> usize {
    self.chunk_modules[chunk.index()].len()
  }

  pub fn module_chunks(&self, module: ModuleId) -> impl Iterator<Item = ChunkId> + '_ {
    self
      .module_chunks
      .get(&module)
      .into_iter()
      .flatten()
      .copied()
  }

  pub fn num_module_chunks(&self, module: ModuleId) -> usize {
    self.module_chunks.get(&module).map(IndexSet::len).unwrap_or(0)
  }

  // ----------------------------
  // Chunk groups
  // ----------------------------

  pub fn add_group(&mut self, kind: ChunkGroupKind) -> ChunkGroupId {
    let id = ChunkGroupId(u32::try_from(self.groups.len()).expect("too many chunk groups to key"));
    self.groups.push(ChunkGroup::new(kind));
    id
  }

  pub fn group(&self, group: ChunkGroupId) -> &ChunkGroup {
    &self.groups[group.index()]
  }

  pub fn connect_group(&mut self, group: ChunkGroupId, chunk: ChunkId) {
    let entry = &mut self.groups[group.index()];
    if !entry.chunks.contains(&chunk) {
      entry.chunks.push(chunk);
    }
    self.chunk_groups[chunk.index()].insert(group);
  }

  pub fn groups_of(&self, chunk: ChunkId) -> impl Iterator<Item = ChunkGroupId> + '_ {
    self.chunk_groups[chunk.index()].iter().copied()
  }

  /// Whether at least one owning group loads at startup.
  pub fn can_be_initial(&self, chunk: ChunkId) -> bool {
    self.chunk_groups[chunk.index()]
      .iter()
      .any(|group| self.groups[group.index()].is_initial())
  }

  /// Whether every owning group loads at startup. Vacuously true for a chunk
  /// in no groups, so callers usually pair this with [`Self::can_be_initial`].
  pub fn is_only_initial(&self, chunk: ChunkId) -> bool {
    self.chunk_groups[chunk.index()]
      .iter()
      .all(|group| self.groups[group.index()].is_initial())
  }

  /// Parallel requests needed to load this chunk: the widest owning group.
  pub fn requests(&self, chunk: ChunkId) -> u32 {
    self.chunk_groups[chunk.index()]
      .iter()
      .map(|group| self.groups[group.index()].chunks.len())
      .max()
      .unwrap_or(0) as u32
  }

  // ----------------------------
  // Entrypoints and entry modules
  // ----------------------------

  /// Registers `chunk` as the entry chunk of a new startup group.
  pub fn add_entrypoint(&mut self, name: &str, chunk: ChunkId) -> ChunkGroupId {
    let group = self.add_group(ChunkGroupKind::Entrypoint);
    self.connect_group(group, chunk);
    self.entrypoints.insert(name.to_string(), group);
    group
  }

  /// Unregisters an entrypoint and detaches its group from every chunk.
  pub fn remove_entrypoint(&mut self, name: &str) -> Option<ChunkGroupId> {
    let group = self.entrypoints.shift_remove(name)?;
    let chunks = std::mem::take(&mut self.groups[group.index()].chunks);
    for chunk in chunks {
      self.chunk_groups[chunk.index()].shift_remove(&group);
    }
    Some(group)
  }

  pub fn entrypoint(&self, name: &str) -> Option<ChunkGroupId> {
    self.entrypoints.get(name).copied()
  }

  pub fn entrypoints(&self) -> impl Iterator<Item = (&str, ChunkGroupId)> + '_ {
    self.entrypoints.iter().map(|(name, &group)| (name.as_str(), group))
  }

  pub fn add_entry_module(&mut self, chunk: ChunkId, module: ModuleId) {
    self.entry_modules[chunk.index()].insert(module);
  }

  pub fn num_entry_modules(&self, chunk: ChunkId) -> usize {
    self.entry_modules[chunk.index()].len()
  }

  /// Drops every entry module record of `chunk`.
  pub fn disconnect_entries(&mut self, chunk: ChunkId) {
    self.entry_modules[chunk.index()].clear();
  }

  // ----------------------------
  // Splitting
  // ----------------------------

  /// Makes `new_chunk` a sibling of `original`: it joins every group owning
  /// `original`, inserted right before it in load order, and inherits its id
  /// hints.
  pub fn split(&mut self, original: ChunkId, new_chunk: ChunkId) {
    let groups: Vec<ChunkGroupId> = self.chunk_groups[original.index()].iter().copied().collect();
    for group in groups {
      self.insert_chunk_before(group, new_chunk, original);
      self.chunk_groups[new_chunk.index()].insert(group);
    }
    let hints: Vec<String> = self.chunks[original.index()]
      .id_hints
      .iter()
      .cloned()
      .collect();
    self.chunks[new_chunk.index()].id_hints.extend(hints);
  }

  /// Inserts `chunk` directly before `before` in the group's load order,
  /// moving it forward when it already is a later member.
  fn insert_chunk_before(&mut self, group: ChunkGroupId, chunk: ChunkId, before: ChunkId) {
    let chunks = &mut self.groups[group.index()].chunks;
    let before_index = chunks
      .iter()
      .position(|&c| c == before)
      .expect("before chunk must be a group member");
    match chunks.iter().position(|&c| c == chunk) {
      Some(old_index) if old_index > before_index => {
        chunks.remove(old_index);
        chunks.insert(before_index, chunk);
      }
      Some(_) => {}
      None => chunks.insert(before_index, chunk),
    }
  }

  // ----------------------------
  // Seal guard
  // ----------------------------

  pub fn is_sealed(&self) -> bool {
    self.sealed
  }

  /// Claims the graph for a single optimization pass.
  pub fn seal(&mut self) {
    self.sealed = true;
  }

  /// Releases the claim so another pass may run.
  pub fn reset_seal(&mut self) {
    self.sealed = false;
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn module(id: u32) -> ModuleId {
    ModuleId(id)
  }

  #[test]
  fn add_chunk_deduplicates_names() {
    let mut graph = ChunkGraph::new();
    let first = graph.add_chunk(Some("vendors"));
    let again = graph.add_chunk(Some("vendors"));
    let unnamed = graph.add_chunk(None);

    assert_eq!(first, again);
    assert_ne!(first, unnamed);
    assert_eq!(graph.chunk_by_name("vendors"), Some(first));
    assert_eq!(graph.num_chunks(), 2);
  }

  #[test]
  fn membership_preserves_insertion_order_across_removals() {
    let mut graph = ChunkGraph::new();
    let chunk = graph.add_chunk(Some("main"));
    graph.connect(chunk, module(0));
    graph.connect(chunk, module(1));
    graph.connect(chunk, module(2));
    graph.disconnect(chunk, module(1));

    let members: Vec<ModuleId> = graph.chunk_modules(chunk).collect();
    assert_eq!(members, vec![module(0), module(2)]);
    assert!(graph.is_module_in_chunk(module(2), chunk));
    assert!(!graph.is_module_in_chunk(module(1), chunk));
    assert_eq!(graph.num_module_chunks(module(1)), 0);
  }

  #[test]
  fn split_inserts_before_original_and_copies_hints() {
    let mut graph = ChunkGraph::new();
    let before = graph.add_chunk(Some("runtime"));
    let original = graph.add_chunk(Some("main"));
    let after = graph.add_chunk(Some("styles"));
    let group = graph.add_group(ChunkGroupKind::Entrypoint);
    graph.connect_group(group, before);
    graph.connect_group(group, original);
    graph.connect_group(group, after);
    graph.chunk_mut(original).id_hints.insert("main".to_string());

    let shared = graph.add_chunk(Some("shared"));
    graph.split(original, shared);

    assert_eq!(graph.group(group).chunks, vec![before, shared, original, after]);
    assert!(graph.chunk(shared).id_hints.contains("main"));
    assert!(graph.groups_of(shared).any(|g| g == group));
  }

  #[test]
  fn split_moves_an_already_later_member_forward() {
    let mut graph = ChunkGraph::new();
    let original = graph.add_chunk(Some("main"));
    let shared = graph.add_chunk(Some("shared"));
    let group = graph.add_group(ChunkGroupKind::Dynamic);
    graph.connect_group(group, original);
    graph.connect_group(group, shared);

    graph.split(original, shared);

    assert_eq!(graph.group(group).chunks, vec![shared, original]);
  }

  #[test]
  fn requests_is_the_widest_owning_group() {
    let mut graph = ChunkGraph::new();
    let a = graph.add_chunk(Some("a"));
    let b = graph.add_chunk(Some("b"));
    let narrow = graph.add_group(ChunkGroupKind::Dynamic);
    graph.connect_group(narrow, a);
    let wide = graph.add_group(ChunkGroupKind::Dynamic);
    graph.connect_group(wide, a);
    graph.connect_group(wide, b);

    assert_eq!(graph.requests(a), 2);
    assert_eq!(graph.requests(b), 2);
    let orphan = graph.add_chunk(None);
    assert_eq!(graph.requests(orphan), 0);
  }

  #[test]
  fn initial_classification_follows_owning_groups() {
    let mut graph = ChunkGraph::new();
    let entry = graph.add_chunk(Some("main"));
    graph.add_entrypoint("main", entry);
    let lazy = graph.add_chunk(Some("lazy"));
    let dynamic = graph.add_group(ChunkGroupKind::Dynamic);
    graph.connect_group(dynamic, lazy);
    let both = graph.add_chunk(Some("both"));
    graph.connect_group(dynamic, both);
    graph.add_entrypoint("second", both);

    assert!(graph.can_be_initial(entry));
    assert!(graph.is_only_initial(entry));
    assert!(!graph.can_be_initial(lazy));
    assert!(graph.can_be_initial(both));
    assert!(!graph.is_only_initial(both));
  }

  #[test]
  fn remove_entrypoint_detaches_its_group() {
    let mut graph = ChunkGraph::new();
    let entry = graph.add_chunk(Some("main"));
    let group = graph.add_entrypoint("main", entry);
    graph.add_entry_module(entry, module(0));

    assert_eq!(graph.remove_entrypoint("main"), Some(group));
    assert_eq!(graph.entrypoint("main"), None);
    assert!(graph.groups_of(entry).next().is_none());
    assert!(graph.group(group).chunks.is_empty());
    assert_eq!(graph.remove_entrypoint("main"), None);

    graph.disconnect_entries(entry);
    assert_eq!(graph.num_entry_modules(entry), 0);
  }

  #[test]
  fn renaming_keeps_the_name_index_coherent() {
    let mut graph = ChunkGraph::new();
    let chunk = graph.add_chunk(Some("main"));
    graph.set_chunk_name(chunk, Some("main~a1b2c3d4".to_string()));

    assert_eq!(graph.chunk_by_name("main"), None);
    assert_eq!(graph.chunk_by_name("main~a1b2c3d4"), Some(chunk));
    assert_eq!(graph.chunk(chunk).name.as_deref(), Some("main~a1b2c3d4"));

    // The index keeps its first owner on a collision.
    let other = graph.add_chunk(Some("other"));
    graph.set_chunk_name(other, Some("main~a1b2c3d4".to_string()));
    assert_eq!(graph.chunk_by_name("main~a1b2c3d4"), Some(chunk));
    assert_eq!(graph.chunk(other).name.as_deref(), Some("main~a1b2c3d4"));
  }

  #[test]
  fn seal_guard_toggles() {
    let mut graph = ChunkGraph::new();
    assert!(!graph.is_sealed());
    graph.seal();
    assert!(graph.is_sealed());
    graph.reset_seal();
    assert!(!graph.is_sealed());
  }
}
