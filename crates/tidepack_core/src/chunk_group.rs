use crate::chunk::ChunkId;

/// Key of a chunk group in the chunk graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkGroupId(pub(crate) u32);

impl ChunkGroupId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

/// How a group's chunks get loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkGroupKind {
  /// Loaded eagerly at application startup.
  Entrypoint,
  /// Loaded on demand.
  Dynamic,
}

/// Chunks that load together, in load order.
#[derive(Debug, Clone)]
pub struct ChunkGroup {
  pub kind: ChunkGroupKind,
  /// Splitting a member inserts the split-off chunk right before it, so
  /// shared code is requested ahead of the code depending on it.
  pub chunks: Vec<ChunkId>,
}

impl ChunkGroup {
  pub fn new(kind: ChunkGroupKind) -> Self {
    Self {
      kind,
      chunks: Vec::new(),
    }
  }

  pub fn is_initial(&self) -> bool {
    matches!(self.kind, ChunkGroupKind::Entrypoint)
  }
}
