use indexmap::IndexSet;

/// Key of a chunk in the chunk graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub(crate) u32);

impl ChunkId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

/// Output bundle metadata. Module membership and group membership live in the
/// chunk graph, not here.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
  pub name: Option<String>,
  /// Why this chunk exists, surfaced in build reports.
  pub reason: Option<String>,
  /// Explicit output filename template. Only legal on chunks that load
  /// exclusively at startup.
  pub filename: Option<String>,
  /// Hints considered by downstream chunk id assignment.
  pub id_hints: IndexSet<String>,
}

impl Chunk {
  pub(crate) fn new(name: Option<String>) -> Self {
    Self {
      name,
      ..Self::default()
    }
  }

  /// Appends a reason fragment, comma separating any earlier ones.
  pub fn add_reason(&mut self, reason: &str) {
    match &mut self.reason {
      Some(existing) => {
        existing.push_str(", ");
        existing.push_str(reason);
      }
      None => self.reason = Some(reason.to_string()),
    }
  }
}
