//! Evaluates which cache groups apply to a module and materializes the
//! concrete, defaults-merged form of each matching rule.

use tidepack_core::module::Module;

use crate::chunk_sets::FilterKey;
use crate::options::{ChunkFilter, ChunkName, NormalizedOptions};
use crate::sizes::{merge_size_maps, SizeMap};

/// Key of a resolved cache group in the resolver's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheGroupId(u32);

impl CacheGroupId {
  pub(crate) fn index(self) -> usize {
    self.0 as usize
  }
}

/// A rule merged with the global defaults. `enforce: true` rules take their
/// own minSize/minChunks/request fields verbatim, unset meaning unlimited,
/// instead of falling back to the globals.
#[derive(Debug)]
pub struct CacheGroup {
  pub key: String,
  pub priority: i32,
  pub chunks: ChunkFilter,
  pub min_size: SizeMap,
  pub min_size_reduction: SizeMap,
  pub max_size: SizeMap,
  pub min_chunks: u32,
  pub max_async_requests: Option<u32>,
  pub max_initial_requests: Option<u32>,
  pub name: Option<ChunkName>,
  pub automatic_name_delimiter: String,
  pub filename: Option<String>,
  pub id_hint: String,
  pub reuse_existing_chunk: bool,
  pub(crate) filter_key: FilterKey,
  /// Candidates only accumulate sizes for groups that can fail a size
  /// threshold.
  pub(crate) track_sizes: bool,
}

/// Resolves rules lazily and caches one [`CacheGroup`] per rule for the
/// duration of a pass.
#[derive(Debug)]
pub(crate) struct CacheGroupResolver<'a> {
  options: &'a NormalizedOptions,
  groups: Vec<CacheGroup>,
  by_rule: Vec<Option<CacheGroupId>>,
}

impl<'a> CacheGroupResolver<'a> {
  pub(crate) fn new(options: &'a NormalizedOptions) -> Self {
    Self {
      options,
      groups: Vec::new(),
      by_rule: vec![None; options.rules.len()],
    }
  }

  /// Matching rules in declaration order.
  pub(crate) fn matching_groups(&mut self, module: &dyn Module) -> Vec<CacheGroupId> {
    let options = self.options;
    let mut matched = Vec::new();
    for (index, rule) in options.rules.iter().enumerate() {
      if !rule.test.matches(module) {
        continue;
      }
      if let Some(source_type) = &rule.source_type {
        if !module.source_types().contains(source_type) {
          continue;
        }
      }
      matched.push(self.resolve(index));
    }
    matched
  }

  pub(crate) fn group(&self, id: CacheGroupId) -> &CacheGroup {
    &self.groups[id.index()]
  }

  fn resolve(&mut self, rule_index: usize) -> CacheGroupId {
    if let Some(id) = self.by_rule[rule_index] {
      return id;
    }
    let options = self.options;
    let rule = &options.rules[rule_index];

    let chunks = rule
      .chunks
      .clone()
      .unwrap_or_else(|| options.chunks.clone());
    let filter_key = match &rule.chunks {
      Some(filter) => FilterKey::for_rule(filter, rule_index as u32),
      None => FilterKey::for_global(&options.chunks),
    };

    let min_size = if rule.enforce {
      rule.min_size.clone()
    } else {
      merge_size_maps(&options.min_size, &rule.min_size)
    };
    let min_size_reduction = if rule.enforce {
      rule.min_size_reduction.clone()
    } else {
      merge_size_maps(&options.min_size_reduction, &rule.min_size_reduction)
    };
    // maxSize constrains output size, not whether a split happens, so it
    // merges with the global ceiling even under `enforce`.
    let max_size = merge_size_maps(&options.max_size, &rule.max_size);

    let min_chunks = match rule.min_chunks {
      Some(value) => value,
      None if rule.enforce => 1,
      None => options.min_chunks,
    };
    let max_async_requests = if rule.enforce {
      rule.max_async_requests
    } else {
      rule.max_async_requests.or(options.max_async_requests)
    };
    let max_initial_requests = if rule.enforce {
      rule.max_initial_requests
    } else {
      rule.max_initial_requests.or(options.max_initial_requests)
    };

    let track_sizes = !min_size.is_empty() || !min_size_reduction.is_empty();
    let group = CacheGroup {
      key: rule.key.clone(),
      priority: rule.priority,
      chunks,
      min_size,
      min_size_reduction,
      max_size,
      min_chunks,
      max_async_requests,
      max_initial_requests,
      name: rule.name.clone(),
      automatic_name_delimiter: rule
        .automatic_name_delimiter
        .clone()
        .unwrap_or_else(|| options.automatic_name_delimiter.clone()),
      filename: rule.filename.clone(),
      id_hint: rule.id_hint.clone().unwrap_or_else(|| rule.key.clone()),
      reuse_existing_chunk: rule.reuse_existing_chunk,
      filter_key,
      track_sizes,
    };

    let id = CacheGroupId(u32::try_from(self.groups.len()).expect("too many cache groups to key"));
    self.groups.push(group);
    self.by_rule[rule_index] = Some(id);
    id
  }
}

#[cfg(test)]
mod tests {
  use indexmap::IndexMap;
  use pretty_assertions::assert_eq;
  use tidepack_core::module::SourceType;

  use super::*;
  use crate::options::{CacheGroupOptions, ModuleMatcher, SplitChunksOptions};
  use crate::sizes::SizeSpec;
  use crate::test_util::TestModule;

  fn options_with(groups: Vec<(&str, CacheGroupOptions)>) -> NormalizedOptions {
    SplitChunksOptions {
      min_size: SizeSpec::from(100.0),
      min_chunks: 2,
      max_async_requests: Some(5),
      max_size: SizeSpec::from(500.0),
      cache_groups: groups
        .into_iter()
        .map(|(key, group)| (key.to_string(), group))
        .collect(),
      ..Default::default()
    }
    .normalize()
    .unwrap()
  }

  #[test]
  fn matching_rules_come_back_in_declaration_order() {
    let options = options_with(vec![
      (
        "styles",
        CacheGroupOptions {
          test: ModuleMatcher::Prefix("./styles/".to_string()),
          ..Default::default()
        },
      ),
      ("everything", CacheGroupOptions::default()),
    ]);
    let mut resolver = CacheGroupResolver::new(&options);

    let styled = TestModule::new("./styles/app.css", 10.0);
    let keys: Vec<String> = resolver
      .matching_groups(&styled)
      .iter()
      .map(|&id| resolver.group(id).key.clone())
      .collect();
    assert_eq!(keys, vec!["styles", "everything"]);

    let plain = TestModule::new("./src/index.js", 10.0);
    let keys: Vec<String> = resolver
      .matching_groups(&plain)
      .iter()
      .map(|&id| resolver.group(id).key.clone())
      .collect();
    assert_eq!(keys, vec!["everything"]);
  }

  #[test]
  fn source_type_constraints_gate_matches() {
    let options = options_with(vec![(
      "styles",
      CacheGroupOptions {
        source_type: Some(SourceType::from("css")),
        ..Default::default()
      },
    )]);
    let mut resolver = CacheGroupResolver::new(&options);

    let script = TestModule::new("a.js", 10.0);
    assert!(resolver.matching_groups(&script).is_empty());

    let styled = TestModule::new("a.css", 0.0).size("css", 5.0);
    assert_eq!(resolver.matching_groups(&styled).len(), 1);
  }

  #[test]
  fn soft_rules_merge_with_the_globals() {
    let options = options_with(vec![(
      "vendors",
      CacheGroupOptions {
        min_size: SizeSpec::PerType(IndexMap::from([(SourceType::from("css"), 30.0)])),
        ..Default::default()
      },
    )]);
    let mut resolver = CacheGroupResolver::new(&options);
    let module = TestModule::new("a.js", 10.0);
    let id = resolver.matching_groups(&module)[0];
    let group = resolver.group(id);

    assert_eq!(group.min_size[&SourceType::from("css")], 30.0);
    assert_eq!(group.min_size[&SourceType::default()], 100.0);
    assert_eq!(group.min_chunks, 2);
    assert_eq!(group.max_async_requests, Some(5));
    assert_eq!(group.id_hint, "vendors");
    assert!(group.track_sizes);
  }

  #[test]
  fn enforced_rules_bypass_the_globals_but_keep_max_size() {
    let options = options_with(vec![(
      "forced",
      CacheGroupOptions {
        enforce: true,
        ..Default::default()
      },
    )]);
    let mut resolver = CacheGroupResolver::new(&options);
    let module = TestModule::new("a.js", 10.0);
    let id = resolver.matching_groups(&module)[0];
    let group = resolver.group(id);

    assert!(group.min_size.is_empty());
    assert_eq!(group.min_chunks, 1);
    assert_eq!(group.max_async_requests, None);
    assert_eq!(group.max_initial_requests, None);
    assert_eq!(group.max_size[&SourceType::default()], 500.0);
    assert!(!group.track_sizes);
  }

  #[test]
  fn enforced_rules_keep_their_own_thresholds() {
    let options = options_with(vec![(
      "forced",
      CacheGroupOptions {
        enforce: true,
        min_chunks: Some(3),
        min_size: SizeSpec::from(7.0),
        ..Default::default()
      },
    )]);
    let mut resolver = CacheGroupResolver::new(&options);
    let module = TestModule::new("a.js", 10.0);
    let id = resolver.matching_groups(&module)[0];
    let group = resolver.group(id);

    assert_eq!(group.min_chunks, 3);
    assert_eq!(group.min_size[&SourceType::default()], 7.0);
    assert!(group.track_sizes);
  }

  #[test]
  fn resolution_is_cached_per_rule() {
    let options = options_with(vec![("everything", CacheGroupOptions::default())]);
    let mut resolver = CacheGroupResolver::new(&options);
    let a = TestModule::new("a.js", 10.0);
    let b = TestModule::new("b.js", 10.0);

    let first = resolver.matching_groups(&a)[0];
    let second = resolver.matching_groups(&b)[0];
    assert_eq!(first, second);
  }
}
