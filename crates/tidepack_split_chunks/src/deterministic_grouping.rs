//! Deterministic, size-bounded partitioning of a module collection.
//!
//! Modules are sorted by a stable key and recursively bisected at the
//! adjacent-key pair of minimal similarity, so repeated runs over an
//! unchanged module set reproduce byte-identical groupings. Size floors win
//! over ceilings: a group that cannot be split without violating minSize is
//! emitted oversized.

use std::collections::HashSet;

use tidepack_core::module::{ModuleId, SourceType};

use crate::sizes::SizeMap;

/// A module with its grouping key and per-type size.
#[derive(Debug)]
pub(crate) struct GroupingItem {
  pub(crate) module: ModuleId,
  pub(crate) key: String,
  pub(crate) size: SizeMap,
}

/// One result group: a stable key plus the modules behind it, ordered by
/// their keys.
#[derive(Debug, PartialEq)]
pub(crate) struct GroupedModules {
  pub(crate) key: String,
  pub(crate) modules: Vec<ModuleId>,
}

#[derive(Debug)]
struct Group {
  nodes: Vec<GroupingItem>,
  /// `similarities[i]` relates `nodes[i]` and `nodes[i + 1]`.
  similarities: Vec<u32>,
  size: SizeMap,
}

impl Group {
  fn new(nodes: Vec<GroupingItem>, similarities: Vec<u32>) -> Self {
    let size = sum_size(&nodes);
    Self {
      nodes,
      similarities,
      size,
    }
  }

  /// Removes every node matching `filter`, stitching the similarity chain
  /// back together. Returns `None` when that would empty the group.
  fn pop_nodes(&mut self, filter: impl Fn(&GroupingItem) -> bool) -> Option<Vec<GroupingItem>> {
    if self.nodes.iter().all(&filter) {
      return None;
    }
    let old_similarities = std::mem::take(&mut self.similarities);
    let mut kept: Vec<GroupingItem> = Vec::new();
    let mut similarities: Vec<u32> = Vec::new();
    let mut popped: Vec<GroupingItem> = Vec::new();
    let mut previous_kept = false;
    for (index, node) in std::mem::take(&mut self.nodes).into_iter().enumerate() {
      if filter(&node) {
        popped.push(node);
        previous_kept = false;
      } else {
        if let Some(last) = kept.last() {
          let value = if previous_kept {
            old_similarities[index - 1]
          } else {
            similarity(&last.key, &node.key)
          };
          similarities.push(value);
        }
        kept.push(node);
        previous_kept = true;
      }
    }
    self.nodes = kept;
    self.similarities = similarities;
    self.size = sum_size(&self.nodes);
    Some(popped)
  }
}

/// Σ max(0, 10 - |a_i - b_i|) over the common UTF-16 prefix. Higher means
/// the keys are closer together.
fn similarity(a: &str, b: &str) -> u32 {
  a.encode_utf16()
    .zip(b.encode_utf16())
    .map(|(ca, cb)| {
      let distance = (i32::from(ca) - i32::from(cb)).abs();
      (10 - distance).max(0) as u32
    })
    .sum()
}

fn adjacent_similarities(nodes: &[GroupingItem]) -> Vec<u32> {
  nodes
    .windows(2)
    .map(|pair| similarity(&pair[0].key, &pair[1].key))
    .collect()
}

/// Shortest extension of the two keys' common prefix whose lowercase form
/// is not taken yet; falls back to the full first key.
fn common_prefix_name(a: &str, b: &str, used_names: &mut HashSet<String>) -> String {
  let a_units: Vec<u16> = a.encode_utf16().collect();
  let b_units: Vec<u16> = b.encode_utf16().collect();
  let limit = a_units.len().min(b_units.len());
  let mut i = 0;
  while i < limit {
    if a_units[i] != b_units[i] {
      i += 1;
      break;
    }
    i += 1;
  }
  while i < limit {
    let name = String::from_utf16_lossy(&a_units[..i]);
    if used_names.insert(name.to_lowercase()) {
      return name;
    }
    i += 1;
  }
  // Keys embed a hash, so the full key is unique without registration.
  a.to_string()
}

fn add_size(total: &mut SizeMap, size: &SizeMap) {
  for (key, value) in size {
    *total.entry(key.clone()).or_insert(0.0) += value;
  }
}

fn subtract_size(total: &mut SizeMap, size: &SizeMap) {
  for (key, value) in size {
    if let Some(entry) = total.get_mut(key) {
      *entry -= value;
    }
  }
}

fn sum_size(nodes: &[GroupingItem]) -> SizeMap {
  let mut sum = SizeMap::new();
  for node in nodes {
    add_size(&mut sum, &node.size);
  }
  sum
}

fn is_too_small(size: &SizeMap, min_size: &SizeMap) -> bool {
  size
    .iter()
    .any(|(key, &value)| value != 0.0 && min_size.get(key).is_some_and(|&min| value < min))
}

fn is_too_big(size: &SizeMap, max_size: &SizeMap) -> bool {
  size
    .iter()
    .any(|(key, &value)| value != 0.0 && max_size.get(key).is_some_and(|&max| value > max))
}

fn too_small_types(size: &SizeMap, min_size: &SizeMap) -> HashSet<SourceType> {
  size
    .iter()
    .filter(|(key, &value)| value != 0.0 && min_size.get(*key).is_some_and(|&min| value < min))
    .map(|(key, _)| key.clone())
    .collect()
}

fn matching_type_count(size: &SizeMap, types: &HashSet<SourceType>) -> usize {
  size
    .iter()
    .filter(|(key, &value)| value != 0.0 && types.contains(*key))
    .count()
}

fn selective_size_sum(size: &SizeMap, types: &HashSet<SourceType>) -> f64 {
  size
    .iter()
    .filter(|(key, &value)| value != 0.0 && types.contains(*key))
    .map(|(_, &value)| value)
    .sum()
}

/// Moves nodes of under-floor size types out of `group` and folds them into
/// the emitted group that best matches those types, or emits them as a new
/// undersized group when none does. Returns whether anything moved.
fn fold_undersized_types(
  group: &mut Group,
  considered_size: &SizeMap,
  min_size: &SizeMap,
  result: &mut Vec<Group>,
) -> bool {
  let problem_types = too_small_types(considered_size, min_size);
  if problem_types.is_empty() {
    return false;
  }
  let Some(problem_nodes) =
    group.pop_nodes(|node| matching_type_count(&node.size, &problem_types) > 0)
  else {
    return false;
  };

  let mut best: Option<usize> = None;
  for (index, candidate) in result.iter().enumerate() {
    let candidate_matches = matching_type_count(&candidate.size, &problem_types);
    if candidate_matches == 0 {
      continue;
    }
    best = Some(match best {
      None => index,
      Some(current) => {
        let current_matches = matching_type_count(&result[current].size, &problem_types);
        if current_matches != candidate_matches {
          if current_matches < candidate_matches {
            index
          } else {
            current
          }
        } else if selective_size_sum(&result[current].size, &problem_types)
          > selective_size_sum(&candidate.size, &problem_types)
        {
          index
        } else {
          current
        }
      }
    });
  }

  match best {
    Some(index) => {
      let target = &mut result[index];
      target.nodes.extend(problem_nodes);
      target.nodes.sort_by(|a, b| a.key.cmp(&b.key));
      target.size = sum_size(&target.nodes);
    }
    None => {
      // No emitted group carries these types; accept an undersized group.
      result.push(Group::new(problem_nodes, Vec::new()));
    }
  }
  true
}

/// Partitions `items` so no group exceeds `max_size` in any dimension while
/// keeping every group at or above `min_size` where feasible. Atomic items
/// above the ceiling become standalone groups.
pub(crate) fn group_items(
  items: Vec<GroupingItem>,
  min_size: &SizeMap,
  max_size: &SizeMap,
) -> Vec<GroupedModules> {
  let mut result: Vec<Group> = Vec::new();
  let mut nodes = items;
  nodes.sort_by(|a, b| a.key.cmp(&b.key));

  let mut initial_nodes: Vec<GroupingItem> = Vec::new();
  for node in nodes {
    // An oversized node that still meets every floor stands alone.
    if is_too_big(&node.size, max_size) && !is_too_small(&node.size, min_size) {
      result.push(Group::new(vec![node], Vec::new()));
    } else {
      initial_nodes.push(node);
    }
  }

  if !initial_nodes.is_empty() {
    let similarities = adjacent_similarities(&initial_nodes);
    let mut queue = vec![Group::new(initial_nodes, similarities)];

    while let Some(mut group) = queue.pop() {
      if !is_too_big(&group.size, max_size) {
        result.push(group);
        continue;
      }
      let considered = group.size.clone();
      if fold_undersized_types(&mut group, &considered, min_size, &mut result) {
        queue.push(group);
        continue;
      }

      // Scan minSize worth of nodes inward from both ends; any split point
      // must leave both scans intact, and at least one node per side.
      let mut left = 1usize;
      let mut left_size = group.nodes[0].size.clone();
      while left < group.nodes.len() && is_too_small(&left_size, min_size) {
        add_size(&mut left_size, &group.nodes[left].size);
        left += 1;
      }
      let mut right = group.nodes.len() as isize - 2;
      let mut right_size = group.nodes[group.nodes.len() - 1].size.clone();
      while right >= 0 && is_too_small(&right_size, min_size) {
        add_size(&mut right_size, &group.nodes[right as usize].size);
        right -= 1;
      }

      if left as isize - 1 > right {
        // The scans crossed: no split holds minSize on both sides. Try to
        // fold the deficient types away, otherwise keep the group oversized
        // since the floor outranks the ceiling.
        let prev_size = if right < (group.nodes.len() - left) as isize {
          subtract_size(&mut right_size, &group.nodes[(right + 1) as usize].size);
          right_size
        } else {
          subtract_size(&mut left_size, &group.nodes[left - 1].size);
          left_size
        };
        if fold_undersized_types(&mut group, &prev_size, min_size, &mut result) {
          queue.push(group);
        } else {
          result.push(group);
        }
        continue;
      }

      if left as isize <= right {
        // Between the borders, split where adjacent keys are least similar.
        let mut best = left - 1;
        let mut best_similarity = group.similarities[best];
        for i in left..=right as usize {
          if group.similarities[i] < best_similarity {
            best = i;
            best_similarity = group.similarities[i];
          }
        }
        left = best + 1;
      }

      let right_nodes = group.nodes.split_off(left);
      let right_similarities = group.similarities.split_off(left);
      group.similarities.truncate(left - 1);
      queue.push(Group::new(right_nodes, right_similarities));
      queue.push(Group::new(group.nodes, group.similarities));
    }
  }

  result.sort_by(|a, b| a.nodes[0].key.cmp(&b.nodes[0].key));

  let mut used_names: HashSet<String> = HashSet::new();
  result
    .into_iter()
    .map(|group| {
      let key = if group.nodes.len() == 1 {
        group.nodes[0].key.clone()
      } else {
        let first = &group.nodes[0];
        let last = &group.nodes[group.nodes.len() - 1];
        common_prefix_name(&first.key, &last.key, &mut used_names)
      };
      GroupedModules {
        key,
        modules: group.nodes.into_iter().map(|node| node.module).collect(),
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use tidepack_core::module::ModuleList;

  use super::*;
  use crate::test_util::TestModule;

  fn map(entries: &[(&str, f64)]) -> SizeMap {
    entries
      .iter()
      .map(|(key, value)| (SourceType::from(*key), *value))
      .collect()
  }

  fn item(modules: &mut ModuleList, key: &str, size: SizeMap) -> GroupingItem {
    let module = modules.add(TestModule::new(key, 0.0));
    GroupingItem {
      module,
      key: key.to_string(),
      size,
    }
  }

  #[test]
  fn similarity_rewards_shared_prefixes() {
    assert_eq!(similarity("abc", "abc"), 30);
    assert_eq!(similarity("a", "b"), 9);
    assert_eq!(similarity("a", "z"), 0);
    assert_eq!(similarity("abc", "ab"), 20);
    assert_eq!(similarity("", "anything"), 0);
  }

  #[test]
  fn prefix_names_extend_past_collisions() {
    let mut used = HashSet::new();
    assert_eq!(common_prefix_name("alpha", "beta", &mut used), "a");
    assert_eq!(common_prefix_name("alpha", "beta", &mut used), "al");
    // Dedup is case-insensitive.
    assert_eq!(common_prefix_name("ALpine", "beta", &mut used), "ALp");
    // Exhausted prefixes fall back to the full first key.
    assert_eq!(common_prefix_name("ab", "zz", &mut used), "ab");
  }

  #[test]
  fn equal_sized_modules_split_down_to_singles() {
    let mut modules = ModuleList::new();
    let items = vec![
      item(&mut modules, "app~a1b2c3d4", map(&[("default", 300.0)])),
      item(&mut modules, "app~b2c3d4e5", map(&[("default", 300.0)])),
      item(&mut modules, "app~c3d4e5f6", map(&[("default", 300.0)])),
    ];
    let groups = group_items(items, &map(&[("default", 30.0)]), &map(&[("default", 300.0)]));

    let keys: Vec<&str> = groups.iter().map(|group| group.key.as_str()).collect();
    assert_eq!(keys, vec!["app~a1b2c3d4", "app~b2c3d4e5", "app~c3d4e5f6"]);
    assert!(groups.iter().all(|group| group.modules.len() == 1));
  }

  #[test]
  fn splits_happen_at_the_least_similar_adjacent_pair() {
    let mut modules = ModuleList::new();
    let items = vec![
      item(&mut modules, "aaaa1", map(&[("default", 100.0)])),
      item(&mut modules, "aaaa2", map(&[("default", 100.0)])),
      item(&mut modules, "zzzz1", map(&[("default", 100.0)])),
      item(&mut modules, "zzzz2", map(&[("default", 100.0)])),
    ];
    let groups = group_items(items, &map(&[("default", 50.0)]), &map(&[("default", 250.0)]));

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].key, "aaaa1");
    assert_eq!(groups[0].modules.len(), 2);
    assert_eq!(groups[1].key, "zzzz1");
    assert_eq!(groups[1].modules.len(), 2);
  }

  #[test]
  fn unsplittable_groups_stay_oversized() {
    let mut modules = ModuleList::new();
    let items = vec![
      item(&mut modules, "left", map(&[("default", 90.0)])),
      item(&mut modules, "right", map(&[("default", 90.0)])),
    ];
    // Both halves of any split would undercut the floor of 100.
    let groups = group_items(items, &map(&[("default", 100.0)]), &map(&[("default", 120.0)]));

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].modules.len(), 2);
  }

  #[test]
  fn oversized_nodes_that_meet_the_floor_stand_alone() {
    let mut modules = ModuleList::new();
    let items = vec![
      item(&mut modules, "huge", map(&[("default", 1000.0)])),
      item(&mut modules, "small-a", map(&[("default", 60.0)])),
      item(&mut modules, "small-b", map(&[("default", 60.0)])),
    ];
    let groups = group_items(items, &map(&[("default", 100.0)]), &map(&[("default", 500.0)]));

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].key, "huge");
    assert_eq!(groups[0].modules.len(), 1);
    assert_eq!(groups[1].modules.len(), 2);
  }

  #[test]
  fn undersized_types_fold_into_the_best_matching_group() {
    let mut modules = ModuleList::new();
    let items = vec![
      item(&mut modules, "style/base", map(&[("css", 600.0)])),
      item(&mut modules, "code/a", map(&[("js", 400.0)])),
      item(&mut modules, "code/b", map(&[("js", 400.0)])),
      item(&mut modules, "style/app", map(&[("css", 30.0)])),
    ];
    let groups = group_items(
      items,
      &map(&[("js", 100.0), ("css", 50.0)]),
      &map(&[("js", 500.0), ("css", 500.0)]),
    );

    // The 30-byte stylesheet cannot hold the css floor anywhere in the
    // working set, so it joins the standalone oversized css group.
    let keys: Vec<&str> = groups.iter().map(|group| group.key.as_str()).collect();
    assert_eq!(keys, vec!["code/a", "code/b", "style/a"]);
    assert_eq!(groups[2].modules.len(), 2);
  }
}
