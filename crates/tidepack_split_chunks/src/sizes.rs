//! Per-source-type size accounting.
//!
//! A module can contribute size under several named dimensions (for example
//! script and stylesheet output of the same module), so every threshold in
//! this crate is a map from [`SourceType`] to a scalar rather than a single
//! number.

use indexmap::IndexMap;
use tidepack_core::module::SourceType;

/// Canonical per-type sizes. Insertion ordered so diagnostics and grouping
/// ceilings list dimensions in a stable order.
pub type SizeMap = IndexMap<SourceType, f64>;

/// A size threshold as users write it: one number for every default size
/// type, or an explicit per-type map.
#[derive(Debug, Clone, PartialEq)]
pub enum SizeSpec {
  /// One value applied to every configured default size type.
  Uniform(f64),
  /// Explicit per-type values.
  PerType(SizeMap),
}

impl Default for SizeSpec {
  fn default() -> Self {
    SizeSpec::PerType(SizeMap::new())
  }
}

impl From<f64> for SizeSpec {
  fn from(value: f64) -> Self {
    SizeSpec::Uniform(value)
  }
}

impl From<SizeMap> for SizeSpec {
  fn from(map: SizeMap) -> Self {
    SizeSpec::PerType(map)
  }
}

impl SizeSpec {
  pub fn is_empty(&self) -> bool {
    match self {
      SizeSpec::Uniform(_) => false,
      SizeSpec::PerType(map) => map.is_empty(),
    }
  }

  /// Spreads a uniform spec over the configured default size types; explicit
  /// maps pass through unchanged.
  pub fn normalize(&self, default_size_types: &[SourceType]) -> SizeMap {
    match self {
      SizeSpec::Uniform(value) => default_size_types
        .iter()
        .map(|ty| (ty.clone(), *value))
        .collect(),
      SizeSpec::PerType(map) => map.clone(),
    }
  }
}

/// Keeps every key of `overrides` and fills the missing ones from `base`.
pub fn merge_size_maps(base: &SizeMap, overrides: &SizeMap) -> SizeMap {
  let mut merged = overrides.clone();
  for (key, value) in base {
    merged.entry(key.clone()).or_insert(*value);
  }
  merged
}

/// Element-wise union: `combine` is applied where both maps define a key,
/// the single present side is taken otherwise.
pub fn combine_size_maps(a: &SizeMap, b: &SizeMap, combine: impl Fn(f64, f64) -> f64) -> SizeMap {
  let mut combined = SizeMap::new();
  for (key, &left) in a {
    let value = match b.get(key) {
      Some(&right) => combine(left, right),
      None => left,
    };
    combined.insert(key.clone(), value);
  }
  for (key, &right) in b {
    if !a.contains_key(key) {
      combined.insert(key.clone(), right);
    }
  }
  combined
}

/// Whether `sizes` reaches `min_size` in every dimension the threshold
/// names. A dimension missing from `sizes` fails the check.
pub fn check_min_size(sizes: &SizeMap, min_size: &SizeMap) -> bool {
  min_size
    .iter()
    .all(|(key, threshold)| sizes.get(key).is_some_and(|size| size >= threshold))
}

/// Whether extracting `sizes` out of `chunk_count` chunks saves enough bytes
/// per dimension. Dimensions missing from `sizes` or sized zero are skipped.
pub fn check_min_size_reduction(
  sizes: &SizeMap,
  min_size_reduction: &SizeMap,
  chunk_count: usize,
) -> bool {
  min_size_reduction.iter().all(|(key, threshold)| {
    match sizes.get(key) {
      Some(&size) if size != 0.0 => size * chunk_count as f64 >= *threshold,
      _ => true,
    }
  })
}

/// Sum over all dimensions, the scalar used to rank split candidates.
pub fn total_size(sizes: &SizeMap) -> f64 {
  sizes.values().sum()
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn map(entries: &[(&str, f64)]) -> SizeMap {
    entries
      .iter()
      .map(|(key, value)| (SourceType::from(*key), *value))
      .collect()
  }

  #[test]
  fn uniform_specs_spread_over_default_size_types() {
    let types = vec![SourceType::default(), SourceType::from("css")];
    assert_eq!(
      SizeSpec::from(100.0).normalize(&types),
      map(&[("default", 100.0), ("css", 100.0)])
    );
    assert_eq!(
      SizeSpec::from(map(&[("css", 25.0)])).normalize(&types),
      map(&[("css", 25.0)])
    );
    assert_eq!(SizeSpec::default().normalize(&types), SizeMap::new());
    assert!(SizeSpec::default().is_empty());
    assert!(!SizeSpec::from(0.0).is_empty());
  }

  #[test]
  fn merging_prefers_the_override_and_fills_gaps() {
    let base = map(&[("default", 100.0), ("css", 50.0)]);
    let overrides = map(&[("css", 80.0)]);
    let merged = merge_size_maps(&base, &overrides);

    assert_eq!(merged, map(&[("css", 80.0), ("default", 100.0)]));
    let keys: Vec<&str> = merged.keys().map(SourceType::as_str).collect();
    assert_eq!(keys, vec!["css", "default"]);
  }

  #[test]
  fn combining_applies_the_combinator_only_where_both_sides_exist() {
    let a = map(&[("default", 10.0), ("css", 20.0)]);
    let b = map(&[("css", 5.0), ("wasm", 7.0)]);
    assert_eq!(
      combine_size_maps(&a, &b, f64::min),
      map(&[("default", 10.0), ("css", 5.0), ("wasm", 7.0)])
    );
    assert_eq!(
      combine_size_maps(&a, &b, f64::max),
      map(&[("default", 10.0), ("css", 20.0), ("wasm", 7.0)])
    );
  }

  #[test]
  fn min_size_fails_on_a_missing_dimension() {
    let sizes = map(&[("default", 100.0)]);
    assert!(check_min_size(&sizes, &map(&[("default", 50.0)])));
    assert!(!check_min_size(&sizes, &map(&[("default", 150.0)])));
    assert!(!check_min_size(
      &sizes,
      &map(&[("default", 50.0), ("css", 1.0)])
    ));
    assert!(check_min_size(&sizes, &SizeMap::new()));
  }

  #[test]
  fn min_size_reduction_skips_missing_and_zero_dimensions() {
    let threshold = map(&[("default", 1000.0)]);
    assert!(check_min_size_reduction(
      &map(&[("default", 500.0)]),
      &threshold,
      2
    ));
    assert!(!check_min_size_reduction(
      &map(&[("default", 499.0)]),
      &threshold,
      2
    ));
    assert!(check_min_size_reduction(&map(&[("css", 10.0)]), &threshold, 1));
    assert!(check_min_size_reduction(
      &map(&[("default", 0.0)]),
      &threshold,
      1
    ));
  }

  #[test]
  fn total_size_sums_all_dimensions() {
    assert_eq!(total_size(&map(&[("default", 10.0), ("css", 2.5)])), 12.5);
    assert_eq!(total_size(&SizeMap::new()), 0.0);
  }
}
