use xxhash_rust::xxh3::xxh3_64;

/// Stable digest of a string, used wherever a generated name needs a
/// deterministic suffix.
///
/// Digests end up inside chunk names and therefore in output filenames, so
/// they must not vary across runs, machines or platforms.
pub fn hash_string(s: &str) -> String {
  hash_bytes(s.as_bytes())
}

pub fn hash_bytes(bytes: &[u8]) -> String {
  format!("{:016x}", xxh3_64(bytes))
}

/// First eight hex characters of [`hash_string`], the form embedded in
/// generated chunk names.
pub fn short_hash(s: &str) -> String {
  hash_string(s)[..8].to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn digests_are_stable_and_hex() {
    let digest = hash_string("src/pages/home.js");
    assert_eq!(digest, hash_string("src/pages/home.js"));
    assert_eq!(digest.len(), 16);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn short_form_is_a_prefix() {
    let digest = hash_string("src/pages/home.js");
    assert_eq!(short_hash("src/pages/home.js"), digest[..8]);
  }

  #[test]
  fn digests_differ_by_input() {
    assert_ne!(hash_string("a.js"), hash_string("b.js"));
  }
}
