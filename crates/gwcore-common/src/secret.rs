use std::fmt::Write as _;

use sha2::{Digest, Sha256};

/// Header names masked before any request/response record is persisted
/// (spec §7: "sensitive headers ... are masked before any error record is
/// persisted"). Matched case-insensitively.
const MASKED_HEADERS: &[&str] = &["authorization", "x-api-key", "cookie", "set-cookie", "proxy-authorization"];

/// Replaces the value of any masked header with `"***"`, leaving header
/// names and every other value untouched. Grounded on the teacher's
/// `maybe_redact_headers` in `gproxy-core::proxy_engine`.
pub fn mask_headers<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<(String, String)> {
    headers
        .into_iter()
        .map(|(name, value)| {
            let masked = if MASKED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                "***".to_string()
            } else {
                value.to_string()
            };
            (name.to_string(), masked)
        })
        .collect()
}

/// SHA-256 of a raw credential key, lowercase hex. Equality on credentials is
/// always tested on this hash, never on the raw key (spec invariant 3).
pub fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_lowercase_hex() {
        let a = hash_key("sk-live-abc123");
        let b = hash_key("sk-live-abc123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn different_keys_hash_differently() {
        assert_ne!(hash_key("key-one"), hash_key("key-two"));
    }

    #[test]
    fn masks_known_sensitive_headers_case_insensitively() {
        let masked = mask_headers([
            ("Authorization", "Bearer sk-live-abc"),
            ("X-Api-Key", "sk-live-abc"),
            ("Cookie", "session=abc"),
            ("content-type", "application/json"),
        ]);
        let find = |name: &str| masked.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.clone());
        assert_eq!(find("Authorization"), Some("***".to_string()));
        assert_eq!(find("X-Api-Key"), Some("***".to_string()));
        assert_eq!(find("Cookie"), Some("***".to_string()));
        assert_eq!(find("content-type"), Some("application/json".to_string()));
    }
}
