//! Stable channel identifiers
//!
//! Ids must survive a reload of the same playlist so persisted favorites keep
//! pointing at the right channel. They are derived from the ASCII part of
//! `name + url`: SHA-256 over the concatenation, base64, alphanumerics only,
//! first 16 characters.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use tracing::warn;

pub const ID_LEN: usize = 16;

/// Derive the identifier for a channel. Never fails.
pub fn generate_id(name: &str, url: &str) -> String {
    let combined: String = name
        .chars()
        .chain(url.chars())
        .filter(char::is_ascii)
        .collect();

    if combined.is_empty() {
        warn!("Channel has no ASCII name or URL, using a one-off id");
        return fresh_id();
    }

    let digest = Sha256::digest(combined.as_bytes());
    STANDARD
        .encode(digest)
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(ID_LEN)
        .collect()
}

/// Time-based id with a random suffix for inputs that carry no identity.
fn fresh_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: String = std::iter::repeat_with(fastrand::alphanumeric).take(9).collect();
    format!("ch{}{}", millis, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_id_is_deterministic() {
        let a = generate_id("BBC One", "http://example.com/bbc1.m3u8");
        let b = generate_id("BBC One", "http://example.com/bbc1.m3u8");
        assert_eq!(a, b);
        assert_eq!(a.len(), ID_LEN);
    }

    #[test]
    fn test_id_distinguishes_names() {
        assert_ne!(generate_id("A", "x"), generate_id("B", "x"));
    }

    #[test]
    fn test_long_shared_prefix_does_not_collide() {
        let url = "http://provider.example.com/live/user/pass/";
        assert_ne!(
            generate_id("Discovery Channel East", url),
            generate_id("Discovery Channel West", url)
        );
    }

    #[test]
    fn test_non_ascii_is_ignored() {
        assert_eq!(generate_id("Canal Ñ", "http://x"), generate_id("Canal ", "http://x"));
    }

    #[test]
    fn test_fully_non_ascii_falls_back() {
        let a = generate_id("Канал", "");
        let b = generate_id("Канал", "");
        assert!(a.starts_with("ch"));
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn prop_id_is_pure_and_storage_safe(name in "[ -~]{1,40}", url in "[ -~]{0,80}") {
            let id = generate_id(&name, &url);
            prop_assert_eq!(&id, &generate_id(&name, &url));
            prop_assert_eq!(id.len(), ID_LEN);
            prop_assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }
}
