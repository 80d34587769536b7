//! Storage key derivation and validation.
//!
//! Client file names are untrusted. A storage key keeps only the final path
//! component of the name, restricted to `[A-Za-z0-9._-]`, and is prefixed with
//! a millisecond stamp that is strictly increasing within the process.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

const MAX_NAME_LEN: usize = 200;
const MAX_KEY_LEN: usize = 255;
const FALLBACK_NAME: &str = "file";

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Return the current time in milliseconds, bumped past the last stamp
/// handed out so two callers never receive the same value.
fn next_stamp() -> u64 {
    let now = Utc::now().timestamp_millis().max(0) as u64;
    match LAST_STAMP.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(now.max(last + 1))
    }) {
        Ok(prev) | Err(prev) => now.max(prev + 1),
    }
}

/// Reduce an untrusted file name to a filesystem-safe component.
pub fn sanitize_name(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or(original);

    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            c
        } else {
            '_'
        };
        // collapse runs of substitutes and of dots
        if (mapped == '_' && c != '_' && out.ends_with('_')) || (mapped == '.' && out.ends_with('.'))
        {
            continue;
        }
        out.push(mapped);
    }

    let mut name = out.trim_start_matches('.').to_string();
    name.truncate(MAX_NAME_LEN);
    if name.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        name
    }
}

/// Derive a fresh storage key for an uploaded file.
pub fn storage_key_for(original: &str) -> String {
    format!("{}-{}", next_stamp(), sanitize_name(original))
}

/// Check that a key taken from a request can be joined onto the storage
/// directory without escaping it or hitting a temp file.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.starts_with('.')
        && !key.contains("..")
        && !key
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn whitespace_becomes_underscores() {
        assert_eq!(sanitize_name("my holiday  video.mp4"), "my_holiday_video.mp4");
        assert_eq!(sanitize_name("tab\tname.pdf"), "tab_name.pdf");
    }

    #[test]
    fn existing_underscores_are_kept() {
        assert_eq!(sanitize_name("a__b.txt"), "a__b.txt");
    }

    #[test]
    fn path_segments_are_dropped() {
        assert_eq!(sanitize_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_name("/absolute/path/photo.png"), "photo.png");
        assert_eq!(sanitize_name("C:\\Users\\me\\doc.pdf"), "doc.pdf");
    }

    #[test]
    fn traversal_only_names_fall_back() {
        assert_eq!(sanitize_name(".."), FALLBACK_NAME);
        assert_eq!(sanitize_name("../"), FALLBACK_NAME);
        assert_eq!(sanitize_name(""), FALLBACK_NAME);
        assert_eq!(sanitize_name("   "), "_");
    }

    #[test]
    fn dots_are_collapsed_and_leading_dots_stripped() {
        assert_eq!(sanitize_name(".hidden"), "hidden");
        assert_eq!(sanitize_name("a..b"), "a.b");
        assert_eq!(sanitize_name("...x.mp4"), "x.mp4");
    }

    #[test]
    fn non_ascii_is_replaced() {
        assert_eq!(sanitize_name("café menu.pdf"), "caf_menu.pdf");
    }

    #[test]
    fn long_names_are_truncated() {
        let long = format!("{}.mp4", "a".repeat(500));
        assert_eq!(sanitize_name(&long).len(), MAX_NAME_LEN);
    }

    #[test]
    fn keys_are_prefixed_and_valid() {
        let key = storage_key_for("my file.mp4");
        let (stamp, name) = key.split_once('-').expect("stamp separator");
        assert!(stamp.parse::<u64>().is_ok());
        assert_eq!(name, "my_file.mp4");
        assert!(is_valid_key(&key));
    }

    #[test]
    fn hostile_names_still_produce_valid_keys() {
        for name in ["../../x", "..", "a/../../b", "\u{0}evil", ".env", "..\\..\\win.ini"] {
            let key = storage_key_for(name);
            assert!(is_valid_key(&key), "{name:?} produced {key:?}");
        }
    }

    #[test]
    fn keys_never_repeat() {
        let keys: HashSet<String> = (0..1000).map(|_| storage_key_for("same.png")).collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn keys_from_many_threads_never_repeat() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..200)
                        .map(|_| storage_key_for("clip.mov"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all = HashSet::new();
        for handle in handles {
            for key in handle.join().expect("thread") {
                assert!(all.insert(key));
            }
        }
        assert_eq!(all.len(), 1600);
    }

    #[test]
    fn request_keys_are_validated() {
        assert!(is_valid_key("1700000000000-photo.png"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("../secret"));
        assert!(!is_valid_key("a/b"));
        assert!(!is_valid_key("a\\b"));
        assert!(!is_valid_key(".tmp-123"));
        assert!(!is_valid_key("bad\nkey"));
        assert!(!is_valid_key(&"k".repeat(MAX_KEY_LEN + 1)));
    }
}
