//! Cache keys derived from repository URLs.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use url::Url;

use crate::error::{CacheError, CacheResult};

/// Hex digits of the key kept in the directory name
const DIR_HASH_LEN: usize = 16;

fn unsafe_name_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"))
}

/// Normalize a repository URL so superficial spelling differences map to
/// the same key: surrounding whitespace, trailing slashes and a trailing
/// `.git` are removed, and URL hosts are lowercased.
pub fn normalize_repo_url(url: &str) -> CacheResult<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(CacheError::InvalidUrl(url.to_string()));
    }

    // scp-style remotes (git@host:org/repo) are not URLs and are kept verbatim
    let canonical = match Url::parse(trimmed) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => trimmed.to_string(),
    };

    let mut normalized = canonical.as_str();
    loop {
        let before = normalized.len();
        normalized = normalized.trim_end_matches('/');
        if let Some(stripped) = normalized.strip_suffix(".git") {
            normalized = stripped;
        }
        if normalized.len() == before {
            break;
        }
    }

    if normalized.is_empty() {
        return Err(CacheError::InvalidUrl(url.to_string()));
    }
    Ok(normalized.to_string())
}

/// SHA256 of the normalized URL, hex encoded
pub fn cache_key(normalized_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Human-readable repository name: the last path segment, sanitized.
pub fn repo_name(normalized_url: &str) -> String {
    let last = normalized_url
        .rsplit(|c: char| c == '/' || c == ':')
        .next()
        .unwrap_or_default();
    let name = unsafe_name_chars().replace_all(last, "_");
    let name = name.trim_start_matches('.');
    if name.is_empty() {
        "repo".to_string()
    } else {
        name.to_string()
    }
}

/// Directory name for a cache entry: `<repo name>-<key prefix>`
pub fn entry_dir_name(normalized_url: &str, key: &str) -> String {
    let prefix = &key[..DIR_HASH_LEN.min(key.len())];
    format!("{}-{}", repo_name(normalized_url), prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_spellings_agree() {
        let expected = "https://github.com/acme/webapp";
        for spelling in [
            "https://github.com/acme/webapp",
            "https://github.com/acme/webapp/",
            "https://github.com/acme/webapp.git",
            "https://github.com/acme/webapp.git/",
            "  https://GitHub.com/acme/webapp.git  ",
        ] {
            assert_eq!(normalize_repo_url(spelling).unwrap(), expected, "{}", spelling);
        }
    }

    #[test]
    fn test_normalize_scp_style() {
        assert_eq!(
            normalize_repo_url("git@github.com:acme/webapp.git").unwrap(),
            "git@github.com:acme/webapp"
        );
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert!(matches!(normalize_repo_url("   "), Err(CacheError::InvalidUrl(_))));
        assert!(matches!(normalize_repo_url("///"), Err(CacheError::InvalidUrl(_))));
    }

    #[test]
    fn test_cache_key_deterministic() {
        let a = cache_key("https://github.com/acme/webapp");
        assert_eq!(a.len(), 64);
        assert_eq!(a, cache_key("https://github.com/acme/webapp"));
        assert_ne!(a, cache_key("https://github.com/acme/api"));
    }

    #[test]
    fn test_repo_name() {
        assert_eq!(repo_name("https://github.com/acme/webapp"), "webapp");
        assert_eq!(repo_name("git@github.com:acme/my repo"), "my_repo");
        assert_eq!(repo_name("git@host:.."), "repo");
    }

    #[test]
    fn test_entry_dir_name_distinct_for_same_repo_name() {
        let a = "https://github.com/acme/webapp";
        let b = "https://gitlab.com/other/webapp";
        let dir_a = entry_dir_name(a, &cache_key(a));
        let dir_b = entry_dir_name(b, &cache_key(b));
        assert!(dir_a.starts_with("webapp-"));
        assert!(dir_b.starts_with("webapp-"));
        assert_ne!(dir_a, dir_b);
        assert_eq!(dir_a, entry_dir_name(a, &cache_key(a)));
    }
}
