use std::collections::HashMap;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

/// Read-through cache for GET responses, keyed by scope and request URL.
/// Scopes group related endpoints (for example all comment fetches for one
/// PR) so a mutation can drop exactly the responses it staled.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl ResponseCache {
    pub fn get(&self, scope: &str, url: &str) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        entries.get(scope)?.get(&digest(url)).cloned()
    }

    pub fn put(&self, scope: &str, url: &str, body: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries
                .entry(scope.to_string())
                .or_default()
                .insert(digest(url), body);
        }
    }

    /// Drops every cached response under a scope. No-op for unknown scopes.
    pub fn invalidate(&self, scope: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(scope);
        }
    }
}

fn digest(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_through_hit_after_put() {
        let cache = ResponseCache::default();
        assert!(cache.get("reviews/1", "https://x/a").is_none());
        cache.put("reviews/1", "https://x/a", "body-a".to_string());
        assert_eq!(cache.get("reviews/1", "https://x/a").as_deref(), Some("body-a"));
    }

    #[test]
    fn invalidate_drops_only_the_scope() {
        let cache = ResponseCache::default();
        cache.put("reviews/1", "https://x/a", "a".to_string());
        cache.put("reviews/2", "https://x/b", "b".to_string());

        cache.invalidate("reviews/1");
        assert!(cache.get("reviews/1", "https://x/a").is_none());
        assert_eq!(cache.get("reviews/2", "https://x/b").as_deref(), Some("b"));
    }

    #[test]
    fn different_urls_do_not_collide_within_a_scope() {
        let cache = ResponseCache::default();
        cache.put("pulls", "https://x/page1", "p1".to_string());
        cache.put("pulls", "https://x/page2", "p2".to_string());
        assert_eq!(cache.get("pulls", "https://x/page1").as_deref(), Some("p1"));
        assert_eq!(cache.get("pulls", "https://x/page2").as_deref(), Some("p2"));
    }
}
