//! TTL + LRU cache for signed thinking blocks, keyed by the id of the
//! tool-use block they preceded.
//!
//! When a client's next turn includes a `tool_result` for that id, the
//! normalizer restores the cached thinking block at the head of the prior
//! assistant turn so the upstream sees the same signed reasoning it issued.
//! A cache miss is not an error: the normalizer proceeds without
//! restoration and lets the upstream reject the turn if it insists on it.

use crate::message::ContentBlock;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Entry {
    block: ContentBlock,
    inserted_at: Instant,
}

pub struct ThinkingCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    order: VecDeque<String>,
}

impl ThinkingCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Only a thinking block carrying a non-empty signature is cacheable.
    pub async fn put(&self, tool_use_id: String, block: ContentBlock) {
        if block.thinking_signature().is_none() {
            return;
        }

        let mut inner = self.inner.lock().await;
        if !inner.entries.contains_key(&tool_use_id) {
            inner.order.push_back(tool_use_id.clone());
        }
        inner.entries.insert(
            tool_use_id,
            Entry {
                block,
                inserted_at: Instant::now(),
            },
        );

        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
    }

    pub async fn get(&self, tool_use_id: &str) -> Option<ContentBlock> {
        let mut inner = self.inner.lock().await;
        let expired = match inner.entries.get(tool_use_id) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            inner.entries.remove(tool_use_id);
            inner.order.retain(|k| k != tool_use_id);
            return None;
        }
        inner.entries.get(tool_use_id).map(|e| e.block.clone())
    }
}

impl Default for ThinkingCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(15 * 60), 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(id_suffix: &str) -> ContentBlock {
        ContentBlock::Thinking {
            thinking: format!("reasoning {}", id_suffix),
            signature: format!("sig-{}", id_suffix),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = ThinkingCache::new(Duration::from_secs(60), 10);
        cache.put("toolA".into(), signed("a")).await;
        let block = cache.get("toolA").await.unwrap();
        assert_eq!(block.thinking_signature(), Some("sig-a"));
    }

    #[tokio::test]
    async fn unsigned_blocks_are_never_cached() {
        let cache = ThinkingCache::new(Duration::from_secs(60), 10);
        let unsigned = ContentBlock::Thinking {
            thinking: "no sig".into(),
            signature: String::new(),
        };
        cache.put("toolB".into(), unsigned).await;
        assert!(cache.get("toolB").await.is_none());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = ThinkingCache::new(Duration::from_millis(10), 10);
        cache.put("toolC".into(), signed("c")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("toolC").await.is_none());
    }

    #[tokio::test]
    async fn evicts_oldest_when_over_capacity() {
        let cache = ThinkingCache::new(Duration::from_secs(60), 2);
        cache.put("t1".into(), signed("1")).await;
        cache.put("t2".into(), signed("2")).await;
        cache.put("t3".into(), signed("3")).await;
        assert!(cache.get("t1").await.is_none());
        assert!(cache.get("t2").await.is_some());
        assert!(cache.get("t3").await.is_some());
    }

    #[tokio::test]
    async fn miss_returns_none_without_error() {
        let cache = ThinkingCache::new(Duration::from_secs(60), 10);
        assert!(cache.get("nonexistent").await.is_none());
    }
}
