//! In-memory [`Backend`] implementation.
//!
//! Keyspaces are `BTreeMap`s behind a `std::sync::RwLock`, giving ordered
//! iteration for free. Suitable for tests and for embedders whose source
//! repositories are the durable copy (the primary store is a derived cache,
//! so volatility only costs a re-index on restart).

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Result;

use super::{Backend, Direction, ScanBounds};

pub struct MemoryBackend {
    spaces: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            spaces: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn range_bounds(bounds: &ScanBounds) -> Option<(Bound<String>, Bound<String>)> {
    let lower = if let Some(key) = &bounds.gte {
        Bound::Included(key.clone())
    } else if let Some(key) = &bounds.gt {
        Bound::Excluded(key.clone())
    } else {
        Bound::Unbounded
    };
    let upper = if let Some(key) = &bounds.lte {
        Bound::Included(key.clone())
    } else if let Some(key) = &bounds.lt {
        Bound::Excluded(key.clone())
    } else {
        Bound::Unbounded
    };

    // BTreeMap::range panics on inverted ranges; report them as empty.
    let lower_key = match &lower {
        Bound::Included(k) | Bound::Excluded(k) => Some(k),
        Bound::Unbounded => None,
    };
    let upper_key = match &upper {
        Bound::Included(k) | Bound::Excluded(k) => Some(k),
        Bound::Unbounded => None,
    };
    if let (Some(lo), Some(hi)) = (lower_key, upper_key) {
        if lo > hi {
            return None;
        }
        if lo == hi
            && (matches!(lower, Bound::Excluded(_)) || matches!(upper, Bound::Excluded(_)))
        {
            return None;
        }
    }
    Some((lower, upper))
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, keyspace: &str, key: &str) -> Result<Option<String>> {
        let spaces = self.spaces.read().unwrap();
        Ok(spaces
            .get(keyspace)
            .and_then(|space| space.get(key))
            .cloned())
    }

    async fn put(&self, keyspace: &str, key: &str, value: &str) -> Result<()> {
        let mut spaces = self.spaces.write().unwrap();
        spaces
            .entry(keyspace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, keyspace: &str, key: &str) -> Result<()> {
        let mut spaces = self.spaces.write().unwrap();
        if let Some(space) = spaces.get_mut(keyspace) {
            space.remove(key);
        }
        Ok(())
    }

    async fn scan(
        &self,
        keyspace: &str,
        bounds: &ScanBounds,
        direction: Direction,
    ) -> Result<Vec<(String, String)>> {
        let spaces = self.spaces.read().unwrap();
        let Some(space) = spaces.get(keyspace) else {
            return Ok(Vec::new());
        };
        let Some(range) = range_bounds(bounds) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<(String, String)> = space
            .range(range)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if direction == Direction::Reverse {
            out.reverse();
        }
        Ok(out)
    }

    async fn clear(&self, keyspace: &str) -> Result<()> {
        let mut spaces = self.spaces.write().unwrap();
        spaces.remove(keyspace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::new();
        for key in ["a", "b", "c", "d"] {
            backend.put("ks", key, key).await.unwrap();
        }
        backend
    }

    fn keys(entries: Vec<(String, String)>) -> Vec<String> {
        entries.into_iter().map(|(k, _)| k).collect()
    }

    #[tokio::test]
    async fn get_put_delete() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("ks", "a").await.unwrap(), None);
        backend.put("ks", "a", "1").await.unwrap();
        assert_eq!(backend.get("ks", "a").await.unwrap(), Some("1".into()));
        backend.put("ks", "a", "2").await.unwrap();
        assert_eq!(backend.get("ks", "a").await.unwrap(), Some("2".into()));
        backend.delete("ks", "a").await.unwrap();
        assert_eq!(backend.get("ks", "a").await.unwrap(), None);
        // deleting an absent key is fine
        backend.delete("ks", "a").await.unwrap();
    }

    #[tokio::test]
    async fn keyspaces_are_disjoint() {
        let backend = MemoryBackend::new();
        backend.put("one", "k", "1").await.unwrap();
        backend.put("two", "k", "2").await.unwrap();
        assert_eq!(backend.get("one", "k").await.unwrap(), Some("1".into()));
        assert_eq!(backend.get("two", "k").await.unwrap(), Some("2".into()));
        backend.clear("one").await.unwrap();
        assert_eq!(backend.get("one", "k").await.unwrap(), None);
        assert_eq!(backend.get("two", "k").await.unwrap(), Some("2".into()));
    }

    #[tokio::test]
    async fn scan_bounds() {
        let backend = seeded().await;
        let all = backend
            .scan("ks", &ScanBounds::all(), Direction::Forward)
            .await
            .unwrap();
        assert_eq!(keys(all), ["a", "b", "c", "d"]);

        let gte = ScanBounds {
            gte: Some("b".into()),
            ..Default::default()
        };
        assert_eq!(
            keys(backend.scan("ks", &gte, Direction::Forward).await.unwrap()),
            ["b", "c", "d"]
        );

        let gt_lt = ScanBounds {
            gt: Some("a".into()),
            lt: Some("d".into()),
            ..Default::default()
        };
        assert_eq!(
            keys(backend
                .scan("ks", &gt_lt, Direction::Forward)
                .await
                .unwrap()),
            ["b", "c"]
        );

        assert_eq!(
            keys(backend
                .scan("ks", &ScanBounds::only("c"), Direction::Forward)
                .await
                .unwrap()),
            ["c"]
        );
    }

    #[tokio::test]
    async fn scan_reverse() {
        let backend = seeded().await;
        let out = backend
            .scan("ks", &ScanBounds::all(), Direction::Reverse)
            .await
            .unwrap();
        assert_eq!(keys(out), ["d", "c", "b", "a"]);
    }

    #[tokio::test]
    async fn inverted_or_empty_ranges_scan_empty() {
        let backend = seeded().await;
        let inverted = ScanBounds {
            gte: Some("z".into()),
            lte: Some("a".into()),
            ..Default::default()
        };
        assert!(backend
            .scan("ks", &inverted, Direction::Forward)
            .await
            .unwrap()
            .is_empty());

        let pinched = ScanBounds {
            gt: Some("b".into()),
            lte: Some("b".into()),
            ..Default::default()
        };
        assert!(backend
            .scan("ks", &pinched, Direction::Forward)
            .await
            .unwrap()
            .is_empty());

        assert!(backend
            .scan("missing", &ScanBounds::all(), Direction::Forward)
            .await
            .unwrap()
            .is_empty());
    }
}
