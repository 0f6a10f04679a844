//! In-memory cache store for embedded deployments and tests.

use super::{CacheStore, NewCacheEntry};
use crate::error::Result;
use crate::models::CacheEntry;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

type SignatureKey = (String, String, String);

#[derive(Default)]
pub struct InMemoryCacheStore {
    // Both maps are keyed so every mutation happens under the shard lock of
    // a single entry; hit counting is therefore increment-under-lock, never
    // a read-modify-write across calls.
    by_signature: DashMap<SignatureKey, CacheEntry>,
    ids: DashMap<Uuid, SignatureKey>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_of(new_entry: &NewCacheEntry) -> SignatureKey {
        (
            new_entry.task_name.clone(),
            new_entry.task_version.clone(),
            new_entry.input_signature.clone(),
        )
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn lookup(
        &self,
        task_name: &str,
        task_version: &str,
        signature: &str,
    ) -> Result<Option<CacheEntry>> {
        let key = (
            task_name.to_string(),
            task_version.to_string(),
            signature.to_string(),
        );
        Ok(self.by_signature.get(&key).map(|entry| entry.clone()))
    }

    async fn put(&self, new_entry: NewCacheEntry) -> Result<CacheEntry> {
        let key = Self::key_of(&new_entry);
        let now = Utc::now();
        let expires_at = new_entry
            .ttl
            .map(|ttl| now + chrono::Duration::from_std(ttl).unwrap_or_default());

        // The id mapping is inserted only after the entry shard guard is
        // released; combined with record_hit dropping its ids guard before
        // touching by_signature, the two maps are never locked in opposite
        // orders.
        let mut new_id = None;
        let entry = match self.by_signature.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                // Racing completions converge on the higher-confidence
                // result; the existing hit count and creation time survive
                // the swap.
                if new_entry.confidence_score > slot.confidence_score
                    || slot.canonical_job_id == new_entry.canonical_job_id
                {
                    slot.canonical_job_id = new_entry.canonical_job_id;
                    slot.result_id = new_entry.result_id;
                    slot.confidence_score = new_entry.confidence_score;
                    slot.expires_at = expires_at;
                }
                slot.clone()
            }
            Entry::Vacant(vacant) => {
                let id = Uuid::new_v4();
                new_id = Some(id);
                vacant
                    .insert(CacheEntry {
                        id,
                        task_name: new_entry.task_name.clone(),
                        task_version: new_entry.task_version.clone(),
                        input_signature: new_entry.input_signature.clone(),
                        canonical_job_id: new_entry.canonical_job_id,
                        result_id: new_entry.result_id,
                        confidence_score: new_entry.confidence_score,
                        hit_count: 0,
                        last_used_at: now,
                        expires_at,
                        created_at: now,
                    })
                    .clone()
            }
        };
        if let Some(id) = new_id {
            self.ids.insert(id, key);
        }

        Ok(entry)
    }

    async fn record_hit(&self, entry_id: Uuid) -> Result<()> {
        // Clone the key out so the ids guard is dropped before by_signature
        // is locked.
        let key = self.ids.get(&entry_id).map(|k| k.value().clone());
        if let Some(key) = key {
            if let Some(mut entry) = self.by_signature.get_mut(&key) {
                entry.hit_count += 1;
                entry.last_used_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn invalidate(&self, entry_id: Uuid) -> Result<bool> {
        match self.ids.remove(&entry_id) {
            Some((_, key)) => Ok(self.by_signature.remove(&key).is_some()),
            None => Ok(false),
        }
    }

    async fn invalidate_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let expired: Vec<(SignatureKey, Uuid)> = self
            .by_signature
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| (entry.key().clone(), entry.value().id))
            .collect();

        let mut removed = 0;
        for (key, id) in expired {
            if self.by_signature.remove(&key).is_some() {
                self.ids.remove(&id);
                removed += 1;
            }
        }
        Ok(removed)
    }
}
