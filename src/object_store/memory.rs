/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{public_object_url, AccessKeys, BucketInfo, ObjectStore, ObjectSummary, StoreConnector};
use crate::config::ObjectStorageConfig;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex},
};

#[derive(Debug)]
struct StoredObject {
    body: Vec<u8>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug)]
struct MemBucket {
    created: DateTime<Utc>,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Default)]
struct State {
    buckets: BTreeMap<String, MemBucket>,
    failing: HashSet<String>,
}

/// An in-process object store with S3 semantics for the operations the drivers use. Bucket
/// and key names registered with `fail_on` make every operation touching them fail.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    host: String,
    port: u16,
}
impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("localhost", 8080)
    }
}
impl MemoryStore {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            host: host.to_string(),
            port,
        }
    }

    pub fn fail_on(&self, name: &str) {
        self.lock().failing.insert(name.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // a poisoned lock only means another test thread panicked mid-operation
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn check_failure(state: &State, names: &[&str]) -> anyhow::Result<()> {
    match names.iter().find(|name| state.failing.contains(**name)) {
        Some(name) => Err(anyhow!("injected failure for {}", name)),
        None => Ok(()),
    }
}

fn bucket_mut<'a>(state: &'a mut State, bucket: &str) -> anyhow::Result<&'a mut MemBucket> {
    state
        .buckets
        .get_mut(bucket)
        .ok_or_else(|| anyhow!("NoSuchBucket: {}", bucket))
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_buckets(&self) -> anyhow::Result<Vec<BucketInfo>> {
        let state = self.lock();
        Ok(state
            .buckets
            .iter()
            .map(|(name, bucket)| BucketInfo {
                name: name.clone(),
                created: Some(bucket.created),
            })
            .collect())
    }

    async fn create_bucket(&self, bucket: &str) -> anyhow::Result<()> {
        let mut state = self.lock();
        check_failure(&state, &[bucket])?;
        if state.buckets.contains_key(bucket) {
            bail!("BucketAlreadyExists: {}", bucket);
        }
        state.buckets.insert(
            bucket.to_string(),
            MemBucket {
                created: Utc::now(),
                objects: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> anyhow::Result<()> {
        let mut state = self.lock();
        check_failure(&state, &[bucket])?;
        if !bucket_mut(&mut state, bucket)?.objects.is_empty() {
            bail!("BucketNotEmpty: {}", bucket);
        }
        state.buckets.remove(bucket);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> anyhow::Result<Vec<ObjectSummary>> {
        let mut state = self.lock();
        check_failure(&state, &[bucket])?;
        Ok(bucket_mut(&mut state, bucket)?
            .objects
            .iter()
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.body.len() as u64,
                last_modified: Some(object.last_modified),
            })
            .collect())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> anyhow::Result<()> {
        let mut state = self.lock();
        check_failure(&state, &[bucket, key])?;
        bucket_mut(&mut state, bucket)?.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> anyhow::Result<Vec<u8>> {
        let mut state = self.lock();
        check_failure(&state, &[bucket, key])?;
        bucket_mut(&mut state, bucket)?
            .objects
            .get(key)
            .map(|object| object.body.clone())
            .ok_or_else(|| anyhow!("NoSuchKey: {}/{}", bucket, key))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        let mut state = self.lock();
        check_failure(&state, &[bucket, key])?;
        match bucket_mut(&mut state, bucket)?.objects.contains_key(key) {
            true => Ok(()),
            false => Err(anyhow!("NoSuchKey: {}/{}", bucket, key)),
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        let mut state = self.lock();
        check_failure(&state, &[bucket, key])?;
        // S3 reports success for keys that are already gone
        bucket_mut(&mut state, bucket)?.objects.remove(key);
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> anyhow::Result<String> {
        public_object_url(&self.host, self.port, bucket, key)
    }
}

/// Hands out the same `MemoryStore` for every session, whatever the keys.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    pub store: MemoryStore,
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(
        &self,
        _config: &ObjectStorageConfig,
        _keys: &AccessKeys,
    ) -> anyhow::Result<Arc<dyn ObjectStore>> {
        Ok(Arc::new(self.store.clone()))
    }
}
