/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    batch::BatchResult,
    errors::ConnectionError,
    executor::Executor,
    object_store::{AccessKeys, ObjectStore, ObjectSummary, StoreConnector},
    run_context::{ObjectCounters, RunContext},
    tools::radosgw_admin,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, fs, path::PathBuf, sync::Arc};
use tracing::{debug, error, info};

/// Body uploaded for `key`. Downloads are compared against this.
pub fn object_content(key: &str) -> String {
    format!(
        "This is a test object being written for the key : {}\n\
         It was written by instant-io to exercise the object gateway.\n",
        key
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Key(String),
    All,
}

/// Drives bucket and object IO through an S3-compatible endpoint.
pub struct ObjectStorageDriver {
    ctx: RunContext,
    store: Arc<dyn ObjectStore>,
    account: Option<String>,
    counters: ObjectCounters,
}
impl ObjectStorageDriver {
    /// Opens a session, first creating a dedicated user when the config asks for one. The
    /// session is checked with a bucket listing so bad endpoints and keys fail here. Bucket and
    /// key ordinals are drawn from `counters`.
    pub async fn connect(
        ctx: &RunContext,
        executor: &dyn Executor,
        connector: &dyn StoreConnector,
        counters: &ObjectCounters,
    ) -> Result<Self, ConnectionError> {
        let config = &ctx.config.object_storage;

        let (keys, account) = if config.create_user {
            debug!("User creation is set to true, creating a radosgw user with keys");
            let (user, keys) = provision_account(ctx, executor).await?;
            (keys, Some(user))
        } else {
            debug!("User creation is set to false, using the keys provided in the config");
            let keys = AccessKeys {
                access_key: config.access_key.clone(),
                secret_key: config.secret_key.clone(),
            };
            (keys, None)
        };

        let rejected = |err: anyhow::Error| ConnectionError::Rejected {
            endpoint: config.endpoint_url(),
            message: format!("{:#}", err),
        };
        let store = connector.connect(config, &keys).await.map_err(rejected)?;
        store.list_buckets().await.map_err(rejected)?;

        info!("Connected to object endpoint {}", config.endpoint_url());
        Ok(Self {
            ctx: ctx.clone(),
            store,
            account,
            counters: counters.clone(),
        })
    }

    /// The user created for this session, if any.
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub async fn create_buckets(&self, quantity: u32) -> BatchResult<String> {
        let mut result = BatchResult::new();
        debug!("Creating {} buckets", quantity);

        for _ in 0..quantity {
            let name = format!(
                "my-bucket-{}-no-{}",
                self.ctx.run_id,
                self.counters.buckets.next()
            );
            debug!("Creating bucket : {}", name);
            match self.store.create_bucket(&name).await {
                Ok(()) => result.push_ok(name),
                Err(err) => result.push_err(
                    name.clone(),
                    err.context(format!("An error occurred when creating the bucket {}", name)),
                ),
            }
        }

        debug!("All the buckets created are : {:?}", result.succeeded);
        result
    }

    /// Bucket name to creation time for every bucket the session owns.
    pub async fn list_buckets(&self) -> anyhow::Result<BTreeMap<String, Option<DateTime<Utc>>>> {
        debug!("Listing all the buckets on the host");
        let buckets = self.store.list_buckets().await?;
        for bucket in buckets.iter() {
            info!(
                "{}\t{}",
                bucket.name,
                bucket
                    .created
                    .map(|time| time.to_rfc3339())
                    .unwrap_or_else(|| "--".to_string())
            );
        }

        Ok(buckets
            .into_iter()
            .map(|bucket| (bucket.name, bucket.created))
            .collect())
    }

    /// Lists one bucket, or every bucket of the session when `bucket` is `None`. In the latter
    /// case buckets that cannot be listed are logged and left out.
    pub async fn list_objects(
        &self,
        bucket: Option<&str>,
    ) -> anyhow::Result<BTreeMap<String, Vec<ObjectSummary>>> {
        let mut listing = BTreeMap::new();

        match bucket {
            Some(bucket) => {
                let objects = self.list_bucket(bucket).await?;
                listing.insert(bucket.to_string(), objects);
            }
            None => {
                debug!("Listing contents of all the buckets owned by the user");
                for bucket in self.store.list_buckets().await? {
                    match self.list_bucket(&bucket.name).await {
                        Ok(objects) => {
                            listing.insert(bucket.name, objects);
                        }
                        Err(err) => error!("Unable to list bucket {}: {:#}", bucket.name, err),
                    }
                }
            }
        }

        Ok(listing)
    }

    async fn list_bucket(&self, bucket: &str) -> anyhow::Result<Vec<ObjectSummary>> {
        let objects = self.store.list_objects(bucket).await?;
        for object in objects.iter() {
            info!(
                "bucket : {}\t{}\t{}\t{}",
                bucket,
                object.key,
                object.size,
                object
                    .last_modified
                    .map(|time| time.to_rfc3339())
                    .unwrap_or_else(|| "--".to_string())
            );
        }
        Ok(objects)
    }

    pub async fn create_objects(&self, bucket: &str, quantity: u32) -> BatchResult<String> {
        let mut result = BatchResult::new();
        info!("Creating {} objects inside bucket {}", quantity, bucket);

        for _ in 0..quantity {
            let key = format!("obj_{}_no{}", self.ctx.run_id, self.counters.objects.next());
            debug!("Creating the object with key : {}", key);
            let body = object_content(&key).into_bytes();
            match self.store.put_object(bucket, &key, body).await {
                Ok(()) => result.push_ok(key),
                Err(err) => result.push_err(
                    key.clone(),
                    err.context(format!(
                        "An error occurred when creating the object {} in bucket {}",
                        key, bucket
                    )),
                ),
            }
        }

        debug!("All the keys created are : {:?}", result.succeeded);
        result
    }

    async fn keys_for(&self, bucket: &str, key: Option<&str>) -> anyhow::Result<Vec<String>> {
        match key {
            Some(key) => Ok(vec![key.to_string()]),
            None => Ok(self
                .store
                .list_objects(bucket)
                .await
                .context(format!("Unable to list the objects of bucket {}", bucket))?
                .into_iter()
                .map(|object| object.key)
                .collect()),
        }
    }

    /// Downloads one object, or all objects of the bucket, into the run's download folder.
    /// Returns the written file paths.
    pub async fn download_objects(
        &self,
        bucket: &str,
        key: Option<&str>,
    ) -> anyhow::Result<BatchResult<PathBuf>> {
        let folder = self.ctx.download_dir();
        if !folder.is_dir() {
            debug!("Creating the folder : {}", folder.display());
            fs::create_dir_all(&folder)
                .context(format!("Unable to create {}", folder.display()))?;
        }

        info!("Downloading object(s) from the bucket {}", bucket);
        let keys = self.keys_for(bucket, key).await?;
        debug!("All the keys obtained for downloading are : {:?}", keys);

        let mut result = BatchResult::new();
        for key in keys {
            let path = folder.join(download_file_name(bucket, &key));
            debug!("Downloading {} from bucket {} to {}", key, bucket, path.display());

            let downloaded = async {
                let body = self.store.get_object(bucket, &key).await?;
                fs::write(&path, body).context(format!("Unable to write {}", path.display()))
            }
            .await;

            match downloaded {
                Ok(()) => result.push_ok(path),
                Err(err) => result.push_err(
                    key.clone(),
                    err.context(format!(
                        "An error occurred when downloading the object {} in bucket {}",
                        key, bucket
                    )),
                ),
            }
        }

        Ok(result)
    }

    /// Unauthenticated plain-HTTP URLs for one object or every object of the bucket.
    pub async fn generate_public_urls(
        &self,
        bucket: &str,
        key: Option<&str>,
    ) -> anyhow::Result<BatchResult<String>> {
        info!("Creating URLs for object(s) from the bucket {}", bucket);
        let keys = self.keys_for(bucket, key).await?;

        let mut result = BatchResult::new();
        for key in keys {
            let url = async {
                self.store.head_object(bucket, &key).await?;
                self.store.public_url(bucket, &key)
            }
            .await;

            match url {
                Ok(url) => {
                    debug!("The URL generated is : {}", url);
                    result.push_ok(url)
                }
                Err(err) => result.push_err(
                    key.clone(),
                    err.context(format!(
                        "An error occurred when generating a URL for {} in bucket {}",
                        key, bucket
                    )),
                ),
            }
        }

        Ok(result)
    }

    pub async fn delete_objects(&self, bucket: &str, target: DeleteTarget) -> BatchResult<String> {
        info!("Deleting the object(s) present in the bucket {}", bucket);
        let mut result = BatchResult::new();

        let keys = match target {
            DeleteTarget::Key(key) => vec![key],
            DeleteTarget::All => match self.keys_for(bucket, None).await {
                Ok(keys) => keys,
                Err(err) => {
                    result.push_err(bucket, err);
                    return result;
                }
            },
        };
        debug!("The keys to delete from bucket {} are : {:?}", bucket, keys);

        for key in keys {
            match self.store.delete_object(bucket, &key).await {
                Ok(()) => {
                    debug!("Deleted the object {} in bucket {}", key, bucket);
                    result.push_ok(key)
                }
                Err(err) => result.push_err(
                    key.clone(),
                    err.context(format!(
                        "An error occurred when deleting the object {} in bucket {}",
                        key, bucket
                    )),
                ),
            }
        }

        info!("Done with deleting object(s) in bucket {}", bucket);
        result
    }

    /// Empties the bucket if needed, then removes it. Failures are logged and reported, never
    /// raised, so teardown can move on to the next bucket.
    pub async fn delete_bucket(&self, bucket: &str) -> BatchResult<String> {
        info!("Bucket provided to be deleted : {}", bucket);
        let mut result = BatchResult::new();

        let contents = match self.store.list_objects(bucket).await {
            Ok(contents) => contents,
            Err(err) => {
                result.push_err(
                    bucket,
                    err.context(format!("Unable to delete bucket {}", bucket)),
                );
                return result;
            }
        };

        if !contents.is_empty() {
            info!("Bucket {} is not empty. Deleting objects before deleting", bucket);
            let emptied = self.delete_objects(bucket, DeleteTarget::All).await;
            if !emptied.is_complete() {
                let failed = emptied.failed_items().collect::<Vec<_>>().join(", ");
                result.push_err(
                    bucket,
                    anyhow::anyhow!("Unable to empty bucket {}, failed keys: {}", bucket, failed),
                );
                return result;
            }
        }

        match self.store.delete_bucket(bucket).await {
            Ok(()) => {
                info!("Completed deleting bucket {}", bucket);
                result.push_ok(bucket.to_string());
            }
            Err(err) => result.push_err(
                bucket,
                err.context(format!("An error occurred when deleting bucket {}", bucket)),
            ),
        }

        result
    }

    pub fn disconnect(self) {
        debug!("Closing object storage session");
    }
}

fn download_file_name(bucket: &str, key: &str) -> String {
    format!("object_{}_{}.txt", bucket, key.replace('/', "_"))
}

async fn provision_account(
    ctx: &RunContext,
    executor: &dyn Executor,
) -> Result<(String, AccessKeys), ConnectionError> {
    let user = format!("operator_{}", ctx.run_id);
    let keys = AccessKeys {
        access_key: format!("IIO{}", ctx.run_id),
        secret_key: nanoid::nanoid!(40),
    };

    let cmd = radosgw_admin::user_create(
        &user,
        &format!("s3 {}", user),
        &format!("{}@example.com", user),
        &keys.access_key,
        &keys.secret_key,
    );
    executor
        .execute(&cmd)
        .await
        .map_err(|source| ConnectionError::Account {
            user: user.clone(),
            source,
        })?;

    info!("User for the object gateway : {} created successfully", user);
    Ok((user, keys))
}
