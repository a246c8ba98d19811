/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{public_object_url, AccessKeys, BucketInfo, ObjectStore, ObjectSummary, StoreConnector};
use crate::config::ObjectStorageConfig;
use anyhow::Context;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{BehaviorVersion, Builder as ConfigBuilder, Region},
    primitives::{ByteStream, DateTime as SmithyDateTime},
    Client,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

fn to_chrono(time: Option<&SmithyDateTime>) -> Option<DateTime<Utc>> {
    time.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
}

/// An S3-compatible endpoint reached through the AWS SDK, using path-style addressing.
pub struct S3Store {
    client: Client,
    host: String,
    port: u16,
}
impl S3Store {
    pub fn new(config: &ObjectStorageConfig, keys: &AccessKeys) -> Self {
        let credentials = Credentials::new(
            keys.access_key.clone(),
            keys.secret_key.clone(),
            None,
            None,
            "instant-io",
        );

        let s3_config = ConfigBuilder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(config.endpoint_url())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            host: config.endpoint_host.clone(),
            port: config.port,
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_buckets(&self) -> anyhow::Result<Vec<BucketInfo>> {
        let resp = self
            .client
            .list_buckets()
            .send()
            .await
            .context("ListBuckets failed")?;

        Ok(resp
            .buckets()
            .iter()
            .filter_map(|bucket| {
                bucket.name().map(|name| BucketInfo {
                    name: name.to_string(),
                    created: to_chrono(bucket.creation_date()),
                })
            })
            .collect())
    }

    async fn create_bucket(&self, bucket: &str) -> anyhow::Result<()> {
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .context(format!("CreateBucket {} failed", bucket))?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> anyhow::Result<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .context(format!("DeleteBucket {} failed", bucket))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> anyhow::Result<Vec<ObjectSummary>> {
        let mut objects = vec![];
        let mut continuation_token: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .context(format!("ListObjectsV2 {} failed", bucket))?;

            objects.extend(resp.contents().iter().filter_map(|object| {
                object.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    size: object.size().unwrap_or_default().max(0) as u64,
                    last_modified: to_chrono(object.last_modified()),
                })
            }));

            match (resp.is_truncated(), resp.next_continuation_token()) {
                (Some(true), Some(token)) => {
                    debug!("Listing of {} is truncated, fetching next page", bucket);
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .context(format!("PutObject {}/{} failed", bucket, key))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> anyhow::Result<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .context(format!("GetObject {}/{} failed", bucket, key))?;

        let body = resp
            .body
            .collect()
            .await
            .context(format!("Reading body of {}/{} failed", bucket, key))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        self.client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .context(format!("HeadObject {}/{} failed", bucket, key))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .context(format!("DeleteObject {}/{} failed", bucket, key))?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> anyhow::Result<String> {
        public_object_url(&self.host, self.port, bucket, key)
    }
}

pub struct S3Connector;

#[async_trait]
impl StoreConnector for S3Connector {
    async fn connect(
        &self,
        config: &ObjectStorageConfig,
        keys: &AccessKeys,
    ) -> anyhow::Result<Arc<dyn ObjectStore>> {
        debug!("Creating S3 client for {}", config.endpoint_url());
        Ok(Arc::new(S3Store::new(config, keys)))
    }
}
