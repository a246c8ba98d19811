/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod memory;
pub mod s3;

use crate::config::ObjectStorageConfig;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::sync::Arc;

/// Everything but the RFC 3986 unreserved characters is escaped in a bucket name.
const BUCKET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');
/// Keys keep `/` so prefixes still read as paths.
const KEY: &AsciiSet = &BUCKET.remove(b'/');

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_key: String,
}
impl std::fmt::Debug for AccessKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKeys")
            .field("access_key", &self.access_key)
            .field("secret_key", &"****")
            .finish()
    }
}

/// The subset of the S3 API the object storage driver exercises.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_buckets(&self) -> anyhow::Result<Vec<BucketInfo>>;

    async fn create_bucket(&self, bucket: &str) -> anyhow::Result<()>;

    /// Fails when the bucket still holds objects.
    async fn delete_bucket(&self, bucket: &str) -> anyhow::Result<()>;

    /// Every object in the bucket, in key order.
    async fn list_objects(&self, bucket: &str) -> anyhow::Result<Vec<ObjectSummary>>;

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> anyhow::Result<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> anyhow::Result<Vec<u8>>;

    /// Fails when the object does not exist.
    async fn head_object(&self, bucket: &str, key: &str) -> anyhow::Result<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> anyhow::Result<()>;

    /// Unauthenticated plain-HTTP URL for the object.
    fn public_url(&self, bucket: &str, key: &str) -> anyhow::Result<String>;
}

/// Opens an `ObjectStore` session for the given endpoint and keys.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(
        &self,
        config: &ObjectStorageConfig,
        keys: &AccessKeys,
    ) -> anyhow::Result<Arc<dyn ObjectStore>>;
}

/// Path-style URL with no query authentication, always over plain HTTP. Bucket and key are
/// percent-encoded.
pub fn public_object_url(host: &str, port: u16, bucket: &str, key: &str) -> anyhow::Result<String> {
    let path = format!(
        "/{}/{}",
        utf8_percent_encode(bucket, BUCKET),
        utf8_percent_encode(key, KEY)
    );
    let uri = http::Uri::builder()
        .scheme("http")
        .authority(format!("{}:{}", host, port))
        .path_and_query(path)
        .build()
        .context(format!("Unable to build a URL for {}/{}", bucket, key))?;

    Ok(uri.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_is_path_style_http() -> anyhow::Result<()> {
        let url = public_object_url("rgw.local", 8080, "my-bucket-1", "obj_1_no0")?;
        assert_eq!(url, "http://rgw.local:8080/my-bucket-1/obj_1_no0");
        Ok(())
    }

    #[test]
    fn public_url_encodes_keys() -> anyhow::Result<()> {
        let url = public_object_url("rgw.local", 8080, "reports", "my report.txt")?;
        assert_eq!(url, "http://rgw.local:8080/reports/my%20report.txt");

        let url = public_object_url("rgw.local", 8080, "reports", "2024/q1/résumé#1")?;
        assert_eq!(url, "http://rgw.local:8080/reports/2024/q1/r%C3%A9sum%C3%A9%231");
        Ok(())
    }

    #[test]
    fn access_keys_hide_the_secret() {
        let keys = AccessKeys {
            access_key: "ak".to_string(),
            secret_key: "very-secret".to_string(),
        };
        assert!(!format!("{:?}", keys).contains("very-secret"));
    }
}
