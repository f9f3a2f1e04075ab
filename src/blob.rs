//! Content storage for version bytes
use crate::document::TimeStamp;
use crate::error::BlobError;
use sled::Db;
use std::sync::Arc;

/// Where a put landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub bucket: String,
    pub key: String,
    pub size: u64,
}

/// Keyed byte storage grouped into buckets.
pub trait BlobStore: Send + Sync {
    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<BlobRef, BlobError>;
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError>;
    fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobError>;
    /// A time-limited URL for reading `key` without going through this store.
    fn presigned_url(&self, bucket: &str, key: &str, ttl_secs: u64) -> Result<String, BlobError>;
}

/// Stores each bucket as its own sled tree inside the metadata database.
pub struct SledBlobStore {
    instance: Arc<Db>,
    secret: String,
}

/// sha256 of `bytes`, hex encoded.
pub fn checksum(bytes: &[u8]) -> String {
    sha256::digest(bytes)
}

impl SledBlobStore {
    pub fn new(instance: Arc<Db>, secret: impl Into<String>) -> Self {
        Self {
            instance,
            secret: secret.into(),
        }
    }

    fn bucket(&self, bucket: &str) -> Result<sled::Tree, BlobError> {
        if bucket.is_empty() {
            return Err(BlobError::Backend("empty bucket name".into()));
        }
        Ok(self.instance.open_tree(format!("blobs/{bucket}"))?)
    }

    fn signature(&self, bucket: &str, key: &str, expires: i64) -> String {
        checksum(format!("{}:{bucket}:{key}:{expires}", self.secret).as_bytes())
    }

    /// Check a URL produced by [`BlobStore::presigned_url`] at time `at`.
    pub fn verify_url(&self, url: &str, at: &TimeStamp) -> bool {
        let Some(rest) = url.strip_prefix("sled://") else {
            return false;
        };
        let Some((path, query)) = rest.split_once('?') else {
            return false;
        };
        let Some((bucket, key)) = path.split_once('/') else {
            return false;
        };

        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse::<i64>().ok(),
                Some(("signature", v)) => signature = Some(v),
                _ => {}
            }
        }
        let (Some(expires), Some(signature)) = (expires, signature) else {
            return false;
        };

        at.to_datetime_utc().timestamp() <= expires
            && self.signature(bucket, key, expires) == signature
    }
}

impl BlobStore for SledBlobStore {
    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<BlobRef, BlobError> {
        self.bucket(bucket)?.insert(key.as_bytes(), bytes)?;
        Ok(BlobRef {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: bytes.len() as u64,
        })
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError> {
        self.bucket(bucket)?
            .get(key.as_bytes())?
            .map(|v| v.to_vec())
            .ok_or_else(|| BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobError> {
        self.bucket(bucket)?.remove(key.as_bytes())?;
        Ok(())
    }

    fn presigned_url(&self, bucket: &str, key: &str, ttl_secs: u64) -> Result<String, BlobError> {
        let tree = self.bucket(bucket)?;
        if !tree.contains_key(key.as_bytes())? {
            return Err(BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        let expires = TimeStamp::new()
            .plus_secs(ttl_secs)
            .to_datetime_utc()
            .timestamp();
        Ok(format!(
            "sled://{bucket}/{key}?expires={expires}&signature={}",
            self.signature(bucket, key, expires)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, SledBlobStore) {
        let dir = tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path()).unwrap());
        (dir, SledBlobStore::new(db, "s3cret"))
    }

    #[test]
    fn put_get_delete() {
        let (_dir, blobs) = store();

        let stored = blobs.put("docs", "doc_1/ver_1", b"hello").unwrap();
        assert_eq!(stored.size, 5);
        assert_eq!(blobs.get("docs", "doc_1/ver_1").unwrap(), b"hello");

        blobs.delete("docs", "doc_1/ver_1").unwrap();
        assert!(matches!(
            blobs.get("docs", "doc_1/ver_1"),
            Err(BlobError::NotFound { .. })
        ));
    }

    #[test]
    fn buckets_are_isolated() {
        let (_dir, blobs) = store();
        blobs.put("a", "k", b"1").unwrap();
        assert!(blobs.get("b", "k").is_err());
    }

    #[test]
    fn presigned_urls_expire_and_resist_tampering() {
        let (_dir, blobs) = store();
        blobs.put("docs", "doc_1/ver_1", b"hello").unwrap();

        let url = blobs.presigned_url("docs", "doc_1/ver_1", 60).unwrap();
        assert!(blobs.verify_url(&url, &TimeStamp::new()));
        assert!(!blobs.verify_url(&url, &TimeStamp::new().plus_secs(3600)));

        let forged = url.replace("doc_1/ver_1", "doc_1/ver_2");
        assert!(!blobs.verify_url(&forged, &TimeStamp::new()));

        assert!(blobs.presigned_url("docs", "missing", 60).is_err());
    }

    #[test]
    fn checksum_is_hex_sha256() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
