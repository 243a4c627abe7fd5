use futures::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

use crate::config::StorageConfig;

/// Object retrieval capability (enables testing via mocking)
///
/// Production code uses [`S3Storage`]; handler tests use `MockObjectStorage`.
#[cfg_attr(test, mockall::automock)]
pub trait ObjectStorage {
    /// Downloads `bucket/key` to `dest`, replacing its contents
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    /// Returns error if the object cannot be fetched or written locally
    fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError>;
}

/// Errors that can occur while fetching objects
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to start the async runtime used for requests
    #[error("failed to start storage runtime")]
    Runtime(#[source] std::io::Error),

    /// Failed to configure a client for the bucket
    #[error("failed to configure storage client for bucket {bucket}")]
    Client {
        /// Bucket name
        bucket: String,
        /// Underlying error
        #[source]
        source: object_store::Error,
    },

    /// The key cannot be used as an object path (e.g. it has an empty segment)
    #[error("invalid object key {key:?}")]
    InvalidKey {
        /// Object key
        key: String,
        /// Underlying error
        #[source]
        source: object_store::path::Error,
    },

    /// The store rejected or failed the request
    #[error("failed to fetch s3://{bucket}/{key}")]
    Fetch {
        /// Bucket name
        bucket: String,
        /// Object key
        key: String,
        /// Underlying error
        #[source]
        source: object_store::Error,
    },

    /// The object was fetched but could not be written locally
    #[error("failed to write object to {path}")]
    Write {
        /// Destination path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// S3 client backed by `object_store`
///
/// Credentials come from the standard AWS environment variables. Each
/// download blocks on a private current-thread runtime. Clients are built
/// once per bucket and reused.
pub struct S3Storage {
    runtime: tokio::runtime::Runtime,
    region: Option<String>,
    endpoint: Option<String>,
    clients: Mutex<HashMap<String, AmazonS3>>,
}

impl S3Storage {
    /// Creates a client using the region and endpoint overrides from config
    ///
    /// # Errors
    /// Returns error if the runtime cannot be created
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(StorageError::Runtime)?;

        Ok(Self {
            runtime,
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            clients: Mutex::new(HashMap::new()),
        })
    }

    fn client(&self, bucket: &str) -> Result<AmazonS3, StorageError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = clients.get(bucket) {
            return Ok(store.clone());
        }

        let store = self.store_for(bucket)?;
        clients.insert(bucket.to_owned(), store.clone());
        Ok(store)
    }

    fn store_for(&self, bucket: &str) -> Result<AmazonS3, StorageError> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

        if let Some(region) = &self.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &self.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        builder.build().map_err(|source| StorageError::Client {
            bucket: bucket.to_owned(),
            source,
        })
    }
}

/// Maps a key to an object path without re-encoding it
fn object_path(key: &str) -> Result<ObjectPath, StorageError> {
    ObjectPath::parse(key).map_err(|source| StorageError::InvalidKey {
        key: key.to_owned(),
        source,
    })
}

impl ObjectStorage for S3Storage {
    fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let _span = tracing::debug_span!("download", bucket, key).entered();
        let location = object_path(key)?;
        let store = self.client(bucket)?;

        let fetch_err = |source: object_store::Error| StorageError::Fetch {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            source,
        };
        let write_err = |source: std::io::Error| StorageError::Write {
            path: dest.to_path_buf(),
            source,
        };

        let start = std::time::Instant::now();
        let size = self.runtime.block_on(async {
            let mut stream = store.get(&location).await.map_err(fetch_err)?.into_stream();
            let mut file = File::create(dest).map_err(write_err)?;

            let mut written = 0_u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(fetch_err)?;
                file.write_all(&chunk).map_err(write_err)?;
                written += chunk.len() as u64;
            }
            file.flush().map_err(write_err)?;
            Ok::<_, StorageError>(written)
        })?;

        tracing::info!(
            bucket,
            key,
            size,
            download_ms = start.elapsed().as_millis(),
            "object downloaded"
        );

        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(endpoint: Option<&str>) -> S3Storage {
        let config = StorageConfig {
            region: Some("us-east-1".to_owned()),
            endpoint: endpoint.map(str::to_owned),
            ..StorageConfig::default()
        };
        S3Storage::new(&config).unwrap()
    }

    #[test]
    fn test_new_keeps_overrides() {
        let s3 = storage(Some("http://localhost:9000"));
        assert_eq!(s3.region.as_deref(), Some("us-east-1"));
        assert_eq!(s3.endpoint.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn test_store_for_bucket() {
        let s3 = storage(None);
        assert!(s3.store_for("my-bucket").is_ok());
    }

    #[test]
    fn test_store_for_http_endpoint() {
        let s3 = storage(Some("http://localhost:9000"));
        assert!(s3.store_for("my-bucket").is_ok());
    }

    #[test]
    fn test_client_reused_per_bucket() {
        let s3 = storage(None);
        s3.client("a").unwrap();
        s3.client("a").unwrap();
        s3.client("b").unwrap();
        assert_eq!(s3.clients.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_object_path_keeps_key_verbatim() {
        for key in ["take#2.wav", "50%.wav", "x~y[1].wav", "audio/take-1.wav"] {
            assert_eq!(object_path(key).unwrap().as_ref(), key);
        }
    }

    #[test]
    fn test_object_path_rejects_empty_segment() {
        let result = object_path("a//b.wav");
        assert!(matches!(result, Err(StorageError::InvalidKey { key, .. }) if key == "a//b.wav"));
    }

    #[test]
    #[ignore = "requires AWS credentials and network access"]
    fn test_download_missing_object() {
        let s3 = storage(None);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("audio.wav");

        let result = s3.download("s3-whisper-handler-test", "missing/object.wav", &dest);
        assert!(matches!(result, Err(StorageError::Fetch { .. })));
    }
}
