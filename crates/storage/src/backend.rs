//! Uniform exists / read / write / ensure_dir over local, HTTP and S3 paths.

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    aws::AmazonS3Builder, http::HttpBuilder, path::Path, ObjectStore, PutMode, PutOptions,
};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::path::{split_http_origin, S3Location, Scheme};
use crate::{ObjectStorageConfig, Result, StorageError};

/// Result of a read. A missing object is a value, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Found(Bytes),
    NotFound,
}

impl ReadOutcome {
    pub fn into_option(self) -> Option<Bytes> {
        match self {
            ReadOutcome::Found(bytes) => Some(bytes),
            ReadOutcome::NotFound => None,
        }
    }
}

enum Client {
    Local,
    Remote {
        store: Arc<dyn ObjectStore>,
        /// `https://host` or the bucket name
        origin: String,
    },
}

/// Storage handle for everything below one root path.
///
/// Remote clients are built once in [`StorageBackend::open`] and shared by all
/// later calls.
pub struct StorageBackend {
    root: String,
    scheme: Scheme,
    client: Client,
}

impl std::fmt::Debug for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBackend")
            .field("root", &self.root)
            .field("scheme", &self.scheme)
            .finish()
    }
}

impl StorageBackend {
    /// Open a backend for `root`, classifying it by prefix.
    pub fn open(root: &str, config: &ObjectStorageConfig) -> Result<Self> {
        let scheme = Scheme::classify(root);
        let client = match scheme {
            Scheme::Local => Client::Local,
            Scheme::Http => {
                let (origin, _) = split_http_origin(root)?;
                let store = HttpBuilder::new()
                    .with_url(origin.as_str())
                    .build()
                    .map_err(|e| StorageError::backend(root, e))?;
                Client::Remote {
                    store: Arc::new(store),
                    origin,
                }
            }
            Scheme::ObjectStorage => {
                let location = S3Location::parse(root)?;
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(&location.bucket);

                if let Some(endpoint) = &config.endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                if let Some(region) = &config.region {
                    builder = builder.with_region(region);
                }
                if let Some(key) = &config.access_key_id {
                    builder = builder.with_access_key_id(key);
                }
                if let Some(secret) = &config.secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }
                if config.allow_http {
                    builder = builder.with_allow_http(true);
                }

                let store = builder.build().map_err(|e| StorageError::backend(root, e))?;
                Client::Remote {
                    store: Arc::new(store),
                    origin: location.bucket,
                }
            }
        };

        debug!(root = %root, scheme = %scheme, "Opened storage backend");
        Ok(Self {
            root: root.to_string(),
            scheme,
            client,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn is_writable(&self) -> bool {
        self.scheme != Scheme::Http
    }

    /// Object key of `path` within this backend's store.
    fn key_for(&self, path: &str, origin: &str) -> Result<Path> {
        let (path_origin, key) = match self.scheme {
            Scheme::Http => split_http_origin(path)?,
            Scheme::ObjectStorage => {
                let location = S3Location::parse(path)?;
                (location.bucket, location.key)
            }
            Scheme::Local => return Err(StorageError::InvalidUri(path.to_string())),
        };
        if path_origin != origin {
            return Err(StorageError::InvalidUri(format!(
                "{} is outside of {}",
                path, self.root
            )));
        }
        Ok(Path::from(key.as_str()))
    }

    /// Check whether a file or object exists.
    #[instrument(skip(self), fields(scheme = %self.scheme))]
    pub async fn exists(&self, path: &str) -> Result<bool> {
        match &self.client {
            Client::Local => tokio::fs::try_exists(path)
                .await
                .map_err(|e| StorageError::io(path, e)),
            Client::Remote { store, origin } => {
                let key = self.key_for(path, origin)?;
                match self.scheme {
                    Scheme::Http => match store.head(&key).await {
                        Ok(_) => Ok(true),
                        Err(object_store::Error::NotFound { .. }) => Ok(false),
                        Err(e) => Err(StorageError::backend(path, e)),
                    },
                    _ => {
                        // Listing the parent prefix and matching the exact key
                        // avoids treating "a/b" as present when only "a/bc" is.
                        let key_str = key.to_string();
                        let prefix = key_str.rsplit_once('/').map(|(dir, _)| Path::from(dir));
                        let mut stream = store.list(prefix.as_ref());
                        while let Some(meta) = stream
                            .try_next()
                            .await
                            .map_err(|e| StorageError::backend(path, e))?
                        {
                            if meta.location == key {
                                return Ok(true);
                            }
                        }
                        Ok(false)
                    }
                }
            }
        }
    }

    /// Create a local directory and its parents. No-op for remote schemes.
    ///
    /// An existing directory, including one created concurrently, is not an
    /// error.
    pub async fn ensure_dir(&self, path: &str) -> Result<()> {
        if let Client::Local = self.client {
            match tokio::fs::create_dir_all(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(StorageError::io(path, e)),
            }
        }
        Ok(())
    }

    /// Read a whole file or object.
    #[instrument(skip(self), fields(scheme = %self.scheme))]
    pub async fn read_bytes(&self, path: &str) -> Result<ReadOutcome> {
        let outcome = match &self.client {
            Client::Local => match tokio::fs::read(path).await {
                Ok(data) => ReadOutcome::Found(Bytes::from(data)),
                Err(e) if e.kind() == ErrorKind::NotFound => ReadOutcome::NotFound,
                Err(e) => return Err(StorageError::io(path, e)),
            },
            Client::Remote { store, origin } => {
                let key = self.key_for(path, origin)?;
                match store.get(&key).await {
                    Ok(result) => ReadOutcome::Found(
                        result
                            .bytes()
                            .await
                            .map_err(|e| StorageError::backend(path, e))?,
                    ),
                    Err(object_store::Error::NotFound { .. }) => ReadOutcome::NotFound,
                    Err(e) => return Err(StorageError::backend(path, e)),
                }
            }
        };

        match &outcome {
            ReadOutcome::Found(data) => debug!(size = data.len(), "Read object"),
            ReadOutcome::NotFound => debug!("Object not found"),
        }
        Ok(outcome)
    }

    /// Write a whole file or object.
    ///
    /// Local files are written to a temporary sibling and renamed into place,
    /// so readers never observe a partial file.
    #[instrument(skip(self, data), fields(scheme = %self.scheme, size = data.len()))]
    pub async fn write_bytes(&self, path: &str, data: Bytes) -> Result<()> {
        match &self.client {
            Client::Local => {
                let tmp = format!("{}.{}.tmp", path, uuid::Uuid::new_v4());
                if let Err(e) = tokio::fs::write(&tmp, &data).await {
                    return Err(StorageError::io(&tmp, e));
                }
                if let Err(e) = tokio::fs::rename(&tmp, path).await {
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Err(StorageError::io(path, e));
                }
            }
            Client::Remote { store, origin } => {
                if self.scheme == Scheme::Http {
                    return Err(StorageError::ReadOnly(path.to_string()));
                }
                let key = self.key_for(path, origin)?;
                store
                    .put(&key, data.into())
                    .await
                    .map_err(|e| StorageError::backend(path, e))?;
            }
        }
        debug!("Wrote object");
        Ok(())
    }

    /// Write a whole file or object unless one already exists at `path`.
    ///
    /// Returns `false` and leaves the existing content untouched when the
    /// target exists. Of several concurrent callers exactly one gets `true`.
    /// Local files are written to a fresh temporary sibling and hard-linked
    /// into place; object storage uses a create-only put. Stores without
    /// conditional put support fall back to a plain write.
    #[instrument(skip(self, data), fields(scheme = %self.scheme, size = data.len()))]
    pub async fn write_bytes_if_absent(&self, path: &str, data: Bytes) -> Result<bool> {
        let created = match &self.client {
            Client::Local => {
                let tmp = format!("{}.{}.tmp", path, uuid::Uuid::new_v4());
                let mut file = tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&tmp)
                    .await
                    .map_err(|e| StorageError::io(&tmp, e))?;
                let written = match file.write_all(&data).await {
                    Ok(()) => file.sync_all().await,
                    Err(e) => Err(e),
                };
                drop(file);
                if let Err(e) = written {
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Err(StorageError::io(&tmp, e));
                }
                let linked = tokio::fs::hard_link(&tmp, path).await;
                let _ = tokio::fs::remove_file(&tmp).await;
                match linked {
                    Ok(()) => true,
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => false,
                    Err(e) => return Err(StorageError::io(path, e)),
                }
            }
            Client::Remote { store, origin } => {
                if self.scheme == Scheme::Http {
                    return Err(StorageError::ReadOnly(path.to_string()));
                }
                let key = self.key_for(path, origin)?;
                let opts = PutOptions {
                    mode: PutMode::Create,
                    ..Default::default()
                };
                match store.put_opts(&key, data.clone(), opts).await {
                    Ok(_) => true,
                    Err(object_store::Error::AlreadyExists { .. }) => false,
                    Err(object_store::Error::NotImplemented) => {
                        warn!("Store has no create-only put, writing unconditionally");
                        store
                            .put(&key, data)
                            .await
                            .map_err(|e| StorageError::backend(path, e))?;
                        true
                    }
                    Err(e) => return Err(StorageError::backend(path, e)),
                }
            }
        };
        debug!(created, "Conditional write");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_backend_is_read_only() {
        let backend =
            StorageBackend::open("http://localhost:1/tiles", &ObjectStorageConfig::default())
                .unwrap();
        assert!(!backend.is_writable());

        let result = backend
            .write_bytes("http://localhost:1/tiles/0/0/0.png", Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(StorageError::ReadOnly(_))));
    }

    #[tokio::test]
    async fn test_http_conditional_write_is_read_only() {
        let backend =
            StorageBackend::open("http://localhost:1/tiles", &ObjectStorageConfig::default())
                .unwrap();
        let result = backend
            .write_bytes_if_absent("http://localhost:1/tiles/metadata.json", Bytes::from_static(b"{}"))
            .await;
        assert!(matches!(result, Err(StorageError::ReadOnly(_))));
    }

    #[tokio::test]
    async fn test_http_rejects_foreign_origin() {
        let backend =
            StorageBackend::open("http://localhost:1/tiles", &ObjectStorageConfig::default())
                .unwrap();
        let result = backend.exists("http://elsewhere:1/tiles/0/0/0.png").await;
        assert!(matches!(result, Err(StorageError::InvalidUri(_))));
    }
}
