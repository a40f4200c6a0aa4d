// src/lake.rs

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    gcp::{GcpCredentialProvider, GoogleCloudStorageBuilder},
    local::LocalFileSystem,
    memory::InMemory,
    path::Path as ObjectPath,
    ObjectStore, PutPayload, WriteMultipart,
};
use std::{fs, path::Path, sync::Arc};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use url::Url;

const UPLOAD_BUFFER: usize = 8 * 1024 * 1024;
const UPLOAD_CONCURRENCY: usize = 4;

/// Object storage holding every tier of the lake.
///
/// Keys are plain `/`-separated strings such as `silver/parquet/prova/x.parquet`.
#[derive(Clone)]
pub struct Lake {
    store: Arc<dyn ObjectStore>,
    root: String,
    gcp_credentials: Option<GcpCredentialProvider>,
}

impl std::fmt::Debug for Lake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lake").field("root", &self.root).finish()
    }
}

impl Lake {
    /// Wrap an existing store. `root` is what [`Lake::uri`] prefixes keys with.
    pub fn new(store: Arc<dyn ObjectStore>, root: impl Into<String>) -> Self {
        Self {
            store,
            root: root.into(),
            gcp_credentials: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory://")
    }

    /// Open the store named by `bucket`:
    /// - `memory://` → a fresh in-memory store
    /// - `file:///some/dir` → that local directory (created if missing)
    /// - `gs://name` or a bare `name` → Google Cloud Storage
    pub fn open(bucket: &str, credentials: Option<&Path>) -> Result<Self> {
        if bucket.starts_with("memory://") {
            info!("lake: in-memory store");
            return Ok(Self::in_memory());
        }

        if bucket.starts_with("file://") {
            let url = Url::parse(bucket).with_context(|| format!("parsing {}", bucket))?;
            let dir = url
                .to_file_path()
                .map_err(|_| anyhow!("{} is not a local directory URL", bucket))?;
            fs::create_dir_all(&dir)
                .with_context(|| format!("creating lake directory {}", dir.display()))?;
            let store = LocalFileSystem::new_with_prefix(&dir)
                .with_context(|| format!("opening local store at {}", dir.display()))?;
            info!(dir = %dir.display(), "lake: local filesystem");
            return Ok(Self::new(Arc::new(store), bucket));
        }

        let name = bucket
            .strip_prefix("gs://")
            .unwrap_or(bucket)
            .trim_end_matches('/');
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(name);
        if let Some(path) = credentials {
            builder = builder.with_service_account_path(path.to_string_lossy());
        }
        let store = builder
            .build()
            .with_context(|| format!("connecting to bucket {}", name))?;
        info!(bucket = name, "lake: google cloud storage");
        let credentials = Arc::clone(store.credentials());
        Ok(Self {
            gcp_credentials: Some(credentials),
            ..Self::new(Arc::new(store), format!("gs://{}", name))
        })
    }

    /// Token source of a Google Cloud Storage lake, shared with other Google APIs.
    pub fn gcp_credentials(&self) -> Option<GcpCredentialProvider> {
        self.gcp_credentials.clone()
    }

    /// Every key under `prefix` (a directory-style prefix), sorted.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim_matches('/');
        let location = (!prefix.is_empty()).then(|| ObjectPath::from(prefix));

        let objects: Vec<_> = self
            .store
            .list(location.as_ref())
            .try_collect()
            .await
            .with_context(|| format!("listing {}", self.uri(prefix)))?;

        let mut keys: Vec<String> = objects.into_iter().map(|o| o.location.to_string()).collect();
        keys.sort();
        debug!(prefix, count = keys.len(), "listed objects");
        Ok(keys)
    }

    pub async fn download(&self, key: &str) -> Result<Bytes> {
        let location = ObjectPath::from(key);
        let data = self
            .store
            .get(&location)
            .await
            .with_context(|| format!("downloading {}", self.uri(key)))?
            .bytes()
            .await
            .with_context(|| format!("reading {}", self.uri(key)))?;
        debug!(key, bytes = data.len(), "downloaded");
        Ok(data)
    }

    pub async fn upload(&self, data: impl Into<Bytes>, key: &str) -> Result<()> {
        let data: Bytes = data.into();
        let len = data.len();
        self.store
            .put(&ObjectPath::from(key), PutPayload::from(data))
            .await
            .with_context(|| format!("uploading {}", self.uri(key)))?;
        debug!(key, bytes = len, "uploaded");
        Ok(())
    }

    /// Stream a local file to `key` in multipart pieces. Returns the byte count.
    pub async fn upload_file(&self, local: &Path, key: &str) -> Result<u64> {
        let mut file = tokio::fs::File::open(local)
            .await
            .with_context(|| format!("opening {}", local.display()))?;
        let upload = self
            .store
            .put_multipart(&ObjectPath::from(key))
            .await
            .with_context(|| format!("starting upload of {}", self.uri(key)))?;
        let mut writer = WriteMultipart::new(upload);

        let mut buf = vec![0u8; UPLOAD_BUFFER];
        let mut total = 0u64;
        loop {
            let n = match file.read(&mut buf).await {
                Ok(n) => n,
                Err(err) => {
                    let _ = writer.abort().await;
                    return Err(err).with_context(|| format!("reading {}", local.display()));
                }
            };
            if n == 0 {
                break;
            }
            writer
                .wait_for_capacity(UPLOAD_CONCURRENCY)
                .await
                .with_context(|| format!("uploading {}", self.uri(key)))?;
            writer.write(&buf[..n]);
            total += n as u64;
        }

        writer
            .finish()
            .await
            .with_context(|| format!("uploading {}", self.uri(key)))?;
        debug!(key, bytes = total, "uploaded file");
        Ok(total)
    }

    /// Warehouse-visible location of `key`, e.g. `gs://bucket/temp/prova/x.parquet`.
    pub fn uri(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        if self.root.ends_with('/') {
            format!("{}{}", self.root, key)
        } else {
            format!("{}/{}", self.root, key)
        }
    }
}

/// Last path segment of a key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// File name without its final extension.
pub fn file_stem(key: &str) -> &str {
    let name = file_name(key);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}
