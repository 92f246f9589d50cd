use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use slatedb::Db;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::path::Path;
use tokio::sync::Mutex;
use tracing::info;

use crate::store::KvStore;
use crate::watch::{EventKind, EventLog};

/// Durable coordination store backed by SlateDB on a local filesystem.
/// In production this would use S3/R2/MinIO via the `object_store` crate.
pub struct SlateStore {
    db: Db,
    events: EventLog,
    // SlateDB has no native compare-and-swap; conditional writes from this
    // process are serialized through this mutex instead. Plain puts take it
    // too, so a CAS cannot interleave with an unconditional write.
    write_gate: Mutex<()>,
}

impl SlateStore {
    /// Open (or create) a store rooted at `path` on the local filesystem.
    pub async fn open(path: &str) -> Result<Arc<Self>> {
        info!("Opening SlateDB coordination store at {}", path);

        std::fs::create_dir_all(path)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory {}: {}", path, e))?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| anyhow::anyhow!("Failed to create local object store: {}", e))?,
        );
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open SlateDB: {}", e))?;
        Ok(Arc::new(Self {
            db,
            events: EventLog::default(),
            write_gate: Mutex::new(()),
        }))
    }

    /// Gracefully close the store.
    pub async fn close(&self) -> Result<()> {
        info!("Closing SlateDB coordination store");
        self.db
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB close failed: {}", e))
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("SlateDB get failed: {}", e)),
        }
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db
            .put(key.as_bytes(), value)
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB put failed: {}", e))?;
        self.events
            .record(EventKind::Put, key.to_string(), Some(value.to_vec()))
            .await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.db
            .delete(key.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB delete failed: {}", e))?;
        self.events
            .record(EventKind::Delete, key.to_string(), None)
            .await;
        Ok(())
    }
}

#[async_trait]
impl KvStore for SlateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.read(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        self.write(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        self.remove(key).await
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut results = Vec::new();
        let mut iter = self
            .db
            .scan_prefix(prefix.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB scan_prefix failed: {}", e))?;

        while let Ok(Some(kv)) = iter.next().await {
            let key = String::from_utf8_lossy(&kv.key).to_string();
            results.push((key, kv.value.to_vec()));
        }
        Ok(results)
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
    ) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        if self.read(key).await?.as_deref() != expected {
            return Ok(false);
        }
        self.write(key, value).await?;
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        if self.read(key).await?.as_deref() != Some(expected) {
            return Ok(false);
        }
        self.remove(key).await?;
        Ok(true)
    }

    fn event_log(&self) -> &EventLog {
        &self.events
    }
}
