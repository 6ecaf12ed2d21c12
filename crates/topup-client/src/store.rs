//! # File Checkout Store
//!
//! Durable `CheckoutStore` keeping one small JSON file per order in a
//! directory, so gateway redirects can be resumed after the process restarts
//! and many customers can be mid-payment at once.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use topup_core::{validate_order_id, CheckoutStore, PendingPayment, ShopError, ShopResult};
use tracing::{debug, warn};

/// Pending payments persisted as `<dir>/<order_id>.json`
#[derive(Debug, Clone)]
pub struct FileCheckoutStore {
    dir: PathBuf,
}

impl FileCheckoutStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, order_id: &str) -> ShopResult<PathBuf> {
        validate_order_id(order_id)?;
        Ok(self.dir.join(format!("{}.json", order_id)))
    }
}

#[async_trait]
impl CheckoutStore for FileCheckoutStore {
    async fn save_pending(&self, pending: &PendingPayment) -> ShopResult<()> {
        let path = self.path_for(&pending.order_id)?;
        write_json_atomic(&path, pending)
            .await
            .map_err(|e| ShopError::Storage(format!("cannot save pending payment: {}", e)))?;
        debug!(order_id = %pending.order_id, path = %path.display(), "Saved pending payment");
        Ok(())
    }

    async fn load_pending(&self, order_id: &str) -> ShopResult<Option<PendingPayment>> {
        let path = self.path_for(order_id)?;
        Ok(read_json::<PendingPayment>(&path)
            .await
            .filter(|pending| pending.order_id == order_id))
    }

    async fn clear_pending(&self, order_id: &str) -> ShopResult<()> {
        let path = self.path_for(order_id)?;
        remove_file(&path)
            .await
            .map_err(|e| ShopError::Storage(format!("cannot clear pending payment: {}", e)))
    }
}

/// Write `value` as JSON to a uniquely named file next to `path`, then
/// rename it over `path`
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(io::Error::other)?
}

/// Read a JSON file. Missing and unreadable files both come back as `None`.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), "Could not read {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), "Ignoring corrupt file: {}", e);
            None
        }
    }
}

/// Remove a file; already gone is fine
pub(crate) async fn remove_file(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use topup_core::PaymentMethod;

    #[tokio::test]
    async fn test_file_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pending");

        let store = FileCheckoutStore::new(&path);
        assert!(store.load_pending("ord_1").await.unwrap().is_none());

        let pending = PendingPayment::new("ord_1", PaymentMethod::Paypal)
            .with_gateway_order_id(Some("PP-9".into()));
        store.save_pending(&pending).await.unwrap();

        let reopened = FileCheckoutStore::new(&path);
        let loaded = reopened.load_pending("ord_1").await.unwrap().unwrap();
        assert_eq!(loaded.order_id, "ord_1");
        assert_eq!(loaded.gateway_order_id.as_deref(), Some("PP-9"));

        reopened.clear_pending("ord_1").await.unwrap();
        assert!(store.load_pending("ord_1").await.unwrap().is_none());
        // Clearing twice is fine
        reopened.clear_pending("ord_1").await.unwrap();
    }

    #[tokio::test]
    async fn test_orders_kept_apart() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckoutStore::new(dir.path());

        store
            .save_pending(&PendingPayment::new("ord_a", PaymentMethod::Paypal))
            .await
            .unwrap();
        store
            .save_pending(&PendingPayment::new("ord_b", PaymentMethod::Paypal))
            .await
            .unwrap();
        store.clear_pending("ord_a").await.unwrap();

        assert!(store.load_pending("ord_a").await.unwrap().is_none());
        assert_eq!(
            store.load_pending("ord_b").await.unwrap().unwrap().order_id,
            "ord_b"
        );
    }

    #[tokio::test]
    async fn test_order_id_cannot_escape_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckoutStore::new(dir.path().join("pending"));

        let err = store.load_pending("../session").await.unwrap_err();
        assert!(matches!(err, ShopError::Validation(_)));
        let pending = PendingPayment::new("../../etc/x", PaymentMethod::Paypal);
        assert!(store.save_pending(&pending).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_saves_leave_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCheckoutStore::new(dir.path()));

        let saves = (0..8).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let pending = PendingPayment::new("ord_1", PaymentMethod::Paypal)
                    .with_gateway_order_id(Some(format!("PP-{}", i)));
                store.save_pending(&pending).await
            })
        });
        for save in saves.collect::<Vec<_>>() {
            save.await.unwrap().unwrap();
        }

        let loaded = store.load_pending("ord_1").await.unwrap().unwrap();
        assert!(loaded.gateway_order_id.unwrap().starts_with("PP-"));

        // Only the one entry; no temp files left behind
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["ord_1.json".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("ord_1.json"), b"{not json").await.unwrap();

        let store = FileCheckoutStore::new(dir.path());
        assert!(store.load_pending("ord_1").await.unwrap().is_none());
    }
}
