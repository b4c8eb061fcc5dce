//! Overlay document store
//!
//! Overlays are schemaless JSON objects owned by the front end. Each one gets
//! a server-assigned `_id`; everything else is stored as sent. The whole
//! collection lives in memory and is rewritten to a single JSON file after
//! every mutation.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// A stored overlay: a JSON object carrying an `_id` field
pub type Document = Map<String, Value>;

/// Field holding the document identifier
pub const ID_FIELD: &str = "_id";

/// Field used by the `userId` list filter
pub const USER_ID_FIELD: &str = "userId";

/// Overlay store errors
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("Overlay not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Overlay body must be a JSON object")]
    InvalidDocument,
}

/// JSON-file backed overlay collection
///
/// Documents are kept in insertion order; listing returns newest first.
pub struct OverlayStore {
    path: Option<PathBuf>,
    docs: RwLock<Vec<Document>>,
}

impl OverlayStore {
    /// Open the store at `path`
    ///
    /// A missing file starts an empty store. An unreadable or corrupt file is
    /// logged and also starts empty; it is overwritten on the next mutation.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let docs = match load(&path).await {
            Ok(docs) => {
                tracing::info!(path = %path.display(), count = docs.len(), "Overlay store loaded");
                docs
            }
            Err(OverlayError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Overlay store unreadable, starting empty: {}", e);
                Vec::new()
            }
        };

        Self {
            path: Some(path),
            docs: RwLock::new(docs),
        }
    }

    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            docs: RwLock::new(Vec::new()),
        }
    }

    /// Insert a new overlay, returning it with its assigned `_id`
    pub async fn insert(&self, fields: Value) -> Result<Document, OverlayError> {
        let mut doc = into_object(fields)?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));

        let mut docs = self.docs.write().await;
        docs.push(doc.clone());
        if let Err(e) = self.persist(&docs).await {
            docs.pop();
            return Err(e);
        }

        tracing::debug!(overlay_id = %id, "Overlay created");
        Ok(doc)
    }

    /// All overlays, newest first, optionally restricted to one `userId`
    pub async fn list(&self, user_id: Option<&str>) -> Vec<Document> {
        let docs = self.docs.read().await;
        docs.iter()
            .rev()
            .filter(|doc| match user_id {
                Some(user) => doc.get(USER_ID_FIELD).and_then(Value::as_str) == Some(user),
                None => true,
            })
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<Document> {
        let docs = self.docs.read().await;
        docs.iter().find(|doc| doc_id(doc) == Some(id)).cloned()
    }

    /// Merge `fields` into an existing overlay; `_id` cannot be changed
    pub async fn update(&self, id: &str, fields: Value) -> Result<Document, OverlayError> {
        let fields = into_object(fields)?;

        let mut docs = self.docs.write().await;
        let index = docs
            .iter()
            .position(|doc| doc_id(doc) == Some(id))
            .ok_or_else(|| OverlayError::NotFound(id.to_string()))?;

        let previous = docs[index].clone();
        for (key, value) in fields {
            if key != ID_FIELD {
                docs[index].insert(key, value);
            }
        }
        if let Err(e) = self.persist(&docs).await {
            docs[index] = previous;
            return Err(e);
        }
        let updated = docs[index].clone();

        tracing::debug!(overlay_id = %id, "Overlay updated");
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<(), OverlayError> {
        let mut docs = self.docs.write().await;
        let index = docs
            .iter()
            .position(|doc| doc_id(doc) == Some(id))
            .ok_or_else(|| OverlayError::NotFound(id.to_string()))?;

        let removed = docs.remove(index);
        if let Err(e) = self.persist(&docs).await {
            docs.insert(index, removed);
            return Err(e);
        }

        tracing::debug!(overlay_id = %id, "Overlay deleted");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    /// Rewrite the backing file. Caller holds the write lock.
    async fn persist(&self, docs: &[Document]) -> Result<(), OverlayError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so a crash never leaves a truncated file
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(docs)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

async fn load(path: &Path) -> Result<Vec<Document>, OverlayError> {
    let bytes = tokio::fs::read(path).await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let docs: Vec<Document> = serde_json::from_slice(&bytes)?;
    Ok(docs)
}

fn into_object(value: Value) -> Result<Document, OverlayError> {
    match value {
        Value::Object(mut map) => {
            map.remove(ID_FIELD);
            Ok(map)
        }
        _ => Err(OverlayError::InvalidDocument),
    }
}

fn doc_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}
