use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};

use crate::domain::Directory;
use crate::error::{StoreError, StoreResult};
use crate::schema::{FieldDescriptor, FieldDescriptors, LogicalField};
use crate::store::{MemoryStore, Query, Record, RecordStore, StoreEvent, StoredRecord, UniqueKey};

const RECORDS_MARKER: &str = "\n=== RECORDS ===\n";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML header: {0}")]
    TomlDecode(#[from] toml::de::Error),
    #[error("failed to encode TOML header: {0}")]
    TomlEncode(#[from] toml::ser::Error),
    #[error("failed to parse JSONL record: {0}")]
    JsonDecode(serde_json::Error),
    #[error("failed to encode JSONL record: {0}")]
    JsonEncode(serde_json::Error),
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(err) => StoreError::Io(err),
            StorageError::TomlEncode(_) | StorageError::JsonEncode(_) => StoreError::Encode(err.to_string()),
            StorageError::TomlDecode(_) | StorageError::JsonDecode(_) => StoreError::Decode(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceHeader {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub directory: Directory,
    #[serde(default = "default_fields")]
    pub fields: FieldDescriptors,
}

impl WorkspaceHeader {
    pub fn new() -> Self {
        Self {
            schema_version: 1,
            created_at: Utc::now(),
            directory: Directory::default(),
            fields: default_fields(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub header: WorkspaceHeader,
    pub records: Vec<StoredRecord>,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            header: WorkspaceHeader::new(),
            records: Vec::new(),
        }
    }
}

/// Field schema of a freshly created workspace: every logical field under its assumed code.
pub fn default_fields() -> FieldDescriptors {
    LogicalField::ALL
        .iter()
        .map(|field| {
            let field_type = match field {
                LogicalField::StartDate | LogicalField::EndDate => "DATETIME",
                LogicalField::CandidateDates => "SUBTABLE",
                LogicalField::Assignee => "USER_SELECT",
                _ => "SINGLE_LINE_TEXT",
            };
            (
                field.default_code().to_string(),
                FieldDescriptor::new(field_type, field.to_string()),
            )
        })
        .collect()
}

pub fn load_workspace(path: &Path) -> Result<Workspace, StorageError> {
    let raw = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Workspace::new()),
        Err(err) => return Err(StorageError::Io(err)),
    };

    if raw.trim().is_empty() {
        return Ok(Workspace::new());
    }

    let (header_blob, records_blob) = raw
        .split_once(RECORDS_MARKER)
        .unwrap_or((raw.as_str(), ""));

    let header: WorkspaceHeader = toml::from_str(header_blob)?;
    let mut records = Vec::new();
    for line in records_blob.lines() {
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(line).map_err(StorageError::JsonDecode)?);
    }

    Ok(Workspace { header, records })
}

pub fn render_workspace(workspace: &Workspace) -> Result<String, StorageError> {
    let mut out = toml::to_string_pretty(&workspace.header)?;
    out.push_str(RECORDS_MARKER);
    for record in &workspace.records {
        out.push_str(&serde_json::to_string(record).map_err(StorageError::JsonEncode)?);
        out.push('\n');
    }
    Ok(out)
}

fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// A [`RecordStore`] persisted to a single workspace file after every write.
pub struct FileStore {
    path: PathBuf,
    header: WorkspaceHeader,
    inner: MemoryStore,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(path: &Path, unique_key: Option<UniqueKey>) -> Result<Self, StorageError> {
        let workspace = load_workspace(path)?;
        let mut inner = MemoryStore::new()
            .with_fields(workspace.header.fields.clone())
            .with_contents(workspace.records, workspace.header.directory.clone());
        if let Some(unique_key) = unique_key {
            inner = inner.with_unique_key(unique_key);
        }

        Ok(Self {
            path: path.to_path_buf(),
            header: workspace.header,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn persist(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let (records, directory) = self.inner.snapshot().await;
        let mut header = self.header.clone();
        header.directory = directory;
        let rendered = render_workspace(&Workspace { header, records })?;
        ensure_parent(&self.path)?;
        tokio::fs::write(&self.path, rendered).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn list(&self, query: &Query) -> StoreResult<Vec<StoredRecord>> {
        self.inner.list(query).await
    }

    async fn create(&self, record: Record) -> StoreResult<String> {
        let id = self.inner.create(record).await?;
        self.persist().await?;
        Ok(id)
    }

    async fn update(&self, id: &str, record: Record) -> StoreResult<()> {
        self.inner.update(id, record).await?;
        self.persist().await
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.inner.delete(id).await?;
        self.persist().await
    }

    async fn describe_fields(&self) -> StoreResult<FieldDescriptors> {
        self.inner.describe_fields().await
    }

    async fn load_directory(&self) -> StoreResult<Directory> {
        self.inner.load_directory().await
    }

    async fn save_directory(&self, directory: &Directory) -> StoreResult<()> {
        self.inner.save_directory(directory).await?;
        self.persist().await
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        self.inner.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use serde_json::json;

    use super::{FileStore, load_workspace};
    use crate::domain::Directory;
    use crate::store::{Query, Record, RecordStore};

    #[tokio::test]
    async fn writes_survive_reopening() {
        let path = temp_file("taskboard_storage_reopen.board");
        let _ = fs::remove_file(&path);

        let store = FileStore::open(&path, None).expect("open");
        let mut record = Record::new();
        record.insert("task_name".to_string(), json!("Write report"));
        record.insert("start_date".to_string(), json!("2024-03-10"));
        let id = store.create(record).await.expect("create");

        let mut directory = Directory::default();
        directory
            .add_project("Personal".to_string(), Some("#3366ff".to_string()))
            .expect("project");
        store.save_directory(&directory).await.expect("directory");

        let reopened = FileStore::open(&path, None).expect("reopen");
        let rows = reopened.list(&Query::all()).await.expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        let loaded = reopened.load_directory().await.expect("directory");
        assert_eq!(loaded.projects.len(), 1);
        assert!(reopened.describe_fields().await.expect("fields").contains_key("status"));

        let workspace = load_workspace(&path).expect("raw load");
        assert_eq!(workspace.records.len(), 1);
        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn unknown_field_codes_are_rejected() {
        let path = temp_file("taskboard_storage_unknown.board");
        let _ = fs::remove_file(&path);
        let store = FileStore::open(&path, None).expect("open");

        let mut record = Record::new();
        record.insert("mystery".to_string(), json!("x"));
        assert!(store.create(record).await.is_err());
        assert!(!path.exists());
    }

    fn temp_file(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("{}_{}", name, std::process::id()));
        path
    }
}
