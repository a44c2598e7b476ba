use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use cipherdo_core::{
    key_store::SecureKeyStore,
    values::{FieldValue, SupportedType},
};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    cipher::{CipherError, FieldCipher},
    key_manager::{KeyError, KeyManager},
    registry::{standard_transformers, RegistryError, TransformerRegistry},
};

/// Plaintext view of one stored row, keyed by field name.
pub type Record = BTreeMap<String, FieldValue>;

/// How a field is held by the container. Encrypted fields are opaque bytes,
/// never native typed columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeStorage {
    TransformedBinary,
}

/// Schema entry binding a field to its transformer by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub kind: SupportedType,
    pub transformer: String,
    pub storage: AttributeStorage,
    pub required: bool,
}

impl FieldDecl {
    pub fn encrypted(name: impl Into<String>, kind: SupportedType) -> Self {
        Self {
            name: name.into(),
            kind,
            transformer: kind.transformer_name().to_string(),
            storage: AttributeStorage::TransformedBinary,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub entity: String,
    pub fields: Vec<FieldDecl>,
}

impl Schema {
    pub fn new(entity: impl Into<String>, fields: Vec<FieldDecl>) -> Self {
        Self {
            entity: entity.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|decl| decl.name == name)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key material unavailable: {0}")]
    Key(#[from] KeyError),
    #[error("cipher setup failed: {0}")]
    Cipher(#[from] CipherError),
    #[error("transformer registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("field {field} is declared {declared} but {transformer} handles {actual}")]
    SchemaMismatch {
        field: String,
        declared: SupportedType,
        transformer: String,
        actual: SupportedType,
    },
    #[error("entity {entity} has no field named {field}")]
    UnknownField { entity: String, field: String },
    #[error("entity {entity} requires field {field}")]
    MissingField { entity: String, field: String },
    #[error("no row at index {index}; container holds {len}")]
    RowOutOfRange { index: usize, len: usize },
    #[error("container holds entity {found}, expected {expected}")]
    EntityMismatch { expected: String, found: String },
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Outcome of writing records into the container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub rows: usize,
    /// `row index/field` for every value whose forward transform failed.
    pub dropped: Vec<String>,
}

/// Returned once the container file has been durably replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub path: PathBuf,
    pub rows: usize,
}

/// A fetched row. Fields that could not be reversed are absent from
/// `values` and listed in `unreadable`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub values: Record,
    pub unreadable: Vec<String>,
}

impl DecodedRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }
}

type StoredRow = BTreeMap<String, String>;

/// Sealed rows captured by [`EncryptedRecordStore::checkpoint`].
#[derive(Debug, Clone)]
pub struct Checkpoint {
    rows: Vec<StoredRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredContainer {
    entity: String,
    rows: Vec<StoredRow>,
}

/// File-backed container whose every field is sealed by a registered
/// transformer. Rows stay sealed in memory; plaintext exists only in the
/// records handed to and returned from callers.
#[derive(Debug)]
pub struct EncryptedRecordStore {
    path: PathBuf,
    schema: Schema,
    registry: TransformerRegistry,
    rows: Vec<StoredRow>,
}

impl EncryptedRecordStore {
    /// Fetch key material, build the shared cipher, register transformers,
    /// then open the container. Key or cipher failures are fatal.
    #[instrument(skip_all, fields(entity = %schema.entity))]
    pub fn open<S: SecureKeyStore>(
        path: impl Into<PathBuf>,
        keys: &KeyManager<S>,
        schema: Schema,
    ) -> Result<Self, StoreError> {
        let material = keys.key_material()?;
        let cipher = Arc::new(FieldCipher::new(&material)?);
        Self::open_with_cipher(path, cipher, schema)
    }

    pub fn open_with_cipher(
        path: impl Into<PathBuf>,
        cipher: Arc<FieldCipher>,
        schema: Schema,
    ) -> Result<Self, StoreError> {
        let mut registry = TransformerRegistry::new();
        registry.register_transformers(standard_transformers(cipher))?;
        bind_schema(&registry, &schema)?;

        let path = path.into();
        let rows = match read_container(&path)? {
            Some(container) if container.entity != schema.entity => {
                return Err(StoreError::EntityMismatch {
                    expected: schema.entity,
                    found: container.entity,
                });
            }
            Some(container) => container.rows,
            None => Vec::new(),
        };
        debug!(?path, rows = rows.len(), "opened encrypted container");

        Ok(Self {
            path,
            schema,
            registry,
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Capture the current rows so a failed change can be undone.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            rows: self.rows.clone(),
        }
    }

    /// Return to the rows held when `checkpoint` was taken.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        debug!(
            discarded = self.rows.len(),
            restored = checkpoint.rows.len(),
            "rolled back unsaved changes"
        );
        self.rows = checkpoint.rows;
    }

    /// Seal and append one record. Not persisted until [`Self::save`].
    pub fn insert(&mut self, record: Record) -> Result<WriteReport, StoreError> {
        let mut report = WriteReport::default();
        let row = self.seal_row(self.rows.len(), record, &mut report)?;
        self.rows.push(row);
        report.rows = 1;
        Ok(report)
    }

    /// Re-seal the row at `index` with new values.
    pub fn update(&mut self, index: usize, record: Record) -> Result<WriteReport, StoreError> {
        self.check_index(index)?;
        let mut report = WriteReport::default();
        let row = self.seal_row(index, record, &mut report)?;
        self.rows[index] = row;
        report.rows = 1;
        Ok(report)
    }

    pub fn remove(&mut self, index: usize) -> Result<(), StoreError> {
        self.check_index(index)?;
        self.rows.remove(index);
        Ok(())
    }

    /// Replace every row. Validation happens before anything is discarded.
    pub fn replace_all(&mut self, records: Vec<Record>) -> Result<WriteReport, StoreError> {
        let mut report = WriteReport::default();
        let rows = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| self.seal_row(index, record, &mut report))
            .collect::<Result<Vec<_>, _>>()?;
        report.rows = rows.len();
        self.rows = rows;
        Ok(report)
    }

    pub fn fetch(&self, index: usize) -> Option<DecodedRecord> {
        self.rows.get(index).map(|row| self.open_row(row))
    }

    /// Reverse every row. Never fails: unreadable fields read as absent.
    pub fn fetch_all(&self) -> Vec<DecodedRecord> {
        self.rows.iter().map(|row| self.open_row(row)).collect()
    }

    /// Atomically write the container; returns after the file is in place.
    #[instrument(skip_all, fields(entity = %self.schema.entity))]
    pub fn save(&self) -> Result<SaveReport, StoreError> {
        let container = StoredContainer {
            entity: self.schema.entity.clone(),
            rows: self.rows.clone(),
        };
        write_container(&self.path, &container)?;
        info!(rows = self.rows.len(), "saved encrypted container");
        Ok(SaveReport {
            path: self.path.clone(),
            rows: self.rows.len(),
        })
    }

    fn check_index(&self, index: usize) -> Result<(), StoreError> {
        if index < self.rows.len() {
            Ok(())
        } else {
            Err(StoreError::RowOutOfRange {
                index,
                len: self.rows.len(),
            })
        }
    }

    fn seal_row(
        &self,
        index: usize,
        record: Record,
        report: &mut WriteReport,
    ) -> Result<StoredRow, StoreError> {
        if let Some(field) = record.keys().find(|name| self.schema.field(name).is_none()) {
            return Err(StoreError::UnknownField {
                entity: self.schema.entity.clone(),
                field: field.clone(),
            });
        }
        if let Some(decl) = self
            .schema
            .fields
            .iter()
            .find(|decl| decl.required && !record.contains_key(&decl.name))
        {
            return Err(StoreError::MissingField {
                entity: self.schema.entity.clone(),
                field: decl.name.clone(),
            });
        }

        let mut row = StoredRow::new();
        for (name, value) in record {
            let decl = self.schema.field(&name).ok_or_else(|| StoreError::UnknownField {
                entity: self.schema.entity.clone(),
                field: name.clone(),
            })?;
            let transformer = self.registry.get(&decl.transformer)?;
            match transformer.forward_value(&value) {
                Some(sealed) => {
                    row.insert(name, URL_SAFE_NO_PAD.encode(sealed));
                }
                None => report.dropped.push(format!("{index}/{name}")),
            }
        }
        Ok(row)
    }

    fn open_row(&self, row: &StoredRow) -> DecodedRecord {
        let mut decoded = DecodedRecord {
            values: Record::new(),
            unreadable: Vec::new(),
        };

        for (name, encoded) in row {
            let Some(decl) = self.schema.field(name) else {
                warn!(field = %name, "stored field is not in the schema; skipping");
                decoded.unreadable.push(name.clone());
                continue;
            };
            let sealed = URL_SAFE_NO_PAD.decode(encoded);
            let value = match (sealed, self.registry.get(&decl.transformer)) {
                (Ok(sealed), Ok(transformer)) => transformer.reverse_value(&sealed),
                (Err(err), _) => {
                    warn!(field = %name, error = %err, "stored field is not valid base64");
                    None
                }
                (_, Err(err)) => {
                    warn!(field = %name, error = %err, "no transformer for stored field");
                    None
                }
            };
            match value {
                Some(value) => {
                    decoded.values.insert(name.clone(), value);
                }
                None => decoded.unreadable.push(name.clone()),
            }
        }
        decoded
    }
}

fn bind_schema(registry: &TransformerRegistry, schema: &Schema) -> Result<(), StoreError> {
    for decl in &schema.fields {
        let transformer = registry.get(&decl.transformer)?;
        if transformer.kind() != decl.kind {
            return Err(StoreError::SchemaMismatch {
                field: decl.name.clone(),
                declared: decl.kind,
                transformer: decl.transformer.clone(),
                actual: transformer.kind(),
            });
        }
    }
    Ok(())
}

fn write_container(path: &Path, container: &StoredContainer) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec(container).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.as_file().sync_all().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn read_container(path: &Path) -> Result<Option<StoredContainer>, StoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    if buf.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&buf).map(Some).map_err(storage_err)
}

fn storage_err<E: ToString>(err: E) -> StoreError {
    StoreError::Storage {
        reason: err.to_string(),
    }
}
