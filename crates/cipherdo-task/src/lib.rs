use std::path::PathBuf;

use anyhow::{bail, ensure, Result};
use async_trait::async_trait;
use cipherdo_core::{
    key_store::SecureKeyStore,
    tasks::{NewTask, Task, TaskRepository},
    values::{FieldType, FieldValue, SupportedType},
};
use cipherdo_storage::{
    encrypted_store::{
        DecodedRecord, EncryptedRecordStore, FieldDecl, Record, Schema, WriteReport,
    },
    key_manager::KeyManager,
};
use tokio::sync::Mutex;
use tracing::{instrument, warn};
use uuid::Uuid;

const ENTITY: &str = "Task";

const ID: &str = "id";
const TITLE: &str = "title";
const NOTES: &str = "notes";
const PRIORITY: &str = "priority";
const ESTIMATE_HOURS: &str = "estimate_hours";
const DONE: &str = "done";
const CREATED_AT: &str = "created_at";
const UPDATED_AT: &str = "updated_at";

/// Every task field, each bound to the transformer for its kind.
pub fn task_schema() -> Schema {
    Schema::new(
        ENTITY,
        vec![
            FieldDecl::encrypted(ID, SupportedType::Identifier),
            FieldDecl::encrypted(TITLE, SupportedType::Text),
            FieldDecl::encrypted(NOTES, SupportedType::Text).optional(),
            FieldDecl::encrypted(PRIORITY, SupportedType::Integer),
            FieldDecl::encrypted(ESTIMATE_HOURS, SupportedType::Float),
            FieldDecl::encrypted(DONE, SupportedType::Boolean),
            FieldDecl::encrypted(CREATED_AT, SupportedType::Timestamp),
            FieldDecl::encrypted(UPDATED_AT, SupportedType::Timestamp),
        ],
    )
}

/// Task repository backed by an `EncryptedRecordStore` (encrypted at rest).
pub struct EncryptedTaskRepo {
    store: Mutex<EncryptedRecordStore>,
}

impl EncryptedTaskRepo {
    pub fn new(store: EncryptedRecordStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Open the task container at `path`, creating key material on first use.
    pub fn open<S: SecureKeyStore>(
        path: impl Into<PathBuf>,
        keys: &KeyManager<S>,
    ) -> Result<Self> {
        Ok(Self::new(EncryptedRecordStore::open(path, keys, task_schema())?))
    }
}

#[async_trait]
impl TaskRepository for EncryptedTaskRepo {
    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Task>> {
        let store = self.store.lock().await;
        Ok(store
            .fetch_all()
            .iter()
            .filter_map(|row| {
                let task = from_record(row);
                if task.is_none() {
                    warn!(unreadable = ?row.unreadable, "skipping unreadable task row");
                }
                task
            })
            .collect())
    }

    #[instrument(skip(self, input))]
    async fn create(&self, input: NewTask) -> Result<Task> {
        ensure!(!input.title.trim().is_empty(), "task title must not be empty");
        ensure!(
            input.estimate_hours.is_finite(),
            "estimate must be a finite number of hours"
        );

        let mut store = self.store.lock().await;
        let task = Task::new(input);
        commit(&mut store, |store| {
            let report = store.insert(to_record(&task))?;
            ensure_sealed(&report)
        })?;
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn set_done(&self, id: Uuid, done: bool) -> Result<Task> {
        let mut store = self.store.lock().await;
        let Some((index, mut task)) = locate(&store, id) else {
            bail!("task not found");
        };

        task.done = done;
        task.updated_at = chrono::Utc::now();
        commit(&mut store, |store| {
            let report = store.update(index, to_record(&task))?;
            ensure_sealed(&report)
        })?;
        Ok(task)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut store = self.store.lock().await;
        let Some((index, _)) = locate(&store, id) else {
            return Ok(false);
        };
        commit(&mut store, |store| Ok(store.remove(index)?))?;
        Ok(true)
    }
}

/// Apply `change` and save. On any failure the in-memory rows go back to
/// what is on disk, so a rejected change never rides along with a later save.
fn commit(
    store: &mut EncryptedRecordStore,
    change: impl FnOnce(&mut EncryptedRecordStore) -> Result<()>,
) -> Result<()> {
    let checkpoint = store.checkpoint();
    let outcome = change(store).and_then(|()| {
        store.save()?;
        Ok(())
    });
    if outcome.is_err() {
        store.rollback(checkpoint);
    }
    outcome
}

fn ensure_sealed(report: &WriteReport) -> Result<()> {
    if !report.dropped.is_empty() {
        bail!("could not encrypt task fields: {}", report.dropped.join(", "));
    }
    Ok(())
}

fn locate(store: &EncryptedRecordStore, id: Uuid) -> Option<(usize, Task)> {
    store
        .fetch_all()
        .iter()
        .enumerate()
        .find_map(|(index, row)| {
            from_record(row)
                .filter(|task| task.id == id)
                .map(|task| (index, task))
        })
}

fn to_record(task: &Task) -> Record {
    let mut record = Record::from([
        (ID.to_string(), FieldValue::from(task.id)),
        (TITLE.to_string(), FieldValue::from(task.title.clone())),
        (PRIORITY.to_string(), FieldValue::from(task.priority)),
        (ESTIMATE_HOURS.to_string(), FieldValue::from(task.estimate_hours)),
        (DONE.to_string(), FieldValue::from(task.done)),
        (CREATED_AT.to_string(), FieldValue::from(task.created_at)),
        (UPDATED_AT.to_string(), FieldValue::from(task.updated_at)),
    ]);
    if let Some(notes) = &task.notes {
        record.insert(NOTES.to_string(), FieldValue::from(notes.clone()));
    }
    record
}

/// `None` when any required field is unreadable; unreadable notes read as none.
fn from_record(row: &DecodedRecord) -> Option<Task> {
    Some(Task {
        id: field(row, ID)?,
        title: field(row, TITLE)?,
        notes: field(row, NOTES),
        priority: field(row, PRIORITY)?,
        estimate_hours: field(row, ESTIMATE_HOURS)?,
        done: field(row, DONE)?,
        created_at: field(row, CREATED_AT)?,
        updated_at: field(row, UPDATED_AT)?,
    })
}

fn field<T: FieldType>(row: &DecodedRecord, name: &str) -> Option<T> {
    row.get(name).cloned().and_then(T::from_value)
}
