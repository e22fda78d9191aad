//! In-process store implementing every repository trait.
//!
//! All state sits behind one `RwLock`, so each repository call is atomic with
//! respect to every other call. Used by tests and by development setups that
//! run without `DATABASE_URL`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cairn_core::models::{
    FileRecord, FileTransferProgress, FileType, FileWorkerBinding, TransferRecord, TransferState,
    Worker,
};
use cairn_core::AppError;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::binding::{already_bound, BindingRepository};
use super::file::FileRepository;
use super::transfer::TransferRepository;
use super::worker::WorkerRepository;

#[derive(Default)]
struct State {
    /// Registration order is the enumeration order used for ties.
    workers: Vec<Worker>,
    files: HashMap<i64, FileRecord>,
    bindings: HashMap<i64, FileWorkerBinding>,
    transfers: HashMap<i64, TransferRecord>,
}

impl State {
    fn insert_file_with_binding(
        &mut self,
        record: &FileRecord,
        worker_id: i64,
    ) -> Result<(), AppError> {
        if self.bindings.contains_key(&record.id) {
            return Err(already_bound(record.id));
        }
        if self.files.contains_key(&record.id) {
            return Err(AppError::Internal(format!(
                "file {} already exists",
                record.id
            )));
        }
        if self
            .files
            .values()
            .any(|f| f.unique_name == record.unique_name)
        {
            return Err(AppError::Internal(format!(
                "unique name {} is already taken",
                record.unique_name
            )));
        }
        self.files.insert(record.id, record.clone());
        self.bindings
            .insert(record.id, FileWorkerBinding::new(record.id, worker_id));
        Ok(())
    }

    fn finish_transfer(
        &mut self,
        id: i64,
        progress: &FileTransferProgress,
    ) -> Result<Option<&mut TransferRecord>, AppError> {
        let transfer = self
            .transfers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("transfer {} not found", id)))?;
        if transfer.progress.state.is_terminal() {
            return Ok(None);
        }
        transfer.progress = progress.clone();
        transfer.updated_at = Utc::now();
        Ok(Some(transfer))
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, or refresh the one with the same id.
    pub async fn upsert_worker(&self, worker: Worker) {
        let mut state = self.state.write().await;
        match state.workers.iter_mut().find(|w| w.id == worker.id) {
            Some(existing) => *existing = worker,
            None => state.workers.push(worker),
        }
    }

    pub async fn remove_worker(&self, id: i64) -> bool {
        let mut state = self.state.write().await;
        let before = state.workers.len();
        state.workers.retain(|w| w.id != id);
        state.workers.len() != before
    }

    pub async fn file_count(&self) -> usize {
        self.state.read().await.files.len()
    }

    pub async fn binding_count(&self) -> usize {
        self.state.read().await.bindings.len()
    }

    /// Drop a binding while keeping its file, leaving the record dangling.
    pub async fn detach_binding(&self, file_id: i64) -> bool {
        self.state.write().await.bindings.remove(&file_id).is_some()
    }
}

#[async_trait]
impl WorkerRepository for MemoryStore {
    async fn list_ordered_by_available_space_desc(&self) -> Result<Vec<Worker>, AppError> {
        let mut workers = self.state.read().await.workers.clone();
        // stable: equal space keeps registration order
        workers.sort_by(|a, b| b.available_space.cmp(&a.available_space));
        Ok(workers)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Worker>, AppError> {
        Ok(self
            .state
            .read()
            .await
            .workers
            .iter()
            .find(|w| w.id == id)
            .cloned())
    }
}

#[async_trait]
impl BindingRepository for MemoryStore {
    async fn find_by_file_id(&self, file_id: i64) -> Result<Option<FileWorkerBinding>, AppError> {
        Ok(self.state.read().await.bindings.get(&file_id).cloned())
    }

    async fn save(&self, binding: &FileWorkerBinding) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.bindings.contains_key(&binding.file_id) {
            return Err(already_bound(binding.file_id));
        }
        state.bindings.insert(binding.file_id, binding.clone());
        Ok(())
    }
}

#[async_trait]
impl FileRepository for MemoryStore {
    async fn create_with_binding(
        &self,
        record: &FileRecord,
        worker_id: i64,
    ) -> Result<(), AppError> {
        self.state
            .write()
            .await
            .insert_file_with_binding(record, worker_id)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<FileRecord>, AppError> {
        Ok(self.state.read().await.files.get(&id).cloned())
    }

    async fn get_by_unique_name(&self, unique_name: &str) -> Result<Option<FileRecord>, AppError> {
        Ok(self
            .state
            .read()
            .await
            .files
            .values()
            .find(|f| f.unique_name == unique_name)
            .cloned())
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        file_type: Option<FileType>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<FileRecord>, u64), AppError> {
        let state = self.state.read().await;
        let mut owned: Vec<&FileRecord> = state
            .files
            .values()
            .filter(|f| f.owner_id == Some(owner_id))
            .filter(|f| file_type.map_or(true, |t| f.file_type == t))
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = owned.len() as u64;
        let page = owned
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn delete_with_binding(&self, id: i64) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        state.bindings.remove(&id);
        Ok(state.files.remove(&id).is_some())
    }

    async fn find_oldest(&self) -> Result<Option<FileRecord>, AppError> {
        Ok(self
            .state
            .read()
            .await
            .files
            .values()
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }
}

#[async_trait]
impl TransferRepository for MemoryStore {
    async fn create(&self, record: &TransferRecord) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.transfers.contains_key(&record.id) {
            return Err(AppError::Internal(format!(
                "transfer {} already exists",
                record.id
            )));
        }
        state.transfers.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<TransferRecord>, AppError> {
        Ok(self.state.read().await.transfers.get(&id).cloned())
    }

    async fn update_progress(
        &self,
        id: i64,
        progress: &FileTransferProgress,
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if let Some(transfer) = state.transfers.get_mut(&id) {
            if transfer.progress.state == TransferState::InProgress {
                transfer.progress.transferred_size = progress.transferred_size;
                transfer.progress.total_size = progress.total_size;
                transfer.progress.message = progress.message.clone();
                transfer.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn mark_succeeded(
        &self,
        id: i64,
        progress: &FileTransferProgress,
        file: &FileRecord,
    ) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        let worker_id = match state.transfers.get(&id) {
            Some(t) if t.progress.state == TransferState::InProgress => t.worker_id,
            Some(_) => return Ok(false),
            None => return Err(AppError::NotFound(format!("transfer {} not found", id))),
        };
        // file first so a rejected insert leaves the transfer untouched
        state.insert_file_with_binding(file, worker_id)?;
        let mut succeeded = progress.clone();
        succeeded.state = TransferState::Succeeded;
        Ok(state.finish_transfer(id, &succeeded)?.is_some())
    }

    async fn mark_failed(
        &self,
        id: i64,
        progress: &FileTransferProgress,
    ) -> Result<bool, AppError> {
        let mut failed = progress.clone();
        failed.state = TransferState::Failed;
        Ok(self
            .state
            .write()
            .await
            .finish_transfer(id, &failed)?
            .is_some())
    }
}
