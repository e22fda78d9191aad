//! File broker: the master's entry point for every file operation.
//!
//! New files go selector -> worker -> commit (file row plus binding, in one
//! step). Existing files go binding -> worker. Every operation receives the
//! caller's [`RequestContext`] explicitly.

use std::sync::Arc;

use cairn_core::models::{FileRecord, FileType, FileView, PageRequest, PageView};
use cairn_core::{AppError, BearerToken, Coordinator, RequestContext, SchedulingStrategy, Worker};
use cairn_db::{BindingRepository, FileRepository, TransferRepository, WorkerRepository};
use cairn_proxy::{UploadPayload, WorkerClient, WorkerClientConfig, WorkerDownload};

use crate::resolver::BindingResolver;
use crate::selector::{build_selector, OperationKind, WorkerSelector};

/// Stores the broker reads and writes.
#[derive(Clone)]
pub struct BrokerRepositories {
    pub workers: Arc<dyn WorkerRepository>,
    pub files: Arc<dyn FileRepository>,
    pub bindings: Arc<dyn BindingRepository>,
    pub transfers: Arc<dyn TransferRepository>,
}

/// A download ready to be opened, with the name to present it under.
#[derive(Debug)]
pub struct NamedDownload {
    pub name: String,
    pub file_type: FileType,
    pub resource: WorkerDownload,
}

pub struct FileBroker {
    pub(crate) selector: Arc<dyn WorkerSelector>,
    pub(crate) resolver: BindingResolver,
    pub(crate) proxy: WorkerClient,
    pub(crate) files: Arc<dyn FileRepository>,
    pub(crate) transfers: Arc<dyn TransferRepository>,
}

impl FileBroker {
    pub fn new(
        coordinator: Coordinator,
        selector: Arc<dyn WorkerSelector>,
        proxy: WorkerClient,
        repositories: BrokerRepositories,
    ) -> Self {
        Self {
            selector,
            resolver: BindingResolver::new(
                coordinator,
                repositories.bindings,
                repositories.workers,
            ),
            proxy,
            files: repositories.files,
            transfers: repositories.transfers,
        }
    }

    /// Build the selector for `strategy` and a worker client, then the broker.
    pub fn from_parts(
        coordinator: Coordinator,
        strategy: SchedulingStrategy,
        client_config: WorkerClientConfig,
        repositories: BrokerRepositories,
    ) -> Result<Self, AppError> {
        let selector = build_selector(strategy, coordinator, repositories.workers.clone());
        let proxy = WorkerClient::new(coordinator, client_config)?;
        Ok(Self::new(coordinator, selector, proxy, repositories))
    }

    pub fn resolver(&self) -> &BindingResolver {
        &self.resolver
    }

    #[tracing::instrument(skip(self, ctx), fields(user_id = ?ctx.user_id))]
    pub async fn get_user_file_views(
        &self,
        ctx: &RequestContext,
        file_type: Option<FileType>,
        page: PageRequest,
    ) -> Result<PageView<FileView>, AppError> {
        let owner_id = ctx
            .user_id
            .ok_or_else(|| AppError::Unauthorized("Listing files requires authentication".to_string()))?;

        let (records, total) = self
            .files
            .list_by_owner(owner_id, file_type, page.limit(), page.offset())
            .await?;

        Ok(PageView::new(records, page, total).map(FileView::from))
    }

    pub async fn get_file_view_by_id(
        &self,
        ctx: &RequestContext,
        id: i64,
    ) -> Result<FileView, AppError> {
        let record = self.visible_file(ctx, id).await?;
        Ok(record.into())
    }

    pub async fn get_file_view_by_unique_name(
        &self,
        ctx: &RequestContext,
        unique_name: &str,
    ) -> Result<FileView, AppError> {
        let record = self.visible_file_by_name(ctx, unique_name).await?;
        Ok(record.into())
    }

    /// Look a file up by unique name and require it to be of `expected_type`.
    pub async fn get_file_by_unique_name(
        &self,
        ctx: &RequestContext,
        unique_name: &str,
        expected_type: FileType,
    ) -> Result<FileRecord, AppError> {
        let record = self.visible_file_by_name(ctx, unique_name).await?;
        if record.file_type != expected_type {
            return Err(AppError::InvalidInput(format!(
                "file {} is a {}, expected {}",
                unique_name, record.file_type, expected_type
            )));
        }
        Ok(record)
    }

    /// Remove the file and its binding; the worker copy is deleted in the background.
    #[tracing::instrument(skip(self, ctx), fields(user_id = ?ctx.user_id))]
    pub async fn delete_by_id(&self, ctx: &RequestContext, id: i64) -> Result<(), AppError> {
        let record = self.find_file(id).await?;
        if !ctx.can_manage(record.owner_id) {
            return Err(AppError::Forbidden(format!(
                "not allowed to delete file {}",
                id
            )));
        }

        let worker = self.owning_worker_for_cleanup(id).await;
        if !self.files.delete_with_binding(id).await? {
            return Err(AppError::NotFound(format!("file {} not found", id)));
        }
        tracing::info!(file_id = id, "File deleted");

        if let Some(worker) = worker {
            self.spawn_worker_delete(worker, id, ctx.credential().cloned());
        }
        Ok(())
    }

    /// Forward an upload to the selected worker and record where it went.
    #[tracing::instrument(skip(self, ctx, upload), fields(user_id = ?ctx.user_id, file_type = %file_type))]
    pub async fn handle_upload_request(
        &self,
        ctx: &RequestContext,
        file_type: FileType,
        upload: UploadPayload,
    ) -> Result<i64, AppError> {
        let worker = self.selector.select_worker(OperationKind::Upload).await?;
        let original_name = upload.file_name().to_string();
        let declared_length = upload.content_length();
        let sent = upload.sent_bytes();

        let file_id = self
            .proxy
            .forward_upload(&worker, file_type, upload, ctx.credential())
            .await
            .map_err(|e| {
                tracing::warn!(worker_id = worker.id, error = %e, "Worker upload failed");
                AppError::from(e)
            })?;

        let size = i64::try_from(declared_length.unwrap_or_else(|| sent.get())).ok();
        let record = FileRecord::new(file_id, file_type, original_name, ctx.user_id, size);
        if let Err(e) = self.files.create_with_binding(&record, worker.id).await {
            tracing::error!(
                file_id,
                worker_id = worker.id,
                error = %e,
                "Failed to record uploaded file, removing it from the worker"
            );
            self.spawn_worker_delete(worker, file_id, ctx.credential().cloned());
            return Err(e);
        }

        tracing::info!(file_id, worker_id = worker.id, "File uploaded");
        Ok(file_id)
    }

    /// Resolve the owning worker and describe the download; nothing is fetched yet.
    pub async fn handle_download_request(
        &self,
        ctx: &RequestContext,
        id: i64,
    ) -> Result<NamedDownload, AppError> {
        let record = self.visible_file(ctx, id).await?;
        let worker = self.resolver.resolve_worker_for_file(id).await?;
        let resource = self
            .proxy
            .forward_download(&worker, id, ctx.credential().cloned())?;

        Ok(NamedDownload {
            name: record.original_name,
            file_type: record.file_type,
            resource,
        })
    }

    /// Retention: drop the least recently created file. Returns its id.
    ///
    /// The worker copy goes first. Metadata is only removed once the worker
    /// confirms (or reports the file already gone), so a refused delete leaves
    /// the record in place for the next sweep.
    #[tracing::instrument(skip(self))]
    pub async fn delete_oldest_file(&self) -> Result<Option<i64>, AppError> {
        let Some(oldest) = self.files.find_oldest().await? else {
            tracing::debug!("No files to reclaim");
            return Ok(None);
        };

        if let Some(worker) = self.owning_worker_for_cleanup(oldest.id).await {
            match self.proxy.delete_file(&worker, oldest.id, None).await {
                Ok(()) => {}
                Err(e) if e.status() == Some(404) => {
                    tracing::warn!(
                        file_id = oldest.id,
                        worker_id = worker.id,
                        "Worker no longer has the file"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        file_id = oldest.id,
                        worker_id = worker.id,
                        error = %e,
                        "Worker refused to delete the oldest file, keeping its record"
                    );
                    return Err(e.into());
                }
            }
        }

        if !self.files.delete_with_binding(oldest.id).await? {
            // removed concurrently; nothing left for this tick
            return Ok(None);
        }
        tracing::info!(
            file_id = oldest.id,
            created_at = %oldest.created_at,
            "Deleted oldest file"
        );
        Ok(Some(oldest.id))
    }

    async fn find_file(&self, id: i64) -> Result<FileRecord, AppError> {
        self.files
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("file {} not found", id)))
    }

    async fn visible_file(&self, ctx: &RequestContext, id: i64) -> Result<FileRecord, AppError> {
        let record = self.find_file(id).await?;
        ensure_visible(ctx, &record)?;
        Ok(record)
    }

    async fn visible_file_by_name(
        &self,
        ctx: &RequestContext,
        unique_name: &str,
    ) -> Result<FileRecord, AppError> {
        let record = self
            .files
            .get_by_unique_name(unique_name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("file {} not found", unique_name)))?;
        ensure_visible(ctx, &record)?;
        Ok(record)
    }

    /// Owning worker of a file about to be deleted. A missing binding is
    /// logged and does not block removing the metadata.
    async fn owning_worker_for_cleanup(&self, file_id: i64) -> Option<Worker> {
        match self.resolver.resolve_worker_for_file(file_id).await {
            Ok(worker) => Some(worker),
            Err(e) => {
                tracing::warn!(file_id, error = %e, "Worker copy will not be removed");
                None
            }
        }
    }

    /// Best-effort removal of a file's bytes from a worker.
    pub(crate) fn spawn_worker_delete(
        &self,
        worker: Worker,
        file_id: i64,
        credential: Option<BearerToken>,
    ) {
        let proxy = self.proxy.clone();
        tokio::spawn(async move {
            match proxy.delete_file(&worker, file_id, credential.as_ref()).await {
                Ok(()) => {
                    tracing::debug!(file_id, worker_id = worker.id, "Removed file from worker")
                }
                Err(e) => tracing::warn!(
                    file_id,
                    worker_id = worker.id,
                    error = %e,
                    "Failed to remove file from worker"
                ),
            }
        });
    }
}

fn ensure_visible(ctx: &RequestContext, record: &FileRecord) -> Result<(), AppError> {
    if ctx.can_view(record.owner_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "not allowed to access file {}",
            record.id
        )))
    }
}
