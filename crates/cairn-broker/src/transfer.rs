//! Transfers: a worker pulls a file from an external locator, and the master
//! tracks it until it either lands (and becomes a file) or fails.

use cairn_core::models::{
    FileRecord, FileTransferProgress, FileTransferRequest, TransferRecord, TransferState,
};
use cairn_core::{AppError, RequestContext};

use crate::broker::FileBroker;
use crate::selector::OperationKind;

impl FileBroker {
    #[tracing::instrument(skip(self, ctx, request), fields(user_id = ?ctx.user_id, method = request.source.method()))]
    pub async fn handle_transfer_request(
        &self,
        ctx: &RequestContext,
        request: FileTransferRequest,
    ) -> Result<i64, AppError> {
        request.validate()?;

        let worker = self
            .selector
            .select_worker(OperationKind::TransferIn)
            .await?;
        let transfer_id = self
            .proxy
            .forward_transfer(&worker, &request, ctx.credential())
            .await?;

        let record = TransferRecord::new(
            transfer_id,
            worker.id,
            ctx.user_id,
            request.file_type,
            request.display_name(),
        );
        if let Err(e) = self.transfers.create(&record).await {
            tracing::error!(
                transfer_id,
                worker_id = worker.id,
                error = %e,
                "Failed to record transfer, removing it from the worker"
            );
            self.spawn_worker_delete(worker, transfer_id, ctx.credential().cloned());
            return Err(e);
        }

        tracing::info!(transfer_id, worker_id = worker.id, "Transfer started");
        Ok(transfer_id)
    }

    /// Current progress of a transfer.
    ///
    /// Finished transfers answer from the store. Running ones are polled on
    /// their worker; the first poll that sees success commits the file and its
    /// binding, later polls find the transfer already terminal.
    #[tracing::instrument(skip(self, ctx), fields(user_id = ?ctx.user_id))]
    pub async fn get_transfer_progress(
        &self,
        ctx: &RequestContext,
        transfer_id: i64,
    ) -> Result<FileTransferProgress, AppError> {
        let transfer = self
            .transfers
            .get(transfer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transfer {} not found", transfer_id)))?;

        if !ctx.can_view(transfer.owner_id) {
            return Err(AppError::Forbidden(format!(
                "not allowed to access transfer {}",
                transfer_id
            )));
        }
        if transfer.state().is_terminal() {
            return Ok(transfer.progress);
        }

        let worker = self.resolver.worker_by_id(transfer.worker_id).await?;
        let progress = self
            .proxy
            .transfer_progress(&worker, transfer_id, ctx.credential())
            .await?;

        match progress.state {
            TransferState::InProgress => {
                self.transfers.update_progress(transfer_id, &progress).await?;
            }
            TransferState::Succeeded => {
                let size = progress
                    .total_size
                    .unwrap_or(progress.transferred_size);
                let file = FileRecord::new(
                    transfer_id,
                    transfer.file_type,
                    transfer.file_name.clone(),
                    transfer.owner_id,
                    i64::try_from(size).ok(),
                );
                if self
                    .transfers
                    .mark_succeeded(transfer_id, &progress, &file)
                    .await?
                {
                    tracing::info!(transfer_id, worker_id = worker.id, "Transfer committed");
                }
            }
            TransferState::Failed => {
                if self.transfers.mark_failed(transfer_id, &progress).await? {
                    tracing::warn!(
                        transfer_id,
                        worker_id = worker.id,
                        message = ?progress.message,
                        "Transfer failed"
                    );
                }
            }
        }

        Ok(progress)
    }
}
