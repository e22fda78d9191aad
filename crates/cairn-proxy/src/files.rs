//! File API operations forwarded to workers.
//!
//! Paths mirror the worker's own API: `/files/upload`, `/files/{id}/download`,
//! `/files/transfer`, `/files/transfer/{id}/progress` and `/files/{id}`.

use cairn_core::models::{FileTransferProgress, FileTransferRequest, FileType};
use cairn_core::{BearerToken, Worker};
use reqwest::multipart::Form;
use serde::Serialize;

use crate::download::WorkerDownload;
use crate::error::ProxyError;
use crate::upload::UploadPayload;
use crate::{authorize, WorkerClient};

/// Body of a transfer request as workers expect it.
#[derive(Debug, Serialize)]
struct TransferBody<'a> {
    source: &'a cairn_core::models::TransferSource,
    #[serde(rename = "type")]
    file_type: FileType,
    file_name: &'a str,
}

impl WorkerClient {
    /// Multipart upload; the worker answers with the new file's id.
    #[tracing::instrument(skip(self, worker, payload, credential), fields(worker_id = worker.id, file_type = %file_type, file_name = payload.file_name()))]
    pub async fn forward_upload(
        &self,
        worker: &Worker,
        file_type: FileType,
        payload: UploadPayload,
        credential: Option<&BearerToken>,
    ) -> Result<i64, ProxyError> {
        let url = self.endpoint(worker, "/files/upload")?;
        let form = Form::new()
            .part("file", payload.into_part()?)
            .text("type", file_type.as_str());

        let request = authorize(self.http().post(url).multipart(form), credential);
        let response = self.send(request).await?;
        let file_id: i64 = Self::read_json(response).await?;

        tracing::debug!(file_id, "Worker accepted upload");
        Ok(file_id)
    }

    /// Describe a download without contacting the worker.
    pub fn forward_download(
        &self,
        worker: &Worker,
        file_id: i64,
        credential: Option<BearerToken>,
    ) -> Result<WorkerDownload, ProxyError> {
        let url = self.endpoint(worker, &format!("/files/{}/download", file_id))?;
        Ok(WorkerDownload::new(
            self.http().clone(),
            url,
            credential,
            file_id,
            worker.id,
        ))
    }

    /// Ask the worker to pull a file from an external locator.
    #[tracing::instrument(skip(self, worker, request, credential), fields(worker_id = worker.id, method = request.source.method()))]
    pub async fn forward_transfer(
        &self,
        worker: &Worker,
        request: &FileTransferRequest,
        credential: Option<&BearerToken>,
    ) -> Result<i64, ProxyError> {
        let url = self.endpoint(worker, "/files/transfer")?;
        let file_name = request.display_name();
        let body = TransferBody {
            source: &request.source,
            file_type: request.file_type,
            file_name: &file_name,
        };

        let response = self
            .send(authorize(self.http().post(url).json(&body), credential))
            .await?;
        Self::read_json(response).await
    }

    #[tracing::instrument(skip(self, worker, credential), fields(worker_id = worker.id))]
    pub async fn transfer_progress(
        &self,
        worker: &Worker,
        transfer_id: i64,
        credential: Option<&BearerToken>,
    ) -> Result<FileTransferProgress, ProxyError> {
        let url = self.endpoint(worker, &format!("/files/transfer/{}/progress", transfer_id))?;
        let response = self
            .send(authorize(self.http().get(url), credential))
            .await?;
        Self::read_json(response).await
    }

    /// Remove a file's bytes from a worker.
    #[tracing::instrument(skip(self, worker, credential), fields(worker_id = worker.id))]
    pub async fn delete_file(
        &self,
        worker: &Worker,
        file_id: i64,
        credential: Option<&BearerToken>,
    ) -> Result<(), ProxyError> {
        let url = self.endpoint(worker, &format!("/files/{}", file_id))?;
        self.send(authorize(self.http().delete(url), credential))
            .await?;
        Ok(())
    }
}
