//! Upload orchestrator: one put for single-part content, otherwise a
//! multipart upload with concurrent parts and an abort on failure.

use std::sync::Arc;

use blobferry_transfer::{
    ByteRange, PartStream, StreamContext, WriteContext, WritePriority,
    calculate_optimal_part_size, combine_crc32, decode_crc32, encode_crc32,
};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{
    AbortMultipartRequest, ChecksumAlgorithm, CompleteMultipartRequest, CompletedPart,
    Destination, ObjectStoreClient, Operation, PartBody, PutObjectRequest, StoreFuture,
    UploadPartRequest,
};
use crate::config::TransferSettings;
use crate::error::{AbortStatus, UploadError, UploadFailure};
use crate::pool::WorkerPools;
use crate::state::{UploadState, UploadTracker};

/// Immutable description of one upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub destination: Destination,
    pub content_length: u64,
    pub priority: WritePriority,
    pub integrity_check: bool,
    /// CRC32 of the whole content, if known before reading it.
    pub expected_checksum: Option<u32>,
    pub fail_if_exists: bool,
}

impl UploadRequest {
    pub fn new(destination: Destination, content_length: u64, priority: WritePriority) -> Self {
        Self {
            destination,
            content_length,
            priority,
            integrity_check: false,
            expected_checksum: None,
            fail_if_exists: false,
        }
    }

    pub fn with_integrity_check(mut self, integrity_check: bool) -> Self {
        self.integrity_check = integrity_check;
        self
    }

    pub fn with_expected_checksum(mut self, checksum: Option<u32>) -> Self {
        self.expected_checksum = checksum;
        self
    }

    pub fn with_fail_if_exists(mut self, fail_if_exists: bool) -> Self {
        self.fail_if_exists = fail_if_exists;
        self
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub etag: Option<String>,
    /// Checksum reported by the store, if any.
    pub checksum: Option<String>,
    /// CRC32 of the content as read locally; set when integrity checking is on.
    pub computed_checksum: Option<u32>,
    pub parts: usize,
}

struct UploadedPart {
    index: usize,
    record: CompletedPart,
    crc: u32,
    size: u64,
}

/// Drives uploads against one bucket of an object store.
pub struct UploadOrchestrator {
    client: Arc<dyn ObjectStoreClient>,
    bucket: String,
    settings: TransferSettings,
    pools: WorkerPools,
}

impl UploadOrchestrator {
    pub fn new(
        client: Arc<dyn ObjectStoreClient>,
        bucket: impl Into<String>,
        settings: TransferSettings,
    ) -> Result<Self, UploadError> {
        settings.validate()?;
        Ok(Self {
            client,
            bucket: bucket.into(),
            pools: WorkerPools::from_settings(&settings),
            settings,
        })
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub fn pools(&self) -> &WorkerPools {
        &self.pools
    }

    /// Uploads the content described by `context` to `context.file_name()`.
    ///
    /// Picks the part size, partitions the content, runs the upload and
    /// invokes the context's finalizer exactly once with the outcome.
    pub async fn write_blob(
        &self,
        context: &WriteContext,
        tracker: &UploadTracker,
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, UploadFailure> {
        let result = self.write_blob_inner(context, tracker, cancel).await;
        context.finalize(result.is_ok());
        result
    }

    async fn write_blob_inner(
        &self,
        context: &WriteContext,
        tracker: &UploadTracker,
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, UploadFailure> {
        let content_length = context.content_length();
        if content_length > self.settings.chunk_size {
            return Err(fail(
                tracker,
                UploadError::ContentTooLarge {
                    length: content_length,
                    limit: self.settings.chunk_size,
                },
            ));
        }

        let part_size =
            calculate_optimal_part_size(content_length, self.settings.minimum_part_size);
        let stream_context = context
            .stream_context(part_size)
            .map_err(|e| fail(tracker, e.into()))?;

        let request = UploadRequest::new(
            Destination::new(&self.bucket, context.file_name()),
            content_length,
            context.priority(),
        )
        .with_integrity_check(context.integrity_check() || self.settings.integrity_check)
        .with_expected_checksum(context.expected_checksum())
        .with_fail_if_exists(context.fail_if_exists());

        self.upload(&request, &stream_context, tracker, cancel).await
    }

    /// Uploads already partitioned content.
    ///
    /// Exactly one part goes out as a single put; anything else as a
    /// multipart upload. Exactly one terminal outcome is returned.
    pub async fn upload(
        &self,
        request: &UploadRequest,
        context: &StreamContext,
        tracker: &UploadTracker,
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, UploadFailure> {
        let part_count = context.number_of_parts();
        tracker.set_totals(part_count, request.content_length);

        let result = if part_count == 1 {
            self.upload_single(request, context, tracker, cancel).await
        } else {
            self.upload_multipart(request, context, tracker, cancel)
                .await
        };

        match &result {
            Ok(response) => info!(
                destination = %request.destination,
                bytes = request.content_length,
                parts = response.parts,
                elapsed_ms = tracker.elapsed().as_millis() as u64,
                "upload completed"
            ),
            Err(failure) => error!(
                destination = %request.destination,
                error = %failure.cause,
                abort = ?failure.abort,
                "upload failed"
            ),
        }
        result
    }

    async fn upload_single(
        &self,
        request: &UploadRequest,
        context: &StreamContext,
        tracker: &UploadTracker,
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, UploadFailure> {
        tracker.transition(UploadState::SinglePut);
        let _permit = self
            .acquire_worker(request.priority, cancel)
            .await
            .map_err(|e| fail(tracker, e))?;
        debug!(destination = %request.destination, bytes = request.content_length, "uploading in one request");

        let stream = open_stream(context, 0)
            .await
            .map_err(|e| fail(tracker, e))?;

        let checksum = if request.integrity_check {
            request.expected_checksum.map(encode_crc32)
        } else {
            None
        };
        let put = PutObjectRequest {
            destination: request.destination.clone(),
            content_length: request.content_length,
            body: PartBody::new(stream.clone()),
            checksum,
            fail_if_exists: request.fail_if_exists,
        };

        let response = self
            .guarded(cancel, Operation::PutObject, None, self.client.put_object(put))
            .await
            .map_err(|e| fail(tracker, e))?;

        let computed = request.integrity_check.then(|| stream.checksum());
        if let Some(local) = computed {
            if let Some(expected) = request.expected_checksum
                && local != expected
            {
                let cause = UploadError::ObjectChecksumMismatch {
                    expected: encode_crc32(expected),
                    actual: encode_crc32(local),
                };
                return Err(fail(tracker, cause));
            }
            if let Some(remote) = response.checksum.as_deref() {
                verify_object_checksum(local, remote).map_err(|e| fail(tracker, e))?;
            }
        }

        tracker.part_uploaded(request.content_length);
        tracker.transition(UploadState::Done);
        Ok(UploadResponse {
            etag: response.etag,
            checksum: response.checksum,
            computed_checksum: computed,
            parts: 1,
        })
    }

    async fn upload_multipart(
        &self,
        request: &UploadRequest,
        context: &StreamContext,
        tracker: &UploadTracker,
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, UploadFailure> {
        tracker.transition(UploadState::CreatingMultipart);
        let upload_id = self
            .guarded(
                cancel,
                Operation::CreateMultipartUpload,
                Some(self.settings.timeout()),
                self.client
                    .create_multipart_upload(request.destination.clone()),
            )
            .await
            .map_err(|e| fail(tracker, e))?;

        debug!(
            destination = %request.destination,
            upload_id = %upload_id,
            parts = context.number_of_parts(),
            "multipart upload initiated"
        );
        tracker.set_upload_id(&upload_id);
        tracker.transition(UploadState::UploadingParts);

        let uploaded = match self
            .upload_parts(request, context, &upload_id, tracker, cancel)
            .await
        {
            Ok(uploaded) => uploaded,
            Err(cause) => return Err(self.abort(request, &upload_id, cause, tracker).await),
        };

        let computed =
            request.integrity_check.then(|| combine_crc32(uploaded.iter().map(|p| (p.crc, p.size))));
        if let Some(computed) = computed
            && let Some(expected) = request.expected_checksum
            && computed != expected
        {
            let cause = UploadError::ObjectChecksumMismatch {
                expected: encode_crc32(expected),
                actual: encode_crc32(computed),
            };
            return Err(self.abort(request, &upload_id, cause, tracker).await);
        }

        tracker.transition(UploadState::Completing);
        let parts: Vec<CompletedPart> = uploaded.into_iter().map(|p| p.record).collect();
        let part_count = parts.len();
        debug!(upload_id = %upload_id, parts = part_count, "sending complete multipart request");

        let complete = CompleteMultipartRequest {
            destination: request.destination.clone(),
            upload_id: upload_id.clone(),
            parts,
            fail_if_exists: request.fail_if_exists,
        };
        let response = match self
            .guarded(
                cancel,
                Operation::CompleteMultipartUpload,
                Some(self.settings.timeout()),
                self.client.complete_multipart_upload(complete),
            )
            .await
        {
            Ok(response) => response,
            Err(cause) => return Err(self.abort(request, &upload_id, cause, tracker).await),
        };

        tracker.transition(UploadState::Done);
        Ok(UploadResponse {
            etag: response.etag,
            checksum: response.checksum,
            computed_checksum: computed,
            parts: part_count,
        })
    }

    /// Dispatches every part to the pool for the request's priority and
    /// collects the results by part index.
    ///
    /// Returns on the first failure; parts still running are detached.
    async fn upload_parts(
        &self,
        request: &UploadRequest,
        context: &StreamContext,
        upload_id: &str,
        tracker: &UploadTracker,
        cancel: &CancellationToken,
    ) -> Result<Vec<UploadedPart>, UploadError> {
        let part_count = context.number_of_parts();
        let pool = self.pools.pool_for(request.priority);
        let mut tasks = FuturesUnordered::new();

        for index in 0..part_count {
            let context = context.clone();
            let client = Arc::clone(&self.client);
            let pool = Arc::clone(pool);
            let destination = request.destination.clone();
            let upload_id = upload_id.to_string();
            let integrity_check = request.integrity_check;

            tasks.push(tokio::spawn(async move {
                let _permit = pool
                    .acquire_owned()
                    .await
                    .map_err(|_| UploadError::TaskFailed("worker pool closed".into()))?;
                let stream = open_stream(&context, index).await?;
                upload_part(client.as_ref(), destination, upload_id, integrity_check, stream)
                    .await
            }));
        }

        let mut uploaded: Vec<Option<UploadedPart>> =
            std::iter::repeat_with(|| None).take(part_count).collect();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                next = tasks.next() => next,
            };
            let Some(joined) = next else { break };

            let part = joined.map_err(|e| UploadError::TaskFailed(e.to_string()))??;
            tracker.part_uploaded(part.size);
            let slot = uploaded
                .get_mut(part.index)
                .ok_or(UploadError::MissingPart(part.record.part_number))?;
            *slot = Some(part);
        }

        uploaded
            .into_iter()
            .enumerate()
            .map(|(index, part)| part.ok_or(UploadError::MissingPart(index as u32 + 1)))
            .collect()
    }

    /// Best-effort abort of a failed multipart upload.
    ///
    /// The abort's own failure is logged and recorded, never returned in
    /// place of `cause`.
    async fn abort(
        &self,
        request: &UploadRequest,
        upload_id: &str,
        cause: UploadError,
        tracker: &UploadTracker,
    ) -> UploadFailure {
        tracker.transition(UploadState::Aborting);
        debug!(upload_id = %upload_id, error = %cause, "aborting multipart upload");

        let abort = AbortMultipartRequest {
            destination: request.destination.clone(),
            upload_id: upload_id.to_string(),
        };
        let result = tokio::time::timeout(
            self.settings.timeout(),
            self.client.abort_multipart_upload(abort),
        )
        .await
        .unwrap_or(Err(UploadError::Timeout(Operation::AbortMultipartUpload)));

        let status = match result {
            Ok(()) => {
                debug!(upload_id = %upload_id, "multipart upload aborted");
                AbortStatus::Aborted
            }
            Err(e) => {
                warn!(
                    destination = %request.destination,
                    upload_id = %upload_id,
                    error = %e,
                    "failed to abort multipart upload, manual cleanup of the remote upload may be required"
                );
                AbortStatus::AbortFailed(e.to_string())
            }
        };

        tracker.fail(&cause.to_string());
        UploadFailure::new(cause, status)
    }

    /// Waits for a worker of the pool matching `priority`.
    async fn acquire_worker(
        &self,
        priority: WritePriority,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, UploadError> {
        let pool = Arc::clone(self.pools.pool_for(priority));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            permit = pool.acquire_owned() => {
                permit.map_err(|_| UploadError::TaskFailed("worker pool closed".into()))
            }
        }
    }

    /// Runs a create/put/complete call, giving up on cancellation or after
    /// `timeout`.
    async fn guarded<T>(
        &self,
        cancel: &CancellationToken,
        operation: Operation,
        timeout: Option<std::time::Duration>,
        call: StoreFuture<'_, T>,
    ) -> Result<T, UploadError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            result = async {
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, call)
                        .await
                        .unwrap_or(Err(UploadError::Timeout(operation))),
                    None => call.await,
                }
            } => result,
        }
    }
}

fn fail(tracker: &UploadTracker, cause: UploadError) -> UploadFailure {
    tracker.fail(&cause.to_string());
    UploadFailure::new(cause, AbortStatus::NotAttempted)
}

/// Opens a part's stream on the blocking pool, since the source supplier
/// may open files.
async fn open_stream(context: &StreamContext, index: usize) -> Result<PartStream, UploadError> {
    let context = context.clone();
    let stream = tokio::task::spawn_blocking(move || context.provide_stream(index))
        .await
        .map_err(|e| UploadError::TaskFailed(e.to_string()))??;
    Ok(stream)
}

async fn upload_part(
    client: &dyn ObjectStoreClient,
    destination: Destination,
    upload_id: String,
    integrity_check: bool,
    stream: PartStream,
) -> Result<UploadedPart, UploadError> {
    let part = stream.part();
    let part_number = part.part_number();
    let request = UploadPartRequest {
        destination,
        upload_id,
        part_number,
        content_length: part.size,
        range: ByteRange::for_part(&part),
        checksum_algorithm: integrity_check.then_some(ChecksumAlgorithm::Crc32),
        body: PartBody::new(stream.clone()),
    };

    let response = client.upload_part(request).await?;
    let crc = stream.checksum();
    if integrity_check && let Some(remote) = response.checksum.as_deref() {
        verify_part_checksum(part_number, crc, remote)?;
    }
    debug!(part = part_number, bytes = part.size, etag = %response.etag, "part uploaded");

    Ok(UploadedPart {
        index: part.index,
        record: CompletedPart {
            part_number,
            etag: response.etag,
            checksum: response.checksum,
        },
        crc,
        size: part.size,
    })
}

fn verify_part_checksum(part_number: u32, local: u32, remote: &str) -> Result<(), UploadError> {
    if decode_crc32(remote)? != local {
        return Err(UploadError::ChecksumMismatch {
            part: part_number,
            expected: encode_crc32(local),
            actual: remote.to_string(),
        });
    }
    Ok(())
}

fn verify_object_checksum(local: u32, remote: &str) -> Result<(), UploadError> {
    if decode_crc32(remote)? != local {
        return Err(UploadError::ObjectChecksumMismatch {
            expected: encode_crc32(local),
            actual: remote.to_string(),
        });
    }
    Ok(())
}
