//! In-memory object store for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use blobferry_transfer::{ByteRange, crc32, encode_crc32};

use crate::client::{
    AbortMultipartRequest, ChecksumAlgorithm, CompleteMultipartRequest, CompletedPart,
    Destination, ObjectResponse, ObjectStoreClient, Operation, PartResponse, PutObjectRequest,
    StoreFuture, UploadPartRequest,
};
use crate::error::UploadError;

/// What the store saw of one part request.
#[derive(Debug, Clone)]
pub(crate) struct PartCall {
    pub part_number: u32,
    pub range: Option<ByteRange>,
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
}

#[derive(Default)]
pub(crate) struct MockStore {
    fail_create: bool,
    fail_part: Option<u32>,
    fail_complete: bool,
    fail_abort: bool,
    hang_create: bool,
    hang_complete: bool,
    hang_abort: bool,
    corrupt_checksum_part: Option<u32>,
    reread_bodies: bool,
    delays: HashMap<u32, Duration>,

    next_upload: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    create_calls: AtomicUsize,
    abort_calls: AtomicUsize,
    complete_calls: AtomicUsize,

    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<HashMap<String, BTreeMap<u32, Vec<u8>>>>,
    part_calls: Mutex<Vec<PartCall>>,
    put_checksums: Mutex<Vec<Option<String>>>,
    completed: Mutex<Vec<CompletedPart>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn fail_part(mut self, part_number: u32) -> Self {
        self.fail_part = Some(part_number);
        self
    }

    pub fn fail_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub fn fail_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    /// Never answers create requests.
    pub fn hang_create(mut self) -> Self {
        self.hang_create = true;
        self
    }

    pub fn hang_complete(mut self) -> Self {
        self.hang_complete = true;
        self
    }

    pub fn hang_abort(mut self) -> Self {
        self.hang_abort = true;
        self
    }

    /// Returns a wrong checksum for `part_number`.
    pub fn corrupt_checksum(mut self, part_number: u32) -> Self {
        self.corrupt_checksum_part = Some(part_number);
        self
    }

    /// Reads every body twice, like a transport retry would.
    pub fn reread_bodies(mut self) -> Self {
        self.reread_bodies = true;
        self
    }

    pub fn delay_part(mut self, part_number: u32, delay: Duration) -> Self {
        self.delays.insert(part_number, delay);
        self
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn insert_object(&self, key: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), data);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn abort_calls(&self) -> usize {
        self.abort_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        self.completed.lock().unwrap().clone()
    }

    pub fn part_calls(&self) -> Vec<PartCall> {
        self.part_calls.lock().unwrap().clone()
    }

    pub fn put_checksums(&self) -> Vec<Option<String>> {
        self.put_checksums.lock().unwrap().clone()
    }

    pub fn open_uploads(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    fn exists(&self, destination: &Destination) -> bool {
        self.objects.lock().unwrap().contains_key(&destination.key)
    }

    async fn receive_part(&self, request: UploadPartRequest) -> Result<PartResponse, UploadError> {
        let part_number = request.part_number;
        self.part_calls.lock().unwrap().push(PartCall {
            part_number,
            range: request.range,
            checksum_algorithm: request.checksum_algorithm,
        });

        if let Some(delay) = self.delays.get(&part_number) {
            tokio::time::sleep(*delay).await;
        }

        let mut bytes = request.body.read_all().await?;
        if self.reread_bodies {
            bytes = request.body.read_all().await?;
        }
        if self.fail_part == Some(part_number) {
            return Err(UploadError::remote(
                Operation::UploadPart,
                format!("part {part_number}: connection reset"),
            ));
        }

        let mut checksum = crc32(&bytes);
        if self.corrupt_checksum_part == Some(part_number) {
            checksum ^= 0xffff_ffff;
        }
        let etag = format!("etag-{part_number}-{}", bytes.len());

        let mut uploads = self.uploads.lock().unwrap();
        let parts = uploads.get_mut(&request.upload_id).ok_or_else(|| {
            UploadError::remote(Operation::UploadPart, "no such upload")
        })?;
        parts.insert(part_number, bytes);

        Ok(PartResponse {
            etag,
            checksum: request
                .checksum_algorithm
                .map(|_| encode_crc32(checksum)),
        })
    }
}

impl ObjectStoreClient for MockStore {
    fn put_object(&self, request: PutObjectRequest) -> StoreFuture<'_, ObjectResponse> {
        Box::pin(async move {
            self.put_checksums
                .lock()
                .unwrap()
                .push(request.checksum.clone());
            if request.fail_if_exists && self.exists(&request.destination) {
                return Err(UploadError::remote(
                    Operation::PutObject,
                    "precondition failed",
                ));
            }
            let bytes = request.body.read_all().await?;
            let checksum = encode_crc32(crc32(&bytes));
            self.insert_object(&request.destination.key, bytes);
            Ok(ObjectResponse {
                etag: Some("etag-put".into()),
                checksum: Some(checksum),
            })
        })
    }

    fn create_multipart_upload(&self, _destination: Destination) -> StoreFuture<'_, String> {
        Box::pin(async move {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_create {
                std::future::pending::<()>().await;
            }
            if self.fail_create {
                return Err(UploadError::remote(
                    Operation::CreateMultipartUpload,
                    "access denied",
                ));
            }
            let id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
            self.uploads
                .lock()
                .unwrap()
                .insert(id.clone(), BTreeMap::new());
            Ok(id)
        })
    }

    fn upload_part(&self, request: UploadPartRequest) -> StoreFuture<'_, PartResponse> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let result = self.receive_part(request).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn complete_multipart_upload(
        &self,
        request: CompleteMultipartRequest,
    ) -> StoreFuture<'_, ObjectResponse> {
        Box::pin(async move {
            self.complete_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_complete {
                std::future::pending::<()>().await;
            }
            *self.completed.lock().unwrap() = request.parts.clone();
            if self.fail_complete {
                return Err(UploadError::remote(
                    Operation::CompleteMultipartUpload,
                    "internal error",
                ));
            }
            if request.fail_if_exists && self.exists(&request.destination) {
                return Err(UploadError::remote(
                    Operation::CompleteMultipartUpload,
                    "precondition failed",
                ));
            }

            let parts = self
                .uploads
                .lock()
                .unwrap()
                .remove(&request.upload_id)
                .ok_or_else(|| {
                    UploadError::remote(Operation::CompleteMultipartUpload, "no such upload")
                })?;
            let mut object = Vec::new();
            for part in &request.parts {
                let bytes = parts.get(&part.part_number).ok_or_else(|| {
                    UploadError::remote(
                        Operation::CompleteMultipartUpload,
                        format!("invalid part {}", part.part_number),
                    )
                })?;
                object.extend_from_slice(bytes);
            }
            self.insert_object(&request.destination.key, object);
            Ok(ObjectResponse {
                etag: Some(format!("etag-multipart-{}", request.parts.len())),
                checksum: None,
            })
        })
    }

    fn abort_multipart_upload(&self, request: AbortMultipartRequest) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.abort_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_abort {
                std::future::pending::<()>().await;
            }
            if self.fail_abort {
                return Err(UploadError::remote(
                    Operation::AbortMultipartUpload,
                    "service unavailable",
                ));
            }
            self.uploads.lock().unwrap().remove(&request.upload_id);
            Ok(())
        })
    }
}
