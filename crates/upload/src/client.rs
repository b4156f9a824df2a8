//! Object store capability trait and its request/response types.
//!
//! The orchestrator only needs five operations from a store. Implementing
//! [`ObjectStoreClient`] on top of a concrete SDK keeps the upload logic
//! decoupled from transport and testable with mocks.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use blobferry_transfer::{ByteRange, PartStream};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// Boxed future returned by every store operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Abstract object store client.
pub trait ObjectStoreClient: Send + Sync {
    /// Uploads the whole object in one request.
    fn put_object(&self, request: PutObjectRequest) -> StoreFuture<'_, ObjectResponse>;

    /// Starts a multipart upload and returns its upload id.
    fn create_multipart_upload(&self, destination: Destination) -> StoreFuture<'_, String>;

    fn upload_part(&self, request: UploadPartRequest) -> StoreFuture<'_, PartResponse>;

    /// Assembles the object from `request.parts`, ordered by part number.
    fn complete_multipart_upload(
        &self,
        request: CompleteMultipartRequest,
    ) -> StoreFuture<'_, ObjectResponse>;

    /// Discards an unfinished multipart upload and its stored parts.
    fn abort_multipart_upload(&self, request: AbortMultipartRequest) -> StoreFuture<'_, ()>;
}

/// Remote operations, named in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    PutObject,
    CreateMultipartUpload,
    UploadPart,
    CompleteMultipartUpload,
    AbortMultipartUpload,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PutObject => "put object",
            Self::CreateMultipartUpload => "create multipart upload",
            Self::UploadPart => "upload part",
            Self::CompleteMultipartUpload => "complete multipart upload",
            Self::AbortMultipartUpload => "abort multipart upload",
        };
        f.write_str(name)
    }
}

/// Bucket and key of the object being written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub bucket: String,
    pub key: String,
}

impl Destination {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Checksum algorithm requested for a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChecksumAlgorithm {
    Crc32,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crc32 => "CRC32",
        }
    }
}

/// Request body backed by one part's checksummed stream.
///
/// The checksum the orchestrator validates is accumulated while the
/// client reads the body, so a client must read it in full for every
/// attempt it makes.
#[derive(Debug, Clone)]
pub struct PartBody {
    stream: PartStream,
}

impl PartBody {
    pub fn new(stream: PartStream) -> Self {
        Self { stream }
    }

    pub fn content_length(&self) -> u64 {
        self.stream.content_length()
    }

    /// Reads the whole part on the blocking pool.
    ///
    /// Every call rewinds to the stream's last mark, which is the start of
    /// the part unless the client marked it later, so a retried transport
    /// attempt sends the same bytes and leaves the same checksum.
    pub async fn read_all(&self) -> Result<Vec<u8>, UploadError> {
        let stream = self.stream.clone();
        let bytes = tokio::task::spawn_blocking(move || stream.read_from_mark())
            .await
            .map_err(|e| UploadError::TaskFailed(e.to_string()))??;
        Ok(bytes)
    }
}

#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    pub destination: Destination,
    pub content_length: u64,
    pub body: PartBody,
    /// Base64 CRC32 of the whole object, for the store to verify.
    pub checksum: Option<String>,
    pub fail_if_exists: bool,
}

#[derive(Debug, Clone)]
pub struct UploadPartRequest {
    pub destination: Destination,
    pub upload_id: String,
    /// 1-based.
    pub part_number: u32,
    pub content_length: u64,
    /// Byte range of the object this part covers; `None` for an empty part.
    pub range: Option<ByteRange>,
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
    pub body: PartBody,
}

#[derive(Debug, Clone)]
pub struct CompleteMultipartRequest {
    pub destination: Destination,
    pub upload_id: String,
    pub parts: Vec<CompletedPart>,
    pub fail_if_exists: bool,
}

#[derive(Debug, Clone)]
pub struct AbortMultipartRequest {
    pub destination: Destination,
    pub upload_id: String,
}

/// Store's answer to one part upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartResponse {
    pub etag: String,
    /// Base64 CRC32, when a checksum algorithm was requested.
    pub checksum: Option<String>,
}

/// One entry of the completion list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Store's answer to a put or a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectResponse {
    pub etag: Option<String>,
    pub checksum: Option<String>,
}
