//! Upload orchestration on top of an abstract object store.
//!
//! Takes a partitioned content source from `blobferry-transfer` and moves
//! it to an object store: one put when the content is a single part,
//! otherwise a multipart upload whose parts run concurrently on a worker
//! pool chosen by write priority. A failed multipart upload is aborted.
//!
//! # Multipart flow
//!
//! 1. **Create** the remote upload (cancellable, bounded by a timeout)
//! 2. **Upload parts** on the normal or high priority pool, in any order
//! 3. **Complete** with the part records sorted by part number
//! 4. **Abort** on any failure after step 1, without masking the cause

pub mod client;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod state;

#[cfg(test)]
mod mock;

pub use client::{
    AbortMultipartRequest, ChecksumAlgorithm, CompleteMultipartRequest, CompletedPart,
    Destination, ObjectResponse, ObjectStoreClient, Operation, PartBody, PartResponse,
    PutObjectRequest, StoreFuture, UploadPartRequest,
};
pub use config::TransferSettings;
pub use error::{AbortStatus, UploadError, UploadFailure};
pub use orchestrator::{UploadOrchestrator, UploadRequest, UploadResponse};
pub use pool::WorkerPools;
pub use state::{UploadProgress, UploadState, UploadTracker};
