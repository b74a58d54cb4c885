//! Error types for the Git-Internal crate.
//!
//! This module defines a unified error enumeration used across object parsing,
//! pack encoding/decoding, index handling, caching, and streaming. It integrates
//! with `thiserror` to provide rich `Display` implementations and error source
//! chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - Variants cover parse/validation, I/O, encoding/decoding, network/auth,
//!   and custom errors.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the Git-Internal library.
///
/// - Used across object parsing, pack encode/decode, index, caching and streams.
/// - Implements `std::error::Error` via `thiserror`.
pub enum GitError {
    /// Invalid or unsupported git object type name.
    #[error("The `{0}` is not a valid git object type.")]
    InvalidObjectType(String),

    /// Malformed or unsupported blob object encoding.
    #[error("The `{0}` is not a valid git blob object.")]
    InvalidBlobObject(String),

    /// Malformed tree object.
    #[error("Not a valid git tree object.")]
    InvalidTreeObject,

    /// Invalid tree entry (mode/name/hash).
    #[error("The `{0}` is not a valid git tree item.")]
    InvalidTreeItem(String),

    /// Tree contains no entries.
    #[error("`{0}`.")]
    EmptyTreeItems(String),

    /// Invalid commit signature type.
    #[error("The `{0}` is not a valid git commit signature.")]
    InvalidSignatureType(String),

    /// Malformed commit object.
    #[error("Not a valid git commit object.")]
    InvalidCommitObject,

    /// Commit parse or validation failed.
    #[error("Invalid Commit: {0}")]
    InvalidCommit(String),

    /// Malformed tag object.
    #[error("Not a valid git tag object: {0}")]
    InvalidTagObject(String),

    /// Malformed note object.
    #[error("Not a valid git note object: {0}")]
    InvalidNoteObject(String),

    /// Malformed or unsupported index (.idx) file.
    #[error("The `{0}` is not a valid idx file.")]
    InvalidIdxFile(String),

    /// Malformed or unsupported pack file.
    #[error("The `{0}` is not a valid pack file.")]
    InvalidPackFile(String),

    /// Invalid pack header magic or version.
    #[error("The `{0}` is not a valid pack header.")]
    InvalidPackHeader(String),

    /// Malformed or unsupported git index file.
    #[error("The `{0}` is not a valid index file.")]
    InvalidIndexFile(String),

    /// Invalid git index header.
    #[error("The `{0}` is not a valid index header.")]
    InvalidIndexHeader(String),

    /// Invalid CLI or function argument.
    #[error("Argument parse failed: {0}")]
    InvalidArgument(String),

    /// I/O error from underlying reader or writer.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    /// Invalid SHA1 hash formatting or value.
    #[error("The {0} is not a valid Hash value ")]
    InvalidHashValue(String),

    /// Delta object reconstruction error.
    #[error("Delta Object Error Info:{0}")]
    DeltaObjectError(String),

    /// Object not fully populated for packing.
    #[error("The object to be packed is incomplete ,{0}")]
    UnCompletedPackObject(String),

    /// Invalid decoded object info.
    #[error("Error decode in the Object ,info:{0}")]
    InvalidObjectInfo(String),

    /// Hash not found in current file context.
    #[error("Cannot find Hash value: {0} from current file")]
    NotFoundHashValue(String),

    /// Failed to encode object to bytes.
    #[error("Can't encode the object which id [{0}] to bytes")]
    EncodeObjectError(String),

    /// Text encoding or UTF-8 conversion error.
    #[error("UTF-8 conversion error: {0}")]
    ConversionError(String),

    /// Invalid path when locating parent tree.
    #[error("Can't find parent tree by path: {0}")]
    InvalidPathError(String),

    /// Failed to encode pack entries.
    #[error("Can't encode entries to pack: {0}")]
    PackEncodeError(String),

    /// Object missing from caches or storage.
    #[error("Can't find specific object: {0}")]
    ObjectNotFound(String),

    /// Repository not found.
    #[error("Repository not found")]
    RepoNotFound,

    /// Unauthorized access.
    #[error("UnAuthorized: {0}")]
    UnAuthorized(String),

    /// Network communication error.
    #[error("Network Error: {0}")]
    NetworkError(String),

    /// Generic custom error for miscellaneous failures.
    #[error("{0}")]
    CustomError(String),
}

/// Errors surfaced by the object store, write-ahead log, and tiered
/// migration controller (spec error kinds: not-found, consistency,
/// concurrency/resource, remote-tier).
#[derive(Error, Debug)]
pub enum StoreError {
    /// Lookup miss for an operation that requires existence.
    #[error("object not found: {0}")]
    NotFound(String),

    /// `verify(sha)` found the stored bytes do not re-hash to `sha`.
    #[error("object {sha} failed verification: re-hash did not match")]
    CorruptObject { sha: String },

    /// A batch write failed partway through and was rolled back.
    #[error("batch write failed: {0}")]
    BatchWriteFailed(String),

    /// A WAL append could not be persisted.
    #[error("write-ahead log append failed: {0}")]
    WalAppendFailed(String),

    /// Transaction id is unknown or already finalized.
    #[error("invalid transaction {0}: {1}")]
    InvalidTransaction(String, String),

    /// Migration failure, tagged with source/target tier and cause.
    #[error("migration of {sha} from {source_tier} to {target_tier} failed: {cause}")]
    MigrationFailed {
        sha: String,
        source_tier: String,
        target_tier: String,
        cause: String,
    },

    /// Per-SHA migration lock could not be acquired within the configured timeout.
    #[error("lock timeout acquiring migration lock for {0}")]
    LockTimeout(String),

    /// Underlying SQL layer error.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the three-way merge engine (spec §4.7, §7's
/// "semantic" error kind covers the non-error conflict result; these
/// variants cover the true failure paths around it).
#[derive(Error, Debug)]
pub enum MergeError {
    /// `fast_forward_only` requested but the merge is not fast-forwardable.
    #[error("fast-forward requested but {ours} and {theirs} have diverged")]
    NotFastForwardable { ours: String, theirs: String },

    /// `continue_merge` called while unresolved conflicts remain.
    #[error("cannot continue merge: {0} unresolved conflict(s) remain")]
    UnresolvedConflicts(usize),

    /// Empty commit would result and `allow_empty` is false.
    #[error("merge would produce an empty commit")]
    EmptyCommit,

    /// No merge is currently in progress for this repository.
    #[error("no merge in progress")]
    NoMergeInProgress,

    /// Underlying object store failure surfaced while walking trees/blobs.
    #[error("merge engine store error: {0}")]
    Store(#[from] StoreError),

    /// Underlying object codec failure (malformed tree/commit/blob).
    #[error("merge engine object error: {0}")]
    Object(#[from] GitError),
}
