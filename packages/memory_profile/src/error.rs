use std::io;

use thiserror::Error;

/// Errors that can occur when taking or reporting a heap snapshot.
///
/// A snapshot is all-or-nothing: when an error is returned, no partial profile exists and the
/// operation is not retried.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The runtime failed to stop the world.
    ///
    /// Allocator and thread registry state may be inconsistent after this, so the process should
    /// not attempt another snapshot.
    #[error("failed to stop the world for a heap snapshot: {0}")]
    StopTheWorld(#[source] io::Error),

    /// A runtime primitive returned successfully without running the snapshot callback.
    #[error("no heap snapshot was taken: {stage} returned without invoking its callback")]
    SnapshotNotTaken {
        /// The primitive that skipped the callback.
        stage: &'static str,
    },

    /// A heap runtime has already been installed for this process.
    #[error("a heap runtime has already been installed for this process")]
    RuntimeAlreadyInstalled,

    /// The report could not be written to its destination.
    #[error("failed to write memory profile report: {0}")]
    Output(#[from] io::Error),
}

/// A specialized `Result` type for memory profile operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
