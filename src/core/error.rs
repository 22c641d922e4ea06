// SPDX-License-Identifier: GPL-2.0

//! Error types for the loader

use std::io;

use thiserror::Error;

/// Result type alias for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors that can occur while loading an eBPF object.
///
/// Gated-out items are not errors: gating yields a skip, never a failure.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The ELF object is structurally broken: short reads, bad record
    /// sizing, a missing required section, or a code section that cannot
    /// be bound to its program definition.
    #[error("malformed object: {0}")]
    Malformed(String),

    /// The running environment cannot load this object (kernel too old,
    /// forbidden architecture or bitness, unknown build flavor).
    #[error("unsupported environment: {0}")]
    Unsupported(String),

    /// An already-pinned map disagrees with the declared shape. Maps are
    /// matched on type, key size, value size, entry count and flags; any
    /// mismatch means a mis-shared map.
    #[error("pinned map {name} does not match its declaration")]
    PinConflict {
        /// Name of the offending map.
        name: String,
    },

    /// The kernel verifier refused the program.
    #[error("verifier rejected program {name}: errno {errno}")]
    VerifierReject {
        /// Name of the offending program.
        name: String,
        /// errno returned by the PROG_LOAD syscall.
        errno: i32,
    },

    /// The object demands a newer loader via its required-version floor.
    /// Unlike the ordinary version window this is a hard failure for the
    /// whole run, never a silent skip.
    #[error("object requires loader version 0x{required:05x}, running 0x{running:05x}")]
    RequiredVersion {
        /// Inclusive minimum loader version declared by the object.
        required: u32,
        /// Version of the running loader.
        running: u32,
    },

    /// A system call failed.
    #[error("{call} failed: {source}")]
    Sys {
        /// Name of the failing call.
        call: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// An I/O error while reading the object file.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LoaderError {
    /// Build a `Sys` error from the current `errno`.
    pub fn last_os_error(call: &'static str) -> Self {
        LoaderError::Sys {
            call,
            source: io::Error::last_os_error(),
        }
    }
}
