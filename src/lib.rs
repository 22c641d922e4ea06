//! # BPF Object Loader
//!
//! A boot-time loader for compiled eBPF ELF objects. It parses the
//! metadata the compiler embeds alongside the bytecode, reconciles it
//! against the running kernel and platform, creates or reuses kernel
//! maps, splices their descriptors into the instruction streams, loads
//! the programs through the kernel verifier, and pins everything into
//! the bpf filesystem where unrelated processes can retrieve it later.
//!
//! The loader runs once, single-threaded, early in boot. Its durable
//! outputs are pin paths, not descriptors: every in-process fd is
//! dropped once its object is pinned.
//!
//! ## Module Structure
//!
//! - [`core`]: shared BPF types, kernel ABI constants, error kinds
//! - [`env`]: one-shot probe of kernel version, arch, bitness, flavor
//! - [`elf`]: random-access reader over 64-bit little-endian objects
//! - [`metadata`]: typed decoding of `maps`/`progs` records, domains,
//!   section classification, the per-object manifest
//! - [`gate`]: version-window and platform inclusion predicates
//! - [`sys`]: the `bpf(2)` wrappers and filesystem collaborators
//! - [`maps`]: map creation, reuse, equivalence checking, pinning
//! - [`relo`]: map-descriptor relocation of instruction streams
//! - [`progs`]: code section extraction and program loading
//! - [`objects`]: the per-object pipeline
//! - [`orchestrator`]: location iteration and failure routing

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Core types, error definitions, and kernel ABI constants
pub mod core;

/// Runtime environment probe
pub mod env;

/// Random-access ELF reader
pub mod elf;

/// Inclusion gating
pub mod gate;

/// Map creation, reuse, and pinning
pub mod maps;

/// Typed object metadata
pub mod metadata;

/// Per-object load pipeline
pub mod objects;

/// Whole-run orchestration
pub mod orchestrator;

/// Program loading and pinning
pub mod progs;

/// Map relocation
pub mod relo;

/// Kernel and filesystem collaborators
pub mod sys;

/// Commonly used types and traits
pub mod prelude {
    pub use crate::core::error::{LoaderError, Result};
    pub use crate::core::types::{BpfAttachType, BpfInsn, BpfMapType, BpfProgType};
    pub use crate::env::{EnvSnapshot, OsProbe, SystemProbe};
    pub use crate::objects::Location;
}

pub use crate::core::error::{LoaderError, Result};
