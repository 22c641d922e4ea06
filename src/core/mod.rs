// SPDX-License-Identifier: GPL-2.0

//! Core types, error definitions, and kernel ABI constants

pub mod error;
pub mod types;

pub use error::{LoaderError, Result};
