// SPDX-License-Identifier: GPL-2.0

//! Whole-run orchestration
//!
//! Walks the configured search locations in declared order, loads every
//! object found in each, and routes failures: a non-critical object just
//! logs, the first critical failure becomes the run result, and a
//! required-version violation fails the run immediately regardless of
//! criticality.

use std::fs;

use log::{debug, error};

use crate::core::error::{LoaderError, Result};
use crate::env::EnvSnapshot;
use crate::metadata;
use crate::objects::{self, Location};
use crate::sys;

/// Search locations in load order. Objects from the mainline tethering
/// module land under per-audience subdirectories of the bpf filesystem.
pub static LOCATIONS: &[Location] = &[
    // tether offload
    Location {
        dir: "/apex/com.android.tethering/etc/bpf/",
        prefix: "tethering/",
    },
    // shared with netd & system server, netutils_wrapper has access
    Location {
        dir: "/apex/com.android.tethering/etc/bpf/netd_shared/",
        prefix: "netd_shared/",
    },
    // shared with netd & system server, netd read only
    Location {
        dir: "/apex/com.android.tethering/etc/bpf/netd_readonly/",
        prefix: "netd_readonly/",
    },
    // shared with system server
    Location {
        dir: "/apex/com.android.tethering/etc/bpf/net_shared/",
        prefix: "net_shared/",
    },
    // not shared, just network_stack
    Location {
        dir: "/apex/com.android.tethering/etc/bpf/net_private/",
        prefix: "net_private/",
    },
];

/// Load every `*.o` in one location, in the order the OS returns them.
///
/// Returns the first critical per-object error; non-critical failures
/// are logged and skipped. A missing source directory is not an error.
pub fn load_all_objects(env: &EnvSnapshot, location: &Location) -> Result<()> {
    let entries = match fs::read_dir(location.dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };

    let mut first_critical: Option<LoaderError> = None;

    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().ends_with(".o") {
            continue;
        }
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let path = entry.path();
        let (critical, result) = objects::load_object(&path, env, location);
        match result {
            Ok(()) => debug!("loaded object: {}", path.display()),
            Err(e @ LoaderError::RequiredVersion { .. }) => {
                error!("failed to load object: {} [{e}]", path.display());
                return Err(e);
            }
            Err(e) => {
                error!("failed to load object: {} [{e}]", path.display());
                if critical && first_critical.is_none() {
                    first_critical = Some(e);
                }
            }
        }
    }

    match first_critical {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Create every pin subdirectory up front. Doing this before any object
/// loads keeps pinning and renaming from racing against directory
/// creation when selinux contexts or pin subdirs point across locations.
pub fn create_pin_dirs() -> Result<()> {
    for location in LOCATIONS {
        sys::create_bpf_subdir(location.prefix)?;
    }
    // No objects are sourced for the loader's own subdirectory; it
    // exists to give the loader a labeled home, so make it by hand.
    sys::create_bpf_subdir("loader")
}

/// Load all objects from all locations. Returns the first critical
/// error; objects already pinned stay pinned.
pub fn load_all(env: &EnvSnapshot) -> Result<()> {
    assert!(
        metadata::section_table_is_disjoint(),
        "overlapping section name prefixes"
    );

    for location in LOCATIONS {
        if let Err(e) = load_all_objects(env, location) {
            error!(
                "=== CRITICAL FAILURE LOADING BPF PROGRAMS FROM {} ===",
                location.dir
            );
            error!("If this triggers reliably, you're probably missing kernel options or patches.");
            error!(
                "If this triggers randomly, you might be hitting some memory allocation \
                 problems or startup script race."
            );
            error!("--- DO NOT EXPECT SYSTEM TO BOOT SUCCESSFULLY ---");
            return Err(e);
        }
    }
    Ok(())
}
