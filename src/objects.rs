// SPDX-License-Identifier: GPL-2.0

//! Per-object load pipeline
//!
//! Runs one ELF object through its whole life cycle: manifest, version
//! window, code section extraction, map creation, relocation, program
//! loading. The first non-recoverable error wins; whether it matters to
//! the run as a whole is the object's `critical` bit, which the caller
//! routes on.

use std::fs::File;
use std::path::Path;

use log::{debug, error, info};

use crate::core::error::{LoaderError, Result};
use crate::elf::ElfReader;
use crate::env::EnvSnapshot;
use crate::metadata::ObjectManifest;
use crate::{maps, progs, relo};

/// One place to look for objects: a source directory and the default
/// pin path prefix for everything found in it.
#[derive(Debug, Clone, Copy)]
pub struct Location {
    /// Directory scanned for `*.o` files.
    pub dir: &'static str,
    /// Default pin subdirectory, e.g. `tethering/`.
    pub prefix: &'static str,
}

/// Load one object. Returns its criticality bit alongside the result so
/// the orchestrator can decide whether a failure fails the run.
pub fn load_object(path: &Path, env: &EnvSnapshot, location: &Location) -> (bool, Result<()>) {
    let mut critical = false;
    let result = load_object_pipeline(path, env, location, &mut critical);
    (critical, result)
}

fn load_object_pipeline(
    path: &Path,
    env: &EnvSnapshot,
    location: &Location,
    critical: &mut bool,
) -> Result<()> {
    let file = File::open(path)?;
    let mut reader = ElfReader::new(file)?;

    // Criticality is established before anything can fail so that even a
    // broken object is routed correctly.
    let critical_for = reader
        .section_bytes_by_name("critical")?
        .map(|raw| String::from_utf8_lossy(&raw[..raw.iter().position(|&b| b == 0).unwrap_or(raw.len())]).into_owned());
    *critical = critical_for.is_some();

    let manifest = ObjectManifest::parse(&mut reader, path)?;
    match &critical_for {
        Some(owner) => debug!(
            "loading critical for {owner} ELF object {} with license {}",
            path.display(),
            manifest.license
        ),
        None => debug!(
            "loading optional ELF object {} with license {}",
            path.display(),
            manifest.license
        ),
    }

    // Whole-object loader version window: outside it the object belongs
    // to some other loader generation and is silently skipped.
    if env.loader_version < manifest.bpfloader_min_ver {
        info!(
            "bpfloader version 0x{:05x} ignoring ELF object {} with min ver 0x{:05x}",
            env.loader_version,
            path.display(),
            manifest.bpfloader_min_ver
        );
        return Ok(());
    }
    if env.loader_version >= manifest.bpfloader_max_ver {
        info!(
            "bpfloader version 0x{:05x} ignoring ELF object {} with max ver 0x{:05x}",
            env.loader_version,
            path.display(),
            manifest.bpfloader_max_ver
        );
        return Ok(());
    }
    if env.loader_version < manifest.bpfloader_min_required_ver {
        error!(
            "bpfloader version 0x{:05x} failing due to ELF object {} with required min ver 0x{:05x}",
            env.loader_version,
            path.display(),
            manifest.bpfloader_min_required_ver
        );
        return Err(LoaderError::RequiredVersion {
            required: manifest.bpfloader_min_required_ver,
            running: env.loader_version,
        });
    }

    info!(
        "bpfloader version 0x{:05x} processing ELF object {} with ver [0x{:05x},0x{:05x})",
        env.loader_version,
        path.display(),
        manifest.bpfloader_min_ver,
        manifest.bpfloader_max_ver
    );

    manifest.check_record_sizes()?;

    let mut sections =
        progs::read_code_sections(&mut reader, manifest.sizeof_bpf_prog_def as usize).map_err(
            |e| {
                error!("couldn't read all code sections in {}", path.display());
                e
            },
        )?;

    let map_fds = maps::create_maps(env, &mut reader, &manifest, location.prefix).map_err(|e| {
        error!("failed to create maps: ({e}) in {}", path.display());
        e
    })?;

    relo::apply_map_relocations(&mut reader, &map_fds, &mut sections)?;

    progs::load_code_sections(env, &mut sections, &manifest.license, &manifest, location.prefix)
        .map_err(|e| {
            error!("failed to load programs: {e}");
            e
        })?;

    Ok(())
}
