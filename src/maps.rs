// SPDX-License-Identifier: GPL-2.0

//! Map creation, reuse, and pinning
//!
//! Walks the decoded `maps` records of one object in declaration order
//! and produces an equally long vector of descriptors. Gated-out entries
//! stay in the vector as `None` so relocation resolution can keep using
//! record indices.
//!
//! A map whose pin path already exists is reused instead of recreated;
//! either way the resulting descriptor must match the declared shape
//! exactly, otherwise some object is sharing a map it should not.

use std::io::{Read, Seek};
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process;

use log::{debug, error, info};

use crate::core::error::{LoaderError, Result};
use crate::core::types::{BpfMapType, BPF_F_RDONLY_PROG};
use crate::elf::ElfReader;
use crate::env::EnvSnapshot;
use crate::gate;
use crate::metadata::{token_str, Domain, MapDef, ObjectManifest};
use crate::sys::{self, BpfMapInfo, BPF_FS_PATH};

/// Effective kernel map type for a declared type.
///
/// Kernels below 4.14 lack DEVMAP and kernels below 5.4 lack
/// DEVMAP_HASH; ARRAY and HASH expose the same userspace api, so
/// substituting them keeps readers of the pinned map working. Programs
/// using the map are gated on kernel version separately and are not
/// loadable on such kernels anyway.
pub fn effective_map_type(env: &EnvSnapshot, declared: BpfMapType) -> BpfMapType {
    match declared {
        BpfMapType::Devmap if !env.is_at_least_kernel_version(4, 14, 0) => BpfMapType::Array,
        BpfMapType::DevmapHash if !env.is_at_least_kernel_version(5, 4, 0) => BpfMapType::Hash,
        other => other,
    }
}

/// Effective entry count: ring buffers must span at least a page, and
/// since declared sizes are powers of two, rounding up to the page size
/// yields the page multiple the kernel demands.
pub fn effective_max_entries(env: &EnvSnapshot, ty: BpfMapType, declared: u32) -> u32 {
    if ty == BpfMapType::Ringbuf && declared < env.page_size {
        env.page_size
    } else {
        declared
    }
}

/// Map flags as the kernel will report them: device maps are read-only
/// from the program side and the kernel sets that flag on its own during
/// map initialization.
pub fn effective_map_flags(ty: BpfMapType, declared: u32) -> u32 {
    match ty {
        BpfMapType::Devmap | BpfMapType::DevmapHash => declared | BPF_F_RDONLY_PROG,
        _ => declared,
    }
}

/// Pin location of a map:
/// `/sys/fs/bpf/<pin_subdir|prefix>map_<object>_<map>`, with an empty
/// object name for maps shared across objects.
pub fn map_pin_path(
    prefix: &str,
    pin_subdir: Domain,
    object_name: &str,
    map_name: &str,
    shared: bool,
) -> PathBuf {
    let object = if shared { "" } else { object_name };
    PathBuf::from(format!(
        "{BPF_FS_PATH}{}map_{}_{}",
        pin_subdir.pin_subdir(prefix),
        object,
        map_name
    ))
}

/// Staging location used while pinning under a selinux context.
fn map_staging_path(selinux_context: Domain, object_name: &str, map_name: &str) -> PathBuf {
    PathBuf::from(format!(
        "{BPF_FS_PATH}{}tmp_map_{}_{}",
        selinux_context.pin_subdir(""),
        object_name,
        map_name
    ))
}

/// Whether a descriptor matches the shape derived from its declaration.
pub fn map_matches(info: &BpfMapInfo, ty: BpfMapType, md: &MapDef, env: &EnvSnapshot) -> bool {
    info.map_type == ty as u32
        && info.key_size == md.key_size
        && info.value_size == md.value_size
        && info.max_entries == effective_max_entries(env, ty, md.max_entries)
        && info.map_flags == effective_map_flags(ty, md.map_flags)
}

fn map_matches_expectations(
    env: &EnvSnapshot,
    fd: &OwnedFd,
    map_name: &str,
    md: &MapDef,
    ty: BpfMapType,
) -> bool {
    // Descriptor introspection needs a 4.14 kernel; below that just
    // assume the map matches. The misconfigurations this check catches
    // are kernel independent, so coverage on newer kernels is almost
    // equivalent.
    if !env.is_at_least_kernel_version(4, 14, 0) {
        return true;
    }

    let info = match sys::bpf_map_info(fd) {
        Ok(info) => info,
        Err(e) => {
            error!("bpf_map_info of {map_name} failed: {e}");
            return false;
        }
    };

    if map_matches(&info, ty, md, env) {
        return true;
    }

    error!(
        "bpf map name {map_name} mismatch: desired/found: \
         type:{}/{} key:{}/{} value:{}/{} entries:{}/{} flags:{}/{}",
        ty as u32,
        info.map_type,
        md.key_size,
        info.key_size,
        md.value_size,
        info.value_size,
        effective_max_entries(env, ty, md.max_entries),
        info.max_entries,
        effective_map_flags(ty, md.map_flags),
        info.map_flags
    );
    false
}

/// Create or reuse every map of an object, returning descriptors aligned
/// with `maps` record order (`None` for gated-out entries).
pub fn create_maps<R: Read + Seek>(
    env: &EnvSnapshot,
    reader: &mut ElfReader<R>,
    manifest: &ObjectManifest,
    prefix: &str,
) -> Result<Vec<Option<OwnedFd>>> {
    let Some(section) = reader.section_bytes_by_name("maps")? else {
        return Ok(Vec::new()); // no maps to create
    };

    let defs = MapDef::decode_all(&section, manifest.sizeof_bpf_map_def as usize)?;
    let names = reader
        .section_symbol_names("maps", None)?
        .ok_or_else(|| LoaderError::Malformed("maps section has no symbols".into()))?;
    if names.len() != defs.len() {
        return Err(LoaderError::Malformed(format!(
            "maps section has {} records but {} symbols",
            defs.len(),
            names.len()
        )));
    }

    let mut map_fds: Vec<Option<OwnedFd>> = Vec::with_capacity(defs.len());

    for (md, map_name) in defs.iter().zip(&names) {
        // A non-zero reserved byte means the object was built against an
        // incompatible definition layout or tampered with; nothing it
        // declares can be trusted.
        if md.zero != 0 {
            error!("map {map_name} has non-zero reserved byte {}", md.zero);
            process::abort();
        }

        if let Some(reason) = gate::evaluate(env, &gate::GateKeys::from(md)) {
            info!("skipping map {map_name} which {reason}");
            map_fds.push(None);
            continue;
        }

        let ty = effective_map_type(env, BpfMapType::from_u32(md.map_type));
        let max_entries = effective_max_entries(env, ty, md.max_entries);

        let selinux_context = Domain::from_selinux_context(&md.selinux_context);
        if selinux_context.is_specified() {
            info!(
                "map {map_name} selinux_context [{}] -> '{}' ({})",
                token_str(&md.selinux_context),
                selinux_context.selinux_context(),
                selinux_context.pin_subdir("")
            );
        }

        let pin_subdir = Domain::from_pin_subdir(&md.pin_subdir);
        if pin_subdir.is_unrecognized() {
            return Err(LoaderError::Malformed(format!(
                "map {map_name} has unrecognized pin_subdir '{}'",
                token_str(&md.pin_subdir)
            )));
        }
        if pin_subdir.is_specified() {
            info!(
                "map {map_name} pin_subdir [{}] -> '{}'",
                token_str(&md.pin_subdir),
                pin_subdir.pin_subdir("")
            );
        }

        let pin_path = map_pin_path(prefix, pin_subdir, &manifest.object_name, map_name, md.shared);

        let reuse = sys::path_exists(&pin_path);
        let fd = if reuse {
            let fd = sys::bpf_obj_get_rdonly(&pin_path)?;
            debug!("reusing map {map_name} from {}", pin_path.display());
            fd
        } else {
            let fd = sys::bpf_create_map(
                ty as u32,
                md.key_size,
                md.value_size,
                max_entries,
                md.map_flags,
                map_name,
                env.is_at_least_kernel_version(4, 15, 0),
            )
            .map_err(|source| {
                error!("bpf_create_map {map_name}: {source}");
                LoaderError::Sys {
                    call: "bpf(MAP_CREATE)",
                    source,
                }
            })?;
            debug!("created map {map_name}");
            fd
        };

        // Run the shape check even for maps we just created; the reuse
        // path is rare, and a mismatch on a fresh map is equally fatal.
        if !map_matches_expectations(env, &fd, map_name, md, ty) {
            return Err(LoaderError::PinConflict {
                name: map_name.clone(),
            });
        }

        if !reuse {
            let staging = selinux_context
                .is_specified()
                .then(|| map_staging_path(selinux_context, &manifest.object_name, map_name));
            sys::pin_committed(&fd, staging.as_deref(), &pin_path)?;
            sys::chmod_path(&pin_path, md.mode)?;
            sys::chown_path(&pin_path, md.uid, md.gid)?;
        }

        match sys::bpf_map_info(&fd) {
            Ok(info) => info!("map {} id {}", pin_path.display(), info.id),
            Err(e) => error!("bpf_map_info failed: {e}"),
        }

        map_fds.push(Some(fd));
    }

    Ok(map_fds)
}

/// Expose the staging path shape for tests.
#[doc(hidden)]
pub fn staging_path_for(selinux_context: Domain, object_name: &str, map_name: &str) -> PathBuf {
    map_staging_path(selinux_context, object_name, map_name)
}
