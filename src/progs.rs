// SPDX-License-Identifier: GPL-2.0

//! Program loading and pinning
//!
//! Extracts the loadable code sections of an object, binds each to its
//! program definition, and submits the (relocated) instruction streams
//! to the kernel verifier. Freshly loaded programs are pinned with the
//! same staged-rename protocol as maps.

use std::io::{Read, Seek};
use std::os::fd::OwnedFd;
use std::path::PathBuf;

use log::{debug, error, info, warn};

use crate::core::error::{LoaderError, Result};
use crate::core::types::{BpfAttachType, BpfProgType, BPF_LOG_BUF_SIZE};
use crate::elf::{ElfReader, STT_FUNC};
use crate::env::EnvSnapshot;
use crate::gate;
use crate::metadata::{
    section_attach_type, section_prog_type, token_str, Domain, ObjectManifest, ProgDef,
};
use crate::sys::{self, BPF_FS_PATH};

/// Mode of every pinned program.
const PROG_PIN_MODE: u32 = 0o440;

/// One loadable code section of an object.
#[derive(Debug)]
pub struct CodeSection {
    /// Program type derived from the section name prefix.
    pub prog_type: BpfProgType,
    /// Expected attach type derived from the section name prefix.
    pub expected_attach_type: BpfAttachType,
    /// Section name with slashes replaced by underscores.
    pub name: String,
    /// Raw instruction bytes, relocated in place before loading.
    pub data: Vec<u8>,
    /// Companion relocation records, empty when the section has none.
    pub rel_data: Vec<u8>,
    /// Bound program definition.
    pub prog_def: Option<ProgDef>,
    /// Kernel descriptor after a successful load.
    pub prog_fd: Option<OwnedFd>,
}

/// Pin name of a program: any `$suffix` is stripped, collapsing variant
/// programs (alternatives gated on kernel version, of which exactly one
/// survives) onto a single pin.
pub fn prog_pin_name(name: &str) -> &str {
    match name.rfind('$') {
        Some(i) => &name[..i],
        None => name,
    }
}

/// Pin location of a program:
/// `/sys/fs/bpf/<pin_subdir|prefix>prog_<object>_<program>`.
pub fn prog_pin_path(
    prefix: &str,
    pin_subdir: Domain,
    object_name: &str,
    prog_name: &str,
) -> PathBuf {
    PathBuf::from(format!(
        "{BPF_FS_PATH}{}prog_{}_{}",
        pin_subdir.pin_subdir(prefix),
        object_name,
        prog_name
    ))
}

fn prog_staging_path(selinux_context: Domain, object_name: &str, prog_name: &str) -> PathBuf {
    PathBuf::from(format!(
        "{BPF_FS_PATH}{}tmp_prog_{}_{}",
        selinux_context.pin_subdir(""),
        object_name,
        prog_name
    ))
}

/// Collect the loadable code sections of an object.
///
/// Sections are classified by name prefix; the matching `progs` record
/// is found through the symbol named `<first function symbol>_def`, and
/// a companion `.rel<section>` immediately follows its target section in
/// header order when present.
pub fn read_code_sections<R: Read + Seek>(
    reader: &mut ElfReader<R>,
    size_of_prog_def: usize,
) -> Result<Vec<CodeSection>> {
    let progs_section = reader
        .section_bytes_by_name("progs")?
        .ok_or_else(|| LoaderError::Malformed("object has no progs section".into()))?;
    let prog_defs = ProgDef::decode_all(&progs_section, size_of_prog_def)?;

    let prog_def_names = match reader.section_symbol_names("progs", None)? {
        Some(names) => names,
        None if prog_defs.is_empty() => Vec::new(),
        None => {
            return Err(LoaderError::Malformed(
                "progs section has no symbols".into(),
            ))
        }
    };
    if prog_def_names.len() != prog_defs.len() {
        return Err(LoaderError::Malformed(format!(
            "progs section has {} records but {} symbols",
            prog_defs.len(),
            prog_def_names.len()
        )));
    }

    let entries = reader.section_count();
    let mut sections = Vec::new();

    for i in 0..entries {
        let section_name = reader.section_name(i)?;

        let prog_type = section_prog_type(&section_name);
        if prog_type == BpfProgType::Unspec {
            continue;
        }
        // Derived from the raw name; the prefix match needs the slash.
        let expected_attach_type = section_attach_type(&section_name);
        let name = section_name.replace('/', "_");

        let data = reader.section_bytes_by_index(i)?;
        debug!("loaded code section {i} ({name})");

        let fn_names = reader
            .section_symbol_names(&section_name, Some(STT_FUNC))?
            .unwrap_or_default();
        let Some(first_fn) = fn_names.first() else {
            return Err(LoaderError::Malformed(format!(
                "code section {section_name} has no function symbol"
            )));
        };

        let wanted_def = format!("{first_fn}_def");
        let prog_def = prog_def_names
            .iter()
            .position(|n| *n == wanted_def)
            .map(|idx| prog_defs[idx].clone());

        let mut rel_data = Vec::new();
        if !data.is_empty() && i + 1 < entries {
            let next_name = reader.section_name(i + 1)?;
            if next_name == format!(".rel{section_name}") {
                rel_data = reader.section_bytes_by_index(i + 1)?;
                debug!("loaded relo section {} ({next_name})", i + 1);
            }
        }

        if !data.is_empty() {
            sections.push(CodeSection {
                prog_type,
                expected_attach_type,
                name,
                data,
                rel_data,
                prog_def,
                prog_fd: None,
            });
        }
    }

    Ok(sections)
}

/// Load and pin every surviving code section.
pub fn load_code_sections(
    env: &EnvSnapshot,
    sections: &mut [CodeSection],
    license: &str,
    manifest: &ObjectManifest,
    prefix: &str,
) -> Result<()> {
    if env.kernel_version == 0 {
        return Err(LoaderError::Unsupported(
            "unable to determine kernel version".into(),
        ));
    }

    for (i, section) in sections.iter_mut().enumerate() {
        let name = section.name.clone();

        let Some(def) = section.prog_def.clone() else {
            error!("[{i}] '{name}' missing program definition! bad object build?");
            return Err(LoaderError::Malformed(format!(
                "code section {name} has no program definition"
            )));
        };

        if let Some(reason) = gate::evaluate(env, &gate::GateKeys::from(&def)) {
            debug!("skipping program {name} which {reason}");
            continue;
        }

        // Unrecognized only counts once the version window says this
        // loader should understand the object at all.
        let selinux_context = Domain::from_selinux_context(&def.selinux_context);
        let pin_subdir = Domain::from_pin_subdir(&def.pin_subdir);
        if pin_subdir.is_unrecognized() {
            return Err(LoaderError::Malformed(format!(
                "program {name} has unrecognized pin_subdir '{}'",
                token_str(&def.pin_subdir)
            )));
        }

        if selinux_context.is_specified() {
            info!(
                "prog {name} selinux_context [{}] -> '{}' ({})",
                token_str(&def.selinux_context),
                selinux_context.selinux_context(),
                selinux_context.pin_subdir("")
            );
        }
        if pin_subdir.is_specified() {
            info!(
                "prog {name} pin_subdir [{}] -> '{}'",
                token_str(&def.pin_subdir),
                pin_subdir.pin_subdir("")
            );
        }

        let pin_name = prog_pin_name(&name);
        let pin_path = prog_pin_path(prefix, pin_subdir, &manifest.object_name, pin_name);

        let reuse = sys::path_exists(&pin_path);
        let fd = if reuse {
            let fd = sys::bpf_obj_get_rdonly(&pin_path)?;
            debug!("reusing prog {}", pin_path.display());
            fd
        } else {
            let mut log_buf = vec![0u8; BPF_LOG_BUF_SIZE];
            match sys::bpf_prog_load(
                section.prog_type as u32,
                env.kernel_version,
                license,
                &section.data,
                section.expected_attach_type as u32,
                &name,
                env.is_at_least_kernel_version(4, 15, 0),
                &mut log_buf,
            ) {
                Ok(fd) => {
                    debug!("loaded prog {name}");
                    fd
                }
                Err(e) => {
                    warn!("BPF_PROG_LOAD {name} failed: {e} - BEGIN log_buf contents:");
                    for line in verifier_log_lines(&log_buf) {
                        warn!("{line}");
                    }
                    warn!("BPF_PROG_LOAD - END log_buf contents.");

                    if def.optional {
                        warn!("failed program is marked optional - continuing...");
                        continue;
                    }
                    error!("non-optional program failed to load.");
                    return Err(LoaderError::VerifierReject {
                        name,
                        errno: e.raw_os_error().unwrap_or(0),
                    });
                }
            }
        };

        if !reuse {
            let staging = selinux_context
                .is_specified()
                .then(|| prog_staging_path(selinux_context, &manifest.object_name, pin_name));
            sys::pin_committed(&fd, staging.as_deref(), &pin_path)?;
            sys::chmod_path(&pin_path, PROG_PIN_MODE)?;
            sys::chown_path(&pin_path, def.uid, def.gid)?;
        }

        match sys::bpf_prog_id(&fd) {
            Ok(id) => info!("prog {} id {id}", pin_path.display()),
            Err(e) => error!("bpf_prog_id failed: {e}"),
        }

        section.prog_fd = Some(fd);
    }

    Ok(())
}

/// Split a verifier log buffer into printable lines.
fn verifier_log_lines(buf: &[u8]) -> Vec<String> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end])
        .lines()
        .map(|l| l.to_string())
        .collect()
}
