// SPDX-License-Identifier: GPL-2.0

//! Kernel and filesystem collaborators
//!
//! All raw system interaction lives here: the `bpf(2)` syscall wrappers,
//! pinning and atomic rename, ownership and mode changes, pin directory
//! creation, sysctl writes, and the property/`uname` reads feeding the
//! environment probe. Everything above this module works with safe
//! wrappers and [`OwnedFd`]s.

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use log::error;

use crate::core::error::{LoaderError, Result};
use crate::core::types::BPF_OBJ_NAME_LEN;

/// Root of the bpf filesystem.
pub const BPF_FS_PATH: &str = "/sys/fs/bpf/";

// ============================================================================
// bpf(2)
// ============================================================================

const BPF_MAP_CREATE: u32 = 0;
const BPF_MAP_UPDATE_ELEM: u32 = 2;
const BPF_PROG_LOAD: u32 = 5;
const BPF_OBJ_PIN: u32 = 6;
const BPF_OBJ_GET: u32 = 7;
const BPF_OBJ_GET_INFO_BY_FD: u32 = 15;

/// Flag for `BPF_MAP_UPDATE_ELEM`: create or update.
pub const BPF_ANY: u64 = 0;

/// Open flag for `BPF_OBJ_GET`: read-only access to the retrieved object.
pub const BPF_F_RDONLY: u32 = 1 << 3;

/// `unsafe` core of every wrapper; the attr structs below are plain data
/// prefixes of the kernel's `union bpf_attr`, so passing their size is
/// valid for both older and newer kernels (unknown tail bytes are zero).
fn sys_bpf<T>(cmd: u32, attr: &mut T) -> io::Result<libc::c_long> {
    let ret = unsafe {
        libc::syscall(
            libc::SYS_bpf,
            cmd as libc::c_ulong,
            attr as *mut T as *mut libc::c_void,
            mem::size_of::<T>() as libc::c_ulong,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn fd_from_ret(ret: libc::c_long) -> OwnedFd {
    // The kernel returned a fresh descriptor; we are its unique owner.
    unsafe { OwnedFd::from_raw_fd(ret as libc::c_int) }
}

fn obj_name(name: &str) -> [u8; BPF_OBJ_NAME_LEN] {
    let mut out = [0u8; BPF_OBJ_NAME_LEN];
    let n = name.len().min(BPF_OBJ_NAME_LEN - 1);
    out[..n].copy_from_slice(&name.as_bytes()[..n]);
    out
}

fn path_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| LoaderError::Malformed(format!("NUL in path {}", path.display())))
}

#[repr(C)]
struct MapCreateAttr {
    map_type: u32,
    key_size: u32,
    value_size: u32,
    max_entries: u32,
    map_flags: u32,
    inner_map_fd: u32,
    numa_node: u32,
    map_name: [u8; BPF_OBJ_NAME_LEN],
}

/// Create a kernel map. The map name is only passed on kernels that
/// understand it (4.15+); older kernels reject non-zero unknown fields.
pub fn bpf_create_map(
    map_type: u32,
    key_size: u32,
    value_size: u32,
    max_entries: u32,
    map_flags: u32,
    name: &str,
    with_name: bool,
) -> io::Result<OwnedFd> {
    let mut attr = MapCreateAttr {
        map_type,
        key_size,
        value_size,
        max_entries,
        map_flags,
        inner_map_fd: 0,
        numa_node: 0,
        map_name: if with_name { obj_name(name) } else { [0; BPF_OBJ_NAME_LEN] },
    };
    sys_bpf(BPF_MAP_CREATE, &mut attr).map(fd_from_ret)
}

#[repr(C)]
struct ProgLoadAttr {
    prog_type: u32,
    insn_cnt: u32,
    insns: u64,
    license: u64,
    log_level: u32,
    log_size: u32,
    log_buf: u64,
    kern_version: u32,
    prog_flags: u32,
    prog_name: [u8; BPF_OBJ_NAME_LEN],
    prog_ifindex: u32,
    expected_attach_type: u32,
}

/// Submit a program to the kernel verifier.
///
/// `log_buf` receives the verifier log; on failure the caller decides
/// whether and how to surface it.
#[allow(clippy::too_many_arguments)]
pub fn bpf_prog_load(
    prog_type: u32,
    kern_version: u32,
    license: &str,
    insns: &[u8],
    expected_attach_type: u32,
    name: &str,
    with_name: bool,
    log_buf: &mut [u8],
) -> io::Result<OwnedFd> {
    let license = CString::new(license).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let mut attr = ProgLoadAttr {
        prog_type,
        insn_cnt: (insns.len() / crate::core::types::BPF_INSN_SIZE) as u32,
        insns: insns.as_ptr() as u64,
        license: license.as_ptr() as u64,
        log_level: 1,
        log_size: log_buf.len() as u32,
        log_buf: log_buf.as_mut_ptr() as u64,
        kern_version,
        prog_flags: 0,
        prog_name: if with_name { obj_name(name) } else { [0; BPF_OBJ_NAME_LEN] },
        prog_ifindex: 0,
        expected_attach_type,
    };
    sys_bpf(BPF_PROG_LOAD, &mut attr).map(fd_from_ret)
}

#[repr(C)]
struct ObjAttr {
    pathname: u64,
    bpf_fd: u32,
    file_flags: u32,
}

/// Pin a kernel object at a bpf filesystem path.
pub fn bpf_obj_pin(fd: &OwnedFd, path: &Path) -> Result<()> {
    let pathname = path_cstring(path)?;
    let mut attr = ObjAttr {
        pathname: pathname.as_ptr() as u64,
        bpf_fd: fd.as_raw_fd() as u32,
        file_flags: 0,
    };
    sys_bpf(BPF_OBJ_PIN, &mut attr)
        .map(|_| ())
        .map_err(|source| LoaderError::Sys {
            call: "bpf(OBJ_PIN)",
            source,
        })
}

/// Retrieve a previously pinned object, read-only.
pub fn bpf_obj_get_rdonly(path: &Path) -> Result<OwnedFd> {
    let pathname = path_cstring(path)?;
    let mut attr = ObjAttr {
        pathname: pathname.as_ptr() as u64,
        bpf_fd: 0,
        file_flags: BPF_F_RDONLY,
    };
    sys_bpf(BPF_OBJ_GET, &mut attr)
        .map(fd_from_ret)
        .map_err(|source| LoaderError::Sys {
            call: "bpf(OBJ_GET)",
            source,
        })
}

#[repr(C)]
struct InfoAttr {
    bpf_fd: u32,
    info_len: u32,
    info: u64,
}

/// Shape of a kernel map as reported by `BPF_OBJ_GET_INFO_BY_FD`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct BpfMapInfo {
    /// Map type (raw value).
    pub map_type: u32,
    /// Kernel map id.
    pub id: u32,
    /// Key size in bytes.
    pub key_size: u32,
    /// Value size in bytes.
    pub value_size: u32,
    /// Maximum number of entries.
    pub max_entries: u32,
    /// Map flags.
    pub map_flags: u32,
    /// Map name as the kernel reports it.
    pub name: [u8; BPF_OBJ_NAME_LEN],
}

/// Fetch the shape of a map descriptor. Requires a 4.14+ kernel.
pub fn bpf_map_info(fd: &OwnedFd) -> io::Result<BpfMapInfo> {
    let mut info = BpfMapInfo::default();
    let mut attr = InfoAttr {
        bpf_fd: fd.as_raw_fd() as u32,
        info_len: mem::size_of::<BpfMapInfo>() as u32,
        info: &mut info as *mut BpfMapInfo as u64,
    };
    sys_bpf(BPF_OBJ_GET_INFO_BY_FD, &mut attr)?;
    Ok(info)
}

#[repr(C)]
#[derive(Default)]
struct ProgInfoPrefix {
    prog_type: u32,
    id: u32,
}

/// Kernel id of a program descriptor. Requires a 4.14+ kernel.
pub fn bpf_prog_id(fd: &OwnedFd) -> io::Result<u32> {
    let mut info = ProgInfoPrefix::default();
    let mut attr = InfoAttr {
        bpf_fd: fd.as_raw_fd() as u32,
        info_len: mem::size_of::<ProgInfoPrefix>() as u32,
        info: &mut info as *mut ProgInfoPrefix as u64,
    };
    sys_bpf(BPF_OBJ_GET_INFO_BY_FD, &mut attr)?;
    Ok(info.id)
}

#[repr(C)]
struct MapElemAttr {
    map_fd: u32,
    _pad: u32,
    key: u64,
    value: u64,
    flags: u64,
}

/// Write one map entry.
pub fn bpf_map_update(fd: &OwnedFd, key: &[u8], value: &[u8], flags: u64) -> io::Result<()> {
    let mut attr = MapElemAttr {
        map_fd: fd.as_raw_fd() as u32,
        _pad: 0,
        key: key.as_ptr() as u64,
        value: value.as_ptr() as u64,
        flags,
    };
    sys_bpf(BPF_MAP_UPDATE_ELEM, &mut attr).map(|_| ())
}

// ============================================================================
// Pinning Protocol
// ============================================================================

/// Atomically rename `from` to `to`, failing if `to` already exists.
pub fn rename_noreplace(from: &Path, to: &Path) -> Result<()> {
    let from_c = path_cstring(from)?;
    let to_c = path_cstring(to)?;
    let ret = unsafe {
        libc::renameat2(
            libc::AT_FDCWD,
            from_c.as_ptr(),
            libc::AT_FDCWD,
            to_c.as_ptr(),
            libc::RENAME_NOREPLACE,
        )
    };
    if ret != 0 {
        let err = io::Error::last_os_error();
        error!("rename {} {} -> {ret} [{err}]", from.display(), to.display());
        return Err(LoaderError::Sys {
            call: "renameat2",
            source: err,
        });
    }
    Ok(())
}

/// Commit a descriptor to its final pin path.
///
/// With a staging path the object is pinned there first and renamed into
/// place with no-replace semantics, so concurrent readers only ever
/// observe fully created pins under the final name (and the staging
/// directory provides the selinux context of the resulting inode).
pub fn pin_committed(fd: &OwnedFd, staging: Option<&Path>, dst: &Path) -> Result<()> {
    match staging {
        Some(tmp) => {
            bpf_obj_pin(fd, tmp).inspect_err(|e| error!("create {}: {e}", tmp.display()))?;
            rename_noreplace(tmp, dst)?;
        }
        None => {
            bpf_obj_pin(fd, dst).inspect_err(|e| error!("pin {}: {e}", dst.display()))?;
        }
    }
    Ok(())
}

/// chmod a pin path.
pub fn chmod_path(path: &Path, mode: u32) -> Result<()> {
    let c = path_cstring(path)?;
    if unsafe { libc::chmod(c.as_ptr(), mode as libc::mode_t) } != 0 {
        let err = io::Error::last_os_error();
        error!("chmod({}, 0{mode:o}): {err}", path.display());
        return Err(LoaderError::Sys {
            call: "chmod",
            source: err,
        });
    }
    Ok(())
}

/// chown a pin path.
pub fn chown_path(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let c = path_cstring(path)?;
    if unsafe { libc::chown(c.as_ptr(), uid, gid) } != 0 {
        let err = io::Error::last_os_error();
        error!("chown({}, {uid}, {gid}): {err}", path.display());
        return Err(LoaderError::Sys {
            call: "chown",
            source: err,
        });
    }
    Ok(())
}

/// Whether a path exists (access with `F_OK`).
pub fn path_exists(path: &Path) -> bool {
    match path_cstring(path) {
        Ok(c) => (unsafe { libc::access(c.as_ptr(), libc::F_OK) }) == 0,
        Err(_) => false,
    }
}

/// Create one subdirectory of the bpf filesystem, sticky and
/// world-writable like the root, so pinning under it works for every
/// domain. Already existing is fine.
pub fn create_bpf_subdir(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Ok(());
    }
    let path = format!("{BPF_FS_PATH}{prefix}");
    let c = CString::new(path.clone()).expect("no NUL in subdir prefix");

    let prev_umask = unsafe { libc::umask(0) };
    let ret = unsafe { libc::mkdir(c.as_ptr(), libc::S_ISVTX | 0o777) };
    let err = io::Error::last_os_error();
    unsafe { libc::umask(prev_umask) };

    if ret != 0 && err.raw_os_error() != Some(libc::EEXIST) {
        error!("failed to create directory {path}: {err}");
        return Err(LoaderError::Sys {
            call: "mkdir",
            source: err,
        });
    }
    Ok(())
}

// ============================================================================
// sysctl
// ============================================================================

/// Write a `/proc/sys` knob. The value carries a trailing newline to
/// match how the interfaces are exercised by hand.
pub fn write_proc_sys_file(filename: &str, value: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(filename)
        .map_err(|source| {
            error!("open('{filename}', O_WRONLY): {source}");
            LoaderError::Sys {
                call: "open",
                source,
            }
        })?;
    let written = file.write(value.as_bytes()).map_err(|source| {
        error!("write('{filename}', '{}'): {source}", value.trim_end());
        LoaderError::Sys {
            call: "write",
            source,
        }
    })?;
    if written != value.len() {
        error!("write('{filename}', '{}'): short write", value.trim_end());
        return Err(LoaderError::Sys {
            call: "write",
            source: io::Error::from(io::ErrorKind::WriteZero),
        });
    }
    Ok(())
}

// ============================================================================
// Environment Inputs
// ============================================================================

fn uname_field(pick: impl Fn(&libc::utsname) -> *const libc::c_char) -> String {
    let mut uts: libc::utsname = unsafe { mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return String::new();
    }
    let ptr = pick(&uts);
    unsafe { std::ffi::CStr::from_ptr(ptr) }
        .to_string_lossy()
        .into_owned()
}

/// Kernel release string from `uname(2)`.
pub fn uname_release() -> String {
    uname_field(|uts| uts.release.as_ptr())
}

/// Machine string from `uname(2)`.
pub fn uname_machine() -> String {
    uname_field(|uts| uts.machine.as_ptr())
}

/// Effective uid of this process.
pub fn current_uid() -> u32 {
    unsafe { libc::getuid() }
}

/// System page size in bytes.
pub fn page_size() -> u32 {
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret <= 0 {
        4096
    } else {
        ret as u32
    }
}

/// Read a system property, falling back to `default`.
#[cfg(target_os = "android")]
pub fn property_get(name: &str, default: &str) -> String {
    let Ok(name) = CString::new(name) else {
        return default.to_string();
    };
    let mut value = [0u8; libc::PROP_VALUE_MAX as usize];
    let len = unsafe {
        libc::__system_property_get(name.as_ptr(), value.as_mut_ptr() as *mut libc::c_char)
    };
    if len <= 0 {
        return default.to_string();
    }
    String::from_utf8_lossy(&value[..len as usize]).into_owned()
}

/// Read a system property, falling back to `default`.
///
/// Off the platform there is no property store; callers get the default,
/// which keeps the loader usable under test harnesses.
#[cfg(not(target_os = "android"))]
pub fn property_get(name: &str, default: &str) -> String {
    log::debug!("no property store, {name} defaults to '{default}'");
    default.to_string()
}
