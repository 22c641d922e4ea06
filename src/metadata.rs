// SPDX-License-Identifier: GPL-2.0

//! Typed object metadata
//!
//! Decodes the compiler-embedded metadata sections (`maps`, `progs`, the
//! versioning scalars, `license`, `critical`) into typed records.
//!
//! The `maps` and `progs` sections are dense arrays of fixed-size records
//! whose actual record size is advertised by the `size_of_bpf_map_def` /
//! `size_of_bpf_prog_def` scalar sections. Records evolve by appending
//! fields, so decoding is struct-prefix copying: zero-initialize, seed the
//! non-zero defaults, then overwrite the leading `min(advertised, native)`
//! bytes from the file and advance the cursor by the advertised size.
//! Unknown trailing bytes are ignored and missing trailing fields keep
//! their defaults, in both directions of format evolution.

use std::path::Path;

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use log::{error, warn};

use crate::core::error::{LoaderError, Result};
use crate::core::types::{BpfAttachType, BpfProgType};
use crate::elf::ElfReader;

// ============================================================================
// Format Constants
// ============================================================================

/// Default loader version floor for objects that predate version scalars.
pub const DEFAULT_BPFLOADER_MIN_VER: u32 = 0;
/// Default (exclusive) loader version ceiling: v1.0.
pub const DEFAULT_BPFLOADER_MAX_VER: u32 = 0x10000;

/// Record size of the original map definition format; advertised sizes
/// below this are rejected.
pub const DEFAULT_SIZEOF_BPF_MAP_DEF: u32 = 32;
/// Record size of the original program definition format.
pub const DEFAULT_SIZEOF_BPF_PROG_DEF: u32 = 20;

/// Native (current) map definition record size.
pub const SIZEOF_BPF_MAP_DEF: usize = 116;
/// Native (current) program definition record size.
pub const SIZEOF_BPF_PROG_DEF: usize = 96;

/// Token array width of `selinux_context` and `pin_subdir` fields
/// (31 chars plus NUL).
pub const DOMAIN_TOKEN_LEN: usize = 32;

/// Kernel version meaning "no upper bound".
pub const KVER_INF: u32 = 0xFFFF_FFFF;

bitflags! {
    /// Platform exclusion bits carried by both record kinds. A set bit
    /// skips the entry on the matching build flavor or CPU platform.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IgnoreFlags: u8 {
        /// Skip on eng builds
        const ENG = 1 << 0;
        /// Skip on user builds
        const USER = 1 << 1;
        /// Skip on userdebug builds
        const USERDEBUG = 1 << 2;
        /// Skip on 32-bit ARM kernels
        const ARM32 = 1 << 3;
        /// Skip on 64-bit ARM kernels
        const AARCH64 = 1 << 4;
        /// Skip on 32-bit x86 kernels
        const X86_32 = 1 << 5;
        /// Skip on 64-bit x86 kernels
        const X86_64 = 1 << 6;
        /// Skip on 64-bit RISC-V kernels
        const RISCV64 = 1 << 7;
    }
}

// ============================================================================
// Map Definitions
// ============================================================================

/// One decoded `maps` section record.
///
/// Wire layout (little-endian): eight u32s `type`, `key_size`,
/// `value_size`, `max_entries`, `map_flags`, `uid`, `gid`, `mode` (the
/// 32-byte v0 prefix), then `bpfloader_min_ver`, `bpfloader_max_ver`,
/// `min_kver`, `max_kver`, the two 32-byte domain tokens, and the
/// `shared`, `zero`, `ignore_on` bytes plus one pad byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDef {
    /// Kernel map type (raw value).
    pub map_type: u32,
    /// Key size in bytes.
    pub key_size: u32,
    /// Value size in bytes.
    pub value_size: u32,
    /// Maximum number of entries.
    pub max_entries: u32,
    /// Map creation flags.
    pub map_flags: u32,
    /// Owner uid of the pinned map.
    pub uid: u32,
    /// Owner gid of the pinned map.
    pub gid: u32,
    /// File mode of the pinned map.
    pub mode: u32,
    /// Inclusive loader version floor.
    pub bpfloader_min_ver: u32,
    /// Exclusive loader version ceiling.
    pub bpfloader_max_ver: u32,
    /// Inclusive kernel version floor (packed).
    pub min_kver: u32,
    /// Exclusive kernel version ceiling (packed).
    pub max_kver: u32,
    /// Selinux context token, NUL padded.
    pub selinux_context: [u8; DOMAIN_TOKEN_LEN],
    /// Pin subdirectory token, NUL padded.
    pub pin_subdir: [u8; DOMAIN_TOKEN_LEN],
    /// Whether the pin name omits the object name so multiple objects can
    /// share the map.
    pub shared: bool,
    /// Reserved byte; anything but 0 marks a corrupt or malicious object.
    pub zero: u8,
    /// Platform exclusion bits.
    pub ignore_on: IgnoreFlags,
}

impl Default for MapDef {
    fn default() -> Self {
        Self {
            map_type: 0,
            key_size: 0,
            value_size: 0,
            max_entries: 0,
            map_flags: 0,
            uid: 0,
            gid: 0,
            mode: 0,
            bpfloader_min_ver: DEFAULT_BPFLOADER_MIN_VER,
            bpfloader_max_ver: DEFAULT_BPFLOADER_MAX_VER,
            min_kver: 0,
            max_kver: KVER_INF,
            selinux_context: [0; DOMAIN_TOKEN_LEN],
            pin_subdir: [0; DOMAIN_TOKEN_LEN],
            shared: false,
            zero: 0,
            ignore_on: IgnoreFlags::empty(),
        }
    }
}

impl MapDef {
    /// Decode a native-size buffer.
    fn decode(raw: &[u8; SIZEOF_BPF_MAP_DEF]) -> Self {
        let mut ctx = [0u8; DOMAIN_TOKEN_LEN];
        let mut subdir = [0u8; DOMAIN_TOKEN_LEN];
        ctx.copy_from_slice(&raw[48..80]);
        subdir.copy_from_slice(&raw[80..112]);
        Self {
            map_type: LittleEndian::read_u32(&raw[0..]),
            key_size: LittleEndian::read_u32(&raw[4..]),
            value_size: LittleEndian::read_u32(&raw[8..]),
            max_entries: LittleEndian::read_u32(&raw[12..]),
            map_flags: LittleEndian::read_u32(&raw[16..]),
            uid: LittleEndian::read_u32(&raw[20..]),
            gid: LittleEndian::read_u32(&raw[24..]),
            mode: LittleEndian::read_u32(&raw[28..]),
            bpfloader_min_ver: LittleEndian::read_u32(&raw[32..]),
            bpfloader_max_ver: LittleEndian::read_u32(&raw[36..]),
            min_kver: LittleEndian::read_u32(&raw[40..]),
            max_kver: LittleEndian::read_u32(&raw[44..]),
            selinux_context: ctx,
            pin_subdir: subdir,
            shared: raw[112] != 0,
            zero: raw[113],
            ignore_on: IgnoreFlags::from_bits_truncate(raw[114]),
        }
    }

    /// Encode to the native wire form. The inverse of [`MapDef::decode`];
    /// also the source of the default-seeded buffer during decoding.
    pub fn encode(&self) -> [u8; SIZEOF_BPF_MAP_DEF] {
        let mut raw = [0u8; SIZEOF_BPF_MAP_DEF];
        LittleEndian::write_u32(&mut raw[0..], self.map_type);
        LittleEndian::write_u32(&mut raw[4..], self.key_size);
        LittleEndian::write_u32(&mut raw[8..], self.value_size);
        LittleEndian::write_u32(&mut raw[12..], self.max_entries);
        LittleEndian::write_u32(&mut raw[16..], self.map_flags);
        LittleEndian::write_u32(&mut raw[20..], self.uid);
        LittleEndian::write_u32(&mut raw[24..], self.gid);
        LittleEndian::write_u32(&mut raw[28..], self.mode);
        LittleEndian::write_u32(&mut raw[32..], self.bpfloader_min_ver);
        LittleEndian::write_u32(&mut raw[36..], self.bpfloader_max_ver);
        LittleEndian::write_u32(&mut raw[40..], self.min_kver);
        LittleEndian::write_u32(&mut raw[44..], self.max_kver);
        raw[48..80].copy_from_slice(&self.selinux_context);
        raw[80..112].copy_from_slice(&self.pin_subdir);
        raw[112] = self.shared as u8;
        raw[113] = self.zero;
        raw[114] = self.ignore_on.bits();
        raw
    }

    /// Decode a `maps` section with struct-prefix semantics.
    pub fn decode_all(section: &[u8], advertised: usize) -> Result<Vec<MapDef>> {
        decode_records(section, advertised, "maps", |raw| {
            let mut buf = MapDef::default().encode();
            let n = raw.len().min(SIZEOF_BPF_MAP_DEF);
            buf[..n].copy_from_slice(&raw[..n]);
            MapDef::decode(&buf)
        })
    }
}

// ============================================================================
// Program Definitions
// ============================================================================

/// One decoded `progs` section record.
///
/// Wire layout (little-endian): u32s `uid`, `gid`, `min_kver`, `max_kver`,
/// then `optional`, `ignore_on` and two pad bytes (the 20-byte v0 prefix),
/// then `bpfloader_min_ver`, `bpfloader_max_ver` and the two 32-byte
/// domain tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgDef {
    /// Owner uid of the pinned program.
    pub uid: u32,
    /// Owner gid of the pinned program.
    pub gid: u32,
    /// Inclusive kernel version floor (packed).
    pub min_kver: u32,
    /// Exclusive kernel version ceiling (packed).
    pub max_kver: u32,
    /// Whether a verifier rejection skips just this program instead of
    /// failing the object.
    pub optional: bool,
    /// Platform exclusion bits.
    pub ignore_on: IgnoreFlags,
    /// Inclusive loader version floor.
    pub bpfloader_min_ver: u32,
    /// Exclusive loader version ceiling.
    pub bpfloader_max_ver: u32,
    /// Selinux context token, NUL padded.
    pub selinux_context: [u8; DOMAIN_TOKEN_LEN],
    /// Pin subdirectory token, NUL padded.
    pub pin_subdir: [u8; DOMAIN_TOKEN_LEN],
}

impl Default for ProgDef {
    fn default() -> Self {
        Self {
            uid: 0,
            gid: 0,
            min_kver: 0,
            max_kver: 0,
            optional: false,
            ignore_on: IgnoreFlags::empty(),
            bpfloader_min_ver: DEFAULT_BPFLOADER_MIN_VER,
            bpfloader_max_ver: DEFAULT_BPFLOADER_MAX_VER,
            selinux_context: [0; DOMAIN_TOKEN_LEN],
            pin_subdir: [0; DOMAIN_TOKEN_LEN],
        }
    }
}

impl ProgDef {
    fn decode(raw: &[u8; SIZEOF_BPF_PROG_DEF]) -> Self {
        let mut ctx = [0u8; DOMAIN_TOKEN_LEN];
        let mut subdir = [0u8; DOMAIN_TOKEN_LEN];
        ctx.copy_from_slice(&raw[28..60]);
        subdir.copy_from_slice(&raw[60..92]);
        Self {
            uid: LittleEndian::read_u32(&raw[0..]),
            gid: LittleEndian::read_u32(&raw[4..]),
            min_kver: LittleEndian::read_u32(&raw[8..]),
            max_kver: LittleEndian::read_u32(&raw[12..]),
            optional: raw[16] != 0,
            ignore_on: IgnoreFlags::from_bits_truncate(raw[17]),
            bpfloader_min_ver: LittleEndian::read_u32(&raw[20..]),
            bpfloader_max_ver: LittleEndian::read_u32(&raw[24..]),
            selinux_context: ctx,
            pin_subdir: subdir,
        }
    }

    /// Encode to the native wire form.
    pub fn encode(&self) -> [u8; SIZEOF_BPF_PROG_DEF] {
        let mut raw = [0u8; SIZEOF_BPF_PROG_DEF];
        LittleEndian::write_u32(&mut raw[0..], self.uid);
        LittleEndian::write_u32(&mut raw[4..], self.gid);
        LittleEndian::write_u32(&mut raw[8..], self.min_kver);
        LittleEndian::write_u32(&mut raw[12..], self.max_kver);
        raw[16] = self.optional as u8;
        raw[17] = self.ignore_on.bits();
        LittleEndian::write_u32(&mut raw[20..], self.bpfloader_min_ver);
        LittleEndian::write_u32(&mut raw[24..], self.bpfloader_max_ver);
        raw[28..60].copy_from_slice(&self.selinux_context);
        raw[60..92].copy_from_slice(&self.pin_subdir);
        raw
    }

    /// Decode a `progs` section with struct-prefix semantics.
    pub fn decode_all(section: &[u8], advertised: usize) -> Result<Vec<ProgDef>> {
        decode_records(section, advertised, "progs", |raw| {
            let mut buf = ProgDef::default().encode();
            let n = raw.len().min(SIZEOF_BPF_PROG_DEF);
            buf[..n].copy_from_slice(&raw[..n]);
            ProgDef::decode(&buf)
        })
    }
}

fn decode_records<T>(
    section: &[u8],
    advertised: usize,
    what: &str,
    decode_one: impl Fn(&[u8]) -> T,
) -> Result<Vec<T>> {
    if advertised == 0 || section.len() % advertised != 0 {
        error!(
            "improperly sized {what} section, {} % {advertised} != 0",
            section.len()
        );
        return Err(LoaderError::Malformed(format!(
            "{what} section size {} is not a multiple of the advertised record size {advertised}",
            section.len()
        )));
    }
    Ok(section.chunks(advertised).map(decode_one).collect())
}

// ============================================================================
// Domains
// ============================================================================

/// Destination selector for pinned objects.
///
/// Objects may carry per-map and per-program `selinux_context` and
/// `pin_subdir` tokens; both decode to the same domain enum because a
/// selinux context is implemented by pinning under its directory and
/// renaming into place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Token not known to this loader version.
    Unrecognized,
    /// No token given; use the location default.
    Unspecified,
    /// `/sys/fs/bpf/tethering`
    Tethering,
    /// `/sys/fs/bpf/net_private`
    NetPrivate,
    /// `/sys/fs/bpf/net_shared`
    NetShared,
    /// `/sys/fs/bpf/netd_readonly`
    NetdReadonly,
    /// `/sys/fs/bpf/netd_shared`
    NetdShared,
}

/// The single declarative domain table: domain, selinux-context token,
/// pin subdirectory. New domains are added here and nowhere else.
const DOMAIN_TABLE: &[(Domain, &str, &str)] = &[
    (Domain::Unspecified, "", ""),
    (Domain::Tethering, "fs_bpf_tethering", "tethering/"),
    (Domain::NetPrivate, "fs_bpf_net_private", "net_private/"),
    (Domain::NetShared, "fs_bpf_net_shared", "net_shared/"),
    (Domain::NetdReadonly, "fs_bpf_netd_readonly", "netd_readonly/"),
    (Domain::NetdShared, "fs_bpf_netd_shared", "netd_shared/"),
];

/// View a NUL-padded token array as a str.
pub fn token_str(token: &[u8; DOMAIN_TOKEN_LEN]) -> &str {
    let end = token.iter().position(|&b| b == 0).unwrap_or(token.len());
    std::str::from_utf8(&token[..end]).unwrap_or("")
}

impl Domain {
    /// Decode a `selinux_context` token. An unknown token degrades to
    /// `Unspecified`: the object then pins under the location default,
    /// which keeps old loaders working when new, more restrictive
    /// contexts are introduced.
    pub fn from_selinux_context(token: &[u8; DOMAIN_TOKEN_LEN]) -> Domain {
        let s = token_str(token);
        for (d, ctx, _) in DOMAIN_TABLE {
            if s == *ctx {
                return *d;
            }
        }
        warn!("ignoring unrecognized selinux_context '{s}'");
        Domain::Unspecified
    }

    /// Decode a `pin_subdir` token. An unknown token is `Unrecognized`
    /// and fails the object: the subdir is part of the pin path, so
    /// guessing would put the object where nothing can find it.
    pub fn from_pin_subdir(token: &[u8; DOMAIN_TOKEN_LEN]) -> Domain {
        let s = token_str(token);
        for (d, _, sub) in DOMAIN_TABLE {
            if s == *sub {
                return *d;
            }
        }
        error!("unrecognized pin_subdir '{s}'");
        Domain::Unrecognized
    }

    /// The selinux-context token of this domain.
    pub fn selinux_context(&self) -> &'static str {
        for (d, ctx, _) in DOMAIN_TABLE {
            if d == self {
                return *ctx;
            }
        }
        "(unrecognized)"
    }

    /// The pin subdirectory of this domain, with a caller default for
    /// `Unspecified`.
    pub fn pin_subdir<'a>(&self, unspecified: &'a str) -> &'a str {
        if *self == Domain::Unspecified {
            return unspecified;
        }
        for (d, _, sub) in DOMAIN_TABLE {
            if d == self {
                return *sub;
            }
        }
        "(unrecognized)"
    }

    /// Whether a token was actually given.
    pub fn is_specified(&self) -> bool {
        *self != Domain::Unspecified
    }

    /// Whether the token was unknown to this loader.
    pub fn is_unrecognized(&self) -> bool {
        *self == Domain::Unrecognized
    }
}

// ============================================================================
// Code Section Classification
// ============================================================================

/// Mapping of a section name prefix to program and attach type.
#[derive(Debug, Clone, Copy)]
pub struct SectionType {
    /// Section name prefix, e.g. `ingress/`.
    pub prefix: &'static str,
    /// Program type loaded for sections with this prefix.
    pub prog_type: BpfProgType,
    /// Expected attach type passed to the kernel.
    pub expected_attach_type: BpfAttachType,
}

/// Section name prefixes recognized as loadable program code.
///
/// A section is named `<prefix><name-of-program>`, e.g.
/// `ingress/stats_filter`. Prefixes are mutually non-overlapping, so
/// match order does not matter; [`section_table_is_disjoint`] checks that
/// at startup.
pub static SECTION_NAME_TYPES: &[SectionType] = &[
    section(
        "bind4/",
        BpfProgType::CgroupSockAddr,
        BpfAttachType::CgroupInet4Bind,
    ),
    section(
        "bind6/",
        BpfProgType::CgroupSockAddr,
        BpfAttachType::CgroupInet6Bind,
    ),
    section("cgroupskb/", BpfProgType::CgroupSkb, BpfAttachType::Unspec),
    section("cgroupsock/", BpfProgType::CgroupSock, BpfAttachType::Unspec),
    section(
        "cgroupsockcreate/",
        BpfProgType::CgroupSock,
        BpfAttachType::CgroupInetSockCreate,
    ),
    section(
        "cgroupsockrelease/",
        BpfProgType::CgroupSock,
        BpfAttachType::CgroupInetSockRelease,
    ),
    section(
        "connect4/",
        BpfProgType::CgroupSockAddr,
        BpfAttachType::CgroupInet4Connect,
    ),
    section(
        "connect6/",
        BpfProgType::CgroupSockAddr,
        BpfAttachType::CgroupInet6Connect,
    ),
    section(
        "egress/",
        BpfProgType::CgroupSkb,
        BpfAttachType::CgroupInetEgress,
    ),
    section(
        "getsockopt/",
        BpfProgType::CgroupSockopt,
        BpfAttachType::CgroupGetsockopt,
    ),
    section("ingress/", BpfProgType::CgroupSkb, BpfAttachType::Unspec),
    section("lwt_in/", BpfProgType::LwtIn, BpfAttachType::Unspec),
    section("lwt_out/", BpfProgType::LwtOut, BpfAttachType::Unspec),
    section(
        "lwt_seg6local/",
        BpfProgType::LwtSeg6local,
        BpfAttachType::Unspec,
    ),
    section("lwt_xmit/", BpfProgType::LwtXmit, BpfAttachType::Unspec),
    section(
        "postbind4/",
        BpfProgType::CgroupSock,
        BpfAttachType::CgroupInet4PostBind,
    ),
    section(
        "postbind6/",
        BpfProgType::CgroupSock,
        BpfAttachType::CgroupInet6PostBind,
    ),
    section(
        "recvmsg4/",
        BpfProgType::CgroupSockAddr,
        BpfAttachType::CgroupUdp4Recvmsg,
    ),
    section(
        "recvmsg6/",
        BpfProgType::CgroupSockAddr,
        BpfAttachType::CgroupUdp6Recvmsg,
    ),
    section("schedact/", BpfProgType::SchedAct, BpfAttachType::Unspec),
    section("schedcls/", BpfProgType::SchedCls, BpfAttachType::Unspec),
    section(
        "sendmsg4/",
        BpfProgType::CgroupSockAddr,
        BpfAttachType::CgroupUdp4Sendmsg,
    ),
    section(
        "sendmsg6/",
        BpfProgType::CgroupSockAddr,
        BpfAttachType::CgroupUdp6Sendmsg,
    ),
    section(
        "setsockopt/",
        BpfProgType::CgroupSockopt,
        BpfAttachType::CgroupSetsockopt,
    ),
    section("skfilter/", BpfProgType::SocketFilter, BpfAttachType::Unspec),
    section("sockops/", BpfProgType::SockOps, BpfAttachType::CgroupSockOps),
    section("sysctl", BpfProgType::CgroupSysctl, BpfAttachType::CgroupSysctl),
    section("xdp/", BpfProgType::Xdp, BpfAttachType::Unspec),
];

const fn section(
    prefix: &'static str,
    prog_type: BpfProgType,
    expected_attach_type: BpfAttachType,
) -> SectionType {
    SectionType {
        prefix,
        prog_type,
        expected_attach_type,
    }
}

/// Program type for a section name, `Unspec` when the section is not
/// program code.
pub fn section_prog_type(name: &str) -> BpfProgType {
    for snt in SECTION_NAME_TYPES {
        if name.starts_with(snt.prefix) {
            return snt.prog_type;
        }
    }
    BpfProgType::Unspec
}

/// Expected attach type for a section name.
pub fn section_attach_type(name: &str) -> BpfAttachType {
    for snt in SECTION_NAME_TYPES {
        if name.starts_with(snt.prefix) {
            return snt.expected_attach_type;
        }
    }
    BpfAttachType::Unspec
}

/// Verify no table prefix is a prefix of another, which would make the
/// classification order-dependent.
pub fn section_table_is_disjoint() -> bool {
    for (i, a) in SECTION_NAME_TYPES.iter().enumerate() {
        for (j, b) in SECTION_NAME_TYPES.iter().enumerate() {
            if i != j && b.prefix.starts_with(a.prefix) {
                return false;
            }
        }
    }
    true
}

// ============================================================================
// Object Manifest
// ============================================================================

/// Derive the object name from an ELF path: the basename with the `.o`
/// extension stripped and any trailing `@suffix` removed. The `@suffix`
/// convention allows shipping duplicate objects selected by loader
/// version while pinning under one name.
pub fn object_name_from_path(path: &Path) -> String {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match filename.rfind('.') {
        Some(i) => &filename[..i],
        None => &filename[..],
    };
    match stem.rfind('@') {
        Some(i) => stem[..i].to_string(),
        None => stem.to_string(),
    }
}

/// Per-object metadata read up front from the dedicated sections.
#[derive(Debug, Clone)]
pub struct ObjectManifest {
    /// Object name used in pin paths.
    pub object_name: String,
    /// License string passed to the kernel.
    pub license: String,
    /// Whether a failure of this object should fail the whole run.
    pub critical: bool,
    /// Inclusive loader version floor for the whole object.
    pub bpfloader_min_ver: u32,
    /// Exclusive loader version ceiling for the whole object.
    pub bpfloader_max_ver: u32,
    /// Inclusive loader version floor below which loading must fail
    /// rather than silently skip.
    pub bpfloader_min_required_ver: u32,
    /// Advertised map definition record size.
    pub sizeof_bpf_map_def: u32,
    /// Advertised program definition record size.
    pub sizeof_bpf_prog_def: u32,
}

impl ObjectManifest {
    /// Read the manifest sections of an object. Fails when the required
    /// `license` section is missing or the advertised record sizes fall
    /// below the v0 floors.
    pub fn parse<R: std::io::Read + std::io::Seek>(
        reader: &mut ElfReader<R>,
        path: &Path,
    ) -> Result<Self> {
        let critical = reader.section_bytes_by_name("critical")?.is_some();

        let license = match reader.section_bytes_by_name("license")? {
            Some(raw) => cstr_bytes(&raw),
            None => {
                return Err(LoaderError::Malformed(format!(
                    "no license in {}",
                    path.display()
                )))
            }
        };
        if license.is_empty() {
            return Err(LoaderError::Malformed(format!(
                "empty license in {}",
                path.display()
            )));
        }

        // Objects predating the versioned format carry none of these
        // sections; the defaults describe that v0 format.
        let bpfloader_min_ver =
            reader.read_section_u32("bpfloader_min_ver", DEFAULT_BPFLOADER_MIN_VER);
        let bpfloader_max_ver =
            reader.read_section_u32("bpfloader_max_ver", DEFAULT_BPFLOADER_MAX_VER);
        let bpfloader_min_required_ver = reader.read_section_u32("bpfloader_min_required_ver", 0);
        let sizeof_bpf_map_def =
            reader.read_section_u32("size_of_bpf_map_def", DEFAULT_SIZEOF_BPF_MAP_DEF);
        let sizeof_bpf_prog_def =
            reader.read_section_u32("size_of_bpf_prog_def", DEFAULT_SIZEOF_BPF_PROG_DEF);

        Ok(Self {
            object_name: object_name_from_path(path),
            license,
            critical,
            bpfloader_min_ver,
            bpfloader_max_ver,
            bpfloader_min_required_ver,
            sizeof_bpf_map_def,
            sizeof_bpf_prog_def,
        })
    }

    /// Check the advertised record sizes against the v0 floors. Runs
    /// after the version-window gate so an object meant for some other
    /// loader version is skipped, not failed, whatever it advertises.
    pub fn check_record_sizes(&self) -> Result<()> {
        if self.sizeof_bpf_map_def < DEFAULT_SIZEOF_BPF_MAP_DEF {
            return Err(LoaderError::Malformed(format!(
                "sizeof(bpf_map_def) of {} is too small (< {DEFAULT_SIZEOF_BPF_MAP_DEF})",
                self.sizeof_bpf_map_def
            )));
        }
        if self.sizeof_bpf_prog_def < DEFAULT_SIZEOF_BPF_PROG_DEF {
            return Err(LoaderError::Malformed(format!(
                "sizeof(bpf_prog_def) of {} is too small (< {DEFAULT_SIZEOF_BPF_PROG_DEF})",
                self.sizeof_bpf_prog_def
            )));
        }
        Ok(())
    }
}

/// Decode a NUL-terminated byte blob into a string.
fn cstr_bytes(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Build a NUL-padded domain token from a str; used by object producers
/// and tests.
pub fn token_from_str(s: &str) -> [u8; DOMAIN_TOKEN_LEN] {
    let mut token = [0u8; DOMAIN_TOKEN_LEN];
    let n = s.len().min(DOMAIN_TOKEN_LEN - 1);
    token[..n].copy_from_slice(&s.as_bytes()[..n]);
    token
}
