// SPDX-License-Identifier: GPL-2.0
//! Tests for bpf_loader::metadata

mod common;

use std::path::Path;

use bpf_loader::core::types::{BpfAttachType, BpfProgType};
use bpf_loader::elf::ElfReader;
use bpf_loader::metadata::*;
use bpf_loader::LoaderError;
use common::ElfBuilder;

fn sample_map_def() -> MapDef {
    MapDef {
        map_type: 1, // hash
        key_size: 4,
        value_size: 8,
        max_entries: 16,
        map_flags: 0,
        uid: 0,
        gid: 3003,
        mode: 0o660,
        bpfloader_min_ver: 43,
        bpfloader_max_ver: 0x20000,
        min_kver: 0x040e00,
        max_kver: 0x060000,
        selinux_context: token_from_str("fs_bpf_net_shared"),
        pin_subdir: token_from_str("net_shared/"),
        shared: true,
        zero: 0,
        ignore_on: IgnoreFlags::ENG | IgnoreFlags::RISCV64,
    }
}

#[test]
fn test_map_def_roundtrip() {
    let md = sample_map_def();
    let raw = md.encode();
    let decoded = MapDef::decode_all(&raw, SIZEOF_BPF_MAP_DEF).unwrap();
    assert_eq!(decoded, vec![md]);
}

#[test]
fn test_map_def_decode_larger_advertised_size() {
    // A future format appended 12 unknown bytes per record.
    let advertised = SIZEOF_BPF_MAP_DEF + 12;
    let mut section = Vec::new();
    for md in [sample_map_def(), MapDef::default()] {
        section.extend_from_slice(&md.encode());
        section.extend_from_slice(&[0xaa; 12]);
    }

    let decoded = MapDef::decode_all(&section, advertised).unwrap();
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0], sample_map_def());
    assert_eq!(decoded[1], MapDef::default());
}

#[test]
fn test_map_def_decode_v0_prefix_seeds_defaults() {
    // A v0 object advertises only the 32-byte prefix; everything past it
    // must take the non-zero defaults.
    let md = sample_map_def();
    let full = md.encode();
    let advertised = DEFAULT_SIZEOF_BPF_MAP_DEF as usize;
    let section = &full[..advertised];

    let decoded = MapDef::decode_all(section, advertised).unwrap();
    assert_eq!(decoded.len(), 1);
    let d = &decoded[0];
    // prefix fields came from the file
    assert_eq!(d.map_type, md.map_type);
    assert_eq!(d.key_size, md.key_size);
    assert_eq!(d.mode, md.mode);
    // trailing fields took defaults
    assert_eq!(d.bpfloader_min_ver, DEFAULT_BPFLOADER_MIN_VER);
    assert_eq!(d.bpfloader_max_ver, DEFAULT_BPFLOADER_MAX_VER);
    assert_eq!(d.min_kver, 0);
    assert_eq!(d.max_kver, KVER_INF);
    assert!(!d.shared);
    assert_eq!(d.zero, 0);
    assert_eq!(d.ignore_on, IgnoreFlags::empty());
}

#[test]
fn test_map_def_decode_rejects_bad_sizing() {
    let md = sample_map_def().encode();
    let mut section = md.to_vec();
    section.push(0);
    let err = MapDef::decode_all(&section, SIZEOF_BPF_MAP_DEF).unwrap_err();
    assert!(matches!(err, LoaderError::Malformed(_)));
}

#[test]
fn test_prog_def_roundtrip_and_v0_prefix() {
    let pd = ProgDef {
        uid: 0,
        gid: 3003,
        min_kver: 0x041300,
        max_kver: KVER_INF,
        optional: true,
        ignore_on: IgnoreFlags::USER,
        bpfloader_min_ver: 45,
        bpfloader_max_ver: 0x10000,
        selinux_context: token_from_str("fs_bpf_tethering"),
        pin_subdir: token_from_str("tethering/"),
    };
    let raw = pd.encode();
    assert_eq!(ProgDef::decode_all(&raw, SIZEOF_BPF_PROG_DEF).unwrap(), vec![pd.clone()]);

    let advertised = DEFAULT_SIZEOF_BPF_PROG_DEF as usize;
    let decoded = ProgDef::decode_all(&raw[..advertised], advertised).unwrap();
    assert_eq!(decoded[0].min_kver, pd.min_kver);
    assert!(decoded[0].optional);
    assert_eq!(decoded[0].bpfloader_max_ver, DEFAULT_BPFLOADER_MAX_VER);
    assert_eq!(decoded[0].pin_subdir, [0u8; DOMAIN_TOKEN_LEN]);
}

#[test]
fn test_domain_tokens() {
    assert_eq!(
        Domain::from_selinux_context(&token_from_str("fs_bpf_netd_readonly")),
        Domain::NetdReadonly
    );
    assert_eq!(
        Domain::from_selinux_context(&token_from_str("")),
        Domain::Unspecified
    );
    // unknown selinux context degrades to unspecified
    assert_eq!(
        Domain::from_selinux_context(&token_from_str("fs_bpf_from_the_future")),
        Domain::Unspecified
    );

    assert_eq!(
        Domain::from_pin_subdir(&token_from_str("net_private/")),
        Domain::NetPrivate
    );
    // unknown pin_subdir is a hard error marker
    assert!(Domain::from_pin_subdir(&token_from_str("who_knows/")).is_unrecognized());
}

#[test]
fn test_domain_pin_subdir_defaulting() {
    assert_eq!(Domain::Tethering.pin_subdir("loc/"), "tethering/");
    assert_eq!(Domain::Unspecified.pin_subdir("loc/"), "loc/");
    assert!(Domain::Tethering.is_specified());
    assert!(!Domain::Unspecified.is_specified());
}

#[test]
fn test_section_classification() {
    assert_eq!(section_prog_type("ingress/stats"), BpfProgType::CgroupSkb);
    assert_eq!(section_attach_type("ingress/stats"), BpfAttachType::Unspec);

    assert_eq!(
        section_prog_type("connect4/inet4_connect"),
        BpfProgType::CgroupSockAddr
    );
    assert_eq!(
        section_attach_type("connect4/inet4_connect"),
        BpfAttachType::CgroupInet4Connect
    );

    // the one prefix without a slash
    assert_eq!(section_prog_type("sysctl"), BpfProgType::CgroupSysctl);
    assert_eq!(section_attach_type("sysctl"), BpfAttachType::CgroupSysctl);

    assert_eq!(section_prog_type(".text"), BpfProgType::Unspec);
    assert_eq!(section_prog_type("maps"), BpfProgType::Unspec);
}

#[test]
fn test_section_table_is_disjoint() {
    assert!(section_table_is_disjoint());
}

#[test]
fn test_object_name_from_path() {
    assert_eq!(object_name_from_path(Path::new("/etc/bpf/offload.o")), "offload");
    assert_eq!(object_name_from_path(Path::new("offload@btf.o")), "offload");
    assert_eq!(object_name_from_path(Path::new("dir/netd@1.o")), "netd");
    assert_eq!(object_name_from_path(Path::new("noext")), "noext");
}

#[test]
fn test_manifest_parse() {
    let mut b = ElfBuilder::new();
    b.section("license", b"Apache 2.0\0");
    b.section("critical", b"netd\0");
    b.section("bpfloader_min_ver", &42u32.to_le_bytes());
    b.section("bpfloader_max_ver", &0x20000u32.to_le_bytes());
    b.section("size_of_bpf_map_def", &(SIZEOF_BPF_MAP_DEF as u32).to_le_bytes());
    let mut reader = ElfReader::new(b.cursor()).unwrap();

    let manifest = ObjectManifest::parse(&mut reader, Path::new("/bpf/offload@2.o")).unwrap();
    assert_eq!(manifest.object_name, "offload");
    assert_eq!(manifest.license, "Apache 2.0");
    assert!(manifest.critical);
    assert_eq!(manifest.bpfloader_min_ver, 42);
    assert_eq!(manifest.bpfloader_max_ver, 0x20000);
    assert_eq!(manifest.bpfloader_min_required_ver, 0);
    assert_eq!(manifest.sizeof_bpf_map_def, SIZEOF_BPF_MAP_DEF as u32);
    assert_eq!(manifest.sizeof_bpf_prog_def, DEFAULT_SIZEOF_BPF_PROG_DEF);
    assert!(manifest.check_record_sizes().is_ok());
}

#[test]
fn test_manifest_requires_license() {
    let mut b = ElfBuilder::new();
    b.section("progs", &[]);
    let mut reader = ElfReader::new(b.cursor()).unwrap();
    let err = ObjectManifest::parse(&mut reader, Path::new("x.o")).unwrap_err();
    assert!(matches!(err, LoaderError::Malformed(_)));
}

#[test]
fn test_manifest_rejects_shrunken_records() {
    let mut b = ElfBuilder::new();
    b.section("license", b"Apache 2.0\0");
    b.section("size_of_bpf_map_def", &16u32.to_le_bytes());
    let mut reader = ElfReader::new(b.cursor()).unwrap();
    let manifest = ObjectManifest::parse(&mut reader, Path::new("x.o")).unwrap();
    assert!(manifest.check_record_sizes().is_err());
}
