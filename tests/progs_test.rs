// SPDX-License-Identifier: GPL-2.0
//! Tests for bpf_loader::progs (section extraction and the pre-syscall
//! gating paths)

mod common;

use std::path::PathBuf;

use bpf_loader::core::types::{BpfAttachType, BpfProgType};
use bpf_loader::elf::ElfReader;
use bpf_loader::env::kver;
use bpf_loader::metadata::{
    token_from_str, Domain, ObjectManifest, ProgDef, DEFAULT_BPFLOADER_MAX_VER,
    DEFAULT_SIZEOF_BPF_MAP_DEF, DEFAULT_SIZEOF_BPF_PROG_DEF, SIZEOF_BPF_PROG_DEF,
};
use bpf_loader::progs::{load_code_sections, prog_pin_path, read_code_sections};
use bpf_loader::LoaderError;
use common::{ElfBuilder, STT_FUNC, STT_OBJECT};

fn test_manifest() -> ObjectManifest {
    ObjectManifest {
        object_name: "offload".into(),
        license: "Apache 2.0".into(),
        critical: false,
        bpfloader_min_ver: 0,
        bpfloader_max_ver: DEFAULT_BPFLOADER_MAX_VER,
        bpfloader_min_required_ver: 0,
        sizeof_bpf_map_def: DEFAULT_SIZEOF_BPF_MAP_DEF,
        sizeof_bpf_prog_def: DEFAULT_SIZEOF_BPF_PROG_DEF,
    }
}

/// Object with one ingress program bound to its definition, plus a
/// companion relocation section and an unrelated data section.
fn one_prog_elf(defs: &[ProgDef]) -> ElfReader<std::io::Cursor<Vec<u8>>> {
    let mut progs = Vec::new();
    for def in defs {
        progs.extend_from_slice(&def.encode());
    }

    let mut b = ElfBuilder::new();
    b.section("license", b"Apache 2.0\0");
    b.section("progs", &progs);
    b.section("ingress/foo", &[0u8; 16]);
    b.section(".relingress/foo", &ElfBuilder::rel_record(0, 0));
    b.section(".text", &[0u8; 8]);
    b.symbol("foo_def", "progs", STT_OBJECT, 0);
    b.symbol("foo", "ingress/foo", STT_FUNC, 0);
    ElfReader::new(b.cursor()).unwrap()
}

#[test]
fn test_read_code_sections_classifies_and_binds() {
    let def = ProgDef {
        uid: 1000,
        ..Default::default()
    };
    let mut reader = one_prog_elf(std::slice::from_ref(&def));
    let sections = read_code_sections(&mut reader, SIZEOF_BPF_PROG_DEF).unwrap();

    assert_eq!(sections.len(), 1);
    let cs = &sections[0];
    assert_eq!(cs.prog_type, BpfProgType::CgroupSkb);
    assert_eq!(cs.expected_attach_type, BpfAttachType::Unspec);
    // slashes become underscores in the kept name
    assert_eq!(cs.name, "ingress_foo");
    assert_eq!(cs.data.len(), 16);
    // the adjacent .rel section was picked up
    assert_eq!(cs.rel_data.len(), 16);
    // bound through the foo_def symbol
    assert_eq!(cs.prog_def.as_ref().unwrap(), &def);
    assert!(cs.prog_fd.is_none());
}

#[test]
fn test_read_code_sections_leaves_unmatched_defs_unbound() {
    let mut progs = Vec::new();
    progs.extend_from_slice(&ProgDef::default().encode());

    let mut b = ElfBuilder::new();
    b.section("progs", &progs);
    b.section("egress/bar", &[0u8; 8]);
    // definition symbol does not match <function>_def
    b.symbol("unrelated_def", "progs", STT_OBJECT, 0);
    b.symbol("bar", "egress/bar", STT_FUNC, 0);
    let mut reader = ElfReader::new(b.cursor()).unwrap();

    let sections = read_code_sections(&mut reader, SIZEOF_BPF_PROG_DEF).unwrap();
    assert_eq!(sections.len(), 1);
    assert!(sections[0].prog_def.is_none());
}

#[test]
fn test_read_code_sections_requires_progs_section() {
    let mut b = ElfBuilder::new();
    b.section("license", b"x\0");
    let mut reader = ElfReader::new(b.cursor()).unwrap();
    let err = read_code_sections(&mut reader, SIZEOF_BPF_PROG_DEF).unwrap_err();
    assert!(matches!(err, LoaderError::Malformed(_)));
}

#[test]
fn test_load_fails_without_bound_definition() {
    let mut reader = one_prog_elf(&[ProgDef::default()]);
    let mut sections = read_code_sections(&mut reader, SIZEOF_BPF_PROG_DEF).unwrap();
    sections[0].prog_def = None;

    let env = common::test_env();
    let err = load_code_sections(&env, &mut sections, "Apache 2.0", &test_manifest(), "tethering/")
        .unwrap_err();
    assert!(matches!(err, LoaderError::Malformed(_)));
}

#[test]
fn test_load_skips_gated_out_program() {
    let def = ProgDef {
        min_kver: kver(9, 99, 0), // far future kernel
        ..Default::default()
    };
    let mut reader = one_prog_elf(std::slice::from_ref(&def));
    let mut sections = read_code_sections(&mut reader, SIZEOF_BPF_PROG_DEF).unwrap();

    let env = common::test_env();
    load_code_sections(&env, &mut sections, "Apache 2.0", &test_manifest(), "tethering/").unwrap();
    // silently skipped: no descriptor, no error
    assert!(sections[0].prog_fd.is_none());
}

#[test]
fn test_load_rejects_unrecognized_pin_subdir() {
    let def = ProgDef {
        pin_subdir: token_from_str("not_a_subdir/"),
        ..Default::default()
    };
    let mut reader = one_prog_elf(std::slice::from_ref(&def));
    let mut sections = read_code_sections(&mut reader, SIZEOF_BPF_PROG_DEF).unwrap();

    let env = common::test_env();
    let err = load_code_sections(&env, &mut sections, "Apache 2.0", &test_manifest(), "tethering/")
        .unwrap_err();
    assert!(matches!(err, LoaderError::Malformed(_)));
}

#[test]
fn test_prog_pin_path_formatting() {
    assert_eq!(
        prog_pin_path("tethering/", Domain::Unspecified, "offload", "ingress_foo"),
        PathBuf::from("/sys/fs/bpf/tethering/prog_offload_ingress_foo")
    );
    assert_eq!(
        prog_pin_path("tethering/", Domain::NetdShared, "offload", "ingress_foo"),
        PathBuf::from("/sys/fs/bpf/netd_shared/prog_offload_ingress_foo")
    );
}
