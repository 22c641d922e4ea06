// SPDX-License-Identifier: GPL-2.0
//! Tests for bpf_loader::relo

mod common;

use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd};

use bpf_loader::core::types::{BpfAttachType, BpfInsn, BpfProgType, BPF_LD_IMM64, BPF_PSEUDO_MAP_FD};
use bpf_loader::elf::ElfReader;
use bpf_loader::progs::CodeSection;
use bpf_loader::relo::apply_map_relocations;
use common::{ElfBuilder, STT_OBJECT};

fn some_fd() -> OwnedFd {
    File::open("/dev/null").unwrap().into()
}

fn code_section(data: Vec<u8>, rel_data: Vec<u8>) -> CodeSection {
    CodeSection {
        prog_type: BpfProgType::CgroupSkb,
        expected_attach_type: BpfAttachType::Unspec,
        name: "ingress_foo".into(),
        data,
        rel_data,
        prog_def: None,
        prog_fd: None,
    }
}

/// Two-slot 64-bit immediate load followed by one ordinary instruction.
fn ld_imm64_program() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&BpfInsn::new(BPF_LD_IMM64, 1, 0, 0, 0).to_bytes());
    data.extend_from_slice(&[0u8; 8]); // second slot of the wide load
    data.extend_from_slice(&BpfInsn::new(0xb7, 0, 0, 0, 0).to_bytes()); // r0 = 0
    data
}

fn maps_elf() -> ElfReader<std::io::Cursor<Vec<u8>>> {
    let mut b = ElfBuilder::new();
    b.section("maps", &[0u8; 232]);
    b.symbol("map_a", "maps", STT_OBJECT, 0);
    b.symbol("map_b", "maps", STT_OBJECT, 116);
    ElfReader::new(b.cursor()).unwrap()
}

#[test]
fn test_relocation_splices_fd_and_tags_register() {
    let mut reader = maps_elf();
    let fd = some_fd();
    let raw_fd = fd.as_raw_fd();
    let map_fds = vec![Some(fd), None];

    // symbol index 0 is map_a, which holds the descriptor
    let mut sections = vec![code_section(ld_imm64_program(), ElfBuilder::rel_record(0, 0))];
    apply_map_relocations(&mut reader, &map_fds, &mut sections).unwrap();

    let insn = BpfInsn::from_bytes(sections[0].data[0..8].try_into().unwrap());
    assert_eq!(insn.code, BPF_LD_IMM64);
    assert_eq!(insn.imm, raw_fd);
    assert_eq!(insn.src_reg, BPF_PSEUDO_MAP_FD);

    // the second slot and the following instruction are untouched
    assert_eq!(&sections[0].data[8..16], &[0u8; 8]);
    let tail = BpfInsn::from_bytes(sections[0].data[16..24].try_into().unwrap());
    assert_eq!(tail.code, 0xb7);
}

#[test]
fn test_relocation_against_gated_out_map_splices_invalid_fd() {
    let mut reader = maps_elf();
    let map_fds = vec![Some(some_fd()), None];

    // symbol index 1 is map_b, gated out of the descriptor vector
    let mut sections = vec![code_section(ld_imm64_program(), ElfBuilder::rel_record(0, 1))];
    apply_map_relocations(&mut reader, &map_fds, &mut sections).unwrap();

    let insn = BpfInsn::from_bytes(sections[0].data[0..8].try_into().unwrap());
    assert_eq!(insn.imm, -1);
    assert_eq!(insn.src_reg, BPF_PSEUDO_MAP_FD);
}

#[test]
fn test_relocation_at_wrong_opcode_is_skipped() {
    let mut reader = maps_elf();
    let map_fds = vec![Some(some_fd()), None];

    // point the relocation at the mov at instruction index 2
    let mut sections = vec![code_section(ld_imm64_program(), ElfBuilder::rel_record(16, 0))];
    let before = sections[0].data.clone();
    apply_map_relocations(&mut reader, &map_fds, &mut sections).unwrap();

    // logged and skipped; the stream is unchanged and loading proceeds
    assert_eq!(sections[0].data, before);
}

#[test]
fn test_relocation_with_unknown_symbol_is_ignored() {
    let mut b = ElfBuilder::new();
    b.section("maps", &[0u8; 116]);
    b.symbol("map_a", "maps", STT_OBJECT, 0);
    b.symbol("some_function", "other", common::STT_FUNC, 0);
    let mut reader = ElfReader::new(b.cursor()).unwrap();

    let map_fds = vec![Some(some_fd())];
    // relocation names a symbol that is not a map
    let mut sections = vec![code_section(ld_imm64_program(), ElfBuilder::rel_record(0, 1))];
    let before = sections[0].data.clone();
    apply_map_relocations(&mut reader, &map_fds, &mut sections).unwrap();
    assert_eq!(sections[0].data, before);
}

#[test]
fn test_bad_rel_section_sizing_fails() {
    let mut reader = maps_elf();
    let map_fds = vec![Some(some_fd()), None];

    let mut rel = ElfBuilder::rel_record(0, 0);
    rel.pop(); // truncate the record
    let mut sections = vec![code_section(ld_imm64_program(), rel)];
    assert!(apply_map_relocations(&mut reader, &map_fds, &mut sections).is_err());
}
