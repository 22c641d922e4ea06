// SPDX-License-Identifier: GPL-2.0

//! Map relocation
//!
//! Splices the file descriptors of resolved maps into the instruction
//! streams of an object's code sections. A relocation record names a
//! symbol in the `maps` section and the byte offset of a 64-bit
//! immediate load; the load's immediate becomes the descriptor number
//! and its source register is tagged as a pseudo map fd for the kernel.

use std::io::{Read, Seek};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use log::error;

use crate::core::error::Result;
use crate::core::types::{BpfInsn, BPF_INSN_SIZE, BPF_PSEUDO_MAP_FD};
use crate::elf::{parse_rel_records, ElfReader};
use crate::progs::CodeSection;

/// Rewrite one instruction. Anything other than the 64-bit immediate
/// load opcode means the relocation is bogus; it is logged with a dump
/// of the surrounding instructions and skipped.
fn apply_relo(data: &mut [u8], offset: u64, fd: RawFd) {
    let insn_index = (offset / BPF_INSN_SIZE as u64) as usize;
    let byte_offset = insn_index * BPF_INSN_SIZE;

    let Some(raw) = data
        .get(byte_offset..byte_offset + BPF_INSN_SIZE)
        .and_then(|s| <&[u8; BPF_INSN_SIZE]>::try_from(s).ok())
    else {
        error!("relocation offset {offset} past end of section ({} bytes)", data.len());
        return;
    };

    let mut insn = BpfInsn::from_bytes(raw);
    if !insn.is_ld_imm64() {
        error!("invalid relo for insn {insn_index}: code 0x{:x}", insn.code);
        dump_instructions(data, insn_index + 3);
        return;
    }

    insn.imm = fd;
    insn.src_reg = BPF_PSEUDO_MAP_FD;
    data[byte_offset..byte_offset + BPF_INSN_SIZE].copy_from_slice(&insn.to_bytes());
}

/// Dump instructions up to `upto` for relocation debugging.
fn dump_instructions(data: &[u8], upto: usize) {
    error!("dumping all instructions till ins {upto}");
    for (row, chunk) in data.chunks(BPF_INSN_SIZE).take(upto).enumerate() {
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        error!("{row}: {}", bytes.join(" "));
    }
}

/// Apply every relocation of every code section against the map
/// descriptor vector, which is index-aligned with the `maps` symbols.
pub fn apply_map_relocations<R: Read + Seek>(
    reader: &mut ElfReader<R>,
    map_fds: &[Option<OwnedFd>],
    sections: &mut [CodeSection],
) -> Result<()> {
    let Some(map_names) = reader.section_symbol_names("maps", None)? else {
        return Ok(()); // nothing to relocate against
    };

    // Relocations resolve symbols by table index, so the unsorted order
    // is the right one here.
    let symtab = reader.symbols(false)?;

    for section in sections.iter_mut() {
        if section.rel_data.is_empty() {
            continue;
        }

        for rel in parse_rel_records(&section.rel_data)? {
            let sym_index = rel.sym_index() as usize;
            let Some(sym) = symtab.get(sym_index) else {
                error!("relocation symbol index {sym_index} out of range");
                continue;
            };
            let sym_name = reader.name_at(sym.st_name)?;

            if let Some(pos) = map_names.iter().position(|n| *n == sym_name) {
                // A gated-out map leaves no descriptor; the splice then
                // carries the invalid fd and the program either is gated
                // out too or fails verification loudly.
                let fd = map_fds
                    .get(pos)
                    .and_then(|f| f.as_ref())
                    .map(|f| f.as_raw_fd())
                    .unwrap_or(-1);
                apply_relo(&mut section.data, rel.r_offset, fd);
            }
        }
    }

    Ok(())
}
