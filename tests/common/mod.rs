// SPDX-License-Identifier: GPL-2.0

//! In-memory ELF builder for loader tests
//!
//! Produces minimal but well-formed 64-bit little-endian relocatable
//! objects: named sections, a symbol table, and one merged string table
//! shared by section and symbol names, exactly the layout the loader's
//! reader expects.

#![allow(dead_code)]

use std::io::Cursor;

/// Symbol type: data object.
pub const STT_OBJECT: u8 = 1;
/// Symbol type: function.
pub const STT_FUNC: u8 = 2;

const EHDR_SIZE: usize = 64;
const SHDR_SIZE: usize = 64;

struct Section {
    name: String,
    sh_type: u32,
    data: Vec<u8>,
}

struct Sym {
    name: String,
    sym_type: u8,
    section: String,
    value: u64,
}

/// Builder for synthetic ELF objects.
#[derive(Default)]
pub struct ElfBuilder {
    sections: Vec<Section>,
    symbols: Vec<Sym>,
}

impl ElfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a PROGBITS section. Order of calls is header order, which
    /// matters for `.rel` adjacency.
    pub fn section(&mut self, name: &str, data: &[u8]) -> &mut Self {
        self.section_with_type(name, 1, data)
    }

    /// Append a section with an explicit type.
    pub fn section_with_type(&mut self, name: &str, sh_type: u32, data: &[u8]) -> &mut Self {
        self.sections.push(Section {
            name: name.to_string(),
            sh_type,
            data: data.to_vec(),
        });
        self
    }

    /// Append a symbol living in `section` at `value`.
    pub fn symbol(&mut self, name: &str, section: &str, sym_type: u8, value: u64) -> &mut Self {
        self.symbols.push(Sym {
            name: name.to_string(),
            sym_type,
            section: section.to_string(),
            value,
        });
        self
    }

    /// Build one `Elf64_Rel` record.
    pub fn rel_record(offset: u64, sym_index: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&offset.to_le_bytes());
        let r_info = ((sym_index as u64) << 32) | 1;
        out.extend_from_slice(&r_info.to_le_bytes());
        out
    }

    /// Serialize into ELF bytes.
    pub fn build(&self) -> Vec<u8> {
        // String table: one merged table for section and symbol names.
        let mut strtab = vec![0u8];
        let mut intern = |strtab: &mut Vec<u8>, s: &str| -> u32 {
            let off = strtab.len() as u32;
            strtab.extend_from_slice(s.as_bytes());
            strtab.push(0);
            off
        };

        let mut sec_name_offs = Vec::new();
        for sec in &self.sections {
            sec_name_offs.push(intern(&mut strtab, &sec.name));
        }
        let symtab_name_off = intern(&mut strtab, ".symtab");
        let strtab_name_off = intern(&mut strtab, ".strtab");

        let mut sym_name_offs = Vec::new();
        for sym in &self.symbols {
            sym_name_offs.push(intern(&mut strtab, &sym.name));
        }

        // Header indices: 0 null, 1..=n user sections, then symtab, then
        // the string table.
        let user_count = self.sections.len();
        let symtab_index = 1 + user_count;
        let strtab_index = symtab_index + 1;
        let section_count = strtab_index + 1;

        let section_index_of = |name: &str| -> u16 {
            for (i, sec) in self.sections.iter().enumerate() {
                if sec.name == name {
                    return (i + 1) as u16;
                }
            }
            0
        };

        let mut symtab_data = Vec::new();
        for (sym, name_off) in self.symbols.iter().zip(&sym_name_offs) {
            symtab_data.extend_from_slice(&name_off.to_le_bytes());
            symtab_data.push(sym.sym_type); // st_info: local binding
            symtab_data.push(0); // st_other
            symtab_data.extend_from_slice(&section_index_of(&sym.section).to_le_bytes());
            symtab_data.extend_from_slice(&sym.value.to_le_bytes());
            symtab_data.extend_from_slice(&0u64.to_le_bytes());
        }

        // Layout: ehdr, section contents, symtab, strtab, headers.
        let mut data_offsets = Vec::new();
        let mut cursor = EHDR_SIZE;
        for sec in &self.sections {
            data_offsets.push(cursor as u64);
            cursor += sec.data.len();
        }
        let symtab_off = cursor as u64;
        cursor += symtab_data.len();
        let strtab_off = cursor as u64;
        cursor += strtab.len();
        let shoff = cursor as u64;

        let mut out = Vec::new();

        // ELF header
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&1u16.to_le_bytes()); // e_type: ET_REL
        out.extend_from_slice(&247u16.to_le_bytes()); // e_machine: EM_BPF
        out.extend_from_slice(&1u32.to_le_bytes()); // e_version
        out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        out.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
        out.extend_from_slice(&shoff.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes()); // e_ehsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&(SHDR_SIZE as u16).to_le_bytes()); // e_shentsize
        out.extend_from_slice(&(section_count as u16).to_le_bytes()); // e_shnum
        out.extend_from_slice(&(strtab_index as u16).to_le_bytes()); // e_shstrndx

        for sec in &self.sections {
            out.extend_from_slice(&sec.data);
        }
        out.extend_from_slice(&symtab_data);
        out.extend_from_slice(&strtab);

        let shdr = |name: u32, sh_type: u32, offset: u64, size: u64| -> Vec<u8> {
            let mut h = Vec::with_capacity(SHDR_SIZE);
            h.extend_from_slice(&name.to_le_bytes());
            h.extend_from_slice(&sh_type.to_le_bytes());
            h.extend_from_slice(&0u64.to_le_bytes()); // sh_flags
            h.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
            h.extend_from_slice(&offset.to_le_bytes());
            h.extend_from_slice(&size.to_le_bytes());
            h.extend_from_slice(&0u32.to_le_bytes()); // sh_link
            h.extend_from_slice(&0u32.to_le_bytes()); // sh_info
            h.extend_from_slice(&0u64.to_le_bytes()); // sh_addralign
            h.extend_from_slice(&0u64.to_le_bytes()); // sh_entsize
            h
        };

        out.extend_from_slice(&shdr(0, 0, 0, 0)); // null section
        for ((sec, name_off), data_off) in
            self.sections.iter().zip(&sec_name_offs).zip(&data_offsets)
        {
            out.extend_from_slice(&shdr(*name_off, sec.sh_type, *data_off, sec.data.len() as u64));
        }
        out.extend_from_slice(&shdr(
            symtab_name_off,
            2, // SHT_SYMTAB
            symtab_off,
            symtab_data.len() as u64,
        ));
        out.extend_from_slice(&shdr(
            strtab_name_off,
            3, // SHT_STRTAB
            strtab_off,
            strtab.len() as u64,
        ));

        out
    }

    /// Build and wrap in a cursor, ready for the reader.
    pub fn cursor(&self) -> Cursor<Vec<u8>> {
        Cursor::new(self.build())
    }
}

/// An environment snapshot with sensible defaults for tests.
pub fn test_env() -> bpf_loader::env::EnvSnapshot {
    bpf_loader::env::EnvSnapshot {
        kernel_version: bpf_loader::env::kver(5, 15, 0),
        is_kernel_64bit: true,
        is_userspace_32bit: false,
        arch: bpf_loader::env::Arch::Arm,
        build_flavor: bpf_loader::env::BuildFlavor::User,
        effective_api_level: 35,
        running_as_root: true,
        loader_version: 46,
        page_size: 4096,
    }
}
