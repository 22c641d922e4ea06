// SPDX-License-Identifier: GPL-2.0

//! Random-access ELF reader
//!
//! A minimal parser for the 64-bit little-endian relocatable objects the
//! compiler emits. The reader caches the file header, the section header
//! table and the section-header string table at construction, then serves
//! sections by index, name, or type from the underlying stream.
//!
//! A section that does not exist is a soft condition (`Ok(None)`), always
//! distinguishable from a short read or seek failure, which is a hard
//! error.

use std::io::{Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, error, info, warn};

use crate::core::error::{LoaderError, Result};

// ============================================================================
// ELF Constants
// ============================================================================

/// Section type: program data
pub const SHT_PROGBITS: u32 = 1;
/// Section type: symbol table
pub const SHT_SYMTAB: u32 = 2;
/// Section type: relocations without addend
pub const SHT_REL: u32 = 9;

/// Symbol type: function
pub const STT_FUNC: u8 = 2;

/// Size of an `Elf64_Ehdr`.
const EHDR_SIZE: usize = 64;
/// Size of an `Elf64_Shdr`.
const SHDR_SIZE: usize = 64;
/// Size of an `Elf64_Sym`.
const SYM_SIZE: usize = 24;
/// Size of an `Elf64_Rel` relocation record.
pub const REL_SIZE: usize = 16;

const ELFMAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

// ============================================================================
// Header Types
// ============================================================================

/// The fields of the ELF file header the loader cares about.
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    /// Offset of the section header table.
    pub e_shoff: u64,
    /// Size of one section header entry.
    pub e_shentsize: u16,
    /// Number of section headers.
    pub e_shnum: u16,
    /// Index of the section-header string table.
    pub e_shstrndx: u16,
}

/// One entry of the section header table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionHeader {
    /// Offset of the section name in the string table.
    pub sh_name: u32,
    /// Section type (`SHT_*`).
    pub sh_type: u32,
    /// Section flags.
    pub sh_flags: u64,
    /// Virtual address (unused in relocatable objects).
    pub sh_addr: u64,
    /// File offset of the section contents.
    pub sh_offset: u64,
    /// Size of the section contents in bytes.
    pub sh_size: u64,
    /// Section link.
    pub sh_link: u32,
    /// Extra info.
    pub sh_info: u32,
    /// Alignment.
    pub sh_addralign: u64,
    /// Entry size for table sections.
    pub sh_entsize: u64,
}

/// One entry of the symbol table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Symbol {
    /// Offset of the symbol name in the string table.
    pub st_name: u32,
    /// Type and binding.
    pub st_info: u8,
    /// Visibility.
    pub st_other: u8,
    /// Index of the section this symbol lives in.
    pub st_shndx: u16,
    /// Value (offset within the section for relocatables).
    pub st_value: u64,
    /// Size of the object.
    pub st_size: u64,
}

impl Symbol {
    /// Symbol type (`STT_*`), the low nibble of `st_info`.
    pub fn sym_type(&self) -> u8 {
        self.st_info & 0xf
    }
}

/// One `Elf64_Rel` relocation record.
#[derive(Debug, Clone, Copy)]
pub struct Rel {
    /// Byte offset of the patched instruction within its section.
    pub r_offset: u64,
    /// Packed symbol index and relocation type.
    pub r_info: u64,
}

impl Rel {
    /// Symbol table index this relocation refers to.
    pub fn sym_index(&self) -> u32 {
        (self.r_info >> 32) as u32
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Random-access reader over a seekable ELF stream.
#[derive(Debug)]
pub struct ElfReader<R> {
    src: R,
    header: FileHeader,
    sections: Vec<SectionHeader>,
    shstrtab: Vec<u8>,
}

impl<R: Read + Seek> ElfReader<R> {
    /// Open a stream, validate the ELF identity, and cache the section
    /// header table and the section-header string table.
    pub fn new(mut src: R) -> Result<Self> {
        src.seek(SeekFrom::Start(0))?;
        let mut ehdr = [0u8; EHDR_SIZE];
        src.read_exact(&mut ehdr)
            .map_err(|_| LoaderError::Malformed("short read in ELF header".into()))?;

        if ehdr[0..4] != ELFMAG {
            return Err(LoaderError::Malformed("bad ELF magic".into()));
        }
        if ehdr[4] != ELFCLASS64 {
            return Err(LoaderError::Malformed("only 64-bit objects are supported".into()));
        }
        if ehdr[5] != ELFDATA2LSB {
            return Err(LoaderError::Malformed(
                "only little-endian objects are supported".into(),
            ));
        }

        let mut cur = Cursor::new(&ehdr[0x28..]);
        let e_shoff = cur.read_u64::<LittleEndian>()?;
        let mut cur = Cursor::new(&ehdr[0x3a..]);
        let e_shentsize = cur.read_u16::<LittleEndian>()?;
        let e_shnum = cur.read_u16::<LittleEndian>()?;
        let e_shstrndx = cur.read_u16::<LittleEndian>()?;

        let header = FileHeader {
            e_shoff,
            e_shentsize,
            e_shnum,
            e_shstrndx,
        };

        if (header.e_shentsize as usize) < SHDR_SIZE {
            return Err(LoaderError::Malformed(format!(
                "section header entry size {} too small",
                header.e_shentsize
            )));
        }

        let mut sections = Vec::with_capacity(header.e_shnum as usize);
        for i in 0..header.e_shnum as u64 {
            let off = header.e_shoff + i * header.e_shentsize as u64;
            src.seek(SeekFrom::Start(off))?;
            let mut raw = [0u8; SHDR_SIZE];
            src.read_exact(&mut raw)
                .map_err(|_| LoaderError::Malformed("short read in section headers".into()))?;
            let mut cur = Cursor::new(&raw[..]);
            sections.push(SectionHeader {
                sh_name: cur.read_u32::<LittleEndian>()?,
                sh_type: cur.read_u32::<LittleEndian>()?,
                sh_flags: cur.read_u64::<LittleEndian>()?,
                sh_addr: cur.read_u64::<LittleEndian>()?,
                sh_offset: cur.read_u64::<LittleEndian>()?,
                sh_size: cur.read_u64::<LittleEndian>()?,
                sh_link: cur.read_u32::<LittleEndian>()?,
                sh_info: cur.read_u32::<LittleEndian>()?,
                sh_addralign: cur.read_u64::<LittleEndian>()?,
                sh_entsize: cur.read_u64::<LittleEndian>()?,
            });
        }

        let shstrtab = match sections.get(header.e_shstrndx as usize) {
            Some(sh) => read_at(&mut src, sh.sh_offset, sh.sh_size as usize)?,
            None => {
                return Err(LoaderError::Malformed(
                    "section-header string table index out of range".into(),
                ))
            }
        };

        Ok(Self {
            src,
            header,
            sections,
            shstrtab,
        })
    }

    /// Cached file header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Number of sections in the object.
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Section header by index.
    pub fn section_header(&self, idx: usize) -> Option<&SectionHeader> {
        self.sections.get(idx)
    }

    /// Resolve a string table offset to a NUL-terminated name.
    ///
    /// These objects carry a merged string table, so both section names
    /// and symbol names resolve through it.
    pub fn name_at(&self, off: u32) -> Result<String> {
        let off = off as usize;
        if off >= self.shstrtab.len() {
            return Err(LoaderError::Malformed(format!(
                "string offset {off} past end of string table"
            )));
        }
        let tail = &self.shstrtab[off..];
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }

    /// Name of the section at `idx`.
    pub fn section_name(&self, idx: usize) -> Result<String> {
        let sh = self
            .sections
            .get(idx)
            .ok_or_else(|| LoaderError::Malformed(format!("section index {idx} out of range")))?;
        self.name_at(sh.sh_name)
    }

    /// Raw contents of the section at `idx`.
    pub fn section_bytes_by_index(&mut self, idx: usize) -> Result<Vec<u8>> {
        let sh = *self
            .sections
            .get(idx)
            .ok_or_else(|| LoaderError::Malformed(format!("section index {idx} out of range")))?;
        read_at(&mut self.src, sh.sh_offset, sh.sh_size as usize)
    }

    /// Contents of the first section named `name`, or `Ok(None)` when no
    /// such section exists.
    pub fn section_bytes_by_name(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        for i in 0..self.sections.len() {
            if self.section_name(i)? == name {
                return self.section_bytes_by_index(i).map(Some);
            }
        }
        Ok(None)
    }

    /// Contents of the first section of type `sh_type`, or `Ok(None)`.
    pub fn section_bytes_by_type(&mut self, sh_type: u32) -> Result<Option<Vec<u8>>> {
        for i in 0..self.sections.len() {
            if self.sections[i].sh_type == sh_type {
                return self.section_bytes_by_index(i).map(Some);
            }
        }
        Ok(None)
    }

    /// Decode a named section as a little-endian u32 scalar.
    ///
    /// Only the first four bytes matter; sections are usually padded out
    /// by alignment. A missing or too-short section yields the supplied
    /// default, as do read failures, so version scalars degrade to their
    /// v0 values rather than failing the object.
    pub fn read_section_u32(&mut self, name: &str, default: u32) -> u32 {
        match self.section_bytes_by_name(name) {
            Ok(Some(bytes)) if bytes.len() >= 4 => {
                let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                info!("section {name} value is {value} [0x{value:x}]");
                value
            }
            Ok(Some(_)) => {
                error!("section {name} too short (defaulting to {default} [0x{default:x}])");
                default
            }
            Ok(None) => {
                debug!("no section {name} (defaulting to {default} [0x{default:x}])");
                default
            }
            Err(e) => {
                error!("reading section {name} failed: {e} (defaulting to {default})");
                default
            }
        }
    }

    /// All symbols from the symbol table, optionally sorted by value.
    ///
    /// Sorting by `st_value` puts the symbols of a record-array section
    /// into record order.
    pub fn symbols(&mut self, sorted: bool) -> Result<Vec<Symbol>> {
        let raw = self
            .section_bytes_by_type(SHT_SYMTAB)?
            .ok_or_else(|| LoaderError::Malformed("object has no symbol table".into()))?;
        let mut syms = Vec::with_capacity(raw.len() / SYM_SIZE);
        let mut cur = Cursor::new(&raw[..]);
        for _ in 0..raw.len() / SYM_SIZE {
            syms.push(Symbol {
                st_name: cur.read_u32::<LittleEndian>()?,
                st_info: cur.read_u8()?,
                st_other: cur.read_u8()?,
                st_shndx: cur.read_u16::<LittleEndian>()?,
                st_value: cur.read_u64::<LittleEndian>()?,
                st_size: cur.read_u64::<LittleEndian>()?,
            });
        }
        if sorted {
            syms.sort_by_key(|s| s.st_value);
        }
        Ok(syms)
    }

    /// Name of the symbol at `index` in table order.
    pub fn symbol_name_by_index(&mut self, index: usize) -> Result<String> {
        let syms = self.symbols(false)?;
        let sym = syms.get(index).ok_or_else(|| {
            LoaderError::Malformed(format!("symbol index {index} out of range"))
        })?;
        self.name_at(sym.st_name)
    }

    /// Names of the symbols living in the named section, in value order,
    /// optionally restricted to one symbol type.
    pub fn section_symbol_names(
        &mut self,
        section: &str,
        sym_type: Option<u8>,
    ) -> Result<Option<Vec<String>>> {
        let mut sec_idx = None;
        for i in 0..self.sections.len() {
            if self.section_name(i)? == section {
                sec_idx = Some(i as u16);
                break;
            }
        }
        let Some(sec_idx) = sec_idx else {
            warn!("no {section} section in object");
            return Ok(None);
        };

        let mut names = Vec::new();
        for sym in self.symbols(true)? {
            if let Some(ty) = sym_type {
                if sym.sym_type() != ty {
                    continue;
                }
            }
            if sym.st_shndx == sec_idx {
                names.push(self.name_at(sym.st_name)?);
            }
        }
        Ok(Some(names))
    }

}

/// Decode a relocation blob into records. The blob length must be an
/// exact multiple of the record size.
pub fn parse_rel_records(raw: &[u8]) -> Result<Vec<Rel>> {
    if raw.len() % REL_SIZE != 0 {
        return Err(LoaderError::Malformed(format!(
            "relocation section size {} is not a multiple of {REL_SIZE}",
            raw.len()
        )));
    }
    let mut cur = Cursor::new(raw);
    let mut rels = Vec::with_capacity(raw.len() / REL_SIZE);
    for _ in 0..raw.len() / REL_SIZE {
        rels.push(Rel {
            r_offset: cur.read_u64::<LittleEndian>()?,
            r_info: cur.read_u64::<LittleEndian>()?,
        });
    }
    Ok(rels)
}

fn read_at<R: Read + Seek>(src: &mut R, offset: u64, len: usize) -> Result<Vec<u8>> {
    src.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf)
        .map_err(|_| LoaderError::Malformed("short read in section contents".into()))?;
    Ok(buf)
}
