//! Section header table: fixed 8-byte names with COFF long-name `/NNN`
//! indirection resolved against the COFF string table (spec §4.2).

use super::util::*;
use nom::{bytes::complete::take, error::context, number::complete::*, sequence::tuple};

bitflags::bitflags! {
    pub struct SectionCharacteristics: u32 {
        const CNT_CODE               = 0x0000_0020;
        const CNT_INITIALIZED_DATA   = 0x0000_0040;
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        const MEM_DISCARDABLE        = 0x0200_0000;
        const MEM_SHARED             = 0x1000_0000;
        const MEM_EXECUTE            = 0x2000_0000;
        const MEM_READ               = 0x4000_0000;
        const MEM_WRITE              = 0x8000_0000;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Raw 8-byte on-disk name, trimmed of trailing NULs; `/NNN` if the real
    /// name overflowed into the COFF string table.
    pub raw_name: String,
    /// The resolved display name: `raw_name` as-is, or the long name fixed up
    /// from the COFF string table when `raw_name` started with `/`.
    pub display_name: String,
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_line_numbers: u32,
    pub number_of_relocations: u16,
    pub number_of_line_numbers: u16,
    pub characteristics: SectionCharacteristics,
}

impl Section {
    pub fn parse(i: Input) -> Result<Self> {
        let (
            i,
            (
                raw_name,
                virtual_size,
                virtual_address,
                size_of_raw_data,
                pointer_to_raw_data,
                pointer_to_relocations,
                pointer_to_line_numbers,
                number_of_relocations,
                number_of_line_numbers,
                characteristics,
            ),
        ) = tuple((
            context("Name", take(8_usize)),
            context("VirtualSize", le_u32),
            context("VirtualAddress", le_u32),
            context("SizeOfRawData", le_u32),
            context("PointerToRawData", le_u32),
            context("PointerToRelocations", le_u32),
            context("PointerToLinenumbers", le_u32),
            context("NumberOfRelocations", le_u16),
            context("NumberOfLinenumbers", le_u16),
            context("Characteristics", le_u32),
        ))(i)?;

        let name = String::from_utf8_lossy(raw_name)
            .trim_end_matches('\0')
            .to_string();
        let characteristics = SectionCharacteristics::from_bits_truncate(characteristics);

        Ok((
            i,
            Self {
                display_name: name.clone(),
                raw_name: name,
                virtual_size,
                virtual_address,
                size_of_raw_data,
                pointer_to_raw_data,
                pointer_to_relocations,
                pointer_to_line_numbers,
                number_of_relocations,
                number_of_line_numbers,
                characteristics,
            },
        ))
    }

    /// If `raw_name` is a COFF long-name reference (`/NNN`), resolves it
    /// against the string table located at
    /// `pointer_to_symbol_table + number_of_symbols * 18` (18 = COFF symbol
    /// record size) and rewrites `display_name` in place. A malformed or
    /// missing reference is recoverable: `display_name` is simply left as-is.
    pub fn fixup_long_name(&mut self, file: &[u8], pointer_to_symbol_table: u32, number_of_symbols: u32) {
        let stripped = match self.raw_name.strip_prefix('/') {
            Some(s) => s,
            None => return,
        };
        let offset: usize = match stripped.parse() {
            Ok(n) => n,
            Err(_) => return,
        };
        const COFF_SYMBOL_RECORD_SIZE: u32 = 18;
        let string_table_base =
            pointer_to_symbol_table + number_of_symbols * COFF_SYMBOL_RECORD_SIZE;
        if let Some(name) = read_cstr_at(file, string_table_base as usize + offset) {
            if !name.is_empty() {
                self.display_name = name;
            }
        }
    }

    pub fn is_executable(&self) -> bool {
        self.characteristics
            .intersects(SectionCharacteristics::MEM_EXECUTE | SectionCharacteristics::CNT_CODE)
    }

    pub fn is_mapped(&self) -> bool {
        self.pointer_to_raw_data != 0 && self.size_of_raw_data != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section_bytes(name: &[u8; 8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(name);
        buf.extend_from_slice(&1000u32.to_le_bytes()); // VirtualSize
        buf.extend_from_slice(&0x1000u32.to_le_bytes()); // VirtualAddress
        buf.extend_from_slice(&0x200u32.to_le_bytes()); // SizeOfRawData
        buf.extend_from_slice(&0x400u32.to_le_bytes()); // PointerToRawData
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&(SectionCharacteristics::MEM_EXECUTE.bits()
            | SectionCharacteristics::CNT_CODE.bits())
        .to_le_bytes());
        buf
    }

    #[test]
    fn parses_plain_name_and_classifies_executable() {
        let buf = section_bytes(b".text\0\0\0");
        let (_, sec) = Section::parse(&buf).unwrap();
        assert_eq!(sec.display_name, ".text");
        assert!(sec.is_executable());
        assert!(sec.is_mapped());
    }

    #[test]
    fn long_name_falls_back_when_unresolvable() {
        let buf = section_bytes(b"/999999\0");
        let (_, mut sec) = Section::parse(&buf).unwrap();
        sec.fixup_long_name(&[], 0, 0);
        assert_eq!(sec.display_name, "/999999");
    }
}
