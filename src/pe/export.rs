//! Export Parser (spec §4.4): named and ordinal-only exports, forwarded
//! exports resolved through the API-set schema, name and ordinal indices.

use std::collections::HashMap;

use log::{debug, warn};

use crate::addr::{Raw, Rva, Va};
use crate::apiset::{resolve_forward, ApiSetSchema};
use crate::pe::directories::DirectoryAnchor;
use crate::pe::mapper::AddressMapper;
use crate::pe::sections::Section;
use crate::pe::util::{read_cstr_at, read_u16_at, read_u32_at};
use crate::symbols::{SymbolKind, SymbolPublisher, SymbolRecord};

#[derive(Debug, Clone, Default)]
pub struct ExportEntry {
    /// Empty for ordinal-only exports.
    pub function_name: String,
    /// Absolute ordinal (`Base` already added).
    pub ordinal: u32,
    /// VA of the slot in `AddressOfFunctions` holding this export's RVA.
    pub export_table_va: Va,
    pub export_table_raw: Raw,
    pub func_addr_rva: Rva,
    pub func_addr_va: Va,
    pub func_addr_raw: Raw,
    pub executable: bool,
    pub original_forwarded_to: String,
    pub forwarded_to: String,
}

impl ExportEntry {
    pub fn is_forwarded(&self) -> bool {
        !self.forwarded_to.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    pub original_name: String,
    pub entries: Vec<ExportEntry>,
    pub by_name: HashMap<String, usize>,
    pub by_ordinal: HashMap<u32, usize>,
}

struct ExportDirectoryHeader {
    name_rva: u32,
    base: u32,
    number_of_functions: u32,
    number_of_names: u32,
    address_of_functions: u32,
    address_of_names: u32,
    address_of_name_ordinals: u32,
}

fn read_export_directory_header(file: &[u8], raw: usize) -> Option<ExportDirectoryHeader> {
    Some(ExportDirectoryHeader {
        name_rva: read_u32_at(file, raw + 12)?,
        base: read_u32_at(file, raw + 16)?,
        number_of_functions: read_u32_at(file, raw + 20)?,
        number_of_names: read_u32_at(file, raw + 24)?,
        address_of_functions: read_u32_at(file, raw + 28)?,
        address_of_names: read_u32_at(file, raw + 32)?,
        address_of_name_ordinals: read_u32_at(file, raw + 36)?,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn parse_exports(
    file: &[u8],
    mapper: &AddressMapper,
    sections: &[Section],
    anchor: DirectoryAnchor,
    consumer_name: &str,
    schema: &dyn ApiSetSchema,
    module_index: usize,
    publisher: &mut dyn SymbolPublisher,
) -> Option<ExportTable> {
    if !anchor.is_present() {
        return None;
    }
    let dir_rva = mapper.va_to_rva(anchor.va);
    let dir_raw = mapper.rva_to_raw(dir_rva, sections);
    if !dir_raw.is_valid() {
        warn!("export directory RVA {:?} does not map to any section", dir_rva);
        return None;
    }

    let header = read_export_directory_header(file, dir_raw.0 as usize)?;
    let original_name = read_cstr_at(file, mapper.rva_to_raw(Rva(header.name_rva), sections).0 as usize)
        .unwrap_or_default();
    let consumer = if original_name.is_empty() {
        consumer_name
    } else {
        original_name.as_str()
    };

    let mut table = ExportTable {
        original_name,
        ..Default::default()
    };

    if header.number_of_functions == 0 {
        debug!("export directory present with zero functions");
        return Some(table);
    }

    let mut handled = vec![false; header.number_of_functions as usize];

    for i in 0..header.number_of_names {
        let name_rva = match read_u32_at(file, (mapper.rva_to_raw(Rva(header.address_of_names), sections).0 + i as u64 * 4) as usize) {
            Some(v) => v,
            None => continue,
        };
        let ordinal_relative = match read_u16_at(
            file,
            (mapper.rva_to_raw(Rva(header.address_of_name_ordinals), sections).0 + i as u64 * 2) as usize,
        ) {
            Some(v) => v,
            None => continue,
        };
        if ordinal_relative as u32 >= header.number_of_functions {
            continue;
        }
        let name =
            read_cstr_at(file, mapper.rva_to_raw(Rva(name_rva), sections).0 as usize).unwrap_or_default();

        let function_slot_raw = mapper.rva_to_raw(Rva(header.address_of_functions), sections).0
            + ordinal_relative as u64 * 4;
        let func_rva = read_u32_at(file, function_slot_raw as usize).unwrap_or(0);

        let export_table_va = Rva(header.address_of_functions + ordinal_relative as u32 * 4)
            .to_va(mapper.image_base());
        let export_table_raw = Raw(function_slot_raw);

        let (executable, original_forwarded_to, forwarded_to, func_addr_raw) = classify_export(
            file, mapper, sections, anchor, consumer, func_rva, schema,
        );

        let entry = ExportEntry {
            function_name: name.clone(),
            ordinal: header.base + ordinal_relative as u32,
            export_table_va,
            export_table_raw,
            func_addr_rva: Rva(func_rva),
            func_addr_va: Rva(func_rva).to_va(mapper.image_base()),
            func_addr_raw,
            executable,
            original_forwarded_to,
            forwarded_to,
        };

        let list_index = table.entries.len();
        if !table.by_name.contains_key(&name) && !name.is_empty() {
            table.by_name.insert(name.clone(), list_index);
        } else if !name.is_empty() {
            debug!("duplicate exported name {:?}, keeping first writer", name);
        }
        if table.by_ordinal.insert(entry.ordinal, list_index).is_some() {
            warn!("duplicate export ordinal {}", entry.ordinal);
        }

        publisher.add(SymbolRecord {
            va: export_table_va,
            kind: SymbolKind::EatAddr,
            module_index,
            list_index,
            param: String::new(),
        });
        publisher.add(SymbolRecord {
            va: Rva(header.address_of_name_ordinals + i * 2).to_va(mapper.image_base()),
            kind: SymbolKind::EatOrdinal,
            module_index,
            list_index,
            param: String::new(),
        });
        publisher.add(SymbolRecord {
            va: Rva(header.address_of_names + i * 4).to_va(mapper.image_base()),
            kind: SymbolKind::EatName,
            module_index,
            list_index,
            param: String::new(),
        });
        if !entry.is_forwarded() {
            publisher.add(SymbolRecord {
                va: entry.func_addr_va,
                kind: SymbolKind::Export,
                module_index,
                list_index,
                param: String::new(),
            });
        }

        handled[ordinal_relative as usize] = true;
        table.entries.push(entry);
    }

    for (slot, was_handled) in handled.iter().enumerate() {
        if *was_handled {
            continue;
        }
        let function_slot_raw =
            mapper.rva_to_raw(Rva(header.address_of_functions), sections).0 + slot as u64 * 4;
        let func_rva = read_u32_at(file, function_slot_raw as usize).unwrap_or(0);
        if func_rva == 0 {
            continue;
        }

        let export_table_va =
            Rva(header.address_of_functions + slot as u32 * 4).to_va(mapper.image_base());
        let export_table_raw = Raw(function_slot_raw);

        let (executable, original_forwarded_to, forwarded_to, func_addr_raw) =
            classify_export(file, mapper, sections, anchor, consumer, func_rva, schema);

        let entry = ExportEntry {
            function_name: String::new(),
            ordinal: header.base + slot as u32,
            export_table_va,
            export_table_raw,
            func_addr_rva: Rva(func_rva),
            func_addr_va: Rva(func_rva).to_va(mapper.image_base()),
            func_addr_raw,
            executable,
            original_forwarded_to,
            forwarded_to,
        };

        let list_index = table.entries.len();
        if table.by_ordinal.insert(entry.ordinal, list_index).is_some() {
            warn!("duplicate export ordinal {}", entry.ordinal);
        }
        publisher.add(SymbolRecord {
            va: export_table_va,
            kind: SymbolKind::EatAddr,
            module_index,
            list_index,
            param: String::new(),
        });
        if !entry.is_forwarded() {
            publisher.add(SymbolRecord {
                va: entry.func_addr_va,
                kind: SymbolKind::Export,
                module_index,
                list_index,
                param: String::new(),
            });
        }

        table.entries.push(entry);
    }

    Some(table)
}

fn classify_export(
    file: &[u8],
    mapper: &AddressMapper,
    sections: &[Section],
    export_anchor: DirectoryAnchor,
    consumer: &str,
    func_rva: u32,
    schema: &dyn ApiSetSchema,
) -> (bool, String, String, Raw) {
    let func_addr_raw = mapper.rva_to_raw(Rva(func_rva), sections);
    if export_anchor.contains_rva(Rva(func_rva), mapper) {
        let original_forwarded_to = read_cstr_at(file, func_addr_raw.0 as usize).unwrap_or_default();
        let forwarded_to = resolve_forward(consumer, &original_forwarded_to, schema);
        (false, original_forwarded_to, forwarded_to, func_addr_raw)
    } else {
        let executable = mapper
            .section_index_for_rva(Rva(func_rva))
            .map(|idx| sections[idx].is_executable())
            .unwrap_or(false);
        (executable, String::new(), String::new(), func_addr_raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiset::EmptySchema;
    use crate::pe::sections::SectionCharacteristics;
    use crate::symbols::NullPublisher;

    fn mk_section(name: &str, va: u32, vsize: u32, raw: u32, rawsize: u32, exec: bool) -> Section {
        Section {
            raw_name: name.into(),
            display_name: name.into(),
            virtual_size: vsize,
            virtual_address: va,
            size_of_raw_data: rawsize,
            pointer_to_raw_data: raw,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: if exec {
                SectionCharacteristics::MEM_EXECUTE | SectionCharacteristics::CNT_CODE
            } else {
                SectionCharacteristics::CNT_INITIALIZED_DATA
            },
        }
    }

    /// Builds a minimal ordinal-only export directory: 3 functions, 0 names,
    /// base = 1, matching spec §8 concrete scenario 3.
    #[test]
    fn ordinal_only_exports_have_empty_names() {
        let edata_va = 0x2000u32;
        let edata_raw = 0x400u32;
        let funcs_rva = edata_va + 40; // right after the fixed-size header
        let funcs_raw = edata_raw + 40;

        let mut file = vec![0u8; 0x2000];
        // header at edata_raw
        file[edata_raw as usize + 16..edata_raw as usize + 20].copy_from_slice(&1u32.to_le_bytes()); // Base
        file[edata_raw as usize + 20..edata_raw as usize + 24].copy_from_slice(&3u32.to_le_bytes()); // NumberOfFunctions
        file[edata_raw as usize + 24..edata_raw as usize + 28].copy_from_slice(&0u32.to_le_bytes()); // NumberOfNames
        file[edata_raw as usize + 28..edata_raw as usize + 32].copy_from_slice(&funcs_rva.to_le_bytes());
        // three function RVAs pointing into the (fake) code section
        for (i, code_rva) in [0x5010u32, 0x5020, 0x5030].iter().enumerate() {
            let off = funcs_raw as usize + i * 4;
            file[off..off + 4].copy_from_slice(&code_rva.to_le_bytes());
        }

        let sections = vec![
            mk_section(".edata", edata_va, 0x100, edata_raw, 0x100, false),
            mk_section(".text", 0x5000, 0x100, 0x1000, 0x100, true),
        ];
        let mapper = AddressMapper::new(Va(0x1000_0000), 0x200, 0x1000, 0x200, &sections);
        let anchor = DirectoryAnchor {
            va: Rva(edata_va).to_va(mapper.image_base()),
            size: 40,
        };

        let mut publisher = NullPublisher;
        let table = parse_exports(
            &file,
            &mapper,
            &sections,
            anchor,
            "mfperfhelper.dll",
            &EmptySchema,
            0,
            &mut publisher,
        )
        .unwrap();

        assert_eq!(table.entries.len(), 3);
        assert!(table.by_name.is_empty());
        assert_eq!(table.by_ordinal.len(), 3);
        for entry in &table.entries {
            assert!(entry.function_name.is_empty());
        }
        let mut ordinals: Vec<u32> = table.entries.iter().map(|e| e.ordinal).collect();
        ordinals.sort_unstable();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }
}
