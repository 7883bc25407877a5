//! Standard import descriptor parsing (spec §4.5, "Standard imports").

use log::warn;

use crate::addr::{Rva, Va};
use crate::apiset::{resolve_library_name, ApiSetSchema};
use crate::pe::directories::DirectoryAnchor;
use crate::pe::mapper::AddressMapper;
use crate::pe::sections::Section;
use crate::pe::util::{read_cstr_at, read_u16_at, read_u32_at, read_u64_at};
use crate::symbols::{SymbolKind, SymbolPublisher, SymbolRecord};

#[derive(Debug, Clone, Default)]
pub struct ImportEntry {
    pub delayed: bool,
    pub original_library_name: String,
    /// Post-API-set-resolution target.
    pub library_name: String,
    /// Empty when the import is ordinal-only.
    pub function_name: String,
    pub ordinal: u16,
    /// The slot the loader will write the resolved address into.
    pub import_table_va: Va,
    /// Only meaningful when `delayed` is true.
    pub delayed_module_instance_va: Va,
    pub delayed_iat_data: u64,
}

impl ImportEntry {
    pub fn is_ordinal_only(&self) -> bool {
        self.function_name.is_empty()
    }
}

const ORDINAL_FLAG_32: u64 = 0x8000_0000;
const ORDINAL_FLAG_64: u64 = 0x8000_0000_0000_0000;

fn ordinal_flag(is_64: bool) -> u64 {
    if is_64 {
        ORDINAL_FLAG_64
    } else {
        ORDINAL_FLAG_32
    }
}

fn thunk_size(is_64: bool) -> u32 {
    if is_64 {
        8
    } else {
        4
    }
}

fn read_thunk(file: &[u8], raw: usize, is_64: bool) -> Option<u64> {
    if is_64 {
        read_u64_at(file, raw)
    } else {
        read_u32_at(file, raw).map(u64::from)
    }
}

struct ImportDescriptor {
    original_first_thunk: u32,
    name: u32,
    first_thunk: u32,
}

fn read_descriptor(file: &[u8], raw: usize) -> Option<ImportDescriptor> {
    Some(ImportDescriptor {
        original_first_thunk: read_u32_at(file, raw)?,
        name: read_u32_at(file, raw + 12)?,
        first_thunk: read_u32_at(file, raw + 16)?,
    })
}

fn is_terminator(file: &[u8], raw: usize) -> bool {
    (0..20)
        .filter_map(|off| file.get(raw + off))
        .all(|&b| b == 0)
}

/// Walks the thunk array at `thunk_rva` (either the INT or, for bound
/// images, the IAT) emitting one [`ImportEntry`] per non-zero slot.
#[allow(clippy::too_many_arguments)]
fn walk_thunks(
    file: &[u8],
    mapper: &AddressMapper,
    sections: &[Section],
    thunk_rva: u32,
    iat_rva: u32,
    is_64: bool,
    library_name: &str,
    original_library_name: &str,
    module_index: usize,
    publisher: &mut dyn SymbolPublisher,
) -> Vec<ImportEntry> {
    let mut entries = Vec::new();
    let elem = thunk_size(is_64);
    let flag = ordinal_flag(is_64);
    let mut idx: u32 = 0;
    loop {
        let thunk_raw = mapper.rva_to_raw(Rva(thunk_rva + idx * elem), sections);
        if !thunk_raw.is_valid() {
            break;
        }
        let value = match read_thunk(file, thunk_raw.0 as usize, is_64) {
            Some(v) => v,
            None => break,
        };
        if value == 0 {
            break;
        }

        let (function_name, ordinal) = if value & flag != 0 {
            (String::new(), (value & 0xffff) as u16)
        } else {
            let hint_name_rva = (value & 0xffff_ffff) as u32;
            let hint_raw = mapper.rva_to_raw(Rva(hint_name_rva), sections);
            let hint = read_u16_at(file, hint_raw.0 as usize).unwrap_or(0);
            let name = read_cstr_at(file, hint_raw.0 as usize + 2).unwrap_or_default();
            (name, hint)
        };

        let iat_slot_rva = Rva(iat_rva + idx * elem);
        let import_table_va = iat_slot_rva.to_va(mapper.image_base());

        publisher.add(SymbolRecord {
            va: import_table_va,
            kind: SymbolKind::ImportTable,
            module_index,
            list_index: entries.len(),
            param: if is_64 { "x64".into() } else { "x86".into() },
        });
        if thunk_rva != iat_rva {
            publisher.add(SymbolRecord {
                va: Rva(thunk_rva + idx * elem).to_va(mapper.image_base()),
                kind: SymbolKind::ImportNameTable,
                module_index,
                list_index: entries.len(),
                param: if is_64 { "x64".into() } else { "x86".into() },
            });
        }

        entries.push(ImportEntry {
            delayed: false,
            original_library_name: original_library_name.to_string(),
            library_name: library_name.to_string(),
            function_name,
            ordinal,
            import_table_va,
            delayed_module_instance_va: Va(0),
            delayed_iat_data: 0,
        });

        idx += 1;
    }
    entries
}

#[allow(clippy::too_many_arguments)]
pub fn parse_imports(
    file: &[u8],
    mapper: &AddressMapper,
    sections: &[Section],
    anchor: DirectoryAnchor,
    is_64: bool,
    consumer_name: &str,
    schema: &dyn ApiSetSchema,
    module_index: usize,
    publisher: &mut dyn SymbolPublisher,
) -> Vec<ImportEntry> {
    let mut out = Vec::new();
    if !anchor.is_present() {
        return out;
    }

    const DESCRIPTOR_SIZE: u32 = 20;
    let mut idx = 0u32;
    loop {
        let descriptor_rva = mapper.va_to_rva(anchor.va).0 + idx * DESCRIPTOR_SIZE;
        let descriptor_raw = mapper.rva_to_raw(Rva(descriptor_rva), sections);
        if !descriptor_raw.is_valid() || is_terminator(file, descriptor_raw.0 as usize) {
            break;
        }
        let descriptor = match read_descriptor(file, descriptor_raw.0 as usize) {
            Some(d) => d,
            None => break,
        };

        publisher.add(SymbolRecord {
            va: Rva(descriptor_rva).to_va(mapper.image_base()),
            kind: SymbolKind::ImportDescriptor,
            module_index,
            list_index: idx as usize,
            param: String::new(),
        });

        let name_raw = mapper.rva_to_raw(Rva(descriptor.name), sections);
        if !name_raw.is_valid() {
            warn!("import descriptor {} has an unmapped library name RVA", idx);
            idx += 1;
            continue;
        }
        let original_library_name = read_cstr_at(file, name_raw.0 as usize).unwrap_or_default();
        let library_name = resolve_library_name(consumer_name, &original_library_name, schema);

        // 64-bit images may carry bound (real runtime) VAs in the IAT on
        // disk; those must never be used for name reads, so the INT is
        // preferred and the IAT is only a fallback for unbound 32-bit images.
        let thunk_rva = if descriptor.original_first_thunk != 0 {
            descriptor.original_first_thunk
        } else {
            descriptor.first_thunk
        };

        let mut entries = walk_thunks(
            file,
            mapper,
            sections,
            thunk_rva,
            descriptor.first_thunk,
            is_64,
            &library_name,
            &original_library_name,
            module_index,
            publisher,
        );
        out.append(&mut entries);

        idx += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiset::EmptySchema;
    use crate::pe::sections::SectionCharacteristics;
    use crate::symbols::NullPublisher;

    fn mk_section(va: u32, vsize: u32, raw: u32, rawsize: u32) -> Section {
        Section {
            raw_name: ".idata".into(),
            display_name: ".idata".into(),
            virtual_size: vsize,
            virtual_address: va,
            size_of_raw_data: rawsize,
            pointer_to_raw_data: raw,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: SectionCharacteristics::CNT_INITIALIZED_DATA,
        }
    }

    #[test]
    fn parses_single_named_import_32_bit() {
        // layout inside one section, all RVA == RAW for simplicity.
        let base_va = 0x2000u32;
        let lib_name_rva = base_va + 100;
        let int_rva = base_va + 200; // OriginalFirstThunk array
        let iat_rva = base_va + 300; // FirstThunk array
        let hint_name_rva = base_va + 400;

        let mut file = vec![0u8; 0x4000];
        // descriptor 0
        file[base_va as usize..base_va as usize + 4].copy_from_slice(&int_rva.to_le_bytes());
        file[base_va as usize + 12..base_va as usize + 16].copy_from_slice(&lib_name_rva.to_le_bytes());
        file[base_va as usize + 16..base_va as usize + 20].copy_from_slice(&iat_rva.to_le_bytes());
        // descriptor 1 (terminator) is already all-zero.

        file[lib_name_rva as usize..lib_name_rva as usize + 9].copy_from_slice(b"kernel32\0");
        file[int_rva as usize..int_rva as usize + 4].copy_from_slice(&hint_name_rva.to_le_bytes());
        file[iat_rva as usize..iat_rva as usize + 4].copy_from_slice(&hint_name_rva.to_le_bytes());
        file[hint_name_rva as usize..hint_name_rva as usize + 2].copy_from_slice(&0u16.to_le_bytes());
        file[hint_name_rva as usize + 2..hint_name_rva as usize + 16]
            .copy_from_slice(b"GetProcAddr\0\0\0");

        let sections = vec![mk_section(base_va, 0x1000, base_va, 0x1000)];
        let mapper = AddressMapper::new(Va(0x1000_0000), 0x200, 0x1000, 0x200, &sections);
        let anchor = DirectoryAnchor {
            va: Rva(base_va).to_va(mapper.image_base()),
            size: 20,
        };

        let mut publisher = NullPublisher;
        let imports = parse_imports(
            &file,
            &mapper,
            &sections,
            anchor,
            false,
            "app.exe",
            &EmptySchema,
            0,
            &mut publisher,
        );

        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].library_name, "kernel32");
        assert_eq!(imports[0].function_name, "GetProcAddr");
        assert!(!imports[0].is_ordinal_only());
    }
}
