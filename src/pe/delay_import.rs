//! Delay-import descriptor parsing (spec §4.5, "Delay imports").
//!
//! Must run *after* the Relocation Engine's apply pass: on 64-bit images the
//! pre-initialization IAT value this reads is only correct once relocations
//! have patched the embedded pointer tables.

use log::warn;

use crate::addr::{Rva, Va};
use crate::apiset::{resolve_library_name, ApiSetSchema};
use crate::pe::directories::DirectoryAnchor;
use crate::pe::import::ImportEntry;
use crate::pe::mapper::AddressMapper;
use crate::pe::sections::Section;
use crate::pe::util::{read_cstr_at, read_u16_at, read_u32_at, read_u64_at};
use crate::symbols::{SymbolKind, SymbolPublisher, SymbolRecord};

const DESCRIPTOR_SIZE: u32 = 32;

struct DelayDescriptor {
    attrs: u32,
    name_field: u32,
    module_field: u32,
    iat_field: u32,
    int_field: u32,
}

fn read_descriptor(file: &[u8], raw: usize) -> Option<DelayDescriptor> {
    Some(DelayDescriptor {
        attrs: read_u32_at(file, raw)?,
        name_field: read_u32_at(file, raw + 4)?,
        module_field: read_u32_at(file, raw + 8)?,
        iat_field: read_u32_at(file, raw + 12)?,
        int_field: read_u32_at(file, raw + 16)?,
    })
}

/// `grAttrs` bit 0: 1 means every field below is an RVA (the modern format).
/// 0 means every field is an absolute VA linked against the *preferred*
/// image base, and must have that preferred base subtracted back out.
fn get_rva(value: u32, attrs: u32, preferred_image_base: u64) -> u32 {
    if attrs & 1 != 0 {
        value
    } else {
        (value as u64).wrapping_sub(preferred_image_base) as u32
    }
}

#[allow(clippy::too_many_arguments)]
pub fn parse_delay_imports(
    file: &[u8],
    mapper: &AddressMapper,
    sections: &[Section],
    anchor: DirectoryAnchor,
    is_64: bool,
    preferred_image_base: u64,
    consumer_name: &str,
    schema: &dyn ApiSetSchema,
    module_index: usize,
    publisher: &mut dyn SymbolPublisher,
) -> Vec<ImportEntry> {
    let mut out = Vec::new();
    if !anchor.is_present() {
        return out;
    }

    let elem = if is_64 { 8 } else { 4 };
    let flag: u64 = if is_64 { 0x8000_0000_0000_0000 } else { 0x8000_0000 };

    let mut idx = 0u32;
    loop {
        let descriptor_rva = mapper.va_to_rva(anchor.va).0 + idx * DESCRIPTOR_SIZE;
        let descriptor_raw = mapper.rva_to_raw(Rva(descriptor_rva), sections);
        if !descriptor_raw.is_valid() {
            break;
        }
        let descriptor = match read_descriptor(file, descriptor_raw.0 as usize) {
            Some(d) => d,
            None => break,
        };
        if descriptor.iat_field == 0 {
            break;
        }

        let name_rva = get_rva(descriptor.name_field, descriptor.attrs, preferred_image_base);
        let name_raw = mapper.rva_to_raw(Rva(name_rva), sections);
        if !name_raw.is_valid() {
            warn!("delay-import descriptor {} has an unmapped library name", idx);
            idx += 1;
            continue;
        }
        let original_library_name = read_cstr_at(file, name_raw.0 as usize).unwrap_or_default();
        let library_name = resolve_library_name(consumer_name, &original_library_name, schema);

        let module_rva = get_rva(descriptor.module_field, descriptor.attrs, preferred_image_base);
        let delayed_module_instance_va = if descriptor.module_field == 0 {
            Va(0)
        } else {
            Rva(module_rva).to_va(mapper.image_base())
        };

        let iat_rva = get_rva(descriptor.iat_field, descriptor.attrs, preferred_image_base);
        let int_rva = get_rva(descriptor.int_field, descriptor.attrs, preferred_image_base);

        let mut slot = 0u32;
        loop {
            let iat_slot_raw = mapper.rva_to_raw(Rva(iat_rva + slot * elem), sections);
            if !iat_slot_raw.is_valid() {
                break;
            }
            let iat_value = if is_64 {
                read_u64_at(file, iat_slot_raw.0 as usize)
            } else {
                read_u32_at(file, iat_slot_raw.0 as usize).map(u64::from)
            };
            let iat_value = match iat_value {
                Some(v) => v,
                None => break,
            };

            let int_slot_raw = mapper.rva_to_raw(Rva(int_rva + slot * elem), sections);
            let int_value = if is_64 {
                read_u64_at(file, int_slot_raw.0 as usize)
            } else {
                read_u32_at(file, int_slot_raw.0 as usize).map(u64::from)
            };
            let int_value = match int_value {
                Some(v) => v,
                None => break,
            };
            if int_value == 0 {
                break;
            }

            let (function_name, ordinal) = if int_value & flag != 0 {
                (String::new(), (int_value & 0xffff) as u16)
            } else {
                let hint_name_rva = get_rva(int_value as u32, descriptor.attrs, preferred_image_base);
                let hint_raw = mapper.rva_to_raw(Rva(hint_name_rva), sections);
                let hint = read_u16_at(file, hint_raw.0 as usize).unwrap_or(0);
                let name = read_cstr_at(file, hint_raw.0 as usize + 2).unwrap_or_default();
                (name, hint)
            };

            let import_table_va = Rva(iat_rva + slot * elem).to_va(mapper.image_base());

            publisher.add(SymbolRecord {
                va: import_table_va,
                kind: SymbolKind::DelayedImportTable,
                module_index,
                list_index: out.len(),
                param: if is_64 { "x64".into() } else { "x86".into() },
            });
            publisher.add(SymbolRecord {
                va: Rva(int_rva + slot * elem).to_va(mapper.image_base()),
                kind: SymbolKind::DelayedImportNameTable,
                module_index,
                list_index: out.len(),
                param: if is_64 { "x64".into() } else { "x86".into() },
            });

            out.push(ImportEntry {
                delayed: true,
                original_library_name: original_library_name.clone(),
                library_name: library_name.clone(),
                function_name,
                ordinal,
                import_table_va,
                delayed_module_instance_va,
                delayed_iat_data: iat_value,
            });

            slot += 1;
        }

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

    fn mk_section(va: u32, size: u32, raw: u32) -> Section {
        Section {
            raw_name: ".didat".into(),
            display_name: ".didat".into(),
            virtual_size: size,
            virtual_address: va,
            size_of_raw_data: size,
            pointer_to_raw_data: raw,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: SectionCharacteristics::CNT_INITIALIZED_DATA,
        }
    }

    /// Old (`grAttrs == 0`) VA-based delay descriptor format: fields carry
    /// absolute VAs linked against the preferred base, per spec §8 scenario 5.
    #[test]
    fn old_format_descriptor_subtracts_preferred_base() {
        let preferred_base = 0x1000_0000u64;
        let section_va = 0x2000u32;
        let section_raw = 0x2000u32;

        let lib_name_va = preferred_base as u32 + section_va + 200;
        let iat_va = preferred_base as u32 + section_va + 300;
        let int_va = preferred_base as u32 + section_va + 400;

        let mut file = vec![0u8; 0x4000];
        let d = section_va as usize;
        file[d..d + 4].copy_from_slice(&0u32.to_le_bytes()); // grAttrs = 0 (old format)
        file[d + 4..d + 8].copy_from_slice(&lib_name_va.to_le_bytes());
        file[d + 8..d + 12].copy_from_slice(&0u32.to_le_bytes());
        file[d + 12..d + 16].copy_from_slice(&iat_va.to_le_bytes());
        file[d + 16..d + 20].copy_from_slice(&int_va.to_le_bytes());

        let lib_off = (section_va + 200) as usize;
        file[lib_off..lib_off + 6].copy_from_slice(b"foo.dl");
        file[lib_off + 6] = b'l';
        file[lib_off + 7] = 0;

        let iat_off = (section_va + 300) as usize;
        let int_off = (section_va + 400) as usize;
        // single ordinal-only thunk, then terminator
        file[int_off..int_off + 4].copy_from_slice(&(0x8000_0007u32).to_le_bytes());
        file[iat_off..iat_off + 4].copy_from_slice(&0x4141_4141u32.to_le_bytes());

        let sections = vec![mk_section(section_va, 0x1000, section_raw)];
        let mapper = AddressMapper::new(Va(0x5000_0000), 0x200, 0x1000, 0x200, &sections);
        let anchor = DirectoryAnchor {
            va: Rva(section_va).to_va(mapper.image_base()),
            size: 32,
        };

        let mut publisher = NullPublisher;
        let imports = parse_delay_imports(
            &file,
            &mapper,
            &sections,
            anchor,
            false,
            preferred_base,
            "app.exe",
            &EmptySchema,
            0,
            &mut publisher,
        );

        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].ordinal, 7);
        assert!(imports[0].delayed);
        assert_eq!(
            imports[0].import_table_va,
            Rva(section_va + 300).to_va(mapper.image_base())
        );
    }
}
