//! Bound-import descriptor parsing (spec §4.5, "Bound imports").
//!
//! Bound imports are diagnostic-only here: the analyzer records which
//! modules were bound against and tags the VA layout, but does not attempt
//! to verify the bound addresses (that is the Relocation Engine's job when
//! the runtime base differs from what the binder assumed).

use crate::addr::Rva;
use crate::pe::directories::DirectoryAnchor;
use crate::pe::mapper::AddressMapper;
use crate::pe::sections::Section;
use crate::pe::util::{read_cstr_at, read_u16_at, read_u32_at};
use crate::symbols::{SymbolKind, SymbolPublisher, SymbolRecord};

#[derive(Debug, Clone, Default)]
pub struct BoundImportEntry {
    pub module_name: String,
    pub time_date_stamp: u32,
    pub forwarder_refs: Vec<String>,
}

const RECORD_SIZE: u32 = 8;

struct RawRecord {
    time_date_stamp: u32,
    offset_module_name: u16,
    count_or_reserved: u16,
}

fn read_record(file: &[u8], raw: usize) -> Option<RawRecord> {
    Some(RawRecord {
        time_date_stamp: read_u32_at(file, raw)?,
        offset_module_name: read_u16_at(file, raw + 4)?,
        count_or_reserved: read_u16_at(file, raw + 6)?,
    })
}

pub fn parse_bound_imports(
    file: &[u8],
    mapper: &AddressMapper,
    sections: &[Section],
    anchor: DirectoryAnchor,
    module_index: usize,
    publisher: &mut dyn SymbolPublisher,
) -> Vec<BoundImportEntry> {
    let mut out = Vec::new();
    if !anchor.is_present() {
        return out;
    }

    let dir_rva = mapper.va_to_rva(anchor.va).0;
    let dir_raw = mapper.rva_to_raw(Rva(dir_rva), sections);
    if !dir_raw.is_valid() {
        return out;
    }

    let read_name = |offset: u16| -> String {
        read_cstr_at(file, dir_raw.0 as usize + offset as usize).unwrap_or_default()
    };

    let mut idx = 0u32;
    loop {
        let rec_raw = dir_raw.0 + (idx * RECORD_SIZE) as u64;
        let record = match read_record(file, rec_raw as usize) {
            Some(r) => r,
            None => break,
        };
        if record.time_date_stamp == 0 && record.offset_module_name == 0 {
            break;
        }

        publisher.add(SymbolRecord {
            va: Rva(dir_rva + idx * RECORD_SIZE).to_va(mapper.image_base()),
            kind: SymbolKind::BoundImportDescriptor,
            module_index,
            list_index: out.len(),
            param: String::new(),
        });

        let mut entry = BoundImportEntry {
            module_name: read_name(record.offset_module_name),
            time_date_stamp: record.time_date_stamp,
            forwarder_refs: Vec::new(),
        };

        idx += 1;
        for _ in 0..record.count_or_reserved {
            let fwd_raw = dir_raw.0 + (idx * RECORD_SIZE) as u64;
            let fwd = match read_record(file, fwd_raw as usize) {
                Some(r) => r,
                None => break,
            };
            publisher.add(SymbolRecord {
                va: Rva(dir_rva + idx * RECORD_SIZE).to_va(mapper.image_base()),
                kind: SymbolKind::BoundImportForwardRef,
                module_index,
                list_index: out.len(),
                param: String::new(),
            });
            entry.forwarder_refs.push(read_name(fwd.offset_module_name));
            idx += 1;
        }

        out.push(entry);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Va;
    use crate::pe::sections::SectionCharacteristics;
    use crate::symbols::NullPublisher;

    #[test]
    fn walks_descriptor_and_its_forwarder_refs() {
        let dir_va = 0x1000u32;
        let mut file = vec![0u8; 0x2000];
        // descriptor: timestamp=1, name offset=16, 1 forwarder ref
        file[0..4].copy_from_slice(&1u32.to_le_bytes());
        file[4..6].copy_from_slice(&16u16.to_le_bytes());
        file[6..8].copy_from_slice(&1u16.to_le_bytes());
        // forwarder ref at record 1
        file[8..12].copy_from_slice(&1u32.to_le_bytes());
        file[12..14].copy_from_slice(&32u16.to_le_bytes());
        // names
        file[16..24].copy_from_slice(b"user32\0\0");
        file[32..39].copy_from_slice(b"ext-ms\0");

        let sections = vec![Section {
            raw_name: ".rdata".into(),
            display_name: ".rdata".into(),
            virtual_size: 0x1000,
            virtual_address: dir_va,
            size_of_raw_data: 0x1000,
            pointer_to_raw_data: 0,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: SectionCharacteristics::CNT_INITIALIZED_DATA,
        }];
        let mapper = AddressMapper::new(Va(0x1000_0000), 0x200, 0x1000, 0x200, &sections);
        let anchor = DirectoryAnchor {
            va: Rva(dir_va).to_va(mapper.image_base()),
            size: 16,
        };

        let mut publisher = NullPublisher;
        let bound = parse_bound_imports(&file, &mapper, &sections, anchor, 0, &mut publisher);
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].module_name, "user32");
        assert_eq!(bound[0].forwarder_refs, vec!["ext-ms".to_string()]);
    }
}
