//! TLS callback-chain parsing (spec §4.7, "TLS"). Callbacks are folded into
//! the entry-point list under the name `"Tls Callback N"`.

use crate::addr::{Raw, Rva, Va};
use crate::pe::directories::DirectoryAnchor;
use crate::pe::entry::EntryPoint;
use crate::pe::mapper::AddressMapper;
use crate::pe::sections::Section;
use crate::pe::util::{read_u32_at, read_u64_at};
use crate::symbols::{SymbolKind, SymbolPublisher, SymbolRecord};

fn read_pointer(file: &[u8], raw: usize, is_64: bool) -> Option<u64> {
    if is_64 {
        read_u64_at(file, raw)
    } else {
        read_u32_at(file, raw).map(u64::from)
    }
}

pub fn parse_tls_callbacks(
    file: &[u8],
    mapper: &AddressMapper,
    sections: &[Section],
    anchor: DirectoryAnchor,
    is_64: bool,
    module_index: usize,
    publisher: &mut dyn SymbolPublisher,
) -> Vec<EntryPoint> {
    let mut out = Vec::new();
    if !anchor.is_present() {
        return out;
    }

    let dir_rva = mapper.va_to_rva(anchor.va).0;
    let dir_raw = mapper.rva_to_raw(Rva(dir_rva), sections);
    if !dir_raw.is_valid() {
        return out;
    }

    let ptr_size = if is_64 { 8 } else { 4 };
    // Skip StartAddressOfRawData, EndAddressOfRawData, AddressOfIndex.
    let callbacks_field_raw = dir_raw.0 as usize + ptr_size * 3;
    let callbacks_va = match read_pointer(file, callbacks_field_raw, is_64) {
        Some(v) if v != 0 => v,
        _ => return out,
    };

    let callbacks_rva = mapper.va_to_rva(Va(callbacks_va));
    let mut array_raw = mapper.rva_to_raw(callbacks_rva, sections);
    if !array_raw.is_valid() {
        return out;
    }

    let mut n = 0usize;
    loop {
        let callback_va = match read_pointer(file, array_raw.0 as usize, is_64) {
            Some(v) => v,
            None => break,
        };
        if callback_va == 0 {
            break;
        }

        let va = Va(callback_va);
        let raw_offset = mapper.va_to_raw(va, sections);
        let entry = EntryPoint {
            name: format!("Tls Callback {}", n),
            raw_offset,
            va,
        };

        publisher.add(SymbolRecord {
            va,
            kind: SymbolKind::TlsCallback,
            module_index,
            list_index: n,
            param: String::new(),
        });
        publisher.add(SymbolRecord {
            va,
            kind: SymbolKind::EntryPoint,
            module_index,
            list_index: n,
            param: entry.name.clone(),
        });

        out.push(entry);
        n += 1;
        array_raw = Raw(array_raw.0 + ptr_size as u64);
    }

    out
}
