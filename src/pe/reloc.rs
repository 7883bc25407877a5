//! The Relocation Engine (spec §4.6): parses `.reloc` blocks into a flat list
//! of RAW offsets, then optionally patches the in-memory image copy with the
//! runtime-vs-preferred base delta.

use log::warn;

use crate::addr::Raw;
use crate::pe::directories::DirectoryAnchor;
use crate::pe::mapper::AddressMapper;
use crate::pe::sections::Section;
use crate::pe::util::{read_u16_at, read_u32_at, read_u64_at};
use crate::symbols::{SymbolKind, SymbolPublisher, SymbolRecord};

const TYPE_ABSOLUTE: u8 = 0;
const TYPE_HIGHLOW: u8 = 3;
const TYPE_DIR64: u8 = 10;

/// One `.reloc` block header: `{page_va, first_raw_offset_index, count}`,
/// indexing into the flat `raw_offsets` list. `ABSOLUTE` entries are kept as
/// `None` holes inside the block's span rather than terminating it early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationBlock {
    pub page_rva: u32,
    pub first_raw_offset_index: usize,
    pub count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RelocationData {
    pub blocks: Vec<RelocationBlock>,
    /// Flat list of patch targets; `None` marks an `ABSOLUTE` padding hole.
    pub raw_offsets: Vec<Option<Raw>>,
    /// `runtime_image_base - preferred_image_base`, truncated to 32 bits for
    /// PE32. Zero means relocation application is a no-op.
    pub delta: i64,
}

impl RelocationData {
    /// Number of non-hole entries actually patched (or patchable).
    pub fn patched_count(&self) -> usize {
        self.raw_offsets.iter().filter(|o| o.is_some()).count()
    }
}

pub fn parse_relocations(
    file: &[u8],
    mapper: &AddressMapper,
    sections: &[Section],
    anchor: DirectoryAnchor,
    delta: i64,
    module_index: usize,
    publisher: &mut dyn SymbolPublisher,
) -> RelocationData {
    let mut data = RelocationData {
        delta,
        ..Default::default()
    };
    if !anchor.is_present() {
        return data;
    }

    let dir_rva = mapper.va_to_rva(anchor.va).0;
    let dir_end = dir_rva.saturating_add(anchor.size);
    let mut cursor = dir_rva;

    while cursor < dir_end {
        let block_raw = mapper.rva_to_raw(crate::addr::Rva(cursor), sections);
        if !block_raw.is_valid() {
            break;
        }
        let page_rva = match read_u32_at(file, block_raw.0 as usize) {
            Some(v) => v,
            None => break,
        };
        let block_size = match read_u32_at(file, block_raw.0 as usize + 4) {
            Some(v) if v >= 8 => v,
            _ => break,
        };

        let entry_count = (block_size - 8) / 2;
        let first_index = data.raw_offsets.len();
        let mut emitted = 0usize;

        for e in 0..entry_count {
            let entry_raw = block_raw.0 as usize + 8 + (e * 2) as usize;
            let entry = match read_u16_at(file, entry_raw) {
                Some(v) => v,
                None => break,
            };
            let ty = (entry >> 12) as u8;
            let page_offset = entry & 0x0fff;

            match ty {
                TYPE_ABSOLUTE => {
                    data.raw_offsets.push(None);
                    emitted += 1;
                }
                TYPE_HIGHLOW | TYPE_DIR64 => {
                    let target_rva = page_rva + page_offset as u32;
                    let raw = mapper.rva_to_raw(crate::addr::Rva(target_rva), sections);
                    data.raw_offsets.push(if raw.is_valid() { Some(raw) } else { None });
                    emitted += 1;
                }
                other => {
                    warn!(
                        "unknown relocation type {} in block at RVA {:#x}, abandoning rest of block",
                        other, page_rva
                    );
                    break;
                }
            }
        }

        publisher.add(SymbolRecord {
            va: mapper.rva_to_va(crate::addr::Rva(page_rva)),
            kind: SymbolKind::RelocationBlock,
            module_index,
            list_index: data.blocks.len(),
            param: String::new(),
        });

        data.blocks.push(RelocationBlock {
            page_rva,
            first_raw_offset_index: first_index,
            count: emitted,
        });

        cursor += block_size;
    }

    data
}

/// Patches every non-hole RAW offset in `data` by `data.delta`, mutating
/// `file` in place. A zero delta is a no-op. Applying twice with the same
/// nonzero delta is *not* idempotent — it doubles the patch, by design
/// (spec §8, relocation idempotence).
pub fn apply_relocations(file: &mut [u8], data: &RelocationData, is_64: bool) {
    if data.delta == 0 {
        return;
    }
    for raw in data.raw_offsets.iter().flatten() {
        let offset = raw.0 as usize;
        if is_64 {
            if let Some(value) = read_u64_at(file, offset) {
                let patched = (value as i64).wrapping_add(data.delta) as u64;
                file[offset..offset + 8].copy_from_slice(&patched.to_le_bytes());
            }
        } else if let Some(value) = read_u32_at(file, offset) {
            let patched = (value as i64).wrapping_add(data.delta) as u32;
            file[offset..offset + 4].copy_from_slice(&patched.to_le_bytes());
        }
    }
}
