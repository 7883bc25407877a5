//! The Address Mapper: pure arithmetic over parsed section headers,
//! converting among RAW, RVA, and VA (spec §4.1). This is the only component
//! allowed to cross between the three coordinate systems.

use crate::addr::{Raw, Rva, Va};
use crate::pe::sections::Section;

fn align_down(value: u32, align: u32) -> u32 {
    if align == 0 {
        value
    } else {
        value - (value % align)
    }
}

fn align_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        value
    } else {
        let rem = value % align;
        if rem == 0 {
            value
        } else {
            value + (align - rem)
        }
    }
}

/// A section's effective RVA span, per spec §4.1: start possibly down-aligned
/// to `SectionAlignment` (only when that alignment is at least one page),
/// size the lesser of the file-aligned raw size and the section-aligned
/// virtual size (substituting `SizeOfRawData` when `VirtualSize` is zero).
fn section_span(section: &Section, section_alignment: u32, file_alignment: u32) -> (u32, u32) {
    let start = if section_alignment >= 0x1000 {
        align_down(section.virtual_address, section_alignment)
    } else {
        section.virtual_address
    };
    let effective_virtual_size = if section.virtual_size == 0 {
        section.size_of_raw_data
    } else {
        section.virtual_size
    };
    let size = align_up(section.size_of_raw_data, file_alignment)
        .min(align_up(effective_virtual_size, section_alignment));
    (start, size)
}

#[derive(Debug, Clone)]
pub struct AddressMapper {
    image_base: Va,
    size_of_headers: u32,
    section_alignment: u32,
    file_alignment: u32,
    /// `(span_start_rva, span_size, index into the caller's section list)`,
    /// kept in declaration order so overlapping (malformed) sections resolve
    /// to the first one hit, per spec.
    spans: Vec<(u32, u32, usize)>,
}

impl AddressMapper {
    pub fn new(
        image_base: Va,
        size_of_headers: u32,
        section_alignment: u32,
        file_alignment: u32,
        sections: &[Section],
    ) -> Self {
        let spans = sections
            .iter()
            .enumerate()
            .map(|(idx, sec)| {
                let (start, size) = section_span(sec, section_alignment, file_alignment);
                (start, size, idx)
            })
            .collect();
        Self {
            image_base,
            size_of_headers,
            section_alignment,
            file_alignment,
            spans,
        }
    }

    pub fn image_base(&self) -> Va {
        self.image_base
    }

    fn section_span_containing(&self, rva: u32) -> Option<(u32, u32, usize)> {
        self.spans
            .iter()
            .copied()
            .find(|&(start, size, _)| rva >= start && rva < start.saturating_add(size))
    }

    /// Index of the section (if any) whose virtual span contains `rva`.
    pub fn section_index_for_rva(&self, rva: Rva) -> Option<usize> {
        self.section_span_containing(rva.0).map(|(_, _, idx)| idx)
    }

    /// `rva_to_raw`: zero-section images are a single flat span (RAW == RVA).
    /// RVAs below `SizeOfHeaders` map one-to-one. Otherwise the containing
    /// mapped section (non-zero `PointerToRawData`/`SizeOfRawData`) supplies
    /// the translation; a sentinel zero means "invalid".
    pub fn rva_to_raw(&self, rva: Rva, sections: &[Section]) -> Raw {
        if sections.is_empty() {
            return Raw(rva.0 as u64);
        }
        if rva.0 < self.size_of_headers {
            return Raw(rva.0 as u64);
        }
        match self.section_span_containing(rva.0) {
            Some((start, _, idx)) => {
                let sec = &sections[idx];
                if !sec.is_mapped() {
                    return Raw::INVALID;
                }
                Raw((sec.pointer_to_raw_data + (rva.0 - start)) as u64)
            }
            None => Raw::INVALID,
        }
    }

    pub fn rva_to_va(&self, rva: Rva) -> Va {
        rva.to_va(self.image_base)
    }

    pub fn va_to_rva(&self, va: Va) -> Rva {
        va.sub_base(self.image_base)
    }

    pub fn raw_to_va(&self, raw: Raw, sections: &[Section]) -> Va {
        if sections.is_empty() {
            return self.rva_to_va(Rva(raw.0 as u32));
        }
        if raw.0 < self.size_of_headers as u64 {
            return self.rva_to_va(Rva(raw.0 as u32));
        }
        for (idx, sec) in sections.iter().enumerate() {
            if !sec.is_mapped() {
                continue;
            }
            let raw_start = sec.pointer_to_raw_data as u64;
            let raw_end = raw_start + sec.size_of_raw_data as u64;
            if raw.0 >= raw_start && raw.0 < raw_end {
                let (span_start, _, _) = self.spans[idx];
                let rva = span_start + (raw.0 - raw_start) as u32;
                return self.rva_to_va(Rva(rva));
            }
        }
        Va(0)
    }

    pub fn va_to_raw(&self, va: Va, sections: &[Section]) -> Raw {
        self.rva_to_raw(self.va_to_rva(va), sections)
    }

    /// Clips `size` so that `va + size` stops at the boundary of the section
    /// containing `va`; leaves `size` untouched if `va` maps to no section.
    pub fn fix_addr_size(&self, va: Va, size: u64) -> u64 {
        let rva = self.va_to_rva(va);
        match self.section_span_containing(rva.0) {
            Some((start, span_size, _)) => {
                let end = start as u64 + span_size as u64;
                let remaining = end.saturating_sub(rva.0 as u64);
                size.min(remaining)
            }
            None => size,
        }
    }

    pub fn section_alignment(&self) -> u32 {
        self.section_alignment
    }

    pub fn file_alignment(&self) -> u32 {
        self.file_alignment
    }
}
