//! COM+ (CLR) header parsing (spec §4.7, "COM+"): only the IL-only flag is
//! surfaced, per spec — the full metadata tables are out of scope.

use crate::addr::Rva;
use crate::pe::directories::DirectoryAnchor;
use crate::pe::mapper::AddressMapper;
use crate::pe::sections::Section;
use crate::pe::util::read_u32_at;

const COMIMAGE_FLAGS_ILONLY: u32 = 0x0000_0001;
const COMIMAGE_FLAGS_32BITREQUIRED: u32 = 0x0000_0002;

/// Reads the `Flags` field of the 0x20-byte `IMAGE_COR20_HEADER` and reports
/// whether the image is managed IL-only (no native code is present).
pub fn parse_com_plus_il_only(
    file: &[u8],
    mapper: &AddressMapper,
    sections: &[Section],
    anchor: DirectoryAnchor,
) -> Option<bool> {
    if !anchor.is_present() {
        return None;
    }
    let dir_rva = mapper.va_to_rva(anchor.va).0;
    let dir_raw = mapper.rva_to_raw(Rva(dir_rva), sections);
    if !dir_raw.is_valid() {
        return None;
    }
    let flags = read_u32_at(file, dir_raw.0 as usize + 16)?;
    Some(flags & (COMIMAGE_FLAGS_ILONLY | COMIMAGE_FLAGS_32BITREQUIRED) != 0)
}
