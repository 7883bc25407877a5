//! `.gnu_debuglink` detection (spec §4.7, "Debug link"; spec §9 Open
//! Question: companion lookup stays a flat sibling-directory check, not the
//! gdb `.debug/` search-path algorithm).

use std::path::{Path, PathBuf};

use crate::pe::sections::Section;

const SECTION_NAME: &str = ".gnu_debuglink";

/// A `.gnu_debuglink` section holds a NUL-terminated filename followed by
/// padding and a CRC32; only the filename is useful here.
fn read_link_name(file: &[u8], section: &Section) -> Option<String> {
    let start = section.pointer_to_raw_data as usize;
    let end = start.checked_add(section.size_of_raw_data as usize)?;
    let bytes = file.get(start..end)?;
    let nul = bytes.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&bytes[..nul]).into_owned())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugLink {
    pub file_name: String,
    pub companion_path: PathBuf,
    pub companion_exists: bool,
}

/// Finds the `.gnu_debuglink` section, if any, and resolves its named
/// companion file relative to `image_dir` (the directory containing the
/// image being analyzed). Does not search any further directories.
pub fn resolve_debug_link(file: &[u8], sections: &[Section], image_dir: &Path) -> Option<DebugLink> {
    let section = sections.iter().find(|s| s.display_name.as_ref() == SECTION_NAME)?;
    let file_name = read_link_name(file, section)?;
    let companion_path = image_dir.join(&file_name);
    let companion_exists = companion_path.is_file();
    Some(DebugLink {
        file_name,
        companion_path,
        companion_exists,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::sections::SectionCharacteristics;

    fn mk_link_section(raw: u32, size: u32) -> Section {
        Section {
            raw_name: SECTION_NAME.into(),
            display_name: SECTION_NAME.into(),
            virtual_size: size,
            virtual_address: raw,
            size_of_raw_data: size,
            pointer_to_raw_data: raw,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: SectionCharacteristics::CNT_INITIALIZED_DATA,
        }
    }

    #[test]
    fn reads_name_and_flags_missing_companion() {
        let mut file = vec![0u8; 0x100];
        file[0..8].copy_from_slice(b"foo.pdb\0");
        let sections = vec![mk_link_section(0, 16)];
        let link = resolve_debug_link(&file, &sections, Path::new("/nonexistent/dir")).unwrap();
        assert_eq!(link.file_name, "foo.pdb");
        assert!(!link.companion_exists);
    }

    #[test]
    fn absent_section_yields_none() {
        let file = vec![0u8; 0x100];
        assert!(resolve_debug_link(&file, &[], Path::new(".")).is_none());
    }
}
