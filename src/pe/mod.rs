//! The PE analyzer proper: [`ParsedImage`] orchestrates every component in
//! the pack over a single in-memory copy of the file (spec §2, §3).

pub mod bound_import;
pub mod comimage;
pub mod debuglink;
pub mod delay_import;
pub mod directories;
pub mod entry;
pub mod export;
pub mod header;
pub mod import;
pub mod mapper;
pub mod reloc;
pub mod sections;
pub mod strings;
pub mod tls;
#[macro_use]
pub mod util;

use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::addr::{Raw, Rva, Va};
use crate::apiset::ApiSetSchema;
use crate::config::AnalyzerConfig;
use crate::error::{AnalyzerError, Result};
use crate::symbols::SymbolPublisher;

use bound_import::{parse_bound_imports, BoundImportEntry};
use comimage::parse_com_plus_il_only;
use debuglink::{resolve_debug_link, DebugLink};
use delay_import::parse_delay_imports;
use directories::DirectorySet;
use entry::EntryPoint;
use export::{parse_exports, ExportTable};
use header::{DirectoryIndex, NtHeaders};
use import::{parse_imports, ImportEntry};
use mapper::AddressMapper;
use reloc::{apply_relocations, parse_relocations, RelocationData};
use sections::Section;
use strings::{scan_strings, FoundString};

/// A fully parsed PE/COFF image: every component's output, owned together so
/// the Relocation Engine can patch one shared byte buffer in place.
#[derive(Debug, Clone)]
pub struct ParsedImage {
    pub image_path: Option<PathBuf>,
    pub image_name: String,
    /// The name recorded in the export directory, if present; falls back to
    /// `image_name` for images with no exports.
    pub original_name: String,
    pub is_64: bool,
    pub preferred_image_base: Va,
    /// The base this image is considered loaded at for this analysis run;
    /// equal to `preferred_image_base` unless a runtime base was supplied.
    pub image_base: Va,
    pub rebased: bool,
    /// Set when this image was reached through an API-set redirection
    /// rather than its on-disk name directly (spec §3, §6).
    pub redirected: bool,
    pub virtual_size: u32,
    pub size_of_file_image: u64,
    pub nt_headers: NtHeaders,
    pub sections: Vec<Section>,
    pub directories: DirectorySet,
    pub exports: Option<ExportTable>,
    pub imports: Vec<ImportEntry>,
    pub delay_imports: Vec<ImportEntry>,
    pub bound_imports: Vec<BoundImportEntry>,
    /// The image entry point (index 0, when `AddressOfEntryPoint != 0`)
    /// followed by one record per TLS callback, per spec §4.7.
    pub entry_points: Vec<EntryPoint>,
    pub relocations: RelocationData,
    pub strings: Vec<FoundString>,
    pub com_plus_il_only: Option<bool>,
    pub debug_link: Option<DebugLink>,
    /// Which debug-info flavors the external COFF/DWARF subparsers found
    /// (spec §4.7, §4.10); empty when no [`crate::gate::DebugInfoParser`]
    /// was wired in or none found anything.
    pub debug_data: crate::gate::DebugFlavorSet,
    /// The `.gnu_debuglink` companion image, sections-only parsed, when the
    /// link was present and its target file was found next to this image
    /// (spec §3, §9: the companion debug image is owned here; the
    /// [`crate::gate::DebugGate`] used while parsing it only ever borrows
    /// this field).
    pub debug_companion: Option<crate::gate::CompanionImage>,
    pub module_index: usize,
    /// Indices, into the owning [`crate::registry::ModuleRegistry`], of other
    /// images sharing this one's name and bitness but loaded at a different
    /// base (spec §5, "relocated alternates").
    pub relocated_alternates: Vec<usize>,
    /// The file bytes, patched in place by the Relocation Engine when a
    /// nonzero runtime/preferred delta was supplied.
    file: Vec<u8>,
    mapper: AddressMapper,
}

impl ParsedImage {
    /// Raw on-disk bytes as they stand after any relocation patching.
    pub fn file_bytes(&self) -> &[u8] {
        &self.file
    }

    /// Marks this image as reached through API-set redirection, matching the
    /// `ModuleData.is_redirected` input of the alternative constructor (spec
    /// §6). Builder-style so ordinary construction stays unaffected.
    pub fn with_redirected(mut self, redirected: bool) -> Self {
        self.redirected = redirected;
        self
    }

    // -- Address Mapper accessors (spec §6) --------------------------------

    pub fn rva_to_raw(&self, rva: Rva) -> Raw {
        self.mapper.rva_to_raw(rva, &self.sections)
    }

    pub fn rva_to_va(&self, rva: Rva) -> Va {
        self.mapper.rva_to_va(rva)
    }

    pub fn va_to_rva(&self, va: Va) -> Rva {
        self.mapper.va_to_rva(va)
    }

    pub fn va_to_raw(&self, va: Va) -> Raw {
        self.mapper.va_to_raw(va, &self.sections)
    }

    pub fn raw_to_va(&self, raw: Raw) -> Va {
        self.mapper.raw_to_va(raw, &self.sections)
    }

    pub fn fix_addr_size(&self, va: Va, size: u64) -> u64 {
        self.mapper.fix_addr_size(va, size)
    }

    /// The directory owning `rva`, per the highest-index-wins rule (spec §4.3).
    pub fn directory_index_from_rva(&self, rva: Rva) -> Option<usize> {
        self.directories.directory_index_from_rva(rva, &self.mapper)
    }

    // -- Section lookup (spec §6) -------------------------------------------

    pub fn section_at_index(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    pub fn section_at_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.display_name == name)
    }

    pub fn section_containing_va(&self, va: Va) -> Option<&Section> {
        let idx = self.mapper.section_index_for_rva(self.va_to_rva(va))?;
        self.sections.get(idx)
    }

    // -- Export lookup (spec §6) ---------------------------------------------

    /// Looks up an export by name, returning its index into `exports.entries`.
    pub fn export_index_by_name(&self, name: &str) -> Option<usize> {
        self.exports.as_ref()?.by_name.get(name).copied()
    }

    /// Looks up an export by absolute ordinal, returning its index into
    /// `exports.entries`.
    pub fn export_index_by_ordinal(&self, ordinal: u32) -> Option<usize> {
        self.exports.as_ref()?.by_ordinal.get(&ordinal).copied()
    }

    /// Reads and parses an image straight off disk. `image_name` is taken
    /// from the file name.
    #[allow(clippy::too_many_arguments)]
    pub fn from_path(
        path: &Path,
        runtime_image_base: Option<Va>,
        config: &AnalyzerConfig,
        schema: &dyn ApiSetSchema,
        module_index: usize,
        publisher: &mut dyn SymbolPublisher,
        debug_parser: &dyn crate::gate::DebugInfoParser,
    ) -> Result<Self> {
        let file = std::fs::read(path)?;
        let image_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_bytes(
            file,
            image_name,
            Some(path.to_path_buf()),
            runtime_image_base,
            config,
            schema,
            module_index,
            publisher,
            debug_parser,
        )
    }

    /// Parses only the DOS/NT headers and section table, skipping every
    /// directory-driven component. Used when only the [`crate::gate::ImageGate`]
    /// surface is needed (e.g. handing the image off to an external COFF/DWARF
    /// debug-info parser) without the cost of the full pipeline.
    pub fn load_sections_only(file: &[u8]) -> Result<(NtHeaders, Vec<Section>)> {
        let nt_headers = parse_nt_headers(file)?;
        let mut sections = parse_section_table(file, &nt_headers)?;
        for section in &mut sections {
            section.fixup_long_name(
                file,
                nt_headers.file_header.pointer_to_symbol_table,
                nt_headers.file_header.number_of_symbols,
            );
        }
        Ok((nt_headers, sections))
    }

    /// The full pipeline (spec §2): Header Loader, Sections, Address Mapper,
    /// Directory Locator, Export, Import, Relocations (parsed and applied),
    /// Delay Import, Bound Import, TLS, Strings, Entry, COM+.
    #[allow(clippy::too_many_arguments)]
    pub fn from_bytes(
        mut file: Vec<u8>,
        image_name: String,
        image_path: Option<PathBuf>,
        runtime_image_base: Option<Va>,
        config: &AnalyzerConfig,
        schema: &dyn ApiSetSchema,
        module_index: usize,
        publisher: &mut dyn SymbolPublisher,
        debug_parser: &dyn crate::gate::DebugInfoParser,
    ) -> Result<Self> {
        let size_of_file_image = file.len() as u64;
        let nt_headers = parse_nt_headers(&file)?;
        let is_64 = nt_headers.optional_header.is_64;
        let preferred_image_base = Va(nt_headers.optional_header.image_base);
        let image_base = runtime_image_base.unwrap_or(preferred_image_base);
        let rebased = image_base != preferred_image_base;

        let mut sections = parse_section_table(&file, &nt_headers)?;
        for section in &mut sections {
            section.fixup_long_name(
                &file,
                nt_headers.file_header.pointer_to_symbol_table,
                nt_headers.file_header.number_of_symbols,
            );
        }

        let mapper = AddressMapper::new(
            image_base,
            nt_headers.optional_header.size_of_headers,
            nt_headers.optional_header.section_alignment,
            nt_headers.optional_header.file_alignment,
            &sections,
        );

        let directories = DirectorySet::build(&nt_headers.optional_header.data_directories, &mapper);
        let bitness_tag = if is_64 { "x64" } else { "x86" };
        directories.publish(&mapper, module_index, bitness_tag, publisher);

        let exports = parse_exports(
            &file,
            &mapper,
            &sections,
            directories.get(DirectoryIndex::Export),
            &image_name,
            schema,
            module_index,
            publisher,
        );
        let original_name = exports
            .as_ref()
            .map(|t| t.original_name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| image_name.clone());

        let imports = parse_imports(
            &file,
            &mapper,
            &sections,
            directories.get(DirectoryIndex::Import),
            is_64,
            &image_name,
            schema,
            module_index,
            publisher,
        );

        // Relocations must be parsed and applied before delay imports are
        // read, since the delay-import IAT may carry pre-init pointer data
        // that relocation patching rewrites in place.
        let delta = (image_base.0 as i64).wrapping_sub(preferred_image_base.0 as i64);
        let mut relocations = parse_relocations(
            &file,
            &mapper,
            &sections,
            directories.get(DirectoryIndex::BaseRelocation),
            delta,
            module_index,
            publisher,
        );
        apply_relocations(&mut file, &relocations, is_64);
        relocations.delta = delta;

        let delay_imports = parse_delay_imports(
            &file,
            &mapper,
            &sections,
            directories.get(DirectoryIndex::DelayImportDescriptor),
            is_64,
            preferred_image_base.0,
            &image_name,
            schema,
            module_index,
            publisher,
        );

        let bound_imports = parse_bound_imports(
            &file,
            &mapper,
            &sections,
            directories.get(DirectoryIndex::BoundImport),
            module_index,
            publisher,
        );

        let mut entry_points = Vec::new();
        if nt_headers.optional_header.address_of_entry_point != 0 {
            let entry_rva = crate::addr::Rva(nt_headers.optional_header.address_of_entry_point);
            let va = mapper.rva_to_va(entry_rva);
            entry_points.push(EntryPoint {
                name: "EntryPoint".to_string(),
                raw_offset: mapper.rva_to_raw(entry_rva, &sections),
                va,
            });
        }
        let mut tls_callbacks = tls::parse_tls_callbacks(
            &file,
            &mapper,
            &sections,
            directories.get(DirectoryIndex::Tls),
            is_64,
            module_index,
            publisher,
        );
        entry_points.append(&mut tls_callbacks);

        let strings = scan_strings(&file, config, &mapper, &sections, module_index, publisher);

        let com_plus_il_only = parse_com_plus_il_only(
            &file,
            &mapper,
            &sections,
            directories.get(DirectoryIndex::ComDescriptor),
        );

        let debug_link = image_path
            .as_ref()
            .and_then(|p| p.parent())
            .and_then(|dir| resolve_debug_link(&file, &sections, dir));

        let local_gate = PreConstructionGate {
            is_64,
            number_of_symbols: nt_headers.file_header.number_of_symbols,
            pointer_to_symbol_table: nt_headers.file_header.pointer_to_symbol_table,
            sections: &sections,
            rebased,
            image_base,
            preferred_image_base,
        };

        // Spec §4.7/§4.10: when a `.gnu_debuglink` companion is present on
        // disk, the COFF/DWARF subparsers run over *it*, not the primary
        // image, via a sections-only reparse and a gate swap.
        let debug_companion = debug_link
            .as_ref()
            .filter(|link| link.companion_exists)
            .and_then(|link| std::fs::read(&link.companion_path).ok())
            .and_then(|companion_bytes| {
                Self::load_sections_only(&companion_bytes)
                    .ok()
                    .map(|(nt_headers, sections)| crate::gate::CompanionImage {
                        nt_headers,
                        sections,
                        file: companion_bytes,
                    })
            });

        let mut debug_gate = crate::gate::DebugGate::new(&local_gate);
        if let Some(companion) = &debug_companion {
            debug_gate.replace_image(companion);
        }
        let debug_bytes = debug_companion.as_ref().map_or(file.as_slice(), |c| c.file.as_slice());
        let debug_data = debug_parser.parse(debug_gate.as_gate(), debug_bytes);

        debug!(
            "parsed {} ({}-bit, {} sections, {} exports, {} imports, {} delay imports)",
            image_name,
            if is_64 { 64 } else { 32 },
            sections.len(),
            exports.as_ref().map_or(0, |t| t.entries.len()),
            imports.len(),
            delay_imports.len(),
        );

        Ok(Self {
            image_path,
            image_name,
            original_name,
            is_64,
            preferred_image_base,
            image_base,
            rebased,
            redirected: false,
            virtual_size: nt_headers.optional_header.size_of_image,
            size_of_file_image,
            nt_headers,
            sections,
            directories,
            exports,
            imports,
            delay_imports,
            bound_imports,
            entry_points,
            relocations,
            strings,
            com_plus_il_only,
            debug_link,
            debug_data,
            debug_companion,
            module_index,
            relocated_alternates: Vec::new(),
            file,
            mapper,
        })
    }
}

/// The gate surface built from the parse-in-progress local variables, used
/// to invoke the COFF/DWARF subparsers before a [`ParsedImage`] exists to
/// implement [`crate::gate::ImageGate`] itself.
struct PreConstructionGate<'a> {
    is_64: bool,
    number_of_symbols: u32,
    pointer_to_symbol_table: u32,
    sections: &'a [Section],
    rebased: bool,
    image_base: Va,
    preferred_image_base: Va,
}

impl crate::gate::ImageGate for PreConstructionGate<'_> {
    fn is_64(&self) -> bool {
        self.is_64
    }

    fn number_of_symbols(&self) -> u32 {
        self.number_of_symbols
    }

    fn pointer_to_symbol_table(&self) -> u32 {
        self.pointer_to_symbol_table
    }

    fn section_at_index(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    fn section_at_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.display_name == name)
    }

    fn rebase(&self, va: Va) -> Va {
        if self.rebased {
            Va(va.0.wrapping_add(self.image_base.0.wrapping_sub(self.preferred_image_base.0)))
        } else {
            va
        }
    }
}

impl crate::gate::ImageGate for ParsedImage {
    fn is_64(&self) -> bool {
        self.is_64
    }

    fn number_of_symbols(&self) -> u32 {
        self.nt_headers.file_header.number_of_symbols
    }

    fn pointer_to_symbol_table(&self) -> u32 {
        self.nt_headers.file_header.pointer_to_symbol_table
    }

    fn section_at_index(&self, index: usize) -> Option<&Section> {
        ParsedImage::section_at_index(self, index)
    }

    fn section_at_name(&self, name: &str) -> Option<&Section> {
        ParsedImage::section_at_name(self, name)
    }

    fn rebase(&self, va: Va) -> Va {
        if self.rebased {
            Va(va.0.wrapping_add(self.image_base.0.wrapping_sub(self.preferred_image_base.0)))
        } else {
            va
        }
    }
}

fn parse_nt_headers(file: &[u8]) -> Result<NtHeaders> {
    if file.len() < 0x40 {
        return Err(AnalyzerError::Truncated("file shorter than the DOS header"));
    }
    if &file[0..2] != b"MZ" {
        return Err(AnalyzerError::InvalidDosSignature);
    }
    let (_, nt_headers) = NtHeaders::parse(file).map_err(|_| AnalyzerError::InvalidNtSignature)?;
    if !matches!(
        nt_headers.file_header.machine,
        header::Machine::I386 | header::Machine::AMD64 | header::Machine::ARM | header::Machine::ARM64
    ) {
        warn!("unusual machine type {:?}, proceeding anyway", nt_headers.file_header.machine);
    }
    Ok(nt_headers)
}

fn parse_section_table(file: &[u8], nt_headers: &NtHeaders) -> Result<Vec<Section>> {
    let e_lfanew = u32::from_le_bytes([file[0x3c], file[0x3d], file[0x3e], file[0x3f]]) as usize;
    let coff_header_end = e_lfanew + 4 + 20; // "PE\0\0" + COFF file header
    let mut offset = coff_header_end + nt_headers.file_header.size_of_optional_header as usize;
    let mut sections = Vec::with_capacity(nt_headers.file_header.number_of_sections as usize);
    for _ in 0..nt_headers.file_header.number_of_sections {
        let slice = file
            .get(offset..)
            .ok_or(AnalyzerError::Truncated("section header table"))?;
        let (_, section) =
            Section::parse(slice).map_err(|_| AnalyzerError::Truncated("malformed section header"))?;
        offset += 40; // IMAGE_SECTION_HEADER is a fixed 40 bytes
        sections.push(section);
    }
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiset::EmptySchema;
    use crate::symbols::NullPublisher;

    fn minimal_pe32(machine_i386: bool) -> Vec<u8> {
        let mut file = vec![0u8; 0x1000];
        file[0..2].copy_from_slice(b"MZ");
        file[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());

        let nt = 0x80usize;
        file[nt..nt + 4].copy_from_slice(b"PE\0\0");
        let machine: u16 = if machine_i386 { 0x14C } else { 0x8664 };
        file[nt + 4..nt + 6].copy_from_slice(&machine.to_le_bytes());
        file[nt + 6..nt + 8].copy_from_slice(&1u16.to_le_bytes()); // NumberOfSections
        let size_of_optional_header: u16 = 224;
        file[nt + 16..nt + 18].copy_from_slice(&size_of_optional_header.to_le_bytes());

        let opt = nt + 24;
        file[opt..opt + 2].copy_from_slice(&0x10Bu16.to_le_bytes()); // PE32 magic
        file[opt + 28..opt + 32].copy_from_slice(&0x0040_0000u32.to_le_bytes()); // ImageBase
        file[opt + 32..opt + 36].copy_from_slice(&0x1000u32.to_le_bytes()); // SectionAlignment
        file[opt + 36..opt + 40].copy_from_slice(&0x200u32.to_le_bytes()); // FileAlignment
        file[opt + 56..opt + 60].copy_from_slice(&0x2000u32.to_le_bytes()); // SizeOfImage
        file[opt + 60..opt + 64].copy_from_slice(&0x200u32.to_le_bytes()); // SizeOfHeaders
        file[opt + 92..opt + 96].copy_from_slice(&0u32.to_le_bytes()); // NumberOfRvaAndSizes

        let section = opt + size_of_optional_header as usize;
        file[section..section + 8].copy_from_slice(b".text\0\0\0");
        file[section + 8..section + 12].copy_from_slice(&0x100u32.to_le_bytes()); // VirtualSize
        file[section + 12..section + 16].copy_from_slice(&0x1000u32.to_le_bytes()); // VirtualAddress
        file[section + 16..section + 20].copy_from_slice(&0x200u32.to_le_bytes()); // SizeOfRawData
        file[section + 20..section + 24].copy_from_slice(&0x200u32.to_le_bytes()); // PointerToRawData

        file
    }

    #[test]
    fn parses_minimal_image_end_to_end() {
        let file = minimal_pe32(true);
        let config = AnalyzerConfig::default();
        let mut publisher = NullPublisher;
        let image = ParsedImage::from_bytes(
            file,
            "sample.dll".to_string(),
            None,
            None,
            &config,
            &EmptySchema,
            0,
            &mut publisher,
            &crate::gate::NullDebugInfoParser,
        )
        .unwrap();

        assert!(!image.is_64);
        assert_eq!(image.sections.len(), 1);
        assert_eq!(image.preferred_image_base, Va(0x0040_0000));
        assert_eq!(image.image_base, image.preferred_image_base);
        assert!(!image.rebased);
        assert!(image.exports.is_none());
        assert!(image.imports.is_empty());
    }

    #[test]
    fn rejects_missing_dos_signature() {
        let file = vec![0u8; 0x100];
        let config = AnalyzerConfig::default();
        let mut publisher = NullPublisher;
        let result = ParsedImage::from_bytes(
            file,
            "bad.exe".to_string(),
            None,
            None,
            &config,
            &EmptySchema,
            0,
            &mut publisher,
            &crate::gate::NullDebugInfoParser,
        );
        assert!(matches!(result, Err(AnalyzerError::InvalidDosSignature)));
    }

    #[test]
    fn runtime_base_triggers_rebase_flag() {
        let file = minimal_pe32(false);
        let config = AnalyzerConfig::default();
        let mut publisher = NullPublisher;
        let image = ParsedImage::from_bytes(
            file,
            "sample64.dll".to_string(),
            None,
            Some(Va(0x7ff0_0000_0000)),
            &config,
            &EmptySchema,
            0,
            &mut publisher,
            &crate::gate::NullDebugInfoParser,
        )
        .unwrap();

        assert!(image.is_64);
        assert!(image.rebased);
        assert_eq!(image.image_base, Va(0x7ff0_0000_0000));
    }
}
