//! The Module Registry (spec §5): indexes every parsed image by name+bitness
//! and by runtime base, resolves forwarded exports across module boundaries,
//! and tracks "relocated alternates" — images with the same name and bitness
//! loaded at a different base.

use std::collections::HashMap;

use log::warn;

use crate::addr::Va;
use crate::apiset::split_forward;
use crate::pe::export::ExportEntry;
use crate::pe::ParsedImage;

/// Forwarded-export resolution gives up after this many hops to break cycles
/// between modules that forward to each other.
const MAX_FORWARD_HOPS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcLookup<'a> {
    Name(&'a str),
    Ordinal(u32),
}

/// Parses a loader-style proc-name argument: decimal digits or a
/// `#`-prefixed number means ordinal, anything else is a name.
pub fn parse_proc_lookup(s: &str) -> ProcLookup<'_> {
    if let Some(rest) = s.strip_prefix('#') {
        if let Ok(n) = rest.parse::<u32>() {
            return ProcLookup::Ordinal(n);
        }
    } else if let Ok(n) = s.parse::<u32>() {
        return ProcLookup::Ordinal(n);
    }
    ProcLookup::Name(s)
}

fn image_key(name: &str, is_64: bool) -> (String, bool) {
    (name.to_ascii_lowercase(), is_64)
}

#[derive(Debug, Default)]
pub struct ModuleRegistry {
    images: Vec<ParsedImage>,
    by_name_bitness: HashMap<(String, bool), usize>,
    by_base: HashMap<(u64, bool), usize>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn images(&self) -> &[ParsedImage] {
        &self.images
    }

    pub fn get(&self, index: usize) -> Option<&ParsedImage> {
        self.images.get(index)
    }

    /// Registers a parsed image, returning its registry index. If an image
    /// with the same name and bitness is already registered, the new image
    /// is still stored and added to the primary's `relocated_alternates`
    /// list rather than replacing it (spec §5, "relocated alternates").
    pub fn add_image(&mut self, mut image: ParsedImage) -> usize {
        let index = self.images.len();
        image.module_index = index;
        let key = image_key(crate::apiset::strip_extension(&image.image_name), image.is_64);
        self.by_base.insert((image.image_base.0, image.is_64), index);

        match self.by_name_bitness.get(&key).copied() {
            Some(primary_index) => {
                warn!(
                    "{} ({}-bit) already registered at a different base, recording as an alternate",
                    image.image_name, if image.is_64 { 64 } else { 32 }
                );
                self.images.push(image);
                if let Some(primary) = self.images.get_mut(primary_index) {
                    primary.relocated_alternates.push(index);
                }
            }
            None => {
                self.by_name_bitness.insert(key, index);
                self.images.push(image);
            }
        }

        index
    }

    /// Finds the module whose mapped VA range contains `va`. When
    /// `check_ownership` is set, a hit additionally requires `va` to fall
    /// within the module's declared virtual size (guards against a bogus
    /// size producing false-positive containment).
    pub fn get_module(&self, va: Va, check_ownership: bool) -> Option<&ParsedImage> {
        self.images.iter().find(|image| {
            let start = image.image_base.0;
            let end = start.saturating_add(image.virtual_size as u64);
            let in_range = va.0 >= start && va.0 < end;
            in_range && (!check_ownership || image.virtual_size > 0)
        })
    }

    fn contains_va(image: &ParsedImage, va: Va) -> bool {
        let start = image.image_base.0;
        let end = start.saturating_add(image.virtual_size as u64);
        va.0 >= start && va.0 < end
    }

    /// Looks up the primary image for `(name, bitness)`, then — when
    /// `check_va` is supplied — selects among that primary and its
    /// `relocated_alternates` the one whose mapped range contains it,
    /// falling back to the primary if none does (spec §4.8).
    fn find_by_name(&self, name: &str, is_64: bool, check_va: Option<Va>) -> Option<&ParsedImage> {
        let candidate = crate::apiset::strip_extension(name);
        let primary_idx = *self.by_name_bitness.get(&image_key(candidate, is_64))?;
        let primary = self.images.get(primary_idx)?;

        let va = match check_va {
            Some(va) => va,
            None => return Some(primary),
        };
        if Self::contains_va(primary, va) {
            return Some(primary);
        }
        primary
            .relocated_alternates
            .iter()
            .filter_map(|&idx| self.images.get(idx))
            .find(|alt| Self::contains_va(alt, va))
            .or(Some(primary))
    }

    /// Resolves a procedure by name or ordinal inside `library`, following
    /// forwarded exports across modules up to [`MAX_FORWARD_HOPS`] times.
    /// `check_va`, when supplied, selects which relocated alternate of each
    /// module in the chain to resolve against (spec §4.8).
    pub fn get_proc_data(
        &self,
        library: &str,
        lookup: ProcLookup<'_>,
        is_64: bool,
        check_va: Option<Va>,
    ) -> Option<(&ParsedImage, &ExportEntry)> {
        self.get_proc_data_inner(library, lookup, is_64, check_va, MAX_FORWARD_HOPS)
    }

    fn get_proc_data_inner(
        &self,
        library: &str,
        lookup: ProcLookup<'_>,
        is_64: bool,
        check_va: Option<Va>,
        hops_left: u32,
    ) -> Option<(&ParsedImage, &ExportEntry)> {
        if hops_left == 0 {
            warn!("forward-chain resolution exceeded {} hops, giving up", MAX_FORWARD_HOPS);
            return None;
        }

        let module = self.find_by_name(library, is_64, check_va)?;
        let exports = module.exports.as_ref()?;

        let entry_index = match lookup {
            ProcLookup::Name(name) => exports.by_name.get(name).copied(),
            ProcLookup::Ordinal(ord) => exports.by_ordinal.get(&ord).copied(),
        }?;
        let entry = &exports.entries[entry_index];

        if !entry.is_forwarded() {
            return Some((module, entry));
        }

        let (next_library, next_function) = split_forward(&entry.forwarded_to)?;
        self.get_proc_data_inner(
            next_library,
            ProcLookup::Name(next_function),
            is_64,
            check_va,
            hops_left - 1,
        )
    }

    /// Returns `self`/the primary image or the alternate whose mapped range
    /// contains `va` (spec §6, `get_image_at_addr`).
    pub fn get_image_at_addr(&self, name: &str, is_64: bool, va: Va) -> Option<&ParsedImage> {
        self.find_by_name(name, is_64, Some(va))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiset::EmptySchema;
    use crate::config::AnalyzerConfig;
    use crate::symbols::NullPublisher;

    /// Builds a flat (zero-section) PE32 image exporting one name, `export_name`,
    /// whose function slot either holds a plain RVA (`forward = None`) or a
    /// forward string (`forward = Some("module.function")`, written inside
    /// the export directory's own span so it classifies as forwarded).
    fn minimal_export_image(image_base: u32, original_name: &str, export_name: &str, forward: Option<&str>) -> Vec<u8> {
        let mut file = vec![0u8; 0x300];
        file[0..2].copy_from_slice(b"MZ");
        file[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());

        let nt = 0x80usize;
        file[nt..nt + 4].copy_from_slice(b"PE\0\0");
        file[nt + 4..nt + 6].copy_from_slice(&0x14Cu16.to_le_bytes()); // I386
        file[nt + 6..nt + 8].copy_from_slice(&0u16.to_le_bytes()); // NumberOfSections
        let size_of_optional_header: u16 = 224;
        file[nt + 16..nt + 18].copy_from_slice(&size_of_optional_header.to_le_bytes());

        let opt = nt + 24;
        file[opt..opt + 2].copy_from_slice(&0x10Bu16.to_le_bytes()); // PE32 magic
        file[opt + 28..opt + 32].copy_from_slice(&image_base.to_le_bytes());
        file[opt + 32..opt + 36].copy_from_slice(&0x1000u32.to_le_bytes()); // SectionAlignment
        file[opt + 36..opt + 40].copy_from_slice(&0x200u32.to_le_bytes()); // FileAlignment
        file[opt + 56..opt + 60].copy_from_slice(&0x2000u32.to_le_bytes()); // SizeOfImage
        file[opt + 60..opt + 64].copy_from_slice(&0x200u32.to_le_bytes()); // SizeOfHeaders
        file[opt + 92..opt + 96].copy_from_slice(&16u32.to_le_bytes()); // NumberOfRvaAndSizes

        let dirs = opt + 96;
        file[dirs..dirs + 4].copy_from_slice(&0x200u32.to_le_bytes()); // Export.VirtualAddress
        file[dirs + 4..dirs + 8].copy_from_slice(&0x100u32.to_le_bytes()); // Export.Size

        let export_dir = 0x200usize;
        file[export_dir + 12..export_dir + 16].copy_from_slice(&0x280u32.to_le_bytes()); // Name
        file[export_dir + 16..export_dir + 20].copy_from_slice(&1u32.to_le_bytes()); // Base
        file[export_dir + 20..export_dir + 24].copy_from_slice(&1u32.to_le_bytes()); // NumberOfFunctions
        file[export_dir + 24..export_dir + 28].copy_from_slice(&1u32.to_le_bytes()); // NumberOfNames
        file[export_dir + 28..export_dir + 32].copy_from_slice(&0x230u32.to_le_bytes()); // AddressOfFunctions
        file[export_dir + 32..export_dir + 36].copy_from_slice(&0x240u32.to_le_bytes()); // AddressOfNames
        file[export_dir + 36..export_dir + 40].copy_from_slice(&0x250u32.to_le_bytes()); // AddressOfNameOrdinals

        let func_rva: u32 = match forward {
            Some(target) => {
                let forward_bytes = target.as_bytes();
                file[0x260..0x260 + forward_bytes.len()].copy_from_slice(forward_bytes);
                0x260
            }
            None => 0x9000,
        };
        file[0x230..0x234].copy_from_slice(&func_rva.to_le_bytes());
        file[0x240..0x244].copy_from_slice(&0x270u32.to_le_bytes()); // names[0] -> "Foo"/"Bar" string
        file[0x250..0x252].copy_from_slice(&0u16.to_le_bytes()); // nameOrdinals[0] = 0

        let name_bytes = export_name.as_bytes();
        file[0x270..0x270 + name_bytes.len()].copy_from_slice(name_bytes);

        let orig_bytes = original_name.as_bytes();
        file[0x280..0x280 + orig_bytes.len()].copy_from_slice(orig_bytes);

        file
    }

    fn load(file: Vec<u8>, name: &str) -> ParsedImage {
        let config = AnalyzerConfig::default();
        let mut publisher = NullPublisher;
        ParsedImage::from_bytes(
            file,
            name.to_string(),
            None,
            None,
            &config,
            &EmptySchema,
            0,
            &mut publisher,
            &crate::gate::NullDebugInfoParser,
        )
        .unwrap()
    }

    #[test]
    fn parse_proc_lookup_classifies_ordinal_vs_name() {
        assert_eq!(parse_proc_lookup("#7"), ProcLookup::Ordinal(7));
        assert_eq!(parse_proc_lookup("42"), ProcLookup::Ordinal(42));
        assert_eq!(parse_proc_lookup("CreateFileW"), ProcLookup::Name("CreateFileW"));
    }

    #[test]
    fn add_image_tracks_relocated_alternates() {
        let mut registry = ModuleRegistry::new();
        let primary = load(minimal_export_image(0x1000_0000, "mod", "Foo", None), "mod.dll");
        let alternate = load(minimal_export_image(0x2000_0000, "mod", "Foo", None), "mod.dll");

        let primary_idx = registry.add_image(primary);
        let alt_idx = registry.add_image(alternate);

        let stored_primary = registry.get(primary_idx).unwrap();
        assert_eq!(stored_primary.relocated_alternates, vec![alt_idx]);

        let found = registry.get_image_at_addr("mod.dll", false, Va(0x2000_0050)).unwrap();
        assert_eq!(found.image_base, Va(0x2000_0000));
    }

    #[test]
    fn get_module_finds_containing_image() {
        let mut registry = ModuleRegistry::new();
        let image = load(minimal_export_image(0x1000_0000, "mod", "Foo", None), "mod.dll");
        registry.add_image(image);

        assert!(registry.get_module(Va(0x1000_0100), true).is_some());
        assert!(registry.get_module(Va(0x9000_0000), true).is_none());
    }

    #[test]
    fn cross_module_forward_resolves_to_final_export() {
        let mut registry = ModuleRegistry::new();
        let a = load(minimal_export_image(0x1000_0000, "amod", "Foo", Some("bmod.Bar")), "amod.dll");
        let b = load(minimal_export_image(0x2000_0000, "bmod", "Bar", None), "bmod.dll");
        registry.add_image(a);
        registry.add_image(b);

        let (module, entry) = registry
            .get_proc_data("amod.dll", ProcLookup::Name("Foo"), false, None)
            .expect("forward chain should resolve");
        assert_eq!(module.image_name, "bmod.dll");
        assert_eq!(entry.function_name, "Bar");
        assert!(!entry.is_forwarded());
    }
}
