//! The Image Gate: a narrow capability surface the external COFF/DWARF
//! debug-info subparsers see instead of a whole [`crate::pe::ParsedImage`].
//!
//! Modeled as a trait rather than a base class so that the "replace gate"
//! mechanism (swap to a `.gnu_debuglink` companion) is just substituting a
//! different implementor, not reassigning a field of a fixed concrete type.

use enumflags2::{bitflags, BitFlags};

use crate::addr::Va;
use crate::pe::header::NtHeaders;
use crate::pe::sections::Section;

/// Which debug-info flavors a subparser successfully found.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugFlavor {
    Coff,
    Dwarf,
}

pub type DebugFlavorSet = BitFlags<DebugFlavor>;

/// What the debug-info subparsers are allowed to see of an image.
pub trait ImageGate {
    fn is_64(&self) -> bool;
    fn number_of_symbols(&self) -> u32;
    fn pointer_to_symbol_table(&self) -> u32;
    fn section_at_index(&self, index: usize) -> Option<&Section>;
    fn section_at_name(&self, name: &str) -> Option<&Section>;
    /// Translates a header-relative VA to the runtime-relative VA, accounting
    /// for the image having been rebased.
    fn rebase(&self, va: Va) -> Va;
}

/// External COFF/DWARF subparsers are invoked through this interface; each
/// contributes whichever flags it successfully parsed to a shared
/// [`DebugFlavor`] set. Failures are recoverable (spec §7) and simply omit
/// their flag rather than aborting the image.
pub trait DebugInfoParser {
    fn parse(&self, gate: &dyn ImageGate, data: &[u8]) -> DebugFlavorSet;
}

/// A parser that never finds anything; the default when no external
/// COFF/DWARF backend is wired in.
#[derive(Debug, Default)]
pub struct NullDebugInfoParser;

impl DebugInfoParser for NullDebugInfoParser {
    fn parse(&self, _gate: &dyn ImageGate, _data: &[u8]) -> DebugFlavorSet {
        DebugFlavorSet::empty()
    }
}

/// A `.gnu_debuglink` companion file, parsed sections-only (spec §4.10):
/// just enough of the companion image (headers, section table, raw bytes)
/// to serve as an [`ImageGate`] in its own right, without running the full
/// directory-driven pipeline a second time.
#[derive(Debug, Clone)]
pub struct CompanionImage {
    pub nt_headers: NtHeaders,
    pub sections: Vec<Section>,
    pub file: Vec<u8>,
}

impl ImageGate for CompanionImage {
    fn is_64(&self) -> bool {
        self.nt_headers.optional_header.is_64
    }

    fn number_of_symbols(&self) -> u32 {
        self.nt_headers.file_header.number_of_symbols
    }

    fn pointer_to_symbol_table(&self) -> u32 {
        self.nt_headers.file_header.pointer_to_symbol_table
    }

    fn section_at_index(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    fn section_at_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.display_name == name)
    }

    /// The companion is parsed sections-only, with no independent notion of
    /// a runtime base; it always reports the VA it was asked about as-is.
    fn rebase(&self, va: Va) -> Va {
        va
    }
}

/// The thin indirection object spec §4.10 describes: wraps whichever
/// [`ImageGate`] the COFF/DWARF subparsers should currently see, so handing
/// off to a `.gnu_debuglink` companion is a swap of which variant is active
/// rather than a reassigned field on a fixed concrete type.
pub enum DebugGate<'a> {
    Primary(&'a dyn ImageGate),
    Companion(&'a CompanionImage),
}

impl<'a> DebugGate<'a> {
    pub fn new(primary: &'a dyn ImageGate) -> Self {
        DebugGate::Primary(primary)
    }

    /// Swaps this gate to point at `companion` instead of the primary image.
    pub fn replace_image(&mut self, companion: &'a CompanionImage) {
        *self = DebugGate::Companion(companion);
    }

    pub fn as_gate(&self) -> &dyn ImageGate {
        match self {
            DebugGate::Primary(gate) => *gate,
            DebugGate::Companion(companion) => *companion,
        }
    }
}
