//! The Symbol Publisher: an append-only channel into an external registry
//! that tags VAs with a kind, a module index, and a list position.
//!
//! The analyzer never reads back through this interface (spec §9,
//! "Symbol publishing"); it is a write-only sink supplied at construction.

use crate::addr::Va;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    InstanceBase,
    ExportDirectory,
    TlsDirectory,
    LoadConfigDirectory,
    EatAddr,
    EatOrdinal,
    EatName,
    Export,
    ImportDescriptor,
    ImportTable,
    ImportNameTable,
    DelayedImportTable,
    DelayedImportNameTable,
    BoundImportDescriptor,
    BoundImportForwardRef,
    TlsCallback,
    EntryPoint,
    RelocationBlock,
    StringData,
}

/// One published annotation. `param` carries kind-specific auxiliary data
/// (e.g. bitness for IAT/TLS/load-config tags) as free text, matching the
/// loosely-typed payload the external symbol registry accepts.
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    pub va: Va,
    pub kind: SymbolKind,
    pub module_index: usize,
    pub list_index: usize,
    pub param: String,
}

/// Narrow capability the analyzer needs from the external symbol registry.
pub trait SymbolPublisher {
    fn add(&mut self, record: SymbolRecord);
}

/// A publisher that discards everything; useful for tests and for callers
/// that only want the parsed data model, not the symbol side-channel.
#[derive(Debug, Default)]
pub struct NullPublisher;

impl SymbolPublisher for NullPublisher {
    fn add(&mut self, _record: SymbolRecord) {}
}

/// An in-memory publisher, handy for tests asserting on what got published.
#[derive(Debug, Default)]
pub struct VecPublisher(pub Vec<SymbolRecord>);

impl SymbolPublisher for VecPublisher {
    fn add(&mut self, record: SymbolRecord) {
        self.0.push(record);
    }
}
