//! Raw PE/COFF image analyzer: parses sections, directories, exports,
//! imports (standard, delayed, bound), base relocations, and TLS callbacks
//! out of a Windows executable image, with API-set name redirection and
//! cross-module forward resolution through a [`registry::ModuleRegistry`].
//!
//! The analyzer never loads or executes the image; every address it reports
//! is arithmetic over the file bytes (see [`addr`] for the RAW/RVA/VA
//! coordinate systems it keeps distinct).

pub mod addr;
pub mod apiset;
pub mod config;
pub mod error;
pub mod gate;
pub mod pe;
pub mod registry;
pub mod symbols;

pub use config::AnalyzerConfig;
pub use error::{AnalyzerError, Result};
pub use pe::ParsedImage;
pub use registry::ModuleRegistry;
