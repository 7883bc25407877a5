//! Entry-point list: the image entry point plus one record per TLS callback
//! (spec §3, `EntryPoint`).

use crate::addr::{Raw, Va};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub raw_offset: Raw,
    pub va: Va,
}
