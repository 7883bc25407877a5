//! Full-image string-literal scanner (spec §4.7, "Load strings"): a single
//! forward pass over the raw file bytes, classifying printable runs as ASCII
//! or UTF-16LE without backtracking. Disabled entirely when
//! `AnalyzerConfig::disable_load_strings` is set.

use crate::addr::Raw;
use crate::config::AnalyzerConfig;
use crate::pe::mapper::AddressMapper;
use crate::pe::sections::Section;
use crate::symbols::{SymbolKind, SymbolPublisher, SymbolRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    Ascii,
    Utf16Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundString {
    pub raw_offset: Raw,
    pub encoding: StringEncoding,
    pub text: String,
}

fn is_printable(b: u8) -> bool {
    b == 9 || b == 10 || b == 13 || (32..=126).contains(&b)
}

/// Looks one byte ahead of a printable byte to decide whether this run is
/// UTF-16LE (printable byte followed by a zero byte) or plain ASCII.
fn looks_like_utf16le(buf: &[u8], i: usize) -> bool {
    buf.get(i + 1).map_or(false, |&b| b == 0) && buf.get(i + 2).map_or(false, |&b| is_printable(b))
}

#[allow(clippy::too_many_arguments)]
pub fn scan_strings(
    buf: &[u8],
    config: &AnalyzerConfig,
    mapper: &AddressMapper,
    sections: &[Section],
    module_index: usize,
    publisher: &mut dyn SymbolPublisher,
) -> Vec<FoundString> {
    let mut out = Vec::new();
    if config.disable_load_strings {
        return out;
    }
    let min_len = config.load_string_length.max(1);

    let mut i = 0usize;
    while i < buf.len() {
        if !is_printable(buf[i]) {
            i += 1;
            continue;
        }

        let start = i;
        if looks_like_utf16le(buf, i) {
            let mut units = Vec::new();
            while i + 1 < buf.len() && is_printable(buf[i]) && buf[i + 1] == 0 {
                units.push(buf[i] as u16);
                i += 2;
            }
            if units.len() >= min_len {
                if let Ok(text) = String::from_utf16(&units) {
                    let raw_offset = Raw(start as u64);
                    publisher.add(SymbolRecord {
                        va: mapper.raw_to_va(raw_offset, sections),
                        kind: SymbolKind::StringData,
                        module_index,
                        list_index: out.len(),
                        param: String::new(),
                    });
                    out.push(FoundString {
                        raw_offset,
                        encoding: StringEncoding::Utf16Le,
                        text,
                    });
                }
            }
        } else {
            let run_start = i;
            while i < buf.len() && is_printable(buf[i]) {
                i += 1;
            }
            let run = &buf[run_start..i];
            if run.len() >= min_len {
                let raw_offset = Raw(run_start as u64);
                publisher.add(SymbolRecord {
                    va: mapper.raw_to_va(raw_offset, sections),
                    kind: SymbolKind::StringData,
                    module_index,
                    list_index: out.len(),
                    param: String::new(),
                });
                out.push(FoundString {
                    raw_offset,
                    encoding: StringEncoding::Ascii,
                    text: String::from_utf8_lossy(run).into_owned(),
                });
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Va;
    use crate::symbols::VecPublisher;

    fn no_sections_mapper() -> AddressMapper {
        AddressMapper::new(Va(0x1000_0000), 0x200, 0x1000, 0x200, &[])
    }

    #[test]
    fn finds_ascii_and_utf16_runs_above_minimum_length() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"hello\0");
        for c in "world".encode_utf16() {
            buf.extend_from_slice(&c.to_le_bytes());
        }
        buf.push(0);
        buf.push(0);
        buf.extend_from_slice(b"\x01\x02ok");

        let config = AnalyzerConfig {
            disable_load_strings: false,
            load_string_length: 2,
        };
        let mapper = no_sections_mapper();
        let mut publisher = VecPublisher::default();
        let found = scan_strings(&buf, &config, &mapper, &[], 0, &mut publisher);
        assert!(found.iter().any(|s| s.text == "hello" && s.encoding == StringEncoding::Ascii));
        assert!(found.iter().any(|s| s.text == "world" && s.encoding == StringEncoding::Utf16Le));
        assert!(found.iter().any(|s| s.text == "ok"));
        assert_eq!(publisher.0.len(), found.len());
        assert!(publisher.0.iter().all(|r| r.kind == crate::symbols::SymbolKind::StringData));
    }

    #[test]
    fn disabled_config_finds_nothing() {
        let config = AnalyzerConfig {
            disable_load_strings: true,
            load_string_length: 2,
        };
        let mapper = no_sections_mapper();
        let mut publisher = VecPublisher::default();
        assert!(scan_strings(b"hello world", &config, &mapper, &[], 0, &mut publisher).is_empty());
        assert!(publisher.0.is_empty());
    }

    #[test]
    fn below_minimum_length_is_dropped() {
        let config = AnalyzerConfig {
            disable_load_strings: false,
            load_string_length: 5,
        };
        let mapper = no_sections_mapper();
        let mut publisher = VecPublisher::default();
        assert!(scan_strings(b"hi\0\0ok\0\0", &config, &mapper, &[], 0, &mut publisher).is_empty());
    }
}
