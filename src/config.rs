//! The two process-wide knobs the analyzer honors (spec §6, Persistence / configuration).

/// Default minimum run length (in characters) for the optional string scanner.
pub const DEFAULT_LOAD_STRING_LENGTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerConfig {
    /// Skip the full-image string-literal scan entirely (it is the only
    /// O(file size) pass the analyzer performs and is opt-out for large images).
    pub disable_load_strings: bool,
    /// Minimum run length for a string to be recorded by the scanner.
    pub load_string_length: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            disable_load_strings: false,
            load_string_length: DEFAULT_LOAD_STRING_LENGTH,
        }
    }
}
