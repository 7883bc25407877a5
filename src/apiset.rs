//! API-set name redirection (spec §4.9).
//!
//! Microsoft Windows virtualizes certain DLL names (`api-ms-win-core-…`) onto
//! concrete provider DLLs. The analyzer never embeds the schema itself — it
//! is an external database queried through [`ApiSetSchema`] — but it owns the
//! string surgery of splitting a forward/import name and rewriting its
//! library portion when the schema has an entry.

/// Narrow capability the analyzer needs from the external API-set schema
/// database. `consumer` is the importing/forwarding module's own name;
/// `provider` is the candidate api-set-looking library name with its
/// extension already stripped.
pub trait ApiSetSchema {
    /// Does the schema redirect `provider` for `consumer`?
    fn schema_present(&self, consumer: &str, provider: &str) -> bool;

    /// The concrete library that `provider` resolves to for `consumer`.
    /// Only meaningful when [`Self::schema_present`] is true.
    fn resolve(&self, consumer: &str, provider: &str) -> Option<String>;
}

/// A schema with no entries; every lookup is a miss. Used when the caller
/// has no API-set database to consult (e.g. analyzing a standalone file
/// outside of a live-process context).
#[derive(Debug, Default)]
pub struct EmptySchema;

impl ApiSetSchema for EmptySchema {
    fn schema_present(&self, _consumer: &str, _provider: &str) -> bool {
        false
    }

    fn resolve(&self, _consumer: &str, _provider: &str) -> Option<String> {
        None
    }
}

/// Strips a trailing `.dll`/`.exe` (case-insensitively) from a library name.
pub fn strip_extension(name: &str) -> &str {
    for ext in [".dll", ".exe", ".sys"] {
        if name.len() > ext.len() && name[name.len() - ext.len()..].eq_ignore_ascii_case(ext) {
            return &name[..name.len() - ext.len()];
        }
    }
    name
}

/// Splits a forward string (`"Library.Function"`, possibly
/// `"Library.With.Dots.Function"`) on its *last* dot, since the library
/// portion may itself contain dots (e.g. `KERNEL.APPCORE.IsDeveloperModeEnabled`).
pub fn split_forward(forward: &str) -> Option<(&str, &str)> {
    let idx = forward.rfind('.')?;
    Some((&forward[..idx], &forward[idx + 1..]))
}

/// Applies API-set redirection to a bare library name (import case): returns
/// the schema's resolved target when present, else the original name.
pub fn resolve_library_name(consumer: &str, library: &str, schema: &dyn ApiSetSchema) -> String {
    let candidate = strip_extension(library);
    if schema.schema_present(consumer, candidate) {
        if let Some(target) = schema.resolve(consumer, candidate) {
            return target;
        }
    }
    library.to_string()
}

/// Applies API-set redirection to a forward string (export case): rewrites
/// only the library portion, keeping the function name, when the schema has
/// an entry for it.
pub fn resolve_forward(consumer: &str, forward: &str, schema: &dyn ApiSetSchema) -> String {
    match split_forward(forward) {
        Some((library, function)) => {
            let candidate = strip_extension(library);
            if schema.schema_present(consumer, candidate) {
                if let Some(target) = schema.resolve(consumer, candidate) {
                    return format!("{}.{}", target, function);
                }
            }
            forward.to_string()
        }
        None => forward.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSchema;
    impl ApiSetSchema for FakeSchema {
        fn schema_present(&self, _consumer: &str, provider: &str) -> bool {
            provider.eq_ignore_ascii_case("api-ms-win-core-libraryloader-l1-1-0")
        }
        fn resolve(&self, _consumer: &str, provider: &str) -> Option<String> {
            if self.schema_present("", provider) {
                Some("kernelbase".to_string())
            } else {
                None
            }
        }
    }

    #[test]
    fn resolves_known_apiset_import() {
        let schema = FakeSchema;
        let resolved = resolve_library_name(
            "kernel32.dll",
            "api-ms-win-core-libraryloader-l1-1-0.dll",
            &schema,
        );
        assert_eq!(resolved, "kernelbase");
    }

    #[test]
    fn leaves_unknown_library_untouched() {
        let schema = FakeSchema;
        let resolved = resolve_library_name("app.exe", "user32.dll", &schema);
        assert_eq!(resolved, "user32.dll");
    }

    #[test]
    fn splits_forward_on_last_dot() {
        let (lib, func) = split_forward("KERNEL.APPCORE.IsDeveloperModeEnabled").unwrap();
        assert_eq!(lib, "KERNEL.APPCORE");
        assert_eq!(func, "IsDeveloperModeEnabled");
    }

    #[test]
    fn resolves_forward_library_keeping_function() {
        let schema = FakeSchema;
        let resolved = resolve_forward(
            "x",
            "api-ms-win-core-libraryloader-l1-1-0.GetModuleFileNameW",
            &schema,
        );
        assert_eq!(resolved, "kernelbase.GetModuleFileNameW");
    }
}
