// ==============================================================================
// Path Layout: Directory and Extension Conventions
// ==============================================================================
//
// Pure conventions mapping logical names to on-disk paths. A project root
// contains `src/` (the only readable tree) and `materialized_config/` (the
// only writable tree):
//
//   src/hi.pconf                       -- single-output configuration source
//   src/fleet.mpconf                   -- multi-output configuration source
//   src/greet.proto                    -- schema
//   src/greet.proto-validator          -- validator companion (optional)
//   materialized_config/hi.materialized_JSON
//   materialized_config/fleet/<key>.materialized_JSON
//
// Nothing here touches the filesystem; the helpers are string/path algebra
// only, which keeps them trivially unit-testable.

use std::path::{Path, PathBuf};

use crate::error::Error;

/// Subdirectory of the project root holding all readable modules.
pub const SOURCE_DIR: &str = "src";
/// Subdirectory of the project root receiving all compiled output.
pub const OUTPUT_DIR: &str = "materialized_config";

/// Extension of single-output configuration sources.
pub const SINGLE_EXT: &str = "pconf";
/// Extension of multi-output configuration sources.
pub const MULTI_EXT: &str = "mpconf";
/// Extension of schema files.
pub const SCHEMA_EXT: &str = "proto";
/// Extension of emitted output files.
pub const OUTPUT_EXT: &str = "materialized_JSON";
/// Suffix appended to a schema's file name to locate its validator companion.
pub const VALIDATOR_SUFFIX: &str = "-validator";

/// The entry-point contract a configuration source declares through its
/// extension: one message, or a string-keyed map of messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Single,
    Multi,
}

/// Classify a source name by extension.
pub fn classify(source_name: &str) -> Result<SourceKind, Error> {
    match source_name.rsplit_once('.').map(|(_, ext)| ext) {
        Some(ext) if ext == SINGLE_EXT => Ok(SourceKind::Single),
        Some(ext) if ext == MULTI_EXT => Ok(SourceKind::Multi),
        _ => Err(Error::InputClassification {
            name: source_name.to_string(),
        }),
    }
}

/// Whether a resolved module path names a schema file.
pub fn is_schema(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == SCHEMA_EXT)
}

/// Output path for a single-mode source: the source's relative path under
/// `materialized_config/` with the extension swapped.
///
/// `sub/hi.pconf` becomes `<root>/materialized_config/sub/hi.materialized_JSON`.
pub fn single_output(project_root: &Path, source_name: &str) -> PathBuf {
    let stem = strip_extension(source_name);
    project_root
        .join(OUTPUT_DIR)
        .join(format!("{stem}.{OUTPUT_EXT}"))
}

/// Output directory for a multi-mode source: the source's relative path,
/// without its extension, as a directory under `materialized_config/`.
///
/// `fleet.mpconf` becomes `<root>/materialized_config/fleet/`.
pub fn multi_output_dir(project_root: &Path, source_name: &str) -> PathBuf {
    project_root.join(OUTPUT_DIR).join(strip_extension(source_name))
}

/// Output path for one key of a multi-mode source.
pub fn multi_output(output_dir: &Path, key: &str) -> PathBuf {
    output_dir.join(format!("{key}.{OUTPUT_EXT}"))
}

/// Companion validator path for a schema: the schema's own path with
/// `-validator` appended to the file name (`greet.proto` pairs with
/// `greet.proto-validator` in the same directory).
pub fn validator_companion(schema_path: &Path) -> PathBuf {
    let file_name = schema_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    schema_path.with_file_name(format!("{file_name}{VALIDATOR_SUFFIX}"))
}

/// Whether a multi-mode map key can serve as a file name component. Keys with
/// path separators or relative components would let an output escape the
/// compiled root.
pub fn is_valid_output_key(key: &str) -> bool {
    !key.is_empty() && key != "." && key != ".." && !key.contains(['/', '\\'])
}

/// Drop the final `.ext` from a relative source name, if any.
fn strip_extension(source_name: &str) -> &str {
    match source_name.rsplit_once('.') {
        // Only strip when the dot is inside the final path component.
        Some((stem, ext)) if !ext.contains('/') => stem,
        _ => source_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_extension() {
        assert_eq!(classify("hi.pconf").unwrap(), SourceKind::Single);
        assert_eq!(classify("sub/fleet.mpconf").unwrap(), SourceKind::Multi);
        assert!(matches!(
            classify("hi.txt"),
            Err(Error::InputClassification { .. })
        ));
        assert!(matches!(
            classify("no_extension"),
            Err(Error::InputClassification { .. })
        ));
    }

    #[test]
    fn single_output_swaps_extension_under_output_root() {
        let out = single_output(Path::new("/proj"), "sub/hi.pconf");
        assert_eq!(
            out,
            Path::new("/proj/materialized_config/sub/hi.materialized_JSON")
        );
    }

    #[test]
    fn multi_output_nests_keys_under_source_stem() {
        let dir = multi_output_dir(Path::new("/proj"), "fleet.mpconf");
        assert_eq!(dir, Path::new("/proj/materialized_config/fleet"));
        assert_eq!(
            multi_output(&dir, "a"),
            Path::new("/proj/materialized_config/fleet/a.materialized_JSON")
        );
    }

    #[test]
    fn validator_companion_appends_suffix() {
        assert_eq!(
            validator_companion(Path::new("/proj/src/greet.proto")),
            Path::new("/proj/src/greet.proto-validator")
        );
    }

    #[test]
    fn output_keys_must_be_plain_components() {
        assert!(is_valid_output_key("a"));
        assert!(is_valid_output_key("prod-eu_1"));
        assert!(!is_valid_output_key(""));
        assert!(!is_valid_output_key("."));
        assert!(!is_valid_output_key(".."));
        assert!(!is_valid_output_key("a/b"));
        assert!(!is_valid_output_key("a\\b"));
    }

    #[test]
    fn schema_detection_ignores_validator_companions() {
        assert!(is_schema(Path::new("/p/src/greet.proto")));
        assert!(!is_schema(Path::new("/p/src/greet.proto-validator")));
        assert!(!is_schema(Path::new("/p/src/hi.pconf")));
    }
}
