//! Media-identity derivation: the filename-based identifier used to
//! recognize a file across a quality/remux upgrade when a rating key
//! isn't available (`spec.md` GLOSSARY, §4.4, §4.5.1 step 2).

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

static BRACKETED_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*[\[(][^\])]*[\])]").unwrap());
static YEAR_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\(\d{4}\)\s*$").unwrap());
static TRAILING_DASH_QUALIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*-\s*$").unwrap());

/// The basename, minus its extension, minus every bracketed tag
/// (`[1080p]`, `(2020)`, quality/codec markers Radarr/Sonarr append),
/// minus a trailing dash left behind once tags are stripped.
pub fn media_identity(path: &Path) -> String {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let without_year = YEAR_SUFFIX.replace(&stem, "");
    let without_tags = BRACKETED_TAG.replace_all(&without_year, "");
    TRAILING_DASH_QUALIFIER.replace(&without_tags, "").trim().to_string()
}
