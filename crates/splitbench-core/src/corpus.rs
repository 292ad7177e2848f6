//! Query corpus: ordered query files on disk.

use std::path::{Path, PathBuf};

use crate::error::Error;

/// Default query file name prefix.
pub const DEFAULT_QUERY_PREFIX: &str = "query6_";

/// Default query file extension.
pub const DEFAULT_QUERY_EXTENSION: &str = "sql";

/// Identifier used when a query carries no name hint.
pub const UNKNOWN_QUERY_ID: &str = "unknown";

/// File naming convention of a query corpus: `<prefix><n>.<extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusPattern {
    pub prefix: String,
    pub extension: String,
}

impl CorpusPattern {
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    /// Whether a file name follows this convention.
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.starts_with(&self.prefix) && file_name.ends_with(&format!(".{}", self.extension))
    }
}

impl Default for CorpusPattern {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_PREFIX, DEFAULT_QUERY_EXTENSION)
    }
}

/// One query read from the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Source file name, used as the query identifier.
    pub id: String,
    pub path: PathBuf,
    pub text: String,
}

impl Query {
    /// Read and trim one query file.
    pub fn read(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            id,
            path: path.to_path_buf(),
            text: text.trim().to_string(),
        })
    }
}

/// List the matching query files in `dir`, sorted lexicographically by name.
///
/// Symlinks are followed and directories skipped. Entries that cannot be
/// listed are skipped with a warning.
pub fn list_query_files(dir: &Path, pattern: &CorpusPattern) -> Result<Vec<PathBuf>, Error> {
    let entries = std::fs::read_dir(dir).map_err(|source| Error::Corpus {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable corpus entry");
                continue;
            }
        };
        // Follows symlinks; a dangling one is kept and fails when read
        if entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if pattern.matches(&name) {
            names.push(name);
        }
    }
    names.sort();

    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}

/// Extract the query identifier from an embedded file-name hint.
///
/// `"... query6_7.sql ..."` yields `"7"`. Text without a hint yields
/// [`UNKNOWN_QUERY_ID`].
pub fn extract_query_id(text: &str, prefix: &str) -> String {
    text.find(prefix)
        .map(|start| start + prefix.len())
        .and_then(|start| {
            let rest = &text[start..];
            rest.find(".sql").map(|end| &rest[..end])
        })
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_QUERY_ID.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matches() {
        let pattern = CorpusPattern::default();
        assert!(pattern.matches("query6_1.sql"));
        assert!(pattern.matches("query6_10.sql"));
        assert!(!pattern.matches("query5_1.sql"));
        assert!(!pattern.matches("query6_1.sql.bak"));
        assert!(!pattern.matches("notes.txt"));
    }

    #[test]
    fn test_list_sorted_lexicographically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["query6_2.sql", "query6_10.sql", "query6_1.sql", "readme.md"] {
            std::fs::write(dir.path().join(name), "SELECT 1").unwrap();
        }
        std::fs::create_dir(dir.path().join("query6_99.sql")).unwrap();

        let files = list_query_files(dir.path(), &CorpusPattern::default()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["query6_1.sql", "query6_10.sql", "query6_2.sql"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_list_includes_symlinked_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("generated.sql");
        std::fs::write(&target, "SELECT 1").unwrap();

        let corpus = dir.path().join("queries");
        std::fs::create_dir(&corpus).unwrap();
        std::fs::write(corpus.join("query6_2.sql"), "SELECT 2").unwrap();
        std::os::unix::fs::symlink(&target, corpus.join("query6_1.sql")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone.sql"), corpus.join("query6_3.sql")).unwrap();

        let files = list_query_files(&corpus, &CorpusPattern::default()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["query6_1.sql", "query6_2.sql", "query6_3.sql"]);
        assert!(Query::read(&files[0]).is_ok());
        assert!(Query::read(&files[2]).is_err());
    }

    #[test]
    fn test_list_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = list_query_files(&dir.path().join("absent"), &CorpusPattern::default());
        assert!(matches!(result, Err(Error::Corpus { .. })));
    }

    #[test]
    fn test_read_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query6_4.sql");
        std::fs::write(&path, "\n   SELECT 1;  \n").unwrap();

        let query = Query::read(&path).unwrap();
        assert_eq!(query.id, "query6_4.sql");
        assert_eq!(query.text, "SELECT 1;");
    }

    #[test]
    fn test_extract_query_id() {
        assert_eq!(extract_query_id("-- query6_7.sql\nSELECT 1", DEFAULT_QUERY_PREFIX), "7");
        assert_eq!(
            extract_query_id("SELECT * FROM read('/q/query6_12.sql')", DEFAULT_QUERY_PREFIX),
            "12"
        );
        assert_eq!(extract_query_id("SELECT 1", DEFAULT_QUERY_PREFIX), UNKNOWN_QUERY_ID);
        assert_eq!(extract_query_id("query6_ with no suffix", DEFAULT_QUERY_PREFIX), UNKNOWN_QUERY_ID);
        assert_eq!(extract_query_id("query6_.sql", DEFAULT_QUERY_PREFIX), UNKNOWN_QUERY_ID);
    }
}
