//! Maps flat-file references in query text onto loaded tables.
//!
//! Corpus queries name their input by path, either through a
//! `read_csv_auto('<path>', ...)` table function or as a quoted `'<path>'`
//! table reference. Every flat file is preloaded into a table, so before
//! execution each such reference is replaced by the quoted table name.
//!
//! A path resolves when it matches a loaded file as given to the loader,
//! after canonicalisation, or by its trailing `<dir>/<file>` components.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use crate::dataset::{self, LoadedTable};

/// Table functions whose first argument is a flat-file path.
const TABLE_FUNCTIONS: &[&str] = &["read_csv_auto", "read_csv"];

/// Lookup from flat-file paths to the tables they were loaded into.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    by_path: HashMap<String, String>,
    tables: HashMap<String, String>,
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from the loader's output.
    pub fn from_tables<'a>(tables: impl IntoIterator<Item = &'a LoadedTable>) -> Self {
        let mut catalog = Self::new();
        for table in tables {
            catalog.register(&table.name, &table.source);
        }
        catalog
    }

    /// Register `source` as loaded into `table`.
    pub fn register(&mut self, table: &str, source: &Path) {
        self.by_path
            .insert(source.to_string_lossy().into_owned(), table.to_string());
        if let Ok(canonical) = std::fs::canonicalize(source) {
            self.by_path
                .insert(canonical.to_string_lossy().into_owned(), table.to_string());
        }
        self.tables.insert(table.to_lowercase(), table.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Table loaded from the file at `path`, if any.
    pub fn resolve(&self, path: &str) -> Option<&str> {
        if let Some(table) = self.by_path.get(path) {
            return Some(table);
        }
        if let Ok(canonical) = std::fs::canonicalize(path) {
            if let Some(table) = self.by_path.get(canonical.to_string_lossy().as_ref()) {
                return Some(table);
            }
        }

        let path = Path::new(path);
        if !path
            .extension()
            .is_some_and(|ext| ext == dataset::FLAT_FILE_EXTENSION)
        {
            return None;
        }
        let parent = path
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned());
        [
            parent.map(|parent| dataset::table_name(Some(&parent), path)),
            Some(dataset::table_name(None, path)),
        ]
        .into_iter()
        .flatten()
        .find_map(|name| self.tables.get(&name.to_lowercase()))
        .map(String::as_str)
    }

    /// Replace every resolvable flat-file reference in `sql` with its table.
    ///
    /// Unresolvable references, comments and double-quoted identifiers are
    /// left untouched.
    pub fn rewrite<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        if self.is_empty() {
            return Cow::Borrowed(sql);
        }

        let bytes = sql.as_bytes();
        let mut out = String::with_capacity(sql.len());
        let mut changed = false;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'\'' => {
                    let (literal, end) = string_literal(sql, i);
                    match self.resolve(&literal) {
                        Some(table) => {
                            out.push_str(&dataset::quote_identifier(table));
                            changed = true;
                        }
                        None => out.push_str(&sql[i..end]),
                    }
                    i = end;
                }
                b'"' => {
                    let end = quoted_end(bytes, i, b'"');
                    out.push_str(&sql[i..end]);
                    i = end;
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => {
                    let end = sql[i..].find('\n').map_or(bytes.len(), |n| i + n);
                    out.push_str(&sql[i..end]);
                    i = end;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    let end = sql[i + 2..].find("*/").map_or(bytes.len(), |n| i + 2 + n + 2);
                    out.push_str(&sql[i..end]);
                    i = end;
                }
                c if c.is_ascii_alphabetic() || c == b'_' => {
                    let end = word_end(bytes, i);
                    let word = &sql[i..end];
                    match self.table_function(sql, word, end) {
                        Some((table, call_end)) => {
                            out.push_str(&dataset::quote_identifier(table));
                            changed = true;
                            i = call_end;
                        }
                        None => {
                            out.push_str(word);
                            i = end;
                        }
                    }
                }
                _ => {
                    // Multi-byte characters are copied whole
                    let len = sql[i..].chars().next().map_or(1, char::len_utf8);
                    out.push_str(&sql[i..i + len]);
                    i += len;
                }
            }
        }

        if changed {
            Cow::Owned(out)
        } else {
            Cow::Borrowed(sql)
        }
    }

    /// Resolve a `name('<path>', ...)` call starting after `name`.
    ///
    /// Returns the table and the offset just past the closing parenthesis.
    fn table_function(&self, sql: &str, name: &str, after_name: usize) -> Option<(&str, usize)> {
        if !TABLE_FUNCTIONS
            .iter()
            .any(|function| function.eq_ignore_ascii_case(name))
        {
            return None;
        }

        let bytes = sql.as_bytes();
        let open = skip_whitespace(bytes, after_name);
        if bytes.get(open) != Some(&b'(') {
            return None;
        }
        let quote = skip_whitespace(bytes, open + 1);
        if bytes.get(quote) != Some(&b'\'') {
            return None;
        }

        let (literal, literal_end) = string_literal(sql, quote);
        let table = self.resolve(&literal)?;
        let close = closing_paren(bytes, literal_end)?;
        Some((table, close + 1))
    }
}

/// Decode the single-quoted literal starting at `start`.
///
/// Returns the unescaped contents and the offset just past the closing quote.
fn string_literal(sql: &str, start: usize) -> (String, usize) {
    let end = quoted_end(sql.as_bytes(), start, b'\'');
    let inner_end = if end > start + 1 && sql.as_bytes()[end - 1] == b'\'' {
        end - 1
    } else {
        end
    };
    (sql[start + 1..inner_end].replace("''", "'"), end)
}

/// Offset just past the quoted run opening at `start`, doubled quotes escaped.
fn quoted_end(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn word_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    i
}

fn skip_whitespace(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Offset of the parenthesis closing the call whose arguments resume at `start`.
fn closing_paren(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                i = quoted_end(bytes, i, b'\'');
                continue;
            }
            b'"' => {
                i = quoted_end(bytes, i, b'"');
                continue;
            }
            b'(' => depth += 1,
            b')' if depth == 0 => return Some(i),
            b')' => depth -= 1,
            _ => {}
        }
        i += 1;
    }
    None
}
