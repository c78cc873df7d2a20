use crate::{RegistryError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One persisted `name -> id` assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub id: u32,
}

/// Backing text file of a registry, one `name<TAB>id` pair per line.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every well-formed entry in file order. A missing file is an empty registry.
    pub fn load(&self) -> Result<Vec<Entry>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RegistryError::io(&self.path, e)),
        };
        Ok(parse_entries(&raw, &self.path))
    }

    /// Rewrite the whole file. The new contents are written beside the target
    /// and renamed over it so a crash never leaves a truncated table.
    pub fn save<'a>(&self, entries: impl IntoIterator<Item = &'a Entry>) -> Result<()> {
        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&escape_name(&entry.name));
            buf.push('\t');
            buf.push_str(&entry.id.to_string());
            buf.push('\n');
        }
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| RegistryError::io(&tmp, e))?;
        file.write_all(buf.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| RegistryError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| RegistryError::io(&self.path, e))
    }
}

/// Names may contain any character; backslash, tab and line breaks are
/// written as two-character escapes so each entry stays on one line.
fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parse `name<TAB>id` lines, skipping blank and malformed ones. The name is
/// taken verbatim up to the last tab; files without tabs fall back to the last
/// run of whitespace.
pub fn parse_entries(raw: &str, source: &Path) -> Vec<Entry> {
    let mut out = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let split = match line.rsplit_once('\t') {
            Some(pair) => Some(pair),
            None => line
                .trim()
                .rsplit_once(char::is_whitespace)
                .map(|(name, id)| (name.trim_end(), id)),
        };
        let parsed = split.and_then(|(name, id)| {
            let id = id.trim().parse::<u32>().ok()?;
            (!name.is_empty()).then(|| Entry {
                name: unescape_name(name),
                id,
            })
        });
        match parsed {
            Some(entry) => out.push(entry),
            None => warn!(
                "skipping malformed registry line {}:{}: {line:?}",
                source.display(),
                lineno + 1
            ),
        }
    }
    out
}
