//! File records and the upstream line parser.
//!
//! A crawler emits one record per line with fields joined by a delimiter:
//!
//! ```text
//! path|size|type[|CHILDREN|<count>][|HIDDEN][|HASH|<digest>][|LINK|<target>]
//! ```
//!
//! `path`, `size` and `type` are required and positional. The trailing tokens are tagged and may
//! appear in any order. A line that doesn't fit is rejected with [`RecordError::Malformed`] and
//! ingestion carries on with the next line.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rbtree::RbTree;

/// Type tag which marks a directory record.
pub const DIR_TYPE: &str = "T_DIR";

/// Record parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The line could not be turned into a record
    #[error("malformed record ({reason}): {line:?}")]
    Malformed {
        /// The offending line
        line: String,
        /// What was wrong with it
        reason: &'static str,
    },
}

impl RecordError {
    fn malformed(line: &str, reason: &'static str) -> Self {
        RecordError::Malformed {
            line: line.to_string(),
            reason,
        }
    }
}

/// Whether a record is a symbolic link and, if so, what it points at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum LinkKind {
    /// Not a link.
    #[default]
    None,
    /// A link to a file.
    File,
    /// A link to a directory.
    Dir,
}

impl From<LinkKind> for u8 {
    fn from(kind: LinkKind) -> u8 {
        match kind {
            LinkKind::None => 0,
            LinkKind::File => 1,
            LinkKind::Dir => 2,
        }
    }
}

impl TryFrom<u8> for LinkKind {
    type Error = String;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(LinkKind::None),
            1 => Ok(LinkKind::File),
            2 => Ok(LinkKind::Dir),
            other => Err(format!("invalid link kind: {other}")),
        }
    }
}

/// Delimiter and tag configuration for the upstream line format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordFormat {
    /// Separates every field and token on a line. May be more than one character.
    pub delimiter: String,
    /// Precedes the child count of a directory.
    pub children_tag: String,
    /// Marks a hidden entry. Takes no value.
    pub hidden_tag: String,
    /// Precedes a content digest.
    pub hash_tag: String,
    /// Precedes a link target.
    pub link_tag: String,
    /// The type tag given to directories.
    pub dir_type: String,
}

impl Default for RecordFormat {
    fn default() -> Self {
        Self {
            delimiter: "|".to_string(),
            children_tag: "CHILDREN".to_string(),
            hidden_tag: "HIDDEN".to_string(),
            hash_tag: "HASH".to_string(),
            link_tag: "LINK".to_string(),
            dir_type: DIR_TYPE.to_string(),
        }
    }
}

impl RecordFormat {
    /// The default format with a different delimiter.
    pub fn with_delimiter(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
            ..Default::default()
        }
    }
}

/// One filesystem entry. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    name: String,
    size: u64,
    path: String,
    kind: String,
    hash: Option<String>,
    link_target: Option<String>,
    hidden: bool,
    dir: bool,
    link: LinkKind,
    children: u64,
}

impl FileRecord {
    /// Create a record from its three required fields.
    ///
    /// The name is the last segment of `path`. A `kind` of [`DIR_TYPE`] marks a directory.
    pub fn new(
        path: impl Into<String>,
        size: u64,
        kind: impl Into<String>,
    ) -> Result<Self, RecordError> {
        let path = path.into();
        let kind = kind.into();
        let name = match derive_name(&path) {
            Some(name) => name.to_string(),
            None => return Err(RecordError::malformed(&path, "missing path")),
        };
        if kind.is_empty() {
            return Err(RecordError::malformed(&path, "missing type"));
        }
        let dir = kind == DIR_TYPE;
        Ok(Self {
            name,
            size,
            path,
            kind,
            hash: None,
            link_target: None,
            hidden: false,
            dir,
            link: LinkKind::None,
            children: 0,
        })
    }

    /// Attach a content digest.
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// Mark the record as a link to `target`.
    pub fn with_link_target(mut self, target: impl Into<String>) -> Self {
        self.link_target = Some(target.into());
        self.link = if self.dir {
            LinkKind::Dir
        } else {
            LinkKind::File
        };
        self
    }

    /// Mark the record as hidden (or not).
    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    /// Set the number of children. Ignored unless the record is a directory.
    pub fn with_children(mut self, children: u64) -> Self {
        if self.dir {
            self.children = children;
        }
        self
    }

    /// Parse one line of crawler output.
    pub fn parse(line: &str, format: &RecordFormat) -> Result<Self, RecordError> {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            return Err(RecordError::malformed(line, "empty line"));
        }
        if format.delimiter.is_empty() {
            return Err(RecordError::malformed(line, "empty delimiter"));
        }
        let mut fields = line.split(format.delimiter.as_str());

        let path = fields
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| RecordError::malformed(line, "missing path"))?;
        let size = fields
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RecordError::malformed(line, "missing size"))?
            .parse::<u64>()
            .map_err(|_| RecordError::malformed(line, "size is not a non-negative integer"))?;
        let kind = fields
            .next()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RecordError::malformed(line, "missing type"))?;

        let mut record = FileRecord::new(path, size, kind)
            .map_err(|_| RecordError::malformed(line, "missing path"))?;
        record.dir = kind == format.dir_type;

        let mut link_target = None;
        while let Some(token) = fields.next() {
            if token.is_empty() {
                // Tolerate a trailing delimiter
                continue;
            }
            if token == format.hidden_tag {
                record.hidden = true;
            } else if token == format.children_tag {
                if !record.dir {
                    return Err(RecordError::malformed(
                        line,
                        "child count on a non-directory",
                    ));
                }
                record.children = fields
                    .next()
                    .and_then(|count| count.parse::<u64>().ok())
                    .ok_or_else(|| RecordError::malformed(line, "bad child count"))?;
            } else if token == format.hash_tag {
                let hash = fields
                    .next()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| RecordError::malformed(line, "missing hash"))?;
                record.hash = Some(hash.to_string());
            } else if token == format.link_tag {
                let target = fields
                    .next()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| RecordError::malformed(line, "missing link target"))?;
                link_target = Some(target);
            } else {
                return Err(RecordError::malformed(line, "unknown token"));
            }
        }
        if let Some(target) = link_target {
            record = record.with_link_target(target);
        }
        Ok(record)
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Full path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Type tag.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Content digest, if known.
    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// Link target, if this is a link.
    pub fn link_target(&self) -> Option<&str> {
        self.link_target.as_deref()
    }

    /// Is this a hidden entry?
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Is this a directory?
    pub fn is_dir(&self) -> bool {
        self.dir
    }

    /// Link classification.
    pub fn link(&self) -> LinkKind {
        self.link
    }

    /// Number of children. Always 0 for non-directories.
    pub fn children(&self) -> u64 {
        self.children
    }

    /// Render the record as an upstream line in `format`.
    pub fn to_line(&self, format: &RecordFormat) -> String {
        let sep = &format.delimiter;
        let mut line = format!("{}{sep}{}{sep}{}", self.path, self.size, self.kind);
        if self.dir {
            line.push_str(&format!("{sep}{}{sep}{}", format.children_tag, self.children));
        }
        if self.hidden {
            line.push_str(&format!("{sep}{}", format.hidden_tag));
        }
        if let Some(hash) = &self.hash {
            line.push_str(&format!("{sep}{}{sep}{hash}", format.hash_tag));
        }
        if let Some(target) = &self.link_target {
            line.push_str(&format!("{sep}{}{sep}{target}", format.link_tag));
        }
        line
    }

    /// A decoded record must still satisfy the construction invariants.
    pub(crate) fn is_well_formed(&self) -> bool {
        !self.name.is_empty() && !self.path.is_empty() && !self.kind.is_empty()
    }
}

fn derive_name(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        // The root directory is its own name
        return Some("/");
    }
    trimmed.rsplit('/').next().filter(|name| !name.is_empty())
}

/// Outcome of an ingestion run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Records inserted into the tree
    pub inserted: usize,
    /// Malformed lines which were skipped
    pub skipped: usize,
}

/// Parse every line from `reader` and insert the good ones into `tree`.
///
/// Malformed lines are logged and skipped. Blank lines are ignored. Read errors are returned.
pub fn ingest<R: BufRead>(
    mut reader: R,
    format: &RecordFormat,
    tree: &mut RbTree,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut buf = Vec::new();
    let mut number = 0;
    loop {
        buf.clear();
        number += 1;
        let read = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("reading record line {number}"))?;
        if read == 0 {
            break;
        }
        // Paths are arbitrary bytes, so a line which isn't UTF-8 is bad input, not an I/O error
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(line = number, "skipping record: not valid UTF-8: {e}");
                report.skipped += 1;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match FileRecord::parse(line, format) {
            Ok(record) => {
                tree.insert(record);
                report.inserted += 1;
            }
            Err(e) => {
                tracing::warn!(line = number, "skipping record: {e}");
                report.skipped += 1;
            }
        }
    }
    tracing::info!(
        inserted = report.inserted,
        skipped = report.skipped,
        "ingested records"
    );
    Ok(report)
}

/// Ingest a whole record file.
pub fn ingest_file<P: AsRef<Path>>(
    source: P,
    format: &RecordFormat,
    tree: &mut RbTree,
) -> Result<IngestReport> {
    let path = source.as_ref();
    let file =
        File::open(path).with_context(|| format!("opening record file {}", path.display()))?;
    ingest(BufReader::new(file), format, tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::rbtree::KeyKind;

    #[test]
    fn it_parses_required_fields() {
        let record =
            FileRecord::parse("/a/x.txt|10|T_TEXT", &RecordFormat::default()).expect("parses");
        assert_eq!(record.name(), "x.txt");
        assert_eq!(record.size(), 10);
        assert_eq!(record.path(), "/a/x.txt");
        assert_eq!(record.kind(), "T_TEXT");
        assert!(!record.is_dir());
        assert!(!record.is_hidden());
        assert_eq!(record.link(), LinkKind::None);
        assert_eq!(record.hash(), None);
    }

    #[test]
    fn it_renders_parsable_lines() {
        let format = RecordFormat::with_delimiter("::");
        let line = "/srv/data::4096::T_DIR::HASH::ab12::HIDDEN::CHILDREN::3::LINK::/mnt/data";
        let record = FileRecord::parse(line, &format).expect("parses");
        let rendered = record.to_line(&format);
        assert_eq!(
            rendered,
            "/srv/data::4096::T_DIR::CHILDREN::3::HIDDEN::HASH::ab12::LINK::/mnt/data"
        );
        assert_eq!(FileRecord::parse(&rendered, &format).expect("parses"), record);
    }

    #[test]
    fn it_parses_tagged_tokens_in_any_order() {
        let format = RecordFormat::default();
        let record = FileRecord::parse("/a/.cache|4096|T_DIR|HIDDEN|CHILDREN|12\n", &format)
            .expect("parses");
        assert!(record.is_dir());
        assert!(record.is_hidden());
        assert_eq!(record.children(), 12);

        let record =
            FileRecord::parse("/a/.cache|4096|T_DIR|CHILDREN|12|HIDDEN", &format).expect("parses");
        assert!(record.is_hidden());
        assert_eq!(record.children(), 12);
    }

    #[test]
    fn it_parses_hash_and_link() {
        let format = RecordFormat::default();
        let record = FileRecord::parse("/a/l|7|T_TEXT|LINK|/b/target|HASH|d41d8cd9", &format)
            .expect("parses");
        assert_eq!(record.link(), LinkKind::File);
        assert_eq!(record.link_target(), Some("/b/target"));
        assert_eq!(record.hash(), Some("d41d8cd9"));

        let record = FileRecord::parse("/a/d|0|T_DIR|LINK|/b", &format).expect("parses");
        assert_eq!(record.link(), LinkKind::Dir);
    }

    #[test]
    fn it_parses_multi_character_delimiters() {
        let format = RecordFormat::with_delimiter("<|>");
        let record = FileRecord::parse("/x/y z|5|T_TEXT<|>HIDDEN", &format);
        assert!(record.is_err());
        let record = FileRecord::parse("/x/y z<|>5<|>T_TEXT<|>HIDDEN", &format).expect("parses");
        assert_eq!(record.name(), "y z");
        assert!(record.is_hidden());
    }

    #[test]
    fn it_rejects_missing_size() {
        let err = FileRecord::parse("/a/w.txt|T_TEXT", &RecordFormat::default())
            .expect_err("size is missing");
        assert!(matches!(err, RecordError::Malformed { .. }));
    }

    #[test]
    fn it_rejects_bad_lines() {
        let format = RecordFormat::default();
        for line in [
            "",
            "|10|T_TEXT",
            "/a|-1|T_TEXT",
            "/a|ten|T_TEXT",
            "/a|10",
            "/a|10|",
            "/a|10|T_TEXT|CHILDREN|3",
            "/a|10|T_DIR|CHILDREN",
            "/a|10|T_DIR|CHILDREN|many",
            "/a|10|T_TEXT|HASH",
            "/a|10|T_TEXT|BOGUS",
        ] {
            assert!(
                FileRecord::parse(line, &format).is_err(),
                "line should be rejected: {line:?}"
            );
        }
    }

    #[test]
    fn it_derives_names() {
        assert_eq!(derive_name("/a/b/c.txt"), Some("c.txt"));
        assert_eq!(derive_name("/a/b/"), Some("b"));
        assert_eq!(derive_name("relative"), Some("relative"));
        assert_eq!(derive_name("/"), Some("/"));
        assert_eq!(derive_name(""), None);
    }

    #[test]
    fn it_ignores_children_on_files() {
        let record = FileRecord::new("/a", 1, "T_TEXT")
            .expect("valid")
            .with_children(4);
        assert_eq!(record.children(), 0);
        let record = FileRecord::new("/a", 1, DIR_TYPE)
            .expect("valid")
            .with_children(4);
        assert_eq!(record.children(), 4);
    }

    #[test_log::test]
    fn it_ingests_with_partial_success() {
        let input = "/a/x.txt|10|T_TEXT\n/a/w.txt|T_TEXT\n\n/a/y.txt|20|T_TEXT\n";
        let mut tree = RbTree::new(KeyKind::Name);
        let report =
            ingest(input.as_bytes(), &RecordFormat::default(), &mut tree).expect("ingests");
        assert_eq!(
            report,
            IngestReport {
                inserted: 2,
                skipped: 1
            }
        );
        assert_eq!(tree.len(), 2);
    }

    #[test_log::test]
    fn it_skips_non_utf8_lines() {
        let input: &[u8] = b"/a/x.txt|10|T_TEXT\n/a/caf\xE9.txt|7|T_TEXT\n/a/y.txt|20|T_TEXT";
        let mut tree = RbTree::new(KeyKind::Name);
        let report = ingest(input, &RecordFormat::default(), &mut tree).expect("ingests");
        assert_eq!(
            report,
            IngestReport {
                inserted: 2,
                skipped: 1
            }
        );
        let names: Vec<_> = tree.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["x.txt", "y.txt"]);
    }
}
