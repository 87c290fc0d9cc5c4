//! Index keys

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::record::FileRecord;

/// The field a tree is ordered by. Fixed for the lifetime of a tree.
#[derive(Clone, Copy, Debug, Display, EnumString, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
#[serde(into = "u8", try_from = "u8")]
pub enum KeyKind {
    /// Order by file name.
    Name,
    /// Order by size in bytes.
    Size,
    /// Order by full path.
    Path,
}

impl KeyKind {
    /// Compare two records by this key.
    #[inline]
    pub fn compare(self, a: &FileRecord, b: &FileRecord) -> Ordering {
        match self {
            KeyKind::Name => a.name().cmp(b.name()),
            KeyKind::Size => a.size().cmp(&b.size()),
            KeyKind::Path => a.path().cmp(b.path()),
        }
    }

    /// Shared memory segment prefix used for indexes of this kind.
    pub fn segment_prefix(self) -> &'static str {
        match self {
            KeyKind::Name => "rbt_name_",
            KeyKind::Size => "rbt_size_",
            KeyKind::Path => "rbt_path_",
        }
    }
}

impl From<KeyKind> for u8 {
    fn from(key: KeyKind) -> u8 {
        match key {
            KeyKind::Name => 0,
            KeyKind::Size => 1,
            KeyKind::Path => 2,
        }
    }
}

impl TryFrom<u8> for KeyKind {
    type Error = String;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(KeyKind::Name),
            1 => Ok(KeyKind::Size),
            2 => Ok(KeyKind::Path),
            other => Err(format!("invalid key kind: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::str::FromStr;

    #[test]
    fn it_parses_key_kinds() {
        assert_eq!(KeyKind::from_str("NAME").expect("parses"), KeyKind::Name);
        assert_eq!(KeyKind::from_str("size").expect("parses"), KeyKind::Size);
        assert!(KeyKind::from_str("colour").is_err());
        assert_eq!(KeyKind::Path.to_string(), "path");
    }

    #[test]
    fn it_compares_by_key() {
        let small = FileRecord::new("/z/small", 1, "T_TEXT").expect("valid");
        let large = FileRecord::new("/a/large", 100, "T_TEXT").expect("valid");
        assert_eq!(KeyKind::Name.compare(&small, &large), Ordering::Greater);
        assert_eq!(KeyKind::Size.compare(&small, &large), Ordering::Less);
        assert_eq!(KeyKind::Path.compare(&small, &large), Ordering::Greater);
    }
}
