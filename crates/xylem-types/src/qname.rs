//! Qualified names and the name-dictionary hash.

use std::fmt;

use xxhash_rust::xxh3::xxh3_64;

use crate::NameKey;

/// A qualified name: optional prefix, local part, namespace URI.
///
/// For a namespace declaration node, `local` carries the declared prefix and
/// `uri` the namespace URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub uri: String,
}

impl QName {
    /// A name in no namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local: local.into(),
            uri: String::new(),
        }
    }

    /// A fully qualified name.
    pub fn new(
        prefix: impl Into<String>,
        local: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: if prefix.is_empty() { None } else { Some(prefix) },
            local: local.into(),
            uri: uri.into(),
        }
    }

    /// The dictionary form: `prefix:local`, or just `local` without prefix.
    pub fn build_name(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local),
            None => self.local.clone(),
        }
    }

    /// Split a dictionary form back into prefix and local part.
    pub fn from_built_name(built: &str, uri: impl Into<String>) -> Self {
        match built.split_once(':') {
            Some((p, l)) => Self {
                prefix: Some(p.to_owned()),
                local: l.to_owned(),
                uri: uri.into(),
            },
            None => Self {
                prefix: None,
                local: built.to_owned(),
                uri: uri.into(),
            },
        }
    }

    /// Whether prefix and local part satisfy the XML Name production.
    ///
    /// Enforced pragmatically: NCName rules over ASCII plus any non-ASCII
    /// alphanumeric character.
    pub fn is_valid(&self) -> bool {
        if !is_ncname(&self.local) {
            return false;
        }
        match &self.prefix {
            Some(p) => is_ncname(p),
            None => true,
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build_name())
    }
}

fn is_name_start_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic() || (!c.is_ascii() && c.is_alphabetic())
}

fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || c == '-'
        || c == '.'
        || c.is_ascii_digit()
        || (!c.is_ascii() && c.is_numeric())
}

fn is_ncname(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_name_start_char(c) => chars.all(is_name_char),
        _ => false,
    }
}

/// 32-bit name-dictionary hash of a string.
///
/// The dictionary keys every registered name by this hash; collisions within
/// one kind map to the same entry, matching the fixed-width name-page slot.
pub fn name_hash(text: &str) -> NameKey {
    NameKey::new(xxh3_64(text.as_bytes()) as u32)
}
