//! References to other archive versions, stored inside an archive.
//!
//! A reference names an archive a resolver can fetch: another version of
//! this archive in a local store, or one published under a remote key. An
//! [`ExternalRefs`] list under the `PARENT_REFERENCES` root object records
//! which versions an archive was derived from.

use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, AuditResult};

/// A version held by the local archive store.
pub const KIND_LOCAL: u8 = 1;
/// A version published under an external key.
pub const KIND_REMOTE: u8 = 2;

const MAX_KIND: u8 = 127;
const MAX_KEY_LEN: usize = 32767;
const MAX_REFS: usize = 127;

/// One resolvable archive name: a small integer kind plus an opaque key.
///
/// Orders by `(kind, key)` so reference lists always serialize to the same
/// bytes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    kind: u8,
    key: String,
}

impl Reference {
    pub fn new(kind: u8, key: impl Into<String>) -> AuditResult<Self> {
        let key = key.into();
        if kind > MAX_KIND {
            return Err(AuditError::InvalidReference(format!(
                "kind {kind} out of range [0, {MAX_KIND}]"
            )));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(AuditError::InvalidReference(format!(
                "key of {} bytes too long",
                key.len()
            )));
        }
        Ok(Self { kind, key })
    }

    /// The version being worked on right now, not yet published anywhere.
    pub fn current_archive() -> Self {
        Self {
            kind: KIND_LOCAL,
            key: "current_archive".to_string(),
        }
    }

    /// The version before the first: walking past it means history is
    /// exhausted.
    pub fn null_archive() -> Self {
        Self {
            kind: KIND_LOCAL,
            key: "null_archive".to_string(),
        }
    }

    pub fn kind(&self) -> u8 {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]:{}", self.kind, self.key)
    }
}

/// A sorted, bounded list of references.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRefs {
    refs: Vec<Reference>,
}

impl ExternalRefs {
    pub fn from_refs(mut refs: Vec<Reference>) -> AuditResult<Self> {
        if refs.len() > MAX_REFS {
            return Err(AuditError::InvalidReference(format!(
                "{} refs exceed the limit of {MAX_REFS}",
                refs.len()
            )));
        }
        refs.sort();
        Ok(Self { refs })
    }

    /// The empty list.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build a list of same-kind references from raw keys.
    pub fn create<I, S>(keys: I, kind: u8) -> AuditResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let refs = keys
            .into_iter()
            .map(|key| Reference::new(kind, key))
            .collect::<AuditResult<Vec<Reference>>>()?;
        Self::from_refs(refs)
    }

    pub fn refs(&self) -> &[Reference] {
        &self.refs
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Reference> {
        self.refs.iter()
    }

    /// Serialize: a count byte, then per reference a kind byte, a big-
    /// endian u16 key length, and the UTF-8 key.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.refs.len() as u8);
        for reference in &self.refs {
            out.push(reference.kind);
            let raw = reference.key.as_bytes();
            out.extend_from_slice(&(raw.len() as u16).to_be_bytes());
            out.extend_from_slice(raw);
        }
        out
    }

    pub fn from_bytes(source: &mut dyn Read) -> AuditResult<ExternalRefs> {
        let count = read_u8(source)?;
        if count as usize > MAX_REFS {
            return Err(AuditError::Malformed(format!(
                "ref count {count} out of range [0, {MAX_REFS}]"
            )));
        }

        let mut refs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let kind = read_u8(source)?;
            let length = {
                let mut buf = [0u8; 2];
                source.read_exact(&mut buf)?;
                u16::from_be_bytes(buf) as usize
            };
            if length > MAX_KEY_LEN {
                return Err(AuditError::Malformed(format!(
                    "key length {length} out of range [0, {MAX_KEY_LEN}]"
                )));
            }
            let mut raw = vec![0u8; length];
            source.read_exact(&mut raw)?;
            let key = String::from_utf8(raw)
                .map_err(|_| AuditError::Malformed("reference key is not UTF-8".to_string()))?;
            refs.push(Reference::new(kind, key)?);
        }
        ExternalRefs::from_refs(refs)
    }
}

impl<'a> IntoIterator for &'a ExternalRefs {
    type Item = &'a Reference;
    type IntoIter = std::slice::Iter<'a, Reference>;

    fn into_iter(self) -> Self::IntoIter {
        self.refs.iter()
    }
}

fn read_u8(source: &mut dyn Read) -> AuditResult<u8> {
    let mut buf = [0u8; 1];
    source.read_exact(&mut buf)?;
    Ok(buf[0])
}
