//! Conversion between keys and their surrogate forms.
//!
//! Tokens are URL-safe unpadded base64 over a length-prefixed binary path:
//!
//! ```text
//! version:u8 segments:u64 { kind_len:u64 kind tag:u8 [id:i64 | name_len:u64 name] }*
//! ```

use super::{IdOrName, Key, KeyId, KeySegment};
use crate::core::{MapperError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

const TOKEN_VERSION: u8 = 1;

const TAG_INCOMPLETE: u8 = 0;
const TAG_ID: u8 = 1;
const TAG_NAME: u8 = 2;

/// Decodes a token produced by [`key_to_string`].
pub fn string_to_key(token: &str) -> Result<Key> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|e| MapperError::MalformedKey(format!("'{}' is not a key token: {}", token, e)))?;

    let mut reader = TokenReader::new(&bytes);
    let version = reader.u8()?;
    if version != TOKEN_VERSION {
        return Err(MapperError::MalformedKey(format!("unsupported token version {}", version)));
    }

    let count = reader.len()?;
    let mut path = Vec::with_capacity(count.min(reader.remaining()));
    for _ in 0..count {
        let kind = reader.string()?;
        let id = match reader.u8()? {
            TAG_INCOMPLETE => KeyId::Incomplete,
            TAG_ID => KeyId::Id(reader.i64()?),
            TAG_NAME => KeyId::Name(reader.string()?),
            other => {
                return Err(MapperError::MalformedKey(format!("unknown identifier tag {}", other)));
            }
        };
        path.push(KeySegment { kind, id });
    }
    reader.finish()?;

    Key::from_path(path).map_err(|e| MapperError::MalformedKey(e.to_string()))
}

/// Encodes a key as an opaque, URL-safe token.
pub fn key_to_string(key: &Key) -> String {
    let mut out = Vec::with_capacity(16 * key.path.len());
    out.push(TOKEN_VERSION);
    put_len(&mut out, key.path.len());
    for seg in &key.path {
        put_str(&mut out, &seg.kind);
        match &seg.id {
            KeyId::Incomplete => out.push(TAG_INCOMPLETE),
            KeyId::Id(id) => {
                out.push(TAG_ID);
                out.extend_from_slice(&id.to_le_bytes());
            }
            KeyId::Name(name) => {
                out.push(TAG_NAME);
                put_str(&mut out, name);
            }
        }
    }
    URL_SAFE_NO_PAD.encode(out)
}

/// Builds a complete key: numeric identifiers give id keys, text gives named keys.
pub fn create_key(parent: Option<&Key>, kind: &str, id_or_name: impl Into<IdOrName>) -> Result<Key> {
    Key::new(parent, kind, id_or_name)
}

/// Ancestor path minus the last segment, or `None` for a root key.
pub fn derive_parent(key: &Key) -> Option<Key> {
    if key.path.len() < 2 {
        return None;
    }
    Some(Key {
        path: key.path[..key.path.len() - 1].to_vec(),
    })
}

fn put_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_le_bytes());
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    put_len(out, s.len());
    out.extend_from_slice(s.as_bytes());
}

struct TokenReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> TokenReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.bytes.len());
        let Some(end) = end else {
            return Err(MapperError::MalformedKey("truncated key token".to_string()));
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn len(&mut self) -> Result<usize> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        usize::try_from(u64::from_le_bytes(buf))
            .map_err(|_| MapperError::MalformedKey("length does not fit in memory".to_string()))
    }

    fn i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.len()?;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| MapperError::MalformedKey("key token contains invalid UTF-8".to_string()))
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.bytes.len() {
            return Err(MapperError::MalformedKey("trailing bytes in key token".to_string()));
        }
        Ok(())
    }
}
