//! Label/attribute string dictionaries (spec §4.4's dictionary chunk).
//!
//! Building these tables from a training corpus is an external
//! collaborator's job (spec §1c) — this module only defines the trait the
//! model file layer reads/writes against, plus an in-memory default
//! implementation sufficient to round-trip the chunk.

use crate::error::{CrfError, CrfResult};

/// A bidirectional id↔string table. `id` is a dense `0..len()` index, the
/// same space `FeatureDescriptor`'s label/attribute ids live in.
pub trait StringDictionary {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn get(&self, id: u32) -> Option<&str>;
    fn id_of(&self, s: &str) -> Option<u32>;
}

/// `Vec<String>`-backed dictionary, indexed by position.
#[derive(Debug, Clone, Default)]
pub struct VecDictionary {
    entries: Vec<String>,
}

impl VecDictionary {
    pub fn new(entries: Vec<String>) -> Self {
        VecDictionary { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Encode as the chunk's `{len: u32, bytes: [u8; len]}` sequence.
    pub fn to_chunk_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
            out.extend_from_slice(entry.as_bytes());
        }
        out
    }

    /// Decode `num_entries` consecutive `{len, bytes}` records.
    pub fn from_chunk_bytes(bytes: &[u8], num_entries: usize) -> CrfResult<Self> {
        let mut entries = Vec::with_capacity(num_entries);
        let mut cursor = 0usize;
        for _ in 0..num_entries {
            if cursor + 4 > bytes.len() {
                return Err(CrfError::InvalidModelFile("dictionary chunk truncated".into()));
            }
            let len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            if cursor + len > bytes.len() {
                return Err(CrfError::InvalidModelFile("dictionary chunk truncated".into()));
            }
            let s = std::str::from_utf8(&bytes[cursor..cursor + len])
                .map_err(|e| CrfError::InvalidModelFile(format!("dictionary entry is not UTF-8: {e}")))?;
            entries.push(s.to_string());
            cursor += len;
        }
        Ok(VecDictionary { entries })
    }
}

impl StringDictionary for VecDictionary {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, id: u32) -> Option<&str> {
        self.entries.get(id as usize).map(String::as_str)
    }

    fn id_of(&self, s: &str) -> Option<u32> {
        self.entries.iter().position(|e| e == s).map(|i| i as u32)
    }
}
