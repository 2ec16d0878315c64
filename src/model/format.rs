//! On-disk record types for the chunked binary model format (spec §4.4).
//!
//! The fixed-size header and the ref-chunk offset tables are reinterpreted
//! in place via `bytemuck` — every field is written so the struct has no
//! implicit padding, which is what lets `bytemuck::Pod` read a byte slice
//! back without a copy. The feature list, which is the one chunk whose
//! payload is naturally "a Rust collection persisted whole" rather than a
//! fixed record table, goes through `rkyv` instead, the same way the
//! teacher's replay buffer archives `BuildResult` values.

use crate::context::GraphKind;
use crate::error::{CrfError, CrfResult};
use crate::feature::{FeatureDescriptor, FeatureKind};

pub const MAGIC: [u8; 4] = *b"lCRF";
pub const FORMAT_VERSION: u32 = 1;

pub const FEATURES_CHUNK_TAG: [u8; 4] = *b"FEAT";
pub const REF_CHUNK_TAG: [u8; 4] = *b"REFS";
pub const DICT_CHUNK_TAG: [u8; 4] = *b"DICT";
pub const SM_CHUNK_TAG: [u8; 4] = *b"SEMT";

pub fn type_tag(kind: GraphKind) -> [u8; 4] {
    match kind {
        GraphKind::Chain => *b"CHN\0",
        GraphKind::Tree => *b"TREE",
        GraphKind::SemiMarkov => *b"SEMM",
    }
}

pub fn kind_from_tag(tag: [u8; 4]) -> CrfResult<GraphKind> {
    match &tag {
        b"CHN\0" => Ok(GraphKind::Chain),
        b"TREE" => Ok(GraphKind::Tree),
        b"SEMM" => Ok(GraphKind::SemiMarkov),
        _ => Err(CrfError::InvalidModelFile(format!(
            "unrecognized type tag {:?}",
            tag
        ))),
    }
}

/// Fixed 88-byte file header (spec §4.4). Field order is chosen so every
/// `u64` lands on an 8-byte boundary with no compiler-inserted padding —
/// required for `bytemuck::Pod`.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RawHeader {
    pub magic: [u8; 4],
    pub type_tag: [u8; 4],
    pub version: u32,
    pub num_features: u32,
    pub num_labels: u32,
    pub num_attrs: u32,
    pub num_source_states: u32,
    pub _reserved: u32,
    pub size: u64,
    pub off_features: u64,
    pub off_labels_dict: u64,
    pub off_attrs_dict: u64,
    pub off_label_refs: u64,
    pub off_attr_refs: u64,
    /// `0` when the model has no semi-Markov table.
    pub off_semi_markov: u64,
}

impl RawHeader {
    pub fn validate(&self) -> CrfResult<()> {
        if self.magic != MAGIC {
            return Err(CrfError::InvalidModelFile("bad magic".into()));
        }
        if self.version != FORMAT_VERSION {
            return Err(CrfError::InvalidModelFile(format!(
                "unsupported format version {}",
                self.version
            )));
        }
        kind_from_tag(self.type_tag)?;
        Ok(())
    }
}

/// Header shared by the two ref chunks (attribute-refs and source-refs);
/// `num` `u64` offsets follow immediately, each pointing at a
/// `{num_fids: u32, fid: [u32; num_fids]}` block.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RefChunkHeader {
    pub chunk_tag: [u8; 4],
    pub num: u32,
    pub size: u64,
}

/// One persisted feature (spec §4.4's `{type, src, dst, weight}` record).
/// Kept POD-sized for the rkyv archive to place inline rather than behind
/// an indirection.
#[derive(Debug, Clone, Copy, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct FeatureRecord {
    pub kind: u8,
    pub src: u32,
    pub dst: u32,
    pub weight: f64,
}

impl FeatureRecord {
    pub fn new(descriptor: &FeatureDescriptor, weight: f64) -> Self {
        FeatureRecord {
            kind: match descriptor.kind {
                FeatureKind::State => 0,
                FeatureKind::Transition => 1,
            },
            src: descriptor.src,
            dst: descriptor.dst,
            weight,
        }
    }

    pub fn kind(&self) -> CrfResult<FeatureKind> {
        match self.kind {
            0 => Ok(FeatureKind::State),
            1 => Ok(FeatureKind::Transition),
            other => Err(CrfError::InvalidModelFile(format!(
                "unrecognized feature record kind tag {other}"
            ))),
        }
    }
}

/// Per-state semi-Markov table record (spec §4.4's `off_states[num_states]`
/// entries): the forward transitions out of one state, one `(label,
/// next_state, pattern)` triple per label.
#[derive(Debug, Clone, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct SemiMarkovStateRecord {
    pub next_state: Vec<u32>,
    pub pattern: Vec<u32>,
}

/// The semi-Markov table chunk payload (spec §4.4).
#[derive(Debug, Clone, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct SemiMarkovChunk {
    pub max_order: u32,
    pub num_labels: u32,
    pub num_states: u32,
    pub num_bkw_states: u32,
    pub max_seg_len: Option<u32>,
    pub initial_state: u32,
    pub pattern_to_last_label: Vec<u32>,
    pub pattern_to_src_state: Vec<u32>,
    pub states: Vec<SemiMarkovStateRecord>,
    pub backward_next_state: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_has_no_padding() {
        assert_eq!(std::mem::size_of::<RawHeader>(), 88);
    }

    #[test]
    fn type_tag_roundtrips() {
        for kind in [GraphKind::Chain, GraphKind::Tree, GraphKind::SemiMarkov] {
            assert_eq!(kind_from_tag(type_tag(kind)).unwrap(), kind);
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        assert!(kind_from_tag(*b"XXXX").is_err());
    }
}
