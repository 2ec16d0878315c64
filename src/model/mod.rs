//! Chunked binary model format: `ModelWriter`/`ModelReader` (spec §4.4).
//!
//! Layout on disk, in write order: `RawHeader`, features chunk, labels
//! dictionary chunk, attributes dictionary chunk, source-refs chunk,
//! attribute-refs chunk, and (semi-Markov only) the state-table chunk.
//! Every offset in the header is absolute from the start of the file, so
//! reading any one chunk is an O(1) slice into the loaded buffer — there
//! is no `mmap` dependency in this stack, so "zero-copy" here means no
//! further allocation once the file is in memory, not a memory-mapped
//! view of it.

pub mod dictionary;
pub mod format;

use std::path::Path;

use crate::context::GraphKind;
use crate::error::{CrfError, CrfResult};
use crate::feature::{FeatureDescriptor, FeatureIndex, FeatureKind, FeatureRefs, SemiMarkovTables};

use dictionary::{StringDictionary, VecDictionary};
use format::{
    kind_from_tag, type_tag, FeatureRecord, RawHeader, RefChunkHeader, SemiMarkovChunk, SemiMarkovStateRecord,
    DICT_CHUNK_TAG, FEATURES_CHUNK_TAG, FORMAT_VERSION, MAGIC, REF_CHUNK_TAG, SM_CHUNK_TAG,
};

const HEADER_SIZE: usize = std::mem::size_of::<RawHeader>();

/// Retained-feature compaction result (spec §4.2's save-time remapping):
/// dense new feature ids, and a dense new attribute id space covering
/// only attributes a retained STATE feature still references.
struct Compaction {
    features: Vec<FeatureRecord>,
    /// `attr_new_to_old[new_id] == old_id`.
    attr_new_to_old: Vec<u32>,
    attribute_refs: Vec<Vec<u32>>,
    source_refs: Vec<Vec<u32>>,
}

fn compact(feature_index: &FeatureIndex, weights: &[f64]) -> CrfResult<Compaction> {
    let mut retained: Vec<FeatureRecord> = Vec::new();
    for (fid, f) in feature_index.features().iter().enumerate() {
        let w = weights[fid];
        if w != 0.0 {
            retained.push(FeatureRecord::new(f, w));
        }
    }

    let mut attr_old_to_new: Vec<Option<u32>> = vec![None; feature_index.num_attributes()];
    let mut attr_new_to_old = Vec::new();
    for rec in &retained {
        if rec.kind()? == FeatureKind::State && attr_old_to_new[rec.src as usize].is_none() {
            attr_old_to_new[rec.src as usize] = Some(attr_new_to_old.len() as u32);
            attr_new_to_old.push(rec.src);
        }
    }

    let mut features = retained;
    for rec in features.iter_mut() {
        if rec.kind()? == FeatureKind::State {
            rec.src = attr_old_to_new[rec.src as usize].expect("retained state feature must have a mapped attribute");
        }
    }

    let new_num_attrs = attr_new_to_old.len();
    let mut attribute_refs = vec![Vec::new(); new_num_attrs];
    let mut source_refs = vec![Vec::new(); feature_index.num_source_states()];
    for (new_fid, rec) in features.iter().enumerate() {
        match rec.kind()? {
            FeatureKind::State => attribute_refs[rec.src as usize].push(new_fid as u32),
            FeatureKind::Transition => source_refs[rec.src as usize].push(new_fid as u32),
        }
    }

    Ok(Compaction { features, attr_new_to_old, attribute_refs, source_refs })
}

fn write_ref_chunk(refs: &[Vec<u32>]) -> Vec<u8> {
    let mut blocks = Vec::new();
    let mut block_offsets = Vec::with_capacity(refs.len());
    let header_bytes = std::mem::size_of::<RefChunkHeader>() + refs.len() * 8;
    for r in refs {
        block_offsets.push((header_bytes + blocks.len()) as u64);
        blocks.extend_from_slice(&(r.len() as u32).to_le_bytes());
        for &fid in r {
            blocks.extend_from_slice(&fid.to_le_bytes());
        }
    }

    let total = header_bytes + blocks.len();
    let header = RefChunkHeader { chunk_tag: REF_CHUNK_TAG, num: refs.len() as u32, size: total as u64 };

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(bytemuck::bytes_of(&header));
    for off in &block_offsets {
        out.extend_from_slice(&off.to_le_bytes());
    }
    out.extend_from_slice(&blocks);
    out
}

fn read_ref_chunk(bytes: &[u8], offset: usize) -> CrfResult<FeatureRefs> {
    let header_size = std::mem::size_of::<RefChunkHeader>();
    let header_bytes = bytes
        .get(offset..offset + header_size)
        .ok_or_else(|| CrfError::InvalidModelFile("ref chunk header out of bounds".into()))?;
    let header: RefChunkHeader = *bytemuck::from_bytes(header_bytes);
    if header.chunk_tag != REF_CHUNK_TAG {
        return Err(CrfError::InvalidModelFile("bad ref chunk tag".into()));
    }

    let offsets_start = offset + header_size;
    let offsets_end = offsets_start + header.num as usize * 8;
    let offsets_bytes = bytes
        .get(offsets_start..offsets_end)
        .ok_or_else(|| CrfError::InvalidModelFile("ref chunk offset table out of bounds".into()))?;

    let mut refs = Vec::with_capacity(header.num as usize);
    for chunk in offsets_bytes.chunks_exact(8) {
        let rel = u64::from_le_bytes(chunk.try_into().unwrap()) as usize;
        let block_start = offset + rel;
        let num_fids_bytes = bytes
            .get(block_start..block_start + 4)
            .ok_or_else(|| CrfError::InvalidModelFile("ref block out of bounds".into()))?;
        let num_fids = u32::from_le_bytes(num_fids_bytes.try_into().unwrap()) as usize;
        let fids_start = block_start + 4;
        let fids_bytes = bytes
            .get(fids_start..fids_start + num_fids * 4)
            .ok_or_else(|| CrfError::InvalidModelFile("ref block fid list out of bounds".into()))?;
        let fids: Vec<u32> = fids_bytes.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect();
        refs.push(fids);
    }
    Ok(FeatureRefs::from_raw(refs))
}

/// Serializes a trained model to the chunked binary format.
pub struct ModelWriter;

impl ModelWriter {
    /// Write `feature_index`/`weights` under the given graph variant and
    /// dictionaries. Only nonzero-weight features are retained; attribute
    /// ids are compacted alongside them (spec §4.2).
    #[allow(clippy::too_many_arguments)]
    pub fn save(
        path: &Path,
        kind: GraphKind,
        feature_index: &FeatureIndex,
        weights: &[f64],
        labels_dict: &dyn StringDictionary,
        attrs_dict: &dyn StringDictionary,
        sm_tables: Option<&SemiMarkovTables>,
    ) -> CrfResult<()> {
        if weights.len() != feature_index.num_features() {
            return Err(CrfError::InvalidConfig(
                "weight vector length does not match feature count".into(),
            ));
        }
        let compaction = compact(feature_index, weights)?;

        let attrs_dict_compacted = VecDictionary::new(
            compaction
                .attr_new_to_old
                .iter()
                .map(|&old| {
                    attrs_dict
                        .get(old)
                        .map(str::to_string)
                        .ok_or_else(|| CrfError::InvalidConfig(format!("attribute dictionary missing id {old}")))
                })
                .collect::<CrfResult<Vec<_>>>()?,
        );
        let labels_entries: Vec<String> = (0..feature_index.num_labels() as u32)
            .map(|id| {
                labels_dict
                    .get(id)
                    .map(str::to_string)
                    .ok_or_else(|| CrfError::InvalidConfig(format!("label dictionary missing id {id}")))
            })
            .collect::<CrfResult<Vec<_>>>()?;
        let labels_dict_full = VecDictionary::new(labels_entries);

        let features_payload = rkyv::to_bytes::<rkyv::rancor::Error>(&compaction.features)
            .map_err(|e| CrfError::InvalidModelFile(format!("failed to archive features chunk: {e}")))?;

        let mut buf = vec![0u8; HEADER_SIZE];

        let off_features = buf.len() as u64;
        buf.extend_from_slice(&FEATURES_CHUNK_TAG);
        buf.extend_from_slice(&(compaction.features.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(features_payload.len() as u64).to_le_bytes());
        buf.extend_from_slice(&features_payload);

        let off_labels_dict = buf.len() as u64;
        buf.extend_from_slice(&DICT_CHUNK_TAG);
        buf.extend_from_slice(&(labels_dict_full.entries().len() as u32).to_le_bytes());
        buf.extend_from_slice(&labels_dict_full.to_chunk_bytes());

        let off_attrs_dict = buf.len() as u64;
        buf.extend_from_slice(&DICT_CHUNK_TAG);
        buf.extend_from_slice(&(attrs_dict_compacted.entries().len() as u32).to_le_bytes());
        buf.extend_from_slice(&attrs_dict_compacted.to_chunk_bytes());

        let off_label_refs = buf.len() as u64;
        buf.extend_from_slice(&write_ref_chunk(&compaction.source_refs));

        let off_attr_refs = buf.len() as u64;
        buf.extend_from_slice(&write_ref_chunk(&compaction.attribute_refs));

        let off_semi_markov = if let Some(sm) = sm_tables {
            let off = buf.len() as u64;
            let chunk = semi_markov_chunk(sm);
            let payload = rkyv::to_bytes::<rkyv::rancor::Error>(&chunk)
                .map_err(|e| CrfError::InvalidModelFile(format!("failed to archive semi-Markov chunk: {e}")))?;
            buf.extend_from_slice(&SM_CHUNK_TAG);
            buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            buf.extend_from_slice(&payload);
            off
        } else {
            0
        };

        let header = RawHeader {
            magic: MAGIC,
            type_tag: type_tag(kind),
            version: FORMAT_VERSION,
            num_features: compaction.features.len() as u32,
            num_labels: feature_index.num_labels() as u32,
            num_attrs: attrs_dict_compacted.entries().len() as u32,
            num_source_states: feature_index.num_source_states() as u32,
            _reserved: 0,
            size: buf.len() as u64,
            off_features,
            off_labels_dict,
            off_attrs_dict,
            off_label_refs,
            off_attr_refs,
            off_semi_markov,
        };
        buf[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));

        std::fs::write(path, &buf)?;
        tracing::info!(
            path = %path.display(),
            num_features = header.num_features,
            size = header.size,
            "model written"
        );
        Ok(())
    }
}

fn semi_markov_chunk(sm: &SemiMarkovTables) -> SemiMarkovChunk {
    let num_labels = sm.num_labels() as u32;
    let states = (0..sm.num_forward_states() as u32)
        .map(|state| {
            let mut next_state = Vec::with_capacity(num_labels as usize);
            let mut pattern = Vec::with_capacity(num_labels as usize);
            for label in 0..num_labels {
                let (ns, p) = sm.forward_step(state, label);
                next_state.push(ns);
                pattern.push(p);
            }
            SemiMarkovStateRecord { next_state, pattern }
        })
        .collect();

    let backward_next_state = (0..sm.num_backward_states() as u32)
        .flat_map(|state| (0..num_labels).map(move |label| sm.backward_step(state, label)))
        .collect();

    let pattern_to_last_label = (0..sm.num_patterns() as u32).map(|p| sm.pattern_to_last_label(p)).collect();
    let pattern_to_src_state = (0..sm.num_patterns() as u32).map(|p| sm.pattern_to_src_state(p)).collect();

    SemiMarkovChunk {
        max_order: 1,
        num_labels,
        num_states: sm.num_forward_states() as u32,
        num_bkw_states: sm.num_backward_states() as u32,
        max_seg_len: sm.max_seg_len().map(|m| m as u32),
        initial_state: sm.initial_state(),
        pattern_to_last_label,
        pattern_to_src_state,
        states,
        backward_next_state,
    }
}

/// Reads a model file, giving O(1) offset access to each chunk.
pub struct ModelReader {
    header: RawHeader,
    buf: Vec<u8>,
}

impl ModelReader {
    pub fn open(path: &Path) -> CrfResult<Self> {
        let buf = std::fs::read(path)?;
        if buf.len() < HEADER_SIZE {
            return Err(CrfError::InvalidModelFile("file too small for header".into()));
        }
        let header: RawHeader = *bytemuck::from_bytes(&buf[..HEADER_SIZE]);
        header.validate()?;
        if header.size as usize != buf.len() {
            return Err(CrfError::InvalidModelFile(format!(
                "header size {} does not match file length {}",
                header.size,
                buf.len()
            )));
        }
        tracing::info!(path = %path.display(), size = header.size, "model opened");
        Ok(ModelReader { header, buf })
    }

    pub fn kind(&self) -> GraphKind {
        kind_from_tag(self.header.type_tag).expect("validated at open()")
    }

    pub fn num_features(&self) -> usize {
        self.header.num_features as usize
    }

    pub fn num_labels(&self) -> usize {
        self.header.num_labels as usize
    }

    pub fn num_attrs(&self) -> usize {
        self.header.num_attrs as usize
    }

    pub fn num_source_states(&self) -> usize {
        self.header.num_source_states as usize
    }

    fn chunk_slice(&self, offset: u64, header_len: usize) -> CrfResult<(&[u8], usize)> {
        let offset = offset as usize;
        let size_bytes = self
            .buf
            .get(offset + 4..offset + header_len)
            .ok_or_else(|| CrfError::InvalidModelFile("chunk header out of bounds".into()))?;
        let payload_start = offset + header_len;
        Ok((size_bytes, payload_start))
    }

    pub fn features(&self) -> CrfResult<Vec<FeatureRecord>> {
        let (num_and_size, payload_start) = self.chunk_slice(self.header.off_features, 16)?;
        let size = u64::from_le_bytes(num_and_size[4..12].try_into().unwrap()) as usize;
        let payload = self
            .buf
            .get(payload_start..payload_start + size)
            .ok_or_else(|| CrfError::InvalidModelFile("features chunk payload out of bounds".into()))?;
        rkyv::from_bytes::<Vec<FeatureRecord>, rkyv::rancor::Error>(payload)
            .map_err(|e| CrfError::InvalidModelFile(format!("failed to read features chunk: {e}")))
    }

    fn read_dict(&self, offset: u64, num: u32) -> CrfResult<VecDictionary> {
        let offset = offset as usize;
        let payload_start = offset + 8;
        let bytes = self
            .buf
            .get(payload_start..)
            .ok_or_else(|| CrfError::InvalidModelFile("dictionary chunk out of bounds".into()))?;
        VecDictionary::from_chunk_bytes(bytes, num as usize)
    }

    pub fn labels_dict(&self) -> CrfResult<VecDictionary> {
        self.read_dict(self.header.off_labels_dict, self.header.num_labels)
    }

    pub fn attrs_dict(&self) -> CrfResult<VecDictionary> {
        self.read_dict(self.header.off_attrs_dict, self.header.num_attrs)
    }

    pub fn source_refs(&self) -> CrfResult<FeatureRefs> {
        read_ref_chunk(&self.buf, self.header.off_label_refs as usize)
    }

    pub fn attribute_refs(&self) -> CrfResult<FeatureRefs> {
        read_ref_chunk(&self.buf, self.header.off_attr_refs as usize)
    }

    pub fn semi_markov_tables(&self) -> CrfResult<Option<SemiMarkovTables>> {
        if self.header.off_semi_markov == 0 {
            return Ok(None);
        }
        let offset = self.header.off_semi_markov as usize;
        let size_bytes = self
            .buf
            .get(offset + 4..offset + 12)
            .ok_or_else(|| CrfError::InvalidModelFile("semi-Markov chunk header out of bounds".into()))?;
        let size = u64::from_le_bytes(size_bytes.try_into().unwrap()) as usize;
        let payload_start = offset + 12;
        let payload = self
            .buf
            .get(payload_start..payload_start + size)
            .ok_or_else(|| CrfError::InvalidModelFile("semi-Markov chunk payload out of bounds".into()))?;
        let chunk = rkyv::from_bytes::<SemiMarkovChunk, rkyv::rancor::Error>(payload)
            .map_err(|e| CrfError::InvalidModelFile(format!("failed to read semi-Markov chunk: {e}")))?;

        let num_labels = chunk.num_labels as usize;
        let mut forward_next_state = Vec::with_capacity(chunk.states.len() * num_labels);
        let mut forward_pattern = Vec::with_capacity(chunk.states.len() * num_labels);
        for state in &chunk.states {
            forward_next_state.extend_from_slice(&state.next_state);
            forward_pattern.extend_from_slice(&state.pattern);
        }

        Ok(Some(SemiMarkovTables::from_raw_parts(
            num_labels,
            chunk.num_states as usize,
            chunk.num_bkw_states as usize,
            chunk.initial_state,
            chunk.pattern_to_last_label,
            chunk.pattern_to_src_state,
            forward_next_state,
            forward_pattern,
            chunk.backward_next_state,
            chunk.max_seg_len.map(|m| m as usize),
        )?))
    }

    /// Rebuild the `FeatureIndex` this model's feature/ref chunks encode.
    /// `observed_freq` is not persisted (spec §4.4 does not include it in
    /// the feature record), so reconstructed descriptors carry `0.0`.
    pub fn build_feature_index(&self) -> CrfResult<FeatureIndex> {
        let records = self.features()?;
        let descriptors = records
            .iter()
            .map(|r| {
                Ok(FeatureDescriptor { kind: r.kind()?, src: r.src, dst: r.dst, observed_freq: 0.0 })
            })
            .collect::<CrfResult<Vec<_>>>()?;
        FeatureIndex::build(descriptors, self.num_labels(), self.num_attrs(), self.num_source_states())
    }

    pub fn weights(&self) -> CrfResult<Vec<f64>> {
        Ok(self.features()?.iter().map(|r| r.weight).collect())
    }
}
