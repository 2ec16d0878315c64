//! Immutable feature tables built once per training run, plus the score
//! assembly routines that consume them.

use crate::error::{CrfError, CrfResult};
use crate::feature::{FeatureDescriptor, FeatureKind};
use crate::instance::Instance;

/// For each source id (attribute id, or label/forward-state id), the
/// ordered list of feature ids whose `src` equals that id.
///
/// Immutable after construction — built once from the feature list,
/// giving O(nonzero-attributes) score assembly instead of a scan over
/// every feature per item.
#[derive(Debug, Clone, Default)]
pub struct FeatureRefs {
    refs: Vec<Vec<u32>>,
}

impl FeatureRefs {
    fn build(num_ids: usize, pairs: impl Iterator<Item = (u32, u32)>) -> Self {
        let mut refs = vec![Vec::new(); num_ids];
        for (source_id, feature_id) in pairs {
            refs[source_id as usize].push(feature_id);
        }
        FeatureRefs { refs }
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn feature_ids(&self, source_id: u32) -> &[u32] {
        &self.refs[source_id as usize]
    }

    pub fn as_slice(&self) -> &[Vec<u32>] {
        &self.refs
    }

    pub fn from_raw(refs: Vec<Vec<u32>>) -> Self {
        FeatureRefs { refs }
    }
}

/// Immutable feature tables for one trained/training model.
#[derive(Debug, Clone)]
pub struct FeatureIndex {
    features: Vec<FeatureDescriptor>,
    attribute_refs: FeatureRefs,
    source_refs: FeatureRefs,
    num_labels: usize,
    num_attributes: usize,
    /// Number of rows addressed by `source_refs` — `num_labels` for
    /// chain/tree, `num_forward_states` for semi-Markov.
    num_source_states: usize,
}

impl FeatureIndex {
    /// Build the index from a flat feature list.
    ///
    /// `num_source_states` is the row count transition features are keyed
    /// on: `num_labels` for chain/tree, `num_forward_states` for
    /// semi-Markov (see spec §3, §4.2).
    pub fn build(
        features: Vec<FeatureDescriptor>,
        num_labels: usize,
        num_attributes: usize,
        num_source_states: usize,
    ) -> CrfResult<Self> {
        for f in &features {
            match f.kind {
                FeatureKind::State => {
                    if f.src as usize >= num_attributes {
                        return Err(CrfError::InvalidConfig(format!(
                            "state feature references out-of-range attribute {}",
                            f.src
                        )));
                    }
                }
                FeatureKind::Transition => {
                    if f.src as usize >= num_source_states {
                        return Err(CrfError::InvalidConfig(format!(
                            "transition feature references out-of-range source {}",
                            f.src
                        )));
                    }
                }
            }
        }

        let attribute_refs = FeatureRefs::build(
            num_attributes,
            features.iter().enumerate().filter_map(|(fid, f)| {
                (f.kind == FeatureKind::State).then_some((f.src, fid as u32))
            }),
        );
        let source_refs = FeatureRefs::build(
            num_source_states,
            features.iter().enumerate().filter_map(|(fid, f)| {
                (f.kind == FeatureKind::Transition).then_some((f.src, fid as u32))
            }),
        );

        Ok(FeatureIndex {
            features,
            attribute_refs,
            source_refs,
            num_labels,
            num_attributes,
            num_source_states,
        })
    }

    pub fn features(&self) -> &[FeatureDescriptor] {
        &self.features
    }

    pub fn attribute_refs(&self) -> &FeatureRefs {
        &self.attribute_refs
    }

    pub fn source_refs(&self) -> &FeatureRefs {
        &self.source_refs
    }

    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn num_attributes(&self) -> usize {
        self.num_attributes
    }

    pub fn num_source_states(&self) -> usize {
        self.num_source_states
    }

    /// Accumulate state scores for one instance into `state` (shape
    /// `T x num_labels`, row-major, item-major outer loop).
    ///
    /// `scale` is applied to each attribute value once, at accumulation
    /// time (spec §4.1's "early" scaling for numerical efficiency).
    pub fn assemble_state(
        &self,
        weights: &[f64],
        scale: f64,
        instance: &Instance,
        state: &mut [f64],
    ) {
        let l = self.num_labels;
        for (t, item) in instance.items.iter().enumerate() {
            let row = &mut state[t * l..(t + 1) * l];
            for &(attribute_id, value) in &item.attributes {
                let scaled_value = value * scale;
                for &fid in self.attribute_refs.feature_ids(attribute_id) {
                    let f = &self.features[fid as usize];
                    row[f.dst as usize] += weights[fid as usize] * scaled_value;
                }
            }
        }
    }

    /// Write transition scores into `trans` (shape
    /// `num_source_states x trans_cols`, row-major). `trans_cols` is
    /// `num_labels` for chain/tree and `num_patterns` for semi-Markov.
    pub fn assemble_trans(&self, weights: &[f64], scale: f64, trans: &mut [f64], trans_cols: usize) {
        for src in 0..self.num_source_states {
            let row = &mut trans[src * trans_cols..(src + 1) * trans_cols];
            for &fid in self.source_refs.feature_ids(src as u32) {
                let f = &self.features[fid as usize];
                row[f.dst as usize] = weights[fid as usize] * scale;
            }
        }
    }
}
