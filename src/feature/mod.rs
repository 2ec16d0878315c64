//! Feature descriptors and the indirection tables built from them.

pub mod index;
pub mod semi_markov_tables;

pub use index::{FeatureIndex, FeatureRefs};
pub use semi_markov_tables::SemiMarkovTables;

/// Whether a feature contributes to a state score or a transition score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FeatureKind {
    State,
    Transition,
}

/// A single feature, tying a `(src, dst)` pair to a scalar parameter.
///
/// For STATE features `src` is an attribute id and `dst` a label id. For
/// TRANSITION features in the chain/tree variants both are label ids; in
/// the semi-Markov variant `src` is a forward-state id and `dst` is a
/// pattern id whose terminal label is `SemiMarkovTables::pattern_to_last_label`.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct FeatureDescriptor {
    pub kind: FeatureKind,
    pub src: u32,
    pub dst: u32,
    /// Empirical count over the training set: sum of attribute values for
    /// STATE features, occurrence count for TRANSITION features.
    pub observed_freq: f64,
}

impl FeatureDescriptor {
    pub fn state(attribute: u32, label: u32, observed_freq: f64) -> Self {
        FeatureDescriptor { kind: FeatureKind::State, src: attribute, dst: label, observed_freq }
    }

    pub fn transition(src: u32, dst: u32, observed_freq: f64) -> Self {
        FeatureDescriptor { kind: FeatureKind::Transition, src, dst, observed_freq }
    }
}
