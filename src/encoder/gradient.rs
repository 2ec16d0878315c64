//! Observed-path and model expectations, and the objective/gradient
//! assembly built on top of them (spec §4.3's gradient operations).
//!
//! Grounded in the original encoder's `crf1de_observation_expectation`,
//! `crf1de_model_expectation` and the two `encoder_objective_and_gradients*`
//! drivers: the gold-path sum walks the same `(attribute, label)` /
//! `(source, dst)` feature-ref lists `FeatureIndex::assemble_*` uses, and
//! the model-expectation sum reads back the `mexp_state`/`mexp_trans`
//! tables every graph variant's `marginals()` fills in identically.

use rayon::prelude::*;

use crate::context::{chain, semi_markov, tree, GraphKind, NumericContext, ResetFlags};
use crate::error::{CrfError, CrfResult};
use crate::feature::{FeatureIndex, SemiMarkovTables};
use crate::instance::Instance;

/// Add `gain * value` to `g[fid]` for every feature active along `labels`
/// (spec §4.3's observation expectation, restricted to one instance).
///
/// The state-feature sum is variant-independent — every graph topology
/// assigns exactly one label per item. The transition sum is not: chain
/// walks consecutive items, tree walks parent-child edges, semi-Markov
/// walks the run-length segments `labels` decomposes into.
pub fn observation_expectation(
    feature_index: &FeatureIndex,
    kind: GraphKind,
    sm: Option<&SemiMarkovTables>,
    instance: &Instance,
    labels: &[u32],
    g: &mut [f64],
    gain: f64,
) -> CrfResult<()> {
    for (t, item) in instance.items.iter().enumerate() {
        let label = labels[t];
        for &(attr, value) in &item.attributes {
            for &fid in feature_index.attribute_refs().feature_ids(attr) {
                if feature_index.features()[fid as usize].dst == label {
                    g[fid as usize] += gain * value;
                }
            }
        }
    }

    match kind {
        GraphKind::Chain => {
            for t in 1..labels.len() {
                add_transition_gain(feature_index, labels[t - 1], labels[t], g, gain);
            }
        }
        GraphKind::Tree => {
            let tree_topo = instance.tree.as_ref().ok_or_else(|| {
                CrfError::InvalidInstance("tree observation expectation requires a tree topology".into())
            })?;
            for (node, parent) in tree_topo.parent.iter().enumerate() {
                if let Some(p) = parent {
                    add_transition_gain(feature_index, labels[*p], labels[node], g, gain);
                }
            }
        }
        GraphKind::SemiMarkov => {
            let sm = sm.ok_or_else(|| {
                CrfError::InvalidInstance("semi-Markov observation expectation requires state tables".into())
            })?;
            let mut state = sm.initial_state();
            let mut t = 0usize;
            while t < labels.len() {
                let label = labels[t];
                let mut end = t;
                while end + 1 < labels.len() && labels[end + 1] == label {
                    end += 1;
                }
                let (next_state, pattern) = sm.forward_step(state, label);
                add_transition_gain(feature_index, state, pattern, g, gain);
                state = next_state;
                t = end + 1;
            }
        }
    }
    Ok(())
}

fn add_transition_gain(feature_index: &FeatureIndex, src: u32, dst: u32, g: &mut [f64], gain: f64) {
    for &fid in feature_index.source_refs().feature_ids(src) {
        if feature_index.features()[fid as usize].dst == dst {
            g[fid as usize] += gain;
        }
    }
}

/// Add `gain` times the model expectation of every feature (spec §4.3).
///
/// Reads `ctx.mexp_state`/`ctx.mexp_trans` directly — these already hold
/// the correct per-variant marginals once `marginals()` has run, so this
/// function needs no `GraphKind` dispatch of its own.
pub fn model_expectation(feature_index: &FeatureIndex, instance: &Instance, ctx: &NumericContext, g: &mut [f64], gain: f64) {
    for (t, item) in instance.items.iter().enumerate() {
        let row = ctx.mexp_state_row(t);
        for &(attr, value) in &item.attributes {
            for &fid in feature_index.attribute_refs().feature_ids(attr) {
                let dst = feature_index.features()[fid as usize].dst;
                g[fid as usize] += gain * value * row[dst as usize];
            }
        }
    }

    for src in 0..feature_index.num_source_states() {
        let row = ctx.mexp_trans_row(src);
        for &fid in feature_index.source_refs().feature_ids(src as u32) {
            let dst = feature_index.features()[fid as usize].dst;
            g[fid as usize] += gain * row[dst as usize];
        }
    }
}

/// Invoke `callback(feature_id, contribution)` for every feature active
/// along `labels` (spec §4.3's `features_on_path`), contribution being the
/// attribute value for state features and `1.0` for transition features.
pub fn features_on_path(
    feature_index: &FeatureIndex,
    kind: GraphKind,
    sm: Option<&SemiMarkovTables>,
    instance: &Instance,
    labels: &[u32],
    mut callback: impl FnMut(u32, f64),
) -> CrfResult<()> {
    for (t, item) in instance.items.iter().enumerate() {
        let label = labels[t];
        for &(attr, value) in &item.attributes {
            for &fid in feature_index.attribute_refs().feature_ids(attr) {
                if feature_index.features()[fid as usize].dst == label {
                    callback(fid, value);
                }
            }
        }
    }

    let mut emit_transition = |src: u32, dst: u32| {
        for &fid in feature_index.source_refs().feature_ids(src) {
            if feature_index.features()[fid as usize].dst == dst {
                callback(fid, 1.0);
            }
        }
    };

    match kind {
        GraphKind::Chain => {
            for t in 1..labels.len() {
                emit_transition(labels[t - 1], labels[t]);
            }
        }
        GraphKind::Tree => {
            let tree_topo = instance.tree.as_ref().ok_or_else(|| {
                CrfError::InvalidInstance("tree features_on_path requires a tree topology".into())
            })?;
            for (node, parent) in tree_topo.parent.iter().enumerate() {
                if let Some(p) = parent {
                    emit_transition(labels[*p], labels[node]);
                }
            }
        }
        GraphKind::SemiMarkov => {
            let sm = sm.ok_or_else(|| {
                CrfError::InvalidInstance("semi-Markov features_on_path requires state tables".into())
            })?;
            let mut state = sm.initial_state();
            let mut t = 0usize;
            while t < labels.len() {
                let label = labels[t];
                let mut end = t;
                while end + 1 < labels.len() && labels[end + 1] == label {
                    end += 1;
                }
                let (next_state, pattern) = sm.forward_step(state, label);
                emit_transition(state, pattern);
                state = next_state;
                t = end + 1;
            }
        }
    }
    Ok(())
}

/// Per-instance work performed by one [`objective_and_gradients_batch`]
/// task: its local gradient contribution and its `score - log_norm` term.
fn instance_contribution(
    template: &NumericContext,
    trans: &[f64],
    feature_index: &FeatureIndex,
    sm: Option<&SemiMarkovTables>,
    kind: GraphKind,
    w: &[f64],
    instance: &Instance,
) -> CrfResult<(Vec<f64>, f64)> {
    instance.validate()?;

    let mut ctx = NumericContext::new(
        kind,
        template.num_labels(),
        template.num_source_states(),
        template.trans_cols(),
        template.alpha_rows(),
        template.beta_rows(),
    );
    ctx.set_num_items(instance.num_items())?;
    ctx.reset(ResetFlags::State);
    ctx.trans_slice_mut().copy_from_slice(trans);
    feature_index.assemble_state(w, 1.0, instance, ctx.state_slice_mut());
    ctx.exponentiate();

    let score = match kind {
        GraphKind::Chain => {
            chain::alpha(&mut ctx)?;
            chain::beta(&mut ctx);
            chain::marginals(&mut ctx);
            chain::path_score(&ctx, &instance.labels)
        }
        GraphKind::Tree => {
            let tree_topo = instance.tree.as_ref().ok_or_else(|| {
                CrfError::InvalidInstance("tree batch objective requires a tree topology".into())
            })?;
            tree::alpha(&mut ctx, tree_topo)?;
            tree::beta(&mut ctx, tree_topo);
            tree::marginals(&mut ctx, tree_topo);
            tree::path_score(&ctx, tree_topo, &instance.labels)
        }
        GraphKind::SemiMarkov => {
            let sm = sm.ok_or_else(|| {
                CrfError::InvalidInstance("semi-Markov batch objective requires state tables".into())
            })?;
            semi_markov::alpha(&mut ctx, sm)?;
            semi_markov::beta(&mut ctx, sm);
            semi_markov::marginals(&mut ctx, sm);
            semi_markov::path_score(&ctx, sm, &instance.labels)
        }
    };

    let mut local_g = vec![0.0; feature_index.num_features()];
    model_expectation(feature_index, instance, &ctx, &mut local_g, 1.0);
    Ok((local_g, score - ctx.log_norm))
}

/// Accumulate the batch objective and gradient over an entire dataset
/// (spec §4.3's batch operation, grounded in
/// `encoder_objective_and_gradients_batch`).
///
/// Unlike the single-instance path this does not go through the Encoder's
/// level cache: weights are unscaled (`scale = 1.0`), `g` is seeded with
/// `-observed_freq` once up front, and every instance is independent once
/// the shared transition matrix is assembled — so instances fan out over
/// `rayon`, each on its own scratch [`NumericContext`] (spec §5: scratch
/// must never be shared across threads), and their gradient contributions
/// and log-likelihood terms are reduced back on the caller's thread.
pub fn objective_and_gradients_batch(
    ctx: &mut NumericContext,
    feature_index: &FeatureIndex,
    sm: Option<&SemiMarkovTables>,
    kind: GraphKind,
    dataset: &[Instance],
    w: &[f64],
    g: &mut [f64],
) -> CrfResult<f64> {
    for (fid, f) in feature_index.features().iter().enumerate() {
        g[fid] = -f.observed_freq;
    }

    ctx.reset(ResetFlags::Trans);
    feature_index.assemble_trans(w, 1.0, ctx.trans_slice_mut(), ctx.trans_cols());
    let trans = ctx.trans_slice().to_vec();
    let dims: &NumericContext = ctx;

    let contributions: Vec<(Vec<f64>, f64)> = dataset
        .par_iter()
        .map(|instance| instance_contribution(dims, &trans, feature_index, sm, kind, w, instance))
        .collect::<CrfResult<Vec<_>>>()?;

    let mut logl = 0.0;
    for (local_g, term) in contributions {
        for (gi, li) in g.iter_mut().zip(local_g.iter()) {
            *gi += li;
        }
        logl += term;
    }

    Ok(-logl)
}
