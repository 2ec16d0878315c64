//! The level-cached facade over [`NumericContext`] (spec §4.3): each
//! operation asks for the cheapest level that satisfies it, and
//! [`Encoder::set_level`] only redoes the work between the current level
//! and the target.
//!
//! Grounded in the original encoder's `crf1de_t`/`set_level` dispatch: a
//! call to `set_weights` or `set_instance` drops the cached level back to
//! just below the stage it invalidates, rather than clearing everything,
//! so recomputing the gradient for a new weight vector over the same
//! instance does not re-walk the instance's attributes.

pub mod gradient;

use crate::context::{chain, semi_markov, tree, GraphKind, NumericContext, ResetFlags};
use crate::error::{CrfError, CrfResult};
use crate::feature::{FeatureIndex, SemiMarkovTables};
use crate::instance::Instance;

use crate::config::EncoderOptions;

/// How much of the cached pipeline is valid for the current weights and
/// instance. Ordered: each stage in [`Encoder::set_level`] only runs when
/// moving *into* a level the cache has not yet reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    None,
    Weight,
    Instance,
    AlphaBeta,
    Marginal,
}

/// A reusable inference/training session for one graph variant.
///
/// Borrows its weight vector and current instance rather than owning
/// them, so callers can swap either without the Encoder copying data it
/// does not need to hold.
pub struct Encoder<'a> {
    kind: GraphKind,
    feature_index: FeatureIndex,
    sm_tables: Option<SemiMarkovTables>,
    ctx: NumericContext,
    level: Level,
    weights: Option<&'a [f64]>,
    scale: f64,
    instance: Option<&'a Instance>,
    options: EncoderOptions,
}

impl<'a> Encoder<'a> {
    /// Build a chain or tree encoder (`trans_cols = alpha_rows = beta_rows
    /// = num_labels`, `num_source_states = num_labels`).
    pub fn chain_or_tree(kind: GraphKind, feature_index: FeatureIndex) -> CrfResult<Self> {
        if kind == GraphKind::SemiMarkov {
            return Err(CrfError::UnsupportedVariant(
                "chain_or_tree constructor used for a semi-Markov feature index".into(),
            ));
        }
        let l = feature_index.num_labels();
        let ctx = NumericContext::new(kind, l, l, l, l, l);
        Ok(Encoder {
            kind,
            feature_index,
            sm_tables: None,
            ctx,
            level: Level::None,
            weights: None,
            scale: 1.0,
            instance: None,
            options: EncoderOptions::default(),
        })
    }

    /// Build a semi-Markov encoder from its feature index and state tables.
    pub fn semi_markov(feature_index: FeatureIndex, sm_tables: SemiMarkovTables) -> Self {
        let l = feature_index.num_labels();
        let ctx = NumericContext::new(
            GraphKind::SemiMarkov,
            l,
            sm_tables.num_forward_states(),
            sm_tables.num_patterns(),
            sm_tables.num_forward_states(),
            sm_tables.num_backward_states(),
        );
        Encoder {
            kind: GraphKind::SemiMarkov,
            feature_index,
            sm_tables: Some(sm_tables),
            ctx,
            level: Level::None,
            weights: None,
            scale: 1.0,
            instance: None,
            options: EncoderOptions::default(),
        }
    }

    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    pub fn feature_index(&self) -> &FeatureIndex {
        &self.feature_index
    }

    pub fn semi_markov_tables(&self) -> Option<&SemiMarkovTables> {
        self.sm_tables.as_ref()
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Read or replace the configuration options (spec §6). Rejects
    /// `feature_max_seg_len`/`feature_max_order` changes on a non-semi-Markov
    /// encoder, per spec §7's `InvalidConfig` disposition (no side effects).
    pub fn exchange_options(&mut self, options: EncoderOptions) -> CrfResult<EncoderOptions> {
        options.validate()?;
        if self.kind != GraphKind::SemiMarkov
            && (options.feature_max_seg_len.is_some() || options.feature_max_order != 1)
        {
            return Err(CrfError::InvalidConfig(
                "feature.max_seg_len / feature.max_order only apply to semi-Markov encoders".into(),
            ));
        }
        let previous = self.options;
        self.options = options;
        Ok(previous)
    }

    pub fn options(&self) -> EncoderOptions {
        self.options
    }

    /// Bind a new weight vector, invalidating everything from `Weight`
    /// down (spec §4.3).
    pub fn set_weights(&mut self, weights: &'a [f64], scale: f64) -> CrfResult<()> {
        self.weights = Some(weights);
        self.scale = scale;
        self.level = Level::None;
        self.set_level(Level::Weight)
    }

    /// Bind a new instance, invalidating everything from `Instance` down.
    /// Requires `set_weights` to have already been called.
    pub fn set_instance(&mut self, instance: &'a Instance) -> CrfResult<()> {
        if self.weights.is_none() {
            return Err(CrfError::InvalidInstance(
                "set_weights must be called before set_instance".into(),
            ));
        }
        self.instance = Some(instance);
        self.level = Level::Weight;
        self.set_level(Level::Instance)
    }

    /// Advance the cache to (at least) `target`, recomputing only the
    /// stages strictly between the current level and it.
    pub fn set_level(&mut self, target: Level) -> CrfResult<()> {
        if target >= Level::Weight && self.level < Level::Weight {
            let w = self
                .weights
                .ok_or_else(|| CrfError::InvalidInstance("weights not set".into()))?;
            self.ctx.reset(ResetFlags::Trans);
            self.feature_index
                .assemble_trans(w, self.scale, self.ctx.trans_slice_mut(), self.ctx.trans_cols());
            tracing::debug!(level = "weight", "transition scores rebuilt");
        }

        if target >= Level::Instance && self.level < Level::Instance {
            let inst = self
                .instance
                .ok_or_else(|| CrfError::InvalidInstance("instance not set".into()))?;
            inst.validate()?;
            let w = self.weights.expect("weight level already ensured above");
            self.ctx.set_num_items(inst.num_items())?;
            self.ctx.reset(ResetFlags::State);
            self.feature_index.assemble_state(w, self.scale, inst, self.ctx.state_slice_mut());
            tracing::debug!(level = "instance", num_items = inst.num_items(), "state scores rebuilt");
        }

        if target >= Level::AlphaBeta && self.level < Level::AlphaBeta {
            self.ctx.exponentiate();
            match self.kind {
                GraphKind::Chain => {
                    chain::alpha(&mut self.ctx)?;
                    chain::beta(&mut self.ctx);
                }
                GraphKind::Tree => {
                    let inst = self.instance.expect("instance level already ensured above");
                    let tree_topo = inst.tree.as_ref().ok_or_else(|| {
                        CrfError::UnsupportedVariant("tree operation on an instance without a tree topology".into())
                    })?;
                    tree::alpha(&mut self.ctx, tree_topo)?;
                    tree::beta(&mut self.ctx, tree_topo);
                }
                GraphKind::SemiMarkov => {
                    let sm = self.sm_tables.as_ref().expect("semi-Markov encoder always carries tables");
                    semi_markov::alpha(&mut self.ctx, sm)?;
                    semi_markov::beta(&mut self.ctx, sm);
                }
            }
            tracing::debug!(level = "alphabeta", log_norm = self.ctx.log_norm, "forward-backward computed");
        }

        if target >= Level::Marginal && self.level < Level::Marginal {
            match self.kind {
                GraphKind::Chain => chain::marginals(&mut self.ctx),
                GraphKind::Tree => {
                    let inst = self.instance.expect("instance level already ensured above");
                    let tree_topo = inst.tree.as_ref().expect("checked when entering AlphaBeta");
                    tree::marginals(&mut self.ctx, tree_topo);
                }
                GraphKind::SemiMarkov => {
                    let sm = self.sm_tables.as_ref().expect("semi-Markov encoder always carries tables");
                    semi_markov::marginals(&mut self.ctx, sm);
                }
            }
            tracing::debug!(level = "marginal", "expectations computed");
        }

        if target > self.level {
            self.level = target;
        }
        Ok(())
    }

    /// Log score of `labels` under the current instance (spec §4.3).
    pub fn score(&mut self, labels: &[u32]) -> CrfResult<f64> {
        self.set_level(Level::Instance)?;
        let inst = self.instance.expect("set_level(Instance) guarantees this");
        Ok(match self.kind {
            GraphKind::Chain => chain::path_score(&self.ctx, labels),
            GraphKind::Tree => {
                tree::path_score(&self.ctx, inst.tree.as_ref().expect("checked in set_level"), labels)
            }
            GraphKind::SemiMarkov => semi_markov::path_score(
                &self.ctx,
                self.sm_tables.as_ref().expect("semi-Markov encoder always carries tables"),
                labels,
            ),
        })
    }

    /// Best label sequence and its log score (spec §4.3).
    pub fn viterbi(&mut self, path_out: &mut [u32]) -> CrfResult<f64> {
        self.set_level(Level::Instance)?;
        let inst = self.instance.expect("set_level(Instance) guarantees this");
        Ok(match self.kind {
            GraphKind::Chain => chain::viterbi(&mut self.ctx, path_out),
            GraphKind::Tree => tree::viterbi(
                &mut self.ctx,
                inst.tree.as_ref().expect("checked in set_level"),
                path_out,
            ),
            GraphKind::SemiMarkov => semi_markov::viterbi(
                &mut self.ctx,
                self.sm_tables.as_ref().expect("semi-Markov encoder always carries tables"),
                path_out,
            ),
        })
    }

    /// The log partition function `log Z(x)` for the current instance.
    pub fn partition_factor(&mut self) -> CrfResult<f64> {
        self.set_level(Level::AlphaBeta)?;
        Ok(self.ctx.log_norm)
    }

    /// Accumulate `g[fid] += contribution` for every feature active along
    /// `path` (spec §4.3).
    pub fn features_on_path(&mut self, path: &[u32], callback: impl FnMut(u32, f64)) -> CrfResult<()> {
        self.set_level(Level::Instance)?;
        let inst = self.instance.expect("set_level(Instance) guarantees this");
        gradient::features_on_path(&self.feature_index, self.kind, self.sm_tables.as_ref(), inst, path, callback)
    }

    /// Single-instance objective and gradient (spec §4.3): adds the
    /// observed-path expectation at `+gain` and the model expectation at
    /// `-gain` into `g`, returning `-score(labels) + log Z(x)`.
    pub fn objective_and_gradients(&mut self, g: &mut [f64], gain: f64) -> CrfResult<f64> {
        self.set_level(Level::Marginal)?;
        let inst = self.instance.expect("set_level(Marginal) guarantees this");
        gradient::observation_expectation(
            &self.feature_index,
            self.kind,
            self.sm_tables.as_ref(),
            inst,
            &inst.labels,
            g,
            gain,
        )?;
        gradient::model_expectation(&self.feature_index, inst, &self.ctx, g, -gain);
        let score = match self.kind {
            GraphKind::Chain => chain::path_score(&self.ctx, &inst.labels),
            GraphKind::Tree => {
                tree::path_score(&self.ctx, inst.tree.as_ref().expect("checked in set_level"), &inst.labels)
            }
            GraphKind::SemiMarkov => semi_markov::path_score(
                &self.ctx,
                self.sm_tables.as_ref().expect("semi-Markov encoder always carries tables"),
                &inst.labels,
            ),
        };
        Ok(-score + self.ctx.log_norm)
    }

    /// Batch objective and gradient over `dataset` at unscaled weights `w`
    /// (spec §4.3). Bypasses the level cache entirely; see
    /// [`gradient::objective_and_gradients_batch`].
    pub fn objective_and_gradients_batch(&mut self, dataset: &[Instance], w: &[f64], g: &mut [f64]) -> CrfResult<f64> {
        let result = gradient::objective_and_gradients_batch(
            &mut self.ctx,
            &self.feature_index,
            self.sm_tables.as_ref(),
            self.kind,
            dataset,
            w,
            g,
        );
        // The batch path overwrites the shared scratch context directly,
        // bypassing set_level's bookkeeping, so the cache must be treated
        // as cold for whatever the Encoder was tracking before this call.
        self.level = Level::None;
        result
    }
}
