//! The scratch arena behind one Encoder: state/transition score matrices,
//! scaled forward-backward buffers, Viterbi back-pointers and marginal
//! tables for a single instance.
//!
//! One [`NumericContext`] is reused across every instance an Encoder
//! processes; [`NumericContext::set_num_items`] grows the T-indexed
//! buffers (doubling `cap_items`) instead of reallocating per instance.
//! The three graph variants (chain, tree, semi-Markov) share this struct
//! and differ only in which rows they address and which of the recurrences
//! in [`chain`], [`tree`] and [`semi_markov`] they run.

pub mod chain;
pub mod logsumexp;
pub mod semi_markov;
pub mod tree;

use crate::error::{CrfError, CrfResult};

/// Which rows the transition matrix, α and β are sized over.
///
/// Chain and tree share `num_labels` rows throughout. Semi-Markov keeps
/// separate forward/backward state counts and a separate pattern column
/// count for `trans` (spec §3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphKind {
    Chain,
    Tree,
    SemiMarkov,
}

/// Which score matrices [`NumericContext::reset`] zeroes.
///
/// Mirrors `RF_STATE`/`RF_TRANS`/`RF_ALL` from the original encoder (spec
/// §9's open-question resolution): `All` also clears `alpha`, `beta`,
/// `scale_factor`, `log_norm` and the `exp_*` tables; `State`/`Trans` touch
/// only the named score matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetFlags {
    State,
    Trans,
    All,
}

/// Per-instance scratch arena (spec §3, §4.1).
///
/// Shapes, in terms of the current instance's item count `T`:
/// - `state`: `T x num_labels`
/// - `trans`: `num_source_states x trans_cols`
/// - `alpha`: `T x alpha_rows`, `beta`: `T x beta_rows`
/// - `child_alpha`: `T x num_labels` (tree only)
/// - `back_edge`, `back_end`: `T x alpha_rows`
///
/// All T-indexed buffers are allocated to `cap_items` rows and sliced down
/// to `num_items` rows on use; `cap_items` only grows, by doubling.
#[derive(Debug, Clone)]
pub struct NumericContext {
    kind: GraphKind,
    num_labels: usize,
    num_source_states: usize,
    trans_cols: usize,
    alpha_rows: usize,
    beta_rows: usize,
    num_items: usize,
    cap_items: usize,

    pub log_norm: f64,

    state: Vec<f64>,
    trans: Vec<f64>,
    exp_state: Option<Vec<f64>>,
    exp_trans: Option<Vec<f64>>,

    alpha: Vec<f64>,
    beta: Vec<f64>,
    child_alpha: Vec<f64>,
    scale_factor: Vec<f64>,

    mexp_state: Vec<f64>,
    mexp_trans: Vec<f64>,

    back_edge: Vec<i64>,
    back_end: Vec<i64>,
}

impl NumericContext {
    /// Build a context for the named variant.
    ///
    /// `num_source_states`/`trans_cols` are the dimensions
    /// [`crate::feature::FeatureIndex::assemble_trans`] writes into:
    /// `num_labels` on both axes for chain/tree, forward-states x patterns
    /// for semi-Markov. `alpha_rows`/`beta_rows` are `num_labels` for
    /// chain/tree and the semi-Markov tables' forward/backward state
    /// counts otherwise.
    pub fn new(
        kind: GraphKind,
        num_labels: usize,
        num_source_states: usize,
        trans_cols: usize,
        alpha_rows: usize,
        beta_rows: usize,
    ) -> Self {
        NumericContext {
            kind,
            num_labels,
            num_source_states,
            trans_cols,
            alpha_rows,
            beta_rows,
            num_items: 0,
            cap_items: 0,
            log_norm: 0.0,
            state: Vec::new(),
            trans: vec![0.0; num_source_states * trans_cols],
            exp_state: None,
            exp_trans: None,
            alpha: Vec::new(),
            beta: Vec::new(),
            child_alpha: Vec::new(),
            scale_factor: Vec::new(),
            mexp_state: Vec::new(),
            mexp_trans: vec![0.0; num_source_states * trans_cols],
            back_edge: Vec::new(),
            back_end: Vec::new(),
        }
    }

    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn cap_items(&self) -> usize {
        self.cap_items
    }

    /// Grow T-indexed storage to fit `num_items`, doubling `cap_items`
    /// when it is exceeded (spec §4.1's reset policy), then set the
    /// active `num_items`.
    pub fn set_num_items(&mut self, num_items: usize) -> CrfResult<()> {
        if num_items == 0 {
            return Err(CrfError::InvalidInstance("instance has zero items".into()));
        }
        if num_items > self.cap_items {
            let mut new_cap = self.cap_items.max(1);
            while new_cap < num_items {
                new_cap *= 2;
            }
            self.grow(new_cap);
        }
        self.num_items = num_items;
        Ok(())
    }

    fn grow(&mut self, new_cap: usize) {
        self.state.resize(new_cap * self.num_labels, 0.0);
        self.alpha.resize(new_cap * self.alpha_rows, 0.0);
        self.beta.resize(new_cap * self.beta_rows, 0.0);
        self.child_alpha.resize(new_cap * self.num_labels, 0.0);
        self.scale_factor.resize(new_cap, 0.0);
        self.mexp_state.resize(new_cap * self.num_labels, 0.0);
        self.back_edge.resize(new_cap * self.alpha_rows, -1);
        self.back_end.resize(new_cap * self.alpha_rows, -1);
        if let Some(buf) = self.exp_state.as_mut() {
            buf.resize(new_cap * self.num_labels, 0.0);
        }
        self.cap_items = new_cap;
    }

    /// Zero the matrices named by `flags` (spec §9's reset-flag
    /// resolution). `All` also clears α, β, the scale vector, `log_norm`
    /// and the `exp_*` caches; `State`/`Trans` touch only their matrix.
    pub fn reset(&mut self, flags: ResetFlags) {
        let t = self.num_items;
        match flags {
            ResetFlags::State => {
                self.state[..t * self.num_labels].fill(0.0);
            }
            ResetFlags::Trans => {
                self.trans.fill(0.0);
            }
            ResetFlags::All => {
                self.state[..t * self.num_labels].fill(0.0);
                self.trans.fill(0.0);
                self.alpha[..t * self.alpha_rows].fill(0.0);
                self.beta[..t * self.beta_rows].fill(0.0);
                self.child_alpha[..t * self.num_labels].fill(0.0);
                self.scale_factor[..t].fill(0.0);
                self.mexp_state[..t * self.num_labels].fill(0.0);
                self.mexp_trans.fill(0.0);
                self.log_norm = 0.0;
                self.exp_state = None;
                self.exp_trans = None;
            }
        }
    }

    // ---- score matrix access -------------------------------------------------

    pub fn state_row(&self, t: usize) -> &[f64] {
        &self.state[t * self.num_labels..(t + 1) * self.num_labels]
    }

    pub fn state_row_mut(&mut self, t: usize) -> &mut [f64] {
        &mut self.state[t * self.num_labels..(t + 1) * self.num_labels]
    }

    pub fn state_slice_mut(&mut self) -> &mut [f64] {
        let t = self.num_items;
        &mut self.state[..t * self.num_labels]
    }

    pub fn trans_row(&self, src: usize) -> &[f64] {
        &self.trans[src * self.trans_cols..(src + 1) * self.trans_cols]
    }

    pub fn trans_slice(&self) -> &[f64] {
        &self.trans
    }

    pub fn trans_slice_mut(&mut self) -> &mut [f64] {
        &mut self.trans[..]
    }

    pub fn trans_cols(&self) -> usize {
        self.trans_cols
    }

    pub fn num_source_states(&self) -> usize {
        self.num_source_states
    }

    /// Build `exp_state`/`exp_trans` from the current log-space `state`/
    /// `trans` (spec §4.1's "Exponentiation"). Semi-Markov never builds
    /// `exp_trans` — its transitions stay in log space throughout.
    pub fn exponentiate(&mut self) {
        let t = self.num_items;
        let mut es = self.exp_state.take().unwrap_or_default();
        es.resize(t * self.num_labels, 0.0);
        for (dst, &src) in es.iter_mut().zip(self.state[..t * self.num_labels].iter()) {
            *dst = src.exp();
        }
        self.exp_state = Some(es);

        if self.kind != GraphKind::SemiMarkov {
            let mut et = self.exp_trans.take().unwrap_or_default();
            et.resize(self.trans.len(), 0.0);
            for (dst, &src) in et.iter_mut().zip(self.trans.iter()) {
                *dst = src.exp();
            }
            self.exp_trans = Some(et);
        }
    }

    pub fn exp_state(&self) -> &[f64] {
        self.exp_state.as_deref().expect("exp_state not built: call exponentiate() first")
    }

    pub fn exp_trans(&self) -> &[f64] {
        self.exp_trans.as_deref().expect("exp_trans not built or not applicable to this variant")
    }

    // ---- alpha/beta/scale access ----------------------------------------------

    pub fn alpha_row(&self, t: usize) -> &[f64] {
        &self.alpha[t * self.alpha_rows..(t + 1) * self.alpha_rows]
    }

    pub fn alpha_row_mut(&mut self, t: usize) -> &mut [f64] {
        &mut self.alpha[t * self.alpha_rows..(t + 1) * self.alpha_rows]
    }

    pub fn beta_row(&self, t: usize) -> &[f64] {
        &self.beta[t * self.beta_rows..(t + 1) * self.beta_rows]
    }

    pub fn beta_row_mut(&mut self, t: usize) -> &mut [f64] {
        &mut self.beta[t * self.beta_rows..(t + 1) * self.beta_rows]
    }

    pub fn child_alpha_row(&self, t: usize) -> &[f64] {
        &self.child_alpha[t * self.num_labels..(t + 1) * self.num_labels]
    }

    pub fn child_alpha_row_mut(&mut self, t: usize) -> &mut [f64] {
        &mut self.child_alpha[t * self.num_labels..(t + 1) * self.num_labels]
    }

    pub fn scale_factor(&self, t: usize) -> f64 {
        self.scale_factor[t]
    }

    pub fn set_scale_factor(&mut self, t: usize, value: f64) {
        self.scale_factor[t] = value;
    }

    pub fn alpha_rows(&self) -> usize {
        self.alpha_rows
    }

    pub fn beta_rows(&self) -> usize {
        self.beta_rows
    }

    // ---- marginals --------------------------------------------------------

    pub fn mexp_state_row(&self, t: usize) -> &[f64] {
        &self.mexp_state[t * self.num_labels..(t + 1) * self.num_labels]
    }

    pub fn mexp_state_row_mut(&mut self, t: usize) -> &mut [f64] {
        &mut self.mexp_state[t * self.num_labels..(t + 1) * self.num_labels]
    }

    pub fn mexp_trans_row(&self, src: usize) -> &[f64] {
        &self.mexp_trans[src * self.trans_cols..(src + 1) * self.trans_cols]
    }

    pub fn mexp_trans_row_mut(&mut self, src: usize) -> &mut [f64] {
        &mut self.mexp_trans[src * self.trans_cols..(src + 1) * self.trans_cols]
    }

    // ---- viterbi back-pointers ----------------------------------------------

    pub fn back_edge_row(&self, t: usize) -> &[i64] {
        &self.back_edge[t * self.alpha_rows..(t + 1) * self.alpha_rows]
    }

    pub fn back_edge_row_mut(&mut self, t: usize) -> &mut [i64] {
        &mut self.back_edge[t * self.alpha_rows..(t + 1) * self.alpha_rows]
    }

    pub fn back_end_row_mut(&mut self, t: usize) -> &mut [i64] {
        &mut self.back_end[t * self.alpha_rows..(t + 1) * self.alpha_rows]
    }

    pub fn back_end_row(&self, t: usize) -> &[i64] {
        &self.back_end[t * self.alpha_rows..(t + 1) * self.alpha_rows]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_capacity_by_doubling() {
        let mut ctx = NumericContext::new(GraphKind::Chain, 2, 2, 2, 2, 2);
        ctx.set_num_items(3).unwrap();
        assert_eq!(ctx.cap_items(), 4);
        ctx.set_num_items(4).unwrap();
        assert_eq!(ctx.cap_items(), 4);
        ctx.set_num_items(5).unwrap();
        assert_eq!(ctx.cap_items(), 8);
    }

    #[test]
    fn rejects_zero_items() {
        let mut ctx = NumericContext::new(GraphKind::Chain, 2, 2, 2, 2, 2);
        assert!(ctx.set_num_items(0).is_err());
    }

    #[test]
    fn reset_state_only_touches_state() {
        let mut ctx = NumericContext::new(GraphKind::Chain, 2, 2, 2, 2, 2);
        ctx.set_num_items(1).unwrap();
        ctx.state_row_mut(0)[0] = 5.0;
        ctx.trans_slice_mut()[0] = 7.0;
        ctx.reset(ResetFlags::State);
        assert_eq!(ctx.state_row(0)[0], 0.0);
        assert_eq!(ctx.trans_row(0)[0], 7.0);
    }
}
