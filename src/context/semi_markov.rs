//! Semi-Markov forward-backward, Viterbi, marginals and path score
//! (spec §4.1's semi-Markov variant).
//!
//! Unlike chain/tree, this runs entirely in log space via log-sum-exp
//! (spec §9's design note): segment scores spanning variable lengths have
//! too wide a dynamic range for per-column linear scaling to stay stable
//! when segments of different lengths terminate at the same column.
//! `NumericContext::exp_trans` is never built for this variant; `trans`
//! stays in log space and is read directly.

use crate::error::{CrfError, CrfResult};
use crate::feature::SemiMarkovTables;

use super::logsumexp::{logsumexp, logsumexp_acc};
use super::NumericContext;

/// `log(1)`-valued virtual boundary before item 0 / after the last item:
/// all mass at the designated state, `-inf` elsewhere.
fn boundary_vec(num_states: usize, active: u32) -> Vec<f64> {
    let mut v = vec![f64::NEG_INFINITY; num_states];
    v[active as usize] = 0.0;
    v
}

/// Prefix sums of `state[t, label]` so `segment_score(start, end, label)`
/// is an O(1) difference instead of an O(segment length) scan.
struct PrefixSums {
    num_labels: usize,
    // prefix[label * (T+1) + t] = sum_{i<t} state[i, label]
    prefix: Vec<f64>,
}

impl PrefixSums {
    fn build(ctx: &NumericContext) -> Self {
        let l = ctx.num_labels();
        let t_max = ctx.num_items();
        let mut prefix = vec![0.0; l * (t_max + 1)];
        for label in 0..l {
            let mut acc = 0.0;
            prefix[label * (t_max + 1)] = 0.0;
            for t in 0..t_max {
                acc += ctx.state_row(t)[label];
                prefix[label * (t_max + 1) + t + 1] = acc;
            }
        }
        PrefixSums { num_labels: l, prefix }
    }

    /// Sum of `state[t, label]` for `t` in `[start, end]` inclusive.
    fn segment_score(&self, start: usize, end: usize, label: usize, t_max: usize) -> f64 {
        let stride = t_max + 1;
        self.prefix[label * stride + end + 1] - self.prefix[label * stride + start]
    }
}

/// `alpha[t, s'] = logsumexp over (d, s, l) reaching s' { alpha[t-d, s] +
/// segment_score(t-d+1..t, l) + trans[s, pattern(s,l)] }`, `alpha[-1, ·]`
/// being the BOS boundary.
pub fn alpha(ctx: &mut NumericContext, sm: &SemiMarkovTables) -> CrfResult<()> {
    let t_max = ctx.num_items();
    let sums = PrefixSums::build(ctx);
    let bos = boundary_vec(sm.num_forward_states(), sm.initial_state());

    for t in 0..t_max {
        let mut col = vec![f64::NEG_INFINITY; sm.num_forward_states()];
        for d in sm.admissible_lengths(t + 1) {
            let start = t + 1 - d;
            let prev: Vec<f64> = if start == 0 {
                bos.clone()
            } else {
                ctx.alpha_row(start - 1).to_vec()
            };
            for s in 0..sm.num_forward_states() as u32 {
                let a_prev = prev[s as usize];
                if a_prev == f64::NEG_INFINITY {
                    continue;
                }
                for label in 0..sums.num_labels as u32 {
                    let (s2, pattern) = sm.forward_step(s, label);
                    let seg = sums.segment_score(start, t, label as usize, t_max);
                    let trans_score = ctx.trans_row(s as usize)[pattern as usize];
                    let val = a_prev + seg + trans_score;
                    logsumexp_acc(&mut col[s2 as usize], val);
                }
            }
        }
        ctx.alpha_row_mut(t).copy_from_slice(&col);
    }

    ctx.log_norm = logsumexp(ctx.alpha_row(t_max - 1).iter().copied());
    if !ctx.log_norm.is_finite() {
        return Err(CrfError::Arithmetic(
            "semi-Markov log_norm is -inf: zero-probability instance under current weights".into(),
        ));
    }
    if ctx.log_norm < -700.0 {
        tracing::warn!(log_norm = ctx.log_norm, "semi-Markov log_norm nearly underflowed");
    }
    Ok(())
}

/// `beta[T-1, ·] = 0` (log space); `beta[t, s] = logsumexp over (d, l) {
/// trans[s, pattern(s,l)] + segment_score(t+1..t+d, l) + beta[t+d, s'] }`.
pub fn beta(ctx: &mut NumericContext, sm: &SemiMarkovTables) {
    let t_max = ctx.num_items();
    let sums = PrefixSums::build(ctx);

    ctx.beta_row_mut(t_max - 1).iter_mut().for_each(|v| *v = 0.0);

    for t in (0..t_max - 1).rev() {
        let remaining = t_max - 1 - t;
        let mut col = vec![f64::NEG_INFINITY; sm.num_forward_states()];
        for d in sm.admissible_lengths(remaining) {
            let end = t + d;
            let next: Vec<f64> = ctx.beta_row(end).to_vec();
            for s in 0..sm.num_forward_states() as u32 {
                let mut best_for_s = f64::NEG_INFINITY;
                for label in 0..sums.num_labels as u32 {
                    let (s2, pattern) = sm.forward_step(s, label);
                    if next[s2 as usize] == f64::NEG_INFINITY {
                        continue;
                    }
                    let seg = sums.segment_score(t + 1, end, label as usize, t_max);
                    let trans_score = ctx.trans_row(s as usize)[pattern as usize];
                    let val = trans_score + seg + next[s2 as usize];
                    logsumexp_acc(&mut best_for_s, val);
                }
                logsumexp_acc(&mut col[s as usize], best_for_s);
            }
        }
        ctx.beta_row_mut(t).copy_from_slice(&col);
    }
}

/// Per-segment marginal probability assigned to every item it covers, and
/// per-(forward-state, pattern) transition expectation; both the natural
/// generalization of the chain recurrence to segments (spec §4.1).
pub fn marginals(ctx: &mut NumericContext, sm: &SemiMarkovTables) {
    let t_max = ctx.num_items();
    let sums = PrefixSums::build(ctx);
    let bos = boundary_vec(sm.num_forward_states(), sm.initial_state());
    let log_norm = ctx.log_norm;

    for t in 0..t_max {
        ctx.mexp_state_row_mut(t).fill(0.0);
    }
    for s in 0..sm.num_forward_states() {
        ctx.mexp_trans_row_mut(s).fill(0.0);
    }

    for t in 0..t_max {
        for d in sm.admissible_lengths(t + 1) {
            let start = t + 1 - d;
            let prev: Vec<f64> = if start == 0 {
                bos.clone()
            } else {
                ctx.alpha_row(start - 1).to_vec()
            };
            for s in 0..sm.num_forward_states() as u32 {
                let a_prev = prev[s as usize];
                if a_prev == f64::NEG_INFINITY {
                    continue;
                }
                for label in 0..sums.num_labels as u32 {
                    let (s2, pattern) = sm.forward_step(s, label);
                    let beta_next = if t == t_max - 1 { 0.0 } else { ctx.beta_row(t)[s2 as usize] };
                    if beta_next == f64::NEG_INFINITY {
                        continue;
                    }
                    let seg = sums.segment_score(start, t, label as usize, t_max);
                    let trans_score = ctx.trans_row(s as usize)[pattern as usize];
                    let log_prob = a_prev + seg + trans_score + beta_next - log_norm;
                    let prob = log_prob.exp();

                    for item in start..=t {
                        ctx.mexp_state_row_mut(item)[label as usize] += prob;
                    }
                    ctx.mexp_trans_row_mut(s as usize)[pattern as usize] += prob;
                }
            }
        }
    }
}

/// Max-plus Viterbi over segments. `back_edge[t, s']` stores the pattern
/// id activated by the winning segment (from which both the predecessor
/// state and the emitted label are recoverable); `back_end[t, s']` stores
/// the predecessor segment's last row, or `-1` for the BOS boundary.
pub fn viterbi(ctx: &mut NumericContext, sm: &SemiMarkovTables, path_out: &mut [u32]) -> f64 {
    let t_max = ctx.num_items();
    let sums = PrefixSums::build(ctx);
    let bos = boundary_vec(sm.num_forward_states(), sm.initial_state());

    // Reuse `alpha` storage for the running max-score column.
    for t in 0..t_max {
        let mut best_score = vec![f64::NEG_INFINITY; sm.num_forward_states()];
        let mut best_pattern = vec![-1i64; sm.num_forward_states()];
        let mut best_prev_end = vec![-1i64; sm.num_forward_states()];

        for d in sm.admissible_lengths(t + 1) {
            let start = t + 1 - d;
            let prev: Vec<f64> = if start == 0 {
                bos.clone()
            } else {
                ctx.alpha_row(start - 1).to_vec()
            };
            for s in 0..sm.num_forward_states() as u32 {
                let a_prev = prev[s as usize];
                if a_prev == f64::NEG_INFINITY {
                    continue;
                }
                for label in 0..sums.num_labels as u32 {
                    let (s2, pattern) = sm.forward_step(s, label);
                    let seg = sums.segment_score(start, t, label as usize, t_max);
                    let trans_score = ctx.trans_row(s as usize)[pattern as usize];
                    let val = a_prev + seg + trans_score;
                    let s2u = s2 as usize;
                    if val > best_score[s2u]
                        || (val == best_score[s2u] && (start as i64 - 1) < best_prev_end[s2u])
                    {
                        best_score[s2u] = val;
                        best_pattern[s2u] = pattern as i64;
                        best_prev_end[s2u] = start as i64 - 1;
                    }
                }
            }
        }

        ctx.alpha_row_mut(t).copy_from_slice(&best_score);
        ctx.back_edge_row_mut(t).copy_from_slice(&best_pattern);
        ctx.back_end_row_mut(t).copy_from_slice(&best_prev_end);
    }

    let final_scores = ctx.alpha_row(t_max - 1).to_vec();
    let mut best_final = f64::NEG_INFINITY;
    let mut best_state = 0usize;
    for (s, &v) in final_scores.iter().enumerate() {
        if v > best_final || (v == best_final && s < best_state) {
            best_final = v;
            best_state = s;
        }
    }

    let mut cur_end = t_max as i64 - 1;
    let mut cur_state = best_state;
    while cur_end >= 0 {
        let t = cur_end as usize;
        let pattern = ctx.back_edge_row(t)[cur_state] as u32;
        let label = sm.pattern_to_last_label(pattern);
        let prev_end = ctx.back_end_row(t)[cur_state];
        let start = (prev_end + 1) as usize;
        for item in start..=t {
            path_out[item] = label;
        }
        cur_state = sm.pattern_to_src_state(pattern) as usize;
        cur_end = prev_end;
    }
    best_final
}

/// Sum of segment state scores plus the transition score for each
/// segment boundary induced by `labels` (run-length-encoded into
/// segments first).
pub fn path_score(ctx: &NumericContext, sm: &SemiMarkovTables, labels: &[u32]) -> f64 {
    let t_max = labels.len();
    let sums = PrefixSums::build(ctx);
    let mut score = 0.0;
    let mut state = sm.initial_state();
    let mut t = 0usize;
    while t < t_max {
        let label = labels[t];
        let mut end = t;
        while end + 1 < t_max && labels[end + 1] == label {
            end += 1;
        }
        let (next_state, pattern) = sm.forward_step(state, label);
        score += sums.segment_score(t, end, label as usize, t_max);
        score += ctx.trans_row(state as usize)[pattern as usize];
        state = next_state;
        t = end + 1;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{chain, GraphKind, ResetFlags};

    fn context_with_tables(t_max: usize, max_seg_len: Option<usize>) -> (NumericContext, SemiMarkovTables) {
        let sm = SemiMarkovTables::order1(2, max_seg_len);
        let mut ctx = NumericContext::new(
            GraphKind::SemiMarkov,
            2,
            sm.num_forward_states(),
            sm.num_patterns(),
            sm.num_forward_states(),
            sm.num_backward_states(),
        );
        ctx.set_num_items(t_max).unwrap();
        ctx.reset(ResetFlags::All);
        for t in 0..t_max {
            ctx.state_row_mut(t).copy_from_slice(&[0.4, -0.2]);
        }
        // Uniform transition weight for every (state, pattern).
        for row in ctx.trans_slice_mut().iter_mut() {
            *row = 0.1;
        }
        (ctx, sm)
    }

    #[test]
    fn two_item_two_segmentations_log_norm() {
        let (mut ctx, sm) = context_with_tables(2, Some(2));
        alpha(&mut ctx, &sm).unwrap();

        // Brute-force over every labeling of 2 items, using the same
        // segment-decomposition path_score to cross-check log_norm.
        let mut total = f64::NEG_INFINITY;
        for mask in 0..4u32 {
            let labels = vec![mask & 1, (mask >> 1) & 1];
            let s = path_score(&ctx, &sm, &labels);
            total = logsumexp([total, s]);
        }
        assert!((total - ctx.log_norm).abs() < 1e-9);
    }

    #[test]
    fn max_seg_len_one_matches_chain() {
        let (mut sm_ctx, sm) = context_with_tables(3, Some(1));
        alpha(&mut sm_ctx, &sm).unwrap();

        // With segments capped at length 1, the semi-Markov lattice
        // degenerates to an order-1 chain over `num_labels` with BOS.
        let mut chain_ctx = NumericContext::new(GraphKind::Chain, 2, 2, 2, 2, 2);
        chain_ctx.set_num_items(3).unwrap();
        chain_ctx.reset(ResetFlags::All);
        for t in 0..3 {
            chain_ctx.state_row_mut(t).copy_from_slice(&[0.4, -0.2]);
        }
        chain_ctx.trans_slice_mut().fill(0.1);
        chain_ctx.exponentiate();
        chain::alpha(&mut chain_ctx).unwrap();

        assert!((sm_ctx.log_norm - chain_ctx.log_norm).abs() < 1e-9);
    }

    #[test]
    fn marginal_normalization_and_viterbi_consistency() {
        let (mut ctx, sm) = context_with_tables(4, Some(2));
        alpha(&mut ctx, &sm).unwrap();
        beta(&mut ctx, &sm);
        marginals(&mut ctx, &sm);
        for t in 0..4 {
            let sum: f64 = ctx.mexp_state_row(t).iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }

        let mut path = vec![0u32; 4];
        let best = viterbi(&mut ctx, &sm, &mut path);
        assert!((path_score(&ctx, &sm, &path) - best).abs() < 1e-9);
        assert!(best <= ctx.log_norm + 1e-9);
    }
}
