//! Chain forward-backward, Viterbi, marginals and path score (spec §4.1).
//!
//! Scaled linear-space recurrences: each column of α is renormalized by
//! `scale_factor[t] = 1 / sum_l alpha[t, l]` as it is produced, and β
//! reuses the same scale so that `alpha[t,l] * beta[t,l] * scale_factor[t]`
//! is a proper marginal. `log_norm = -sum_t log(scale_factor[t])`.

use crate::error::{CrfError, CrfResult};

use super::NumericContext;

/// `alpha[0,l] = exp_state[0,l]`; `alpha[t,l] = exp_state[t,l] * sum_i
/// alpha[t-1,i] * exp_trans[i,l]`, each column rescaled to sum to 1.
///
/// Returns `Err(Arithmetic)` if a column's unnormalized sum is zero — an
/// instance with zero probability under the current weights, for which
/// `log_norm` is undefined (spec §7).
pub fn alpha(ctx: &mut NumericContext) -> CrfResult<()> {
    let l = ctx.num_labels();
    let t_max = ctx.num_items();

    {
        let exp_state = ctx.exp_state();
        let row0 = exp_state[..l].to_vec();
        ctx.alpha_row_mut(0).copy_from_slice(&row0);
    }
    normalize_alpha_column(ctx, 0)?;

    for t in 1..t_max {
        let prev = ctx.alpha_row(t - 1).to_vec();
        let exp_state_t = ctx.exp_state()[t * l..(t + 1) * l].to_vec();
        let exp_trans = ctx.exp_trans().to_vec();
        let row = ctx.alpha_row_mut(t);
        for dst in 0..l {
            let mut sum = 0.0;
            for (src, &a_prev) in prev.iter().enumerate() {
                sum += a_prev * exp_trans[src * l + dst];
            }
            row[dst] = exp_state_t[dst] * sum;
        }
        normalize_alpha_column(ctx, t)?;
    }

    let log_norm: f64 = (0..t_max).map(|t| -ctx.scale_factor(t).ln()).sum();
    ctx.log_norm = log_norm;
    Ok(())
}

fn normalize_alpha_column(ctx: &mut NumericContext, t: usize) -> CrfResult<()> {
    let sum: f64 = ctx.alpha_row(t).iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return Err(CrfError::Arithmetic(format!(
            "scale factor collapsed to zero at item {t}: zero-probability instance under current weights"
        )));
    }
    if sum < 1e-300 {
        tracing::warn!(item = t, column_sum = sum, "alpha column nearly underflowed before scaling");
    }
    let scale = 1.0 / sum;
    for v in ctx.alpha_row_mut(t) {
        *v *= scale;
    }
    ctx.set_scale_factor(t, scale);
    Ok(())
}

/// `beta[T-1,l] = scale_factor[T-1]`; `beta[t,l] = scale_factor[t] * sum_j
/// exp_trans[l,j] * exp_state[t+1,j] * beta[t+1,j]`.
pub fn beta(ctx: &mut NumericContext) {
    let l = ctx.num_labels();
    let t_max = ctx.num_items();
    let last = t_max - 1;
    let scale_last = ctx.scale_factor(last);
    ctx.beta_row_mut(last).iter_mut().for_each(|v| *v = scale_last);

    for t in (0..last).rev() {
        let next = ctx.beta_row(t + 1).to_vec();
        let exp_state_next = ctx.exp_state()[(t + 1) * l..(t + 2) * l].to_vec();
        let exp_trans = ctx.exp_trans().to_vec();
        let scale = ctx.scale_factor(t);
        let row = ctx.beta_row_mut(t);
        for src in 0..l {
            let mut sum = 0.0;
            for j in 0..l {
                sum += exp_trans[src * l + j] * exp_state_next[j] * next[j];
            }
            row[src] = scale * sum;
        }
    }
}

/// `mexp_state[t,l] = alpha[t,l] * beta[t,l] / scale_factor[t]`;
/// `mexp_trans[i,j] += sum_t alpha[t,i] * exp_trans[i,j] * exp_state[t+1,j]
/// * beta[t+1,j]`.
pub fn marginals(ctx: &mut NumericContext) {
    let l = ctx.num_labels();
    let t_max = ctx.num_items();

    for t in 0..t_max {
        let scale = ctx.scale_factor(t);
        let alpha_row = ctx.alpha_row(t).to_vec();
        let beta_row = ctx.beta_row(t).to_vec();
        let out = ctx.mexp_state_row_mut(t);
        for (o, (a, b)) in out.iter_mut().zip(alpha_row.iter().zip(beta_row.iter())) {
            *o = a * b / scale;
        }
    }

    for i in 0..l {
        ctx.mexp_trans_row_mut(i).fill(0.0);
    }
    for t in 0..t_max.saturating_sub(1) {
        let alpha_row = ctx.alpha_row(t).to_vec();
        let beta_next = ctx.beta_row(t + 1).to_vec();
        let exp_state_next = ctx.exp_state()[(t + 1) * l..(t + 2) * l].to_vec();
        let exp_trans = ctx.exp_trans().to_vec();
        for i in 0..l {
            let row = ctx.mexp_trans_row_mut(i);
            for j in 0..l {
                row[j] += alpha_row[i] * exp_trans[i * l + j] * exp_state_next[j] * beta_next[j];
            }
        }
    }
}

/// Max-product Viterbi in log space; ties broken toward the smaller
/// predecessor id (spec §4.1). `path_out` receives the best label for
/// each item; returns the path's (unnormalized) log score.
pub fn viterbi(ctx: &mut NumericContext, path_out: &mut [u32]) -> f64 {
    let l = ctx.num_labels();
    let t_max = ctx.num_items();

    // log-space score column, reusing `alpha` storage as scratch since it
    // is not needed once alpha/beta for marginals has already run.
    let mut score = ctx.state_row(0).to_vec();
    for t in 1..t_max {
        let state_t = ctx.state_row(t).to_vec();
        let mut next_score = vec![0.0; l];
        let back = ctx.back_edge_row_mut(t);
        for dst in 0..l {
            let mut best = f64::NEG_INFINITY;
            let mut best_src = 0usize;
            for src in 0..l {
                let cand = score[src] + ctx.trans_row(src)[dst];
                if cand > best || (cand == best && src < best_src) {
                    best = cand;
                    best_src = src;
                }
            }
            next_score[dst] = best + state_t[dst];
            back[dst] = best_src as i64;
        }
        score = next_score;
    }

    let mut best_final = f64::NEG_INFINITY;
    let mut best_label = 0usize;
    for (l_idx, &s) in score.iter().enumerate() {
        if s > best_final || (s == best_final && l_idx < best_label) {
            best_final = s;
            best_label = l_idx;
        }
    }

    path_out[t_max - 1] = best_label as u32;
    let mut cur = best_label;
    for t in (1..t_max).rev() {
        cur = ctx.back_edge_row(t)[cur] as usize;
        path_out[t - 1] = cur as u32;
    }
    best_final
}

/// Sum of `state[t, labels[t]]` plus `trans[labels[t-1], labels[t]]` over
/// the given label sequence (spec §4.1's "Path score").
pub fn path_score(ctx: &NumericContext, labels: &[u32]) -> f64 {
    let t_max = ctx.num_items();
    let mut score = 0.0;
    for t in 0..t_max {
        score += ctx.state_row(t)[labels[t] as usize];
        if t > 0 {
            score += ctx.trans_row(labels[t - 1] as usize)[labels[t] as usize];
        }
    }
    score
}
