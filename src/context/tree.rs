//! Tree-structured forward-backward, Viterbi, marginals and path score
//! (spec §4.1's tree variant).
//!
//! α runs post-order (children before parents); β runs pre-order (parents
//! before children) — the resolution spec §9 calls for. The transition
//! matrix is addressed `trans[parent_label][child_label]`, matching the
//! direction the α recurrence sums over (`child_alpha[c, i] = sum_l
//! trans[i, l] * alpha[c, l]`, `i` ranging over the parent's candidate
//! labels); this also fixes the otherwise-ambiguous index order in the
//! tree path-score sum (see DESIGN.md).

use crate::error::{CrfError, CrfResult};
use crate::instance::TreeTopology;

use super::NumericContext;

/// Bottom-up (post-order) scaled α. Each node's column is renormalized
/// like a chain column, so `log_norm = -sum_t log(scale_factor[t])`
/// telescopes to the same log-partition identity as the chain case.
pub fn alpha(ctx: &mut NumericContext, tree: &TreeTopology) -> CrfResult<()> {
    let l = ctx.num_labels();

    for &node in &tree.post_order {
        let exp_state_node = ctx.exp_state()[node * l..(node + 1) * l].to_vec();
        let children = &tree.children[node];

        if children.is_empty() {
            ctx.alpha_row_mut(node).copy_from_slice(&exp_state_node);
        } else {
            let exp_trans = ctx.exp_trans().to_vec();
            // child_alpha[c, i] = sum_l trans[i, l] * alpha[c, l]
            for &c in children {
                let alpha_c = ctx.alpha_row(c).to_vec();
                let msg = ctx.child_alpha_row_mut(c);
                for i in 0..l {
                    let mut sum = 0.0;
                    for (ll, &a) in alpha_c.iter().enumerate() {
                        sum += exp_trans[i * l + ll] * a;
                    }
                    msg[i] = sum;
                }
            }
            let row = ctx.alpha_row_mut(node);
            row.copy_from_slice(&exp_state_node);
            for &c in children {
                let msg = ctx.child_alpha_row(c).to_vec();
                for (r, m) in row.iter_mut().zip(msg.iter()) {
                    *r *= m;
                }
            }
        }
        normalize_column(ctx, node)?;
    }

    let log_norm: f64 = tree.post_order.iter().map(|&t| -ctx.scale_factor(t).ln()).sum();
    ctx.log_norm = log_norm;
    Ok(())
}

fn normalize_column(ctx: &mut NumericContext, t: usize) -> CrfResult<()> {
    let sum: f64 = ctx.alpha_row(t).iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return Err(CrfError::Arithmetic(format!(
            "scale factor collapsed to zero at node {t}: zero-probability instance under current weights"
        )));
    }
    if sum < 1e-300 {
        tracing::warn!(node = t, column_sum = sum, "alpha column nearly underflowed before scaling");
    }
    let scale = 1.0 / sum;
    for v in ctx.alpha_row_mut(t) {
        *v *= scale;
    }
    ctx.set_scale_factor(t, scale);
    Ok(())
}

/// Top-down (pre-order) scaled β. The root's boundary is
/// `beta[root, l] = scale_factor[root]`, symmetric to the chain's final
/// column; every other node receives a downward message from its parent
/// that excludes its own subtree's upward contribution (the standard
/// sum-product "cavity" construction).
pub fn beta(ctx: &mut NumericContext, tree: &TreeTopology) {
    let l = ctx.num_labels();
    let scale_root = ctx.scale_factor(tree.root);
    ctx.beta_row_mut(tree.root).iter_mut().for_each(|v| *v = scale_root);

    for &node in &tree.pre_order {
        let children = &tree.children[node];
        if children.is_empty() {
            continue;
        }
        let exp_state_node = ctx.exp_state()[node * l..(node + 1) * l].to_vec();
        let beta_node = ctx.beta_row(node).to_vec();
        let exp_trans = ctx.exp_trans().to_vec();

        // outside_full[i] = beta[node,i] * exp_state[node,i], the
        // everything-outside-the-subtree factor common to every child.
        let outside_common: Vec<f64> =
            (0..l).map(|i| beta_node[i] * exp_state_node[i]).collect();

        // Prefix/suffix products over children's messages let us divide
        // out one child's contribution without ever dividing by zero.
        let msgs: Vec<Vec<f64>> = children.iter().map(|&c| ctx.child_alpha_row(c).to_vec()).collect();
        let n = children.len();
        let mut prefix = vec![vec![1.0; l]; n + 1];
        let mut suffix = vec![vec![1.0; l]; n + 1];
        for k in 0..n {
            for i in 0..l {
                prefix[k + 1][i] = prefix[k][i] * msgs[k][i];
            }
        }
        for k in (0..n).rev() {
            for i in 0..l {
                suffix[k][i] = suffix[k + 1][i] * msgs[k][i];
            }
        }

        for (k, &c) in children.iter().enumerate() {
            let exclude: Vec<f64> = (0..l).map(|i| prefix[k][i] * suffix[k + 1][i]).collect();
            let outside_c: Vec<f64> =
                (0..l).map(|i| outside_common[i] * exclude[i]).collect();

            let scale_c = ctx.scale_factor(c);
            let row = ctx.beta_row_mut(c);
            for ll in 0..l {
                let mut sum = 0.0;
                for i in 0..l {
                    sum += exp_trans[i * l + ll] * outside_c[i];
                }
                row[ll] = scale_c * sum;
            }
        }
    }
}

/// Marginals following the same cavity construction as [`beta`]:
/// `mexp_state[t,l] = alpha[t,l]*beta[t,l]/scale_factor[t]`; each
/// parent-child edge contributes `outside_c_full[i] * trans[i,j] *
/// alpha[c,j]` to `mexp_trans[i,j]`.
pub fn marginals(ctx: &mut NumericContext, tree: &TreeTopology) {
    let l = ctx.num_labels();

    for &t in &tree.post_order {
        let scale = ctx.scale_factor(t);
        let alpha_row = ctx.alpha_row(t).to_vec();
        let beta_row = ctx.beta_row(t).to_vec();
        let out = ctx.mexp_state_row_mut(t);
        for (o, (a, b)) in out.iter_mut().zip(alpha_row.iter().zip(beta_row.iter())) {
            *o = a * b / scale;
        }
    }

    for i in 0..ctx.num_source_states() {
        ctx.mexp_trans_row_mut(i).fill(0.0);
    }

    for &node in &tree.pre_order {
        let children = &tree.children[node];
        if children.is_empty() {
            continue;
        }
        let exp_state_node = ctx.exp_state()[node * l..(node + 1) * l].to_vec();
        let beta_node = ctx.beta_row(node).to_vec();
        let exp_trans = ctx.exp_trans().to_vec();
        let outside_common: Vec<f64> =
            (0..l).map(|i| beta_node[i] * exp_state_node[i]).collect();

        let msgs: Vec<Vec<f64>> = children.iter().map(|&c| ctx.child_alpha_row(c).to_vec()).collect();
        let n = children.len();
        let mut prefix = vec![vec![1.0; l]; n + 1];
        let mut suffix = vec![vec![1.0; l]; n + 1];
        for k in 0..n {
            for i in 0..l {
                prefix[k + 1][i] = prefix[k][i] * msgs[k][i];
            }
        }
        for k in (0..n).rev() {
            for i in 0..l {
                suffix[k][i] = suffix[k + 1][i] * msgs[k][i];
            }
        }

        for (k, &c) in children.iter().enumerate() {
            let exclude: Vec<f64> = (0..l).map(|i| prefix[k][i] * suffix[k + 1][i]).collect();
            let outside_c: Vec<f64> =
                (0..l).map(|i| outside_common[i] * exclude[i]).collect();
            let alpha_c = ctx.alpha_row(c).to_vec();

            for i in 0..l {
                let row = ctx.mexp_trans_row_mut(i);
                for j in 0..l {
                    row[j] += outside_c[i] * exp_trans[i * l + j] * alpha_c[j];
                }
            }
        }
    }
}

/// Max-product Viterbi, bottom-up in log space with back-pointers stored
/// per child (spec §4.1): `back_edge[c, i]` is the child's best label
/// given that its parent takes label `i`. Traceback walks the tree
/// pre-order from the root's argmax.
pub fn viterbi(ctx: &mut NumericContext, tree: &TreeTopology, path_out: &mut [u32]) -> f64 {
    let l = ctx.num_labels();

    // `score[t]` (log-space, analogous to chain's running score) is
    // stored directly in `alpha` storage, reused as scratch.
    for &node in &tree.post_order {
        let state_node = ctx.state_row(node).to_vec();
        let children = tree.children[node].clone();
        if children.is_empty() {
            ctx.alpha_row_mut(node).copy_from_slice(&state_node);
            continue;
        }

        let mut total = state_node;
        for &c in &children {
            let score_c = ctx.alpha_row(c).to_vec();
            let back = ctx.back_edge_row_mut(c);
            for i in 0..l {
                let mut best = f64::NEG_INFINITY;
                let mut best_label = 0usize;
                for (ll, &sc) in score_c.iter().enumerate() {
                    let cand = ctx.trans_row(i)[ll] + sc;
                    if cand > best || (cand == best && ll < best_label) {
                        best = cand;
                        best_label = ll;
                    }
                }
                back[i] = best_label as i64;
                total[i] += best;
            }
        }
        ctx.alpha_row_mut(node).copy_from_slice(&total);
    }

    let root_score = ctx.alpha_row(tree.root).to_vec();
    let mut best_final = f64::NEG_INFINITY;
    let mut best_label = 0usize;
    for (ll, &s) in root_score.iter().enumerate() {
        if s > best_final || (s == best_final && ll < best_label) {
            best_final = s;
            best_label = ll;
        }
    }

    path_out[tree.root] = best_label as u32;
    for &node in &tree.pre_order {
        let parent_label = path_out[node] as usize;
        for &c in &tree.children[node] {
            let child_label = ctx.back_edge_row(c)[parent_label] as usize;
            path_out[c] = child_label as u32;
        }
    }
    best_final
}

/// Sum of `state[t, labels[t]]` over all nodes plus
/// `trans[labels[parent], labels[child]]` over every edge.
pub fn path_score(ctx: &NumericContext, tree: &TreeTopology, labels: &[u32]) -> f64 {
    let mut score = 0.0;
    for &t in &tree.post_order {
        score += ctx.state_row(t)[labels[t] as usize];
    }
    for (node, parent) in tree.parent.iter().enumerate() {
        if let Some(p) = parent {
            score += ctx.trans_row(labels[*p] as usize)[labels[node] as usize];
        }
    }
    score
}
