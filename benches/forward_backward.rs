//! Micro-benchmark of the [`NumericContext`] forward-backward kernel
//! across sequence lengths, for the chain and semi-Markov variants (the
//! two recurrences with meaningfully different asymptotic cost: chain is
//! `O(T * L^2)`, semi-Markov is `O(T * max_seg_len * L * num_states)`).

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use crf_core::context::{chain, semi_markov};
use crf_core::{GraphKind, NumericContext, ResetFlags, SemiMarkovTables};

fn chain_context(t_max: usize, num_labels: usize) -> NumericContext {
    let mut ctx = NumericContext::new(GraphKind::Chain, num_labels, num_labels, num_labels, num_labels, num_labels);
    ctx.set_num_items(t_max).unwrap();
    ctx.reset(ResetFlags::All);
    for t in 0..t_max {
        let row = ctx.state_row_mut(t);
        for (l, v) in row.iter_mut().enumerate() {
            *v = 0.1 * ((t + l) % 7) as f64 - 0.3;
        }
    }
    for (i, v) in ctx.trans_slice_mut().iter_mut().enumerate() {
        *v = 0.1 * (i % 5) as f64 - 0.2;
    }
    ctx.exponentiate();
    ctx
}

fn bench_chain_forward_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_forward_backward");
    for &t_max in &[16usize, 64, 256] {
        group.bench_function(format!("T={t_max}_L=8"), |b| {
            b.iter(|| {
                let mut ctx = chain_context(t_max, 8);
                chain::alpha(black_box(&mut ctx)).unwrap();
                chain::beta(black_box(&mut ctx));
                chain::marginals(black_box(&mut ctx));
            })
        });
    }
    group.finish();
}

fn semi_markov_context(t_max: usize, num_labels: usize, max_seg_len: usize) -> (NumericContext, SemiMarkovTables) {
    let sm = SemiMarkovTables::order1(num_labels, Some(max_seg_len));
    let mut ctx = NumericContext::new(
        GraphKind::SemiMarkov,
        num_labels,
        sm.num_forward_states(),
        sm.num_patterns(),
        sm.num_forward_states(),
        sm.num_backward_states(),
    );
    ctx.set_num_items(t_max).unwrap();
    ctx.reset(ResetFlags::All);
    for t in 0..t_max {
        let row = ctx.state_row_mut(t);
        for (l, v) in row.iter_mut().enumerate() {
            *v = 0.1 * ((t + l) % 7) as f64 - 0.3;
        }
    }
    for (i, v) in ctx.trans_slice_mut().iter_mut().enumerate() {
        *v = 0.1 * (i % 5) as f64 - 0.2;
    }
    (ctx, sm)
}

fn bench_semi_markov_forward_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("semi_markov_forward_backward");
    for &t_max in &[16usize, 64, 256] {
        group.bench_function(format!("T={t_max}_L=4_maxseg=4"), |b| {
            b.iter(|| {
                let (mut ctx, sm) = semi_markov_context(t_max, 4, 4);
                semi_markov::alpha(black_box(&mut ctx), &sm).unwrap();
                semi_markov::beta(black_box(&mut ctx), &sm);
                semi_markov::marginals(black_box(&mut ctx), &sm);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chain_forward_backward, bench_semi_markov_forward_backward);
criterion_main!(benches);
