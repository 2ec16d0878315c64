//! Numerical gradient check (spec §8 invariant 3): the analytic gradient
//! from `objective_and_gradients` must match a central finite-difference
//! estimate of `d(-log P(y|x))/dw` at random weight perturbations, for
//! every graph variant.

use crf_core::{Encoder, FeatureDescriptor, FeatureIndex, GraphKind, Instance, Item, SemiMarkovTables, TreeTopology};

const EPS: f64 = 1e-6;
const TOL: f64 = 1e-4;

/// A tiny deterministic "random" sequence so the test has no external
/// RNG dependency but still perturbs every weight by a distinct amount.
fn perturbation(i: usize) -> f64 {
    // A few irrational-ish multipliers mod 1, recentred to [-0.5, 0.5].
    let x = ((i as f64 + 1.0) * 2.718281828).fract();
    x - 0.5
}

fn objective_at(
    build: impl Fn() -> (FeatureIndex, Option<SemiMarkovTables>),
    kind: GraphKind,
    base_weights: &[f64],
    instance: &Instance,
    perturb_idx: usize,
    delta: f64,
) -> f64 {
    let (index, sm) = build();
    let mut w = base_weights.to_vec();
    w[perturb_idx] += delta;

    let mut encoder = match sm {
        Some(tables) => Encoder::semi_markov(index, tables),
        None => Encoder::chain_or_tree(kind, index).unwrap(),
    };
    encoder.set_weights(&w, 1.0).unwrap();
    encoder.set_instance(instance).unwrap();
    let mut g = vec![0.0; w.len()];
    encoder.objective_and_gradients(&mut g, 1.0).unwrap()
}

fn check_gradient(
    build: impl Fn() -> (FeatureIndex, Option<SemiMarkovTables>),
    kind: GraphKind,
    base_weights: Vec<f64>,
    instance: Instance,
) {
    let (index, sm) = build();
    let mut encoder = match sm.clone() {
        Some(tables) => Encoder::semi_markov(index, tables),
        None => Encoder::chain_or_tree(kind, index).unwrap(),
    };
    let mut w = base_weights.clone();
    for (i, wi) in w.iter_mut().enumerate() {
        *wi += perturbation(i);
    }
    encoder.set_weights(&w, 1.0).unwrap();
    encoder.set_instance(&instance).unwrap();
    let mut analytic_g = vec![0.0; w.len()];
    encoder.objective_and_gradients(&mut analytic_g, 1.0).unwrap();

    for i in 0..w.len() {
        let f_plus = objective_at(&build, kind, &w, &instance, i, EPS);
        let f_minus = objective_at(&build, kind, &w, &instance, i, -EPS);
        let numeric = (f_plus - f_minus) / (2.0 * EPS);
        assert!(
            (numeric - analytic_g[i]).abs() < TOL,
            "feature {i}: numeric={numeric} analytic={analytic_g[i]}"
        );
    }
}

fn chain_setup() -> (FeatureIndex, Option<SemiMarkovTables>) {
    let features = vec![
        FeatureDescriptor::state(0, 0, 1.0),
        FeatureDescriptor::state(0, 1, 1.0),
        FeatureDescriptor::state(1, 0, 1.0),
        FeatureDescriptor::transition(0, 0, 1.0),
        FeatureDescriptor::transition(0, 1, 1.0),
        FeatureDescriptor::transition(1, 0, 1.0),
        FeatureDescriptor::transition(1, 1, 1.0),
    ];
    (FeatureIndex::build(features, 2, 2, 2).unwrap(), None)
}

fn chain_instance() -> Instance {
    let mut a = Item::new();
    a.push(0, 1.0);
    a.push(1, 0.3);
    let mut b = Item::new();
    b.push(0, 0.7);
    let mut c = Item::new();
    c.push(1, 1.0);
    Instance::chain(vec![a, b, c], vec![0, 1, 0])
}

#[test]
fn chain_gradient_matches_finite_difference() {
    check_gradient(chain_setup, GraphKind::Chain, vec![0.0; 7], chain_instance());
}

fn tree_instance() -> Instance {
    let mut root = Item::new();
    root.push(0, 1.0);
    let mut leaf_a = Item::new();
    leaf_a.push(1, 0.5);
    let mut leaf_b = Item::new();
    leaf_b.push(0, 0.8);
    let topo = TreeTopology::from_parents(vec![None, Some(0), Some(0)]).unwrap();
    Instance::tree(vec![root, leaf_a, leaf_b], vec![0, 1, 0], topo).unwrap()
}

#[test]
fn tree_gradient_matches_finite_difference() {
    check_gradient(chain_setup, GraphKind::Tree, vec![0.0; 7], tree_instance());
}

fn semi_markov_setup() -> (FeatureIndex, Option<SemiMarkovTables>) {
    let sm = SemiMarkovTables::order1(2, Some(2));
    let mut features = Vec::new();
    for state in 0..sm.num_forward_states() as u32 {
        for label in 0..sm.num_labels() as u32 {
            let (_, pattern) = sm.forward_step(state, label);
            features.push(FeatureDescriptor::transition(state, pattern, 1.0));
        }
    }
    features.push(FeatureDescriptor::state(0, 0, 1.0));
    features.push(FeatureDescriptor::state(0, 1, 1.0));
    let index = FeatureIndex::build(features, sm.num_labels(), 1, sm.num_forward_states()).unwrap();
    (index, Some(sm))
}

fn semi_markov_instance() -> Instance {
    let mut a = Item::new();
    a.push(0, 1.0);
    let mut b = Item::new();
    b.push(0, 1.0);
    let mut c = Item::new();
    c.push(0, 1.0);
    Instance::chain(vec![a, b, c], vec![0, 0, 1])
}

#[test]
fn semi_markov_gradient_matches_finite_difference() {
    let num_trans = {
        let (index, _) = semi_markov_setup();
        index.num_features() - 2
    };
    let mut base = vec![0.0; num_trans];
    base.push(0.0);
    base.push(0.0);
    check_gradient(semi_markov_setup, GraphKind::SemiMarkov, base, semi_markov_instance());
}
