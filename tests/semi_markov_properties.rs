//! Semi-Markov property tests (spec §8): the two-segmentation literal
//! scenario, the `max_seg_len = 1` chain-equivalence regression check,
//! and marginal/Viterbi consistency.

use crf_core::context::logsumexp::logsumexp;
use crf_core::{Encoder, FeatureDescriptor, FeatureIndex, GraphKind, Instance, Item, SemiMarkovTables};

fn semi_markov_index(sm: &SemiMarkovTables) -> FeatureIndex {
    let mut features = Vec::new();
    for state in 0..sm.num_forward_states() as u32 {
        for label in 0..sm.num_labels() as u32 {
            let (_, pattern) = sm.forward_step(state, label);
            features.push(FeatureDescriptor::transition(state, pattern, 1.0));
        }
    }
    features.push(FeatureDescriptor::state(0, 0, 1.0));
    features.push(FeatureDescriptor::state(0, 1, 1.0));
    FeatureIndex::build(features, sm.num_labels(), 1, sm.num_forward_states()).unwrap()
}

fn firing_item() -> Item {
    let mut item = Item::new();
    item.push(0, 1.0);
    item
}

#[test]
fn two_item_two_segmentations_log_norm_matches_brute_force() {
    let sm = SemiMarkovTables::order1(2, Some(2));
    let index = semi_markov_index(&sm);
    let mut encoder = Encoder::semi_markov(index, sm.clone());

    let num_trans = sm.num_forward_states() * sm.num_labels();
    let mut w = vec![0.15; num_trans];
    w.push(0.4);
    w.push(-0.2);
    encoder.set_weights(&w, 1.0).unwrap();

    let inst = Instance::chain(vec![firing_item(), firing_item()], vec![]);
    encoder.set_instance(&inst).unwrap();
    let log_norm = encoder.partition_factor().unwrap();

    // Brute force over both labelings of a 2-item sequence, which induce
    // the two admissible segmentations (two length-1 segments, or one
    // length-2 segment when both labels agree).
    let mut total = f64::NEG_INFINITY;
    for mask in 0..4u32 {
        let labels = vec![mask & 1, (mask >> 1) & 1];
        let s = encoder.score(&labels).unwrap();
        total = logsumexp([total, s]);
    }
    assert!((total - log_norm).abs() < 1e-9);
}

#[test]
fn max_seg_len_one_recovers_chain_log_norm() {
    let sm = SemiMarkovTables::order1(2, Some(1));
    let index = semi_markov_index(&sm);
    let mut sm_encoder = Encoder::semi_markov(index, sm.clone());

    let num_trans = sm.num_forward_states() * sm.num_labels();
    let mut w = vec![0.1; num_trans];
    // Zero the BOS-originating row: the chain recurrence has no
    // transition term at all for the first item, so the semi-Markov
    // side must not add one either for the comparison below to hold.
    let bos = sm.initial_state() as usize;
    for label in 0..sm.num_labels() {
        w[bos * sm.num_labels() + label] = 0.0;
    }
    w.push(0.3);
    w.push(-0.1);
    sm_encoder.set_weights(&w, 1.0).unwrap();

    let items = vec![firing_item(), firing_item(), firing_item()];
    let inst = Instance::chain(items.clone(), vec![]);
    sm_encoder.set_instance(&inst).unwrap();
    let sm_log_norm = sm_encoder.partition_factor().unwrap();

    // Equivalent order-1 chain: same state weights, uniform transition
    // weight across the (non-BOS) label pairs matching the semi-Markov
    // table's post-BOS transitions.
    let chain_features = vec![
        FeatureDescriptor::state(0, 0, 1.0),
        FeatureDescriptor::state(0, 1, 1.0),
        FeatureDescriptor::transition(0, 0, 1.0),
        FeatureDescriptor::transition(0, 1, 1.0),
        FeatureDescriptor::transition(1, 0, 1.0),
        FeatureDescriptor::transition(1, 1, 1.0),
    ];
    let chain_index = FeatureIndex::build(chain_features, 2, 1, 2).unwrap();
    let mut chain_encoder = Encoder::chain_or_tree(GraphKind::Chain, chain_index).unwrap();
    let chain_w = vec![0.3, -0.1, 0.1, 0.1, 0.1, 0.1];
    chain_encoder.set_weights(&chain_w, 1.0).unwrap();
    let chain_inst = Instance::chain(items, vec![]);
    chain_encoder.set_instance(&chain_inst).unwrap();
    let chain_log_norm = chain_encoder.partition_factor().unwrap();

    assert!((sm_log_norm - chain_log_norm).abs() < 1e-9);
}

#[test]
fn marginals_normalize_and_viterbi_matches_max_path() {
    let sm = SemiMarkovTables::order1(2, Some(2));
    let index = semi_markov_index(&sm);
    let mut encoder = Encoder::semi_markov(index, sm.clone());

    let num_trans = sm.num_forward_states() * sm.num_labels();
    let mut w = vec![0.2; num_trans];
    w.push(0.5);
    w.push(-0.3);
    encoder.set_weights(&w, 1.0).unwrap();

    let items = vec![firing_item(), firing_item(), firing_item(), firing_item()];
    let inst = Instance::chain(items, vec![]);
    encoder.set_instance(&inst).unwrap();

    let mut path = vec![0u32; 4];
    let best = encoder.viterbi(&mut path).unwrap();
    let score = encoder.score(&path).unwrap();
    assert!((score - best).abs() < 1e-9);

    let log_norm = encoder.partition_factor().unwrap();
    assert!(best <= log_norm + 1e-9);

    let mut max_score = f64::NEG_INFINITY;
    for mask in 0..16u32 {
        let labels: Vec<u32> = (0..4).map(|i| (mask >> i) & 1).collect();
        let s = encoder.score(&labels).unwrap();
        if s > max_score {
            max_score = s;
        }
    }
    assert!((max_score - best).abs() < 1e-9);
}
