//! Semi-Markov forward/backward state tables (spec §3).
//!
//! The *feature-generation* subsystem that enumerates label-suffix states
//! is an external collaborator (spec §1e non-goal) — this type only holds
//! the tables it would hand to the core: forward-state transitions (with
//! the pattern each activates), backward-state transitions, and the
//! pattern→last-label map the inference kernel needs to read off a
//! segment's emitted label.
//!
//! [`SemiMarkovTables::order1`] is this crate's concrete default builder:
//! a forward-state is "the previously emitted label" (plus one BOS state),
//! which is the order-1 case of the higher-order suffix automaton the
//! real generator would build. Its backward-state space mirrors the
//! forward one exactly (see DESIGN.md). The binary format keeps
//! `num_forward_states`/`num_backward_states` as separate fields (matching
//! `sm_header_t.num_states`/`num_bkw_states`) for a generator that could
//! minimize them independently, but `context::semi_markov`'s β/marginals/
//! Viterbi recurrences only ever dispatch through `forward_step` and size
//! their columns off `num_forward_states` — there is no code path that
//! reads a backward-state space distinct from the forward one. A table
//! with divergent counts is therefore rejected at construction (see
//! [`SemiMarkovTables::from_raw_parts`]) rather than accepted and left to
//! panic the first time `beta()` is run against it.

use crate::error::{CrfError, CrfResult};

/// Opaque (per spec §3) semi-Markov state tables.
#[derive(Debug, Clone)]
pub struct SemiMarkovTables {
    num_labels: usize,
    num_forward_states: usize,
    num_backward_states: usize,
    num_patterns: usize,
    initial_state: u32,
    pattern_to_last_label: Vec<u32>,
    pattern_to_src_state: Vec<u32>,
    forward_next_state: Vec<u32>,
    forward_pattern: Vec<u32>,
    backward_next_state: Vec<u32>,
    max_seg_len: Option<usize>,
}

impl SemiMarkovTables {
    /// Build the order-1 default tables: forward/backward state = "the
    /// label most recently emitted" plus one BOS/EOS state at index
    /// `num_labels`. `max_seg_len` of `None` means unbounded (spec §6's
    /// `feature.max_seg_len = -1`).
    pub fn order1(num_labels: usize, max_seg_len: Option<usize>) -> Self {
        let num_states = num_labels + 1;
        let initial_state = num_labels as u32;
        let num_patterns = num_states * num_labels;

        let mut pattern_to_last_label = vec![0u32; num_patterns];
        let mut pattern_to_src_state = vec![0u32; num_patterns];
        let mut forward_next_state = vec![0u32; num_patterns];
        let mut forward_pattern = vec![0u32; num_patterns];
        let mut backward_next_state = vec![0u32; num_patterns];

        for state in 0..num_states {
            for label in 0..num_labels {
                let idx = state * num_labels + label;
                let pattern = idx as u32;
                forward_pattern[idx] = pattern;
                forward_next_state[idx] = label as u32;
                backward_next_state[idx] = label as u32;
                pattern_to_last_label[pattern as usize] = label as u32;
                pattern_to_src_state[pattern as usize] = state as u32;
            }
        }

        SemiMarkovTables {
            num_labels,
            num_forward_states: num_states,
            num_backward_states: num_states,
            num_patterns,
            initial_state,
            pattern_to_last_label,
            pattern_to_src_state,
            forward_next_state,
            forward_pattern,
            backward_next_state,
            max_seg_len,
        }
    }

    /// Reconstruct a table directly from its persisted fields (used by
    /// [`crate::model::ModelReader`] — a loaded model did not necessarily
    /// come from [`SemiMarkovTables::order1`], so the reader cannot call
    /// that builder and must rebuild the struct field-for-field instead).
    ///
    /// `context::semi_markov`'s β/marginals/Viterbi recurrences dispatch
    /// exclusively through `forward_step` and size their columns off
    /// `num_forward_states` — there is no genuine backward-state pass for
    /// `backward_step`/`num_backward_states` to feed. The binary format
    /// and this constructor's signature anticipate a generator that keeps
    /// the two state spaces separate, but nothing downstream can consume
    /// that divergence yet, so it is rejected here rather than silently
    /// producing a table that later panics on a row-length mismatch in
    /// `NumericContext`'s β/back-pointer storage.
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw_parts(
        num_labels: usize,
        num_forward_states: usize,
        num_backward_states: usize,
        initial_state: u32,
        pattern_to_last_label: Vec<u32>,
        pattern_to_src_state: Vec<u32>,
        forward_next_state: Vec<u32>,
        forward_pattern: Vec<u32>,
        backward_next_state: Vec<u32>,
        max_seg_len: Option<usize>,
    ) -> CrfResult<Self> {
        if num_backward_states != num_forward_states {
            return Err(CrfError::InvalidModelFile(format!(
                "semi-Markov table has {num_forward_states} forward states but \
                 {num_backward_states} backward states; this inference core only \
                 supports a symmetric forward/backward state space"
            )));
        }
        let num_patterns = pattern_to_last_label.len();
        Ok(SemiMarkovTables {
            num_labels,
            num_forward_states,
            num_backward_states,
            num_patterns,
            initial_state,
            pattern_to_last_label,
            pattern_to_src_state,
            forward_next_state,
            forward_pattern,
            backward_next_state,
            max_seg_len,
        })
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn num_forward_states(&self) -> usize {
        self.num_forward_states
    }

    pub fn num_backward_states(&self) -> usize {
        self.num_backward_states
    }

    pub fn num_patterns(&self) -> usize {
        self.num_patterns
    }

    pub fn initial_state(&self) -> u32 {
        self.initial_state
    }

    pub fn pattern_to_last_label(&self, pattern: u32) -> u32 {
        self.pattern_to_last_label[pattern as usize]
    }

    pub fn pattern_to_src_state(&self, pattern: u32) -> u32 {
        self.pattern_to_src_state[pattern as usize]
    }

    /// `(next_forward_state, pattern_id)` activated by emitting `label`
    /// from forward-state `state`.
    pub fn forward_step(&self, state: u32, label: u32) -> (u32, u32) {
        let idx = state as usize * self.num_labels + label as usize;
        (self.forward_next_state[idx], self.forward_pattern[idx])
    }

    /// Next backward-state reached by emitting `label` from backward-state
    /// `state`.
    pub fn backward_step(&self, state: u32, label: u32) -> u32 {
        let idx = state as usize * self.num_labels + label as usize;
        self.backward_next_state[idx]
    }

    pub fn max_seg_len(&self) -> Option<usize> {
        self.max_seg_len
    }

    /// Segment lengths admissible when at most `budget` items remain
    /// (e.g. `t + 1` items available before position `t`), honoring
    /// `max_seg_len` when configured.
    pub fn admissible_lengths(&self, budget: usize) -> std::ops::RangeInclusive<usize> {
        let hi = match self.max_seg_len {
            Some(m) => m.min(budget).max(0),
            None => budget,
        };
        1..=hi.max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order1_pattern_roundtrips_state_and_label() {
        let sm = SemiMarkovTables::order1(3, Some(2));
        for state in 0..sm.num_forward_states() as u32 {
            for label in 0..sm.num_labels() as u32 {
                let (next, pattern) = sm.forward_step(state, label);
                assert_eq!(next, label);
                assert_eq!(sm.pattern_to_last_label(pattern), label);
                assert_eq!(sm.pattern_to_src_state(pattern), state);
            }
        }
    }

    #[test]
    fn admissible_lengths_respect_budget_and_cap() {
        let sm = SemiMarkovTables::order1(2, Some(2));
        assert_eq!(sm.admissible_lengths(5).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(sm.admissible_lengths(1).collect::<Vec<_>>(), vec![1]);

        let unbounded = SemiMarkovTables::order1(2, None);
        assert_eq!(unbounded.admissible_lengths(3).collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
