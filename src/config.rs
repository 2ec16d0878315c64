//! Programmatic configuration surface for `Encoder::exchange_options`
//! (spec §6). Parsing config *files* is an external collaborator's job
//! (spec §1d); this is the in-memory struct a CLI or trainer populates
//! and the Encoder reads back, mirroring the teacher's use of `serde`
//! for its own manifest/config structs.

use serde::{Deserialize, Serialize};

use crate::error::{CrfError, CrfResult};

/// The four-plus-two configuration keys named in spec §6. The
/// `max_seg_len`/`max_order` pair only applies to semi-Markov encoders;
/// [`Encoder::exchange_options`](crate::encoder::Encoder::exchange_options)
/// rejects them for chain/tree (`InvalidConfig`, per spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderOptions {
    /// `feature.minfreq` — minimum empirical frequency for a feature to
    /// be generated. Default `0.0`.
    pub feature_minfreq: f64,
    /// `feature.possible_states` — force-generate every possible state
    /// feature rather than only observed ones.
    pub feature_possible_states: bool,
    /// `feature.possible_transitions` — force-generate every possible
    /// transition feature.
    pub feature_possible_transitions: bool,
    /// `feature.max_seg_len` — semi-Markov only. `None` means unbounded
    /// (`-1` on the wire).
    pub feature_max_seg_len: Option<usize>,
    /// `feature.max_order` — semi-Markov only, minimum `1`.
    pub feature_max_order: usize,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        EncoderOptions {
            feature_minfreq: 0.0,
            feature_possible_states: false,
            feature_possible_transitions: false,
            feature_max_seg_len: None,
            feature_max_order: 1,
        }
    }
}

impl EncoderOptions {
    /// Validate ranges (spec §7's `InvalidConfig`): a negative
    /// `minfreq` or a `max_order` of zero are rejected.
    pub fn validate(&self) -> CrfResult<()> {
        if self.feature_minfreq < 0.0 {
            return Err(CrfError::InvalidConfig("feature.minfreq must be >= 0".into()));
        }
        if self.feature_max_order == 0 {
            return Err(CrfError::InvalidConfig("feature.max_order must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unbounded_segment_length() {
        let opt = EncoderOptions::default();
        assert_eq!(opt.feature_max_seg_len, None);
        assert_eq!(opt.feature_max_order, 1);
        opt.validate().unwrap();
    }

    #[test]
    fn rejects_negative_minfreq() {
        let mut opt = EncoderOptions::default();
        opt.feature_minfreq = -1.0;
        assert!(opt.validate().is_err());
    }
}
