//! Inference and training core for a first-order linear-chain CRF, with
//! two structural variants of the same graphical model: a tree-structured
//! CRF (each item's predecessor is a parent rather than the previous
//! item) and a semi-Markov CRF (labels span variable-length segments).
//!
//! The crate is organized bottom-up, each layer depending only on the
//! ones below:
//!
//! - [`context`] — [`context::NumericContext`], the per-instance scratch
//!   arena and the scaled forward-backward / Viterbi / marginal
//!   recurrences for each graph variant.
//! - [`feature`] — [`feature::FeatureIndex`], the immutable attribute- and
//!   source-indexed feature tables and the score-assembly routines built
//!   on them.
//! - [`encoder`] — [`encoder::Encoder`], the level-cached façade an
//!   optimizer drives: `set_weights` → `set_instance` → `viterbi` /
//!   `objective_and_gradients`.
//! - [`model`] — [`model::ModelWriter`] / [`model::ModelReader`], the
//!   chunked binary model file format.
//!
//! [`instance`] and [`config`] hold the data types these layers share
//! (observed items and tree topology; the configuration keys
//! `Encoder::exchange_options` reads and writes). [`error`] is the single
//! error type threaded through all of them.
//!
//! What this crate does *not* do: drive an optimizer (SGD, L-BFGS,
//! averaged perceptron — those only call the operations exposed here),
//! extract features from raw observations, map label/attribute strings to
//! ids, or parse configuration files. Those are external collaborators.

pub mod config;
pub mod context;
pub mod encoder;
pub mod error;
pub mod feature;
pub mod instance;
pub mod model;

pub use config::EncoderOptions;
pub use context::{GraphKind, NumericContext, ResetFlags};
pub use encoder::{Encoder, Level};
pub use error::{CrfError, CrfResult};
pub use feature::{FeatureDescriptor, FeatureIndex, FeatureKind, FeatureRefs, SemiMarkovTables};
pub use instance::{Instance, Item, TreeTopology};
pub use model::{ModelReader, ModelWriter};
