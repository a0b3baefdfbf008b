//! # Insider Preprocessing
//!
//! A leakage-free fit/transform preprocessing engine for employee activity logs,
//! built on Apache DataFusion.
//!
//! Every component learns its parameters from a training [`DataFrame`](datafusion::prelude::DataFrame)
//! in an async `fit` call and later applies exactly those parameters in a synchronous
//! `transform` call that only extends the logical plan. The
//! [`PreprocessingPipeline`](pipeline::PreprocessingPipeline) chains the components
//! in a fixed order and can be persisted as JSON.

pub mod diagnostics;
pub mod exceptions;
mod frame;
pub mod logging;
pub mod pipeline;
pub mod settings;
pub mod stats;
pub mod transformers;
