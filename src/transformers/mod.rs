//! # Preprocessing Components
//!
//! The submodules contain the fit/transform components chained by
//! [`PreprocessingPipeline`](crate::pipeline::PreprocessingPipeline).

pub mod categorical_encoding;
pub mod feature_creation;
pub mod feature_selection;
pub mod imputation;
pub mod outlier_handling;
pub mod scaling_and_normalization;
pub mod statistical_features;
pub mod type_conversion;
