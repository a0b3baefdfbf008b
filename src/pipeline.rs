//! ## Preprocessing Pipeline
//!
//! This module provides the [`Transformer`] abstraction shared by every component and the
//! [`PreprocessingPipeline`] that chains them in a fixed order.
//!
//! ### Overview
//!
//! - The [`Transformer`] trait defines the fit/transform interface. `fit` may execute queries
//!   to learn parameters; `transform` only extends the logical plan with frozen parameters.
//! - The [`crate::impl_transformer`] macro implements the trait from a type's inherent methods.
//! - [`PreprocessingPipeline`] fits each stage on the output of the previous one and replays
//!   the same stages, without refitting, in `transform`.
//!
//! ### Stage order
//!
//! impute → convert types → create features → drop sources → encode → synthesize →
//! cap outliers → variance filter → correlation filter → normalize

use crate::diagnostics::{self, PreprocessingWarning};
use crate::exceptions::{PreprocessingError, PreprocessingResult};
use crate::settings::PipelineSettings;
use crate::transformers::categorical_encoding::CategoricalEncoder;
use crate::transformers::feature_creation::ActivityFeatureCreator;
use crate::transformers::feature_selection::{SourceColumnDropper, VarianceCorrelationFilter};
use crate::transformers::imputation::MissingValueImputer;
use crate::transformers::outlier_handling::OutlierCapper;
use crate::transformers::scaling_and_normalization::FeatureNormalizer;
use crate::transformers::statistical_features::StatisticalFeatureSynthesizer;
use crate::transformers::type_conversion::DataTypeConverter;
use async_trait::async_trait;
use datafusion::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Instant;

/// Trait for components used in the preprocessing pipeline.
///
/// Every transformer must provide a `fit` method (which may collect data to compute parameters)
/// and a `transform_with_warnings` method (which updates the DataFrame's logical plan without
/// triggering execution and reports any non-fatal conditions it met).
#[async_trait]
pub trait Transformer {
    /// Fit the transformer given a DataFrame.
    async fn fit(&mut self, df: &DataFrame) -> PreprocessingResult<()>;

    /// Transform the input DataFrame and return the warnings raised while planning it.
    fn transform_with_warnings(
        &self,
        df: DataFrame,
    ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)>;

    /// Transform the input DataFrame, logging any warnings.
    fn transform(&self, df: DataFrame) -> PreprocessingResult<DataFrame> {
        let (df, warnings) = self.transform_with_warnings(df)?;
        diagnostics::emit(&warnings);
        Ok(df)
    }

    /// Returns true if the transformer is stateful (i.e. requires a call to fit before transform can be called).
    fn is_stateful(&self) -> bool;

    /// Returns true once the transformer can be used to transform.
    fn is_fitted(&self) -> bool;
}

/// Macro to implement the [`Transformer`] trait for preprocessing components.
///
/// The type must already have inherent methods:
/// - `async fn fit(&mut self, &DataFrame) -> PreprocessingResult<()>`
/// - `fn plan(&self, DataFrame) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)>`
/// - `fn is_fitted(&self) -> bool`
/// - **`fn inherent_is_stateful(&self) -> bool`**
///
/// # Example
///
/// ```rust,no_run
/// use insider_preprocessing::diagnostics::PreprocessingWarning;
/// use insider_preprocessing::exceptions::PreprocessingResult;
/// use datafusion::prelude::DataFrame;
/// use insider_preprocessing::impl_transformer;
///
/// pub struct Passthrough;
///
/// impl Passthrough {
///     pub async fn fit(&mut self, _df: &DataFrame) -> PreprocessingResult<()> {
///         Ok(())
///     }
///
///     pub fn plan(
///         &self,
///         df: DataFrame,
///     ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
///         Ok((df, Vec::new()))
///     }
///
///     pub fn is_fitted(&self) -> bool {
///         true
///     }
///
///     pub fn inherent_is_stateful(&self) -> bool {
///         false
///     }
/// }
///
/// impl_transformer!(Passthrough);
/// ```
#[macro_export]
macro_rules! impl_transformer {
    ($ty:ty) => {
        #[async_trait::async_trait]
        impl $crate::pipeline::Transformer for $ty {
            async fn fit(
                &mut self,
                df: &datafusion::prelude::DataFrame,
            ) -> $crate::exceptions::PreprocessingResult<()> {
                <$ty>::fit(self, df).await
            }
            fn transform_with_warnings(
                &self,
                df: datafusion::prelude::DataFrame,
            ) -> $crate::exceptions::PreprocessingResult<(
                datafusion::prelude::DataFrame,
                Vec<$crate::diagnostics::PreprocessingWarning>,
            )> {
                <$ty>::plan(self, df)
            }
            fn is_stateful(&self) -> bool {
                <$ty>::inherent_is_stateful(self)
            }
            fn is_fitted(&self) -> bool {
                <$ty>::is_fitted(self)
            }
        }
    };
}

/// The fixed stages of [`PreprocessingPipeline`], in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Impute,
    ConvertTypes,
    CreateFeatures,
    DropSources,
    Encode,
    Synthesize,
    CapOutliers,
    VarianceFilter,
    CorrelationFilter,
    Normalize,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Impute,
        Stage::ConvertTypes,
        Stage::CreateFeatures,
        Stage::DropSources,
        Stage::Encode,
        Stage::Synthesize,
        Stage::CapOutliers,
        Stage::VarianceFilter,
        Stage::CorrelationFilter,
        Stage::Normalize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Impute => "impute",
            Stage::ConvertTypes => "convert_types",
            Stage::CreateFeatures => "create_features",
            Stage::DropSources => "drop_sources",
            Stage::Encode => "encode",
            Stage::Synthesize => "synthesize",
            Stage::CapOutliers => "cap_outliers",
            Stage::VarianceFilter => "variance_filter",
            Stage::CorrelationFilter => "correlation_filter",
            Stage::Normalize => "normalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn default_feature_creator() -> Box<dyn Transformer + Send + Sync> {
    Box::new(ActivityFeatureCreator::default())
}

/// Leakage-free preprocessing of employee activity frames.
///
/// `fit` learns every stage's parameters from the training frame (which must contain the
/// target column named in the settings); `transform` replays the stages with those
/// parameters only. The fitted state can be persisted as JSON; the feature creator is not
/// part of it.
#[derive(Serialize, Deserialize)]
pub struct PreprocessingPipeline {
    settings: PipelineSettings,
    pub imputer: MissingValueImputer,
    pub converter: DataTypeConverter,
    #[serde(skip, default = "default_feature_creator")]
    feature_creator: Box<dyn Transformer + Send + Sync>,
    pub source_dropper: SourceColumnDropper,
    pub encoder: CategoricalEncoder,
    pub synthesizer: StatisticalFeatureSynthesizer,
    pub outlier_capper: OutlierCapper,
    pub filter: VarianceCorrelationFilter,
    pub normalizer: FeatureNormalizer,
    fitted: bool,
    #[serde(skip)]
    fit_warnings: Vec<PreprocessingWarning>,
}

impl Default for PreprocessingPipeline {
    fn default() -> Self {
        Self::new(PipelineSettings::default())
    }
}

impl PreprocessingPipeline {
    /// Creates an unfitted pipeline from `settings`.
    pub fn new(settings: PipelineSettings) -> Self {
        let roles = settings.roles.clone();
        Self {
            imputer: MissingValueImputer::new(settings.imputer.clone(), roles.clone()),
            converter: DataTypeConverter::new(roles.clone()),
            feature_creator: default_feature_creator(),
            source_dropper: SourceColumnDropper::new(settings.source_columns_to_drop.clone()),
            encoder: CategoricalEncoder::new(settings.encoder.clone(), roles.clone()),
            synthesizer: StatisticalFeatureSynthesizer::new(roles.clone()),
            outlier_capper: OutlierCapper::new(settings.outlier_method, roles.clone()),
            filter: VarianceCorrelationFilter::new(
                roles.clone(),
                settings.protected_markers.clone(),
                settings.variance_threshold,
                settings.correlation.clone(),
            ),
            normalizer: FeatureNormalizer::new(settings.normalization, roles),
            settings,
            fitted: false,
            fit_warnings: Vec::new(),
        }
    }

    /// Validates `settings` before building the pipeline.
    pub fn try_new(settings: PipelineSettings) -> PreprocessingResult<Self> {
        settings.validate()?;
        Ok(Self::new(settings))
    }

    /// Replaces the raw feature derivation step. Resets the fitted state.
    pub fn with_feature_creator(mut self, creator: Box<dyn Transformer + Send + Sync>) -> Self {
        self.feature_creator = creator;
        self.fitted = false;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    async fn fit_stage(&mut self, stage: Stage, df: &DataFrame) -> PreprocessingResult<()> {
        match stage {
            Stage::Impute => self.imputer.fit(df).await,
            Stage::ConvertTypes => self.converter.fit(df).await,
            Stage::CreateFeatures => self.feature_creator.fit(df).await,
            Stage::DropSources => self.source_dropper.fit(df).await,
            Stage::Encode => self.encoder.fit(df).await,
            Stage::Synthesize => self.synthesizer.fit(df).await,
            Stage::CapOutliers => self.outlier_capper.fit(df).await,
            Stage::VarianceFilter => self
                .filter
                .fit_variance_filtering(df, self.settings.variance_threshold)
                .await
                .map(|_| ()),
            Stage::CorrelationFilter => self
                .filter
                .fit_correlation_filtering(df, self.settings.correlation.threshold)
                .await
                .map(|_| ()),
            Stage::Normalize => self.normalizer.fit(df).await,
        }
    }

    fn plan_stage(
        &self,
        stage: Stage,
        df: DataFrame,
    ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        match stage {
            Stage::Impute => self.imputer.plan(df),
            Stage::ConvertTypes => self.converter.plan(df),
            Stage::CreateFeatures => self.feature_creator.transform_with_warnings(df),
            Stage::DropSources => self.source_dropper.plan(df),
            Stage::Encode => self.encoder.plan(df),
            Stage::Synthesize => self.synthesizer.plan(df),
            Stage::CapOutliers => self.outlier_capper.plan(df),
            Stage::VarianceFilter => self.filter.plan_variance_filtering(df),
            Stage::CorrelationFilter => self.filter.plan_correlation_filtering(df),
            Stage::Normalize => self.normalizer.plan(df),
        }
    }

    fn stage_fit_warnings(&self, stage: Stage) -> &[PreprocessingWarning] {
        match stage {
            Stage::Impute => self.imputer.fit_warnings(),
            Stage::ConvertTypes => self.converter.fit_warnings(),
            Stage::Encode => self.encoder.fit_warnings(),
            Stage::Synthesize => self.synthesizer.fit_warnings(),
            Stage::CapOutliers => self.outlier_capper.fit_warnings(),
            Stage::VarianceFilter => self.filter.fit_warnings(),
            Stage::Normalize => self.normalizer.fit_warnings(),
            _ => &[],
        }
    }

    /// Fits every stage, in order, on the output of the previous one.
    ///
    /// Each intermediate frame is cached so later stages do not recompute earlier plans.
    pub async fn fit(&mut self, df: &DataFrame) -> PreprocessingResult<()> {
        self.fitted = false;
        let rows = df.clone().count().await?;
        if rows == 0 {
            return Err(PreprocessingError::InvalidParameter(
                "Cannot fit the pipeline on an empty DataFrame.".to_string(),
            ));
        }
        let mut warnings = Vec::new();
        let mut current = df.clone();
        for stage in Stage::ALL {
            let start = Instant::now();
            tracing::debug!(%stage, "fitting stage");
            self.fit_stage(stage, &current)
                .await
                .map_err(|e| e.in_stage(stage.name()))?;
            warnings.extend_from_slice(self.stage_fit_warnings(stage));
            let (next, stage_warnings) = self
                .plan_stage(stage, current)
                .map_err(|e| e.in_stage(stage.name()))?;
            diagnostics::emit(&stage_warnings);
            current = next.cache().await.map_err(|e| {
                PreprocessingError::from(e).in_stage(stage.name())
            })?;
            tracing::debug!(%stage, elapsed = ?start.elapsed(), "stage fitted");
        }
        tracing::info!(
            rows,
            columns = current.schema().fields().len(),
            warnings = warnings.len(),
            "preprocessing pipeline fitted"
        );
        self.fit_warnings = warnings;
        self.fitted = true;
        Ok(())
    }

    /// Applies every fitted stage and returns the frame with all warnings raised on the way.
    pub fn transform_with_report(
        &self,
        df: DataFrame,
    ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        if !self.fitted {
            return Err(PreprocessingError::FitNotCalled(
                "PreprocessingPipeline".to_string(),
            ));
        }
        let mut warnings = Vec::new();
        let mut current = df;
        for stage in Stage::ALL {
            let (next, stage_warnings) = self
                .plan_stage(stage, current)
                .map_err(|e| e.in_stage(stage.name()))?;
            warnings.extend(stage_warnings);
            current = next;
        }
        Ok((current, warnings))
    }

    /// Applies every fitted stage without refitting anything.
    pub fn transform(&self, df: DataFrame) -> PreprocessingResult<DataFrame> {
        let (df, warnings) = self.transform_with_report(df)?;
        diagnostics::emit(&warnings);
        Ok(df)
    }

    /// `fit` followed by `transform` on the same frame.
    pub async fn fit_transform(&mut self, df: &DataFrame) -> PreprocessingResult<DataFrame> {
        self.fit(df).await?;
        self.transform(df.clone())
    }

    /// Replays the stages up to the encoder and reports categories it never saw during fit.
    /// The output of `transform` is not affected.
    pub async fn audit_unseen_categories(
        &self,
        df: &DataFrame,
    ) -> PreprocessingResult<Vec<PreprocessingWarning>> {
        if !self.fitted {
            return Err(PreprocessingError::FitNotCalled(
                "PreprocessingPipeline".to_string(),
            ));
        }
        let mut current = df.clone();
        for stage in Stage::ALL {
            if stage == Stage::Encode {
                break;
            }
            current = self
                .plan_stage(stage, current)
                .map_err(|e| e.in_stage(stage.name()))?
                .0;
        }
        let warnings = self
            .encoder
            .audit_unseen(&current)
            .await
            .map_err(|e| e.in_stage(Stage::Encode.name()))?;
        diagnostics::emit(&warnings);
        Ok(warnings)
    }

    /// Warnings raised while fitting (kept only until the pipeline is persisted).
    pub fn fit_warnings(&self) -> &[PreprocessingWarning] {
        &self.fit_warnings
    }

    /// Columns of the transformed output that survived feature selection.
    pub fn retained_columns(&self) -> Option<&[String]> {
        self.filter.retained_columns()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn inherent_is_stateful(&self) -> bool {
        true
    }

    fn plan(&self, df: DataFrame) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        self.transform_with_report(df)
    }

    /// Serializes the settings and every learned parameter.
    pub fn to_json(&self) -> PreprocessingResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> PreprocessingResult<Self> {
        let pipeline: PreprocessingPipeline = serde_json::from_str(json)?;
        pipeline.settings.validate()?;
        Ok(pipeline)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> PreprocessingResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> PreprocessingResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

crate::impl_transformer!(PreprocessingPipeline);

impl fmt::Debug for PreprocessingPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreprocessingPipeline")
            .field("settings", &self.settings)
            .field("fitted", &self.fitted)
            .field("retained_columns", &self.retained_columns())
            .finish_non_exhaustive()
    }
}
