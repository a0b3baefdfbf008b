//! ## Pipeline Settings
//!
//! One explicit, serde-backed configuration object replaces the family of near-identical
//! pipeline variants: column roles, imputation rules, encoder cardinality thresholds, outlier
//! and normalization methods, variance/correlation thresholds. Settings can be built in code
//! (`PipelineSettings::default()` and field updates) or loaded from JSON; missing keys fall
//! back to their defaults.
//!
//! ```rust
//! use insider_preprocessing::settings::{NormalizationMethod, PipelineSettings};
//!
//! let settings = PipelineSettings::from_json(r#"{"normalization": "robust"}"#).unwrap();
//! assert_eq!(settings.normalization, NormalizationMethod::Robust);
//! assert_eq!(settings.encoder.onehot_max, 3);
//! ```

use crate::exceptions::{PreprocessingError, PreprocessingResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Roles of well-known columns. Reserved columns are never imputed by statistics,
/// encoded, capped, filtered or scaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnRoles {
    /// Binary label used for target encoding.
    pub target: String,
    /// Label-like columns (including `target`) that pass through untouched.
    pub labels: Vec<String>,
    pub identifiers: Vec<String>,
    /// Calendar date columns.
    pub dates: Vec<String>,
    /// Raw entry/exit timestamp columns.
    pub raw_timestamps: Vec<String>,
    /// Columns holding boolean flags, possibly stored as text.
    pub boolean_flags: Vec<String>,
}

impl Default for ColumnRoles {
    fn default() -> Self {
        Self {
            target: "is_malicious".to_string(),
            labels: strings(&["is_malicious", "target", "is_emp_malicious"]),
            identifiers: strings(&["employee_id"]),
            dates: strings(&["date", "timestamp"]),
            raw_timestamps: strings(&["first_entry_time", "last_exit_time"]),
            boolean_flags: strings(&[
                "is_contractor",
                "has_foreign_citizenship",
                "has_criminal_record",
                "has_medical_history",
                "is_abroad",
                "is_hostile_country_trip",
                "is_official_trip",
                "entered_during_night_hours",
                "early_entry_flag",
                "late_exit_flag",
                "entry_during_weekend",
            ]),
        }
    }
}

impl ColumnRoles {
    pub fn is_label(&self, name: &str) -> bool {
        name == self.target || self.labels.iter().any(|c| c == name)
    }

    pub fn is_identifier(&self, name: &str) -> bool {
        self.identifiers.iter().any(|c| c == name)
    }

    pub fn is_date(&self, name: &str) -> bool {
        self.dates.iter().any(|c| c == name)
    }

    pub fn is_raw_timestamp(&self, name: &str) -> bool {
        self.raw_timestamps.iter().any(|c| c == name)
    }

    pub fn is_boolean_flag(&self, name: &str) -> bool {
        self.boolean_flags.iter().any(|c| c == name)
    }

    /// Labels and identifiers.
    pub fn is_passthrough(&self, name: &str) -> bool {
        self.is_label(name) || self.is_identifier(name)
    }

    /// Labels, identifiers, dates and raw timestamps.
    pub fn is_reserved(&self, name: &str) -> bool {
        self.is_passthrough(name) || self.is_date(name) || self.is_raw_timestamp(name)
    }
}

/// Fixed, domain-specific fill rules applied before any learned statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputerSettings {
    /// Columns filled with zero.
    pub zero_fill: Vec<String>,
    /// Derived time columns filled with zero whenever they are present, even if the
    /// training frame did not carry them yet.
    pub derived_zero_fill: Vec<String>,
    /// Columns filled with the "no travel" category.
    pub no_travel: Vec<String>,
    pub no_travel_label: String,
    /// Columns filled with the minimal timestamp sentinel.
    pub timestamp_sentinel: Vec<String>,
    pub timestamp_sentinel_value: String,
    /// Fill value for text columns that are entirely empty in training.
    pub unknown_label: String,
}

impl Default for ImputerSettings {
    fn default() -> Self {
        Self {
            zero_fill: strings(&["trip_day_number", "total_presence_minutes"]),
            derived_zero_fill: strings(&[
                "entry_time_numeric",
                "exit_time_numeric",
                "entry_time_numeric_zscore",
                "exit_time_numeric_zscore",
            ]),
            no_travel: strings(&["country_name"]),
            no_travel_label: "No_Travel".to_string(),
            timestamp_sentinel: strings(&["first_entry_time", "last_exit_time"]),
            timestamp_sentinel_value: "1900-01-01 00:00:00".to_string(),
            unknown_label: "Unknown".to_string(),
        }
    }
}

/// What the outlier capper does with out-of-bound values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    /// Clip to the nearest bound.
    #[default]
    Cap,
    /// Replace with a missing value. Rows are never dropped.
    Remove,
}

impl FromStr for OutlierMethod {
    type Err = PreprocessingError;

    fn from_str(s: &str) -> PreprocessingResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cap" | "clip" => Ok(OutlierMethod::Cap),
            "remove" => Ok(OutlierMethod::Remove),
            other => Err(PreprocessingError::ConfigurationError(format!(
                "unsupported outlier method '{}' (expected 'cap' or 'remove')",
                other
            ))),
        }
    }
}

impl fmt::Display for OutlierMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutlierMethod::Cap => write!(f, "cap"),
            OutlierMethod::Remove => write!(f, "remove"),
        }
    }
}

/// Scaler used by the feature normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    /// Zero mean, unit (population) standard deviation.
    #[default]
    Standard,
    /// Rescale to [0, 1] using the training min and max.
    #[serde(rename = "minmax", alias = "min_max")]
    MinMax,
    /// Center on the median and scale by the interquartile range.
    Robust,
}

impl FromStr for NormalizationMethod {
    type Err = PreprocessingError;

    fn from_str(s: &str) -> PreprocessingResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(NormalizationMethod::Standard),
            "minmax" | "min_max" => Ok(NormalizationMethod::MinMax),
            "robust" => Ok(NormalizationMethod::Robust),
            other => Err(PreprocessingError::ConfigurationError(format!(
                "unsupported normalization method '{}' (expected 'standard', 'minmax' or 'robust')",
                other
            ))),
        }
    }
}

impl fmt::Display for NormalizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationMethod::Standard => write!(f, "standard"),
            NormalizationMethod::MinMax => write!(f, "minmax"),
            NormalizationMethod::Robust => write!(f, "robust"),
        }
    }
}

/// When the categorical encoder groups rare categories into `OTHER_RARE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RareGrouping {
    /// Only for columns whose cardinality exceeds `detailed_max`.
    #[default]
    HighCardinality,
    /// For every categorical column with at least one rare category.
    Always,
}

/// Cardinality thresholds of the categorical encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Largest cardinality encoded with one indicator per category.
    pub onehot_max: usize,
    /// Largest cardinality encoded with target mean plus frequency.
    pub detailed_max: usize,
    /// Categories seen fewer times than this are grouped when cardinality is too high.
    pub min_frequency: i64,
    pub rare_grouping: RareGrouping,
    /// Also encode numeric columns with very few distinct values.
    pub low_cardinality_numeric: bool,
    pub numeric_max_unique: usize,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            onehot_max: 3,
            detailed_max: 10,
            min_frequency: 50,
            rare_grouping: RareGrouping::HighCardinality,
            low_cardinality_numeric: false,
            numeric_max_unique: 10,
        }
    }
}

/// Tuning of the correlation pass. Only `threshold` affects which columns survive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationSettings {
    pub threshold: f64,
    /// Number of columns per block.
    pub chunk_size: usize,
    /// Row count above which the training rows are sampled.
    pub sample_threshold: usize,
    pub sample_size: usize,
    pub seed: u64,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            chunk_size: 100,
            sample_threshold: 50_000,
            sample_size: 20_000,
            seed: 42,
        }
    }
}

/// All knobs of [`PreprocessingPipeline`](crate::pipeline::PreprocessingPipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub roles: ColumnRoles,
    pub imputer: ImputerSettings,
    pub encoder: EncoderSettings,
    pub outlier_method: OutlierMethod,
    pub variance_threshold: f64,
    pub correlation: CorrelationSettings,
    pub normalization: NormalizationMethod,
    /// Name fragments that exempt a column from variance and correlation pruning.
    pub protected_markers: Vec<String>,
    /// Source columns removed once raw features have been derived.
    pub source_columns_to_drop: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            roles: ColumnRoles::default(),
            imputer: ImputerSettings::default(),
            encoder: EncoderSettings::default(),
            outlier_method: OutlierMethod::Cap,
            variance_threshold: 0.01,
            correlation: CorrelationSettings::default(),
            normalization: NormalizationMethod::Standard,
            protected_markers: strings(&["zscore", "quartile"]),
            source_columns_to_drop: strings(&[
                "employee_origin_country",
                "country_name",
                "first_entry_time",
                "last_exit_time",
                "modification_details",
                "row_modified",
                "date",
                "timestamp",
            ]),
        }
    }
}

impl PipelineSettings {
    /// Parses settings from JSON and validates them.
    pub fn from_json(json: &str) -> PreprocessingResult<Self> {
        let settings: PipelineSettings = serde_json::from_str(json).map_err(|e| {
            PreprocessingError::ConfigurationError(format!("invalid pipeline settings: {}", e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads and validates settings from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> PreprocessingResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> PreprocessingResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks that the thresholds are usable together.
    pub fn validate(&self) -> PreprocessingResult<()> {
        let enc = &self.encoder;
        if enc.onehot_max < 2 {
            return Err(PreprocessingError::ConfigurationError(format!(
                "encoder.onehot_max must be at least 2, got {}",
                enc.onehot_max
            )));
        }
        if enc.onehot_max > enc.detailed_max {
            return Err(PreprocessingError::ConfigurationError(format!(
                "encoder.onehot_max ({}) must not exceed encoder.detailed_max ({})",
                enc.onehot_max, enc.detailed_max
            )));
        }
        if enc.min_frequency < 1 {
            return Err(PreprocessingError::ConfigurationError(
                "encoder.min_frequency must be positive".to_string(),
            ));
        }
        if !self.variance_threshold.is_finite() || self.variance_threshold < 0.0 {
            return Err(PreprocessingError::ConfigurationError(format!(
                "variance_threshold must be a non-negative number, got {}",
                self.variance_threshold
            )));
        }
        let corr = &self.correlation;
        if !(0.0..=1.0).contains(&corr.threshold) {
            return Err(PreprocessingError::ConfigurationError(format!(
                "correlation.threshold must be within [0, 1], got {}",
                corr.threshold
            )));
        }
        if corr.chunk_size == 0 || corr.sample_size == 0 {
            return Err(PreprocessingError::ConfigurationError(
                "correlation.chunk_size and correlation.sample_size must be positive".to_string(),
            ));
        }
        if self.roles.target.is_empty() {
            return Err(PreprocessingError::ConfigurationError(
                "roles.target must name a column".to_string(),
            ));
        }
        Ok(())
    }
}
