//! ## Raw activity features
//!
//! [`ActivityFeatureCreator`] derives per-row features from the raw activity columns:
//! printing and burning ratios, presence and access flags, risk flag sums, and clock/calendar
//! features from the entry, exit and date timestamps. Every feature is plain arithmetic on
//! one row, so the creator is stateless. A feature is only emitted when all of its source
//! columns are present with a usable type, and never replaces an existing column.
//!
//! Ratios divide by `max(denominator, 1)` so zero counts never produce infinities.

use crate::diagnostics::{self, PreprocessingWarning};
use crate::exceptions::PreprocessingResult;
use crate::frame::{self, column, is_numeric_type, is_temporal_type};
use crate::impl_transformer;
use datafusion::arrow::datatypes::DataType;
use datafusion::prelude::DataFrame;
use datafusion_expr::{cast, lit, Case as DFCase, Expr};
use datafusion_functions::datetime::date_part;
use std::collections::HashSet;

/// `numerator / max(denominator / scale, 1)`
const RATIOS: &[(&str, &str, &str, f64)] = &[
    ("avg_pages_per_print", "total_printed_pages", "num_print_commands", 1.0),
    ("print_intensity", "num_print_commands", "total_presence_minutes", 60.0),
    ("color_print_preference", "num_color_prints", "num_print_commands", 1.0),
    ("bw_print_preference", "num_bw_prints", "num_print_commands", 1.0),
    ("color_vs_bw_ratio", "num_color_prints", "num_bw_prints", 1.0),
    ("off_hours_print_ratio", "num_print_commands_off_hours", "num_print_commands", 1.0),
    ("off_hours_pages_ratio", "num_printed_pages_off_hours", "total_printed_pages", 1.0),
    ("off_hours_avg_pages", "num_printed_pages_off_hours", "num_print_commands_off_hours", 1.0),
    ("print_mobility_score", "print_campuses", "num_unique_campus", 1.0),
    ("avg_burn_volume_per_request", "total_burn_volume_mb", "num_burn_requests", 1.0),
    ("avg_files_per_burn", "total_files_burned", "num_burn_requests", 1.0),
    ("avg_file_size_mb", "total_burn_volume_mb", "total_files_burned", 1.0),
    ("off_hours_burn_ratio", "num_burn_requests_off_hours", "num_burn_requests", 1.0),
    ("burn_intensity", "num_burn_requests", "total_presence_minutes", 60.0),
    ("classification_variance", "max_request_classification", "avg_request_classification", 1.0),
    ("burn_mobility_score", "burn_campuses", "num_unique_campus", 1.0),
    ("avg_presence_per_entry", "total_presence_minutes", "num_entries", 1.0),
    ("print_to_burn_ratio", "num_print_commands", "num_burn_requests", 1.0),
    ("burn_to_print_ratio", "num_burn_requests", "num_print_commands", 1.0),
    ("prints_per_seniority", "num_print_commands", "employee_seniority_years", 1.0),
    ("burns_per_seniority", "num_burn_requests", "employee_seniority_years", 1.0),
];

#[derive(Debug, Clone, Copy)]
enum Cmp {
    Gt,
    Ge,
    Lt,
}

/// `1` if `source <cmp> threshold`, else `0`.
const FLAGS: &[(&str, &str, Cmp, f64)] = &[
    ("prints_from_other_campus", "printed_from_other", Cmp::Gt, 0.0),
    ("burns_from_other_campus", "burned_from_other", Cmp::Gt, 0.0),
    ("high_classification_burn", "max_request_classification", Cmp::Ge, 4.0),
    ("is_long_presence", "total_presence_minutes", Cmp::Gt, 720.0),
    ("is_short_presence", "total_presence_minutes", Cmp::Lt, 240.0),
    ("is_new_employee", "employee_seniority_years", Cmp::Lt, 1.0),
    ("is_veteran_employee", "employee_seniority_years", Cmp::Gt, 10.0),
    ("is_multi_campus_user", "num_unique_campus", Cmp::Gt, 1.0),
    ("has_travel_history", "is_abroad", Cmp::Gt, 0.0),
    ("hostile_travel_risk", "is_hostile_country_trip", Cmp::Gt, 0.0),
];

/// Weighted sums of source columns.
const COMBINATIONS: &[(&str, &[(&str, f64)])] = &[
    ("entry_exit_balance", &[("num_entries", 1.0), ("num_exits", -1.0)]),
    ("access_frequency", &[("num_entries", 1.0), ("num_exits", 1.0)]),
    (
        "classification_consistency",
        &[("max_request_classification", 1.0), ("avg_request_classification", -1.0)],
    ),
    (
        "total_activity_score",
        &[("num_print_commands", 1.0), ("num_burn_requests", 1.0)],
    ),
    (
        "personal_risk_flags",
        &[
            ("has_foreign_citizenship", 1.0),
            ("has_criminal_record", 1.0),
            ("has_medical_history", 1.0),
        ],
    ),
    (
        "suspicious_access_score",
        &[
            ("entered_during_night_hours", 2.0),
            ("early_entry_flag", 1.0),
            ("late_exit_flag", 1.0),
            ("entry_during_weekend", 2.0),
        ],
    ),
    ("work_duration_hours", &[("total_presence_minutes", 1.0 / 60.0)]),
];

/// Hour-of-day flags derived from a timestamp column: `(suffix, cmp, hour)`.
const ENTRY_FLAGS: &[(&str, Cmp, f64)] = &[
    ("is_very_early_entry", Cmp::Lt, 6.0),
    ("is_early_entry", Cmp::Lt, 8.0),
    ("is_late_entry", Cmp::Gt, 10.0),
    ("is_night_entry", Cmp::Ge, 20.0),
];

const EXIT_FLAGS: &[(&str, Cmp, f64)] = &[
    ("is_early_exit", Cmp::Lt, 16.0),
    ("is_late_exit", Cmp::Gt, 19.0),
    ("is_very_late_exit", Cmp::Gt, 22.0),
    ("is_night_exit", Cmp::Ge, 23.0),
];

fn float(name: &str) -> Expr {
    cast(column(name), DataType::Float64)
}

fn part(unit: &str, e: Expr) -> Expr {
    cast(date_part().call(vec![lit(unit), e]), DataType::Float64)
}

/// `CASE WHEN e < 1 THEN 1 ELSE e END`; missing stays missing.
fn at_least_one(e: Expr) -> Expr {
    Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![(Box::new(e.clone().lt(lit(1.0))), Box::new(lit(1.0)))],
        else_expr: Some(Box::new(e)),
    })
}

fn flag(e: Expr, cmp: Cmp, threshold: f64) -> Expr {
    let cond = match cmp {
        Cmp::Gt => e.gt(lit(threshold)),
        Cmp::Ge => e.gt_eq(lit(threshold)),
        Cmp::Lt => e.lt(lit(threshold)),
    };
    Expr::Case(DFCase {
        expr: None,
        when_then_expr: vec![(Box::new(cond), Box::new(lit(1_i64)))],
        else_expr: Some(Box::new(lit(0_i64))),
    })
}

/// Derives the raw activity features.
#[derive(Debug, Clone)]
pub struct ActivityFeatureCreator {
    pub entry_column: String,
    pub exit_column: String,
    pub date_column: String,
}

impl Default for ActivityFeatureCreator {
    fn default() -> Self {
        Self {
            entry_column: "first_entry_time".to_string(),
            exit_column: "last_exit_time".to_string(),
            date_column: "date".to_string(),
        }
    }
}

impl ActivityFeatureCreator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fit(&mut self, _df: &DataFrame) -> PreprocessingResult<()> {
        Ok(())
    }

    /// All derivable `(name, expression)` pairs for the given frame.
    fn derived(&self, df: &DataFrame) -> Vec<(String, Expr)> {
        let numeric: HashSet<String> = frame::fields(df)
            .into_iter()
            .filter(|(_, dt)| is_numeric_type(dt))
            .map(|(n, _)| n)
            .collect();
        let temporal = |name: &str| {
            frame::data_type(df, name).is_some_and(|dt| is_temporal_type(&dt))
        };
        let mut out: Vec<(String, Expr)> = Vec::new();

        for (name, num, den, scale) in RATIOS {
            if numeric.contains(*num) && numeric.contains(*den) {
                let denominator = at_least_one(float(den) / lit(*scale));
                out.push((name.to_string(), float(num) / denominator));
            }
        }
        for (name, source, cmp, threshold) in FLAGS {
            if numeric.contains(*source) {
                out.push((name.to_string(), flag(float(source), *cmp, *threshold)));
            }
        }
        for (name, terms) in COMBINATIONS {
            if terms.iter().all(|(c, _)| numeric.contains(*c)) {
                let sum = terms
                    .iter()
                    .map(|(c, w)| float(c) * lit(*w))
                    .reduce(|acc, t| acc + t);
                if let Some(sum) = sum {
                    out.push((name.to_string(), sum));
                }
            }
        }

        for (prefix, source, flags) in [
            ("entry", &self.entry_column, ENTRY_FLAGS),
            ("exit", &self.exit_column, EXIT_FLAGS),
        ] {
            if !temporal(source) {
                continue;
            }
            let hour = part("hour", column(source));
            let minute = part("minute", column(source));
            out.push((format!("{}_hour", prefix), hour.clone()));
            out.push((format!("{}_minute", prefix), minute.clone()));
            out.push((
                format!("{}_time_numeric", prefix),
                hour.clone() + minute / lit(60.0),
            ));
            for (name, cmp, h) in flags {
                out.push((name.to_string(), flag(hour.clone(), *cmp, *h)));
            }
        }

        if temporal(&self.date_column) {
            let date = column(&self.date_column);
            let dow = part("dow", date.clone());
            out.push(("month".to_string(), part("month", date.clone())));
            out.push(("day".to_string(), part("day", date.clone())));
            out.push(("quarter".to_string(), part("quarter", date)));
            // Monday = 0, Sunday = 6.
            out.push((
                "weekday".to_string(),
                (dow.clone() + lit(6.0)) % lit(7.0),
            ));
            // Sunday = 0, Saturday = 6.
            out.push((
                "is_weekend".to_string(),
                Expr::Case(DFCase {
                    expr: None,
                    when_then_expr: vec![(
                        Box::new(dow.clone().eq(lit(0.0)).or(dow.eq(lit(6.0)))),
                        Box::new(lit(1_i64)),
                    )],
                    else_expr: Some(Box::new(lit(0_i64))),
                }),
            ));
        }
        out
    }

    pub fn plan(
        &self,
        df: DataFrame,
    ) -> PreprocessingResult<(DataFrame, Vec<PreprocessingWarning>)> {
        let mut exprs = frame::passthrough(&df);
        let mut seen: HashSet<String> = frame::fields(&df).into_iter().map(|(n, _)| n).collect();
        for (name, expr) in self.derived(&df) {
            if seen.insert(name.clone()) {
                exprs.push(expr.alias(name));
            }
        }
        Ok((df.select(exprs)?, Vec::new()))
    }

    pub fn transform(&self, df: DataFrame) -> PreprocessingResult<DataFrame> {
        let (df, warnings) = self.plan(df)?;
        diagnostics::emit(&warnings);
        Ok(df)
    }

    pub fn is_fitted(&self) -> bool {
        true
    }

    fn inherent_is_stateful(&self) -> bool {
        false
    }
}

impl_transformer!(ActivityFeatureCreator);
