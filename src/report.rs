//! Advisory classification of the model's report text.
//!
//! The text itself is never modified or parsed into findings; this only
//! records whether it follows the expected grammar so non-compliant answers
//! show up in logs and in the result metadata.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::prompt::{ALL_CLEAR_SENTINEL, DISCREPANCIES_HEADER, MISSING_DATA_HEADER, SUMMARY_HEADER};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReportShape {
    AllClear,
    #[serde(rename_all = "camelCase")]
    Findings {
        discrepancies: bool,
        missing_data: bool,
        summary: bool,
        field_entries: usize,
    },
    Unrecognized,
}

fn field_line() -> &'static Regex {
    static FIELD_LINE: OnceLock<Regex> = OnceLock::new();
    FIELD_LINE.get_or_init(|| Regex::new(r"(?m)^\s*Field:\s*Box\s+\S+").expect("valid regex"))
}

impl ReportShape {
    pub fn classify(text: &str) -> Self {
        let has_line = |literal: &str| text.lines().any(|l| l.trim() == literal);

        let discrepancies = has_line(DISCREPANCIES_HEADER);
        let missing_data = has_line(MISSING_DATA_HEADER);
        let summary = has_line(SUMMARY_HEADER);

        if discrepancies || missing_data || summary {
            return ReportShape::Findings {
                discrepancies,
                missing_data,
                summary,
                field_entries: field_line().find_iter(text).count(),
            };
        }

        if has_line(ALL_CLEAR_SENTINEL) {
            return ReportShape::AllClear;
        }

        ReportShape::Unrecognized
    }

    /// True when the text follows one of the two expected layouts in full.
    pub fn is_well_formed(&self) -> bool {
        match self {
            ReportShape::AllClear => true,
            ReportShape::Findings {
                discrepancies,
                missing_data,
                summary,
                ..
            } => *discrepancies && *missing_data && *summary,
            ReportShape::Unrecognized => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_is_all_clear() {
        let shape = ReportShape::classify(ALL_CLEAR_SENTINEL);
        assert_eq!(shape, ReportShape::AllClear);
        assert!(shape.is_well_formed());
    }

    #[test]
    fn test_findings_counts_field_lines() {
        let text = "❌ DISCREPANCIES FOUND:\n\
                    Where: Employer - T4\n\
                    Field: Box 14 - Employment income\n\
                    Discrepancy: Expected 52,340.00, Entered 52,430.00. Transposed digits\n\
                    \n\
                    ⚠️ MISSING DATA:\n\
                    None\n\
                    \n\
                    📋 SUMMARY:\n\
                    One T4 checked, one discrepancy found.";

        assert_eq!(
            ReportShape::classify(text),
            ReportShape::Findings {
                discrepancies: true,
                missing_data: true,
                summary: true,
                field_entries: 1,
            }
        );
    }

    #[test]
    fn test_partial_sections_not_well_formed() {
        let shape = ReportShape::classify("❌ DISCREPANCIES FOUND:\nField: Box 22 - Income tax deducted");
        assert!(matches!(shape, ReportShape::Findings { field_entries: 1, .. }));
        assert!(!shape.is_well_formed());
    }

    #[test]
    fn test_refusal_is_unrecognized() {
        let shape = ReportShape::classify("I'm sorry, I can't view images.");
        assert_eq!(shape, ReportShape::Unrecognized);
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let json = serde_json::to_value(ReportShape::AllClear).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "allClear"}));
    }
}
