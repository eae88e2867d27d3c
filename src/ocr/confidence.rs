//! Confidence scoring for extractions.
//!
//! Each category takes the vendor's own score when one was reported and
//! otherwise a presence heuristic. The overall score is a fixed weighted
//! average of the categories.

use crate::models::ConfidenceScores;

use super::normalize::ExtractedInvoice;

pub const WEIGHT_VENDOR_INFO: f64 = 0.20;
pub const WEIGHT_INVOICE_DETAILS: f64 = 0.20;
pub const WEIGHT_LINE_ITEMS: f64 = 0.30;
pub const WEIGHT_TOTALS: f64 = 0.20;
pub const WEIGHT_HANDWRITTEN_NOTES: f64 = 0.10;

const PRESENT: f64 = 90.0;
const ITEMS_PRESENT: f64 = 85.0;
const MISSING: f64 = 50.0;

/// Normalize a vendor score to 0-100.
///
/// Values in `[0, 1]` are treated as fractions. Results are clamped and
/// rounded to two decimals.
pub fn to_percent(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let pct = if (0.0..=1.0).contains(&value) {
        value * 100.0
    } else {
        value
    };
    round2(pct.clamp(0.0, 100.0))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn presence(present: bool, score: f64) -> f64 {
    if present {
        score
    } else {
        MISSING
    }
}

/// Score an extraction.
///
/// The handwritten-notes category only participates in the overall score
/// when the document has notes; otherwise its weight is redistributed.
pub fn score(fields: &ExtractedInvoice) -> ConfidenceScores {
    let reported = &fields.reported_confidence;

    let vendor_info = reported
        .vendor_info
        .unwrap_or_else(|| presence(fields.vendor_name.is_some(), PRESENT));
    let invoice_details = reported
        .invoice_details
        .unwrap_or_else(|| presence(fields.invoice_number.is_some(), PRESENT));
    let line_items = reported
        .line_items
        .unwrap_or_else(|| presence(!fields.line_items.is_empty(), ITEMS_PRESENT));
    let totals = reported
        .totals
        .unwrap_or_else(|| presence(fields.total_amount.is_some_and(|t| t > 0.0), PRESENT));

    let has_notes = !fields.handwritten_notes.is_empty();
    let handwritten_notes = if has_notes {
        reported.handwritten_notes.unwrap_or_else(|| {
            let sum: f64 = fields.handwritten_notes.iter().map(|n| n.confidence).sum();
            round2(sum / fields.handwritten_notes.len() as f64)
        })
    } else {
        0.0
    };

    let mut weighted = vendor_info * WEIGHT_VENDOR_INFO
        + invoice_details * WEIGHT_INVOICE_DETAILS
        + line_items * WEIGHT_LINE_ITEMS
        + totals * WEIGHT_TOTALS;
    let mut total_weight =
        WEIGHT_VENDOR_INFO + WEIGHT_INVOICE_DETAILS + WEIGHT_LINE_ITEMS + WEIGHT_TOTALS;
    if has_notes {
        weighted += handwritten_notes * WEIGHT_HANDWRITTEN_NOTES;
        total_weight += WEIGHT_HANDWRITTEN_NOTES;
    }

    ConfidenceScores {
        overall: round2(weighted / total_weight),
        vendor_info,
        invoice_details,
        line_items,
        totals,
        handwritten_notes,
        field_specific: reported.field_specific.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HandwrittenNote, LineItem};

    #[test]
    fn test_to_percent() {
        assert_eq!(to_percent(0.95), 95.0);
        assert_eq!(to_percent(1.0), 100.0);
        assert_eq!(to_percent(87.5), 87.5);
        assert_eq!(to_percent(140.0), 100.0);
        assert_eq!(to_percent(-3.0), 0.0);
        assert_eq!(to_percent(f64::NAN), 0.0);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let sum = WEIGHT_VENDOR_INFO
            + WEIGHT_INVOICE_DETAILS
            + WEIGHT_LINE_ITEMS
            + WEIGHT_TOTALS
            + WEIGHT_HANDWRITTEN_NOTES;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_extraction_scores_missing() {
        let scores = score(&ExtractedInvoice::default());
        assert_eq!(scores.vendor_info, 50.0);
        assert_eq!(scores.line_items, 50.0);
        assert_eq!(scores.handwritten_notes, 0.0);
        assert_eq!(scores.overall, 50.0);
    }

    #[test]
    fn test_heuristics_without_notes() {
        let fields = ExtractedInvoice {
            vendor_name: Some("Acme".to_string()),
            invoice_number: Some("1".to_string()),
            total_amount: Some(10.0),
            line_items: vec![LineItem {
                description: "Thing".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let scores = score(&fields);
        // (90*0.2 + 90*0.2 + 85*0.3 + 90*0.2) / 0.9
        assert_eq!(scores.overall, 88.33);
    }

    #[test]
    fn test_reported_scores_and_notes_weighting() {
        let mut fields = ExtractedInvoice {
            handwritten_notes: vec![
                HandwrittenNote {
                    text: "a".to_string(),
                    confidence: 60.0,
                },
                HandwrittenNote {
                    text: "b".to_string(),
                    confidence: 80.0,
                },
            ],
            ..Default::default()
        };
        fields.reported_confidence.vendor_info = Some(100.0);
        fields.reported_confidence.invoice_details = Some(100.0);
        fields.reported_confidence.line_items = Some(100.0);
        fields.reported_confidence.totals = Some(100.0);

        let scores = score(&fields);
        assert_eq!(scores.handwritten_notes, 70.0);
        // 100*0.9 + 70*0.1
        assert_eq!(scores.overall, 97.0);
    }
}
