//! Product extraction and consolidation data model.
//!
//! [`RawProduct`] is the lenient shape parsed straight out of an AI response;
//! [`ProductRecord`] is the validated per-file line item; the consolidated
//! types are what handlers serialize back to the caller.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::FileFailure;

/// One extracted line item from one file, validated and ready for
/// consolidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub source_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub description: String,
    pub quantity: f64,
    pub unit_value: f64,
    /// Line total used for aggregation. When the AI-reported total disagrees
    /// with `quantity * unit_value` beyond [`TOTAL_TOLERANCE`], this holds the
    /// computed value and the reported one moves to `reported_total`.
    pub total_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_total: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub total_mismatch: bool,
}

/// Tolerance for the `total_value == quantity * unit_value` invariant.
pub const TOTAL_TOLERANCE: f64 = 0.01;

/// A deduplicated product spanning one or more source files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedProduct {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub description: String,
    /// Sum of matched records' quantities.
    pub quantity: f64,
    /// Unit value of the most recent matched record, not an average.
    pub unit_value: f64,
    /// Sum of matched records' line totals.
    pub total_value: f64,
    /// Contributing file names, insertion order, no duplicates.
    pub sources: Vec<String>,
}

/// Batch-level bookkeeping surfaced to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingInfo {
    pub processed_files: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_files: Vec<FileFailure>,
    /// Raw record count before consolidation.
    pub extracted_products: usize,
    #[serde(default)]
    pub skipped_records: usize,
}

/// Output of the Consolidation Engine for one upload batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationResult {
    pub products: Vec<ConsolidatedProduct>,
    pub total_products: usize,
    pub total_value: f64,
    pub processing_info: ProcessingInfo,
}

// ============================================================================
// AI response parsing
// ============================================================================

/// Top-level shape the extraction prompt asks the model for.
///
/// Portuguese aliases match the documents the service was built around;
/// models occasionally echo the source language despite the prompt.
#[derive(Debug, Default, Deserialize)]
pub struct ProductListResponse {
    #[serde(default, alias = "produtos")]
    pub products: Vec<RawProduct>,
}

/// One product as reported by the AI, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProduct {
    #[serde(default, alias = "codigo", deserialize_with = "lenient_string")]
    pub code: Option<String>,
    #[serde(default, alias = "referencia", deserialize_with = "lenient_string")]
    pub reference: Option<String>,
    #[serde(default, alias = "descricao", deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, alias = "quantidade", deserialize_with = "lenient_number")]
    pub quantity: Option<f64>,
    #[serde(default, alias = "valor_unitario", deserialize_with = "lenient_number")]
    pub unit_value: Option<f64>,
    #[serde(default, alias = "valor_total", deserialize_with = "lenient_number")]
    pub total_value: Option<f64>,
}

impl RawProduct {
    /// Validate into a [`ProductRecord`], or `None` when the record cannot
    /// participate in consolidation (blank description, negative or
    /// uncoercible numbers). Absent numeric fields coerce to zero.
    pub fn into_record(self, source_file: &str) -> Option<ProductRecord> {
        let description = self.description.map(|d| d.trim().to_string())?;
        if description.is_empty() {
            return None;
        }

        let quantity = self.quantity.unwrap_or(0.0);
        let unit_value = self.unit_value.unwrap_or(0.0);
        if quantity < 0.0 || unit_value < 0.0 {
            return None;
        }
        if let Some(total) = self.total_value {
            if total < 0.0 {
                return None;
            }
        }

        let computed = quantity * unit_value;
        let (total_value, reported_total, total_mismatch) = match self.total_value {
            Some(reported) if (reported - computed).abs() > TOTAL_TOLERANCE => {
                (computed, Some(reported), true)
            }
            Some(reported) => (reported, None, false),
            None => (computed, None, false),
        };

        Some(ProductRecord {
            source_file: source_file.to_string(),
            code: self.code.filter(|c| !c.trim().is_empty()),
            reference: self.reference.filter(|r| !r.trim().is_empty()),
            description,
            quantity,
            unit_value,
            total_value,
            reported_total,
            total_mismatch,
        })
    }
}

/// Accept a string, number, or null where a string is expected.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Accept a number, a numeric string (either decimal convention, with or
/// without currency noise), or null where a number is expected.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => coerce_number(&s),
        _ => None,
    })
}

/// Parse "1234.56", "1.234,56", "R$ 12,50" and friends into f64.
pub fn coerce_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    // Brazilian convention uses '.' for thousands and ',' for decimals; when a
    // comma is present it is the decimal separator.
    let normalized = if cleaned.contains(',') {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned
    };

    normalized.parse::<f64>().ok()
}

// ============================================================================
// Response envelopes
// ============================================================================

/// Envelope returned by the upload endpoint.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<ConsolidationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Signals a provider-credit/auth failure that warrants a dedicated
    /// dialog on the client instead of an inline error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_modal: Option<bool>,
}

impl UploadResponse {
    pub fn ok(session_id: String, results: ConsolidationResult) -> Self {
        Self {
            success: true,
            session_id: Some(session_id),
            results: Some(results),
            error: None,
            show_modal: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id: None,
            results: None,
            error: Some(message.into()),
            show_modal: None,
        }
    }

    pub fn err_modal(message: impl Into<String>) -> Self {
        Self {
            show_modal: Some(true),
            ..Self::err(message)
        }
    }
}

/// Envelope returned by the model-listing endpoint.
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
