//! Consolidation engine: merges per-file product lists into a single
//! deduplicated, totaled list.
//!
//! Pure functions, no async. The fold runs over results in input order and
//! keys products by shared code first, normalized description otherwise.

use indexmap::IndexMap;

use crate::error::FileFailure;
use crate::schema::{ConsolidatedProduct, ConsolidationResult, ProcessingInfo, ProductRecord};

/// Outcome of processing one uploaded file, in input order.
#[derive(Debug)]
pub enum FileResult {
    Extracted {
        source_file: String,
        products: Vec<ProductRecord>,
        /// Records the extractor rejected (blank description, bad numbers).
        skipped: usize,
    },
    Failed(FileFailure),
}

/// Matching rule for "same product": a non-empty code is authoritative
/// (suppliers reuse descriptions inconsistently but codes are stable);
/// otherwise the case-folded, whitespace-collapsed description.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IdentityKey {
    Code(String),
    Description(String),
}

impl IdentityKey {
    fn for_record(record: &ProductRecord) -> Self {
        match &record.code {
            Some(code) if !code.trim().is_empty() => {
                IdentityKey::Code(normalize(code))
            }
            _ => IdentityKey::Description(normalize(&record.description)),
        }
    }
}

/// Case-fold and collapse internal whitespace.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Accumulator for one identity key.
struct Accumulator {
    code: Option<String>,
    reference: Option<String>,
    description: String,
    quantity_sum: f64,
    total_value_sum: f64,
    last_unit_value: f64,
    sources: Vec<String>,
}

impl Accumulator {
    fn seed(record: &ProductRecord) -> Self {
        Self {
            code: record.code.clone(),
            reference: record.reference.clone(),
            description: record.description.clone(),
            quantity_sum: record.quantity,
            total_value_sum: record.total_value,
            last_unit_value: record.unit_value,
            sources: vec![record.source_file.clone()],
        }
    }

    fn absorb(&mut self, record: &ProductRecord) {
        self.quantity_sum += record.quantity;
        self.total_value_sum += record.total_value;
        self.last_unit_value = record.unit_value;
        if !self.sources.contains(&record.source_file) {
            self.sources.push(record.source_file.clone());
        }
        // Fill display fields a later record knows and the seed didn't.
        if self.reference.is_none() {
            self.reference = record.reference.clone();
        }
    }

    fn finish(self) -> ConsolidatedProduct {
        ConsolidatedProduct {
            code: self.code,
            reference: self.reference,
            description: self.description,
            quantity: self.quantity_sum,
            unit_value: self.last_unit_value,
            total_value: self.total_value_sum,
            sources: self.sources,
        }
    }
}

/// Merge per-file extraction results into one [`ConsolidationResult`].
///
/// Failed files are recorded and skipped; a failure never aborts the batch.
/// Output order is the first-seen order of each identity key. The result
/// total is summed over consolidated entries, so each raw record contributes
/// exactly once.
pub fn consolidate(per_file_results: Vec<FileResult>) -> ConsolidationResult {
    let mut accumulators: IndexMap<IdentityKey, Accumulator> = IndexMap::new();
    let mut info = ProcessingInfo::default();

    for result in per_file_results {
        match result {
            FileResult::Failed(failure) => {
                info.failed_files.push(failure);
            }
            FileResult::Extracted { source_file, products, skipped } => {
                tracing::debug!(
                    "consolidating {} record(s) from {} ({} skipped)",
                    products.len(),
                    source_file,
                    skipped
                );
                info.processed_files += 1;
                info.extracted_products += skipped;
                info.skipped_records += skipped;
                for record in products {
                    info.extracted_products += 1;

                    if record.description.trim().is_empty() {
                        info.skipped_records += 1;
                        continue;
                    }

                    let key = IdentityKey::for_record(&record);
                    match accumulators.get_mut(&key) {
                        Some(acc) => acc.absorb(&record),
                        None => {
                            accumulators.insert(key, Accumulator::seed(&record));
                        }
                    }
                }
            }
        }
    }

    let products: Vec<ConsolidatedProduct> =
        accumulators.into_values().map(Accumulator::finish).collect();
    let total_value = products.iter().map(|p| p.total_value).sum();

    ConsolidationResult {
        total_products: products.len(),
        total_value,
        products,
        processing_info: info,
    }
}
