//! Output types for a completed extraction.

use crate::provider::RemoteFile;
use serde::{Deserialize, Deserializer, Serialize};

/// Everything a successful pipeline run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutput {
    /// Id of the request scope that produced this output.
    pub request_id: String,
    /// Provider text exactly as returned. Expected to be JSON, not guaranteed.
    pub raw_text: String,
    /// Parsed form of `raw_text`; only present when output validation is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<Extraction>,
    /// Remote files referenced by the extraction call, in upload order.
    pub files: Vec<RemoteFile>,
    pub stats: ExtractionStats,
}

/// Counters and timings for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub files: usize,
    pub converted_files: usize,
    pub upload_duration_ms: u64,
    pub poll_duration_ms: u64,
    pub generate_duration_ms: u64,
    pub total_duration_ms: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

// ── Extraction schema ────────────────────────────────────────────────────

/// The three collections the extraction instruction asks for.
///
/// Every field is nullable. Missing keys deserialize as `None` too; the
/// instruction asks for explicit nulls but the parser does not reject
/// omissions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub invoices: Vec<Invoice>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub customers: Vec<Customer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(default, deserialize_with = "lenient_string")]
    pub serial_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub product_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub tax: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub unit_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub tax: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub price_with_tax: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub discount: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total_purchase_amount: Option<f64>,
}

/// Accept `12.5`, `"12.5"`, `"₹1,200.00"` or `null`.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-'))
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    })
}

/// Accept strings, and numbers rendered as strings (phone numbers, serials).
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}
