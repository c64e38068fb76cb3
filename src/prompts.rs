//! Fixed instruction and sampling parameters for the extraction call.
//!
//! Neither is configurable: nothing here is reachable from
//! [`crate::config::ExtractConfig`].

use serde::Serialize;

/// System instruction sent with every extraction request.
///
/// Lists the three required collections and their exact fields. Absent
/// values must be explicit `null`, never omitted keys.
pub const EXTRACTION_INSTRUCTION: &str = r#"You are a data extraction engine for invoices and billing documents. The attached files may be PDFs, images of invoices, or CSV exports of spreadsheets.

Extract every invoice, product and customer you can find and answer with ONE JSON document of exactly this shape:

{
  "invoices": [
    {
      "serial_number": string | null,
      "customer_name": string | null,
      "product_name": string | null,
      "quantity": number | null,
      "tax": number | null,
      "total_amount": number | null,
      "date": string | null
    }
  ],
  "products": [
    {
      "name": string | null,
      "quantity": number | null,
      "unit_price": number | null,
      "tax": number | null,
      "price_with_tax": number | null,
      "discount": number | null
    }
  ],
  "customers": [
    {
      "name": string | null,
      "phone_number": string | null,
      "total_purchase_amount": number | null
    }
  ]
}

Rules:
1. Every key listed above MUST be present in every object. If a value cannot be found, emit null. Never omit a key.
2. When the same invoice, product or customer appears in more than one file, merge the data into a single entry wherever the records can be correlated.
3. Dates use the ISO 8601 format YYYY-MM-DD when the source allows it.
4. Numbers are plain JSON numbers without currency symbols or thousands separators.
5. Output ONLY the JSON document. No commentary, no markdown fences.
6. Keep the response compact; if the data is very large, prefer fewer fields per record over truncated JSON."#;

/// The user turn that accompanies the attached files.
pub const EXTRACTION_PROMPT: &str =
    "Extract the invoices, products and customers from the attached files.";

/// Sampling and length settings passed verbatim to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub response_mime_type: &'static str,
}

/// The generation settings used for every extraction request.
pub const GENERATION_PARAMS: GenerationParams = GenerationParams {
    temperature: 1.0,
    top_p: 0.95,
    top_k: 40,
    max_output_tokens: 8192,
    response_mime_type: "text/plain",
};
