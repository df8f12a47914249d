use crate::llm::RawResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One product as supplied by the caller. Validated before any external call
/// and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub category: String,
    /// Local path or http(s) URI of the product photo.
    pub image_source: String,
    #[serde(default)]
    pub additional_info: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("product identifier cannot be empty")]
    EmptyId,
    #[error("product name cannot be empty")]
    EmptyName,
    #[error("price must be a non-negative number")]
    InvalidPrice,
    #[error("category cannot be empty")]
    EmptyCategory,
    #[error("image source cannot be empty")]
    EmptyImageSource,
    #[error("duplicate product identifier `{0}`")]
    DuplicateId(String),
}

impl ProductRecord {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(ValidationError::InvalidPrice);
        }
        if self.category.trim().is_empty() {
            return Err(ValidationError::EmptyCategory);
        }
        if self.image_source.trim().is_empty() {
            return Err(ValidationError::EmptyImageSource);
        }
        Ok(())
    }
}

/// The structured listing produced for one product, plus provenance metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingResult {
    pub title: String,
    pub description: String,
    pub features: Vec<String>,
    pub keywords: String,
    pub product_id: String,
    pub original_name: String,
    pub original_price: f64,
    pub category: String,
    pub generated_at: DateTime<Utc>,
    pub model_used: String,
    pub tokens_used: u32,
}

impl ListingResult {
    /// Assembles a listing from whatever fields the extractor recovered.
    /// Missing or oddly-typed fields degrade to empty values rather than
    /// failing; callers tolerate partially populated listings.
    pub fn from_extracted(
        product: &ProductRecord,
        data: &Map<String, Value>,
        response: &RawResponse,
    ) -> Self {
        Self {
            title: string_field(data, "title"),
            description: string_field(data, "description"),
            features: feature_list(data),
            keywords: keyword_field(data),
            product_id: product.id.clone(),
            original_name: product.name.clone(),
            original_price: product.price,
            category: product.category.clone(),
            generated_at: Utc::now(),
            model_used: response.model.clone(),
            tokens_used: response.tokens_used,
        }
    }
}

fn string_field(data: &Map<String, Value>, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn feature_list(data: &Map<String, Value>) -> Vec<String> {
    data.get("features")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

// Models asked for a comma-separated string sometimes hand back an array
// anyway; join it instead of dropping the keywords.
fn keyword_field(data: &Map<String, Value>) -> String {
    match data.get("keywords") {
        Some(Value::String(keywords)) => keywords.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    }
}

/// Demo records for the no-input-file path and for tests.
pub fn sample_products() -> Vec<ProductRecord> {
    vec![
        ProductRecord {
            id: "1".to_string(),
            name: "Premium Wireless Headphones".to_string(),
            price: 129.99,
            category: "Electronics".to_string(),
            image_source: "https://images.unsplash.com/photo-1505740420928-5e560c06d30e?w=400"
                .to_string(),
            additional_info: Some("Noise cancelling, 40-hour battery".to_string()),
        },
        ProductRecord {
            id: "2".to_string(),
            name: "Running Shoes".to_string(),
            price: 89.99,
            category: "Sports".to_string(),
            image_source: "https://images.unsplash.com/photo-1542291026-7eec264c27ff?w=400"
                .to_string(),
            additional_info: Some("Lightweight, breathable mesh".to_string()),
        },
        ProductRecord {
            id: "3".to_string(),
            name: "Office Chair".to_string(),
            price: 199.99,
            category: "Furniture".to_string(),
            image_source: "https://images.unsplash.com/photo-1586023492125-27b2c045efd7?w=400"
                .to_string(),
            additional_info: Some("Ergonomic design, adjustable height".to_string()),
        },
    ]
}
