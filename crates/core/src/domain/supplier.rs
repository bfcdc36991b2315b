//! ERP-side records: the parts catalog, the purchase-order ledger, and the
//! current supplier response table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub part_number: String,
    pub part_description: String,
}

/// A supplier surfaced from purchase history for a specific part.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplierRecord {
    pub name: String,
    pub email: String,
    pub last_purchased: DateTime<Utc>,
    pub price: f64,
    /// Annotated as `part_number (part_description)` when surfaced across
    /// multiple matching parts.
    pub part_description: String,
}

/// The latest reply received from a supplier. One row per supplier email:
/// a newer reply replaces the older one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplierResponse {
    pub id: Uuid,
    pub supplier_email: String,
    pub supplier_name: String,
    pub price: Option<f64>,
    pub response_text: String,
    pub created_at: DateTime<Utc>,
}

impl SupplierResponse {
    pub fn new(
        supplier_email: impl Into<String>,
        supplier_name: impl Into<String>,
        price: Option<f64>,
        response_text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            supplier_email: supplier_email.into(),
            supplier_name: supplier_name.into(),
            price,
            response_text: response_text.into(),
            created_at: now,
        }
    }

    /// Excerpt used in analysis payloads so a verbose reply does not flood
    /// the model context.
    pub fn excerpt(&self, max_chars: usize) -> String {
        if self.response_text.chars().count() <= max_chars {
            return self.response_text.clone();
        }
        let cut: String = self.response_text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub supplier_name: String,
    pub supplier_email: String,
    pub part_number: String,
    pub order_date: DateTime<Utc>,
    pub quantity: i64,
    pub price: f64,
}

impl PurchaseOrder {
    pub fn total(&self) -> f64 {
        self.price * self.quantity as f64
    }
}
