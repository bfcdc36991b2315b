//! The procurement tool set the model can call.
//!
//! Tool failures are data, not errors: the registry renders every failure as
//! a `{"error": ...}` payload so the model can read it, apologize, and try a
//! different approach. The `Result` boundary stops here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use scout_core::domain::procurement::{ContactedSupplier, ProcurementRequest};
use scout_core::domain::supplier::{PurchaseOrder, SupplierResponse};
use scout_db::repositories::{
    CatalogRepository, OrderRepository, ProcurementRepository, RepositoryError,
    ResponseRepository,
};
use thiserror::Error;

use crate::email::{MailError, Mailer, OutboundEmail};
use crate::llm::ToolDefinition;

/// Tools whose arguments get the owning session id injected before
/// execution, because they open tracked procurement requests.
pub const OUTREACH_TOOLS: &[&str] = &["send_supplier_email", "send_bulk_procurement_request"];

const REPLY_FORMAT_HINT: &str = "Reply with your price quote: e.g., \"Price: $450 per unit\"";
const RESPONSE_EXCERPT_CHARS: usize = 200;
const CATALOG_LIMIT: i64 = 20;
const RESPONSES_LIMIT: i64 = 50;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("lookup failed: {0}")]
    Repository(#[from] RepositoryError),
    #[error("email delivery failed: {0}")]
    Mail(#[from] MailError),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> Value;
    async fn execute(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Hook for resolving tool names the registry does not know about, e.g. an
/// external plugin host. Absent a resolver, unknown names yield an error
/// payload.
#[async_trait]
pub trait ToolResolver: Send + Sync {
    async fn resolve(&self, name: &str, arguments: Value) -> Value;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    resolver: Option<Arc<dyn ToolResolver>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn set_resolver(&mut self, resolver: Arc<dyn ToolResolver>) {
        self.resolver = Some(resolver);
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Execute a tool by name. Never fails: unknown tools and execution
    /// errors come back as `{"error": ...}` payloads for the model.
    pub async fn execute(&self, name: &str, arguments: Value) -> Value {
        let Some(tool) = self.tools.iter().find(|tool| tool.name() == name) else {
            if let Some(resolver) = &self.resolver {
                return resolver.resolve(name, arguments).await;
            }
            tracing::warn!(tool = name, "unknown tool requested");
            return json!({ "error": format!("Unknown tool: {name}") });
        };

        match tool.execute(arguments).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(tool = name, error = %err, "tool execution failed");
                json!({ "error": err.to_string() })
            }
        }
    }
}

/// Everything the standard tool set needs.
pub struct ToolDeps {
    pub catalog: Arc<dyn CatalogRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub responses: Arc<dyn ResponseRepository>,
    pub procurement: Arc<dyn ProcurementRepository>,
    pub mailer: Option<Arc<dyn Mailer>>,
    pub request_ttl_days: i64,
}

pub fn procurement_registry(deps: ToolDeps) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(Arc::new(FindSuppliersTool { catalog: deps.catalog.clone() }));
    registry.register(Arc::new(SearchPartsCatalogTool { catalog: deps.catalog }));
    registry.register(Arc::new(SendSupplierEmailTool {
        mailer: deps.mailer.clone(),
        procurement: deps.procurement.clone(),
        request_ttl_days: deps.request_ttl_days,
    }));
    registry.register(Arc::new(SendBulkProcurementRequestTool {
        mailer: deps.mailer,
        procurement: deps.procurement,
        request_ttl_days: deps.request_ttl_days,
    }));
    registry.register(Arc::new(GetSupplierResponsesTool { responses: deps.responses }));
    registry.register(Arc::new(PlaceOrderTool { orders: deps.orders }));
    registry
}

fn require_str(arguments: &Value, key: &str) -> Result<String, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ToolError::Invalid(format!("`{key}` is required")))
}

fn optional_str(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn session_id_from(arguments: &Value) -> Option<Uuid> {
    arguments
        .get("session_id")
        .and_then(Value::as_str)
        .and_then(|value| Uuid::parse_str(value).ok())
}

pub struct FindSuppliersTool {
    pub catalog: Arc<dyn CatalogRepository>,
}

#[async_trait]
impl Tool for FindSuppliersTool {
    fn name(&self) -> &'static str {
        "find_suppliers"
    }

    fn description(&self) -> &'static str {
        "Find suppliers we have previously bought a part from, based on purchase history."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "part_description": {
                    "type": "string",
                    "description": "Part number or description to look up, e.g. 'hydraulic actuator' or 'HX-200'"
                }
            },
            "required": ["part_description"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let query = require_str(&arguments, "part_description").map_err(|_| {
            ToolError::Invalid(
                "part_description is required. Ask the buyer which part they need.".to_string(),
            )
        })?;

        let parts = self.catalog.search_parts(Some(&query), CATALOG_LIMIT).await?;
        if parts.is_empty() {
            return Err(ToolError::Invalid(format!(
                "No parts found matching \"{query}\". Use search_parts_catalog to browse available parts."
            )));
        }

        let mut suppliers = Vec::new();
        for part in &parts {
            for record in self.catalog.suppliers_for_part(&part.part_number).await? {
                suppliers.push(json!({
                    "name": record.name,
                    "email": record.email,
                    "last_purchased": record.last_purchased.to_rfc3339(),
                    "price": record.price,
                    "part_description":
                        format!("{} ({})", part.part_number, part.part_description),
                }));
            }
        }

        if suppliers.is_empty() {
            let part_numbers: Vec<&str> =
                parts.iter().map(|part| part.part_number.as_str()).collect();
            return Err(ToolError::Invalid(format!(
                "Found matching parts ({}) but no purchase history for them yet.",
                part_numbers.join(", ")
            )));
        }

        Ok(json!({ "count": suppliers.len(), "suppliers": suppliers }))
    }
}

pub struct SearchPartsCatalogTool {
    pub catalog: Arc<dyn CatalogRepository>,
}

#[async_trait]
impl Tool for SearchPartsCatalogTool {
    fn name(&self) -> &'static str {
        "search_parts_catalog"
    }

    fn description(&self) -> &'static str {
        "Browse or search the parts catalog when the exact part is unknown."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "search_term": {
                    "type": "string",
                    "description": "Optional search term; omit to list the catalog"
                }
            }
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let query = optional_str(&arguments, "search_term");
        let parts = self.catalog.search_parts(query.as_deref(), CATALOG_LIMIT).await?;

        if parts.is_empty() {
            let content = match query {
                Some(query) => format!("No catalog parts match \"{query}\"."),
                None => "The parts catalog is empty.".to_string(),
            };
            return Ok(json!({ "count": 0, "content": content }));
        }

        let mut content = format!("Parts catalog ({} shown):\n", parts.len());
        for part in &parts {
            content.push_str(&format!("- {}: {}\n", part.part_number, part.part_description));
        }

        Ok(json!({ "count": parts.len(), "content": content }))
    }
}

pub struct SendSupplierEmailTool {
    pub mailer: Option<Arc<dyn Mailer>>,
    pub procurement: Arc<dyn ProcurementRepository>,
    pub request_ttl_days: i64,
}

#[async_trait]
impl Tool for SendSupplierEmailTool {
    fn name(&self) -> &'static str {
        "send_supplier_email"
    }

    fn description(&self) -> &'static str {
        "Send a quote-request email to one supplier and start tracking the reply."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "supplier_email": { "type": "string" },
                "supplier_name": { "type": "string" },
                "subject": { "type": "string" },
                "message": { "type": "string" },
                "part_description": {
                    "type": "string",
                    "description": "The part being sourced, used for tracking"
                }
            },
            "required": ["supplier_email", "supplier_name", "subject", "message"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let supplier_email = require_str(&arguments, "supplier_email")?;
        let supplier_name = require_str(&arguments, "supplier_name")?;
        let subject = require_str(&arguments, "subject")?;
        let body = require_str(&arguments, "message")?;

        if !supplier_email.contains('@') {
            return Err(ToolError::Invalid(format!(
                "`{supplier_email}` does not look like an email address"
            )));
        }

        let Some(mailer) = &self.mailer else {
            return Err(ToolError::Unavailable(
                "Email service is not configured; set an email API key to enable outreach."
                    .to_string(),
            ));
        };

        mailer
            .send(&OutboundEmail {
                to: supplier_email.clone(),
                subject: subject.clone(),
                body: format!("{body}\n\n{REPLY_FORMAT_HINT}"),
            })
            .await?;

        let part_description =
            optional_str(&arguments, "part_description").unwrap_or_else(|| subject.clone());
        let tracking = match session_id_from(&arguments) {
            Some(session_id) => {
                let now = Utc::now();
                let request = ProcurementRequest::open(
                    session_id,
                    part_description,
                    vec![ContactedSupplier {
                        email: supplier_email.clone(),
                        name: supplier_name.clone(),
                        contacted_at: now,
                    }],
                    self.request_ttl_days,
                    now,
                );
                match self.procurement.insert(&request).await {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::warn!(error = %err, "could not open procurement tracking");
                        false
                    }
                }
            }
            None => {
                tracing::warn!("outreach without a session id; reply tracking disabled");
                false
            }
        };

        Ok(json!({
            "success": true,
            "message": format!("Email sent to {supplier_name} <{supplier_email}>."),
            "tracking": tracking,
        }))
    }
}

pub struct SendBulkProcurementRequestTool {
    pub mailer: Option<Arc<dyn Mailer>>,
    pub procurement: Arc<dyn ProcurementRepository>,
    pub request_ttl_days: i64,
}

#[async_trait]
impl Tool for SendBulkProcurementRequestTool {
    fn name(&self) -> &'static str {
        "send_bulk_procurement_request"
    }

    fn description(&self) -> &'static str {
        "Email a quote request to several suppliers at once and track all replies \
         under one procurement request. Use this whenever contacting two or more suppliers."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "part_description": { "type": "string" },
                "suppliers": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "email": { "type": "string" },
                            "name": { "type": "string" }
                        },
                        "required": ["email", "name"]
                    }
                },
                "subject": { "type": "string", "description": "Optional custom subject" },
                "message": { "type": "string", "description": "Optional custom body text" }
            },
            "required": ["part_description", "suppliers"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let part_description = require_str(&arguments, "part_description")?;
        let suppliers = arguments
            .get("suppliers")
            .and_then(Value::as_array)
            .filter(|list| !list.is_empty())
            .ok_or_else(|| {
                ToolError::Invalid("`suppliers` must be a non-empty array".to_string())
            })?;

        let mut contacts = Vec::new();
        let now = Utc::now();
        for supplier in suppliers {
            let email = supplier
                .get("email")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| value.contains('@'))
                .ok_or_else(|| {
                    ToolError::Invalid("every supplier needs a valid `email`".to_string())
                })?;
            let name = supplier
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(email);
            contacts.push(ContactedSupplier {
                email: email.to_string(),
                name: name.to_string(),
                contacted_at: now,
            });
        }

        let Some(mailer) = &self.mailer else {
            return Err(ToolError::Unavailable(
                "Email service is not configured; set an email API key to enable outreach."
                    .to_string(),
            ));
        };

        let Some(session_id) = session_id_from(&arguments) else {
            return Err(ToolError::Invalid(
                "bulk outreach requires an active session for tracking".to_string(),
            ));
        };

        let request = ProcurementRequest::open(
            session_id,
            part_description.clone(),
            contacts.clone(),
            self.request_ttl_days,
            now,
        );
        self.procurement.insert(&request).await?;

        let subject = optional_str(&arguments, "subject")
            .unwrap_or_else(|| format!("Quote request: {part_description}"));
        let body_template = optional_str(&arguments, "message");

        let mut emails_sent = 0usize;
        let mut errors: Vec<Value> = Vec::new();
        for contact in &contacts {
            let body = body_template.clone().unwrap_or_else(|| {
                format!(
                    "Hello {},\n\nWe are sourcing {} and would like a current price quote.\n\
                     Please include unit price, lead time, and minimum order quantity.\n\n\
                     Thank you,\nSupplyScout Procurement",
                    contact.name, part_description
                )
            });

            let outcome = mailer
                .send(&OutboundEmail {
                    to: contact.email.clone(),
                    subject: subject.clone(),
                    body: format!("{body}\n\n{REPLY_FORMAT_HINT}"),
                })
                .await;

            match outcome {
                Ok(()) => emails_sent += 1,
                Err(err) => {
                    tracing::warn!(supplier = %contact.email, error = %err, "bulk send failed");
                    errors.push(json!({ "email": contact.email, "error": err.to_string() }));
                }
            }
        }

        Ok(json!({
            "success": emails_sent > 0,
            "procurement_request_id": request.id.to_string(),
            "emails_sent": emails_sent,
            "total_suppliers": contacts.len(),
            "errors": errors,
            "message": format!(
                "Sent {emails_sent} of {} quote requests for \"{part_description}\". \
                 Replies will be tracked automatically.",
                contacts.len()
            ),
        }))
    }
}

pub struct GetSupplierResponsesTool {
    pub responses: Arc<dyn ResponseRepository>,
}

#[async_trait]
impl Tool for GetSupplierResponsesTool {
    fn name(&self) -> &'static str {
        "get_supplier_responses"
    }

    fn description(&self) -> &'static str {
        "Review supplier quote replies received so far and identify the best current option."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
        let responses = self.responses.list_recent(RESPONSES_LIMIT).await?;
        if responses.is_empty() {
            return Ok(json!({
                "total_responses": 0,
                "message": "No supplier responses received yet.",
            }));
        }

        let mut priced: Vec<&SupplierResponse> =
            responses.iter().filter(|response| response.price.is_some()).collect();
        // Lowest price wins; ties go to whoever quoted it first.
        priced.sort_by(|a, b| {
            a.price
                .partial_cmp(&b.price)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.created_at.cmp(&b.created_at))
        });

        if priced.is_empty() {
            let summaries: Vec<Value> = responses
                .iter()
                .map(|response| {
                    json!({
                        "supplier": response.supplier_name,
                        "email": response.supplier_email,
                        "excerpt": response.excerpt(RESPONSE_EXCERPT_CHARS),
                    })
                })
                .collect();
            return Ok(json!({
                "total_responses": responses.len(),
                "suppliers_with_pricing": 0,
                "message": "Responses received, but none contained a recognizable price yet.",
                "responses": summaries,
            }));
        }

        let best = priced[0];
        let supplier_prices: Vec<Value> = priced
            .iter()
            .map(|response| {
                json!({
                    "supplier": response.supplier_name,
                    "email": response.supplier_email,
                    "price": response.price,
                    "last_updated": response.created_at.to_rfc3339(),
                    "excerpt": response.excerpt(RESPONSE_EXCERPT_CHARS),
                })
            })
            .collect();

        Ok(json!({
            "total_responses": responses.len(),
            "suppliers_with_pricing": priced.len(),
            "best_option": {
                "supplier": best.supplier_name,
                "email": best.supplier_email,
                "price": best.price,
                "response": best.excerpt(RESPONSE_EXCERPT_CHARS),
                "received_at": best.created_at.to_rfc3339(),
            },
            "supplier_prices": supplier_prices,
        }))
    }
}

pub struct PlaceOrderTool {
    pub orders: Arc<dyn OrderRepository>,
}

#[async_trait]
impl Tool for PlaceOrderTool {
    fn name(&self) -> &'static str {
        "place_order"
    }

    fn description(&self) -> &'static str {
        "Record a purchase order with a chosen supplier. Only use after the buyer confirms."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "supplier_name": { "type": "string" },
                "supplier_email": { "type": "string" },
                "part_number": { "type": "string" },
                "quantity": { "type": "integer", "minimum": 1 },
                "price": { "type": "number", "exclusiveMinimum": 0, "description": "Unit price" }
            },
            "required": ["supplier_name", "supplier_email", "part_number", "quantity", "price"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let supplier_name = require_str(&arguments, "supplier_name")?;
        let supplier_email = require_str(&arguments, "supplier_email")?;
        let part_number = require_str(&arguments, "part_number")?;
        let quantity = arguments
            .get("quantity")
            .and_then(Value::as_i64)
            .filter(|value| *value > 0)
            .ok_or_else(|| {
                ToolError::Invalid("`quantity` must be a positive integer".to_string())
            })?;
        let unit_price = arguments
            .get("price")
            .and_then(Value::as_f64)
            .filter(|value| *value > 0.0)
            .ok_or_else(|| {
                ToolError::Invalid("`price` must be a positive number".to_string())
            })?;

        let order = PurchaseOrder {
            supplier_name: supplier_name.clone(),
            supplier_email,
            part_number: part_number.clone(),
            order_date: Utc::now(),
            quantity,
            price: unit_price,
        };
        let total = order.total();
        self.orders.append(&order).await?;

        Ok(json!({
            "success": true,
            "message": format!(
                "Order placed with {supplier_name}: {quantity} x {part_number} \
                 at ${unit_price:.2}/unit (total ${total:.2})."
            ),
            "order": {
                "supplier": supplier_name,
                "part_number": part_number,
                "quantity": quantity,
                "price": unit_price,
                "total": total,
            },
        }))
    }
}

/// Inject the owning session id into outreach tool arguments so reply
/// tracking always lands on the right session, regardless of what the
/// model put in the call.
pub fn inject_session_id(tool_name: &str, arguments: Value, session_id: Uuid) -> Value {
    if !OUTREACH_TOOLS.contains(&tool_name) {
        return arguments;
    }

    let mut object = match arguments {
        Value::Object(object) => object,
        _ => Map::new(),
    };
    object.insert("session_id".to_string(), Value::String(session_id.to_string()));
    Value::Object(object)
}
