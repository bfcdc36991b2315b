//! Domain types, configuration, and pure logic for the SupplyScout
//! procurement agent. Nothing in this crate performs IO.

pub mod config;
pub mod domain;
pub mod errors;
pub mod pricing;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use domain::procurement::{
    ContactedSupplier, ProcurementRequest, ProcurementStatus, RequestProgress,
};
pub use domain::session::{ChatMessage, MessageRole, Session, SessionEvent, ToolInvocation};
pub use domain::supplier::{Part, PurchaseOrder, SupplierRecord, SupplierResponse};
pub use errors::DomainError;
pub use pricing::PriceExtractor;
