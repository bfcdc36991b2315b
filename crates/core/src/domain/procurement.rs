//! Procurement request lifecycle.
//!
//! A request is opened when outreach emails go out and tracks which of the
//! contacted suppliers have replied. The only legal transitions are
//! `pending -> completed` (every supplier replied) and `pending -> expired`
//! (TTL elapsed first). Terminal states never move again.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcurementStatus {
    Pending,
    Completed,
    Expired,
}

impl ProcurementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContactedSupplier {
    pub email: String,
    pub name: String,
    pub contacted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcurementRequest {
    pub id: Uuid,
    pub session_id: Uuid,
    pub part_description: String,
    pub suppliers_contacted: Vec<ContactedSupplier>,
    pub status: ProcurementStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_check_at: Option<DateTime<Utc>>,
}

/// Which contacted suppliers have and have not replied yet.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestProgress {
    pub responded: Vec<ContactedSupplier>,
    pub waiting: Vec<ContactedSupplier>,
}

impl RequestProgress {
    pub fn is_complete(&self) -> bool {
        self.waiting.is_empty() && !self.responded.is_empty()
    }

    pub fn total(&self) -> usize {
        self.responded.len() + self.waiting.len()
    }
}

impl ProcurementRequest {
    pub fn open(
        session_id: Uuid,
        part_description: impl Into<String>,
        suppliers_contacted: Vec<ContactedSupplier>,
        ttl_days: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            part_description: part_description.into(),
            suppliers_contacted,
            status: ProcurementStatus::Pending,
            created_at: now,
            expires_at: now + Duration::days(ttl_days),
            last_check_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn can_transition_to(&self, next: ProcurementStatus) -> bool {
        matches!(
            (self.status, next),
            (ProcurementStatus::Pending, ProcurementStatus::Completed)
                | (ProcurementStatus::Pending, ProcurementStatus::Expired)
        )
    }

    pub fn transition_to(&mut self, next: ProcurementStatus) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidRequestTransition { from: self.status, to: next });
        }
        self.status = next;
        Ok(())
    }

    /// Split contacted suppliers into responded and still-waiting, given the
    /// set of supplier emails that currently have a recorded response.
    /// Email comparison ignores ASCII case.
    pub fn progress(&self, responded_emails: &HashSet<String>) -> RequestProgress {
        let normalized: HashSet<String> =
            responded_emails.iter().map(|email| email.to_ascii_lowercase()).collect();

        let (responded, waiting) = self
            .suppliers_contacted
            .iter()
            .cloned()
            .partition(|supplier| normalized.contains(&supplier.email.to_ascii_lowercase()));

        RequestProgress { responded, waiting }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{ContactedSupplier, ProcurementRequest, ProcurementStatus};

    fn supplier(email: &str) -> ContactedSupplier {
        ContactedSupplier {
            email: email.to_string(),
            name: email.split('@').next().unwrap_or("supplier").to_string(),
            contacted_at: Utc::now(),
        }
    }

    fn request(suppliers: Vec<ContactedSupplier>) -> ProcurementRequest {
        ProcurementRequest::open(Uuid::new_v4(), "hydraulic actuator", suppliers, 7, Utc::now())
    }

    #[test]
    fn pending_can_complete_or_expire() {
        let mut completes = request(vec![supplier("a@acme.com")]);
        assert!(completes.transition_to(ProcurementStatus::Completed).is_ok());

        let mut expires = request(vec![supplier("a@acme.com")]);
        assert!(expires.transition_to(ProcurementStatus::Expired).is_ok());
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut request = request(vec![supplier("a@acme.com")]);
        request.transition_to(ProcurementStatus::Completed).unwrap();

        assert!(request.transition_to(ProcurementStatus::Expired).is_err());
        assert!(request.transition_to(ProcurementStatus::Pending).is_err());
        assert_eq!(request.status, ProcurementStatus::Completed);
    }

    #[test]
    fn expiry_is_ttl_days_after_creation() {
        let now = Utc::now();
        let request =
            ProcurementRequest::open(Uuid::new_v4(), "gasket", vec![supplier("a@b.com")], 7, now);

        assert_eq!(request.expires_at, now + Duration::days(7));
        assert!(!request.is_expired(now));
        assert!(request.is_expired(now + Duration::days(7)));
    }

    #[test]
    fn progress_partitions_by_response_set() {
        let request =
            request(vec![supplier("a@acme.com"), supplier("b@bolt.io"), supplier("c@cog.co")]);

        let responded: HashSet<String> = ["a@acme.com".to_string(), "c@cog.co".to_string()].into();
        let progress = request.progress(&responded);

        assert_eq!(progress.responded.len(), 2);
        assert_eq!(progress.waiting.len(), 1);
        assert_eq!(progress.waiting[0].email, "b@bolt.io");
        assert!(!progress.is_complete());
    }

    #[test]
    fn progress_ignores_email_case() {
        let request = request(vec![supplier("Sales@Acme.com")]);

        let responded: HashSet<String> = ["sales@acme.com".to_string()].into();
        assert!(request.progress(&responded).is_complete());
    }

    #[test]
    fn empty_contact_list_never_reports_complete() {
        let request = request(Vec::new());
        assert!(!request.progress(&HashSet::new()).is_complete());
    }
}
