//! Background tracking of open procurement requests.
//!
//! Replies arrive over hours or days, long after the turn that sent the
//! outreach finished. The tracker closes that gap from two directions: the
//! inbound webhook pushes each new reply through [`ProcurementTracker::ingest_response`]
//! immediately, and a periodic sweep catches completions and expiries the
//! webhook path missed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use scout_core::domain::procurement::{ProcurementRequest, RequestProgress};
use scout_core::domain::supplier::SupplierResponse;
use scout_db::repositories::{ProcurementRepository, ResponseRepository};

use crate::chat::ChatService;
use crate::sessions::ServiceError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub completed: usize,
    pub expired: usize,
}

pub struct ProcurementTracker {
    procurement: Arc<dyn ProcurementRepository>,
    responses: Arc<dyn ResponseRepository>,
    chat: Arc<ChatService>,
}

impl ProcurementTracker {
    pub fn new(
        procurement: Arc<dyn ProcurementRepository>,
        responses: Arc<dyn ResponseRepository>,
        chat: Arc<ChatService>,
    ) -> Self {
        Self { procurement, responses, chat }
    }

    pub fn spawn(self: Arc<Self>, sweep_interval_secs: u64) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(sweep_interval_secs));
            // The first tick fires immediately; skip it so startup does not
            // race the webhook router coming up.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.run_sweep(Utc::now()).await {
                    Ok(report) => tracing::info!(
                        checked = report.checked,
                        completed = report.completed,
                        expired = report.expired,
                        "procurement sweep finished"
                    ),
                    Err(err) => tracing::error!(error = %err, "procurement sweep failed"),
                }
            }
        });
    }

    /// Check every pending request once: expire overdue ones, complete fully
    /// answered ones, and post a status update for the rest.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError> {
        let pending = self.procurement.list_pending().await?;
        let mut report = SweepReport { checked: pending.len(), ..SweepReport::default() };

        for request in pending {
            if request.is_expired(now) {
                if self.procurement.mark_expired(&request.id).await? {
                    report.expired += 1;
                    let progress = self.current_progress(&request).await?;
                    self.notify(request.session_id, expiry_message(&request, &progress)).await;
                }
                continue;
            }

            let progress = self.current_progress(&request).await?;
            self.procurement.stamp_last_check(&request.id, now).await?;

            if progress.is_complete() {
                if self.procurement.mark_completed(&request.id).await? {
                    report.completed += 1;
                    self.notify(request.session_id, completion_message(&request, &progress))
                        .await;
                    self.analyze(request.session_id, &request).await;
                }
            } else {
                self.notify(request.session_id, status_message(&request, &progress)).await;
            }
        }

        Ok(report)
    }

    /// React to one freshly recorded supplier reply: post an update on every
    /// pending request that was waiting for this supplier, completing any
    /// that are now fully answered. Returns how many requests matched.
    pub async fn ingest_response(
        &self,
        response: &SupplierResponse,
    ) -> Result<usize, ServiceError> {
        let now = Utc::now();
        let mut matched = 0;

        for request in self.procurement.list_pending().await? {
            if request.is_expired(now) {
                continue;
            }
            let contacted = request.suppliers_contacted.iter().any(|supplier| {
                supplier.email.eq_ignore_ascii_case(&response.supplier_email)
            });
            if !contacted {
                continue;
            }

            matched += 1;
            self.notify(request.session_id, reply_message(&request, response)).await;

            let progress = self.current_progress(&request).await?;
            self.procurement.stamp_last_check(&request.id, now).await?;
            if progress.is_complete() && self.procurement.mark_completed(&request.id).await? {
                self.notify(request.session_id, completion_message(&request, &progress)).await;
            }
            self.analyze(request.session_id, &request).await;
        }

        Ok(matched)
    }

    /// Which contacted suppliers have replied since the request was opened.
    /// Responses that predate the request are earlier conversations, not
    /// answers to this outreach.
    async fn current_progress(
        &self,
        request: &ProcurementRequest,
    ) -> Result<RequestProgress, ServiceError> {
        let mut responded = HashSet::new();
        for supplier in &request.suppliers_contacted {
            if let Some(response) = self.responses.find_by_email(&supplier.email).await? {
                if response.created_at >= request.created_at {
                    responded.insert(response.supplier_email);
                }
            }
        }
        Ok(request.progress(&responded))
    }

    async fn notify(&self, session_id: Uuid, content: String) {
        if let Err(err) = self.chat.sessions().notify(session_id, content).await {
            tracing::warn!(session_id = %session_id, error = %err, "could not post update");
        }
    }

    /// Let the agent comment on the new state of play (current quotes, who
    /// is still outstanding). Best effort; a model failure only costs the
    /// richer message.
    async fn analyze(&self, session_id: Uuid, request: &ProcurementRequest) {
        let prompt = format!(
            "A supplier update arrived for the procurement request covering {}. \
             Use get_supplier_responses to review current quotes and give the buyer \
             a short comparison and recommendation.",
            request.part_description
        );
        if let Err(err) = self.chat.agent_update(session_id, &prompt).await {
            tracing::warn!(session_id = %session_id, error = %err, "analysis update failed");
        }
    }
}

fn reply_message(request: &ProcurementRequest, response: &SupplierResponse) -> String {
    match response.price {
        Some(price) => format!(
            "New quote from {} (${price:.2}) for {}.",
            response.supplier_name, request.part_description
        ),
        None => format!(
            "New reply from {} about {} (no price detected).",
            response.supplier_name, request.part_description
        ),
    }
}

fn completion_message(request: &ProcurementRequest, progress: &RequestProgress) -> String {
    format!(
        "All {} suppliers have responded about {}. Ready to compare quotes and place an order.",
        progress.total(),
        request.part_description
    )
}

fn status_message(request: &ProcurementRequest, progress: &RequestProgress) -> String {
    let waiting: Vec<&str> =
        progress.waiting.iter().map(|supplier| supplier.name.as_str()).collect();
    format!(
        "Update on {}: {} of {} suppliers have responded. Still waiting on {}.",
        request.part_description,
        progress.responded.len(),
        progress.total(),
        waiting.join(", ")
    )
}

fn expiry_message(request: &ProcurementRequest, progress: &RequestProgress) -> String {
    if progress.waiting.is_empty() {
        return format!("The procurement request for {} has expired.", request.part_description);
    }
    let waiting: Vec<&str> =
        progress.waiting.iter().map(|supplier| supplier.name.as_str()).collect();
    format!(
        "The procurement request for {} has expired without replies from {}. \
         You can re-contact them or proceed with the quotes received.",
        request.part_description,
        waiting.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use scout_agent::conversation::ChatOrchestrator;
    use scout_agent::tools::ToolRegistry;
    use scout_core::domain::procurement::{ContactedSupplier, ProcurementRequest};
    use scout_core::domain::supplier::SupplierResponse;
    use scout_db::repositories::{
        InMemoryMessageRepository, InMemoryProcurementRepository, InMemoryResponseRepository,
        InMemorySessionRepository, ProcurementRepository, ResponseRepository,
    };

    use super::{ProcurementTracker, SweepReport};
    use crate::chat::ChatService;
    use crate::sessions::SessionService;

    struct Fixture {
        tracker: ProcurementTracker,
        procurement: Arc<InMemoryProcurementRepository>,
        responses: Arc<InMemoryResponseRepository>,
        sessions: Arc<SessionService>,
    }

    fn fixture() -> Fixture {
        let procurement = Arc::new(InMemoryProcurementRepository::default());
        let responses = Arc::new(InMemoryResponseRepository::default());
        let messages = Arc::new(InMemoryMessageRepository::default());
        let sessions = Arc::new(SessionService::new(
            Arc::new(InMemorySessionRepository::default()),
            messages.clone(),
            "llama3.1",
        ));
        // Preview orchestrator: notifications still post, the optional
        // model-written analysis is skipped.
        let chat = Arc::new(ChatService::new(
            sessions.clone(),
            messages,
            Arc::new(ChatOrchestrator::new(None, Arc::new(ToolRegistry::default()))),
        ));
        let tracker =
            ProcurementTracker::new(procurement.clone(), responses.clone(), chat);
        Fixture { tracker, procurement, responses, sessions }
    }

    fn supplier(email: &str, name: &str) -> ContactedSupplier {
        ContactedSupplier {
            email: email.to_string(),
            name: name.to_string(),
            contacted_at: Utc::now(),
        }
    }

    async fn open_request(
        fixture: &Fixture,
        suppliers: Vec<ContactedSupplier>,
        ttl_days: i64,
    ) -> ProcurementRequest {
        let session_id = Uuid::new_v4();
        fixture.sessions.ensure_session(session_id, None).await.expect("session");
        let request = ProcurementRequest::open(
            session_id,
            "HX-200 hydraulic actuator",
            suppliers,
            ttl_days,
            Utc::now(),
        );
        fixture.procurement.insert(&request).await.expect("insert");
        request
    }

    #[tokio::test]
    async fn sweep_expires_overdue_requests_once() {
        let fixture = fixture();
        let request =
            open_request(&fixture, vec![supplier("sales@acme.com", "Acme")], 7).await;

        let later = Utc::now() + Duration::days(8);
        let report = fixture.tracker.run_sweep(later).await.expect("sweep");
        assert_eq!(report, SweepReport { checked: 1, completed: 0, expired: 1 });

        let transcript =
            fixture.sessions.transcript(request.session_id).await.expect("transcript");
        assert_eq!(transcript.len(), 1);
        assert!(transcript[0].content.contains("expired"));
        assert!(transcript[0].content.contains("Acme"));

        // Terminal now; a second sweep sees nothing pending.
        let again = fixture.tracker.run_sweep(later).await.expect("sweep");
        assert_eq!(again.checked, 0);
    }

    #[tokio::test]
    async fn sweep_completes_fully_answered_requests() {
        let fixture = fixture();
        let request = open_request(
            &fixture,
            vec![supplier("sales@acme.com", "Acme"), supplier("quotes@borealis.io", "Borealis")],
            7,
        )
        .await;

        for (email, name, price) in
            [("sales@acme.com", "Acme", 450.0), ("quotes@borealis.io", "Borealis", 480.0)]
        {
            fixture
                .responses
                .upsert_latest(&SupplierResponse::new(
                    email,
                    name,
                    Some(price),
                    "quoted",
                    Utc::now() + Duration::minutes(1),
                ))
                .await
                .expect("upsert");
        }

        let report = fixture.tracker.run_sweep(Utc::now() + Duration::hours(1)).await.expect("sweep");
        assert_eq!(report.completed, 1);

        let transcript =
            fixture.sessions.transcript(request.session_id).await.expect("transcript");
        assert!(transcript
            .iter()
            .any(|message| message.content.contains("All 2 suppliers have responded")));
    }

    #[tokio::test]
    async fn sweep_reports_partial_progress_with_waiting_names() {
        let fixture = fixture();
        let request = open_request(
            &fixture,
            vec![supplier("sales@acme.com", "Acme"), supplier("quotes@borealis.io", "Borealis")],
            7,
        )
        .await;

        fixture
            .responses
            .upsert_latest(&SupplierResponse::new(
                "sales@acme.com",
                "Acme",
                Some(450.0),
                "quoted",
                Utc::now() + Duration::minutes(1),
            ))
            .await
            .expect("upsert");

        let report = fixture.tracker.run_sweep(Utc::now() + Duration::hours(1)).await.expect("sweep");
        assert_eq!(report.completed, 0);

        let transcript =
            fixture.sessions.transcript(request.session_id).await.expect("transcript");
        assert_eq!(transcript.len(), 1);
        assert!(transcript[0].content.contains("1 of 2 suppliers"));
        assert!(transcript[0].content.contains("Borealis"));

        let stored = fixture
            .procurement
            .find(&request.id)
            .await
            .expect("find")
            .expect("request");
        assert!(stored.last_check_at.is_some());
    }

    #[tokio::test]
    async fn sweep_posts_status_before_any_replies_arrive() {
        let fixture = fixture();
        let request = open_request(
            &fixture,
            vec![supplier("sales@acme.com", "Acme"), supplier("quotes@borealis.io", "Borealis")],
            7,
        )
        .await;

        let report = fixture.tracker.run_sweep(Utc::now() + Duration::hours(1)).await.expect("sweep");
        assert_eq!(report, SweepReport { checked: 1, completed: 0, expired: 0 });

        let transcript =
            fixture.sessions.transcript(request.session_id).await.expect("transcript");
        assert_eq!(transcript.len(), 1);
        assert!(transcript[0].content.contains("0 of 2 suppliers"));
        assert!(transcript[0].content.contains("Acme"));
        assert!(transcript[0].content.contains("Borealis"));
    }

    #[tokio::test]
    async fn old_responses_do_not_count_toward_new_outreach() {
        let fixture = fixture();
        fixture
            .responses
            .upsert_latest(&SupplierResponse::new(
                "sales@acme.com",
                "Acme",
                Some(440.0),
                "last quarter's quote",
                Utc::now() - Duration::days(30),
            ))
            .await
            .expect("upsert");

        open_request(&fixture, vec![supplier("sales@acme.com", "Acme")], 7).await;

        let report = fixture.tracker.run_sweep(Utc::now() + Duration::hours(1)).await.expect("sweep");
        assert_eq!(report.completed, 0);
    }

    #[tokio::test]
    async fn ingest_posts_quote_update_and_completes_single_supplier_request() {
        let fixture = fixture();
        let request =
            open_request(&fixture, vec![supplier("sales@acme.com", "Acme Industrial")], 7).await;

        let response = SupplierResponse::new(
            "Sales@ACME.com",
            "Acme Industrial",
            Some(450.0),
            "Price: $450 per unit",
            Utc::now() + Duration::minutes(5),
        );
        fixture.responses.upsert_latest(&response).await.expect("upsert");

        let matched = fixture.tracker.ingest_response(&response).await.expect("ingest");
        assert_eq!(matched, 1);

        let transcript =
            fixture.sessions.transcript(request.session_id).await.expect("transcript");
        assert!(transcript[0].content.contains("New quote from Acme Industrial ($450.00)"));
        assert!(transcript
            .iter()
            .any(|message| message.content.contains("All 1 suppliers have responded")));

        // Completed; further sweeps have nothing to check.
        let report = fixture.tracker.run_sweep(Utc::now()).await.expect("sweep");
        assert_eq!(report.checked, 0);
    }

    #[tokio::test]
    async fn ingest_from_unknown_sender_matches_nothing() {
        let fixture = fixture();
        let request =
            open_request(&fixture, vec![supplier("sales@acme.com", "Acme")], 7).await;

        let response = SupplierResponse::new(
            "stranger@elsewhere.com",
            "Stranger",
            Some(1.0),
            "unsolicited",
            Utc::now(),
        );
        let matched = fixture.tracker.ingest_response(&response).await.expect("ingest");
        assert_eq!(matched, 0);

        let transcript =
            fixture.sessions.transcript(request.session_id).await.expect("transcript");
        assert!(transcript.is_empty());
    }
}
