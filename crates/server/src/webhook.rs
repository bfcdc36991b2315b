//! Inbound email webhook.
//!
//! Endpoints:
//! - `POST /api/webhooks/emails` — receive a supplier reply event
//!
//! The provider retries on non-2xx, so this handler always answers 200 and
//! logs what it could not use. A reply is recorded even when no procurement
//! request is waiting for it; `get_supplier_responses` still surfaces it.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use scout_agent::email::Mailer;
use scout_core::domain::supplier::SupplierResponse;
use scout_core::pricing::PriceExtractor;
use scout_db::repositories::ResponseRepository;

use crate::tracker::ProcurementTracker;

#[derive(Clone)]
pub struct WebhookState {
    pub responses: Arc<dyn ResponseRepository>,
    pub mailer: Option<Arc<dyn Mailer>>,
    pub tracker: Arc<ProcurementTracker>,
    pub extractor: Arc<PriceExtractor>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/api/webhooks/emails", post(receive_email)).with_state(state)
}

pub async fn receive_email(
    State(state): State<WebhookState>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    let ack = Json(json!({ "received": true }));

    // Event payloads nest the email under `data`; some providers post it
    // flat. Accept both.
    let data = payload.get("data").unwrap_or(&payload);

    let Some((supplier_name, supplier_email)) = sender_of(data) else {
        tracing::warn!("email event without a usable sender, ignoring");
        return ack;
    };

    let mut body = body_of(data);

    // Some events only carry the provider's email id; fetch the content.
    if body.is_none() {
        if let (Some(mailer), Some(email_id)) =
            (&state.mailer, data.get("email_id").and_then(Value::as_str))
        {
            match mailer.fetch_received_body(email_id).await {
                Ok(fetched) => body = fetched,
                Err(err) => {
                    tracing::warn!(email_id, error = %err, "could not fetch email body");
                }
            }
        }
    }

    let Some(body) = body else {
        tracing::warn!(sender = %supplier_email, "email event without content, ignoring");
        return ack;
    };

    let price = state.extractor.extract(&body);
    let response =
        SupplierResponse::new(supplier_email.clone(), supplier_name, price, body, Utc::now());

    if let Err(err) = state.responses.upsert_latest(&response).await {
        tracing::error!(sender = %supplier_email, error = %err, "could not record reply");
        return ack;
    }
    tracing::info!(sender = %supplier_email, price = ?price, "supplier reply recorded");

    match state.tracker.ingest_response(&response).await {
        Ok(matched) if matched == 0 => {
            tracing::info!(sender = %supplier_email, "reply matched no open request");
        }
        Ok(_) => {}
        Err(err) => {
            tracing::error!(sender = %supplier_email, error = %err, "reply ingest failed");
        }
    }

    ack
}

/// Providers post the sender either as a string (`Jane <jane@acme.com>` or a
/// bare address) or as an object with `email` and `name` fields.
fn sender_of(data: &Value) -> Option<(String, String)> {
    match data.get("from") {
        Some(Value::String(from)) => parse_sender(from),
        Some(Value::Object(from)) => {
            let email = from.get("email").and_then(Value::as_str)?.trim();
            if !email.contains('@') {
                return None;
            }
            let name = from
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| email.split('@').next().unwrap_or(email));
            Some((name.to_string(), email.to_string()))
        }
        _ => None,
    }
}

/// The reply text, wherever the provider put it: top-level `text`/`body`/
/// `html` strings, or a `body` object carrying `text`/`html`.
fn body_of(data: &Value) -> Option<String> {
    ["text", "body", "html"]
        .iter()
        .find_map(|key| data.get(key).and_then(Value::as_str))
        .or_else(|| {
            let body = data.get("body")?.as_object()?;
            ["text", "html"].iter().find_map(|key| body.get(*key).and_then(Value::as_str))
        })
        .map(str::to_string)
        .filter(|text| !text.trim().is_empty())
}

/// Split `Jane Doe <jane@acme.com>` into name and email. A bare address
/// falls back to the local part as the display name.
fn parse_sender(from: &str) -> Option<(String, String)> {
    let from = from.trim();
    if from.is_empty() {
        return None;
    }

    if let (Some(open), Some(close)) = (from.find('<'), from.rfind('>')) {
        if open < close {
            let email = from[open + 1..close].trim();
            if !email.contains('@') {
                return None;
            }
            let name = from[..open].trim().trim_matches('"').trim();
            let name = if name.is_empty() {
                email.split('@').next().unwrap_or(email)
            } else {
                name
            };
            return Some((name.to_string(), email.to_string()));
        }
    }

    if !from.contains('@') {
        return None;
    }
    let name = from.split('@').next().unwrap_or(from);
    Some((name.to_string(), from.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::extract::State;
    use axum::Json;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use scout_agent::conversation::ChatOrchestrator;
    use scout_agent::email::{MailError, Mailer, OutboundEmail};
    use scout_agent::tools::ToolRegistry;
    use scout_core::domain::procurement::{ContactedSupplier, ProcurementRequest};
    use scout_core::pricing::PriceExtractor;
    use scout_db::repositories::{
        InMemoryMessageRepository, InMemoryProcurementRepository, InMemoryResponseRepository,
        InMemorySessionRepository, ProcurementRepository, ResponseRepository,
    };

    use super::{body_of, parse_sender, receive_email, sender_of, WebhookState};
    use crate::chat::ChatService;
    use crate::sessions::SessionService;
    use crate::tracker::ProcurementTracker;

    struct BodyOnFetchMailer;

    #[async_trait]
    impl Mailer for BodyOnFetchMailer {
        async fn send(&self, _email: &OutboundEmail) -> Result<(), MailError> {
            Ok(())
        }

        async fn fetch_received_body(&self, _email_id: &str) -> Result<Option<String>, MailError> {
            Ok(Some("Our price: $512.50 per unit".to_string()))
        }
    }

    struct Fixture {
        state: WebhookState,
        procurement: Arc<InMemoryProcurementRepository>,
        responses: Arc<InMemoryResponseRepository>,
        sessions: Arc<SessionService>,
    }

    fn fixture(mailer: Option<Arc<dyn Mailer>>) -> Fixture {
        let procurement = Arc::new(InMemoryProcurementRepository::default());
        let responses = Arc::new(InMemoryResponseRepository::default());
        let messages = Arc::new(InMemoryMessageRepository::default());
        let sessions = Arc::new(SessionService::new(
            Arc::new(InMemorySessionRepository::default()),
            messages.clone(),
            "llama3.1",
        ));
        let chat = Arc::new(ChatService::new(
            sessions.clone(),
            messages,
            Arc::new(ChatOrchestrator::new(None, Arc::new(ToolRegistry::default()))),
        ));
        let tracker =
            Arc::new(ProcurementTracker::new(procurement.clone(), responses.clone(), chat));
        let state = WebhookState {
            responses: responses.clone(),
            mailer,
            tracker,
            extractor: Arc::new(PriceExtractor::new()),
        };
        Fixture { state, procurement, responses, sessions }
    }

    async fn open_request(fixture: &Fixture, email: &str, name: &str) -> ProcurementRequest {
        let session_id = Uuid::new_v4();
        fixture.sessions.ensure_session(session_id, None).await.expect("session");
        let request = ProcurementRequest::open(
            session_id,
            "HX-200 hydraulic actuator",
            vec![ContactedSupplier {
                email: email.to_string(),
                name: name.to_string(),
                contacted_at: Utc::now(),
            }],
            7,
            Utc::now(),
        );
        fixture.procurement.insert(&request).await.expect("insert");
        request
    }

    #[tokio::test]
    async fn reply_with_price_is_recorded_and_reported_to_the_session() {
        let fixture = fixture(None);
        let request = open_request(&fixture, "sales@acme.com", "Acme Industrial").await;

        let Json(ack) = receive_email(
            State(fixture.state.clone()),
            Json(json!({
                "type": "email.received",
                "data": {
                    "from": "Acme Industrial <sales@acme.com>",
                    "subject": "RE: Quote request",
                    "text": "Thanks for reaching out. Price: $450 per unit, 2 week lead time.",
                },
            })),
        )
        .await;
        assert_eq!(ack["received"], true);

        let stored = fixture
            .responses
            .find_by_email("sales@acme.com")
            .await
            .expect("find")
            .expect("stored");
        assert_eq!(stored.price, Some(450.0));
        assert_eq!(stored.supplier_name, "Acme Industrial");

        let transcript =
            fixture.sessions.transcript(request.session_id).await.expect("transcript");
        assert!(transcript
            .iter()
            .any(|message| message.content.contains("New quote from Acme Industrial ($450.00)")));
    }

    #[tokio::test]
    async fn unknown_sender_is_recorded_but_posts_no_updates() {
        let fixture = fixture(None);
        let request = open_request(&fixture, "sales@acme.com", "Acme").await;

        let Json(ack) = receive_email(
            State(fixture.state.clone()),
            Json(json!({
                "data": {
                    "from": "stranger@elsewhere.com",
                    "text": "Buy our widgets for $9.99",
                },
            })),
        )
        .await;
        assert_eq!(ack["received"], true);

        // Recorded for later review, but no session was touched.
        assert!(fixture
            .responses
            .find_by_email("stranger@elsewhere.com")
            .await
            .expect("find")
            .is_some());
        let transcript =
            fixture.sessions.transcript(request.session_id).await.expect("transcript");
        assert!(transcript.is_empty());
    }

    #[tokio::test]
    async fn event_without_sender_is_acknowledged_and_dropped() {
        let fixture = fixture(None);

        let Json(ack) = receive_email(
            State(fixture.state.clone()),
            Json(json!({"data": {"subject": "no sender here"}})),
        )
        .await;

        assert_eq!(ack["received"], true);
        assert!(fixture.responses.list_recent(10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn missing_body_is_fetched_by_email_id() {
        let fixture = fixture(Some(Arc::new(BodyOnFetchMailer)));

        receive_email(
            State(fixture.state.clone()),
            Json(json!({
                "data": {
                    "from": "quotes@borealis.io",
                    "email_id": "re_123",
                },
            })),
        )
        .await;

        let stored = fixture
            .responses
            .find_by_email("quotes@borealis.io")
            .await
            .expect("find")
            .expect("stored");
        assert_eq!(stored.price, Some(512.50));
        assert!(stored.response_text.contains("$512.50"));
    }

    #[tokio::test]
    async fn no_price_in_body_is_still_a_reply() {
        let fixture = fixture(None);
        let request = open_request(&fixture, "sales@acme.com", "Acme").await;

        receive_email(
            State(fixture.state.clone()),
            Json(json!({
                "data": {
                    "from": "sales@acme.com",
                    "text": "We are checking stock and will come back to you.",
                },
            })),
        )
        .await;

        let stored = fixture
            .responses
            .find_by_email("sales@acme.com")
            .await
            .expect("find")
            .expect("stored");
        assert_eq!(stored.price, None);

        let transcript =
            fixture.sessions.transcript(request.session_id).await.expect("transcript");
        assert!(transcript
            .iter()
            .any(|message| message.content.contains("no price detected")));
    }

    #[tokio::test]
    async fn nested_sender_and_body_objects_are_accepted() {
        let fixture = fixture(None);
        let request = open_request(&fixture, "sales@acme.com", "Acme Industrial").await;

        receive_email(
            State(fixture.state.clone()),
            Json(json!({
                "type": "email.received",
                "data": {
                    "from": {"email": "sales@acme.com", "name": "Acme Industrial"},
                    "body": {"text": "Price: $450 per unit, ships Friday."},
                },
            })),
        )
        .await;

        let stored = fixture
            .responses
            .find_by_email("sales@acme.com")
            .await
            .expect("find")
            .expect("stored");
        assert_eq!(stored.price, Some(450.0));

        let transcript =
            fixture.sessions.transcript(request.session_id).await.expect("transcript");
        assert!(transcript.iter().any(|message| message.content.contains("$450.00")));
    }

    #[test]
    fn sender_object_falls_back_to_the_local_part() {
        let data = json!({"from": {"email": "jane@acme.com"}});
        assert_eq!(
            sender_of(&data),
            Some(("jane".to_string(), "jane@acme.com".to_string()))
        );
        assert_eq!(sender_of(&json!({"from": {"name": "Jane"}})), None);
        assert_eq!(sender_of(&json!({"subject": "x"})), None);
    }

    #[test]
    fn body_is_found_in_strings_and_objects() {
        assert_eq!(body_of(&json!({"text": "hello"})).as_deref(), Some("hello"));
        assert_eq!(
            body_of(&json!({"body": {"html": "<p>hi</p>"}})).as_deref(),
            Some("<p>hi</p>")
        );
        assert_eq!(body_of(&json!({"body": {"text": "  "}})), None);
        assert_eq!(body_of(&json!({"subject": "x"})), None);
    }

    #[test]
    fn sender_parsing_handles_display_names_and_bare_addresses() {
        assert_eq!(
            parse_sender("Acme Industrial <sales@acme.com>"),
            Some(("Acme Industrial".to_string(), "sales@acme.com".to_string()))
        );
        assert_eq!(
            parse_sender("\"Doe, Jane\" <jane@acme.com>"),
            Some(("Doe, Jane".to_string(), "jane@acme.com".to_string()))
        );
        assert_eq!(
            parse_sender("sales@acme.com"),
            Some(("sales".to_string(), "sales@acme.com".to_string()))
        );
        assert_eq!(parse_sender("not-an-address"), None);
        assert_eq!(parse_sender("   "), None);
    }
}
