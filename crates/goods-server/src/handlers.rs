//! HTTP Handlers
//!
//! Every outcome is a rendered view; checkout errors map to the view and
//! status that describe them.

use axum::{
    Form, Json,
    extract::{
        Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use goods_checkout::{CheckoutError, CheckoutToken, FinalizeRequest, Session, SessionId};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub payments_configured: bool,
    pub identity_configured: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetEcForm {
    pub sid: String,
    pub item_id: String,
}

/// Return URL parameters: ours (`sid`, `item_id`, `amt`, `sig`) plus the
/// gateway's (`token`, `PayerID`)
#[derive(Debug, Deserialize)]
pub struct DoEcParams {
    pub sid: String,
    pub item_id: String,
    pub amt: String,
    pub sig: String,
    pub token: String,
    #[serde(rename = "PayerID")]
    pub payer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelParams {
    #[serde(default)]
    pub sid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseParams {
    pub sid: String,
    pub item_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AppParams {
    pub oauth_token: String,
    pub oauth_verifier: String,
}

// ============================================================================
// Rendering helpers
// ============================================================================

fn render(state: &AppState, status: StatusCode, template: &str, context: &Value) -> Response {
    match state.views.render(template, context) {
        Ok(page) => (status, Html(page)).into_response(),
        Err(e) => {
            tracing::error!(template = %template, error = %e, "View rendering failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn error_page(state: &AppState, status: StatusCode, title: &str, operation: &str, message: &str) -> Response {
    render(
        state,
        status,
        "unknown_error",
        &json!({"title": title, "operation": operation, "message": message}),
    )
}

fn session_expired(state: &AppState) -> Response {
    render(
        state,
        StatusCode::UNAUTHORIZED,
        "session_expired",
        &json!({"title": "Session Expired"}),
    )
}

fn redirect(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

fn checkout_error(state: &AppState, err: &CheckoutError, item_id: &str) -> Response {
    let (status, operation) = match err {
        CheckoutError::SessionExpired => return session_expired(state),
        CheckoutError::Persistence(_) => {
            let description = state.catalog.get(item_id).map(|p| p.description.as_str()).ok();
            return render(
                state,
                StatusCode::ACCEPTED,
                "payment_pending",
                &json!({
                    "title": "Payment Received",
                    "description": description,
                    "message": err.user_message(),
                }),
            );
        }
        CheckoutError::Gateway(gateway) => (StatusCode::BAD_GATEWAY, gateway.operation.as_str()),
        CheckoutError::UnknownProduct(_) => (StatusCode::NOT_FOUND, "catalog lookup"),
        CheckoutError::TamperedCallback => (StatusCode::BAD_REQUEST, "checkout verification"),
        CheckoutError::PriceChanged { .. } => (StatusCode::CONFLICT, "checkout verification"),
        CheckoutError::Config(_) | CheckoutError::NotConfigured(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "checkout")
        }
    };
    error_page(state, status, "Error", operation, err.user_message())
}

fn service_unavailable(state: &AppState, operation: &str) -> Response {
    error_page(
        state,
        StatusCode::SERVICE_UNAVAILABLE,
        "Unavailable",
        operation,
        "This feature is not configured.",
    )
}

fn bad_request(state: &AppState, operation: &str, rejection: &dyn std::fmt::Display) -> Response {
    tracing::warn!(operation = %operation, error = %rejection, "Malformed request");
    error_page(
        state,
        StatusCode::BAD_REQUEST,
        "Error",
        operation,
        "The request was missing required parameters.",
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        payments_configured: state.checkout.is_some(),
        identity_configured: state.identity.is_some(),
    })
}

/// Landing page
pub async fn root(State(state): State<AppState>) -> Response {
    render(&state, StatusCode::OK, "root", &json!({"title": "Legal Templates"}))
}

/// Start a sign-in at the identity provider
pub async fn login(State(state): State<AppState>) -> Response {
    let Some(provider) = state.identity.as_ref() else {
        return service_unavailable(&state, "sign-in");
    };
    redirect(provider.authorization_url(&format!("{}/app", state.public_base_url)))
}

/// Sign-in callback: resolve the identity, open a session, show the catalog
pub async fn app(
    State(state): State<AppState>,
    params: Result<Query<AppParams>, QueryRejection>,
) -> Response {
    let Some(provider) = state.identity.as_ref() else {
        return service_unavailable(&state, "sign-in");
    };
    let Query(params) = match params {
        Ok(params) => params,
        Err(e) => return bad_request(&state, "sign-in", &e),
    };

    let identity = match provider
        .resolve_identity(&params.oauth_token, &params.oauth_verifier)
        .await
    {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(provider = %provider.name(), error = %e, "Sign-in failed");
            return error_page(&state, StatusCode::UNAUTHORIZED, "Error", "sign-in", &e.to_string());
        }
    };

    let ledger = state.ledger.clone();
    let username = identity.username.clone();
    let record = match tokio::task::spawn_blocking(move || ledger.ensure_record(&username)).await {
        Ok(Ok(record)) => record,
        Err(e) => {
            tracing::error!(identity = %identity.username, error = %e, "Ledger task failed");
            return error_page(
                &state,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error",
                "account lookup",
                "Service temporarily unavailable.",
            );
        }
        Ok(Err(e)) => {
            tracing::error!(identity = %identity.username, error = %e, "Could not load purchases");
            return error_page(
                &state,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error",
                "account lookup",
                e.user_message(),
            );
        }
    };

    let session = Session::new(identity);
    state.sessions.put(session.clone(), state.session_ttl);
    tracing::info!(
        identity = %session.identity.username,
        session = %session.id.redacted(),
        "Signed in"
    );

    let products: Vec<Value> = state
        .catalog
        .products()
        .map(|p| {
            json!({
                "id": p.id,
                "description": p.description,
                "price": p.amount(),
                "purchased": record.contains(&p.id),
            })
        })
        .collect();

    render(
        &state,
        StatusCode::OK,
        "digital_goods",
        &json!({
            "title": "Legal Templates: Catalog",
            "sid": session.id.as_str(),
            "username": session.identity.username,
            "products": products,
        }),
    )
}

/// Begin checkout and redirect to the gateway
pub async fn set_ec(
    State(state): State<AppState>,
    form: Result<Form<SetEcForm>, FormRejection>,
) -> Response {
    let Some(checkout) = state.checkout.as_ref() else {
        return service_unavailable(&state, "SetExpressCheckout");
    };
    let Form(form) = match form {
        Ok(form) => form,
        Err(e) => return bad_request(&state, "SetExpressCheckout", &e),
    };

    match checkout
        .begin(&SessionId::from_string(form.sid), &form.item_id)
        .await
    {
        Ok(pending) => redirect(pending.redirect_url),
        Err(e) => checkout_error(&state, &e, &form.item_id),
    }
}

/// Gateway return URL: finalize payment and credit the purchase
pub async fn do_ec_payment(
    State(state): State<AppState>,
    params: Result<Query<DoEcParams>, QueryRejection>,
) -> Response {
    let Some(checkout) = state.checkout.as_ref() else {
        return service_unavailable(&state, "DoExpressCheckoutPayment");
    };
    let Query(params) = match params {
        Ok(params) => params,
        Err(e) => return bad_request(&state, "DoExpressCheckoutPayment", &e),
    };

    let callback = FinalizeRequest {
        session_id: SessionId::from_string(params.sid),
        item_id: params.item_id,
        amount: params.amt,
        signature: params.sig,
        token: CheckoutToken::from_string(params.token),
        payer_id: params.payer_id,
    };

    match checkout.finalize(&callback).await {
        Ok(completed) => render(
            &state,
            StatusCode::OK,
            "successful_payment",
            &json!({
                "title": "Successful Payment",
                "description": completed.product.description,
                "item_id": completed.product.id,
                "sid": completed.session_id.as_str(),
            }),
        ),
        Err(e) => checkout_error(&state, &e, &callback.item_id),
    }
}

/// Gateway cancel URL
pub async fn cancel_ec(
    State(state): State<AppState>,
    params: Result<Query<CancelParams>, QueryRejection>,
) -> Response {
    let sid = params.ok().and_then(|Query(p)| p.sid);
    if let (Some(checkout), Some(sid)) = (state.checkout.as_ref(), sid) {
        checkout.cancel(&SessionId::from_string(sid));
    }
    render(
        &state,
        StatusCode::OK,
        "cancel_purchase",
        &json!({"title": "Cancel Purchase"}),
    )
}

/// Serve an item the signed-in identity owns
pub async fn purchases(
    State(state): State<AppState>,
    params: Result<Query<PurchaseParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(e) => return bad_request(&state, "document access", &e),
    };

    let Some(session) = state.sessions.get(&SessionId::from_string(params.sid)) else {
        tracing::warn!(item_id = %params.item_id, "Invalid or expired session in /purchases");
        return session_expired(&state);
    };
    let username = &session.identity.username;

    let owned = match state.ledger.has_purchased(username, &params.item_id) {
        Ok(owned) => owned,
        Err(e) => {
            tracing::error!(identity = %username, error = %e, "Could not load purchases");
            return error_page(
                &state,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error",
                "document access",
                e.user_message(),
            );
        }
    };

    match state.catalog.get(&params.item_id) {
        Ok(product) if owned => render(
            &state,
            StatusCode::OK,
            "purchased_item",
            &json!({"title": product.description, "item_id": product.id}),
        ),
        _ => {
            tracing::warn!(identity = %username, item_id = %params.item_id, "Item not purchased");
            error_page(
                &state,
                StatusCode::FORBIDDEN,
                "Invalid Access",
                "document access",
                "You have not purchased this item.",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::{
        Router,
        body::Body,
        http::{HeaderMap, Request},
    };
    use goods_checkout::{
        CallbackSigner, Catalog, CheckoutOrchestrator, DEFAULT_SESSION_TTL, DigitalGoodsOrder,
        GatewayError, Identity, MemoryReconciliationLog, MemorySessionCache, PaymentConfirmation,
        PaymentGateway, PurchaseLedger, SessionCache,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::build_router;
    use crate::identity::StaticIdentityProvider;
    use crate::views::HtmlViews;

    const BASE: &str = "http://localhost:3000";
    const CALLBACK_SECRET: &[u8] = b"handler-test-secret-0123456789";

    #[derive(Default)]
    struct FakeGateway {
        fail_begin: bool,
        token: Option<&'static str>,
        return_urls: Mutex<Vec<String>>,
        finalized: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn begin_digital_goods_checkout(
            &self,
            _order: &DigitalGoodsOrder,
            return_url: &str,
            _cancel_url: &str,
        ) -> goods_checkout::Result<CheckoutToken> {
            if self.fail_begin {
                return Err(GatewayError {
                    operation: "SetExpressCheckout".into(),
                    ack: Some("Failure".into()),
                    error_code: Some("10002".into()),
                    message: "Security header is not valid".into(),
                    raw: None,
                }
                .into());
            }
            self.return_urls.lock().unwrap().push(return_url.to_string());
            Ok(CheckoutToken::from_string(self.token.unwrap_or("EC-TOK-1")))
        }

        async fn finalize_digital_goods_checkout(
            &self,
            token: &CheckoutToken,
            payer_id: &str,
            _order: &DigitalGoodsOrder,
        ) -> goods_checkout::Result<PaymentConfirmation> {
            self.finalized
                .lock()
                .unwrap()
                .push((token.to_string(), payer_id.to_string()));
            Ok(PaymentConfirmation {
                token: token.clone(),
                ack: "Success".into(),
                transaction_id: Some("9XY".into()),
                payment_status: Some("Completed".into()),
            })
        }

        fn redirect_url(&self, token: &CheckoutToken) -> String {
            format!("https://gateway.example/incontext?token={token}&useraction=commit")
        }

        fn currency(&self) -> &str {
            "USD"
        }
    }

    struct TestApp {
        router: Router,
        state: AppState,
    }

    fn test_app(gateway: Option<Arc<FakeGateway>>) -> TestApp {
        let catalog = Arc::new(Catalog::default());
        let sessions = Arc::new(MemorySessionCache::new());
        sessions.put(
            Session::with_id(SessionId::from_string("abc123"), Identity::new("alice")),
            DEFAULT_SESSION_TTL,
        );
        let ledger = PurchaseLedger::in_memory();

        let checkout = gateway.map(|gateway| {
            Arc::new(
                CheckoutOrchestrator::new(
                    sessions.clone(),
                    catalog.clone(),
                    gateway,
                    ledger.clone(),
                    Arc::new(MemoryReconciliationLog::new()),
                    CallbackSigner::new(CALLBACK_SECRET.to_vec()).unwrap(),
                    BASE,
                )
                .unwrap(),
            )
        });

        let state = AppState {
            catalog,
            sessions,
            ledger,
            checkout,
            identity: Some(Arc::new(StaticIdentityProvider::new("alice"))),
            views: Arc::new(HtmlViews),
            session_ttl: DEFAULT_SESSION_TTL,
            public_base_url: BASE.into(),
        };

        TestApp {
            router: build_router(state.clone()),
            state,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, String) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_form(uri: &str, body: impl Into<String>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.into()))
            .unwrap()
    }

    /// Collects formatted log output
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_purchase_flow_credits_user() {
        let gateway = Arc::new(FakeGateway::default());
        let app = test_app(Some(gateway.clone()));

        let (status, headers, _) = send(
            &app.router,
            post_form("/set_ec", "sid=abc123&item_id=invoice_template1"),
        )
        .await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(
            headers[header::LOCATION],
            "https://gateway.example/incontext?token=EC-TOK-1&useraction=commit"
        );

        let return_url = gateway.return_urls.lock().unwrap()[0].clone();
        let path = return_url.strip_prefix(BASE).unwrap();
        let (status, _, body) = send(
            &app.router,
            get(&format!("{path}&token=EC-TOK-1&PayerID=PAYER-1")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Successful Payment"));
        assert!(body.contains("Super Simple Invoice Template"));
        assert_eq!(
            gateway.finalized.lock().unwrap().as_slice(),
            &[("EC-TOK-1".to_string(), "PAYER-1".to_string())]
        );
        assert!(app.state.ledger.has_purchased("alice", "invoice_template1").unwrap());

        let (status, _, body) = send(
            &app.router,
            get("/purchases?sid=abc123&item_id=invoice_template1"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("data-item=\"invoice_template1\""));
    }

    #[tokio::test]
    async fn test_set_ec_with_unknown_session() {
        let gateway = Arc::new(FakeGateway::default());
        let app = test_app(Some(gateway.clone()));

        let (status, _, body) = send(
            &app.router,
            post_form("/set_ec", "sid=xyz999&item_id=invoice_template1"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Session Expired"));
        assert!(gateway.return_urls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_ec_gateway_failure() {
        let gateway = Arc::new(FakeGateway {
            fail_begin: true,
            ..FakeGateway::default()
        });
        let app = test_app(Some(gateway));

        let (status, _, body) = send(
            &app.router,
            post_form("/set_ec", "sid=abc123&item_id=invoice_template1"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.contains("SetExpressCheckout"));
        assert!(app.state.ledger.get("alice").unwrap().purchased.is_empty());
    }

    #[tokio::test]
    async fn test_tampered_return_url_is_rejected() {
        let gateway = Arc::new(FakeGateway::default());
        let app = test_app(Some(gateway.clone()));

        let (status, _, _) = send(
            &app.router,
            get("/do_ec_payment?sid=abc123&item_id=invoice_template1&amt=0.01&sig=00&token=EC-TOK-1&PayerID=PAYER-1"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(gateway.finalized.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsigned_callback_for_unknown_session_is_bad_request() {
        let gateway = Arc::new(FakeGateway::default());
        let app = test_app(Some(gateway.clone()));

        let (status, _, _) = send(
            &app.router,
            get("/do_ec_payment?sid=xyz999&item_id=invoice_template1&token=EC-TOK-1&PayerID=PAYER-1"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(
            &app.router,
            get("/do_ec_payment?sid=xyz999&item_id=invoice_template1&amt=3.00&sig=00&token=EC-TOK-1&PayerID=PAYER-1"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(gateway.finalized.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signed_callback_for_unknown_session_is_expired() {
        let gateway = Arc::new(FakeGateway::default());
        let app = test_app(Some(gateway.clone()));
        let sig = CallbackSigner::new(CALLBACK_SECRET.to_vec())
            .unwrap()
            .sign("xyz999", "invoice_template1", "3.00");

        let (status, _, body) = send(
            &app.router,
            get(&format!(
                "/do_ec_payment?sid=xyz999&item_id=invoice_template1&amt=3.00&sig={sig}&token=EC-TOK-1&PayerID=PAYER-1"
            )),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Session Expired"));
        assert!(gateway.finalized.lock().unwrap().is_empty());
        assert!(app.state.ledger.get("alice").unwrap().purchased.is_empty());
    }

    #[tokio::test]
    async fn test_request_logs_omit_session_and_token() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let token = "EC-7RW2719851512043R";
        let gateway = Arc::new(FakeGateway {
            token: Some(token),
            ..FakeGateway::default()
        });
        let app = test_app(Some(gateway.clone()));
        let session = Session::new(Identity::new("bob"));
        let sid = session.id.as_str().to_string();
        app.state.sessions.put(session, DEFAULT_SESSION_TTL);

        let (status, _, _) = send(
            &app.router,
            post_form("/set_ec", format!("sid={sid}&item_id=invoice_template1")),
        )
        .await;
        assert_eq!(status, StatusCode::FOUND);

        let return_url = gateway.return_urls.lock().unwrap()[0].clone();
        let sig = url::Url::parse(&return_url)
            .unwrap()
            .query_pairs()
            .find(|(key, _)| key == "sig")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        let path = return_url.strip_prefix(BASE).unwrap();
        let (status, _, _) = send(
            &app.router,
            get(&format!("{path}&token={token}&PayerID=PAYER-1")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(app.state.ledger.has_purchased("bob", "invoice_template1").unwrap());

        let logs = capture.contents();
        assert!(logs.contains("path=/set_ec"));
        assert!(logs.contains("path=/do_ec_payment"));
        assert!(!logs.contains(&sid));
        assert!(!logs.contains(&sig));
        assert!(!logs.contains(token));
    }

    #[tokio::test]
    async fn test_missing_parameters_are_bad_requests() {
        let app = test_app(Some(Arc::new(FakeGateway::default())));
        let (status, _, _) = send(&app.router, get("/do_ec_payment?sid=abc123")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _, _) = send(&app.router, post_form("/set_ec", "sid=abc123")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_payments_disabled() {
        let app = test_app(None);
        let (status, _, _) = send(
            &app.router,
            post_form("/set_ec", "sid=abc123&item_id=invoice_template1"),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_purchases_requires_ownership() {
        let app = test_app(None);

        let (status, _, body) = send(
            &app.router,
            get("/purchases?sid=abc123&item_id=letter_of_resignation1"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("Invalid Access"));

        let (status, _, _) = send(
            &app.router,
            get("/purchases?sid=xyz999&item_id=letter_of_resignation1"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_sign_in_opens_session_and_lists_catalog() {
        let app = test_app(None);
        app.state
            .ledger
            .record_purchase("alice", "letter_of_resignation1")
            .unwrap();

        let (status, headers, _) = send(&app.router, get("/login")).await;
        assert_eq!(status, StatusCode::FOUND);
        let location = headers[header::LOCATION].to_str().unwrap().to_string();
        let path = location.strip_prefix(BASE).unwrap();

        let (status, _, body) = send(&app.router, get(path)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Legal Templates: Catalog"));
        assert!(body.contains("Signed in as alice"));
        assert!(body.contains("item_id=letter_of_resignation1\">Already purchased"));
        assert!(body.contains("name=\"item_id\" value=\"invoice_template1\""));
    }

    #[tokio::test]
    async fn test_sign_in_disabled_without_provider() {
        let app = test_app(None);
        let mut state = app.state.clone();
        state.identity = None;
        let router = build_router(state);

        let (status, _, _) = send(&router, get("/app?oauth_token=dev&oauth_verifier=dev")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, _, _) = send(&router, get("/login")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_cancel_and_root_pages() {
        let app = test_app(Some(Arc::new(FakeGateway::default())));

        let (status, _, body) = send(&app.router, get("/cancel_ec?sid=abc123")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Cancel Purchase"));

        let (status, _, body) = send(&app.router, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("href=\"/login\""));
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app(Some(Arc::new(FakeGateway::default())));
        let (status, _, body) = send(&app.router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);

        let health: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["payments_configured"], true);
        assert_eq!(health["identity_configured"], true);
    }
}
