//! REST API router for the client.
//!
//! Used by the binary and by integration tests. Create with [`create_router`].
//! Uses Extension for state so the router is `Router<()>` and works with `into_make_service()`.
//! Routes under the session middleware need `Authorization: Bearer <token>` from `POST /login`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Query, Request,
    },
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::warn;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::accounts::{self, SignUpForm, VERIFICATION_SENT};
use crate::auth::{bearer_token, require_session, AuthUser, SessionToken};
use crate::error::{AccountError, AuthError, JoinError, StoreError};
use crate::gate::GateDecision;
use crate::matching::{PROFILE_LOAD_FAILED, WAITING_UPDATE_FAILED};
use crate::quiz::LOAD_FAILED;
use crate::service::{AnswersError, Service};

/// Shared app state: one service per process.
#[derive(Clone)]
pub struct AppState {
    pub(crate) service: Arc<Service>,
}

/// Builds the REST router. Returns `Router<()>` so you can call `.into_make_service()` for `axum::serve`.
pub fn create_router(service: Arc<Service>) -> Router<()> {
    let provider = service.auth_provider();
    let state = AppState { service };

    let protected = Router::new()
        .route("/logout", post(log_out))
        .route("/verify-email/resend", post(resend_verification))
        .route("/welcome", get(welcome))
        .route("/waiting/toggle", post(toggle_waiting))
        .route("/join", post(join))
        .route("/leave", post(leave))
        .route("/profile/answers", post(submit_answers))
        .route_layer(middleware::from_fn(move |req: Request, next: Next| {
            let provider = Arc::clone(&provider);
            async move { require_session(req, next, provider).await }
        }));

    Router::new()
        .route("/health", get(health))
        .route("/signup", post(sign_up))
        .route("/login", post(log_in))
        .route("/password-reset", post(request_password_reset))
        .route("/password-reset/confirm", post(confirm_password_reset))
        .route("/verify-email/confirm", post(confirm_email))
        .route("/route", get(route))
        .route("/questions", get(questions))
        .route("/stats", get(stats))
        .route("/ws/status", get(ws_status))
        .merge(protected)
        .layer(Extension(state))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn sign_up_status(e: &AccountError) -> StatusCode {
    match e {
        AccountError::UsernameTaken | AccountError::Auth(AuthError::EmailAlreadyInUse) => StatusCode::CONFLICT,
        AccountError::Store(_) | AccountError::Auth(AuthError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

async fn sign_up(Extension(state): Extension<AppState>, Json(form): Json<SignUpForm>) -> Response {
    match state.service.sign_up(&form) {
        Ok(out) => (StatusCode::CREATED, Json(out)).into_response(),
        Err(e) => error_response(sign_up_status(&e), accounts::sign_up_message(&e)),
    }
}

#[derive(serde::Deserialize)]
struct LoginRequest {
    #[serde(default)]
    identifier: String,
    #[serde(default)]
    password: String,
}

fn login_status(e: &AccountError) -> StatusCode {
    match e {
        AccountError::Auth(AuthError::TooManyRequests) => StatusCode::TOO_MANY_REQUESTS,
        AccountError::Auth(AuthError::InvalidEmail) => StatusCode::BAD_REQUEST,
        AccountError::Auth(AuthError::Internal(_)) | AccountError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNAUTHORIZED,
    }
}

async fn log_in(Extension(state): Extension<AppState>, Json(body): Json<LoginRequest>) -> Response {
    match state.service.log_in(&body.identifier, &body.password) {
        Ok(out) => (StatusCode::OK, Json(out)).into_response(),
        Err(e) => error_response(login_status(&e), accounts::friendly_login_message(&e)),
    }
}

async fn log_out(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<AuthUser>,
    Extension(token): Extension<SessionToken>,
) -> Response {
    state.service.log_out(&token.0, &user.uid);
    (StatusCode::OK, Json(serde_json::json!({ "next": "/" }))).into_response()
}

#[derive(serde::Deserialize)]
struct ResetRequest {
    #[serde(default)]
    email: String,
}

async fn request_password_reset(Extension(state): Extension<AppState>, Json(body): Json<ResetRequest>) -> Response {
    match state.service.request_password_reset(&body.email) {
        Ok(message) => (StatusCode::OK, Json(serde_json::json!({ "message": message }))).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, accounts::reset_message(&e)),
    }
}

#[derive(serde::Deserialize)]
struct ConfirmResetRequest {
    code: String,
    new_password: String,
}

async fn confirm_password_reset(
    Extension(state): Extension<AppState>,
    Json(body): Json<ConfirmResetRequest>,
) -> Response {
    match state.service.confirm_password_reset(&body.code, &body.new_password) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "message": "Password updated.", "next": "/login" })))
            .into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[derive(serde::Deserialize)]
struct ConfirmEmailRequest {
    code: String,
}

async fn confirm_email(Extension(state): Extension<AppState>, Json(body): Json<ConfirmEmailRequest>) -> Response {
    match state.service.confirm_email(&body.code) {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn resend_verification(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    match state.service.resend_verification(&user.uid) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "message": VERIFICATION_SENT }))).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[derive(serde::Deserialize)]
struct RouteQuery {
    path: String,
}

#[derive(serde::Serialize)]
struct RouteResponse {
    decision: &'static str,
    to: Option<&'static str>,
    signed_in: bool,
}

/// Gates a path for the caller. The session header is optional here.
async fn route(Extension(state): Extension<AppState>, headers: HeaderMap, Query(q): Query<RouteQuery>) -> Response {
    let user = bearer_token(&headers).and_then(|t| state.service.current_user(&t));
    let (decision, to) = match state.service.gate(&q.path, user.as_ref()) {
        GateDecision::Stay => ("stay", None),
        GateDecision::Redirect(r) => ("redirect", Some(r.path())),
        GateDecision::NotFound => ("not_found", None),
    };
    let body = RouteResponse {
        decision,
        to,
        signed_in: user.is_some(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn join_error(e: &JoinError, store_message: &str) -> Response {
    match e {
        JoinError::MissingGender => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        JoinError::ProfileNotFound => error_response(StatusCode::NOT_FOUND, e.to_string()),
        JoinError::AlreadyJoined | JoinError::AlreadyWaiting => error_response(StatusCode::CONFLICT, e.to_string()),
        JoinError::Store(inner) => {
            warn!("join store failure: {}", inner);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, store_message)
        }
    }
}

async fn welcome(Extension(state): Extension<AppState>, Extension(user): Extension<AuthUser>) -> Response {
    match state.service.welcome(&user.uid) {
        Ok(w) => (StatusCode::OK, Json(w)).into_response(),
        Err(e) => join_error(&e, PROFILE_LOAD_FAILED),
    }
}

async fn toggle_waiting(Extension(state): Extension<AppState>, Extension(user): Extension<AuthUser>) -> Response {
    match state.service.toggle_waiting(&user.uid) {
        Ok(out) => (StatusCode::OK, Json(out)).into_response(),
        Err(e) => join_error(&e, WAITING_UPDATE_FAILED),
    }
}

async fn join(Extension(state): Extension<AppState>, Extension(user): Extension<AuthUser>) -> Response {
    match state.service.join(&user.uid) {
        Ok(out) => {
            let mut body = serde_json::to_value(&out).unwrap_or_default();
            body["message"] = serde_json::Value::from(out.message());
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => join_error(&e, WAITING_UPDATE_FAILED),
    }
}

async fn leave(Extension(state): Extension<AppState>, Extension(user): Extension<AuthUser>) -> Response {
    match state.service.leave(&user.uid) {
        Ok(out) => (StatusCode::OK, Json(out)).into_response(),
        Err(e) => join_error(&e, WAITING_UPDATE_FAILED),
    }
}

async fn questions(Extension(state): Extension<AppState>) -> Response {
    match state.service.questions() {
        Ok(qs) => (StatusCode::OK, Json(serde_json::json!({ "questions": qs }))).into_response(),
        Err(e) => {
            warn!("questions load failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, LOAD_FAILED)
        }
    }
}

#[derive(serde::Deserialize)]
struct AnswersRequest {
    answers: BTreeMap<usize, usize>,
}

async fn submit_answers(
    Extension(state): Extension<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<AnswersRequest>,
) -> Response {
    match state.service.submit_answers(&user.uid, &body.answers) {
        Ok(n) => (StatusCode::OK, Json(serde_json::json!({ "answered": n }))).into_response(),
        Err(AnswersError::Quiz(e)) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(AnswersError::Store(StoreError::NotFound { .. })) => {
            error_response(StatusCode::NOT_FOUND, JoinError::ProfileNotFound.to_string())
        }
        Err(AnswersError::Store(e)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn stats(Extension(state): Extension<AppState>) -> Response {
    match state.service.counts() {
        Ok(c) => (StatusCode::OK, Json(c)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(serde::Deserialize)]
struct WsQuery {
    token: String,
}

/// Websocket status feed: one `status` snapshot on connect, then close.
async fn ws_status(
    Extension(state): Extension<AppState>,
    Query(q): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(user) = state.service.current_user(&q.token) else {
        return (StatusCode::UNAUTHORIZED, "invalid or expired session").into_response();
    };
    ws.on_upgrade(move |socket| send_status(socket, state, user))
}

async fn send_status(mut socket: WebSocket, state: AppState, user: AuthUser) {
    let welcome = state.service.welcome(&user.uid);
    let counts = state.service.counts();
    let msg = match (welcome, counts) {
        (Ok(w), Ok(c)) => serde_json::json!({
            "type": "status",
            "uid": user.uid,
            "waiting": w.waiting,
            "joined": w.joined,
            "matched_with": w.matched_with,
            "counts": c,
        }),
        _ => serde_json::json!({ "type": "error", "error": PROFILE_LOAD_FAILED }),
    };
    if socket.send(Message::Text(msg.to_string())).await.is_ok() {
        let _ = socket.send(Message::Close(None)).await;
    }
}
