// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! HTTP surface for the funding engine.
//!
//! JSON routes over one shared [`Engine`], plus the signed gateway webhook
//! endpoint. Handlers translate [`FundingError`] values to status codes;
//! the engine itself never sees HTTP types.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::base::{GigId, PerformerId, PledgeId, SupporterId, VenueId};
use crate::engine::{Engine, PledgeRequest};
use crate::error::FundingError;
use crate::gateway::PaymentGateway;
use crate::gig::GigConfig;
use crate::notify::Notifier;
use crate::scheduler;
use crate::webhook;

/// Header carrying the hex HMAC signature of the webhook body.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub webhook_secret: String,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(stats))
        .route("/gigs", post(create_gig).get(list_gigs))
        .route("/gigs/{id}", get(get_gig))
        .route("/gigs/{id}/open", post(open_for_applications))
        .route("/gigs/{id}/performers", post(commit_performer))
        .route("/gigs/{id}/start", post(begin_accepting_pledges))
        .route("/gigs/{id}/followers", post(follow_gig))
        .route("/gigs/{id}/pledges", post(create_pledge))
        .route("/gigs/{id}/resolve", post(resolve_gig))
        .route("/gigs/{id}/retry-stuck", post(retry_stuck))
        .route("/gigs/{id}/cancel", post(cancel_gig))
        .route("/gigs/{id}/check-in", post(check_in))
        .route("/pledges/{id}", get(get_pledge))
        .route("/pledges/{id}/cancel", post(cancel_pledge))
        .route(
            "/venues/{id}/payout-account",
            post(register_payout_account).get(get_payout_account),
        )
        .route("/webhooks/gateway", post(gateway_webhook))
        .route("/scheduler/run", post(run_sweep))
        .with_state(state)
}

/// Funding errors wrapped for HTTP responses.
struct AppError(FundingError);

impl From<FundingError> for AppError {
    fn from(error: FundingError) -> Self {
        Self(error)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use FundingError::*;
        let status = match &self.0 {
            GigNotFound | PledgeNotFound | TicketNotFound => StatusCode::NOT_FOUND,
            InvalidTarget | InvalidAmount | InvalidDeadline | InvalidPercent
            | MalformedEvent(_) => StatusCode::BAD_REQUEST,
            SupporterMismatch => StatusCode::FORBIDDEN,
            InvalidSignature => StatusCode::UNAUTHORIZED,
            Gateway(_) => StatusCode::BAD_GATEWAY,
            DuplicateGig | DuplicatePledge | DuplicatePledgeId | WrongStatus | AlreadyTerminal
            | NotResolved | PledgingClosed | CancellationWindowClosed | PayoutAccountNotReady
            | PerformerSlotsFull | NoPerformers | TicketAlreadyCheckedIn | TicketCancelled => {
                StatusCode::CONFLICT
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[derive(Debug, Deserialize)]
struct CreateGigRequest {
    gig_id: u32,
    venue_id: u32,
    target: i64,
    currency: String,
    event_date: NaiveDate,
    deadline_days_before_event: i64,
    #[serde(default)]
    allow_partial: bool,
    #[serde(default)]
    min_percent: u8,
    max_performer_slots: u32,
}

#[derive(Debug, Deserialize)]
struct PayoutAccountRequest {
    account_ref: String,
    charges_enabled: bool,
    payouts_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct PerformerRequest {
    performer_id: u32,
}

#[derive(Debug, Deserialize)]
struct FollowRequest {
    supporter_id: u32,
}

#[derive(Debug, Deserialize)]
struct CancelPledgeRequest {
    supporter_id: u32,
}

#[derive(Debug, Deserialize, Default)]
struct ResolveRequest {
    #[serde(default)]
    accept_partial: bool,
}

#[derive(Debug, Deserialize)]
struct CheckInRequest {
    code: String,
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "open_pledged_total": state.engine.open_pledged_total(),
    }))
}

async fn create_gig(
    State(state): State<AppState>,
    Json(request): Json<CreateGigRequest>,
) -> Result<impl IntoResponse, AppError> {
    let gig_id = GigId(request.gig_id);
    let config = GigConfig {
        venue_id: VenueId(request.venue_id),
        target: request.target,
        currency: request.currency,
        event_date: request.event_date,
        deadline_days_before_event: request.deadline_days_before_event,
        allow_partial: request.allow_partial,
        min_percent: request.min_percent,
        max_performer_slots: request.max_performer_slots,
    };
    state.engine.create_gig(gig_id, config, Utc::now())?;
    let summary = state.engine.gig_summary(gig_id, today())?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn list_gigs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.summaries(today()))
}

async fn get_gig(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.engine.gig_summary(GigId(id), today())?))
}

async fn register_payout_account(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<PayoutAccountRequest>,
) -> impl IntoResponse {
    state.engine.register_payout_account(
        VenueId(id),
        request.account_ref,
        request.charges_enabled,
        request.payouts_enabled,
        Utc::now(),
    );
    StatusCode::CREATED
}

async fn get_payout_account(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<impl IntoResponse, AppError> {
    state
        .engine
        .payout_account(VenueId(id))
        .map(Json)
        .ok_or(AppError(FundingError::GigNotFound))
}

async fn open_for_applications(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<impl IntoResponse, AppError> {
    state.engine.open_for_applications(GigId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn commit_performer(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<PerformerRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .engine
        .commit_performer(GigId(id), PerformerId(request.performer_id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn begin_accepting_pledges(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<impl IntoResponse, AppError> {
    state.engine.begin_accepting_pledges(GigId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn follow_gig(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<FollowRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .engine
        .follow_gig(GigId(id), SupporterId(request.supporter_id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_pledge(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<PledgeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let pledge_id = request.pledge_id;
    state
        .engine
        .create_pledge(GigId(id), request, Utc::now(), state.gateway.as_ref())?;
    Ok((StatusCode::CREATED, Json(json!({ "pledge_id": pledge_id }))))
}

async fn get_pledge(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<impl IntoResponse, AppError> {
    state
        .engine
        .get_pledge(PledgeId(id))
        .map(Json)
        .ok_or(AppError(FundingError::PledgeNotFound))
}

async fn cancel_pledge(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<CancelPledgeRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.engine.cancel_pledge(
        PledgeId(id),
        SupporterId(request.supporter_id),
        Utc::now(),
        state.gateway.as_ref(),
    )?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resolve_gig(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<ResolveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let report = state.engine.resolve(
        GigId(id),
        request.accept_partial,
        Utc::now(),
        state.gateway.as_ref(),
        state.notifier.as_ref(),
    )?;
    Ok(Json(report))
}

async fn retry_stuck(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<impl IntoResponse, AppError> {
    let report = state.engine.retry_stuck_pledges(
        GigId(id),
        Utc::now(),
        state.gateway.as_ref(),
        state.notifier.as_ref(),
    )?;
    Ok(Json(report))
}

async fn cancel_gig(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<impl IntoResponse, AppError> {
    let report = state.engine.cancel_gig(
        GigId(id),
        Utc::now(),
        state.gateway.as_ref(),
        state.notifier.as_ref(),
    )?;
    Ok(Json(report))
}

async fn check_in(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(request): Json<CheckInRequest>,
) -> Result<impl IntoResponse, AppError> {
    let pledge_id = state.engine.check_in(GigId(id), &request.code)?;
    Ok(Json(json!({ "pledge_id": pledge_id })))
}

/// Inbound gateway events. The raw body is authenticated against the
/// shared secret before parsing; unverifiable deliveries change nothing.
async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let envelope = webhook::verify_and_parse(&state.webhook_secret, &body, signature)?;
    let disposition = state.engine.apply_event(envelope, Utc::now());
    Ok(Json(json!({ "disposition": disposition })))
}

async fn run_sweep(State(state): State<AppState>) -> impl IntoResponse {
    let report = scheduler::run_daily_sweep(
        &state.engine,
        Utc::now(),
        state.gateway.as_ref(),
        state.notifier.as_ref(),
    );
    Json(report)
}
