//! Topup create, update and read endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CardNumber, TopupId};
use ledger::{CardLedger, SaldoLedger, TopupLedger};
use serde::Deserialize;
use std::sync::Arc;
use topup::{
    CreateTopupRequest, InMemoryTopupCache, NotificationPublisher, TopupOrchestrator, TopupQuery,
    TopupResponse, UpdateTopupRequest,
};

use crate::error::ApiError;

/// A store backing all three ledgers, shareable across handlers.
pub trait Ledger: CardLedger + SaldoLedger + TopupLedger + Clone + 'static {}

impl<T> Ledger for T where T: CardLedger + SaldoLedger + TopupLedger + Clone + 'static {}

/// Shared application state accessible from all handlers.
pub struct AppState<L: Ledger, P: NotificationPublisher + 'static> {
    pub orchestrator: TopupOrchestrator<L, L, L, P, InMemoryTopupCache>,
    pub query: TopupQuery<L, InMemoryTopupCache>,
}

/// Body of `PUT /topups/{id}`. The ID comes from the path.
#[derive(Debug, Deserialize)]
pub struct UpdateTopupBody {
    pub card_number: CardNumber,
    pub amount: i64,
    pub method: String,
}

/// POST /topups: run the create saga.
#[tracing::instrument(skip(state, req), fields(card = %req.card_number.masked()))]
pub async fn create<L: Ledger, P: NotificationPublisher + 'static>(
    State(state): State<Arc<AppState<L, P>>>,
    Json(req): Json<CreateTopupRequest>,
) -> Result<(StatusCode, Json<TopupResponse>), ApiError> {
    let topup = state.orchestrator.create_topup(&req).await?;
    Ok((StatusCode::CREATED, Json(topup)))
}

/// PUT /topups/{id}: run the update saga.
#[tracing::instrument(skip(state, body), fields(card = %body.card_number.masked()))]
pub async fn update<L: Ledger, P: NotificationPublisher + 'static>(
    State(state): State<Arc<AppState<L, P>>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateTopupBody>,
) -> Result<Json<TopupResponse>, ApiError> {
    let req = UpdateTopupRequest::new(TopupId::new(id), body.card_number, body.amount, body.method);
    let topup = state.orchestrator.update_topup(&req).await?;
    Ok(Json(topup))
}

/// GET /topups/{id}: cached read of a single topup.
#[tracing::instrument(skip(state))]
pub async fn get<L: Ledger, P: NotificationPublisher + 'static>(
    State(state): State<Arc<AppState<L, P>>>,
    Path(id): Path<i64>,
) -> Result<Json<TopupResponse>, ApiError> {
    if id <= 0 {
        return Err(ApiError::BadRequest(format!(
            "topup id must be positive, got {id}"
        )));
    }
    let topup = state.query.find_by_id(TopupId::new(id)).await?;
    Ok(Json(topup))
}
