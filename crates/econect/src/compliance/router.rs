use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::domain::{
    Competency, Module, NewSourceRecord, PermissionAction, Principal, RemittanceId,
    RemittanceStatus, SourceRecordId, UnitId, UserId,
};
use super::error::ComplianceError;
use super::permissions::PermittedScope;
use super::repository::{IdentityProvider, RecordStore, RemittanceQuery};
use super::service::ComplianceService;

/// Header carrying the authenticated principal's identifier.
pub const PRINCIPAL_HEADER: &str = "x-user-id";

type SharedService<S> = Arc<ComplianceService<S>>;

/// HTTP surface of the compliance pipeline under `/api/v1`.
pub fn compliance_router<S>(service: SharedService<S>) -> Router
where
    S: RecordStore + IdentityProvider + 'static,
{
    Router::new()
        .route("/api/v1/records", post(ingest_handler::<S>))
        .route("/api/v1/records/:id", get(record_handler::<S>))
        .route("/api/v1/records/:id/validate", post(validate_handler::<S>))
        .route(
            "/api/v1/records/:id/revalidate",
            post(revalidate_handler::<S>),
        )
        .route(
            "/api/v1/records/:id/validations",
            get(validations_handler::<S>).delete(clear_validations_handler::<S>),
        )
        .route("/api/v1/rules", get(rules_handler::<S>))
        .route(
            "/api/v1/remittances",
            get(list_remittances_handler::<S>).post(create_remittance_handler::<S>),
        )
        .route("/api/v1/remittances/stats", get(stats_handler::<S>))
        .route("/api/v1/remittances/:id", get(remittance_handler::<S>))
        .route("/api/v1/remittances/:id/logs", get(logs_handler::<S>))
        .route("/api/v1/remittances/:id/send", post(send_handler::<S>))
        .route("/api/v1/remittances/:id/cancel", post(cancel_handler::<S>))
        .route("/api/v1/remittances/:id/retry", post(retry_handler::<S>))
        .route("/api/v1/permissions/check", get(check_handler::<S>))
        .route("/api/v1/permissions/units", get(units_handler::<S>))
        .route("/api/v1/permissions/modules", get(modules_handler::<S>))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct IngestRequest {
    pub(crate) unit_id: UnitId,
    pub(crate) module: Module,
    pub(crate) competency: Competency,
    pub(crate) payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRemittanceRequest {
    pub(crate) source_record_id: SourceRecordId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListParams {
    status: Option<RemittanceStatus>,
    module: Option<Module>,
    competency: Option<Competency>,
    unit_id: Option<UnitId>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    page: Option<usize>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RulesParams {
    module: Option<Module>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CheckParams {
    action: PermissionAction,
    unit_id: Option<UnitId>,
    module: Option<Module>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScopeParams {
    action: PermissionAction,
    unit_id: Option<UnitId>,
}

#[derive(Debug, Serialize)]
struct ScopeView<T> {
    all: bool,
    values: Vec<T>,
}

impl<T: Ord> From<PermittedScope<T>> for ScopeView<T> {
    fn from(scope: PermittedScope<T>) -> Self {
        match scope {
            PermittedScope::All => ScopeView {
                all: true,
                values: Vec::new(),
            },
            PermittedScope::Only(values) => ScopeView {
                all: false,
                values: values.into_iter().collect(),
            },
        }
    }
}

/// Map a pipeline error onto a JSON error response.
pub(crate) fn error_response(err: ComplianceError) -> Response {
    let status = err.status_code();
    let payload = match &err {
        ComplianceError::ValidationBlocked { violations } => json!({
            "error": err.to_string(),
            "violations": violations,
        }),
        ComplianceError::Transmission {
            remittance_id,
            errors,
            ..
        } => json!({
            "error": err.to_string(),
            "remittance_id": remittance_id,
            "errors": errors,
        }),
        ComplianceError::Store(store) => {
            error!(error = %store, "store failure while serving request");
            json!({ "error": err.to_string() })
        }
        _ => json!({ "error": err.to_string() }),
    };
    (status, Json(payload)).into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, ComplianceError>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(err) => error_response(err),
    }
}

/// Run a pipeline call on the blocking pool.
///
/// Creation, validation and retry wait on per-record locks and transmission
/// waits on the outbound request; neither may park a runtime worker.
async fn blocking<S, T, F>(service: &SharedService<S>, call: F) -> Result<T, Response>
where
    S: RecordStore + IdentityProvider + 'static,
    T: Send + 'static,
    F: FnOnce(&ComplianceService<S>) -> T + Send + 'static,
{
    let worker = service.clone();
    tokio::task::spawn_blocking(move || call(&worker))
        .await
        .map_err(|join_error| {
            error!(error = %join_error, "pipeline task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "pipeline task failed" })),
            )
                .into_response()
        })
}

/// Resolve the calling principal from the identity header.
fn authenticate<S>(service: &ComplianceService<S>, headers: &HeaderMap) -> Result<Principal, Response>
where
    S: RecordStore + IdentityProvider + 'static,
{
    let unauthorized = |message: &str| {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": message })),
        )
            .into_response()
    };

    let id = headers
        .get(PRINCIPAL_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(UserId)
        .ok_or_else(|| unauthorized("missing or malformed x-user-id header"))?;

    match service.principal(id) {
        Ok(Some(principal)) => Ok(principal),
        Ok(None) => Err(unauthorized("unknown principal")),
        Err(err) => Err(error_response(err.into())),
    }
}

macro_rules! principal_or_return {
    ($service:expr, $headers:expr) => {
        match authenticate(&*$service, &$headers) {
            Ok(principal) => principal,
            Err(response) => return response,
        }
    };
}

pub(crate) async fn ingest_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Json(request): Json<IngestRequest>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    let record = NewSourceRecord {
        unit_id: request.unit_id,
        module: request.module,
        competency: request.competency,
        payload: request.payload,
    };
    respond(
        StatusCode::CREATED,
        service.records().ingest(&principal, record),
    )
}

pub(crate) async fn record_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    respond(
        StatusCode::OK,
        service.records().get(&principal, SourceRecordId(id)),
    )
}

pub(crate) async fn validate_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    match blocking(&service, move |service| {
        service.records().validate(&principal, SourceRecordId(id))
    })
    .await
    {
        Ok(result) => respond(StatusCode::OK, result),
        Err(response) => response,
    }
}

pub(crate) async fn revalidate_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    match blocking(&service, move |service| {
        service.records().revalidate(&principal, SourceRecordId(id))
    })
    .await
    {
        Ok(result) => respond(StatusCode::OK, result),
        Err(response) => response,
    }
}

pub(crate) async fn validations_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    respond(
        StatusCode::OK,
        service.records().validations(&principal, SourceRecordId(id)),
    )
}

pub(crate) async fn clear_validations_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    let cleared = service
        .records()
        .clear_validations(&principal, SourceRecordId(id))
        .map(|deleted| json!({ "deleted": deleted }));
    respond(StatusCode::OK, cleared)
}

pub(crate) async fn rules_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Query(params): Query<RulesParams>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    respond(
        StatusCode::OK,
        service.records().rules(&principal, params.module),
    )
}

pub(crate) async fn create_remittance_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Json(request): Json<CreateRemittanceRequest>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    match blocking(&service, move |service| {
        service
            .remittances()
            .create(&principal, request.source_record_id)
    })
    .await
    {
        Ok(result) => respond(StatusCode::CREATED, result),
        Err(response) => response,
    }
}

pub(crate) async fn list_remittances_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    let defaults = RemittanceQuery::default();
    let query = RemittanceQuery {
        status: params.status,
        module: params.module,
        competency: params.competency,
        unit_id: params.unit_id,
        from: params.from,
        to: params.to,
        page: params.page.unwrap_or(defaults.page),
        limit: params.limit.unwrap_or(defaults.limit),
        ..defaults
    };
    respond(
        StatusCode::OK,
        service.remittances().list(&principal, query),
    )
}

pub(crate) async fn stats_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    respond(StatusCode::OK, service.remittances().stats(&principal))
}

pub(crate) async fn remittance_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    respond(
        StatusCode::OK,
        service.remittances().get(&principal, RemittanceId(id)),
    )
}

pub(crate) async fn logs_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    respond(
        StatusCode::OK,
        service.remittances().logs(&principal, RemittanceId(id)),
    )
}

pub(crate) async fn send_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    match blocking(&service, move |service| {
        service.remittances().send(&principal, RemittanceId(id))
    })
    .await
    {
        Ok(result) => respond(StatusCode::OK, result),
        Err(response) => response,
    }
}

pub(crate) async fn cancel_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    respond(
        StatusCode::OK,
        service.remittances().cancel(&principal, RemittanceId(id)),
    )
}

pub(crate) async fn retry_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    match blocking(&service, move |service| {
        service.remittances().retry(&principal, RemittanceId(id))
    })
    .await
    {
        Ok(result) => respond(StatusCode::OK, result),
        Err(response) => response,
    }
}

pub(crate) async fn check_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Query(params): Query<CheckParams>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    let allowed = service
        .permissions()
        .authorize(&principal, params.unit_id, params.module, params.action)
        .map(|allowed| json!({ "allowed": allowed }))
        .map_err(ComplianceError::from);
    respond(StatusCode::OK, allowed)
}

pub(crate) async fn units_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Query(params): Query<ScopeParams>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    let units = service
        .permissions()
        .permitted_units(&principal, params.action)
        .map(ScopeView::from)
        .map_err(ComplianceError::from);
    respond(StatusCode::OK, units)
}

pub(crate) async fn modules_handler<S>(
    State(service): State<SharedService<S>>,
    headers: HeaderMap,
    Query(params): Query<ScopeParams>,
) -> Response
where
    S: RecordStore + IdentityProvider + 'static,
{
    let principal = principal_or_return!(service, headers);
    let modules = service
        .permissions()
        .permitted_modules(&principal, params.action, params.unit_id)
        .map(ScopeView::from)
        .map_err(ComplianceError::from);
    respond(StatusCode::OK, modules)
}
