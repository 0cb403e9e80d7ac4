/**
 * API REST BOOST - Serveur HTTP du kernel
 *
 * RÔLE :
 * Expose le sous-système d'allocation au dashboard et aux outils admin :
 * état des bot-servers, registry des hosts, ajout/retrait de bots sur un stream.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum avec middleware auth API key
 * - Routes : /health, /system, /hosts, /registry, /streams, /allocations
 * - Les limites de plan sont vérifiées ici, avant tout appel au core
 * - Erreurs métier converties par `ApiError` (503 capacité, 403 plan, 409 retrait)
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health
 */

use crate::error::ApiError;
use crate::health::KernelHealth;
use crate::state::AppState;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use boost_core::{
    AddOutcome, BoostError, BotKind, HostSnapshot, RemovalReport, RemovalRequest, StreamKey,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::Duration;
use tracing::{info, warn};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct HostView {
    pub host: String,
    pub registered: bool,
    pub stale: bool,
    pub stale_for_seconds: Option<i64>,
    pub allocated_bots: u64,
    pub capacity: Option<HostSnapshot>,
}

fn to_view(app: &AppState, host: &str, snapshot: Option<HostSnapshot>, allocated_bots: u64) -> HostView {
    let now = app.clock.now();
    let age = snapshot.as_ref().map(|s| now - s.reported_at);
    HostView {
        host: host.to_string(),
        registered: app.registry.contains(host),
        // un host jamais reporté est considéré stale
        stale: age.map_or(true, |a| a > Duration::seconds(app.cfg.health.stale_after_secs as i64)),
        stale_for_seconds: age.map(|a| a.whole_seconds().max(0)),
        allocated_bots,
        capacity: snapshot,
    }
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path();

    // Health check toujours accessible
    if path == "/health" {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("BOOST_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        warn!("BOOST_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path, "rejected request without valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/hosts", get(get_hosts))
        .route("/hosts/{host}", get(get_host))
        .route("/registry/hosts", get(list_registry).post(register_host))
        .route("/registry/hosts/{host}", axum::routing::delete(unregister_host))
        .route("/streams/add", post(add_bots))
        .route("/streams/remove", post(remove_bots))
        .route("/streams/remove_all", post(remove_all_bots))
        .route("/allocations", get(get_allocations))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

/* ---------------------------- système / hosts ---------------------------- */

async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app))
}

async fn get_hosts(State(app): State<AppState>) -> Json<Vec<HostView>> {
    let totals = app.distributor.ledger().host_totals();
    let mut snapshots: BTreeMap<String, HostSnapshot> = app
        .distributor
        .tracker()
        .snapshots()
        .into_iter()
        .map(|s| (s.host.clone(), s))
        .collect();

    // ordre du registry d'abord, puis les hosts encore suivis mais retirés
    let mut views = Vec::new();
    for host in app.registry.list() {
        let snapshot = snapshots.remove(&host);
        let bots = totals.get(&host).copied().unwrap_or(0);
        views.push(to_view(&app, &host, snapshot, bots));
    }
    for (host, snapshot) in snapshots {
        let bots = totals.get(&host).copied().unwrap_or(0);
        views.push(to_view(&app, &host, Some(snapshot), bots));
    }
    Json(views)
}

async fn get_host(State(app): State<AppState>, Path(host): Path<String>) -> ApiResult<Json<HostView>> {
    let snapshot = app.distributor.tracker().snapshot(&host);
    if snapshot.is_none() && !app.registry.contains(&host) {
        return Err(ApiError::NotFound(format!("host {host}")));
    }
    let bots = app.distributor.ledger().host_totals().get(&host).copied().unwrap_or(0);
    Ok(Json(to_view(&app, &host, snapshot, bots)))
}

/* ------------------------------- registry ------------------------------- */

#[derive(Debug, Deserialize)]
pub struct RegisterHost {
    pub host: String,
}

async fn list_registry(State(app): State<AppState>) -> Json<Vec<String>> {
    Json(app.registry.list())
}

async fn register_host(
    State(app): State<AppState>,
    Json(body): Json<RegisterHost>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let added = app.registry.add(&body.host).await?;
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(serde_json::json!({ "ok": true, "added": added, "hosts": app.registry.list() }))))
}

async fn unregister_host(
    State(app): State<AppState>,
    Path(host): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !app.registry.remove(&host).await? {
        return Err(ApiError::NotFound(format!("host {host}")));
    }
    Ok(Json(serde_json::json!({ "ok": true, "hosts": app.registry.list() })))
}

/* -------------------------------- streams -------------------------------- */

#[derive(Debug, Deserialize)]
pub struct AddRequest {
    pub user_id: String,
    pub stream_url: String,
    pub kind: BotKind,
    pub count: u32,
    #[serde(default)]
    pub plan: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveRequest {
    pub user_id: String,
    pub stream_url: String,
    pub kind: BotKind,
    pub count: u32,
}

/// Sert aussi de query string pour `/allocations`.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub user_id: String,
    pub stream_url: String,
    pub kind: BotKind,
}

impl StreamParams {
    fn key(&self) -> StreamKey {
        StreamKey::new(&self.user_id, &self.stream_url, self.kind)
    }
}

#[derive(Debug, Serialize)]
pub struct AllocationsView {
    pub stream: String,
    pub total: u32,
    pub hosts: BTreeMap<String, u32>,
}

/// Réponse d'un ajout : `outcome.count` est ce qui a été placé, `requested`
/// ce que l'utilisateur a demandé avant ajustement à son plan.
#[derive(Debug, Serialize)]
pub struct AddResponse {
    pub requested: u32,
    pub adjusted: bool,
    #[serde(flatten)]
    pub outcome: AddOutcome,
}

async fn add_bots(State(app): State<AppState>, Json(req): Json<AddRequest>) -> ApiResult<Json<AddResponse>> {
    let key = StreamKey::new(&req.user_id, &req.stream_url, req.kind);
    key.validate()?;
    if req.count == 0 {
        return Err(BoostError::InvalidRequest("cannot add zero bots".into()).into());
    }

    let _guard = app.stream_locks.acquire(&key).await;

    let limit = app.cfg.plans.limits_for(req.plan.as_deref()).for_kind(req.kind);
    let current = app.distributor.ledger().total_allocated(&key);
    let remaining = limit.saturating_sub(current);
    if remaining == 0 {
        info!(stream = %key, current, limit, requested = req.count, "plan limit reached");
        return Err(ApiError::PlanLimit { kind: req.kind, limit, current });
    }
    let count = req.count.min(remaining);
    if count < req.count {
        info!(stream = %key, requested = req.count, count, limit, "request adjusted to plan limit");
    }

    let candidates = app.registry.list();
    match app.distributor.add(&key, &candidates, count, app.api.as_ref()).await? {
        outcome @ AddOutcome::Applied { .. } => Ok(Json(AddResponse {
            requested: req.count,
            adjusted: count < req.count,
            outcome,
        })),
        AddOutcome::Failed { host, error } => Err(ApiError::HostFailed { host, error }),
        AddOutcome::Exhausted => Err(BoostError::CapacityExhausted { kind: req.kind, requested: count }.into()),
    }
}

async fn remove_bots(State(app): State<AppState>, Json(req): Json<RemoveRequest>) -> ApiResult<Json<RemovalReport>> {
    let key = StreamKey::new(&req.user_id, &req.stream_url, req.kind);
    key.validate()?;
    let _guard = app.stream_locks.acquire(&key).await;
    app.distributor.check_removal(&key, req.count)?;
    let report = app
        .distributor
        .remove(&key, RemovalRequest::Units(req.count), app.api.as_ref())
        .await?;
    Ok(Json(report))
}

async fn remove_all_bots(State(app): State<AppState>, Json(req): Json<StreamParams>) -> ApiResult<Json<RemovalReport>> {
    let key = req.key();
    let _guard = app.stream_locks.acquire(&key).await;
    let report = app.distributor.remove(&key, RemovalRequest::All, app.api.as_ref()).await?;
    Ok(Json(report))
}

async fn get_allocations(State(app): State<AppState>, Query(params): Query<StreamParams>) -> ApiResult<Json<AllocationsView>> {
    let key = params.key();
    key.validate()?;
    let ledger = app.distributor.ledger();
    Ok(Json(AllocationsView {
        stream: key.to_string(),
        total: ledger.total_allocated(&key),
        hosts: ledger.get_allocations(&key),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HostRegistry;
    use async_trait::async_trait;
    use axum::body::Body;
    use boost_core::{AddCommand, ApplyError, BoostConfig, HealthReport, HostApi, ManualClock, RemoveCommand};
    use boost_devkit::MockHostApi;
    use std::sync::Arc;
    use time::OffsetDateTime;
    use tower::ServiceExt;

    const MB: f64 = 1024.0;

    struct Fixture {
        app: AppState,
        api: MockHostApi,
        clock: ManualClock,
        _dir: tempfile::TempDir,
    }

    /// Rend la main au runtime avant chaque commande, comme un vrai appel réseau.
    struct YieldingHostApi(MockHostApi);

    #[async_trait]
    impl HostApi for YieldingHostApi {
        async fn add(&self, host: &str, cmd: &AddCommand) -> Result<(), ApplyError> {
            tokio::task::yield_now().await;
            self.0.add(host, cmd).await
        }

        async fn remove(&self, host: &str, cmd: &RemoveCommand) -> Result<(), ApplyError> {
            tokio::task::yield_now().await;
            self.0.remove(host, cmd).await
        }

        async fn health(&self, host: &str) -> Result<HealthReport, ApplyError> {
            self.0.health(host).await
        }
    }

    async fn fixture(hosts: &[(&str, f64, f64)]) -> Fixture {
        let api = MockHostApi::new();
        fixture_with(hosts, api.clone(), Arc::new(api)).await
    }

    async fn fixture_with(hosts: &[(&str, f64, f64)], api: MockHostApi, host_api: Arc<dyn HostApi>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(HostRegistry::new(dir.path().join("hosts.json")));
        let names: Vec<String> = hosts.iter().map(|(h, _, _)| h.to_string()).collect();
        registry.load_or_seed(&names).await.unwrap();

        let clock = ManualClock::new(OffsetDateTime::now_utc());
        let app = AppState::new(BoostConfig::default(), registry, host_api, Arc::new(clock.clone()));
        for (host, total, used) in hosts {
            app.distributor.tracker().ingest_health_report(host, *total, *used);
            api.set_report(host, total * MB, used * MB);
        }
        Fixture { app, api, clock, _dir: dir }
    }

    fn add_req(count: u32, plan: Option<&str>) -> AddRequest {
        AddRequest {
            user_id: "user-1".into(),
            stream_url: "https://twitch.tv/caster".into(),
            kind: BotKind::Viewer,
            count,
            plan: plan.map(String::from),
        }
    }

    fn stream_params() -> StreamParams {
        StreamParams {
            user_id: "user-1".into(),
            stream_url: "https://twitch.tv/caster".into(),
            kind: BotKind::Viewer,
        }
    }

    fn viewers() -> StreamKey {
        StreamKey::new("user-1", "https://twitch.tv/caster", BotKind::Viewer)
    }

    async fn add_ok(app: &AppState, count: u32, plan: Option<&str>) -> AddResponse {
        let Json(resp) = add_bots(State(app.clone()), Json(add_req(count, plan))).await.unwrap();
        resp
    }

    fn applied(resp: &AddResponse) -> u32 {
        match &resp.outcome {
            AddOutcome::Applied { count, .. } => *count,
            other => panic!("not applied: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_add_places_bots_on_roomiest_host() {
        let f = fixture(&[("bot1", 16.0, 12.0), ("bot2", 16.0, 2.0)]).await;

        let resp = add_ok(&f.app, 5, Some("Basic")).await;
        assert_eq!(resp.outcome, AddOutcome::Applied { host: "bot2".into(), count: 5 });
        assert!(!resp.adjusted);
        assert_eq!(f.app.distributor.ledger().get_allocations(&viewers()).get("bot2"), Some(&5));
        assert_eq!(f.api.adds().len(), 1);
    }

    #[tokio::test]
    async fn test_add_is_clamped_to_plan_headroom() {
        let f = fixture(&[("bot1", 64.0, 0.0)]).await;
        assert_eq!(applied(&add_ok(&f.app, 8, None).await), 8);

        let resp = add_ok(&f.app, 3, Some("Enhance Stream Free")).await;
        assert_eq!(resp.requested, 3);
        assert_eq!(applied(&resp), 2);
        assert!(resp.adjusted);
        assert_eq!(f.api.adds()[1].1.count, 2);
        assert_eq!(f.app.distributor.ledger().total_allocated(&viewers()), 10);

        let body = serde_json::to_value(&resp).unwrap();
        assert_eq!(body["status"], "applied");
        assert_eq!(body["count"], 2);
        assert_eq!(body["requested"], 3);
    }

    #[tokio::test]
    async fn test_full_plan_is_forbidden() {
        let f = fixture(&[("bot1", 64.0, 0.0)]).await;
        assert_eq!(applied(&add_ok(&f.app, 10, None).await), 10);

        let err = add_bots(State(f.app.clone()), Json(add_req(1, None))).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(f.api.adds().len(), 1);

        let resp = add_ok(&f.app, 3, Some("Enhance Stream Starter")).await;
        assert_eq!(applied(&resp), 3);
        assert_eq!(f.app.distributor.ledger().total_allocated(&viewers()), 13);
    }

    #[tokio::test]
    async fn test_zero_count_is_bad_request_even_when_plan_is_full() {
        let f = fixture(&[("bot1", 64.0, 0.0)]).await;
        add_ok(&f.app, 10, None).await;
        let err = add_bots(State(f.app.clone()), Json(add_req(0, None))).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_concurrent_adds_respect_plan_limit() {
        let api = MockHostApi::new();
        let f = fixture_with(&[("bot1", 64.0, 0.0)], api.clone(), Arc::new(YieldingHostApi(api))).await;

        let (first, second) = tokio::join!(
            add_bots(State(f.app.clone()), Json(add_req(6, None))),
            add_bots(State(f.app.clone()), Json(add_req(6, None))),
        );
        let (Json(first), Json(second)) = (first.unwrap(), second.unwrap());

        assert_eq!(applied(&first) + applied(&second), 10);
        assert!(first.adjusted != second.adjusted);
        assert_eq!(f.app.distributor.ledger().total_allocated(&viewers()), 10);
    }

    #[tokio::test]
    async fn test_exhausted_fleet_is_service_unavailable() {
        let f = fixture(&[("bot1", 10.0, 9.6)]).await;
        let err = add_bots(State(f.app.clone()), Json(add_req(1, None))).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(f.api.adds().is_empty());
    }

    #[tokio::test]
    async fn test_failing_host_is_bad_gateway_and_not_recorded() {
        let f = fixture(&[("bot1", 16.0, 0.0)]).await;
        f.api.fail_host("bot1");
        let err = add_bots(State(f.app.clone()), Json(add_req(4, None))).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(f.app.distributor.ledger().total_allocated(&viewers()), 0);
    }

    #[tokio::test]
    async fn test_remove_more_than_allocated_is_conflict() {
        let f = fixture(&[("bot1", 16.0, 0.0)]).await;
        add_ok(&f.app, 4, None).await;

        let req = RemoveRequest {
            user_id: "user-1".into(),
            stream_url: "https://twitch.tv/caster".into(),
            kind: BotKind::Viewer,
            count: 5,
        };
        let err = remove_bots(State(f.app.clone()), Json(req)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(f.api.removes().is_empty());
    }

    #[tokio::test]
    async fn test_remove_all_then_allocations_empty() {
        let f = fixture(&[("bot1", 16.0, 0.0), ("bot2", 16.0, 0.0)]).await;
        add_ok(&f.app, 4, None).await;
        add_ok(&f.app, 3, None).await;

        let Json(report) = remove_all_bots(State(f.app.clone()), Json(stream_params())).await.unwrap();
        assert!(report.fully_applied());
        assert_eq!(report.removed_total, 7);

        let Json(view) = get_allocations(State(f.app.clone()), Query(stream_params())).await.unwrap();
        assert_eq!(view.total, 0);
        assert!(view.hosts.is_empty());
    }

    #[tokio::test]
    async fn test_hosts_view_and_staleness() {
        let f = fixture(&[("bot1", 16.0, 4.0)]).await;
        f.app.registry.add("bot9").await.unwrap();
        f.app.distributor.tracker().record_cpu("bot1", Some(12.5));

        let Json(views) = get_hosts(State(f.app.clone())).await;
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].host, "bot1");
        assert!(!views[0].stale);
        assert_eq!(views[0].capacity.as_ref().and_then(|c| c.cpu_percent), Some(12.5));
        assert!(views[1].capacity.is_none());
        assert!(views[1].stale);

        f.clock.advance(Duration::seconds(91));
        let Json(view) = get_host(State(f.app.clone()), Path("bot1".into())).await.unwrap();
        assert!(view.stale);
        assert_eq!(view.stale_for_seconds, Some(91));

        let err = get_host(State(f.app.clone()), Path("nope".into())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unregistered_host_is_no_longer_a_candidate() {
        let f = fixture(&[("bot1", 16.0, 0.0), ("bot2", 16.0, 8.0)]).await;
        let _ = unregister_host(State(f.app.clone()), Path("bot1".into())).await.unwrap();

        let resp = add_ok(&f.app, 2, None).await;
        assert_eq!(resp.outcome, AddOutcome::Applied { host: "bot2".into(), count: 2 });

        let err = unregister_host(State(f.app.clone()), Path("bot1".into())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    // seul test du module qui touche à BOOST_API_KEY
    #[tokio::test]
    async fn test_api_key_is_required_except_on_health() {
        let f = fixture(&[("bot1", 16.0, 0.0)]).await;
        let router = build_router(f.app.clone());

        async fn status(router: &Router, path: &str, key: Option<&str>) -> StatusCode {
            let mut req = axum::http::Request::builder().uri(path);
            if let Some(key) = key {
                req = req.header("x-api-key", key);
            }
            router.clone().oneshot(req.body(Body::empty()).unwrap()).await.unwrap().status()
        }

        std::env::set_var("BOOST_API_KEY", "s3cret");
        assert_eq!(status(&router, "/health", None).await, StatusCode::OK);
        assert_eq!(status(&router, "/system/health", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(&router, "/system/health", Some("wrong")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(&router, "/registry/hosts", Some("s3cret")).await, StatusCode::OK);

        std::env::remove_var("BOOST_API_KEY");
        assert_eq!(status(&router, "/registry/hosts", Some("s3cret")).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(&router, "/health", None).await, StatusCode::OK);
    }
}
