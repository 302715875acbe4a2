use crate::analysis::{self, AnalysisReport, AnalysisRequest};
use crate::config::{MAX_TRIALS, MIN_TRIALS, SimulationSettings};
use crate::data::{self, PriceTable};
use crate::error::SimulationError;
use crate::export;
use crate::portfolio::WeightSampling;
use anyhow::Result;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

const DEFAULT_HINT: &str =
    "Check that the tickers exist in the price file and that the date range contains data.";
const BODY_HINT: &str = "Send a JSON object such as {\"tickers\": [\"AAPL\", \"MSFT\"], \"seed\": 42}.";

#[derive(Clone)]
struct WebState {
    prices: Arc<PriceTable>,
    defaults: SimulationSettings,
    simulation: Arc<Mutex<SimulationRuntimeState>>,
}

#[derive(Clone, Debug, Serialize)]
struct ApiError {
    error: String,
    hint: Option<String>,
}

#[derive(Clone, Debug, Serialize, Default)]
struct SimulationRuntimeState {
    last_request: Option<AnalysisRequest>,
    last_report: Option<AnalysisReport>,
    last_error: Option<ApiError>,
    updated_at: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AssetsResponse {
    tickers: Vec<String>,
    first_date: Option<NaiveDate>,
    last_date: Option<NaiveDate>,
    rows: usize,
}

#[derive(Debug, Default, Deserialize)]
struct SimulateRequest {
    tickers: Option<Vec<String>>,
    start: Option<String>,
    end: Option<String>,
    trials: Option<usize>,
    seed: Option<u64>,
    periods_per_year: Option<u32>,
    sampling: Option<WeightSampling>,
    parallel: Option<bool>,
}

pub async fn run_webui_server(port: u16, prices: PriceTable, defaults: SimulationSettings) -> Result<()> {
    let app = router(WebState {
        prices: Arc::new(prices),
        defaults,
        simulation: Arc::new(Mutex::new(SimulationRuntimeState::default())),
    });

    let addr = format!("0.0.0.0:{}", port);
    info!("WebUI listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: WebState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/assets", get(assets))
        .route("/api/simulate", post(simulate))
        .route("/api/state", get(full_state))
        .route("/api/export.csv", get(export_csv))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn assets(State(state): State<WebState>) -> Json<AssetsResponse> {
    Json(AssetsResponse {
        tickers: state.prices.assets.clone(),
        first_date: state.prices.first_date(),
        last_date: state.prices.last_date(),
        rows: state.prices.dates.len(),
    })
}

fn build_request(
    req: SimulateRequest,
    defaults: &SimulationSettings,
) -> Result<AnalysisRequest, (StatusCode, Json<ApiError>)> {
    let trials = req.trials.unwrap_or(defaults.trials);
    if !(MIN_TRIALS..=MAX_TRIALS).contains(&trials) {
        return Err(api_err(
            StatusCode::BAD_REQUEST,
            &format!("trials must be between {} and {}", MIN_TRIALS, MAX_TRIALS),
            None,
        ));
    }

    let parse_opt = |raw: Option<String>| -> Result<Option<NaiveDate>, (StatusCode, Json<ApiError>)> {
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => data::parse_date(s)
                .map(Some)
                .map_err(|e| api_err(StatusCode::BAD_REQUEST, &e.to_string(), None)),
        }
    };

    let tickers = req
        .tickers
        .map(|t| data::parse_tickers(&t.join(",")))
        .unwrap_or_default();

    Ok(AnalysisRequest {
        tickers,
        start: parse_opt(req.start)?,
        end: parse_opt(req.end)?,
        settings: SimulationSettings {
            periods_per_year: req.periods_per_year.unwrap_or(defaults.periods_per_year),
            trials,
            seed: req.seed.or(defaults.seed),
            sampling: req.sampling.unwrap_or(defaults.sampling),
        },
        parallel: req.parallel.unwrap_or(false),
    })
}

async fn simulate(
    State(state): State<WebState>,
    payload: Result<Json<SimulateRequest>, JsonRejection>,
) -> Result<Json<AnalysisReport>, (StatusCode, Json<ApiError>)> {
    let Json(req) = payload.map_err(|rejection| {
        api_err(rejection.status(), &rejection.body_text(), Some(BODY_HINT))
    })?;
    let request = build_request(req, &state.defaults)?;

    let prices = state.prices.clone();
    let job_request = request.clone();
    let outcome = tokio::task::spawn_blocking(move || analysis::run_analysis(&prices, &job_request))
        .await
        .map_err(internal_err)?;

    let mut ss = state.simulation.lock().await;
    ss.last_request = Some(request);
    ss.updated_at = Some(chrono::Local::now().to_rfc3339());
    match outcome {
        Ok(report) => {
            ss.last_report = Some(report.clone());
            ss.last_error = None;
            Ok(Json(report))
        }
        Err(err) => {
            error!("Simulation failed: {:#}", err);
            let hint = err
                .downcast_ref::<SimulationError>()
                .map(|e| e.hint())
                .unwrap_or(DEFAULT_HINT);
            let (status, body) = api_err(StatusCode::BAD_REQUEST, &format!("{:#}", err), Some(hint));
            ss.last_error = Some(body.0.clone());
            Err((status, body))
        }
    }
}

async fn full_state(State(state): State<WebState>) -> Json<SimulationRuntimeState> {
    Json(state.simulation.lock().await.clone())
}

async fn export_csv(
    State(state): State<WebState>,
) -> Result<([(header::HeaderName, &'static str); 2], String), (StatusCode, Json<ApiError>)> {
    let ss = state.simulation.lock().await;
    let report = ss.last_report.as_ref().ok_or_else(|| {
        api_err(
            StatusCode::NOT_FOUND,
            "no simulation has been run yet",
            Some("POST /api/simulate first."),
        )
    })?;
    let body = export::samples_csv_string(&report.simulation).map_err(internal_err)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"resultados_portafolio.csv\"",
            ),
        ],
        body,
    ))
}

fn api_err(status: StatusCode, message: &str, hint: Option<&str>) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: message.to_string(),
            hint: hint.map(str::to_string),
        }),
    )
}

fn internal_err<E: std::fmt::Display>(err: E) -> (StatusCode, Json<ApiError>) {
    api_err(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::Request;

    const PRICES: &str = "\
date,AAPL,MSFT,NVDA
2023-01-02,100.0,200.0,50.0
2023-01-03,101.0,198.0,51.5
2023-01-04,99.5,201.0,52.0
2023-01-05,102.0,203.5,50.8
2023-01-06,103.1,202.0,53.3
2023-01-09,102.4,205.1,54.0
";

    fn state() -> WebState {
        WebState {
            prices: Arc::new(PriceTable::from_reader(PRICES.as_bytes()).unwrap()),
            defaults: SimulationSettings {
                trials: MIN_TRIALS,
                ..SimulationSettings::default()
            },
            simulation: Arc::new(Mutex::new(SimulationRuntimeState::default())),
        }
    }

    #[tokio::test]
    async fn test_assets_lists_tickers() {
        let Json(resp) = assets(State(state())).await;
        assert_eq!(resp.tickers, vec!["AAPL", "MSFT", "NVDA"]);
        assert_eq!(resp.rows, 6);
    }

    #[tokio::test]
    async fn test_simulate_then_export() {
        let state = state();
        let req = SimulateRequest {
            tickers: Some(vec!["aapl".to_string(), " nvda".to_string()]),
            seed: Some(5),
            ..SimulateRequest::default()
        };
        let Json(report) = simulate(State(state.clone()), Ok(Json(req))).await.unwrap();
        assert_eq!(report.assets, vec!["AAPL", "NVDA"]);
        assert_eq!(report.trials, MIN_TRIALS);
        assert_eq!(report.seed, 5);

        let Json(snapshot) = full_state(State(state.clone())).await;
        assert!(snapshot.last_report.is_some());
        assert!(snapshot.last_error.is_none());

        let (_, body) = export_csv(State(state)).await.unwrap();
        assert!(body.starts_with("risk,return,sharpe"));
        assert_eq!(body.lines().count(), MIN_TRIALS + 1);
    }

    #[tokio::test]
    async fn test_state_pairs_request_with_its_outcome() {
        let state = state();
        let ok = SimulateRequest {
            tickers: Some(vec!["AAPL".to_string(), "MSFT".to_string()]),
            seed: Some(11),
            ..SimulateRequest::default()
        };
        simulate(State(state.clone()), Ok(Json(ok))).await.unwrap();

        let invalid = SimulateRequest {
            trials: Some(MIN_TRIALS - 1),
            ..SimulateRequest::default()
        };
        simulate(State(state.clone()), Ok(Json(invalid))).await.unwrap_err();

        let Json(snapshot) = full_state(State(state)).await;
        let request = snapshot.last_request.unwrap();
        let report = snapshot.last_report.unwrap();
        assert_eq!(request.settings.seed, Some(11));
        assert_eq!(report.seed, 11);
        assert_eq!(request.tickers, report.assets);
    }

    #[tokio::test]
    async fn test_malformed_body_returns_hint() {
        let raw = Request::builder()
            .method("POST")
            .uri("/api/simulate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"tickers\": [\"AAPL\""))
            .unwrap();
        let rejection = Json::<SimulateRequest>::from_request(raw, &()).await.unwrap_err();

        let (status, Json(body)) = simulate(State(state()), Err(rejection)).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.error.is_empty());
        assert_eq!(body.hint.as_deref(), Some(BODY_HINT));
    }

    #[tokio::test]
    async fn test_default_run_matches_cli_default() {
        let state = state();
        let req = SimulateRequest {
            seed: Some(21),
            ..SimulateRequest::default()
        };
        let Json(web) = simulate(State(state.clone()), Ok(Json(req))).await.unwrap();

        let cli = AnalysisRequest {
            settings: SimulationSettings {
                seed: Some(21),
                ..state.defaults.clone()
            },
            ..AnalysisRequest::default()
        };
        let local = analysis::run_analysis(&state.prices, &cli).unwrap();
        assert_eq!(web.simulation, local.simulation);
    }

    #[tokio::test]
    async fn test_export_before_simulation_is_not_found() {
        let (status, _) = export_csv(State(state())).await.unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_requests_return_hints() {
        let state = state();

        let too_many = SimulateRequest {
            trials: Some(MAX_TRIALS + 1),
            ..SimulateRequest::default()
        };
        let (status, _) = simulate(State(state.clone()), Ok(Json(too_many))).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = SimulateRequest {
            tickers: Some(vec!["TSLA".to_string()]),
            ..SimulateRequest::default()
        };
        let (status, Json(body)) = simulate(State(state.clone()), Ok(Json(unknown))).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error.contains("TSLA"));
        assert_eq!(body.hint.as_deref(), Some(DEFAULT_HINT));

        let narrow = SimulateRequest {
            start: Some("2023-01-09".to_string()),
            ..SimulateRequest::default()
        };
        let (_, Json(body)) = simulate(State(state.clone()), Ok(Json(narrow))).await.unwrap_err();
        assert!(body.hint.is_some());

        let Json(snapshot) = full_state(State(state)).await;
        assert!(snapshot.last_error.is_some());
    }
}
