use std::sync::Arc;

use ark_bn254::Bn254;
use ark_groth16::Proof;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::engine::parse_signals;
use crate::error::ProofError;
use crate::pipeline::ProofPipeline;
use crate::types::{
    CircuitInfo, ErrorResponse, HealthResponse, ProveResponse, VerifyRequest, VerifyResponse,
};

/// Shared application state passed to all route handlers.
pub struct AppState {
    pub pipeline: Arc<ProofPipeline>,
}

/// Failure response: `{ "error": category, "message": text }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl From<ProofError> for ApiError {
    fn from(err: ProofError) -> Self {
        let status = match &err {
            ProofError::BadInput(_) => StatusCode::BAD_REQUEST,
            ProofError::InvalidWitness { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ProofError::Subprocess { .. } | ProofError::Spawn(_) => StatusCode::BAD_GATEWAY,
            ProofError::Engine(_) | ProofError::Scratch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            body: ErrorResponse {
                error: err.kind().to_string(),
                message: err.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// POST /input: Generate a proof from a circuit input document.
///
/// The body is read raw so malformed documents surface as `bad_input`.
/// The pipeline runs on its own task: a dropped connection does not cancel a
/// request that has already started.
pub async fn input_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ProveResponse>, ApiError> {
    let pipeline = Arc::clone(&state.pipeline);
    let outcome = tokio::spawn(async move { pipeline.run(&body).await })
        .await
        .map_err(|e| ProofError::Engine(format!("request task aborted: {e}")))?;
    Ok(Json(outcome?))
}

/// POST /verify: Verify a proof against the loaded circuit.
pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let proof = Proof::<Bn254>::try_from(&req.proof)?;
    let signals = parse_signals(&req.public_signals)?;
    let is_valid = state.pipeline.prover().verify(proof, signals).await?;
    Ok(Json(VerifyResponse { is_valid }))
}

/// GET /circuit: Dimensions of the loaded proving key.
pub async fn circuit_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let header = state.pipeline.prover().circuit();
    Json(CircuitInfo {
        name: state.pipeline.config().circuit_name.clone(),
        curve: "bn128".to_string(),
        n_vars: header.n_vars,
        n_public: header.n_public,
        domain_size: header.domain_size,
    })
}

/// GET /health: Health check endpoint.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        circuit: state.pipeline.config().circuit_name.clone(),
    })
}

/// Build the axum router with all routes.
pub fn build_router(state: Arc<AppState>, max_request_bytes: usize) -> axum::Router {
    use axum::routing::{get, post};
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    axum::Router::new()
        .route("/input", post(input_handler))
        .route("/verify", post(verify_handler))
        .route("/circuit", get(circuit_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExitStatusPolicy;
    use crate::engine::mock::RecordingEngine;
    use crate::engine::ProofDocument;
    use crate::pipeline::fixtures::{harness, Harness};
    use axum_test::TestServer;

    const GOOD: &str = r#"cp "$FIXTURES/good.wtns" "$2""#;

    fn create_test_app(script: &str, limit: usize) -> (TestServer, Harness) {
        let h = harness(script, ExitStatusPolicy::Advisory, &["a", "b"]);
        let state = Arc::new(AppState {
            pipeline: Arc::clone(&h.pipeline),
        });
        let router = build_router(state, limit);
        (TestServer::new(router).unwrap(), h)
    }

    // ──────────────────────────────────────────────
    // GET /health, GET /circuit
    // ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_health_returns_ok() {
        let (server, _h) = create_test_app(GOOD, 1 << 20);
        let response = server.get("/health").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["circuit"], "circuit");
    }

    #[tokio::test]
    async fn test_circuit_reports_dimensions() {
        let (server, _h) = create_test_app(GOOD, 1 << 20);
        let body: serde_json::Value = server.get("/circuit").await.json();
        assert_eq!(body["nVars"], 4);
        assert_eq!(body["nPublic"], 1);
        assert_eq!(body["curve"], "bn128");
    }

    // ──────────────────────────────────────────────
    // POST /input
    // ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_input_returns_proof() {
        let (server, h) = create_test_app(GOOD, 1 << 20);
        let response = server
            .post("/input")
            .json(&serde_json::json!({"a": "3", "b": "4"}))
            .await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        assert_eq!(body["publicSignals"], serde_json::json!(["12"]));
        assert_eq!(body["proof"]["protocol"], "groth16");
        assert_eq!(body["proof"]["pi_b"].as_array().unwrap().len(), 3);
        assert_eq!(h.leftovers(), 0);
    }

    #[tokio::test]
    async fn test_input_missing_field_returns_400() {
        let (server, h) = create_test_app(GOOD, 1 << 20);
        let response = server
            .post("/input")
            .json(&serde_json::json!({"a": "3"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "bad_input");
        assert!(h.engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_input_malformed_json_returns_400() {
        let (server, _h) = create_test_app(GOOD, 1 << 20);
        let response = server.post("/input").text("{\"a\": ").await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_input_invalid_witness_returns_422() {
        let (server, h) = create_test_app("exit 1", 1 << 20);
        let response = server
            .post("/input")
            .json(&serde_json::json!({"a": "3", "b": "4"}))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "invalid_witness");
        assert_eq!(h.leftovers(), 0);
    }

    #[tokio::test]
    async fn test_input_over_limit_returns_413() {
        let (server, _h) = create_test_app(GOOD, 64);
        let big = "x".repeat(256);
        let response = server
            .post("/input")
            .json(&serde_json::json!({"a": big, "b": "4"}))
            .await;
        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    }

    // ──────────────────────────────────────────────
    // POST /verify
    // ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_verify_valid_proof() {
        let (server, _h) = create_test_app(GOOD, 1 << 20);
        let proof = ProofDocument::from(&RecordingEngine::sample_proof());
        let response = server
            .post("/verify")
            .json(&serde_json::json!({"proof": proof, "publicSignals": ["12"]}))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["isValid"], true);
    }

    #[tokio::test]
    async fn test_verify_bad_point_returns_400() {
        let (server, _h) = create_test_app(GOOD, 1 << 20);
        let mut proof = ProofDocument::from(&RecordingEngine::sample_proof());
        proof.pi_c[1] = "5".to_string();
        let response = server
            .post("/verify")
            .json(&serde_json::json!({"proof": proof, "publicSignals": ["12"]}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    // ──────────────────────────────────────────────
    // Routing
    // ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_unknown_route_returns_404() {
        let (server, _h) = create_test_app(GOOD, 1 << 20);
        server.get("/unknown").await.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_on_post_route_returns_405() {
        let (server, _h) = create_test_app(GOOD, 1 << 20);
        server
            .get("/input")
            .await
            .assert_status(StatusCode::METHOD_NOT_ALLOWED);
    }
}
