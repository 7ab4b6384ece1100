//! Operational HTTP endpoints.
//!
//! `GET /health`, `GET /ready`, `GET /info`, `GET /metrics` for
//! operators; `POST /random` (authenticated) and `POST /verify` (public)
//! for the randomness proof service; `POST /price/{pair}` as a read
//! proxy over the data-feed cache.

use nsl_config::ServiceLayerConfig;
use nsl_core::{vrf_seed_message, DOMAIN_VRF};
use nsl_engine::{derive_randomness, verify_proof, Engine};
use nsl_signer::ServiceSigner;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::info;
use warp::http::StatusCode;
use warp::Filter;

/// Running ops server; dropping the handle leaves it running, calling
/// [`OpsHandle::shutdown`] stops it.
pub struct OpsHandle {
    shutdown: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl OpsHandle {
    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
        drop(self.task);
    }
}

#[derive(Deserialize)]
struct RandomRequest {
    seed: String,
    #[serde(default)]
    num_words: Option<u32>,
    #[serde(default)]
    app_id: Option<String>,
}

#[derive(Deserialize)]
struct VerifyRequest {
    app_id: String,
    request_id: u64,
    seed: String,
    signature: String,
    public_key: String,
    randomness: String,
}

fn with_engine(
    engine: Arc<Engine>,
) -> impl Filter<Extract = (Arc<Engine>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&engine))
}

fn json_error(status: StatusCode, message: &str) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&json!({ "error": message })), status)
}

fn decode_hex_field(value: &str, field: &str) -> Result<Vec<u8>, String> {
    hex::decode(value.strip_prefix("0x").unwrap_or(value))
        .map_err(|e| format!("{field}: {e}"))
}

async fn handle_health() -> Result<impl warp::Reply, Infallible> {
    Ok(warp::reply::json(&json!({
        "status": "ok",
        "service": "neo-service-layer",
        "timestamp": chrono::Utc::now().timestamp(),
    })))
}

async fn handle_ready(engine: Arc<Engine>) -> Result<impl warp::Reply, Infallible> {
    let report = engine.readiness();
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&report),
        status,
    ))
}

async fn handle_info(engine: Arc<Engine>) -> Result<impl warp::Reply, Infallible> {
    match engine.signer().attestation().await {
        Ok(attestation) => Ok(warp::reply::with_status(
            warp::reply::json(&json!({
                "version": env!("CARGO_PKG_VERSION"),
                "network_magic": engine.config().network.network_magic,
                "gateway": engine.config().network.gateway_contract.to_string(),
                "key_version": attestation.key_version,
                "public_key": hex::encode(&attestation.public_key),
                "mr_enclave": hex::encode(attestation.mr_enclave),
                "simulated": attestation.simulated,
                "attested_at": attestation.timestamp.to_rfc3339(),
            })),
            StatusCode::OK,
        )),
        Err(err) => Ok(json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            &format!("attestation unavailable: {err}"),
        )),
    }
}

async fn handle_metrics(engine: Arc<Engine>) -> Result<impl warp::Reply, Infallible> {
    Ok(warp::reply::with_header(
        engine.metrics().encode(),
        "content-type",
        "text/plain; version=0.0.4",
    ))
}

async fn handle_random(
    engine: Arc<Engine>,
    token: Option<String>,
    authorization: Option<String>,
    body: RandomRequest,
) -> Result<impl warp::Reply, Infallible> {
    if let Some(expected) = token {
        let presented = authorization.unwrap_or_default();
        if presented != format!("Bearer {expected}") {
            return Ok(json_error(StatusCode::UNAUTHORIZED, "invalid token"));
        }
    }

    let seed = match decode_hex_field(&body.seed, "seed") {
        Ok(seed) => seed,
        Err(message) => return Ok(json_error(StatusCode::BAD_REQUEST, &message)),
    };
    let num_words = body.num_words.unwrap_or(1).clamp(1, 256);
    let app_id = body.app_id.unwrap_or_else(|| "ops".to_string());
    let request_id = rand::random::<u32>() as u64;

    let message = vrf_seed_message(&app_id, request_id, &seed);
    let bundle = match engine.signer().sign(DOMAIN_VRF, &message).await {
        Ok(bundle) => bundle,
        Err(err) => {
            return Ok(json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                &format!("signer: {err}"),
            ))
        }
    };
    let randomness = derive_randomness(&bundle.signature, num_words);

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({
            "app_id": app_id,
            "request_id": request_id,
            "seed": hex::encode(&seed),
            "num_words": num_words,
            "randomness": hex::encode(&randomness),
            "signature": hex::encode(&bundle.signature),
            "public_key": hex::encode(&bundle.public_key),
            "key_version": bundle.key_version,
        })),
        StatusCode::OK,
    ))
}

async fn handle_verify(body: VerifyRequest) -> Result<impl warp::Reply, Infallible> {
    let fields = (
        decode_hex_field(&body.seed, "seed"),
        decode_hex_field(&body.signature, "signature"),
        decode_hex_field(&body.public_key, "public_key"),
        decode_hex_field(&body.randomness, "randomness"),
    );
    let (seed, signature, public_key, randomness) = match fields {
        (Ok(seed), Ok(signature), Ok(public_key), Ok(randomness)) => {
            (seed, signature, public_key, randomness)
        }
        _ => return Ok(json_error(StatusCode::BAD_REQUEST, "malformed hex field")),
    };

    let valid = verify_proof(
        &public_key,
        &body.app_id,
        body.request_id,
        &seed,
        &signature,
        &randomness,
    );
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "valid": valid })),
        StatusCode::OK,
    ))
}

async fn handle_price(pair: String, engine: Arc<Engine>) -> Result<impl warp::Reply, Infallible> {
    match engine.feeds().latest(&pair) {
        Some(snapshot) => Ok(warp::reply::with_status(
            warp::reply::json(&*snapshot),
            StatusCode::OK,
        )),
        None => Ok(json_error(
            StatusCode::NOT_FOUND,
            &format!("no snapshot for {pair}"),
        )),
    }
}

/// Binds and serves the operational endpoints.
pub async fn serve(engine: Arc<Engine>, config: &ServiceLayerConfig) -> anyhow::Result<OpsHandle> {
    let addr: SocketAddr = format!("{}:{}", config.ops.bind_address, config.ops.port).parse()?;
    let token = config.ops.api_token.clone();

    let health = warp::path("health").and(warp::get()).and_then(handle_health);
    let ready = warp::path("ready")
        .and(warp::get())
        .and(with_engine(Arc::clone(&engine)))
        .and_then(handle_ready);
    let info = warp::path("info")
        .and(warp::get())
        .and(with_engine(Arc::clone(&engine)))
        .and_then(handle_info);
    let metrics = warp::path("metrics")
        .and(warp::get())
        .and(with_engine(Arc::clone(&engine)))
        .and_then(handle_metrics);
    let random = warp::path("random")
        .and(warp::post())
        .and(with_engine(Arc::clone(&engine)))
        .and(warp::any().map(move || token.clone()))
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::json())
        .and_then(handle_random);
    let verify = warp::path("verify")
        .and(warp::post())
        .and(warp::body::json())
        .and_then(handle_verify);
    let price = warp::path!("price" / String)
        .and(warp::post())
        .and(with_engine(Arc::clone(&engine)))
        .and_then(handle_price);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type", "authorization"])
        .allow_methods(vec!["GET", "POST", "OPTIONS"]);

    let routes = health
        .or(ready)
        .or(info)
        .or(metrics)
        .or(random)
        .or(verify)
        .or(price)
        .with(cors);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (bound, server) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, async {
        let _ = shutdown_rx.await;
    })?;
    info!(address = %bound, "ops endpoints listening");

    let task = tokio::spawn(server);
    Ok(OpsHandle {
        shutdown: shutdown_tx,
        task,
    })
}
