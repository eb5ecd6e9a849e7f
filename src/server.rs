use std::{io, sync::Arc, time::Instant};

use actix_web::{
    error, get, post, web, App, Error, HttpRequest, HttpResponse, HttpServer, Responder,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info, warn};

use crate::{
    config::ServerConfig,
    engine::StreamingEngine,
    error::StreamError,
    logging::{self, LoggingConfig},
    metrics::{self, PrometheusConfig, StreamMetrics},
    protocols::generate::{ErrorResponse, GenerateRequest, GenerateResponse},
    sink::{CollectingSink, SseSink},
};

const STREAM_ENDPOINT: &str = "generate_stream";
const BUFFERED_ENDPOINT: &str = "generate";

pub struct AppState {
    engine: Arc<StreamingEngine>,
    model_name: String,
}

impl AppState {
    pub fn new(engine: Arc<StreamingEngine>, model_name: impl Into<String>) -> Self {
        Self {
            engine,
            model_name: model_name.into(),
        }
    }

    fn check_model(&self, model: &str) -> Result<(), HttpResponse> {
        if model == self.model_name {
            return Ok(());
        }
        Err(HttpResponse::NotFound().json(ErrorResponse {
            error: format!("Unknown model '{}'", model),
        }))
    }
}

fn error_response(err: &StreamError) -> HttpResponse {
    HttpResponse::build(err.status_code()).json(ErrorResponse {
        error: err.to_string(),
    })
}

// Custom error handler for JSON payload errors.
fn json_error_handler(err: error::JsonPayloadError, _req: &HttpRequest) -> Error {
    warn!("JSON payload error: {}", err);
    let (status, message) = match &err {
        error::JsonPayloadError::OverflowKnownLength { length, limit } => (
            actix_web::http::StatusCode::PAYLOAD_TOO_LARGE,
            format!(
                "Payload too large: {} bytes exceeds limit of {} bytes",
                length, limit
            ),
        ),
        error::JsonPayloadError::Overflow { limit } => (
            actix_web::http::StatusCode::PAYLOAD_TOO_LARGE,
            format!("Payload exceeds limit of {} bytes", limit),
        ),
        _ => (
            actix_web::http::StatusCode::BAD_REQUEST,
            format!("Invalid JSON payload: {}", err),
        ),
    };
    error::InternalError::from_response(
        err,
        HttpResponse::build(status).json(ErrorResponse { error: message }),
    )
    .into()
}

/// JSON extractor settings shared by every generate route
pub fn json_config(max_payload_size: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(max_payload_size)
        .error_handler(json_error_handler)
}

async fn sink_handler(_req: HttpRequest, mut payload: web::Payload) -> Result<HttpResponse, Error> {
    // Drain the payload
    while let Some(chunk) = payload.next().await {
        if let Err(err) = chunk {
            warn!("Error while draining payload: {}", err);
            break;
        }
    }
    Ok(HttpResponse::NotFound().finish())
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().body("OK")
}

#[get("/v2/health/ready")]
async fn ready(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "ready": true,
        "model": data.model_name,
        "backend": data.engine.backend_name(),
    }))
}

#[post("/v2/models/{model}/generate_stream")]
async fn generate_stream(
    path: web::Path<String>,
    body: web::Json<GenerateRequest>,
    data: web::Data<AppState>,
) -> HttpResponse {
    if let Err(response) = data.check_model(&path) {
        return response;
    }
    let start = Instant::now();
    StreamMetrics::record_request(STREAM_ENDPOINT);

    // Setup failures are answered before any byte of the stream is sent
    let engine = Arc::clone(&data.engine);
    let prepared = match engine.prepare(&body) {
        Ok(prepared) => prepared,
        Err(e) => return setup_failed(STREAM_ENDPOINT, &e),
    };
    let stream = match engine.open(&prepared).await {
        Ok(stream) => stream,
        Err(e) => return setup_failed(STREAM_ENDPOINT, &e),
    };

    let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, io::Error>>();
    tokio::spawn(async move {
        let mut sink = SseSink::new(tx);
        if let Err(e) = engine.drive(&prepared, stream, &mut sink).await {
            StreamMetrics::record_request_error(STREAM_ENDPOINT, e.kind());
        }
        StreamMetrics::record_request_duration(STREAM_ENDPOINT, start.elapsed());
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(UnboundedReceiverStream::new(rx))
}

#[post("/v2/models/{model}/generate")]
async fn generate(
    path: web::Path<String>,
    body: web::Json<GenerateRequest>,
    data: web::Data<AppState>,
) -> HttpResponse {
    if let Err(response) = data.check_model(&path) {
        return response;
    }
    let start = Instant::now();
    StreamMetrics::record_request(BUFFERED_ENDPOINT);

    let mut sink = CollectingSink::new();
    let result = data.engine.run(&body, &mut sink).await;
    StreamMetrics::record_request_duration(BUFFERED_ENDPOINT, start.elapsed());

    match result {
        Ok(_) => HttpResponse::Ok().json(GenerateResponse {
            text_output: sink.text(),
            is_final: true,
        }),
        Err(e) => {
            StreamMetrics::record_request_error(BUFFERED_ENDPOINT, e.kind());
            error_response(&e)
        }
    }
}

fn setup_failed(endpoint: &str, err: &StreamError) -> HttpResponse {
    match err {
        StreamError::InvalidInput { .. } => warn!(error = %err, "rejected request"),
        _ => error!(error = %err, "request setup failed"),
    }
    StreamMetrics::record_request_error(endpoint, err.kind());
    error_response(err)
}

/// Register every route; the caller supplies `AppState` and `json_config`
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(ready)
        .service(generate_stream)
        .service(generate)
        .default_service(web::route().to(sink_handler));
}

pub async fn startup(config: ServerConfig) -> io::Result<()> {
    let _log_guard = logging::init_logging(LoggingConfig {
        level: LoggingConfig::parse_level(config.log_level.as_deref()),
        json_format: config.log_json,
        log_dir: config.log_dir.clone(),
        ..Default::default()
    });

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(io::Error::new(io::ErrorKind::InvalidInput, e.to_string()));
    }

    if let Some(metrics_config) = &config.metrics {
        info!(
            "Initializing Prometheus metrics on {}:{}",
            metrics_config.host, metrics_config.port
        );
        metrics::start_prometheus(PrometheusConfig {
            port: metrics_config.port,
            host: metrics_config.host.clone(),
        });
    } else {
        info!("Prometheus metrics disabled");
    }

    let engine = StreamingEngine::from_config(&config).map_err(|e| {
        error!("Failed to initialize streaming engine: {:#}", e);
        io::Error::new(io::ErrorKind::Other, e.to_string())
    })?;
    let app_state = web::Data::new(AppState::new(Arc::new(engine), config.model_name.clone()));

    info!(
        "Serving model '{}' on {}:{} (backend: {})",
        config.model_name,
        config.host,
        config.port,
        config.backend.name()
    );
    info!(
        "Max payload size: {} MB",
        config.max_payload_size / (1024 * 1024)
    );

    let max_payload_size = config.max_payload_size;
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(json_config(max_payload_size))
            .app_data(web::PayloadConfig::default().limit(max_payload_size))
            .configure(configure_routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
