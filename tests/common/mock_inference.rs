//! Triton-style inference server answering `generate_stream` with SSE

use std::{
    convert::Infallible,
    net::TcpListener,
    sync::{Arc, Mutex},
};

use actix_web::{dev::ServerHandle, http::StatusCode, web, App, HttpResponse, HttpServer};
use bytes::Bytes;
use futures_util::stream;
use serde_json::{json, Value};

#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Send each payload as one SSE event, split across two body chunks
    Stream(Vec<String>),
    /// Reply with a plain error status
    Status(u16, String),
}

struct MockState {
    model: String,
    behavior: MockBehavior,
    requests: Arc<Mutex<Vec<Value>>>,
}

pub struct MockInferenceServer {
    pub url: String,
    requests: Arc<Mutex<Vec<Value>>>,
    handle: ServerHandle,
}

impl MockInferenceServer {
    pub async fn start(model: &str, behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
        let port = listener.local_addr().expect("local addr").port();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let state = web::Data::new(MockState {
            model: model.to_string(),
            behavior,
            requests: Arc::clone(&requests),
        });

        let server = HttpServer::new(move || {
            App::new().app_data(state.clone()).route(
                "/v2/models/{model}/generate_stream",
                web::post().to(generate_stream),
            )
        })
        .workers(1)
        .listen(listener)
        .expect("listen")
        .run();

        let handle = server.handle();
        actix_web::rt::spawn(server);

        Self {
            url: format!("http://127.0.0.1:{}", port),
            requests,
            handle,
        }
    }

    /// JSON bodies received so far
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn stop(self) {
        self.handle.stop(true).await;
    }
}

/// One streamed response carrying `ids` as a `[1][1][n]` tensor
pub fn token_message(ids: &[u32]) -> String {
    json!({ "model_name": "mistral", "output_ids": [[ids]] }).to_string()
}

pub fn error_message(message: &str) -> String {
    json!({ "error": message }).to_string()
}

async fn generate_stream(
    path: web::Path<String>,
    body: web::Json<Value>,
    state: web::Data<MockState>,
) -> HttpResponse {
    if path.as_str() != state.model {
        return HttpResponse::NotFound().json(json!({ "error": "unknown model" }));
    }
    state.requests.lock().unwrap().push(body.into_inner());

    match &state.behavior {
        MockBehavior::Stream(payloads) => {
            let chunks: Vec<Result<Bytes, Infallible>> = payloads
                .iter()
                .flat_map(|payload| {
                    let event = format!("data: {}\n\n", payload);
                    let (head, tail) = event.split_at(event.len() / 2);
                    [
                        Ok(Bytes::from(head.to_string())),
                        Ok(Bytes::from(tail.to_string())),
                    ]
                })
                .collect();
            HttpResponse::Ok()
                .content_type("text/event-stream")
                .streaming(stream::iter(chunks))
        }
        MockBehavior::Status(code, message) => {
            HttpResponse::build(StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY))
                .body(message.clone())
        }
    }
}
