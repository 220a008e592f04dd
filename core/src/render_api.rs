/// Render API: local HTTP + SSE surface for the UI layer
///
/// Endpoints:
///   GET  /api/snapshot
///   GET  /api/rooms
///   POST /api/rooms/reload
///   POST /api/rooms/:room_id/open
///   POST /api/older
///   POST /api/send      body: {"text":"...","image":{"file_name","content_type","data_base64"}}
///   POST /api/leave
///   GET  /events        SSE stream of EngineEvent JSON
use crate::chat_types::EngineEvent;
use crate::engine::{ChatEngine, Draft};
use crate::error::{ChatError, Result};
use crate::service::{Asset, ChatService};
use crate::transport::Channel;
use base64::{engine::general_purpose, Engine as _};
use futures_util::stream::{unfold, StreamExt};
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

// ─── Type alias ──────────────────────────────────────────────────────────────

type BoxBody = http_body_util::combinators::BoxBody<bytes::Bytes, Infallible>;
type Resp = Response<BoxBody>;

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn cors_headers(builder: hyper::http::response::Builder) -> hyper::http::response::Builder {
    builder
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type")
}

fn empty_resp(status: StatusCode) -> Resp {
    cors_headers(Response::builder())
        .status(status)
        .body(Full::new(bytes::Bytes::new()).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()))
}

fn json_resp(status: StatusCode, body: Vec<u8>) -> Resp {
    cors_headers(Response::builder())
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(bytes::Bytes::from(body)).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()))
}

fn json_ok(value: serde_json::Value) -> Resp {
    json_resp(StatusCode::OK, serde_json::to_vec(&value).unwrap_or_default())
}

fn json_err(status: StatusCode, msg: &str) -> Resp {
    json_resp(
        status,
        serde_json::to_vec(&serde_json::json!({ "error": msg })).unwrap_or_default(),
    )
}

fn error_status(e: &ChatError) -> StatusCode {
    match e {
        ChatError::NoActiveRoom => StatusCode::CONFLICT,
        ChatError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// One SSE frame per engine event; the UI refetches the snapshot on each
fn event_frame(event: &EngineEvent) -> Frame<bytes::Bytes> {
    let json = serde_json::to_string(event).unwrap_or_default();
    Frame::data(bytes::Bytes::from(format!("event: {}\ndata: {}\n\n", event_name(event), json)))
}

fn event_name(event: &EngineEvent) -> &'static str {
    match event {
        EngineEvent::RoomsChanged => "rooms",
        EngineEvent::ActiveRoomChanged { .. } => "active_room",
        EngineEvent::TimelineChanged { .. } => "timeline",
        EngineEvent::SendFailed { .. } => "send_failed",
    }
}

fn sse_resp(rx: tokio::sync::broadcast::Receiver<EngineEvent>) -> Resp {
    // "changed" hint up front so a reconnecting UI resyncs without waiting for traffic
    let hello = futures_util::stream::once(async {
        Ok::<_, Infallible>(Frame::data(bytes::Bytes::from("retry: 2000\nevent: rooms\ndata: {}\n\n")))
    });

    let events = unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((Ok::<_, Infallible>(event_frame(&event)), rx)),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    // skipped events are only change hints; the next one triggers a resync
                    tracing::debug!("Event stream lagged by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    cors_headers(Response::builder())
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream; charset=utf-8")
        .header("Cache-Control", "no-cache")
        .body(StreamBody::new(hello.chain(events)).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()))
}

// ─── Entry point ─────────────────────────────────────────────────────────────

pub async fn start_render_api<S: ChatService, C: Channel>(
    engine: ChatEngine<S, C>,
    addr: SocketAddr,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(ChatError::Io)?;
    info!("Render API started on http://{}", addr);

    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let io = TokioIo::new(stream);
                let engine = engine.clone();
                tokio::spawn(async move {
                    let svc = service_fn(move |req| {
                        let engine = engine.clone();
                        async move { Ok::<_, Infallible>(handle(req, engine).await) }
                    });
                    if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                        // UI tabs closing mid-stream show up as incomplete messages
                        if !e.is_incomplete_message() {
                            error!("Render API connection error: {:?}", e);
                        }
                    }
                });
            }
            Err(e) => error!("Render API accept error: {}", e),
        }
    }
}

// ─── Router ──────────────────────────────────────────────────────────────────

async fn handle<S: ChatService, C: Channel>(
    req: Request<hyper::body::Incoming>,
    engine: ChatEngine<S, C>,
) -> Resp {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if method == Method::OPTIONS {
        return empty_resp(StatusCode::NO_CONTENT);
    }

    match (method.clone(), path.as_str()) {
        (Method::GET, "/api/snapshot") => get_snapshot(&engine).await,
        (Method::GET, "/api/rooms") => {
            let rooms = engine.rooms().await;
            json_ok(serde_json::json!({ "rooms": rooms }))
        }
        (Method::POST, "/api/rooms/reload") => {
            let rooms = engine.load_rooms().await;
            json_ok(serde_json::json!({ "rooms": rooms }))
        }
        (Method::POST, "/api/older") => post_older(&engine).await,
        (Method::POST, "/api/send") => post_send(req, &engine).await,
        (Method::POST, "/api/leave") => match engine.leave_active().await {
            Ok(()) => json_ok(serde_json::json!({ "success": true })),
            Err(e) => json_err(error_status(&e), &e.to_string()),
        },
        (Method::GET, "/events") => sse_resp(engine.subscribe_events()),
        _ => {
            if method == Method::POST && path.starts_with("/api/rooms/") && path.ends_with("/open") {
                let room_id = path
                    .trim_start_matches("/api/rooms/")
                    .trim_end_matches("/open")
                    .to_string();
                let room_id = urlencoding::decode(&room_id)
                    .map(|s| s.into_owned())
                    .unwrap_or(room_id);
                if room_id.is_empty() {
                    return json_err(StatusCode::BAD_REQUEST, "missing room id");
                }
                engine.open_room(&room_id).await;
                return get_snapshot(&engine).await;
            }
            json_err(StatusCode::NOT_FOUND, "not found")
        }
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn get_snapshot<S: ChatService, C: Channel>(engine: &ChatEngine<S, C>) -> Resp {
    match serde_json::to_value(engine.snapshot().await) {
        Ok(v) => json_ok(v),
        Err(e) => json_err(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn post_older<S: ChatService, C: Channel>(engine: &ChatEngine<S, C>) -> Resp {
    match engine.active_room().await {
        Some(room_id) => {
            engine.load_older(&room_id).await;
            get_snapshot(engine).await
        }
        None => json_err(StatusCode::CONFLICT, "no active room"),
    }
}

#[derive(Deserialize)]
struct ImagePayload {
    file_name: String,
    content_type: String,
    data_base64: String,
}

#[derive(Deserialize)]
struct SendRequest {
    text: Option<String>,
    image: Option<ImagePayload>,
}

async fn post_send<S: ChatService, C: Channel>(
    req: Request<hyper::body::Incoming>,
    engine: &ChatEngine<S, C>,
) -> Resp {
    let body = match read_body(req).await {
        Ok(b) => b,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, &format!("body read error: {}", e)),
    };
    let r: SendRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, &format!("invalid JSON: {}", e)),
    };

    let asset = match r.image {
        Some(image) => match general_purpose::STANDARD.decode(image.data_base64) {
            Ok(bytes) => Some(Asset {
                file_name: image.file_name,
                content_type: image.content_type,
                bytes,
            }),
            Err(e) => return json_err(StatusCode::BAD_REQUEST, &format!("invalid base64: {}", e)),
        },
        None => None,
    };

    match engine.send(Draft { text: r.text, asset }).await {
        Ok(temp_id) => json_ok(serde_json::json!({ "temp_id": temp_id })),
        Err(e) => json_err(error_status(&e), &e.to_string()),
    }
}

// ─── Utilities ────────────────────────────────────────────────────────────────

async fn read_body(req: Request<hyper::body::Incoming>) -> std::result::Result<bytes::Bytes, String> {
    req.collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| e.to_string())
}
