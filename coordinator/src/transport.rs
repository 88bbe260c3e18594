//! HTTP and websocket surface.
//!
//! Grounded on `original_source/go/server_state.go`'s `serveWs`/`wsReader`/
//! `wsWriter`/`serveGCStats`/`serveNotifications`/`serveStatus`/
//! `serveInitiateMasterSwitch`/`handleHttpRequest`'s route dispatch,
//! realized with `axum`'s `ws` feature the way the teacher's
//! `servers/Cargo.toml` provisions for it (the teacher's own `redis2ws.rs`
//! used `tokio-tungstenite` for a standalone echo demo rather than an
//! HTTP-upgraded route, so it isn't reused here — see SPEC_FULL.md §6).
//!
//! No templating crate is in the dependency stack (the original renders
//! `gcStatsTemplate`/the status page via Go's `text/template`), so the
//! status page and gcstats body are hand-built `format!` strings instead —
//! see DESIGN.md.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use lib_common::message::WireMessage;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dispatcher::DispatcherHandle;
use crate::status::ServerStatus;

pub fn router(dispatcher: DispatcherHandle) -> Router {
    Router::new()
        .route("/", get(status_page_handler))
        .route("/.html", get(status_page_handler))
        .route("/.json", get(status_handler))
        .route("/initiate_master_switch", post(initiate_master_switch_handler))
        .route("/gcstats", get(gcstats_handler))
        .route("/brokers", get(brokers_handler))
        .route("/configuration", get(configuration_handler))
        .route("/notifications", get(notifications_handler))
        .with_state(dispatcher)
}

async fn status_handler(State(dispatcher): State<DispatcherHandle>) -> impl IntoResponse {
    let status = dispatcher.evaluate(|d| d.status()).await;
    match status {
        Some(status) => Json(status).into_response(),
        None => axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn status_page_handler(State(dispatcher): State<DispatcherHandle>) -> impl IntoResponse {
    let status = dispatcher.evaluate(|d| d.status()).await;
    match status {
        Some(status) => Html(render_status_page(&status)).into_response(),
        None => axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

fn render_status_page(status: &ServerStatus) -> String {
    let mut rows = String::new();
    for fs in &status.failover_status {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            fs.system_name,
            fs.current_primary.as_deref().unwrap_or("-"),
            fs.primary_available,
            fs.switch_in_progress,
            fs.last_gc_info.as_deref().unwrap_or("-"),
        ));
    }
    format!(
        "<html><head><title>beetle configuration server {version}</title></head><body>\
<h1>beetle configuration server {version}</h1>\
<table border=\"1\"><tr><th>system</th><th>primary</th><th>available</th><th>switching</th><th>last gc</th></tr>\n{rows}</table>\
<p>configured clients: {configured}, unknown: {unknown}, unresponsive: {unresponsive}</p>\
</body></html>",
        version = status.beetle_version,
        rows = rows,
        configured = status.configured_client_ids.len(),
        unknown = status.unknown_client_ids.len(),
        unresponsive = status.unresponsive_clients.len(),
    )
}

/// `POST /initiate_master_switch?system_name=NAME`. 400 for an unknown
/// system, 201 if a switch was just forced, 200 if one wasn't necessary
/// (already switching, or the primary is available).
async fn initiate_master_switch_handler(
    State(dispatcher): State<DispatcherHandle>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(system_name) = params.get("system_name").cloned() else {
        return axum::http::StatusCode::BAD_REQUEST;
    };
    match dispatcher.initiate_master_switch(system_name).await {
        Some(true) => axum::http::StatusCode::CREATED,
        Some(false) => axum::http::StatusCode::OK,
        None => axum::http::StatusCode::BAD_REQUEST,
    }
}

/// `GET /gcstats?system=NAME`.
async fn gcstats_handler(
    State(dispatcher): State<DispatcherHandle>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(system_name) = params.get("system").cloned() else {
        return axum::http::StatusCode::BAD_REQUEST.into_response();
    };
    let info = dispatcher
        .evaluate(move |d| d.states.get(&system_name).map(|s| s.last_gc_info.clone()))
        .await;
    match info {
        Some(Some(info)) => Html(format!("<html><body><pre>{info}</pre></body></html>")).into_response(),
        Some(None) => Html("<html><body><pre>no gc info yet</pre></body></html>").into_response(),
        None => axum::http::StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn brokers_handler() -> impl IntoResponse {
    Json(Vec::<String>::new())
}

async fn configuration_handler(
    ws: WebSocketUpgrade,
    State(dispatcher): State<DispatcherHandle>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_configuration_socket(socket, dispatcher))
}

/// One client websocket connection: a reader task forwarding parsed
/// messages into the dispatcher, and the socket's write half draining a
/// per-connection queue the dispatcher broadcasts onto.
async fn handle_configuration_socket(socket: WebSocket, dispatcher: DispatcherHandle) {
    let (mut sink, mut stream) = futures_util::StreamExt::split(socket);
    let (tx, mut rx) = mpsc::unbounded_channel::<WireMessage>();

    let mut client_id: Option<String> = None;

    let writer = tokio::spawn(async move {
        use futures_util::SinkExt;
        while let Some(message) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = futures_util::StreamExt::next(&mut stream).await {
        let Message::Text(text) = frame else { continue };
        let parsed: Result<WireMessage, _> = serde_json::from_str(&text);
        match parsed {
            Ok(message) => {
                if client_id.is_none() {
                    if let Some(id) = message.client_id() {
                        client_id = Some(id.to_string());
                        dispatcher
                            .evaluate({
                                let id = id.to_string();
                                let tx = tx.clone();
                                move |d| d.registry.register(id, tx)
                            })
                            .await;
                    }
                }
                dispatcher.submit_message(message);
            }
            Err(e) => warn!(error = %e, "dropping malformed websocket message"),
        }
    }

    if let Some(id) = client_id {
        dispatcher.submit_message(WireMessage::Unsubscribe { id });
    }
    writer.abort();
    debug!("configuration websocket closed");
}

async fn notifications_handler(
    ws: WebSocketUpgrade,
    State(dispatcher): State<DispatcherHandle>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_notification_socket(socket, dispatcher))
}

/// A `/notifications` subscriber: registers a channel on connect (the
/// equivalent of the original's implicit `START_NOTIFY` on dial), streams
/// failover notices to it, and ignores anything it sends back — mirroring
/// the original logging and discarding inbound frames on this socket.
async fn handle_notification_socket(socket: WebSocket, dispatcher: DispatcherHandle) {
    let (mut sink, mut stream) = futures_util::StreamExt::split(socket);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    dispatcher
        .evaluate(move |d| d.registry.add_notification_channel(tx))
        .await;

    let writer = tokio::spawn(async move {
        use futures_util::SinkExt;
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = futures_util::StreamExt::next(&mut stream).await {
        if matches!(frame, Message::Close(_)) {
            break;
        }
        debug!("ignoring message from notification subscriber");
    }

    writer.abort();
    debug!("notification websocket closed");
}
