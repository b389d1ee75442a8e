use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use tabscope_common::error::SessionError;
use tabscope_engine::session::SessionHandle;

/// HTTP trigger front-end. Thin by design: every route forwards to the
/// engine handle and renders its structured result as JSON.
pub async fn serve(port: u16, handle: SessionHandle) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/dump", post(dump))
        .route("/status", get(status))
        .route("/clear", post(clear))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/tabs", get(tabs))
        .route("/tab/{index}", post(switch_tab))
        .with_state(handle);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!("HTTP trigger server listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

type Reply = (StatusCode, Json<Value>);

fn ok<T: serde::Serialize>(value: T) -> Reply {
    (StatusCode::OK, Json(json!({ "ok": true, "result": value })))
}

fn fail(error: SessionError) -> Reply {
    let status = match &error {
        SessionError::InvalidTab { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(json!({ "ok": false, "error": error.kind(), "message": error.to_string() })),
    )
}

async fn dump(State(handle): State<SessionHandle>) -> Reply {
    match handle.dump().await {
        Ok(report) => ok(report),
        Err(e) => fail(e),
    }
}

async fn status(State(handle): State<SessionHandle>) -> Reply {
    match handle.status().await {
        Ok(status) => ok(status),
        Err(e) => fail(e),
    }
}

async fn clear(State(handle): State<SessionHandle>) -> Reply {
    match handle.clear().await {
        Ok(()) => ok("cleared"),
        Err(e) => fail(e),
    }
}

async fn pause(State(handle): State<SessionHandle>) -> Reply {
    match handle.pause().await {
        Ok(_) => ok("paused"),
        Err(e) => fail(e),
    }
}

async fn resume(State(handle): State<SessionHandle>) -> Reply {
    match handle.resume().await {
        Ok(_) => ok("collecting"),
        Err(e) => fail(e),
    }
}

async fn tabs(State(handle): State<SessionHandle>) -> Reply {
    match handle.list_tabs().await {
        Ok(tabs) => ok(tabs),
        Err(e) => fail(e),
    }
}

async fn switch_tab(State(handle): State<SessionHandle>, Path(index): Path<usize>) -> Reply {
    match handle.switch_tab(index).await {
        Ok(tab) => ok(tab),
        Err(e) => fail(e),
    }
}
