// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! `/health` and `/status` over plain HTTP/1.

use crate::orchestrator::Orchestrator;
use anyhow::{Context, Result, anyhow};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, warn};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

static NOTFOUND: &[u8] = b"Not found";

pub type ResponseBody = BoxBody<Bytes, std::io::Error>;

pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind health endpoint on {addr}"))
}

/// Accept connections for as long as the process lives, so health checks
/// keep answering while shutdown is in progress.
pub async fn serve(listener: TcpListener, orchestrator: Arc<Orchestrator>) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!("failed to accept connection: {e}");
                continue;
            }
        };

        // Use an adapter to access something implementing `tokio::io` traits as if they
        // implement `hyper::rt` IO traits.
        let io = TokioIo::new(stream);
        let orch = orchestrator.clone();
        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let orch = orch.clone();
                async move {
                    Ok::<_, anyhow::Error>(handle_request(&orch, req).unwrap_or_else(|e| {
                        error!("request handling failed: {e}");
                        internal_error()
                    }))
                }
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                debug!("error serving connection: {err}");
            }
        });
    }
}

/// Route one request. The body is never read, so any body type works.
pub fn handle_request<B>(
    orchestrator: &Orchestrator,
    req: Request<B>,
) -> Result<Response<ResponseBody>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => json_response(&orchestrator.health()),
        (&Method::GET, "/status" | "/api/status") => {
            json_response(&orchestrator.active_report())
        }
        _ => {
            debug!(
                "{} request to unknown endpoint: {}",
                req.method(),
                req.uri().path()
            );
            not_found()
        }
    }
}

fn json_response<T: Serialize>(value: &T) -> Result<Response<ResponseBody>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|e| {
        error!("failed to serialize response: {e}");
        b"Internal server error".to_vec()
    });
    Response::builder()
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(body.into()).map_err(|e| match e {}).boxed())
        .map_err(|e| anyhow!("failed to build response: {e}"))
}

fn not_found() -> Result<Response<ResponseBody>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(NOTFOUND.into()).map_err(|e| match e {}).boxed())
        .map_err(|e| anyhow!("failed to build not found response: {e}"))
}

fn internal_error() -> Response<ResponseBody> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(
            Full::new(Bytes::from(&b"Internal Server Error"[..]))
                .map_err(|e| match e {})
                .boxed(),
        )
        .unwrap_or_else(|_| {
            // Last resort if even error response building fails
            Response::new(
                Full::new(Bytes::from(&b"Error"[..]))
                    .map_err(|e| match e {})
                    .boxed(),
            )
        })
}
