// src/web/control.rs
//! Single-writer control arbitration keyed by caller address.
//!
//! The first caller ever seen holds control; anyone else must take it
//! explicitly. Identities are trusted as given by the transport, this is
//! not an authentication scheme.

use crate::web::api::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default)]
pub struct ControlArbiter {
    // identity -> has control; at most one entry is true
    inner: Arc<Mutex<HashMap<String, bool>>>,
}

impl ControlArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a caller on first contact. Returns whether it holds control.
    pub async fn register_if_absent(&self, id: &str) -> bool {
        let mut map = self.inner.lock().await;
        let first_ever = map.is_empty();
        let in_control = *map.entry(id.to_string()).or_insert_with(|| {
            if first_ever {
                tracing::info!("First visitor {} has control", id);
            }
            first_ever
        });
        in_control
    }

    pub async fn take_control(&self, id: &str) {
        let mut map = self.inner.lock().await;
        for (other, ctrl) in map.iter_mut() {
            if *ctrl && other != id {
                *ctrl = false;
                tracing::debug!("Control moved from {} to {}", other, id);
            }
        }
        map.insert(id.to_string(), true);
    }

    pub async fn has_control(&self, id: &str) -> bool {
        self.inner.lock().await.get(id).copied().unwrap_or(false)
    }
}

/// Caller identity resolved by [`register_caller`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

/// First `x-forwarded-for` hop, else the peer address, else loopback.
pub fn caller_identity(req: &Request) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// Middleware registering every caller with the arbiter.
pub async fn register_caller(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let id = caller_identity(&req);
    state.arbiter.register_if_absent(&id).await;
    req.extensions_mut().insert(CallerId(id));
    next.run(req).await
}
