use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{header::USER_AGENT, request::Parts, HeaderMap},
};
use diesel::prelude::*;
use diesel::PgConnection;
use tracing::warn;
use uuid::Uuid;

use crate::models::NewActivityLog;
use crate::schema::activity_logs;

/// Caller details recorded alongside audit entries.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientMeta {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(client_meta_from_headers(&parts.headers, peer))
    }
}

fn client_meta_from_headers(headers: &HeaderMap, peer: Option<String>) -> ClientMeta {
    let header_text = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    };

    let forwarded = header_text("x-forwarded-for")
        .and_then(|value| value.split(',').next().map(|first| first.trim().to_owned()))
        .filter(|value| !value.is_empty());

    ClientMeta {
        ip_address: forwarded.or_else(|| header_text("x-real-ip")).or(peer),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned),
    }
}

/// Appends an audit entry. Failures are logged and swallowed; the action being
/// audited has already been committed.
pub fn record_activity(
    conn: &mut PgConnection,
    user_id: Option<Uuid>,
    action: &str,
    details: impl Into<String>,
    meta: &ClientMeta,
) {
    let entry = NewActivityLog {
        id: Uuid::new_v4(),
        user_id,
        action: action.to_owned(),
        details: details.into(),
        user_agent: meta.user_agent.clone(),
        ip_address: meta.ip_address.clone(),
    };

    if let Err(err) = diesel::insert_into(activity_logs::table)
        .values(&entry)
        .execute(conn)
    {
        warn!(action, error = %err, "failed to record activity");
    }
}
