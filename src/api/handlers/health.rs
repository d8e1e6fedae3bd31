use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database is reachable", body = Health),
        (status = 503, description = "Database is unreachable", body = Health),
    ),
    tag = "health"
)]
pub async fn health(method: Method, pool: Extension<PgPool>) -> impl IntoResponse {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let database_ok = match pool.0.acquire().instrument(acquire_span).await {
        Ok(mut conn) => {
            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            match conn.ping().instrument(ping_span).await {
                Ok(()) => true,
                Err(err) => {
                    error!("Failed to ping database: {err}");
                    false
                }
            }
        }
        Err(err) => {
            error!("Failed to acquire database connection: {err}");
            false
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if database_ok { "ok" } else { "error" }.to_string(),
    };

    // OPTIONS gets the X-App header only.
    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let mut headers = HeaderMap::new();
    match x_app_header(&health).parse::<HeaderValue>() {
        Ok(value) => {
            debug!("X-App header: {value:?}");
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to parse X-App header: {err}"),
    }

    let status = if database_ok {
        StatusCode::OK
    } else {
        debug!("Database connection is unhealthy");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, headers, body)
}

/// `name:version:short_hash`; the hash is empty unless longer than 7 characters.
fn x_app_header(health: &Health) -> String {
    let short_hash = if health.commit.len() > 7 {
        health.commit.get(..7).unwrap_or_default()
    } else {
        ""
    };
    format!("{}:{}:{}", health.name, health.version, short_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(commit: &str) -> Health {
        Health {
            commit: commit.to_string(),
            name: "user-profiles".to_string(),
            version: "0.1.0".to_string(),
            database: "ok".to_string(),
        }
    }

    #[test]
    fn x_app_header_shortens_commit() {
        assert_eq!(
            x_app_header(&health("0123456789abcdef")),
            "user-profiles:0.1.0:0123456"
        );
    }

    #[test]
    fn x_app_header_without_commit() {
        assert_eq!(x_app_header(&health("unknown")), "user-profiles:0.1.0:");
    }
}
