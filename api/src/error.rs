use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;

pub enum AppError {
    Database(diesel::result::Error),
    Pool(diesel_async::pooled_connection::deadpool::PoolError),
    Redis(redis::RedisError),
    Status(String, StatusCode),
    Unhandled(eyre::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    msg: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status_code, error_response) = match self {
            AppError::Database(e) => {
                tracing::error!(?e, "Database error");
                internal("DB_ERR", format!("Database error: {e}"))
            }
            AppError::Pool(e) => {
                tracing::error!(?e, "Connection pool error");
                internal("DB_ERR", format!("Pool error: {e}"))
            }
            AppError::Redis(e) => {
                tracing::error!(?e, "Redis error");
                internal("REDIS_ERR", format!("Redis error: {e}"))
            }
            AppError::Status(msg, status) => (
                status,
                ErrorResponse {
                    code: "ERR".into(),
                    msg: Some(msg),
                },
            ),
            AppError::Unhandled(e) => {
                tracing::error!(?e, "Unhandled error");
                internal("ERR", format!("{e}"))
            }
        };

        (status_code, Json(error_response)).into_response()
    }
}

// Detailed messages only leak in debug builds
fn internal(code: &str, msg: String) -> (StatusCode, ErrorResponse) {
    let msg = if cfg!(debug_assertions) {
        msg
    } else {
        "Internal server error".into()
    };
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorResponse {
            code: code.into(),
            msg: Some(msg),
        },
    )
}

impl From<diesel::result::Error> for AppError {
    fn from(e: diesel::result::Error) -> Self {
        AppError::Database(e)
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for AppError {
    fn from(e: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        AppError::Pool(e)
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::Redis(e)
    }
}

impl From<eyre::Error> for AppError {
    fn from(e: eyre::Error) -> Self {
        AppError::Unhandled(e)
    }
}

impl From<(String, StatusCode)> for AppError {
    fn from((msg, status): (String, StatusCode)) -> Self {
        AppError::Status(msg, status)
    }
}

impl From<&'static str> for AppError {
    fn from(e: &'static str) -> Self {
        AppError::Unhandled(eyre::eyre!(e))
    }
}
