use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Envelope for every successful API response.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub success: bool,
    pub error: ApiErrorBody,
}

pub fn success<T: Serialize>(data: T, message: impl Into<String>) -> Response {
    envelope(StatusCode::OK, data, message)
}

/// Same envelope with `201 Created`.
pub fn created<T: Serialize>(data: T, message: impl Into<String>) -> Response {
    envelope(StatusCode::CREATED, data, message)
}

pub fn error(code: &'static str, message: impl Into<String>, status: StatusCode) -> Response {
    let body = ApiErrorResponse {
        success: false,
        error: ApiErrorBody {
            code,
            message: message.into(),
        },
    };
    (status, Json(body)).into_response()
}

fn envelope<T: Serialize>(status: StatusCode, data: T, message: impl Into<String>) -> Response {
    let body = ApiResponse {
        success: true,
        data,
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_created_envelope() {
        let response = created(serde_json::json!({ "id": 7 }), "Booking created");
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["id"], 7);
        assert_eq!(body["message"], "Booking created");
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let response = error("CONFLICT", "Ticket is already paid", StatusCode::CONFLICT);
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "CONFLICT");
        assert_eq!(body["error"]["message"], "Ticket is already paid");
    }
}
