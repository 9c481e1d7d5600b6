use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{error, warn};

use super::request_id::X_REQUEST_ID;

/// Logs failed responses: 5xx at `error`, 4xx other than 404 at `warn`.
pub async fn log_errors(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let path = req.uri().path().to_string();
    let method = req.method().to_string();
    let request_id = req
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let response = next.run(req).await;

    let elapsed = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        error!(
            %method,
            %path,
            status = status.as_u16(),
            ?elapsed,
            request_id = %request_id,
            "server error"
        );
    } else if status.is_client_error() && status != StatusCode::NOT_FOUND {
        warn!(
            %method,
            %path,
            status = status.as_u16(),
            ?elapsed,
            request_id = %request_id,
            "client error"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::request_id::add_request_id;
    use axum::{Router, middleware, routing::get};
    use axum_test::TestServer;

    #[tokio::test]
    async fn test_responses_pass_through_unchanged() {
        let app = Router::new()
            .route("/ok", get(|| async { "fine" }))
            .route(
                "/boom",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error") }),
            )
            .layer(middleware::from_fn(log_errors))
            .layer(middleware::from_fn(add_request_id));
        let server = TestServer::new(app).unwrap();

        server.get("/ok").await.assert_text("fine");

        let failed = server.get("/boom").await;
        failed.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        failed.assert_text("Internal Server Error");
    }
}
