use async_stream::stream;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::convert::Infallible;
use tokio::sync::mpsc;

pub static X_CHAT_ID: HeaderName = HeaderName::from_static("x-chat-id");

/// Plain-text streaming body fed by the relay channel. The body ends when the
/// sender side is dropped; dropping the body drops the receiver, which the
/// producer observes as a disconnect.
pub fn text_stream_response(mut rx: mpsc::Receiver<Bytes>, chat_id: HeaderValue) -> Response {
    let body = stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<_, Infallible>(chunk);
        }
    };

    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            ),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (X_CHAT_ID.clone(), chat_id),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
