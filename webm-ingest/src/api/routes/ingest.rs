//! Upload route.

use axum::body::Body;
use axum::extract::State;
use axum::http::header::ALLOW;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use crate::api::server::AppState;
use crate::ingest::UploadRequest;

/// Accept a POST on any path and hand it to the dispatcher.
pub async fn ingest_upload(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if method != Method::POST {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(ALLOW, "POST")],
            "method not allowed",
        )
            .into_response();
    }

    let request = UploadRequest::new(uri.path(), headers, body.into_data_stream());
    state.dispatcher.dispatch(request).await.into_response()
}
