use axum::extract::Request;
use axum::http::Uri;
use tower_http::LatencyUnit;
use tower_http::trace::{
    DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, HttpMakeClassifier, TraceLayer,
};
use tracing::{Level, Span};

/// Request tracing for the swap server. Posts to the SSE message endpoint carry the
/// MCP session id, so a session's stage calls share a `session` field.
pub fn http_trace_layer() -> TraceLayer<HttpMakeClassifier, fn(&Request) -> Span> {
    TraceLayer::new_for_http()
        .make_span_with(swap_request_span as fn(&Request) -> Span)
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        )
        .on_failure(DefaultOnFailure::new().level(Level::ERROR))
}

fn swap_request_span(request: &Request) -> Span {
    tracing::info_span!(
        "swap_http",
        method = %request.method(),
        path = %request.uri().path(),
        session = session_id(request.uri()).unwrap_or("-"),
    )
}

/// The `sessionId` query parameter rmcp's SSE transport appends to message posts.
fn session_id(uri: &Uri) -> Option<&str> {
    uri.query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("sessionId="))
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_from_message_post() {
        let uri: Uri = "/swap/message?sessionId=4f1c-9a".parse().unwrap();
        assert_eq!(session_id(&uri), Some("4f1c-9a"));

        let uri: Uri = "/swap/message?foo=1&sessionId=abc".parse().unwrap();
        assert_eq!(session_id(&uri), Some("abc"));
    }

    #[test]
    fn test_no_session_outside_message_posts() {
        let sse: Uri = "/swap/sse".parse().unwrap();
        assert_eq!(session_id(&sse), None);

        let empty: Uri = "/swap/message?sessionId=".parse().unwrap();
        assert_eq!(session_id(&empty), None);
    }
}
