//! Retry reasons (§4.E) and the HTTP-status / curl-error classifiers that
//! produce them.

use crate::error::SegmentError;

/// Why a segment fetch is being retried. Dispatch is always on this tag,
/// never on error message text (§9's re-architecture guidance); the
/// text-match fallback in `is_non_retryable_text` exists only as the
/// last-resort compatibility path §9 calls out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryReason {
    NetworkTimeout,
    ConnectionError,
    HttpError,
    ServerError,
    RateLimited,
    TemporaryFailure,
    UnknownError,
}

/// Classify an HTTP status code into a retry reason (§4.H step 4).
pub fn classify_http_status(status: u32) -> RetryReason {
    match status {
        408 | 504 => RetryReason::NetworkTimeout,
        429 => RetryReason::RateLimited,
        500..=599 => RetryReason::ServerError,
        400..=499 => RetryReason::HttpError,
        _ => RetryReason::UnknownError,
    }
}

/// Classify a curl transport error into a retry reason.
pub fn classify_curl_error(e: &curl::Error) -> RetryReason {
    if e.is_operation_timedout() {
        return RetryReason::NetworkTimeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        return RetryReason::ConnectionError;
    }
    RetryReason::UnknownError
}

/// Classify a segment-pipeline failure into a retry reason (§4.H step 6/7).
pub fn classify_segment_error(err: &SegmentError) -> RetryReason {
    match err {
        SegmentError::Curl(e) => classify_curl_error(e),
        SegmentError::Http { status } => classify_http_status(*status),
        // Denied locally by the circuit breaker, no request went out; this
        // is a connection-class failure, never routed through the HTTP
        // status classifier.
        SegmentError::CircuitOpen => RetryReason::ConnectionError,
        SegmentError::PartialTransfer { .. } => RetryReason::TemporaryFailure,
        SegmentError::Decrypt(_) => RetryReason::HttpError,
        SegmentError::Storage(_) => RetryReason::TemporaryFailure,
        SegmentError::Cancelled => RetryReason::UnknownError,
    }
}

/// Non-retryable error-text patterns (§4.E), checked case-insensitively.
/// Retained as a compatibility fallback only; the primary dispatch is the
/// `RetryReason` tag above.
const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "authentication",
    "authorization",
    "forbidden",
    "not found",
    "bad request",
    "invalid",
    "malformed",
    "decrypt",
];

pub fn is_non_retryable_text(error_text: &str) -> bool {
    let lower = error_text.to_lowercase();
    NON_RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_http_status(408), RetryReason::NetworkTimeout);
        assert_eq!(classify_http_status(429), RetryReason::RateLimited);
        assert_eq!(classify_http_status(503), RetryReason::ServerError);
        assert_eq!(classify_http_status(404), RetryReason::HttpError);
        assert_eq!(classify_http_status(301), RetryReason::UnknownError);
    }

    #[test]
    fn non_retryable_text_is_case_insensitive() {
        assert!(is_non_retryable_text("403 Forbidden"));
        assert!(is_non_retryable_text("Authentication required"));
        assert!(!is_non_retryable_text("connection reset by peer"));
    }

    #[test]
    fn segment_error_classification() {
        assert_eq!(
            classify_segment_error(&SegmentError::Http { status: 503 }),
            RetryReason::ServerError
        );
        assert_eq!(
            classify_segment_error(&SegmentError::PartialTransfer {
                expected: 10,
                received: 5
            }),
            RetryReason::TemporaryFailure
        );
    }

    #[test]
    fn circuit_open_classifies_as_connection_error_not_server_error() {
        assert_eq!(
            classify_segment_error(&SegmentError::CircuitOpen),
            RetryReason::ConnectionError
        );
    }

    #[test]
    fn decrypt_errors_are_non_retryable_text() {
        let err = SegmentError::Decrypt("bad padding".to_string());
        assert_ne!(classify_segment_error(&err), RetryReason::ServerError);
        assert!(is_non_retryable_text(&err.to_string()));
    }
}
