//! In-memory transport for tests and dry runs

use async_trait::async_trait;
use es_compat_core::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

type Handler = Box<dyn Fn(&WireRequest) -> Result<RawResponse> + Send + Sync>;

/// Transport answering from a closure and recording every request
pub struct MockTransport {
    handler: Handler,
    requests: Mutex<Vec<WireRequest>>,
    closes: AtomicUsize,
    closed: AtomicBool,
    fail_close: bool,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&WireRequest) -> Result<RawResponse> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            fail_close: false,
        }
    }

    /// Answers every call with `200 {}`
    pub fn empty() -> Self {
        Self::new(|_| Ok(RawResponse::json(200, "{}")))
    }

    /// Answers every call with the same status and JSON body
    pub fn fixed(status: u16, body: &'static str) -> Self {
        Self::new(move |_| Ok(RawResponse::json(status, body)))
    }

    /// Make `close` report an error (it still counts and still closes)
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Requests seen so far, in order
    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of `close` calls, including repeats
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::empty()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn perform(&self, request: &WireRequest) -> Result<RawResponse> {
        if self.is_closed() {
            return Err(EsCompatError::transport("transport is closed"));
        }
        self.requests.lock().push(request.clone());
        (self.handler)(request)
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(EsCompatError::transport("close failed"));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_and_closes() {
        let mock = MockTransport::fixed(201, r#"{"created":true}"#);
        let resp = mock
            .perform(&WireRequest::new(Method::Put, "/idx/doc/1"))
            .await
            .unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(mock.request_count(), 1);
        assert_eq!(mock.requests()[0].endpoint, "/idx/doc/1");

        mock.close().unwrap();
        assert!(mock.perform(&WireRequest::new(Method::Get, "/")).await.is_err());
        assert_eq!(mock.request_count(), 1);
    }
}
