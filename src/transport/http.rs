//! Request/response transport over HTTP
//!
//! Synchronous calls block the caller until a response arrives or the
//! per-call timeout fires. Asynchronous calls return immediately and invoke
//! their handler exactly once with the outcome. The underlying client
//! manages connection lifetime itself, so `close` is a safe no-op.

use crate::error::NetworkError;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Response to a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub body: String,
}

impl HttpResponse {
    /// Whether the status code indicates success (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Callback invoked exactly once when an asynchronous request completes
pub type ResponseHandler = Arc<dyn Fn(Result<HttpResponse, NetworkError>) + Send + Sync>;

/// Optional request headers as name/value pairs
pub type Headers = [(String, String)];

/// Request/response client over HTTP
///
/// `is_connected` is true only for the duration of an in-flight request.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    in_flight: Arc<AtomicBool>,
}

impl HttpTransport {
    /// Create a client; connection pooling is handled internally
    pub fn new() -> Result<Self, NetworkError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(NetworkError::HttpError)?;
        Ok(Self {
            client,
            in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Blocking GET
    ///
    /// # Errors
    ///
    /// `NetworkError::Timeout` when the deadline passes,
    /// `NetworkError::HttpError` for any other transport failure.
    pub fn get_sync(
        &self,
        url: &str,
        headers: Option<&Headers>,
        timeout: Duration,
    ) -> Result<HttpResponse, NetworkError> {
        self.execute(self.client.get(url), headers, None, timeout)
    }

    /// Blocking POST with an optional body
    pub fn post_sync(
        &self,
        url: &str,
        headers: Option<&Headers>,
        body: Option<&str>,
        timeout: Duration,
    ) -> Result<HttpResponse, NetworkError> {
        self.execute(self.client.post(url), headers, body, timeout)
    }

    /// Non-blocking GET; `handler` is invoked exactly once on completion
    pub fn get_async(
        &self,
        url: &str,
        headers: Option<&Headers>,
        timeout: Duration,
        handler: ResponseHandler,
    ) {
        let transport = self.clone();
        let url = url.to_string();
        let headers = headers.map(<[_]>::to_vec);
        std::thread::spawn(move || {
            let result = transport.get_sync(&url, headers.as_deref(), timeout);
            handler(result);
        });
    }

    /// Non-blocking POST; `handler` is invoked exactly once on completion
    pub fn post_async(
        &self,
        url: &str,
        headers: Option<&Headers>,
        body: Option<&str>,
        timeout: Duration,
        handler: ResponseHandler,
    ) {
        let transport = self.clone();
        let url = url.to_string();
        let headers = headers.map(<[_]>::to_vec);
        let body = body.map(str::to_string);
        std::thread::spawn(move || {
            let result = transport.post_sync(&url, headers.as_deref(), body.as_deref(), timeout);
            handler(result);
        });
    }

    /// True only while a request is in flight
    pub fn is_connected(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// No resources to release; present for interface symmetry
    pub fn close(&self) {
        debug!("http transport close requested (no-op)");
    }

    fn execute(
        &self,
        mut request: reqwest::blocking::RequestBuilder,
        headers: Option<&Headers>,
        body: Option<&str>,
        timeout: Duration,
    ) -> Result<HttpResponse, NetworkError> {
        if let Some(headers) = headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        self.in_flight.store(true, Ordering::SeqCst);
        let outcome = request.timeout(timeout).send();
        self.in_flight.store(false, Ordering::SeqCst);

        let response = outcome.map_err(|e| {
            if e.is_timeout() {
                NetworkError::Timeout
            } else {
                NetworkError::HttpError(e)
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().map_err(NetworkError::HttpError)?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Minimal one-shot HTTP server on an ephemeral port
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            request
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_get_sync_returns_status_and_body() {
        let (url, server) = serve_once("200 OK", "hello");
        let transport = HttpTransport::new().unwrap();

        let response = transport
            .get_sync(&url, None, Duration::from_secs(5))
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "hello");
        assert!(response.is_success());
        assert!(!transport.is_connected());

        let request = server.join().unwrap();
        assert!(request.starts_with("GET /"));
    }

    #[test]
    fn test_post_sync_sends_body_and_headers() {
        let (url, server) = serve_once("200 OK", "ok");
        let transport = HttpTransport::new().unwrap();

        let headers = vec![("X-Node".to_string(), "hubnode".to_string())];
        let response = transport
            .post_sync(&url, Some(&headers), Some("41"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(response.status, 200);

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /"));
        assert!(request.contains("x-node"));
        assert!(request.ends_with("41"));
    }

    #[test]
    fn test_post_async_invokes_handler_once() {
        let (url, server) = serve_once("201 Created", "stored");
        let transport = HttpTransport::new().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let handler: ResponseHandler = Arc::new(move |result| {
            tx.send(result.map(|r| r.status)).unwrap();
        });
        transport.post_async(&url, None, Some("x"), Duration::from_secs(5), handler);

        let status = rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert_eq!(status, 201);
        // Exactly once: no second message arrives
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        server.join().unwrap();
    }

    #[test]
    fn test_connection_refused_is_a_typed_error() {
        let transport = HttpTransport::new().unwrap();
        // Port 1 is essentially never listening
        let result = transport.get_sync("http://127.0.0.1:1/", None, Duration::from_secs(1));
        assert!(matches!(
            result,
            Err(NetworkError::HttpError(_)) | Err(NetworkError::Timeout)
        ));
    }

    #[test]
    fn test_close_is_a_safe_noop() {
        let transport = HttpTransport::new().unwrap();
        transport.close();
        transport.close();
    }
}
