#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::Value;
use tether_api::{Transport, TransportRequest};
use tether_engine::{ApiDescriptor, RestClient, RestClientBuilder};
use tether_types::{InvocationResult, content_type};

type Responder = Box<dyn Fn(&TransportRequest) -> InvocationResult + Send + Sync>;
type DelayFn = Box<dyn Fn(&TransportRequest) -> Duration + Send + Sync>;

/// In-process transport recording every request it is handed.
pub struct MockTransport {
    responder: Responder,
    fail_send: bool,
    send_delay: Duration,
    receive_delay: DelayFn,
    requests: Mutex<Vec<TransportRequest>>,
    sending: AtomicUsize,
    peak_sending: AtomicUsize,
    receiving: AtomicUsize,
    peak_receiving: AtomicUsize,
}

impl MockTransport {
    pub fn new(responder: impl Fn(&TransportRequest) -> InvocationResult + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            fail_send: false,
            send_delay: Duration::ZERO,
            receive_delay: Box::new(|_: &TransportRequest| Duration::ZERO),
            requests: Mutex::new(Vec::new()),
            sending: AtomicUsize::new(0),
            peak_sending: AtomicUsize::new(0),
            receiving: AtomicUsize::new(0),
            peak_receiving: AtomicUsize::new(0),
        }
    }

    /// Always answers `status` with `body` as JSON.
    pub fn json(status: u16, body: Value) -> Self {
        let text = body.to_string();
        Self::new(move |_| InvocationResult::new(status, text.clone()).with_header("Content-Type", content_type::APPLICATION_JSON))
    }

    pub fn text(status: u16, body: &str) -> Self {
        let text = body.to_string();
        Self::new(move |_| InvocationResult::new(status, text.clone()).with_header("Content-Type", content_type::TEXT_PLAIN))
    }

    pub fn failing_send() -> Self {
        let mut transport = Self::json(200, Value::Null);
        transport.fail_send = true;
        transport
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn with_receive_delay(self, delay: Duration) -> Self {
        self.with_receive_delay_by(move |_| delay)
    }

    /// Per-request receive delay, e.g. keyed on the URL.
    pub fn with_receive_delay_by(mut self, delay: impl Fn(&TransportRequest) -> Duration + Send + Sync + 'static) -> Self {
        self.receive_delay = Box::new(delay);
        self
    }

    /// Requests in the order `send` finished with them.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn peak_sending(&self) -> usize {
        self.peak_sending.load(Ordering::SeqCst)
    }

    pub fn peak_receiving(&self) -> usize {
        self.peak_receiving.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Handle = TransportRequest;

    async fn send(&self, request: &TransportRequest) -> anyhow::Result<TransportRequest> {
        if self.fail_send {
            bail!("connection refused");
        }
        let now = self.sending.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_sending.fetch_max(now, Ordering::SeqCst);
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        self.requests.lock().unwrap().push(request.clone());
        self.sending.fetch_sub(1, Ordering::SeqCst);
        Ok(request.clone())
    }

    async fn receive(&self, handle: TransportRequest) -> anyhow::Result<InvocationResult> {
        let now = self.receiving.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_receiving.fetch_max(now, Ordering::SeqCst);
        let delay = (self.receive_delay)(&handle);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let response = (self.responder)(&handle);
        self.receiving.fetch_sub(1, Ordering::SeqCst);
        Ok(response)
    }
}

/// Client for `api` at `http://h` with default settings and no providers.
pub fn client(api: ApiDescriptor, transport: MockTransport) -> RestClient<MockTransport> {
    RestClientBuilder::new(api, "http://h").build(transport).unwrap()
}

pub fn header<'a>(request: &'a TransportRequest, name: &str) -> Option<&'a str> {
    request
        .headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
