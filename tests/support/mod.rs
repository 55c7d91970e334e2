//! Scripted in-memory connections for driving the pool without sockets.
#![allow(dead_code)]

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Version};
use poolnet::base::timeout::TimeoutValue;
use poolnet::socket::client::{
    Capabilities, Connection, ConnectionConfig, ConnectionFactory, ResponseHead, TunnelTarget, WireRequest,
};
use poolnet::socket::tls::TlsParams;
use poolnet::ConnError;
use std::collections::VecDeque;
use std::fmt;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A canned response.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<Bytes>,
}

impl Reply {
    pub fn new(status: u16) -> Self {
        Self { status, headers: Vec::new(), body: Vec::new() }
    }

    pub fn ok(body: &str) -> Self {
        Self::new(200).body(body)
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::new(status).header("location", location)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body.push(Bytes::from(body.to_string()));
        self
    }
}

/// What the next connection operation does.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(Reply),
    /// Consumed by `connect` on a handle that is not connected yet.
    ConnectError(ConnError),
    /// Like `ConnectError`, but raised after the proxy was reached (for example
    /// during TLS to the destination through an open tunnel).
    DestinationError(ConnError),
    RequestError(ConnError),
    ResponseError(ConnError),
}

/// One request as the handle saw it.
#[derive(Debug, Clone)]
pub struct Sent {
    pub conn: usize,
    pub method: Method,
    pub target: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

#[derive(Debug, Default)]
pub struct Script {
    pub steps: VecDeque<Step>,
    pub sent: Vec<Sent>,
    pub closed: Vec<usize>,
    pub connects: Vec<usize>,
    pub tunnels: Vec<(usize, TunnelTarget)>,
    pub tls: Vec<usize>,
    pub read_timeouts: Vec<(usize, TimeoutValue)>,
    pub configs: Vec<ConnectionConfig>,
    pub created: usize,
    pub verified: bool,
    pub proxy_verified: Option<bool>,
    pub exposes_socket: bool,
    /// Requests between `request` and `get_response`, and the most seen at once.
    pub in_flight: usize,
    pub peak_in_flight: usize,
    /// Time `request` takes before sending.
    pub request_delay: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    script: Arc<Mutex<Script>>,
}

impl MockFactory {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let factory = Self::default();
        factory.lock().steps.extend(steps);
        factory
    }

    pub fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn handle(&self) -> MockFactory {
        self.clone()
    }

    pub fn push(&self, step: Step) {
        self.lock().steps.push_back(step);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.lock().sent.clone()
    }

    pub fn created(&self) -> usize {
        self.lock().created
    }

    pub fn closed(&self) -> Vec<usize> {
        self.lock().closed.clone()
    }
}

impl ConnectionFactory for MockFactory {
    type Conn = MockConnection;

    fn new_conn(&self, config: &ConnectionConfig) -> Result<MockConnection, ConnError> {
        let mut script = self.lock();
        script.created += 1;
        script.configs.push(config.clone());
        Ok(MockConnection {
            id: script.created,
            script: Arc::clone(&self.script),
            connected: false,
            pending: None,
            body: VecDeque::new(),
            tls: None,
            tunnel: None,
            reached_proxy: false,
        })
    }
}

#[derive(Debug)]
pub struct MockConnection {
    pub id: usize,
    script: Arc<Mutex<Script>>,
    connected: bool,
    pending: Option<Step>,
    body: VecDeque<Bytes>,
    tls: Option<TlsParams>,
    tunnel: Option<TunnelTarget>,
    reached_proxy: bool,
}

impl MockConnection {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    fn leave_flight(&self) {
        let mut script = self.lock();
        script.in_flight = script.in_flight.saturating_sub(1);
    }

    pub fn has_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn tunnel(&self) -> Option<&TunnelTarget> {
        self.tunnel.as_ref()
    }

    fn respond(&mut self, reply: Reply) -> ResponseHead {
        let mut headers = HeaderMap::new();
        for (name, value) in &reply.headers {
            headers.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        self.body = reply.body.into_iter().collect();
        ResponseHead { status: StatusCode::from_u16(reply.status).unwrap(), version: Some(Version::HTTP_11), headers }
    }
}

impl Connection for MockConnection {
    fn capabilities(&self) -> Capabilities {
        Capabilities { exposes_socket: self.lock().exposes_socket, supports_tls: true, supports_tunnel: true }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), ConnError> {
        let failure = {
            let mut script = self.lock();
            script.connects.push(self.id);
            let fails = matches!(script.steps.front(), Some(Step::ConnectError(_) | Step::DestinationError(_)));
            if fails { script.steps.pop_front() } else { None }
        };
        match failure {
            Some(Step::ConnectError(e)) => Err(e),
            Some(Step::DestinationError(e)) => {
                self.reached_proxy = self.tunnel.is_some();
                Err(e)
            }
            _ => {
                self.connected = true;
                Ok(())
            }
        }
    }

    fn set_timeout(&mut self, _timeout: TimeoutValue) {}

    fn set_read_timeout(&mut self, timeout: TimeoutValue) {
        let id = self.id;
        self.lock().read_timeouts.push((id, timeout));
    }

    async fn request(&mut self, request: WireRequest) -> Result<(), ConnError> {
        let delay = {
            let mut script = self.lock();
            script.in_flight += 1;
            script.peak_in_flight = script.peak_in_flight.max(script.in_flight);
            script.request_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.connected {
            if let Err(e) = self.connect().await {
                self.leave_flight();
                return Err(e);
            }
        }
        let step = {
            let mut script = self.lock();
            script.sent.push(Sent {
                conn: self.id,
                method: request.method,
                target: request.target,
                headers: request.headers,
                body: request.body,
            });
            script.steps.pop_front()
        };
        match step {
            Some(Step::RequestError(e)) | Some(Step::ConnectError(e)) | Some(Step::DestinationError(e)) => {
                self.leave_flight();
                Err(e)
            }
            Some(step) => {
                self.pending = Some(step);
                Ok(())
            }
            None => {
                self.leave_flight();
                Err(ConnError::Unexpected("script exhausted".into()))
            }
        }
    }

    async fn get_response(&mut self) -> Result<ResponseHead, ConnError> {
        self.leave_flight();
        let pending = self.pending.take();
        let step = pending.or_else(|| self.lock().steps.pop_front());
        match step {
            Some(Step::Respond(reply)) => Ok(self.respond(reply)),
            Some(Step::ResponseError(e))
            | Some(Step::RequestError(e))
            | Some(Step::ConnectError(e))
            | Some(Step::DestinationError(e)) => Err(e),
            None => Err(ConnError::Unexpected("script exhausted".into())),
        }
    }

    async fn read_chunk(&mut self) -> Result<Option<Bytes>, ConnError> {
        Ok(self.body.pop_front())
    }

    fn close(&mut self) {
        self.connected = false;
        self.reached_proxy = false;
        self.pending = None;
        self.body.clear();
        let id = self.id;
        self.lock().closed.push(id);
    }

    fn set_tunnel(&mut self, target: TunnelTarget) {
        let id = self.id;
        self.lock().tunnels.push((id, target.clone()));
        self.tunnel = Some(target);
    }

    fn set_tls(&mut self, params: TlsParams) {
        let id = self.id;
        self.lock().tls.push(id);
        self.tls = Some(params);
    }

    fn is_verified(&self) -> bool {
        self.lock().verified
    }

    fn proxy_is_verified(&self) -> Option<bool> {
        self.lock().proxy_verified
    }

    fn has_connected_to_proxy(&self) -> bool {
        self.connected || self.reached_proxy
    }
}

/// Collects `(target, message)` for every event emitted while installed.
#[derive(Debug, Clone, Default)]
pub struct CapturedEvents {
    events: Arc<Mutex<Vec<(String, String)>>>,
}

impl CapturedEvents {
    /// Install as the thread's default subscriber until the guard drops.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let captured = Self::default();
        let subscriber = tracing_subscriber::registry().with(captured.clone());
        (captured, tracing::subscriber::set_default(subscriber))
    }

    pub fn messages(&self, target: &str) -> Vec<String> {
        let events = self.events.lock().unwrap();
        events.iter().filter(|(t, _)| t == target).map(|(_, m)| m.clone()).collect()
    }
}

impl<S: tracing::Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        struct Message(String);
        impl Visit for Message {
            fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
                if field.name() == "message" {
                    self.0 = format!("{value:?}");
                }
            }
        }
        let mut message = Message(String::new());
        event.record(&mut message);
        self.events.lock().unwrap().push((event.metadata().target().to_string(), message.0));
    }
}
