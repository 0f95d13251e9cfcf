//! Test doubles for the HTTP transport and push connector, plus scripted
//! platform responses.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use switchboard::protocol::{Envelope, EventId, PING_FRAME};
use switchboard::{
    ClientConfig, Error, HttpRequest, HttpResponse, HttpTransport, PushChannel, PushConnector,
    Result, Service,
};

pub const LOGIN_BASE_URL: &str = "https://login.test";
pub const API_HOST: &str = "api.test:443";
pub const USER_ID: &str = "1001";
pub const ORG_ID: &str = "42";
pub const COOKIE: &str = "Authorization=Bearer-abc; farmId=7";

pub const SUPERVISOR: &str = "/supsvcs/rs/svc/supervisors/1001";
pub const AGENT: &str = "/appsvcs/rs/svc/agents/1001";

// ============================================================================
// HTTP
// ============================================================================

pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse::new(status, serde_json::to_vec(&body).unwrap())
}

pub fn empty_response(status: u16) -> HttpResponse {
    HttpResponse::new(status, Vec::new())
}

pub fn unauthorized() -> HttpResponse {
    json_response(
        401,
        json!({"five9ExceptionDetail": {"message": "Session is not authorized"}}),
    )
}

pub fn login_state(state: &str) -> HttpResponse {
    json_response(200, json!(state))
}

/// Method and path+query of a request, host stripped.
pub fn route_of(request: &HttpRequest) -> (Method, String) {
    let after_scheme = request
        .url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(&request.url);
    let path = after_scheme
        .find('/')
        .map(|index| &after_scheme[index..])
        .unwrap_or("/");
    (request.method.clone(), path.to_string())
}

/// Route-scripted transport. Each route answers from a queue; the last
/// response of a queue repeats. Unknown routes answer 404.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
    latency: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A supervisor whose login goes straight through SELECT_STATION to WORKING.
    pub fn supervisor() -> Arc<Self> {
        let transport = Self::new();
        transport.script_login("/supsvcs/rs/svc");
        transport.on_sequence(
            Method::GET,
            &format!("{SUPERVISOR}/login_state"),
            vec![login_state("SELECT_STATION"), login_state("WORKING")],
        );
        transport.on(
            Method::PUT,
            &format!("{SUPERVISOR}/session_start?force=true"),
            empty_response(204),
        );
        transport.on(
            Method::PUT,
            &format!("{SUPERVISOR}/request_full_statistics"),
            empty_response(204),
        );
        transport
    }

    /// An agent already in WORKING state after login.
    pub fn agent() -> Arc<Self> {
        let transport = Self::new();
        transport.script_login("/appsvcs/rs/svc");
        transport.on(
            Method::GET,
            &format!("{AGENT}/login_state"),
            login_state("WORKING"),
        );
        transport
    }

    pub fn script_login(&self, context: &str) {
        self.on(
            Method::POST,
            &format!("{context}/auth/login"),
            login_response(),
        );
        self.on(
            Method::GET,
            &format!("{context}/auth/metadata"),
            json_response(200, json!({})),
        );
    }

    pub fn on(&self, method: Method, path: &str, response: HttpResponse) {
        self.on_sequence(method, path, vec![response]);
    }

    pub fn on_sequence(&self, method: Method, path: &str, responses: Vec<HttpResponse>) {
        self.routes
            .lock()
            .unwrap()
            .insert((method, path.to_string()), responses.into());
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Routes of every request, in send order.
    pub fn routes(&self) -> Vec<(Method, String)> {
        self.requests().iter().map(route_of).collect()
    }

    pub fn hits(&self, method: Method, path: &str) -> usize {
        self.routes()
            .into_iter()
            .filter(|(m, p)| *m == method && p == path)
            .count()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let route = route_of(&request);
        self.requests.lock().unwrap().push(request);

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut routes = self.routes.lock().unwrap();
        let response = match routes.get_mut(&route) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(response.unwrap_or_else(|| empty_response(404)))
    }
}

pub fn login_response() -> HttpResponse {
    json_response(
        200,
        json!({
            "tokenId": "token-1",
            "sessionId": "session-1",
            "orgId": ORG_ID,
            "userId": USER_ID,
            "context": {"farmId": "7"},
            "metadata": {
                "dataCenters": [
                    {"name": "standby", "active": false,
                     "apiUrls": [{"host": "standby.test", "port": "443"}]},
                    {"name": "primary", "active": true,
                     "apiUrls": [{"host": "api.test", "port": "443"}]}
                ]
            }
        }),
    )
    .with_header("Set-Cookie", "Authorization=Bearer-abc; Path=/; Secure")
    .with_header("Set-Cookie", "farmId=7; Path=/")
}

pub fn users_response() -> HttpResponse {
    json_response(
        200,
        json!([
            {"id": USER_ID, "userName": "supervisor@example.com", "firstName": "Sam"},
            {"id": "1", "userName": "alice@example.com"},
            {"id": "2", "userName": "bob@example.com"},
            {"id": "3", "userName": "carol@example.com"}
        ]),
    )
}

pub fn queues_response() -> HttpResponse {
    json_response(
        200,
        json!([
            {"id": "q1", "name": "Sales"},
            {"id": "q2", "name": "Support", "description": "Tier 1"}
        ]),
    )
}

// ============================================================================
// Push
// ============================================================================

enum Inbound {
    Frame(Vec<u8>),
    Close,
}

/// Test-side view of one push connection.
pub struct ServerHandle {
    pub url: String,
    pub headers: Vec<(String, String)>,
    inbound: mpsc::UnboundedSender<Inbound>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn send_raw(&self, frame: &[u8]) {
        let _ = self.inbound.send(Inbound::Frame(frame.to_vec()));
    }

    pub fn send_event(&self, event: EventId, payload: Value) {
        let frame = serde_json::to_vec(&Envelope::new(event, payload)).unwrap();
        self.send_raw(&frame);
    }

    /// Peer-initiated close.
    pub fn close(&self) {
        let _ = self.inbound.send(Inbound::Close);
    }

    pub fn pings(&self) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| frame.as_slice() == PING_FRAME.as_bytes())
            .count()
    }

    /// Whether the client closed the channel.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Hands every opened connection to the test as a [`ServerHandle`].
pub struct MockPushConnector {
    servers: mpsc::UnboundedSender<ServerHandle>,
    auto_pong: bool,
    connects: AtomicUsize,
}

impl MockPushConnector {
    /// With `auto_pong`, every ping is answered with a pong frame.
    pub fn new(auto_pong: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerHandle>) {
        let (servers, receiver) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            servers,
            auto_pong,
            connects: AtomicUsize::new(0),
        });
        (connector, receiver)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushConnector for MockPushConnector {
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Box<dyn PushChannel>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let writes = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let _ = self.servers.send(ServerHandle {
            url: url.to_string(),
            headers: headers.to_vec(),
            inbound: inbound_tx.clone(),
            writes: writes.clone(),
            closed: closed.clone(),
        });

        Ok(Box::new(MockChannel {
            inbound: tokio::sync::Mutex::new(inbound_rx),
            loopback: inbound_tx,
            writes,
            closed,
            auto_pong: self.auto_pong,
        }))
    }
}

struct MockChannel {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    loopback: mpsc::UnboundedSender<Inbound>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
    auto_pong: bool,
}

#[async_trait]
impl PushChannel for MockChannel {
    async fn read(&self) -> Result<Vec<u8>> {
        match self.inbound.lock().await.recv().await {
            Some(Inbound::Frame(frame)) => Ok(frame),
            Some(Inbound::Close) | None => Err(Error::ConnectionClosed),
        }
    }

    async fn write(&self, frame: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        self.writes.lock().unwrap().push(frame.to_vec());
        if self.auto_pong && frame == PING_FRAME.as_bytes() {
            let pong = Envelope::new(EventId::PongReceived, json!("pong"));
            let _ = self
                .loopback
                .send(Inbound::Frame(serde_json::to_vec(&pong).unwrap()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.credentials.username = "supervisor@example.com".to_string();
    config.credentials.password = "secret".to_string();
    config.login_base_url = LOGIN_BASE_URL.to_string();
    config
}

pub fn service_with(
    config: ClientConfig,
    transport: Arc<MockTransport>,
    connector: Arc<MockPushConnector>,
) -> Arc<Service> {
    Arc::new(
        Service::builder(config)
            .transport(transport)
            .push_connector(connector)
            .build()
            .unwrap(),
    )
}

pub fn service(transport: Arc<MockTransport>) -> Arc<Service> {
    let (connector, _servers) = MockPushConnector::new(true);
    service_with(test_config(), transport, connector)
}

/// Poll `condition` on virtual time until it holds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
