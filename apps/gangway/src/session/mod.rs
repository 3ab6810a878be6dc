//! Session connector: talks to the gateway control API to allocate a session
//! (with the optional step-up-authentication detour) and assembles the
//! transport connect parameters. Transport-level failures after connect are
//! the controllers' concern, not this module's.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Base DPI of an unscaled display. Structured-instruction sessions always
/// connect at twice this so high-density viewports render crisply.
pub const BASE_DPI: u32 = 96;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    base_url: Url,
    auth_token: Option<String>,
}

impl GatewayConfig {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, SessionError> {
        let mut base = base_url.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(SessionError::InvalidConfig(
                "gateway base url cannot be empty".into(),
            ));
        }
        if !base.contains("://") {
            base = format!("{}{}", infer_scheme(&base), base);
        }
        let parsed = Url::parse(&base)
            .map_err(|err| SessionError::InvalidConfig(format!("invalid gateway url: {err}")))?;
        Ok(Self {
            base_url: parsed,
            auth_token: None,
        })
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }
}

fn infer_scheme(base: &str) -> &'static str {
    let host = base
        .split('/')
        .next()
        .unwrap_or(base)
        .to_ascii_lowercase();
    if host.starts_with("localhost") || host.starts_with("127.") || host == "::1" {
        "http://"
    } else {
        "https://"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolClass {
    CharacterStream,
    StructuredInstruction,
}

/// An allocated session. Immutable once created; discarded when the transport
/// closes for good or the owning view unmounts.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub protocol: ProtocolClass,
    /// Seconds of local inactivity tolerated before the client closes the
    /// transport. Non-positive disables idle enforcement.
    pub idle_budget_secs: i64,
    /// Pinned display size; when set, client-driven resize is disabled.
    pub fixed_geometry: Option<(u32, u32)>,
    pub watermark: bool,
    pub clipboard_enabled: bool,
}

impl Session {
    pub fn idle_budget(&self) -> Option<Duration> {
        (self.idle_budget_secs > 0).then(|| Duration::from_secs(self.idle_budget_secs as u64))
    }
}

/// Outcome of an allocation attempt: either a session, or a deferral because
/// policy demands interactive step-up authentication first.
#[derive(Debug)]
pub enum Allocation {
    Ready(Session),
    StepUpRequired(StepUpChallenge),
}

#[derive(Debug, Clone)]
pub struct StepUpChallenge {
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width_px: u32,
    pub height_px: u32,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Geometry {
    Grid { cols: u16, rows: u16 },
    Pixels { width: u32, height: u32, dpi: u32 },
}

#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub session_id: String,
    pub token: String,
    pub geometry: Geometry,
}

impl ConnectParams {
    /// Render the parameters onto the gateway's tunnel endpoint, switching to
    /// the matching WebSocket scheme.
    pub fn websocket_url(&self, base: &Url) -> Result<Url, SessionError> {
        let mut url = base
            .join("tunnel")
            .map_err(|err| SessionError::InvalidConfig(format!("invalid tunnel url: {err}")))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| SessionError::InvalidConfig("cannot derive websocket scheme".into()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("session", &self.session_id);
            query.append_pair("token", &self.token);
            match &self.geometry {
                Geometry::Grid { cols, rows } => {
                    query.append_pair("cols", &cols.to_string());
                    query.append_pair("rows", &rows.to_string());
                }
                Geometry::Pixels { width, height, dpi } => {
                    query.append_pair("width", &width.to_string());
                    query.append_pair("height", &height.to_string());
                    query.append_pair("dpi", &dpi.to_string());
                }
            }
        }
        Ok(url)
    }
}

#[derive(Clone)]
pub struct SessionClient {
    config: Arc<GatewayConfig>,
    backend: Arc<dyn GatewayBackend>,
}

impl SessionClient {
    pub fn new(config: GatewayConfig) -> Result<Self, SessionError> {
        let backend = Arc::new(ReqwestGatewayBackend::new()?);
        Ok(Self {
            config: Arc::new(config),
            backend,
        })
    }

    #[cfg(test)]
    fn with_backend(config: GatewayConfig, backend: Arc<dyn GatewayBackend>) -> Self {
        Self {
            config: Arc::new(config),
            backend,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Ask the gateway's policy endpoint whether interactive step-up
    /// authentication must precede allocation for this target.
    pub async fn requires_step_up(&self, target: &str) -> Result<bool, SessionError> {
        let response = self
            .backend
            .step_up_required(self.config.base_url(), self.config.auth_token(), target)
            .await?;
        Ok(response.required)
    }

    /// Allocate a session for `target`. When step-up is required and no token
    /// was supplied, allocation is deferred and a challenge surfaced instead
    /// of calling the allocation endpoint; on challenge success the caller
    /// retries with the obtained token. Allocation failure aborts the connect
    /// attempt; there is no automatic retry.
    pub async fn allocate(
        &self,
        target: &str,
        step_up_token: Option<&str>,
    ) -> Result<Allocation, SessionError> {
        if step_up_token.is_none() && self.requires_step_up(target).await? {
            debug!(target: "gangway::session", asset = %target, "step-up required, deferring allocation");
            return Ok(Allocation::StepUpRequired(StepUpChallenge {
                target: target.to_string(),
            }));
        }

        let request = CreateSessionRequest {
            target: target.to_string(),
            step_up_token: step_up_token.map(str::to_string),
        };
        let response = self
            .backend
            .create_session(self.config.base_url(), self.config.auth_token(), &request)
            .await?;

        if !response.success {
            let message = response
                .message
                .unwrap_or_else(|| "session allocation failed".to_string());
            return Err(SessionError::Server(message));
        }

        let id = response
            .session_id
            .ok_or_else(|| SessionError::InvalidResponse("missing session id".into()))?;
        let protocol = match response.protocol.as_deref() {
            Some("character-stream") => ProtocolClass::CharacterStream,
            Some("structured-instruction") => ProtocolClass::StructuredInstruction,
            other => {
                return Err(SessionError::InvalidResponse(format!(
                    "unknown protocol class {other:?}"
                )));
            }
        };
        let fixed_geometry = match (response.fixed_width, response.fixed_height) {
            (Some(width), Some(height)) => Some((width, height)),
            _ => None,
        };

        let session = Session {
            id,
            protocol,
            idle_budget_secs: response.idle_budget_secs,
            fixed_geometry,
            watermark: response.watermark,
            clipboard_enabled: response.clipboard_enabled,
        };
        debug!(
            target: "gangway::session",
            session_id = %session.id,
            protocol = ?session.protocol,
            idle_budget = session.idle_budget_secs,
            "session allocated"
        );
        Ok(Allocation::Ready(session))
    }

    /// Assemble transport connect parameters: geometry from the current
    /// viewport or, when the session pins a fixed geometry, from that pin;
    /// doubled DPI for structured-instruction sessions; the caller's auth
    /// token; the session id.
    pub fn connect_params(&self, session: &Session, viewport: Viewport) -> ConnectParams {
        let geometry = match session.protocol {
            ProtocolClass::CharacterStream => Geometry::Grid {
                cols: viewport.cols,
                rows: viewport.rows,
            },
            ProtocolClass::StructuredInstruction => {
                let (width, height) = session
                    .fixed_geometry
                    .unwrap_or((viewport.width_px, viewport.height_px));
                Geometry::Pixels {
                    width,
                    height,
                    dpi: BASE_DPI * 2,
                }
            }
        };
        ConnectParams {
            session_id: session.id.clone(),
            token: self.config.auth_token().unwrap_or_default().to_string(),
            geometry,
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid gateway configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("gateway rejected request: {0}")]
    Server(String),
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
trait GatewayBackend: Send + Sync {
    async fn step_up_required(
        &self,
        base_url: &Url,
        auth_token: Option<&str>,
        target: &str,
    ) -> Result<StepUpRequiredResponse, SessionError>;

    async fn create_session(
        &self,
        base_url: &Url,
        auth_token: Option<&str>,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, SessionError>;
}

struct ReqwestGatewayBackend {
    client: reqwest::Client,
}

impl ReqwestGatewayBackend {
    fn new() -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(8))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl GatewayBackend for ReqwestGatewayBackend {
    async fn step_up_required(
        &self,
        base_url: &Url,
        auth_token: Option<&str>,
        target: &str,
    ) -> Result<StepUpRequiredResponse, SessionError> {
        let mut endpoint = base_url.join("step-up/required").map_err(|err| {
            SessionError::InvalidConfig(format!("invalid step-up endpoint: {err}"))
        })?;
        endpoint.query_pairs_mut().append_pair("target", target);
        let mut builder = self.client.get(endpoint);
        if let Some(token) = auth_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(SessionError::HttpStatus(response.status()));
        }
        Ok(response.json::<StepUpRequiredResponse>().await?)
    }

    async fn create_session(
        &self,
        base_url: &Url,
        auth_token: Option<&str>,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, SessionError> {
        let endpoint = base_url.join("sessions").map_err(|err| {
            SessionError::InvalidConfig(format!("invalid sessions endpoint: {err}"))
        })?;
        let mut builder = self.client.post(endpoint);
        if let Some(token) = auth_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.json(request).send().await?;
        if !response.status().is_success() {
            return Err(SessionError::HttpStatus(response.status()));
        }
        Ok(response.json::<CreateSessionResponse>().await?)
    }
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest {
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    step_up_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StepUpRequiredResponse {
    required: bool,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    idle_budget_secs: i64,
    #[serde(default)]
    fixed_width: Option<u32>,
    #[serde(default)]
    fixed_height: Option<u32>,
    #[serde(default)]
    watermark: bool,
    #[serde(default)]
    clipboard_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockGatewayBackend {
        step_up: bool,
        create_calls: Mutex<Vec<CreateSessionRequest>>,
        step_up_calls: Mutex<Vec<String>>,
        response: fn() -> CreateSessionResponse,
    }

    impl MockGatewayBackend {
        fn new(step_up: bool, response: fn() -> CreateSessionResponse) -> Self {
            Self {
                step_up,
                create_calls: Mutex::new(Vec::new()),
                step_up_calls: Mutex::new(Vec::new()),
                response,
            }
        }
    }

    fn ok_response() -> CreateSessionResponse {
        CreateSessionResponse {
            success: true,
            message: None,
            session_id: Some("sess-42".into()),
            protocol: Some("character-stream".into()),
            idle_budget_secs: 300,
            fixed_width: None,
            fixed_height: None,
            watermark: false,
            clipboard_enabled: true,
        }
    }

    #[async_trait]
    impl GatewayBackend for MockGatewayBackend {
        async fn step_up_required(
            &self,
            _base_url: &Url,
            _auth_token: Option<&str>,
            target: &str,
        ) -> Result<StepUpRequiredResponse, SessionError> {
            self.step_up_calls.lock().unwrap().push(target.to_string());
            Ok(StepUpRequiredResponse {
                required: self.step_up,
            })
        }

        async fn create_session(
            &self,
            _base_url: &Url,
            _auth_token: Option<&str>,
            request: &CreateSessionRequest,
        ) -> Result<CreateSessionResponse, SessionError> {
            self.create_calls.lock().unwrap().push(CreateSessionRequest {
                target: request.target.clone(),
                step_up_token: request.step_up_token.clone(),
            });
            Ok((self.response)())
        }
    }

    fn client_with(backend: Arc<MockGatewayBackend>) -> SessionClient {
        let config = GatewayConfig::new("gateway.example.com")
            .unwrap()
            .with_auth_token(Some("tok-1".into()));
        SessionClient::with_backend(config, backend)
    }

    #[tokio::test]
    async fn step_up_defers_allocation_then_retries_with_token() {
        let backend = Arc::new(MockGatewayBackend::new(true, ok_response));
        let client = client_with(backend.clone());

        let first = client.allocate("asset-1", None).await.unwrap();
        let challenge = match first {
            Allocation::StepUpRequired(challenge) => challenge,
            Allocation::Ready(_) => panic!("expected step-up deferral"),
        };
        assert_eq!(challenge.target, "asset-1");
        assert!(backend.create_calls.lock().unwrap().is_empty());

        let retry = client.allocate("asset-1", Some("otp-999")).await.unwrap();
        assert!(matches!(retry, Allocation::Ready(_)));
        let calls = backend.create_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].step_up_token.as_deref(), Some("otp-999"));
    }

    #[tokio::test]
    async fn allocation_without_step_up_skips_challenge() {
        let backend = Arc::new(MockGatewayBackend::new(false, ok_response));
        let client = client_with(backend.clone());

        let allocation = client.allocate("asset-2", None).await.unwrap();
        let session = match allocation {
            Allocation::Ready(session) => session,
            Allocation::StepUpRequired(_) => panic!("unexpected challenge"),
        };
        assert_eq!(session.id, "sess-42");
        assert_eq!(session.protocol, ProtocolClass::CharacterStream);
        assert_eq!(session.idle_budget(), Some(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn server_rejection_surfaces_inline() {
        fn rejected() -> CreateSessionResponse {
            CreateSessionResponse {
                success: false,
                message: Some("asset offline".into()),
                ..ok_response()
            }
        }
        let backend = Arc::new(MockGatewayBackend::new(false, rejected));
        let client = client_with(backend);
        let err = client.allocate("asset-3", None).await.unwrap_err();
        assert!(matches!(err, SessionError::Server(msg) if msg == "asset offline"));
    }

    #[test]
    fn non_positive_idle_budget_disables_enforcement() {
        let mut session = sample_session(ProtocolClass::CharacterStream);
        session.idle_budget_secs = 0;
        assert_eq!(session.idle_budget(), None);
        session.idle_budget_secs = -5;
        assert_eq!(session.idle_budget(), None);
    }

    fn sample_session(protocol: ProtocolClass) -> Session {
        Session {
            id: "sess-7".into(),
            protocol,
            idle_budget_secs: 60,
            fixed_geometry: None,
            watermark: false,
            clipboard_enabled: true,
        }
    }

    fn sample_viewport() -> Viewport {
        Viewport {
            width_px: 1280,
            height_px: 800,
            cols: 80,
            rows: 24,
        }
    }

    #[tokio::test]
    async fn connect_params_use_grid_geometry_for_character_stream() {
        let backend = Arc::new(MockGatewayBackend::new(false, ok_response));
        let client = client_with(backend);
        let params =
            client.connect_params(&sample_session(ProtocolClass::CharacterStream), sample_viewport());
        assert_eq!(params.geometry, Geometry::Grid { cols: 80, rows: 24 });
        let url = params
            .websocket_url(client.config().base_url())
            .unwrap();
        assert_eq!(url.scheme(), "wss");
        let query = url.query().unwrap();
        assert!(query.contains("session=sess-7"));
        assert!(query.contains("token=tok-1"));
        assert!(query.contains("cols=80"));
        assert!(query.contains("rows=24"));
    }

    #[tokio::test]
    async fn connect_params_double_dpi_and_honor_pinned_geometry() {
        let backend = Arc::new(MockGatewayBackend::new(false, ok_response));
        let client = client_with(backend);

        let mut session = sample_session(ProtocolClass::StructuredInstruction);
        let params = client.connect_params(&session, sample_viewport());
        assert_eq!(
            params.geometry,
            Geometry::Pixels {
                width: 1280,
                height: 800,
                dpi: 192
            }
        );

        session.fixed_geometry = Some((1024, 768));
        let params = client.connect_params(&session, sample_viewport());
        assert_eq!(
            params.geometry,
            Geometry::Pixels {
                width: 1024,
                height: 768,
                dpi: 192
            }
        );
    }

    #[test]
    fn create_session_request_omits_absent_step_up_token() {
        let request = CreateSessionRequest {
            target: "asset-9".into(),
            step_up_token: None,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body, serde_json::json!({ "target": "asset-9" }));

        let request = CreateSessionRequest {
            target: "asset-9".into(),
            step_up_token: Some("otp-1".into()),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "target": "asset-9", "step_up_token": "otp-1" })
        );
    }

    #[test]
    fn gateway_config_infers_scheme() {
        let config = GatewayConfig::new("gateway.example.com").unwrap();
        assert_eq!(config.base_url().scheme(), "https");
        let config = GatewayConfig::new("localhost:8088").unwrap();
        assert_eq!(config.base_url().scheme(), "http");
    }
}
