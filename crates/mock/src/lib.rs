//! Deterministic stand-in for the HTTP transport.
//!
//! [`MockHarness`] runs whole requests through an [`Engine`] the way the
//! server does, with parameters and files set by hand. [`MockContext`] drives
//! a single page one lifecycle step at a time.

mod context;
mod renderer;

use std::sync::Arc;

use engine::{
    lifecycle::LifecycleState, Engine, EngineSettings, Model, Page, PageInstance, PageRegistry,
    RequestOutcome, Session,
};
use serde_json::Value;
use shared::{
    domain::{Method, SessionId},
    protocol::{Request, Response, UploadedFile, ACTING_CONTROL_PARAM, OUT_OF_BAND_PARAM},
};
use tracing::debug;

pub use context::MockContext;
pub use renderer::{RecordingRenderer, RenderCall};

pub struct MockHarness {
    engine: Engine,
    renderer: Arc<RecordingRenderer>,
    session: Session,
    request: Request,
    outcome: Option<RequestOutcome>,
}

impl MockHarness {
    pub fn new(pages: PageRegistry) -> Self {
        Self::with_settings(pages, EngineSettings::default())
    }

    pub fn with_settings(pages: PageRegistry, settings: EngineSettings) -> Self {
        let renderer = Arc::new(RecordingRenderer::default());
        Self {
            engine: Engine::new(pages, renderer.clone(), settings),
            renderer,
            session: Session::new(SessionId::generate()),
            request: Request::default(),
            outcome: None,
        }
    }

    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.request.method = method;
        self
    }

    pub fn set_parameter(&mut self, name: &str, value: &str) -> &mut Self {
        self.request.set_param(name, value);
        self
    }

    pub fn add_parameter(&mut self, name: &str, value: &str) -> &mut Self {
        self.request.add_param(name, value);
        self
    }

    pub fn set_file(&mut self, name: &str, file: UploadedFile) -> &mut Self {
        self.request.files.insert(name.to_string(), file);
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.request.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn set_context_path(&mut self, context_path: &str) -> &mut Self {
        self.request.context_path = context_path.to_string();
        self
    }

    /// Names the control that triggered the submission.
    pub fn set_acting_control(&mut self, name: &str) -> &mut Self {
        self.set_parameter(ACTING_CONTROL_PARAM, name)
    }

    pub fn set_out_of_band(&mut self, out_of_band: bool) -> &mut Self {
        self.request.out_of_band = out_of_band;
        if out_of_band {
            self.request.set_param(OUT_OF_BAND_PARAM, "true");
        } else {
            self.request.params.remove(OUT_OF_BAND_PARAM);
        }
        self
    }

    pub fn set_session_attribute(&mut self, name: &str, value: Value) -> &mut Self {
        self.session.set_attribute(name, value);
        self
    }

    pub fn session_attribute(&self, name: &str) -> Option<&Value> {
        self.session.attribute(name)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Runs the pending request against `path`. Parameters, files and the
    /// method are reset afterwards; the session is kept.
    pub fn test_page(&mut self, path: &str) -> &Response {
        let mut request = std::mem::take(&mut self.request);
        request.path = path.to_string();
        debug!(
            %path,
            method = request.method.as_str(),
            params = request.params.len(),
            "mock request"
        );

        let outcome = self.engine.handle(request, &mut self.session);
        &self.outcome.insert(outcome).response
    }

    pub fn outcome(&self) -> Option<&RequestOutcome> {
        self.outcome.as_ref()
    }

    pub fn response(&self) -> Option<&Response> {
        self.outcome.as_ref().map(|outcome| &outcome.response)
    }

    pub fn status(&self) -> Option<u16> {
        self.response().map(|response| response.status)
    }

    /// Body of the last response unless it was a redirect.
    pub fn html(&self) -> Option<&str> {
        self.response()
            .filter(|response| !response.is_redirect())
            .map(|response| response.body.as_str())
    }

    /// First page the last request was forwarded to.
    pub fn forward(&self) -> Option<&str> {
        self.outcome
            .as_ref()
            .and_then(|outcome| outcome.trail.get(1))
            .map(|trace| trace.path.as_str())
    }

    pub fn redirect(&self) -> Option<&str> {
        self.response().and_then(|response| response.location.as_deref())
    }

    pub fn states(&self, page: usize) -> &[LifecycleState] {
        self.outcome
            .as_ref()
            .and_then(|outcome| outcome.trail.get(page))
            .map_or(&[], |trace| trace.states.as_slice())
    }

    pub fn renderer(&self) -> &RecordingRenderer {
        &self.renderer
    }

    /// Model handed to the last template render.
    pub fn model(&self) -> Option<Model> {
        self.renderer.last().map(|call| call.model)
    }

    /// Stateful page kept in the session for `path`.
    pub fn page<P: Page>(&self, path: &str) -> Option<&PageInstance<P>> {
        self.session.page::<P>(path)
    }
}
