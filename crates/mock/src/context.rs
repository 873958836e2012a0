use std::sync::Arc;

use engine::{
    ControlNode, ControlRegistry, EngineError, EngineSettings, LifecycleState, Page, PageInstance,
    RequestContext, Step,
};
use shared::protocol::{Navigation, Request, Response};

use crate::renderer::RecordingRenderer;

/// One page driven step by step through its lifecycle, for tests that need
/// to look at the tree between phases.
pub struct MockContext<P: Page> {
    instance: PageInstance<P>,
    cx: RequestContext,
    renderer: Arc<RecordingRenderer>,
    navigation: Option<Navigation>,
}

impl<P: Page> MockContext<P> {
    pub fn new(page: P, request: Request) -> Self {
        Self::with_settings(page, request, EngineSettings::default())
    }

    pub fn with_settings(page: P, request: Request, settings: EngineSettings) -> Self {
        Self {
            instance: PageInstance::new(page),
            cx: RequestContext::new(request, Arc::new(settings)),
            renderer: Arc::new(RecordingRenderer::default()),
            navigation: None,
        }
    }

    /// Starts a new request on the same page instance, as a stateful page
    /// would see it.
    pub fn next_request(&mut self, request: Request) {
        let settings = Arc::new(self.cx.settings().clone());
        self.cx = RequestContext::new(request, settings);
        self.navigation = None;
        self.instance.begin();
    }

    pub fn init(&mut self) -> Result<Step, EngineError> {
        let step = self.instance.init(&mut self.cx)?;
        Ok(self.record(step))
    }

    pub fn bind(&mut self) -> Result<Step, EngineError> {
        let step = self.instance.bind(&mut self.cx)?;
        Ok(self.record(step))
    }

    /// The Dispatch phase: fires the acting control's listener, the
    /// interceptors and `on_get`/`on_post`.
    pub fn execute_action_listeners(&mut self) -> Result<Step, EngineError> {
        let step = self.instance.dispatch(&mut self.cx)?;
        Ok(self.record(step))
    }

    pub fn render(&mut self) -> Result<Response, EngineError> {
        self.instance.render(&mut self.cx, self.renderer.as_ref())
    }

    pub fn destroy(&mut self) {
        self.instance.destroy(&mut self.cx);
    }

    /// Init, Bind and Dispatch in order, stopping early like the engine does.
    pub fn run_to_render(&mut self) -> Result<Step, EngineError> {
        let step = self.init()?;
        if step != Step::Continue {
            return Ok(step);
        }
        let step = self.bind()?;
        if step != Step::Continue {
            return Ok(step);
        }
        self.execute_action_listeners()
    }

    pub fn forward(&self) -> Option<&str> {
        match &self.navigation {
            Some(Navigation::Forward { path }) => Some(path),
            _ => None,
        }
    }

    pub fn redirect(&self) -> Option<&str> {
        match &self.navigation {
            Some(Navigation::Redirect { location }) => Some(location),
            _ => None,
        }
    }

    pub fn page(&self) -> &P {
        self.instance.page()
    }

    pub fn page_mut(&mut self) -> &mut P {
        self.instance.page_mut()
    }

    pub fn root(&self) -> &ControlNode<P> {
        self.instance.root()
    }

    pub fn root_mut(&mut self) -> &mut ControlNode<P> {
        self.instance.root_mut()
    }

    pub fn registry(&self) -> Option<&ControlRegistry<P>> {
        self.instance.registry()
    }

    pub fn state(&self) -> Option<LifecycleState> {
        self.instance.state()
    }

    pub fn instance(&self) -> &PageInstance<P> {
        &self.instance
    }

    pub fn context(&self) -> &RequestContext {
        &self.cx
    }

    pub fn context_mut(&mut self) -> &mut RequestContext {
        &mut self.cx
    }

    pub fn renderer(&self) -> &RecordingRenderer {
        &self.renderer
    }

    fn record(&mut self, step: Step) -> Step {
        if let Step::Navigate(navigation) = &step {
            self.navigation = Some(navigation.clone());
        }
        step
    }
}
