//! Per-page request lifecycle.
//!
//! `Init -> Bind -> Dispatch -> {Rendering | Forwarded | Redirected} ->
//! Destroyed`. `Forwarded` and `Redirected` may also be entered from `Init`
//! when the security check or `on_init` navigates, and any state may move
//! straight to `Destroyed` when processing stops.

use std::{any::Any, fmt, sync::Arc};

use serde::Serialize;
use serde_json::{json, Value};
use shared::{
    error::EngineError,
    protocol::{Navigation, Request, Response},
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    behavior::Behavior,
    context::{InitScope, RequestContext},
    control::{ControlNode, ControlPath},
    dispatcher::{DispatchOutcome, EventDispatcher},
    engine::TemplateRenderer,
    head::{self, HeadElement},
    page::{Model, Page, PageHandle, PageOutcome},
    property,
    registry::ControlRegistry,
};

/// Model keys the engine fills before the page adds its own entries.
pub const RESERVED_MODEL_KEYS: [&str; 4] = ["path", "context", "messages", "head_elements"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Init,
    Bind,
    Dispatch,
    Rendering,
    Forwarded,
    Redirected,
    Destroyed,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Init => "init",
            LifecycleState::Bind => "bind",
            LifecycleState::Dispatch => "dispatch",
            LifecycleState::Rendering => "rendering",
            LifecycleState::Forwarded => "forwarded",
            LifecycleState::Redirected => "redirected",
            LifecycleState::Destroyed => "destroyed",
        }
    }

    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Init, Bind | Forwarded | Redirected) => true,
            (Bind, Dispatch | Forwarded | Redirected) => true,
            (Dispatch, Rendering | Forwarded | Redirected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a lifecycle step decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    Navigate(Navigation),
    /// A listener or interceptor returned `false` without navigating.
    Halt,
}

/// A page plus its control tree and the state of the current request.
pub struct PageInstance<P: Page> {
    page: P,
    root: ControlNode<P>,
    registry: Option<ControlRegistry<P>>,
    state: Option<LifecycleState>,
    history: Vec<LifecycleState>,
    processed: Vec<ControlPath>,
    dispatch: Option<DispatchOutcome>,
}

impl<P: Page> PageInstance<P> {
    pub fn new(mut page: P) -> Self {
        let mut root = ControlNode::root();
        page.build(&mut root);
        Self {
            page,
            root,
            registry: None,
            state: None,
            history: Vec::new(),
            processed: Vec::new(),
            dispatch: None,
        }
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut P {
        &mut self.page
    }

    pub fn root(&self) -> &ControlNode<P> {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut ControlNode<P> {
        &mut self.root
    }

    /// The registry of the request in flight; `None` outside a request.
    pub fn registry(&self) -> Option<&ControlRegistry<P>> {
        self.registry.as_ref()
    }

    pub fn state(&self) -> Option<LifecycleState> {
        self.state
    }

    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    pub fn dispatch_outcome(&self) -> Option<&DispatchOutcome> {
        self.dispatch.as_ref()
    }

    /// Clears per-request state so the instance can serve a new request.
    pub fn begin(&mut self) {
        self.registry = None;
        self.state = None;
        self.history.clear();
        self.processed.clear();
        self.dispatch = None;
        self.root.reset_initialized();
    }

    fn transition(&mut self, next: LifecycleState) -> Result<(), EngineError> {
        let allowed = match self.state {
            None => next == LifecycleState::Init,
            Some(current) => current.can_transition_to(next),
        };
        if !allowed {
            return Err(EngineError::IllegalTransition {
                from: self.state.map_or("new", LifecycleState::as_str),
                to: next.as_str(),
            });
        }
        debug!(
            from = self.state.map_or("new", LifecycleState::as_str),
            to = next.as_str(),
            "lifecycle transition"
        );
        self.state = Some(next);
        self.history.push(next);
        Ok(())
    }

    fn navigate(&mut self, cx: &mut RequestContext) -> Result<Option<Step>, EngineError> {
        let Some(navigation) = cx.take_navigation() else {
            return Ok(None);
        };
        let next = match navigation {
            Navigation::Forward { .. } => LifecycleState::Forwarded,
            Navigation::Redirect { .. } => LifecycleState::Redirected,
        };
        self.transition(next)?;
        Ok(Some(Step::Navigate(navigation)))
    }

    /// Security check, `on_init` and the control initializers.
    pub fn init(&mut self, cx: &mut RequestContext) -> Result<Step, EngineError> {
        self.transition(LifecycleState::Init)?;
        self.registry = Some(ControlRegistry::new());

        if !self.page.on_security_check(cx)? {
            info!(path = cx.path(), "security check vetoed the request");
            if cx.navigation().is_none() {
                let denied = cx.settings().access_denied_path.clone();
                cx.forward(denied);
            }
        }
        if let Some(step) = self.navigate(cx)? {
            return Ok(step);
        }

        {
            let registry = self.registry.get_or_insert_with(ControlRegistry::new);
            let mut scope = InitScope { cx: &mut *cx, registry };
            self.page.on_init(&mut self.root, &mut scope)?;
        }
        self.run_initializers(cx)?;

        Ok(self.navigate(cx)?.unwrap_or(Step::Continue))
    }

    // Runs pending initializers until a pass adds no new controls.
    fn run_initializers(&mut self, cx: &mut RequestContext) -> Result<(), EngineError> {
        let limit = cx.settings().init_pass_limit;
        let registry = self.registry.get_or_insert_with(ControlRegistry::new);

        for pass in 0..limit {
            let pending: Vec<ControlPath> = self
                .root
                .descendants()
                .filter(|node| !node.is_initialized())
                .map(|node| node.path().clone())
                .collect();
            if pending.is_empty() {
                trace!(passes = pass, "control tree settled");
                return Ok(());
            }

            for path in pending {
                let Some(node) = self.root.at_mut(&path) else {
                    continue;
                };
                if node.is_initialized() {
                    continue;
                }
                node.mark_initialized();
                if let Some(initializer) = node.initializer() {
                    let mut scope = InitScope {
                        cx: &mut *cx,
                        registry: &mut *registry,
                    };
                    initializer(node, &mut scope)?;
                }
            }
        }

        if self.root.descendants().any(|node| !node.is_initialized()) {
            warn!(passes = limit, controls = self.root.count(), "control tree still growing");
            return Err(EngineError::InitLimit { passes: limit });
        }
        Ok(())
    }

    /// Pulls request values into every field. Forwarded requests keep the
    /// values of the previous page and skip this work.
    pub fn bind(&mut self, cx: &mut RequestContext) -> Result<Step, EngineError> {
        self.transition(LifecycleState::Bind)?;
        self.processed = self
            .root
            .descendants()
            .map(|node| node.path().clone())
            .collect();

        if cx.is_forwarded() {
            trace!(path = cx.path(), "forwarded request, skipping bind");
            return Ok(Step::Continue);
        }

        let request = cx.request();
        for (name, values) in &request.params {
            trace!(%name, ?values, "request parameter");
        }

        let fields: Vec<ControlPath> = self
            .root
            .collect_fields_recursive()
            .map(|node| node.path().clone())
            .collect();
        for path in fields {
            let validate = submission_scope(&self.root, &path, request);
            let Some(node) = self.root.at_mut(&path) else {
                continue;
            };
            property::validate_path(node.name())?;
            let label = node.label();
            let name = node.name().to_string();
            if let Some(field) = node.field_mut() {
                field.bind(request.param(&name), request.file(&name));
                if validate {
                    field.validate(&label);
                }
            }
        }

        if request.is_out_of_band() {
            let registry = self.registry.get_or_insert_with(ControlRegistry::new);
            for path in &self.processed {
                if self.root.at(path).is_some_and(|node| !node.behaviors().is_empty()) {
                    registry.register_ajax_target_path(path.clone());
                }
            }
        }

        Ok(Step::Continue)
    }

    /// Fires the acting control and interceptors, then `on_get`/`on_post`
    /// when processing continues.
    pub fn dispatch(&mut self, cx: &mut RequestContext) -> Result<Step, EngineError> {
        self.transition(LifecycleState::Dispatch)?;

        let outcome = if cx.is_forwarded() {
            DispatchOutcome::passthrough()
        } else {
            let registry = self.registry.get_or_insert_with(ControlRegistry::new);
            EventDispatcher::new(&self.processed).dispatch(
                &mut self.page,
                &mut self.root,
                registry,
                cx,
            )?
        };
        let keep = outcome.continue_processing;
        let partial = outcome.partial.is_some();
        self.dispatch = Some(outcome);

        if partial {
            return Ok(self.navigate(cx)?.unwrap_or(Step::Continue));
        }

        if keep && cx.navigation().is_none() {
            if cx.request().is_post() {
                self.page.on_post(&mut self.root, cx)?;
            } else {
                self.page.on_get(&mut self.root, cx)?;
            }
        }

        if let Some(step) = self.navigate(cx)? {
            return Ok(step);
        }
        if !keep {
            debug!(path = cx.path(), "page halted by listener");
            return Ok(Step::Halt);
        }
        Ok(Step::Continue)
    }

    /// Produces the response: the out-of-band partial, a response the page
    /// set directly, or the page template merged with the model.
    pub fn render(
        &mut self,
        cx: &mut RequestContext,
        renderer: &dyn TemplateRenderer,
    ) -> Result<Response, EngineError> {
        self.transition(LifecycleState::Rendering)?;

        if let Some(partial) = self.dispatch.as_mut().and_then(|outcome| outcome.partial.take()) {
            return Ok(Response::partial(partial));
        }
        if let Some(response) = cx.take_response() {
            return Ok(response);
        }

        let model = self.build_model(cx)?;
        let template = self
            .page
            .template()
            .unwrap_or_else(|| template_for_path(cx.path()));
        debug!(%template, keys = model.len(), "rendering template");

        let body = renderer.render(&template, &model).map_err(|err| {
            error!(%template, %err, "template rendering failed");
            err
        })?;
        let mut response = Response::html(200, body);
        response.content_type = self.page.content_type().to_string();
        Ok(response)
    }

    /// The model handed to the template: reserved entries, one snapshot per
    /// top-level control, then whatever the page adds.
    pub fn build_model(&mut self, cx: &mut RequestContext) -> Result<Model, EngineError> {
        let head_elements: Vec<Value> = self
            .collect_head_elements()
            .iter()
            .map(|element| Value::String(element.to_html()))
            .collect();

        let mut model = Model::new();
        model.insert("path".into(), json!(cx.path()));
        model.insert("context".into(), json!(cx.request().context_path));
        model.insert("messages".into(), json!(cx.messages()));
        model.insert("head_elements".into(), Value::Array(head_elements));
        for control in self.root.children() {
            model.insert(control.name().to_string(), control.snapshot());
        }

        let mut page_model = Model::new();
        self.page.on_render(&self.root, &mut page_model, cx)?;
        for (key, value) in page_model {
            if RESERVED_MODEL_KEYS.contains(&key.as_str()) || model.contains_key(&key) {
                warn!(%key, "page model entry replaces a reserved key");
            }
            model.insert(key, value);
        }
        Ok(model)
    }

    /// Head elements from controls, their behaviors and the page. Each
    /// behavior instance is asked once even when shared.
    pub fn collect_head_elements(&self) -> Vec<HeadElement> {
        let mut elements = Vec::new();
        for element in self.page.head_elements() {
            head::push_unique(&mut elements, element);
        }

        let mut seen: Vec<Arc<dyn Behavior<P>>> = Vec::new();
        for node in self.root.descendants() {
            for element in node.head_elements() {
                head::push_unique(&mut elements, element.clone());
            }
            for behavior in node.behaviors() {
                if remember(&mut seen, behavior) {
                    behavior.pre_render_head_elements(node, &mut elements);
                }
            }
        }

        if let Some(registry) = &self.registry {
            for interceptor in registry.interceptors() {
                let Some(node) = self.root.at(&interceptor.source) else {
                    continue;
                };
                if remember(&mut seen, &interceptor.behavior) {
                    interceptor.behavior.pre_render_head_elements(node, &mut elements);
                }
            }
        }
        elements
    }

    /// Best-effort teardown: every behavior and the page are asked to clean
    /// up, failures are logged, and the registry is released.
    pub fn destroy(&mut self, cx: &mut RequestContext) {
        if matches!(self.state, None | Some(LifecycleState::Destroyed)) {
            return;
        }
        if let Err(err) = self.transition(LifecycleState::Destroyed) {
            error!(%err, "cannot enter destroyed state");
        }

        let mut seen: Vec<Arc<dyn Behavior<P>>> = Vec::new();
        for node in self.root.descendants() {
            for behavior in node.behaviors() {
                if remember(&mut seen, behavior) {
                    if let Err(err) = behavior.pre_destroy(node.path()) {
                        error!(control = %node.path(), %err, "behavior teardown failed");
                    }
                }
            }
        }
        if let Some(registry) = self.registry.take() {
            for interceptor in registry.interceptors() {
                if remember(&mut seen, &interceptor.behavior) {
                    if let Err(err) = interceptor.behavior.pre_destroy(&interceptor.source) {
                        error!(control = %interceptor.source, %err, "interceptor teardown failed");
                    }
                }
            }
        }

        if let Err(err) = self.page.on_destroy(cx) {
            error!(path = cx.path(), %err, "page teardown failed");
        }
    }

    /// Runs init through render, stopping at the first navigation or halt.
    pub fn process(
        &mut self,
        cx: &mut RequestContext,
        renderer: &dyn TemplateRenderer,
    ) -> Result<PageOutcome, EngineError> {
        self.begin();

        for phase in [Phase::Init, Phase::Bind, Phase::Dispatch] {
            let step = match phase {
                Phase::Init => self.init(cx)?,
                Phase::Bind => self.bind(cx)?,
                Phase::Dispatch => self.dispatch(cx)?,
            };
            match step {
                Step::Continue => {}
                Step::Navigate(Navigation::Forward { path }) => {
                    return Ok(PageOutcome::Forward(path))
                }
                Step::Navigate(Navigation::Redirect { location }) => {
                    return Ok(PageOutcome::Redirect(location))
                }
                Step::Halt => {
                    let response = cx.take_response().unwrap_or_else(|| Response::html(200, ""));
                    return Ok(PageOutcome::Response(response));
                }
            }
        }

        self.render(cx, renderer).map(PageOutcome::Response)
    }
}

enum Phase {
    Init,
    Bind,
    Dispatch,
}

impl<P: Page> PageHandle for PageInstance<P> {
    fn process(
        &mut self,
        cx: &mut RequestContext,
        renderer: &dyn TemplateRenderer,
    ) -> Result<PageOutcome, EngineError> {
        PageInstance::process(self, cx, renderer)
    }

    fn destroy(&mut self, cx: &mut RequestContext) {
        PageInstance::destroy(self, cx);
    }

    fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    fn is_stateful(&self) -> bool {
        self.page.is_stateful()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn remember<P>(seen: &mut Vec<Arc<dyn Behavior<P>>>, behavior: &Arc<dyn Behavior<P>>) -> bool {
    if seen.iter().any(|known| Arc::ptr_eq(known, behavior)) {
        return false;
    }
    seen.push(Arc::clone(behavior));
    true
}

// Fields inside a form validate only when that form was submitted; loose
// fields validate on any POST.
fn submission_scope<P>(root: &ControlNode<P>, path: &ControlPath, request: &Request) -> bool {
    let mut cursor = path.parent();
    while let Some(ancestor) = cursor {
        if let Some(node) = root.at(&ancestor) {
            if node.is_form() {
                return node.is_form_submission(request);
            }
        }
        cursor = ancestor.parent();
    }
    request.is_post()
}

/// `/customer/edit` renders `customer/edit`; `/` renders `index`.
pub fn template_for_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "index".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
#[path = "tests/lifecycle_tests.rs"]
mod tests;
