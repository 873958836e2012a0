use std::{any::Any, collections::BTreeMap, sync::Arc};

use serde_json::{Map, Value};
use shared::{error::EngineError, protocol::Response};

use crate::{
    context::{InitScope, RequestContext},
    control::ControlNode,
    engine::TemplateRenderer,
    head::HeadElement,
    lifecycle::{LifecycleState, PageInstance},
};

pub type Model = Map<String, Value>;

/// Application page. Every hook has a no-op default.
pub trait Page: Send + Sized + 'static {
    /// Builds the control tree once when the instance is created.
    fn build(&mut self, _root: &mut ControlNode<Self>) {}

    /// Returning `false` stops the request before binding. Without an
    /// explicit forward or redirect the access-denied page is shown.
    fn on_security_check(&mut self, _cx: &mut RequestContext) -> Result<bool, EngineError> {
        Ok(true)
    }

    fn on_init(
        &mut self,
        _root: &mut ControlNode<Self>,
        _scope: &mut InitScope<'_, Self>,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn on_get(
        &mut self,
        _root: &mut ControlNode<Self>,
        _cx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn on_post(
        &mut self,
        _root: &mut ControlNode<Self>,
        _cx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn on_render(
        &mut self,
        _root: &ControlNode<Self>,
        _model: &mut Model,
        _cx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn on_destroy(&mut self, _cx: &mut RequestContext) -> Result<(), EngineError> {
        Ok(())
    }

    /// Template id; derived from the request path when `None`.
    fn template(&self) -> Option<String> {
        None
    }

    fn content_type(&self) -> &str {
        "text/html; charset=utf-8"
    }

    /// Stateful pages are kept in the session between requests.
    fn is_stateful(&self) -> bool {
        false
    }

    fn head_elements(&self) -> Vec<HeadElement> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Response(Response),
    Forward(String),
    Redirect(String),
}

/// Type-erased [`PageInstance`] as stored in the registry and session.
pub trait PageHandle: Send {
    fn process(
        &mut self,
        cx: &mut RequestContext,
        renderer: &dyn TemplateRenderer,
    ) -> Result<PageOutcome, EngineError>;
    fn destroy(&mut self, cx: &mut RequestContext);
    fn history(&self) -> &[LifecycleState];
    fn is_stateful(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn PageHandle {
    pub fn downcast_ref<P: Page>(&self) -> Option<&PageInstance<P>> {
        self.as_any().downcast_ref::<PageInstance<P>>()
    }

    pub fn downcast_mut<P: Page>(&mut self) -> Option<&mut PageInstance<P>> {
        self.as_any_mut().downcast_mut::<PageInstance<P>>()
    }
}

type PageFactory = Arc<dyn Fn() -> Box<dyn PageHandle> + Send + Sync>;

/// Maps request paths to page constructors.
#[derive(Clone, Default)]
pub struct PageRegistry {
    factories: BTreeMap<String, PageFactory>,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P, F>(&mut self, path: &str, factory: F)
    where
        P: Page,
        F: Fn() -> P + Send + Sync + 'static,
    {
        let factory: PageFactory = Arc::new(move || Box::new(PageInstance::new(factory())));
        self.factories.insert(normalize_path(path), factory);
    }

    pub fn with_page<P, F>(mut self, path: &str, factory: F) -> Self
    where
        P: Page,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.register(path, factory);
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.factories.contains_key(&normalize_path(path))
    }

    pub fn create(&self, path: &str) -> Option<Box<dyn PageHandle>> {
        self.factories.get(&normalize_path(path)).map(|factory| factory())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

/// Leading slash, no trailing slash, no query string.
pub fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let trimmed = path.trim_matches('/');
    format!("/{trimmed}")
}
