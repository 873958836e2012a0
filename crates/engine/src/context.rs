use std::{collections::HashMap, fmt, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use shared::{
    domain::{Mode, SessionId},
    error::EngineError,
    protocol::{Navigation, Request, Response},
};
use tracing::debug;

use crate::{
    control::{ControlNode, ControlPath},
    lifecycle::PageInstance,
    page::{Page, PageHandle},
    property::{self, Bean, PropertyCache},
    registry::ControlRegistry,
    settings::EngineSettings,
};

/// Everything the engine knows about the request in flight. One context
/// lives for the whole forward chain of a request.
pub struct RequestContext {
    request: Request,
    settings: Arc<EngineSettings>,
    attributes: Map<String, Value>,
    session: Map<String, Value>,
    navigation: Option<Navigation>,
    response: Option<Response>,
    forwarded: bool,
    messages: Vec<String>,
    cache: PropertyCache,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .field("navigation", &self.navigation)
            .field("forwarded", &self.forwarded)
            .finish()
    }
}

impl RequestContext {
    pub fn new(request: Request, settings: Arc<EngineSettings>) -> Self {
        Self {
            request,
            settings,
            attributes: Map::new(),
            session: Map::new(),
            navigation: None,
            response: None,
            forwarded: false,
            messages: Vec::new(),
            cache: PropertyCache::new(),
        }
    }

    pub fn with_session(mut self, session: Map<String, Value>) -> Self {
        self.session = session;
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn path(&self) -> &str {
        &self.request.path
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.request.param(name)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn mode(&self) -> Mode {
        self.settings.mode
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    /// Stores a typed object under `name`, typically to hand it to the page
    /// a forward lands on.
    pub fn set_attribute_as<T: Serialize>(
        &mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<(), EngineError> {
        let value = serde_json::to_value(value)
            .map_err(|err| EngineError::binding("attribute", err.to_string()))?;
        self.set_attribute(name, value);
        Ok(())
    }

    pub fn attribute_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, EngineError> {
        self.attributes
            .get(name)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(|err| EngineError::binding(name, err.to_string()))
    }

    pub fn session_attribute(&self, name: &str) -> Option<&Value> {
        self.session.get(name)
    }

    pub fn set_session_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.session.insert(name.into(), value);
    }

    pub fn remove_session_attribute(&mut self, name: &str) -> Option<Value> {
        self.session.remove(name)
    }

    pub fn forward(&mut self, path: impl Into<String>) {
        let path = path.into();
        debug!(%path, "forward requested");
        self.navigation = Some(Navigation::Forward { path });
    }

    pub fn redirect(&mut self, location: impl Into<String>) {
        let location = location.into();
        debug!(%location, "redirect requested");
        self.navigation = Some(Navigation::Redirect { location });
    }

    pub fn navigation(&self) -> Option<&Navigation> {
        self.navigation.as_ref()
    }

    pub fn take_navigation(&mut self) -> Option<Navigation> {
        self.navigation.take()
    }

    /// Answers the request directly, bypassing the template.
    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
    }

    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// `true` when the current page was reached through a forward.
    pub fn is_forwarded(&self) -> bool {
        self.forwarded
    }

    pub fn add_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn cache(&self) -> &PropertyCache {
        &self.cache
    }

    pub fn resolve(&mut self, root: &dyn Bean, path: &str) -> Result<Value, EngineError> {
        property::resolve(root, path, &mut self.cache)
    }

    pub fn assign(
        &mut self,
        root: &mut dyn Bean,
        path: &str,
        value: Value,
    ) -> Result<(), EngineError> {
        property::assign(root, path, value, &mut self.cache)
    }

    pub fn copy_to<P>(
        &mut self,
        form: &ControlNode<P>,
        bean: &mut dyn Bean,
    ) -> Result<(), EngineError> {
        form.copy_to(bean, &mut self.cache)
    }

    pub fn copy_from<P>(
        &mut self,
        form: &mut ControlNode<P>,
        bean: &dyn Bean,
    ) -> Result<(), EngineError> {
        form.copy_from(bean, &mut self.cache)
    }

    pub(crate) fn enter_forward(&mut self, path: String) {
        self.request.path = path;
        self.forwarded = true;
        self.navigation = None;
        self.response = None;
    }

    pub fn into_session(self) -> Map<String, Value> {
        self.session
    }
}

/// Longer-lived store shared by the requests of one client.
#[derive(Default)]
pub struct Session {
    pub id: Option<SessionId>,
    attributes: Map<String, Value>,
    pages: HashMap<String, Box<dyn PageHandle>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .field("pages", &self.pages.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn has_page(&self, path: &str) -> bool {
        self.pages.contains_key(path)
    }

    /// Stateful page stored for `path`, if it is a `P`.
    pub fn page<P: Page>(&self, path: &str) -> Option<&PageInstance<P>> {
        self.pages.get(path).and_then(|page| page.downcast_ref::<P>())
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub(crate) fn take_attributes(&mut self) -> Map<String, Value> {
        std::mem::take(&mut self.attributes)
    }

    pub(crate) fn restore_attributes(&mut self, attributes: Map<String, Value>) {
        self.attributes = attributes;
    }

    pub(crate) fn take_page(&mut self, path: &str) -> Option<Box<dyn PageHandle>> {
        self.pages.remove(path)
    }

    pub(crate) fn store_page(&mut self, path: String, page: Box<dyn PageHandle>) {
        self.pages.insert(path, page);
    }

    pub fn remove_page(&mut self, path: &str) -> bool {
        self.pages.remove(path).is_some()
    }
}

/// Handed to `Page::on_init` and control initializers.
pub struct InitScope<'a, P> {
    pub cx: &'a mut RequestContext,
    pub registry: &'a mut ControlRegistry<P>,
}

/// Handed to listeners and behaviors when a control acts.
pub struct ActionEvent<'a, P> {
    pub source: ControlPath,
    pub tree: &'a mut ControlNode<P>,
    pub cx: &'a mut RequestContext,
    pub registry: &'a mut ControlRegistry<P>,
}

impl<P> ActionEvent<'_, P> {
    /// The control that fired.
    pub fn control(&self) -> Option<&ControlNode<P>> {
        self.tree.at(&self.source)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.tree.value(name)
    }

    pub fn text(&self, name: &str) -> String {
        self.tree
            .field_named(name)
            .map(|field| field.text())
            .unwrap_or_default()
    }
}
