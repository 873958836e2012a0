use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use shared::{error::EngineError, protocol::Partial};

use crate::{
    context::{ActionEvent, RequestContext},
    control::{ControlNode, ControlPath},
    head::{self, HeadElement},
};

/// Hook attached to a control for out-of-band actions or cross-cutting
/// processing. One instance may be shared by several controls, so state
/// lives behind `&self`.
pub trait Behavior<P>: Send + Sync {
    /// Whether this behavior should answer the current out-of-band request.
    fn is_request_target(&self, _cx: &RequestContext) -> bool {
        true
    }

    /// Handles an out-of-band action on the owning control.
    fn on_action(
        &self,
        _page: &mut P,
        _event: &mut ActionEvent<'_, P>,
    ) -> Result<Option<Partial>, EngineError> {
        Ok(None)
    }

    /// Fired for every registered interceptor once the acting control has
    /// been handled. Returning `false` stops the page before rendering.
    fn pre_response(
        &self,
        _page: &mut P,
        _event: &mut ActionEvent<'_, P>,
    ) -> Result<bool, EngineError> {
        Ok(true)
    }

    fn pre_render_head_elements(
        &self,
        _source: &ControlNode<P>,
        _elements: &mut Vec<HeadElement>,
    ) {
    }

    fn pre_destroy(&self, _source: &ControlPath) -> Result<(), EngineError> {
        Ok(())
    }
}

pub type ActionHandler<P> = Arc<
    dyn Fn(&mut P, &mut ActionEvent<'_, P>) -> Result<Option<Partial>, EngineError> + Send + Sync,
>;
pub type ResponseHook<P> =
    Arc<dyn Fn(&mut P, &mut ActionEvent<'_, P>) -> Result<bool, EngineError> + Send + Sync>;

/// Out-of-band behavior backed by a closure. Head elements are contributed
/// once per request even when the behavior is shared between controls.
pub struct AjaxBehavior<P> {
    action: ActionHandler<P>,
    intercept: Option<ResponseHook<P>>,
    head_elements: Vec<HeadElement>,
    head_elements_processed: AtomicBool,
}

impl<P> AjaxBehavior<P> {
    pub fn new<F>(action: F) -> Self
    where
        F: Fn(&mut P, &mut ActionEvent<'_, P>) -> Result<Option<Partial>, EngineError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            action: Arc::new(action),
            intercept: None,
            head_elements: Vec::new(),
            head_elements_processed: AtomicBool::new(false),
        }
    }

    pub fn with_head_element(mut self, element: HeadElement) -> Self {
        head::push_unique(&mut self.head_elements, element);
        self
    }

    /// Runs `hook` when the behavior is registered as an interceptor.
    pub fn with_pre_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut P, &mut ActionEvent<'_, P>) -> Result<bool, EngineError> + Send + Sync + 'static,
    {
        self.intercept = Some(Arc::new(hook));
        self
    }

    pub fn head_elements_processed(&self) -> bool {
        self.head_elements_processed.load(Ordering::Acquire)
    }
}

impl<P> fmt::Debug for AjaxBehavior<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AjaxBehavior")
            .field("head_elements", &self.head_elements)
            .field("head_elements_processed", &self.head_elements_processed())
            .finish()
    }
}

impl<P> Behavior<P> for AjaxBehavior<P> {
    fn on_action(
        &self,
        page: &mut P,
        event: &mut ActionEvent<'_, P>,
    ) -> Result<Option<Partial>, EngineError> {
        (self.action)(page, event)
    }

    fn pre_response(
        &self,
        page: &mut P,
        event: &mut ActionEvent<'_, P>,
    ) -> Result<bool, EngineError> {
        match &self.intercept {
            Some(hook) => hook(page, event),
            None => Ok(true),
        }
    }

    fn pre_render_head_elements(&self, _source: &ControlNode<P>, elements: &mut Vec<HeadElement>) {
        if self.head_elements_processed.swap(true, Ordering::AcqRel) {
            return;
        }
        for element in &self.head_elements {
            head::push_unique(elements, element.clone());
        }
    }

    fn pre_destroy(&self, _source: &ControlPath) -> Result<(), EngineError> {
        self.head_elements_processed.store(false, Ordering::Release);
        Ok(())
    }
}
