use shared::{error::EngineError, protocol::Partial};
use tracing::{debug, error, trace, warn};

use crate::{
    context::{ActionEvent, RequestContext},
    control::{ControlNode, ControlPath},
    registry::ControlRegistry,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// The control identified by the request, if it was found.
    pub acting: Option<ControlPath>,
    pub listener_fired: bool,
    /// `false` once a listener or interceptor has asked to stop the page.
    pub continue_processing: bool,
    /// Set for out-of-band requests; replaces the full page render.
    pub partial: Option<Partial>,
}

impl DispatchOutcome {
    pub fn passthrough() -> Self {
        Self {
            acting: None,
            listener_fired: false,
            continue_processing: true,
            partial: None,
        }
    }
}

/// Fires the acting control's listener, then every registered interceptor.
///
/// Only controls present when binding started are candidates for the
/// acting control; anything added since then waits for a later request.
pub struct EventDispatcher<'a> {
    processed: &'a [ControlPath],
}

impl<'a> EventDispatcher<'a> {
    pub fn new(processed: &'a [ControlPath]) -> Self {
        Self { processed }
    }

    pub fn dispatch<P>(
        &self,
        page: &mut P,
        tree: &mut ControlNode<P>,
        registry: &mut ControlRegistry<P>,
        cx: &mut RequestContext,
    ) -> Result<DispatchOutcome, EngineError> {
        if cx.request().is_out_of_band() {
            return self.dispatch_out_of_band(page, tree, registry, cx);
        }

        let acting = self.resolve_acting(tree, cx);
        let mut outcome = DispatchOutcome {
            acting: acting.clone(),
            ..DispatchOutcome::passthrough()
        };

        match acting {
            Some(source) => {
                if let Some(keep) = fire_listener(page, tree, registry, cx, &source)? {
                    outcome.listener_fired = true;
                    outcome.continue_processing = keep;
                }
            }
            None => trace!("no acting control"),
        }

        let keep = fire_interceptors(page, tree, registry, cx)?;
        outcome.continue_processing &= keep;
        Ok(outcome)
    }

    /// The control named by the acting-control parameter or, failing that,
    /// the first submit button whose own name was submitted.
    pub fn resolve_acting<P>(
        &self,
        tree: &ControlNode<P>,
        cx: &RequestContext,
    ) -> Option<ControlPath> {
        let request = cx.request();
        if let Some(name) = request.acting_control() {
            let found = self
                .processed
                .iter()
                .find(|path| path.name() == Some(name))
                .cloned();
            if found.is_none() {
                debug!(control = name, "acting control not among processed controls");
            }
            return found;
        }

        self.processed
            .iter()
            .find(|path| {
                path.name().is_some_and(|name| request.has_param(name))
                    && tree.at(path).is_some_and(ControlNode::is_submit)
            })
            .cloned()
    }

    fn dispatch_out_of_band<P>(
        &self,
        page: &mut P,
        tree: &mut ControlNode<P>,
        registry: &mut ControlRegistry<P>,
        cx: &mut RequestContext,
    ) -> Result<DispatchOutcome, EngineError> {
        let target = cx.request().acting_control().and_then(|name| {
            registry
                .ajax_targets()
                .find(|path| path.name() == Some(name) && self.processed.contains(path))
                .cloned()
        });

        let Some(source) = target else {
            warn!(
                control = cx.request().acting_control().unwrap_or_default(),
                "out-of-band request matched no ajax target"
            );
            return Ok(DispatchOutcome {
                acting: None,
                listener_fired: false,
                continue_processing: false,
                partial: Some(Partial::empty()),
            });
        };

        let mut outcome = DispatchOutcome {
            acting: Some(source.clone()),
            ..DispatchOutcome::passthrough()
        };
        if let Some(keep) = fire_listener(page, tree, registry, cx, &source)? {
            outcome.listener_fired = true;
            outcome.continue_processing = keep;
        }

        let behaviors = if outcome.continue_processing {
            tree.at(&source)
                .map(|node| node.behaviors().to_vec())
                .unwrap_or_default()
        } else {
            debug!(control = %source, "listener stopped the target, skipping its behaviors");
            Vec::new()
        };
        for behavior in behaviors {
            if !behavior.is_request_target(cx) {
                continue;
            }
            let mut event = ActionEvent {
                source: source.clone(),
                tree: &mut *tree,
                cx: &mut *cx,
                registry: &mut *registry,
            };
            if let Some(partial) = behavior.on_action(page, &mut event).map_err(|err| {
                error!(control = %source, %err, "behavior failed");
                err
            })? {
                outcome.partial = Some(partial);
                break;
            }
        }

        let keep = fire_interceptors(page, tree, registry, cx)?;
        outcome.continue_processing &= keep;
        outcome.partial.get_or_insert_with(Partial::empty);
        Ok(outcome)
    }
}

// Returns `None` when the control has no listener.
fn fire_listener<P>(
    page: &mut P,
    tree: &mut ControlNode<P>,
    registry: &mut ControlRegistry<P>,
    cx: &mut RequestContext,
    source: &ControlPath,
) -> Result<Option<bool>, EngineError> {
    let Some(listener) = tree.at(source).and_then(|node| node.listener().cloned()) else {
        trace!(control = %source, "acting control has no listener");
        return Ok(None);
    };

    debug!(control = %source, "firing listener");
    let mut event = ActionEvent {
        source: source.clone(),
        tree,
        cx,
        registry,
    };
    let keep = listener.invoke(page, &mut event).map_err(|err| {
        error!(control = %source, %err, "listener failed");
        err
    })?;
    Ok(Some(keep))
}

/// Fires every interceptor in registration order. All of them run; the
/// result is `false` if any asked to stop.
fn fire_interceptors<P>(
    page: &mut P,
    tree: &mut ControlNode<P>,
    registry: &mut ControlRegistry<P>,
    cx: &mut RequestContext,
) -> Result<bool, EngineError> {
    if !registry.has_interceptors() {
        return Ok(true);
    }

    let interceptors = registry.interceptors().to_vec();
    let mut keep = true;
    for interceptor in interceptors {
        trace!(control = %interceptor.source, "firing interceptor");
        let mut event = ActionEvent {
            source: interceptor.source.clone(),
            tree: &mut *tree,
            cx: &mut *cx,
            registry: &mut *registry,
        };
        keep &= interceptor.behavior.pre_response(page, &mut event)?;
    }
    Ok(keep)
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
