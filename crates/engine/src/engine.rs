use std::sync::Arc;

use serde::Serialize;
use shared::{
    error::EngineError,
    protocol::{Request, Response},
};
use tracing::{debug, error};

use crate::{
    context::{RequestContext, Session},
    error_page,
    lifecycle::LifecycleState,
    page::{normalize_path, Model, PageHandle, PageOutcome, PageRegistry},
    settings::EngineSettings,
};

/// Merges a model into a template. Implemented outside the engine.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, model: &Model) -> Result<String, EngineError>;
}

/// Lifecycle states one page went through while serving a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageTrace {
    pub path: String,
    pub states: Vec<LifecycleState>,
}

#[derive(Debug)]
pub struct RequestOutcome {
    pub response: Response,
    /// Every page entered, in forward order.
    pub trail: Vec<PageTrace>,
}

impl RequestOutcome {
    pub fn forwarded_to(&self) -> Vec<&str> {
        self.trail.iter().skip(1).map(|trace| trace.path.as_str()).collect()
    }
}

/// Serves requests: resolves the page, follows forwards, keeps stateful
/// pages in the session and turns failures into the error view.
pub struct Engine {
    pages: PageRegistry,
    renderer: Arc<dyn TemplateRenderer>,
    settings: Arc<EngineSettings>,
}

impl Engine {
    pub fn new(
        pages: PageRegistry,
        renderer: Arc<dyn TemplateRenderer>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            pages,
            renderer,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn pages(&self) -> &PageRegistry {
        &self.pages
    }

    pub fn handle(&self, request: Request, session: &mut Session) -> RequestOutcome {
        let mut cx = RequestContext::new(request, Arc::clone(&self.settings))
            .with_session(session.take_attributes());
        let mut trail = Vec::new();
        let response = self.run(&mut cx, session, &mut trail);
        session.restore_attributes(cx.into_session());
        RequestOutcome { response, trail }
    }

    fn run(
        &self,
        cx: &mut RequestContext,
        session: &mut Session,
        trail: &mut Vec<PageTrace>,
    ) -> Response {
        let mut hops = 0usize;
        loop {
            let path = normalize_path(cx.path());
            let Some((mut page, not_found)) = self.checkout(&path, session) else {
                debug!(%path, "no page mapped");
                return error_page::render_not_found(self.renderer.as_ref(), &self.settings, &path);
            };

            let result = page.process(cx, self.renderer.as_ref());
            page.destroy(cx);
            trail.push(PageTrace {
                path: path.clone(),
                states: page.history().to_vec(),
            });

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(%path, %err, "page processing failed");
                    return error_page::render_error(
                        self.renderer.as_ref(),
                        &self.settings,
                        &err,
                        &path,
                    );
                }
            };

            if page.is_stateful() && !not_found {
                session.store_page(path.clone(), page);
            }

            match outcome {
                PageOutcome::Response(mut response) => {
                    if not_found {
                        response.status = 404;
                    }
                    return response;
                }
                PageOutcome::Redirect(location) => {
                    let location = redirect_location(cx.request(), &location);
                    debug!(%path, %location, "redirecting");
                    return Response::redirect(location);
                }
                PageOutcome::Forward(target) => {
                    hops += 1;
                    if hops > self.settings.forward_limit {
                        let err = EngineError::ForwardLimit {
                            limit: self.settings.forward_limit,
                            path: target,
                        };
                        error!(%path, %err, "forward chain aborted");
                        return error_page::render_error(
                            self.renderer.as_ref(),
                            &self.settings,
                            &err,
                            &path,
                        );
                    }
                    debug!(from = %path, to = %target, hops, "forwarding");
                    cx.enter_forward(target);
                }
            }
        }
    }

    // Returns the page and whether it stands in for an unmapped path.
    fn checkout(&self, path: &str, session: &mut Session) -> Option<(Box<dyn PageHandle>, bool)> {
        if let Some(page) = session.take_page(path) {
            return Some((page, false));
        }
        if let Some(page) = self.pages.create(path) {
            return Some((page, false));
        }
        let fallback = normalize_path(&self.settings.not_found_path);
        if fallback == path {
            return None;
        }
        self.pages.create(&fallback).map(|page| (page, true))
    }
}

/// Locations starting with `/` are relative to the application's context
/// path.
pub fn redirect_location(request: &Request, location: &str) -> String {
    if location.starts_with('/') && !location.starts_with("//") {
        format!("{}{}", request.context_path.trim_end_matches('/'), location)
    } else {
        location.to_string()
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
