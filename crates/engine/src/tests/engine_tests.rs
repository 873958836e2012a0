use std::sync::Mutex;

use serde_json::json;
use shared::{domain::Method, protocol::ACTING_CONTROL_PARAM};

use super::*;
use crate::{
    context::{ActionEvent, RequestContext},
    control::ControlNode,
    page::Page,
};

#[derive(Default)]
struct Templates {
    rendered: Mutex<Vec<(String, Model)>>,
}

impl TemplateRenderer for Templates {
    fn render(&self, template: &str, model: &Model) -> Result<String, EngineError> {
        if template == "missing" {
            return Err(EngineError::transport("template 'missing' not found"));
        }
        self.rendered
            .lock()
            .expect("lock")
            .push((template.to_string(), model.clone()));
        Ok(format!("<{template}>"))
    }
}

#[derive(Default)]
struct Order;

impl Page for Order {
    fn build(&mut self, root: &mut ControlNode<Self>) {
        root.add(ControlNode::text_field("item"));
        root.add(ControlNode::submit("next", "Next").with_listener(Order::on_next));
        root.add(ControlNode::submit("away", "Away").with_listener(Order::on_away));
        root.add(ControlNode::submit("fail", "Fail").with_listener(Order::on_fail));
    }
}

impl Order {
    fn on_next(&mut self, event: &mut ActionEvent<'_, Self>) -> Result<bool, EngineError> {
        let item = event.text("item");
        event.cx.set_attribute("order", json!({ "item": item }));
        event.cx.forward("/confirm");
        Ok(false)
    }

    fn on_away(&mut self, event: &mut ActionEvent<'_, Self>) -> Result<bool, EngineError> {
        event.cx.redirect("/done");
        Ok(false)
    }

    fn on_fail(&mut self, _event: &mut ActionEvent<'_, Self>) -> Result<bool, EngineError> {
        Err(EngineError::listener("fail", "cannot place order"))
    }
}

#[derive(Default)]
struct Confirm;

impl Page for Confirm {
    fn on_render(
        &mut self,
        _root: &ControlNode<Self>,
        model: &mut Model,
        cx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        model.insert("order".into(), cx.attribute("order").cloned().unwrap_or_default());
        Ok(())
    }
}

#[derive(Default)]
struct Counter {
    hits: u32,
}

impl Page for Counter {
    fn is_stateful(&self) -> bool {
        true
    }

    fn on_get(
        &mut self,
        _root: &mut ControlNode<Self>,
        _cx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        self.hits += 1;
        Ok(())
    }

    fn on_render(
        &mut self,
        _root: &ControlNode<Self>,
        model: &mut Model,
        _cx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        model.insert("hits".into(), json!(self.hits));
        Ok(())
    }
}

struct Loop;

impl Page for Loop {
    fn on_init(
        &mut self,
        _root: &mut ControlNode<Self>,
        scope: &mut crate::context::InitScope<'_, Self>,
    ) -> Result<(), EngineError> {
        scope.cx.forward("/loop");
        Ok(())
    }
}

struct BadTemplate;

impl Page for BadTemplate {
    fn template(&self) -> Option<String> {
        Some("missing".into())
    }
}

fn engine(settings: EngineSettings) -> (Engine, Arc<Templates>) {
    let templates = Arc::new(Templates::default());
    let pages = PageRegistry::new()
        .with_page("/order", || Order)
        .with_page("/confirm", || Confirm)
        .with_page("/counter", Counter::default)
        .with_page("/loop", || Loop)
        .with_page("/bad", || BadTemplate);
    (Engine::new(pages, templates.clone(), settings), templates)
}

fn post(path: &str, button: &str) -> Request {
    Request::post(path)
        .with_param("item", "lamp")
        .with_param(ACTING_CONTROL_PARAM, button)
}

#[test]
fn forward_renders_target_page_with_carried_attribute() {
    let (engine, templates) = engine(EngineSettings::default());
    let mut session = Session::default();

    let outcome = engine.handle(post("/order", "next"), &mut session);

    assert_eq!(outcome.response.status, 200);
    assert_eq!(outcome.response.body, "<confirm>");
    assert_eq!(outcome.forwarded_to(), ["/confirm"]);
    assert_eq!(
        outcome.trail[0].states.last(),
        Some(&LifecycleState::Destroyed)
    );
    assert!(outcome.trail[0].states.contains(&LifecycleState::Forwarded));
    assert!(!outcome.trail[0].states.contains(&LifecycleState::Rendering));

    let rendered = templates.rendered.lock().expect("lock");
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].0, "confirm");
    assert_eq!(rendered[0].1["order"], json!({ "item": "lamp" }));
    assert_eq!(rendered[0].1["path"], json!("/confirm"));
}

#[test]
fn redirect_is_prefixed_with_context_path() {
    let (engine, templates) = engine(EngineSettings::default());
    let mut session = Session::default();
    let mut request = post("/order", "away");
    request.context_path = "/shop".into();

    let outcome = engine.handle(request, &mut session);

    assert_eq!(outcome.response.status, 302);
    assert_eq!(outcome.response.location.as_deref(), Some("/shop/done"));
    assert!(templates.rendered.lock().expect("lock").is_empty());
}

#[test]
fn redirect_location_leaves_absolute_urls_alone() {
    let mut request = Request::get("/a");
    request.context_path = "/app/".into();
    assert_eq!(redirect_location(&request, "/b"), "/app/b");
    assert_eq!(redirect_location(&request, "https://example.com/x"), "https://example.com/x");
    assert_eq!(redirect_location(&request, "next"), "next");
}

#[test]
fn listener_failure_renders_error_view() {
    let (engine, templates) = engine(EngineSettings::default());
    let mut session = Session::default();

    let outcome = engine.handle(post("/order", "fail"), &mut session);

    assert_eq!(outcome.response.status, 500);
    let rendered = templates.rendered.lock().expect("lock");
    assert_eq!(rendered[0].0, "error");
    assert_eq!(rendered[0].1["code"], json!("listener"));
    assert_eq!(rendered[0].1["path"], json!("/order"));
    assert_eq!(outcome.trail[0].states.last(), Some(&LifecycleState::Destroyed));
}

#[test]
fn template_failure_renders_error_view() {
    let (engine, _templates) = engine(EngineSettings::default());
    let mut session = Session::default();

    let outcome = engine.handle(Request::get("/bad"), &mut session);

    assert_eq!(outcome.response.status, 500);
    assert_eq!(outcome.response.body, "<error>");
}

#[test]
fn stateful_page_is_reused_from_the_session() {
    let (engine, templates) = engine(EngineSettings::default());
    let mut session = Session::default();

    engine.handle(Request::get("/counter"), &mut session);
    assert!(session.has_page("/counter"));
    engine.handle(Request::get("/counter"), &mut session);

    let rendered = templates.rendered.lock().expect("lock");
    assert_eq!(rendered[0].1["hits"], json!(1));
    assert_eq!(rendered[1].1["hits"], json!(2));
}

#[test]
fn unknown_path_without_not_found_page_is_404() {
    let (engine, templates) = engine(EngineSettings::default());
    let mut session = Session::default();

    let outcome = engine.handle(Request::get("/nowhere"), &mut session);

    assert_eq!(outcome.response.status, 404);
    assert!(outcome.trail.is_empty());
    assert_eq!(templates.rendered.lock().expect("lock")[0].1["code"], json!("not_found"));
}

#[test]
fn unknown_path_uses_configured_not_found_page() {
    let settings = EngineSettings {
        not_found_path: "/confirm".into(),
        ..EngineSettings::default()
    };
    let (engine, _templates) = engine(settings);
    let mut session = Session::default();

    let outcome = engine.handle(Request::new(Method::Get, "/nowhere"), &mut session);

    assert_eq!(outcome.response.status, 404);
    assert_eq!(outcome.response.body, "<nowhere>");
}

#[test]
fn forward_loops_stop_at_the_limit() {
    let settings = EngineSettings {
        forward_limit: 3,
        ..EngineSettings::default()
    };
    let (engine, templates) = engine(settings);
    let mut session = Session::default();

    let outcome = engine.handle(Request::get("/loop"), &mut session);

    assert_eq!(outcome.response.status, 500);
    assert_eq!(outcome.trail.len(), 4);
    assert_eq!(templates.rendered.lock().expect("lock")[0].1["code"], json!("lifecycle"));
}

#[test]
fn session_attributes_survive_between_requests() {
    let (engine, _templates) = engine(EngineSettings::default());
    let mut session = Session::default();
    session.set_attribute("user", json!("ada"));

    engine.handle(Request::get("/confirm"), &mut session);

    assert_eq!(session.attribute("user"), Some(&json!("ada")));
}
