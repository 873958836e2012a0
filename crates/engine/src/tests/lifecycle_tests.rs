use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use serde_json::json;
use shared::protocol::{Request, ACTING_CONTROL_PARAM, FORM_NAME_PARAM};

use super::*;
use crate::{behavior::AjaxBehavior, context::ActionEvent, settings::EngineSettings};

#[derive(Default)]
struct Renders {
    templates: Mutex<Vec<String>>,
}

impl TemplateRenderer for Renders {
    fn render(&self, template: &str, model: &Model) -> Result<String, EngineError> {
        self.templates
            .lock()
            .expect("lock")
            .push(template.to_string());
        Ok(format!("{template}:{}", model.len()))
    }
}

impl Renders {
    fn count(&self) -> usize {
        self.templates.lock().expect("lock").len()
    }
}

#[derive(Default)]
struct Signup {
    allow: bool,
    saved: Option<String>,
    destroyed: usize,
}

impl Page for Signup {
    fn build(&mut self, root: &mut ControlNode<Self>) {
        root.add(
            ControlNode::form("form")
                .with_child(ControlNode::text_field("name").required())
                .with_child(ControlNode::integer_field("age"))
                .with_child(ControlNode::submit("ok", "OK").with_listener(Signup::on_ok))
                .with_child(ControlNode::submit("away", "Away").with_listener(Signup::on_away))
                .with_child(ControlNode::submit("halt", "Halt").with_callback(|_, _| Ok(false))),
        );
    }

    fn on_security_check(&mut self, _cx: &mut RequestContext) -> Result<bool, EngineError> {
        Ok(self.allow)
    }

    fn on_render(
        &mut self,
        _root: &ControlNode<Self>,
        model: &mut Model,
        _cx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        if let Some(saved) = &self.saved {
            model.insert("saved".into(), json!(saved));
        }
        Ok(())
    }

    fn on_destroy(&mut self, _cx: &mut RequestContext) -> Result<(), EngineError> {
        self.destroyed += 1;
        Ok(())
    }
}

impl Signup {
    fn allowed() -> Self {
        Self {
            allow: true,
            ..Self::default()
        }
    }

    fn on_ok(&mut self, event: &mut ActionEvent<'_, Self>) -> Result<bool, EngineError> {
        if event.tree.is_valid() {
            self.saved = Some(event.text("name"));
        }
        Ok(true)
    }

    fn on_away(&mut self, event: &mut ActionEvent<'_, Self>) -> Result<bool, EngineError> {
        event.cx.forward("/elsewhere");
        Ok(false)
    }
}

fn context(request: Request) -> RequestContext {
    RequestContext::new(request, Arc::new(EngineSettings::default()))
}

fn submit(button: &str, name: &str) -> Request {
    Request::post("/signup")
        .with_param("name", name)
        .with_param(ACTING_CONTROL_PARAM, button)
}

#[test]
fn full_request_walks_every_state() {
    let renderer = Renders::default();
    let mut instance = PageInstance::new(Signup::allowed());
    let mut cx = context(submit("ok", "alice"));

    let outcome = instance.process(&mut cx, &renderer).expect("process");
    instance.destroy(&mut cx);

    assert!(matches!(outcome, PageOutcome::Response(ref response) if response.status == 200));
    assert_eq!(
        instance.history(),
        [
            LifecycleState::Init,
            LifecycleState::Bind,
            LifecycleState::Dispatch,
            LifecycleState::Rendering,
            LifecycleState::Destroyed,
        ]
    );
    assert_eq!(instance.page().saved.as_deref(), Some("alice"));
    assert_eq!(instance.page().destroyed, 1);
    assert!(instance.registry().is_none());
    assert_eq!(*renderer.templates.lock().expect("lock"), ["signup"]);
}

#[test]
fn security_veto_forwards_to_access_denied() {
    let renderer = Renders::default();
    let mut instance = PageInstance::new(Signup::default());
    let mut cx = context(submit("ok", "alice"));

    let outcome = instance.process(&mut cx, &renderer).expect("process");

    assert_eq!(outcome, PageOutcome::Forward("/access-denied".into()));
    assert_eq!(instance.history(), [LifecycleState::Init, LifecycleState::Forwarded]);
    assert_eq!(instance.page().saved, None);
    assert_eq!(renderer.count(), 0);
}

#[test]
fn forward_from_listener_skips_rendering() {
    let renderer = Renders::default();
    let mut instance = PageInstance::new(Signup::allowed());
    let mut cx = context(submit("away", "alice"));

    let outcome = instance.process(&mut cx, &renderer).expect("process");

    assert_eq!(outcome, PageOutcome::Forward("/elsewhere".into()));
    assert_eq!(instance.state(), Some(LifecycleState::Forwarded));
    assert_eq!(renderer.count(), 0);
}

#[test]
fn halted_page_returns_empty_response_without_template() {
    let renderer = Renders::default();
    let mut instance = PageInstance::new(Signup::allowed());
    let mut cx = context(submit("halt", "alice"));

    let outcome = instance.process(&mut cx, &renderer).expect("process");
    instance.destroy(&mut cx);

    assert!(matches!(outcome, PageOutcome::Response(ref response) if response.body.is_empty()));
    assert_eq!(
        instance.history(),
        [
            LifecycleState::Init,
            LifecycleState::Bind,
            LifecycleState::Dispatch,
            LifecycleState::Destroyed,
        ]
    );
    assert_eq!(renderer.count(), 0);
}

#[test]
fn required_failure_is_recorded_and_success_is_not() {
    let renderer = Renders::default();
    let mut instance = PageInstance::new(Signup::allowed());
    let mut cx = context(submit("ok", ""));

    instance.process(&mut cx, &renderer).expect("process");

    let field = instance.root().field_named("name").expect("field");
    assert_eq!(field.error.as_deref(), Some("Name is required"));
    assert_eq!(instance.page().saved, None);
}

#[test]
fn validation_waits_for_the_form_to_be_submitted() {
    let mut instance = PageInstance::new(Signup::allowed());
    let mut cx = context(
        Request::post("/signup")
            .with_param("name", "")
            .with_param(FORM_NAME_PARAM, "another"),
    );

    instance.init(&mut cx).expect("init");
    instance.bind(&mut cx).expect("bind");

    assert!(instance.root().is_valid());
}

#[test]
fn bind_records_conversion_failures_on_the_field() {
    let mut instance = PageInstance::new(Signup::allowed());
    let mut cx = context(Request::post("/signup").with_param("age", "old"));

    instance.init(&mut cx).expect("init");
    instance.bind(&mut cx).expect("bind");

    let age = instance.root().field_named("age").expect("age");
    assert_eq!(age.error.as_deref(), Some("'old' is not a whole number"));
}

#[test]
fn malformed_field_name_raises_binding_error() {
    struct Broken;
    impl Page for Broken {
        fn build(&mut self, root: &mut ControlNode<Self>) {
            root.add(ControlNode::text_field("address..code"));
        }
    }

    let mut instance = PageInstance::new(Broken);
    let mut cx = context(Request::post("/broken"));
    instance.init(&mut cx).expect("init");

    let err = instance.bind(&mut cx).expect_err("binding error");
    assert!(matches!(err, EngineError::Binding { .. }));
}

#[test]
fn forwarded_requests_skip_binding() {
    let mut instance = PageInstance::new(Signup::allowed());
    let mut cx = context(submit("ok", "alice"));
    cx.enter_forward("/signup".into());

    instance.init(&mut cx).expect("init");
    instance.bind(&mut cx).expect("bind");
    instance.dispatch(&mut cx).expect("dispatch");

    assert_eq!(instance.root().value("name"), Some(&json!("")));
    assert_eq!(instance.page().saved, None);
}

#[test]
fn steps_out_of_order_are_rejected() {
    let mut instance = PageInstance::new(Signup::allowed());
    let mut cx = context(Request::get("/signup"));

    let err = instance.bind(&mut cx).expect_err("illegal");
    assert!(matches!(
        err,
        EngineError::IllegalTransition { from: "new", to: "bind" }
    ));

    instance.init(&mut cx).expect("init");
    let err = instance.dispatch(&mut cx).expect_err("illegal");
    assert!(matches!(err, EngineError::IllegalTransition { from: "init", to: "dispatch" }));
}

fn settling_panel() -> ControlNode<Empty> {
    ControlNode::container("panel").with_initializer(|node, _scope| {
        node.add(ControlNode::container("inner").with_initializer(|inner, _scope| {
            inner.add(ControlNode::text_field("leaf"));
            Ok(())
        }));
        Ok(())
    })
}

fn growing(depth: usize) -> ControlNode<Empty> {
    ControlNode::container(format!("level{depth}")).with_initializer(move |node, _scope| {
        node.add(growing(depth + 1));
        Ok(())
    })
}

#[derive(Default)]
struct Empty {
    extra: Option<fn() -> ControlNode<Empty>>,
}

impl Page for Empty {
    fn on_init(
        &mut self,
        root: &mut ControlNode<Self>,
        _scope: &mut InitScope<'_, Self>,
    ) -> Result<(), EngineError> {
        if let Some(extra) = self.extra {
            root.add(extra());
        }
        Ok(())
    }
}

#[test]
fn initializers_run_to_a_fixed_point() {
    let mut instance = PageInstance::new(Empty {
        extra: Some(settling_panel),
    });
    let mut cx = context(Request::get("/empty"));

    instance.init(&mut cx).expect("init");

    let leaf = instance.root().find_deep("leaf").expect("leaf");
    assert_eq!(leaf.path().to_string(), "panel/inner/leaf");
}

#[test]
fn endless_initializers_hit_the_pass_limit() {
    let mut instance = PageInstance::new(Empty {
        extra: Some(|| growing(0)),
    });
    let mut cx = context(Request::get("/empty"));

    let err = instance.init(&mut cx).expect_err("limit");
    assert!(matches!(err, EngineError::InitLimit { passes: 16 }));
}

struct Fragile {
    label: &'static str,
    calls: Arc<AtomicUsize>,
}

impl Behavior<Empty> for Fragile {
    fn pre_destroy(&self, _source: &ControlPath) -> Result<(), EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::listener(self.label, "teardown failed"))
    }
}

#[test]
fn destroy_is_best_effort() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut instance = PageInstance::new(Empty::default());
    instance.root_mut().add(ControlNode::link("a", "A").with_behavior(Arc::new(Fragile {
        label: "a",
        calls: Arc::clone(&calls),
    })));
    instance.root_mut().add(ControlNode::link("b", "B").with_behavior(Arc::new(Fragile {
        label: "b",
        calls: Arc::clone(&calls),
    })));
    let mut cx = context(Request::get("/empty"));

    instance.init(&mut cx).expect("init");
    instance.destroy(&mut cx);

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(instance.state(), Some(LifecycleState::Destroyed));
}

#[test]
fn shared_behavior_contributes_head_elements_once_per_request() {
    let shared = Arc::new(
        AjaxBehavior::<Empty>::new(|_, _| Ok(None))
            .with_head_element(HeadElement::JsImport("/js/ajax.js".into())),
    );
    let mut instance = PageInstance::new(Empty::default());
    instance.root_mut().add(
        ControlNode::link("one", "One")
            .with_behavior(shared.clone())
            .with_head_element(HeadElement::CssImport("/css/links.css".into())),
    );
    instance.root_mut().add(
        ControlNode::link("two", "Two")
            .with_behavior(shared.clone())
            .with_head_element(HeadElement::CssImport("/css/links.css".into())),
    );
    let renderer = Renders::default();
    let mut cx = context(Request::get("/empty"));

    instance.process(&mut cx, &renderer).expect("process");
    assert!(shared.head_elements_processed());
    let elements = instance.collect_head_elements();
    assert_eq!(elements, [HeadElement::CssImport("/css/links.css".into())]);

    instance.destroy(&mut cx);
    assert!(!shared.head_elements_processed());
    let elements = instance.collect_head_elements();
    assert_eq!(
        elements,
        [
            HeadElement::CssImport("/css/links.css".into()),
            HeadElement::JsImport("/js/ajax.js".into()),
        ]
    );
}

#[test]
fn model_carries_reserved_keys_and_control_snapshots() {
    let mut instance = PageInstance::new(Signup::allowed());
    let mut cx = context(submit("ok", "alice"));
    cx.add_message("welcome");

    instance.init(&mut cx).expect("init");
    instance.bind(&mut cx).expect("bind");
    instance.dispatch(&mut cx).expect("dispatch");
    let model = instance.build_model(&mut cx).expect("model");

    for key in RESERVED_MODEL_KEYS {
        assert!(model.contains_key(key), "missing {key}");
    }
    assert_eq!(model["path"], json!("/signup"));
    assert_eq!(model["messages"], json!(["welcome"]));
    assert_eq!(model["form"]["fields"]["name"]["value"], json!("alice"));
    assert_eq!(model["saved"], json!("alice"));
}

#[test]
fn template_defaults_follow_the_path() {
    assert_eq!(template_for_path("/"), "index");
    assert_eq!(template_for_path("/customer/edit"), "customer/edit");
}
