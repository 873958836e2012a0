//! Demo application served by the binary.

use std::sync::Arc;

use chrono::Utc;
use engine::{
    bean,
    menu::{Menu, MenuCatalog},
    property, ActionEvent, AjaxBehavior, ControlNode, EngineError, HeadElement, InitScope, Model,
    Page, PageRegistry, RequestContext, SelectOption,
};
use serde_json::{json, Value};
use shared::protocol::Partial;

const STATES: [(&str, &str); 3] = [("WA", "Washington"), ("OR", "Oregon"), ("CA", "California")];

pub fn registry(menu: Arc<MenuCatalog>) -> PageRegistry {
    let home_menu = menu.clone();
    let customer_menu = menu.clone();
    PageRegistry::new()
        .with_page("/", move || Home { menu: home_menu.clone() })
        .with_page("/customer", move || CustomerPage::new(customer_menu.clone()))
        .with_page("/customer/saved", || Saved)
        .with_page("/clock", Clock::default)
        .with_page("/admin", || Admin)
        .with_page("/access-denied", || Notice::new("access-denied"))
        .with_page("/not-found", || Notice::new("not-found"))
}

fn menu_model(
    menu: &MenuCatalog,
    model: &mut Model,
    cx: &RequestContext,
) -> Result<(), EngineError> {
    let menu = menu
        .for_request(cx.path())
        .map_err(|err| EngineError::transport(format!("{err:#}")))?;
    model.insert("menu".into(), json!(menu_html(&menu)));
    Ok(())
}

pub fn menu_html(menu: &Menu) -> String {
    let mut html = String::from("<ul class=\"menu\">");
    for item in &menu.children {
        let class = if item.selected { " class=\"selected\"" } else { "" };
        let label = html_escape::encode_text(&item.label);
        match &item.path {
            Some(path) => html.push_str(&format!(
                "<li{class}><a href=\"{}\">{label}</a>",
                html_escape::encode_double_quoted_attribute(path)
            )),
            None => html.push_str(&format!("<li{class}>{label}")),
        }
        if !item.children.is_empty() {
            html.push_str(&menu_html(item));
        }
        html.push_str("</li>");
    }
    html.push_str("</ul>");
    html
}

struct Home {
    menu: Arc<MenuCatalog>,
}

impl Page for Home {
    fn on_render(
        &mut self,
        _root: &ControlNode<Self>,
        model: &mut Model,
        cx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        menu_model(&self.menu, model, cx)?;
        let visitor = cx.session_attribute("name").cloned().unwrap_or(json!("guest"));
        model.insert("visitor".into(), visitor);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Region {
    pub code: String,
}

#[derive(Debug, Default)]
pub struct Address {
    pub street: String,
    pub state: Option<Region>,
}

#[derive(Debug, Default)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub age: Option<i64>,
    pub address: Option<Address>,
}

bean!(Region { value code });
bean!(Address { value street, nested state });
bean!(Customer { value name, value email, value age, nested address });

struct CustomerPage {
    menu: Arc<MenuCatalog>,
    customer: Customer,
}

impl CustomerPage {
    fn new(menu: Arc<MenuCatalog>) -> Self {
        Self {
            menu,
            customer: Customer::default(),
        }
    }

    fn on_save(&mut self, event: &mut ActionEvent<'_, Self>) -> Result<bool, EngineError> {
        let Some(form) = event.tree.find("customer") else {
            return Ok(true);
        };
        if !form.is_valid() {
            event.cx.add_message("Please correct the highlighted fields.");
            return Ok(true);
        }

        event.cx.copy_to(form, &mut self.customer)?;
        let saved = property::to_value(&self.customer);
        event.cx.set_session_attribute("name", json!(self.customer.name));
        event.cx.set_attribute("customer", saved);
        event.cx.forward("/customer/saved");
        Ok(false)
    }
}

impl Page for CustomerPage {
    fn build(&mut self, root: &mut ControlNode<Self>) {
        let states = STATES
            .iter()
            .map(|(code, label)| SelectOption::new(*code, *label))
            .collect();
        root.add(
            ControlNode::form("customer")
                .with_child(ControlNode::text_field("name").required())
                .with_child(ControlNode::text_field("email"))
                .with_child(ControlNode::integer_field("age"))
                .with_child(ControlNode::text_field("address.street").with_label("Street"))
                .with_child(ControlNode::select("address.state.code", states).with_label("State"))
                .with_child(
                    ControlNode::submit("save", "Save").with_listener(CustomerPage::on_save),
                ),
        );
    }

    fn on_render(
        &mut self,
        root: &ControlNode<Self>,
        model: &mut Model,
        cx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        menu_model(&self.menu, model, cx)?;
        // Dotted field names cannot be addressed from templates.
        let state = root.value("address.state.code").cloned().unwrap_or(Value::Null);
        let street = root.value("address.street").cloned().unwrap_or(Value::Null);
        model.insert("state_code".into(), state);
        model.insert("street".into(), street);
        let errors: Vec<String> = root
            .collect_fields_recursive()
            .filter_map(|node| node.field().and_then(|field| field.error.clone()))
            .collect();
        model.insert("errors".into(), json!(errors));
        Ok(())
    }
}

struct Saved;

impl Page for Saved {
    fn on_init(
        &mut self,
        _root: &mut ControlNode<Self>,
        scope: &mut InitScope<'_, Self>,
    ) -> Result<(), EngineError> {
        if scope.cx.attribute("customer").is_none() {
            scope.cx.redirect("/customer");
        }
        Ok(())
    }

    fn template(&self) -> Option<String> {
        Some("customer/saved".into())
    }

    fn on_render(
        &mut self,
        _root: &ControlNode<Self>,
        model: &mut Model,
        cx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        model.insert("customer".into(), cx.attribute("customer").cloned().unwrap_or_default());
        Ok(())
    }
}

/// Stateful page with an out-of-band refresh link.
#[derive(Default)]
struct Clock {
    visits: u64,
    ticks: u64,
}

impl Page for Clock {
    fn build(&mut self, root: &mut ControlNode<Self>) {
        let tick = AjaxBehavior::<Self>::new(|page, _event| {
            page.ticks += 1;
            Ok(Some(Partial::html(format!(
                "<span id=\"time\">{}</span>",
                Utc::now().format("%H:%M:%S")
            ))))
        })
        .with_head_element(HeadElement::JsImport("/static/clock.js".into()));
        root.add(ControlNode::link("tick", "Refresh").with_behavior(Arc::new(tick)));
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn on_get(
        &mut self,
        _root: &mut ControlNode<Self>,
        _cx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        self.visits += 1;
        Ok(())
    }

    fn on_render(
        &mut self,
        _root: &ControlNode<Self>,
        model: &mut Model,
        _cx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        model.insert("visits".into(), json!(self.visits));
        model.insert("ticks".into(), json!(self.ticks));
        model.insert("time".into(), json!(Utc::now().format("%H:%M:%S").to_string()));
        Ok(())
    }
}

struct Admin;

impl Page for Admin {
    fn on_security_check(&mut self, cx: &mut RequestContext) -> Result<bool, EngineError> {
        Ok(cx.session_attribute("role").and_then(Value::as_str) == Some("admin"))
    }
}

struct Notice {
    template: &'static str,
}

impl Notice {
    fn new(template: &'static str) -> Self {
        Self { template }
    }
}

impl Page for Notice {
    fn template(&self) -> Option<String> {
        Some(self.template.to_string())
    }
}
