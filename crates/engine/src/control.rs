//! The per-request control tree.
//!
//! A [`ControlNode`] owns its children in insertion order. Nodes never hold a
//! pointer to their parent; instead every node carries its [`ControlPath`]
//! from the page root, which is rewritten whenever the node is attached.

use std::{fmt, sync::Arc};

use serde_json::{json, Map, Value};
use shared::{domain::Method, error::EngineError, protocol::Request, protocol::FORM_NAME_PARAM};

use crate::{
    behavior::Behavior,
    context::{ActionEvent, InitScope},
    field::{Field, FieldKind, SelectOption},
    head::HeadElement,
    property::{self, Bean, PropertyCache},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlPath(Vec<String>);

impl ControlPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.0.split_last()?;
        Some(Self(parent.to_vec()))
    }

    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ControlPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        f.write_str(&self.0.join("/"))
    }
}

pub type ListenerFn<P> = fn(&mut P, &mut ActionEvent<'_, P>) -> Result<bool, EngineError>;
pub type ListenerCallback<P> =
    Arc<dyn Fn(&mut P, &mut ActionEvent<'_, P>) -> Result<bool, EngineError> + Send + Sync>;
pub type Initializer<P> = Arc<
    dyn Fn(&mut ControlNode<P>, &mut InitScope<'_, P>) -> Result<(), EngineError> + Send + Sync,
>;

/// Listener bound at construction time. The returned flag is the
/// continue-processing signal.
pub enum Listener<P> {
    Method(ListenerFn<P>),
    Callback(ListenerCallback<P>),
}

impl<P> Listener<P> {
    pub fn invoke(
        &self,
        page: &mut P,
        event: &mut ActionEvent<'_, P>,
    ) -> Result<bool, EngineError> {
        match self {
            Listener::Method(method) => method(page, event),
            Listener::Callback(callback) => callback(page, event),
        }
    }
}

impl<P> Clone for Listener<P> {
    fn clone(&self) -> Self {
        match self {
            Listener::Method(method) => Listener::Method(*method),
            Listener::Callback(callback) => Listener::Callback(Arc::clone(callback)),
        }
    }
}

impl<P> fmt::Debug for Listener<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listener::Method(_) => f.write_str("Listener::Method"),
            Listener::Callback(_) => f.write_str("Listener::Callback"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ControlKind {
    Container,
    Form { method: Method },
    FieldSet { legend: Option<String> },
    Field(Field),
    Submit,
    Link { href: Option<String> },
}

impl ControlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlKind::Container => "container",
            ControlKind::Form { .. } => "form",
            ControlKind::FieldSet { .. } => "field_set",
            ControlKind::Field(_) => "field",
            ControlKind::Submit => "submit",
            ControlKind::Link { .. } => "link",
        }
    }
}

pub struct ControlNode<P> {
    name: String,
    path: ControlPath,
    label: Option<String>,
    kind: ControlKind,
    children: Vec<ControlNode<P>>,
    listener: Option<Listener<P>>,
    initializer: Option<Initializer<P>>,
    initialized: bool,
    behaviors: Vec<Arc<dyn Behavior<P>>>,
    head_elements: Vec<HeadElement>,
}

impl<P> fmt::Debug for ControlNode<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlNode")
            .field("path", &self.path.to_string())
            .field("kind", &self.kind)
            .field("listener", &self.listener)
            .field("behaviors", &self.behaviors.len())
            .field("children", &self.children)
            .finish()
    }
}

impl<P> ControlNode<P> {
    pub fn new(name: impl Into<String>, kind: ControlKind) -> Self {
        let name = name.into();
        Self {
            path: ControlPath::root().child(&name),
            name,
            label: None,
            kind,
            children: Vec::new(),
            listener: None,
            initializer: None,
            initialized: false,
            behaviors: Vec::new(),
            head_elements: Vec::new(),
        }
    }

    /// The unnamed node a page's controls hang from.
    pub fn root() -> Self {
        let mut root = Self::new("", ControlKind::Container);
        root.path = ControlPath::root();
        root
    }

    pub fn container(name: impl Into<String>) -> Self {
        Self::new(name, ControlKind::Container)
    }

    pub fn form(name: impl Into<String>) -> Self {
        Self::new(name, ControlKind::Form { method: Method::Post })
    }

    pub fn get_form(name: impl Into<String>) -> Self {
        Self::new(name, ControlKind::Form { method: Method::Get })
    }

    pub fn field_set(name: impl Into<String>, legend: impl Into<String>) -> Self {
        Self::new(
            name,
            ControlKind::FieldSet {
                legend: Some(legend.into()),
            },
        )
    }

    pub fn input(name: impl Into<String>, kind: FieldKind) -> Self {
        Self::new(name, ControlKind::Field(Field::new(kind)))
    }

    pub fn text_field(name: impl Into<String>) -> Self {
        Self::input(name, FieldKind::Text)
    }

    pub fn text_area(name: impl Into<String>) -> Self {
        Self::input(name, FieldKind::TextArea)
    }

    pub fn hidden_field(name: impl Into<String>) -> Self {
        Self::input(name, FieldKind::Hidden)
    }

    pub fn password_field(name: impl Into<String>) -> Self {
        Self::input(name, FieldKind::Password)
    }

    pub fn checkbox(name: impl Into<String>) -> Self {
        Self::input(name, FieldKind::Checkbox)
    }

    pub fn integer_field(name: impl Into<String>) -> Self {
        Self::input(name, FieldKind::Integer)
    }

    pub fn file_field(name: impl Into<String>) -> Self {
        Self::input(name, FieldKind::File)
    }

    pub fn select(name: impl Into<String>, options: Vec<SelectOption>) -> Self {
        let mut field = Field::new(FieldKind::Select);
        field.options = options;
        Self::new(name, ControlKind::Field(field))
    }

    pub fn submit(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, ControlKind::Submit).with_label(label)
    }

    pub fn link(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, ControlKind::Link { href: None }).with_label(label)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn required(mut self) -> Self {
        if let ControlKind::Field(field) = &mut self.kind {
            field.required = true;
        }
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        if let ControlKind::Field(field) = &mut self.kind {
            field.set_value(value);
        }
        self
    }

    pub fn with_href(mut self, target: impl Into<String>) -> Self {
        if let ControlKind::Link { href } = &mut self.kind {
            *href = Some(target.into());
        }
        self
    }

    pub fn with_listener(mut self, listener: ListenerFn<P>) -> Self {
        self.listener = Some(Listener::Method(listener));
        self
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut P, &mut ActionEvent<'_, P>) -> Result<bool, EngineError> + Send + Sync + 'static,
    {
        self.listener = Some(Listener::Callback(Arc::new(callback)));
        self
    }

    pub fn with_initializer<F>(mut self, initializer: F) -> Self
    where
        F: Fn(&mut ControlNode<P>, &mut InitScope<'_, P>) -> Result<(), EngineError>
            + Send
            + Sync
            + 'static,
    {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    pub fn with_behavior(mut self, behavior: Arc<dyn Behavior<P>>) -> Self {
        self.add_behavior(behavior);
        self
    }

    pub fn with_head_element(mut self, element: HeadElement) -> Self {
        crate::head::push_unique(&mut self.head_elements, element);
        self
    }

    pub fn with_child(mut self, child: ControlNode<P>) -> Self {
        self.add(child);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &ControlPath {
        &self.path
    }

    pub fn label(&self) -> String {
        self.label.clone().unwrap_or_else(|| default_label(&self.name))
    }

    pub fn kind(&self) -> &ControlKind {
        &self.kind
    }

    pub fn children(&self) -> &[ControlNode<P>] {
        &self.children
    }

    pub fn listener(&self) -> Option<&Listener<P>> {
        self.listener.as_ref()
    }

    pub fn set_listener(&mut self, listener: Option<Listener<P>>) {
        self.listener = listener;
    }

    pub fn behaviors(&self) -> &[Arc<dyn Behavior<P>>] {
        &self.behaviors
    }

    pub fn add_behavior(&mut self, behavior: Arc<dyn Behavior<P>>) {
        if !self.behaviors.iter().any(|known| Arc::ptr_eq(known, &behavior)) {
            self.behaviors.push(behavior);
        }
    }

    pub fn head_elements(&self) -> &[HeadElement] {
        &self.head_elements
    }

    pub fn field(&self) -> Option<&Field> {
        match &self.kind {
            ControlKind::Field(field) => Some(field),
            _ => None,
        }
    }

    pub fn field_mut(&mut self) -> Option<&mut Field> {
        match &mut self.kind {
            ControlKind::Field(field) => Some(field),
            _ => None,
        }
    }

    pub fn is_field(&self) -> bool {
        matches!(self.kind, ControlKind::Field(_))
    }

    pub fn is_form(&self) -> bool {
        matches!(self.kind, ControlKind::Form { .. })
    }

    pub fn is_submit(&self) -> bool {
        matches!(self.kind, ControlKind::Submit)
    }

    /// Attaches `child`. A child with the same name is replaced at its
    /// existing position; otherwise the child is appended.
    pub fn add(&mut self, mut child: ControlNode<P>) -> &mut ControlNode<P> {
        child.attach_under(&self.path);
        let position = match self.children.iter().position(|known| known.name == child.name) {
            Some(position) => {
                self.children[position] = child;
                position
            }
            None => {
                self.children.push(child);
                self.children.len() - 1
            }
        };
        &mut self.children[position]
    }

    pub fn remove(&mut self, name: &str) -> Option<ControlNode<P>> {
        let position = self.children.iter().position(|child| child.name == name)?;
        Some(self.children.remove(position))
    }

    /// Direct children only.
    pub fn find(&self, name: &str) -> Option<&ControlNode<P>> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut ControlNode<P>> {
        self.children.iter_mut().find(|child| child.name == name)
    }

    /// First descendant with `name`, depth first in insertion order.
    pub fn find_deep(&self, name: &str) -> Option<&ControlNode<P>> {
        self.descendants().find(|node| node.name == name)
    }

    pub fn find_deep_mut(&mut self, name: &str) -> Option<&mut ControlNode<P>> {
        let path = self.find_deep(name)?.path.clone();
        self.at_mut(&path)
    }

    /// Node at an absolute path, provided this node lies on that path.
    pub fn at(&self, path: &ControlPath) -> Option<&ControlNode<P>> {
        let relative = path.segments().strip_prefix(self.path.segments())?;
        relative
            .iter()
            .try_fold(self, |node, segment| node.find(segment))
    }

    pub fn at_mut(&mut self, path: &ControlPath) -> Option<&mut ControlNode<P>> {
        let relative = path.segments().strip_prefix(self.path.segments())?.to_vec();
        let mut node = self;
        for segment in &relative {
            node = node.find_mut(segment)?;
        }
        Some(node)
    }

    /// Every node below this one, depth first in insertion order.
    pub fn descendants(&self) -> Descendants<'_, P> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// Leaf input controls, flattening forms and field sets. Each call
    /// starts a fresh traversal.
    pub fn collect_fields_recursive(&self) -> impl Iterator<Item = &ControlNode<P>> + Clone + '_ {
        self.descendants().filter(|node| node.is_field())
    }

    /// Looks up a field by control name anywhere below this node.
    pub fn field_named(&self, name: &str) -> Option<&Field> {
        self.collect_fields_recursive()
            .find(|node| node.name == name)
            .and_then(ControlNode::field)
    }

    pub fn field_named_mut(&mut self, name: &str) -> Option<&mut Field> {
        let path = self
            .collect_fields_recursive()
            .find(|node| node.name == name)?
            .path
            .clone();
        self.at_mut(&path)?.field_mut()
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.field_named(name).map(|field| &field.value)
    }

    pub fn set_error(&mut self, name: &str, message: impl Into<String>) {
        if let Some(field) = self.field_named_mut(name) {
            field.error = Some(message.into());
        }
    }

    /// `true` when no field below this node carries an error.
    pub fn is_valid(&self) -> bool {
        self.collect_fields_recursive()
            .filter_map(ControlNode::field)
            .all(Field::is_valid)
    }

    pub fn clear_values(&mut self) {
        self.visit_mut(&mut |node| {
            if let ControlKind::Field(field) = &mut node.kind {
                field.set_value(Value::Null);
                field.error = None;
                field.file = None;
            }
        });
    }

    /// Whether this form was the one submitted with `request`: the method
    /// matches and the `form_name` parameter, when present, names it.
    pub fn is_form_submission(&self, request: &Request) -> bool {
        match &self.kind {
            ControlKind::Form { method } => {
                request.method == *method
                    && request
                        .param(FORM_NAME_PARAM)
                        .map_or(true, |submitted| submitted == self.name)
            }
            _ => false,
        }
    }

    /// Copies every bound field into `bean`, using the field name as the
    /// property path.
    pub fn copy_to(
        &self,
        bean: &mut dyn Bean,
        cache: &mut PropertyCache,
    ) -> Result<(), EngineError> {
        for node in self.collect_fields_recursive() {
            let Some(field) = node.field() else { continue };
            if field.kind == FieldKind::File || field.value.is_null() {
                continue;
            }
            property::assign(bean, &node.name, field.value.clone(), cache)?;
        }
        Ok(())
    }

    /// Populates fields from `bean`. Fields without a matching property are
    /// left untouched.
    pub fn copy_from(
        &mut self,
        bean: &dyn Bean,
        cache: &mut PropertyCache,
    ) -> Result<(), EngineError> {
        let paths: Vec<ControlPath> = self
            .collect_fields_recursive()
            .filter(|node| node.field().is_some_and(|field| field.kind != FieldKind::File))
            .map(|node| node.path.clone())
            .collect();

        for path in paths {
            let Some(node) = self.at_mut(&path) else { continue };
            let value = match property::resolve(bean, &node.name, cache) {
                Ok(value) => value,
                Err(EngineError::PropertyNotFound { .. }) => continue,
                Err(err) => return Err(err),
            };
            if let Some(field) = node.field_mut() {
                field.set_value(value);
            }
        }
        Ok(())
    }

    /// Serialisable view handed to templates.
    pub fn snapshot(&self) -> Value {
        let label = self.label();
        match &self.kind {
            ControlKind::Field(field) => field.snapshot(&self.name, &label),
            ControlKind::Submit => json!({ "name": self.name, "kind": "submit", "label": label }),
            ControlKind::Link { href } => {
                json!({ "name": self.name, "kind": "link", "label": label, "href": href })
            }
            kind => {
                let mut children = Map::new();
                for child in &self.children {
                    children.insert(child.name.clone(), child.snapshot());
                }
                let mut snapshot = json!({
                    "name": self.name,
                    "kind": kind.as_str(),
                    "children": children,
                });
                match kind {
                    ControlKind::Form { method } => {
                        let mut fields = Map::new();
                        for node in self.collect_fields_recursive() {
                            fields.insert(node.name.clone(), node.snapshot());
                        }
                        snapshot["method"] = json!(method);
                        snapshot["fields"] = Value::Object(fields);
                        snapshot["valid"] = Value::Bool(self.is_valid());
                    }
                    ControlKind::FieldSet { legend } => snapshot["legend"] = json!(legend),
                    _ => {}
                }
                snapshot
            }
        }
    }

    pub(crate) fn visit_mut(&mut self, visit: &mut dyn FnMut(&mut ControlNode<P>)) {
        for child in &mut self.children {
            visit(child);
            child.visit_mut(visit);
        }
    }

    pub(crate) fn initializer(&self) -> Option<Initializer<P>> {
        self.initializer.clone()
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub(crate) fn reset_initialized(&mut self) {
        self.initialized = false;
        for child in &mut self.children {
            child.reset_initialized();
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.descendants().count()
    }

    fn attach_under(&mut self, parent: &ControlPath) {
        self.path = parent.child(&self.name);
        let path = self.path.clone();
        for child in &mut self.children {
            child.attach_under(&path);
        }
    }
}

pub struct Descendants<'a, P> {
    stack: Vec<&'a ControlNode<P>>,
}

impl<P> Clone for Descendants<'_, P> {
    fn clone(&self) -> Self {
        Self {
            stack: self.stack.clone(),
        }
    }
}

impl<'a, P> Iterator for Descendants<'a, P> {
    type Item = &'a ControlNode<P>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

fn default_label(name: &str) -> String {
    let tail = name.rsplit('.').next().unwrap_or(name);
    let mut label = String::with_capacity(tail.len());
    for (index, ch) in tail.chars().enumerate() {
        if index == 0 {
            label.extend(ch.to_uppercase());
        } else if ch.is_ascii_uppercase() {
            label.push(' ');
            label.push(ch);
        } else if ch == '_' {
            label.push(' ');
        } else {
            label.push(ch);
        }
    }
    label
}

#[cfg(test)]
#[path = "tests/control_tests.rs"]
mod tests;
