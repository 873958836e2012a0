use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::protocol::UploadedFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    TextArea,
    Hidden,
    Password,
    Checkbox,
    Select,
    Integer,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Input state of a leaf control: the bound value plus any validation
/// failure recorded against it.
#[derive(Debug, Clone, Default)]
pub struct Field {
    pub kind: FieldKind,
    pub value: Value,
    pub required: bool,
    pub options: Vec<SelectOption>,
    pub error: Option<String>,
    pub file: Option<UploadedFile>,
}

impl Field {
    pub fn new(kind: FieldKind) -> Self {
        let value = match kind {
            FieldKind::Checkbox => Value::Bool(false),
            FieldKind::Integer | FieldKind::File => Value::Null,
            _ => Value::String(String::new()),
        };
        Self {
            kind,
            value,
            ..Self::default()
        }
    }

    /// Takes the submitted value for this field. Conversion failures are
    /// recorded on the field rather than returned.
    pub fn bind(&mut self, raw: Option<&str>, file: Option<&UploadedFile>) {
        self.error = None;
        match self.kind {
            FieldKind::Checkbox => {
                self.value = Value::Bool(raw.is_some_and(|value| !value.is_empty()));
            }
            FieldKind::Integer => {
                let text = raw.unwrap_or_default().trim();
                self.value = if text.is_empty() {
                    Value::Null
                } else {
                    match text.parse::<i64>() {
                        Ok(number) => Value::from(number),
                        Err(_) => {
                            self.error = Some(format!("'{text}' is not a whole number"));
                            Value::String(text.to_string())
                        }
                    }
                };
            }
            FieldKind::File => {
                self.file = file.cloned();
                self.value = self
                    .file
                    .as_ref()
                    .map(|upload| Value::String(upload.filename.clone()))
                    .unwrap_or(Value::Null);
            }
            _ => {
                self.value = Value::String(raw.unwrap_or_default().to_string());
            }
        }
    }

    /// Checks submission rules. Returns `true` when the field is valid.
    pub fn validate(&mut self, label: &str) -> bool {
        if self.error.is_some() {
            return false;
        }
        if self.required && self.is_blank() {
            self.error = Some(format!("{label} is required"));
            return false;
        }
        if self.kind == FieldKind::Select && !self.is_blank() {
            let chosen = self.text();
            if !self.options.iter().any(|option| option.value == chosen) {
                self.error = Some(format!("'{chosen}' is not a valid choice for {label}"));
                return false;
            }
        }
        true
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_blank(&self) -> bool {
        match &self.value {
            Value::Null => true,
            Value::Bool(checked) => !checked,
            Value::String(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    /// The value as submitted text.
    pub fn text(&self) -> String {
        match &self.value {
            Value::Null => String::new(),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }

    /// Replaces the value, normalising it to what this kind stores.
    pub fn set_value(&mut self, value: Value) {
        self.value = match (self.kind, value) {
            (FieldKind::Checkbox, Value::Bool(flag)) => Value::Bool(flag),
            (FieldKind::Checkbox, Value::Null) => Value::Bool(false),
            (FieldKind::Integer, Value::Number(number)) => Value::Number(number),
            (FieldKind::Integer, Value::Null) => Value::Null,
            (_, Value::Null) => Value::String(String::new()),
            (_, Value::String(text)) => Value::String(text),
            (_, other) => Value::String(other.to_string()),
        };
    }

    pub fn snapshot(&self, name: &str, label: &str) -> Value {
        let mut snapshot = json!({
            "name": name,
            "label": label,
            "kind": self.kind,
            "value": self.value,
            "required": self.required,
            "valid": self.is_valid(),
            "error": self.error,
        });
        if !self.options.is_empty() {
            snapshot["options"] = json!(self.options);
        }
        if let Some(file) = &self.file {
            snapshot["file"] = json!({
                "filename": file.filename,
                "content_type": file.content_type,
                "size": file.bytes.len(),
            });
        }
        snapshot
    }
}
