//! Template collaborator backed by `*.htm` files.
//!
//! `${path}` inserts the model value at `path` HTML-escaped, `$!{path}`
//! inserts it verbatim. Arrays of strings are joined with newlines, null and
//! missing values render as nothing.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::Context;
use engine::{property, EngineError, Model, PropertyCache, TemplateRenderer};
use serde_json::Value;
use tracing::info;

const EXTENSION: &str = "htm";

#[derive(Debug, Default)]
pub struct FileTemplates {
    templates: BTreeMap<String, String>,
}

impl FileTemplates {
    /// Loads every template below `dir`; `customer/edit.htm` becomes
    /// `customer/edit`.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let mut templates = BTreeMap::new();
        scan(dir, dir, &mut templates)?;
        info!(dir = %dir.display(), count = templates.len(), "templates loaded");
        Ok(Self { templates })
    }

    pub fn from_sources<I, K, V>(sources: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            templates: sources
                .into_iter()
                .map(|(id, text)| (id.into(), text.into()))
                .collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }
}

fn scan(root: &Path, dir: &Path, templates: &mut BTreeMap<String, String>) -> anyhow::Result<()> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read template dir '{}'", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            scan(root, &path, templates)?;
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
            continue;
        }
        let id = path
            .strip_prefix(root)
            .with_context(|| format!("template '{}' outside '{}'", path.display(), root.display()))?
            .with_extension("")
            .components()
            .map(|part| part.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read template '{}'", path.display()))?;
        templates.insert(id, text);
    }
    Ok(())
}

impl TemplateRenderer for FileTemplates {
    fn render(&self, template: &str, model: &Model) -> Result<String, EngineError> {
        let source = self
            .templates
            .get(template)
            .ok_or_else(|| EngineError::transport(format!("template '{template}' not found")))?;
        let root = Value::Object(model.clone());
        let mut cache = PropertyCache::new();

        let mut out = String::with_capacity(source.len());
        let mut rest = source.as_str();
        while let Some(start) = rest.find('$') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            let (raw, open) = if tail.starts_with("$!{") {
                (true, 3)
            } else if tail.starts_with("${") {
                (false, 2)
            } else {
                out.push('$');
                rest = &tail[1..];
                continue;
            };
            let Some(end) = tail[open..].find('}') else {
                return Err(EngineError::transport(format!(
                    "unclosed expression in template '{template}'"
                )));
            };

            let path = tail[open..open + end].trim();
            let value = property::resolve_value(&root, path, &mut cache)?;
            let text = display(&value);
            if raw {
                out.push_str(&text);
            } else {
                out.push_str(&html_escape::encode_text(&text));
            }
            rest = &tail[open + end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(display).collect::<Vec<_>>().join("\n"),
        other => other.to_string(),
    }
}
