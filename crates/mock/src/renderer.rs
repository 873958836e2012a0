use std::{collections::BTreeSet, sync::Mutex};

use engine::{EngineError, Model, TemplateRenderer};

#[derive(Debug, Clone)]
pub struct RenderCall {
    pub template: String,
    pub model: Model,
}

/// Records every render and answers with the template id followed by the
/// model as JSON, so assertions can look for values in the body.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    calls: Mutex<Vec<RenderCall>>,
    missing: Mutex<BTreeSet<String>>,
}

impl RecordingRenderer {
    /// Makes `template` fail as if it did not exist.
    pub fn fail_on(&self, template: &str) {
        if let Ok(mut missing) = self.missing.lock() {
            missing.insert(template.to_string());
        }
    }

    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn templates(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.template).collect()
    }

    pub fn last(&self) -> Option<RenderCall> {
        self.calls.lock().ok().and_then(|calls| calls.last().cloned())
    }

    pub fn count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }
}

impl TemplateRenderer for RecordingRenderer {
    fn render(&self, template: &str, model: &Model) -> Result<String, EngineError> {
        let missing = self
            .missing
            .lock()
            .map_err(|_| EngineError::transport("renderer lock poisoned"))?
            .contains(template);
        if missing {
            return Err(EngineError::transport(format!("template '{template}' not found")));
        }

        self.calls
            .lock()
            .map_err(|_| EngineError::transport("renderer lock poisoned"))?
            .push(RenderCall {
                template: template.to_string(),
                model: model.clone(),
            });
        let body = serde_json::to_string(model)
            .map_err(|err| EngineError::transport(err.to_string()))?;
        Ok(format!("<!-- {template} -->\n{body}"))
    }
}
