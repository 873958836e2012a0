use serde::{Deserialize, Serialize};
use shared::domain::Mode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub mode: Mode,
    /// Template used for the diagnostic error view.
    pub error_template: String,
    /// Page rendered for paths with no registered page.
    pub not_found_path: String,
    /// Forward target when a security check vetoes without navigating.
    pub access_denied_path: String,
    pub forward_limit: usize,
    pub init_pass_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            error_template: "error".to_string(),
            not_found_path: "/not-found".to_string(),
            access_denied_path: "/access-denied".to_string(),
            forward_limit: 8,
            init_pass_limit: 16,
        }
    }
}
