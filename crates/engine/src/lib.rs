//! Request-processing engine for pages built from control trees.

pub mod behavior;
pub mod context;
pub mod control;
pub mod dispatcher;
pub mod engine;
pub mod error_page;
pub mod field;
pub mod head;
pub mod lifecycle;
pub mod menu;
pub mod page;
pub mod property;
pub mod registry;
pub mod settings;

pub use behavior::{AjaxBehavior, Behavior};
pub use context::{ActionEvent, InitScope, RequestContext, Session};
pub use control::{ControlKind, ControlNode, ControlPath, Listener};
pub use engine::{Engine, RequestOutcome, TemplateRenderer};
pub use field::{Field, FieldKind, SelectOption};
pub use head::HeadElement;
pub use lifecycle::{LifecycleState, PageInstance, Step};
pub use page::{Model, Page, PageHandle, PageOutcome, PageRegistry};
pub use property::{Bean, PropertyCache};
pub use registry::ControlRegistry;
pub use settings::EngineSettings;
pub use shared::error::EngineError;
