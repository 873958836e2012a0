//! Application menu shared by every request.
//!
//! The definition is parsed once under a single lock and then read without
//! locking. Requests get their own deep copy with `selected` flags set for
//! the request path, so no request ever mutates the shared tree.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, OnceLock,
    },
};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Menu {
    pub label: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "items")]
    pub children: Vec<Menu>,
    #[serde(default, skip_deserializing)]
    pub selected: bool,
}

#[derive(Debug, Deserialize)]
struct MenuFile {
    #[serde(default, rename = "items")]
    children: Vec<Menu>,
}

impl Menu {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let file: MenuFile = toml::from_str(text).context("invalid menu definition")?;
        Ok(Self {
            label: "root".to_string(),
            children: file.children,
            ..Self::default()
        })
    }

    /// Copy of this menu with `selected` set on the item matching `path`
    /// and on all of its ancestors.
    pub fn select(&self, path: &str) -> Menu {
        let mut copy = self.clone();
        copy.mark(path);
        copy
    }

    fn mark(&mut self, path: &str) -> bool {
        let mut selected = self.path.as_deref() == Some(path);
        for child in &mut self.children {
            selected |= child.mark(path);
        }
        self.selected = selected;
        selected
    }

    pub fn selected_child(&self) -> Option<&Menu> {
        self.children.iter().find(|child| child.selected)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub struct MenuCatalog {
    source: Option<PathBuf>,
    root: OnceLock<Arc<Menu>>,
    init_lock: Mutex<()>,
    loads: AtomicUsize,
}

impl MenuCatalog {
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        Self {
            source: Some(path.as_ref().to_path_buf()),
            root: OnceLock::new(),
            init_lock: Mutex::new(()),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn from_menu(menu: Menu) -> Self {
        let catalog = Self {
            source: None,
            root: OnceLock::new(),
            init_lock: Mutex::new(()),
            loads: AtomicUsize::new(0),
        };
        let _ = catalog.root.set(Arc::new(menu));
        catalog
    }

    /// The shared definition, loading it on first use.
    pub fn root(&self) -> anyhow::Result<Arc<Menu>> {
        if let Some(menu) = self.root.get() {
            return Ok(Arc::clone(menu));
        }

        let _guard = self
            .init_lock
            .lock()
            .map_err(|_| anyhow!("menu initialisation lock poisoned"))?;
        if let Some(menu) = self.root.get() {
            return Ok(Arc::clone(menu));
        }

        let source = self
            .source
            .as_ref()
            .ok_or_else(|| anyhow!("menu has no source"))?;
        let text = std::fs::read_to_string(source)
            .with_context(|| format!("failed to read menu file {}", source.display()))?;
        let menu = Arc::new(Menu::parse(&text)?);
        self.loads.fetch_add(1, Ordering::Relaxed);
        info!(path = %source.display(), items = menu.children.len(), "menu loaded");

        let _ = self.root.set(Arc::clone(&menu));
        Ok(menu)
    }

    /// Request-local copy with selection applied.
    pub fn for_request(&self, path: &str) -> anyhow::Result<Menu> {
        Ok(self.root()?.select(path))
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[path = "tests/menu_tests.rs"]
mod tests;
