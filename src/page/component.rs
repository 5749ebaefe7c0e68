//! Page-local components, looked up by element name.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::tools::Component;

/// Element name a tool's component is mounted under.
pub fn element_name(tool_name: &str) -> String {
    format!("{tool_name}-element")
}

/// Mounted components keyed by element name.
#[derive(Default)]
pub struct ComponentRegistry {
    elements: RwLock<HashMap<String, Component>>,
}

impl ComponentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `component` under `tag`. A tag can only be defined once.
    pub fn define(&self, tag: impl Into<String>, component: Component) -> Result<()> {
        let tag = tag.into();
        let mut elements = self.elements.write().unwrap_or_else(PoisonError::into_inner);
        if elements.contains_key(&tag) {
            return Err(Error::InvalidParams(format!("element {tag} is already defined")));
        }
        tracing::debug!(tag = %tag, "component defined");
        elements.insert(tag, component);
        Ok(())
    }

    /// Find the component mounted under `tag`.
    pub fn query(&self, tag: &str) -> Option<Component> {
        self.elements
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tag)
            .cloned()
    }

    /// Unmount `tag`, returning what was there.
    pub fn remove(&self, tag: &str) -> Option<Component> {
        self.elements
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag)
    }

    /// Defined tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .elements
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        tags.sort();
        tags
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn tags_are_defined_once() {
        let registry = ComponentRegistry::new();
        registry.define(element_name("read-console"), Arc::new(1_u8)).unwrap();
        assert!(registry
            .define("read-console-element", Arc::new(2_u8))
            .is_err());

        let mounted = registry.query("read-console-element").unwrap();
        assert_eq!(mounted.downcast_ref::<u8>(), Some(&1));

        assert!(registry.remove("read-console-element").is_some());
        assert!(registry.query("read-console-element").is_none());
        assert!(registry.tags().is_empty());
    }
}
