//! Lexically scoped variable frames.
//!
//! The source chains frames via prototype inheritance; re-architected
//! here as an explicit parent pointer:
//! `get` walks outward from the current frame to the root, `set` always
//! binds in the current (innermost) frame.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

struct Frame {
    vars: Mutex<HashMap<String, Value>>,
    parent: Option<VariableScope>,
}

/// A variable frame with an optional parent. Cloning is cheap (`Arc`) and
/// shares the same frame — use [`VariableScope::child`] to push a new one.
#[derive(Clone)]
pub struct VariableScope(Arc<Frame>);

impl VariableScope {
    /// A fresh frame with no parent — the root of one execution.
    pub fn root() -> Self {
        Self(Arc::new(Frame {
            vars: Mutex::new(HashMap::new()),
            parent: None,
        }))
    }

    /// Push a new frame whose parent is `self`.
    pub fn child(&self) -> Self {
        Self(Arc::new(Frame {
            vars: Mutex::new(HashMap::new()),
            parent: Some(self.clone()),
        }))
    }

    /// Read a variable, walking from this frame outward to the root.
    /// Returns the innermost binding found.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut frame = Some(self);
        while let Some(f) = frame {
            if let Some(v) = f.0.vars.lock().get(name) {
                return Some(v.clone());
            }
            frame = f.0.parent.as_ref();
        }
        None
    }

    /// Write a variable into this frame only. Never visible to the
    /// parent after this node returns, nor to siblings.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.vars.lock().insert(name.into(), value);
    }

    /// Flatten the chain into a single map, root first so inner frames
    /// override outer ones.
    pub fn to_object(&self) -> Map<String, Value> {
        let mut chain = Vec::new();
        let mut frame = Some(self);
        while let Some(f) = frame {
            chain.push(f);
            frame = f.0.parent.as_ref();
        }
        let mut out = Map::new();
        for f in chain.into_iter().rev() {
            for (k, v) in f.0.vars.lock().iter() {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_walks_outward_to_root() {
        let root = VariableScope::root();
        root.set("a", serde_json::json!(1));
        let mid = root.child();
        let leaf = mid.child();
        assert_eq!(leaf.get("a"), Some(serde_json::json!(1)));
    }

    #[test]
    fn set_only_binds_innermost_frame() {
        let root = VariableScope::root();
        root.set("a", serde_json::json!("root"));
        let child = root.child();
        child.set("a", serde_json::json!("child"));
        assert_eq!(child.get("a"), Some(serde_json::json!("child")));
        assert_eq!(root.get("a"), Some(serde_json::json!("root")));
    }

    #[test]
    fn to_object_inner_overrides_outer() {
        let root = VariableScope::root();
        root.set("a", serde_json::json!(1));
        root.set("b", serde_json::json!(2));
        let child = root.child();
        child.set("b", serde_json::json!(20));
        let flattened = child.to_object();
        assert_eq!(flattened.get("a"), Some(&serde_json::json!(1)));
        assert_eq!(flattened.get("b"), Some(&serde_json::json!(20)));
    }

    #[test]
    fn missing_variable_is_none() {
        let root = VariableScope::root();
        assert_eq!(root.get("missing"), None);
    }
}
