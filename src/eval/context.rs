use std::collections::HashMap;
use std::sync::Arc;

use crate::object::{FunctionId, Key, Object};

use super::compile::Program;

/// The sole scoping mechanism: one mutable Key → Object mapping, dynamically
/// scoped by saving and restoring bindings in LIFO pairs around every
/// function application (and around header parsing). Closures never capture
/// an environment; they rely on this discipline instead.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    map: HashMap<Key, Object>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh table with the standard operator library installed.
    pub fn standard() -> Self {
        let mut table = Self::new();
        super::builtins::install(&mut table);
        table
    }

    pub fn get(&self, key: &Key) -> Option<&Object> {
        self.map.get(key)
    }

    pub fn bind(&mut self, key: Key, value: Object) {
        self.map.insert(key, value);
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.map.keys()
    }

    /// Whether `name` is bound to a function under any call shape. Used by
    /// the literal interpreter to tell operator occurrences from plain
    /// values when deciding implicit multiplication.
    pub fn is_operator(&self, name: &str) -> bool {
        let shapes = [
            Key::shaped(name, true, 1),
            Key::shaped(name, false, 1),
            Key::shaped(name, true, 0),
            Key::shaped(name, true, 2),
            Key::shaped(name, false, 2),
            Key::name(name),
        ];
        shapes
            .iter()
            .any(|key| matches!(self.map.get(key), Some(Object::Function(_))))
    }

    /// Resolves an operator occurrence through its candidate keys in
    /// priority order, returning the first function binding.
    pub fn resolve_operator(
        &self,
        name: &str,
        has_left: bool,
        right: usize,
    ) -> Option<(Key, Arc<crate::object::Function>)> {
        for key in Key::candidates(name, has_left, right) {
            if let Some(Object::Function(func)) = self.map.get(&key) {
                return Some((key, func.clone()));
            }
        }
        None
    }

    /// Installs `bindings`, returning a frame that remembers the exact prior
    /// state of every touched key, including "was absent".
    pub fn shadow(&mut self, bindings: Vec<(Key, Object)>) -> ShadowFrame {
        let mut saved = Vec::with_capacity(bindings.len());
        for (key, value) in bindings {
            saved.push((key.clone(), self.map.insert(key, value)));
        }
        ShadowFrame { saved }
    }

    /// Restores a shadow frame. Reverse order, so a key shadowed twice in
    /// one frame still lands on its original value.
    pub fn restore(&mut self, frame: ShadowFrame) {
        for (key, previous) in frame.saved.into_iter().rev() {
            match previous {
                Some(value) => {
                    self.map.insert(key, value);
                }
                None => {
                    self.map.remove(&key);
                }
            }
        }
    }
}

/// Saved bindings for one application or header parse, released in LIFO
/// order with the frame nesting.
#[derive(Debug)]
pub struct ShadowFrame {
    saved: Vec<(Key, Option<Object>)>,
}

impl ShadowFrame {
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }
}

/// Function-identity → compiled program. Populated lazily, never
/// invalidated within one evaluation session: functions are immutable once
/// constructed.
#[derive(Debug, Default)]
pub struct ProgramCache {
    map: HashMap<FunctionId, Arc<Program>>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: FunctionId) -> Option<Arc<Program>> {
        self.map.get(&id).cloned()
    }

    pub fn insert(&mut self, id: FunctionId, program: Arc<Program>) {
        self.map.insert(id, program);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_shadow_and_restore_exact() {
        let mut table = SymbolTable::new();
        table.bind(Key::name("x"), Object::Int(1));

        let frame = table.shadow(vec![
            (Key::name("x"), Object::Int(2)),
            (Key::name("y"), Object::Int(3)),
        ]);
        assert_eq!(table.get(&Key::name("x")), Some(&Object::Int(2)));
        assert_eq!(table.get(&Key::name("y")), Some(&Object::Int(3)));

        table.restore(frame);
        assert_eq!(table.get(&Key::name("x")), Some(&Object::Int(1)));
        // "was absent" restores to absent, not to a unit value.
        assert_eq!(table.get(&Key::name("y")), None);
    }

    #[test]
    fn test_double_shadow_same_key() {
        let mut table = SymbolTable::new();
        let frame = table.shadow(vec![
            (Key::name("x"), Object::Int(1)),
            (Key::name("x"), Object::Int(2)),
        ]);
        assert_eq!(table.get(&Key::name("x")), Some(&Object::Int(2)));
        table.restore(frame);
        assert_eq!(table.get(&Key::name("x")), None);
    }

    #[test]
    fn test_nested_shadow_is_lifo() {
        let mut table = SymbolTable::new();
        table.bind(Key::name("x"), Object::Int(1));
        let outer = table.shadow(vec![(Key::name("x"), Object::Int(2))]);
        let inner = table.shadow(vec![(Key::name("x"), Object::Int(3))]);
        table.restore(inner);
        assert_eq!(table.get(&Key::name("x")), Some(&Object::Int(2)));
        table.restore(outer);
        assert_eq!(table.get(&Key::name("x")), Some(&Object::Int(1)));
    }

    #[test]
    fn test_standard_table_binds_operators() {
        let table = SymbolTable::standard();
        assert!(table.is_operator("+"));
        assert!(table.is_operator("send"));
        assert!(table.is_operator("map"));
        assert!(!table.is_operator("doubtful"));
    }
}
