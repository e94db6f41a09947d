/// Index of a scope record inside a [`ScopeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub usize);

/// A single scope containing variable bindings, in declaration order.
#[derive(Debug, Clone)]
pub struct Scope<T> {
    parent: Option<ScopeId>,
    bindings: Vec<(String, T)>,
}

impl<T> Scope<T> {
    pub fn new(parent: Option<ScopeId>) -> Self {
        Scope {
            parent,
            bindings: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// Insert a binding, replacing an earlier one with the same name.
    pub fn insert(&mut self, name: String, value: T) {
        match self.bindings.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.bindings.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.bindings.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.bindings.iter_mut().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.bindings.iter().map(|(n, v)| (n, v))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Arena of scopes linked to their parents by index.
///
/// Scopes are created and discarded in strict nesting order (blocks, calls,
/// loop iterations), so popping truncates the arena. A child may name any
/// live scope as its parent; function calls hang off the root rather than
/// the caller.
#[derive(Debug, Clone)]
pub struct ScopeArena<T> {
    scopes: Vec<Scope<T>>,
}

impl<T> Default for ScopeArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ScopeArena<T> {
    /// Create an arena holding only the root scope.
    pub fn new() -> Self {
        ScopeArena {
            scopes: vec![Scope::new(None)],
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn push_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.scopes.push(Scope::new(Some(parent)));
        ScopeId(self.scopes.len() - 1)
    }

    /// Discard `id` and every scope created after it. The root is never
    /// discarded.
    pub fn pop_scope(&mut self, id: ScopeId) {
        if id.0 > 0 && id.0 < self.scopes.len() {
            self.scopes.truncate(id.0);
        }
    }

    pub fn is_live(&self, id: ScopeId) -> bool {
        id.0 < self.scopes.len()
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope<T>> {
        self.scopes.get(id.0)
    }

    pub fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.scope(id).and_then(Scope::parent)
    }

    pub fn insert(&mut self, scope: ScopeId, name: impl Into<String>, value: T) {
        if let Some(s) = self.scopes.get_mut(scope.0) {
            s.insert(name.into(), value);
        }
    }

    /// Look up a binding, walking parent links from `scope` outward.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<(ScopeId, &T)> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = self.scopes.get(id.0)?;
            if let Some(value) = s.get(name) {
                return Some((id, value));
            }
            current = s.parent;
        }
        None
    }

    /// The scope `name` resolves to from `scope`, if any.
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        self.lookup(scope, name).map(|(id, _)| id)
    }

    pub fn get_in(&self, scope: ScopeId, name: &str) -> Option<&T> {
        self.scopes.get(scope.0)?.get(name)
    }

    pub fn get_in_mut(&mut self, scope: ScopeId, name: &str) -> Option<&mut T> {
        self.scopes.get_mut(scope.0)?.get_mut(name)
    }

    pub fn is_defined(&self, scope: ScopeId, name: &str) -> bool {
        self.lookup(scope, name).is_some()
    }

    /// Number of live scopes, root included.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_walks_parents() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        arena.insert(root, "x", 1);
        let child = arena.push_scope(root);
        arena.insert(child, "y", 2);

        assert_eq!(arena.lookup(child, "x"), Some((root, &1)));
        assert_eq!(arena.lookup(child, "y"), Some((child, &2)));
        assert_eq!(arena.lookup(root, "y"), None);
    }

    #[test]
    fn test_shadowing() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        arena.insert(root, "x", 1);
        let child = arena.push_scope(root);
        arena.insert(child, "x", 2);

        assert_eq!(arena.lookup(child, "x").map(|(_, v)| *v), Some(2));
        arena.pop_scope(child);
        assert_eq!(arena.lookup(root, "x").map(|(_, v)| *v), Some(1));
    }

    #[test]
    fn test_pop_discards_nested_scopes() {
        let mut arena: ScopeArena<i32> = ScopeArena::new();
        let root = arena.root();
        let a = arena.push_scope(root);
        let b = arena.push_scope(a);
        assert_eq!(arena.depth(), 3);

        arena.pop_scope(a);
        assert!(!arena.is_live(b));
        assert_eq!(arena.depth(), 1);

        arena.pop_scope(root);
        assert_eq!(arena.depth(), 1);
    }

    #[test]
    fn test_sibling_call_scope_hangs_off_root() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        let caller = arena.push_scope(root);
        arena.insert(caller, "local", 7);
        let callee = arena.push_scope(root);

        assert!(!arena.is_defined(callee, "local"));
        assert_eq!(arena.parent(callee), Some(root));
    }

    #[test]
    fn test_insert_keeps_declaration_order() {
        let mut scope = Scope::new(None);
        scope.insert("b".to_string(), 1);
        scope.insert("a".to_string(), 2);
        scope.insert("b".to_string(), 3);
        let names: Vec<_> = scope.iter().map(|(n, v)| (n.as_str(), *v)).collect();
        assert_eq!(names, vec![("b", 3), ("a", 2)]);
    }
}
