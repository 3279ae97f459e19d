#![forbid(unsafe_code)]

//! Per-node subscription tables.
//!
//! A [`Registry`] maps pattern text to a compiled [`PathMatcher`] and the
//! ordered callbacks registered under it. Each node owns one; a notification
//! consults the node's registry merged with every ancestor's (see
//! [`merged`]).
//!
//! # Invariants
//!
//! 1. A pattern is compiled once per registry; later registrations append.
//! 2. Callbacks run in registration order; pattern entries iterate in the
//!    order their pattern was first registered.
//! 3. An entry whose last callback is removed disappears, so an identical
//!    pattern at an outer level becomes visible again.
//! 4. In a merged view an inner level's entry shadows an outer level's entry
//!    with the identical pattern text. Distinct patterns always coexist.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{CallbackError, TreeError};
use crate::matcher::{MATCH_ALL, PathMatcher, WildcardMode};
use crate::propagate::ChangeEvent;

/// A subscriber callback.
pub type Callback = Rc<dyn Fn(&ChangeEvent<'_>) -> Result<(), CallbackError>>;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one `subscribe` call; pass it to `unsubscribe` to remove just
/// that callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// One callback registered under a pattern.
#[derive(Clone)]
pub struct Registration {
    pub id: SubscriptionId,
    pub callback: Callback,
    /// Halt propagation right after this callback runs.
    pub auto_cancel: bool,
}

/// A compiled pattern and its callbacks.
#[derive(Clone)]
pub struct Entry {
    pub matcher: Rc<PathMatcher>,
    pub callbacks: Vec<Registration>,
}

/// Pattern table of one node (or of a shared scope).
#[derive(Default)]
pub struct Registry {
    entries: IndexMap<String, Entry>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, e)| (k, e.callbacks.len())))
            .finish()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under every pattern in `patterns`.
    ///
    /// All patterns are compiled before anything is stored, so a bad pattern
    /// leaves the registry untouched.
    pub fn register(
        &mut self,
        patterns: Vec<String>,
        callback: Callback,
        auto_cancel: bool,
        mode: WildcardMode,
    ) -> Result<SubscriptionId, TreeError> {
        let mut fresh = Vec::new();
        for pattern in &patterns {
            let key = normalize(pattern);
            if !self.entries.contains_key(key) && !fresh.iter().any(|(k, _): &(String, _)| k == key) {
                fresh.push((key.to_owned(), PathMatcher::compile(key, mode)?));
            }
        }
        for (key, matcher) in fresh {
            self.entries.insert(
                key,
                Entry {
                    matcher: Rc::new(matcher),
                    callbacks: Vec::new(),
                },
            );
        }

        let id = SubscriptionId::next();
        for pattern in &patterns {
            if let Some(entry) = self.entries.get_mut(normalize(pattern)) {
                entry.callbacks.push(Registration {
                    id,
                    callback: Rc::clone(&callback),
                    auto_cancel,
                });
            }
        }
        debug!(?id, ?patterns, auto_cancel, "subscription registered");
        Ok(id)
    }

    /// Remove one callback (`Some(id)`) or every callback (`None`) of
    /// `pattern`. Returns how many callbacks were removed; unknown patterns
    /// remove nothing.
    pub fn unregister(&mut self, pattern: &str, id: Option<SubscriptionId>) -> usize {
        let key = normalize(pattern);
        let Some(entry) = self.entries.get_mut(key) else {
            return 0;
        };
        let before = entry.callbacks.len();
        match id {
            Some(id) => entry.callbacks.retain(|r| r.id != id),
            None => entry.callbacks.clear(),
        }
        let removed = before - entry.callbacks.len();
        if entry.callbacks.is_empty() {
            self.entries.shift_remove(key);
        }
        if removed > 0 {
            debug!(pattern = key, removed, "subscription removed");
        }
        removed
    }

    /// Registered patterns in iteration order.
    #[must_use]
    pub fn patterns(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Total number of callbacks across all patterns.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.entries.values().map(|e| e.callbacks.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter()
    }
}

/// Map the empty pattern onto the match-all pattern.
#[must_use]
pub fn normalize(pattern: &str) -> &str {
    if pattern.is_empty() { MATCH_ALL } else { pattern }
}

/// Merge registries ordered innermost first.
///
/// The result is a snapshot: callbacks are cloned handles, so no registry is
/// borrowed while they run.
pub fn merged<I>(levels: I) -> Vec<(String, Entry)>
where
    I: IntoIterator<Item = Rc<RefCell<Registry>>>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for level in levels {
        let registry = level.borrow();
        for (pattern, entry) in registry.iter() {
            if seen.insert(pattern.clone()) {
                out.push((pattern.clone(), entry.clone()));
            }
        }
    }
    out
}

/// One or more patterns for a single `subscribe` call.
pub trait IntoPatterns {
    fn into_patterns(self) -> Vec<String>;
}

impl IntoPatterns for &str {
    fn into_patterns(self) -> Vec<String> {
        vec![self.to_owned()]
    }
}

impl IntoPatterns for String {
    fn into_patterns(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoPatterns for &[&str] {
    fn into_patterns(self) -> Vec<String> {
        self.iter().map(|p| (*p).to_owned()).collect()
    }
}

impl<const N: usize> IntoPatterns for [&str; N] {
    fn into_patterns(self) -> Vec<String> {
        self.iter().map(|p| (*p).to_owned()).collect()
    }
}

impl IntoPatterns for Vec<String> {
    fn into_patterns(self) -> Vec<String> {
        self
    }
}

/// Where a root's own subscriptions live.
#[derive(Debug, Clone, Default)]
pub enum Scope {
    /// The root gets a private registry.
    #[default]
    TreeLocal,
    /// The root uses a registry shared with every other root built with the
    /// same scope, giving its subscribers visibility over all those trees.
    Shared(SharedScope),
}

impl Scope {
    /// A fresh shared scope.
    #[must_use]
    pub fn shared() -> Self {
        Self::Shared(SharedScope::new())
    }

    pub(crate) fn registry(&self) -> Rc<RefCell<Registry>> {
        match self {
            Self::TreeLocal => Rc::new(RefCell::new(Registry::new())),
            Self::Shared(shared) => Rc::clone(&shared.registry),
        }
    }
}

/// A registry handle shared by several roots.
#[derive(Debug, Clone, Default)]
pub struct SharedScope {
    registry: Rc<RefCell<Registry>>,
}

impl SharedScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of callbacks registered in this scope.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.registry.borrow().callback_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Callback {
        Rc::new(|_| Ok(()))
    }

    fn register(reg: &mut Registry, patterns: &[&str]) -> SubscriptionId {
        reg.register(patterns.into_patterns(), noop(), false, WildcardMode::Permissive)
            .expect("valid patterns")
    }

    #[test]
    fn same_pattern_appends() {
        let mut reg = Registry::new();
        register(&mut reg, &["a.b"]);
        register(&mut reg, &["a.b"]);
        assert_eq!(reg.patterns(), vec!["a.b".to_string()]);
        assert_eq!(reg.callback_count(), 2);
    }

    #[test]
    fn matcher_compiled_once_per_pattern() {
        let mut reg = Registry::new();
        register(&mut reg, &["a.*"]);
        let first = Rc::clone(&reg.entries["a.*"].matcher);
        register(&mut reg, &["a.*"]);
        assert!(Rc::ptr_eq(&first, &reg.entries["a.*"].matcher));
    }

    #[test]
    fn empty_pattern_is_match_all() {
        let mut reg = Registry::new();
        register(&mut reg, &[""]);
        assert_eq!(reg.patterns(), vec!["*".to_string()]);
        assert_eq!(reg.unregister("", None), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn many_patterns_share_one_id() {
        let mut reg = Registry::new();
        let id = register(&mut reg, &["x", "y"]);
        assert_eq!(reg.callback_count(), 2);
        assert_eq!(reg.unregister("x", Some(id)), 1);
        assert_eq!(reg.patterns(), vec!["y".to_string()]);
    }

    #[test]
    fn unregister_one_callback() {
        let mut reg = Registry::new();
        let a = register(&mut reg, &["p"]);
        let _b = register(&mut reg, &["p"]);
        assert_eq!(reg.unregister("p", Some(a)), 1);
        assert_eq!(reg.callback_count(), 1);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let mut reg = Registry::new();
        assert_eq!(reg.unregister("nope", None), 0);
        let id = register(&mut reg, &["p"]);
        assert_eq!(reg.unregister("other", Some(id)), 0);
        assert_eq!(reg.callback_count(), 1);
    }

    #[test]
    fn merged_inner_shadows_identical_key() {
        let inner = Rc::new(RefCell::new(Registry::new()));
        let outer = Rc::new(RefCell::new(Registry::new()));
        register(&mut inner.borrow_mut(), &["a.b"]);
        register(&mut outer.borrow_mut(), &["a.b"]);
        register(&mut outer.borrow_mut(), &["a.b"]);
        register(&mut outer.borrow_mut(), &["*"]);

        let view = merged([Rc::clone(&inner), Rc::clone(&outer)]);
        let keys: Vec<_> = view.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a.b", "*"]);
        // Inner list replaces the outer one: one callback, not three.
        assert_eq!(view[0].1.callbacks.len(), 1);
    }
}
