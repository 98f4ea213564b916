//! Compilation cache keyed by [`Rule::cache_key`].
//!
//! Every distinct rule body, resolved against a given set of function
//! implementations, gets one entry. A compiled artifact holds those
//! implementations alive, so their addresses stay unique while it exists. An entry counts interpreted
//! uses until the configured threshold is crossed, then compiles exactly
//! once: the artifact lives in a [`OnceLock`], so threads racing on the
//! first compilation block on the winner and never see a partial result.
//! A failed compilation is remembered as `None` and the rule stays on the
//! tree-walking path for good.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

use super::compiler::{CompiledRule, RuleCompiler};
use crate::lang::{Fingerprint, Rule};

#[derive(Default)]
struct CacheEntry {
    uses: AtomicU64,
    artifact: OnceLock<Option<Arc<CompiledRule>>>,
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Distinct rule bodies seen.
    pub entries: usize,
    /// Successful compilations.
    pub compilations: u64,
    /// Compilations that fell back to interpretation.
    pub failures: u64,
}

/// Shared, concurrent rule compilation cache.
pub struct RuleCache {
    compiler: RuleCompiler,
    enabled: bool,
    threshold: u64,
    entries: RwLock<HashMap<Fingerprint, Arc<CacheEntry>>>,
    compilations: AtomicU64,
    failures: AtomicU64,
}

impl RuleCache {
    /// Create a cache. `threshold` interpreted uses precede compilation.
    pub fn new(compiler: RuleCompiler, enabled: bool, threshold: u64) -> Self {
        Self {
            compiler,
            enabled,
            threshold,
            entries: RwLock::new(HashMap::new()),
            compilations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// A cache that never compiles.
    pub fn disabled() -> Self {
        Self::new(RuleCompiler::default(), false, 0)
    }

    /// Whether compilation is turned on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Compiled form of `rule`, or `None` when it should be interpreted.
    pub fn lookup(&self, rule: &Rule) -> Option<Arc<CompiledRule>> {
        if !self.enabled {
            return None;
        }
        let entry = self.entry(rule.cache_key());
        let uses = entry.uses.fetch_add(1, Ordering::Relaxed) + 1;
        if uses <= self.threshold {
            return entry.artifact.get().cloned().flatten();
        }
        entry
            .artifact
            .get_or_init(|| self.compile(rule))
            .clone()
    }

    /// Compile `rule` now, regardless of its use count.
    pub fn warm(&self, rule: &Rule) -> Option<Arc<CompiledRule>> {
        if !self.enabled {
            return None;
        }
        self.entry(rule.cache_key())
            .artifact
            .get_or_init(|| self.compile(rule))
            .clone()
    }

    /// Drop entries whose key is not in `keep`.
    pub fn retain(&self, keep: &HashSet<Fingerprint>) {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| keep.contains(key));
        debug!(evicted = before - entries.len(), kept = entries.len(), "pruned rule cache");
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.read().len(),
            compilations: self.compilations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn entry(&self, key: Fingerprint) -> Arc<CacheEntry> {
        if let Some(entry) = self.entries.read().get(&key) {
            return Arc::clone(entry);
        }
        Arc::clone(self.entries.write().entry(key).or_default())
    }

    fn compile(&self, rule: &Rule) -> Option<Arc<CompiledRule>> {
        match self.compiler.compile(rule) {
            Ok(compiled) => {
                self.compilations.fetch_add(1, Ordering::Relaxed);
                trace!(
                    rule = %rule.name,
                    fingerprint = %rule.fingerprint().short(),
                    folded = compiled.folded_constants(),
                    "compiled rule"
                );
                Some(Arc::new(compiled))
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(rule = %rule.name, error = %err, "rule stays interpreted");
                None
            }
        }
    }
}

impl std::fmt::Debug for RuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleCache")
            .field("enabled", &self.enabled)
            .field("threshold", &self.threshold)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::lang::{parse_rule, parse_with_diagnostics};

    fn rule(source: &str) -> Rule {
        parse_rule(source, &FunctionRegistry::builtin()).unwrap()
    }

    #[test]
    fn threshold_delays_compilation() {
        let cache = RuleCache::new(RuleCompiler::default(), true, 2);
        let r = rule(r#"rule "r" when true then end"#);
        assert!(cache.lookup(&r).is_none());
        assert!(cache.lookup(&r).is_none());
        assert!(cache.lookup(&r).is_some());
        assert!(cache.lookup(&r).is_some());
        assert_eq!(cache.stats().compilations, 1);
    }

    #[test]
    fn same_body_shares_an_entry() {
        let cache = RuleCache::new(RuleCompiler::default(), true, 0);
        let a = rule(r#"rule "a" when $message.x == 1 then end"#);
        let b = rule(r#"rule "b" when $message.x == 1 then end"#);
        cache.lookup(&a);
        cache.lookup(&b);
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 1,
                compilations: 1,
                failures: 0
            }
        );
    }

    #[test]
    fn failures_are_remembered() {
        let cache = RuleCache::new(RuleCompiler::default(), true, 0);
        let outcome = parse_with_diagnostics(
            r#"rule "r" when true then nope(); end"#,
            &FunctionRegistry::builtin(),
        );
        let r = outcome.rules().next().unwrap();
        assert!(cache.lookup(r).is_none());
        assert!(cache.lookup(r).is_none());
        assert_eq!(cache.stats().failures, 1);
    }

    #[test]
    fn disabled_cache_never_compiles() {
        let cache = RuleCache::disabled();
        let r = rule(r#"rule "r" when true then end"#);
        assert!(cache.lookup(&r).is_none());
        assert!(cache.warm(&r).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn retain_evicts_stale_bodies() {
        let cache = RuleCache::new(RuleCompiler::default(), true, 0);
        let keep = rule(r#"rule "a" when true then end"#);
        let stale = rule(r#"rule "b" when false then end"#);
        cache.lookup(&keep);
        cache.lookup(&stale);
        cache.retain(&HashSet::from([keep.cache_key()]));
        assert_eq!(cache.stats().entries, 1);
    }
}
