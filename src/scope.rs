//! Scope filtering with a time-bounded cache.
//!
//! A [`ScopeFilter`] names a project (a collection), topics to include,
//! topics to exclude, and whether nodes tagged with the well-known
//! `"shared"` topic bypass the project and topic restrictions. Before a
//! query runs, [`ScopeResolver::build_scope_sets`] turns the names into id
//! sets once; [`node_matches_scope`] then tests each candidate node.
//!
//! Resolved sets are cached per normalized filter for a fixed TTL. The
//! cache is owned by the resolver instance, uses an injectable [`Clock`],
//! and is invalidated only by TTL expiry or [`ScopeResolver::clear_cache`].
//! Writes to collections or topics are not observed until then.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{EntityRef, Node, SHARED_TOPIC};
use crate::store::GraphStore;

/// Default lifetime of a cached scope resolution.
pub const DEFAULT_SCOPE_TTL: Duration = Duration::from_secs(60);

/// Visibility constraints for a query. The default filter is unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeFilter {
    pub project: Option<String>,
    pub topics: Vec<String>,
    pub exclude_topics: Vec<String>,
    pub include_shared: bool,
}

impl ScopeFilter {
    pub fn project(mut self, name: impl Into<String>) -> Self {
        self.project = Some(name.into());
        self
    }

    pub fn topic(mut self, name: impl Into<String>) -> Self {
        self.topics.push(name.into());
        self
    }

    pub fn exclude_topic(mut self, name: impl Into<String>) -> Self {
        self.exclude_topics.push(name.into());
        self
    }

    pub fn include_shared(mut self, yes: bool) -> Self {
        self.include_shared = yes;
        self
    }

    /// Cache key with topic lists sorted and deduplicated, so two filters
    /// that differ only in list order share an entry.
    pub fn key(&self) -> ScopeKey {
        fn normalized(names: &[String]) -> Vec<String> {
            let mut names = names.to_vec();
            names.sort();
            names.dedup();
            names
        }
        ScopeKey {
            project: self.project.clone(),
            topics: normalized(&self.topics),
            exclude_topics: normalized(&self.exclude_topics),
            include_shared: self.include_shared,
        }
    }
}

/// Normalized form of a [`ScopeFilter`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    project: Option<String>,
    topics: Vec<String>,
    exclude_topics: Vec<String>,
    include_shared: bool,
}

/// Id sets resolved from a [`ScopeFilter`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSets {
    /// Members of the project collection; `None` when no project is set.
    pub scope_members: Option<HashSet<EntityRef>>,
    /// Topics a node must carry one of; `None` when no topic is required.
    pub scope_topic_ids: Option<HashSet<i64>>,
    pub exclude_topic_ids: HashSet<i64>,
    /// Id of the `"shared"` topic when the filter opts into it and the
    /// topic exists.
    pub shared_topic_id: Option<i64>,
}

impl ScopeSets {
    /// True when no node can be rejected.
    pub fn is_unrestricted(&self) -> bool {
        self.scope_members.is_none()
            && self.scope_topic_ids.is_none()
            && self.exclude_topic_ids.is_empty()
    }

    fn needs_node_topics(&self) -> bool {
        !self.exclude_topic_ids.is_empty()
            || self.scope_topic_ids.is_some()
            || (self.shared_topic_id.is_some() && self.scope_members.is_some())
    }
}

/// Store queries the scope layer depends on.
pub trait ScopeLookup {
    fn collection_id_by_name(&self, name: &str) -> Result<Option<i64>>;
    fn collection_members(&self, collection_id: i64) -> Result<Vec<EntityRef>>;
    fn topic_id_by_name(&self, name: &str) -> Result<Option<i64>>;
    /// Topics assigned to the node or to its document.
    fn node_topic_ids(&self, node: &Node) -> Result<HashSet<i64>>;
}

fn optional<T>(res: Result<T>) -> Result<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

impl ScopeLookup for GraphStore {
    fn collection_id_by_name(&self, name: &str) -> Result<Option<i64>> {
        Ok(optional(self.get_collection_by_name(name))?.map(|c| c.collection_id))
    }

    fn collection_members(&self, collection_id: i64) -> Result<Vec<EntityRef>> {
        self.collection_member_refs(collection_id)
    }

    fn topic_id_by_name(&self, name: &str) -> Result<Option<i64>> {
        Ok(optional(self.get_topic_by_name(name))?.map(|t| t.topic_id))
    }

    fn node_topic_ids(&self, node: &Node) -> Result<HashSet<i64>> {
        self.topic_ids_for_node(node)
    }
}

/// Source of "now" for cache expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// TTL cache from normalized filters to resolved sets.
pub struct ScopeCache {
    ttl: Duration,
    clock: Box<dyn Clock>,
    entries: HashMap<ScopeKey, (ScopeSets, Instant)>,
}

impl ScopeCache {
    pub fn new(ttl: Duration, clock: Box<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh entry for `key`, evicting it if it has expired.
    pub fn get(&mut self, key: &ScopeKey) -> Option<ScopeSets> {
        let now = self.clock.now();
        match self.entries.get(key) {
            Some((sets, stored)) if now.saturating_duration_since(*stored) < self.ttl => {
                Some(sets.clone())
            }
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, key: ScopeKey, sets: ScopeSets) {
        let now = self.clock.now();
        self.entries.insert(key, (sets, now));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves scope filters against a store, caching the result.
pub struct ScopeResolver {
    cache: ScopeCache,
}

impl Default for ScopeResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SCOPE_TTL)
    }
}

impl ScopeResolver {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Box::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Box<dyn Clock>) -> Self {
        Self {
            cache: ScopeCache::new(ttl, clock),
        }
    }

    /// Resolve the names in `scope` to id sets.
    ///
    /// With `use_cache`, a fresh cached entry is returned without touching
    /// the store and a rebuilt entry is cached. Unknown project or topic
    /// names fail with [`Error::ScopeValidation`]. A missing `"shared"`
    /// topic is not an error; the override simply does not apply.
    pub fn build_scope_sets<S: ScopeLookup + ?Sized>(
        &mut self,
        store: &S,
        scope: &ScopeFilter,
        use_cache: bool,
    ) -> Result<ScopeSets> {
        let key = scope.key();
        if use_cache {
            if let Some(sets) = self.cache.get(&key) {
                tracing::debug!(?key, "scope cache hit");
                return Ok(sets);
            }
        }

        let sets = resolve(store, &key)?;
        if use_cache {
            self.cache.insert(key, sets.clone());
        }
        Ok(sets)
    }

    /// Keep the nodes visible under `scope`, preserving order.
    pub fn filter_nodes<S: ScopeLookup + ?Sized>(
        &mut self,
        store: &S,
        scope: &ScopeFilter,
        nodes: Vec<Node>,
    ) -> Result<Vec<Node>> {
        let sets = self.build_scope_sets(store, scope, true)?;
        if sets.is_unrestricted() {
            return Ok(nodes);
        }
        let mut kept = Vec::with_capacity(nodes.len());
        for node in nodes {
            if node_matches_scope(store, &node, &sets)? {
                kept.push(node);
            }
        }
        Ok(kept)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn ttl(&self) -> Duration {
        self.cache.ttl()
    }
}

fn resolve<S: ScopeLookup + ?Sized>(store: &S, key: &ScopeKey) -> Result<ScopeSets> {
    let scope_members = match &key.project {
        Some(project) => {
            let collection_id = store
                .collection_id_by_name(project)?
                .ok_or_else(|| Error::ScopeValidation {
                    kind: "project",
                    name: project.clone(),
                })?;
            Some(store.collection_members(collection_id)?.into_iter().collect())
        }
        None => None,
    };

    let topic_ids = |names: &[String]| -> Result<HashSet<i64>> {
        names
            .iter()
            .map(|name| {
                store
                    .topic_id_by_name(name)?
                    .ok_or_else(|| Error::ScopeValidation {
                        kind: "topic",
                        name: name.clone(),
                    })
            })
            .collect()
    };
    let scope_topic_ids = if key.topics.is_empty() {
        None
    } else {
        Some(topic_ids(&key.topics)?)
    };
    let exclude_topic_ids = topic_ids(&key.exclude_topics)?;

    let shared_topic_id = if key.include_shared {
        store.topic_id_by_name(SHARED_TOPIC)?
    } else {
        None
    };

    Ok(ScopeSets {
        scope_members,
        scope_topic_ids,
        exclude_topic_ids,
        shared_topic_id,
    })
}

/// Whether `node` is visible under `sets`.
///
/// An excluded topic always rejects the node. Otherwise the node must be
/// a project member (directly or through its document) and carry one of
/// the included topics; carrying the shared topic satisfies either
/// requirement.
pub fn node_matches_scope<S: ScopeLookup + ?Sized>(
    store: &S,
    node: &Node,
    sets: &ScopeSets,
) -> Result<bool> {
    if sets.is_unrestricted() {
        return Ok(true);
    }
    let node_topics = if sets.needs_node_topics() {
        store.node_topic_ids(node)?
    } else {
        HashSet::new()
    };

    if !node_topics.is_disjoint(&sets.exclude_topic_ids) {
        return Ok(false);
    }

    let shared = sets
        .shared_topic_id
        .is_some_and(|id| node_topics.contains(&id));

    if let Some(members) = &sets.scope_members {
        let is_member = members.contains(&EntityRef::Node(node.node_pk))
            || members.contains(&EntityRef::Document(node.doc_id.clone()));
        if !is_member && !shared {
            return Ok(false);
        }
    }

    if let Some(topics) = &sets.scope_topic_ids {
        if node_topics.is_disjoint(topics) && !shared {
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FullId;
    use crate::models::BlockKind;
    use std::cell::Cell;

    /// In-memory lookup that counts every query.
    #[derive(Default)]
    struct FakeLookup {
        collections: HashMap<String, (i64, Vec<EntityRef>)>,
        topics: HashMap<String, i64>,
        node_topics: HashMap<i64, HashSet<i64>>,
        queries: Cell<usize>,
    }

    impl FakeLookup {
        fn hit(&self) {
            self.queries.set(self.queries.get() + 1);
        }
    }

    impl ScopeLookup for FakeLookup {
        fn collection_id_by_name(&self, name: &str) -> Result<Option<i64>> {
            self.hit();
            Ok(self.collections.get(name).map(|(id, _)| *id))
        }
        fn collection_members(&self, collection_id: i64) -> Result<Vec<EntityRef>> {
            self.hit();
            Ok(self
                .collections
                .values()
                .find(|(id, _)| *id == collection_id)
                .map(|(_, members)| members.clone())
                .unwrap_or_default())
        }
        fn topic_id_by_name(&self, name: &str) -> Result<Option<i64>> {
            self.hit();
            Ok(self.topics.get(name).copied())
        }
        fn node_topic_ids(&self, node: &Node) -> Result<HashSet<i64>> {
            self.hit();
            Ok(self.node_topics.get(&node.node_pk).cloned().unwrap_or_default())
        }
    }

    fn node(pk: i64, doc_id: &str) -> Node {
        Node {
            node_pk: pk,
            short_id: "0000".to_string(),
            full_id: FullId::from_bytes([pk as u8; 16]),
            doc_id: doc_id.to_string(),
            kind: BlockKind::Paragraph,
            title: None,
            level: None,
            language: None,
            start: 0,
            end: 1,
        }
    }

    fn fixture() -> FakeLookup {
        let mut lookup = FakeLookup::default();
        lookup.collections.insert(
            "alpha".into(),
            (1, vec![EntityRef::Node(10), EntityRef::Document("alpha.md".into())]),
        );
        lookup.topics.insert("rust".into(), 100);
        lookup.topics.insert("draft".into(), 101);
        lookup.topics.insert(SHARED_TOPIC.into(), 102);
        lookup.node_topics.insert(10, HashSet::from([100]));
        lookup.node_topics.insert(11, HashSet::from([100, 101]));
        lookup.node_topics.insert(20, HashSet::from([102]));
        lookup.node_topics.insert(21, HashSet::from([102, 101]));
        lookup
    }

    fn matches(lookup: &FakeLookup, scope: &ScopeFilter, n: &Node) -> bool {
        let sets = ScopeResolver::default()
            .build_scope_sets(lookup, scope, false)
            .unwrap();
        node_matches_scope(lookup, n, &sets).unwrap()
    }

    #[test]
    fn test_key_ignores_topic_order() {
        let a = ScopeFilter::default().topic("b").topic("a").exclude_topic("x");
        let b = ScopeFilter::default().topic("a").topic("b").topic("a").exclude_topic("x");
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), a.clone().include_shared(true).key());
    }

    #[test]
    fn test_unrestricted_scope() {
        let lookup = fixture();
        let sets = ScopeResolver::default()
            .build_scope_sets(&lookup, &ScopeFilter::default(), false)
            .unwrap();
        assert!(sets.is_unrestricted());
        assert!(sets.scope_members.is_none());
        assert!(node_matches_scope(&lookup, &node(99, "x.md"), &sets).unwrap());
    }

    #[test]
    fn test_project_membership_by_node_or_document() {
        let lookup = fixture();
        let scope = ScopeFilter::default().project("alpha");
        assert!(matches(&lookup, &scope, &node(10, "other.md")));
        assert!(matches(&lookup, &scope, &node(30, "alpha.md")));
        assert!(!matches(&lookup, &scope, &node(31, "other.md")));
    }

    #[test]
    fn test_shared_overrides_project_only_when_requested() {
        let lookup = fixture();
        let outsider = node(20, "beta.md");
        assert!(!matches(&lookup, &ScopeFilter::default().project("alpha"), &outsider));
        assert!(matches(
            &lookup,
            &ScopeFilter::default().project("alpha").include_shared(true),
            &outsider
        ));
    }

    #[test]
    fn test_topic_include_is_or() {
        let lookup = fixture();
        let scope = ScopeFilter::default().topic("rust").topic("draft");
        assert!(matches(&lookup, &scope, &node(10, "a.md")));
        assert!(matches(&lookup, &scope, &node(11, "a.md")));
        assert!(!matches(&lookup, &scope, &node(20, "a.md")));
        assert!(matches(&lookup, &scope.include_shared(true), &node(20, "a.md")));
    }

    #[test]
    fn test_exclusion_wins_over_shared() {
        let lookup = fixture();
        let scope = ScopeFilter::default()
            .project("alpha")
            .exclude_topic("draft")
            .include_shared(true);
        assert!(matches(&lookup, &scope, &node(10, "alpha.md")));
        assert!(!matches(&lookup, &scope, &node(11, "alpha.md")));
        assert!(matches(&lookup, &scope, &node(20, "beta.md")));
        assert!(!matches(&lookup, &scope, &node(21, "beta.md")));
    }

    #[test]
    fn test_unknown_names_fail() {
        let lookup = fixture();
        let mut resolver = ScopeResolver::default();
        let err = resolver
            .build_scope_sets(&lookup, &ScopeFilter::default().project("ghost"), true)
            .unwrap_err();
        assert!(matches!(err, Error::ScopeValidation { kind: "project", .. }));
        let err = resolver
            .build_scope_sets(&lookup, &ScopeFilter::default().exclude_topic("ghost"), true)
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(resolver.cache_len(), 0);
    }

    #[test]
    fn test_missing_shared_topic_is_not_an_error() {
        let mut lookup = fixture();
        lookup.topics.remove(SHARED_TOPIC);
        let sets = ScopeResolver::default()
            .build_scope_sets(&lookup, &ScopeFilter::default().include_shared(true), false)
            .unwrap();
        assert_eq!(sets.shared_topic_id, None);
    }

    #[test]
    fn test_cache_hit_issues_no_queries() {
        let lookup = fixture();
        let mut resolver = ScopeResolver::default();
        let first = ScopeFilter::default().project("alpha").topic("rust").topic("draft");
        let reordered = ScopeFilter::default().project("alpha").topic("draft").topic("rust");

        let built = resolver.build_scope_sets(&lookup, &first, true).unwrap();
        let after_build = lookup.queries.get();
        assert!(after_build > 0);

        let cached = resolver.build_scope_sets(&lookup, &reordered, true).unwrap();
        assert_eq!(lookup.queries.get(), after_build);
        assert_eq!(cached, built);
        assert_eq!(resolver.cache_len(), 1);
    }

    #[test]
    fn test_cache_expires_after_ttl() {
        let lookup = fixture();
        let clock = ManualClock::new();
        let mut resolver = ScopeResolver::with_clock(DEFAULT_SCOPE_TTL, Box::new(clock.clone()));
        let scope = ScopeFilter::default().topic("rust");

        resolver.build_scope_sets(&lookup, &scope, true).unwrap();
        let after_build = lookup.queries.get();

        clock.advance(Duration::from_secs(59));
        resolver.build_scope_sets(&lookup, &scope, true).unwrap();
        assert_eq!(lookup.queries.get(), after_build);

        clock.advance(Duration::from_secs(1));
        resolver.build_scope_sets(&lookup, &scope, true).unwrap();
        assert!(lookup.queries.get() > after_build);
        assert_eq!(resolver.cache_len(), 1);
    }

    #[test]
    fn test_uncached_build_and_clear() {
        let lookup = fixture();
        let mut resolver = ScopeResolver::default();
        let scope = ScopeFilter::default().topic("rust");

        resolver.build_scope_sets(&lookup, &scope, false).unwrap();
        assert_eq!(resolver.cache_len(), 0);

        resolver.build_scope_sets(&lookup, &scope, true).unwrap();
        assert_eq!(resolver.cache_len(), 1);
        resolver.clear_cache();
        assert_eq!(resolver.cache_len(), 0);
    }

    #[test]
    fn test_filter_nodes_preserves_order() {
        let lookup = fixture();
        let mut resolver = ScopeResolver::default();
        let nodes = vec![node(11, "a.md"), node(20, "a.md"), node(10, "a.md")];
        let kept = resolver
            .filter_nodes(&lookup, &ScopeFilter::default().topic("rust"), nodes)
            .unwrap();
        let pks: Vec<i64> = kept.iter().map(|n| n.node_pk).collect();
        assert_eq!(pks, [11, 10]);
    }
}
