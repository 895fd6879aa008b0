//! Capability registry.
//!
//! A [`RegistrySnapshot`] is an immutable, versioned view of every enabled
//! capability. The live [`CapabilityRegistry`] holds an `Arc` to the current
//! snapshot and replaces it wholesale in [`CapabilityRegistry::publish`].
//! Readers clone the `Arc` and keep using that snapshot for the whole request,
//! so a reload never changes what an in-flight call sees.
//!
//! # Pagination
//!
//! List results are paged when the server is configured with a page size.
//! The cursor is an opaque base64 token that binds the snapshot version and
//! the next offset, so a cursor taken before a reload is rejected after it.

mod builder;

pub use builder::SnapshotBuilder;

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::capability::{CapabilityDescriptor, CapabilityKind};
use crate::error::{ConfigError, InvocationError};

/// A descriptor as registered in a snapshot.
#[derive(Debug, Clone)]
pub struct RegisteredCapability {
    /// The descriptor, with configured default overrides applied.
    pub descriptor: CapabilityDescriptor,
    /// Id of the provider that declared it.
    pub provider: String,
    /// Invocation budget from the configuration.
    pub timeout: Duration,
}

/// One page of a list operation.
#[derive(Debug, Clone)]
pub struct Page {
    /// Items on this page, in registration order.
    pub items: Vec<Arc<RegisteredCapability>>,
    /// Cursor for the next page, if any.
    pub next_cursor: Option<String>,
}

/// An immutable set of capabilities, unique by name within each kind.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    resources: IndexMap<String, Arc<RegisteredCapability>>,
    tools: IndexMap<String, Arc<RegisteredCapability>>,
    prompts: IndexMap<String, Arc<RegisteredCapability>>,
    version: u64,
}

impl RegistrySnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Version stamped by [`CapabilityRegistry::publish`]. Zero before publishing.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    const fn map(&self, kind: CapabilityKind) -> &IndexMap<String, Arc<RegisteredCapability>> {
        match kind {
            CapabilityKind::Resource => &self.resources,
            CapabilityKind::Tool => &self.tools,
            CapabilityKind::Prompt => &self.prompts,
        }
    }

    pub(crate) fn map_mut(
        &mut self,
        kind: CapabilityKind,
    ) -> &mut IndexMap<String, Arc<RegisteredCapability>> {
        match kind {
            CapabilityKind::Resource => &mut self.resources,
            CapabilityKind::Tool => &mut self.tools,
            CapabilityKind::Prompt => &mut self.prompts,
        }
    }

    /// Looks up a capability by kind and name.
    #[must_use]
    pub fn get(&self, kind: CapabilityKind, name: &str) -> Option<&Arc<RegisteredCapability>> {
        self.map(kind).get(name)
    }

    /// All capabilities of a kind, in registration order.
    pub fn list(&self, kind: CapabilityKind) -> impl Iterator<Item = &Arc<RegisteredCapability>> {
        self.map(kind).values()
    }

    /// Number of capabilities of a kind.
    #[must_use]
    pub fn len(&self, kind: CapabilityKind) -> usize {
        self.map(kind).len()
    }

    /// Returns `true` if no capability of any kind is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        CapabilityKind::ALL.iter().all(|&kind| self.len(kind) == 0)
    }

    /// Names of all capabilities of a kind, in registration order.
    #[must_use]
    pub fn names(&self, kind: CapabilityKind) -> Vec<&str> {
        self.map(kind).keys().map(String::as_str).collect()
    }

    /// Finds the resource serving `uri` and extracts its template variables.
    ///
    /// Concrete URIs win over templates; among templates the first registered
    /// match wins.
    #[must_use]
    pub fn resolve_resource(&self, uri: &str) -> Option<(Arc<RegisteredCapability>, Map<String, Value>)> {
        let concrete = self.resources.values().find(|r| {
            r.descriptor
                .uri()
                .is_some_and(|t| t.is_concrete() && t.as_str() == uri)
        });
        if let Some(found) = concrete {
            return Some((Arc::clone(found), Map::new()));
        }

        self.resources.values().find_map(|r| {
            let template = r.descriptor.uri()?;
            if template.is_concrete() {
                return None;
            }
            template.matches(uri).map(|vars| (Arc::clone(r), vars))
        })
    }

    /// Returns one page of a kind.
    ///
    /// With `page_size` unset every item is returned and no cursor is issued.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationError::InvalidParams`] for a malformed cursor or one
    /// issued against a different snapshot version.
    pub fn page(
        &self,
        kind: CapabilityKind,
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<Page, InvocationError> {
        self.page_where(kind, cursor, page_size, |_| true)
    }

    /// Like [`page`](Self::page) but over the items accepted by `filter`.
    ///
    /// # Errors
    ///
    /// See [`page`](Self::page).
    pub fn page_where<F>(
        &self,
        kind: CapabilityKind,
        cursor: Option<&str>,
        page_size: Option<usize>,
        filter: F,
    ) -> Result<Page, InvocationError>
    where
        F: Fn(&RegisteredCapability) -> bool,
    {
        let items: Vec<&Arc<RegisteredCapability>> =
            self.map(kind).values().filter(|c| filter(c)).collect();

        let offset = match cursor {
            Some(token) => decode_cursor(token, self.version)?,
            None => 0,
        };
        if offset > items.len() {
            return Err(InvocationError::InvalidParams("Invalid cursor".to_string()));
        }

        let end = page_size.map_or(items.len(), |size| offset.saturating_add(size.max(1)).min(items.len()));
        let next_cursor = (page_size.is_some() && end < items.len()).then(|| encode_cursor(self.version, end));

        Ok(Page {
            items: items[offset..end].iter().map(|c| Arc::clone(c)).collect(),
            next_cursor,
        })
    }
}

fn encode_cursor(version: u64, offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("v{version}:{offset}"))
}

fn decode_cursor(token: &str, version: u64) -> Result<usize, InvocationError> {
    let invalid = || InvocationError::InvalidParams("Invalid cursor".to_string());

    let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    let (ver, offset) = text
        .strip_prefix('v')
        .and_then(|rest| rest.split_once(':'))
        .ok_or_else(invalid)?;

    let ver: u64 = ver.parse().map_err(|_| invalid())?;
    if ver != version {
        return Err(InvocationError::InvalidParams(
            "Cursor is stale: the capability list changed".to_string(),
        ));
    }
    offset.parse().map_err(|_| invalid())
}

/// Holder of the live snapshot.
///
/// [`current`](Self::current) only clones an `Arc` under a read lock, and
/// [`publish`](Self::publish) only swaps one under a write lock. Building a
/// snapshot happens entirely outside the registry.
#[derive(Debug)]
pub struct CapabilityRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    publish_lock: Mutex<()>,
    version_tx: watch::Sender<u64>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    /// Creates a registry holding an empty snapshot at version 0.
    #[must_use]
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::empty())),
            publish_lock: Mutex::new(()),
            version_tx,
        }
    }

    /// Creates a registry and publishes `snapshot` as version 1.
    #[must_use]
    pub fn with_snapshot(snapshot: RegistrySnapshot) -> Self {
        let registry = Self::new();
        registry.publish(snapshot);
        registry
    }

    /// Returns the live snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Makes `snapshot` the live snapshot and returns it.
    ///
    /// The snapshot is stamped with the previous version plus one. Readers
    /// holding the old snapshot keep it until they drop their reference.
    pub fn publish(&self, mut snapshot: RegistrySnapshot) -> Arc<RegistrySnapshot> {
        let _guard = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);

        snapshot.version = self.current().version + 1;
        let snapshot = Arc::new(snapshot);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);

        self.version_tx.send_replace(snapshot.version);
        tracing::info!(
            version = snapshot.version,
            resources = snapshot.len(CapabilityKind::Resource),
            tools = snapshot.len(CapabilityKind::Tool),
            prompts = snapshot.len(CapabilityKind::Prompt),
            "Published capability snapshot"
        );
        snapshot
    }

    /// Builds a snapshot with `build` and publishes it only if it succeeds.
    ///
    /// # Errors
    ///
    /// Returns the build error; the live snapshot is untouched in that case.
    pub fn try_publish<F>(&self, build: F) -> Result<Arc<RegistrySnapshot>, ConfigError>
    where
        F: FnOnce() -> Result<RegistrySnapshot, ConfigError>,
    {
        let snapshot = build()?;
        Ok(self.publish(snapshot))
    }

    /// Looks up a capability in the live snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationError::NotFound`] if no such capability exists.
    pub fn lookup(
        &self,
        kind: CapabilityKind,
        name: &str,
    ) -> Result<Arc<RegisteredCapability>, InvocationError> {
        self.current()
            .get(kind, name)
            .cloned()
            .ok_or_else(|| InvocationError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    /// Subscribes to published versions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{handler_fn, InvocationResult};
    use crate::provider::StaticProvider;

    fn tool(name: &str) -> CapabilityDescriptor {
        CapabilityDescriptor::tool(name, handler_fn(|_| async { InvocationResult::text("ok") }))
    }

    fn snapshot_of(names: &[&str]) -> RegistrySnapshot {
        let provider = StaticProvider::new("test", names.iter().map(|n| tool(n)).collect());
        let mut builder = SnapshotBuilder::new(Duration::from_secs(30));
        builder.add_provider(&provider).unwrap();
        builder.finish()
    }

    #[test]
    fn publish_bumps_version() {
        let registry = CapabilityRegistry::new();
        assert_eq!(registry.current().version(), 0);

        let first = registry.publish(snapshot_of(&["a"]));
        let second = registry.publish(snapshot_of(&["b"]));
        assert_eq!(first.version(), 1);
        assert_eq!(second.version(), 2);
        assert_eq!(*registry.subscribe().borrow(), 2);
    }

    #[test]
    fn held_snapshot_survives_publish() {
        let registry = CapabilityRegistry::with_snapshot(snapshot_of(&["a"]));
        let held = registry.current();
        registry.publish(snapshot_of(&["b"]));

        assert_eq!(held.names(CapabilityKind::Tool), ["a"]);
        assert_eq!(registry.current().names(CapabilityKind::Tool), ["b"]);
    }

    #[test]
    fn failed_build_keeps_previous_snapshot() {
        let registry = CapabilityRegistry::with_snapshot(snapshot_of(&["a"]));
        let result = registry.try_publish(|| {
            Err(ConfigError::ValidationError {
                message: "nope".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(registry.current().version(), 1);
        assert!(registry.lookup(CapabilityKind::Tool, "a").is_ok());
    }

    #[test]
    fn lookup_missing_is_not_found() {
        let registry = CapabilityRegistry::with_snapshot(snapshot_of(&["a"]));
        let err = registry.lookup(CapabilityKind::Tool, "zzz").unwrap_err();
        assert_eq!(
            err,
            InvocationError::NotFound {
                kind: CapabilityKind::Tool,
                name: "zzz".into()
            }
        );
    }

    #[test]
    fn pages_walk_in_registration_order() {
        let registry = CapabilityRegistry::with_snapshot(snapshot_of(&["c", "a", "b"]));
        let snap = registry.current();

        let first = snap.page(CapabilityKind::Tool, None, Some(2)).unwrap();
        let names: Vec<&str> = first.items.iter().map(|c| c.descriptor.name()).collect();
        assert_eq!(names, ["c", "a"]);

        let cursor = first.next_cursor.unwrap();
        let second = snap.page(CapabilityKind::Tool, Some(&cursor), Some(2)).unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].descriptor.name(), "b");
        assert!(second.next_cursor.is_none());
    }

    #[test]
    fn huge_page_size_with_offset_does_not_overflow() {
        let snap = snapshot_of(&["a", "b", "c"]);
        let cursor = snap.page(CapabilityKind::Tool, None, Some(1)).unwrap().next_cursor.unwrap();
        let rest = snap.page(CapabilityKind::Tool, Some(&cursor), Some(usize::MAX)).unwrap();
        assert_eq!(rest.items.len(), 2);
        assert!(rest.next_cursor.is_none());
    }

    #[test]
    fn unpaged_listing_has_no_cursor() {
        let snap = snapshot_of(&["a", "b"]);
        let page = snap.page(CapabilityKind::Tool, None, None).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn stale_or_garbage_cursor_rejected() {
        let registry = CapabilityRegistry::with_snapshot(snapshot_of(&["a", "b", "c"]));
        let cursor = registry
            .current()
            .page(CapabilityKind::Tool, None, Some(1))
            .unwrap()
            .next_cursor
            .unwrap();

        registry.publish(snapshot_of(&["a", "b", "c"]));
        let snap = registry.current();
        assert!(matches!(
            snap.page(CapabilityKind::Tool, Some(&cursor), Some(1)),
            Err(InvocationError::InvalidParams(_))
        ));
        assert!(matches!(
            snap.page(CapabilityKind::Tool, Some("!!not-base64!!"), Some(1)),
            Err(InvocationError::InvalidParams(_))
        ));
    }

    #[test]
    fn resource_resolution_prefers_concrete() {
        let noop = || handler_fn(|_| async { InvocationResult::text("") });
        let provider = StaticProvider::new(
            "res",
            vec![
                CapabilityDescriptor::resource("any", "mem://{key}", noop()).unwrap(),
                CapabilityDescriptor::resource("fixed", "mem://fixed", noop()).unwrap(),
            ],
        );
        let mut builder = SnapshotBuilder::new(Duration::from_secs(1));
        builder.add_provider(&provider).unwrap();
        let snap = builder.finish();

        let (hit, vars) = snap.resolve_resource("mem://fixed").unwrap();
        assert_eq!(hit.descriptor.name(), "fixed");
        assert!(vars.is_empty());

        let (hit, vars) = snap.resolve_resource("mem://other").unwrap();
        assert_eq!(hit.descriptor.name(), "any");
        assert_eq!(vars["key"], "other");

        assert!(snap.resolve_resource("disk://x").is_none());
    }
}
