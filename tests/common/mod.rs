//! Common test utilities for reconciler integration tests
//!
//! Provides an in-memory object store, a static discovery resolver and an
//! event recorder, so full reconcile passes run without a cluster.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use authpolicy_controller::config::ControllerConfig;
use authpolicy_controller::controller::reconciler::events::EventSink;
use authpolicy_controller::controller::reconciler::resolve::{
    DiscoveryDocument, DiscoveryResolver, ResolutionError,
};
use authpolicy_controller::controller::reconciler::store::{
    kind_of, Managed, ObjectStore, StoreError,
};
use authpolicy_controller::controller::reconciler::Reconciler;
use authpolicy_controller::crd::AuthPolicy;
use authpolicy_controller::observability::Metrics;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub const NAMESPACE: &str = "shop";
pub const POLICY: &str = "orders";
pub const WELL_KNOWN_URI: &str = "https://idp.example.com/.well-known/openid-configuration";

type Key = (String, String, String);

/// Store operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Update,
    Delete,
}

/// `ObjectStore` keeping objects as JSON, keyed by kind, namespace and name.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<Key, Value>>,
    version: AtomicU64,
    failures: Mutex<HashSet<(Op, String)>>,
    status_conflicts: AtomicU32,
    writes: Mutex<Vec<String>>,
}

fn key_of<K: Managed>(namespace: &str, name: &str) -> Key {
    (kind_of::<K>(), namespace.to_string(), name.to_string())
}

fn encode<K: Managed>(object: &K) -> Result<Value, StoreError> {
    serde_json::to_value(object).map_err(|source| StoreError::Encode {
        kind: kind_of::<K>(),
        source,
    })
}

fn decode<K: Managed>(value: Value) -> Result<K, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Other(e.to_string()))
}

fn resource_version(value: &Value) -> Option<&str> {
    value.pointer("/metadata/resourceVersion").and_then(Value::as_str)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn stamp(&self, value: &mut Value) {
        value["metadata"]["resourceVersion"] = Value::String(self.next_version());
    }

    /// Seed an object, assigning a uid, resource version and creation time.
    pub fn insert<K: Managed>(&self, object: K) -> K {
        let mut value = encode(&object).expect("encode seeded object");
        let name = object.name_any();
        let namespace = object.namespace().unwrap_or_else(|| NAMESPACE.to_string());
        value["metadata"]["namespace"] = Value::String(namespace.clone());
        if value.pointer("/metadata/uid").is_none() {
            value["metadata"]["uid"] = Value::String(format!("uid-{name}"));
        }
        if value.pointer("/metadata/creationTimestamp").is_none() {
            value["metadata"]["creationTimestamp"] =
                Value::String("2026-01-01T00:00:00Z".to_string());
        }
        self.stamp(&mut value);
        self.objects
            .lock()
            .expect("store lock")
            .insert(key_of::<K>(&namespace, &name), value.clone());
        decode(value).expect("decode seeded object")
    }

    pub fn fetch<K: Managed>(&self, name: &str) -> Option<K> {
        self.objects
            .lock()
            .expect("store lock")
            .get(&key_of::<K>(NAMESPACE, name))
            .cloned()
            .map(|v| decode(v).expect("decode stored object"))
    }

    pub fn contains<K: Managed>(&self, name: &str) -> bool {
        self.fetch::<K>(name).is_some()
    }

    /// Make every `op` on `kind` fail until cleared.
    pub fn fail(&self, op: Op, kind: &str) {
        self.failures
            .lock()
            .expect("failures lock")
            .insert((op, kind.to_string()));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().expect("failures lock").clear();
    }

    /// Reject the next `count` status writes with a conflict.
    pub fn conflict_next_status_writes(&self, count: u32) {
        self.status_conflicts.store(count, Ordering::SeqCst);
    }

    /// Every successful write, as `<verb> <kind>/<name>`
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().expect("writes lock").clear();
    }

    fn record(&self, verb: &str, kind: &str, name: &str) {
        self.writes
            .lock()
            .expect("writes lock")
            .push(format!("{verb} {kind}/{name}"));
    }

    fn check(&self, op: Op, kind: &str) -> Result<(), StoreError> {
        if self
            .failures
            .lock()
            .expect("failures lock")
            .contains(&(op, kind.to_string()))
        {
            return Err(StoreError::Other(format!("injected {op:?} failure for {kind}")));
        }
        Ok(())
    }

    fn conflict(kind: &str, namespace: &str, name: &str) -> StoreError {
        StoreError::Conflict {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            message: "the object has been modified".to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Managed>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        self.check(Op::Get, &kind_of::<K>())?;
        let value = self
            .objects
            .lock()
            .expect("store lock")
            .get(&key_of::<K>(namespace, name))
            .cloned();
        value.map(decode).transpose()
    }

    async fn create<K: Managed>(&self, object: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        self.check(Op::Create, &kind)?;
        let namespace = object.namespace().unwrap_or_default();
        let name = object.name_any();
        let key = key_of::<K>(&namespace, &name);

        let mut value = encode(object)?;
        value["metadata"]["uid"] = Value::String(format!("uid-{name}"));
        self.stamp(&mut value);
        {
            let mut objects = self.objects.lock().expect("store lock");
            if objects.contains_key(&key) {
                return Err(Self::conflict(&kind, &namespace, &name));
            }
            objects.insert(key, value.clone());
        }
        self.record("create", &kind, &name);
        decode(value)
    }

    async fn update<K: Managed>(&self, object: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        self.check(Op::Update, &kind)?;
        let namespace = object.namespace().unwrap_or_default();
        let name = object.name_any();
        let key = key_of::<K>(&namespace, &name);

        let mut value = encode(object)?;
        {
            let mut objects = self.objects.lock().expect("store lock");
            let Some(stored) = objects.get(&key) else {
                return Err(StoreError::NotFound {
                    kind,
                    namespace,
                    name,
                });
            };
            if resource_version(&value).is_some()
                && resource_version(&value) != resource_version(stored)
            {
                return Err(Self::conflict(&kind, &namespace, &name));
            }
            self.stamp(&mut value);
            objects.insert(key, value.clone());
        }
        self.record("update", &kind, &name);
        decode(value)
    }

    async fn delete<K: Managed>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let kind = kind_of::<K>();
        self.check(Op::Delete, &kind)?;
        let removed = self
            .objects
            .lock()
            .expect("store lock")
            .remove(&key_of::<K>(namespace, name));
        if removed.is_none() {
            return Err(StoreError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        self.record("delete", &kind, name);
        Ok(())
    }

    async fn list<K: Managed>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>, StoreError> {
        let kind = kind_of::<K>();
        let wanted: Vec<(&str, &str)> = label_selector
            .split(',')
            .filter(|pair| !pair.is_empty())
            .filter_map(|pair| pair.split_once('='))
            .collect();

        let matching: Vec<Value> = self
            .objects
            .lock()
            .expect("store lock")
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .filter(|(_, value)| {
                wanted.iter().all(|(label, expected)| {
                    value
                        .pointer(&format!("/metadata/labels/{label}"))
                        .and_then(Value::as_str)
                        == Some(*expected)
                })
            })
            .map(|(_, value)| value.clone())
            .collect();
        matching.into_iter().map(decode).collect()
    }

    async fn update_status<K: Managed>(
        &self,
        object: &K,
        status: &Value,
    ) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let namespace = object.namespace().unwrap_or_default();
        let name = object.name_any();

        let pending = self.status_conflicts.load(Ordering::SeqCst);
        if pending > 0 {
            self.status_conflicts.store(pending - 1, Ordering::SeqCst);
            // Someone else wrote in between
            if let Some(stored) = self
                .objects
                .lock()
                .expect("store lock")
                .get_mut(&key_of::<K>(&namespace, &name))
            {
                self.stamp(stored);
            }
            return Err(Self::conflict(&kind, &namespace, &name));
        }

        let value = {
            let mut objects = self.objects.lock().expect("store lock");
            let Some(stored) = objects.get_mut(&key_of::<K>(&namespace, &name)) else {
                return Err(StoreError::NotFound {
                    kind,
                    namespace,
                    name,
                });
            };
            if object.resource_version().as_deref() != resource_version(stored) {
                return Err(Self::conflict(&kind, &namespace, &name));
            }
            stored["status"] = status.clone();
            self.stamp(stored);
            stored.clone()
        };
        self.record("status", &kind, &name);
        decode(value)
    }
}

/// Serves fixed discovery documents; unknown URIs fail.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    documents: HashMap<String, DiscoveryDocument>,
}

impl StaticDiscovery {
    pub fn with(mut self, uri: &str, document: DiscoveryDocument) -> Self {
        self.documents.insert(uri.to_string(), document);
        self
    }
}

#[async_trait]
impl DiscoveryResolver for StaticDiscovery {
    async fn resolve(&self, well_known_uri: &str) -> Result<DiscoveryDocument, ResolutionError> {
        self.documents
            .get(well_known_uri)
            .cloned()
            .ok_or_else(|| ResolutionError::DiscoveryUnavailable {
                uri: well_known_uri.to_string(),
                message: "connection refused".to_string(),
            })
    }
}

/// Discovery document with every endpoint for `https://idp.example.com`
pub fn idp_document() -> DiscoveryDocument {
    DiscoveryDocument {
        issuer: Some("https://idp.example.com".to_string()),
        jwks_uri: Some("https://idp.example.com/jwks".to_string()),
        token_endpoint: Some("https://idp.example.com/oauth2/token".to_string()),
        authorization_endpoint: Some("https://idp.example.com/oauth2/authorize".to_string()),
        end_session_endpoint: Some("https://idp.example.com/oauth2/logout".to_string()),
    }
}

/// A published event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub action: String,
}

#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventSink {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .expect("events lock")
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("events lock").clear();
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        _note: Option<String>,
    ) {
        self.events.lock().expect("events lock").push(RecordedEvent {
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            action: action.to_string(),
        });
    }
}

/// Reconciler over a fresh store, plus handles to its collaborators
pub struct Harness {
    pub ctx: Arc<Reconciler<MemoryStore>>,
    pub events: Arc<RecordingEventSink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_discovery(StaticDiscovery::default().with(WELL_KNOWN_URI, idp_document()))
    }

    pub fn with_discovery(discovery: StaticDiscovery) -> Self {
        init_rustls();
        let events = Arc::new(RecordingEventSink::default());
        let config = ControllerConfig {
            status_retry_base_ms: 1,
            ..ControllerConfig::default()
        };
        let ctx = Arc::new(Reconciler::new(
            MemoryStore::new(),
            Arc::new(discovery),
            Arc::clone(&events) as Arc<dyn EventSink>,
            Arc::new(Metrics::new().expect("metrics")),
            config,
        ));
        Self { ctx, events }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.ctx.store
    }

    /// Seed `orders` in `shop` with the given spec body
    pub fn seed_policy(&self, spec_yaml: &str) -> AuthPolicy {
        self.store().insert(policy(spec_yaml))
    }

    pub fn policy(&self) -> AuthPolicy {
        self.store()
            .fetch::<AuthPolicy>(POLICY)
            .expect("policy should exist")
    }

    /// Run one reconcile pass against the stored policy.
    pub async fn reconcile(
        &self,
    ) -> Result<kube_runtime::controller::Action, authpolicy_controller::controller::reconciler::ReconcilerError>
    {
        let policy = Arc::new(self.policy());
        authpolicy_controller::controller::reconciler::reconcile(policy, Arc::clone(&self.ctx))
            .await
    }
}

/// `orders` policy in `shop` with the given spec body (indented two spaces)
pub fn policy(spec_yaml: &str) -> AuthPolicy {
    let yaml = format!(
        "apiVersion: auth.authpolicy.dev/v1alpha1\nkind: AuthPolicy\nmetadata:\n  name: {POLICY}\n  namespace: {NAMESPACE}\nspec:\n{spec_yaml}"
    );
    serde_yaml::from_str(&yaml).expect("test policy should parse")
}

pub const MINIMAL_SPEC: &str = "  wellKnownURI: https://idp.example.com/.well-known/openid-configuration\n  selector:\n    matchLabels:\n      app: orders\n";
