//! # Reconcile Actions
//!
//! One action per generated object. An action knows the object's kind and
//! name, its desired state (or that it must not exist) and how to compare
//! and copy the fields this controller owns. Running it converges the
//! cluster object and records exactly one outcome on the [`Scope`], except
//! when an undesired object is already gone.
//!
//! ```text
//! desired = None  -> get -> missing: nothing to do
//!                        -> present: delete
//! desired = Some  -> get -> missing: set owner, create
//!                        -> present: compare owned fields, update if changed
//! ```

use crate::controller::reconciler::scope::{Descendant, Scope};
use crate::controller::reconciler::store::{kind_of, Managed, ObjectStore};
use async_trait::async_trait;
use kube::Resource;
use tracing::{debug, info, warn};

/// Compares the owned fields of the current object against the desired one.
pub type ShouldUpdate<K> = Box<dyn Fn(&K, &K) -> bool + Send + Sync>;

/// Copies the owned fields of the desired object onto the current one.
pub type UpdateFields<K> = Box<dyn Fn(&mut K, &K) + Send + Sync>;

/// Type-erased action, so actions over different kinds share one list.
#[async_trait]
pub trait Reconcilable<S: ObjectStore>: Send + Sync {
    fn kind(&self) -> &str;

    fn name(&self) -> &str;

    /// Whether the object should exist after this pass
    fn is_desired(&self) -> bool;

    fn id(&self) -> String {
        Descendant::id_for(self.kind(), self.name())
    }

    /// Converge the cluster object and record the outcome on `scope`.
    async fn reconcile(&self, store: &S, scope: &mut Scope);
}

pub struct ReconcileAction<K: Managed> {
    kind: String,
    name: String,
    namespace: String,
    desired: Option<K>,
    should_update: ShouldUpdate<K>,
    update_fields: UpdateFields<K>,
}

impl<K: Managed> std::fmt::Debug for ReconcileAction<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileAction")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("desired", &self.desired.is_some())
            .finish_non_exhaustive()
    }
}

impl<K: Managed> ReconcileAction<K> {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        desired: Option<K>,
        should_update: impl Fn(&K, &K) -> bool + Send + Sync + 'static,
        update_fields: impl Fn(&mut K, &K) + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: kind_of::<K>(),
            name: name.into(),
            namespace: namespace.into(),
            desired,
            should_update: Box::new(should_update),
            update_fields: Box::new(update_fields),
        }
    }

    #[must_use]
    pub fn desired(&self) -> Option<&K> {
        self.desired.as_ref()
    }

    fn qualified(&self) -> String {
        format!("{} {}/{}", self.kind, self.namespace, self.name)
    }

    /// Delete branch; `None` when there was nothing to delete.
    async fn remove<S: ObjectStore>(&self, store: &S) -> Option<Descendant> {
        let target = self.qualified();
        match store.get::<K>(&self.namespace, &self.name).await {
            Ok(None) => {
                debug!("{target} already deleted");
                None
            }
            Err(e) => {
                warn!("⚠️  Failed to get {target} before deleting it: {e}");
                Some(Descendant::error(
                    &self.kind,
                    &self.name,
                    format!("Failed to get {target} when trying to delete it."),
                ))
            }
            Ok(Some(_)) => match store.delete::<K>(&self.namespace, &self.name).await {
                // Lost a race with another deleter; the object is gone either way.
                Err(e) if e.is_not_found() => {
                    debug!("{target} already deleted");
                    None
                }
                Err(e) => {
                    warn!("⚠️  Failed to delete {target}: {e}");
                    Some(Descendant::error(
                        &self.kind,
                        &self.name,
                        format!("Failed to delete {target}"),
                    ))
                }
                Ok(()) => {
                    info!("🗑️  Deleted {target} as it is no longer desired");
                    Some(Descendant::success(
                        &self.kind,
                        &self.name,
                        format!("Deleted {target} as it is no longer desired."),
                    ))
                }
            },
        }
    }

    async fn create<S: ObjectStore>(&self, store: &S, scope: &Scope, desired: &K) -> Descendant {
        let target = self.qualified();
        let Some(owner) = scope.policy.controller_owner_ref(&()) else {
            warn!("⚠️  AuthPolicy has no uid, cannot own {target}");
            return Descendant::error(
                &self.kind,
                &self.name,
                format!("Unable to set AuthPolicy ownerReference on {target}."),
            );
        };

        let mut object = desired.clone();
        object.meta_mut().owner_references = Some(vec![owner]);

        match store.create(&object).await {
            Ok(_) => {
                info!("✅ Created {target}");
                Descendant::success(
                    &self.kind,
                    &self.name,
                    format!("Successfully created {target}."),
                )
            }
            Err(e) => {
                warn!("⚠️  Failed to create {target}: {e}");
                Descendant::error(&self.kind, &self.name, format!("Unable to create {target}"))
            }
        }
    }

    async fn apply<S: ObjectStore>(&self, store: &S, scope: &Scope, desired: &K) -> Descendant {
        let target = self.qualified();
        let current = match store.get::<K>(&self.namespace, &self.name).await {
            Ok(Some(current)) => current,
            Ok(None) => return self.create(store, scope, desired).await,
            Err(e) => {
                warn!("⚠️  Failed to get {target}: {e}");
                return Descendant::error(
                    &self.kind,
                    &self.name,
                    format!("Unable to get {target}."),
                );
            }
        };

        if !(self.should_update)(&current, desired) {
            debug!("{target} is up to date");
            return Descendant::success(
                &self.kind,
                &self.name,
                format!("Successfully generated {target}, no update needed"),
            );
        }

        let mut updated = current;
        (self.update_fields)(&mut updated, desired);
        match store.update(&updated).await {
            Ok(_) => {
                info!("🔄 Updated {target}");
                Descendant::success(
                    &self.kind,
                    &self.name,
                    format!("Successfully generated {target}"),
                )
            }
            Err(e) => {
                warn!("⚠️  Failed to update {target}: {e}");
                Descendant::error(
                    &self.kind,
                    &self.name,
                    format!("Unable to update {target}."),
                )
            }
        }
    }
}

#[async_trait]
impl<K: Managed, S: ObjectStore> Reconcilable<S> for ReconcileAction<K> {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_desired(&self) -> bool {
        self.desired.is_some()
    }

    async fn reconcile(&self, store: &S, scope: &mut Scope) {
        let outcome = match &self.desired {
            None => self.remove(store).await,
            Some(desired) => Some(self.apply(store, scope, desired).await),
        };
        if let Some(descendant) = outcome {
            scope.descendants.record(descendant);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;

    fn action(desired: Option<Secret>) -> ReconcileAction<Secret> {
        ReconcileAction::new(
            "orders-envoy-secret",
            "shop",
            desired,
            |current: &Secret, desired: &Secret| current.data != desired.data,
            |current: &mut Secret, desired: &Secret| current.data.clone_from(&desired.data),
        )
    }

    #[test]
    fn test_kind_comes_from_the_object_type() {
        let action = action(None);
        assert_eq!(action.kind, "Secret");
        assert_eq!(action.qualified(), "Secret shop/orders-envoy-secret");
        assert!(action.desired().is_none());
    }

    #[test]
    fn test_debug_hides_object_body() {
        let rendered = format!("{:?}", action(Some(Secret::default())));
        assert!(rendered.contains("desired: true"));
        assert!(!rendered.contains("data"));
    }
}
