//! Builds the six reconcile actions of one pass, in apply order.

use crate::controller::authz::compile_rule_sets;
use crate::controller::reconciler::action::{ReconcileAction, Reconcilable};
use crate::controller::reconciler::scope::Scope;
use crate::controller::reconciler::store::ObjectStore;
use crate::controller::resources::authorization_policy::{self, PolicyKind};
use crate::controller::resources::{
    envoy_filter, envoy_secret_name, login_filter_name, request_authentication, secret,
    ResourceError,
};

pub type Actions<S> = Vec<Box<dyn Reconcilable<S>>>;

/// Secret, EnvoyFilter, RequestAuthentication, then the deny, ignore and
/// require AuthorizationPolicies.
pub fn build_actions<S: ObjectStore + 'static>(scope: &Scope) -> Result<Actions<S>, ResourceError> {
    let name = scope.name();
    let namespace = scope.namespace();

    // Only consumed when the Secret is created.
    let hmac_key = if scope.login().is_some() {
        secret::generate_hmac_key()?
    } else {
        String::new()
    };

    let mut actions: Actions<S> = vec![
        Box::new(ReconcileAction::new(
            envoy_secret_name(name),
            namespace,
            secret::desired(scope, &hmac_key)?,
            secret::should_update,
            secret::update_fields,
        )),
        Box::new(ReconcileAction::new(
            login_filter_name(name),
            namespace,
            envoy_filter::desired(scope)?,
            envoy_filter::should_update,
            envoy_filter::update_fields,
        )),
        Box::new(ReconcileAction::new(
            name,
            namespace,
            request_authentication::desired(scope),
            request_authentication::should_update,
            request_authentication::update_fields,
        )),
    ];

    let rule_sets = compile_rule_sets(&scope.policy_facts());
    for kind in [PolicyKind::Deny, PolicyKind::Ignore, PolicyKind::Require] {
        actions.push(Box::new(ReconcileAction::new(
            kind.object_name(name),
            namespace,
            authorization_policy::desired(scope, kind, &rule_sets),
            authorization_policy::should_update,
            authorization_policy::update_fields,
        )));
    }

    Ok(actions)
}
