//! # Login EnvoyFilter
//!
//! Three patches on the workload's inbound sidecar:
//!
//! 1. the login filter script ([`super::lua`]) as an HTTP Lua filter
//! 2. an `oauth` cluster pointing at the token endpoint host over TLS
//! 3. the Envoy OAuth2 filter, reading its secrets from SDS files mounted
//!    from the generated Secret
//!
//! Both HTTP filters are inserted before JWT authentication, Lua first.

use super::istio::{ConfigPatch, EnvoyFilter, EnvoyFilterSpec, EnvoyWorkloadSelector, PatchOperation};
use super::{login_filter_name, lua, object_meta, ResourceError};
use crate::constants::{
    BYPASS_LOGIN_HEADER, DENY_REDIRECT_HEADER, ENVOY_SECRET_MOUNT_PATH, HMAC_SECRET_FILE,
    TOKEN_SECRET_FILE,
};
use crate::controller::reconciler::resolve::token_endpoint_host;
use crate::controller::reconciler::scope::{LoginFlow, Scope};
use serde_json::{json, Value};

const OAUTH_CLUSTER: &str = "oauth";
const HTTP_CONNECTION_MANAGER: &str = "envoy.filters.network.http_connection_manager";
const JWT_AUTHN_FILTER: &str = "envoy.filters.http.jwt_authn";

/// Desired EnvoyFilter; `None` unless auto-login is enabled on a valid,
/// enabled policy.
pub fn desired(scope: &Scope) -> Result<Option<EnvoyFilter>, ResourceError> {
    let Some(login) = scope.login() else {
        return Ok(None);
    };
    let host = token_endpoint_host(&login.token_endpoint)
        .ok_or_else(|| ResourceError::TokenEndpoint(login.token_endpoint.clone()))?;

    let script = lua::login_script(scope, login);

    Ok(Some(EnvoyFilter {
        metadata: object_meta(scope, &login_filter_name(scope.name())),
        spec: EnvoyFilterSpec {
            workload_selector: Some(EnvoyWorkloadSelector {
                labels: scope.policy.spec.selector.match_labels.clone(),
            }),
            config_patches: vec![
                lua_filter_patch(&script),
                oauth_cluster_patch(&host),
                oauth2_filter_patch(login),
            ],
        },
    }))
}

fn before_jwt_authn() -> Value {
    json!({
        "context": "SIDECAR_INBOUND",
        "listener": {
            "filterChain": {
                "filter": {
                    "name": HTTP_CONNECTION_MANAGER,
                    "subFilter": { "name": JWT_AUTHN_FILTER }
                }
            }
        }
    })
}

fn lua_filter_patch(script: &str) -> ConfigPatch {
    ConfigPatch {
        apply_to: "HTTP_FILTER".to_string(),
        match_: before_jwt_authn(),
        patch: PatchOperation {
            operation: "INSERT_BEFORE".to_string(),
            value: json!({
                "name": "envoy.filters.http.lua",
                "typed_config": {
                    "@type": "type.googleapis.com/envoy.extensions.filters.http.lua.v3.Lua",
                    "inlineCode": script
                }
            }),
        },
    }
}

fn oauth_cluster_patch(host: &str) -> ConfigPatch {
    ConfigPatch {
        apply_to: "CLUSTER".to_string(),
        match_: json!({ "cluster": { "service": OAUTH_CLUSTER } }),
        patch: PatchOperation {
            operation: "ADD".to_string(),
            value: json!({
                "name": OAUTH_CLUSTER,
                "dns_lookup_family": "V4_ONLY",
                "type": "LOGICAL_DNS",
                "connect_timeout": "10s",
                "lb_policy": "ROUND_ROBIN",
                "transport_socket": {
                    "name": "envoy.transport_sockets.tls",
                    "typed_config": {
                        "@type": "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext",
                        "sni": host
                    }
                },
                "load_assignment": {
                    "cluster_name": OAUTH_CLUSTER,
                    "endpoints": [{
                        "lb_endpoints": [{
                            "endpoint": {
                                "address": {
                                    "socket_address": { "address": host, "port_value": 443 }
                                }
                            }
                        }]
                    }]
                }
            }),
        },
    }
}

fn sds_secret(name: &str, file: &str) -> Value {
    json!({
        "name": name,
        "sds_config": {
            "path_config_source": { "path": format!("{ENVOY_SECRET_MOUNT_PATH}/{file}") }
        }
    })
}

fn oauth2_filter_patch(login: &LoginFlow) -> ConfigPatch {
    let config = &login.config;
    ConfigPatch {
        apply_to: "HTTP_FILTER".to_string(),
        match_: before_jwt_authn(),
        patch: PatchOperation {
            operation: "INSERT_BEFORE".to_string(),
            value: json!({
                "name": "envoy.filters.http.oauth2",
                "typed_config": {
                    "@type": "type.googleapis.com/envoy.extensions.filters.http.oauth2.v3.OAuth2",
                    "config": {
                        "token_endpoint": {
                            "cluster": OAUTH_CLUSTER,
                            "uri": login.token_endpoint,
                            "timeout": "5s"
                        },
                        "authorization_endpoint": login.authorization_endpoint,
                        "redirect_uri": format!("https://%REQ(:authority)%{}", config.redirect_path),
                        "redirect_path_matcher": { "path": { "exact": config.redirect_path } },
                        "signout_path": { "path": { "exact": config.logout_path } },
                        "forward_bearer_token": true,
                        "use_refresh_token": true,
                        "pass_through_matcher": [
                            { "name": "authorization", "string_match": { "prefix": "Bearer " } },
                            { "name": BYPASS_LOGIN_HEADER, "string_match": { "exact": "true" } }
                        ],
                        "deny_redirect_matcher": [
                            { "name": DENY_REDIRECT_HEADER, "string_match": { "exact": "true" } }
                        ],
                        "credentials": {
                            "client_id": login.client.client_id,
                            "token_secret": sds_secret("token", TOKEN_SECRET_FILE),
                            "hmac_secret": sds_secret("hmac", HMAC_SECRET_FILE)
                        },
                        "auth_scopes": config.scopes
                    }
                }
            }),
        },
    }
}

#[must_use]
pub fn should_update(current: &EnvoyFilter, desired: &EnvoyFilter) -> bool {
    current.spec.workload_selector != desired.spec.workload_selector
        || current.spec.config_patches != desired.spec.config_patches
}

pub fn update_fields(current: &mut EnvoyFilter, desired: &EnvoyFilter) {
    current
        .spec
        .workload_selector
        .clone_from(&desired.spec.workload_selector);
    current
        .spec
        .config_patches
        .clone_from(&desired.spec.config_patches);
}
