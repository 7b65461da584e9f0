//! # Login Filter Script
//!
//! Generates the Lua script that runs in front of the OAuth2 filter. On the
//! request path it tells the OAuth2 filter which requests may pass without a
//! login (`x-bypass-login`) and which must get a 401 instead of a redirect
//! (`x-deny-redirect`). On the response path it appends the configured login
//! parameters to authorization redirects and sends logouts to the identity
//! provider's end-session endpoint.
//!
//! Output is deterministic: rule tables keep declaration order and every
//! key/value table is sorted, so unchanged input renders byte-identical text.

use crate::constants::{BYPASS_LOGIN_HEADER, DENY_REDIRECT_HEADER};
use crate::controller::paths::compile_to_lua_pattern;
use crate::controller::reconciler::scope::{LoginFlow, Scope};
use crate::crd::{HttpMethod, RequestMatcher};
use std::collections::BTreeMap;
use std::fmt::Write;

/// One table row: a Lua pattern and the methods it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Row {
    pattern: String,
    methods: Vec<&'static str>,
}

fn rows<'a>(matchers: impl IntoIterator<Item = &'a RequestMatcher>) -> Vec<Row> {
    let mut rows = Vec::new();
    for matcher in matchers {
        let mut methods = matcher.method_names();
        methods.sort_unstable();
        methods.dedup();
        for path in &matcher.paths {
            rows.push(Row {
                pattern: compile_to_lua_pattern(path),
                methods: methods.clone(),
            });
        }
    }
    rows
}

/// Double-quoted Lua string literal
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn render_rows(rows: &[Row]) -> String {
    let rendered: Vec<String> = rows
        .iter()
        .map(|row| {
            let methods: Vec<String> = row
                .methods
                .iter()
                .map(|m| format!("[{}]=true", quote(m)))
                .collect();
            format!(
                "{{pattern={},methods={{{}}}}}",
                quote(&row.pattern),
                methods.join(",")
            )
        })
        .collect();
    format!("{{{}}}", rendered.join(","))
}

/// Query-component escape: unreserved characters pass, space becomes `+`.
fn query_escape(value: &str) -> String {
    urlencoding::encode(value).replace("%20", "+")
}

/// Keys are rendered as given; only values are escaped.
fn render_params(params: &BTreeMap<String, String>) -> String {
    let rendered: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("[{}]={}", quote(k), quote(&query_escape(v))))
        .collect();
    format!("{{{}}}", rendered.join(","))
}

/// Paths the OAuth2 filter itself serves, matched for every method
fn login_flow_matcher(login: &LoginFlow) -> RequestMatcher {
    let config = &login.config;
    let mut paths = vec![config.redirect_path.clone(), config.logout_path.clone()];
    paths.extend(config.login_path.iter().cloned());
    RequestMatcher::new(paths, &HttpMethod::ALL)
}

/// Render the login filter script for `scope`.
#[must_use]
pub fn login_script(scope: &Scope, login: &LoginFlow) -> String {
    let issuers = scope
        .resolved
        .as_ref()
        .map_or(&[][..], |r| r.issuers.as_slice());

    let ignore = rows(issuers.iter().flat_map(|i| i.ignore_rules.iter()));

    let login_matcher = login_flow_matcher(login);
    let require = rows(
        issuers
            .iter()
            .flat_map(|i| i.auth_rules.iter().map(|r| &r.matcher))
            .chain(std::iter::once(&login_matcher)),
    );

    let deny_redirect = rows(
        issuers
            .iter()
            .flat_map(|i| i.auth_rules.iter())
            .filter(|r| r.deny_redirect == Some(true))
            .map(|r| &r.matcher),
    );

    let post_logout = login
        .config
        .post_logout_redirect_uri
        .as_deref()
        .map(query_escape)
        .unwrap_or_default();

    let mut script = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(script, "local ignore_rules = {}", render_rows(&ignore));
    let _ = writeln!(script, "local require_rules = {}", render_rows(&require));
    let _ = writeln!(script, "local deny_redirect_rules = {}", render_rows(&deny_redirect));
    let _ = writeln!(script, "local login_params = {}", render_params(&login.config.login_params));
    let _ = writeln!(script, "local authorization_endpoint = {}", quote(&login.authorization_endpoint));
    let _ = writeln!(script, "local end_session_endpoint = {}", quote(&login.end_session_endpoint));
    let _ = writeln!(script, "local post_logout_redirect_uri = {}", quote(&post_logout));
    let _ = writeln!(script, "local logout_path = {}", quote(&login.config.logout_path));
    let _ = writeln!(script, "local bypass_login_header = {}", quote(BYPASS_LOGIN_HEADER));
    let _ = writeln!(script, "local deny_redirect_header = {}", quote(DENY_REDIRECT_HEADER));
    script.push_str(SCRIPT_BODY);
    script
}

const SCRIPT_BODY: &str = r#"
local function matches(rules, path, method)
  for _, rule in ipairs(rules) do
    if string.match(path, rule.pattern) ~= nil and (next(rule.methods) == nil or rule.methods[method]) then
      return true
    end
  end
  return false
end

local function strip_query(path)
  local stripped = string.gsub(path, "%?.*$", "")
  return stripped
end

function envoy_on_request(request_handle)
  local headers = request_handle:headers()
  headers:remove(bypass_login_header)
  headers:remove(deny_redirect_header)

  local path = strip_query(headers:get(":path") or "")
  local method = headers:get(":method") or ""

  if matches(ignore_rules, path, method) and not matches(require_rules, path, method) then
    headers:add(bypass_login_header, "true")
  end
  if matches(deny_redirect_rules, path, method) then
    headers:add(deny_redirect_header, "true")
  end
  if path == logout_path then
    request_handle:streamInfo():dynamicMetadata():set("envoy.filters.http.lua", "logout", true)
  end
end

function envoy_on_response(response_handle)
  local headers = response_handle:headers()
  local location = headers:get("location")
  if location == nil then
    return
  end

  local metadata = response_handle:streamInfo():dynamicMetadata():get("envoy.filters.http.lua")
  if metadata ~= nil and metadata["logout"] then
    local target = end_session_endpoint
    if post_logout_redirect_uri ~= "" then
      target = target .. "?post_logout_redirect_uri=" .. post_logout_redirect_uri
    end
    headers:replace("location", target)
    return
  end

  if string.sub(location, 1, #authorization_endpoint) == authorization_endpoint then
    local keys = {}
    for key in pairs(login_params) do
      table.insert(keys, key)
    end
    table.sort(keys)
    for _, key in ipairs(keys) do
      location = location .. "&" .. key .. "=" .. login_params[key]
    end
    headers:replace("location", location)
  end
end
"#;
