//! registry ノードのパース

use super::{first_string, property, property_string};
use crate::model::{CredentialRef, Registry, default_env_vars};
use kdl::KdlNode;

/// registry ノードをパース
///
/// ```kdl
/// registry "ghcr" host="ghcr.io" namespace="acme" {
///     username-env "GHCR_USER"
///     token-env "GHCR_TOKEN"
/// }
/// registry "dockerhub" host="docker.io" credentials="docker-config"
/// registry "local" host="localhost:5000" credentials="none" insecure=#true
/// ```
pub fn parse_registry(node: &KdlNode, problems: &mut Vec<String>) -> Option<Registry> {
    let Some(id) = first_string(node) else {
        problems.push("registry requires an id".to_string());
        return None;
    };

    let mut host = property_string(node, "host").map(|s| s.to_string());
    let mut namespace = property_string(node, "namespace").map(|s| s.to_string());
    let mut source = property_string(node, "credentials").map(|s| s.to_string());
    let mut insecure = property(node, "insecure")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let mut username_var = None;
    let mut token_var = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let value = first_string(child).map(|s| s.to_string());
            match child.name().value() {
                "host" => host = value,
                "namespace" => namespace = value,
                "credentials" => source = value,
                "username-env" => username_var = value,
                "token-env" => token_var = value,
                "insecure" => {
                    insecure = child
                        .entries()
                        .first()
                        .and_then(|e| e.value().as_bool())
                        .unwrap_or(true);
                }
                other => {
                    problems.push(format!("registry '{}': unknown field '{}'", id, other));
                }
            }
        }
    }

    let credentials = match source.as_deref() {
        None | Some("env") => {
            let (default_user, default_token) = default_env_vars(id);
            CredentialRef::Env {
                username_var: username_var.unwrap_or(default_user),
                token_var: token_var.unwrap_or(default_token),
            }
        }
        Some("docker-config") => CredentialRef::DockerConfig,
        Some("none") | Some("anonymous") => CredentialRef::Anonymous,
        Some(other) => {
            problems.push(format!(
                "registry '{}': unknown credentials source '{}' (env, docker-config, none)",
                id, other
            ));
            CredentialRef::Anonymous
        }
    };

    let host = match host {
        Some(h) if !h.is_empty() => h,
        _ => {
            problems.push(format!("registry '{}': host is required", id));
            String::new()
        }
    };

    Some(Registry {
        id: id.to_string(),
        host,
        namespace,
        credentials,
        insecure,
    })
}
