//! target / discover ノードのパース

use super::{first_string, property_string, string_args};
use crate::model::{Arch, DiscoveryRule, Target};
use kdl::KdlNode;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// platforms 未指定時のアーキテクチャ
const DEFAULT_ARCH: &str = "amd64";

/// target ノードをパース
pub fn parse_target(node: &KdlNode, root: &Path, problems: &mut Vec<String>) -> Option<Target> {
    let Some(name) = first_string(node) else {
        problems.push("target requires a name".to_string());
        return None;
    };
    let name = name.to_string();

    let mut context: Option<PathBuf> = None;
    let mut dockerfile: Option<PathBuf> = None;
    let mut platforms: Option<Vec<Arch>> = None;
    let mut tags = Vec::new();
    let mut build_args = BTreeMap::new();
    let mut stage = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "context" => {
                    context = first_string(child).map(|p| root.join(p));
                }
                "dockerfile" => {
                    dockerfile = first_string(child).map(|p| root.join(p));
                }
                "platforms" | "platform" => {
                    platforms = Some(parse_platforms(
                        &string_args(child),
                        &format!("target '{}'", name),
                        problems,
                    ));
                }
                "tags" | "tag" => {
                    tags.extend(string_args(child));
                }
                "build-arg" => {
                    let args = string_args(child);
                    match args.as_slice() {
                        [key, value] => {
                            build_args.insert(key.clone(), value.clone());
                        }
                        _ => problems.push(format!(
                            "target '{}': build-arg expects KEY VALUE",
                            name
                        )),
                    }
                }
                "build-args" => {
                    // build-args { KEY "value" } 形式
                    if let Some(args) = child.children() {
                        for arg in args.nodes() {
                            let value = first_string(arg).unwrap_or("").to_string();
                            build_args.insert(arg.name().value().to_string(), value);
                        }
                    }
                }
                "stage" => {
                    stage = first_string(child).map(|s| s.to_string());
                }
                other => {
                    problems.push(format!("target '{}': unknown field '{}'", name, other));
                }
            }
        }
    }

    let context = match context {
        Some(ctx) => ctx,
        None => {
            problems.push(format!("target '{}': context is required", name));
            return None;
        }
    };

    let platforms =
        platforms.unwrap_or_else(|| Arch::parse(DEFAULT_ARCH).into_iter().collect());

    Some(Target {
        name,
        context,
        dockerfile,
        platforms,
        tags,
        build_args,
        stage,
    })
}

/// discover ノードをパース
///
/// ```kdl
/// discover "services/*" platforms="amd64"
/// discover "apps/*" {
///     platforms "amd64" "arm64"
///     tags "edge"
/// }
/// ```
pub fn parse_discover(node: &KdlNode, problems: &mut Vec<String>) -> Option<DiscoveryRule> {
    let Some(pattern) = first_string(node) else {
        problems.push("discover requires a glob pattern".to_string());
        return None;
    };
    let label = format!("discover '{}'", pattern);

    let mut platforms: Vec<String> = property_string(node, "platforms")
        .map(|s| s.split(',').map(|p| p.trim().to_string()).collect())
        .unwrap_or_default();
    let mut tags: Vec<String> = property_string(node, "tags")
        .map(|s| s.split(',').map(|t| t.trim().to_string()).collect())
        .unwrap_or_default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "platforms" | "platform" => platforms.extend(string_args(child)),
                "tags" | "tag" => tags.extend(string_args(child)),
                other => problems.push(format!("{}: unknown field '{}'", label, other)),
            }
        }
    }

    if platforms.is_empty() {
        platforms.push(DEFAULT_ARCH.to_string());
    }

    Some(DiscoveryRule {
        pattern: pattern.to_string(),
        platforms: parse_platforms(&platforms, &label, problems),
        tags,
    })
}

fn parse_platforms(values: &[String], label: &str, problems: &mut Vec<String>) -> Vec<Arch> {
    if values.is_empty() {
        problems.push(format!("{}: platforms must not be empty", label));
    }

    let mut archs: Vec<Arch> = Vec::new();
    for value in values {
        match Arch::parse(value) {
            Ok(arch) if archs.contains(&arch) => {
                problems.push(format!("{}: duplicate platform '{}'", label, value));
            }
            Ok(arch) => archs.push(arch),
            Err(e) => problems.push(format!("{}: {}", label, e)),
        }
    }
    archs
}
