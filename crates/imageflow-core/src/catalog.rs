//! ターゲットカタログ
//!
//! マニフェストを読み込み、検証します。検証は最初のエラーで止めず、
//! 見つかった問題をすべて `ManifestInvalid` にまとめて返します。

use crate::discovery::expand_discovery;
use crate::error::{CatalogError, Result};
use crate::model::{Manifest, validate_tag, validate_target_name};
use crate::parser::parse_manifest_str;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// マニフェストを読み込んで検証する
///
/// # Arguments
/// * `path` - images.kdl のパス
/// * `push` - プッシュモード（レジストリが1つ以上必要になる）
pub fn load(path: &Path, push: bool) -> Result<Manifest> {
    let invalid = |problems: Vec<String>| CatalogError::ManifestInvalid {
        path: path.to_path_buf(),
        problems,
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| invalid(vec![format!("failed to read manifest: {}", e)]))?;

    let root = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let parsed = parse_manifest_str(&content, root).map_err(|e| invalid(vec![e.to_string()]))?;
    let mut manifest = parsed.manifest;
    let mut problems = parsed.problems;

    problems.extend(expand_discovery(&mut manifest));
    problems.extend(validate(&manifest, push));

    if !problems.is_empty() {
        return Err(invalid(problems));
    }

    info!(
        project = %manifest.project,
        targets = manifest.targets.len(),
        registries = manifest.registries.len(),
        "Loaded manifest"
    );
    Ok(manifest)
}

/// パース済みマニフェストの整合性チェック（問題をすべて返す）
pub fn validate(manifest: &Manifest, push: bool) -> Vec<String> {
    let mut problems = Vec::new();

    let mut names = HashSet::new();
    for target in &manifest.targets {
        if !names.insert(target.name.as_str()) {
            problems.push(format!("duplicate target name '{}'", target.name));
        }

        if let Err(e) = validate_target_name(&target.name) {
            problems.push(e.to_string());
        }

        if !target.context.is_dir() {
            problems.push(format!(
                "target '{}': build context not found: {}",
                target.name,
                target.context.display()
            ));
        } else if !target.dockerfile_path().is_file() {
            problems.push(format!(
                "target '{}': Dockerfile not found: {}",
                target.name,
                target.dockerfile_path().display()
            ));
        }

        if target.platforms.is_empty() {
            problems.push(format!("target '{}': no platforms", target.name));
        }

        for tag in &target.tags {
            if let Err(e) = validate_tag(tag) {
                problems.push(format!("target '{}': {}", target.name, e));
            }
        }
    }

    let mut ids = HashSet::new();
    for registry in &manifest.registries {
        if !ids.insert(registry.id.as_str()) {
            problems.push(format!("duplicate registry id '{}'", registry.id));
        }
    }

    if manifest.targets.is_empty() {
        problems.push("no targets defined".to_string());
    }

    if push && manifest.registries.is_empty() {
        problems.push("push requested but no registries are defined".to_string());
    }

    debug!(problems = problems.len(), "Manifest validation finished");
    problems
}
