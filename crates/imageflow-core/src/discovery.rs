//! ターゲット自動発見
//!
//! `discover "services/*"` のような glob にマッチし、Dockerfile を含む
//! ディレクトリをビルドターゲットとして扱います。

use crate::model::{DiscoveryRule, Manifest, Target};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// discover ルールを展開してターゲットを追加する
///
/// 明示的に宣言されたターゲットと同名のディレクトリは追加しない（明示が優先）。
/// glob パターン自体が不正な場合は問題として返す。
#[tracing::instrument(skip(manifest), fields(root = %manifest.root.display()))]
pub fn expand_discovery(manifest: &mut Manifest) -> Vec<String> {
    let mut problems = Vec::new();
    let rules = manifest.discover.clone();

    for rule in &rules {
        match discover_targets(&manifest.root, rule) {
            Ok(found) => {
                for target in found {
                    if manifest.target(&target.name).is_some() {
                        debug!(target = %target.name, "Skipping discovered target (declared explicitly)");
                        continue;
                    }
                    debug!(target = %target.name, context = %target.context.display(), "Discovered target");
                    manifest.targets.push(target);
                }
            }
            Err(e) => {
                warn!(pattern = %rule.pattern, "Invalid discover pattern: {}", e);
                problems.push(format!("discover '{}': {}", rule.pattern, e));
            }
        }
    }

    problems
}

/// 1つの discover ルールにマッチするターゲットを列挙（パス順）
pub fn discover_targets(root: &Path, rule: &DiscoveryRule) -> Result<Vec<Target>, glob::PatternError> {
    let pattern = root.join(&rule.pattern);
    let pattern = pattern.to_string_lossy();

    let mut targets = Vec::new();
    for entry in glob::glob(&pattern)? {
        let dir = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to read discover candidate: {}", e);
                continue;
            }
        };

        if !dir.is_dir() || !dir.join("Dockerfile").is_file() {
            continue;
        }

        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        targets.push(Target {
            name: name.to_string(),
            context: dir.clone(),
            dockerfile: None,
            platforms: rule.platforms.clone(),
            tags: rule.tags.clone(),
            build_args: BTreeMap::new(),
            stage: None,
        });
    }

    Ok(targets)
}
