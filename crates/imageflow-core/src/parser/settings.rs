//! settings ノードのパース

use crate::model::ManifestSettings;
use kdl::KdlNode;

/// settings ノードをパース
pub fn parse_settings(node: &KdlNode, problems: &mut Vec<String>) -> ManifestSettings {
    let mut settings = ManifestSettings::default();

    let Some(children) = node.children() else {
        return settings;
    };

    for child in children.nodes() {
        let key = child.name().value();
        let value = child.entries().first().and_then(|e| e.value().as_integer());

        let Some(value) = value else {
            problems.push(format!("settings: '{}' expects an integer", key));
            continue;
        };

        if value < 1 {
            problems.push(format!("settings: '{}' must be at least 1 (got {})", key, value));
            continue;
        }

        match key {
            "max-parallel-builds" => settings.max_parallel_builds = usize::try_from(value).ok(),
            "max-parallel-pushes" => settings.max_parallel_pushes = usize::try_from(value).ok(),
            "max-attempts" => settings.max_attempts = u32::try_from(value).ok(),
            other => problems.push(format!("settings: unknown field '{}'", other)),
        }
    }

    settings
}
