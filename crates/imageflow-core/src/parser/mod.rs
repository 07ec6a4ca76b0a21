//! KDLパーサー
//!
//! images.kdl をパースして Manifest を生成します。
//! ノード単位の問題はその場で失敗させず `problems` に積み、
//! カタログの検証結果とまとめて報告します。

mod registry;
mod settings;
mod target;

use registry::parse_registry;
use settings::parse_settings;
use target::{parse_discover, parse_target};

use crate::model::Manifest;
use kdl::{KdlDocument, KdlNode};
use std::path::Path;

/// パース結果と、パース中に見つかった問題
#[derive(Debug, Default)]
pub struct ParsedManifest {
    pub manifest: Manifest,
    pub problems: Vec<String>,
}

/// KDL文字列をパース
///
/// `root` は相対パス（context, dockerfile, discover）の基準ディレクトリ。
pub fn parse_manifest_str(content: &str, root: &Path) -> Result<ParsedManifest, kdl::KdlError> {
    let doc: KdlDocument = content.parse()?;

    let mut parsed = ParsedManifest::default();
    parsed.manifest.root = root.to_path_buf();
    parsed.manifest.project = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                if let Some(name) = first_string(node) {
                    parsed.manifest.project = name.to_string();
                }
            }
            "target" => {
                if let Some(target) = parse_target(node, root, &mut parsed.problems) {
                    parsed.manifest.targets.push(target);
                }
            }
            "registry" => {
                if let Some(registry) = parse_registry(node, &mut parsed.problems) {
                    parsed.manifest.registries.push(registry);
                }
            }
            "discover" => {
                if let Some(rule) = parse_discover(node, &mut parsed.problems) {
                    parsed.manifest.discover.push(rule);
                }
            }
            "settings" => {
                parsed.manifest.settings = parse_settings(node, &mut parsed.problems);
            }
            other => {
                tracing::debug!("Ignoring unknown node: {}", other);
            }
        }
    }

    Ok(parsed)
}

/// 最初の引数を文字列として取得
fn first_string(node: &KdlNode) -> Option<&str> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
}

/// 位置引数をすべて文字列として取得
fn string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
        .collect()
}

/// 名前付きプロパティを取得
fn property<'a>(node: &'a KdlNode, key: &str) -> Option<&'a kdl::KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_some_and(|n| n.value() == key))
        .map(|e| e.value())
}

fn property_string<'a>(node: &'a KdlNode, key: &str) -> Option<&'a str> {
    property(node, key).and_then(|v| v.as_string())
}
