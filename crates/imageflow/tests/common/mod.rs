#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// images.kdl とビルドコンテキストを持つテスト用プロジェクト
pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// `<root>/<name>/Dockerfile` を作る
    pub fn add_context(&self, name: &str) -> &Self {
        let dir = self.root.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Dockerfile"), "FROM alpine:3.20\n").unwrap();
        self
    }

    pub fn write_manifest(&self, content: &str) -> PathBuf {
        let path = self.root.path().join("images.kdl");
        std::fs::write(&path, content).unwrap();
        path
    }
}

pub const TWO_TARGETS: &str = r#"
project "demo"

target "api" {
    context "api"
    platforms "amd64" "arm64"
    tags "1.0.0"
}

target "worker" {
    context "worker"
}

registry "ghcr" host="ghcr.io" namespace="acme" credentials="none"
"#;
