use crate::oci::Descriptor;
use imageflow_core::{Arch, Digest};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 1アーキテクチャ分のビルド結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchImage {
    pub arch: Arch,
    /// イメージマニフェストの記述子
    pub manifest: Descriptor,
    /// blob を保持する OCI レイアウトのディレクトリ
    pub layout: PathBuf,
}

/// ターゲットのビルド成果物
///
/// 全アーキテクチャのビルドが成功した場合にのみ作られる。
#[derive(Debug, Clone)]
pub struct Artifact {
    pub target: String,
    pub context_digest: Digest,
    pub images: Vec<ArchImage>,
    /// マルチアーキテクチャ index の JSON
    pub index: Vec<u8>,
    pub index_digest: Digest,
    pub tags: Vec<String>,
}

impl Artifact {
    pub fn arch_digests(&self) -> BTreeMap<String, Digest> {
        self.images
            .iter()
            .map(|image| (image.arch.to_string(), image.manifest.digest.clone()))
            .collect()
    }
}
