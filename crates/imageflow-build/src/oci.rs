//! OCI イメージのデータ型とローカルレイアウト

use crate::error::{BuildError, BuildResult};
use imageflow_core::{Arch, Digest};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// manifest の HEAD/GET で送る Accept
pub const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.docker.distribution.manifest.v2+json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl From<&Arch> for Platform {
    fn from(arch: &Arch) -> Self {
        let (architecture, variant) = arch.oci_parts();
        Self {
            architecture: architecture.to_string(),
            os: "linux".to_string(),
            variant: variant.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    /// config と全レイヤーの記述子
    pub fn blobs(&self) -> impl Iterator<Item = &Descriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }
}

/// アーキテクチャ別イメージをまとめたマルチアーキテクチャ index を組み立てる
///
/// 入力の順序に関係なくアーキテクチャ順に並べるので、
/// 同じイメージ群からは常に同じバイト列（= 同じダイジェスト）になる。
pub fn assemble_index(images: &[(&Arch, &Descriptor)]) -> BuildResult<(Vec<u8>, Digest)> {
    let mut sorted: Vec<_> = images.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let index = ImageIndex {
        schema_version: 2,
        media_type: Some(MEDIA_TYPE_OCI_INDEX.to_string()),
        manifests: sorted
            .into_iter()
            .map(|(arch, manifest)| Descriptor {
                media_type: manifest.media_type.clone(),
                digest: manifest.digest.clone(),
                size: manifest.size,
                platform: Some(Platform::from(arch)),
            })
            .collect(),
    };

    let bytes = serde_json::to_vec(&index)?;
    let digest = Digest::sha256(&bytes);
    Ok((bytes, digest))
}

/// buildx が `type=oci,tar=false` で書き出すディレクトリ
#[derive(Debug, Clone)]
pub struct OciLayout {
    root: PathBuf,
}

impl OciLayout {
    pub fn open(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join("blobs").join("sha256").join(digest.hex())
    }

    pub fn has_blob(&self, digest: &Digest) -> bool {
        self.blob_path(digest).is_file()
    }

    pub async fn read_blob(&self, digest: &Digest) -> BuildResult<Vec<u8>> {
        let path = self.blob_path(digest);
        tokio::fs::read(&path).await.map_err(|e| self.invalid(format!(
            "blob {} is unreadable: {}",
            digest, e
        )))
    }

    /// レイアウトに含まれる唯一のイメージマニフェストの記述子
    pub async fn image_manifest(&self) -> BuildResult<Descriptor> {
        let bytes = tokio::fs::read(self.root.join("index.json"))
            .await
            .map_err(|e| self.invalid(format!("index.json is unreadable: {}", e)))?;
        let index: ImageIndex = serde_json::from_slice(&bytes)
            .map_err(|e| self.invalid(format!("index.json is malformed: {}", e)))?;

        let manifest = index
            .manifests
            .into_iter()
            .find(|d| {
                d.media_type == MEDIA_TYPE_OCI_MANIFEST || d.media_type == MEDIA_TYPE_DOCKER_MANIFEST
            })
            .ok_or_else(|| self.invalid("no image manifest in index.json"))?;

        if !self.has_blob(&manifest.digest) {
            return Err(self.invalid(format!("manifest blob {} is missing", manifest.digest)));
        }
        Ok(manifest)
    }

    fn invalid(&self, message: impl Into<String>) -> BuildError {
        BuildError::InvalidLayout {
            path: self.root.clone(),
            message: message.into(),
        }
    }
}
