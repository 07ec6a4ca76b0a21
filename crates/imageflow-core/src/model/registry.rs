//! プッシュ先レジストリ

use serde::{Deserialize, Serialize};

/// Docker Hub の表記上のホスト
const DOCKER_HUB_HOST: &str = "docker.io";
/// Docker Hub の Registry API エンドポイント
const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

/// プッシュ先のコンテナレジストリ
///
/// 認証情報そのものは保持しない。`credentials` は参照（環境変数名など）のみ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    /// マニフェスト内の識別子（例: "ghcr"）
    pub id: String,

    /// ホスト（例: "ghcr.io", "localhost:5000"）
    pub host: String,

    /// リポジトリの名前空間（例: "acme"）
    pub namespace: Option<String>,

    /// 認証情報の取得方法
    pub credentials: CredentialRef,

    /// HTTP で接続する（ローカルレジストリ向け）
    pub insecure: bool,
}

/// 認証情報の参照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum CredentialRef {
    /// 環境変数から username / token を読む
    Env {
        username_var: String,
        token_var: String,
    },
    /// ~/.docker/config.json (auths / credsStore) から読む
    DockerConfig,
    /// 認証なし
    Anonymous,
}

impl CredentialRef {
    /// レジストリIDから既定の環境変数名を導出
    ///
    /// `ghcr` -> `IMAGEFLOW_GHCR_USERNAME` / `IMAGEFLOW_GHCR_TOKEN`
    pub fn env_for(registry_id: &str) -> Self {
        let (username_var, token_var) = default_env_vars(registry_id);
        CredentialRef::Env {
            username_var,
            token_var,
        }
    }
}

/// 既定の (username, token) 環境変数名
pub fn default_env_vars(registry_id: &str) -> (String, String) {
    let key: String = registry_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    (
        format!("IMAGEFLOW_{}_USERNAME", key),
        format!("IMAGEFLOW_{}_TOKEN", key),
    )
}

impl Registry {
    /// 既定の認証設定（環境変数）でレジストリを作成
    pub fn new(id: impl Into<String>, host: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            credentials: CredentialRef::env_for(&id),
            id,
            host: host.into(),
            namespace: None,
            insecure: false,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// ターゲットのリポジトリ名（例: "acme/api"）
    pub fn repository(&self, target: &str) -> String {
        match &self.namespace {
            Some(ns) if !ns.is_empty() => format!("{}/{}", ns.trim_matches('/'), target),
            _ if self.is_docker_hub() => format!("library/{}", target),
            _ => target.to_string(),
        }
    }

    /// Registry API のベースURL
    pub fn api_base(&self) -> String {
        let host = if self.is_docker_hub() {
            DOCKER_HUB_API_HOST
        } else {
            self.host.as_str()
        };
        let scheme = if self.insecure { "http" } else { "https" };
        format!("{}://{}", scheme, host)
    }

    fn is_docker_hub(&self) -> bool {
        self.host == DOCKER_HUB_HOST || self.host == "index.docker.io"
    }
}
