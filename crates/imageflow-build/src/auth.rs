//! レジストリ認証処理
//!
//! 認証情報の解決（環境変数 / Docker config.json / 匿名）と、
//! レジストリごとに1回だけ行う認証ハンドシェイクのキャッシュ。

use crate::client::{RegistryClient, RegistrySession};
use crate::error::AuthError;
use base64::Engine;
use imageflow_core::{CredentialRef, Registry};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Docker Hub が config.json で使うキー
const DOCKER_HUB_KEYS: &[&str] = &[
    "https://index.docker.io/v1/",
    "index.docker.io",
    "docker.io",
    "registry-1.docker.io",
];

/// ログに出ないトークン
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// ユーザー名とトークン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: Secret,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: Secret::new(secret),
        }
    }

    /// `Authorization: Basic` の値
    pub fn basic_auth(&self) -> String {
        let raw = format!("{}:{}", self.username, self.secret.expose());
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

/// レジストリ定義の `credentials` から認証情報を解決
///
/// `Ok(None)` は匿名アクセス。
pub fn resolve_credentials(registry: &Registry) -> Result<Option<Credentials>, AuthError> {
    match &registry.credentials {
        CredentialRef::Anonymous => Ok(None),
        CredentialRef::Env {
            username_var,
            token_var,
        } => {
            let username = non_empty_env(username_var);
            let token = non_empty_env(token_var);
            match (username, token) {
                (Some(username), Some(token)) => Ok(Some(Credentials::new(username, token))),
                _ => Err(AuthError::new(
                    &registry.id,
                    format!(
                        "credentials not set: export {} and {}",
                        username_var, token_var
                    ),
                )),
            }
        }
        CredentialRef::DockerConfig => DockerConfigStore::new()
            .credentials_for(&registry.host)
            .and_then(|creds| {
                creds.ok_or_else(|| {
                    AuthError::new(
                        &registry.id,
                        format!("no credentials for {} in docker config", registry.host),
                    )
                })
            })
            .map(Some)
            .map_err(|e| AuthError::new(&registry.id, e.reason)),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Docker config.json の構造
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfig {
    /// 認証情報 (レジストリ -> AuthEntry)
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    /// credential helper 名 (例: "osxkeychain", "desktop")
    #[serde(default)]
    creds_store: Option<String>,
    /// レジストリ別の credential helper
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

/// 認証エントリ
#[derive(Debug, Deserialize)]
struct AuthEntry {
    /// Base64エンコードされた "username:password"
    auth: Option<String>,
}

/// credential helper からのレスポンス
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

/// ~/.docker/config.json から認証情報を読む
#[derive(Debug, Clone)]
pub struct DockerConfigStore {
    config_path: PathBuf,
}

impl Default for DockerConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerConfigStore {
    /// デフォルトで ~/.docker/config.json (DOCKER_CONFIG があればその下) を使用
    pub fn new() -> Self {
        let config_path = std::env::var("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".docker"))
                    .unwrap_or_else(|| PathBuf::from(".docker"))
            })
            .join("config.json");

        Self { config_path }
    }

    /// 指定したパスの config.json を使用
    pub fn with_config_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// ホストの認証情報を取得
    ///
    /// * `Ok(Some(credentials))` - 認証情報が見つかった場合
    /// * `Ok(None)` - 見つからない場合
    /// * `Err(e)` - config.json の読み込みや helper の実行に失敗した場合
    pub fn credentials_for(&self, host: &str) -> Result<Option<Credentials>, AuthError> {
        if !self.config_path.exists() {
            tracing::debug!("Docker config.json not found at {:?}", self.config_path);
            return Ok(None);
        }

        let config = self.load_docker_config(host)?;
        let keys = Self::lookup_keys(host);

        // 1. auths セクションを確認
        for key in &keys {
            if let Some(auth_entry) = config.auths.get(key)
                && let Some(auth_b64) = &auth_entry.auth
                && let Some(creds) = self.decode_auth(auth_b64, host)?
            {
                tracing::debug!("Found credentials in auths for {}", host);
                return Ok(Some(creds));
            }
        }

        // 2. credential helper を確認（レジストリ別 > 全体）
        let helper = keys
            .iter()
            .find_map(|key| config.cred_helpers.get(key))
            .or(config.creds_store.as_ref());
        if let Some(helper) = helper {
            tracing::debug!("Trying credential helper: {}", helper);
            for key in &keys {
                if let Some(creds) = self.get_from_helper(helper, key)? {
                    return Ok(Some(creds));
                }
            }
        }

        tracing::debug!("No credentials found for {}", host);
        Ok(None)
    }

    fn lookup_keys(host: &str) -> Vec<String> {
        if DOCKER_HUB_KEYS.contains(&host) {
            DOCKER_HUB_KEYS.iter().map(|k| k.to_string()).collect()
        } else {
            vec![host.to_string(), format!("https://{}", host)]
        }
    }

    /// Docker config.json を読み込み
    fn load_docker_config(&self, host: &str) -> Result<DockerConfig, AuthError> {
        let content = std::fs::read_to_string(&self.config_path).map_err(|e| {
            AuthError::new(host, format!("Failed to read config.json: {}", e))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| AuthError::new(host, format!("Failed to parse config.json: {}", e)))
    }

    /// Base64エンコードされた認証情報をデコード
    fn decode_auth(&self, auth_b64: &str, host: &str) -> Result<Option<Credentials>, AuthError> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(auth_b64)
            .map_err(|e| AuthError::new(host, format!("Failed to decode auth: {}", e)))?;

        let auth_str = String::from_utf8(decoded)
            .map_err(|e| AuthError::new(host, format!("Invalid UTF-8 in auth: {}", e)))?;

        Ok(auth_str
            .split_once(':')
            .map(|(username, password)| Credentials::new(username, password)))
    }

    /// credential helper から認証情報を取得
    fn get_from_helper(&self, helper: &str, key: &str) -> Result<Option<Credentials>, AuthError> {
        let helper_cmd = format!("docker-credential-{}", helper);

        let mut child = Command::new(&helper_cmd)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AuthError::new(key, format!("Failed to run {}: {}", helper_cmd, e)))?;

        // レジストリ名を stdin に渡す
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(key.as_bytes()).ok();
        }

        let output = child
            .wait_with_output()
            .map_err(|e| AuthError::new(key, format!("Credential helper failed: {}", e)))?;

        if !output.status.success() {
            // credential helper が認証情報を持っていない場合は None を返す
            tracing::debug!(
                "Credential helper returned error for {}: {}",
                key,
                String::from_utf8_lossy(&output.stderr)
            );
            return Ok(None);
        }

        let response: CredentialResponse = serde_json::from_slice(&output.stdout).map_err(|e| {
            AuthError::new(
                key,
                format!("Failed to parse credential helper response: {}", e),
            )
        })?;

        Ok(Some(Credentials::new(response.username, response.secret)))
    }
}

type SessionOutcome = Result<Arc<dyn RegistrySession>, AuthError>;

/// レジストリから認証情報を引く関数（ブロッキング可）
type CredentialResolver = dyn Fn(&Registry) -> Result<Option<Credentials>, AuthError> + Send + Sync;

/// レジストリごとの認証セッションを管理
///
/// ハンドシェイクはレジストリごとに最大1回。同時に要求された場合も
/// 1回だけ実行され、他の要求者はその結果（失敗を含む）を共有する。
pub struct RegistryAuthManager {
    client: Arc<dyn RegistryClient>,
    resolver: Arc<CredentialResolver>,
    sessions: Mutex<HashMap<String, Arc<OnceCell<SessionOutcome>>>>,
}

impl RegistryAuthManager {
    pub fn new(client: Arc<dyn RegistryClient>) -> Self {
        Self {
            client,
            resolver: Arc::new(resolve_credentials),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// 認証情報の解決方法を差し替える
    pub fn with_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Registry) -> Result<Option<Credentials>, AuthError> + Send + Sync + 'static,
    {
        self.resolver = Arc::new(resolver);
        self
    }

    /// レジストリのセッションを取得（未認証なら認証する）
    pub async fn session_for(&self, registry: &Registry) -> SessionOutcome {
        let cell = {
            let mut sessions = self
                .sessions
                .lock()
                .map_err(|_| AuthError::new(&registry.id, "session cache is poisoned"))?;
            sessions.entry(registry.id.clone()).or_default().clone()
        };

        cell.get_or_init(|| async {
            tracing::info!("Authenticating with {} ({})", registry.id, registry.host);
            let credentials = self.credentials(registry).await?;
            let result = self.client.authenticate(registry, credentials).await;
            match &result {
                Ok(_) => tracing::info!("Authenticated with {}", registry.id),
                Err(e) => tracing::warn!("{}", e),
            }
            result
        })
        .await
        .clone()
    }

    /// config.json の読み込みと credential helper の実行はブロッキングスレッドで行う
    async fn credentials(&self, registry: &Registry) -> Result<Option<Credentials>, AuthError> {
        let resolver = self.resolver.clone();
        let owned = registry.clone();
        tokio::task::spawn_blocking(move || resolver(&owned))
            .await
            .map_err(|e| AuthError::new(&registry.id, format!("credential lookup failed: {}", e)))?
    }
}
