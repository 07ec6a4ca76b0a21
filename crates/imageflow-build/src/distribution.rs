//! OCI Distribution API クライアント
//!
//! `/v2/` のチャレンジで認証方式（なし / Basic / Bearer）を判定し、
//! blob のアップロード、アーキテクチャ別 manifest、index とタグの PUT を行う。

use crate::artifact::{ArchImage, Artifact};
use crate::auth::Credentials;
use crate::cancel::CancelToken;
use crate::client::{RegistryClient, RegistrySession};
use crate::error::{AuthError, PushError, PushErrorClass};
use crate::oci::{ImageManifest, MANIFEST_ACCEPT, MEDIA_TYPE_OCI_INDEX, OciLayout};
use async_trait::async_trait;
use imageflow_core::{Digest, Registry};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// `WWW-Authenticate` ヘッダーのチャレンジ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    pub params: HashMap<String, String>,
}

/// `Bearer realm="...",service="...",scope="repository:a/b:pull,push"` を解析
///
/// 値はクォート内にカンマを含むことがある。
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = match header.split_once(' ') {
        Some((scheme, rest)) => (scheme, rest),
        None => (header, ""),
    };
    if scheme.is_empty() {
        return None;
    }

    let mut params = HashMap::new();
    let mut chars = rest.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
        }

        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    Some(Challenge {
        scheme: scheme.to_ascii_lowercase(),
        params,
    })
}

/// ステータスコードを失敗分類に変換
pub fn classify_status(status: StatusCode, context: &str) -> PushError {
    let message = format!("{}: HTTP {}", context, status);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PushError::auth(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => PushError::transient(message),
        s if s.is_server_error() => PushError::transient(message),
        _ => PushError::rejected(message),
    }
}

fn token_scope(repository: &str) -> String {
    format!("repository:{}:pull,push", repository)
}

fn transport_error(e: reqwest::Error) -> PushError {
    PushError::transient(format!("request failed: {}", e))
}

#[derive(Debug, Clone)]
enum AuthScheme {
    None,
    Basic,
    Bearer {
        realm: String,
        service: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// reqwest による RegistryClient
#[derive(Debug, Clone)]
pub struct OciRegistryClient {
    http: reqwest::Client,
}

impl OciRegistryClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("imageflow/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl RegistryClient for OciRegistryClient {
    #[tracing::instrument(skip(self, registry, credentials), fields(registry = %registry.id))]
    async fn authenticate(
        &self,
        registry: &Registry,
        credentials: Option<Credentials>,
    ) -> Result<Arc<dyn RegistrySession>, AuthError> {
        let base = registry.api_base();
        let fail = |reason: String| AuthError::new(&registry.id, reason);

        let response = self
            .http
            .get(format!("{}/v2/", base))
            .send()
            .await
            .map_err(|e| fail(format!("cannot reach {}: {}", base, e)))?;

        let scheme = match response.status() {
            s if s.is_success() => AuthScheme::None,
            StatusCode::UNAUTHORIZED => {
                let header = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| fail("401 without WWW-Authenticate challenge".to_string()))?;
                let challenge = parse_challenge(header)
                    .ok_or_else(|| fail(format!("unparseable challenge: {}", header)))?;
                match challenge.scheme.as_str() {
                    "basic" => AuthScheme::Basic,
                    "bearer" => AuthScheme::Bearer {
                        realm: challenge
                            .params
                            .get("realm")
                            .cloned()
                            .ok_or_else(|| fail("Bearer challenge without realm".to_string()))?,
                        service: challenge.params.get("service").cloned(),
                    },
                    other => return Err(fail(format!("unsupported auth scheme '{}'", other))),
                }
            }
            other => return Err(fail(format!("unexpected HTTP {} from {}/v2/", other, base))),
        };

        tracing::debug!("Auth scheme for {}: {:?}", registry.id, scheme);

        let session = OciSession {
            registry_id: registry.id.clone(),
            base,
            http: self.http.clone(),
            credentials,
            scheme,
            tokens: Mutex::new(HashMap::new()),
        };
        session.verify().await.map_err(fail)?;
        Ok(Arc::new(session))
    }
}

/// 認証済みセッション
///
/// Bearer の場合、トークンはリポジトリスコープごとにキャッシュする。
pub struct OciSession {
    registry_id: String,
    base: String,
    http: reqwest::Client,
    credentials: Option<Credentials>,
    scheme: AuthScheme,
    tokens: Mutex<HashMap<String, String>>,
}

impl OciSession {
    /// 認証情報が受け入れられるかを確認
    async fn verify(&self) -> Result<(), String> {
        match (&self.scheme, &self.credentials) {
            (AuthScheme::None, _) => Ok(()),
            (AuthScheme::Basic, None) => Err("registry requires credentials".to_string()),
            (AuthScheme::Basic, Some(credentials)) => {
                let response = self
                    .http
                    .get(format!("{}/v2/", self.base))
                    .header(AUTHORIZATION, credentials.basic_auth())
                    .send()
                    .await
                    .map_err(|e| format!("credential check failed: {}", e))?;
                match response.status() {
                    s if s.is_success() => Ok(()),
                    s => Err(format!("credentials rejected (HTTP {})", s)),
                }
            }
            // 匿名トークンはリポジトリごとに取得する
            (AuthScheme::Bearer { .. }, None) => Ok(()),
            (AuthScheme::Bearer { .. }, Some(_)) => self
                .fetch_token(None)
                .await
                .map(|_| ())
                .map_err(|e| match e.class {
                    PushErrorClass::Auth => {
                        format!("credentials rejected: {}", e.message)
                    }
                    _ => format!("token endpoint unavailable: {}", e.message),
                }),
        }
    }

    async fn fetch_token(&self, scope: Option<&str>) -> Result<String, PushError> {
        let AuthScheme::Bearer { realm, service } = &self.scheme else {
            return Err(PushError::rejected("registry does not use bearer tokens"));
        };

        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(service) = service {
            query.push(("service", service.as_str()));
        }
        if let Some(scope) = scope {
            query.push(("scope", scope));
        }

        let mut request = self.http.get(realm).query(&query);
        if let Some(credentials) = &self.credentials {
            request = request.header(AUTHORIZATION, credentials.basic_auth());
        }

        let response = request.send().await.map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), "token request"));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| PushError::transient(format!("malformed token response: {}", e)))?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| PushError::auth("token response without token"))
    }

    async fn bearer_token(&self, repository: &str) -> Result<String, PushError> {
        let scope = token_scope(repository);
        let mut tokens = self.tokens.lock().await;
        if let Some(token) = tokens.get(&scope) {
            return Ok(token.clone());
        }
        let token = self.fetch_token(Some(&scope)).await?;
        tokens.insert(scope, token.clone());
        Ok(token)
    }

    /// 拒否されたトークンをキャッシュから外す
    ///
    /// 他のリクエストが既に取り直していれば新しいトークンは残す。
    async fn invalidate_token(&self, repository: &str, rejected: &str) {
        let scope = token_scope(repository);
        let mut tokens = self.tokens.lock().await;
        if tokens.get(&scope).is_some_and(|token| token == rejected) {
            tokens.remove(&scope);
        }
    }

    async fn authorize(
        &self,
        request: RequestBuilder,
        repository: &str,
    ) -> Result<(RequestBuilder, Option<String>), PushError> {
        Ok(match &self.scheme {
            AuthScheme::None => (request, None),
            AuthScheme::Basic => match &self.credentials {
                Some(credentials) => (request.header(AUTHORIZATION, credentials.basic_auth()), None),
                None => (request, None),
            },
            AuthScheme::Bearer { .. } => {
                let token = self.bearer_token(repository).await?;
                (request.bearer_auth(&token), Some(token))
            }
        })
    }

    /// 認証ヘッダーを付けて送信する
    ///
    /// Bearer トークンが 401 で拒否された場合は、取り直して一度だけ再送する。
    async fn send(&self, request: RequestBuilder, repository: &str) -> Result<Response, PushError> {
        let retry = request.try_clone();
        let (request, token) = self.authorize(request, repository).await?;
        let response = request.send().await.map_err(transport_error)?;

        let (Some(rejected), Some(retry)) = (token, retry) else {
            return Ok(response);
        };
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::debug!("Bearer token for {} was rejected, fetching a new one", repository);
        self.invalidate_token(repository, &rejected).await;
        let (retry, _) = self.authorize(retry, repository).await?;
        retry.send().await.map_err(transport_error)
    }

    fn url(&self, repository: &str, path: &str) -> String {
        format!("{}/v2/{}/{}", self.base, repository, path)
    }

    fn resolve_location(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else if location.starts_with('/') {
            format!("{}{}", self.base, location)
        } else {
            format!("{}/{}", self.base, location)
        }
    }

    async fn exists(&self, repository: &str, path: &str, context: &str) -> Result<bool, PushError> {
        let request = self
            .http
            .head(self.url(repository, path))
            .header(ACCEPT, MANIFEST_ACCEPT);
        let response = self.send(request, repository).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(classify_status(s, context)),
        }
    }

    async fn upload_blob(&self, repository: &str, digest: &Digest, data: Vec<u8>) -> Result<(), PushError> {
        let response = self
            .send(self.http.post(self.url(repository, "blobs/uploads/")), repository)
            .await?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), "start blob upload"));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| PushError::rejected("blob upload started without Location"))?;
        let upload_url = self.resolve_location(location);
        let separator = if upload_url.contains('?') { '&' } else { '?' };
        let url = format!("{}{}digest={}", upload_url, separator, digest);

        let request = self
            .http
            .put(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data);
        let response = self.send(request, repository).await?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), "upload blob"));
        }
        Ok(())
    }

    async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        media_type: &str,
        body: Vec<u8>,
    ) -> Result<Option<Digest>, PushError> {
        let request = self
            .http
            .put(self.url(repository, &format!("manifests/{}", reference)))
            .header(CONTENT_TYPE, media_type)
            .body(body);
        let response = self.send(request, repository).await?;
        if !response.status().is_success() {
            return Err(classify_status(
                response.status(),
                &format!("put manifest {}", reference),
            ));
        }

        Ok(response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Digest::parse(v).ok()))
    }

    async fn push_image(
        &self,
        repository: &str,
        image: &ArchImage,
        cancel: &CancelToken,
    ) -> Result<(), PushError> {
        let layout = OciLayout::open(&image.layout);
        let manifest_bytes = layout
            .read_blob(&image.manifest.digest)
            .await
            .map_err(|e| PushError::rejected(e.to_string()))?;
        let manifest: ImageManifest = serde_json::from_slice(&manifest_bytes).map_err(|e| {
            PushError::rejected(format!("malformed manifest {}: {}", image.manifest.digest, e))
        })?;

        for blob in manifest.blobs() {
            if cancel.is_cancelled() {
                return Err(PushError::cancelled());
            }

            if self
                .exists(repository, &format!("blobs/{}", blob.digest), "check blob")
                .await?
            {
                tracing::debug!("Blob {} already exists in {}", blob.digest, repository);
                continue;
            }

            let data = layout
                .read_blob(&blob.digest)
                .await
                .map_err(|e| PushError::rejected(e.to_string()))?;
            if Digest::sha256(&data) != blob.digest {
                return Err(PushError::rejected(format!(
                    "blob {} does not match its digest",
                    blob.digest
                )));
            }
            self.upload_blob(repository, &blob.digest, data).await?;
        }

        self.put_manifest(
            repository,
            image.manifest.digest.as_str(),
            &image.manifest.media_type,
            manifest_bytes,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RegistrySession for OciSession {
    async fn has_digest(&self, repository: &str, digest: &Digest) -> Result<bool, PushError> {
        self.exists(repository, &format!("manifests/{}", digest), "check manifest")
            .await
    }

    #[tracing::instrument(skip(self, artifact, cancel), fields(registry = %self.registry_id))]
    async fn push(
        &self,
        repository: &str,
        artifact: &Artifact,
        cancel: &CancelToken,
    ) -> Result<Digest, PushError> {
        for image in &artifact.images {
            self.push_image(repository, image, cancel).await?;
        }

        if cancel.is_cancelled() {
            return Err(PushError::cancelled());
        }

        self.tag(repository, artifact).await
    }

    #[tracing::instrument(skip(self, artifact), fields(registry = %self.registry_id))]
    async fn tag(&self, repository: &str, artifact: &Artifact) -> Result<Digest, PushError> {
        let mut remote = None;
        for tag in &artifact.tags {
            let digest = self
                .put_manifest(repository, tag, MEDIA_TYPE_OCI_INDEX, artifact.index.clone())
                .await?;
            tracing::info!("Pushed {}:{}", repository, tag);
            remote = digest.or(remote);
        }

        Ok(remote.unwrap_or_else(|| artifact.index_digest.clone()))
    }
}
