//! コンテンツアドレス (`sha256:<hex>`)

use crate::error::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

const SHA256_PREFIX: &str = "sha256:";

/// `sha256:<64 hex>` 形式のダイジェスト
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// バイト列の SHA-256 ダイジェストを計算
    pub fn sha256(bytes: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(bytes))
    }

    /// 計算途中の hasher から確定する
    pub fn from_hasher(hasher: Sha256) -> Self {
        Self(format!("{}{:x}", SHA256_PREFIX, hasher.finalize()))
    }

    pub fn parse(value: &str) -> Result<Self> {
        let hex = value
            .strip_prefix(SHA256_PREFIX)
            .ok_or_else(|| CatalogError::InvalidDigest(value.to_string()))?;

        if hex.len() != 64 || !hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(CatalogError::InvalidDigest(value.to_string()));
        }

        Ok(Self(value.to_string()))
    }

    /// プレフィックスを除いた16進部分
    pub fn hex(&self) -> &str {
        &self.0[SHA256_PREFIX.len()..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}
