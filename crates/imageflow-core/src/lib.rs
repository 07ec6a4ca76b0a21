//! imageflow core
//!
//! イメージマニフェスト (images.kdl) のデータモデル、KDLパーサー、
//! ターゲット自動発見、カタログの読み込みと検証を提供します。

pub mod catalog;
pub mod discovery;
pub mod error;
pub mod model;
pub mod parser;

pub use catalog::{load, validate};
pub use error::{CatalogError, Result};
pub use model::*;
pub use parser::{ParsedManifest, parse_manifest_str};
