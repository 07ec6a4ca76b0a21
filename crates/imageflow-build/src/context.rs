use crate::error::BuildResult;
use imageflow_core::Digest;
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};

/// ビルド入力（コンテキスト + Dockerfile + ビルド引数 + ステージ）
#[derive(Debug, Clone)]
pub struct ContextInput<'a> {
    pub context: &'a Path,
    pub dockerfile: &'a Path,
    pub build_args: &'a BTreeMap<String, String>,
    pub stage: Option<&'a str>,
    /// ダイジェスト計算から除外するパス（出力ディレクトリなど）
    pub exclude: &'a [PathBuf],
}

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルド入力の正規化tarストリームから context digest を計算
    ///
    /// エントリはパス順に並べ、mtime/uid/gid を 0 に固定するので、
    /// 同じ内容なら作成時刻や配置場所に関係なく同じダイジェストになる。
    pub fn context_digest(input: &ContextInput<'_>) -> BuildResult<Digest> {
        tracing::debug!(
            "Computing context digest for: {}",
            input.context.display()
        );

        let mut tar = Builder::new(HashWriter::default());
        tar.follow_symlinks(false);

        // 表記の違う同じパス（相対/絶対、`..` を含むなど）を同一視する
        let root = fs::canonicalize(input.context)?;
        let exclude: Vec<PathBuf> = input
            .exclude
            .iter()
            .filter_map(|e| fs::canonicalize(e).ok())
            .collect();

        let mut entries = Vec::new();
        collect_entries(&root, &root, &exclude, &mut entries)?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (relative, path) in &entries {
            append_entry(&mut tar, relative, path)?;
        }

        // Dockerfile はコンテキスト外にあることもあるので常に追加
        let dockerfile = fs::read(input.dockerfile)?;
        append_bytes(&mut tar, Path::new(".imageflow-build/Dockerfile"), &dockerfile)?;

        let mut params = String::new();
        for (key, value) in input.build_args {
            params.push_str(&format!("build-arg {}={}\n", key, value));
        }
        if let Some(stage) = input.stage {
            params.push_str(&format!("stage {}\n", stage));
        }
        append_bytes(
            &mut tar,
            Path::new(".imageflow-build/params"),
            params.as_bytes(),
        )?;

        let writer = tar.into_inner()?;
        Self::check_context_size(writer.bytes);

        let digest = Digest::from_hasher(writer.hasher);
        tracing::debug!("Context digest: {} ({} bytes)", digest, writer.bytes);
        Ok(digest)
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: u64) {
        const MAX_CONTEXT_SIZE: u64 = 500 * 1024 * 1024; // 500MB

        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
                 .dockerignoreファイルで不要なファイルを除外することを推奨します。",
                size / 1024 / 1024
            );
        }
    }
}

#[derive(Default)]
struct HashWriter {
    hasher: Sha256,
    bytes: u64,
}

impl Write for HashWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.bytes += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn collect_entries(
    root: &Path,
    dir: &Path,
    exclude: &[PathBuf],
    out: &mut Vec<(PathBuf, PathBuf)>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if exclude.iter().any(|e| path.starts_with(e)) || path.ends_with(".git") {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let file_type = fs::symlink_metadata(&path)?.file_type();
        out.push((relative, path.clone()));

        if file_type.is_dir() {
            collect_entries(root, &path, exclude, out)?;
        }
    }
    Ok(())
}

fn canonical_header(entry_type: EntryType, size: u64, mode: u32) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn append_entry<W: Write>(tar: &mut Builder<W>, relative: &Path, path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    let file_type = metadata.file_type();

    if file_type.is_symlink() {
        let link = fs::read_link(path)?;
        let mut header = canonical_header(EntryType::Symlink, 0, 0o777);
        tar.append_link(&mut header, relative, link)
    } else if file_type.is_dir() {
        let mut header = canonical_header(EntryType::Directory, 0, 0o755);
        tar.append_data(&mut header, relative, io::empty())
    } else {
        let mode = if is_executable(&metadata) { 0o755 } else { 0o644 };
        let mut header = canonical_header(EntryType::Regular, metadata.len(), mode);
        tar.append_data(&mut header, relative, File::open(path)?)
    }
}

fn append_bytes<W: Write>(tar: &mut Builder<W>, path: &Path, data: &[u8]) -> io::Result<()> {
    let mut header = canonical_header(EntryType::Regular, data.len() as u64, 0o644);
    tar.append_data(&mut header, path, data)
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}
