mod commands;
mod summary;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "imageflow")]
#[command(about = "一度のビルドで、すべてのアーキテクチャとレジストリへ。", long_about = None)]
struct Cli {
    /// 詳細なログを表示
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// イメージをビルド（--push でレジストリへ公開）
    Build(BuildArgs),
    /// マニフェストを検証
    Validate {
        /// マニフェストファイル (images.kdl)
        #[arg(short, long, env = "IMAGEFLOW_MANIFEST")]
        manifest: Option<PathBuf>,
        /// プッシュモードとして検証（レジストリ定義が必須になる）
        #[arg(long)]
        push: bool,
    },
    /// バージョン情報を表示
    Version,
}

#[derive(clap::Args, Debug, Default)]
pub struct BuildArgs {
    /// ビルド後に全レジストリへプッシュ
    #[arg(long)]
    pub push: bool,

    /// マニフェストファイル (images.kdl)
    #[arg(short, long, env = "IMAGEFLOW_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// 同時に実行するビルド数（ターゲット × アーキテクチャ単位）
    #[arg(short = 'j', long, env = "IMAGEFLOW_PARALLEL")]
    pub parallel: Option<usize>,

    /// 同時に実行するプッシュ数
    #[arg(long)]
    pub push_parallel: Option<usize>,

    /// プッシュの最大試行回数（初回を含む）
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// キャッシュを使わずにビルド
    #[arg(long)]
    pub no_cache: bool,

    /// 成果物とログの出力先
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// ビルドするターゲット（複数指定可、省略時は全ターゲット）
    #[arg(short, long = "target")]
    pub targets: Vec<String>,

    /// docker CLI のパス
    #[arg(long, env = "IMAGEFLOW_DOCKER")]
    pub docker: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout はレポート用なので、ログは stderr に出す
    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .init();

    let code = match cli.command {
        Commands::Version => {
            println!("imageflow {}", env!("CARGO_PKG_VERSION"));
            0
        }
        Commands::Validate { manifest, push } => {
            commands::validate::handle(manifest.as_deref(), push)?
        }
        Commands::Build(args) => commands::build::handle(args).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
