mod config;
mod mapping;
mod output;
mod parser;
mod pipeline;
mod utils;
mod vision;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{AppConfig, CellStrategy, DEFAULT_CONFIG_PATH};
use crate::output::OutputManager;
use crate::parser::{ImageAnalyzer, PdfParser};
use crate::pipeline::Orchestrator;
use crate::utils::logger;
use crate::utils::pool::WorkerPool;
use crate::utils::QxError;

#[derive(Parser)]
#[command(name = "qextract")]
#[command(about = "试卷PDF题目提取与图表关联工具", long_about = None)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 生成默认配置并创建输出目录
    Init,
    /// 提取一个或多个PDF中的题目
    Extract {
        #[arg(required = true)]
        pdfs: Vec<PathBuf>,
    },
    /// 只运行图片到表格单元格的映射
    MapCells {
        pdf: PathBuf,
        #[arg(short, long, value_enum)]
        strategy: Option<StrategyArg>,
    },
    /// 删除输出目录
    Clean,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Weighted,
    YAxis,
}

impl From<StrategyArg> for CellStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Weighted => CellStrategy::Weighted,
            StrategyArg::YAxis => CellStrategy::YAxis,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing config file falls back to defaults, so init can run first.
    let app_config = AppConfig::load_from(&cli.config)?;
    logger::init_logger(&app_config.logging.level);
    info!("qextract 启动");

    match cli.command {
        Commands::Init => init_command(&cli.config).await?,
        Commands::Extract { pdfs } => extract_command(app_config, pdfs).await?,
        Commands::MapCells { pdf, strategy } => map_cells_command(app_config, pdf, strategy).await?,
        Commands::Clean => clean_command(&app_config)?,
    }

    Ok(())
}

async fn init_command(config_path: &Path) -> Result<()> {
    info!("初始化配置...");

    let app_config = AppConfig::default();
    if config_path.exists() {
        info!("配置文件已存在，保留: {}", config_path.display());
    } else {
        app_config.save(config_path)?;
        info!("已生成配置文件: {}", config_path.display());
    }

    tokio::fs::create_dir_all(&app_config.extraction.output_dir).await?;
    info!("输出目录: {}", app_config.extraction.output_dir);

    info!("✅ 初始化完成！");
    info!("下一步:");
    info!("  1. 编辑 {} 配置视觉模型 (或设置 LITELLM_API_KEY)", config_path.display());
    info!("  2. 运行 'qextract extract <PDF>' 开始提取");
    Ok(())
}

async fn extract_command(app_config: AppConfig, pdfs: Vec<PathBuf>) -> Result<()> {
    let timeout = Duration::from_secs(app_config.extraction.document_timeout_secs);
    let mut pool = WorkerPool::new(app_config.extraction.max_parallel_pdfs);
    let orchestrator = Arc::new(Orchestrator::new(app_config)?);

    info!("待处理PDF {} 个，最大并行 {}", pdfs.len(), pool.size());
    for pdf in pdfs {
        let orchestrator = Arc::clone(&orchestrator);
        pool.submit(async move {
            let result = match tokio::time::timeout(timeout, orchestrator.process_pdf(&pdf)).await {
                Ok(result) => result,
                Err(_) => Err(QxError::Timeout(format!("{} 超过 {}s", pdf.display(), timeout.as_secs()))),
            };
            (pdf, result)
        });
    }

    let mut failed = 0usize;
    for (pdf, result) in pool.shutdown().await {
        match result {
            Ok(summary) => info!(
                "✅ {} -> {} ({} 道题)",
                pdf.display(),
                summary.output_json_path.display(),
                summary.total_questions
            ),
            Err(e) => {
                error!("❌ {} 处理失败: {}", pdf.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} 个PDF处理失败", failed);
    }
    Ok(())
}

async fn map_cells_command(app_config: AppConfig, pdf: PathBuf, strategy: Option<StrategyArg>) -> Result<()> {
    let strategy = strategy.map(CellStrategy::from).unwrap_or(app_config.extraction.cell_strategy);
    info!("单元格映射: {} ({:?})", pdf.display(), strategy);

    let report = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        let (doc, layout) = PdfParser::new().load(&pdf)?;
        let tables = pipeline::detect_tables(&layout);
        if tables.is_empty() {
            warn!("未检测到表格，映射结果为空");
        }

        let output = OutputManager::new(&app_config.extraction.output_dir, &pdf);
        output.create_dirs()?;
        let path_str = pdf.display().to_string();

        let index = ImageAnalyzer::new(app_config.extraction.min_image_side).extract(&doc, &layout, output.assets_dir(), &path_str)?;
        output.write_json(&output.image_index_path(), &index)?;

        let mappings = pipeline::map_cells(strategy, &app_config.mapping, &index.images, &mapping::all_cells(&tables));
        let report = mappings.report(&path_str, index.images.len(), tables.len());
        let report_path = output.cell_mappings_path();
        output.write_json(&report_path, &report)?;
        Ok(report_path)
    })
    .await??;

    info!("✅ 映射结果已写入: {}", report.display());
    Ok(())
}

fn clean_command(app_config: &AppConfig) -> Result<()> {
    let dir = &app_config.extraction.output_dir;
    if output::clean_output(dir)? {
        info!("✅ 已删除输出目录: {}", dir);
    } else {
        info!("输出目录不存在，跳过: {}", dir);
    }
    Ok(())
}
