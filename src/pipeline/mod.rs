pub mod segmenter;
pub mod table_pipeline;
pub mod text_pipeline;

pub use table_pipeline::{map_cells, TablePipeline};
pub use text_pipeline::TextPipeline;

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::output::{DocumentMetadata, DominanceType, ExtractionStats, OutputManager, OutputState, Question};
use crate::parser::{DocumentLayout, PdfParser, TableParser, TableRecord};
use crate::utils::{QxError, QxResult};
use crate::vision::VisionService;

/// 含表格页面占比超过阈值即为表格为主；没有页面时无法判断
pub fn detect_dominance(total_pages: usize, tables: &[TableRecord], ratio: f64) -> DominanceType {
    if total_pages == 0 {
        return DominanceType::Unknown;
    }
    let mut table_pages: Vec<u32> = tables.iter().map(|t| t.page).collect();
    table_pages.sort_unstable();
    table_pages.dedup();

    if table_pages.len() as f64 / total_pages as f64 > ratio {
        DominanceType::TableDominant
    } else {
        DominanceType::TextDominant
    }
}

/// 单个PDF的处理结果
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub pdf_path: String,
    pub dominance_type: DominanceType,
    pub output_json_path: PathBuf,
    pub assets_dir: PathBuf,
    pub total_questions: usize,
}

/// 解析阶段在阻塞线程中完成的部分
enum Parsed {
    Text(text_pipeline::TextExtraction),
    Table(table_pipeline::TableExtraction),
}

/// 判断文档类型并分派到对应流水线
pub struct Orchestrator {
    config: Arc<AppConfig>,
    vision: Option<VisionService>,
}

impl Orchestrator {
    pub fn new(config: AppConfig) -> QxResult<Self> {
        let vision = if config.llm.is_configured() {
            Some(VisionService::new(config.llm.clone())?)
        } else {
            warn!("LLM 未配置，表格流水线将跳过视觉分析。请设置 LITELLM_API_KEY 或 llm.api_key");
            None
        };
        Ok(Self {
            config: Arc::new(config),
            vision,
        })
    }

    pub async fn process_pdf(&self, pdf_path: &Path) -> QxResult<ProcessSummary> {
        if !pdf_path.exists() {
            return Err(QxError::Pdf(format!("PDF文件不存在: {}", pdf_path.display())));
        }
        let started = Instant::now();
        info!("开始处理: {}", pdf_path.display());

        let config = Arc::clone(&self.config);
        let path = pdf_path.to_path_buf();
        let (parsed, total_pages, dominance, output) =
            tokio::task::spawn_blocking(move || parse_and_route(&config, &path))
                .await
                .map_err(|e| QxError::Pdf(format!("解析任务异常退出: {}", e)))??;

        let (questions, errors, method, suffix) = match parsed {
            Parsed::Text(text) => (text.questions, text.processing_errors, "TextPipeline", "text_extraction"),
            Parsed::Table(mut table) => {
                let pipeline = TablePipeline::new(&self.config);
                pipeline.analyze(self.vision.as_ref(), &mut table).await;
                output.write_json(&output.document_json("extraction_results"), &table)?;
                let questions = pipeline.assemble(&table);
                (questions, table.processing_errors, "TablePipeline", "merged_state")
            }
        };

        let state = build_state(pdf_path, total_pages, dominance, method, questions, errors, started);
        let output_json_path = output.document_json(suffix);
        output.write_json(&output_json_path, &state)?;

        info!(
            "处理完成: {} ({:?}, {} 道题, {:.1}s)",
            pdf_path.display(),
            dominance,
            state.questions.len(),
            state.document_metadata.processing_time_seconds
        );
        Ok(ProcessSummary {
            pdf_path: pdf_path.display().to_string(),
            dominance_type: dominance,
            output_json_path,
            assets_dir: output.assets_dir().to_path_buf(),
            total_questions: state.questions.len(),
        })
    }
}

/// 解析PDF、检测表格并运行对应流水线的同步部分
fn parse_and_route(config: &AppConfig, pdf_path: &Path) -> QxResult<(Parsed, usize, DominanceType, OutputManager)> {
    let (doc, layout) = PdfParser::new().load(pdf_path)?;
    let tables = detect_tables(&layout);
    let total_pages = layout.page_count();
    let dominance = detect_dominance(total_pages, &tables, config.extraction.dominance_ratio);
    info!("文档类型: {:?} ({} 页, {} 个表格)", dominance, total_pages, tables.len());

    let output = OutputManager::new(&config.extraction.output_dir, pdf_path);
    output.create_dirs()?;
    let path_str = pdf_path.display().to_string();

    let parsed = match dominance {
        DominanceType::TableDominant => {
            Parsed::Table(TablePipeline::new(config).extract(&doc, &layout, tables, &output, &path_str)?)
        }
        DominanceType::TextDominant | DominanceType::Unknown => {
            Parsed::Text(TextPipeline::new(config).run(&doc, &layout, tables, &output, &path_str)?)
        }
    };
    Ok((parsed, total_pages, dominance, output))
}

pub fn detect_tables(layout: &DocumentLayout) -> Vec<TableRecord> {
    let parser = TableParser::new();
    layout.pages.iter().flat_map(|page| parser.extract(page)).collect()
}

fn build_state(
    pdf_path: &Path,
    total_pages: usize,
    dominance: DominanceType,
    method: &str,
    questions: Vec<Question>,
    errors: Vec<String>,
    started: Instant,
) -> OutputState {
    let extraction_stats = ExtractionStats::from_questions(&questions, errors);
    OutputState {
        document_metadata: DocumentMetadata {
            pdf_name: pdf_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            pdf_path: pdf_path.display().to_string(),
            total_pages,
            processing_timestamp: chrono::Local::now().to_rfc3339(),
            processing_time_seconds: started.elapsed().as_secs_f64(),
            dominance_type: dominance,
            extraction_method: method.to_string(),
        },
        questions,
        extraction_stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::BoundingBox;

    fn table_on(page: u32, index: u32) -> TableRecord {
        TableRecord {
            page,
            table_index: index,
            bbox: BoundingBox::new(0.0, 0.0, 100.0, 100.0),
            rows: 1,
            cols: 1,
            cells: Vec::new(),
            file_reference: None,
        }
    }

    #[test]
    fn dominance_counts_pages_not_tables() {
        // Three tables but only one page out of three has any.
        let tables = vec![table_on(1, 1), table_on(1, 2), table_on(1, 3)];
        assert_eq!(detect_dominance(3, &tables, 0.5), DominanceType::TextDominant);

        let tables = vec![table_on(1, 1), table_on(2, 1)];
        assert_eq!(detect_dominance(3, &tables, 0.5), DominanceType::TableDominant);
    }

    #[test]
    fn exactly_half_is_text_dominant() {
        let tables = vec![table_on(1, 1)];
        assert_eq!(detect_dominance(2, &tables, 0.5), DominanceType::TextDominant);
    }

    #[test]
    fn no_pages_is_unknown() {
        assert_eq!(detect_dominance(0, &[], 0.5), DominanceType::Unknown);
    }

    #[test]
    fn state_metadata_reflects_the_run() {
        let mut q = Question::new("page1_question1".into(), "1.", 1);
        q.mcq_options.push(crate::output::McqOption::new("A", "x"));
        let state = build_state(
            Path::new("/data/quiz.pdf"),
            4,
            DominanceType::TextDominant,
            "TextPipeline",
            vec![q],
            vec!["missing index".into()],
            Instant::now(),
        );
        assert_eq!(state.document_metadata.pdf_name, "quiz.pdf");
        assert_eq!(state.document_metadata.total_pages, 4);
        assert_eq!(state.extraction_stats.mcq_count, 1);
        assert_eq!(state.extraction_stats.processing_errors, vec!["missing index".to_string()]);
    }

    #[tokio::test]
    async fn missing_pdf_is_reported() {
        let orchestrator = Orchestrator::new(AppConfig::default()).unwrap();
        let err = orchestrator.process_pdf(Path::new("/nonexistent/exam.pdf")).await.unwrap_err();
        assert!(matches!(err, QxError::Pdf(_)));
    }
}
