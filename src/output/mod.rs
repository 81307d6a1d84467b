use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::mapping::BoundingBox;
use crate::utils::QxResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Mcq,
    Evaluate,
    ShortAnswer,
    Misc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DominanceType {
    TableDominant,
    TextDominant,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McqOption {
    pub option_letter: String,
    pub option_text: String,
}

impl McqOption {
    pub fn new(letter: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            option_letter: letter.into(),
            option_text: text.into(),
        }
    }
}

/// 题目关联的图片或表格
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// "image" or "table".
    pub asset_type: String,
    pub asset_path: String,
    pub asset_description: Option<String>,
    pub bbox: Option<BoundingBox>,
    pub page_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subpart {
    pub subpart_number: String,
    pub subpart_text: String,
    pub subpart_latex: Option<String>,
    pub question_type: QuestionType,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub mcq_options: Vec<McqOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// `page{p}_question{n}`, unique within a document.
    pub question_id: String,
    /// Raw label as it appeared in the document, used for containment matching.
    pub question_number: String,
    pub question_text: String,
    pub question_latex: Option<String>,
    pub question_type: QuestionType,
    pub page_number: u32,
    pub subpart_flag: bool,
    pub mcq_flag: bool,
    pub subparts: Vec<Subpart>,
    pub mcq_options: Vec<McqOption>,
    pub assets: Vec<Asset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

impl Question {
    pub fn new(question_id: String, question_number: impl Into<String>, page_number: u32) -> Self {
        Self {
            question_id,
            question_number: question_number.into(),
            question_text: String::new(),
            question_latex: None,
            question_type: QuestionType::Misc,
            page_number,
            subpart_flag: false,
            mcq_flag: false,
            subparts: Vec::new(),
            mcq_options: Vec::new(),
            assets: Vec::new(),
            answer: None,
        }
    }

    /// 根据子题与选项重新计算标志位
    pub fn refresh_flags(&mut self) {
        self.subpart_flag = !self.subparts.is_empty();
        self.mcq_flag = !self.mcq_options.is_empty();
    }

    pub fn has_option(&self, letter: &str) -> bool {
        self.mcq_options
            .iter()
            .any(|o| o.option_letter.eq_ignore_ascii_case(letter))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub pdf_name: String,
    pub pdf_path: String,
    pub total_pages: usize,
    pub processing_timestamp: String,
    pub processing_time_seconds: f64,
    pub dominance_type: DominanceType,
    pub extraction_method: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_questions: usize,
    pub mcq_count: usize,
    pub subpart_count: usize,
    pub images_extracted: usize,
    pub tables_extracted: usize,
    pub processing_errors: Vec<String>,
}

impl ExtractionStats {
    pub fn from_questions(questions: &[Question], processing_errors: Vec<String>) -> Self {
        let count_assets = |kind: &str| {
            questions
                .iter()
                .map(|q| q.assets.iter().filter(|a| a.asset_type == kind).count())
                .sum()
        };
        Self {
            total_questions: questions.len(),
            mcq_count: questions.iter().filter(|q| !q.mcq_options.is_empty()).count(),
            subpart_count: questions.iter().map(|q| q.subparts.len()).sum(),
            images_extracted: count_assets("image"),
            tables_extracted: count_assets("table"),
            processing_errors,
        }
    }
}

/// 单个文档的最终输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputState {
    pub document_metadata: DocumentMetadata,
    pub questions: Vec<Question>,
    pub extraction_stats: ExtractionStats,
}

/// 管理单个PDF的输出目录: `<output_dir>/<stem>/` 与 `<output_dir>/<stem>/assets/`
#[derive(Debug, Clone)]
pub struct OutputManager {
    stem: String,
    doc_dir: PathBuf,
    assets_dir: PathBuf,
}

impl OutputManager {
    pub fn new(output_dir: impl AsRef<Path>, pdf_path: impl AsRef<Path>) -> Self {
        let stem = pdf_path
            .as_ref()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let doc_dir = output_dir.as_ref().join(&stem);
        let assets_dir = doc_dir.join("assets");
        Self {
            stem,
            doc_dir,
            assets_dir,
        }
    }

    pub fn create_dirs(&self) -> QxResult<()> {
        std::fs::create_dir_all(&self.assets_dir)?;
        info!("输出目录: {}", self.doc_dir.display());
        Ok(())
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    /// `<doc_dir>/<stem>_<suffix>.json`
    pub fn document_json(&self, suffix: &str) -> PathBuf {
        self.doc_dir.join(format!("{}_{}.json", self.stem, suffix))
    }

    pub fn asset_path(&self, file_name: &str) -> PathBuf {
        self.assets_dir.join(file_name)
    }

    pub fn image_index_path(&self) -> PathBuf {
        self.asset_path("extraction_results.json")
    }

    pub fn question_mappings_path(&self) -> PathBuf {
        self.asset_path("image_question_mappings.json")
    }

    pub fn cell_mappings_path(&self) -> PathBuf {
        self.doc_dir.join("image_table_mappings.json")
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> QxResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(value)?;
        std::fs::write(path, content)?;
        debug!("已写入 {}", path.display());
        Ok(())
    }
}

/// 删除整个输出目录
pub fn clean_output(output_dir: impl AsRef<Path>) -> QxResult<bool> {
    let dir = output_dir.as_ref();
    if !dir.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(dir)?;
    info!("已清理输出目录: {}", dir.display());
    Ok(true)
}
