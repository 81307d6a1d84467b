pub mod image_analyzer;
pub mod label_scanner;
pub mod latex;
pub mod pdf_parser;
pub mod table_parser;

pub use image_analyzer::ImageAnalyzer;
pub use label_scanner::LabelScanner;
pub use pdf_parser::{DocumentLayout, PdfParser};
pub use table_parser::TableParser;

use serde::{Deserialize, Serialize};

use crate::mapping::BoundingBox;
use crate::utils::ExtractionIssue;

/// 页面上的一张图片实例。同一图片出现在多页时每页各一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// 1-based page number.
    pub page: u32,
    /// 1-based index among the images saved for this page.
    pub index: u32,
    pub bbox: BoundingBox,
    pub file_reference: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

/// 表格单元格。bbox 由表格 bbox 均匀切分得到，并非真实渲染的单元格几何
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub page: u32,
    pub table_index: u32,
    pub row: usize,
    pub col: usize,
    pub bbox: BoundingBox,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub page: u32,
    /// 1-based index among the tables detected on this page.
    pub table_index: u32,
    pub bbox: BoundingBox,
    pub rows: usize,
    pub cols: usize,
    /// Row-major.
    pub cells: Vec<CellRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_reference: Option<String>,
}

impl TableRecord {
    pub fn cell(&self, row: usize, col: usize) -> Option<&CellRecord> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.cells.get(row * self.cols + col)
    }

    pub fn row_texts(&self, row: usize) -> Vec<&str> {
        (0..self.cols)
            .filter_map(|col| self.cell(row, col))
            .map(|c| c.text.as_str())
            .collect()
    }

    pub fn grid(&self) -> Vec<Vec<String>> {
        (0..self.rows)
            .map(|r| self.row_texts(r).into_iter().map(str::to_string).collect())
            .collect()
    }
}

/// 页面中匹配到的题号行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionLabel {
    pub page: u32,
    /// 完整的匹配行文本，如 "Question 3" 或 "12. Find x"
    pub label: String,
    /// Top edge of the line.
    pub y: f64,
    pub bbox: BoundingBox,
}

/// assets/extraction_results.json 的内容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageIndex {
    pub pdf_path: String,
    pub total_images: usize,
    pub images: Vec<ImageRecord>,
    #[serde(default)]
    pub issues: Vec<ExtractionIssue>,
}
