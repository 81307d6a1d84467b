use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{BoundingBox, OnPage, SpatialMapper};
use crate::config::MappingConfig;
use crate::parser::{ImageIndex, ImageRecord, QuestionLabel, TableRecord};
use crate::utils::{QxError, QxResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMethod {
    CoordinateBased,
    /// 目标位于页面所有题号之上，退回到页面最上方的题号
    CoordinateBasedFallback,
}

/// 题号定位结果
#[derive(Debug, Clone, PartialEq)]
struct Located<'a> {
    label: &'a QuestionLabel,
    distance: f64,
    confidence: ConfidenceTier,
    method: MappingMethod,
}

fn tier_for(distance: f64, config: &MappingConfig) -> ConfidenceTier {
    if distance < config.high_confidence_distance {
        ConfidenceTier::High
    } else if distance < config.medium_confidence_distance {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    }
}

/// 选择目标上方最近的题号（label.y < top 中 y 最大者）；没有时退回页面最上方的题号
fn locate<'a>(labels: &[&'a QuestionLabel], top: f64, config: &MappingConfig) -> Option<Located<'a>> {
    let mut above: Option<&QuestionLabel> = None;
    let mut topmost: Option<&QuestionLabel> = None;

    for &label in labels {
        if label.y < top && above.map_or(true, |a| label.y > a.y) {
            above = Some(label);
        }
        if topmost.map_or(true, |t| label.y < t.y) {
            topmost = Some(label);
        }
    }

    if let Some(label) = above {
        let distance = top - label.y;
        return Some(Located {
            label,
            distance,
            confidence: tier_for(distance, config),
            method: MappingMethod::CoordinateBased,
        });
    }

    topmost.map(|label| Located {
        label,
        distance: (top - label.y).abs(),
        confidence: ConfidenceTier::Low,
        method: MappingMethod::CoordinateBasedFallback,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageQuestionMapping {
    pub image: ImageRecord,
    pub question_label: String,
    pub label_y: f64,
    pub distance: f64,
    pub confidence: ConfidenceTier,
    pub method: MappingMethod,
}

impl OnPage for ImageQuestionMapping {
    fn page(&self) -> u32 {
        self.image.page
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableQuestionMapping {
    pub page: u32,
    pub table_index: u32,
    pub table_bbox: BoundingBox,
    pub rows: usize,
    pub cols: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_reference: Option<String>,
    pub question_label: String,
    pub label_y: f64,
    pub distance: f64,
    pub confidence: ConfidenceTier,
    pub method: MappingMethod,
}

impl OnPage for TableQuestionMapping {
    fn page(&self) -> u32 {
        self.page
    }
}

/// 图片 -> 题号
pub struct ImageQuestionMapper {
    config: MappingConfig,
}

impl ImageQuestionMapper {
    pub fn new(config: MappingConfig) -> Self {
        Self { config }
    }
}

impl SpatialMapper for ImageQuestionMapper {
    type Target = ImageRecord;
    type Candidate = QuestionLabel;
    type Mapping = ImageQuestionMapping;

    fn name(&self) -> &'static str {
        "image_question"
    }

    fn match_page(
        &self,
        targets: &[&ImageRecord],
        candidates: &[&QuestionLabel],
        page: u32,
    ) -> Vec<ImageQuestionMapping> {
        if candidates.is_empty() {
            warn!("第 {} 页没有题号，{} 张图片未映射", page, targets.len());
            return Vec::new();
        }

        targets
            .iter()
            .filter_map(|image| {
                let located = locate(candidates, image.bbox.y0, &self.config)?;
                if located.method == MappingMethod::CoordinateBasedFallback {
                    warn!(
                        "图片 {} 位于第 {} 页所有题号之上，退回到 '{}'",
                        image.file_reference, page, located.label.label
                    );
                } else {
                    info!(
                        "图片 {} -> '{}' (距离 {:.1}, {:?})",
                        image.file_reference, located.label.label, located.distance, located.confidence
                    );
                }
                Some(ImageQuestionMapping {
                    image: (*image).clone(),
                    question_label: located.label.label.clone(),
                    label_y: located.label.y,
                    distance: located.distance,
                    confidence: located.confidence,
                    method: located.method,
                })
            })
            .collect()
    }
}

/// 表格 -> 题号，候选集合与图片分开，规则相同
pub struct TableQuestionMapper {
    config: MappingConfig,
}

impl TableQuestionMapper {
    pub fn new(config: MappingConfig) -> Self {
        Self { config }
    }
}

impl SpatialMapper for TableQuestionMapper {
    type Target = TableRecord;
    type Candidate = QuestionLabel;
    type Mapping = TableQuestionMapping;

    fn name(&self) -> &'static str {
        "table_question"
    }

    fn match_page(
        &self,
        targets: &[&TableRecord],
        candidates: &[&QuestionLabel],
        page: u32,
    ) -> Vec<TableQuestionMapping> {
        let mut mappings = Vec::new();
        for table in targets {
            match locate(candidates, table.bbox.y0, &self.config) {
                Some(located) => {
                    debug!("第 {} 页表格 {} -> '{}'", page, table.table_index, located.label.label);
                    mappings.push(TableQuestionMapping {
                        page,
                        table_index: table.table_index,
                        table_bbox: table.bbox,
                        rows: table.rows,
                        cols: table.cols,
                        file_reference: table.file_reference.clone(),
                        question_label: located.label.label.clone(),
                        label_y: located.label.y,
                        distance: located.distance,
                        confidence: located.confidence,
                        method: located.method,
                    });
                }
                None => warn!("第 {} 页表格 {} 未找到题号", page, table.table_index),
            }
        }
        mappings
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMappingStats {
    pub images: usize,
    pub questions: usize,
    pub mappings: usize,
}

/// 写入 assets/image_question_mappings.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionMappingSet {
    pub pdf_path: String,
    pub mapping_method: String,
    pub total_images: usize,
    pub total_mappings: usize,
    pub mapping_success_rate: String,
    pub page_statistics: BTreeMap<u32, PageMappingStats>,
    pub mappings: Vec<ImageQuestionMapping>,
    pub table_mappings: Vec<TableQuestionMapping>,
}

impl QuestionMappingSet {
    pub fn build(
        pdf_path: &str,
        images: &[ImageRecord],
        labels: &[QuestionLabel],
        mappings: Vec<ImageQuestionMapping>,
        table_mappings: Vec<TableQuestionMapping>,
    ) -> Self {
        let mut page_statistics: BTreeMap<u32, PageMappingStats> = BTreeMap::new();
        for image in images {
            page_statistics.entry(image.page).or_default().images += 1;
        }
        for (page, stats) in page_statistics.iter_mut() {
            stats.questions = labels.iter().filter(|l| l.page == *page).count();
            stats.mappings = mappings.iter().filter(|m| m.image.page == *page).count();
        }

        let total_images = images.len();
        let total_mappings = mappings.len();
        let mapping_success_rate = if total_images > 0 {
            format!("{:.1}%", total_mappings as f64 / total_images as f64 * 100.0)
        } else {
            "0%".to_string()
        };

        info!(
            "题号映射完成: {}/{} 张图片 ({})",
            total_mappings, total_images, mapping_success_rate
        );

        Self {
            pdf_path: pdf_path.to_string(),
            mapping_method: "coordinate_based".to_string(),
            total_images,
            total_mappings,
            mapping_success_rate,
            page_statistics,
            mappings,
            table_mappings,
        }
    }
}

/// 读取图片提取阶段写出的索引文件；缺失或无法解析时返回 MissingInput
pub fn load_image_index(path: impl AsRef<Path>) -> QxResult<ImageIndex> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| QxError::MissingInput {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| QxError::MissingInput {
        path: path.to_path_buf(),
        reason: format!("JSON解析失败: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(page: u32, text: &str, y: f64) -> QuestionLabel {
        QuestionLabel {
            page,
            label: text.to_string(),
            y,
            bbox: BoundingBox::new(40.0, y, 300.0, y + 12.0),
        }
    }

    fn image(page: u32, index: u32, y0: f64) -> ImageRecord {
        ImageRecord {
            page,
            index,
            bbox: BoundingBox::new(50.0, y0, 250.0, y0 + 80.0),
            file_reference: format!("assets/page{}_img{}.png", page, index),
            width: 200,
            height: 80,
            format: "png".into(),
        }
    }

    fn labels() -> Vec<QuestionLabel> {
        vec![label(1, "1. First", 50.0), label(1, "2. Second", 150.0), label(1, "3. Third", 300.0)]
    }

    #[test]
    fn selects_closest_label_above() {
        let mapper = ImageQuestionMapper::new(MappingConfig::default());
        let mappings = mapper.map_all(&[image(1, 1, 200.0)], &labels());

        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].question_label, "2. Second");
        assert_eq!(mappings[0].distance, 50.0);
        assert_eq!(mappings[0].confidence, ConfidenceTier::High);
        assert_eq!(mappings[0].method, MappingMethod::CoordinateBased);
    }

    #[test]
    fn image_above_all_labels_falls_back_to_topmost() {
        let mapper = ImageQuestionMapper::new(MappingConfig::default());
        let labels = vec![label(1, "2. Second", 150.0), label(1, "1. First", 50.0)];
        let mappings = mapper.map_all(&[image(1, 1, 10.0)], &labels);

        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].question_label, "1. First");
        assert_eq!(mappings[0].method, MappingMethod::CoordinateBasedFallback);
        assert_eq!(mappings[0].confidence, ConfidenceTier::Low);
        assert_eq!(mappings[0].distance, 40.0);
    }

    #[test]
    fn distance_tiers_follow_configured_cutoffs() {
        let config = MappingConfig::default();
        assert_eq!(tier_for(199.9, &config), ConfidenceTier::High);
        assert_eq!(tier_for(200.0, &config), ConfidenceTier::Medium);
        assert_eq!(tier_for(399.0, &config), ConfidenceTier::Medium);
        assert_eq!(tier_for(400.0, &config), ConfidenceTier::Low);
    }

    #[test]
    fn labels_on_other_pages_are_not_used() {
        let mapper = ImageQuestionMapper::new(MappingConfig::default());
        let mappings = mapper.map_all(&[image(2, 1, 400.0)], &labels());
        assert!(mappings.is_empty());
    }

    #[test]
    fn tables_use_the_same_nearest_above_rule() {
        let table = TableRecord {
            page: 1,
            table_index: 1,
            bbox: BoundingBox::new(0.0, 320.0, 400.0, 500.0),
            rows: 0,
            cols: 0,
            cells: Vec::new(),
            file_reference: Some("assets/page1_table1.json".into()),
        };
        let mapper = TableQuestionMapper::new(MappingConfig::default());
        let mappings = mapper.map_all(&[table], &labels());
        assert_eq!(mappings[0].question_label, "3. Third");
        assert_eq!(mappings[0].confidence, ConfidenceTier::High);
    }

    #[test]
    fn mapping_set_reports_success_rate_per_page() {
        let images = vec![image(1, 1, 200.0), image(2, 1, 100.0)];
        let labels = labels();
        let mapper = ImageQuestionMapper::new(MappingConfig::default());
        let mappings = mapper.map_all(&images, &labels);
        let set = QuestionMappingSet::build("a.pdf", &images, &labels, mappings, Vec::new());

        assert_eq!(set.total_images, 2);
        assert_eq!(set.total_mappings, 1);
        assert_eq!(set.mapping_success_rate, "50.0%");
        assert_eq!(set.page_statistics[&1].questions, 3);
        assert_eq!(set.page_statistics[&2].mappings, 0);
    }

    #[test]
    fn missing_or_corrupt_index_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let absent = load_image_index(dir.path().join("extraction_results.json")).unwrap_err();
        assert!(absent.is_missing_input());

        let corrupt = dir.path().join("broken.json");
        std::fs::write(&corrupt, "{ not json").unwrap();
        assert!(load_image_index(&corrupt).unwrap_err().is_missing_input());
    }

    #[test]
    fn serializes_tier_and_method_tags() {
        let mapper = ImageQuestionMapper::new(MappingConfig::default());
        let mappings = mapper.map_all(&[image(1, 1, 10.0)], &labels());
        let json = serde_json::to_value(&mappings[0]).unwrap();
        assert_eq!(json["confidence"], "low");
        assert_eq!(json["method"], "coordinate_based_fallback");
    }
}
