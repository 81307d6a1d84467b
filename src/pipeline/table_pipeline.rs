use lopdf::Document;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, CellStrategy, MappingConfig};
use crate::mapping::{
    all_cells, CellAssignment, CellMappingReport, IdAllocator, ImageCellMapping, SpatialMapper, WeightedCellMapper,
    YAxisCellMapper, YAxisCellMapping,
};
use crate::output::{Asset, McqOption, OutputManager, Question, QuestionType};
use crate::parser::{CellRecord, DocumentLayout, ImageAnalyzer, ImageRecord, TableParser, TableRecord};
use crate::utils::QxResult;
use crate::vision::{VisionResult, VisionService};

/// 按配置策略得到的单元格映射
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CellMappings {
    Weighted(Vec<ImageCellMapping>),
    YAxis(Vec<YAxisCellMapping>),
}

impl CellMappings {
    pub fn strategy(&self) -> &'static str {
        match self {
            CellMappings::Weighted(_) => "weighted",
            CellMappings::YAxis(_) => "y_axis",
        }
    }

    pub fn assignments(&self) -> Vec<&dyn CellAssignment> {
        match self {
            CellMappings::Weighted(m) => m.iter().map(|x| x as &dyn CellAssignment).collect(),
            CellMappings::YAxis(m) => m.iter().map(|x| x as &dyn CellAssignment).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CellMappings::Weighted(m) => m.len(),
            CellMappings::YAxis(m) => m.len(),
        }
    }

    pub fn report(&self, pdf_path: &str, total_images: usize, total_tables: usize) -> CellMappingReport {
        match self {
            CellMappings::Weighted(m) => CellMappingReport::build(pdf_path, self.strategy(), total_images, total_tables, m),
            CellMappings::YAxis(m) => CellMappingReport::build(pdf_path, self.strategy(), total_images, total_tables, m),
        }
    }
}

/// 图片 -> 单元格
pub fn map_cells(strategy: CellStrategy, mapping: &MappingConfig, images: &[ImageRecord], cells: &[CellRecord]) -> CellMappings {
    match strategy {
        CellStrategy::Weighted => CellMappings::Weighted(WeightedCellMapper::new(mapping.clone()).map_all(images, cells)),
        CellStrategy::YAxis => CellMappings::YAxis(YAxisCellMapper::new().map_all(images, cells)),
    }
}

/// 表格中的一行题目：题号 | 题干 | 答案
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableQuestion {
    pub page: u32,
    pub table_index: u32,
    pub row: usize,
    pub question_num: String,
    pub question_text: String,
    pub answer: String,
    pub mcq_options: Vec<McqOption>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TableSummary {
    pub total_table_questions: usize,
    pub total_images: usize,
    pub total_mappings: usize,
    pub total_vision_analyses: usize,
}

/// `{stem}_extraction_results.json` 的内容
#[derive(Debug, Clone, Serialize)]
pub struct TableExtraction {
    pub pdf_path: String,
    pub table_questions: Vec<TableQuestion>,
    pub image_mappings: CellMappings,
    pub vision_analysis: BTreeMap<String, VisionResult>,
    pub summary: TableSummary,
    #[serde(skip)]
    pub processing_errors: Vec<String>,
}

/// 表格为主的文档：每个表格行是一道题，图片经单元格映射挂到所在行
pub struct TablePipeline<'a> {
    config: &'a AppConfig,
    option_re: Regex,
}

impl<'a> TablePipeline<'a> {
    pub fn new(config: &'a AppConfig) -> Self {
        Self {
            config,
            option_re: Regex::new(r"(?i)\(([a-e])\)").unwrap(),
        }
    }

    /// 同步部分：表格、图片与单元格映射
    pub fn extract(
        &self,
        doc: &Document,
        layout: &DocumentLayout,
        mut tables: Vec<TableRecord>,
        output: &OutputManager,
        pdf_path: &str,
    ) -> QxResult<TableExtraction> {
        let mut errors: Vec<String> = Vec::new();

        let parser = TableParser::new();
        for table in &mut tables {
            if let Err(e) = parser.save(table, output.assets_dir()) {
                errors.push(format!("第 {} 页表格 {} 保存失败: {}", table.page, table.table_index, e));
            }
        }

        let table_questions: Vec<TableQuestion> = tables.iter().flat_map(|t| self.table_questions(t)).collect();
        info!("表格题目 {} 道", table_questions.len());

        let index = ImageAnalyzer::new(self.config.extraction.min_image_side).extract(doc, layout, output.assets_dir(), pdf_path)?;
        output.write_json(&output.image_index_path(), &index)?;
        errors.extend(index.issues.iter().map(|i| i.to_string()));

        let image_mappings = map_cells(
            self.config.extraction.cell_strategy,
            &self.config.mapping,
            &index.images,
            &all_cells(&tables),
        );
        info!(
            "{} 张图片，{} 条单元格映射 ({})",
            index.images.len(),
            image_mappings.len(),
            image_mappings.strategy()
        );

        Ok(TableExtraction {
            pdf_path: pdf_path.to_string(),
            summary: TableSummary {
                total_table_questions: table_questions.len(),
                total_images: index.images.len(),
                total_mappings: image_mappings.len(),
                total_vision_analyses: 0,
            },
            table_questions,
            image_mappings,
            vision_analysis: BTreeMap::new(),
            processing_errors: errors,
        })
    }

    /// 3 列且首列为纯数字的行
    fn table_questions(&self, table: &TableRecord) -> Vec<TableQuestion> {
        (0..table.rows)
            .filter_map(|row| {
                let texts = table.row_texts(row);
                if texts.len() != 3 {
                    return None;
                }
                let number = texts[0].trim();
                if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                let question_text = texts[1].trim().to_string();
                Some(TableQuestion {
                    page: table.page,
                    table_index: table.table_index,
                    row,
                    question_num: number.to_string(),
                    mcq_options: self.inline_options(&question_text),
                    question_text,
                    answer: texts[2].trim().to_string(),
                })
            })
            .collect()
    }

    /// 行内选项 "(a) 3 (b) 4 ..."
    fn inline_options(&self, text: &str) -> Vec<McqOption> {
        let markers: Vec<(usize, usize, String)> = self
            .option_re
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some((whole.start(), whole.end(), caps[1].to_uppercase()))
            })
            .collect();

        markers
            .iter()
            .enumerate()
            .filter_map(|(i, (_, end, letter))| {
                let stop = markers.get(i + 1).map(|m| m.0).unwrap_or(text.len());
                let option = text[*end..stop].trim();
                (!option.is_empty()).then(|| McqOption::new(letter.as_str(), option))
            })
            .collect()
    }

    /// 对映射到单元格的图片做视觉分析；未配置 LLM 时跳过
    pub async fn analyze(&self, vision: Option<&VisionService>, extraction: &mut TableExtraction) {
        let Some(vision) = vision.filter(|v| v.is_configured()) else {
            warn!("LLM 未配置，跳过图片视觉分析");
            return;
        };

        let paths: Vec<String> = extraction
            .image_mappings
            .assignments()
            .iter()
            .map(|m| m.image().file_reference.clone())
            .collect();

        for path in paths {
            if extraction.vision_analysis.contains_key(&path) {
                continue;
            }
            if !Path::new(&path).exists() {
                warn!("图片文件不存在: {}", path);
                continue;
            }
            match vision.analyze_image(Path::new(&path)).await {
                Ok(result) => {
                    extraction.vision_analysis.insert(path, result);
                }
                Err(e) => {
                    warn!("视觉分析失败 {}: {}", path, e);
                    extraction.processing_errors.push(format!("视觉分析失败 {}: {}", path, e));
                }
            }
        }
        extraction.summary.total_vision_analyses = extraction.vision_analysis.len();
        info!("完成 {} 张图片的视觉分析", extraction.vision_analysis.len());
    }

    /// 合并表格题目、图片映射与视觉结果
    pub fn assemble(&self, extraction: &TableExtraction) -> Vec<Question> {
        let assignments = extraction.image_mappings.assignments();
        let mut ids = IdAllocator::new();

        extraction
            .table_questions
            .iter()
            .map(|tq| {
                let id = ids.allocate(&format!("page{}_question{}", tq.page, tq.question_num));
                let mut question = Question::new(id, tq.question_num.as_str(), tq.page);
                question.question_text = tq.question_text.clone();
                question.mcq_options = tq.mcq_options.clone();
                if !tq.answer.is_empty() {
                    question.answer = Some(tq.answer.clone());
                }

                let row_mappings = assignments.iter().filter(|m| {
                    let cell = m.cell();
                    cell.page == tq.page && cell.table_index == tq.table_index && cell.row == tq.row
                });
                for mapping in row_mappings {
                    let image = mapping.image();
                    question.assets.push(Asset {
                        asset_type: "image".to_string(),
                        asset_path: image.file_reference.clone(),
                        asset_description: Some(format!("Image mapped to question {}", tq.question_num)),
                        bbox: Some(image.bbox),
                        page_number: image.page,
                    });

                    if let Some(vision) = extraction.vision_analysis.get(&image.file_reference) {
                        merge_vision(&mut question, vision);
                    }
                }

                question.question_type = if question.mcq_options.is_empty() {
                    QuestionType::Evaluate
                } else {
                    QuestionType::Mcq
                };
                question.refresh_flags();
                debug!("表格题目 {}: {} 张图片", question.question_id, question.assets.len());
                question
            })
            .collect()
    }
}

/// 视觉结果只补充缺失的题干和未出现过的选项字母
fn merge_vision(question: &mut Question, vision: &VisionResult) {
    if question.question_text.is_empty() {
        if let Some(text) = &vision.question_text {
            question.question_text = text.clone();
        }
    }
    for option in &vision.mcq_options {
        if !question.has_option(&option.option_letter) {
            question.mcq_options.push(option.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::BoundingBox;
    use crate::parser::table_parser::uniform_cells;

    fn table(rows: &[[&str; 3]]) -> TableRecord {
        let bbox = BoundingBox::new(0.0, 0.0, 300.0, 100.0 * rows.len() as f64);
        let texts: Vec<Vec<String>> = rows.iter().map(|r| r.iter().map(|s| s.to_string()).collect()).collect();
        TableRecord {
            page: 2,
            table_index: 1,
            bbox,
            rows: rows.len(),
            cols: 3,
            cells: uniform_cells(2, 1, &bbox, &texts),
            file_reference: None,
        }
    }

    fn image(bbox: BoundingBox) -> ImageRecord {
        ImageRecord {
            page: 2,
            index: 1,
            bbox,
            file_reference: "assets/page2_img1.png".into(),
            width: 50,
            height: 50,
            format: "png".into(),
        }
    }

    fn extraction(table: &TableRecord, images: &[ImageRecord], strategy: CellStrategy) -> TableExtraction {
        let config = AppConfig::default();
        let pipeline = TablePipeline::new(&config);
        let table_questions = pipeline.table_questions(table);
        let image_mappings = map_cells(strategy, &config.mapping, images, &all_cells(std::slice::from_ref(table)));
        TableExtraction {
            pdf_path: "sheet.pdf".into(),
            summary: TableSummary::default(),
            table_questions,
            image_mappings,
            vision_analysis: BTreeMap::new(),
            processing_errors: Vec::new(),
        }
    }

    #[test]
    fn only_numbered_three_column_rows_are_questions() {
        let config = AppConfig::default();
        let t = table(&[["No.", "Question", "Answer"], ["1", "Which is even? (a) 3 (B) 4 (c) 5", "b"], ["2", "Sum 2+2", ""]]);
        let questions = TablePipeline::new(&config).table_questions(&t);

        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].row, 1);
        assert_eq!(
            questions[0].mcq_options,
            vec![McqOption::new("A", "3"), McqOption::new("B", "4"), McqOption::new("C", "5")]
        );
        assert_eq!(questions[1].question_num, "2");
        assert!(questions[1].mcq_options.is_empty());
    }

    #[test]
    fn images_join_questions_by_table_row() {
        let t = table(&[["1", "Name the shape", "triangle"], ["2", "Count the sides", "4"]]);
        // Sits inside the second row's first cell.
        let img = image(BoundingBox::new(10.0, 120.0, 60.0, 170.0));

        for strategy in [CellStrategy::Weighted, CellStrategy::YAxis] {
            let ext = extraction(&t, std::slice::from_ref(&img), strategy);
            let config = AppConfig::default();
            let questions = TablePipeline::new(&config).assemble(&ext);

            assert_eq!(questions[0].question_id, "page2_question1");
            assert!(questions[0].assets.is_empty());
            assert_eq!(questions[1].assets.len(), 1);
            assert_eq!(questions[1].assets[0].asset_description.as_deref(), Some("Image mapped to question 2"));
            assert_eq!(questions[1].answer.as_deref(), Some("4"));
            assert_eq!(questions[1].question_type, QuestionType::Evaluate);
        }
    }

    #[test]
    fn vision_fills_missing_text_and_new_letters() {
        let t = table(&[["3", "", ""]]);
        let img = image(BoundingBox::new(10.0, 10.0, 60.0, 60.0));
        let mut ext = extraction(&t, std::slice::from_ref(&img), CellStrategy::Weighted);
        ext.table_questions[0].mcq_options = vec![McqOption::new("A", "from table")];
        ext.vision_analysis.insert(
            img.file_reference.clone(),
            VisionResult {
                question_text: Some("What is shown?".into()),
                mcq_options: vec![McqOption::new("A", "from vision"), McqOption::new("B", "circle")],
                ..Default::default()
            },
        );

        let config = AppConfig::default();
        let questions = TablePipeline::new(&config).assemble(&ext);
        let q = &questions[0];
        assert_eq!(q.question_text, "What is shown?");
        assert_eq!(q.mcq_options, vec![McqOption::new("A", "from table"), McqOption::new("B", "circle")]);
        assert!(q.mcq_flag);
        assert_eq!(q.question_type, QuestionType::Mcq);
        assert_eq!(q.answer, None);
    }

    #[test]
    fn duplicate_numbers_get_suffixed_ids() {
        let t = table(&[["1", "a", ""], ["1", "b", ""]]);
        let ext = extraction(&t, &[], CellStrategy::Weighted);
        let config = AppConfig::default();
        let ids: Vec<String> = TablePipeline::new(&config).assemble(&ext).into_iter().map(|q| q.question_id).collect();
        assert_eq!(ids, vec!["page2_question1", "page2_question1_1"]);
    }

    #[tokio::test]
    async fn vision_is_skipped_when_unconfigured() {
        let t = table(&[["1", "x", ""]]);
        let img = image(BoundingBox::new(10.0, 10.0, 60.0, 60.0));
        let mut ext = extraction(&t, std::slice::from_ref(&img), CellStrategy::Weighted);

        let config = AppConfig::default();
        let service = VisionService::new(config.llm.clone()).unwrap();
        TablePipeline::new(&config).analyze(Some(&service), &mut ext).await;
        assert!(ext.vision_analysis.is_empty());
        assert!(ext.processing_errors.is_empty());
    }
}
