use lopdf::Document;
use tracing::{info, warn};

use super::segmenter::Segmenter;
use crate::config::AppConfig;
use crate::mapping::question_mapper::load_image_index;
use crate::mapping::{ContainmentMatcher, ImageQuestionMapper, QuestionMappingSet, SpatialMapper, TableQuestionMapper};
use crate::output::{OutputManager, Question};
use crate::parser::{DocumentLayout, ImageAnalyzer, LabelScanner, TableParser, TableRecord};
use crate::utils::QxResult;

/// 文本流水线的结果，题目尚未包装为最终输出
#[derive(Debug, Clone)]
pub struct TextExtraction {
    pub questions: Vec<Question>,
    pub processing_errors: Vec<String>,
}

/// 文本为主的文档：按题号切分文本，再用坐标把图片与表格挂到题目上
pub struct TextPipeline<'a> {
    config: &'a AppConfig,
}

impl<'a> TextPipeline<'a> {
    pub fn new(config: &'a AppConfig) -> Self {
        Self { config }
    }

    pub fn run(
        &self,
        doc: &Document,
        layout: &DocumentLayout,
        mut tables: Vec<TableRecord>,
        output: &OutputManager,
        pdf_path: &str,
    ) -> QxResult<TextExtraction> {
        let mut errors: Vec<String> = Vec::new();

        let pages: Vec<String> = layout.pages.iter().map(|p| p.plain_text()).collect();
        let mut questions = Segmenter::new(&self.config.extraction.header_patterns)?.segment(&pages);

        // Image extraction writes the index consumed by the mapping pass below.
        // A leftover index from an earlier run in the same directory must not be linked.
        let index_path = output.image_index_path();
        if index_path.is_file() {
            std::fs::remove_file(&index_path)?;
        }
        let extracted = match ImageAnalyzer::new(self.config.extraction.min_image_side).extract(doc, layout, output.assets_dir(), pdf_path) {
            Ok(index) => {
                if let Err(e) = output.write_json(&index_path, &index) {
                    warn!("图片索引写入失败: {}", e);
                    errors.push(format!("图片索引写入失败: {}", e));
                }
                true
            }
            Err(e) => {
                warn!("图片提取失败: {}", e);
                errors.push(format!("图片提取失败: {}", e));
                false
            }
        };

        let parser = TableParser::new();
        for table in &mut tables {
            if let Err(e) = parser.save(table, output.assets_dir()) {
                errors.push(format!("第 {} 页表格 {} 保存失败: {}", table.page, table.table_index, e));
            }
        }

        let labels = LabelScanner::new().scan(&layout.pages);
        info!("坐标题号 {} 个", labels.len());

        let images = if extracted {
            match load_image_index(&index_path) {
                Ok(index) => {
                    errors.extend(index.issues.iter().map(|i| i.to_string()));
                    index.images
                }
                Err(e) if e.is_missing_input() => {
                    warn!("跳过图片关联: {}", e);
                    errors.push(e.to_string());
                    Vec::new()
                }
                Err(e) => return Err(e),
            }
        } else {
            Vec::new()
        };

        let image_mappings = ImageQuestionMapper::new(self.config.mapping.clone()).map_all(&images, &labels);
        let table_mappings = TableQuestionMapper::new(self.config.mapping.clone()).map_all(&tables, &labels);
        let set = QuestionMappingSet::build(pdf_path, &images, &labels, image_mappings, table_mappings);
        output.write_json(&output.question_mappings_path(), &set)?;

        let matcher = ContainmentMatcher::new(self.config.extraction.containment_policy);
        let linked_tables = matcher.attach(&mut questions, &set.table_mappings);
        let linked_images = matcher.attach(&mut questions, &set.mappings);
        info!(
            "文本流水线完成: {} 道题，关联 {} 张图片、{} 个表格",
            questions.len(),
            linked_images,
            linked_tables
        );

        Ok(TextExtraction {
            questions,
            processing_errors: errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::BoundingBox;
    use crate::parser::pdf_parser::{ImagePlacement, PageLayout, TextLine};
    use lopdf::{dictionary, Object, Stream};

    fn line(text: &str, y: f64) -> TextLine {
        TextLine {
            text: text.to_string(),
            bbox: BoundingBox::new(50.0, y, 400.0, y + 12.0),
            spans: Vec::new(),
        }
    }

    fn doc_with_image() -> (Document, lopdf::ObjectId) {
        let mut doc = Document::with_version("1.5");
        let id = doc.add_object(Object::Stream(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 16i64,
                "Height" => 16i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8i64,
            },
            vec![128u8; 256],
        )));
        (doc, id)
    }

    #[test]
    fn links_images_to_the_question_above() {
        let (doc, image_id) = doc_with_image();
        let mut page = PageLayout::empty(1, 612.0, 792.0);
        page.lines = vec![line("1. Find the area of the triangle", 100.0), line("2. Explain the diagram", 400.0)];
        page.images = vec![ImagePlacement {
            name: "Im0".into(),
            object_id: image_id,
            bbox: BoundingBox::new(100.0, 450.0, 300.0, 600.0),
        }];
        let layout = DocumentLayout { pages: vec![page] };

        let dir = tempfile::tempdir().unwrap();
        let output = OutputManager::new(dir.path(), "quiz.pdf");
        output.create_dirs().unwrap();
        let config = AppConfig::default();

        let result = TextPipeline::new(&config).run(&doc, &layout, Vec::new(), &output, "quiz.pdf").unwrap();

        assert_eq!(result.questions.len(), 2);
        assert!(result.questions[0].assets.is_empty());
        let assets = &result.questions[1].assets;
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].asset_type, "image");
        assert_eq!(assets[0].asset_description.as_deref(), Some("Image mapped to question 2."));
        assert!(output.question_mappings_path().exists());
        assert!(result.processing_errors.is_empty());
    }

    #[test]
    fn tables_attach_by_containment() {
        let doc = Document::with_version("1.5");
        let mut page = PageLayout::empty(1, 612.0, 792.0);
        page.lines = vec![line("Question 1", 80.0), line("Complete the table", 95.0)];
        let layout = DocumentLayout { pages: vec![page] };

        let bbox = BoundingBox::new(50.0, 150.0, 450.0, 250.0);
        let table = TableRecord {
            page: 1,
            table_index: 1,
            bbox,
            rows: 1,
            cols: 2,
            cells: crate::parser::table_parser::uniform_cells(1, 1, &bbox, &[vec!["x".into(), "y".into()]]),
            file_reference: None,
        };

        let dir = tempfile::tempdir().unwrap();
        let output = OutputManager::new(dir.path(), "tables.pdf");
        output.create_dirs().unwrap();
        let config = AppConfig::default();

        let result = TextPipeline::new(&config).run(&doc, &layout, vec![table], &output, "tables.pdf").unwrap();
        let assets = &result.questions[0].assets;
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].asset_type, "table");
        assert_eq!(assets[0].asset_description.as_deref(), Some("Table with 1 rows and 2 columns"));
        assert!(assets[0].asset_path.ends_with("page1_table1.json"));
    }

    #[test]
    fn unreadable_index_keeps_text_only_output() {
        let (doc, image_id) = doc_with_image();
        let mut page = PageLayout::empty(1, 612.0, 792.0);
        page.lines = vec![line("1. Find the area of the triangle", 100.0), line("2. Explain the diagram", 400.0)];
        page.images = vec![ImagePlacement {
            name: "Im0".into(),
            object_id: image_id,
            bbox: BoundingBox::new(100.0, 450.0, 300.0, 600.0),
        }];
        let layout = DocumentLayout { pages: vec![page] };

        let dir = tempfile::tempdir().unwrap();
        let output = OutputManager::new(dir.path(), "quiz.pdf");
        output.create_dirs().unwrap();
        // A directory where the index file should be cannot be written or parsed.
        std::fs::create_dir_all(output.image_index_path()).unwrap();
        let config = AppConfig::default();

        let result = TextPipeline::new(&config).run(&doc, &layout, Vec::new(), &output, "quiz.pdf").unwrap();

        assert_eq!(result.questions.len(), 2);
        assert_eq!(result.questions[1].question_text, "2. Explain the diagram");
        assert!(result.questions.iter().all(|q| q.assets.is_empty()));
        assert!(result.processing_errors.iter().any(|e| e.starts_with("缺少输入数据")));
    }

    #[test]
    fn stale_index_from_earlier_run_is_not_linked() {
        let doc = Document::with_version("1.5");
        let mut page = PageLayout::empty(1, 612.0, 792.0);
        page.lines = vec![line("1. Find x", 100.0)];
        let layout = DocumentLayout { pages: vec![page] };

        let dir = tempfile::tempdir().unwrap();
        let output = OutputManager::new(dir.path(), "quiz.pdf");
        output.create_dirs().unwrap();
        let stale = crate::parser::ImageIndex {
            pdf_path: "quiz.pdf".into(),
            total_images: 1,
            images: vec![crate::parser::ImageRecord {
                page: 1,
                index: 1,
                bbox: BoundingBox::new(100.0, 200.0, 200.0, 300.0),
                file_reference: "old/page1_img1.png".into(),
                width: 100,
                height: 100,
                format: "png".into(),
            }],
            issues: Vec::new(),
        };
        output.write_json(&output.image_index_path(), &stale).unwrap();
        let config = AppConfig::default();

        let result = TextPipeline::new(&config).run(&doc, &layout, Vec::new(), &output, "quiz.pdf").unwrap();

        assert!(result.questions[0].assets.is_empty());
        let index = load_image_index(output.image_index_path()).unwrap();
        assert_eq!(index.total_images, 0);
    }
}
