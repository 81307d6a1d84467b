use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::SpatialMapper;
use crate::config::MappingConfig;
use crate::parser::{CellRecord, ImageRecord};

/// 图片与表格单元格的关联（两种单元格策略的公共视图）
pub trait CellAssignment {
    fn image(&self) -> &ImageRecord;
    fn cell(&self) -> &CellRecord;
    fn confidence(&self) -> Option<f64>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCellMapping {
    pub image: ImageRecord,
    pub cell: CellRecord,
    pub confidence_score: f64,
    pub overlap_area: f64,
    pub overlap_ratio: f64,
}

impl CellAssignment for ImageCellMapping {
    fn image(&self) -> &ImageRecord {
        &self.image
    }

    fn cell(&self) -> &CellRecord {
        &self.cell
    }

    fn confidence(&self) -> Option<f64> {
        Some(self.confidence_score)
    }
}

/// 重叠面积 + 中心距离加权的单元格映射
pub struct WeightedCellMapper {
    config: MappingConfig,
}

struct Scored<'a> {
    cell: &'a CellRecord,
    confidence: f64,
    overlap_area: f64,
    overlap_ratio: f64,
}

impl WeightedCellMapper {
    pub fn new(config: MappingConfig) -> Self {
        Self { config }
    }

    fn score<'a>(&self, image: &ImageRecord, cell: &'a CellRecord) -> Scored<'a> {
        let overlap_area = image.bbox.overlap_area(&cell.bbox);
        let overlap_ratio = image.bbox.overlap_ratio(&cell.bbox);
        let proximity = image.bbox.proximity_score(&cell.bbox, self.config.proximity_distance);
        let confidence = (self.config.overlap_weight * overlap_ratio
            + self.config.proximity_weight * proximity)
            .clamp(0.0, 1.0);
        Scored {
            cell,
            confidence,
            overlap_area,
            overlap_ratio,
        }
    }

    fn admits(&self, scored: &Scored<'_>) -> bool {
        scored.overlap_ratio >= self.config.overlap_threshold
            || scored.confidence >= self.config.confidence_floor
    }
}

impl SpatialMapper for WeightedCellMapper {
    type Target = ImageRecord;
    type Candidate = CellRecord;
    type Mapping = ImageCellMapping;

    fn name(&self) -> &'static str {
        "weighted_cell"
    }

    fn match_page(&self, targets: &[&ImageRecord], candidates: &[&CellRecord], page: u32) -> Vec<ImageCellMapping> {
        let mut mappings = Vec::new();

        for image in targets {
            let mut best: Option<Scored<'_>> = None;
            for cell in candidates {
                let scored = self.score(image, cell);
                if !self.admits(&scored) {
                    continue;
                }
                // Strictly greater: the first candidate seen keeps a tie.
                if best.as_ref().map_or(true, |b| scored.confidence > b.confidence) {
                    best = Some(scored);
                }
            }

            match best {
                Some(b) => {
                    info!(
                        "图片 {} 映射到第 {} 页表格 {} 单元格 ({}, {})，置信度 {:.3}",
                        image.file_reference, page, b.cell.table_index, b.cell.row, b.cell.col, b.confidence
                    );
                    mappings.push(ImageCellMapping {
                        image: (*image).clone(),
                        cell: b.cell.clone(),
                        confidence_score: b.confidence,
                        overlap_area: b.overlap_area,
                        overlap_ratio: b.overlap_ratio,
                    });
                }
                None => warn!("第 {} 页图片 {} 未找到匹配的单元格", page, image.file_reference),
            }
        }

        debug!("第 {} 页生成 {} 条单元格映射", page, mappings.len());
        mappings
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellMappingStatistics {
    pub avg_confidence: f64,
    pub high_confidence_count: usize,
    pub medium_confidence_count: usize,
    pub low_confidence_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellMappingSummary {
    pub table: u32,
    pub cell: String,
    pub confidence: Option<f64>,
    pub image_file: String,
}

/// 单元格映射报告，写入 image_table_mappings.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellMappingReport {
    pub pdf_path: String,
    pub strategy: String,
    pub total_images: usize,
    pub total_tables: usize,
    pub total_mappings: usize,
    pub statistics: CellMappingStatistics,
    pub mapping_summary: BTreeMap<u32, Vec<CellMappingSummary>>,
}

impl CellMappingReport {
    pub fn build<M: CellAssignment>(
        pdf_path: &str,
        strategy: &str,
        total_images: usize,
        total_tables: usize,
        mappings: &[M],
    ) -> Self {
        let mut statistics = CellMappingStatistics::default();
        let scores: Vec<f64> = mappings.iter().filter_map(|m| m.confidence()).collect();
        if !scores.is_empty() {
            statistics.avg_confidence = scores.iter().sum::<f64>() / scores.len() as f64;
        }
        for score in &scores {
            if *score >= 0.7 {
                statistics.high_confidence_count += 1;
            } else if *score >= 0.4 {
                statistics.medium_confidence_count += 1;
            } else {
                statistics.low_confidence_count += 1;
            }
        }

        let mut mapping_summary: BTreeMap<u32, Vec<CellMappingSummary>> = BTreeMap::new();
        for m in mappings {
            let image_file = std::path::Path::new(&m.image().file_reference)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            mapping_summary.entry(m.cell().page).or_default().push(CellMappingSummary {
                table: m.cell().table_index,
                cell: format!("({}, {})", m.cell().row, m.cell().col),
                confidence: m.confidence(),
                image_file,
            });
        }

        Self {
            pdf_path: pdf_path.to_string(),
            strategy: strategy.to_string(),
            total_images,
            total_tables,
            total_mappings: mappings.len(),
            statistics,
            mapping_summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::BoundingBox;
    use crate::parser::table_parser::uniform_cells;

    fn image(page: u32, index: u32, bbox: BoundingBox) -> ImageRecord {
        ImageRecord {
            page,
            index,
            bbox,
            file_reference: format!("assets/page{}_img{}.png", page, index),
            width: 100,
            height: 50,
            format: "png".into(),
        }
    }

    fn grid(page: u32, bbox: BoundingBox, rows: usize, cols: usize) -> Vec<CellRecord> {
        let texts = vec![vec![String::new(); cols]; rows];
        uniform_cells(page, 1, &bbox, &texts)
    }

    #[test]
    fn image_in_top_left_quadrant_maps_to_first_cell() {
        let cells = grid(1, BoundingBox::new(0.0, 0.0, 200.0, 100.0), 2, 2);
        let images = vec![image(1, 1, BoundingBox::new(0.0, 0.0, 100.0, 50.0))];

        let mapper = WeightedCellMapper::new(MappingConfig::default());
        let mappings = mapper.map_all(&images, &cells);

        assert_eq!(mappings.len(), 1);
        let m = &mappings[0];
        assert_eq!((m.cell.row, m.cell.col), (0, 0));
        assert_eq!(m.overlap_ratio, 1.0);
        let proximity = images[0].bbox.proximity_score(&m.cell.bbox, 600.0);
        assert!((m.confidence_score - (0.7 + 0.3 * proximity)).abs() < 1e-12);
        assert_eq!(m.overlap_area, 5000.0);
    }

    #[test]
    fn cells_on_other_pages_are_ignored() {
        let cells = grid(2, BoundingBox::new(0.0, 0.0, 200.0, 100.0), 1, 1);
        let images = vec![image(1, 1, BoundingBox::new(0.0, 0.0, 100.0, 50.0))];
        let mapper = WeightedCellMapper::new(MappingConfig::default());
        assert!(mapper.map_all(&images, &cells).is_empty());
    }

    #[test]
    fn far_away_image_is_not_admitted() {
        let cells = grid(1, BoundingBox::new(0.0, 0.0, 100.0, 100.0), 1, 1);
        let images = vec![image(1, 1, BoundingBox::new(500.0, 700.0, 540.0, 740.0))];
        let mapper = WeightedCellMapper::new(MappingConfig::default());
        assert!(mapper.map_all(&images, &cells).is_empty());
    }

    #[test]
    fn point_image_at_cell_centre_is_not_mapped() {
        let cells = grid(1, BoundingBox::new(0.0, 0.0, 200.0, 100.0), 2, 2);
        let images = vec![image(1, 1, BoundingBox::new(50.0, 25.0, 50.0, 25.0))];
        let mapper = WeightedCellMapper::new(MappingConfig::default());
        assert!(mapper.map_all(&images, &cells).is_empty());
    }

    #[test]
    fn equal_scores_keep_the_first_cell() {
        // The image straddles the boundary between two identical columns.
        let cells = grid(1, BoundingBox::new(0.0, 0.0, 200.0, 100.0), 1, 2);
        let images = vec![image(1, 1, BoundingBox::new(50.0, 0.0, 150.0, 100.0))];
        let mapper = WeightedCellMapper::new(MappingConfig::default());
        let mappings = mapper.map_all(&images, &cells);
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].cell.col, 0);
    }

    #[test]
    fn at_most_one_mapping_per_image_and_deterministic() {
        let cells = grid(1, BoundingBox::new(0.0, 0.0, 300.0, 300.0), 3, 3);
        let images = vec![
            image(1, 1, BoundingBox::new(10.0, 10.0, 90.0, 90.0)),
            image(1, 2, BoundingBox::new(90.0, 90.0, 210.0, 210.0)),
            image(1, 3, BoundingBox::new(250.0, 0.0, 300.0, 300.0)),
        ];
        let mapper = WeightedCellMapper::new(MappingConfig::default());
        let first = mapper.map_all(&images, &cells);
        let second = mapper.map_all(&images, &cells);

        assert_eq!(first, second);
        for img in &images {
            assert!(first.iter().filter(|m| m.image.index == img.index).count() <= 1);
        }
    }

    #[test]
    fn report_buckets_confidence() {
        let cells = grid(1, BoundingBox::new(0.0, 0.0, 200.0, 100.0), 2, 2);
        let images = vec![image(1, 1, BoundingBox::new(0.0, 0.0, 100.0, 50.0))];
        let mapper = WeightedCellMapper::new(MappingConfig::default());
        let mappings = mapper.map_all(&images, &cells);

        let report = CellMappingReport::build("a.pdf", mapper.name(), 1, 1, &mappings);
        assert_eq!(report.total_mappings, 1);
        assert_eq!(report.statistics.high_confidence_count, 1);
        assert_eq!(report.mapping_summary[&1][0].cell, "(0, 0)");
        assert_eq!(report.mapping_summary[&1][0].image_file, "page1_img1.png");
    }
}
