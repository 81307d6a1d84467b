use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::cell_mapper::CellAssignment;
use super::SpatialMapper;
use crate::parser::{CellRecord, ImageRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YAxisCellMapping {
    pub image: ImageRecord,
    pub cell: CellRecord,
    pub image_bottom_y: f64,
    pub cell_y_range: (f64, f64),
}

impl CellAssignment for YAxisCellMapping {
    fn image(&self) -> &ImageRecord {
        &self.image
    }

    fn cell(&self) -> &CellRecord {
        &self.cell
    }

    fn confidence(&self) -> Option<f64> {
        None
    }
}

/// 按图片底边 y 坐标落入单元格所在行的纵向区间 [y_start, y_end] 映射，首个命中者胜出
#[derive(Debug, Default)]
pub struct YAxisCellMapper;

impl YAxisCellMapper {
    pub fn new() -> Self {
        Self
    }
}

impl SpatialMapper for YAxisCellMapper {
    type Target = ImageRecord;
    type Candidate = CellRecord;
    type Mapping = YAxisCellMapping;

    fn name(&self) -> &'static str {
        "y_axis"
    }

    fn match_page(&self, targets: &[&ImageRecord], candidates: &[&CellRecord], page: u32) -> Vec<YAxisCellMapping> {
        let mut mappings = Vec::new();

        for image in targets {
            let bottom = image.bbox.y1;
            let hit = candidates
                .iter()
                .find(|cell| cell.bbox.y0 <= bottom && bottom <= cell.bbox.y1);

            match hit {
                Some(cell) => {
                    info!(
                        "图片 {} (底边 y={:.1}) 落入第 {} 页表格 {} 第 {} 行",
                        image.file_reference, bottom, page, cell.table_index, cell.row
                    );
                    mappings.push(YAxisCellMapping {
                        image: (*image).clone(),
                        cell: (*cell).clone(),
                        image_bottom_y: bottom,
                        cell_y_range: (cell.bbox.y0, cell.bbox.y1),
                    });
                }
                None => warn!(
                    "第 {} 页图片 {} (底边 y={:.1}) 未落入任何单元格",
                    page, image.file_reference, bottom
                ),
            }
        }

        mappings
    }
}
