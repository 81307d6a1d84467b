pub mod cell_mapper;
pub mod geometry;
pub mod question_mapper;
pub mod reconcile;
pub mod y_axis_mapper;

pub use cell_mapper::{CellAssignment, CellMappingReport, ImageCellMapping, WeightedCellMapper};
pub use geometry::BoundingBox;
pub use question_mapper::{
    ImageQuestionMapper, ImageQuestionMapping, QuestionMappingSet, TableQuestionMapper, TableQuestionMapping,
};
pub use reconcile::{ContainmentMatcher, IdAllocator};
pub use y_axis_mapper::{YAxisCellMapper, YAxisCellMapping};

use crate::parser::{CellRecord, ImageRecord, QuestionLabel, TableRecord};

/// 位于某一页上的对象
pub trait OnPage {
    fn page(&self) -> u32;
}

impl OnPage for ImageRecord {
    fn page(&self) -> u32 {
        self.page
    }
}

impl OnPage for CellRecord {
    fn page(&self) -> u32 {
        self.page
    }
}

impl OnPage for TableRecord {
    fn page(&self) -> u32 {
        self.page
    }
}

impl OnPage for QuestionLabel {
    fn page(&self) -> u32 {
        self.page
    }
}

/// 空间映射策略：在同一页内把目标对象关联到候选对象。
///
/// Each implementation keeps its own admission and tie-break rules; the
/// shared part is only the per-page grouping done by [`SpatialMapper::map_all`].
pub trait SpatialMapper {
    type Target: OnPage;
    type Candidate: OnPage;
    type Mapping;

    fn name(&self) -> &'static str;

    /// 映射单页。`targets` 与 `candidates` 均已限定为 `page` 上的对象，保持提取顺序
    fn match_page(
        &self,
        targets: &[&Self::Target],
        candidates: &[&Self::Candidate],
        page: u32,
    ) -> Vec<Self::Mapping>;

    /// 按目标出现顺序逐页映射
    fn map_all(&self, targets: &[Self::Target], candidates: &[Self::Candidate]) -> Vec<Self::Mapping> {
        let mut pages: Vec<u32> = Vec::new();
        for target in targets {
            if !pages.contains(&target.page()) {
                pages.push(target.page());
            }
        }

        let mut mappings = Vec::new();
        for page in pages {
            let page_targets: Vec<&Self::Target> = targets.iter().filter(|t| t.page() == page).collect();
            let page_candidates: Vec<&Self::Candidate> =
                candidates.iter().filter(|c| c.page() == page).collect();
            tracing::debug!(
                "{}: 第 {} 页，{} 个目标，{} 个候选",
                self.name(),
                page,
                page_targets.len(),
                page_candidates.len()
            );
            mappings.extend(self.match_page(&page_targets, &page_candidates, page));
        }
        mappings
    }
}

/// 从表格列表中取出全部单元格，保持表格与行列顺序
pub fn all_cells(tables: &[TableRecord]) -> Vec<CellRecord> {
    tables.iter().flat_map(|t| t.cells.iter().cloned()).collect()
}
