use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::pdf_parser::{Orientation, PageLayout, Ruling};
use super::{CellRecord, TableRecord};
use crate::mapping::BoundingBox;
use crate::utils::QxResult;

const JOIN_TOLERANCE: f64 = 3.0;
const EDGE_MERGE: f64 = 3.0;

/// 均匀切分表格 bbox 得到单元格，行列数取自文本网格
pub fn uniform_cells(page: u32, table_index: u32, bbox: &BoundingBox, texts: &[Vec<String>]) -> Vec<CellRecord> {
    let rows = texts.len();
    let cols = texts.iter().map(|r| r.len()).max().unwrap_or(0);
    if rows == 0 || cols == 0 {
        return Vec::new();
    }

    // Last edge is pinned so cells tile the table exactly.
    let x_edge = |c: usize| if c == cols { bbox.x1 } else { bbox.x0 + bbox.width() * c as f64 / cols as f64 };
    let y_edge = |r: usize| if r == rows { bbox.y1 } else { bbox.y0 + bbox.height() * r as f64 / rows as f64 };

    let mut cells = Vec::with_capacity(rows * cols);
    for (row, row_texts) in texts.iter().enumerate() {
        for col in 0..cols {
            cells.push(CellRecord {
                page,
                table_index,
                row,
                col,
                bbox: BoundingBox::new(x_edge(col), y_edge(row), x_edge(col + 1), y_edge(row + 1)),
                text: row_texts.get(col).cloned().unwrap_or_default(),
            });
        }
    }
    cells
}

/// 合并相近的坐标
fn distinct_edges(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_by(|a, b| a.total_cmp(b));
    let mut edges: Vec<f64> = Vec::new();
    for v in values {
        match edges.last() {
            Some(last) if v - last <= EDGE_MERGE => {}
            _ => edges.push(v),
        }
    }
    edges
}

/// 按相交/相接关系对线段分组
fn cluster_rulings(rulings: &[Ruling]) -> Vec<Vec<Ruling>> {
    let mut parent: Vec<usize> = (0..rulings.len()).collect();

    fn find(parent: &mut [usize], i: usize) -> usize {
        let mut root = i;
        while parent[root] != root {
            root = parent[root];
        }
        let mut node = i;
        while parent[node] != root {
            let next = parent[node];
            parent[node] = root;
            node = next;
        }
        root
    }

    for i in 0..rulings.len() {
        for j in (i + 1)..rulings.len() {
            if rulings[i].touches(&rulings[j], JOIN_TOLERANCE) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    let mut groups: Vec<(usize, Vec<Ruling>)> = Vec::new();
    for (i, ruling) in rulings.iter().enumerate() {
        let root = find(&mut parent, i);
        match groups.iter_mut().find(|(r, _)| *r == root) {
            Some((_, group)) => group.push(*ruling),
            None => groups.push((root, vec![*ruling])),
        }
    }
    groups.into_iter().map(|(_, g)| g).collect()
}

/// 索引 i 满足 edges[i] <= v < edges[i+1]
fn band(edges: &[f64], v: f64) -> Option<usize> {
    edges.windows(2).position(|w| v >= w[0] && v < w[1])
}

#[derive(Serialize)]
struct TableFile<'a> {
    page: u32,
    table_index: u32,
    bbox: BoundingBox,
    rows: usize,
    columns: usize,
    data: Vec<Vec<String>>,
    cells: &'a [CellRecord],
}

/// 基于线段网格的表格检测
pub struct TableParser;

impl TableParser {
    pub fn new() -> Self {
        Self
    }

    /// 检测单页表格，按自上而下、自左而右编号（从 1 开始）
    pub fn extract(&self, page: &PageLayout) -> Vec<TableRecord> {
        let mut grids: Vec<(BoundingBox, Vec<f64>, Vec<f64>)> = Vec::new();

        for group in cluster_rulings(&page.rulings) {
            let hs = distinct_edges(
                group
                    .iter()
                    .filter(|r| r.orientation == Orientation::Horizontal)
                    .map(|r| r.position)
                    .collect(),
            );
            let vs = distinct_edges(
                group
                    .iter()
                    .filter(|r| r.orientation == Orientation::Vertical)
                    .map(|r| r.position)
                    .collect(),
            );
            if hs.len() < 2 || vs.len() < 2 {
                continue;
            }
            let bbox = group.iter().skip(1).fold(group[0].bbox(), |acc, r| acc.union(&r.bbox()));
            grids.push((bbox, hs, vs));
        }

        grids.sort_by(|a, b| a.0.y0.total_cmp(&b.0.y0).then(a.0.x0.total_cmp(&b.0.x0)));

        let tables: Vec<TableRecord> = grids
            .into_iter()
            .enumerate()
            .map(|(i, (bbox, hs, vs))| {
                let table_index = i as u32 + 1;
                let texts = self.cell_texts(page, &hs, &vs);
                let cells = uniform_cells(page.page_number, table_index, &bbox, &texts);
                debug!(
                    "第 {} 页表格 {}: {}x{}",
                    page.page_number,
                    table_index,
                    texts.len(),
                    vs.len() - 1
                );
                TableRecord {
                    page: page.page_number,
                    table_index,
                    bbox,
                    rows: hs.len() - 1,
                    cols: vs.len() - 1,
                    cells,
                    file_reference: None,
                }
            })
            .collect();

        if !tables.is_empty() {
            info!("第 {} 页检测到 {} 个表格", page.page_number, tables.len());
        }
        tables
    }

    /// 文字按中心点落入真实网格的行列归属
    fn cell_texts(&self, page: &PageLayout, hs: &[f64], vs: &[f64]) -> Vec<Vec<String>> {
        let mut texts = vec![vec![String::new(); vs.len() - 1]; hs.len() - 1];
        for span in page.spans() {
            let (cx, cy) = span.bbox.center();
            if let (Some(row), Some(col)) = (band(hs, cy), band(vs, cx)) {
                let cell = &mut texts[row][col];
                if !cell.is_empty() {
                    cell.push(' ');
                }
                cell.push_str(span.text.trim());
            }
        }
        texts
    }

    /// 保存为 assets/page{p}_table{t}.json 并记录文件路径
    pub fn save(&self, table: &mut TableRecord, assets_dir: &Path) -> QxResult<PathBuf> {
        let path = assets_dir.join(format!("page{}_table{}.json", table.page, table.table_index));
        let file = TableFile {
            page: table.page,
            table_index: table.table_index,
            bbox: table.bbox,
            rows: table.rows,
            columns: table.cols,
            data: table.grid(),
            cells: &table.cells,
        };
        std::fs::write(&path, serde_json::to_string_pretty(&file)?)?;
        table.file_reference = Some(path.to_string_lossy().into_owned());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::pdf_parser::{TextLine, TextSpan};
    use proptest::prelude::*;

    fn span(text: &str, x: f64, y: f64) -> TextSpan {
        TextSpan {
            text: text.to_string(),
            bbox: BoundingBox::new(x, y, x + 20.0, y + 10.0),
            font_size: 10.0,
        }
    }

    /// 3 rows x 3 cols grid with unequal column widths.
    fn grid_page() -> PageLayout {
        let mut page = PageLayout::empty(1, 612.0, 792.0);
        for y in [100.0, 130.0, 160.0, 190.0] {
            page.rulings.push(Ruling::horizontal(y, 50.0, 450.0));
        }
        for x in [50.0, 90.0, 350.0, 450.0] {
            page.rulings.push(Ruling::vertical(x, 100.0, 190.0));
        }
        // A stray underline far away from the grid.
        page.rulings.push(Ruling::horizontal(600.0, 50.0, 200.0));

        let spans = vec![span("1", 60.0, 110.0), span("What is 2+2?", 100.0, 110.0), span("4", 360.0, 110.0)];
        page.lines.push(TextLine {
            text: "1 What is 2+2? 4".into(),
            bbox: BoundingBox::new(60.0, 110.0, 380.0, 120.0),
            spans,
        });
        page
    }

    #[test]
    fn detects_grid_and_reads_cell_text_from_true_columns() {
        let tables = TableParser::new().extract(&grid_page());
        assert_eq!(tables.len(), 1);

        let table = &tables[0];
        assert_eq!((table.rows, table.cols), (3, 3));
        assert_eq!(table.table_index, 1);
        assert_eq!(table.bbox, BoundingBox::new(50.0, 100.0, 450.0, 190.0));
        assert_eq!(table.row_texts(0), vec!["1", "What is 2+2?", "4"]);
        assert_eq!(table.row_texts(1), vec!["", "", ""]);
    }

    #[test]
    fn cell_boxes_are_uniform_subdivisions() {
        let tables = TableParser::new().extract(&grid_page());
        let cell = tables[0].cell(0, 1).unwrap();
        assert_eq!(cell.bbox.x0, 50.0 + 400.0 / 3.0);
        assert_eq!(cell.bbox.y0, 100.0);
        assert_eq!(cell.bbox.y1, 130.0);
    }

    #[test]
    fn lone_rulings_do_not_form_tables() {
        let mut page = PageLayout::empty(1, 612.0, 792.0);
        page.rulings.push(Ruling::horizontal(100.0, 0.0, 300.0));
        page.rulings.push(Ruling::horizontal(120.0, 0.0, 300.0));
        assert!(TableParser::new().extract(&page).is_empty());
    }

    #[test]
    fn saves_table_json_next_to_assets() {
        let dir = tempfile::tempdir().unwrap();
        let mut tables = TableParser::new().extract(&grid_page());
        let path = TableParser::new().save(&mut tables[0], dir.path()).unwrap();

        assert!(path.ends_with("page1_table1.json"));
        let expected = path.to_string_lossy().into_owned();
        assert_eq!(tables[0].file_reference.as_deref(), Some(expected.as_str()));
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["data"][0][1], "What is 2+2?");
        assert_eq!(json["columns"], 3);
    }

    #[test]
    fn uniform_cells_partition_the_table() {
        proptest!(|(
            x in -100.0..400.0f64,
            y in -100.0..400.0f64,
            w in 1.0..500.0f64,
            h in 1.0..500.0f64,
            rows in 1usize..6,
            cols in 1usize..6,
        )| {
            let bbox = BoundingBox::new(x, y, x + w, y + h);
            let texts = vec![vec![String::new(); cols]; rows];
            let cells = uniform_cells(1, 1, &bbox, &texts);
            prop_assert_eq!(cells.len(), rows * cols);

            let total: f64 = cells.iter().map(|c| c.bbox.area()).sum();
            prop_assert!((total - bbox.area()).abs() <= bbox.area() * 1e-9 + 1e-9);

            for (i, a) in cells.iter().enumerate() {
                for b in cells.iter().skip(i + 1) {
                    prop_assert!(a.bbox.overlap_area(&b.bbox) <= 1e-9);
                }
            }
        });
    }
}
