use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::mapping::BoundingBox;
use crate::utils::{QxError, QxResult};

const MAX_FORM_DEPTH: u32 = 3;
const AXIS_TOLERANCE: f64 = 1.0;
const THIN_RECT: f64 = 2.0;

/// 同一行中连续的一段文字
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    pub bbox: BoundingBox,
    pub font_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub text: String,
    pub bbox: BoundingBox,
    pub spans: Vec<TextSpan>,
}

/// 图片 XObject 在页面上的一次绘制
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlacement {
    pub name: String,
    pub object_id: ObjectId,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// 水平或垂直的线段。`position` 为水平线的 y 或垂直线的 x
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ruling {
    pub orientation: Orientation,
    pub position: f64,
    pub start: f64,
    pub end: f64,
}

impl Ruling {
    pub fn horizontal(y: f64, x0: f64, x1: f64) -> Self {
        Self {
            orientation: Orientation::Horizontal,
            position: y,
            start: x0.min(x1),
            end: x0.max(x1),
        }
    }

    pub fn vertical(x: f64, y0: f64, y1: f64) -> Self {
        Self {
            orientation: Orientation::Vertical,
            position: x,
            start: y0.min(y1),
            end: y0.max(y1),
        }
    }

    pub fn bbox(&self) -> BoundingBox {
        match self.orientation {
            Orientation::Horizontal => BoundingBox::new(self.start, self.position, self.end, self.position),
            Orientation::Vertical => BoundingBox::new(self.position, self.start, self.position, self.end),
        }
    }

    /// 两条线段是否相交或端点相接（带容差）
    pub fn touches(&self, other: &Ruling, tolerance: f64) -> bool {
        let a = self.bbox();
        let b = other.bbox();
        a.x0 <= b.x1 + tolerance && b.x0 <= a.x1 + tolerance && a.y0 <= b.y1 + tolerance && b.y0 <= a.y1 + tolerance
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    pub page_number: u32,
    pub width: f64,
    pub height: f64,
    pub lines: Vec<TextLine>,
    pub images: Vec<ImagePlacement>,
    pub rulings: Vec<Ruling>,
}

impl PageLayout {
    pub fn empty(page_number: u32, width: f64, height: f64) -> Self {
        Self {
            page_number,
            width,
            height,
            lines: Vec::new(),
            images: Vec::new(),
            rulings: Vec::new(),
        }
    }

    pub fn plain_text(&self) -> String {
        self.lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n")
    }

    pub fn spans(&self) -> impl Iterator<Item = &TextSpan> {
        self.lines.iter().flat_map(|l| l.spans.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentLayout {
    pub pages: Vec<PageLayout>,
}

impl DocumentLayout {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

pub struct PdfParser;

impl PdfParser {
    pub fn new() -> Self {
        Self
    }

    /// 加载PDF页面布局：文字位置来自 pdf-extract，图片与线段来自 lopdf 内容流扫描。
    /// 同时返回 lopdf 文档，供图片解码使用
    pub fn load(&self, pdf_path: &Path) -> QxResult<(Document, DocumentLayout)> {
        info!("解析PDF布局: {}", pdf_path.display());

        if !pdf_path.exists() {
            return Err(QxError::Pdf(format!("PDF文件不存在: {}", pdf_path.display())));
        }

        let doc = Document::load(pdf_path)?;
        let mut layout = scan_document(&doc);

        let text_doc = pdf_extract::Document::load(pdf_path).map_err(|e| QxError::Pdf(e.to_string()))?;
        let mut collector = TextCollector::default();
        pdf_extract::output_doc(&text_doc, &mut collector).map_err(|e| QxError::Pdf(e.to_string()))?;

        for page_text in collector.pages {
            match layout.pages.iter_mut().find(|p| p.page_number == page_text.page_number) {
                Some(page) => page.lines = assemble_lines(page_text.glyphs),
                None => warn!("文字层第 {} 页在页面树中不存在", page_text.page_number),
            }
        }

        let line_count: usize = layout.pages.iter().map(|p| p.lines.len()).sum();
        info!("共 {} 页，{} 行文字", layout.pages.len(), line_count);
        Ok((doc, layout))
    }
}

/// Convert a lopdf numeric object (Integer or Real) to f64.
pub(crate) fn object_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some(*f as f64),
        _ => None,
    }
}

/// 沿 /Parent 查找可继承的页面属性
fn resolve_inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = page_id;
    for _ in 0..32 {
        let dict = doc.get_object(current).and_then(|o| o.as_dict()).ok()?;
        if let Ok(value) = dict.get(key) {
            return doc.dereference(value).ok().map(|(_, obj)| obj);
        }
        current = dict.get(b"Parent").and_then(|p| p.as_reference()).ok()?;
    }
    None
}

fn media_box(doc: &Document, page_id: ObjectId) -> [f64; 4] {
    resolve_inherited(doc, page_id, b"MediaBox")
        .and_then(|o| o.as_array().ok())
        .and_then(|arr| {
            let nums: Vec<f64> = arr.iter().filter_map(object_to_f64).collect();
            (nums.len() == 4).then(|| [nums[0].min(nums[2]), nums[1].min(nums[3]), nums[0].max(nums[2]), nums[1].max(nums[3])])
        })
        .unwrap_or([0.0, 0.0, 612.0, 792.0])
}

fn stream_bytes(stream: &lopdf::Stream) -> Vec<u8> {
    if stream.dict.get(b"Filter").is_ok() {
        stream.decompressed_content().unwrap_or_default()
    } else {
        stream.content.clone()
    }
}

/// 扫描全部页面的图片绘制与线段
pub fn scan_document(doc: &Document) -> DocumentLayout {
    let mut pages = Vec::new();
    for (page_number, page_id) in doc.get_pages() {
        let [llx, lly, urx, ury] = media_box(doc, page_id);
        let mut page = PageLayout::empty(page_number, urx - llx, ury - lly);

        let content = match doc.get_page_content(page_id) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("读取第 {} 页内容流失败: {}", page_number, e);
                pages.push(page);
                continue;
            }
        };
        let resources = resolve_inherited(doc, page_id, b"Resources").and_then(|r| r.as_dict().ok());

        let mut scanner = ContentScanner {
            doc,
            origin: (llx, ury),
            images: Vec::new(),
            rulings: Vec::new(),
        };
        scanner.run(&content, resources, IDENTITY, 0);
        debug!(
            "第 {} 页: {} 次图片绘制, {} 条线段",
            page_number,
            scanner.images.len(),
            scanner.rulings.len()
        );
        page.images = scanner.images;
        page.rulings = scanner.rulings;
        pages.push(page);
    }
    DocumentLayout { pages }
}

type Matrix = [f64; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// `a × b` in PDF row-vector convention.
fn multiply(a: &Matrix, b: &Matrix) -> Matrix {
    [
        a[0] * b[0] + a[1] * b[2],
        a[0] * b[1] + a[1] * b[3],
        a[2] * b[0] + a[3] * b[2],
        a[2] * b[1] + a[3] * b[3],
        a[4] * b[0] + a[5] * b[2] + b[4],
        a[4] * b[1] + a[5] * b[3] + b[5],
    ]
}

fn apply(m: &Matrix, x: f64, y: f64) -> (f64, f64) {
    (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5])
}

fn matrix_from(operands: &[Object]) -> Option<Matrix> {
    let nums: Vec<f64> = operands.iter().filter_map(object_to_f64).collect();
    (nums.len() == 6).then(|| [nums[0], nums[1], nums[2], nums[3], nums[4], nums[5]])
}

enum PathItem {
    Segment((f64, f64), (f64, f64)),
    Rect((f64, f64), (f64, f64), (f64, f64), (f64, f64)),
}

struct ContentScanner<'a> {
    doc: &'a Document,
    /// (llx, ury) of the media box; user space is flipped against it.
    origin: (f64, f64),
    images: Vec<ImagePlacement>,
    rulings: Vec<Ruling>,
}

impl<'a> ContentScanner<'a> {
    fn to_page(&self, (x, y): (f64, f64)) -> (f64, f64) {
        (x - self.origin.0, self.origin.1 - y)
    }

    fn run(&mut self, content: &[u8], resources: Option<&'a Dictionary>, base: Matrix, depth: u32) {
        let content = match Content::decode(content) {
            Ok(c) => c,
            Err(e) => {
                warn!("内容流解码失败: {}", e);
                return;
            }
        };

        let mut ctm = base;
        let mut stack: Vec<Matrix> = Vec::new();
        let mut path: Vec<PathItem> = Vec::new();
        let mut current: Option<(f64, f64)> = None;
        let mut subpath_start: Option<(f64, f64)> = None;

        for op in &content.operations {
            match op.operator.as_str() {
                "q" => stack.push(ctm),
                "Q" => ctm = stack.pop().unwrap_or(base),
                "cm" => {
                    if let Some(m) = matrix_from(&op.operands) {
                        ctm = multiply(&m, &ctm);
                    }
                }
                "m" => {
                    let nums: Vec<f64> = op.operands.iter().filter_map(object_to_f64).collect();
                    if nums.len() == 2 {
                        let p = self.to_page(apply(&ctm, nums[0], nums[1]));
                        current = Some(p);
                        subpath_start = Some(p);
                    }
                }
                "l" => {
                    let nums: Vec<f64> = op.operands.iter().filter_map(object_to_f64).collect();
                    if nums.len() == 2 {
                        let p = self.to_page(apply(&ctm, nums[0], nums[1]));
                        if let Some(from) = current {
                            path.push(PathItem::Segment(from, p));
                        }
                        current = Some(p);
                    }
                }
                "h" => {
                    if let (Some(from), Some(start)) = (current, subpath_start) {
                        path.push(PathItem::Segment(from, start));
                        current = Some(start);
                    }
                }
                "re" => {
                    let nums: Vec<f64> = op.operands.iter().filter_map(object_to_f64).collect();
                    if nums.len() == 4 {
                        let (x, y, w, h) = (nums[0], nums[1], nums[2], nums[3]);
                        let corners = [(x, y), (x + w, y), (x + w, y + h), (x, y + h)]
                            .map(|(px, py)| self.to_page(apply(&ctm, px, py)));
                        path.push(PathItem::Rect(corners[0], corners[1], corners[2], corners[3]));
                        current = Some(corners[0]);
                        subpath_start = Some(corners[0]);
                    }
                }
                "S" | "s" | "B" | "B*" | "b" | "b*" => self.paint(std::mem::take(&mut path), true),
                "f" | "F" | "f*" => self.paint(std::mem::take(&mut path), false),
                "n" => path.clear(),
                "Do" => {
                    if let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) {
                        self.draw_xobject(name, resources, &ctm, depth);
                    }
                }
                _ => {}
            }
        }
    }

    /// Filled panels only contribute when thin; wide ones are backgrounds.
    fn paint(&mut self, path: Vec<PathItem>, stroke: bool) {
        for item in path {
            match item {
                PathItem::Segment(a, b) => {
                    if stroke {
                        self.push_segment(a, b);
                    }
                }
                PathItem::Rect(c0, c1, c2, c3) => {
                    let bbox = BoundingBox::new(
                        c0.0.min(c1.0).min(c2.0).min(c3.0),
                        c0.1.min(c1.1).min(c2.1).min(c3.1),
                        c0.0.max(c1.0).max(c2.0).max(c3.0),
                        c0.1.max(c1.1).max(c2.1).max(c3.1),
                    );
                    if bbox.height() <= THIN_RECT && bbox.width() > THIN_RECT {
                        let y = (bbox.y0 + bbox.y1) / 2.0;
                        self.rulings.push(Ruling::horizontal(y, bbox.x0, bbox.x1));
                    } else if bbox.width() <= THIN_RECT && bbox.height() > THIN_RECT {
                        let x = (bbox.x0 + bbox.x1) / 2.0;
                        self.rulings.push(Ruling::vertical(x, bbox.y0, bbox.y1));
                    } else if stroke {
                        self.rulings.push(Ruling::horizontal(bbox.y0, bbox.x0, bbox.x1));
                        self.rulings.push(Ruling::horizontal(bbox.y1, bbox.x0, bbox.x1));
                        self.rulings.push(Ruling::vertical(bbox.x0, bbox.y0, bbox.y1));
                        self.rulings.push(Ruling::vertical(bbox.x1, bbox.y0, bbox.y1));
                    }
                }
            }
        }
    }

    fn push_segment(&mut self, a: (f64, f64), b: (f64, f64)) {
        if (a.1 - b.1).abs() <= AXIS_TOLERANCE && (a.0 - b.0).abs() > AXIS_TOLERANCE {
            self.rulings.push(Ruling::horizontal((a.1 + b.1) / 2.0, a.0, b.0));
        } else if (a.0 - b.0).abs() <= AXIS_TOLERANCE && (a.1 - b.1).abs() > AXIS_TOLERANCE {
            self.rulings.push(Ruling::vertical((a.0 + b.0) / 2.0, a.1, b.1));
        }
    }

    fn draw_xobject(&mut self, name: &[u8], resources: Option<&'a Dictionary>, ctm: &Matrix, depth: u32) {
        let doc = self.doc;
        let Some(xobjects) = resources
            .and_then(|r| r.get(b"XObject").ok())
            .and_then(|x| doc.dereference(x).ok())
            .and_then(|(_, x)| x.as_dict().ok())
        else {
            return;
        };
        let Ok(object_id) = xobjects.get(name).and_then(|o| o.as_reference()) else {
            return;
        };
        let Ok(stream) = doc.get_object(object_id).and_then(|o| o.as_stream()) else {
            return;
        };

        let subtype = stream
            .dict
            .get(b"Subtype")
            .and_then(|s| s.as_name())
            .ok()
            .and_then(|n| std::str::from_utf8(n).ok());

        match subtype {
            Some("Image") => {
                let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
                    .map(|(x, y)| self.to_page(apply(ctm, x, y)));
                let bbox = BoundingBox::new(
                    corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min),
                    corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min),
                    corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max),
                    corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max),
                );
                self.images.push(ImagePlacement {
                    name: String::from_utf8_lossy(name).into_owned(),
                    object_id,
                    bbox,
                });
            }
            Some("Form") => {
                if depth >= MAX_FORM_DEPTH {
                    debug!("Form XObject 嵌套过深，跳过 {:?}", object_id);
                    return;
                }
                let form_matrix = stream
                    .dict
                    .get(b"Matrix")
                    .and_then(|m| m.as_array())
                    .ok()
                    .and_then(|arr| matrix_from(arr))
                    .unwrap_or(IDENTITY);
                let form_resources = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|r| doc.dereference(r).ok())
                    .and_then(|(_, r)| r.as_dict().ok())
                    .or(resources);
                let content = stream_bytes(stream);
                self.run(&content, form_resources, multiply(&form_matrix, ctm), depth + 1);
            }
            _ => {}
        }
    }
}

struct Glyph {
    text: String,
    x0: f64,
    x1: f64,
    baseline: f64,
    size: f64,
}

struct PageText {
    page_number: u32,
    glyphs: Vec<Glyph>,
}

/// pdf-extract 输出设备：收集每个字符的页面坐标
#[derive(Default)]
struct TextCollector {
    pages: Vec<PageText>,
    /// (llx, ury) of the current page.
    origin: (f64, f64),
}

impl pdf_extract::OutputDev for TextCollector {
    fn begin_page(
        &mut self,
        page_num: u32,
        media_box: &pdf_extract::MediaBox,
        _art_box: Option<(f64, f64, f64, f64)>,
    ) -> Result<(), pdf_extract::OutputError> {
        self.origin = (media_box.llx, media_box.ury);
        self.pages.push(PageText {
            page_number: page_num,
            glyphs: Vec::new(),
        });
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), pdf_extract::OutputError> {
        Ok(())
    }

    fn output_character(
        &mut self,
        trm: &pdf_extract::Transform,
        width: f64,
        spacing: f64,
        font_size: f64,
        char: &str,
    ) -> Result<(), pdf_extract::OutputError> {
        let scale_y = (trm.m21 * trm.m21 + trm.m22 * trm.m22).sqrt();
        let scale_x = (trm.m11 * trm.m11 + trm.m12 * trm.m12).sqrt();
        let size = font_size * scale_y;
        let x0 = trm.m31 - self.origin.0;
        let baseline = self.origin.1 - trm.m32;
        let advance = (width * font_size + spacing) * scale_x;

        if !(x0.is_finite() && baseline.is_finite() && size.is_finite()) {
            return Ok(());
        }
        if let Some(page) = self.pages.last_mut() {
            page.glyphs.push(Glyph {
                text: char.to_string(),
                x0,
                x1: x0 + advance.max(0.0),
                baseline,
                size: size.max(1.0),
            });
        }
        Ok(())
    }

    fn begin_word(&mut self) -> Result<(), pdf_extract::OutputError> {
        Ok(())
    }

    fn end_word(&mut self) -> Result<(), pdf_extract::OutputError> {
        Ok(())
    }

    fn end_line(&mut self) -> Result<(), pdf_extract::OutputError> {
        Ok(())
    }
}

/// 按基线聚类字符成行，行内按间距切分为文字段
fn assemble_lines(mut glyphs: Vec<Glyph>) -> Vec<TextLine> {
    glyphs.sort_by(|a, b| a.baseline.total_cmp(&b.baseline).then(a.x0.total_cmp(&b.x0)));

    let mut rows: Vec<Vec<Glyph>> = Vec::new();
    for glyph in glyphs {
        match rows.last_mut() {
            Some(row) if (glyph.baseline - row[0].baseline).abs() <= (row[0].size * 0.5).max(2.0) => row.push(glyph),
            _ => rows.push(vec![glyph]),
        }
    }

    let mut lines = Vec::new();
    for mut row in rows {
        row.sort_by(|a, b| a.x0.total_cmp(&b.x0));

        let mut spans: Vec<TextSpan> = Vec::new();
        let mut text = String::new();
        let mut bbox: Option<BoundingBox> = None;
        let mut size = 0.0f64;
        let mut last_x1: Option<f64> = None;
        let mut pending_space = false;

        for glyph in row {
            if glyph.text.trim().is_empty() {
                pending_space = true;
                continue;
            }
            if let Some(prev) = last_x1 {
                let gap = glyph.x0 - prev;
                if gap > glyph.size * 1.5 {
                    if let Some(b) = bbox.take() {
                        spans.push(TextSpan {
                            text: std::mem::take(&mut text),
                            bbox: b,
                            font_size: size,
                        });
                    }
                } else if (pending_space || gap > glyph.size * 0.2) && !text.is_empty() {
                    text.push(' ');
                }
            }
            pending_space = false;

            let glyph_box = BoundingBox::new(
                glyph.x0,
                glyph.baseline - glyph.size * 0.8,
                glyph.x1,
                glyph.baseline + glyph.size * 0.2,
            );
            bbox = Some(bbox.map_or(glyph_box, |b| b.union(&glyph_box)));
            size = size.max(glyph.size);
            text.push_str(&glyph.text);
            last_x1 = Some(glyph.x1);
        }
        if let Some(b) = bbox {
            spans.push(TextSpan { text, bbox: b, font_size: size });
        }
        if spans.is_empty() {
            continue;
        }

        let line_box = spans.iter().skip(1).fold(spans[0].bbox, |acc, s| acc.union(&s.bbox));
        let line_text = spans.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");
        lines.push(TextLine {
            text: line_text,
            bbox: line_box,
            spans,
        });
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn glyphs(text: &str, x: f64, baseline: f64, size: f64) -> Vec<Glyph> {
        text.chars()
            .enumerate()
            .map(|(i, c)| Glyph {
                text: c.to_string(),
                x0: x + i as f64 * size * 0.5,
                x1: x + (i as f64 + 1.0) * size * 0.5,
                baseline,
                size,
            })
            .collect()
    }

    #[test]
    fn glyphs_group_into_lines_and_spans() {
        let mut all = glyphs("2. Sum", 300.0, 120.0, 10.0);
        all.extend(glyphs("1. Find x", 72.0, 100.0, 10.0));
        all.extend(glyphs("A", 72.0, 120.5, 10.0));

        let lines = assemble_lines(all);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "1. Find x");
        // "A" and "2. Sum" share a baseline but are far apart.
        assert_eq!(lines[1].spans.len(), 2);
        assert_eq!(lines[1].text, "A 2. Sum");
        assert!(lines[0].bbox.y0 < lines[1].bbox.y0);
    }

    fn one_page_doc(content: &[u8], resources: impl FnOnce(&mut Document) -> Dictionary) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id: ObjectId = doc.new_object_id();
        let resources = resources(&mut doc);
        let content_id = doc.add_object(Object::Stream(Stream::new(Dictionary::new(), content.to_vec())));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => Object::Dictionary(resources),
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::from(page_id)],
                "Count" => 1i64,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    #[test]
    fn image_placement_is_flipped_to_top_left_origin() {
        let doc = one_page_doc(b"q 200 0 0 150 100 300 cm /Im0 Do Q", |doc| {
            let image_id = doc.add_object(Object::Stream(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 2i64,
                    "Height" => 2i64,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8i64,
                },
                vec![0u8; 12],
            )));
            dictionary! {
                "XObject" => Object::Dictionary(dictionary! { "Im0" => image_id }),
            }
        });

        let layout = scan_document(&doc);
        assert_eq!(layout.pages.len(), 1);
        let placed = &layout.pages[0].images;
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].name, "Im0");
        assert_eq!(placed[0].bbox, BoundingBox::new(100.0, 342.0, 300.0, 492.0));
        assert_eq!(layout.pages[0].height, 792.0);
    }

    #[test]
    fn form_xobject_placements_apply_form_matrix() {
        let doc = one_page_doc(b"q 1 0 0 1 50 0 cm /Fm0 Do Q", |doc| {
            let image_id = doc.add_object(Object::Stream(Stream::new(
                dictionary! { "Type" => "XObject", "Subtype" => "Image", "Width" => 1i64, "Height" => 1i64 },
                vec![0u8; 3],
            )));
            let form_id = doc.add_object(Object::Stream(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "Matrix" => vec![1.into(), 0.into(), 0.into(), 1.into(), 0.into(), 100.into()],
                    "Resources" => Object::Dictionary(dictionary! {
                        "XObject" => Object::Dictionary(dictionary! { "Im1" => image_id }),
                    }),
                },
                b"q 100 0 0 100 0 0 cm /Im1 Do Q".to_vec(),
            )));
            dictionary! {
                "XObject" => Object::Dictionary(dictionary! { "Fm0" => form_id }),
            }
        });

        let placed = &scan_document(&doc).pages[0].images;
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].bbox, BoundingBox::new(50.0, 592.0, 150.0, 692.0));
    }

    #[test]
    fn stroked_rectangles_and_lines_become_rulings() {
        let doc = one_page_doc(b"100 600 200 100 re S 100 650 m 300 650 l S 50 50 400 300 re f", |_| Dictionary::new());
        let layout = scan_document(&doc);
        let rulings = &layout.pages[0].rulings;

        let horizontal = rulings.iter().filter(|r| r.orientation == Orientation::Horizontal).count();
        let vertical = rulings.iter().filter(|r| r.orientation == Orientation::Vertical).count();
        assert_eq!(horizontal, 3);
        assert_eq!(vertical, 2);
        assert!(rulings.iter().any(|r| r.orientation == Orientation::Horizontal && r.position == 142.0));
    }
}
