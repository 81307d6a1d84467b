use regex::Regex;
use tracing::debug;

use super::pdf_parser::PageLayout;
use super::QuestionLabel;

/// 扫描页面文字行中的题号
pub struct LabelScanner {
    label_re: Regex,
    number_re: Regex,
}

impl LabelScanner {
    pub fn new() -> Self {
        Self {
            label_re: Regex::new(r"(?i)^(?:Question\s+\d+|\d+\.|Practice\s+Example\s+\d+)").unwrap(),
            number_re: Regex::new(r"(?i)Question\s+(\d+)|^(\d+)\.|Practice\s+Example\s+(\d+)").unwrap(),
        }
    }

    pub fn is_label(&self, line: &str) -> bool {
        self.label_re.is_match(line.trim())
    }

    /// 单页题号，按 y 自上而下排序
    pub fn scan_page(&self, page: &PageLayout) -> Vec<QuestionLabel> {
        let mut labels: Vec<QuestionLabel> = page
            .lines
            .iter()
            .filter_map(|line| {
                let text = line.text.trim();
                if text.is_empty() || !self.is_label(text) {
                    return None;
                }
                debug!("第 {} 页题号 '{}' y={:.1}", page.page_number, text, line.bbox.y0);
                Some(QuestionLabel {
                    page: page.page_number,
                    label: text.to_string(),
                    y: line.bbox.y0,
                    bbox: line.bbox,
                })
            })
            .collect();
        labels.sort_by(|a, b| a.y.total_cmp(&b.y));
        labels
    }

    pub fn scan(&self, pages: &[PageLayout]) -> Vec<QuestionLabel> {
        pages.iter().flat_map(|p| self.scan_page(p)).collect()
    }

    /// 从题号文本中取出数字部分，如 "Question 12" -> "12"
    pub fn number_of(&self, label: &str) -> Option<String> {
        let caps = self.number_re.captures(label.trim())?;
        caps.iter()
            .skip(1)
            .flatten()
            .next()
            .map(|m| m.as_str().to_string())
    }
}
