use regex::Regex;
use tracing::{debug, info};

use crate::mapping::IdAllocator;
use crate::output::{McqOption, Question, QuestionType, Subpart};
use crate::parser::latex::LatexConverter;
use crate::parser::LabelScanner;
use crate::utils::{QxError, QxResult};

/// 题目文本块：所在页、题号与完整文本
#[derive(Debug, Clone, PartialEq)]
struct Block {
    page: u32,
    label: String,
    text: String,
}

/// 把多页纯文本切分为题目
pub struct Segmenter {
    header_res: Vec<Regex>,
    spaces_re: Regex,
    block_re: Regex,
    split_re: Regex,
    subpart_re: Regex,
    option_re: Regex,
    mcq_hint_re: Regex,
    labels: LabelScanner,
    latex: LatexConverter,
}

impl Segmenter {
    pub fn new(header_patterns: &[String]) -> QxResult<Self> {
        let header_res = header_patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){}", p))
                    .map_err(|e| QxError::Config(format!("页眉正则无效 '{}': {}", p, e)))
            })
            .collect::<QxResult<Vec<_>>>()?;

        Ok(Self {
            header_res,
            spaces_re: Regex::new(r"[ \t]+").unwrap(),
            block_re: Regex::new(r"(?mi)^(?:\d+\.|Question\s+\d+|Practice\s+Example\s+\d+)").unwrap(),
            split_re: Regex::new(r"\n(?:[a-z]\.|[A-E]:|\([ivx]+\)|\([a-z]\))").unwrap(),
            subpart_re: Regex::new(r"^([a-z]\.|\([ivx]+\)|\([a-z]\))\s*(.*)$").unwrap(),
            option_re: Regex::new(r"(?m)\b([A-E]):[ \t]*(\S.*?)[ \t]*$").unwrap(),
            mcq_hint_re: Regex::new(r"[A-E]:").unwrap(),
            labels: LabelScanner::new(),
            latex: LatexConverter::new(),
        })
    }

    /// 去页眉、合并空白、删除空行
    pub fn clean_text(&self, text: &str) -> String {
        let mut text = text.replace("\r\n", "\n").replace('\r', "\n");
        for re in &self.header_res {
            text = re.replace_all(&text, "").into_owned();
        }
        text.lines()
            .map(|line| self.spaces_re.replace_all(line, " ").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 按页顺序传入每页文本，返回全部题目。题目可以跨页，所在页取题号出现的页
    pub fn segment(&self, pages: &[String]) -> Vec<Question> {
        let mut all_text = String::new();
        let mut boundaries = Vec::with_capacity(pages.len());
        for page in pages {
            boundaries.push(all_text.len());
            all_text.push_str(&self.clean_text(page));
            all_text.push('\n');
        }

        let blocks = self.split_blocks(&all_text, &boundaries);
        info!("识别到 {} 个题号", blocks.len());

        let mut ids = IdAllocator::new();
        blocks
            .into_iter()
            .map(|block| {
                let number = self.labels.number_of(&block.label).unwrap_or_else(|| block.label.clone());
                let id = ids.allocate(&format!("page{}_question{}", block.page, number));
                self.build_question(id, block)
            })
            .collect()
    }

    fn split_blocks(&self, text: &str, boundaries: &[usize]) -> Vec<Block> {
        let starts: Vec<(usize, &str)> = self.block_re.find_iter(text).map(|m| (m.start(), m.as_str())).collect();

        starts
            .iter()
            .enumerate()
            .map(|(i, (start, label))| {
                let end = starts.get(i + 1).map(|(s, _)| *s).unwrap_or(text.len());
                let page = boundaries.iter().take_while(|b| **b <= *start).count().max(1) as u32;
                Block {
                    page,
                    label: label.trim().to_string(),
                    text: text[*start..end].trim().to_string(),
                }
            })
            .collect()
    }

    fn build_question(&self, id: String, block: Block) -> Question {
        let (main_text, remainder) = self.split_main(&block.text);

        let mut question = Question::new(id, block.label, block.page);
        question.question_latex = self.latex.latex_for(&main_text);
        question.question_text = main_text;
        question.subparts = self.subparts(&remainder);
        question.mcq_options = self.mcq_options(&remainder);
        question.question_type = self.classify(&block.text);
        question.refresh_flags();

        debug!(
            "题目 {}: {} 个子题, {} 个选项",
            question.question_id,
            question.subparts.len(),
            question.mcq_options.len()
        );
        question
    }

    /// 在第一个子题或选项标记处切分题干与其余部分
    fn split_main(&self, block: &str) -> (String, String) {
        match self.split_re.find(block) {
            Some(m) => (block[..m.start()].trim().to_string(), block[m.start()..].trim().to_string()),
            None => (block.trim().to_string(), String::new()),
        }
    }

    fn subparts(&self, remainder: &str) -> Vec<Subpart> {
        let mut subparts: Vec<Subpart> = Vec::new();

        for line in remainder.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(caps) = self.subpart_re.captures(line) {
                subparts.push(Subpart {
                    subpart_number: caps[1].to_string(),
                    subpart_text: caps[2].trim().to_string(),
                    subpart_latex: None,
                    question_type: QuestionType::Misc,
                    assets: Vec::new(),
                    mcq_options: Vec::new(),
                });
            } else if let Some(current) = subparts.last_mut() {
                // continuation line
                if !current.subpart_text.is_empty() {
                    current.subpart_text.push(' ');
                }
                current.subpart_text.push_str(line);
            }
        }

        for subpart in &mut subparts {
            subpart.question_type = self.classify(&subpart.subpart_text);
            subpart.subpart_latex = self.latex.latex_for(&subpart.subpart_text);
        }
        subparts
    }

    fn mcq_options(&self, remainder: &str) -> Vec<McqOption> {
        self.option_re
            .captures_iter(remainder)
            .map(|caps| McqOption::new(&caps[1], caps[2].trim()))
            .collect()
    }

    pub fn classify(&self, text: &str) -> QuestionType {
        let lower = text.to_lowercase();
        let has_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if self.mcq_hint_re.is_match(text) || has_any(&["choose", "select"]) {
            QuestionType::Mcq
        } else if has_any(&["evaluate", "calculate", "find", "determine", "solve"]) {
            QuestionType::Evaluate
        } else if has_any(&["explain", "describe", "define", "state"]) {
            QuestionType::ShortAnswer
        } else {
            QuestionType::Misc
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter() -> Segmenter {
        Segmenter::new(&[r"Page \d+".to_string()]).unwrap()
    }

    #[test]
    fn cleaning_strips_headers_and_blank_lines() {
        let cleaned = segmenter().clean_text("PAGE 3\r\n\r\n  1.   Find   x  \n\n\tGiven y\n");
        assert_eq!(cleaned, "1. Find x\nGiven y");
    }

    #[test]
    fn blocks_span_pages_and_take_the_starting_page() {
        let pages = vec![
            "Worksheet\n1. Evaluate the sum\n2. Explain the result".to_string(),
            "continued from page one\nQuestion 3\nChoose the best answer\nA: 4\nB: 5".to_string(),
        ];
        let questions = segmenter().segment(&pages);

        assert_eq!(questions.len(), 3);
        assert_eq!(questions[0].question_id, "page1_question1");
        assert_eq!(questions[0].question_number, "1.");
        assert_eq!(questions[0].question_type, QuestionType::Evaluate);

        assert_eq!(questions[1].page_number, 1);
        assert_eq!(questions[1].question_text, "2. Explain the result\ncontinued from page one");
        assert_eq!(questions[1].question_type, QuestionType::ShortAnswer);

        let q3 = &questions[2];
        assert_eq!((q3.page_number, q3.question_id.as_str()), (2, "page2_question3"));
        assert_eq!(q3.question_text, "Question 3\nChoose the best answer");
        assert_eq!(q3.mcq_options, vec![McqOption::new("A", "4"), McqOption::new("B", "5")]);
        assert!(q3.mcq_flag);
        assert_eq!(q3.question_type, QuestionType::Mcq);
    }

    #[test]
    fn subparts_collect_continuation_lines() {
        let pages = vec!["4. Consider the sequence\na. Find the 10th term\nusing the formula\n(ii) Explain why ∑ diverges".to_string()];
        let questions = segmenter().segment(&pages);
        let q = &questions[0];

        assert_eq!(q.question_text, "4. Consider the sequence");
        assert!(q.subpart_flag);
        assert_eq!(q.subparts.len(), 2);
        assert_eq!(q.subparts[0].subpart_number, "a.");
        assert_eq!(q.subparts[0].subpart_text, "Find the 10th term using the formula");
        assert_eq!(q.subparts[0].question_type, QuestionType::Evaluate);
        assert_eq!(q.subparts[0].subpart_latex, None);
        assert_eq!(q.subparts[1].subpart_latex.as_deref(), Some(r"Explain why \sum diverges"));
        assert_eq!(q.question_type, QuestionType::Evaluate);
    }

    #[test]
    fn repeated_labels_on_a_page_get_suffixes() {
        let pages = vec!["1. First\n1. Again".to_string()];
        let ids: Vec<String> = segmenter().segment(&pages).into_iter().map(|q| q.question_id).collect();
        assert_eq!(ids, vec!["page1_question1", "page1_question1_1"]);
    }

    #[test]
    fn invalid_header_pattern_is_a_config_error() {
        assert!(matches!(Segmenter::new(&["(".to_string()]), Err(QxError::Config(_))));
    }
}
