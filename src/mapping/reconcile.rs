use std::collections::HashSet;
use tracing::{debug, info};

use super::{ImageQuestionMapping, OnPage, TableQuestionMapping};
use crate::config::ContainmentPolicy;
use crate::output::{Asset, Question};

/// 按生成顺序分配唯一题目ID，重复时追加 `_1`, `_2`, ...
#[derive(Debug, Default)]
pub struct IdAllocator {
    emitted: HashSet<String>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, raw: &str) -> String {
        let mut id = raw.to_string();
        let mut suffix = 1;
        while self.emitted.contains(&id) {
            id = format!("{}_{}", raw, suffix);
            suffix += 1;
        }
        if id != raw {
            debug!("题目ID重复: {} -> {}", raw, id);
        }
        self.emitted.insert(id.clone());
        id
    }
}

/// 可以作为资源挂到题目上的映射记录
pub trait AssetLink: OnPage {
    /// Label text as produced by the coordinate mapper (full line).
    fn question_label(&self) -> &str;
    fn to_asset(&self, question_number: &str) -> Asset;
}

impl AssetLink for ImageQuestionMapping {
    fn question_label(&self) -> &str {
        &self.question_label
    }

    fn to_asset(&self, question_number: &str) -> Asset {
        Asset {
            asset_type: "image".to_string(),
            asset_path: self.image.file_reference.clone(),
            asset_description: Some(format!("Image mapped to question {}", question_number)),
            bbox: Some(self.image.bbox),
            page_number: self.image.page,
        }
    }
}

impl AssetLink for TableQuestionMapping {
    fn question_label(&self) -> &str {
        &self.question_label
    }

    fn to_asset(&self, _question_number: &str) -> Asset {
        Asset {
            asset_type: "table".to_string(),
            asset_path: self.file_reference.clone().unwrap_or_default(),
            asset_description: Some(format!("Table with {} rows and {} columns", self.rows, self.cols)),
            bbox: Some(self.table_bbox),
            page_number: self.page,
        }
    }
}

/// 题号包含匹配：题目自身的题号（去空白后）是映射题号行的子串，且在同一页
pub struct ContainmentMatcher {
    policy: ContainmentPolicy,
}

impl ContainmentMatcher {
    pub fn new(policy: ContainmentPolicy) -> Self {
        Self { policy }
    }

    /// 返回命中的题目下标，顺序与 `questions` 一致
    pub fn matches(&self, questions: &[Question], page: u32, mapper_label: &str) -> Vec<usize> {
        let mapper_label = mapper_label.trim();
        let hits: Vec<usize> = questions
            .iter()
            .enumerate()
            .filter(|(_, q)| {
                let number = q.question_number.trim();
                q.page_number == page && !number.is_empty() && mapper_label.contains(number)
            })
            .map(|(i, _)| i)
            .collect();

        match self.policy {
            ContainmentPolicy::AllMatches => hits,
            ContainmentPolicy::LongestMatch => {
                let mut best: Option<usize> = None;
                for i in hits {
                    let len = questions[i].question_number.trim().len();
                    if best.map_or(true, |b| len > questions[b].question_number.trim().len()) {
                        best = Some(i);
                    }
                }
                best.into_iter().collect()
            }
        }
    }

    /// 把映射记录转换为资源追加到匹配的题目上，返回追加的资源数
    pub fn attach<M: AssetLink>(&self, questions: &mut [Question], mappings: &[M]) -> usize {
        let mut attached = 0;
        for mapping in mappings {
            for i in self.matches(questions, mapping.page(), mapping.question_label()) {
                let question = &mut questions[i];
                let asset = mapping.to_asset(&question.question_number);
                info!(
                    "{} {} -> 题目 '{}'",
                    asset.asset_type, asset.asset_path, question.question_number
                );
                question.assets.push(asset);
                attached += 1;
            }
        }
        attached
    }
}
