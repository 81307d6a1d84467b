pub mod logger;
pub mod pool;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QxError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("PDF处理错误: {0}")]
    Pdf(String),

    #[error("网络请求错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("视觉分析错误: {0}")]
    Vision(String),

    /// 上游中间文件缺失或无法解析，调用方应跳过资源关联
    #[error("缺少输入数据 {}: {reason}", path.display())]
    MissingInput { path: PathBuf, reason: String },

    #[error("处理超时: {0}")]
    Timeout(String),
}

impl From<config::ConfigError> for QxError {
    fn from(e: config::ConfigError) -> Self {
        QxError::Config(e.to_string())
    }
}

impl From<lopdf::Error> for QxError {
    fn from(e: lopdf::Error) -> Self {
        QxError::Pdf(e.to_string())
    }
}

impl QxError {
    pub fn is_missing_input(&self) -> bool {
        matches!(self, QxError::MissingInput { .. })
    }
}

pub type QxResult<T> = Result<T, QxError>;

/// 单条提取失败记录，不中断批处理
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExtractionIssue {
    pub page: u32,
    pub item: String,
    pub reason: String,
}

impl ExtractionIssue {
    pub fn new(page: u32, item: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            page,
            item: item.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ExtractionIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page {} {}: {}", self.page, self.item, self.reason)
    }
}

/// 批量提取结果：成功的记录与失败的条目分开收集
#[derive(Debug, Clone)]
pub struct ExtractionReport<T> {
    pub records: Vec<T>,
    pub issues: Vec<ExtractionIssue>,
}

impl<T> Default for ExtractionReport<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            issues: Vec::new(),
        }
    }
}

impl<T> ExtractionReport<T> {
    pub fn push(&mut self, item: Result<T, ExtractionIssue>) {
        match item {
            Ok(record) => self.records.push(record),
            Err(issue) => {
                tracing::warn!("提取失败: {}", issue);
                self.issues.push(issue);
            }
        }
    }
}

impl<T> FromIterator<Result<T, ExtractionIssue>> for ExtractionReport<T> {
    fn from_iter<I: IntoIterator<Item = Result<T, ExtractionIssue>>>(iter: I) -> Self {
        let mut report = Self::default();
        for item in iter {
            report.push(item);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_separates_records_from_issues() {
        let report: ExtractionReport<u32> = vec![
            Ok(1),
            Err(ExtractionIssue::new(2, "image 3", "empty stream")),
            Ok(4),
        ]
        .into_iter()
        .collect();

        assert_eq!(report.records, vec![1, 4]);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].to_string(), "page 2 image 3: empty stream");
    }

    #[test]
    fn missing_input_is_distinguishable() {
        let err = QxError::MissingInput {
            path: PathBuf::from("assets/extraction_results.json"),
            reason: "not found".into(),
        };
        assert!(err.is_missing_input());
        assert!(!QxError::Pdf("bad xref".into()).is_missing_input());
    }
}
