use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::{QxError, QxResult};

pub const DEFAULT_CONFIG_PATH: &str = "config/settings.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub extraction: ExtractionConfig,
    pub mapping: MappingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub proxy: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_image_side: u32,
    pub jpeg_quality: u8,
}

/// 单元格映射策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStrategy {
    /// 重叠面积 + 中心距离加权评分
    Weighted,
    /// 图片底边落入行的纵向区间
    YAxis,
}

/// 题号包含匹配命中多个题目时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainmentPolicy {
    AllMatches,
    LongestMatch,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    pub output_dir: String,
    pub max_parallel_pdfs: usize,
    pub document_timeout_secs: u64,
    pub min_image_side: u32,
    pub header_patterns: Vec<String>,
    pub cell_strategy: CellStrategy,
    pub containment_policy: ContainmentPolicy,
    pub dominance_ratio: f64,
}

/// 空间映射的全部可调阈值
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MappingConfig {
    pub overlap_threshold: f64,
    pub confidence_floor: f64,
    pub overlap_weight: f64,
    pub proximity_weight: f64,
    /// Assumed page width used to normalise centre distance.
    pub proximity_distance: f64,
    pub high_confidence_distance: f64,
    pub medium_confidence_distance: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl AppConfig {
    /// 默认值 -> 配置文件 -> QEXTRACT_* 环境变量 -> LITELLM_* 环境变量
    pub fn load_from(path: impl AsRef<Path>) -> QxResult<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("QEXTRACT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("llm.api_url", std::env::var("LITELLM_API_URL").ok())?
            .set_override_option("llm.api_key", std::env::var("LITELLM_API_KEY").ok())?
            .set_override_option("llm.model", std::env::var("LITELLM_MODEL").ok())?
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> QxResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| QxError::Config(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> QxResult<()> {
        let m = &self.mapping;
        if !(0.0..=1.0).contains(&m.overlap_threshold) || !(0.0..=1.0).contains(&m.confidence_floor) {
            return Err(QxError::Config("overlap_threshold 与 confidence_floor 必须位于 [0, 1]".into()));
        }
        if m.overlap_weight < 0.0 || m.proximity_weight < 0.0 {
            return Err(QxError::Config("映射权重不能为负数".into()));
        }
        if m.proximity_distance <= 0.0 {
            return Err(QxError::Config("proximity_distance 必须大于 0".into()));
        }
        if m.high_confidence_distance > m.medium_confidence_distance {
            return Err(QxError::Config("high_confidence_distance 不能大于 medium_confidence_distance".into()));
        }
        if self.extraction.max_parallel_pdfs == 0 {
            return Err(QxError::Config("max_parallel_pdfs 至少为 1".into()));
        }
        Ok(())
    }
}

impl LlmConfig {
    /// 检查 API key 是否已配置
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && self.api_key != "your-api-key" && !self.api_url.is_empty()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                api_url: "http://localhost:4000/v1/chat/completions".to_string(),
                api_key: String::new(),
                model: "gpt-4o-mini".to_string(),
                proxy: String::new(),
                max_tokens: 800,
                temperature: 0.1,
                timeout_secs: 60,
                max_image_side: 1024,
                jpeg_quality: 85,
            },
            extraction: ExtractionConfig {
                output_dir: "output".to_string(),
                max_parallel_pdfs: 5,
                document_timeout_secs: 600,
                min_image_side: 10,
                header_patterns: vec![r"Page \d+".to_string()],
                cell_strategy: CellStrategy::Weighted,
                containment_policy: ContainmentPolicy::AllMatches,
                dominance_ratio: 0.5,
            },
            mapping: MappingConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: 0.1,
            confidence_floor: 0.3,
            overlap_weight: 0.7,
            proximity_weight: 0.3,
            proximity_distance: 600.0,
            high_confidence_distance: 200.0,
            medium_confidence_distance: 400.0,
        }
    }
}
