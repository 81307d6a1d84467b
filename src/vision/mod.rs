use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::output::McqOption;
use crate::utils::{QxError, QxResult};

const VISION_PROMPT: &str = r#"Analyze this image and extract:
1. Any question text
2. Multiple choice options (A, B, C, D, E)
3. Mathematical formulas
4. Whether it contains diagrams/figures

Return as JSON:
{
    "question_text": "...",
    "mcq_options": [{"letter": "A", "text": "..."}],
    "mathematical_content": "...",
    "has_diagram": true/false
}"#;

/// OpenAI 兼容的多模态请求体
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct VisionPayload {
    question_text: Option<String>,
    mcq_options: Vec<VisionOption>,
    mathematical_content: Option<String>,
    has_diagram: bool,
}

#[derive(Deserialize)]
struct VisionOption {
    letter: String,
    #[serde(default)]
    text: String,
}

/// 单张图片的视觉分析结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VisionResult {
    pub question_text: Option<String>,
    pub mcq_options: Vec<McqOption>,
    pub mathematical_content: Option<String>,
    pub has_diagram: bool,
    pub raw_response: String,
}

pub struct VisionService {
    client: reqwest::Client,
    config: LlmConfig,
}

impl VisionService {
    pub fn new(config: LlmConfig) -> QxResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs));

        if !config.proxy.is_empty() {
            match reqwest::Proxy::all(&config.proxy) {
                Ok(proxy) => {
                    info!("使用代理: {}", config.proxy);
                    builder = builder.proxy(proxy);
                }
                Err(e) => {
                    warn!("代理配置无效 '{}': {}", config.proxy, e);
                }
            }
        }

        let client = builder.build()?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// 分析单张图片：题干、选项、公式与是否含图
    pub async fn analyze_image(&self, image_path: &Path) -> QxResult<VisionResult> {
        if !self.is_configured() {
            return Err(QxError::Vision("LLM 未配置".into()));
        }

        let encoded = encode_image(image_path, self.config.max_image_side, self.config.jpeg_quality)?;
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: VISION_PROMPT.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:image/jpeg;base64,{}", encoded),
                        },
                    },
                ],
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let raw = self.call_api(&request).await?;
        let result = parse_response(&raw);
        info!(
            "视觉分析 {}: question={}, mcq={}",
            image_path.display(),
            result.question_text.is_some(),
            result.mcq_options.len()
        );
        Ok(result)
    }

    /// 调用视觉接口，带重试逻辑
    async fn call_api(&self, request: &ChatRequest) -> QxResult<String> {
        let mut last_error = None;

        for attempt in 0..3u32 {
            if attempt > 0 {
                let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                info!("API 重试 ({}/3)，等待 {}ms...", attempt + 1, delay.as_millis());
                tokio::time::sleep(delay).await;
            }

            match self.do_request(request).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    warn!("API 调用失败 (尝试 {}/3): {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| QxError::Vision("API 调用失败".into())))
    }

    async fn do_request(&self, request: &ChatRequest) -> QxResult<String> {
        let response = self
            .client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QxError::Vision(format!("API 返回错误 {}: {}", status, body)));
        }

        let chat_response: ChatResponse = response.json().await?;
        Ok(chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

/// 读取图片，等比缩放到最长边不超过 max_side，编码为 JPEG 后 base64
pub fn encode_image(path: &Path, max_side: u32, quality: u8) -> QxResult<String> {
    let img = image::open(path).map_err(|e| QxError::Vision(format!("读取图片失败 {}: {}", path.display(), e)))?;

    let img = if img.width().max(img.height()) > max_side {
        img.resize(max_side, max_side, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };
    let rgb = img.to_rgb8();

    let mut buffer = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(&rgb)
        .map_err(|e| QxError::Vision(format!("JPEG 编码失败: {}", e)))?;
    debug!("图片编码 {}x{}, {} 字节", rgb.width(), rgb.height(), buffer.len());

    Ok(base64::engine::general_purpose::STANDARD.encode(buffer))
}

/// 解析模型回复：优先取其中的 JSON 对象，失败时按行解析
pub fn parse_response(response: &str) -> VisionResult {
    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if start < end {
            match serde_json::from_str::<VisionPayload>(&response[start..=end]) {
                Ok(payload) => {
                    return VisionResult {
                        question_text: payload.question_text.filter(|t| !t.trim().is_empty()),
                        mcq_options: payload
                            .mcq_options
                            .into_iter()
                            .map(|o| McqOption::new(o.letter.trim().to_uppercase(), o.text.trim()))
                            .collect(),
                        mathematical_content: payload.mathematical_content.filter(|t| !t.trim().is_empty()),
                        has_diagram: payload.has_diagram,
                        raw_response: response.to_string(),
                    }
                }
                Err(e) => debug!("视觉回复 JSON 解析失败，改用按行解析: {}", e),
            }
        }
    }
    parse_text_response(response)
}

fn parse_text_response(response: &str) -> VisionResult {
    let mut result = VisionResult {
        raw_response: response.to_string(),
        ..Default::default()
    };

    for line in response.lines().map(str::trim) {
        let lower = line.to_lowercase();

        if ["question:", "q:", "problem:"].iter().any(|w| lower.contains(w)) {
            result.question_text = Some(line.to_string());
        }

        if let Some((letter, text)) = line.split_once(':') {
            if matches!(letter, "A" | "B" | "C" | "D" | "E") {
                result.mcq_options.push(McqOption::new(letter, text.trim()));
            }
        }

        if ['=', '+', '-', '×', '÷', '∑', '∫'].iter().any(|s| line.contains(*s)) {
            result.mathematical_content = Some(line.to_string());
        }

        if ["diagram", "chart", "graph", "figure"].iter().any(|w| lower.contains(w)) {
            result.has_diagram = true;
        }
    }
    result
}
