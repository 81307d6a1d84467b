use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashSet;
use std::io::Read as IoRead;
use std::path::Path;
use tracing::{debug, info, warn};

use super::pdf_parser::{DocumentLayout, ImagePlacement};
use super::{ImageIndex, ImageRecord};
use crate::utils::{ExtractionIssue, ExtractionReport, QxResult};

/// 解码后的图片：压缩格式原样写出，像素数据经 image 编码为 PNG
enum DecodedImage {
    Encoded { bytes: Vec<u8>, ext: &'static str, format: &'static str },
    Pixels(image::DynamicImage),
}

pub struct ImageAnalyzer {
    min_side: u32,
}

impl ImageAnalyzer {
    pub fn new(min_side: u32) -> Self {
        Self { min_side }
    }

    /// 按页面绘制位置提取图片，保存为 assets/page{p}_img{i}.{ext}
    ///
    /// 同一图片对象在一页内多次绘制时只取第一次的位置；跨页复用则每页各一条记录。
    pub fn extract(&self, doc: &Document, layout: &DocumentLayout, assets_dir: &Path, pdf_path: &str) -> QxResult<ImageIndex> {
        info!("提取PDF图片: {}", pdf_path);
        std::fs::create_dir_all(assets_dir)?;

        let mut report: ExtractionReport<ImageRecord> = ExtractionReport::default();
        for page in &layout.pages {
            let mut seen: HashSet<ObjectId> = HashSet::new();
            let mut next_index = 1u32;

            for placement in &page.images {
                if !seen.insert(placement.object_id) {
                    debug!("第 {} 页图片 {} 重复绘制，保留首次位置", page.page_number, placement.name);
                    continue;
                }
                match self.save_placement(doc, page.page_number, next_index, placement, assets_dir) {
                    Ok(Some(record)) => {
                        next_index += 1;
                        report.push(Ok(record));
                    }
                    Ok(None) => {}
                    Err(issue) => report.push(Err(issue)),
                }
            }
        }

        info!("图片提取完成，共 {} 张，失败 {} 张", report.records.len(), report.issues.len());
        Ok(ImageIndex {
            pdf_path: pdf_path.to_string(),
            total_images: report.records.len(),
            images: report.records,
            issues: report.issues,
        })
    }

    fn save_placement(
        &self,
        doc: &Document,
        page: u32,
        index: u32,
        placement: &ImagePlacement,
        assets_dir: &Path,
    ) -> Result<Option<ImageRecord>, ExtractionIssue> {
        let item = format!("image {}", placement.name);
        let stream = doc
            .get_object(placement.object_id)
            .and_then(|o| o.as_stream())
            .map_err(|e| ExtractionIssue::new(page, item.as_str(), e.to_string()))?;

        let width = dict_u32(&stream.dict, b"Width");
        let height = dict_u32(&stream.dict, b"Height");

        // Icons and bullets, not figures.
        if width < self.min_side || height < self.min_side {
            debug!("跳过小图片: {}x{} (obj {:?})", width, height, placement.object_id);
            return Ok(None);
        }

        let decoded = self
            .decode(doc, stream, width, height)
            .map_err(|reason| ExtractionIssue::new(page, item.as_str(), reason))?;

        let (file_name, format) = match &decoded {
            DecodedImage::Encoded { ext, format, .. } => (format!("page{}_img{}.{}", page, index, ext), *format),
            DecodedImage::Pixels(_) => (format!("page{}_img{}.png", page, index), "png"),
        };
        let path = assets_dir.join(&file_name);

        let written = match decoded {
            DecodedImage::Encoded { bytes, .. } => std::fs::write(&path, bytes).map_err(|e| e.to_string()),
            DecodedImage::Pixels(img) => img.save(&path).map_err(|e| e.to_string()),
        };
        written.map_err(|reason| ExtractionIssue::new(page, item.as_str(), format!("写入 {} 失败: {}", file_name, reason)))?;

        debug!("第 {} 页保存图片 {} ({}x{})", page, file_name, width, height);
        Ok(Some(ImageRecord {
            page,
            index,
            bbox: placement.bbox,
            file_reference: path.to_string_lossy().into_owned(),
            width,
            height,
            format: format.to_string(),
        }))
    }

    fn decode(&self, doc: &Document, stream: &Stream, width: u32, height: u32) -> Result<DecodedImage, String> {
        let filter_name = self.get_filter_name(&stream.dict);

        match filter_name.as_deref() {
            Some("DCTDecode") | Some("JPXDecode") => {
                let data = stream.decompressed_content().unwrap_or_else(|_| stream.content.clone());
                if data.is_empty() {
                    return Err("图片数据为空".into());
                }
                let (ext, format) = if filter_name.as_deref() == Some("DCTDecode") {
                    ("jpg", "jpeg")
                } else {
                    ("jp2", "jp2")
                };
                Ok(DecodedImage::Encoded { bytes: data, ext, format })
            }
            Some("FlateDecode") => {
                // lopdf's decoder first, then flate2 directly
                let data = match stream.decompressed_content() {
                    Ok(d) => d,
                    Err(_) => self
                        .manual_inflate(&stream.content)
                        .map_err(|e| format!("FlateDecode解压失败: {}", e))?,
                };
                self.pixels(doc, &stream.dict, &data, width, height)
            }
            Some(other) => Err(format!("不支持的编码: {}", other)),
            None => {
                if stream.content.is_empty() {
                    return Err("图片数据为空".into());
                }
                self.pixels(doc, &stream.dict, &stream.content, width, height)
            }
        }
    }

    /// 原始像素数据转换为 DynamicImage，支持 Indexed 调色板
    fn pixels(&self, doc: &Document, dict: &Dictionary, data: &[u8], width: u32, height: u32) -> Result<DecodedImage, String> {
        let bits = dict
            .get(b"BitsPerComponent")
            .ok()
            .and_then(|b| b.as_i64().ok())
            .unwrap_or(8) as usize;
        let (w, h) = (width as usize, height as usize);

        if let Some(rgb) = self.try_decode_indexed(dict, doc, data, w, h, bits) {
            let expected = w * h * 3;
            if rgb.len() >= expected {
                if let Some(img) = image::RgbImage::from_raw(width, height, rgb[..expected].to_vec()) {
                    return Ok(DecodedImage::Pixels(image::DynamicImage::ImageRgb8(img)));
                }
            }
        }

        let channels = self.get_color_channels(dict, doc) as usize;
        let expected = w * h * channels * bits / 8;
        if data.len() < expected {
            return Err(format!(
                "图片数据不匹配: {} < {} ({}x{}, ch={}, bits={})",
                data.len(),
                expected,
                width,
                height,
                channels,
                bits
            ));
        }

        let raw = data[..expected].to_vec();
        let img = match channels {
            1 => image::GrayImage::from_raw(width, height, raw).map(image::DynamicImage::ImageLuma8),
            3 => image::RgbImage::from_raw(width, height, raw).map(image::DynamicImage::ImageRgb8),
            4 => image::RgbaImage::from_raw(width, height, raw).map(image::DynamicImage::ImageRgba8),
            _ => return Err(format!("不支持的通道数: {}", channels)),
        };
        img.map(DecodedImage::Pixels)
            .ok_or_else(|| format!("无法创建图片 ({}x{}, ch={})", width, height, channels))
    }

    /// 手动使用 flate2 解压数据（lopdf 的 decompressed_content 有时会失败）
    fn manual_inflate(&self, compressed: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut result = Vec::new();
        if flate2::read::ZlibDecoder::new(compressed).read_to_end(&mut result).is_ok() {
            return Ok(result);
        }

        // Raw deflate, no zlib header.
        result.clear();
        flate2::read::DeflateDecoder::new(compressed).read_to_end(&mut result)?;
        Ok(result)
    }

    /// Indexed 调色板图片解码为 RGB
    /// 格式: [/Indexed base hival lookup]，每像素 1 字节索引
    fn try_decode_indexed(
        &self,
        dict: &Dictionary,
        doc: &Document,
        data: &[u8],
        width: usize,
        height: usize,
        bits: usize,
    ) -> Option<Vec<u8>> {
        let cs_obj = dict.get(b"ColorSpace").ok()?;
        let arr = cs_obj.as_array().ok()?;

        if arr.first()?.as_name().ok()? != b"Indexed" {
            return None;
        }

        let hival = arr.get(2)?.as_i64().ok()? as usize;
        let base_channels = arr
            .get(1)
            .and_then(|cs| cs.as_name().ok())
            .map(|name| Self::channels_from_name(std::str::from_utf8(name).unwrap_or("DeviceRGB")) as usize)
            .unwrap_or(3);

        let lookup: Vec<u8> = match arr.get(3)? {
            Object::String(bytes, _) => bytes.clone(),
            Object::Stream(stream) => stream.decompressed_content().unwrap_or_else(|_| stream.content.clone()),
            Object::Reference(id) => match doc.get_object(*id).ok()? {
                Object::String(bytes, _) => bytes.clone(),
                Object::Stream(stream) => stream.decompressed_content().unwrap_or_else(|_| stream.content.clone()),
                _ => return None,
            },
            _ => return None,
        };

        if lookup.len() < (hival + 1) * base_channels {
            debug!("Indexed lookup表太小: {} < {}", lookup.len(), (hival + 1) * base_channels);
            return None;
        }

        let pixel_count = width * height;
        let bytes_per_row = (width * bits + 7) / 8;
        if data.len() < bytes_per_row * height || data.len() < pixel_count {
            debug!("Indexed图片数据不足: {}", data.len());
            return None;
        }

        let mut rgb = Vec::with_capacity(pixel_count * base_channels);
        for &byte in &data[..pixel_count] {
            let offset = (byte as usize).min(hival) * base_channels;
            rgb.extend_from_slice(&lookup[offset..offset + base_channels]);
        }
        Some(rgb)
    }

    /// 获取 Filter 名称，处理 Name 和 Array 两种格式
    fn get_filter_name(&self, dict: &Dictionary) -> Option<String> {
        let filter_obj = dict.get(b"Filter").ok()?;

        if let Ok(name_bytes) = filter_obj.as_name() {
            return std::str::from_utf8(name_bytes).ok().map(str::to_string);
        }

        // e.g. [/ASCII85Decode /DCTDecode]
        let arr = filter_obj.as_array().ok()?;
        let names: Vec<&str> = arr
            .iter()
            .filter_map(|item| item.as_name().ok())
            .filter_map(|n| std::str::from_utf8(n).ok())
            .collect();
        names
            .iter()
            .rev()
            .find(|n| matches!(**n, "DCTDecode" | "JPXDecode" | "CCITTFaxDecode"))
            .or_else(|| names.first())
            .map(|n| n.to_string())
    }

    /// 获取颜色通道数
    fn get_color_channels(&self, dict: &Dictionary, doc: &Document) -> u32 {
        let cs_obj = match dict.get(b"ColorSpace") {
            Ok(obj) => obj,
            Err(_) => return 3,
        };

        if let Ok(name_bytes) = cs_obj.as_name() {
            return Self::channels_from_name(std::str::from_utf8(name_bytes).unwrap_or(""));
        }

        if let Ok(arr) = cs_obj.as_array() {
            let name = arr
                .first()
                .and_then(|f| f.as_name().ok())
                .and_then(|n| std::str::from_utf8(n).ok())
                .unwrap_or("");
            return match name {
                "ICCBased" => arr
                    .get(1)
                    .and_then(|r| r.as_reference().ok())
                    .and_then(|id| doc.get_object(id).ok())
                    .and_then(|o| o.as_stream().ok())
                    .and_then(|s| s.dict.get(b"N").ok())
                    .and_then(|n| n.as_i64().ok())
                    .map(|n| n as u32)
                    .unwrap_or(3),
                "Indexed" | "CalRGB" | "Lab" => 3,
                "CalGray" => 1,
                "DeviceN" => arr
                    .get(1)
                    .and_then(|names| names.as_array().ok())
                    .map(|names| names.len() as u32)
                    .unwrap_or(3),
                other => Self::channels_from_name(other),
            };
        }

        if let Ok(ref_id) = cs_obj.as_reference() {
            if let Ok(name_bytes) = doc.get_object(ref_id).and_then(|o| o.as_name()) {
                return Self::channels_from_name(std::str::from_utf8(name_bytes).unwrap_or(""));
            }
        }

        warn!("无法识别的颜色空间，按 RGB 处理");
        3
    }

    fn channels_from_name(name: &str) -> u32 {
        match name {
            "DeviceGray" | "CalGray" | "G" => 1,
            "DeviceRGB" | "CalRGB" | "RGB" => 3,
            "DeviceCMYK" | "CMYK" => 4,
            _ => 3,
        }
    }
}

fn dict_u32(dict: &Dictionary, key: &[u8]) -> u32 {
    dict.get(key).ok().and_then(|v| v.as_i64().ok()).unwrap_or(0).max(0) as u32
}
