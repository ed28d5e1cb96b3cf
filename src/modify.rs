//! 修改请求的参数解析、范围校验与变换编排。
//!
//! 校验全部通过后才会解码图片；变换顺序固定为 缩放 → 旋转 → 对比度。

use image::DynamicImage;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::{MAX_CONTRAST_FACTOR, MAX_RESIZE_HEIGHT, MAX_RESIZE_WIDTH, MAX_ROTATE_ANGLE};
use crate::imaging::{self, TransformError};

#[derive(Debug, Error, PartialEq)]
pub enum ModifyError {
    #[error("No modifications provided")]
    NothingRequested,
    #[error("Invalid {0}: must be a non-negative number")]
    NotANumber(&'static str),
    #[error("Both width and height are required to resize")]
    BothDimensionsRequired,
    #[error("{0}")]
    OutOfRange(String),
}

/// 未经校验的原始字段，空白字符串视为未提供。
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawModifyFields {
    pub width: Option<String>,
    pub height: Option<String>,
    pub rotate: Option<String>,
    pub contrast: Option<String>,
}

/// JSON 形式：`{"resize": {"width", "height"}, "rotate": {"angle"}, "contrast": {"factor"}}`。
#[derive(Debug, Default, Deserialize)]
pub struct ModifyJson {
    resize: Option<ResizeJson>,
    rotate: Option<RotateJson>,
    contrast: Option<ContrastJson>,
}

#[derive(Debug, Default, Deserialize)]
struct ResizeJson {
    width: Option<Value>,
    height: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RotateJson {
    angle: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ContrastJson {
    factor: Option<Value>,
}

impl From<ModifyJson> for RawModifyFields {
    fn from(json: ModifyJson) -> Self {
        let (width, height) = json
            .resize
            .map(|resize| (value_text(resize.width), value_text(resize.height)))
            .unwrap_or_default();
        RawModifyFields {
            width,
            height,
            rotate: json.rotate.and_then(|rotate| value_text(rotate.angle)),
            contrast: json.contrast.and_then(|contrast| value_text(contrast.factor)),
        }
    }
}

fn value_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        other => Some(other.to_string()),
    }
}

/// 校验后的修改计划。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModifyPlan {
    pub resize: Option<(u32, u32)>,
    pub rotate: Option<u32>,
    pub contrast: Option<f32>,
}

impl ModifyPlan {
    pub fn parse(raw: &RawModifyFields) -> Result<Self, ModifyError> {
        let width = parse_number("width", raw.width.as_deref())?;
        let height = parse_number("height", raw.height.as_deref())?;
        let rotate = parse_number("rotate", raw.rotate.as_deref())?;
        let contrast = parse_number("contrast", raw.contrast.as_deref())?;

        if width.is_none() && height.is_none() && rotate.is_none() && contrast.is_none() {
            return Err(ModifyError::NothingRequested);
        }

        let resize = match (width, height) {
            (Some(width), Some(height)) => {
                let width = check_dimension("width", width.trunc(), MAX_RESIZE_WIDTH)?;
                let height = check_dimension("height", height.trunc(), MAX_RESIZE_HEIGHT)?;
                Some((width, height))
            }
            (None, None) => None,
            _ => return Err(ModifyError::BothDimensionsRequired),
        };

        let rotate = match rotate.map(f64::trunc) {
            Some(angle) if angle > f64::from(MAX_ROTATE_ANGLE) => {
                return Err(ModifyError::OutOfRange(format!(
                    "Rotation angle must be between 0 and {MAX_ROTATE_ANGLE}, got {angle}"
                )));
            }
            Some(angle) => Some(angle as u32),
            None => None,
        };

        let contrast = match contrast {
            Some(factor) if factor > f64::from(MAX_CONTRAST_FACTOR) => {
                return Err(ModifyError::OutOfRange(format!(
                    "Contrast factor must be between 0 and {MAX_CONTRAST_FACTOR}, got {factor}"
                )));
            }
            Some(factor) => Some(factor as f32),
            None => None,
        };

        Ok(ModifyPlan {
            resize,
            rotate,
            contrast,
        })
    }

    /// 依次应用缩放、旋转与对比度。
    pub fn apply(&self, image: DynamicImage) -> DynamicImage {
        let mut image = image;
        if let Some((width, height)) = self.resize {
            image = imaging::resize(image, width, height);
        }
        if let Some(angle) = self.rotate {
            image = imaging::rotate(image, angle);
        }
        if let Some(factor) = self.contrast {
            image = imaging::enhance_contrast(image, factor);
        }
        image
    }

    /// 解码、变换并按文件扩展名重新编码。
    pub fn run(&self, data: &[u8], name: &str) -> Result<Vec<u8>, TransformError> {
        let image = imaging::decode(data)?;
        let image = self.apply(image);
        imaging::encode_for_path(&image, name)
    }
}

fn parse_number(field: &'static str, raw: Option<&str>) -> Result<Option<f64>, ModifyError> {
    let Some(text) = raw.map(str::trim).filter(|text| !text.is_empty()) else {
        return Ok(None);
    };
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(Some(value)),
        _ => Err(ModifyError::NotANumber(field)),
    }
}

fn check_dimension(field: &str, value: f64, max: u32) -> Result<u32, ModifyError> {
    if value < 1.0 || value > f64::from(max) {
        return Err(ModifyError::OutOfRange(format!(
            "The {field} must be between 1 and {max}, got {value}"
        )));
    }
    Ok(value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn fields(width: &str, height: &str, rotate: &str, contrast: &str) -> RawModifyFields {
        let some = |value: &str| (!value.is_empty()).then(|| value.to_string());
        RawModifyFields {
            width: some(width),
            height: some(height),
            rotate: some(rotate),
            contrast: some(contrast),
        }
    }

    #[test]
    fn full_plan_truncates_to_integers() {
        let plan = ModifyPlan::parse(&fields("640.9", "480.2", "90.7", "1.5")).expect("plan");
        assert_eq!(plan.resize, Some((640, 480)));
        assert_eq!(plan.rotate, Some(90));
        assert_eq!(plan.contrast, Some(1.5));
    }

    #[test]
    fn width_alone_requires_height() {
        assert_eq!(
            ModifyPlan::parse(&fields("100", "", "", "")),
            Err(ModifyError::BothDimensionsRequired)
        );
        assert_eq!(
            ModifyPlan::parse(&fields("", "100", "", "")),
            Err(ModifyError::BothDimensionsRequired)
        );
    }

    #[test]
    fn numeric_type_is_checked_before_pairing() {
        assert_eq!(
            ModifyPlan::parse(&fields("wide", "", "", "")),
            Err(ModifyError::NotANumber("width"))
        );
        assert_eq!(
            ModifyPlan::parse(&fields("", "", "-5", "")),
            Err(ModifyError::NotANumber("rotate"))
        );
        assert_eq!(
            ModifyPlan::parse(&fields("", "", "", "NaN")),
            Err(ModifyError::NotANumber("contrast"))
        );
    }

    #[test]
    fn dimension_bounds() {
        assert!(matches!(
            ModifyPlan::parse(&fields("2000", "100", "", "")),
            Err(ModifyError::OutOfRange(_))
        ));
        assert!(matches!(
            ModifyPlan::parse(&fields("100", "1081", "", "")),
            Err(ModifyError::OutOfRange(_))
        ));
        assert!(matches!(
            ModifyPlan::parse(&fields("0", "100", "", "")),
            Err(ModifyError::OutOfRange(_))
        ));
        assert!(ModifyPlan::parse(&fields("1920", "1080", "", "")).is_ok());
    }

    #[test]
    fn rotate_bounds() {
        assert!(matches!(
            ModifyPlan::parse(&fields("", "", "360", "")),
            Err(ModifyError::OutOfRange(_))
        ));
        assert_eq!(
            ModifyPlan::parse(&fields("", "", "359.9", "")).map(|plan| plan.rotate),
            Ok(Some(359))
        );
    }

    #[test]
    fn contrast_bounds() {
        assert!(matches!(
            ModifyPlan::parse(&fields("", "", "", "10.01")),
            Err(ModifyError::OutOfRange(_))
        ));
        assert!(ModifyPlan::parse(&fields("", "", "", "10")).is_ok());
    }

    #[test]
    fn empty_request_is_rejected() {
        assert_eq!(
            ModifyPlan::parse(&RawModifyFields::default()),
            Err(ModifyError::NothingRequested)
        );
    }

    #[test]
    fn json_shape_accepts_numbers_and_strings() {
        let json: ModifyJson = serde_json::from_str(
            r#"{"resize": {"width": 30, "height": "20"}, "rotate": {"angle": 45}}"#,
        )
        .expect("json");
        let plan = ModifyPlan::parse(&json.into()).expect("plan");
        assert_eq!(plan.resize, Some((30, 20)));
        assert_eq!(plan.rotate, Some(45));
        assert_eq!(plan.contrast, None);
    }

    #[test]
    fn json_non_numeric_value_is_invalid() {
        let json: ModifyJson =
            serde_json::from_str(r#"{"contrast": {"factor": [1]}}"#).expect("json");
        assert_eq!(
            ModifyPlan::parse(&json.into()),
            Err(ModifyError::NotANumber("contrast"))
        );
    }

    #[test]
    fn apply_resizes_before_rotating() {
        let plan = ModifyPlan {
            resize: Some((10, 20)),
            rotate: Some(90),
            contrast: Some(1.2),
        };
        let out = plan.apply(DynamicImage::new_rgba8(50, 50));
        assert_eq!(out.dimensions(), (10, 20));
        assert!(matches!(out, DynamicImage::ImageRgb8(_)));
    }
}
