use serde::{Deserialize, Serialize};
use std::fmt;

/// 时长单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DurationUnit {
    Days,
    Weeks,
}

/// 结构化时长（整数 + 单位）
///
/// 存储位置：config_kv（key='grace.policy'）中每个类别的 lookahead / grace。
/// 兼容历史字符串写法（如 "90 days"），但只在加载时解析一次，使用时不再解析。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDuration")]
pub struct DurationSpec {
    pub value: u32,
    pub unit: DurationUnit,
}

impl DurationSpec {
    pub fn days(value: u32) -> Self {
        Self {
            value,
            unit: DurationUnit::Days,
        }
    }

    pub fn weeks(value: u32) -> Self {
        Self {
            value,
            unit: DurationUnit::Weeks,
        }
    }

    /// 折算为天数
    pub fn as_days(&self) -> i64 {
        match self.unit {
            DurationUnit::Days => i64::from(self.value),
            DurationUnit::Weeks => i64::from(self.value) * 7,
        }
    }

    /// 解析历史字符串: "<n> day(s)" / "<n> week(s)" / "<n>d" / "<n>w"
    pub fn parse(raw: &str) -> Result<Self, String> {
        let text = raw.trim().to_lowercase();
        let digits_end = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        if digits_end == 0 {
            return Err(format!("时长缺少数值: '{}'", raw));
        }
        let value = text[..digits_end]
            .parse::<u32>()
            .map_err(|e| format!("时长数值非法: '{}' ({})", raw, e))?;

        let unit = match text[digits_end..].trim() {
            "" | "d" | "day" | "days" => DurationUnit::Days,
            "w" | "week" | "weeks" => DurationUnit::Weeks,
            other => return Err(format!("不支持的时长单位: '{}'", other)),
        };

        Ok(Self { value, unit })
    }
}

impl fmt::Display for DurationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            DurationUnit::Days => write!(f, "{} days", self.value),
            DurationUnit::Weeks => write!(f, "{} weeks", self.value),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Structured { value: u32, unit: DurationUnit },
    Legacy(String),
    Days(u32),
}

impl TryFrom<RawDuration> for DurationSpec {
    type Error = String;

    fn try_from(raw: RawDuration) -> Result<Self, Self::Error> {
        match raw {
            RawDuration::Structured { value, unit } => Ok(DurationSpec { value, unit }),
            RawDuration::Legacy(text) => DurationSpec::parse(&text),
            RawDuration::Days(value) => Ok(DurationSpec::days(value)),
        }
    }
}

/// 单个资质类别的宽限规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraceRule {
    /// 到期前可提前排程的时长
    pub lookahead: DurationSpec,

    /// 到期后仍视为及时的宽限时长
    pub grace: DurationSpec,
}

impl GraceRule {
    pub fn new(lookahead: DurationSpec, grace: DurationSpec) -> Self {
        Self { lookahead, grace }
    }
}
