//! 远程路径宏解析
//!
//! 远程目录模板里可以写 `{...}` 形式的宏，花括号内用 `/` 分段：
//! - `{time/%y%m%d}`：当前时间，按 strftime 格式化
//! - `{room_info/title}`：在录制元数据里逐级取值
//!
//! 不含 `/` 的花括号原样保留。

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::error::BackupError;

fn macro_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{[^}]*/[^}]*\}").expect("宏正则表达式无效"))
}

/// 使用当前时间展开模板
pub fn resolve(template: &str, context: &Value) -> Result<String, BackupError> {
    resolve_at(template, context, Local::now())
}

/// 使用指定时间展开模板
///
/// 每个宏都基于原始模板独立解析，任何一个宏失败则整体失败
pub fn resolve_at(
    template: &str,
    context: &Value,
    now: DateTime<Local>,
) -> Result<String, BackupError> {
    let mut resolved = String::with_capacity(template.len());
    let mut last_end = 0;

    for m in macro_pattern().find_iter(template) {
        let body = &m.as_str()[1..m.as_str().len() - 1];
        let segments: Vec<&str> = body.split('/').collect();

        let replacement = match segments.as_slice() {
            ["time", format @ ..] => format_time(&format.join("/"), now)?,
            keys => lookup(context, keys)?,
        };

        resolved.push_str(&template[last_end..m.start()]);
        resolved.push_str(&replacement);
        last_end = m.end();
    }

    resolved.push_str(&template[last_end..]);
    Ok(resolved)
}

fn format_time(format: &str, now: DateTime<Local>) -> Result<String, BackupError> {
    let items: Vec<Item> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(BackupError::Macro(format!("无效的时间格式: {}", format)));
    }
    Ok(now.format_with_items(items.into_iter()).to_string())
}

fn lookup(context: &Value, keys: &[&str]) -> Result<String, BackupError> {
    let mut current = context;
    for key in keys {
        let next = match current {
            Value::Object(map) => map.get(*key),
            Value::Array(list) => key.parse::<usize>().ok().and_then(|i| list.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| {
            BackupError::Macro(format!("元数据中不存在 {}（宏 {{{}}}）", key, keys.join("/")))
        })?;
    }

    Ok(match current {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
