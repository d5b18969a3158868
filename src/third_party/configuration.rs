//! 故事配置：INI 风格的分节键值，按节的优先级查找。
//!
//! 优先级（低 → 高）：`injected` < `defaults` < `<format>` < `<site>` < `<site>:<format>` < `overrides`。
//! 任意节里的 `add_to_<key>` 都会追加到最终值后面（按优先级从低到高）。

use std::collections::BTreeMap;

use regex::Regex;
use std::sync::OnceLock;

pub const SECTION_INJECTED: &str = "injected";
pub const SECTION_DEFAULTS: &str = "defaults";
pub const SECTION_OVERRIDES: &str = "overrides";

static RE_SECTION: OnceLock<Regex> = OnceLock::new();
static RE_ENTRY: OnceLock<Regex> = OnceLock::new();

fn re_section() -> &'static Regex {
    RE_SECTION.get_or_init(|| Regex::new(r"^\[([^\]]+)\]\s*$").expect("compile RE_SECTION"))
}

fn re_entry() -> &'static Regex {
    RE_ENTRY.get_or_init(|| Regex::new(r"^([^:=\s][^:=]*?)\s*[:=]\s?(.*)$").expect("compile RE_ENTRY"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    site: String,
    format: String,
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl Configuration {
    pub fn new(site: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            format: format.into(),
            sections: BTreeMap::new(),
        }
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    /// Section names from lowest to highest precedence.
    pub fn precedence(&self) -> Vec<String> {
        vec![
            SECTION_INJECTED.to_string(),
            SECTION_DEFAULTS.to_string(),
            self.format.clone(),
            self.site.clone(),
            format!("{}:{}", self.site, self.format),
            SECTION_OVERRIDES.to_string(),
        ]
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(name)
    }

    /// Returns true when the section existed.
    pub fn remove_section(&mut self, name: &str) -> bool {
        self.sections.remove(name).is_some()
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// 读取 INI 文本并合并进当前配置（同名键覆盖）。
    pub fn read_str(&mut self, text: &str) {
        let mut current: Option<String> = None;
        let mut last_key: Option<String> = None;

        for raw in text.lines() {
            let line = raw.trim_end();
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            // continuation line
            if line.starts_with([' ', '\t'])
                && let (Some(section), Some(key)) = (current.as_ref(), last_key.as_ref())
            {
                if let Some(value) = self
                    .sections
                    .get_mut(section)
                    .and_then(|s| s.get_mut(key))
                {
                    value.push('\n');
                    value.push_str(trimmed);
                }
                continue;
            }

            if let Some(caps) = re_section().captures(trimmed) {
                let name = caps[1].trim().to_string();
                self.sections.entry(name.clone()).or_default();
                current = Some(name);
                last_key = None;
                continue;
            }

            let Some(section) = current.as_ref() else {
                continue;
            };
            if let Some(caps) = re_entry().captures(trimmed) {
                let key = caps[1].trim().to_string();
                let value = caps[2].trim().to_string();
                self.set(section, &key, value);
                last_key = Some(key);
            }
        }
    }

    /// 取值：优先级最高的节给出基础值，随后所有节的 `add_to_<key>` 依次追加。
    pub fn get_config(&self, key: &str) -> Option<String> {
        let add_key = format!("add_to_{key}");
        let order = self.precedence();
        let mut value = order
            .iter()
            .rev()
            .find_map(|name| self.sections.get(name)?.get(key).cloned());
        for name in &order {
            if let Some(extra) = self.sections.get(name).and_then(|s| s.get(&add_key)) {
                value.get_or_insert_with(String::new).push_str(extra);
            }
        }
        value
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get_config(key)
            .map(|v| {
                matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "true" | "1" | "yes" | "on"
                )
            })
            .unwrap_or(false)
    }

    /// Comma separated list value, empty entries dropped.
    pub fn get_config_list(&self, key: &str) -> Vec<String> {
        self.get_config(key)
            .map(|v| {
                v.split([',', '\n'])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
