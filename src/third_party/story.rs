//! 故事元数据。

use std::collections::BTreeMap;

use anyhow::anyhow;
use serde_json::{Map, Value};

use super::StoryError;

pub const META_NUM_CHAPTERS: &str = "numChapters";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Story {
    metadata: BTreeMap<String, Value>,
}

impl Story {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Metadata as display text; lists are joined with `", "`.
    pub fn get_metadata(&self, key: &str) -> Option<String> {
        self.metadata.get(key).map(value_text)
    }

    /// `numChapters` 可能带千位分隔符（例如 `1,024`）。
    pub fn num_chapters(&self) -> Result<usize, StoryError> {
        let raw = self
            .get_metadata(META_NUM_CHAPTERS)
            .ok_or_else(|| anyhow!("story has no {META_NUM_CHAPTERS} metadata"))?;
        let cleaned = raw.replace(',', "");
        cleaned
            .trim()
            .parse::<usize>()
            .map_err(|e| anyhow!("invalid {META_NUM_CHAPTERS} {raw:?}: {e}").into())
    }

    pub fn all_metadata(&self, remove_all_entities: bool) -> Map<String, Value> {
        self.metadata
            .iter()
            .map(|(k, v)| {
                let v = if remove_all_entities {
                    strip_entities(v)
                } else {
                    v.clone()
                };
                (k.clone(), v)
            })
            .collect()
    }

    pub fn dump_html_metadata(&self) -> String {
        let mut out = String::from("<div class='fff_metadata'>\n");
        for (key, value) in &self.metadata {
            out.push_str(&format!(
                "<div class='{}'><b>{}:</b> {}</div>\n",
                key,
                key,
                html_escape(&value_text(value))
            ));
        }
        out.push_str("</div>\n");
        out
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

fn strip_entities(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(unescape_entities(s)),
        Value::Array(items) => Value::Array(items.iter().map(strip_entities).collect()),
        other => other.clone(),
    }
}

fn unescape_entities(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn num_chapters_accepts_thousands_separator() {
        let mut story = Story::new();
        story.set_metadata(META_NUM_CHAPTERS, "1,024");
        assert_eq!(story.num_chapters().unwrap(), 1024);

        story.set_metadata(META_NUM_CHAPTERS, 12);
        assert_eq!(story.num_chapters().unwrap(), 12);
    }

    #[test]
    fn num_chapters_missing_is_failure() {
        let story = Story::new();
        assert!(matches!(story.num_chapters(), Err(StoryError::Failed(_))));
    }

    #[test]
    fn all_metadata_strips_entities_on_request() {
        let mut story = Story::new();
        story.set_metadata("title", "Tom &amp; Jerry");
        story.set_metadata("genre", json!(["Humor", "Slice &lt;of&gt; Life"]));

        let clean = story.all_metadata(true);
        assert_eq!(clean["title"], json!("Tom & Jerry"));
        assert_eq!(clean["genre"], json!(["Humor", "Slice <of> Life"]));

        let raw = story.all_metadata(false);
        assert_eq!(raw["title"], json!("Tom &amp; Jerry"));
    }

    #[test]
    fn html_dump_lists_every_key() {
        let mut story = Story::new();
        story.set_metadata("title", "A <b> B");
        story.set_metadata("version", "4.2.0");
        let html = story.dump_html_metadata();
        assert!(html.contains("<b>title:</b> A &lt;b&gt; B"));
        assert!(html.contains("<b>version:</b> 4.2.0"));
    }
}
