//! 从已有 EPUB 中读取更新所需的数据。
//!
//! 读取内容：来源 url、章节数与章节正文、图片、封面、书签、日志页片段。
//! 章节文件按 `fileNNNN.xhtml` 命名识别，日志页为 `log_page.xhtml`。

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::anyhow;
use regex::Regex;
use tracing::debug;

use super::StoryError;

const CONTAINER_XML: &str = "META-INF/container.xml";
const CALIBRE_BOOKMARKS: &str = "META-INF/calibre_bookmarks.txt";
const LOG_PAGE: &str = "log_page.xhtml";

static RE_ROOTFILE: OnceLock<Regex> = OnceLock::new();
static RE_SOURCE: OnceLock<Regex> = OnceLock::new();
static RE_URL_IDENTIFIER: OnceLock<Regex> = OnceLock::new();
static RE_ITEM: OnceLock<Regex> = OnceLock::new();
static RE_ATTR: OnceLock<Regex> = OnceLock::new();
static RE_COVER_META: OnceLock<Regex> = OnceLock::new();
static RE_CHAPTER_FILE: OnceLock<Regex> = OnceLock::new();
static RE_BODY: OnceLock<Regex> = OnceLock::new();

fn re_rootfile() -> &'static Regex {
    RE_ROOTFILE.get_or_init(|| Regex::new(r#"full-path="([^"]+)""#).expect("compile RE_ROOTFILE"))
}

fn re_source() -> &'static Regex {
    RE_SOURCE.get_or_init(|| {
        Regex::new(r"<dc:source[^>]*>\s*([^<]+?)\s*</dc:source>").expect("compile RE_SOURCE")
    })
}

fn re_url_identifier() -> &'static Regex {
    RE_URL_IDENTIFIER.get_or_init(|| {
        Regex::new(r#"<dc:identifier[^>]*scheme="URL"[^>]*>\s*([^<]+?)\s*</dc:identifier>"#)
            .expect("compile RE_URL_IDENTIFIER")
    })
}

fn re_item() -> &'static Regex {
    RE_ITEM.get_or_init(|| Regex::new(r"<item\s[^>]*>").expect("compile RE_ITEM"))
}

fn re_attr() -> &'static Regex {
    RE_ATTR.get_or_init(|| {
        Regex::new(r#"([A-Za-z:-]+)\s*=\s*"([^"]*)""#).expect("compile RE_ATTR")
    })
}

fn re_cover_meta() -> &'static Regex {
    RE_COVER_META.get_or_init(|| {
        Regex::new(r#"<meta\s+name="cover"\s+content="([^"]+)""#).expect("compile RE_COVER_META")
    })
}

fn re_chapter_file() -> &'static Regex {
    RE_CHAPTER_FILE
        .get_or_init(|| Regex::new(r"(?:^|/)file\d+\.x?html$").expect("compile RE_CHAPTER_FILE"))
}

fn re_body() -> &'static Regex {
    RE_BODY.get_or_init(|| Regex::new(r"(?s)<body[^>]*>(.*)</body>").expect("compile RE_BODY"))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateData {
    pub url: Option<String>,
    pub chapter_count: usize,
    /// Chapter bodies in manifest order.
    pub old_chapters: Vec<String>,
    /// href (relative to the OPF) -> image bytes
    pub old_images: BTreeMap<String, Vec<u8>>,
    pub old_cover: Option<(String, Vec<u8>)>,
    pub calibre_bookmark: Option<String>,
    pub logfile: Option<String>,
}

#[derive(Debug)]
struct ManifestItem {
    id: String,
    href: String,
    media_type: String,
}

impl UpdateData {
    pub fn read_epub(path: &Path) -> Result<Self, StoryError> {
        let file = File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        let container = read_text(&mut archive, CONTAINER_XML)?
            .ok_or_else(|| anyhow!("{} has no {CONTAINER_XML}", path.display()))?;
        let opf_path = re_rootfile()
            .captures(&container)
            .map(|c| c[1].to_string())
            .ok_or_else(|| anyhow!("{} has no rootfile", path.display()))?;
        let opf = read_text(&mut archive, &opf_path)?
            .ok_or_else(|| anyhow!("{} missing {opf_path}", path.display()))?;
        let base = opf_path
            .rsplit_once('/')
            .map(|(dir, _)| format!("{dir}/"))
            .unwrap_or_default();

        let url = re_source()
            .captures(&opf)
            .or_else(|| re_url_identifier().captures(&opf))
            .map(|c| c[1].to_string());

        let items = manifest_items(&opf);
        let cover_id = re_cover_meta().captures(&opf).map(|c| c[1].to_string());

        let mut data = UpdateData {
            url,
            ..Default::default()
        };

        for item in &items {
            let full = format!("{base}{}", item.href);
            if re_chapter_file().is_match(&item.href) {
                let html = read_text(&mut archive, &full)?.unwrap_or_default();
                data.old_chapters.push(body_of(&html));
            } else if item.media_type.starts_with("image/") {
                let Some(bytes) = read_bytes(&mut archive, &full)? else {
                    continue;
                };
                if cover_id.as_deref() == Some(item.id.as_str()) {
                    data.old_cover = Some((item.href.clone(), bytes.clone()));
                }
                data.old_images.insert(item.href.clone(), bytes);
            } else if item.href.ends_with(LOG_PAGE) {
                data.logfile = read_text(&mut archive, &full)?.map(|html| body_of(&html));
            }
        }
        data.chapter_count = data.old_chapters.len();
        data.calibre_bookmark = read_text(&mut archive, CALIBRE_BOOKMARKS)?;

        debug!(
            target: "update_data",
            path = %path.display(),
            chapters = data.chapter_count,
            images = data.old_images.len(),
            "读取已有 EPUB"
        );
        Ok(data)
    }
}

fn manifest_items(opf: &str) -> Vec<ManifestItem> {
    re_item()
        .find_iter(opf)
        .filter_map(|m| {
            let mut id = None;
            let mut href = None;
            let mut media_type = None;
            for caps in re_attr().captures_iter(m.as_str()) {
                match &caps[1] {
                    "id" => id = Some(caps[2].to_string()),
                    "href" => href = Some(caps[2].to_string()),
                    "media-type" => media_type = Some(caps[2].to_string()),
                    _ => {}
                }
            }
            Some(ManifestItem {
                id: id.unwrap_or_default(),
                href: href?,
                media_type: media_type.unwrap_or_default(),
            })
        })
        .collect()
}

fn body_of(html: &str) -> String {
    re_body()
        .captures(html)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| html.trim().to_string())
}

fn read_bytes<R: std::io::Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, StoryError> {
    let mut entry = match archive.by_name(name) {
        Ok(e) => e,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(Some(buf))
}

fn read_text<R: std::io::Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, StoryError> {
    Ok(read_bytes(archive, name)?.map(|b| String::from_utf8_lossy(&b).into_owned()))
}
