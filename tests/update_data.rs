use std::fs::File;
use std::io::Write;
use std::path::Path;

use fanfic_jobs::third_party::{StoryError, UpdateData};
use zip::CompressionMethod;
use zip::write::FileOptions;

const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="fanficfare-uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Example Story</dc:title>
    <dc:identifier id="fanficfare-uid">fanficfare-uid:example-1</dc:identifier>
    <dc:source>https://www.example.com/s/1</dc:source>
    <meta name="cover" content="image0000"/>
  </metadata>
  <manifest>
    <item id="style" href="OEBPS/stylesheet.css" media-type="text/css"/>
    <item id="image0000" href="OEBPS/images/cover.jpg" media-type="image/jpeg"/>
    <item id="image0001" href="OEBPS/images/map.png" media-type="image/png"/>
    <item id="title_page" href="OEBPS/title_page.xhtml" media-type="application/xhtml+xml"/>
    <item id="log_page" href="OEBPS/log_page.xhtml" media-type="application/xhtml+xml"/>
    <item id="file0001" href="OEBPS/file0001.xhtml" media-type="application/xhtml+xml"/>
    <item id="file0002" href="OEBPS/file0002.xhtml" media-type="application/xhtml+xml"/>
    <item id="file0003" href="OEBPS/file0003.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
</package>
"#;

const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

fn chapter(n: usize) -> String {
    format!("<html><head><title>c{n}</title></head><body>\n<h3>Chapter {n}</h3><p>text {n}</p>\n</body></html>")
}

fn write_epub(path: &Path, with_bookmark: bool) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    let opts = FileOptions::default().compression_method(CompressionMethod::Stored);
    let mut add = |name: &str, bytes: &[u8]| {
        zip.start_file(name, opts).unwrap();
        zip.write_all(bytes).unwrap();
    };
    add("mimetype", b"application/epub+zip");
    add("META-INF/container.xml", CONTAINER.as_bytes());
    add("content.opf", OPF.as_bytes());
    add("OEBPS/stylesheet.css", b"body {}");
    add("OEBPS/images/cover.jpg", &[0xff, 0xd8, 0xff, 0xe0]);
    add("OEBPS/images/map.png", &[0x89, b'P', b'N', b'G']);
    add("OEBPS/title_page.xhtml", b"<html><body>title</body></html>");
    add(
        "OEBPS/log_page.xhtml",
        br#"<html><body><p><span id="dateUpdated">2020-01-01</span></p></body></html>"#,
    );
    for n in 1..=3 {
        add(&format!("OEBPS/file{n:04}.xhtml"), chapter(n).as_bytes());
    }
    if with_bookmark {
        add("META-INF/calibre_bookmarks.txt", b"pos:42");
    }
    zip.finish().unwrap();
}

#[test]
fn reads_chapters_images_cover_and_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("story.epub");
    write_epub(&path, true);

    let data = UpdateData::read_epub(&path).unwrap();
    assert_eq!(data.url.as_deref(), Some("https://www.example.com/s/1"));
    assert_eq!(data.chapter_count, 3);
    assert_eq!(data.old_chapters.len(), 3);
    assert!(data.old_chapters[1].contains("Chapter 2"));
    assert!(!data.old_chapters[1].contains("<body>"));

    assert_eq!(data.old_images.len(), 2);
    let (cover_href, cover) = data.old_cover.clone().unwrap();
    assert_eq!(cover_href, "OEBPS/images/cover.jpg");
    assert_eq!(cover, vec![0xff, 0xd8, 0xff, 0xe0]);

    assert_eq!(data.calibre_bookmark.as_deref(), Some("pos:42"));
    assert!(data.logfile.unwrap().contains(r#"<span id="dateUpdated">"#));
}

#[test]
fn bookmark_is_optional() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("story.epub");
    write_epub(&path, false);
    let data = UpdateData::read_epub(&path).unwrap();
    assert_eq!(data.calibre_bookmark, None);
    assert_eq!(data.chapter_count, 3);
}

#[test]
fn non_epub_is_an_unexpected_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("story.epub");
    std::fs::write(&path, "not a zip file").unwrap();
    let err = UpdateData::read_epub(&path).unwrap_err();
    assert!(!matches!(err, StoryError::NotGoingToDownload { .. }));

    let missing = UpdateData::read_epub(&dir.path().join("missing.epub")).unwrap_err();
    assert!(matches!(missing, StoryError::Io(_)));
}
