//! Byte-level EPUB package assembly.
//!
//! Readers rely on the first archive entry being an uncompressed `mimetype`
//! for fast format detection, so the package is assembled entry by entry in
//! a fixed order: mimetype, container pointer, stylesheet, navigation,
//! chapters, images, manifest.

use super::sanitize::package_image_name;
use crate::cover::sniff_image_format;
use anyhow::{Context, Result};
use image::ImageFormat;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Exact content of the mimetype entry.
pub const EPUB_MIMETYPE: &str = "application/epub+zip";

pub struct PackageMeta {
    pub identifier: String,
    pub title: String,
    pub authors: Vec<String>,
    pub language: Option<String>,
}

/// One chapter, already sanitized, ready for templating.
pub struct PackageChapter {
    pub title: String,
    pub body: String,
}

pub struct PackageImage {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Assemble a complete EPUB archive in memory.
pub fn assemble_epub(
    meta: &PackageMeta,
    chapters: &[PackageChapter],
    images: &[PackageImage],
    cover_image: Option<&str>,
) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    // Must be the first entry and must not be compressed.
    writer
        .start_file("mimetype", stored)
        .context("Failed to start mimetype entry")?;
    writer.write_all(EPUB_MIMETYPE.as_bytes())?;

    writer.start_file("META-INF/container.xml", deflated)?;
    writer.write_all(CONTAINER_XML.as_bytes())?;

    writer.start_file("OEBPS/styles.css", deflated)?;
    writer.write_all(STYLESHEET.as_bytes())?;

    writer.start_file("OEBPS/nav.xhtml", deflated)?;
    writer.write_all(nav_document(&meta.title, chapters).as_bytes())?;

    for (i, chapter) in chapters.iter().enumerate() {
        writer.start_file(format!("OEBPS/{}", chapter_file_name(i)), deflated)?;
        writer.write_all(chapter_document(chapter).as_bytes())?;
    }

    for image in images {
        writer.start_file(format!("OEBPS/images/{}", image.name), deflated)?;
        writer.write_all(&image.bytes)?;
    }

    writer.start_file("OEBPS/content.opf", deflated)?;
    writer.write_all(manifest_document(meta, chapters, images, cover_image).as_bytes())?;

    let cursor = writer.finish().context("Failed to finalize package")?;
    Ok(cursor.into_inner())
}

pub fn chapter_file_name(index: usize) -> String {
    format!("chapter-{:03}.xhtml", index + 1)
}

/// Wrap source image bytes into a named package image.
pub fn package_image(index: usize, bytes: &[u8]) -> PackageImage {
    PackageImage {
        name: package_image_name(index),
        bytes: bytes.to_vec(),
    }
}

fn image_media_type(bytes: &[u8]) -> &'static str {
    match sniff_image_format(bytes) {
        Some(ImageFormat::Png) => "image/png",
        Some(ImageFormat::Gif) => "image/gif",
        Some(ImageFormat::WebP) => "image/webp",
        Some(ImageFormat::Bmp) => "image/bmp",
        Some(ImageFormat::Tiff) => "image/tiff",
        _ => "image/jpeg",
    }
}

fn xml_escape(text: &str) -> String {
    html_escape::encode_quoted_attribute(text).into_owned()
}

fn chapter_document(chapter: &PackageChapter) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="styles.css"/>
</head>
<body>
<section>
{body}
</section>
</body>
</html>
"#,
        title = xml_escape(&chapter.title),
        body = chapter.body,
    )
}

fn nav_document(title: &str, chapters: &[PackageChapter]) -> String {
    let mut items = String::new();
    for (i, chapter) in chapters.iter().enumerate() {
        items.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            chapter_file_name(i),
            xml_escape(&chapter.title),
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>{title}</title></head>
<body>
  <nav epub:type="toc" id="toc">
    <ol>
{items}    </ol>
  </nav>
</body>
</html>
"#,
        title = xml_escape(title),
        items = items,
    )
}

fn manifest_document(
    meta: &PackageMeta,
    chapters: &[PackageChapter],
    images: &[PackageImage],
    cover_image: Option<&str>,
) -> String {
    let mut creators = String::new();
    for (i, author) in meta.authors.iter().enumerate() {
        creators.push_str(&format!(
            "    <dc:creator id=\"creator-{}\">{}</dc:creator>\n",
            i + 1,
            xml_escape(author),
        ));
    }

    let mut manifest = String::from(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n\
         \x20   <item id=\"css\" href=\"styles.css\" media-type=\"text/css\"/>\n",
    );
    let mut spine = String::new();
    for (i, _) in chapters.iter().enumerate() {
        manifest.push_str(&format!(
            "    <item id=\"chapter-{i}\" href=\"{href}\" media-type=\"application/xhtml+xml\"/>\n",
            i = i + 1,
            href = chapter_file_name(i),
        ));
        spine.push_str(&format!("    <itemref idref=\"chapter-{}\"/>\n", i + 1));
    }
    for (i, image) in images.iter().enumerate() {
        let properties = if cover_image == Some(image.name.as_str()) {
            " properties=\"cover-image\""
        } else {
            ""
        };
        manifest.push_str(&format!(
            "    <item id=\"image-{i}\" href=\"images/{name}\" media-type=\"{media}\"{properties}/>\n",
            i = i + 1,
            name = image.name,
            media = image_media_type(&image.bytes),
            properties = properties,
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="pub-id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="pub-id">urn:uuid:{identifier}</dc:identifier>
    <dc:title>{title}</dc:title>
{creators}    <dc:language>{language}</dc:language>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine>
{spine}  </spine>
</package>
"#,
        identifier = xml_escape(&meta.identifier),
        title = xml_escape(&meta.title),
        creators = creators,
        language = xml_escape(meta.language.as_deref().unwrap_or("en")),
        manifest = manifest,
        spine = spine,
    )
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

const STYLESHEET: &str = r#"body { font-family: serif; line-height: 1.5; margin: 1em; }
h1, h2, h3 { font-family: sans-serif; }
img { max-width: 100%; }
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn sample_meta() -> PackageMeta {
        PackageMeta {
            identifier: "test-id".to_string(),
            title: "A Book & Title".to_string(),
            authors: vec!["First Author".to_string(), "Second Author".to_string()],
            language: Some("en".to_string()),
        }
    }

    fn sample_chapters() -> Vec<PackageChapter> {
        vec![
            PackageChapter {
                title: "One".to_string(),
                body: "<p>first</p>".to_string(),
            },
            PackageChapter {
                title: "Two".to_string(),
                body: "<p>second</p>".to_string(),
            },
        ]
    }

    fn read_entry(archive: &mut zip::ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
        let mut entry = archive.by_name(name).unwrap();
        let mut out = String::new();
        entry.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_mimetype_is_first_and_stored() {
        let bytes = assemble_epub(&sample_meta(), &sample_chapters(), &[], None).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
        drop(first);

        assert_eq!(read_entry(&mut archive, "mimetype"), EPUB_MIMETYPE);
    }

    #[test]
    fn test_container_points_at_manifest() {
        let bytes = assemble_epub(&sample_meta(), &sample_chapters(), &[], None).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let container = read_entry(&mut archive, "META-INF/container.xml");
        assert!(container.contains("OEBPS/content.opf"));
    }

    #[test]
    fn test_manifest_declares_every_chapter_in_spine_order() {
        let bytes = assemble_epub(&sample_meta(), &sample_chapters(), &[], None).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let opf = read_entry(&mut archive, "OEBPS/content.opf");
        assert!(opf.contains("chapter-001.xhtml"));
        assert!(opf.contains("chapter-002.xhtml"));
        let one = opf.find("<itemref idref=\"chapter-1\"/>").unwrap();
        let two = opf.find("<itemref idref=\"chapter-2\"/>").unwrap();
        assert!(one < two);
        assert!(opf.contains("A Book &amp; Title"));
    }

    #[test]
    fn test_cover_image_gets_manifest_property() {
        let png = {
            let img = image::RgbImage::from_pixel(4, 4, image::Rgb([1, 2, 3]));
            let mut out = Cursor::new(Vec::new());
            img.write_to(&mut out, ImageFormat::Png).unwrap();
            out.into_inner()
        };
        let images = vec![package_image(0, &png)];
        let bytes =
            assemble_epub(&sample_meta(), &sample_chapters(), &images, Some("image-000.img"))
                .unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let opf = read_entry(&mut archive, "OEBPS/content.opf");
        assert!(opf.contains("properties=\"cover-image\""));
        assert!(opf.contains("media-type=\"image/png\""));
        assert!(archive.by_name("OEBPS/images/image-000.img").is_ok());
    }

    #[test]
    fn test_navigation_lists_chapter_titles() {
        let bytes = assemble_epub(&sample_meta(), &sample_chapters(), &[], None).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let nav = read_entry(&mut archive, "OEBPS/nav.xhtml");
        assert!(nav.contains(">One</a>"));
        assert!(nav.contains(">Two</a>"));
        assert!(nav.contains("chapter-002.xhtml"));
    }
}
