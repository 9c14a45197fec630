//! Chapter markup sanitization for package assembly.
//!
//! Legacy ebook markup is hostile input: scripts, event handlers, outer
//! document wrappers and bare ampersands would all produce an unparsable
//! package. Every chapter body passes through here before templating.

use regex::Regex;
use std::sync::OnceLock;

/// Clean one chapter's raw markup for embedding into an XHTML template.
pub fn sanitize_chapter_markup(markup: &str) -> String {
    let cleaned = block_regex().replace_all(markup, " ");
    let cleaned = wrapper_regex().replace_all(&cleaned, "");
    let cleaned = event_handler_regex().replace_all(&cleaned, "");
    let cleaned = pagebreak_regex().replace_all(&cleaned, "");
    let cleaned = rewrite_image_refs(&cleaned);
    escape_stray_ampersands(&cleaned)
}

/// Name of the flat in-package image for a source image index.
pub fn package_image_name(index: usize) -> String {
    format!("image-{:03}.img", index)
}

/// Rewrite image references to the flat `images/` path the package uses.
/// Legacy `recindex` attributes (1-based record references) become `src`
/// attributes; existing `src` paths are flattened to their file name.
fn rewrite_image_refs(markup: &str) -> String {
    let markup = recindex_regex().replace_all(markup, |caps: &regex::Captures| {
        match caps[1].trim_start_matches('0').parse::<usize>() {
            Ok(recindex) if recindex > 0 => {
                format!("src=\"images/{}\"", package_image_name(recindex - 1))
            }
            _ => String::new(),
        }
    });
    src_regex()
        .replace_all(&markup, |caps: &regex::Captures| {
            let name = caps[1].rsplit('/').next().unwrap_or(&caps[1]);
            format!("src=\"images/{}\"", name)
        })
        .into_owned()
}

/// Escape `&` characters that do not start a recognized entity.
fn escape_stray_ampersands(markup: &str) -> String {
    ampersand_regex()
        .replace_all(markup, |caps: &regex::Captures| {
            if caps.get(1).is_some() {
                caps[0].to_string()
            } else {
                "&amp;".to_string()
            }
        })
        .into_owned()
}

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|head)[^>]*>.*?</(script|style|head)>").unwrap()
    })
}

fn wrapper_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The package template supplies its own document shell.
    RE.get_or_init(|| Regex::new(r"(?i)</?(html|head|body)[^>]*>").unwrap())
}

fn event_handler_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\son[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#).unwrap())
}

fn pagebreak_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<mbp:pagebreak\s*/?>").unwrap())
}

fn recindex_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)recindex\s*=\s*["']?(\d+)["']?"#).unwrap())
}

fn src_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)src\s*=\s*["']([^"']+)["']"#).unwrap())
}

fn ampersand_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&(?:([a-zA-Z][a-zA-Z0-9]{1,31};|#\d+;|#x[0-9a-fA-F]+;))?").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_scripts_and_styles() {
        let markup = "<p>keep</p><script>alert(1)</script><style>p{}</style>";
        let out = sanitize_chapter_markup(markup);
        assert!(out.contains("<p>keep</p>"));
        assert!(!out.contains("script"));
        assert!(!out.contains("style"));
    }

    #[test]
    fn test_removes_document_wrappers() {
        let markup = "<html><body bgcolor=\"white\"><p>text</p></body></html>";
        let out = sanitize_chapter_markup(markup);
        assert_eq!(out.trim(), "<p>text</p>");
    }

    #[test]
    fn test_strips_event_handlers() {
        let markup = r#"<p onclick="evil()" onmouseover='x'>text</p>"#;
        assert_eq!(sanitize_chapter_markup(markup), "<p>text</p>");
    }

    #[test]
    fn test_rewrites_recindex_to_flat_image_path() {
        let markup = r#"<img recindex="00003" align="middle"/>"#;
        let out = sanitize_chapter_markup(markup);
        assert!(out.contains(r#"src="images/image-002.img""#), "{}", out);
        assert!(!out.contains("recindex"));
    }

    #[test]
    fn test_flattens_existing_src_paths() {
        let markup = r#"<img src="../deep/dir/pic.jpeg"/>"#;
        let out = sanitize_chapter_markup(markup);
        assert!(out.contains(r#"src="images/pic.jpeg""#));
    }

    #[test]
    fn test_escapes_stray_ampersands_only() {
        let markup = "<p>Fish &amp; chips & more &#169; &unknownword</p>";
        let out = sanitize_chapter_markup(markup);
        assert!(out.contains("Fish &amp; chips &amp; more &#169; &amp;unknownword"));
    }

    #[test]
    fn test_removes_pagebreak_remnants() {
        let markup = "<p>a</p><mbp:pagebreak/><p>b</p>";
        assert_eq!(sanitize_chapter_markup(markup), "<p>a</p><p>b</p>");
    }
}
