//! Document retrieval: HTTP fetch plus title/text extraction.
//!
//! Article pages are reduced to their title and visible text; YouTube URLs
//! get a single synthetic chunk holding the video description, since there is
//! no article body to split.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use url::Url;

use crate::types::SalmonError;

/// Text extracted from a fetched document.
#[derive(Clone, Debug)]
pub enum ExtractedText {
    /// Continuous article body, to be run through the splitter.
    Body(String),
    /// Pre-chunked synthetic text (e.g. a video description); stored as-is.
    Synthetic(Vec<String>),
}

/// Title and text of one fetched document.
#[derive(Clone, Debug)]
pub struct FetchedDocument {
    pub title: String,
    pub text: ExtractedText,
}

/// HTTP document fetcher.
#[derive(Clone, Debug)]
pub struct DocumentFetcher {
    client: Client,
}

impl DocumentFetcher {
    pub fn new() -> Result<Self, SalmonError> {
        let client = Client::builder()
            .user_agent(concat!("salmon-search/", env!("CARGO_PKG_VERSION")))
            .use_rustls_tls()
            .build()?;
        Ok(Self { client })
    }

    /// Uses a caller-provided client (custom timeouts, proxies, tests).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Downloads `url` and extracts its title and text.
    ///
    /// Network and HTTP-status failures surface as [`SalmonError::Upstream`];
    /// no store state is touched here.
    pub async fn fetch(&self, url: &Url) -> Result<FetchedDocument, SalmonError> {
        let html = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        if is_youtube(url) {
            extract_video(&html)
        } else {
            Ok(extract_article(&html))
        }
    }
}

/// YouTube URLs carry their description in the page source rather than in
/// the visible DOM.
fn is_youtube(url: &Url) -> bool {
    url.host_str()
        .map(|host| host.contains("youtube") || host.contains("youtu.be"))
        .unwrap_or(false)
}

fn extract_article(html: &str) -> FetchedDocument {
    let document = Html::parse_document(html);
    FetchedDocument {
        title: extract_title(&document),
        text: ExtractedText::Body(collapse_blank_runs(&visible_text(&document))),
    }
}

fn extract_video(html: &str) -> Result<FetchedDocument, SalmonError> {
    static DESCRIPTION: OnceLock<Regex> = OnceLock::new();
    let pattern = DESCRIPTION.get_or_init(|| {
        Regex::new(r#""shortDescription":"(.*?)","isCrawlable"#)
            .expect("description pattern is valid")
    });

    let description = pattern
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace("\\n", "\n"))
        .ok_or_else(|| SalmonError::Upstream("no video description found in page".into()))?;

    let document = Html::parse_document(html);
    Ok(FetchedDocument {
        title: extract_title(&document),
        text: ExtractedText::Synthetic(vec![description]),
    })
}

fn extract_title(document: &Html) -> String {
    static TITLE: OnceLock<Selector> = OnceLock::new();
    let selector = TITLE.get_or_init(|| Selector::parse("title").expect("title selector is valid"));
    document
        .select(selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// All text nodes under `<body>` in document order, whitespace preserved.
fn visible_text(document: &Html) -> String {
    static BODY: OnceLock<Selector> = OnceLock::new();
    let body = BODY.get_or_init(|| Selector::parse("body").expect("body selector is valid"));

    match document.select(body).next() {
        Some(root) => root.text().collect(),
        None => String::new(),
    }
}

fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0usize;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(c);
            }
        } else {
            newlines = 0;
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_youtube_hosts() {
        let video = Url::parse("https://www.youtube.com/watch?v=abc123").unwrap();
        let short = Url::parse("https://youtu.be/abc123").unwrap();
        let article = Url::parse("https://en.wikipedia.org/wiki/Salmon").unwrap();

        assert!(is_youtube(&video));
        assert!(is_youtube(&short));
        assert!(!is_youtube(&article));
    }

    #[test]
    fn article_extraction_pulls_title_and_body_text() {
        let html = r#"<html>
            <head><title>Salmon - Wikipedia</title></head>
            <body>
                <h1>Salmon</h1>
                <p>Salmon live in rivers and migrate to the ocean.</p>
            </body>
        </html>"#;

        let doc = extract_article(html);
        assert_eq!(doc.title, "Salmon - Wikipedia");
        let ExtractedText::Body(body) = doc.text else {
            panic!("article should extract a continuous body");
        };
        assert!(body.contains("Salmon live in rivers"));
    }

    #[test]
    fn article_without_title_gets_an_empty_one() {
        let doc = extract_article("<html><body><p>text only</p></body></html>");
        assert_eq!(doc.title, "");
    }

    #[test]
    fn video_extraction_captures_the_description() {
        let html = concat!(
            "<html><head><title>Spawning runs</title></head><body>",
            r#"var ytInitialPlayerResponse = {"videoDetails":{"shortDescription":"Salmon swim upstream.\nNarrated documentary.","isCrawlable":true}};"#,
            "</body></html>",
        );

        let doc = extract_video(html).unwrap();
        assert_eq!(doc.title, "Spawning runs");
        let ExtractedText::Synthetic(chunks) = doc.text else {
            panic!("video should produce synthetic chunks");
        };
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "Salmon swim upstream.\nNarrated documentary.");
    }

    #[test]
    fn video_without_description_is_an_upstream_error() {
        let err = extract_video("<html><body>nothing here</body></html>").unwrap_err();
        assert!(matches!(err, SalmonError::Upstream(_)));
    }

    #[test]
    fn blank_runs_collapse_to_paragraph_breaks() {
        assert_eq!(collapse_blank_runs("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_runs("a\nb"), "a\nb");
    }
}
