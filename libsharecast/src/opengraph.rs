//! Open Graph link previews for the compose form

use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::warn;

/// Crawler user agent; many sites only serve Open Graph tags to it
pub const PREVIEW_USER_AGENT: &str = "facebookexternalhit/1.1";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkPreview {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub site_name: Option<String>,
}

impl LinkPreview {
    pub fn domain(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    /// Card markup shown under the compose fields
    pub fn to_html(&self) -> String {
        let mut html = String::from(r#"<div class="link-preview">"#);
        if let Some(image) = &self.image {
            html.push_str(&format!(
                r#"<img class="link-preview__image" src="{}" alt="">"#,
                html_escape::encode_double_quoted_attribute(image)
            ));
        }
        if let Some(domain) = self.domain() {
            html.push_str(&format!(
                r#"<span class="link-preview__domain">{}</span>"#,
                html_escape::encode_text(&domain)
            ));
        }
        if let Some(title) = &self.title {
            html.push_str(&format!(
                r#"<strong class="link-preview__title">{}</strong>"#,
                html_escape::encode_text(title)
            ));
        }
        if let Some(description) = &self.description {
            html.push_str(&format!(
                r#"<p class="link-preview__description">{}</p>"#,
                html_escape::encode_text(description)
            ));
        }
        html.push_str("</div>");
        html
    }
}

fn meta_regex() -> &'static Regex {
    static META: OnceLock<Regex> = OnceLock::new();
    META.get_or_init(|| Regex::new(r#"(?is)<meta\s[^>]*>"#).expect("valid meta pattern"))
}

fn attr_regex() -> &'static Regex {
    static ATTR: OnceLock<Regex> = OnceLock::new();
    ATTR.get_or_init(|| {
        Regex::new(r#"(?is)([a-z:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid attribute pattern")
    })
}

fn title_regex() -> &'static Regex {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    TITLE.get_or_init(|| Regex::new(r#"(?is)<title[^>]*>(.*?)</title>"#).expect("valid title pattern"))
}

/// Extract Open Graph metadata, falling back to `<title>`
pub fn parse(html: &str, page_url: &str) -> LinkPreview {
    let mut og: HashMap<String, String> = HashMap::new();

    for tag in meta_regex().find_iter(html) {
        let mut key = None;
        let mut content = None;
        for cap in attr_regex().captures_iter(tag.as_str()) {
            let name = cap[1].to_ascii_lowercase();
            let value = cap.get(2).or_else(|| cap.get(3)).map(|m| m.as_str()).unwrap_or("");
            match name.as_str() {
                "property" | "name" => key = Some(value.to_ascii_lowercase()),
                "content" => content = Some(html_escape::decode_html_entities(value).into_owned()),
                _ => {}
            }
        }
        if let (Some(key), Some(content)) = (key, content) {
            if key.starts_with("og:") {
                og.entry(key).or_insert(content);
            }
        }
    }

    let fallback_title = || {
        title_regex()
            .captures(html)
            .map(|c| html_escape::decode_html_entities(c[1].trim()).into_owned())
    };

    LinkPreview {
        url: og.remove("og:url").unwrap_or_else(|| page_url.to_string()),
        title: og.remove("og:title").or_else(fallback_title),
        description: og.remove("og:description"),
        image: og.remove("og:image"),
        site_name: og.remove("og:site_name"),
    }
}

/// Fetch the page and extract its preview; failures only drop the preview
pub async fn fetch(http: &Client, page_url: &str) -> Option<LinkPreview> {
    let response = http
        .get(page_url)
        .header(reqwest::header::USER_AGENT, PREVIEW_USER_AGENT)
        .send()
        .await
        .and_then(|r| r.error_for_status());

    match response {
        Ok(response) => match response.text().await {
            Ok(body) => Some(parse(&body, page_url)),
            Err(e) => {
                warn!(url = page_url, error = %e, "Reading link preview failed");
                None
            }
        },
        Err(e) => {
            warn!(url = page_url, error = %e, "Fetching link preview failed");
            None
        }
    }
}
