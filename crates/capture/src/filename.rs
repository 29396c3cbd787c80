use once_cell::sync::Lazy;
use regex::Regex;

static NON_ALNUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9]").expect("filename regex is valid"));

const MAX_STEM_CHARS: usize = 50;
const FALLBACK: &str = "page.pdf";

/// Turn a page title into a delivery filename.
pub fn sanitize_filename(title: &str) -> String {
    if !title.chars().any(|c| c.is_ascii_alphanumeric()) {
        return FALLBACK.to_string();
    }
    let stem: String = NON_ALNUM
        .replace_all(title, "_")
        .chars()
        .take(MAX_STEM_CHARS)
        .collect();
    format!("{}.pdf", stem)
}

/// Last path segment of a document address, when it already names a PDF.
pub fn filename_from_address(address: &str) -> Option<String> {
    let parsed = url::Url::parse(address).ok()?;
    let segment = parsed.path_segments()?.last()?.to_string();
    if segment.to_lowercase().ends_with(".pdf") && segment.len() > 4 {
        let decoded = urlencoding::decode(&segment)
            .map(|d| d.into_owned())
            .unwrap_or(segment);
        Some(sanitize_filename(&decoded[..decoded.len() - 4]))
    } else {
        None
    }
}
