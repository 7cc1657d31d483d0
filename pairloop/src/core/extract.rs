//! Fenced code-block extraction from free-form agent text.

/// Opening and closing markers delimiting an embedded code payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fence {
    pub open: String,
    pub close: String,
}

impl Fence {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    /// Fence for a language tag, e.g. `Fence::for_language("r")` matches
    /// "```r" ... "```".
    pub fn for_language(tag: &str) -> Self {
        Self::new(format!("```{tag}"), "```")
    }

    /// Extract the first fenced block; see [`extract_code`].
    pub fn extract(&self, text: &str) -> Option<String> {
        extract_code(text, &self.open, &self.close)
    }
}

/// Return the trimmed text between the first `open` marker and the first
/// `close` marker after it.
///
/// Only the first pair is honored; later blocks are ignored. There is no
/// nested-fence handling. Returns `None` when either marker is missing.
pub fn extract_code(text: &str, open: &str, close: &str) -> Option<String> {
    let start = text.find(open)? + open.len();
    let len = text[start..].find(close)?;
    Some(text[start..start + len].trim().to_string())
}
