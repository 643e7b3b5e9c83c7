//! Template / dynamic-data splitting.
//!
//! Pages annotate their variable regions with comment markers:
//!
//! ```html
//! <title><!--dyn:title-->Welcome back<!--/dyn:title--></title>
//! ```
//!
//! [`split_markers`] turns the document into a static template, with each
//! marked region replaced by a `{key}` placeholder, plus a map of the
//! regions' current values. A document with no markers is all template.
//! [`assemble`] substitutes values back into a template to rebuild the full
//! document.

use pagelift_core::Error;
use pagelift_core::cache::DynamicData;
use pagelift_core::revalidate::{SplitOutcome, Splitter};
use regex::Regex;
use std::sync::LazyLock;

static OPEN_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<!--dyn:([A-Za-z0-9_-]+)-->").unwrap());

/// Divide an annotated HTML document into template and dynamic data.
///
/// # Errors
///
/// - `InvalidInput` on an empty document or a duplicate region key.
/// - `SplitFailed` when an opened region has no matching close marker.
pub fn split_markers(html: &str) -> Result<SplitOutcome, Error> {
    if html.trim().is_empty() {
        return Err(Error::InvalidInput("empty payload".into()));
    }

    let mut template = String::with_capacity(html.len());
    let mut dynamic_data = DynamicData::new();
    let mut cursor = 0;

    while let Some(caps) = OPEN_MARKER.captures(&html[cursor..]) {
        let open = caps.get(0).expect("capture 0 always present");
        let key = caps.get(1).expect("marker key group").as_str().to_string();
        let open_start = cursor + open.start();
        let open_end = cursor + open.end();

        let close = format!("<!--/dyn:{}-->", key);
        let Some(close_rel) = html[open_end..].find(&close) else {
            return Err(Error::SplitFailed(format!("unterminated dynamic region '{}'", key)));
        };
        let value_end = open_end + close_rel;

        if dynamic_data.contains_key(&key) {
            return Err(Error::InvalidInput(format!("duplicate dynamic region '{}'", key)));
        }

        template.push_str(&html[cursor..open_start]);
        template.push('{');
        template.push_str(&key);
        template.push('}');
        dynamic_data.insert(key, html[open_end..value_end].to_string());
        cursor = value_end + close.len();
    }

    template.push_str(&html[cursor..]);

    tracing::debug!("split payload into template + {} dynamic field(s)", dynamic_data.len());

    Ok(SplitOutcome { template, dynamic_data })
}

/// Substitute dynamic values back into a template's `{key}` placeholders.
///
/// Keys without a placeholder are ignored; placeholders without a value are
/// left in place so a renderer can spot them.
pub fn assemble(template: &str, dynamic_data: &DynamicData) -> String {
    let mut out = template.to_string();
    for (key, value) in dynamic_data {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

/// Marker-based [`Splitter`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerSplitter;

impl Splitter for MarkerSplitter {
    fn split(&self, payload: &[u8]) -> Result<SplitOutcome, Error> {
        let html = String::from_utf8_lossy(payload);
        split_markers(&html)
    }
}
