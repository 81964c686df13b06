//! Revision diffs: provider seam + normalisation of MediaWiki HTML diff tables.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::model::DiffContext;

#[derive(Debug, Error)]
pub enum DiffError {
    /// The response could not be understood; retrying will not help.
    #[error("malformed diff response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl DiffError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[async_trait]
pub trait DiffProvider: Send + Sync {
    /// Diff between two revisions, normalized into added/removed hunks.
    async fn fetch_diff(&self, old: u64, new: u64) -> Result<DiffContext, DiffError>;
    fn name(&self) -> &'static str;
}

static DIFF_CELL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<td\s+class="[^"]*\bdiff-(addedline|deletedline)\b[^"]*"[^>]*>(.*?)</td>"#)
        .expect("diff cell regex")
});
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)</?[A-Za-z][^>]*>").expect("tag regex"));

/// Collect the added and deleted line cells of an HTML diff table in document order.
/// Inline markup (`<ins>`, `<del>`, `<div>`) is stripped and entities decoded.
pub fn parse_html_diff(html: &str) -> DiffContext {
    let mut diff = DiffContext::default();
    for caps in DIFF_CELL.captures_iter(html) {
        let (Some(kind), Some(body)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let text = TAGS.replace_all(body.as_str(), "");
        let text = html_escape::decode_html_entities(&text).into_owned();
        match kind.as_str() {
            "addedline" => diff.added_context.push(text),
            _ => diff.removed_context.push(text),
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
<tr>
  <td colspan="2" class="diff-lineno">Line 12:</td>
  <td colspan="2" class="diff-lineno">Line 12:</td>
</tr>
<tr>
  <td class="diff-marker" data-marker="−"></td>
  <td class="diff-deletedline diff-side-deleted"><div>The <del class="diffchange diffchange-inline">Māori</del> name is [[Ōtautahi]].</div></td>
  <td class="diff-marker" data-marker="+"></td>
  <td class="diff-addedline diff-side-added"><div>The <ins class="diffchange diffchange-inline">Maori</ins> name is [[Ōtautahi]].</div></td>
</tr>
<tr>
  <td class="diff-marker"></td>
  <td class="diff-context diff-side-deleted"><div>unchanged &amp; context</div></td>
</tr>
<tr>
  <td colspan="2" class="diff-empty diff-side-deleted"></td>
  <td class="diff-marker" data-marker="+"></td>
  <td class="diff-addedline diff-side-added"><div>{{cite web|title=Tom &amp; Jerry &lt;3}}</div></td>
</tr>
"#;

    #[test]
    fn splits_added_and_removed_cells() {
        let diff = parse_html_diff(SAMPLE);
        assert_eq!(
            diff.removed_context,
            vec!["The Māori name is [[Ōtautahi]]."]
        );
        assert_eq!(
            diff.added_context,
            vec![
                "The Maori name is [[Ōtautahi]].",
                "{{cite web|title=Tom & Jerry <3}}"
            ]
        );
    }

    #[test]
    fn empty_or_foreign_html_is_empty_diff() {
        assert!(parse_html_diff("").is_empty());
        assert!(parse_html_diff("<p>no table</p>").is_empty());
    }
}
