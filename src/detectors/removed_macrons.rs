use std::sync::Arc;

use super::{Detector, DEFAULT_ALERT_PAGE};
use crate::articles::ArticleCache;
use crate::macrons::count_macrons;
use crate::model::{ChangeEvent, DiffContext, SuspiciousRev};

/// Fires when an edit removes more macron vowels than it adds.
pub struct RemovedMacronDetector {
    alert_page: String,
    // when set, only edits to cached articles are considered
    articles: Option<Arc<ArticleCache>>,
}

impl Default for RemovedMacronDetector {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_PAGE)
    }
}

impl RemovedMacronDetector {
    pub fn new(alert_page: impl Into<String>) -> Self {
        Self {
            alert_page: alert_page.into(),
            articles: None,
        }
    }

    /// Restrict to edits of pages in the article cache.
    pub fn restricted_to(mut self, articles: Arc<ArticleCache>) -> Self {
        self.articles = Some(articles);
        self
    }
}

impl Detector for RemovedMacronDetector {
    fn id(&self) -> &'static str {
        "removed-macrons"
    }

    fn detect(&self, change: &ChangeEvent, diff: &DiffContext) -> Option<SuspiciousRev> {
        if let Some(articles) = &self.articles {
            if !articles.contains(&change.title) {
                return None;
            }
        }

        let deleted = count_macrons(&diff.removed_context);
        let added = count_macrons(&diff.added_context);
        if deleted <= added {
            return None;
        }
        Some(SuspiciousRev::for_change(
            &self.alert_page,
            change,
            format!("removed '''{}''' macron(s)", deleted - added),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change() -> ChangeEvent {
        ChangeEvent::new("Test Page", "Cloventt", 1234567, 1234568)
    }

    #[test]
    fn reports_exact_delta() {
        let diff = DiffContext::new(["Ōtautahi"], ["Ōtautahi and Whānau", "tūī"]);
        // removed: Ō ā ū ī = 4, added: Ō = 1
        let rev = RemovedMacronDetector::default()
            .detect(&change(), &diff)
            .unwrap();
        assert_eq!(rev.reason, "removed '''3''' macron(s)");
        assert_eq!(rev.alert_page, DEFAULT_ALERT_PAGE);
        assert_eq!(rev.revision.new, 1234568);
    }

    #[test]
    fn equal_or_more_added_is_quiet() {
        let d = RemovedMacronDetector::default();
        assert!(d
            .detect(&change(), &DiffContext::new(["whānau"], ["whānau"]))
            .is_none());
        assert!(d
            .detect(&change(), &DiffContext::new(["whānau"], ["whanau"]))
            .is_none());
        assert!(d.detect(&change(), &DiffContext::default()).is_none());
    }

    #[test]
    fn restriction_short_circuits_on_miss() {
        let cache = Arc::new(ArticleCache::from_titles(["Other Page"]));
        let d = RemovedMacronDetector::default().restricted_to(cache);
        let diff = DiffContext::new(Vec::<String>::new(), ["āāā"]);
        assert!(d.detect(&change(), &diff).is_none());

        let cache = Arc::new(ArticleCache::from_titles(["Test Page"]));
        let d = RemovedMacronDetector::default().restricted_to(cache);
        assert!(d.detect(&change(), &diff).is_some());
    }
}
