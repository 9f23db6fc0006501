// src/extract.rs
//! Latest-post extraction from a rendered profile page.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::page::{Candidate, PageView, TextStrategy};
use crate::post::Post;

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct PostExtractor {
    clock: Clock,
}

impl Default for PostExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PostExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostExtractor").finish_non_exhaustive()
    }
}

impl PostExtractor {
    pub fn new() -> Self {
        Self {
            clock: Box::new(Utc::now),
        }
    }

    /// Replace the wall clock used when a candidate carries no timestamp.
    pub fn with_clock(clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Self {
            clock: Box::new(clock),
        }
    }

    /// Newest non-pinned post on the page, or `None` when nothing qualifies.
    ///
    /// Candidates are taken in document order (newest first). A candidate
    /// that fails to extract is skipped; it never aborts the page.
    pub fn extract_latest(&self, page: &dyn PageView, account_id: &str) -> Option<Post> {
        let candidates = page.candidates();
        if candidates.is_empty() {
            tracing::info!(account = %account_id, url = page.url(), "no post candidates on page");
            return None;
        }
        tracing::debug!(account = %account_id, count = candidates.len(), "found post candidates");

        for (index, candidate) in candidates.iter().enumerate() {
            match candidate.is_pinned() {
                Ok(true) => {
                    tracing::debug!(account = %account_id, index, "skipping pinned post");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(account = %account_id, index, error = %e, "pin check failed, treating as unpinned");
                }
            }

            match self.extract_one(candidate.as_ref(), account_id) {
                Ok(Some(post)) => return Some(post),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(account = %account_id, index, error = %e, "error extracting post candidate");
                    continue;
                }
            }
        }

        None
    }

    fn extract_one(&self, candidate: &dyn Candidate, account_id: &str) -> Result<Option<Post>> {
        let mut body = None;
        for strategy in TextStrategy::ORDER {
            match candidate.text(strategy) {
                Ok(Some(t)) if !t.trim().is_empty() => {
                    body = Some(t);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::trace!(?strategy, error = %e, "text strategy failed");
                }
            }
        }
        let body = match body {
            Some(b) => b,
            None => candidate.rendered_text()?,
        };
        let body = body.trim();
        if body.is_empty() {
            return Ok(None);
        }

        let observed_at = match candidate.timestamp()? {
            Some(ts) if !ts.trim().is_empty() => ts.trim().to_string(),
            _ => (self.clock)().to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        let permalink = candidate.permalink().unwrap_or_else(|e| {
            tracing::warn!(account = %account_id, error = %e, "error extracting permalink");
            None
        });

        Ok(Some(Post::new(account_id, body, observed_at, permalink)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Page;
    use anyhow::anyhow;
    use chrono::TimeZone;

    #[derive(Default)]
    struct FakeCandidate {
        pinned: bool,
        structured: Option<String>,
        rendered: String,
        timestamp: Option<String>,
        permalink: Option<String>,
        explode: bool,
    }

    impl Candidate for FakeCandidate {
        fn is_pinned(&self) -> Result<bool> {
            Ok(self.pinned)
        }
        fn text(&self, strategy: TextStrategy) -> Result<Option<String>> {
            if self.explode {
                return Err(anyhow!("detached element"));
            }
            Ok(match strategy {
                TextStrategy::Structured => self.structured.clone(),
                _ => None,
            })
        }
        fn rendered_text(&self) -> Result<String> {
            if self.explode {
                return Err(anyhow!("detached element"));
            }
            Ok(self.rendered.clone())
        }
        fn timestamp(&self) -> Result<Option<String>> {
            Ok(self.timestamp.clone())
        }
        fn permalink(&self) -> Result<Option<String>> {
            Ok(self.permalink.clone())
        }
    }

    struct FakePage(Vec<FakeCandidate>);

    impl PageView for FakePage {
        fn url(&self) -> &str {
            "https://x.com/test"
        }
        fn candidates(&self) -> Vec<Box<dyn Candidate + '_>> {
            self.0
                .iter()
                .map(|c| Box::new(CandidateRef(c)) as Box<dyn Candidate + '_>)
                .collect()
        }
    }

    struct CandidateRef<'a>(&'a FakeCandidate);

    impl Candidate for CandidateRef<'_> {
        fn is_pinned(&self) -> Result<bool> {
            self.0.is_pinned()
        }
        fn text(&self, s: TextStrategy) -> Result<Option<String>> {
            self.0.text(s)
        }
        fn rendered_text(&self) -> Result<String> {
            self.0.rendered_text()
        }
        fn timestamp(&self) -> Result<Option<String>> {
            self.0.timestamp()
        }
        fn permalink(&self) -> Result<Option<String>> {
            self.0.permalink()
        }
    }

    fn fixed_clock() -> PostExtractor {
        PostExtractor::with_clock(|| Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap())
    }

    #[test]
    fn skips_pinned_and_returns_second() {
        let page = FakePage(vec![
            FakeCandidate {
                pinned: true,
                structured: Some("old pinned".into()),
                timestamp: Some("t0".into()),
                ..Default::default()
            },
            FakeCandidate {
                structured: Some("fresh".into()),
                timestamp: Some("t1".into()),
                permalink: Some("https://x.com/test/status/2".into()),
                ..Default::default()
            },
        ]);
        let post = fixed_clock().extract_latest(&page, "test").unwrap();
        assert_eq!(post.body(), "fresh");
        assert_eq!(post.account_id(), "test");
        assert_eq!(post.permalink(), Some("https://x.com/test/status/2"));
    }

    #[test]
    fn failing_candidate_is_skipped_not_fatal() {
        let page = FakePage(vec![
            FakeCandidate {
                explode: true,
                ..Default::default()
            },
            FakeCandidate {
                structured: Some("survivor".into()),
                timestamp: Some("t1".into()),
                ..Default::default()
            },
        ]);
        assert_eq!(
            fixed_clock().extract_latest(&page, "test").unwrap().body(),
            "survivor"
        );
    }

    #[test]
    fn falls_back_to_rendered_text_and_now() {
        let page = FakePage(vec![FakeCandidate {
            rendered: "  whole card text  ".into(),
            ..Default::default()
        }]);
        let post = fixed_clock().extract_latest(&page, "test").unwrap();
        assert_eq!(post.body(), "whole card text");
        assert_eq!(post.observed_at(), "2025-01-02T03:04:05.000Z");
        assert!(post.permalink().is_none());
    }

    #[test]
    fn none_when_all_pinned_or_empty() {
        let page = FakePage(vec![
            FakeCandidate {
                pinned: true,
                structured: Some("p".into()),
                ..Default::default()
            },
            FakeCandidate {
                rendered: "   ".into(),
                ..Default::default()
            },
        ]);
        assert!(fixed_clock().extract_latest(&page, "test").is_none());
        assert!(fixed_clock().extract_latest(&FakePage(vec![]), "test").is_none());
    }

    #[test]
    fn works_on_html_page() {
        let html = r#"
<article data-testid="tweet"><svg data-testid="icon-pin"></svg>
  <div data-testid="tweetText">Pinned</div><time datetime="2020-01-01T00:00:00Z"></time>
</article>
<article data-testid="tweet">
  <div data-testid="tweetText">Second</div>
  <a href="/nasa/status/9"><time datetime="2024-01-01T00:00:00Z"></time></a>
</article>"#;
        let page = Page::new("https://x.com/nasa", html);
        let post = PostExtractor::new().extract_latest(&page, "nasa").unwrap();
        assert_eq!(post.body(), "Second");
        assert_eq!(post.observed_at(), "2024-01-01T00:00:00Z");
        assert_eq!(post.fingerprint().as_str(), "https://x.com/nasa/status/9");
    }
}
