//! Subtitle preference matching, used once per session at creation time.
//!
//! Pure and network-free so it is unit-testable in isolation from the
//! registry that calls it.

use crate::model::SubtitleStream;

/// Positive and negative substring patterns, parsed from configuration.
///
/// A pattern with a leading `-` is negative; the dash is stripped and the
/// pattern moves to the `negative` list.
#[derive(Debug, Clone, Default)]
pub struct PreferencePatterns {
    pub positive: Vec<String>,
    pub negative: Vec<String>,
}

impl PreferencePatterns {
    pub fn parse(raw: &[String]) -> Self {
        let mut positive = Vec::new();
        let mut negative = Vec::new();
        for pattern in raw {
            if let Some(stripped) = pattern.strip_prefix('-') {
                if !stripped.is_empty() {
                    negative.push(stripped.to_lowercase());
                }
            } else if !pattern.is_empty() {
                positive.push(pattern.to_lowercase());
            }
        }
        Self { positive, negative }
    }

    fn matches(&self, candidate: &SubtitleStream) -> bool {
        let text = candidate.match_text().to_lowercase();
        self.positive.iter().all(|p| text.contains(p.as_str()))
            && self.negative.iter().all(|n| !text.contains(n.as_str()))
    }
}

/// Choose the preferred subtitle stream id for a freshly-discovered session.
///
/// Returns `None` when there are no available subtitles at all: `enable`
/// becomes a no-op in that case rather than a wire call (spec boundary
/// behavior #11).
pub fn choose_preferred(
    available: &[SubtitleStream],
    patterns: &PreferencePatterns,
    prefer_external: bool,
) -> Option<String> {
    if available.is_empty() {
        return None;
    }

    let candidates: Vec<&SubtitleStream> =
        available.iter().filter(|s| patterns.matches(s)).collect();

    match candidates.len() {
        0 => {
            if prefer_external {
                available
                    .iter()
                    .find(|s| s.is_external)
                    .or_else(|| available.first())
                    .map(|s| s.id.clone())
            } else {
                available.first().map(|s| s.id.clone())
            }
        }
        1 => Some(candidates[0].id.clone()),
        _ => {
            if prefer_external {
                candidates
                    .iter()
                    .find(|s| s.is_external)
                    .or_else(|| candidates.first())
                    .map(|s| s.id.clone())
            } else {
                candidates.first().map(|s| s.id.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(id: &str, title: &str, lang: &str, external: bool) -> SubtitleStream {
        SubtitleStream {
            id: id.to_string(),
            title: title.to_string(),
            language: lang.to_string(),
            is_external: external,
            selected: false,
        }
    }

    #[test]
    fn no_subtitles_means_no_preference() {
        let patterns = PreferencePatterns::parse(&[]);
        assert_eq!(choose_preferred(&[], &patterns, false), None);
    }

    #[test]
    fn single_positive_match_wins() {
        let subs = vec![
            stream("1", "English (SDH)", "eng", false),
            stream("2", "English", "eng", false),
        ];
        let patterns = PreferencePatterns::parse(&["sdh".to_string()]);
        assert_eq!(choose_preferred(&subs, &patterns, false), Some("1".into()));
    }

    #[test]
    fn negative_pattern_excludes_candidate() {
        let subs = vec![
            stream("1", "English (SDH)", "eng", false),
            stream("2", "English", "eng", false),
        ];
        let patterns =
            PreferencePatterns::parse(&["english".to_string(), "-sdh".to_string()]);
        assert_eq!(choose_preferred(&subs, &patterns, false), Some("2".into()));
    }

    #[test]
    fn multiple_candidates_prefer_external_when_configured() {
        let subs = vec![
            stream("1", "English", "eng", false),
            stream("2", "English", "eng", true),
        ];
        let patterns = PreferencePatterns::parse(&["english".to_string()]);
        assert_eq!(choose_preferred(&subs, &patterns, true), Some("2".into()));
        assert_eq!(choose_preferred(&subs, &patterns, false), Some("1".into()));
    }

    #[test]
    fn zero_candidates_falls_back_to_first_available() {
        let subs = vec![
            stream("1", "English", "eng", false),
            stream("2", "French", "fre", true),
        ];
        let patterns = PreferencePatterns::parse(&["german".to_string()]);
        assert_eq!(choose_preferred(&subs, &patterns, false), Some("1".into()));
        assert_eq!(choose_preferred(&subs, &patterns, true), Some("2".into()));
    }
}
