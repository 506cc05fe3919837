//! Keyword matching over OCR text for blocking on-screen prompts.
//!
//! A permission prompt is any text containing one permission keyword. A
//! question needs both a question cue ("which", "?") and an option marker
//! ("1.", a bullet) somewhere in the text.

use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKind {
    Permission { keyword: String },
    Question { cue: String, option: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptScan {
    pub permission: Option<String>,
    pub question: Option<(String, String)>,
}

impl PromptScan {
    /// The prompt to act on; a permission prompt outranks a question.
    pub fn primary(&self) -> Option<PromptKind> {
        if let Some(keyword) = &self.permission {
            return Some(PromptKind::Permission {
                keyword: keyword.clone(),
            });
        }
        self.question.as_ref().map(|(cue, option)| PromptKind::Question {
            cue: cue.clone(),
            option: option.clone(),
        })
    }
}

pub struct PromptDetector {
    permission_keywords: Vec<String>,
    question_patterns: Vec<String>,
    option_patterns: Vec<String>,
}

impl PromptDetector {
    pub fn new(
        permission_keywords: &[String],
        question_patterns: &[String],
        option_patterns: &[String],
    ) -> Self {
        Self {
            permission_keywords: normalize(permission_keywords),
            question_patterns: normalize(question_patterns),
            option_patterns: normalize(option_patterns),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.permission_keywords,
            &settings.question_patterns,
            &settings.option_patterns,
        )
    }

    pub fn scan(&self, text: &str) -> PromptScan {
        let text = text.to_lowercase();
        let permission = first_match(&self.permission_keywords, &text);
        let question = match (
            first_match(&self.question_patterns, &text),
            first_match(&self.option_patterns, &text),
        ) {
            (Some(cue), Some(option)) => Some((cue, option)),
            _ => None,
        };
        PromptScan {
            permission,
            question,
        }
    }
}

fn normalize(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn first_match(needles: &[String], haystack: &str) -> Option<String> {
    needles
        .iter()
        .find(|needle| haystack.contains(needle.as_str()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> PromptDetector {
        PromptDetector::from_settings(&Settings::default())
    }

    #[test]
    fn permission_keyword_is_case_insensitive() {
        let scan = detector().scan("Do You Want To Proceed?\n> 1. Yes\n  2. No");
        assert_eq!(scan.permission.as_deref(), Some("do you want to proceed"));
        assert!(matches!(scan.primary(), Some(PromptKind::Permission { .. })));
    }

    #[test]
    fn question_needs_cue_and_option() {
        let detector = PromptDetector::new(
            &[],
            &["which".to_string(), "?".to_string()],
            &["1.".to_string(), "option".to_string()],
        );
        assert_eq!(detector.scan("Which framework should we use").question, None);
        assert_eq!(detector.scan("1. React  2. Vue").question, None);

        let scan = detector.scan("Which framework?\n1. React\n2. Vue");
        assert_eq!(
            scan.question,
            Some(("which".to_string(), "1.".to_string()))
        );
        assert_eq!(
            scan.primary(),
            Some(PromptKind::Question {
                cue: "which".to_string(),
                option: "1.".to_string()
            })
        );
    }

    #[test]
    fn permission_outranks_question() {
        let scan = detector().scan("Allow edits? which option: 1. once 2. always");
        assert!(scan.permission.is_some());
        assert!(scan.question.is_some());
        assert!(matches!(scan.primary(), Some(PromptKind::Permission { .. })));
    }

    #[test]
    fn plain_output_has_no_prompt() {
        let detector = PromptDetector::new(
            &["permission".to_string()],
            &["which".to_string()],
            &["1.".to_string()],
        );
        assert_eq!(detector.scan("compiling crate... done").primary(), None);
    }

    #[test]
    fn empty_keywords_are_ignored() {
        let detector = PromptDetector::new(&[String::new()], &[], &[]);
        assert_eq!(detector.scan("anything").permission, None);
    }
}
