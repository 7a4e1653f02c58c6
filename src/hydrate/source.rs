use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};

static SOURCE_PATTERNS: LazyLock<Vec<(SourceType, Regex)>> = LazyLock::new(|| {
    SourceType::ALL
        .into_iter()
        .filter_map(|t| glob_regex(t.pattern()).map(|re| (t, re)))
        .collect()
});

/// Upload families, each identified by a file-name glob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SourceType {
    RetailData,
    EmailDeliveries,
    EmailEngagement,
    EmailPerformance,
    CustomerSurvey,
    SocialMedia,
}

impl SourceType {
    pub const ALL: [SourceType; 6] = [
        SourceType::RetailData,
        SourceType::EmailDeliveries,
        SourceType::EmailEngagement,
        SourceType::EmailPerformance,
        SourceType::CustomerSurvey,
        SourceType::SocialMedia,
    ];

    /// File-name glob.
    pub fn pattern(self) -> &'static str {
        match self {
            SourceType::RetailData => "RetailData*",
            SourceType::EmailDeliveries => "Advertising_Email_Deliveries*",
            SourceType::EmailEngagement => "Advertising_Email_Engagement*",
            SourceType::EmailPerformance => "Advertising_Email_Performance*",
            SourceType::CustomerSurvey => "CustomerSurveyResponses*",
            SourceType::SocialMedia => "Social_Media_Performance*",
        }
    }

    /// The pattern without wildcards; also the datalake subdirectory.
    pub fn prefix(self) -> &'static str {
        self.pattern().trim_end_matches('*')
    }

    pub fn matches(self, file_name: &str) -> bool {
        SOURCE_PATTERNS
            .iter()
            .find(|(t, _)| *t == self)
            .is_some_and(|(_, re)| re.is_match(file_name))
    }

    /// The source type whose pattern matches `file_name`, if any.
    pub fn detect(file_name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.matches(file_name))
    }
}

/// Translate a shell glob (`*`, `?`) into an anchored regex.
fn glob_regex(glob: &str) -> Option<Regex> {
    let mut pattern = String::from("^");
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).ok()
}

impl FromStr for SourceType {
    type Err = Error;

    /// Accepts the pattern with or without its trailing `*`.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().trim_end_matches('*');
        Self::ALL
            .into_iter()
            .find(|t| t.prefix().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|t| t.pattern()).collect();
                Error::Usage(format!(
                    "unknown source pattern {s:?}; expected one of {}",
                    known.join(", ")
                ))
            })
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pattern())
    }
}
