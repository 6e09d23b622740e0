//! Content Moderation
//!
//! Pattern-based content moderation applied to user queries (inbound) and
//! model output (outbound).

use regex::{RegexSet, RegexSetBuilder};
use std::fmt;
use std::sync::Arc;

/// Complete response sent instead of forwarding an offensive query
pub const REFUSAL_MESSAGE: &str = "I'm sorry, but I can't help with that request. \
Please keep the conversation respectful and within our usage guidelines.";

/// Appended to a partially streamed answer whose continuation was blocked
pub const OUTPUT_REFUSAL_SUFFIX: &str =
    "\n\n[Response stopped: the generated content did not meet our content guidelines.]";

/// Category of a moderation match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModerationCategory {
    HateSpeech,
    SelfHarm,
    Violence,
    SexualContent,
    IllegalActivity,
}

impl ModerationCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ModerationCategory::HateSpeech => "hate_speech",
            ModerationCategory::SelfHarm => "self_harm",
            ModerationCategory::Violence => "violence",
            ModerationCategory::SexualContent => "sexual_content",
            ModerationCategory::IllegalActivity => "illegal_activity",
        }
    }
}

impl fmt::Display for ModerationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PATTERNS: &[(ModerationCategory, &str)] = &[
    // Hate speech
    (
        ModerationCategory::HateSpeech,
        r"\b(kill|exterminate|gas|deport) all (the )?(jews|muslims|christians|blacks|whites|gays|immigrants|asians)\b",
    ),
    (
        ModerationCategory::HateSpeech,
        r"\b(jews|muslims|blacks|gays|immigrants|asians) (are|r) (subhuman|vermin|animals|a disease)\b",
    ),
    (ModerationCategory::HateSpeech, r"\b(racial|ethnic) slurs?\b"),
    (ModerationCategory::HateSpeech, r"\bwhite (power|supremacy is right)\b"),
    // Self-harm
    (
        ModerationCategory::SelfHarm,
        r"\b(kill|hurt|harm|cut|hang) myself\b",
    ),
    (
        ModerationCategory::SelfHarm,
        r"\b(how (do|can|should) i|ways to) (commit suicide|end my (own )?life|take my (own )?life)\b",
    ),
    (ModerationCategory::SelfHarm, r"\bsuicide (methods?|plan|instructions)\b"),
    (ModerationCategory::SelfHarm, r"\bi want to die\b"),
    // Violence
    (
        ModerationCategory::Violence,
        r"\bhow to (make|build|assemble) (a |an )?(bomb|pipe bomb|explosive|ied|molotov)",
    ),
    (
        ModerationCategory::Violence,
        r"\b(i will|i'm going to|going to|help me) (kill|murder|shoot|stab|poison) (him|her|them|someone|people|my)\b",
    ),
    (ModerationCategory::Violence, r"\b(mass shooting|school shooting) (plan|tips)\b"),
    // Explicit sexual content
    (ModerationCategory::SexualContent, r"\b(child|minor|underage) (porn|sex|nudes?)\b"),
    (ModerationCategory::SexualContent, r"\b(porn|pornographic|hardcore sex|explicit sex)\b"),
    (ModerationCategory::SexualContent, r"\bnudes? of (her|him|my|a)\b"),
    // Illegal activity
    (
        ModerationCategory::IllegalActivity,
        r"\b(buy|sell|purchase|get|obtain) (an? |some )?illegal (weapons?|guns?|firearms?|drugs)\b",
    ),
    (
        ModerationCategory::IllegalActivity,
        r"\bhow to (launder money|make meth|cook meth|make cocaine|hack into|steal a car|forge (a )?passport)\b",
    ),
    (
        ModerationCategory::IllegalActivity,
        r"\b(stolen credit cards?|credit card dumps|counterfeit (money|bills))\b",
    ),
];

/// Earlier output kept for rescreening; longer than any pattern match plus
/// one character of `\b` context
const OUTPUT_TAIL_CHARS: usize = 256;

/// Result of screening a text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenResult {
    pub is_offensive: bool,
    /// First matching category
    pub category: Option<ModerationCategory>,
}

/// Result of filtering model output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredOutput {
    /// Original text, or the refusal when blocked
    pub filtered: String,
    pub was_filtered: bool,
}

/// Case-insensitive pattern screen over the whole text
#[derive(Debug, Clone)]
pub struct Moderator {
    patterns: RegexSet,
    categories: Vec<ModerationCategory>,
}

impl Moderator {
    /// Build the moderator from the built-in pattern table
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_patterns(PATTERNS)
    }

    pub fn with_patterns(patterns: &[(ModerationCategory, &str)]) -> Result<Self, regex::Error> {
        let patterns_set = RegexSetBuilder::new(patterns.iter().map(|(_, pattern)| *pattern))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            patterns: patterns_set,
            categories: patterns.iter().map(|(category, _)| *category).collect(),
        })
    }

    pub fn screen(&self, text: &str) -> ScreenResult {
        self.screen_from(text, 0)
    }

    /// Screen `text[start..]`, still using the text before `start` as
    /// context for word boundaries
    fn screen_from(&self, text: &str, start: usize) -> ScreenResult {
        let category = self
            .patterns
            .matches_at(text, start)
            .iter()
            .next()
            .map(|index| self.categories[index]);
        ScreenResult {
            is_offensive: category.is_some(),
            category,
        }
    }

    pub fn filter_output(&self, text: &str) -> FilteredOutput {
        if self.screen(text).is_offensive {
            FilteredOutput {
                filtered: REFUSAL_MESSAGE.to_string(),
                was_filtered: true,
            }
        } else {
            FilteredOutput {
                filtered: text.to_string(),
                was_filtered: false,
            }
        }
    }
}

/// Incremental screen over streamed output
///
/// Each delta is screened together with a bounded tail of the text before
/// it, so a match spanning deltas is caught without rescanning the whole
/// answer.
#[derive(Debug, Clone)]
pub struct OutputScreen {
    moderator: Arc<Moderator>,
    tail: String,
    /// Leading text has been dropped from `tail`
    truncated: bool,
}

impl OutputScreen {
    pub fn new(moderator: Arc<Moderator>) -> Self {
        Self {
            moderator,
            tail: String::new(),
            truncated: false,
        }
    }

    pub fn push(&mut self, delta: &str) -> ScreenResult {
        // After truncation the first char only serves as boundary context
        let start = match self.tail.chars().next() {
            Some(first) if self.truncated => first.len_utf8(),
            _ => 0,
        };
        self.tail.push_str(delta);
        let result = self.moderator.screen_from(&self.tail, start);

        let excess = self.tail.chars().count().saturating_sub(OUTPUT_TAIL_CHARS);
        if excess > 0 {
            let cut = self
                .tail
                .char_indices()
                .nth(excess)
                .map_or(self.tail.len(), |(index, _)| index);
            self.tail.drain(..cut);
            self.truncated = true;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moderator() -> Moderator {
        Moderator::new().unwrap()
    }

    #[test]
    fn test_builtin_patterns_compile() {
        assert_eq!(moderator().categories.len(), PATTERNS.len());
    }

    #[test]
    fn test_illegal_weapon_is_offensive() {
        let result = moderator().screen("I want to buy an illegal weapon");
        assert!(result.is_offensive);
        assert_eq!(result.category, Some(ModerationCategory::IllegalActivity));
    }

    #[test]
    fn test_weather_is_fine() {
        let result = moderator().screen("What is the weather today?");
        assert!(!result.is_offensive);
        assert_eq!(result.category, None);
    }

    #[test]
    fn test_case_insensitive() {
        assert!(moderator().screen("HOW TO MAKE A BOMB at home").is_offensive);
        assert!(moderator().screen("I Want To Die").is_offensive);
    }

    #[test]
    fn test_categories() {
        let m = moderator();
        assert_eq!(
            m.screen("I'm going to hurt myself").category,
            Some(ModerationCategory::SelfHarm)
        );
        assert_eq!(
            m.screen("where can I find child porn").category,
            Some(ModerationCategory::SexualContent)
        );
        assert_eq!(
            m.screen("kill all the immigrants").category,
            Some(ModerationCategory::HateSpeech)
        );
        assert_eq!(
            m.screen("I will murder them tonight").category,
            Some(ModerationCategory::Violence)
        );
    }

    #[test]
    fn test_benign_text_with_near_words() {
        let m = moderator();
        assert!(!m.screen("How do I kill a stuck process in Linux?").is_offensive);
        assert!(!m.screen("The bomb calorimeter measures heat").is_offensive);
        assert!(!m.screen("Explain the history of firearms regulation").is_offensive);
    }

    #[test]
    fn test_filter_output() {
        let m = moderator();
        let clean = m.filter_output("Rust is a systems language.");
        assert!(!clean.was_filtered);
        assert_eq!(clean.filtered, "Rust is a systems language.");

        let blocked = m.filter_output("Here is how to launder money quickly");
        assert!(blocked.was_filtered);
        assert_eq!(blocked.filtered, REFUSAL_MESSAGE);
    }

    #[test]
    fn test_output_screen_catches_match_split_across_deltas() {
        let mut screen = OutputScreen::new(Arc::new(moderator()));
        assert!(!screen.push("Sure. Here is how to ").is_offensive);
        assert!(!screen.push("laund").is_offensive);
        assert!(screen.push("er money quickly").is_offensive);
    }

    #[test]
    fn test_output_screen_tail_is_bounded() {
        let mut screen = OutputScreen::new(Arc::new(moderator()));
        for _ in 0..200 {
            assert!(!screen.push("Rust has no garbage collector. ").is_offensive);
        }
        assert!(screen.tail.chars().count() <= OUTPUT_TAIL_CHARS);
        assert!(screen.push("Anyway, how to make meth: ").is_offensive);
    }

    #[test]
    fn test_output_screen_keeps_word_boundaries_after_truncation() {
        let mut screen = OutputScreen::new(Arc::new(moderator()));
        let first = format!("yxporn {}", "a".repeat(OUTPUT_TAIL_CHARS - 7));
        assert!(!screen.push(&first).is_offensive);
        // Drops the leading "y"; the tail now starts mid-word at "xporn"
        assert!(!screen.push("b").is_offensive);
        assert!(screen.tail.starts_with("xporn"));
        assert!(!screen.push("c").is_offensive);
    }
}
