use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Language used for client-generated text (apologies, analysis questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Ja,
    En,
}

impl Locale {
    pub fn code(self) -> &'static str {
        match self {
            Locale::Ja => "ja",
            Locale::En => "en",
        }
    }

    /// Shown as an assistant message when a turn fails in transport.
    pub fn apology(self) -> &'static str {
        match self {
            Locale::Ja => "申し訳ありません。エラーが発生しました。もう一度お試しください。",
            Locale::En => "Sorry, I encountered an error. Please try again.",
        }
    }

    pub fn error_label(self) -> &'static str {
        match self {
            Locale::Ja => "エラー",
            Locale::En => "Error",
        }
    }

    pub fn all_regions(self) -> &'static str {
        match self {
            Locale::Ja => "全地域",
            Locale::En => "All regions",
        }
    }

    /// The question sent once category, subcategory and region are chosen.
    pub fn analysis_question(self, category: &str, subcategory: &str, region: &str) -> String {
        match self {
            Locale::Ja => format!(
                "{}の{}（{}）について、市場動向の分析と今後の予測をお願いします。",
                region, subcategory, category
            ),
            Locale::En => format!(
                "Please provide a market trend analysis and forecast for {} ({}) in {}.",
                subcategory, category, region
            ),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Locale {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ja" | "ja-jp" | "japanese" => Ok(Locale::Ja),
            "en" | "en-us" | "en-gb" | "english" => Ok(Locale::En),
            _ => Err(Error::UnknownLocale(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_japanese() {
        assert_eq!(Locale::default(), Locale::Ja);
    }

    #[test]
    fn test_parse() {
        assert_eq!("EN".parse::<Locale>().unwrap(), Locale::En);
        assert_eq!(" ja-JP ".parse::<Locale>().unwrap(), Locale::Ja);
        assert!(matches!("fr".parse::<Locale>(), Err(Error::UnknownLocale(_))));
    }

    #[test]
    fn test_analysis_question_mentions_every_selection() {
        for locale in [Locale::Ja, Locale::En] {
            let q = locale.analysis_question("Appliances", "Dryers", "Japan");
            assert!(q.contains("Appliances"));
            assert!(q.contains("Dryers"));
            assert!(q.contains("Japan"));
        }
    }

    #[test]
    fn test_serde_uses_codes() {
        assert_eq!(serde_json::to_string(&Locale::En).unwrap(), "\"en\"");
        let parsed: Locale = serde_json::from_str("\"ja\"").unwrap();
        assert_eq!(parsed, Locale::Ja);
    }
}
