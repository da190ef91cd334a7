use serde::{Deserialize, Serialize};

pub const DEFAULT_MEETING_TITLE: &str = "Untitled Meeting";
pub const SUMMARY_PREVIEW_LEN: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "positive" => Some(SentimentLabel::Positive),
            "neutral" => Some(SentimentLabel::Neutral),
            "negative" => Some(SentimentLabel::Negative),
            _ => None,
        }
    }
}

/// Overall tone of a meeting. `score` is always within `[-1.0, 1.0]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    #[serde(rename = "sentiment")]
    pub label: SentimentLabel,
    pub score: f64,
}

impl Sentiment {
    pub const MIN_SCORE: f64 = -1.0;
    pub const MAX_SCORE: f64 = 1.0;

    pub fn new(label: SentimentLabel, score: f64) -> Self {
        let score = if score.is_finite() {
            score.clamp(Self::MIN_SCORE, Self::MAX_SCORE)
        } else {
            0.0
        };
        Self { label, score }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    pub assignee: Option<String>,
    pub task: String,
    pub due: Option<String>,
    pub context: Option<String>,
}

/// List views carry only the leading summary bullets.
pub fn summary_preview(summary: &[String]) -> Vec<String> {
    summary.iter().take(SUMMARY_PREVIEW_LEN).cloned().collect()
}

/// The structured part of an analysis, as recovered from model output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFields {
    pub summary: Vec<String>,
    pub action_items: Vec<ActionItem>,
    pub decisions: Vec<String>,
    pub sentiment: Sentiment,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingRecord {
    pub id: i64,
    pub owner_id: String,
    #[serde(rename = "user_email")]
    pub owner_contact: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "date")]
    pub occurred_on: Option<String>,
    pub transcript: String,
    pub summary: Vec<String>,
    pub action_items: Vec<ActionItem>,
    pub decisions: Vec<String>,
    pub sentiment: Sentiment,
    pub share_token: Option<String>,
    pub created_at: String,
}

impl MeetingRecord {
    /// Read-only projection handed out through a share token. Owner identity never leaves.
    pub fn shared_view(&self) -> SharedMeeting {
        SharedMeeting {
            title: self.title.clone(),
            occurred_on: self.occurred_on.clone(),
            summary: self.summary.clone(),
            action_items: self.action_items.clone(),
            decisions: self.decisions.clone(),
            sentiment: self.sentiment,
            transcript: self.transcript.clone(),
            created_at: self.created_at.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingPreview {
    pub id: i64,
    pub title: Option<String>,
    #[serde(rename = "date")]
    pub occurred_on: Option<String>,
    pub summary_preview: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedMeeting {
    pub title: Option<String>,
    #[serde(rename = "date")]
    pub occurred_on: Option<String>,
    pub summary: Vec<String>,
    pub action_items: Vec<ActionItem>,
    pub decisions: Vec<String>,
    pub sentiment: Sentiment,
    pub transcript: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: i64,
    #[serde(rename = "user_email")]
    pub contact: String,
    pub message: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MeetingRecord {
        MeetingRecord {
            id: 7,
            owner_id: "owner-a".to_string(),
            owner_contact: Some("a@example.com".to_string()),
            title: Some("Standup".to_string()),
            occurred_on: Some("2026-01-05".to_string()),
            transcript: "Alice: hi".to_string(),
            summary: vec!["one".to_string(), "two".to_string(), "three".to_string()],
            action_items: Vec::new(),
            decisions: vec!["ship".to_string()],
            sentiment: Sentiment::new(SentimentLabel::Positive, 0.4),
            share_token: Some("tok".to_string()),
            created_at: "2026-01-05T10:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn sentiment_score_is_clamped_and_non_finite_becomes_zero() {
        assert_eq!(Sentiment::new(SentimentLabel::Positive, 4.0).score, 1.0);
        assert_eq!(Sentiment::new(SentimentLabel::Negative, -9.5).score, -1.0);
        assert_eq!(Sentiment::new(SentimentLabel::Neutral, f64::NAN).score, 0.0);
    }

    #[test]
    fn sentiment_label_parse_is_case_insensitive() {
        assert_eq!(
            SentimentLabel::parse(" Positive "),
            Some(SentimentLabel::Positive)
        );
        assert_eq!(SentimentLabel::parse("NEGATIVE"), Some(SentimentLabel::Negative));
        assert_eq!(SentimentLabel::parse("mixed"), None);
    }

    #[test]
    fn default_sentiment_serializes_as_neutral_zero() {
        let value = serde_json::to_value(Sentiment::default()).unwrap();
        assert_eq!(value, serde_json::json!({"sentiment": "neutral", "score": 0.0}));
    }

    #[test]
    fn shared_view_omits_owner_identity() {
        let value = serde_json::to_value(record().shared_view()).unwrap();
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("owner_id"));
        assert!(!obj.contains_key("user_email"));
        assert!(!obj.contains_key("share_token"));
        assert_eq!(obj["date"], "2026-01-05");
        assert_eq!(obj["transcript"], "Alice: hi");
    }

    #[test]
    fn summary_preview_keeps_first_two_bullets() {
        assert_eq!(summary_preview(&record().summary), vec!["one", "two"]);
        assert!(summary_preview(&[]).is_empty());
    }
}
