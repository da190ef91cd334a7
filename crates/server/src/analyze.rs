use std::sync::Arc;

use meetly_auth::Identity;
use meetly_contracts::{AnalysisFields, DEFAULT_MEETING_TITLE};
use meetly_store::{MeetingStore, NewMeeting, StoreError};

use crate::model::{ModelError, ModelProvider};

const PROMPT_PREAMBLE: &str = r#"You are a JSON-only meeting summarizer.
Return **only valid JSON** with this exact schema, no markdown and no explanations.
If a section has no clear data, still include an empty list or a brief inferred item.

Schema:
{
  "summary": ["<bullet1>", "<bullet2>", "<bullet3>"],
  "action_items": [
    {
      "assignee": "<name or null>",
      "task": "<task or inferred task>",
      "due": "<date or null>",
      "context": "<short context>"
    }
  ],
  "decisions": ["<decision1>", "<decision2>"],
  "sentiment": {"sentiment": "<positive|neutral|negative>", "score": <float between -1 and 1>}
}

Meeting transcript:
"#;

#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("model provider unavailable: {0}")]
    UpstreamUnavailable(#[source] ModelError),
    #[error("meeting store unavailable: {0}")]
    StorageUnavailable(#[source] StoreError),
}

pub struct AnalyzeRequest<'a> {
    pub transcript: &'a str,
    pub title: Option<&'a str>,
    pub date: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub meeting_id: i64,
    pub fields: AnalysisFields,
    pub parsed: bool,
}

pub fn build_prompt(transcript: &str) -> String {
    let mut prompt = String::with_capacity(PROMPT_PREAMBLE.len() + transcript.len() + 1);
    prompt.push_str(PROMPT_PREAMBLE);
    prompt.push_str(transcript);
    prompt.push('\n');
    prompt
}

#[derive(Clone)]
pub struct Analyzer {
    model: Arc<dyn ModelProvider>,
    store: MeetingStore,
}

impl Analyzer {
    pub fn new(model: Arc<dyn ModelProvider>, store: MeetingStore) -> Self {
        Self { model, store }
    }

    pub async fn analyze(
        &self,
        request: AnalyzeRequest<'_>,
        owner: &Identity,
    ) -> Result<AnalysisResult, AnalyzeError> {
        let transcript = request.transcript.trim();
        if transcript.is_empty() {
            return Err(AnalyzeError::InvalidInput("Transcript is empty."));
        }

        let title = request
            .title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_MEETING_TITLE);
        let date = request.date.map(str::trim).filter(|d| !d.is_empty());

        let raw = self
            .model
            .generate(&build_prompt(transcript))
            .await
            .map_err(AnalyzeError::UpstreamUnavailable)?;

        let extraction = meetly_extract::extract(&raw);
        crate::metrics::observe_extraction(extraction.outcome());
        if !extraction.is_parsed() {
            tracing::warn!(
                raw_len = raw.len(),
                "model response held no usable JSON; storing defaults"
            );
        }
        let parsed = extraction.is_parsed();
        let fields = extraction.into_fields();

        let meeting_id = self
            .store
            .insert_meeting(NewMeeting {
                owner_id: &owner.subject_id,
                owner_contact: owner.contact.as_deref(),
                title: Some(title),
                occurred_on: date,
                transcript,
                fields: &fields,
            })
            .await
            .map_err(AnalyzeError::StorageUnavailable)?;

        Ok(AnalysisResult {
            meeting_id,
            fields,
            parsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use meetly_contracts::{ActionItem, Sentiment, SentimentLabel};

    struct CannedModel {
        reply: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedModel {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().expect("prompt log").len()
        }
    }

    #[async_trait]
    impl ModelProvider for CannedModel {
        async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
            self.prompts.lock().expect("prompt log").push(prompt.to_string());
            self.reply.clone().map_err(|_| ModelError::InvalidResponse)
        }
    }

    fn owner(subject: &str) -> Identity {
        Identity {
            subject_id: subject.to_string(),
            contact: Some(format!("{subject}@example.com")),
            display_name: None,
        }
    }

    async fn memory_store() -> MeetingStore {
        MeetingStore::connect_and_migrate(meetly_store::IN_MEMORY, Duration::from_secs(2))
            .await
            .expect("in-memory store should migrate")
    }

    const STANDUP_REPLY: &str = r#"{"summary":["Ship by Friday"],"action_items":[{"assignee":"Bob","task":"Ship feature","due":"Friday","context":""}],"decisions":["Agreed to ship Friday"],"sentiment":{"sentiment":"positive","score":0.6}}"#;

    #[test]
    fn prompt_embeds_schema_and_verbatim_transcript() {
        let transcript = "Alice: {weird} \"quotes\"\nBob: ok";
        let prompt = build_prompt(transcript);
        assert!(prompt.starts_with("You are a JSON-only meeting summarizer."));
        assert!(prompt.contains("\"action_items\""));
        assert!(prompt.ends_with(&format!("Meeting transcript:\n{transcript}\n")));
    }

    #[tokio::test]
    async fn standup_analysis_persists_exact_fields() {
        let store = memory_store().await;
        let model = CannedModel::replying(STANDUP_REPLY);
        let analyzer = Analyzer::new(model.clone(), store.clone());

        let result = analyzer
            .analyze(
                AnalyzeRequest {
                    transcript: "Alice: let's ship by Friday. Bob: agreed.",
                    title: Some("Standup"),
                    date: None,
                },
                &owner("alice"),
            )
            .await
            .expect("analysis should succeed");

        let expected = AnalysisFields {
            summary: vec!["Ship by Friday".to_string()],
            action_items: vec![ActionItem {
                assignee: Some("Bob".to_string()),
                task: "Ship feature".to_string(),
                due: Some("Friday".to_string()),
                context: Some(String::new()),
            }],
            decisions: vec!["Agreed to ship Friday".to_string()],
            sentiment: Sentiment::new(SentimentLabel::Positive, 0.6),
        };
        assert!(result.parsed);
        assert_eq!(result.fields, expected);
        assert_eq!(model.calls(), 1);

        let stored = store
            .get_meeting(result.meeting_id, "alice")
            .await
            .expect("get")
            .expect("record persisted");
        assert_eq!(stored.title.as_deref(), Some("Standup"));
        assert_eq!(stored.owner_contact.as_deref(), Some("alice@example.com"));
        assert_eq!(stored.summary, expected.summary);
        assert_eq!(stored.action_items, expected.action_items);
        assert_eq!(stored.sentiment, expected.sentiment);
    }

    #[tokio::test]
    async fn blank_transcript_is_rejected_without_side_effects() {
        let store = memory_store().await;
        let model = CannedModel::replying(STANDUP_REPLY);
        let analyzer = Analyzer::new(model.clone(), store.clone());

        for transcript in ["", "   \n\t "] {
            let err = analyzer
                .analyze(
                    AnalyzeRequest {
                        transcript,
                        title: None,
                        date: None,
                    },
                    &owner("alice"),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, AnalyzeError::InvalidInput(_)));
        }

        assert_eq!(model.calls(), 0);
        assert!(store.list_meetings("alice", 50).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn model_failure_surfaces_as_upstream_unavailable() {
        let store = memory_store().await;
        let analyzer = Analyzer::new(CannedModel::failing(), store.clone());

        let err = analyzer
            .analyze(
                AnalyzeRequest {
                    transcript: "Alice: hi",
                    title: None,
                    date: None,
                },
                &owner("alice"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzeError::UpstreamUnavailable(_)));
        assert!(store.list_meetings("alice", 50).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn closed_store_surfaces_as_storage_unavailable_after_one_model_call() {
        let store = memory_store().await;
        let model = CannedModel::replying(STANDUP_REPLY);
        let analyzer = Analyzer::new(model.clone(), store.clone());
        store.close().await;

        let err = analyzer
            .analyze(
                AnalyzeRequest {
                    transcript: "Alice: hi",
                    title: Some("Standup"),
                    date: None,
                },
                &owner("alice"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzeError::StorageUnavailable(_)));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn prose_reply_is_stored_as_defaults_with_default_title() {
        let store = memory_store().await;
        let analyzer = Analyzer::new(
            CannedModel::replying("Sorry, I can't summarize that right now."),
            store.clone(),
        );

        let result = analyzer
            .analyze(
                AnalyzeRequest {
                    transcript: "  Alice: hi  ",
                    title: Some("   "),
                    date: Some("2025-01-02"),
                },
                &owner("alice"),
            )
            .await
            .expect("fallback still persists");
        assert!(!result.parsed);
        assert_eq!(result.fields, AnalysisFields::default());

        let stored = store
            .get_meeting(result.meeting_id, "alice")
            .await
            .expect("get")
            .expect("record persisted");
        assert_eq!(stored.title.as_deref(), Some(DEFAULT_MEETING_TITLE));
        assert_eq!(stored.occurred_on.as_deref(), Some("2025-01-02"));
        assert_eq!(stored.transcript, "Alice: hi");
    }

    #[tokio::test]
    async fn fenced_reply_with_prose_is_recovered() {
        let store = memory_store().await;
        let reply = format!("Here is your summary:\n```json\n{STANDUP_REPLY}\n```\nHope it helps!");
        let analyzer = Analyzer::new(CannedModel::replying(&reply), store);

        let result = analyzer
            .analyze(
                AnalyzeRequest {
                    transcript: "Alice: let's ship by Friday. Bob: agreed.",
                    title: Some("Standup"),
                    date: None,
                },
                &owner("alice"),
            )
            .await
            .expect("analysis should succeed");
        assert!(result.parsed);
        assert_eq!(result.fields.decisions, vec!["Agreed to ship Friday".to_string()]);
    }
}
