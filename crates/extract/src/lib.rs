use std::sync::OnceLock;

use meetly_contracts::{ActionItem, AnalysisFields, Sentiment, SentimentLabel};
use regex::Regex;
use serde_json::{Map, Value};

/// Upper bound on opening brackets tried as candidate starts.
const MAX_CANDIDATE_STARTS: usize = 16;

static FENCE_MARKER: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Parsed(AnalysisFields),
    Fallback(AnalysisFields),
}

impl Extraction {
    pub fn fields(&self) -> &AnalysisFields {
        match self {
            Extraction::Parsed(fields) | Extraction::Fallback(fields) => fields,
        }
    }

    pub fn into_fields(self) -> AnalysisFields {
        match self {
            Extraction::Parsed(fields) | Extraction::Fallback(fields) => fields,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Extraction::Parsed(_))
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            Extraction::Parsed(_) => "parsed",
            Extraction::Fallback(_) => "fallback",
        }
    }
}

pub fn extract(raw: &str) -> Extraction {
    let cleaned = strip_fence_markers(raw);
    match locate_object(&cleaned) {
        Some(map) => Extraction::Parsed(fields_from_map(&map)),
        None => Extraction::Fallback(AnalysisFields::default()),
    }
}

pub fn strip_fence_markers(raw: &str) -> String {
    fence_marker().replace_all(raw, "").into_owned()
}

fn fence_marker() -> &'static Regex {
    FENCE_MARKER.get_or_init(|| {
        Regex::new(r"```[A-Za-z0-9_+\-]*").expect("fence marker pattern is valid")
    })
}

/// Greedy search: each opening bracket, in order, is paired with the last matching
/// closer in the text. The first span that parses to a JSON object wins.
fn locate_object(cleaned: &str) -> Option<Map<String, Value>> {
    let mut starts_tried = 0;

    for (start, ch) in cleaned.char_indices() {
        let closer = match ch {
            '{' => '}',
            '[' => ']',
            _ => continue,
        };
        if starts_tried == MAX_CANDIDATE_STARTS {
            break;
        }
        starts_tried += 1;

        let Some(end) = cleaned.rfind(closer) else {
            continue;
        };
        if end <= start {
            continue;
        }

        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&cleaned[start..=end]) {
            return Some(map);
        }
    }

    match serde_json::from_str::<Value>(cleaned.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn fields_from_map(map: &Map<String, Value>) -> AnalysisFields {
    AnalysisFields {
        summary: string_list(map.get("summary")),
        action_items: action_items(map),
        decisions: string_list(map.get("decisions")),
        sentiment: sentiment(map.get("sentiment")),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

fn action_items(map: &Map<String, Value>) -> Vec<ActionItem> {
    let items = action_item_list(map.get("action_items"));
    if !items.is_empty() {
        return items;
    }
    action_item_list(map.get("actions"))
}

fn action_item_list(value: Option<&Value>) -> Vec<ActionItem> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items.iter().filter_map(action_item).collect()
}

fn action_item(value: &Value) -> Option<ActionItem> {
    match value {
        Value::String(task) => Some(ActionItem {
            assignee: None,
            task: task.clone(),
            due: None,
            context: None,
        }),
        Value::Object(obj) => {
            let task = obj.get("task").and_then(Value::as_str)?;
            Some(ActionItem {
                assignee: optional_string(obj, "assignee"),
                task: task.to_string(),
                due: optional_string(obj, "due"),
                context: optional_string(obj, "context"),
            })
        }
        _ => None,
    }
}

fn sentiment(value: Option<&Value>) -> Sentiment {
    let Some(Value::Object(obj)) = value else {
        return Sentiment::default();
    };

    let label = obj
        .get("sentiment")
        .or_else(|| obj.get("label"))
        .and_then(Value::as_str)
        .and_then(SentimentLabel::parse)
        .unwrap_or_default();

    let score = match obj.get("score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .unwrap_or(0.0);

    Sentiment::new(label, score)
}

fn optional_string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}
