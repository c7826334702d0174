use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedResponse {
    pub track_ids: Vec<String>,
    pub reasoning: Option<String>,
}

/// Parse either `["id", ...]` or `{"track_ids": [...], "reasoning": "..."}`.
///
/// Code fences and prose around the JSON are tolerated.
pub fn parse_response(raw: &str) -> Result<ParsedResponse, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty response".to_string());
    }

    let value = serde_json::from_str::<Value>(trimmed)
        .ok()
        .or_else(|| embedded_json(trimmed))
        .ok_or_else(|| format!("no JSON found in response: {}", preview(trimmed)))?;

    interpret(value)
}

/// Locate the outermost JSON array or object inside surrounding text
fn embedded_json(text: &str) -> Option<Value> {
    let spans = [('[', ']'), ('{', '}')];
    let mut candidates: Vec<(usize, usize)> = spans
        .iter()
        .filter_map(|(open, close)| {
            let start = text.find(*open)?;
            let end = text.rfind(*close)?;
            (end > start).then_some((start, end))
        })
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .find_map(|(start, end)| serde_json::from_str(&text[start..=end]).ok())
}

fn interpret(value: Value) -> Result<ParsedResponse, String> {
    match value {
        Value::Array(items) => Ok(ParsedResponse {
            track_ids: ids_from(items),
            reasoning: None,
        }),
        Value::Object(mut map) => {
            let ids = map
                .remove("track_ids")
                .or_else(|| map.remove("tracks"))
                .ok_or_else(|| "object response has no track_ids".to_string())?;

            let Value::Array(items) = ids else {
                return Err("track_ids is not an array".to_string());
            };

            let reasoning = map
                .remove("reasoning")
                .and_then(|r| r.as_str().map(|s| s.trim().to_string()))
                .filter(|s| !s.is_empty());

            Ok(ParsedResponse {
                track_ids: ids_from(items),
                reasoning,
            })
        }
        other => Err(format!("unexpected JSON value: {}", preview(&other.to_string()))),
    }
}

fn ids_from(items: Vec<Value>) -> Vec<String> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(id) => Some(id.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Object(mut obj) => obj.remove("id").and_then(|id| id.as_str().map(str::to_string)),
            _ => None,
        })
        .filter(|id| !id.is_empty())
        .collect()
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}
