//! Dispatcher response parsing.
//!
//! The dispatcher model is asked for a JSON object
//! `{intent, reply?, taskTitle?, taskDescription?}` but real replies arrive
//! wrapped in prose, code fences, or half-escaped. The parsing ladder tries
//! progressively sloppier recoveries before giving up.

use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Chat,
    QueryMemory,
    CreateTask,
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Intent::Chat),
            "query_memory" => Ok(Intent::QueryMemory),
            "create_task" => Ok(Intent::CreateTask),
            other => Err(format!("unknown intent: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchDecision {
    pub intent: Intent,
    pub reply: Option<String>,
    pub task_title: Option<String>,
    pub task_description: Option<String>,
}

impl DispatchDecision {
    /// Degraded decision when the model can't produce valid JSON: treat the
    /// raw text as a chat reply, capped at 500 chars.
    pub fn fallback_chat(raw: &str) -> Self {
        let reply: String = raw.chars().take(500).collect();
        Self {
            intent: Intent::Chat,
            reply: Some(reply),
            task_title: None,
            task_description: None,
        }
    }
}

#[derive(Deserialize)]
struct WireDecision {
    intent: String,
    #[serde(default)]
    reply: Option<String>,
    #[serde(default, alias = "taskTitle")]
    task_title: Option<String>,
    #[serde(default, alias = "taskDescription")]
    task_description: Option<String>,
}

/// Parse a dispatcher reply. The ladder, in order:
/// 1. the entire text as JSON;
/// 2. the contents of a fenced code block;
/// 3. the largest balanced `{…}` scanning from the end;
/// 4. the first-`{` .. last-`}` slice;
/// 5. per-field regex extraction;
/// 6. long free text without an `"intent"` key parses as a chat reply.
pub fn parse_decision(raw: &str) -> Option<DispatchDecision> {
    let trimmed = raw.trim();

    if let Some(decision) = try_json(trimmed) {
        return Some(decision);
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Some(decision) = try_json(&block) {
            return Some(decision);
        }
    }

    if let Some(slice) = balanced_object_from_end(trimmed) {
        if let Some(decision) = try_json(slice) {
            return Some(decision);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            if let Some(decision) = try_json(&trimmed[start..=end]) {
                return Some(decision);
            }
        }
    }

    if let Some(decision) = regex_fields(trimmed) {
        return Some(decision);
    }

    // Long free text that never mentions "intent" is just a chat answer.
    if !trimmed.contains("\"intent\"") && trimmed.chars().count() > 80 {
        return Some(DispatchDecision::fallback_chat(trimmed));
    }

    None
}

fn try_json(candidate: &str) -> Option<DispatchDecision> {
    let wire: WireDecision = serde_json::from_str(candidate).ok()?;
    let intent = wire.intent.parse().ok()?;
    Some(DispatchDecision {
        intent,
        reply: wire.reply,
        task_title: wire.task_title.filter(|t| !t.trim().is_empty()),
        task_description: wire.task_description,
    })
}

/// Contents of the first fenced code block (```json … ``` or bare ```).
fn fenced_block(text: &str) -> Option<String> {
    let re = Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)```").ok()?;
    re.captures(text).map(|c| c[1].trim().to_string())
}

/// Largest balanced `{…}` found scanning from the end of the text.
fn balanced_object_from_end(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut end = text.len();
    while let Some(close) = text[..end].rfind('}') {
        let mut depth = 0i32;
        let mut in_string = false;
        for i in (0..=close).rev() {
            let b = bytes[i];
            if in_string {
                // Walking backwards, a quote closes the string unless the
                // preceding byte escapes it.
                if b == b'"' && (i == 0 || bytes[i - 1] != b'\\') {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'}' => depth += 1,
                b'{' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[i..=close]);
                    }
                }
                _ => {}
            }
        }
        end = close;
    }
    None
}

/// Last-resort field scraping with per-field regexes.
fn regex_fields(text: &str) -> Option<DispatchDecision> {
    let intent_re = Regex::new(r#""intent"\s*:\s*"(\w+)""#).ok()?;
    let intent: Intent = intent_re.captures(text)?[1].parse().ok()?;

    let grab = |field: &str| -> Option<String> {
        let re = Regex::new(&format!(r#""{field}"\s*:\s*"((?:[^"\\]|\\.)*)""#)).ok()?;
        let cap = re.captures(text)?;
        // Re-run the capture through the JSON string parser to unescape.
        serde_json::from_str::<String>(&format!("\"{}\"", &cap[1])).ok()
    };

    Some(DispatchDecision {
        intent,
        reply: grab("reply"),
        task_title: grab("taskTitle").filter(|t| !t.trim().is_empty()),
        task_description: grab("taskDescription"),
    })
}
