use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// One scene as produced by a script parser, before it gets an identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneDraft {
    pub ordinal: u32,
    pub slugline: String,
    pub description: String,
    pub estimated_duration: Option<f64>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("script produced no scenes")]
    Empty,
    #[error("malformed script: {0}")]
    Malformed(String),
    #[error("script parser failed: {0}")]
    Upstream(String),
}

/// The script-parsing collaborator. Implementations may call out to a remote
/// language model, hence async.
#[async_trait::async_trait]
pub trait ScriptParser: Send + Sync {
    fn name(&self) -> &str;

    async fn parse(&self, raw: &str) -> Result<Vec<SceneDraft>, ParseError>;
}

/// Local parser for structured JSON screenplays and plain-text scripts.
#[derive(Debug, Clone, Default)]
pub struct ScreenplayParser;

#[async_trait::async_trait]
impl ScriptParser for ScreenplayParser {
    fn name(&self) -> &str {
        "screenplay"
    }

    async fn parse(&self, raw: &str) -> Result<Vec<SceneDraft>, ParseError> {
        parse_screenplay(raw)
    }
}

const WORDS_PER_SECOND: f64 = 2.5;
const MIN_ESTIMATE_SECONDS: f64 = 2.0;
const MAX_ESTIMATE_SECONDS: f64 = 10.0;

const HEADING_PREFIXES: &[&str] = &["INT./EXT.", "INT/EXT.", "I/E.", "INT.", "EXT."];

pub fn parse_screenplay(raw: &str) -> Result<Vec<SceneDraft>, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let drafts = match json_payload(trimmed) {
        Some(json) => structured_to_drafts(parse_structured(json)?),
        None => parse_plain_text(trimmed),
    };

    if drafts.is_empty() {
        return Err(ParseError::Empty);
    }
    debug!(scenes = drafts.len(), "parsed screenplay");
    Ok(drafts)
}

/// The JSON document to parse, if the script is one. Only a script that opens
/// with `{` or carries a fenced block opening with `{` counts; braces inside
/// plain screenplay text do not.
fn json_payload(text: &str) -> Option<&str> {
    if text.starts_with('{') {
        return Some(text);
    }
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let body = &after_fence[after_fence.find('\n')? + 1..];
    let block = body[..body.find("```")?].trim();
    block.starts_with('{').then_some(block)
}

#[derive(Debug, Default, Deserialize)]
struct StructuredScript {
    #[serde(default)]
    acts: Vec<StructuredAct>,
    #[serde(default)]
    scenes: Vec<StructuredShot>,
    #[serde(default)]
    shots: Vec<StructuredShot>,
}

#[derive(Debug, Default, Deserialize)]
struct StructuredAct {
    #[serde(default)]
    shots: Vec<StructuredShot>,
    #[serde(default)]
    scenes: Vec<StructuredShot>,
}

#[derive(Debug, Default, Deserialize)]
struct StructuredShot {
    #[serde(default, alias = "slugline", alias = "heading")]
    title: Option<String>,
    #[serde(default, alias = "description", alias = "prompt")]
    visual_description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default, alias = "estimated_duration", alias = "duration_seconds")]
    duration: Option<f64>,
}

fn parse_structured(text: &str) -> Result<StructuredScript, ParseError> {
    if let Ok(parsed) = serde_json::from_str::<StructuredScript>(text) {
        return Ok(parsed);
    }
    // Model output sometimes trails the closing brace with prose.
    let start = text.find('{');
    let end = text.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if end > start => {
            serde_json::from_str::<StructuredScript>(&text[start..=end])
                .map_err(|e| ParseError::Malformed(e.to_string()))
        }
        _ => Err(ParseError::Malformed("no JSON object found".to_string())),
    }
}

fn structured_to_drafts(script: StructuredScript) -> Vec<SceneDraft> {
    let shots = script
        .acts
        .into_iter()
        .flat_map(|act| act.shots.into_iter().chain(act.scenes))
        .chain(script.scenes)
        .chain(script.shots);

    shots
        .enumerate()
        .map(|(idx, shot)| {
            let ordinal = idx as u32 + 1;
            let title = clean(shot.title);
            let location = clean(shot.location);
            let description = clean(shot.visual_description);
            let slugline = title
                .clone()
                .or_else(|| location.clone())
                .unwrap_or_else(|| format!("Scene {ordinal}"));
            SceneDraft {
                ordinal,
                description: description.or(title).unwrap_or_else(|| slugline.clone()),
                slugline,
                estimated_duration: shot.duration,
            }
        })
        .collect()
}

fn parse_plain_text(text: &str) -> Vec<SceneDraft> {
    let blocks = if text.lines().any(is_scene_heading) {
        split_on_headings(text)
    } else {
        split_on_blank_lines(text)
    };

    blocks
        .into_iter()
        .enumerate()
        .map(|(idx, (slugline, body))| {
            let body = body.trim().to_string();
            let description = if body.is_empty() {
                slugline.clone()
            } else {
                body
            };
            SceneDraft {
                ordinal: idx as u32 + 1,
                estimated_duration: Some(estimate_duration(&description)),
                slugline,
                description,
            }
        })
        .collect()
}

fn split_on_headings(text: &str) -> Vec<(String, String)> {
    let mut blocks: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        if is_scene_heading(line) {
            blocks.push((line.trim().to_string(), String::new()));
        } else if let Some((_, body)) = blocks.last_mut() {
            if !line.trim().is_empty() {
                if !body.is_empty() {
                    body.push('\n');
                }
                body.push_str(line.trim());
            }
        }
        // Text before the first heading is title-page material.
    }
    blocks
}

/// Blank-line separated blocks; the first line of each block is its heading.
fn split_on_blank_lines(text: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines().chain(std::iter::once("")) {
        let line = line.trim();
        if !line.is_empty() {
            current.push(line);
            continue;
        }
        if let Some((heading, body)) = current.split_first() {
            blocks.push((heading.to_string(), body.join("\n")));
        }
        current.clear();
    }
    blocks
}

fn is_scene_heading(line: &str) -> bool {
    let upper = line.trim_start().to_ascii_uppercase();
    HEADING_PREFIXES.iter().any(|p| upper.starts_with(p))
}

/// Rough reading-time estimate for a block of scene text.
pub fn estimate_duration(text: &str) -> f64 {
    let words = text.split_whitespace().count() as f64;
    (words / WORDS_PER_SECOND).clamp(MIN_ESTIMATE_SECONDS, MAX_ESTIMATE_SECONDS)
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|s| !s.is_empty())
}
