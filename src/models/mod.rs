use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_TITLE: &str = "Untitled Story";
pub const DEFAULT_CHARACTERS: &str = "Unknown Characters";
pub const DEFAULT_STORY_TYPE: &str = "General";

/// Body of `POST /generate_story`, taken from a JSON object.
///
/// A missing key falls back to its default. A present key keeps its value,
/// `null` included, and non-string values are rendered the way the story
/// templates have always shown them (`None`, `True`, `['Ann', 'Bo']`).
#[derive(Debug, Default)]
pub struct StoryRequest {
    pub title: Option<Value>,
    pub characters: Option<Value>,
    pub story_type: Option<Value>,
}

impl From<Map<String, Value>> for StoryRequest {
    fn from(mut fields: Map<String, Value>) -> Self {
        Self {
            title: fields.remove("title"),
            characters: fields.remove("characters"),
            story_type: fields.remove("storyType"),
        }
    }
}

impl StoryRequest {
    pub fn title(&self) -> String {
        field_or(&self.title, DEFAULT_TITLE)
    }

    pub fn characters(&self) -> String {
        field_or(&self.characters, DEFAULT_CHARACTERS)
    }

    pub fn story_type(&self) -> String {
        field_or(&self.story_type, DEFAULT_STORY_TYPE)
    }
}

fn field_or(value: &Option<Value>, default: &str) -> String {
    match value {
        None => default.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => display_value(other),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(display_value).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", quote(k), display_value(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

/// Single quotes unless the text holds a single quote and no double quote.
fn quote(s: &str) -> String {
    let delimiter = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };

    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push(delimiter);
    for c in s.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c if c == delimiter => {
                quoted.push('\\');
                quoted.push(c);
            }
            c => quoted.push(c),
        }
    }
    quoted.push(delimiter);
    quoted
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryPage {
    #[serde(rename = "type")]
    pub kind: PageKind,
    pub content: String,
}

impl StoryPage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: PageKind::Text,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoryResponse {
    pub pages: Vec<StoryPage>,
}

impl From<Vec<String>> for StoryResponse {
    fn from(paragraphs: Vec<String>) -> Self {
        Self {
            pages: paragraphs.into_iter().map(StoryPage::text).collect(),
        }
    }
}

/// The three sections of a story, in the order they are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryPart {
    Beginning,
    Middle,
    End,
}

impl StoryPart {
    pub const ALL: [StoryPart; 3] = [StoryPart::Beginning, StoryPart::Middle, StoryPart::End];

    pub fn label(self) -> &'static str {
        match self {
            StoryPart::Beginning => "beginning",
            StoryPart::Middle => "middle",
            StoryPart::End => "end",
        }
    }
}

impl std::fmt::Display for StoryPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Knobs passed to the text-generation backend for each prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationParams {
    /// Upper bound on generated tokens.
    pub max_length: u32,
    /// Prepend the prompt to the continuation in the returned text.
    pub return_full_text: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_length: 800,
            return_full_text: true,
        }
    }
}
