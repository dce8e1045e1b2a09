//! Centralised prompt texts: personas, the memory context block and the
//! tool-use guidance appended to the system prompt.

use std::str::FromStr;

use serde::Serialize;

use crate::db::MemoryMatch;
use crate::error::GhostError;
use crate::util::truncate_chars;

// ---------------------------------------------------------------------------
// personas
// ---------------------------------------------------------------------------

const BANKS_PROMPT: &str = "You are Banks, a professional AI assistant. Be direct, efficient, and focus on \
business productivity. Keep responses concise and actionable.";

const BELLA_PROMPT: &str = "You are Bella, a friendly and warm AI assistant. Be conversational, empathetic, \
and helpful. Use a more casual tone while remaining professional.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    #[default]
    Banks,
    Bella,
}

impl Persona {
    pub const ALL: [Persona; 2] = [Persona::Banks, Persona::Bella];

    pub fn name(self) -> &'static str {
        match self {
            Persona::Banks => "banks",
            Persona::Bella => "bella",
        }
    }

    /// Speaker label used when a chat turn is stored as a memory.
    pub fn display_name(self) -> &'static str {
        match self {
            Persona::Banks => "Banks",
            Persona::Bella => "Bella",
        }
    }

    pub fn system_prompt(self) -> &'static str {
        match self {
            Persona::Banks => BANKS_PROMPT,
            Persona::Bella => BELLA_PROMPT,
        }
    }

    fn wake_words(self) -> &'static [&'static str] {
        match self {
            Persona::Banks => &["hey banks", "agent banks", "banks"],
            Persona::Bella => &["hey bella", "hi bella", "bella"],
        }
    }

    /// Persona addressed by a wake word in the message, if any. Matches whole
    /// words only, so "riverbanks" doesn't summon Banks.
    pub fn detect(message: &str) -> Option<Persona> {
        let words: Vec<String> = message
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        let normalized = format!(" {} ", words.join(" "));
        Persona::ALL.into_iter().find(|p| {
            p.wake_words()
                .iter()
                .any(|w| normalized.contains(&format!(" {w} ")))
        })
    }
}

impl FromStr for Persona {
    type Err = GhostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Persona::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| GhostError::Validation(format!("unknown persona: {s} (expected banks or bella)")))
    }
}

// ---------------------------------------------------------------------------
// chat system prompt
// ---------------------------------------------------------------------------

const MEMORY_HEADER: &str = "Relevant memories from previous conversations and saved knowledge. \
Use them when they help; do not mention them unless asked.";

const TOOLS_NOTE: &str = "You can call tools. Use search_memories when the context below is not enough, \
and save_memory when the user asks you to remember something. Call other tools only when the user \
asks for that action.";

/// Per-memory content budget inside the prompt.
const MEMORY_SNIPPET_CHARS: usize = 600;

/// Format retrieved memories as a bullet list. Empty input gives an empty
/// string.
pub fn memory_context(matches: &[MemoryMatch]) -> String {
    if matches.is_empty() {
        return String::new();
    }
    let mut out = String::from(MEMORY_HEADER);
    out.push('\n');
    for m in matches {
        let mem = &m.memory;
        out.push_str(&format!(
            "\n- [{}] {} (relevance {:.2}): {}",
            mem.memory_type.as_str(),
            mem.title,
            m.similarity,
            truncate_chars(mem.content.trim(), MEMORY_SNIPPET_CHARS).replace('\n', " ")
        ));
    }
    out
}

pub fn system_prompt(persona: Persona, matches: &[MemoryMatch], tools_enabled: bool) -> String {
    let mut prompt = persona.system_prompt().to_string();
    if tools_enabled {
        prompt.push_str("\n\n");
        prompt.push_str(TOOLS_NOTE);
    }
    let ctx = memory_context(matches);
    if !ctx.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&ctx);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Memory, MemoryStatus, MemoryType};

    fn m(title: &str, content: &str, sim: f64) -> MemoryMatch {
        MemoryMatch {
            memory: Memory {
                id: "id".into(),
                title: title.into(),
                content: content.into(),
                summary: None,
                memory_type: MemoryType::Project,
                tags: vec![],
                relevance_score: 0.5,
                access_count: 0,
                project_ref: "default".into(),
                topic_id: None,
                status: MemoryStatus::Active,
                created_at: 0,
                updated_at: 0,
                last_accessed: 0,
                deleted_at: None,
                has_embedding: true,
            },
            similarity: sim,
        }
    }

    #[test]
    fn wake_words_pick_persona() {
        assert_eq!(Persona::detect("Hey Bella, what's up?"), Some(Persona::Bella));
        assert_eq!(Persona::detect("banks: draft the invoice"), Some(Persona::Banks));
        assert_eq!(Persona::detect("walk along the riverbanks"), None);
        assert_eq!(Persona::detect("plain question"), None);
    }

    #[test]
    fn persona_names_parse() {
        assert_eq!("Bella".parse::<Persona>().unwrap(), Persona::Bella);
        assert!("jarvis".parse::<Persona>().is_err());
    }

    #[test]
    fn prompt_includes_memories_and_tools_note() {
        let p = system_prompt(Persona::Banks, &[m("Launch plan", "ship on\nfriday", 0.91)], true);
        assert!(p.starts_with("You are Banks"));
        assert!(p.contains("search_memories"));
        assert!(p.contains("- [project] Launch plan (relevance 0.91): ship on friday"));
    }

    #[test]
    fn prompt_without_context_is_just_persona() {
        assert_eq!(system_prompt(Persona::Bella, &[], false), BELLA_PROMPT);
    }
}
