//! Prompt context assembly for dialogue turns.

use crate::ports::Passage;

/// Heading placed above retrieved passages in the system prompt.
pub const CONTEXT_HEADING: &str = "Reference material you may draw on (stay in character, do not quote it verbatim):";

/// Prepends a context block built from `passages` to the scenario prompt.
///
/// With no passages the base prompt is returned unchanged, so an empty
/// knowledge corpus degrades to the plain scenario prompt.
pub fn compose_system_prompt(base_prompt: &str, passages: &[Passage]) -> String {
    let passages: Vec<&str> = passages
        .iter()
        .map(|p| p.text.trim())
        .filter(|t| !t.is_empty())
        .collect();

    if passages.is_empty() {
        return base_prompt.to_string();
    }

    let mut prompt = String::with_capacity(base_prompt.len() + 256);
    prompt.push_str(CONTEXT_HEADING);
    prompt.push('\n');
    for (i, text) in passages.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n", i + 1, text));
    }
    prompt.push('\n');
    prompt.push_str(base_prompt);
    prompt
}

/// System prompt for suggesting the trainee's next line from model scripts.
pub const SCRIPT_REPLY_PROMPT: &str = "You are a sales coach helping a sales representative answer a client. \
Using the model script excerpts below, write the single reply the representative should send next. \
Follow the scripts' wording and technique where they fit, keep it short and natural, \
and answer with the reply text only.";

/// Stands in for the excerpts when no script matched.
pub const NO_SCRIPTS_FOUND: &str = "No matching scripts found.";

/// Builds the scripted-reply system prompt; excerpts are separated by `---` lines.
pub fn script_reply_system_prompt(scripts: &[Passage]) -> String {
    let scripts: Vec<&str> = scripts
        .iter()
        .map(|p| p.text.trim())
        .filter(|t| !t.is_empty())
        .collect();
    let excerpts = if scripts.is_empty() {
        NO_SCRIPTS_FOUND.to_string()
    } else {
        scripts.join("\n---\n")
    };
    format!("{}\n\nScript excerpts:\n{}", SCRIPT_REPLY_PROMPT, excerpts)
}

/// User message carrying the client line to answer.
pub fn script_reply_request(client_line: &str) -> String {
    format!("Client said: {}", client_line.trim())
}

/// Whether the counterpart's reply ends the dialogue.
///
/// Matching is case-insensitive on substrings; blank phrases never match.
pub fn contains_closing_phrase(reply: &str, phrases: &[String]) -> bool {
    let reply = reply.to_lowercase();
    phrases
        .iter()
        .map(|p| p.trim().to_lowercase())
        .any(|p| !p.is_empty() && reply.contains(&p))
}
