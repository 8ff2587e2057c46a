//! Rubric prompt and transcript rendering for the judge call.

use crate::domain::training::{Message, MessageRole};
use crate::ports::Passage;

/// System prompt sent to the judge model.
pub const RUBRIC_PROMPT: &str = "You are an experienced sales coach reviewing a practice conversation \
between a trainee sales representative and a simulated client.

Assess the trainee on: rapport building, needs discovery, handling of objections, \
clarity of the value proposition, and whether they secured a concrete next step.

Respond with a single JSON object and nothing else, using exactly these fields:
{\"score\": <integer 0-10>, \"strengths\": [<string>, ...], \"mistakes\": [<string>, ...], \"recommendations\": <string>}";

/// Label used for the trainee's lines in a transcript.
pub const TRAINEE_LABEL: &str = "Trainee";
/// Label used for the simulated counterpart's lines in a transcript.
pub const CLIENT_LABEL: &str = "Client";

/// Renders the ordered transcript as `Label: text` lines.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let label = match m.role {
                MessageRole::User => TRAINEE_LABEL,
                MessageRole::Assistant => CLIENT_LABEL,
            };
            format!("{}: {}", label, m.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the rubric system prompt, optionally with model scripts to compare against.
pub fn rubric_system_prompt(reference_scripts: &[Passage]) -> String {
    let scripts: Vec<&str> = reference_scripts
        .iter()
        .map(|p| p.text.trim())
        .filter(|t| !t.is_empty())
        .collect();

    if scripts.is_empty() {
        return RUBRIC_PROMPT.to_string();
    }

    let mut prompt = String::from(RUBRIC_PROMPT);
    prompt.push_str("\n\nExcerpts from model sales scripts for comparison:\n");
    for text in scripts {
        prompt.push_str("---\n");
        prompt.push_str(text);
        prompt.push('\n');
    }
    prompt
}

/// User message carrying the transcript to be judged.
pub fn judge_request(scenario_name: &str, transcript: &str) -> String {
    format!(
        "Scenario: {}\n\nTranscript:\n{}\n\nEvaluate the trainee.",
        scenario_name, transcript
    )
}
