//! Rendering a transcript into the single prompt string the daemon takes.

use crate::transcript::{Role, Turn};

/// Cue that ends every prompt; the model continues from it.
pub const ASSISTANT_CUE: &str = "assistant:";

/// Render the system prompt and the turns into one prompt.
///
/// Layout:
///
/// ```text
/// <system prompt>
///
/// user: <content>
/// assistant: <content>
/// assistant:
/// ```
///
/// The system block is omitted when the prompt is blank. Interrupted turns
/// contribute the text that was received. The output depends only on the
/// inputs.
pub fn render_prompt(system_prompt: &str, turns: &[Turn]) -> String {
    let mut prompt = String::new();

    let system = system_prompt.trim();
    if !system.is_empty() {
        prompt.push_str(system);
        prompt.push_str("\n\n");
    }

    for turn in turns.iter().filter(|t| t.role != Role::System) {
        prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
    }

    prompt.push_str(ASSISTANT_CUE);
    prompt
}
