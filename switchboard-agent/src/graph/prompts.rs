//! System prompts for coordinator and terminal nodes.

use super::state::{ResponseTone, SuspendReason};
use super::template::{GraphTemplate, FINALIZE_TOOL};

/// Builds the system prompts used by the executor's own nodes.
pub struct PromptAssembler;

impl PromptAssembler {
    /// Coordinator prompt listing every route plus finalize.
    pub fn coordinator(template: &GraphTemplate, override_prompt: Option<&str>) -> String {
        let mut prompt = String::new();

        match override_prompt {
            Some(custom) => prompt.push_str(custom),
            None => {
                prompt.push_str("# Role\n\n");
                prompt.push_str(
                    "You coordinate a team of specialist agents. Read the conversation, decide \
                     which single agent should act next, and call its routing tool. When the \
                     conversation already contains what the user needs, call the finalize tool.\n",
                );
            }
        }

        prompt.push_str("\n# Available agents\n\n");
        let mut any = false;
        for route in template.routes() {
            any = true;
            prompt.push_str(&format!(
                "- `{}`: {}\n",
                route.tool_name(),
                route.description
            ));
        }
        if !any {
            prompt.push_str("- (none; answer directly by finalizing)\n");
        }
        prompt.push_str(&format!(
            "- `{}`: end the turn and hand off to the final writer\n",
            FINALIZE_TOOL
        ));

        prompt.push_str("\n# Rules\n\n");
        prompt.push_str("- Call exactly one tool per reply.\n");
        prompt.push_str("- Do not route to an agent that has just answered the same question.\n");
        prompt.push_str("- Never answer the user yourself.\n");

        prompt
    }

    /// Suspend prompt explaining which limit stopped the turn.
    pub fn suspend(
        reason: &SuspendReason,
        tone: ResponseTone,
        suggestions: &[String],
        override_prompt: Option<&str>,
    ) -> String {
        let mut prompt = String::new();

        if let Some(custom) = override_prompt {
            prompt.push_str(custom);
            prompt.push_str("\n\n");
        } else {
            prompt.push_str("# Situation\n\n");
            prompt.push_str(
                "The agents working on this request were stopped before they finished. \
                 Summarize what was accomplished from the conversation so far, explain briefly \
                 that a processing limit was reached, and tell the user how to continue.\n\n",
            );
        }

        let (current, maximum) = match reason {
            SuspendReason::HopLimit { hops, max } => (*hops, *max),
            SuspendReason::ConsecutiveRouteLimit { count, limit, .. } => (*count, *limit),
            SuspendReason::StepLimit { steps, limit } => (*steps, *limit),
        };
        prompt.push_str(&format!("Limit reached: {} ({}/{}).\n\n", reason, current, maximum));

        Self::push_style(&mut prompt, tone, suggestions);
        prompt
    }

    /// Finalizer prompt; `suspend_draft` is present when the turn was suspended.
    pub fn finalizer(
        tone: ResponseTone,
        suggestions: &[String],
        suspend_draft: Option<&str>,
        override_prompt: Option<&str>,
    ) -> String {
        let mut prompt = String::new();

        match override_prompt {
            Some(custom) => {
                prompt.push_str(custom);
                prompt.push_str("\n\n");
            }
            None => {
                prompt.push_str("# Role\n\n");
                prompt.push_str(
                    "Write the final answer to the user's latest message using the results the \
                     agents produced in this conversation. Do not mention agents, tools or \
                     routing.\n\n",
                );
            }
        }

        if let Some(draft) = suspend_draft {
            prompt.push_str("# Suspension notice\n\n");
            prompt.push_str(
                "Processing stopped at a limit. Rewrite the following notice as the final \
                 answer, keeping every fact it states:\n\n",
            );
            prompt.push_str(draft);
            prompt.push_str("\n\n");
        }

        Self::push_style(&mut prompt, tone, suggestions);
        prompt
    }

    /// Prompt used by the error handler to apologise gracefully.
    pub fn error_handler(error: &str, tone: ResponseTone) -> String {
        let mut prompt = String::new();
        prompt.push_str(
            "A failure interrupted this request. Apologise briefly, say the request could not be \
             completed right now, and suggest trying again. Do not include technical details.\n\n",
        );
        prompt.push_str(&format!("Internal error (do not quote): {}\n\n", error));
        prompt.push_str("# Tone\n\n");
        prompt.push_str(tone.instruction());
        prompt.push('\n');
        prompt
    }

    fn push_style(prompt: &mut String, tone: ResponseTone, suggestions: &[String]) {
        prompt.push_str("# Tone\n\n");
        prompt.push_str(tone.instruction());
        prompt.push('\n');

        if !suggestions.is_empty() {
            prompt.push_str("\n# Formatting guidance\n\n");
            for suggestion in suggestions {
                prompt.push_str(&format!("- {}\n", suggestion));
            }
        }
    }
}
