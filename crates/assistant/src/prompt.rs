//! Prompt assembly: persona, in-band action grammar, context bullets and
//! the recent conversation window.

use bizpilot_config::AssistantConfig;
use bizpilot_core::message::Message;
use bizpilot_core::provider::ChatTurn;

use crate::retriever::ContextBundle;

const PERSONA: &str = "You are Bizpilot, an assistant for small business owners. \
You help entrepreneurs with their finances, tasks, documents and marketing. \
Answer briefly, to the point and in a friendly tone.";

const ACTION_GRAMMAR: &str = "IMPORTANT: if the user asks you to perform an action \
(create a task, record an expense, generate a document), append a marker at the very \
end of your reply:
[ACTION:<action_type>:<param1>|<param2>|...]

Available actions:
- [ACTION:create_task:Title|Description|Priority|Category]
- [ACTION:add_expense:Amount|Description|Category]
- [ACTION:add_income:Amount|Description|Category]
- [ACTION:analyze_finance:Start date|End date]
- [ACTION:generate_document:Type|key=value|...]
- [ACTION:create_campaign:Name|Platform|Content type]

Priority is one of low, medium, high, urgent. Dates use YYYY-MM-DD. \
Document types are contract, invoice and act.";

const CLOSING: &str = "Use this information to personalize your answers.";

/// Turns a context bundle and history into the turns sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptAssembler {
    items_per_domain: usize,
    history_window: usize,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::from(&AssistantConfig::default())
    }
}

impl From<&AssistantConfig> for PromptAssembler {
    fn from(config: &AssistantConfig) -> Self {
        Self::new(config.prompt_items_per_domain, config.history_window)
    }
}

impl PromptAssembler {
    pub fn new(items_per_domain: usize, history_window: usize) -> Self {
        Self {
            items_per_domain,
            history_window,
        }
    }

    /// The system instruction: persona, grammar, then one section per non-empty domain.
    pub fn system_prompt(&self, bundle: &ContextBundle) -> String {
        let n = self.items_per_domain;
        let mut prompt = format!("{PERSONA}\n\n{ACTION_GRAMMAR}\n");

        if !bundle.tasks.is_empty() {
            prompt.push_str("\nCURRENT TASKS:\n");
            for t in bundle.tasks.iter().take(n).map(|s| &s.item) {
                prompt.push_str(&format!(
                    "- [{}] {} (priority: {})\n",
                    t.status.as_str(),
                    t.title,
                    t.priority.as_str()
                ));
            }
        }

        if !bundle.finance.is_empty() {
            prompt.push_str("\nRECENT FINANCE RECORDS:\n");
            for f in bundle.finance.iter().take(n).map(|s| &s.item) {
                prompt.push_str(&format!(
                    "- {}: {:.2} - {}\n",
                    f.kind.as_str(),
                    f.amount,
                    f.description.as_deref().unwrap_or("no description")
                ));
            }
        }

        if !bundle.marketing.is_empty() {
            prompt.push_str("\nMARKETING CAMPAIGNS:\n");
            for c in bundle.marketing.iter().take(n).map(|s| &s.item) {
                prompt.push_str(&format!(
                    "- {} on {} ({})\n",
                    c.name,
                    c.platform.as_deref().unwrap_or("unspecified platform"),
                    c.status.as_str()
                ));
            }
        }

        if !bundle.documents.is_empty() {
            prompt.push_str("\nDOCUMENTS:\n");
            for d in bundle.documents.iter().take(n).map(|s| &s.item) {
                prompt.push_str(&format!("- {}\n", d.title));
            }
        }

        prompt.push('\n');
        prompt.push_str(CLOSING);
        prompt
    }

    /// System turn, the last `history_window` messages verbatim, then the new user message.
    pub fn build(&self, bundle: &ContextBundle, history: &[Message], user_text: &str) -> Vec<ChatTurn> {
        let start = history.len().saturating_sub(self.history_window);
        let mut turns = Vec::with_capacity(history.len() - start + 2);
        turns.push(ChatTurn::system(self.system_prompt(bundle)));
        turns.extend(history[start..].iter().map(|m| ChatTurn {
            role: m.role,
            content: m.content.clone(),
        }));
        turns.push(ChatTurn::user(user_text));
        turns
    }
}
