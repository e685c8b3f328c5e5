//! `bizpilot ask`: Run one assistant turn and print the reply.

use std::sync::Arc;

use bizpilot_assistant::{ChatReply, ChatService, strip_actions};
use bizpilot_config::AppConfig;
use bizpilot_core::action::ActionResult;
use bizpilot_core::records::{OwnerId, RecordId};
use bizpilot_store::SqliteStore;

pub async fn run(
    owner: OwnerId,
    conversation: Option<RecordId>,
    message: &str,
    execute: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() && config.llm.provider == "openai" {
        eprintln!();
        eprintln!("  WARNING: No API key configured; the reply will be the fallback text.");
        eprintln!("  Set BIZPILOT_API_KEY or add llm.api_key to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
    }

    let store = Arc::new(
        SqliteStore::with_max_connections(&config.database.url, config.database.max_connections)
            .await?,
    );
    let provider = bizpilot_providers::build_from_config(&config.llm)?;
    let chat = ChatService::new(store.clone(), store, provider, &config.llm, &config.assistant);

    eprint!("  Thinking...");
    let reply = chat.turn(owner, conversation, message).await;
    eprint!("\r              \r");
    let reply = reply?;

    print!("{}", render_reply(&reply));

    if execute && !reply.suggested_actions.is_empty() {
        let results = chat.execute_actions(owner, &reply.suggested_actions).await;
        print!("{}", render_results(&results));
    }

    Ok(())
}

/// The reply text without directives, followed by the suggested actions.
fn render_reply(reply: &ChatReply) -> String {
    let mut out = String::new();
    for line in strip_actions(&reply.message.content).lines() {
        out.push_str(&format!("  Assistant > {line}\n"));
    }
    out.push('\n');

    if !reply.suggested_actions.is_empty() {
        out.push_str("  Suggested actions:\n");
        for (i, action) in reply.suggested_actions.iter().enumerate() {
            out.push_str(&format!(
                "   {}. {}: {} [{}: {}]\n",
                i + 1,
                action.title,
                action.description,
                action.action,
                action.params.join(" | ")
            ));
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "  Conversation: {}   Intent: {} ({:.2})\n",
        reply.conversation_id, reply.intent.intent, reply.intent.confidence
    ));
    out
}

fn render_results(results: &[ActionResult]) -> String {
    let mut out = String::from("\n  Executed:\n");
    for (i, result) in results.iter().enumerate() {
        let mark = if result.success { "ok" } else { "failed" };
        out.push_str(&format!("   {}. [{mark}] {}\n", i + 1, result.message));
        if let Some(data) = &result.data {
            out.push_str(&format!("      {data}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bizpilot_assistant::detect_intent;
    use bizpilot_assistant::parse_actions;
    use bizpilot_core::message::{ContextRefs, Message, Role};
    use serde_json::json;

    fn reply(content: &str, user_text: &str) -> ChatReply {
        let message = |id, role, content: &str| Message {
            id,
            conversation_id: 3,
            role,
            content: content.to_string(),
            created_at: Default::default(),
            tokens_used: None,
            model_used: None,
            context: ContextRefs::default(),
            user_rating: None,
            user_feedback: None,
        };
        ChatReply {
            conversation_id: 3,
            user_message: message(1, Role::User, user_text),
            message: message(2, Role::Assistant, content),
            suggested_actions: parse_actions(content),
            intent: detect_intent(user_text),
        }
    }

    #[test]
    fn reply_hides_directives_and_lists_actions() {
        let out = render_reply(&reply(
            "I'll note that. [ACTION:add_expense:150|Lunch|food]",
            "Record an expense: lunch 150",
        ));
        assert!(out.contains("Assistant > I'll note that."));
        assert!(!out.contains("[ACTION:"));
        assert!(out.contains("1. Add expense"));
        assert!(out.contains("[add_expense: 150 | Lunch | food]"));
        assert!(out.contains("Conversation: 3"));
        assert!(out.contains("Intent: add_expense (0.90)"));
    }

    #[test]
    fn reply_without_actions_has_no_action_section() {
        let out = render_reply(&reply("Hello there!", "Hi"));
        assert!(!out.contains("Suggested actions"));
        assert!(out.contains("Intent: conversation"));
    }

    #[test]
    fn results_show_outcome_and_data() {
        let out = render_results(&[
            ActionResult::ok("create_task", json!({ "id": 4, "title": "Call bank" })),
            ActionResult::failed("Unknown action type: fly"),
        ]);
        assert!(out.contains("1. [ok] Action 'create_task' executed successfully"));
        assert!(out.contains("\"title\":\"Call bank\""));
        assert!(out.contains("2. [failed] Unknown action type: fly"));
    }
}
