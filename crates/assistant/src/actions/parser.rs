//! Action grammar parser: extracts `[ACTION:<type>:<p1>|<p2>|...]` directives
//! from free model text.
//!
//! Parsing is total: text around directives is ignored, and directives with
//! an unknown type or too few parameters are dropped without error. Values
//! are not validated here; the dispatcher owns each action's parameter
//! contract.

use std::sync::LazyLock;

use bizpilot_core::action::{ActionRequest, ActionType};
use regex_lite::Regex;
use tracing::debug;

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[ACTION:([^:\]]+):([^\]]+)\]").expect("directive pattern is valid")
});

/// All well-formed directives in `reply`, in order of appearance.
pub fn parse_actions(reply: &str) -> Vec<ActionRequest> {
    DIRECTIVE
        .captures_iter(reply)
        .filter_map(|caps| {
            let tag = caps.get(1)?.as_str().trim();
            let payload = caps.get(2)?.as_str();
            parse_directive(tag, payload)
        })
        .collect()
}

fn parse_directive(tag: &str, payload: &str) -> Option<ActionRequest> {
    let Some(action) = ActionType::DIRECTIVES.into_iter().find(|t| t.as_str() == tag) else {
        debug!(tag, "Dropping directive with unknown action type");
        return None;
    };

    let params: Vec<String> = payload.split('|').map(str::to_string).collect();
    if params.len() < action.min_params() {
        debug!(
            action = %action,
            got = params.len(),
            need = action.min_params(),
            "Dropping directive with too few parameters"
        );
        return None;
    }

    Some(ActionRequest::new(action, params))
}

/// The reply with every directive removed and surrounding whitespace trimmed.
pub fn strip_actions(reply: &str) -> String {
    DIRECTIVE.replace_all(reply, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expense_directive_inside_prose() {
        let actions = parse_actions("Sure, noted. [ACTION:add_expense:150|Lunch|Food] Anything else?");
        assert_eq!(actions.len(), 1);
        let a = &actions[0];
        assert_eq!(a.action, ActionType::AddExpense);
        assert_eq!(a.params, vec!["150", "Lunch", "Food"]);
        assert_eq!(a.confidence, 0.95);

        let params = a.parameters();
        assert_eq!(params["amount"], 150.0);
        assert_eq!(params["description"], "Lunch");
        assert_eq!(params["category"], "Food");
    }

    #[test]
    fn single_param_task_defaults_priority() {
        let actions = parse_actions("[ACTION:create_task:Fix bug]");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, ActionType::CreateTask);
        let params = actions[0].parameters();
        assert_eq!(params["title"], "Fix bug");
        assert_eq!(params["priority"], "medium");
        assert_eq!(actions[0].confidence, 0.90);
    }

    #[test]
    fn unknown_type_and_short_payload_are_dropped() {
        assert!(parse_actions("[ACTION:bogus_type:x]").is_empty());
        assert!(parse_actions("[ACTION:add_expense:onlyone]").is_empty());
        assert!(parse_actions("[ACTION:create_campaign:Promo|instagram]").is_empty());
    }

    #[test]
    fn dispatcher_only_types_are_not_directives() {
        assert!(parse_actions("[ACTION:create_tasks_bulk:a|b]").is_empty());
        assert!(parse_actions("[ACTION:schedule_campaign:1|Promo]").is_empty());
    }

    #[test]
    fn multiple_directives_keep_order() {
        let reply = "Done.\n[ACTION:create_task:Call bank|About loan|high|finance]\n\
                     [ACTION:add_income:5000|Consulting]\n[ACTION:analyze_finance:2024-01-01|2024-01-31]";
        let types: Vec<ActionType> = parse_actions(reply).iter().map(|a| a.action).collect();
        assert_eq!(
            types,
            vec![
                ActionType::CreateTask,
                ActionType::AddIncome,
                ActionType::AnalyzeFinance
            ]
        );
    }

    #[test]
    fn malformed_markers_never_panic() {
        for text in [
            "",
            "[ACTION:",
            "[ACTION:create_task]",
            "[ACTION::x]",
            "[ACTION:create_task:]",
            "[ACTION:create_task:unterminated",
            "]]][[[ACTION:add_income:1|x",
        ] {
            assert!(parse_actions(text).is_empty(), "{text}");
        }
    }

    #[test]
    fn type_never_spans_a_closing_bracket() {
        // A parameterless marker does not swallow the directive after it.
        let actions = parse_actions("[ACTION:note] [ACTION:create_task:Call bank]");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, ActionType::CreateTask);
        assert_eq!(actions[0].params, ["Call bank"]);
    }

    #[test]
    fn empty_parameters_still_count() {
        let actions = parse_actions("[ACTION:generate_document:invoice|client_name=ACME|]");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].params.len(), 3);
    }

    #[test]
    fn campaign_directive_builds_display_text() {
        let actions = parse_actions("[ACTION:create_campaign:Summer sale|instagram|post]");
        assert_eq!(actions[0].title, "Create campaign");
        assert_eq!(actions[0].description, "Launch Summer sale on instagram");
        assert_eq!(actions[0].confidence, 0.85);
    }

    #[test]
    fn strip_removes_markers() {
        assert_eq!(
            strip_actions("Added it. [ACTION:add_expense:10|Taxi]"),
            "Added it."
        );
    }
}
