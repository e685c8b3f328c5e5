//! Keyword intent detection.
//!
//! Advisory only: the result labels a user message for routing and
//! analytics and never gates a mutation. Buckets are checked in order; the
//! first bucket whose domain keywords occur and whose sub-intent keywords
//! also occur decides. A bucket that matches without any sub-intent lets
//! the next bucket try.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    CreateTask,
    ListTasks,
    ShowOverdueTasks,
    AnalyzeFinance,
    AddIncome,
    AddExpense,
    GenerateDocument,
    CreateCampaign,
    SuggestMarketingIdeas,
    GeneralOverview,
    Conversation,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::CreateTask => "create_task",
            Intent::ListTasks => "list_tasks",
            Intent::ShowOverdueTasks => "show_overdue_tasks",
            Intent::AnalyzeFinance => "analyze_finance",
            Intent::AddIncome => "add_income",
            Intent::AddExpense => "add_expense",
            Intent::GenerateDocument => "generate_document",
            Intent::CreateCampaign => "create_campaign",
            Intent::SuggestMarketingIdeas => "suggest_marketing_ideas",
            Intent::GeneralOverview => "general_overview",
            Intent::Conversation => "conversation",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected intent with its fixed confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntentMatch {
    pub intent: Intent,
    pub confidence: f32,
}

struct Bucket {
    keywords: &'static [&'static str],
    sub_intents: &'static [(Intent, f32, &'static [&'static str])],
}

const BUCKETS: &[Bucket] = &[
    // tasks
    Bucket {
        keywords: &["task", "todo", "to-do", "remind", "deadline"],
        sub_intents: &[
            (Intent::CreateTask, 0.8, &["create", "add", "new", "make"]),
            (Intent::ListTasks, 0.9, &["show", "list", "which", "what are"]),
            (Intent::ShowOverdueTasks, 0.95, &["overdue", "late", "missed"]),
        ],
    },
    // finance
    Bucket {
        keywords: &[
            "financ", "money", "expense", "spent", "income", "budget", "profit", "balance",
            "revenue",
        ],
        sub_intents: &[
            (Intent::AnalyzeFinance, 0.85, &["analy", "show", "how much", "report"]),
            (Intent::AddIncome, 0.9, &["earned", "received", "got paid"]),
            (Intent::AddExpense, 0.9, &["add", "record", "spent", "paid"]),
        ],
    },
    // documents
    Bucket {
        keywords: &["document", "contract", "invoice", "agreement", "receipt"],
        sub_intents: &[(
            Intent::GenerateDocument,
            0.85,
            &["create", "generate", "prepare", "draft", "make"],
        )],
    },
    // marketing
    Bucket {
        keywords: &["advert", "campaign", "marketing", "promot", "social post"],
        sub_intents: &[
            (Intent::CreateCampaign, 0.8, &["create", "launch", "new", "start"]),
            (
                Intent::SuggestMarketingIdeas,
                0.75,
                &["idea", "suggest", "come up with", "brainstorm"],
            ),
        ],
    },
];

const OVERVIEW_KEYWORDS: &[&str] = &["how are things", "status", "overview", "what's new", "summary"];

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// Classify a user message.
pub fn detect_intent(message: &str) -> IntentMatch {
    let text = message.to_lowercase();

    for bucket in BUCKETS {
        if !contains_any(&text, bucket.keywords) {
            continue;
        }
        if let Some((intent, confidence, _)) = bucket
            .sub_intents
            .iter()
            .find(|(_, _, words)| contains_any(&text, words))
        {
            return IntentMatch {
                intent: *intent,
                confidence: *confidence,
            };
        }
    }

    if contains_any(&text, OVERVIEW_KEYWORDS) {
        return IntentMatch {
            intent: Intent::GeneralOverview,
            confidence: 0.7,
        };
    }

    IntentMatch {
        intent: Intent::Conversation,
        confidence: 0.6,
    }
}
