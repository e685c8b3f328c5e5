//! Built-in document templates rendered by keyed substitution.
//!
//! Placeholders are `{name}`. A placeholder without a supplied value renders
//! as [`BLANK`] so the printed document leaves room to fill it by hand.

use serde_json::{Map, Value};

/// Stand-in for a variable that was not supplied.
pub const BLANK: &str = "________";

const CONTRACT: &str = "\
CONTRACT No. {contract_number}

Client: {client_name}
Tax ID: {client_inn}

Contractor: {company_name}
Tax ID: {company_inn}

Subject: {subject}
Amount: {amount}

Date: {date}
";

const INVOICE: &str = "\
INVOICE No. {invoice_number}

Date: {date}
Supplier: {company_name}
Buyer: {client_name}

Item: {description}
Amount: {amount}
VAT: {vat}
Total: {total}
";

const ACT: &str = "\
ACT OF COMPLETED WORK No. {act_number}

Date: {date}
Client: {client_name}
Contractor: {company_name}

Work performed: {description}
Amount: {amount}

The work has been completed in full.
";

/// Names of the available templates.
pub const TEMPLATE_NAMES: [&str; 3] = ["contract", "invoice", "act"];

/// The raw text of a template, if it exists.
pub fn template(name: &str) -> Option<&'static str> {
    match name {
        "contract" => Some(CONTRACT),
        "invoice" => Some(INVOICE),
        "act" => Some(ACT),
        _ => None,
    }
}

/// Render the named template, or `None` when no such template exists.
pub fn render(name: &str, variables: &Map<String, Value>) -> Option<String> {
    template(name).map(|text| substitute(text, variables))
}

fn substitute(text: &str, variables: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        let key = &rest[open + 1..open + close];
        match variables.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(Value::Null) | None => out.push_str(BLANK),
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &rest[open + close + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn invoice_substitutes_known_keys() {
        let text = render(
            "invoice",
            &vars(json!({ "invoice_number": "42", "amount": 1000, "client_name": "ACME" })),
        )
        .unwrap();
        assert!(text.starts_with("INVOICE No. 42"));
        assert!(text.contains("Buyer: ACME"));
        assert!(text.contains("Amount: 1000"));
    }

    #[test]
    fn missing_variables_render_blank() {
        let text = render("act", &Map::new()).unwrap();
        assert!(text.contains(&format!("No. {BLANK}")));
        assert!(!text.contains('{'));
    }

    #[test]
    fn unknown_template_is_none() {
        assert!(render("memo", &Map::new()).is_none());
        for name in TEMPLATE_NAMES {
            assert!(template(name).is_some());
        }
    }

    #[test]
    fn unbalanced_brace_is_copied_verbatim() {
        assert_eq!(substitute("a {b", &Map::new()), "a {b");
    }
}
