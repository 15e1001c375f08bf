use serde_json::Value;

use crate::{error::ChatError, query::QueryParams};

/// Rules appended to every grounded prompt.
pub const RESPONSE_INSTRUCTIONS: &str = r#"*Note: The following guidelines must be strictly followed when generating a response:*

1. **Prohibited Words and Elements**:
   - Specific words: "Insurer," "User," "llama3.2:latest"
   - Company-specific names or details unless explicitly provided by the user.

2. **Avoid Excessive Formatting and Unnecessary Details**:
   - Do not include extra formatting (e.g., broken down ALE values, repeated sections).
   - Focus on providing a high-level summary without excessive breakdowns unless specifically requested.

3. **No Repetitions or Redundant Information**:
   - Avoid repeating the same data multiple times or formatting values excessively (e.g., breaking ALE into individual characters or formatting them incorrectly).

4. **Focus on Concise Results**:
   - The response should give a concise summary or final result, directly answering the user's query.

5. **Plain Language and Clarity**:
   - Use clear, concise language without unnecessary technical jargon or complex explanations unless explicitly requested.

6. **Implementation Rules**:
   - Always validate output against these rules before responding.
   - Use only one format for each value
   - Never mix formatting styles
   - Keep responses concise and direct
   - Remove any redundant information before responding


**Example Expected Response:**
*"The total ALE for Phishing Attacks in 2023 was $14,270,566.59, and for 2024 it is projected to be $5,101,219.07."*
"#;

/// Insurer data as seen by the prompt: either the API body or the reason it is missing.
#[derive(Debug, Clone, PartialEq)]
pub enum InsurerContext {
    Data(Value),
    Unavailable(String),
}

impl InsurerContext {
    /// True when there is nothing worth grounding the prompt in.
    pub fn is_empty(&self) -> bool {
        match self {
            InsurerContext::Data(Value::Null) => true,
            InsurerContext::Data(Value::Object(map)) => map.is_empty(),
            InsurerContext::Data(Value::Array(items)) => items.is_empty(),
            InsurerContext::Data(Value::String(s)) => s.is_empty(),
            InsurerContext::Data(_) => false,
            InsurerContext::Unavailable(_) => false,
        }
    }

    fn render(&self) -> String {
        match self {
            InsurerContext::Data(value) => value.to_string(),
            InsurerContext::Unavailable(reason) => format!("Insurer data unavailable: {}", reason),
        }
    }
}

impl From<Result<Value, ChatError>> for InsurerContext {
    fn from(result: Result<Value, ChatError>) -> Self {
        match result {
            Ok(value) => InsurerContext::Data(value),
            Err(e) => InsurerContext::Unavailable(e.to_string()),
        }
    }
}

fn scope_line(params: &QueryParams) -> String {
    let attack = match &params.attack_type {
        Some(attack_type) => format!("Specifically analyzing {} attacks", attack_type),
        None => "Focusing on all attack types".to_string(),
    };
    let year = match &params.year {
        Some(year) => format!("for {}", year),
        None => "across all available years".to_string(),
    };
    format!("{} {}.", attack, year)
}

/// Grounded prompt: serialized context, the question, then the fixed instructions.
pub fn format_prompt(question: &str, context: &InsurerContext, params: &QueryParams) -> String {
    format!(
        "Context: {}\n\nUser Question: {}\n\nInstructions for response:\n{}\n\n{}",
        context.render(),
        question,
        scope_line(params),
        RESPONSE_INSTRUCTIONS
    )
}

/// Like [`format_prompt`], but sends the bare question when there is no usable context.
pub fn build_prompt(
    question: &str,
    context: Option<&InsurerContext>,
    params: &QueryParams,
) -> String {
    match context {
        Some(context) if !context.is_empty() => format_prompt(question, context, params),
        _ => question.to_string(),
    }
}
