//! Generative Fallback — asks the text model to answer a field no constant could.
//!
//! Only reached when every constant-backed stage missed and the caller opted in.
//! Discrete-option fields get the raw answer post-matched to an option; this match is
//! lenient (substring containment against both option text and option value):
//! - overlapping option texts such as "Yes" / "Yes, with conditions" can resolve to the
//!   shorter one;
//! - short option values match inside unrelated answers, so "No, I was born in 2001"
//!   can land on an option whose value is `"1"`.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::Constants;
use crate::llm_client::retry::RetryPolicy;
use crate::llm_client::{LlmError, TextGenerationProvider, Usage};
use crate::matcher::prompts::{
    ANSWER_CUE, FIELD_FILL_INSTRUCTIONS, FIELD_FILL_PREAMBLE, MULTIPLE_CHOICE_INSTRUCTION,
    OPTION_CHOICE_INSTRUCTION,
};
use crate::matcher::{FieldDescriptor, FieldOption};

/// Character budget for the background blob in the prompt.
pub const BACKGROUND_CHAR_BUDGET: usize = 500;
/// Character budget for company information in the prompt.
pub const COMPANY_INFO_CHAR_BUDGET: usize = 800;

/// Personally identifying constants never sent to the model.
const PERSONAL_KEYS: &[&str] = &[
    "first_name",
    "last_name",
    "name",
    "email",
    "phone",
    "address",
    "city",
    "state",
    "zip",
];

/// What the model is told about the application.
#[derive(Debug, Clone, Default)]
pub struct FieldContext {
    pub job_title: String,
    pub company: String,
    pub company_info: String,
    pub background: String,
    pub skills: Vec<String>,
    pub constants: Constants,
}

/// A generated answer and the tokens it cost.
#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub value: String,
    pub usage: Usage,
}

#[derive(Clone)]
pub struct GenerativeFallback {
    provider: Arc<dyn TextGenerationProvider>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl GenerativeFallback {
    pub fn new(provider: Arc<dyn TextGenerationProvider>, call_timeout: Duration) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
            call_timeout,
        }
    }

    /// Generates an answer for `field`. Transient failures (including timeouts and empty
    /// completions) are retried per the retry policy; the final failure is returned as-is.
    pub async fn fill(
        &self,
        field: &FieldDescriptor,
        context: &FieldContext,
    ) -> Result<GeneratedAnswer, LlmError> {
        let prompt = build_field_prompt(field, context);
        let prompt = prompt.as_str();
        let provider = &self.provider;
        let call_timeout = self.call_timeout;

        let completion = self
            .retry
            .run(move || async move {
                let completion = tokio::time::timeout(call_timeout, provider.complete(prompt))
                    .await
                    .map_err(|_| LlmError::Timeout(call_timeout))??;
                if completion.text.trim().is_empty() {
                    return Err(LlmError::EmptyContent);
                }
                Ok(completion)
            })
            .await?;

        let text = completion.text.trim().to_string();
        let value = if field.has_discrete_options() {
            match_option(&text, &field.options).unwrap_or(text)
        } else {
            text
        };

        Ok(GeneratedAnswer {
            value,
            usage: completion.usage,
        })
    }
}

/// Maps a free-text answer onto an option: case-insensitive equality first, then
/// substring containment in either direction. Returns the option's value (its text
/// when the value is empty), or `None` if nothing matches.
pub fn match_option(response: &str, options: &[FieldOption]) -> Option<String> {
    let normalized = response.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    let answer = |opt: &FieldOption| {
        if opt.value.is_empty() {
            opt.text.clone()
        } else {
            opt.value.clone()
        }
    };
    let candidates = |opt: &FieldOption| {
        [&opt.text, &opt.value]
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
    };

    options
        .iter()
        .find(|opt| candidates(opt).iter().any(|c| *c == normalized))
        .or_else(|| {
            options.iter().find(|opt| {
                candidates(opt)
                    .iter()
                    .any(|c| normalized.contains(c.as_str()) || c.contains(normalized.as_str()))
            })
        })
        .map(answer)
}

fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(budget).collect();
    truncated.push_str("...");
    truncated
}

fn is_shareable_constant(key: &str) -> bool {
    !PERSONAL_KEYS.contains(&key)
}

/// Builds the completion prompt for a single field.
pub fn build_field_prompt(field: &FieldDescriptor, context: &FieldContext) -> String {
    let mut prompt = String::new();
    // Writing into a String cannot fail.
    let _ = write_field_prompt(&mut prompt, field, context);
    prompt
}

fn write_field_prompt(
    out: &mut String,
    field: &FieldDescriptor,
    context: &FieldContext,
) -> std::fmt::Result {
    writeln!(out, "{FIELD_FILL_PREAMBLE}\n")?;

    writeln!(out, "Field Label: {}", field.label)?;
    if !field.placeholder.is_empty() {
        writeln!(out, "Field Placeholder: {}", field.placeholder)?;
    }
    writeln!(out, "Field Type: {}", field.field_type)?;
    if field.required {
        writeln!(out, "This field is REQUIRED")?;
    }

    if !field.options.is_empty() {
        writeln!(out, "\nAvailable Options:")?;
        for (i, opt) in field.options.iter().enumerate() {
            let shown = if opt.text.is_empty() {
                &opt.value
            } else {
                &opt.text
            };
            writeln!(out, "  {}. {shown}", i + 1)?;
        }
        writeln!(out, "\n{OPTION_CHOICE_INSTRUCTION}")?;
    }
    writeln!(out)?;

    if !context.job_title.is_empty() || !context.company.is_empty() {
        writeln!(out, "Job Application:")?;
        if !context.job_title.is_empty() {
            writeln!(out, "  Position: {}", context.job_title)?;
        }
        if !context.company.is_empty() {
            writeln!(out, "  Company: {}", context.company)?;
        }
        writeln!(out)?;
    }

    if !context.company_info.is_empty() {
        writeln!(
            out,
            "Company Information:\n{}\n",
            truncate_chars(&context.company_info, COMPANY_INFO_CHAR_BUDGET)
        )?;
    }

    if !context.background.is_empty() {
        writeln!(
            out,
            "Your Background:\n{}\n",
            truncate_chars(&context.background, BACKGROUND_CHAR_BUDGET)
        )?;
    }

    if !context.skills.is_empty() {
        writeln!(out, "Your Skills: {}\n", context.skills.join(", "))?;
    }

    let shareable: BTreeMap<&String, &String> = context
        .constants
        .iter()
        .filter(|(k, _)| is_shareable_constant(k))
        .collect();
    if !shareable.is_empty() {
        writeln!(out, "Basic Information:")?;
        for (key, value) in shareable {
            writeln!(out, "  {key}: {value}")?;
        }
        writeln!(out)?;
    }

    writeln!(out, "Instructions:")?;
    for instruction in FIELD_FILL_INSTRUCTIONS {
        writeln!(out, "- {instruction}")?;
    }
    if !field.options.is_empty() {
        writeln!(out, "- {MULTIPLE_CHOICE_INSTRUCTION}")?;
    }
    write!(out, "\n{ANSWER_CUE}")
}
