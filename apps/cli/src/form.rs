//! Interactive cluster parameter form.

use std::collections::BTreeMap;

use async_trait::async_trait;
use ignition_core::config::{FieldDescriptor, FieldKind};
use ignition_orchestrator::{FormInput, OrchestratorError};
use inquire::validator::Validation;
use inquire::{InquireError, Select, Text};

/// Prompts for every field on the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptForm;

#[async_trait]
impl FormInput for PromptForm {
    async fn fill(
        &self,
        fields: &'static [FieldDescriptor],
        current: BTreeMap<String, String>,
    ) -> ignition_orchestrator::Result<BTreeMap<String, String>> {
        tokio::task::spawn_blocking(move || prompt_fields(fields, current))
            .await
            .map_err(|e| OrchestratorError::Form(e.to_string()))?
            .map_err(|e| match e {
                InquireError::OperationCanceled | InquireError::OperationInterrupted => {
                    OrchestratorError::Cancelled
                }
                other => OrchestratorError::Form(other.to_string()),
            })
    }
}

fn prompt_fields(
    fields: &'static [FieldDescriptor],
    mut values: BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, InquireError> {
    println!();
    for field in fields {
        let default = values
            .get(field.key)
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .or_else(|| field.default_value());
        let answer = match field.kind {
            FieldKind::Choice(options) => {
                let cursor = default.as_deref().and_then(|d| options.iter().position(|o| *o == d)).unwrap_or(0);
                Select::new(field.label, options.to_vec())
                    .with_help_message(field.help)
                    .with_starting_cursor(cursor)
                    .prompt()?
                    .to_string()
            }
            FieldKind::Text | FieldKind::Port => prompt_text(field, default.as_deref())?,
        };
        values.insert(field.key.to_string(), answer.trim().to_string());
    }
    Ok(values)
}

fn prompt_text(field: &'static FieldDescriptor, default: Option<&str>) -> Result<String, InquireError> {
    let has_default = default.is_some();
    let mut prompt = Text::new(field.label).with_help_message(field.help).with_validator(move |input: &str| {
        let value = input.trim();
        if value.is_empty() {
            return Ok(if field.required && !has_default {
                Validation::Invalid("This field is required".into())
            } else {
                Validation::Valid
            });
        }
        Ok(match field.validate(value) {
            Ok(()) => Validation::Valid,
            Err(e) => Validation::Invalid(e.to_string().into()),
        })
    });
    if let Some(default) = default {
        prompt = prompt.with_default(default);
    }
    prompt.prompt()
}
