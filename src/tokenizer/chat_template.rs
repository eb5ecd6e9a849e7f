//! Chat template support for tokenizers using Jinja2 templates
//!
//! This module renders a conversation into the flat prompt string the model
//! expects, similar to HuggingFace transformers' apply_chat_template method.

use anyhow::{anyhow, Result};
use minijinja::{context, Environment, Error as JinjaError, ErrorKind, Value};

use crate::protocols::conversation::Message;

/// Mistral-instruct layout, used when neither the tokenizer nor the command
/// line supplies a template.
pub const DEFAULT_CHAT_TEMPLATE: &str = "{{ bos_token }}\
{%- for message in messages -%}\
{%- if message.role == 'user' -%}[INST] {{ message.content }} [/INST]\
{%- elif message.role == 'assistant' -%}{{ message.content }}{{ eos_token }}\
{%- else -%}{{ message.content }}\n\n\
{% endif -%}\
{%- endfor -%}";

/// Chat template processor using Jinja2
#[derive(Debug, Clone)]
pub struct ChatTemplateProcessor {
    template: String,
    bos_token: Option<String>,
    eos_token: Option<String>,
}

impl ChatTemplateProcessor {
    /// Create a new chat template processor
    pub fn new(template: String, bos_token: Option<String>, eos_token: Option<String>) -> Self {
        ChatTemplateProcessor {
            template,
            bos_token,
            eos_token,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Apply the chat template to a list of messages
    ///
    /// Returns the formatted prompt string, not token ids. With
    /// `add_generation_prompt` the template appends its assistant cue.
    pub fn apply_chat_template(
        &self,
        messages: &[Message],
        add_generation_prompt: bool,
    ) -> Result<String> {
        let mut env = Environment::new();
        env.add_function("raise_exception", raise_exception);

        env.add_template("chat", &self.template)
            .map_err(|e| anyhow!("Failed to add template: {}", e))?;

        let tmpl = env
            .get_template("chat")
            .map_err(|e| anyhow!("Failed to get template: {}", e))?;

        let messages_value: Vec<Value> = messages
            .iter()
            .map(|msg| {
                context! {
                    role => msg.role.clone(),
                    content => msg.content.clone()
                }
            })
            .collect();

        let rendered = tmpl
            .render(context! {
                messages => messages_value,
                add_generation_prompt => add_generation_prompt,
                bos_token => self.bos_token.clone().unwrap_or_default(),
                eos_token => self.eos_token.clone().unwrap_or_default()
            })
            .map_err(|e| anyhow!("Failed to render template: {}", e))?;

        Ok(rendered)
    }
}

/// Templates call `raise_exception(...)` to reject conversations they cannot format
fn raise_exception(message: String) -> Result<Value, JinjaError> {
    Err(JinjaError::new(ErrorKind::InvalidOperation, message))
}
