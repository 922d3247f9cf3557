use handlebars::{Handlebars, no_escape};
use serde::Serialize;

use crate::ResponderError;

pub const DEFAULT_SYSTEM_TEMPLATE: &str = "You are {{bot_name}}, the customer service assistant for {{tenant_name}} on {{platform}}. \
Answer briefly and politely in the customer's language.\
{{#if customer_name}} The customer's name is {{customer_name}}.{{/if}} \
If you are not sure of an answer, say that a staff member will follow up.";

/// Values available to system prompt templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromptContext {
    pub tenant_name: String,
    pub bot_name: String,
    pub platform: String,
    /// Empty when the profile has not been fetched.
    pub customer_name: String,
}

pub struct PromptRenderer {
    hbs: Handlebars<'static>,
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRenderer {
    pub fn new() -> Self {
        let mut hbs = Handlebars::new();
        hbs.set_strict_mode(true);
        hbs.register_escape_fn(no_escape);
        Self { hbs }
    }

    /// Renders `template`, or the default system template when none is given.
    pub fn render(
        &self,
        template: Option<&str>,
        ctx: &PromptContext,
    ) -> Result<String, ResponderError> {
        let template = template.unwrap_or(DEFAULT_SYSTEM_TEMPLATE);
        self.hbs
            .render_template(template, ctx)
            .map(|s| s.trim().to_string())
            .map_err(|err| ResponderError::Prompt(err.to_string()))
    }
}
