use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// An action the UI makes available to the agent for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the action's arguments
    #[serde(default = "empty_schema")]
    pub parameters: Value,
    /// A required action must produce a result before the turn may continue
    #[serde(default)]
    pub required: bool,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl ActionDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: empty_schema(),
            required: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::bad_request(format!(
                "invalid action name '{}'",
                self.name
            )));
        }
        if !self.parameters.is_object() {
            return Err(Error::bad_request(format!(
                "parameters of action '{}' must be a JSON schema object",
                self.name
            )));
        }
        Ok(())
    }
}

/// A call of a declared action that is waiting for its result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionInvocation {
    pub action_call_id: String,
    pub name: String,
    pub parameters: Value,
    pub required: bool,
}

/// Result fed back to the agent when an optional action is not answered in time
pub fn skipped_result(reason: &str) -> Value {
    json!({"status": "skipped", "reason": reason})
}
