use bridge_core::{AgentAdapter, AgentName, AgentRegistration, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// RuntimeRegistry maps agent names to the adapter serving them.
///
/// Built once at start-up and never mutated afterwards.
pub struct RuntimeRegistry {
    adapters: HashMap<AgentName, Arc<dyn AgentAdapter>>,
}

impl RuntimeRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Build a registry from configured registrations, creating one adapter each
    pub fn from_registrations<F>(registrations: &[AgentRegistration], mut factory: F) -> Result<Self>
    where
        F: FnMut(&AgentRegistration) -> Result<Arc<dyn AgentAdapter>>,
    {
        let mut builder = Self::builder();
        for registration in registrations {
            builder = builder.register(registration.name.clone(), factory(registration)?);
        }
        builder.build()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn AgentAdapter>> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownAgent(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<AgentName> {
        let mut names: Vec<AgentName> = self.adapters.keys().cloned().collect();
        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        names
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

pub struct RegistryBuilder {
    adapters: HashMap<AgentName, Arc<dyn AgentAdapter>>,
    duplicates: Vec<AgentName>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            duplicates: Vec::new(),
        }
    }

    pub fn register(mut self, name: AgentName, adapter: Arc<dyn AgentAdapter>) -> Self {
        if self.adapters.contains_key(&name) {
            self.duplicates.push(name);
        } else {
            self.adapters.insert(name, adapter);
        }
        self
    }

    pub fn build(self) -> Result<RuntimeRegistry> {
        if let Some(name) = self.duplicates.first() {
            return Err(Error::config_error(format!(
                "agent '{}' is registered more than once",
                name
            )));
        }
        Ok(RuntimeRegistry {
            adapters: self.adapters,
        })
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
