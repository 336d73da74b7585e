//! The configuration bag handed to each pass.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::EngineConfig;

/// Typed values the host provides to a pass, plus the engine configuration.
///
/// Cloning is cheap: the value table is shared and copied on write.
#[derive(Clone, Default)]
pub struct EnvironmentValues {
    config: EngineConfig,
    values: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl EnvironmentValues {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            values: Arc::default(),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Return a copy with `value` installed for its type, replacing any
    /// previous value of that type.
    pub fn with<T>(mut self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.values).insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }
}

impl fmt::Debug for EnvironmentValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentValues")
            .field("config", &self.config)
            .field("value_count", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Theme(&'static str);

    #[test]
    fn typed_values_round_trip() {
        let env = EnvironmentValues::new(EngineConfig::lenient()).with(Theme("dark"));
        assert_eq!(env.get::<Theme>(), Some(&Theme("dark")));
        assert_eq!(env.get::<u32>(), None);
        assert!(!env.config().strict);
    }

    #[test]
    fn with_does_not_affect_earlier_clones() {
        let base = EnvironmentValues::default().with(Theme("light"));
        let derived = base.clone().with(Theme("dark"));
        assert_eq!(base.get::<Theme>(), Some(&Theme("light")));
        assert_eq!(derived.get::<Theme>(), Some(&Theme("dark")));
    }
}
