use indexmap::IndexMap;
use serde_json::Value;

use crate::{
    cue::NaviCue,
    cues::{BreathHold, ChoiceFork, TapRipple},
    error::RuntimeError,
};

/// Builds a cue from the host payload.
pub type CueFactory = fn(&Value) -> Box<dyn NaviCue>;

/// Registry of cue constructors in registration order.
#[derive(Clone)]
pub struct CueCatalog {
    factories: IndexMap<&'static str, CueFactory>,
}

impl std::fmt::Debug for CueCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

impl Default for CueCatalog {
    fn default() -> Self {
        let mut catalog = Self::empty();
        catalog.register(TapRipple::ID, |payload| {
            Box::new(TapRipple::from_payload(payload))
        });
        catalog.register(BreathHold::ID, |payload| {
            Box::new(BreathHold::from_payload(payload))
        });
        catalog.register(ChoiceFork::ID, |payload| {
            Box::new(ChoiceFork::from_payload(payload))
        });
        catalog
    }
}

impl CueCatalog {
    /// Catalog holding the reference cues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with nothing registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Registers `factory` under `id`, replacing any previous entry.
    pub fn register(&mut self, id: &'static str, factory: CueFactory) -> &mut Self {
        if self.factories.insert(id, factory).is_some() {
            tracing::debug!(cue = id, "cue factory replaced");
        }
        self
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Builds the cue registered under `id`.
    pub fn build(&self, id: &str, payload: &Value) -> Result<Box<dyn NaviCue>, RuntimeError> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| RuntimeError::UnknownCue(id.to_owned()))?;
        Ok(factory(payload))
    }
}

#[cfg(test)]
mod tests {
    use navicue_stage::Stage;

    use super::*;
    use crate::cue::{CueContext, CueInput};

    struct Silent;

    impl NaviCue for Silent {
        fn id(&self) -> &str {
            "silent"
        }

        fn on_stage(&mut self, _stage: Stage, _ctx: &CueContext) {}

        fn on_input(&mut self, _input: CueInput, _ctx: &CueContext) {}
    }

    #[test]
    fn reference_cues_are_listed_in_order() {
        let catalog = CueCatalog::new();
        assert_eq!(
            catalog.ids().collect::<Vec<_>>(),
            vec!["tap-ripple", "breath-hold", "choice-fork"]
        );
        let cue = catalog.build("breath-hold", &Value::Null).unwrap();
        assert_eq!(cue.id(), "breath-hold");
    }

    #[test]
    fn unknown_ids_are_errors() {
        let err = CueCatalog::new()
            .build("confetti", &Value::Null)
            .err()
            .unwrap();
        assert_eq!(err, RuntimeError::UnknownCue("confetti".into()));
        assert_eq!(err.to_string(), "unknown cue `confetti`");
    }

    #[test]
    fn custom_cues_can_be_registered() {
        let mut catalog = CueCatalog::empty();
        catalog.register("silent", |_| Box::new(Silent));
        assert!(catalog.contains("silent"));
        assert!(!catalog.contains("tap-ripple"));
        assert_eq!(catalog.build("silent", &Value::Null).unwrap().id(), "silent");
    }
}
