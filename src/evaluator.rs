//! Triggering evaluators decide whether an appended event flushes the buffer.
//!
//! Evaluators are looked up by name at configuration time through an
//! [`EvaluatorRegistry`]; the built-in `"level"` entry is [`LevelThreshold`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::event::{Level, LogEvent};
use tracing::warn;

/// Predicate over appended events.
///
/// Called under the appender's lock for every event, so implementations should be cheap
/// and free of side effects.
pub trait TriggeringEvaluator: Send {
    /// Should this event flush the buffer now?
    fn is_triggering(&self, event: &LogEvent) -> bool;

    /// Finalize options before first use. Invoked once when the owning appender activates.
    fn activate(&mut self) -> Result<(), EvaluatorError> {
        Ok(())
    }
}

/// Errors from evaluator construction or activation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluatorError {
    /// No constructor registered under the requested name.
    #[error("no evaluator registered as '{name}'")]
    NotFound {
        /// Name that could not be resolved.
        name: String,
    },
    /// An option value could not be interpreted.
    #[error("invalid value '{value}' for evaluator option '{option}'")]
    InvalidOption {
        /// Option key.
        option: String,
        /// Raw value supplied.
        value: String,
    },
}

/// Triggers on events at or above a severity threshold (ERROR by default).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelThreshold {
    threshold: Level,
}

impl LevelThreshold {
    pub fn new(threshold: Level) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Level {
        self.threshold
    }

    /// Build from string options; recognizes `threshold`.
    pub fn from_options(options: &BTreeMap<String, String>) -> Result<Self, EvaluatorError> {
        match options.get("threshold") {
            Some(raw) => raw.parse::<Level>().map(Self::new).map_err(|_| {
                EvaluatorError::InvalidOption { option: "threshold".into(), value: raw.clone() }
            }),
            None => Ok(Self::default()),
        }
    }
}

impl Default for LevelThreshold {
    fn default() -> Self {
        Self::new(Level::Error)
    }
}

impl TriggeringEvaluator for LevelThreshold {
    fn is_triggering(&self, event: &LogEvent) -> bool {
        event.level.is_at_least(self.threshold)
    }
}

impl<F> TriggeringEvaluator for F
where
    F: Fn(&LogEvent) -> bool + Send,
{
    fn is_triggering(&self, event: &LogEvent) -> bool {
        self(event)
    }
}

/// Constructor stored in the registry.
pub type EvaluatorConstructor = Arc<
    dyn Fn(&BTreeMap<String, String>) -> Result<Box<dyn TriggeringEvaluator>, EvaluatorError>
        + Send
        + Sync,
>;

/// Name under which [`LevelThreshold`] is registered.
pub const DEFAULT_EVALUATOR: &str = "level";

/// Maps evaluator names to constructors.
#[derive(Clone)]
pub struct EvaluatorRegistry {
    inner: Arc<RwLock<HashMap<String, EvaluatorConstructor>>>,
}

impl fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorRegistry").field("names", &self.names()).finish()
    }
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluatorRegistry {
    /// Registry preloaded with the `"level"` evaluator.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(DEFAULT_EVALUATOR, |options| {
            LevelThreshold::from_options(options)
                .map(|e| Box::new(e) as Box<dyn TriggeringEvaluator>)
        });
        registry
    }

    /// Registry with no entries.
    pub fn empty() -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Register a constructor, replacing any existing entry with the same name.
    pub fn register<F>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&BTreeMap<String, String>) -> Result<Box<dyn TriggeringEvaluator>, EvaluatorError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&name) {
            warn!(target: "logmail::evaluator", name = %name, "evaluator name replaced; last registration wins");
        }
        map.insert(name, Arc::new(constructor));
    }

    /// Instantiate the evaluator registered as `name`.
    pub fn create(
        &self,
        name: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<Box<dyn TriggeringEvaluator>, EvaluatorError> {
        let constructor = {
            let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            map.get(name).cloned()
        };
        match constructor {
            Some(constructor) => constructor(options),
            None => Err(EvaluatorError::NotFound { name: name.to_string() }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(level: Level) -> LogEvent {
        LogEvent::new(level, "test", "msg")
    }

    #[test]
    fn default_threshold_is_error() {
        let eval = LevelThreshold::default();
        for level in [Level::Trace, Level::Debug, Level::Info, Level::Warn] {
            assert!(!eval.is_triggering(&event(level)), "{level} should not trigger");
        }
        assert!(eval.is_triggering(&event(Level::Error)));
        assert!(eval.is_triggering(&event(Level::Fatal)));
    }

    #[test]
    fn threshold_option_is_parsed() {
        let mut options = BTreeMap::new();
        options.insert("threshold".to_string(), "warn".to_string());
        let eval = LevelThreshold::from_options(&options).unwrap();
        assert_eq!(eval.threshold(), Level::Warn);

        options.insert("threshold".to_string(), "shouting".to_string());
        let err = LevelThreshold::from_options(&options).unwrap_err();
        assert!(matches!(err, EvaluatorError::InvalidOption { .. }));
    }

    #[test]
    fn registry_resolves_default_and_custom_entries() {
        let registry = EvaluatorRegistry::new();
        assert!(registry.contains(DEFAULT_EVALUATOR));
        let eval = registry.create(DEFAULT_EVALUATOR, &BTreeMap::new()).unwrap();
        assert!(eval.is_triggering(&event(Level::Error)));

        registry.register("throwing", |_| {
            Ok(Box::new(|e: &LogEvent| e.has_throwable()) as Box<dyn TriggeringEvaluator>)
        });
        let eval = registry.create("throwing", &BTreeMap::new()).unwrap();
        assert!(!eval.is_triggering(&event(Level::Fatal)));
        assert!(eval.is_triggering(&event(Level::Info).with_throwable(["at main"])));
        assert_eq!(registry.names(), vec!["level".to_string(), "throwing".to_string()]);
    }

    #[test]
    fn unknown_name_is_not_found() {
        let registry = EvaluatorRegistry::empty();
        let Err(err) = registry.create("level", &BTreeMap::new()) else {
            panic!("expected NotFound");
        };
        assert_eq!(err, EvaluatorError::NotFound { name: "level".into() });
    }
}
