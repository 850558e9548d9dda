use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::job::{Job, JobHandler};

/// Resolves a handler reference into a live job.
pub trait JobFactory: Send + Sync {
    /// Returns `None` when `handler_class` does not name a known handler.
    fn create_job(
        &self,
        handler_class: &str,
        extension: Option<&str>,
        name: Option<&str>,
        params: Map<String, Value>,
    ) -> Option<Job>;
}

type Constructor = Arc<dyn Fn(&Map<String, Value>) -> Box<dyn JobHandler> + Send + Sync>;

/// In-process handler table: handler class name → constructor.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    constructors: HashMap<String, Constructor>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `handler_class`, replacing any previous one.
    pub fn register<F>(&mut self, handler_class: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&Map<String, Value>) -> Box<dyn JobHandler> + Send + Sync + 'static,
    {
        self.constructors
            .insert(handler_class.into(), Arc::new(constructor));
        self
    }

    pub fn contains(&self, handler_class: &str) -> bool {
        self.constructors.contains_key(handler_class)
    }

    pub fn handler_classes(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

impl JobFactory for HandlerRegistry {
    fn create_job(
        &self,
        handler_class: &str,
        extension: Option<&str>,
        name: Option<&str>,
        params: Map<String, Value>,
    ) -> Option<Job> {
        let Some(constructor) = self.constructors.get(handler_class) else {
            debug!(%handler_class, "no handler registered");
            return None;
        };
        let handler = constructor(&params);
        let mut job = Job::new(handler_class, handler).with_params(params);
        job.set_extension(extension.map(String::from));
        job.set_name(name.map(String::from));
        Some(job)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobContext, JobFailure};
    use crate::types::JobKind;

    struct Every5;

    impl JobHandler for Every5 {
        fn execute(&mut self, _ctx: &mut JobContext<'_>) -> Result<(), JobFailure> {
            Ok(())
        }

        fn default_kind(&self) -> JobKind {
            JobKind::Recurring {
                spec: "*/5 * * * *".into(),
            }
        }

        fn default_priority(&self) -> i32 {
            7
        }
    }

    #[test]
    fn registry_builds_jobs_with_handler_defaults() {
        let mut registry = HandlerRegistry::new();
        registry.register("every5", |_| Box::new(Every5));

        let mut params = Map::new();
        params.insert("target".into(), Value::from("db"));
        let job = registry
            .create_job("every5", Some("maintenance"), None, params)
            .unwrap();

        assert_eq!(job.handler_class(), "every5");
        assert_eq!(job.name(), "every5");
        assert_eq!(job.extension(), Some("maintenance"));
        assert_eq!(job.priority(), 7);
        assert!(job.kind().is_recurring());
        assert_eq!(job.param("target"), Some(&Value::from("db")));
    }

    #[test]
    fn unknown_handler_is_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.create_job("missing", None, None, Map::new()).is_none());
        assert!(!registry.contains("missing"));
    }
}
