use anyhow::Result;
use futures_util::future::BoxFuture;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use crate::error::ConfigurationError;
use crate::instrumentation::{Category, Metadata, SpanHandle};
use crate::logger::PerfLogger;

/// Handed to a running stage.
#[derive(Clone)]
pub struct StageContext {
    /// The stage's own span; open child spans here for sub-steps.
    pub span: SpanHandle,
    pub logger: Arc<PerfLogger>,
}

type StageFn = Box<dyn FnOnce(StageContext) -> BoxFuture<'static, Result<Metadata>> + Send>;

/// One named unit of startup work.
///
/// The closure's returned metadata is attached to the stage span on success.
pub struct Stage {
    pub(crate) name: String,
    pub(crate) category: Category,
    pub(crate) depends_on: Vec<String>,
    pub(crate) run: StageFn,
}

impl Stage {
    pub fn new<F, Fut>(name: impl Into<String>, category: Category, run: F) -> Self
    where
        F: FnOnce(StageContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Metadata>> + Send + 'static,
    {
        Self {
            name: name.into(),
            category,
            depends_on: Vec::new(),
            run: Box::new(move |ctx| Box::pin(run(ctx))),
        }
    }

    /// Runs only after `stage` has succeeded.
    pub fn after(mut self, stage: impl Into<String>) -> Self {
        self.depends_on.push(stage.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }
}

/// Ordered list of stages. Dependencies may only name earlier stages, so the
/// graph is acyclic by construction.
#[derive(Default)]
pub struct StartupPlan {
    pub(crate) stages: Vec<Stage>,
}

impl StartupPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut seen = HashSet::new();
        for stage in &self.stages {
            for dependency in &stage.depends_on {
                if !seen.contains(dependency.as_str()) {
                    return Err(ConfigurationError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(ConfigurationError::DuplicateStage(stage.name.clone()));
            }
        }
        Ok(())
    }
}
