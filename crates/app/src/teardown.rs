//! Ordered, fault-tolerant resource release for a call session.

use futures::future::BoxFuture;

type StepFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Ordered list of labeled release steps.
///
/// Steps run strictly in push order. A failing step is logged and never
/// prevents the remaining steps from running, so resources can never be
/// left half-released because an earlier handle was already gone.
#[derive(Default)]
pub struct Teardown {
    steps: Vec<(&'static str, StepFn)>,
}

impl Teardown {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn push<F>(&mut self, name: &'static str, step: F)
    where
        F: FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send + 'static,
    {
        self.steps.push((name, Box::new(step)));
    }

    pub fn push_sync<F>(&mut self, name: &'static str, step: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.push(name, move || Box::pin(async move { step() }));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn run(self) {
        for (name, step) in self.steps {
            tracing::debug!("Releasing {}", name);
            if let Err(e) = step().await {
                tracing::warn!("Release step '{}' failed: {:#}", name, e);
            }
        }
    }
}
