use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use crate::{engine::EngineInner, rules::LaunchRule, Event};

/// A hook that delays consequences of re-evaluable schema rules until the host has finished some
/// asynchronous work (e.g., refreshing in-app message definitions).
///
/// It's implemented for all functions taking the same arguments, so a closure can be registered
/// directly.
pub trait ReevaluationInterceptor {
    /// Called with the triggering event and every matched rule that was held back. The host must
    /// call [`ReevaluationCompletion::complete`] once it is ready for the held rules to be
    /// re-evaluated.
    fn on_reevaluation_triggered(
        &self,
        event: &Event,
        rules: &[Arc<LaunchRule>],
        completion: ReevaluationCompletion,
    );
}

impl<T: Fn(&Event, &[Arc<LaunchRule>], ReevaluationCompletion)> ReevaluationInterceptor for T {
    fn on_reevaluation_triggered(
        &self,
        event: &Event,
        rules: &[Arc<LaunchRule>],
        completion: ReevaluationCompletion,
    ) {
        self(event, rules, completion)
    }
}

/// Handle passed to a [`ReevaluationInterceptor`]. Only the first call to
/// [`complete`](ReevaluationCompletion::complete) has an effect, on any of its clones.
#[derive(Clone)]
pub struct ReevaluationCompletion {
    inner: Arc<CompletionInner>,
}

struct CompletionInner {
    engine: Weak<EngineInner>,
    event: Event,
    chain_depth: u32,
    completed: AtomicBool,
}

impl ReevaluationCompletion {
    pub(crate) fn new(engine: Weak<EngineInner>, event: Event, chain_depth: u32) -> Self {
        ReevaluationCompletion {
            inner: Arc::new(CompletionInner {
                engine,
                event,
                chain_depth,
                completed: AtomicBool::new(false),
            }),
        }
    }

    /// Re-evaluate the original event against the current rules and apply consequences of
    /// matched held rules.
    pub fn complete(&self) {
        if self.inner.completed.swap(true, Ordering::AcqRel) {
            log::debug!(target: "launch_rules",
                        event_id = self.inner.event.unique_identifier();
                        "reevaluation already completed, ignoring");
            return;
        }

        let Some(engine) = self.inner.engine.upgrade() else {
            log::debug!(target: "launch_rules", "rules engine dropped before reevaluation completed");
            return;
        };
        engine.reevaluate(&self.inner.event, self.inner.chain_depth);
    }

    /// Whether [`complete`](ReevaluationCompletion::complete) has already been called.
    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ReevaluationCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReevaluationCompletion")
            .field("event", &self.inner.event.unique_identifier())
            .field("completed", &self.is_completed())
            .finish()
    }
}
