use crate::{
    extension_api::{EventDispatcher, EventHistory, NoopEventDispatcher, SharedStateProvider},
    LaunchRulesEngine,
};

/// Configuration for [`LaunchRulesEngine`].
pub struct RulesEngineConfig {
    pub(crate) name: String,
    pub(crate) sdk_version: String,
    pub(crate) max_chained_dispatch: u32,
    pub(crate) dispatcher: Box<dyn EventDispatcher + Send + Sync>,
    pub(crate) shared_state: Option<Box<dyn SharedStateProvider + Send + Sync>>,
    pub(crate) event_history: Option<Box<dyn EventHistory + Send + Sync>>,
}

impl RulesEngineConfig {
    /// Maximum number of chained dispatch consequences triggered from a single event.
    pub const DEFAULT_MAX_CHAINED_DISPATCH: u32 = 1;

    /// Create a default configuration for an engine called `name`.
    ///
    /// Without a dispatcher, events produced by consequences are dropped.
    ///
    /// ```
    /// # use launch_rules::RulesEngineConfig;
    /// RulesEngineConfig::new("com.example.rules");
    /// ```
    pub fn new(name: impl Into<String>) -> Self {
        RulesEngineConfig {
            name: name.into(),
            sdk_version: env!("CARGO_PKG_VERSION").to_owned(),
            max_chained_dispatch: RulesEngineConfig::DEFAULT_MAX_CHAINED_DISPATCH,
            dispatcher: Box::new(NoopEventDispatcher),
            shared_state: None,
            event_history: None,
        }
    }

    /// Version reported by the `~sdkver` token.
    pub fn with_sdk_version(mut self, sdk_version: impl Into<String>) -> Self {
        self.sdk_version = sdk_version.into();
        self
    }

    #[allow(missing_docs)]
    pub fn with_max_chained_dispatch(mut self, max_chained_dispatch: u32) -> Self {
        self.max_chained_dispatch = max_chained_dispatch;
        self
    }

    /// Set the sink for events produced by consequences and for the reset event.
    ///
    /// ```
    /// # use launch_rules::RulesEngineConfig;
    /// let config = RulesEngineConfig::new("com.example.rules").with_dispatcher(|event: launch_rules::Event| {
    ///   println!("{:?}", event);
    /// });
    /// ```
    pub fn with_dispatcher(mut self, dispatcher: impl EventDispatcher + Send + Sync + 'static) -> Self {
        self.dispatcher = Box::new(dispatcher);
        self
    }

    /// Set the provider used to resolve `~state.` tokens.
    pub fn with_shared_state(
        mut self,
        shared_state: impl SharedStateProvider + Send + Sync + 'static,
    ) -> Self {
        self.shared_state = Some(Box::new(shared_state));
        self
    }

    /// Set the event history used by historical conditions.
    pub fn with_event_history(
        mut self,
        event_history: impl EventHistory + Send + Sync + 'static,
    ) -> Self {
        self.event_history = Some(Box::new(event_history));
        self
    }

    /// Create a new [`LaunchRulesEngine`] using this configuration.
    ///
    /// ```
    /// # use launch_rules::{LaunchRulesEngine, RulesEngineConfig};
    /// let engine: LaunchRulesEngine = RulesEngineConfig::new("com.example.rules").to_engine();
    /// ```
    pub fn to_engine(self) -> LaunchRulesEngine {
        LaunchRulesEngine::new(self)
    }
}
