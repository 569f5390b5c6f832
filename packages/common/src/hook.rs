use anyhow::Result;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tracing::warn;

use crate::event::{Event, GenericEvent};

/// Typed hook, used for a specific event type
#[async_trait]
pub trait Hook<E: Event>: Send + Sync {
    /// Hook identifier
    fn id(&self) -> &str;
    /// Get the topics this hook is interested in
    fn topics(&self) -> &[&str];

    async fn on_event(&self, e: &E) -> Result<HookAction>;
}

pub enum HookAction {
    /// Let later hooks see the event.
    Pass,
    /// Skip the remaining hooks for this event.
    Stop,
}

/// Generic hook trait object for dynamic dispatch
#[async_trait]
pub trait GenericHook: Send + Sync {
    fn id(&self) -> &str;
    fn topics(&self) -> &[&str];
    async fn on_event(&self, e: &GenericEvent) -> Result<HookAction>;
}

/// Adapter to convert typed Hook<E> into GenericHook
pub struct HookAdapter<E: Event, H: Hook<E>> {
    hook: Arc<H>,
    _phantom: std::marker::PhantomData<fn(E)>,
}

#[async_trait]
impl<E: Event, H: Hook<E>> GenericHook for HookAdapter<E, H> {
    fn id(&self) -> &str {
        self.hook.id()
    }
    fn topics(&self) -> &[&str] {
        self.hook.topics()
    }
    async fn on_event(&self, generic_event: &GenericEvent) -> Result<HookAction> {
        let typed_event: E = E::from_generic_event(generic_event)?;
        self.hook.on_event(&typed_event).await
    }
}

/// Outcome of delivering one event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Hooks that handled the event without error.
    pub delivered: usize,
    /// Hooks that returned an error. Delivery continues past them.
    pub failed: Vec<String>,
}

/// Registry of hooks keyed by topic.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Vec<Arc<dyn GenericHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a typed hook to the registry
    pub fn add_hook<E: Event + 'static, H: Hook<E> + 'static>(&mut self, hook: Arc<H>) {
        let adapter: Arc<dyn GenericHook> = Arc::new(HookAdapter::<E, H> {
            hook,
            _phantom: std::marker::PhantomData,
        });
        for &topic in adapter.topics() {
            self.hooks
                .entry(topic.to_string())
                .or_default()
                .push(adapter.clone());
        }
    }

    /// Remove every registration of a hook. Returns false if it was unknown.
    pub fn remove_hook(&mut self, hook_id: &str) -> bool {
        let mut found = false;
        for hooks_list in self.hooks.values_mut() {
            let before = hooks_list.len();
            hooks_list.retain(|h| h.id() != hook_id);
            found |= hooks_list.len() != before;
        }
        found
    }

    pub fn hook_count(&self, topic: &str) -> usize {
        self.hooks.get(topic).map_or(0, Vec::len)
    }

    /// Deliver an event to every hook subscribed to its topic, in
    /// registration order.
    pub async fn trigger<E: Event>(&self, event: &E) -> Delivery {
        let mut delivery = Delivery::default();
        let Some(hooks) = self.hooks.get(event.topic()) else {
            return delivery;
        };

        let generic_event = event.to_generic_event();
        for hook in hooks {
            match hook.on_event(&generic_event).await {
                Ok(HookAction::Pass) => delivery.delivered += 1,
                Ok(HookAction::Stop) => {
                    delivery.delivered += 1;
                    break;
                }
                Err(e) => {
                    warn!(hook = hook.id(), topic = %generic_event.topic, error = %e, "Hook failed");
                    delivery.failed.push(hook.id().to_string());
                }
            }
        }
        delivery
    }
}
