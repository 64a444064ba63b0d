//! Priority-ordered hook registry

use std::sync::Arc;
use tracing::{info, trace};

use super::{HookContext, HookError, HookResult, HookStage, NetfilterHook};
use crate::datagram::Datagram;

/// (priority, hook) pair
#[derive(Clone)]
pub struct HookRegistration {
    pub priority: i32,
    pub hook: Arc<dyn NetfilterHook>,
}

impl HookRegistration {
    fn is(&self, priority: i32, hook: &Arc<dyn NetfilterHook>) -> bool {
        self.priority == priority && same_hook(&self.hook, hook)
    }
}

fn same_hook(a: &Arc<dyn NetfilterHook>, b: &Arc<dyn NetfilterHook>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Ordered hook chain
///
/// Hooks run in ascending priority; hooks with equal priority run in
/// registration order. The chain is not reentrant: it can only be changed
/// through `&mut`, which the borrow checker forbids while an invocation
/// holds `&self`.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<HookRegistration>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook. Registering the same (priority, hook) pair twice is rejected.
    pub fn register(&mut self, priority: i32, hook: Arc<dyn NetfilterHook>) -> Result<(), HookError> {
        if self.hooks.iter().any(|r| r.is(priority, &hook)) {
            return Err(HookError::AlreadyRegistered {
                name: hook.name().to_string(),
                priority,
            });
        }
        let position = self.hooks.partition_point(|r| r.priority <= priority);
        info!("Registered hook '{}' at priority {}", hook.name(), priority);
        self.hooks.insert(position, HookRegistration { priority, hook });
        Ok(())
    }

    /// Remove a hook. Returns false (and does nothing) if it was not registered.
    pub fn unregister(&mut self, priority: i32, hook: &Arc<dyn NetfilterHook>) -> bool {
        match self.hooks.iter().position(|r| r.is(priority, hook)) {
            Some(index) => {
                let removed = self.hooks.remove(index);
                info!("Unregistered hook '{}' at priority {}", removed.hook.name(), priority);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Priorities in invocation order
    pub fn priorities(&self) -> Vec<i32> {
        self.hooks.iter().map(|r| r.priority).collect()
    }

    /// Run every hook for `stage` until one returns something other than Accept
    pub fn invoke(&self, stage: HookStage, mut datagram: Datagram, ctx: &mut HookContext) -> HookResult {
        for registration in &self.hooks {
            let hook = &registration.hook;
            let result = match stage {
                HookStage::PreRouting => hook.pre_routing(datagram, ctx),
                HookStage::LocalIn => hook.local_in(datagram, ctx),
                HookStage::Forward => hook.forward(datagram, ctx),
                HookStage::PostRouting => hook.post_routing(datagram, ctx),
                HookStage::LocalOut => hook.local_out(datagram, ctx),
            };
            match result {
                HookResult::Accept(d) => datagram = d,
                other => {
                    trace!("{} hook '{}' returned {:?}", stage, hook.name(), other.verdict());
                    return other;
                }
            }
        }
        HookResult::Accept(datagram)
    }
}
