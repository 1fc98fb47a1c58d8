// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Action registry contracts.
//!
//! Actions are the executable capabilities tasks invoke (send a message, call
//! an API, ...). The engine never executes them itself; it collects whatever
//! is currently registered into an [`ActionRegistry`] and hands that to runner
//! construction on every dispatch.

use std::collections::HashMap;
use std::sync::Arc;

/// An executable capability a workflow task may invoke.
///
/// Execution semantics are owned by the runner; the engine only needs a
/// stable name to key the registry by.
pub trait Action: Send + Sync {
    /// Unique action name referenced by task definitions.
    fn name(&self) -> &str;
}

/// Mapping from action name to capability, rebuilt per dispatch.
pub type ActionRegistry = HashMap<String, Arc<dyn Action>>;

/// Source of the currently registered actions.
///
/// Implementations typically reflect a plugin system; registration may change
/// between dispatches, which is why the registry is rebuilt every time.
pub trait ActionProvider: Send + Sync {
    /// All actions registered at this moment.
    fn actions(&self) -> Vec<Arc<dyn Action>>;
}

/// Build a registry keyed by action name from the provider's current set.
///
/// On duplicate names the later registration wins.
pub fn build_registry(provider: &dyn ActionProvider) -> ActionRegistry {
    provider
        .actions()
        .into_iter()
        .map(|action| (action.name().to_string(), action))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedAction(&'static str);

    impl Action for NamedAction {
        fn name(&self) -> &str {
            self.0
        }
    }

    struct StaticProvider(Vec<Arc<dyn Action>>);

    impl ActionProvider for StaticProvider {
        fn actions(&self) -> Vec<Arc<dyn Action>> {
            self.0.clone()
        }
    }

    #[test]
    fn registry_is_keyed_by_name() {
        let provider = StaticProvider(vec![
            Arc::new(NamedAction("reply")),
            Arc::new(NamedAction("fetch")),
        ]);

        let registry = build_registry(&provider);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry["reply"].name(), "reply");
        assert_eq!(registry["fetch"].name(), "fetch");
    }

    #[test]
    fn later_registration_wins_on_duplicate_name() {
        let first: Arc<dyn Action> = Arc::new(NamedAction("reply"));
        let second: Arc<dyn Action> = Arc::new(NamedAction("reply"));
        let provider = StaticProvider(vec![first, second.clone()]);

        let registry = build_registry(&provider);

        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry["reply"], &second));
    }
}
