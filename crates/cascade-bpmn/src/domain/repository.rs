//! Collaborator traits for the BPMN runtime
//!
//! The step handlers only talk to element instances, variables and catch event
//! subscriptions through these traits. External crates can implement them to
//! provide different persistence mechanisms.

use async_trait::async_trait;

use super::definition::BoundaryEventDefinition;
use super::element_instance::{
    ElementId, ElementInstance, ElementInstanceKey, ElementIntent, ElementRecord, ProcessId,
    StepEvent,
};
use crate::EngineError;

/// Hierarchy of element instances, their token counts and the event queue
#[async_trait]
pub trait ElementInstanceTree: Send + Sync {
    /// Allocate a new unique element instance key
    async fn next_key(&self) -> Result<ElementInstanceKey, EngineError>;

    /// Find an element instance by key
    async fn get(&self, key: ElementInstanceKey) -> Result<Option<ElementInstance>, EngineError>;

    /// Children of a scope, in creation order
    async fn children(
        &self,
        scope_key: ElementInstanceKey,
    ) -> Result<Vec<ElementInstance>, EngineError>;

    /// Instances of a process instance currently in `state`, in creation order
    async fn instances_in_state(
        &self,
        process_instance_key: ElementInstanceKey,
        state: ElementIntent,
    ) -> Result<Vec<ElementInstance>, EngineError>;

    /// Create an instance in the `Activating` state.
    ///
    /// Spawns a token on the flow scope named by the record.
    async fn create_instance(
        &self,
        key: ElementInstanceKey,
        record: ElementRecord,
    ) -> Result<ElementInstance, EngineError>;

    /// Release one token of a scope and return the updated scope
    async fn consume_token(
        &self,
        scope_key: ElementInstanceKey,
    ) -> Result<ElementInstance, EngineError>;

    /// Record the new state of an instance and queue the event for processing.
    ///
    /// `EventOccurred` is queued without changing the recorded state.
    async fn append_follow_up_event(
        &self,
        key: ElementInstanceKey,
        intent: ElementIntent,
        record: ElementRecord,
    ) -> Result<(), EngineError>;

    /// Queue an event again without touching the recorded state
    async fn redeliver(&self, event: StepEvent) -> Result<(), EngineError>;

    /// Take the next queued event
    async fn next_event(&self) -> Result<Option<StepEvent>, EngineError>;

    /// Remove an instance with all its descendants and return their keys
    async fn remove_subtree(
        &self,
        key: ElementInstanceKey,
    ) -> Result<Vec<ElementInstanceKey>, EngineError>;
}

/// Variable scopes attached to element instances
#[async_trait]
pub trait VariableStore: Send + Sync {
    /// Create the variable scope of an element instance
    async fn create_scope(
        &self,
        scope_key: ElementInstanceKey,
        parent_key: Option<ElementInstanceKey>,
    ) -> Result<(), EngineError>;

    /// Drop a scope and its variables
    async fn remove_scope(&self, scope_key: ElementInstanceKey) -> Result<(), EngineError>;

    /// Read a variable defined directly on a scope
    async fn get_local(
        &self,
        scope_key: ElementInstanceKey,
        name: &str,
    ) -> Result<Option<Vec<u8>>, EngineError>;

    /// Write a variable directly on a scope
    async fn set_local(
        &self,
        scope_key: ElementInstanceKey,
        process_id: &ProcessId,
        name: &str,
        value: &[u8],
    ) -> Result<(), EngineError>;

    /// Encode the named variables visible from a scope as one document.
    ///
    /// Names are resolved from the scope outwards; the nearest definition wins
    /// and names defined nowhere are left out.
    async fn get_as_document(
        &self,
        scope_key: ElementInstanceKey,
        names: &[String],
    ) -> Result<Vec<u8>, EngineError>;

    /// Encode every variable visible from a scope as one document
    async fn get_visible_as_document(
        &self,
        scope_key: ElementInstanceKey,
    ) -> Result<Vec<u8>, EngineError>;

    /// Write every entry of a document as a local variable of a scope
    async fn set_from_document(
        &self,
        scope_key: ElementInstanceKey,
        process_id: &ProcessId,
        document: &[u8],
    ) -> Result<(), EngineError>;
}

/// The catch events an element instance listens to while it is active
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchEventScope {
    /// The subscribing instance
    pub element_instance_key: ElementInstanceKey,
    /// Its process instance
    pub process_instance_key: ElementInstanceKey,
    /// Element the events are attached to
    pub element_id: ElementId,
    /// Events to subscribe to
    pub events: Vec<BoundaryEventDefinition>,
}

/// Opens and closes catch event subscriptions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatchEventSubscriber: Send + Sync {
    /// Open the subscriptions of an element instance
    async fn subscribe(&self, scope: &CatchEventScope) -> Result<(), EngineError>;

    /// Close every subscription of an element instance
    async fn unsubscribe(&self, key: ElementInstanceKey) -> Result<(), EngineError>;

    /// IDs of the events an element instance is subscribed to
    async fn subscribed_events(&self, key: ElementInstanceKey) -> Result<Vec<String>, EngineError>;
}

/// A write to a variable, as seen by the memory variable store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRecord {
    /// Scope written to
    pub scope_key: ElementInstanceKey,
    /// Process of the scope
    pub process_id: ProcessId,
    /// Variable name
    pub name: String,
    /// Encoded value
    pub value: Vec<u8>,
}

#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use crate::application::context::EngineServices;
    use crate::config::EngineConfig;
    use crate::document::{self, DocumentEntries};
    use crate::domain::query::JmesPathQueryProcessor;
    use dashmap::DashMap;
    use std::collections::{BTreeMap, HashSet, VecDeque};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// In-memory element instance tree with a FIFO event queue.
    ///
    /// A tree created with [`MemoryElementInstanceTree::recording`] also keeps
    /// every appended event in a journal so tests can assert on the exact
    /// sequence of lifecycle transitions. The journal grows without bound.
    pub struct MemoryElementInstanceTree {
        instances: DashMap<ElementInstanceKey, ElementInstance>,
        key_sequence: AtomicU64,
        queue: Mutex<VecDeque<StepEvent>>,
        journal: Option<Mutex<Vec<StepEvent>>>,
    }

    impl MemoryElementInstanceTree {
        /// Create an empty tree without a journal
        pub fn new() -> Self {
            Self {
                instances: DashMap::with_capacity(64),
                key_sequence: AtomicU64::new(1),
                queue: Mutex::new(VecDeque::new()),
                journal: None,
            }
        }

        /// Create an empty tree that journals every appended event
        pub fn recording() -> Self {
            Self {
                journal: Some(Mutex::new(Vec::new())),
                ..Self::new()
            }
        }

        /// Every event appended so far, in order; empty unless recording
        pub async fn journal(&self) -> Vec<StepEvent> {
            match &self.journal {
                Some(journal) => journal.lock().await.clone(),
                None => Vec::new(),
            }
        }

        /// Intents appended for one instance, in order
        pub async fn intents_of(&self, key: ElementInstanceKey) -> Vec<ElementIntent> {
            self.journal()
                .await
                .iter()
                .filter(|event| event.key == key)
                .map(|event| event.intent)
                .collect()
        }

        /// Number of events waiting to be processed
        pub async fn pending_events(&self) -> usize {
            self.queue.lock().await.len()
        }

        /// Number of live element instances
        pub fn len(&self) -> usize {
            self.instances.len()
        }

        /// Whether no element instance is live
        pub fn is_empty(&self) -> bool {
            self.instances.is_empty()
        }

        fn sorted(mut instances: Vec<ElementInstance>) -> Vec<ElementInstance> {
            instances.sort_by_key(|instance| instance.key);
            instances
        }

        async fn enqueue(&self, event: StepEvent) {
            self.queue.lock().await.push_back(event);
        }
    }

    impl Default for MemoryElementInstanceTree {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ElementInstanceTree for MemoryElementInstanceTree {
        async fn next_key(&self) -> Result<ElementInstanceKey, EngineError> {
            Ok(ElementInstanceKey(
                self.key_sequence.fetch_add(1, Ordering::SeqCst),
            ))
        }

        async fn get(&self, key: ElementInstanceKey) -> Result<Option<ElementInstance>, EngineError> {
            Ok(self.instances.get(&key).map(|instance| instance.clone()))
        }

        async fn children(
            &self,
            scope_key: ElementInstanceKey,
        ) -> Result<Vec<ElementInstance>, EngineError> {
            let children = self
                .instances
                .iter()
                .filter(|entry| entry.record.flow_scope_key == Some(scope_key))
                .map(|entry| entry.value().clone())
                .collect();
            Ok(Self::sorted(children))
        }

        async fn instances_in_state(
            &self,
            process_instance_key: ElementInstanceKey,
            state: ElementIntent,
        ) -> Result<Vec<ElementInstance>, EngineError> {
            let instances = self
                .instances
                .iter()
                .filter(|entry| {
                    entry.record.process_instance_key == process_instance_key
                        && entry.state == state
                })
                .map(|entry| entry.value().clone())
                .collect();
            Ok(Self::sorted(instances))
        }

        async fn create_instance(
            &self,
            key: ElementInstanceKey,
            record: ElementRecord,
        ) -> Result<ElementInstance, EngineError> {
            if self.instances.contains_key(&key) {
                return Err(EngineError::InvalidState(format!(
                    "Element instance {} already exists",
                    key
                )));
            }

            if let Some(scope_key) = record.flow_scope_key {
                let mut scope = self
                    .instances
                    .get_mut(&scope_key)
                    .ok_or(EngineError::ElementInstanceNotFound(scope_key.0))?;
                scope.active_tokens += 1;
            }

            let instance = ElementInstance::new(key, record);
            self.instances.insert(key, instance.clone());
            Ok(instance)
        }

        async fn consume_token(
            &self,
            scope_key: ElementInstanceKey,
        ) -> Result<ElementInstance, EngineError> {
            let mut scope = self
                .instances
                .get_mut(&scope_key)
                .ok_or(EngineError::ElementInstanceNotFound(scope_key.0))?;
            if scope.active_tokens == 0 {
                return Err(EngineError::TokenUnderflow(scope_key.0));
            }
            scope.active_tokens -= 1;
            Ok(scope.clone())
        }

        async fn append_follow_up_event(
            &self,
            key: ElementInstanceKey,
            intent: ElementIntent,
            record: ElementRecord,
        ) -> Result<(), EngineError> {
            {
                let mut instance = self
                    .instances
                    .get_mut(&key)
                    .ok_or(EngineError::ElementInstanceNotFound(key.0))?;
                if intent.updates_state() {
                    instance.state = intent;
                }
            }

            let event = StepEvent::new(key, intent, record);
            if let Some(journal) = &self.journal {
                journal.lock().await.push(event.clone());
            }
            self.enqueue(event).await;
            Ok(())
        }

        async fn redeliver(&self, event: StepEvent) -> Result<(), EngineError> {
            self.enqueue(event).await;
            Ok(())
        }

        async fn next_event(&self) -> Result<Option<StepEvent>, EngineError> {
            Ok(self.queue.lock().await.pop_front())
        }

        async fn remove_subtree(
            &self,
            key: ElementInstanceKey,
        ) -> Result<Vec<ElementInstanceKey>, EngineError> {
            let mut removed = Vec::new();
            let mut pending = VecDeque::from([key]);

            while let Some(next) = pending.pop_front() {
                if self.instances.remove(&next).is_none() {
                    continue;
                }
                removed.push(next);
                pending.extend(
                    self.instances
                        .iter()
                        .filter(|entry| entry.record.flow_scope_key == Some(next))
                        .map(|entry| *entry.key()),
                );
            }

            Ok(removed)
        }
    }

    struct VariableScope {
        parent: Option<ElementInstanceKey>,
        variables: BTreeMap<String, Vec<u8>>,
    }

    /// In-memory variable store.
    ///
    /// A store created with [`MemoryVariableStore::recording`] also keeps a copy
    /// of every write, including writes to scopes removed since.
    pub struct MemoryVariableStore {
        scopes: DashMap<ElementInstanceKey, VariableScope>,
        records: Option<Mutex<Vec<VariableRecord>>>,
    }

    impl MemoryVariableStore {
        /// Create an empty store
        pub fn new() -> Self {
            Self {
                scopes: DashMap::with_capacity(64),
                records: None,
            }
        }

        /// Create an empty store that records every write
        pub fn recording() -> Self {
            Self {
                records: Some(Mutex::new(Vec::new())),
                ..Self::new()
            }
        }

        /// Every variable write so far, in order; empty unless recording
        pub async fn records(&self) -> Vec<VariableRecord> {
            match &self.records {
                Some(records) => records.lock().await.clone(),
                None => Vec::new(),
            }
        }

        /// The last value written to a variable of a scope, even if the scope
        /// has since been removed
        pub async fn last_written(&self, scope_key: ElementInstanceKey, name: &str) -> Option<Vec<u8>> {
            self.records()
                .await
                .into_iter()
                .rev()
                .find(|record| record.scope_key == scope_key && record.name == name)
                .map(|record| record.value)
        }

        /// Whether a scope exists
        pub fn has_scope(&self, scope_key: ElementInstanceKey) -> bool {
            self.scopes.contains_key(&scope_key)
        }

        fn lookup(&self, scope_key: ElementInstanceKey, name: &str) -> Option<Vec<u8>> {
            let mut current = Some(scope_key);
            while let Some(key) = current {
                let scope = self.scopes.get(&key)?;
                if let Some(value) = scope.variables.get(name) {
                    return Some(value.clone());
                }
                current = scope.parent;
            }
            None
        }
    }

    impl Default for MemoryVariableStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl VariableStore for MemoryVariableStore {
        async fn create_scope(
            &self,
            scope_key: ElementInstanceKey,
            parent_key: Option<ElementInstanceKey>,
        ) -> Result<(), EngineError> {
            if let Some(parent) = parent_key {
                if !self.scopes.contains_key(&parent) {
                    return Err(EngineError::VariableStoreError(format!(
                        "Parent scope {} of {} does not exist",
                        parent, scope_key
                    )));
                }
            }
            self.scopes.entry(scope_key).or_insert_with(|| VariableScope {
                parent: parent_key,
                variables: BTreeMap::new(),
            });
            Ok(())
        }

        async fn remove_scope(&self, scope_key: ElementInstanceKey) -> Result<(), EngineError> {
            self.scopes.remove(&scope_key);
            Ok(())
        }

        async fn get_local(
            &self,
            scope_key: ElementInstanceKey,
            name: &str,
        ) -> Result<Option<Vec<u8>>, EngineError> {
            Ok(self
                .scopes
                .get(&scope_key)
                .and_then(|scope| scope.variables.get(name).cloned()))
        }

        async fn set_local(
            &self,
            scope_key: ElementInstanceKey,
            process_id: &ProcessId,
            name: &str,
            value: &[u8],
        ) -> Result<(), EngineError> {
            {
                let mut scope = self.scopes.get_mut(&scope_key).ok_or_else(|| {
                    EngineError::VariableStoreError(format!(
                        "Variable scope {} does not exist",
                        scope_key
                    ))
                })?;
                scope.variables.insert(name.to_string(), value.to_vec());
            }

            if let Some(records) = &self.records {
                records.lock().await.push(VariableRecord {
                    scope_key,
                    process_id: process_id.clone(),
                    name: name.to_string(),
                    value: value.to_vec(),
                });
            }
            Ok(())
        }

        async fn get_as_document(
            &self,
            scope_key: ElementInstanceKey,
            names: &[String],
        ) -> Result<Vec<u8>, EngineError> {
            let entries: Vec<(&str, Vec<u8>)> = names
                .iter()
                .filter_map(|name| self.lookup(scope_key, name).map(|value| (name.as_str(), value)))
                .collect();
            Ok(document::write_document(entries)?)
        }

        async fn get_visible_as_document(
            &self,
            scope_key: ElementInstanceKey,
        ) -> Result<Vec<u8>, EngineError> {
            let mut visible: BTreeMap<String, Vec<u8>> = BTreeMap::new();
            let mut seen = HashSet::new();
            let mut current = Some(scope_key);

            while let Some(key) = current {
                let Some(scope) = self.scopes.get(&key) else {
                    break;
                };
                for (name, value) in scope.variables.iter() {
                    if seen.insert(name.clone()) {
                        visible.insert(name.clone(), value.clone());
                    }
                }
                current = scope.parent;
            }

            Ok(document::write_document(visible)?)
        }

        async fn set_from_document(
            &self,
            scope_key: ElementInstanceKey,
            process_id: &ProcessId,
            document: &[u8],
        ) -> Result<(), EngineError> {
            for entry in DocumentEntries::new(document)? {
                let (name, value) = entry?;
                self.set_local(scope_key, process_id, name, value).await?;
            }
            Ok(())
        }
    }

    /// In-memory catch event subscriptions
    pub struct MemoryCatchEventSubscriber {
        subscriptions: DashMap<ElementInstanceKey, CatchEventScope>,
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    impl MemoryCatchEventSubscriber {
        /// Create a subscriber without subscriptions
        pub fn new() -> Self {
            Self {
                subscriptions: DashMap::new(),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            }
        }

        /// Whether an element instance currently holds subscriptions
        pub fn is_subscribed(&self, key: ElementInstanceKey) -> bool {
            self.subscriptions.contains_key(&key)
        }

        /// Number of subscribe calls so far
        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        /// Number of unsubscribe calls that closed an open subscription
        pub fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl Default for MemoryCatchEventSubscriber {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl CatchEventSubscriber for MemoryCatchEventSubscriber {
        async fn subscribe(&self, scope: &CatchEventScope) -> Result<(), EngineError> {
            self.subscriptions
                .insert(scope.element_instance_key, scope.clone());
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn unsubscribe(&self, key: ElementInstanceKey) -> Result<(), EngineError> {
            if self.subscriptions.remove(&key).is_some() {
                self.closed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn subscribed_events(&self, key: ElementInstanceKey) -> Result<Vec<String>, EngineError> {
            Ok(self
                .subscriptions
                .get(&key)
                .map(|scope| scope.events.iter().map(|event| event.id.clone()).collect())
                .unwrap_or_default())
        }
    }

    /// The three in-memory collaborators, kept as concrete handles so tests can
    /// inspect them after handing them to an engine
    #[derive(Clone, Default)]
    pub struct MemoryCollaborators {
        /// Element instance tree
        pub tree: Arc<MemoryElementInstanceTree>,
        /// Variable store
        pub variables: Arc<MemoryVariableStore>,
        /// Catch event subscriber
        pub catch_events: Arc<MemoryCatchEventSubscriber>,
    }

    impl MemoryCollaborators {
        /// Fresh, empty collaborators
        pub fn new() -> Self {
            Self::default()
        }

        /// Fresh collaborators whose tree journals events and whose variable
        /// store records writes
        pub fn recording() -> Self {
            Self {
                tree: Arc::new(MemoryElementInstanceTree::recording()),
                variables: Arc::new(MemoryVariableStore::recording()),
                catch_events: Arc::new(MemoryCatchEventSubscriber::new()),
            }
        }

        /// Engine services backed by these collaborators
        pub fn services(&self, config: EngineConfig) -> EngineServices {
            EngineServices::new(
                self.tree.clone(),
                self.variables.clone(),
                self.catch_events.clone(),
                Arc::new(JmesPathQueryProcessor),
                config,
            )
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::document::{decode_json, encode_json};
        use crate::domain::element_instance::ElementType;
        use serde_json::json;

        fn record(key: u64, flow_scope: Option<u64>) -> ElementRecord {
            ElementRecord {
                process_id: ProcessId::new("process"),
                process_instance_key: ElementInstanceKey(1),
                element_id: ElementId::new(format!("element_{}", key)),
                element_type: ElementType::ServiceTask,
                flow_scope_key: flow_scope.map(ElementInstanceKey),
                loop_counter: 0,
            }
        }

        #[tokio::test]
        async fn test_create_instance_spawns_token() {
            let tree = MemoryElementInstanceTree::new();
            let root = tree.next_key().await.unwrap();
            tree.create_instance(root, record(root.0, None)).await.unwrap();

            let child = tree.next_key().await.unwrap();
            tree.create_instance(child, record(child.0, Some(root.0)))
                .await
                .unwrap();

            let scope = tree.get(root).await.unwrap().unwrap();
            assert_eq!(scope.active_tokens, 1);
            assert_eq!(tree.children(root).await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_create_instance_requires_flow_scope() {
            let tree = MemoryElementInstanceTree::new();
            let result = tree
                .create_instance(ElementInstanceKey(2), record(2, Some(99)))
                .await;
            assert_eq!(result, Err(EngineError::ElementInstanceNotFound(99)));
            assert!(tree.is_empty());
        }

        #[tokio::test]
        async fn test_consume_token_underflow() {
            let tree = MemoryElementInstanceTree::new();
            tree.create_instance(ElementInstanceKey(1), record(1, None))
                .await
                .unwrap();
            let result = tree.consume_token(ElementInstanceKey(1)).await;
            assert_eq!(result, Err(EngineError::TokenUnderflow(1)));
        }

        #[tokio::test]
        async fn test_follow_up_events_are_fifo() {
            let tree = MemoryElementInstanceTree::recording();
            tree.create_instance(ElementInstanceKey(1), record(1, None))
                .await
                .unwrap();
            tree.append_follow_up_event(ElementInstanceKey(1), ElementIntent::Activated, record(1, None))
                .await
                .unwrap();
            tree.append_follow_up_event(ElementInstanceKey(1), ElementIntent::EventOccurred, record(1, None))
                .await
                .unwrap();

            let instance = tree.get(ElementInstanceKey(1)).await.unwrap().unwrap();
            assert_eq!(instance.state, ElementIntent::Activated);

            let first = tree.next_event().await.unwrap().unwrap();
            let second = tree.next_event().await.unwrap().unwrap();
            assert_eq!(first.intent, ElementIntent::Activated);
            assert_eq!(second.intent, ElementIntent::EventOccurred);
            assert!(tree.next_event().await.unwrap().is_none());
            assert_eq!(
                tree.intents_of(ElementInstanceKey(1)).await,
                vec![ElementIntent::Activated, ElementIntent::EventOccurred]
            );
        }

        #[tokio::test]
        async fn test_remove_subtree() {
            let tree = MemoryElementInstanceTree::new();
            tree.create_instance(ElementInstanceKey(1), record(1, None)).await.unwrap();
            tree.create_instance(ElementInstanceKey(2), record(2, Some(1))).await.unwrap();
            tree.create_instance(ElementInstanceKey(3), record(3, Some(2))).await.unwrap();
            tree.create_instance(ElementInstanceKey(4), record(4, Some(1))).await.unwrap();

            let mut removed = tree.remove_subtree(ElementInstanceKey(2)).await.unwrap();
            removed.sort();
            assert_eq!(removed, vec![ElementInstanceKey(2), ElementInstanceKey(3)]);
            assert_eq!(tree.len(), 2);
        }

        #[tokio::test]
        async fn test_variable_shadowing() {
            let store = MemoryVariableStore::new();
            let process_id = ProcessId::new("process");
            store.create_scope(ElementInstanceKey(1), None).await.unwrap();
            store
                .create_scope(ElementInstanceKey(2), Some(ElementInstanceKey(1)))
                .await
                .unwrap();

            let outer = encode_json(&json!({"item": "outer", "items": [1, 2]})).unwrap();
            store
                .set_from_document(ElementInstanceKey(1), &process_id, &outer)
                .await
                .unwrap();
            store
                .set_local(ElementInstanceKey(2), &process_id, "item", &encode_json(&json!("inner")).unwrap())
                .await
                .unwrap();

            let visible = store.get_visible_as_document(ElementInstanceKey(2)).await.unwrap();
            assert_eq!(
                decode_json(&visible).unwrap(),
                json!({"item": "inner", "items": [1, 2]})
            );

            let named = store
                .get_as_document(ElementInstanceKey(2), &["items".to_string(), "missing".to_string()])
                .await
                .unwrap();
            assert_eq!(decode_json(&named).unwrap(), json!({"items": [1, 2]}));

            assert!(store.get_local(ElementInstanceKey(2), "items").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_set_local_requires_scope() {
            let store = MemoryVariableStore::new();
            let result = store
                .set_local(ElementInstanceKey(5), &ProcessId::new("p"), "x", document::NIL)
                .await;
            assert!(matches!(result, Err(EngineError::VariableStoreError(_))));
        }

        #[tokio::test]
        async fn test_records_survive_scope_removal() {
            let store = MemoryVariableStore::recording();
            let process_id = ProcessId::new("process");
            store.create_scope(ElementInstanceKey(1), None).await.unwrap();
            store
                .set_local(ElementInstanceKey(1), &process_id, "x", &encode_json(&json!(1)).unwrap())
                .await
                .unwrap();
            store.remove_scope(ElementInstanceKey(1)).await.unwrap();

            assert!(!store.has_scope(ElementInstanceKey(1)));
            let value = store.last_written(ElementInstanceKey(1), "x").await.unwrap();
            assert_eq!(decode_json(&value).unwrap(), json!(1));
        }

        #[tokio::test]
        async fn test_history_is_kept_only_when_recording() {
            let collaborators = MemoryCollaborators::new();
            let process_id = ProcessId::new("process");
            collaborators
                .tree
                .create_instance(ElementInstanceKey(1), record(1, None))
                .await
                .unwrap();
            collaborators
                .tree
                .append_follow_up_event(ElementInstanceKey(1), ElementIntent::Activating, record(1, None))
                .await
                .unwrap();
            collaborators
                .variables
                .create_scope(ElementInstanceKey(1), None)
                .await
                .unwrap();
            collaborators
                .variables
                .set_local(ElementInstanceKey(1), &process_id, "x", document::NIL)
                .await
                .unwrap();

            assert!(collaborators.tree.journal().await.is_empty());
            assert!(collaborators.variables.records().await.is_empty());
            assert_eq!(collaborators.tree.pending_events().await, 1);

            let recording = MemoryCollaborators::recording();
            recording
                .tree
                .create_instance(ElementInstanceKey(1), record(1, None))
                .await
                .unwrap();
            recording
                .tree
                .append_follow_up_event(ElementInstanceKey(1), ElementIntent::Activating, record(1, None))
                .await
                .unwrap();
            assert_eq!(recording.tree.journal().await.len(), 1);
        }

        #[tokio::test]
        async fn test_subscriptions() {
            let subscriber = MemoryCatchEventSubscriber::new();
            let scope = CatchEventScope {
                element_instance_key: ElementInstanceKey(3),
                process_instance_key: ElementInstanceKey(1),
                element_id: ElementId::new("ship"),
                events: vec![BoundaryEventDefinition {
                    id: "cancel".to_string(),
                    event_name: "order_cancelled".to_string(),
                    interrupting: true,
                }],
            };

            subscriber.subscribe(&scope).await.unwrap();
            assert_eq!(
                subscriber.subscribed_events(ElementInstanceKey(3)).await.unwrap(),
                vec!["cancel".to_string()]
            );

            subscriber.unsubscribe(ElementInstanceKey(3)).await.unwrap();
            subscriber.unsubscribe(ElementInstanceKey(3)).await.unwrap();
            assert!(!subscriber.is_subscribed(ElementInstanceKey(3)));
            assert_eq!(subscriber.opened(), 1);
            assert_eq!(subscriber.closed(), 1);
        }
    }
}
