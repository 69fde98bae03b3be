//! The compiled machine and its pure transition function.
//!
//! A [`Machine`] is an immutable tree of state nodes compiled from a
//! [`MachineDef`](crate::builder::MachineDef). Nodes live in a flat table
//! in document order; name references (actions, guards, activities) are
//! resolved against [`MachineOptions`] once, here, so no per-step lookup
//! remains.
//!
//! [`Machine::transition`] is deterministic and free of I/O: from a
//! current state and an event it computes the next configuration, the
//! ordered side-effect list, and the next context (assign actions are
//! applied here and removed from the surfaced list). Driving transitions
//! over time is the interpreter's job.

use crate::builder::{MachineDef, StateDef, TransitionDef};
use crate::core::action::{
    Action, ActivityDef, ActivityFn, DelayExpr, EventExpr, InvokeSpec, SendSpec, SendTarget,
};
use crate::core::error::{DefinitionError, TransitionError};
use crate::core::event::{after_event_name, Event, WILDCARD_EVENT};
use crate::core::guard::GuardFn;
use crate::core::node::{NodeId, NodeKind, StateNode, Transition};
use crate::core::state::{HistoryValue, State};
use crate::core::tree::StateTree;
use crate::core::value::StateValue;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Implementation maps a definition's name references resolve against.
pub struct MachineOptions<C> {
    pub(crate) actions: HashMap<String, Action<C>>,
    pub(crate) guards: HashMap<String, GuardFn<C>>,
    pub(crate) activities: HashMap<String, ActivityFn<C>>,
}

impl<C> Default for MachineOptions<C> {
    fn default() -> Self {
        Self {
            actions: HashMap::new(),
            guards: HashMap::new(),
            activities: HashMap::new(),
        }
    }
}

impl<C> MachineOptions<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an action name to its implementation. The mapped value may be
    /// any action variant, including an assign.
    pub fn action(mut self, name: impl Into<String>, action: impl Into<Action<C>>) -> Self {
        self.actions.insert(name.into(), action.into());
        self
    }

    /// Map a guard name to a predicate.
    pub fn guard<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&C, &Event) -> bool + Send + Sync + 'static,
    {
        self.guards.insert(name.into(), Arc::new(predicate));
        self
    }

    /// Map an activity name to its factory. The factory starts the
    /// activity and returns the disposer called on state exit.
    pub fn activity<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&C) -> crate::core::action::Disposer + Send + Sync + 'static,
    {
        self.activities.insert(name.into(), Arc::new(factory));
        self
    }
}

/// An immutable, compiled statechart.
pub struct Machine<C> {
    id: String,
    nodes: Vec<StateNode<C>>,
    ids: HashMap<String, NodeId>,
    root: NodeId,
    context: C,
}

impl<C> Machine<C> {
    /// The machine's id, also the default interpreter id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The initial context.
    pub fn context(&self) -> &C {
        &self.context
    }

    pub(crate) fn node(&self, id: NodeId) -> &StateNode<C> {
        &self.nodes[id.0]
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    /// Look up a node by its global id.
    pub fn state_node(&self, id: &str) -> Option<&StateNode<C>> {
        self.ids.get(id).map(|&node| self.node(node))
    }
}

impl<C: Clone + Send + Sync + 'static> Machine<C> {
    /// Compile a definition against its implementation maps. Fails on
    /// duplicate ids, missing or unknown `initial` keys, unresolvable
    /// targets, and misplaced history states.
    pub fn new(def: MachineDef<C>, options: MachineOptions<C>) -> Result<Self, DefinitionError> {
        let context = def
            .context
            .ok_or_else(|| DefinitionError::MissingContext(def.id.clone()))?;
        let machine_id = def.id;

        let root_def = StateDef {
            kind: def.parallel.then_some(NodeKind::Parallel),
            id: None,
            initial: def.initial,
            states: def.states,
            on: def.on,
            entry: Vec::new(),
            exit: Vec::new(),
            after: Vec::new(),
            activities: Vec::new(),
            invoke: None,
        };

        let mut assembler = Assembler {
            machine_id: machine_id.clone(),
            options,
            nodes: Vec::new(),
            ids: HashMap::new(),
            raw: Vec::new(),
            next_ord: 0,
        };
        let root = assembler.add(machine_id.clone(), root_def, None, Vec::new())?;
        assembler.finish()?;

        Ok(Machine {
            id: machine_id,
            nodes: assembler.nodes,
            ids: assembler.ids,
            root,
            context,
        })
    }

    /// A copy of this machine with a different initial context. Used when
    /// invoking it as a child with a seeded context.
    pub fn with_context(&self, context: C) -> Machine<C> {
        Machine {
            id: self.id.clone(),
            nodes: self.nodes.clone(),
            ids: self.ids.clone(),
            root: self.root,
            context,
        }
    }

    /// The default configuration: every compound node resolved through its
    /// `initial` child, every parallel node through all regions.
    pub fn initial_config(&self) -> StateTree {
        self.default_tree(self.root)
    }

    /// The machine's initial [`State`]: the default configuration with the
    /// entry actions of every initially-active node, assigns applied.
    pub fn initial_state(&self) -> State<C> {
        let tree = self.initial_config();
        let config = tree.nodes();

        let mut assembled: Vec<Action<C>> = Vec::new();
        for &id in &config {
            assembled.extend(self.node(id).entry.iter().cloned());
        }
        let entered_finals: Vec<NodeId> = config
            .iter()
            .copied()
            .filter(|&id| self.node(id).kind == NodeKind::Final)
            .collect();
        assembled.extend(self.done_events(&entered_finals, &tree, None));

        let event = Event::init();
        let mut context = self.context.clone();
        let mut actions: Vec<Action<C>> = Vec::new();
        apply_assigns(assembled, &mut context, &event, &mut actions);
        let activities = activities_after(&HashMap::new(), &actions);
        let done = self.tree_in_final(&tree);

        State {
            value: tree.value(self),
            context,
            event,
            actions,
            activities,
            history_value: HashMap::new(),
            changed: false,
            done,
            tree,
            history: None,
        }
    }

    /// Normalize a caller-supplied value into a full [`State`] with the
    /// machine's initial context and no pending actions.
    pub fn state_from(&self, value: impl Into<StateValue>) -> Result<State<C>, TransitionError> {
        let tree = self.tree_from_value(&value.into())?;
        let mut activities = HashMap::new();
        for id in tree.nodes() {
            for activity in &self.node(id).activities {
                activities.insert(activity.id.clone(), true);
            }
        }
        Ok(State {
            value: tree.value(self),
            context: self.context.clone(),
            event: Event::init(),
            actions: Vec::new(),
            activities,
            history_value: HashMap::new(),
            changed: false,
            done: self.tree_in_final(&tree),
            tree,
            history: None,
        })
    }

    /// Resolve a possibly-partial value into a full tree, filling defaults
    /// from each compound node's `initial`.
    pub fn tree_from_value(&self, value: &StateValue) -> Result<StateTree, TransitionError> {
        self.resolve_value(self.root, value)
    }

    /// The pure transition function: next state from `state` and `event`.
    ///
    /// An event with no enabled transition yields a state with the same
    /// value and context, no actions, and `changed == false`.
    pub fn transition(
        &self,
        state: &State<C>,
        event: impl Into<Event>,
    ) -> Result<State<C>, TransitionError> {
        let event = event.into();
        let tree = state.tree();

        // Transition selection: leaf-to-root per active branch, first
        // candidate whose guard passes wins for that branch.
        let mut selected: Vec<&Transition<C>> = Vec::new();
        let mut seen: HashSet<usize> = HashSet::new();
        for leaf in tree.leaves() {
            'branch: for id in self.ancestors_inclusive(leaf) {
                let node = self.node(id);
                let mut lists: Vec<&[Transition<C>]> = Vec::new();
                if let Some(list) = node.on.get(&event.name) {
                    lists.push(list);
                }
                if !event.is_transient() {
                    if let Some(list) = node.on.get(WILDCARD_EVENT) {
                        lists.push(list);
                    }
                }
                for transition in lists.into_iter().flatten() {
                    let enabled = match &transition.cond {
                        None => true,
                        Some(guard) => guard.check(&state.context, &event)?,
                    };
                    if enabled {
                        if seen.insert(transition.ord) {
                            selected.push(transition);
                        }
                        break 'branch;
                    }
                }
            }
        }

        if selected.is_empty() {
            return Ok(State {
                value: state.value.clone(),
                context: state.context.clone(),
                event,
                actions: Vec::new(),
                activities: state.activities.clone(),
                history_value: state.history_value.clone(),
                changed: false,
                done: state.done,
                tree: tree.clone(),
                history: Some(Box::new(state.without_history())),
            });
        }

        let config = tree.nodes();
        let config_set: HashSet<NodeId> = config.iter().copied().collect();

        // Exit sets first: entry membership below depends on the union.
        let mut exit_set: HashSet<NodeId> = HashSet::new();
        let mut targeted: Vec<(Vec<NodeId>, NodeId)> = Vec::new();
        for transition in &selected {
            if transition.targets.is_empty() {
                continue;
            }
            let targets = self.resolve_history_targets(&transition.targets, &state.history_value);
            let domain = self.transition_domain(transition, &targets);
            for &node in &config {
                if self.is_proper_ancestor(domain, node)
                    && !targets
                        .iter()
                        .any(|&target| self.is_proper_ancestor(node, target))
                {
                    exit_set.insert(node);
                }
            }
            targeted.push((targets, domain));
        }

        // Entry sets: ancestor chains below each domain, then a completion
        // pass that descends initial children and missing parallel regions.
        let mut entry_set: HashSet<NodeId> = HashSet::new();
        for (targets, domain) in &targeted {
            for &target in targets {
                for node in self.chain_below(*domain, target) {
                    if !config_set.contains(&node) || exit_set.contains(&node) {
                        entry_set.insert(node);
                    }
                }
            }
        }
        let mut worklist: Vec<NodeId> = entry_set.iter().copied().collect();
        while let Some(id) = worklist.pop() {
            let node = self.node(id);
            match node.kind {
                NodeKind::Compound => {
                    let has_active_child = node.children.iter().any(|child| {
                        entry_set.contains(child)
                            || (config_set.contains(child) && !exit_set.contains(child))
                    });
                    if !has_active_child {
                        if let Some(initial) = node.initial {
                            if entry_set.insert(initial) {
                                worklist.push(initial);
                            }
                        }
                    }
                }
                NodeKind::Parallel => {
                    for &region in &node.children {
                        if self.node(region).kind == NodeKind::History {
                            continue;
                        }
                        let kept_active =
                            config_set.contains(&region) && !exit_set.contains(&region);
                        if !kept_active && entry_set.insert(region) {
                            worklist.push(region);
                        }
                    }
                }
                _ => {}
            }
        }

        // New configuration.
        let mut active: HashSet<NodeId> = config_set.difference(&exit_set).copied().collect();
        active.extend(entry_set.iter().copied());
        let new_tree = self.build_tree(self.root, &active);

        // History snapshots for exited compounds that carry a history child.
        let mut history_value = state.history_value.clone();
        for &id in &exit_set {
            let node = self.node(id);
            if node.has_history_child {
                if let Some(sub) = tree.subtree(id) {
                    history_value.insert(node.id.clone(), sub.child_value(self));
                }
            }
        }

        // Action assembly: exit (child-to-parent, regions in declaration
        // order), transition actions in selection order, entry
        // (parent-to-child, document order).
        let mut exit_order: Vec<NodeId> = Vec::new();
        tree.postorder_filtered(&exit_set, &mut exit_order);
        let mut entry_order: Vec<NodeId> = entry_set.iter().copied().collect();
        entry_order.sort();

        let mut assembled: Vec<Action<C>> = Vec::new();
        for &id in &exit_order {
            assembled.extend(self.node(id).exit.iter().cloned());
        }
        for transition in &selected {
            assembled.extend(transition.actions.iter().cloned());
        }
        for &id in &entry_order {
            assembled.extend(self.node(id).entry.iter().cloned());
        }
        let entered_finals: Vec<NodeId> = entry_order
            .iter()
            .copied()
            .filter(|&id| self.node(id).kind == NodeKind::Final)
            .collect();
        assembled.extend(self.done_events(&entered_finals, &new_tree, Some(tree)));

        // Assigns apply in order to a working context and are not
        // surfaced; pure actions expand in place against that context.
        let mut context = state.context.clone();
        let mut actions: Vec<Action<C>> = Vec::new();
        apply_assigns(assembled, &mut context, &event, &mut actions);

        let activities = activities_after(&state.activities, &actions);
        let done = state.done || self.tree_in_final(&new_tree);

        Ok(State {
            value: new_tree.value(self),
            context,
            event,
            actions,
            activities,
            history_value,
            changed: true,
            done,
            tree: new_tree,
            history: Some(Box::new(state.without_history())),
        })
    }

    /// [`Machine::transition`] starting from a state value instead of a
    /// full state.
    pub fn transition_from(
        &self,
        value: impl Into<StateValue>,
        event: impl Into<Event>,
    ) -> Result<State<C>, TransitionError> {
        let state = self.state_from(value)?;
        self.transition(&state, event)
    }

    fn default_tree(&self, id: NodeId) -> StateTree {
        let node = self.node(id);
        match node.kind {
            NodeKind::Compound => {
                let children = match node.initial {
                    Some(child) => vec![self.default_tree(child)],
                    None => Vec::new(),
                };
                StateTree { node: id, children }
            }
            NodeKind::Parallel => StateTree {
                node: id,
                children: node
                    .children
                    .iter()
                    .filter(|&&child| self.node(child).kind != NodeKind::History)
                    .map(|&child| self.default_tree(child))
                    .collect(),
            },
            _ => StateTree::leaf(id),
        }
    }

    fn resolve_value(&self, id: NodeId, value: &StateValue) -> Result<StateTree, TransitionError> {
        let node = self.node(id);
        match value {
            StateValue::Leaf(key) => {
                if node.kind == NodeKind::Parallel {
                    return Err(TransitionError::ValueShape(node.id.clone()));
                }
                let child =
                    *node
                        .child_keys
                        .get(key)
                        .ok_or_else(|| TransitionError::InvalidStateValue {
                            parent: node.id.clone(),
                            key: key.clone(),
                        })?;
                Ok(StateTree {
                    node: id,
                    children: vec![self.default_tree(child)],
                })
            }
            StateValue::Branch(map) => {
                if map.is_empty() {
                    return Ok(self.default_tree(id));
                }
                match node.kind {
                    NodeKind::Parallel => {
                        for key in map.keys() {
                            if !node.child_keys.contains_key(key) {
                                return Err(TransitionError::InvalidStateValue {
                                    parent: node.id.clone(),
                                    key: key.clone(),
                                });
                            }
                        }
                        let mut children = Vec::new();
                        for &region in &node.children {
                            if self.node(region).kind == NodeKind::History {
                                continue;
                            }
                            match map.get(&self.node(region).key) {
                                Some(sub) => children.push(self.resolve_value(region, sub)?),
                                None => children.push(self.default_tree(region)),
                            }
                        }
                        Ok(StateTree { node: id, children })
                    }
                    NodeKind::Compound => {
                        let mut entries = map.iter();
                        let (key, sub) = match (entries.next(), entries.next()) {
                            (Some(entry), None) => entry,
                            _ => return Err(TransitionError::ValueShape(node.id.clone())),
                        };
                        let child = *node.child_keys.get(key).ok_or_else(|| {
                            TransitionError::InvalidStateValue {
                                parent: node.id.clone(),
                                key: key.clone(),
                            }
                        })?;
                        Ok(StateTree {
                            node: id,
                            children: vec![self.resolve_value(child, sub)?],
                        })
                    }
                    _ => Err(TransitionError::ValueShape(node.id.clone())),
                }
            }
        }
    }

    fn resolve_history_targets(
        &self,
        targets: &[NodeId],
        history: &HistoryValue,
    ) -> Vec<NodeId> {
        let mut resolved = Vec::new();
        for &target in targets {
            if self.node(target).kind != NodeKind::History {
                resolved.push(target);
                continue;
            }
            let Some(parent) = self.node(target).parent else {
                resolved.push(target);
                continue;
            };
            match history.get(&self.node(parent).id) {
                Some(recorded) => match self.resolve_value(parent, recorded) {
                    Ok(sub) => resolved.extend(sub.leaves()),
                    Err(_) => resolved.push(parent),
                },
                None => match self.node(parent).initial {
                    Some(initial) => resolved.push(initial),
                    None => resolved.push(parent),
                },
            }
        }
        resolved
    }

    /// Least compound ancestor containing source and every target, or the
    /// source itself for internal transitions into its own descendants.
    fn transition_domain(&self, transition: &Transition<C>, targets: &[NodeId]) -> NodeId {
        if transition.internal
            && targets
                .iter()
                .all(|&target| self.is_descendant_or_self(target, transition.source))
        {
            return transition.source;
        }
        let mut candidate = self.node(transition.source).parent;
        while let Some(ancestor) = candidate {
            let compound_like =
                self.node(ancestor).kind == NodeKind::Compound || ancestor == self.root;
            if compound_like
                && targets
                    .iter()
                    .all(|&target| self.is_proper_ancestor(ancestor, target))
            {
                return ancestor;
            }
            candidate = self.node(ancestor).parent;
        }
        self.root
    }

    fn done_events(
        &self,
        entered_finals: &[NodeId],
        new_tree: &StateTree,
        old_tree: Option<&StateTree>,
    ) -> Vec<Action<C>> {
        let mut raised = Vec::new();
        let mut emitted: HashSet<String> = HashSet::new();
        for &final_node in entered_finals {
            let Some(parent) = self.node(final_node).parent else {
                continue;
            };
            if parent == self.root || self.node(parent).kind != NodeKind::Compound {
                continue;
            }
            let parent_id = self.node(parent).id.clone();
            if emitted.insert(parent_id.clone()) {
                raised.push(Action::Raise(Event::done_state(&parent_id)));
            }
            let Some(grandparent) = self.node(parent).parent else {
                continue;
            };
            if grandparent == self.root || self.node(grandparent).kind != NodeKind::Parallel {
                continue;
            }
            let was_final = old_tree.is_some_and(|t| self.subtree_in_final(grandparent, t));
            if self.subtree_in_final(grandparent, new_tree) && !was_final {
                let grandparent_id = self.node(grandparent).id.clone();
                if emitted.insert(grandparent_id.clone()) {
                    raised.push(Action::Raise(Event::done_state(&grandparent_id)));
                }
            }
        }
        raised
    }

    fn subtree_in_final(&self, id: NodeId, tree: &StateTree) -> bool {
        tree.subtree(id).is_some_and(|sub| self.tree_in_final(sub))
    }

    pub(crate) fn tree_in_final(&self, tree: &StateTree) -> bool {
        match self.node(tree.node).kind {
            NodeKind::Final => true,
            NodeKind::Atomic | NodeKind::History => false,
            NodeKind::Compound => tree
                .children
                .first()
                .is_some_and(|child| self.node(child.node).kind == NodeKind::Final),
            NodeKind::Parallel => {
                !tree.children.is_empty()
                    && tree.children.iter().all(|child| self.tree_in_final(child))
            }
        }
    }

    fn build_tree(&self, id: NodeId, active: &HashSet<NodeId>) -> StateTree {
        let children = self
            .node(id)
            .children
            .iter()
            .filter(|child| active.contains(*child))
            .map(|&child| self.build_tree(child, active))
            .collect();
        StateTree { node: id, children }
    }

    fn ancestors_inclusive(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = vec![id];
        let mut cursor = self.node(id).parent;
        while let Some(parent) = cursor {
            chain.push(parent);
            cursor = self.node(parent).parent;
        }
        chain
    }

    fn chain_below(&self, domain: NodeId, target: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            if node == domain {
                break;
            }
            chain.push(node);
            cursor = self.node(node).parent;
        }
        chain.reverse();
        chain
    }

    fn is_proper_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = self.node(node).parent;
        while let Some(parent) = cursor {
            if parent == ancestor {
                return true;
            }
            cursor = self.node(parent).parent;
        }
        false
    }

    fn is_descendant_or_self(&self, node: NodeId, ancestor: NodeId) -> bool {
        node == ancestor || self.is_proper_ancestor(ancestor, node)
    }
}

/// Walk an assembled action list: assigns fold into the working context,
/// pure actions expand against it, everything else is surfaced.
fn apply_assigns<C>(
    actions: Vec<Action<C>>,
    context: &mut C,
    event: &Event,
    out: &mut Vec<Action<C>>,
) {
    for action in actions {
        match action {
            Action::Assign(update) => {
                let next = update(context, event);
                *context = next;
            }
            Action::Pure(compute) => {
                let expanded = compute(context, event);
                apply_assigns(expanded, context, event, out);
            }
            other => out.push(other),
        }
    }
}

fn activities_after<C>(base: &HashMap<String, bool>, actions: &[Action<C>]) -> HashMap<String, bool> {
    let mut activities = base.clone();
    for action in actions {
        match action {
            Action::Start(def) => {
                activities.insert(def.id.clone(), true);
            }
            Action::Invoke(spec) => {
                activities.insert(spec.id.clone(), true);
            }
            Action::Stop(id) => {
                activities.insert(id.clone(), false);
            }
            _ => {}
        }
    }
    activities
}

struct RawNode<C> {
    node: NodeId,
    initial_key: Option<String>,
    transitions: Vec<(String, TransitionDef<C>)>,
    after: Vec<(DelayExpr<C>, TransitionDef<C>)>,
    invoke: Option<crate::builder::InvokeBuilder<C>>,
}

struct Assembler<C> {
    machine_id: String,
    options: MachineOptions<C>,
    nodes: Vec<StateNode<C>>,
    ids: HashMap<String, NodeId>,
    raw: Vec<RawNode<C>>,
    next_ord: usize,
}

impl<C: Clone + Send + Sync + 'static> Assembler<C> {
    fn add(
        &mut self,
        key: String,
        def: StateDef<C>,
        parent: Option<NodeId>,
        path: Vec<String>,
    ) -> Result<NodeId, DefinitionError> {
        let node_id = NodeId(self.nodes.len());
        let kind = def.kind.unwrap_or(if def.states.is_empty() {
            NodeKind::Atomic
        } else {
            NodeKind::Compound
        });
        let auto_id = if path.is_empty() {
            self.machine_id.clone()
        } else {
            format!("{}.{}", self.machine_id, path.join("."))
        };
        let id = def.id.unwrap_or(auto_id);

        let entry = def
            .entry
            .into_iter()
            .map(|action| self.resolve_action(action))
            .collect();
        let exit = def
            .exit
            .into_iter()
            .map(|action| self.resolve_action(action))
            .collect();
        let activities: Vec<ActivityDef<C>> = def
            .activities
            .into_iter()
            .map(|activity| self.resolve_activity(activity))
            .collect();

        self.nodes.push(StateNode {
            id: id.clone(),
            key,
            path: path.clone(),
            kind,
            parent,
            children: Vec::new(),
            child_keys: IndexMap::new(),
            initial: None,
            on: IndexMap::new(),
            entry,
            exit,
            activities,
            invoke: None,
            has_history_child: false,
        });
        if self.ids.insert(id.clone(), node_id).is_some() {
            return Err(DefinitionError::DuplicateId(id));
        }
        self.raw.push(RawNode {
            node: node_id,
            initial_key: def.initial,
            transitions: def
                .on
                .into_iter()
                .flat_map(|(event, defs)| defs.into_iter().map(move |d| (event.clone(), d)))
                .collect(),
            after: def.after,
            invoke: def.invoke,
        });

        for (child_key, child_def) in def.states {
            let mut child_path = path.clone();
            child_path.push(child_key.clone());
            let child = self.add(child_key.clone(), child_def, Some(node_id), child_path)?;
            self.nodes[node_id.0].children.push(child);
            self.nodes[node_id.0].child_keys.insert(child_key, child);
            if self.nodes[child.0].kind == NodeKind::History {
                self.nodes[node_id.0].has_history_child = true;
            }
        }
        Ok(node_id)
    }

    fn finish(&mut self) -> Result<(), DefinitionError> {
        let raws = std::mem::take(&mut self.raw);
        for raw in raws {
            let node_id = raw.node;
            match self.nodes[node_id.0].kind {
                NodeKind::Compound => {
                    let state_id = self.nodes[node_id.0].id.clone();
                    let key = raw
                        .initial_key
                        .clone()
                        .ok_or_else(|| DefinitionError::MissingInitial(state_id.clone()))?;
                    let child = *self.nodes[node_id.0].child_keys.get(&key).ok_or(
                        DefinitionError::UnknownInitial {
                            state: state_id,
                            initial: key,
                        },
                    )?;
                    self.nodes[node_id.0].initial = Some(child);
                }
                NodeKind::History => {
                    let under_compound = self.nodes[node_id.0]
                        .parent
                        .map(|p| self.nodes[p.0].kind == NodeKind::Compound)
                        .unwrap_or(false);
                    if !under_compound {
                        return Err(DefinitionError::OrphanHistory(
                            self.nodes[node_id.0].id.clone(),
                        ));
                    }
                }
                _ => {}
            }

            let mut compiled: Vec<(String, Transition<C>)> = Vec::new();
            for (event, tdef) in raw.transitions {
                let transition = self.compile_transition(node_id, event.clone(), tdef)?;
                compiled.push((event, transition));
            }

            let mut entry_extra: Vec<Action<C>> = Vec::new();
            let mut exit_extra: Vec<Action<C>> = Vec::new();
            for (index, (delay, tdef)) in raw.after.into_iter().enumerate() {
                let event_name =
                    after_event_name(&delay.tag(index), &self.nodes[node_id.0].id);
                let transition = self.compile_transition(node_id, event_name.clone(), tdef)?;
                compiled.push((event_name.clone(), transition));
                entry_extra.push(Action::Send(SendSpec {
                    event: EventExpr::Fixed(Event::new(event_name.clone())),
                    target: SendTarget::Own,
                    delay: Some(delay),
                    id: Some(event_name.clone()),
                }));
                exit_extra.push(Action::Cancel(event_name));
            }
            for activity in self.nodes[node_id.0].activities.clone() {
                exit_extra.push(Action::Stop(activity.id.clone()));
                entry_extra.push(Action::Start(activity));
            }
            if let Some(invoke) = raw.invoke {
                let invoke_id = invoke
                    .id
                    .clone()
                    .unwrap_or_else(|| invoke.machine.id().to_string());
                let spec = InvokeSpec {
                    id: invoke_id.clone(),
                    machine: invoke.machine,
                    data: invoke.data,
                    auto_forward: invoke.auto_forward,
                };
                entry_extra.push(Action::Invoke(spec.clone()));
                exit_extra.push(Action::Stop(invoke_id.clone()));
                self.nodes[node_id.0].invoke = Some(spec);
                if let Some(done_def) = invoke.on_done {
                    let event_name = format!("done.invoke.{invoke_id}");
                    let transition =
                        self.compile_transition(node_id, event_name.clone(), done_def)?;
                    compiled.push((event_name, transition));
                }
            }

            let node = &mut self.nodes[node_id.0];
            for (event, transition) in compiled {
                node.on.entry(event).or_insert_with(Vec::new).push(transition);
            }
            node.entry.extend(entry_extra);
            node.exit.extend(exit_extra);
        }
        Ok(())
    }

    fn compile_transition(
        &mut self,
        source: NodeId,
        event: String,
        def: TransitionDef<C>,
    ) -> Result<Transition<C>, DefinitionError> {
        let mut targets = Vec::new();
        for target in &def.targets {
            targets.push(self.resolve_target(source, target)?);
        }
        let cond = def
            .cond
            .map(|guard| guard.resolve_with(|name| self.options.guards.get(name).cloned()));
        let actions = def
            .actions
            .into_iter()
            .map(|action| self.resolve_action(action))
            .collect();
        let ord = self.next_ord;
        self.next_ord += 1;
        Ok(Transition {
            ord,
            event,
            source,
            targets,
            cond,
            actions,
            internal: def.internal,
        })
    }

    fn resolve_target(&self, source: NodeId, target: &str) -> Result<NodeId, DefinitionError> {
        let unknown = || DefinitionError::UnknownTarget {
            from_state: self.nodes[source.0].id.clone(),
            target: target.to_string(),
        };
        if let Some(rest) = target.strip_prefix('#') {
            if let Some(&node) = self.ids.get(rest) {
                return Ok(node);
            }
            let parts: Vec<&str> = rest.split('.').collect();
            for cut in (1..parts.len()).rev() {
                let prefix = parts[..cut].join(".");
                if let Some(&base) = self.ids.get(&prefix) {
                    return self.descend(base, &parts[cut..]).ok_or_else(unknown);
                }
            }
            return Err(unknown());
        }
        if let Some(rest) = target.strip_prefix('.') {
            let segments: Vec<&str> = rest.split('.').collect();
            return self.descend(source, &segments).ok_or_else(unknown);
        }
        let base = self.nodes[source.0].parent.unwrap_or(source);
        let segments: Vec<&str> = target.split('.').collect();
        self.descend(base, &segments).ok_or_else(unknown)
    }

    fn descend(&self, from: NodeId, segments: &[&str]) -> Option<NodeId> {
        let mut node = from;
        for segment in segments {
            node = *self.nodes[node.0].child_keys.get(*segment)?;
        }
        Some(node)
    }

    fn resolve_action(&self, action: Action<C>) -> Action<C> {
        match action {
            Action::Custom(custom) if custom.exec.is_none() => {
                match self.options.actions.get(&custom.name) {
                    Some(mapped) => mapped.clone(),
                    None => Action::Custom(custom),
                }
            }
            other => other,
        }
    }

    fn resolve_activity(&self, activity: ActivityDef<C>) -> ActivityDef<C> {
        if activity.start.is_some() {
            return activity;
        }
        match self.options.activities.get(&activity.id) {
            Some(factory) => ActivityDef {
                id: activity.id,
                start: Some(Arc::clone(factory)),
            },
            None => activity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{MachineDef, StateDef, TransitionDef};
    use crate::core::action::{action, assign, pure, raise};

    fn light() -> Machine<()> {
        MachineDef::new("light")
            .context(())
            .initial("green")
            .state(
                "green",
                StateDef::new()
                    .entry(action("enter_green"))
                    .exit(action("exit_green"))
                    .on("TIMER", "yellow"),
            )
            .state("yellow", StateDef::new().on("TIMER", "red"))
            .state(
                "red",
                StateDef::new()
                    .initial("walk")
                    .state("walk", StateDef::new().on("PED_COUNTDOWN", "wait"))
                    .state("wait", StateDef::new().on("PED_COUNTDOWN", "stop"))
                    .state("stop", StateDef::new())
                    .on("TIMER", "green"),
            )
            .build(MachineOptions::default())
            .expect("definition is valid")
    }

    #[test]
    fn initial_state_resolves_defaults() {
        let machine = light();
        let state = machine.initial_state();
        assert!(state.matches("green"));
        assert!(!state.changed);
    }

    #[test]
    fn transition_moves_between_siblings() {
        let machine = light();
        let state = machine.initial_state();
        let next = machine.transition(&state, "TIMER").expect("transitions");
        assert!(next.matches("yellow"));
        assert!(next.changed);
    }

    #[test]
    fn entering_a_compound_descends_into_initial() {
        let machine = light();
        let yellow = machine.state_from("yellow").expect("valid");
        let next = machine.transition(&yellow, "TIMER").expect("transitions");
        assert!(next.matches("red.walk"));
    }

    #[test]
    fn deep_transition_within_a_compound() {
        let machine = light();
        let state = machine.state_from("red.walk").expect("valid");
        let next = machine
            .transition(&state, "PED_COUNTDOWN")
            .expect("transitions");
        assert!(next.matches("red.wait"));
    }

    #[test]
    fn unknown_event_is_identity_with_no_actions() {
        let machine = light();
        let state = machine.initial_state();
        let next = machine.transition(&state, "NOPE").expect("transitions");
        assert_eq!(next.value, state.value);
        assert!(next.actions.is_empty());
        assert!(!next.changed);
    }

    #[test]
    fn ancestor_handles_events_children_ignore() {
        let machine = light();
        let state = machine.state_from("red.stop").expect("valid");
        let next = machine.transition(&state, "TIMER").expect("transitions");
        assert!(next.matches("green"));
    }

    #[test]
    fn external_self_transition_reruns_exit_and_entry() {
        let machine = MachineDef::new("m")
            .context(())
            .initial("a")
            .state(
                "a",
                StateDef::new()
                    .entry(action("enter_a"))
                    .exit(action("exit_a"))
                    .on("SELF", TransitionDef::to("a").action(action("do_a"))),
            )
            .build(MachineOptions::default())
            .expect("definition is valid");
        let state = machine.initial_state();
        let next = machine.transition(&state, "SELF").expect("transitions");
        assert_eq!(next.action_names(), vec!["exit_a", "do_a", "enter_a"]);
    }

    #[test]
    fn internal_self_transition_skips_exit_and_entry() {
        let machine = MachineDef::new("m")
            .context(())
            .initial("a")
            .state(
                "a",
                StateDef::new()
                    .entry(action("enter_a"))
                    .exit(action("exit_a"))
                    .on(
                        "SELF",
                        TransitionDef::to("a").internal().action(action("do_a")),
                    ),
            )
            .build(MachineOptions::default())
            .expect("definition is valid");
        let state = machine.initial_state();
        let next = machine.transition(&state, "SELF").expect("transitions");
        assert_eq!(next.action_names(), vec!["do_a"]);
        assert!(next.changed);
    }

    #[test]
    fn parallel_regions_combine_in_declaration_order() {
        let machine = MachineDef::new("word")
            .context(())
            .parallel()
            .state(
                "bold",
                StateDef::new()
                    .initial("off")
                    .state(
                        "on",
                        StateDef::new().exit(action("exit_bold_on")).on("RESET", "off"),
                    )
                    .state("off", StateDef::new().on("TOGGLE_BOLD", "on")),
            )
            .state(
                "underline",
                StateDef::new()
                    .initial("off")
                    .state(
                        "on",
                        StateDef::new()
                            .exit(action("exit_underline_on"))
                            .on("RESET", "off"),
                    )
                    .state("off", StateDef::new().on("TOGGLE_UNDERLINE", "on")),
            )
            .build(MachineOptions::default())
            .expect("definition is valid");

        let state = machine.initial_state();
        let both_on = machine
            .transition(&state, "TOGGLE_BOLD")
            .and_then(|s| machine.transition(&s, "TOGGLE_UNDERLINE"))
            .expect("transitions");
        assert!(both_on.matches(StateValue::branch([
            ("bold", StateValue::leaf("on")),
            ("underline", StateValue::leaf("on")),
        ])));

        // RESET fires in both regions; exits run in declaration order.
        let reset = machine.transition(&both_on, "RESET").expect("transitions");
        assert_eq!(
            reset.action_names(),
            vec!["exit_bold_on", "exit_underline_on"],
        );
    }

    #[test]
    fn history_target_restores_the_recorded_child() {
        let machine = MachineDef::new("payment")
            .context(())
            .initial("method")
            .state(
                "method",
                StateDef::new()
                    .initial("cash")
                    .state("cash", StateDef::new().on("SWITCH_CHECK", "check"))
                    .state("check", StateDef::new().on("SWITCH_CASH", "cash"))
                    .state("hist", StateDef::history())
                    .on("NEXT", "review"),
            )
            .state("review", StateDef::new().on("PREVIOUS", "method.hist"))
            .build(MachineOptions::default())
            .expect("definition is valid");

        let state = machine.initial_state();
        let check = machine.transition(&state, "SWITCH_CHECK").expect("ok");
        let review = machine.transition(&check, "NEXT").expect("ok");
        assert!(review.matches("review"));
        let back = machine.transition(&review, "PREVIOUS").expect("ok");
        assert!(back.matches("method.check"));
    }

    #[test]
    fn history_without_a_record_falls_back_to_initial() {
        let machine = MachineDef::new("payment")
            .context(())
            .initial("review")
            .state(
                "method",
                StateDef::new()
                    .initial("cash")
                    .state("cash", StateDef::new())
                    .state("check", StateDef::new())
                    .state("hist", StateDef::history()),
            )
            .state("review", StateDef::new().on("PREVIOUS", "method.hist"))
            .build(MachineOptions::default())
            .expect("definition is valid");

        let state = machine.initial_state();
        let back = machine.transition(&state, "PREVIOUS").expect("ok");
        assert!(back.matches("method.cash"));
    }

    #[test]
    fn entering_a_final_child_raises_done_state() {
        let machine = MachineDef::new("wizard")
            .context(())
            .initial("steps")
            .state(
                "steps",
                StateDef::new()
                    .initial("fill")
                    .state("fill", StateDef::new().on("SUBMIT", "complete"))
                    .state("complete", StateDef::final_state())
                    .on("done.state.wizard.steps", "confirmed"),
            )
            .state("confirmed", StateDef::final_state())
            .build(MachineOptions::default())
            .expect("definition is valid");

        let state = machine.initial_state();
        let next = machine.transition(&state, "SUBMIT").expect("ok");
        let raised: Vec<&str> = next
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::Raise(event) => Some(event.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(raised, vec!["done.state.wizard.steps"]);
        assert!(!next.done);

        // Delivering the raised event reaches the top-level final state.
        let confirmed = machine
            .transition(&next, Event::done_state("wizard.steps"))
            .expect("ok");
        assert!(confirmed.matches("confirmed"));
        assert!(confirmed.done);
    }

    #[test]
    fn assigns_apply_in_order_and_are_not_surfaced() {
        #[derive(Clone, Debug, PartialEq)]
        struct Ctx {
            count: i64,
        }
        let machine = MachineDef::new("counter")
            .context(Ctx { count: 0 })
            .initial("idle")
            .state(
                "idle",
                StateDef::new().on(
                    "BUMP",
                    TransitionDef::targetless()
                        .action(assign(|ctx: &Ctx, _| Ctx {
                            count: ctx.count + 1,
                        }))
                        .action(assign(|ctx: &Ctx, _| Ctx {
                            count: ctx.count * 10,
                        })),
                ),
            )
            .build(MachineOptions::default())
            .expect("definition is valid");

        let state = machine.initial_state();
        let next = machine.transition(&state, "BUMP").expect("ok");
        assert_eq!(next.context, Ctx { count: 10 });
        assert!(next.actions.is_empty());
        assert!(next.changed);
        assert_eq!(next.value, state.value);
    }

    #[test]
    fn pure_actions_expand_against_the_working_context() {
        #[derive(Clone, Debug, PartialEq)]
        struct Ctx {
            count: i64,
        }
        let machine = MachineDef::new("m")
            .context(Ctx { count: 0 })
            .initial("a")
            .state(
                "a",
                StateDef::new().on(
                    "GO",
                    TransitionDef::targetless()
                        .action(assign(|ctx: &Ctx, _| Ctx {
                            count: ctx.count + 1,
                        }))
                        .action(pure(|ctx: &Ctx, _| {
                            if ctx.count > 0 {
                                vec![action("went_positive")]
                            } else {
                                Vec::new()
                            }
                        })),
                ),
            )
            .build(MachineOptions::default())
            .expect("definition is valid");

        let state = machine.initial_state();
        let next = machine.transition(&state, "GO").expect("ok");
        // The pure expansion sees the context after the preceding assign.
        assert_eq!(next.action_names(), vec!["went_positive"]);
        assert_eq!(next.context, Ctx { count: 1 });
    }

    #[test]
    fn guard_selects_the_first_passing_candidate() {
        #[derive(Clone)]
        struct Ctx {
            admin: bool,
        }
        let machine = MachineDef::new("door")
            .context(Ctx { admin: false })
            .initial("closed")
            .state(
                "closed",
                StateDef::new()
                    .on(
                        "OPEN",
                        TransitionDef::to("open").cond(|ctx: &Ctx, _| ctx.admin),
                    )
                    .on("OPEN", TransitionDef::to("locked")),
            )
            .state("open", StateDef::new())
            .state("locked", StateDef::new())
            .build(MachineOptions::default())
            .expect("definition is valid");

        let state = machine.initial_state();
        let next = machine.transition(&state, "OPEN").expect("ok");
        assert!(next.matches("locked"));
    }

    #[test]
    fn unresolved_guard_name_errors_at_evaluation() {
        let machine = MachineDef::new("m")
            .context(())
            .initial("a")
            .state(
                "a",
                StateDef::new().on("GO", TransitionDef::to("b").cond_named("missing")),
            )
            .state("b", StateDef::new())
            .build(MachineOptions::default())
            .expect("definition is valid");
        let state = machine.initial_state();
        let err = machine.transition(&state, "GO").unwrap_err();
        assert!(matches!(err, TransitionError::UnknownGuard(name) if name == "missing"));
    }

    #[test]
    fn unknown_action_name_is_surfaced_not_fatal() {
        let machine = MachineDef::new("m")
            .context(())
            .initial("a")
            .state(
                "a",
                StateDef::new().on("GO", TransitionDef::to("b").action(action("unmapped"))),
            )
            .state("b", StateDef::new())
            .build(MachineOptions::default())
            .expect("definition is valid");
        let state = machine.initial_state();
        let next = machine.transition(&state, "GO").expect("ok");
        assert_eq!(next.action_names(), vec!["unmapped"]);
    }

    #[test]
    fn named_action_resolves_through_the_options_map() {
        #[derive(Clone, Debug, PartialEq)]
        struct Ctx {
            count: i64,
        }
        let machine = MachineDef::new("m")
            .context(Ctx { count: 0 })
            .initial("a")
            .state(
                "a",
                StateDef::new().on("GO", TransitionDef::targetless().action(action("increment"))),
            )
            .build(
                MachineOptions::new().action(
                    "increment",
                    assign(|ctx: &Ctx, _| Ctx {
                        count: ctx.count + 1,
                    }),
                ),
            )
            .expect("definition is valid");
        let state = machine.initial_state();
        let next = machine.transition(&state, "GO").expect("ok");
        assert_eq!(next.context, Ctx { count: 1 });
    }

    #[test]
    fn wildcard_handles_unmatched_events() {
        let machine = MachineDef::new("m")
            .context(())
            .initial("a")
            .state(
                "a",
                StateDef::new()
                    .on("KNOWN", "b")
                    .on("*", "c"),
            )
            .state("b", StateDef::new())
            .state("c", StateDef::new())
            .build(MachineOptions::default())
            .expect("definition is valid");
        let state = machine.initial_state();
        assert!(machine.transition(&state, "KNOWN").expect("ok").matches("b"));
        assert!(machine.transition(&state, "OTHER").expect("ok").matches("c"));
    }

    #[test]
    fn raised_events_surface_as_raise_actions() {
        let machine = MachineDef::new("m")
            .context(())
            .initial("a")
            .state(
                "a",
                StateDef::new().on("GO", TransitionDef::to("b").action(raise("FOLLOW"))),
            )
            .state("b", StateDef::new().on("FOLLOW", "c"))
            .state("c", StateDef::new())
            .build(MachineOptions::default())
            .expect("definition is valid");
        let state = machine.initial_state();
        let next = machine.transition(&state, "GO").expect("ok");
        assert!(next
            .actions
            .iter()
            .any(|a| matches!(a, Action::Raise(e) if e.name == "FOLLOW")));
    }

    #[test]
    fn duplicate_ids_fail_at_construction() {
        let result = MachineDef::new("m")
            .context(())
            .initial("a")
            .state("a", StateDef::new().id("same"))
            .state("b", StateDef::new().id("same"))
            .build(MachineOptions::default());
        assert!(matches!(result, Err(DefinitionError::DuplicateId(id)) if id == "same"));
    }

    #[test]
    fn unknown_initial_fails_at_construction() {
        let result = MachineDef::new("m")
            .context(())
            .initial("nope")
            .state("a", StateDef::new())
            .build(MachineOptions::default());
        assert!(matches!(
            result,
            Err(DefinitionError::UnknownInitial { initial, .. }) if initial == "nope"
        ));
    }

    #[test]
    fn unknown_target_fails_at_construction() {
        let result = MachineDef::new("m")
            .context(())
            .initial("a")
            .state("a", StateDef::new().on("GO", "nowhere"))
            .build(MachineOptions::default());
        assert!(matches!(
            result,
            Err(DefinitionError::UnknownTarget { target, .. }) if target == "nowhere"
        ));
    }

    #[test]
    fn absolute_targets_resolve_against_the_id_index() {
        let machine = MachineDef::new("app")
            .context(())
            .initial("outer")
            .state(
                "outer",
                StateDef::new()
                    .initial("inner")
                    .state("inner", StateDef::new().on("JUMP", "#app.other.deep")),
            )
            .state(
                "other",
                StateDef::new()
                    .initial("deep")
                    .state("deep", StateDef::new()),
            )
            .build(MachineOptions::default())
            .expect("definition is valid");
        let state = machine.state_from("outer.inner").expect("valid");
        let next = machine.transition(&state, "JUMP").expect("ok");
        assert!(next.matches("other.deep"));
    }

    #[test]
    fn after_compiles_into_delayed_send_and_cancel() {
        let machine = MachineDef::new("light")
            .context(())
            .initial("red")
            .state("red", StateDef::new().after(10, "green"))
            .state("green", StateDef::new())
            .build(MachineOptions::default())
            .expect("definition is valid");

        let state = machine.initial_state();
        let sends: Vec<&SendSpec<()>> = state
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(spec) => Some(spec),
                _ => None,
            })
            .collect();
        assert_eq!(sends.len(), 1);
        assert!(matches!(sends[0].delay, Some(DelayExpr::Fixed(10))));

        // The timer event moves the machine when delivered.
        let timer = after_event_name("10", "light.red");
        let next = machine.transition(&state, timer.as_str()).expect("ok");
        assert!(next.matches("green"));
        // Leaving the state cancels the pending timer.
        assert!(next
            .actions
            .iter()
            .any(|a| matches!(a, Action::Cancel(id) if id == &timer)));
    }
}
