// Copyright 2025 Cornell University
// released under MIT License

use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};
use std::ops::Index;

/// Start offset, end offset and file id of the source text a node came from.
pub type SourceLoc = (usize, usize, usize);

#[derive(Clone, Copy, Hash, PartialEq, Eq, Default)]
pub struct NodeId(u32);
entity_impl!(NodeId, "node");

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum NodeKind {
    Machine,
    State,
    Transition,
    Invoke,
    Import,
    ImportSpecifier,
    Assignment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Machine(MachineNode),
    State(StateNode),
    Transition(TransitionNode),
    Invoke(InvokeNode),
    Import(ImportNode),
    ImportSpecifier(ImportSpecifier),
    Assignment(Assignment),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Machine(_) => NodeKind::Machine,
            Node::State(_) => NodeKind::State,
            Node::Transition(_) => NodeKind::Transition,
            Node::Invoke(_) => NodeKind::Invoke,
            Node::Import(_) => NodeKind::Import,
            Node::ImportSpecifier(_) => NodeKind::ImportSpecifier,
            Node::Assignment(_) => NodeKind::Assignment,
        }
    }
}

/// Parts of a machine's configuration that have already been emitted.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Default)]
pub struct MachineFlags(u8);

impl MachineFlags {
    /// the `states` container is open
    pub const HAS_STATES: MachineFlags = MachineFlags(1 << 0);

    pub fn contains(self, other: MachineFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: MachineFlags) {
        self.0 |= other.0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MachineNode {
    /// `None` marks the module's default export
    pub name: Option<String>,
    pub initial: Option<String>,
    pub flags: MachineFlags,
}

impl MachineNode {
    pub fn new(name: Option<String>) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateNode {
    pub name: String,
    pub is_final: bool,
}

impl StateNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_final: false,
        }
    }

    pub fn new_final(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_final: true,
        }
    }
}

/// What causes a transition to fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Event(String),
    Immediate,
    Delay(DelayExpr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionGuard {
    /// refers to a guard registered in the machine options
    Named(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionAction {
    /// refers to an action registered in the machine options
    Named(String),
    Expr(Expr),
}

impl TransitionAction {
    pub fn is_assign(&self) -> bool {
        matches!(self, TransitionAction::Expr(Expr::Assign(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionNode {
    pub trigger: Trigger,
    pub target: String,
    /// alternatives, any of which allows the transition
    pub guards: Vec<TransitionGuard>,
    /// executed in order
    pub actions: Vec<TransitionAction>,
}

impl TransitionNode {
    pub fn new(trigger: Trigger, target: impl Into<String>) -> Self {
        Self {
            trigger,
            target: target.into(),
            guards: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn event(event: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(Trigger::Event(event.into()), target)
    }

    pub fn immediate(target: impl Into<String>) -> Self {
        Self::new(Trigger::Immediate, target)
    }

    pub fn delayed(ms: u64, target: impl Into<String>) -> Self {
        Self::new(Trigger::Delay(DelayExpr { ms }), target)
    }

    pub fn add_guard(&mut self, guard: TransitionGuard) {
        self.guards.push(guard);
    }

    pub fn add_action(&mut self, action: TransitionAction) {
        self.actions.push(action);
    }

    pub fn with_guard(mut self, guard: TransitionGuard) -> Self {
        self.add_guard(guard);
        self
    }

    pub fn with_action(mut self, action: TransitionAction) -> Self {
        self.add_action(action);
        self
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self.trigger, Trigger::Immediate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeNode {
    /// service reference, emitted verbatim
    pub call: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportNode {
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpecifier {
    pub imported: String,
    // TODO: emit `imported as local` once the grammar accepts aliases
    pub local: Option<String>,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum BindingKind {
    Guard,
    Action,
}

/// `guard name = ...` or `action name = ...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub kind: BindingKind,
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Identifier(String),
    Assign(AssignExpr),
    Guard(String),
    Action(String),
    Delay(DelayExpr),
}

/// Updates `key` in the machine context. Without a `value` the key is set
/// from the event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignExpr {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct DelayExpr {
    pub ms: u64,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Default)]
pub struct Links {
    pub parent: Option<NodeId>,
    pub child: Option<NodeId>,
    pub next: Option<NodeId>,
}

/// The syntax tree of one compilation unit.
///
/// Nodes live in an arena and are linked parent -> first child -> next
/// sibling. Links survive [`Ast::destroy`], node payloads do not, so a
/// traversal can tear the tree down as it leaves each node.
#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: PrimaryMap<NodeId, Option<Node>>,
    links: SecondaryMap<NodeId, Links>,
    locs: SecondaryMap<NodeId, Option<SourceLoc>>,
    body: Option<NodeId>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    /// add a node that is not yet linked into the tree
    pub fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(Some(node))
    }

    /// Attaches `child` as the last child of `parent`. Does nothing without a parent.
    pub fn append(&mut self, parent: Option<NodeId>, child: NodeId) {
        let Some(parent) = parent else {
            return;
        };
        self.links[child].parent = Some(parent);
        match self.links[parent].child {
            None => self.links[parent].child = Some(child),
            Some(first) => self.after(first, child),
        }
    }

    /// Attaches `node` after the last sibling in the chain starting at `sibling`.
    pub fn after(&mut self, sibling: NodeId, node: NodeId) {
        let mut last = sibling;
        while let Some(next) = self.links[last].next {
            last = next;
        }
        self.links[last].next = Some(node);
        self.links[node].parent = self.links[sibling].parent;
    }

    /// appends a top-level node
    pub fn push_root(&mut self, node: NodeId) {
        match self.body {
            None => self.body = Some(node),
            Some(first) => self.after(first, node),
        }
    }

    /// first top-level node
    pub fn body(&self) -> Option<NodeId> {
        self.body
    }

    pub fn links(&self, id: NodeId) -> Links {
        self.links[id]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.links[id].parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.links[id].child
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.links[id].next
    }

    pub fn children(&self, id: NodeId) -> Siblings<'_> {
        Siblings {
            ast: self,
            cursor: self.first_child(id),
        }
    }

    /// the top-level nodes in declaration order
    pub fn roots(&self) -> Siblings<'_> {
        Siblings {
            ast: self,
            cursor: self.body,
        }
    }

    /// siblings following `id`, in order
    pub fn following(&self, id: NodeId) -> Siblings<'_> {
        Siblings {
            ast: self,
            cursor: self.next_sibling(id),
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id).and_then(Option::as_mut)
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self[id].kind()
    }

    pub fn machine_mut(&mut self, id: NodeId) -> Option<&mut MachineNode> {
        match self.get_mut(id) {
            Some(Node::Machine(machine)) => Some(machine),
            _ => None,
        }
    }

    /// A machine nested in a state describes that state's children.
    pub fn is_nested_machine(&self, id: NodeId) -> bool {
        matches!(self.get(id), Some(Node::Machine(_)))
            && self
                .parent(id)
                .is_some_and(|parent| matches!(self.get(parent), Some(Node::State(_))))
    }

    /// Drops the payload of `id`. Links and source locations are kept.
    pub fn destroy(&mut self, id: NodeId) {
        let node = self.nodes[id].take();
        debug_assert!(node.is_some(), "{id} destroyed twice");
    }

    /// number of nodes that have not been destroyed yet
    pub fn live_nodes(&self) -> usize {
        self.nodes.values().filter(|node| node.is_some()).count()
    }

    pub fn add_node_loc(&mut self, id: NodeId, start: usize, end: usize, fileid: usize) {
        self.locs[id] = Some((start, end, fileid));
    }

    pub fn get_node_loc(&self, id: NodeId) -> Option<SourceLoc> {
        self.locs.get(id).copied().flatten()
    }
}

impl Index<NodeId> for Ast {
    type Output = Node;

    fn index(&self, index: NodeId) -> &Self::Output {
        match &self.nodes[index] {
            Some(node) => node,
            None => panic!("{index} was already destroyed"),
        }
    }
}

impl Index<&NodeId> for Ast {
    type Output = Node;

    fn index(&self, index: &NodeId) -> &Self::Output {
        &self[*index]
    }
}

/// Iterator over a chain of siblings.
pub struct Siblings<'a> {
    ast: &'a Ast,
    cursor: Option<NodeId>,
}

impl Iterator for Siblings<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        self.cursor = self.ast.next_sibling(current);
        Some(current)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// `machine Toggle` flipping between `inactive` and `active` on `TOGGLE`.
    pub fn build_toggle_machine() -> Ast {
        let mut ast = Ast::new();
        let machine = ast.add(Node::Machine(MachineNode {
            name: Some("Toggle".to_string()),
            initial: Some("inactive".to_string()),
            ..Default::default()
        }));
        ast.push_root(machine);

        for (state, target) in [("inactive", "active"), ("active", "inactive")] {
            let state_id = ast.add(Node::State(StateNode::new(state)));
            ast.append(Some(machine), state_id);
            let transition = ast.add(Node::Transition(TransitionNode::event("TOGGLE", target)));
            ast.append(Some(state_id), transition);
        }
        ast
    }

    /// A machine with one state holding `transitions`.
    pub fn build_single_state(transitions: Vec<TransitionNode>) -> Ast {
        let mut ast = Ast::new();
        let machine = ast.add(Node::Machine(MachineNode::new(Some("m".to_string()))));
        ast.push_root(machine);
        let state = ast.add(Node::State(StateNode::new("idle")));
        ast.append(Some(machine), state);
        for transition in transitions {
            let id = ast.add(Node::Transition(transition));
            ast.append(Some(state), id);
        }
        ast
    }

    #[test]
    fn append_links_children_in_order() {
        let mut ast = Ast::new();
        let machine = ast.add(Node::Machine(MachineNode::default()));
        let a = ast.add(Node::State(StateNode::new("a")));
        let b = ast.add(Node::State(StateNode::new("b")));
        let c = ast.add(Node::State(StateNode::new("c")));
        ast.append(Some(machine), a);
        ast.append(Some(machine), b);
        ast.append(Some(machine), c);

        assert_eq!(ast.children(machine).collect::<Vec<_>>(), vec![a, b, c]);
        assert_eq!(ast.parent(c), Some(machine));
        assert_eq!(ast.first_child(machine), Some(a));
        assert_eq!(ast.following(a).collect::<Vec<_>>(), vec![b, c]);
    }

    #[test]
    fn append_without_parent_is_a_no_op() {
        let mut ast = Ast::new();
        let state = ast.add(Node::State(StateNode::new("lonely")));
        ast.append(None, state);
        assert_eq!(ast.links(state), Links::default());
    }

    #[test]
    fn after_extends_the_sibling_chain() {
        let mut ast = Ast::new();
        let first = ast.add(Node::Import(ImportNode {
            from: "./a.js".to_string(),
        }));
        let second = ast.add(Node::Machine(MachineNode::default()));
        let third = ast.add(Node::Machine(MachineNode::default()));
        ast.push_root(first);
        ast.push_root(second);
        ast.after(first, third);

        assert_eq!(ast.roots().collect::<Vec<_>>(), vec![first, second, third]);
        assert_eq!(ast.parent(third), None);
    }

    #[test]
    fn machine_under_state_is_nested() {
        let mut ast = build_toggle_machine();
        let root = ast.body().unwrap();
        let state = ast.first_child(root).unwrap();
        let nested = ast.add(Node::Machine(MachineNode::default()));
        ast.append(Some(state), nested);

        assert!(!ast.is_nested_machine(root));
        assert!(ast.is_nested_machine(nested));
        assert!(!ast.is_nested_machine(state));
    }

    #[test]
    fn destroy_keeps_links_and_locations() {
        let mut ast = build_toggle_machine();
        let root = ast.body().unwrap();
        let state = ast.first_child(root).unwrap();
        ast.add_node_loc(state, 4, 10, 0);
        let before = ast.links(state);

        ast.destroy(state);
        assert!(ast.get(state).is_none());
        assert_eq!(ast.links(state), before);
        assert_eq!(ast.get_node_loc(state), Some((4, 10, 0)));
        assert_eq!(ast.live_nodes(), 4);
    }

    #[test]
    #[should_panic(expected = "already destroyed")]
    fn indexing_a_destroyed_node_panics() {
        let mut ast = build_toggle_machine();
        let root = ast.body().unwrap();
        ast.destroy(root);
        let _ = &ast[root];
    }

    #[test]
    fn cloned_expressions_outlive_their_node() {
        let mut ast = Ast::new();
        let id = ast.add(Node::Assignment(Assignment {
            kind: BindingKind::Action,
            name: "setUser".to_string(),
            value: Expr::Assign(AssignExpr {
                key: "user".to_string(),
                value: None,
            }),
        }));
        let copy = match &ast[id] {
            Node::Assignment(assignment) => assignment.value.clone(),
            other => panic!("unexpected node {other:?}"),
        };
        ast.destroy(id);
        assert_eq!(
            copy,
            Expr::Assign(AssignExpr {
                key: "user".to_string(),
                value: None
            })
        );
    }

    #[test]
    fn machine_flags() {
        let mut flags = MachineFlags::default();
        assert!(!flags.contains(MachineFlags::HAS_STATES));
        flags.insert(MachineFlags::HAS_STATES);
        assert!(flags.contains(MachineFlags::HAS_STATES));
    }
}
