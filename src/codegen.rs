// Copyright 2025 Cornell University
// released under MIT License

//! Walks a parsed program once, enter and exit phase per node, and writes
//! the XState configuration through a [`JsBuilder`]. Each node is destroyed
//! as soon as its exit phase has run.

use std::mem;

use crate::ast::*;
use crate::diagnostic::{DiagnosticHandler, Level};
use crate::js_builder::JsBuilder;
use crate::parser::Program;
use crate::refs::{Reference, ReferenceCollector};
use crate::CompileOptions;

/// value written for `assign(key)` when no source reference is given
const EVENT_DATA: &str = "(context, event) => event.data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Enter,
    Exit,
}

/// The wrapping container a run of sibling transitions shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Batch {
    On,
    Always,
    Delay,
}

impl Batch {
    fn of(trigger: &Trigger) -> Self {
        match trigger {
            Trigger::Event(_) => Batch::On,
            Trigger::Immediate => Batch::Always,
            Trigger::Delay(_) => Batch::Delay,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Batch::On => "on",
            Batch::Always => "always",
            Batch::Delay => "delay",
        }
    }
}

/// Containers currently open inside one machine, and the ones the current
/// state has already written.
#[derive(Debug, Clone, Copy, Default)]
struct MachineScope {
    on_open: bool,
    always_open: bool,
    delay_open: bool,
    /// indexed by `Batch as usize`, cleared on entering a state
    emitted: [bool; 3],
}

/// A guard or action reference, ready to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fragment<'a> {
    /// quoted, refers to a name in the machine options
    Str(&'a str),
    Raw(&'a str),
    Assign { key: &'a str, value: Option<&'a str> },
}

/// Compiles `program` into JavaScript source.
pub fn generate(
    program: Program,
    options: &CompileOptions,
    handler: &mut DiagnosticHandler,
) -> String {
    let Program {
        mut ast,
        uses_assign,
    } = program;
    let mut jsb = JsBuilder::new();
    if ast.body().is_some() {
        jsb.add_raw("import { Machine");
        if uses_assign {
            jsb.add_raw(", assign");
        }
        jsb.add_raw(" } from ");
        jsb.add_string(options.runtime.specifier());
        jsb.add_raw(";\n");
    }

    let mut generator = Generator::new(jsb, handler);
    generator.run(&mut ast);
    generator.finish()
}

struct Generator<'a> {
    jsb: JsBuilder,
    refs: ReferenceCollector,
    scope: MachineScope,
    /// scopes of the enclosing machines
    saved: Vec<MachineScope>,
    handler: &'a mut DiagnosticHandler,
}

impl<'a> Generator<'a> {
    fn new(jsb: JsBuilder, handler: &'a mut DiagnosticHandler) -> Self {
        Self {
            jsb,
            refs: ReferenceCollector::new(),
            scope: MachineScope::default(),
            saved: Vec::new(),
            handler,
        }
    }

    /// Visits every node of `ast` and tears the tree down behind the cursor.
    fn run(&mut self, ast: &mut Ast) {
        let mut cursor = ast.body();
        let mut phase = Phase::Enter;

        while let Some(id) = cursor {
            match phase {
                Phase::Enter => {
                    self.enter(ast, id);
                    match ast.first_child(id) {
                        Some(child) => cursor = Some(child),
                        None => phase = Phase::Exit,
                    }
                }
                Phase::Exit => {
                    self.exit(ast, id);
                    let links = ast.links(id);
                    ast.destroy(id);
                    match links.next {
                        Some(next) => {
                            cursor = Some(next);
                            phase = Phase::Enter;
                        }
                        None => cursor = links.parent,
                    }
                }
            }
        }

        if !self.refs.is_empty() {
            let pending = self.refs.drain_and_clear();
            let names: Vec<&str> = pending
                .guards
                .iter()
                .chain(pending.actions.iter())
                .map(|r| r.name.as_str())
                .collect();
            let msg = format!(
                "bindings declared outside of any machine are ignored: {}",
                names.join(", ")
            );
            log::debug!("{msg}");
            self.handler.emit_general_message(&msg, Level::Warning);
        }
    }

    fn finish(self) -> String {
        if self.jsb.open_frames() != 0 {
            log::warn!("{} containers left open", self.jsb.open_frames());
        }
        self.jsb.dump()
    }

    fn warn(&mut self, ast: &Ast, id: NodeId, msg: &str) {
        log::debug!("{msg}");
        self.handler.emit_diagnostic_node(ast, id, msg, Level::Warning);
    }

    fn enter(&mut self, ast: &mut Ast, id: NodeId) {
        log::debug!("enter {id}");
        match ast.kind(id) {
            NodeKind::Import => self.enter_import(ast, id),
            NodeKind::Machine => self.enter_machine(ast, id),
            NodeKind::State => self.enter_state(ast, id),
            NodeKind::Transition => self.enter_transition(ast, id),
            NodeKind::Invoke => self.enter_invoke(ast, id),
            NodeKind::Assignment => self.enter_assignment(ast, id),
            NodeKind::ImportSpecifier => {}
        }
    }

    fn exit(&mut self, ast: &mut Ast, id: NodeId) {
        log::debug!("exit {id}");
        match ast.kind(id) {
            NodeKind::Machine => self.exit_machine(ast, id),
            NodeKind::State => self.exit_state(ast, id),
            NodeKind::Transition => self.exit_transition(ast, id),
            NodeKind::Invoke => self.jsb.end_object(),
            NodeKind::Import | NodeKind::ImportSpecifier | NodeKind::Assignment => {}
        }
    }

    fn enter_import(&mut self, ast: &Ast, id: NodeId) {
        let Node::Import(import) = &ast[id] else {
            return;
        };
        let specifiers: Vec<&str> = ast
            .children(id)
            .filter_map(|child| match ast.get(child) {
                Some(Node::ImportSpecifier(spec)) => Some(spec.imported.as_str()),
                _ => None,
            })
            .collect();
        if specifiers.is_empty() {
            self.warn(ast, id, "imports without specifiers are not supported");
            return;
        }
        self.jsb.add_raw("import { ");
        self.jsb.add_raw(&specifiers.join(", "));
        self.jsb.add_raw(" } from ");
        self.jsb.add_string(&import.from);
        self.jsb.add_raw(";\n");
    }

    fn enter_machine(&mut self, ast: &Ast, id: NodeId) {
        let nested = ast.is_nested_machine(id);
        let Node::Machine(machine) = &ast[id] else {
            return;
        };

        if nested {
            // the state's own transitions end where its child states begin
            self.close_batch(Batch::On);
            self.close_batch(Batch::Always);
            self.close_batch(Batch::Delay);
        } else {
            match &machine.name {
                Some(name) => {
                    self.jsb.add_raw("\nexport const ");
                    self.jsb.add_raw(name);
                    self.jsb.add_raw(" = ");
                }
                None => self.jsb.add_raw("\nexport default "),
            }
            self.jsb.start_call("Machine");
            self.jsb.start_object();
        }

        if let Some(initial) = &machine.initial {
            self.jsb.start_prop("initial");
            self.jsb.add_string(initial);
        }
        self.saved.push(mem::take(&mut self.scope));
    }

    fn exit_machine(&mut self, ast: &Ast, id: NodeId) {
        self.scope = self.saved.pop().unwrap_or_default();
        if ast.is_nested_machine(id) {
            return;
        }

        // configuration object
        self.jsb.end_object();

        let refs = self.refs.drain_and_clear();
        if !refs.is_empty() {
            self.jsb.add_raw(", ");
            self.jsb.start_object();
            if !refs.guards.is_empty() {
                self.jsb.start_prop("guards");
                self.jsb.start_object();
                for guard in &refs.guards {
                    self.hoist_guard(ast, guard);
                }
                self.jsb.end_object();
            }
            if !refs.actions.is_empty() {
                self.jsb.start_prop("actions");
                self.jsb.start_object();
                for action in &refs.actions {
                    self.hoist_action(ast, action);
                }
                self.jsb.end_object();
            }
            self.jsb.end_object();
        }

        self.jsb.end_call();
        self.jsb.add_raw(";");

        if let Node::Machine(machine) = &ast[id] {
            log::info!(
                "emitted machine `{}`",
                machine.name.as_deref().unwrap_or("default")
            );
        }
    }

    fn hoist_guard(&mut self, ast: &Ast, guard: &Reference) {
        match &guard.value {
            Expr::Identifier(ident) => {
                self.jsb.start_prop(&guard.name);
                self.jsb.add_raw(ident);
            }
            _ => self.warn(
                ast,
                guard.origin,
                &format!("guard `{}` must be bound to an identifier", guard.name),
            ),
        }
    }

    fn hoist_action(&mut self, ast: &Ast, action: &Reference) {
        match &action.value {
            Expr::Identifier(ident) => {
                self.jsb.start_prop(&action.name);
                self.jsb.add_raw(ident);
            }
            Expr::Assign(assign) => {
                self.jsb.start_prop(&action.name);
                self.emit_assign(&assign.key, assign.value.as_deref());
            }
            _ => self.warn(
                ast,
                action.origin,
                &format!(
                    "action `{}` must be bound to an identifier or assign(...)",
                    action.name
                ),
            ),
        }
    }

    fn enter_state(&mut self, ast: &mut Ast, id: NodeId) {
        let in_machine = ast
            .parent(id)
            .is_some_and(|parent| matches!(ast.get(parent), Some(Node::Machine(_))));
        if !in_machine {
            self.warn(ast, id, "states must be declared inside a machine");
        }
        let opens_states = match ast.parent(id).and_then(|parent| ast.machine_mut(parent)) {
            Some(machine) if !machine.flags.contains(MachineFlags::HAS_STATES) => {
                machine.flags.insert(MachineFlags::HAS_STATES);
                true
            }
            _ => false,
        };
        if opens_states {
            self.jsb.start_prop("states");
            self.jsb.start_object();
        }

        self.scope.emitted = [false; 3];
        let Node::State(state) = &ast[id] else {
            return;
        };
        self.jsb.start_prop(&state.name);
        self.jsb.start_object();
        if state.is_final {
            self.jsb.start_prop("type");
            self.jsb.add_string("final");
        }
    }

    fn exit_state(&mut self, ast: &Ast, id: NodeId) {
        self.jsb.end_object();

        let in_states = ast.parent(id).is_some_and(|parent| {
            matches!(ast.get(parent), Some(Node::Machine(machine))
                if machine.flags.contains(MachineFlags::HAS_STATES))
        });
        let last_state = !ast
            .following(id)
            .any(|sibling| ast.kind(sibling) == NodeKind::State);
        if in_states && last_state {
            self.jsb.end_object();
        }
    }

    fn enter_invoke(&mut self, ast: &Ast, id: NodeId) {
        let Node::Invoke(invoke) = &ast[id] else {
            return;
        };
        self.jsb.start_prop("invoke");
        self.jsb.start_object();
        self.jsb.start_prop("src");
        self.jsb.add_raw(&invoke.call);
    }

    fn enter_assignment(&mut self, ast: &Ast, id: NodeId) {
        let Node::Assignment(binding) = &ast[id] else {
            return;
        };
        match binding.kind {
            BindingKind::Guard => self.refs.register_guard(&binding.name, &binding.value, id),
            BindingKind::Action => self.refs.register_action(&binding.name, &binding.value, id),
        }
    }

    fn enter_transition(&mut self, ast: &Ast, id: NodeId) {
        let in_invoke = in_invoke(ast, id);
        let Node::Transition(transition) = &ast[id] else {
            return;
        };

        if in_invoke {
            let key = match &transition.trigger {
                Trigger::Event(event) if event == "done" => "onDone",
                Trigger::Event(event) if event == "error" => "onError",
                Trigger::Event(event) => {
                    self.warn(
                        ast,
                        id,
                        &format!("`{event}` is not supported inside invoke, expected `done` or `error`"),
                    );
                    return;
                }
                Trigger::Immediate | Trigger::Delay(_) => {
                    self.warn(
                        ast,
                        id,
                        "only `done` and `error` transitions are supported inside invoke",
                    );
                    return;
                }
            };
            self.jsb.start_prop(key);
        } else {
            match &transition.trigger {
                Trigger::Event(event) => {
                    self.open_batch(ast, id, Batch::On);
                    self.jsb.start_prop(event);
                }
                Trigger::Immediate => {
                    self.open_batch(ast, id, Batch::Always);
                    self.jsb.start_element();
                }
                Trigger::Delay(delay) => {
                    self.open_batch(ast, id, Batch::Delay);
                    self.jsb.start_prop(&delay.ms.to_string());
                }
            }
        }

        self.emit_transition(ast, id, transition);
    }

    fn exit_transition(&mut self, ast: &Ast, id: NodeId) {
        if in_invoke(ast, id) {
            return;
        }
        let Node::Transition(transition) = &ast[id] else {
            return;
        };
        let batch = Batch::of(&transition.trigger);
        if !continues_batch(ast, id, batch) {
            self.close_batch(batch);
        }
    }

    /// Opens the container for `batch` unless it is already open. Reopening a
    /// container the state has written before repeats its key, and the
    /// later key shadows the earlier one in the object literal.
    fn open_batch(&mut self, ast: &Ast, id: NodeId, batch: Batch) {
        let open = match batch {
            Batch::On => self.scope.on_open,
            Batch::Always => self.scope.always_open,
            Batch::Delay => self.scope.delay_open,
        };
        if !open && mem::replace(&mut self.scope.emitted[batch as usize], true) {
            let key = batch.key();
            self.warn(
                ast,
                id,
                &format!(
                    "`{key}` is written twice for this state, the earlier `{key}` transitions are shadowed"
                ),
            );
        }
        match batch {
            Batch::On if !self.scope.on_open => {
                self.scope.on_open = true;
                self.jsb.start_prop(batch.key());
                self.jsb.start_object();
            }
            Batch::Always if !self.scope.always_open => {
                self.scope.always_open = true;
                self.jsb.start_prop(batch.key());
                self.jsb.start_array(true);
            }
            Batch::Delay if !self.scope.delay_open => {
                self.scope.delay_open = true;
                self.jsb.start_prop(batch.key());
                self.jsb.start_object();
            }
            _ => {}
        }
    }

    fn close_batch(&mut self, batch: Batch) {
        match batch {
            Batch::On if self.scope.on_open => {
                self.scope.on_open = false;
                self.jsb.end_object();
            }
            Batch::Always if self.scope.always_open => {
                self.scope.always_open = false;
                self.jsb.end_array();
            }
            Batch::Delay if self.scope.delay_open => {
                self.scope.delay_open = false;
                self.jsb.end_object();
            }
            _ => {}
        }
    }

    /// Writes the value of a transition: the bare target, or the object form
    /// when there are guards or actions to carry.
    fn emit_transition(&mut self, ast: &Ast, id: NodeId, transition: &TransitionNode) {
        let mut guards = Vec::with_capacity(transition.guards.len());
        for guard in &transition.guards {
            match guard {
                TransitionGuard::Named(name) => guards.push(Fragment::Str(name)),
                TransitionGuard::Expr(Expr::Guard(raw) | Expr::Identifier(raw)) => {
                    guards.push(Fragment::Raw(raw))
                }
                TransitionGuard::Expr(other) => self.warn(
                    ast,
                    id,
                    &format!("unsupported guard expression `{other}`"),
                ),
            }
        }

        let mut actions = Vec::with_capacity(transition.actions.len());
        for action in &transition.actions {
            match action {
                TransitionAction::Named(name) => actions.push(Fragment::Str(name)),
                TransitionAction::Expr(Expr::Action(raw) | Expr::Identifier(raw)) => {
                    actions.push(Fragment::Raw(raw))
                }
                TransitionAction::Expr(Expr::Assign(assign)) => actions.push(Fragment::Assign {
                    key: &assign.key,
                    value: assign.value.as_deref(),
                }),
                TransitionAction::Expr(other) => self.warn(
                    ast,
                    id,
                    &format!("unsupported action expression `{other}`"),
                ),
            }
        }

        if guards.is_empty() && actions.is_empty() && !transition.is_immediate() {
            self.jsb.add_string(&transition.target);
            return;
        }

        self.jsb.start_object();
        self.jsb.start_prop("target");
        self.jsb.add_string(&transition.target);

        if let [guard] = guards.as_slice() {
            self.jsb.start_prop("cond");
            self.emit_fragment(*guard);
        } else if !guards.is_empty() {
            self.jsb.start_prop("cond");
            self.jsb.start_array(false);
            for guard in guards {
                self.jsb.start_element();
                self.emit_fragment(guard);
            }
            self.jsb.end_array();
        }

        if !actions.is_empty() {
            let multiline = actions
                .iter()
                .any(|action| matches!(action, Fragment::Assign { .. }));
            self.jsb.start_prop("actions");
            self.jsb.start_array(multiline);
            for action in actions {
                self.jsb.start_element();
                self.emit_fragment(action);
            }
            self.jsb.end_array();
        }

        self.jsb.end_object();
    }

    fn emit_fragment(&mut self, fragment: Fragment<'_>) {
        match fragment {
            Fragment::Str(name) => self.jsb.add_string(name),
            Fragment::Raw(raw) => self.jsb.add_raw(raw),
            Fragment::Assign { key, value } => self.emit_assign(key, value),
        }
    }

    fn emit_assign(&mut self, key: &str, value: Option<&str>) {
        self.jsb.start_call("assign");
        self.jsb.start_object();
        self.jsb.start_prop(key);
        self.jsb.add_raw(value.unwrap_or(EVENT_DATA));
        self.jsb.end_object();
        self.jsb.end_call();
    }
}

fn in_invoke(ast: &Ast, id: NodeId) -> bool {
    ast.parent(id)
        .is_some_and(|parent| matches!(ast.get(parent), Some(Node::Invoke(_))))
}

/// Whether the next sibling that produces output is a transition sharing
/// `batch`. Bindings produce no output and are looked past.
fn continues_batch(ast: &Ast, id: NodeId, batch: Batch) -> bool {
    ast.following(id)
        .find(|&sibling| ast.kind(sibling) != NodeKind::Assignment)
        .is_some_and(|sibling| {
            matches!(ast.get(sibling), Some(Node::Transition(next))
                if Batch::of(&next.trigger) == batch)
        })
}
