// Copyright 2025 Cornell University
// released under MIT License

use std::path::Path;

use pest::error::InputLocation;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use rustc_hash::FxHashSet;

use crate::ast::*;
use crate::diagnostic::*;
use crate::errors::CompileError;

#[derive(Parser)]
#[grammar = "lucy.pest"]
struct LucyParser;

/// A successfully parsed source file.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub ast: Ast,
    /// some transition or binding calls `assign(...)`
    pub uses_assign: bool,
}

pub struct ParserContext<'a> {
    pub ast: &'a mut Ast,
    pub fileid: usize,
    pub handler: &'a mut DiagnosticHandler,
    pub uses_assign: bool,
    guards_seen: FxHashSet<String>,
    actions_seen: FxHashSet<String>,
}

impl<'a> ParserContext<'a> {
    pub fn new(ast: &'a mut Ast, fileid: usize, handler: &'a mut DiagnosticHandler) -> Self {
        Self {
            ast,
            fileid,
            handler,
            uses_assign: false,
            guards_seen: FxHashSet::default(),
            actions_seen: FxHashSet::default(),
        }
    }

    // Helper method for expected rule errors
    fn expect_rule<T>(
        &mut self,
        option: Option<T>,
        context_pair: &Pair<Rule>,
        message: &str,
    ) -> Result<T, String> {
        option.ok_or_else(|| {
            let msg = message.to_string();
            self.handler
                .emit_diagnostic_parsing(&msg, self.fileid, context_pair, Level::Error);
            msg
        })
    }

    fn error(&mut self, pair: &Pair<Rule>, msg: String) -> String {
        self.handler
            .emit_diagnostic_parsing(&msg, self.fileid, pair, Level::Error);
        msg
    }

    fn add(&mut self, node: Node, pair: &Pair<Rule>) -> NodeId {
        let id = self.ast.add(node);
        let span = pair.as_span();
        self.ast.add_node_loc(id, span.start(), span.end(), self.fileid);
        id
    }

    /// Parses one top-level item and links it in after the previous ones.
    pub fn parse_item(&mut self, pair: Pair<Rule>) -> Result<(), String> {
        let id = match pair.as_rule() {
            Rule::import_decl => self.parse_import(pair)?,
            Rule::binding => self.parse_binding(pair, None)?,
            Rule::machine => self.parse_machine(pair)?,
            Rule::EOI => return Ok(()),
            rule => {
                let msg = format!("Unexpected rule at the top level: {:?}", rule);
                return Err(self.error(&pair, msg));
            }
        };
        self.ast.push_root(id);
        Ok(())
    }

    fn parse_import(&mut self, pair: Pair<Rule>) -> Result<NodeId, String> {
        let mut inner_rules = pair.clone().into_inner();
        let string = self.expect_rule(inner_rules.next(), &pair, "Expected import path")?;
        let from = string
            .into_inner()
            .next()
            .map(|inner| inner.as_str().to_string())
            .unwrap_or_default();

        let import = self.add(Node::Import(ImportNode { from }), &pair);
        if let Some(specifiers) = inner_rules.next() {
            for spec in specifiers.into_inner() {
                let id = self.add(
                    Node::ImportSpecifier(ImportSpecifier {
                        imported: spec.as_str().to_string(),
                        local: None,
                    }),
                    &spec,
                );
                self.ast.append(Some(import), id);
            }
        }
        Ok(import)
    }

    /// `guard name = ...` or `action name = ...`, attached to `parent` if there is one.
    fn parse_binding(
        &mut self,
        pair: Pair<Rule>,
        parent: Option<NodeId>,
    ) -> Result<NodeId, String> {
        let mut inner_rules = pair.clone().into_inner();
        let head = self.expect_rule(inner_rules.next(), &pair, "Expected binding")?;
        let mut head_rules = head.clone().into_inner();
        let kind_rule = self.expect_rule(head_rules.next(), &head, "Expected guard or action")?;
        let kind = match kind_rule.as_str() {
            "guard" => BindingKind::Guard,
            _ => BindingKind::Action,
        };
        let name = self
            .expect_rule(head_rules.next(), &head, "Expected binding name")?
            .as_str()
            .to_string();

        let value_rule = self.expect_rule(inner_rules.next(), &pair, "Expected binding value")?;
        let value = match value_rule.as_rule() {
            Rule::assign_expr => Expr::Assign(self.parse_assign(value_rule)?),
            Rule::symbol | Rule::ident => Expr::Identifier(reference_name(&value_rule)),
            rule => {
                let msg = format!("Unexpected binding value: {:?}", rule);
                return Err(self.error(&value_rule, msg));
            }
        };

        let seen = match kind {
            BindingKind::Guard => &mut self.guards_seen,
            BindingKind::Action => &mut self.actions_seen,
        };
        if !seen.insert(name.clone()) {
            let msg = format!("`{name}` is declared more than once, the last declaration wins");
            log::debug!("{msg}");
            self.handler
                .emit_diagnostic_parsing(&msg, self.fileid, &head, Level::Warning);
        }

        let id = self.add(Node::Assignment(Assignment { kind, name, value }), &pair);
        self.ast.append(parent, id);
        Ok(id)
    }

    fn parse_machine(&mut self, pair: Pair<Rule>) -> Result<NodeId, String> {
        let mut inner_rules = pair.clone().into_inner();
        let head = self.expect_rule(inner_rules.next(), &pair, "Expected machine")?;
        let name = head.into_inner().next().map(|ident| ident.as_str().to_string());
        log::debug!("parsing machine {}", name.as_deref().unwrap_or("(default)"));

        let machine = self.add(Node::Machine(MachineNode::new(name)), &pair);
        let mut state_names = FxHashSet::default();
        for child in inner_rules {
            match child.as_rule() {
                Rule::binding => {
                    self.parse_binding(child, Some(machine))?;
                }
                Rule::state => {
                    self.parse_state(child, machine, &mut state_names)?;
                }
                rule => {
                    let msg = format!("Unexpected rule in machine: {:?}", rule);
                    return Err(self.error(&child, msg));
                }
            }
        }
        Ok(machine)
    }

    /// Parses a state into `machine`. Child states go into a nested machine
    /// that is created when the first one is found.
    fn parse_state(
        &mut self,
        pair: Pair<Rule>,
        machine: NodeId,
        state_names: &mut FxHashSet<String>,
    ) -> Result<NodeId, String> {
        let mut inner_rules = pair.clone().into_inner();
        let head = self.expect_rule(inner_rules.next(), &pair, "Expected state")?;

        let mut is_initial = false;
        let mut is_final = false;
        let mut name = None;
        for part in head.clone().into_inner() {
            match part.as_rule() {
                Rule::state_modifier if part.as_str() == "initial" => is_initial = true,
                Rule::state_modifier => is_final = true,
                _ => name = Some(part.as_str().to_string()),
            }
        }
        let name = self.expect_rule(name, &head, "Expected state name")?;

        if !state_names.insert(name.clone()) {
            let msg = format!("state `{name}` is already defined in this machine");
            return Err(self.error(&head, msg));
        }

        if is_initial {
            match self.ast.machine_mut(machine) {
                Some(MachineNode {
                    initial: Some(first),
                    ..
                }) => {
                    let msg =
                        format!("`{first}` is already the initial state, `{name}` is ignored");
                    log::debug!("{msg}");
                    self.handler
                        .emit_diagnostic_parsing(&msg, self.fileid, &head, Level::Warning);
                }
                Some(machine) => machine.initial = Some(name.clone()),
                None => {}
            }
        }

        let state = StateNode { name, is_final };
        let state = self.add(Node::State(state), &pair);
        self.ast.append(Some(machine), state);

        let mut nested = None;
        let mut nested_names = FxHashSet::default();
        for child in inner_rules {
            match child.as_rule() {
                Rule::binding => {
                    self.parse_binding(child, Some(state))?;
                }
                Rule::invoke => self.parse_invoke(child, state)?,
                Rule::transition => self.parse_transition(child, state)?,
                Rule::state => {
                    let children = match nested {
                        Some(id) => id,
                        None => {
                            let id = self.add(Node::Machine(MachineNode::new(None)), &child);
                            self.ast.append(Some(state), id);
                            nested = Some(id);
                            id
                        }
                    };
                    self.parse_state(child, children, &mut nested_names)?;
                }
                rule => {
                    let msg = format!("Unexpected rule in state: {:?}", rule);
                    return Err(self.error(&child, msg));
                }
            }
        }
        Ok(state)
    }

    fn parse_invoke(&mut self, pair: Pair<Rule>, state: NodeId) -> Result<(), String> {
        let mut inner_rules = pair.clone().into_inner();
        let head = self.expect_rule(inner_rules.next(), &pair, "Expected invoke")?;
        let call = self
            .expect_rule(head.into_inner().next(), &pair, "Expected service to invoke")?
            .as_str()
            .to_string();

        let invoke = self.add(Node::Invoke(InvokeNode { call }), &pair);
        self.ast.append(Some(state), invoke);
        for transition in inner_rules {
            self.parse_transition(transition, invoke)?;
        }
        Ok(())
    }

    fn parse_transition(&mut self, pair: Pair<Rule>, parent: NodeId) -> Result<(), String> {
        let mut inner_rules = pair.clone().into_inner();
        let trigger_rule = self.expect_rule(inner_rules.next(), &pair, "Expected trigger")?;
        let trigger = match trigger_rule.as_rule() {
            Rule::immediate => Trigger::Immediate,
            Rule::delay => Trigger::Delay(self.parse_delay(trigger_rule)?),
            _ => Trigger::Event(trigger_rule.as_str().to_string()),
        };

        let mut guards = Vec::new();
        let mut actions = Vec::new();
        let mut target = None;
        for step in inner_rules {
            match step.as_rule() {
                Rule::guard_step => {
                    let reference =
                        self.expect_rule(step.clone().into_inner().next(), &step, "Expected guard")?;
                    let guard = match reference.as_rule() {
                        Rule::symbol => {
                            TransitionGuard::Expr(Expr::Guard(reference_name(&reference)))
                        }
                        _ => TransitionGuard::Named(reference.as_str().to_string()),
                    };
                    guards.push(guard);
                }
                Rule::action_step => {
                    let reference =
                        self.expect_rule(step.clone().into_inner().next(), &step, "Expected action")?;
                    let action = match reference.as_rule() {
                        Rule::symbol => {
                            TransitionAction::Expr(Expr::Action(reference_name(&reference)))
                        }
                        _ => TransitionAction::Named(reference.as_str().to_string()),
                    };
                    actions.push(action);
                }
                Rule::assign_expr => {
                    let assign = self.parse_assign(step)?;
                    actions.push(TransitionAction::Expr(Expr::Assign(assign)));
                }
                Rule::target => target = Some(step.as_str().to_string()),
                rule => {
                    let msg = format!("Unexpected rule in transition: {:?}", rule);
                    return Err(self.error(&step, msg));
                }
            }
        }
        let target = self.expect_rule(target, &pair, "Expected transition target")?;

        let transition = TransitionNode {
            trigger,
            target,
            guards,
            actions,
        };
        let id = self.add(Node::Transition(transition), &pair);
        self.ast.append(Some(parent), id);
        Ok(())
    }

    fn parse_delay(&mut self, pair: Pair<Rule>) -> Result<DelayExpr, String> {
        let duration =
            self.expect_rule(pair.clone().into_inner().next(), &pair, "Expected duration")?;
        let mut parts = duration.clone().into_inner();
        let number = self.expect_rule(parts.next(), &duration, "Expected number")?;
        let scale = match parts.next() {
            Some(unit) if unit.as_str() == "s" => 1000,
            _ => 1,
        };
        match number.as_str().parse::<u64>().ok().and_then(|n| n.checked_mul(scale)) {
            Some(ms) => Ok(DelayExpr { ms }),
            None => {
                let msg = format!("delay `{}` is too large", duration.as_str());
                Err(self.error(&duration, msg))
            }
        }
    }

    fn parse_assign(&mut self, pair: Pair<Rule>) -> Result<AssignExpr, String> {
        self.uses_assign = true;
        let mut inner_rules = pair.clone().into_inner();
        let key = self
            .expect_rule(inner_rules.next(), &pair, "Expected key to assign")?
            .as_str()
            .to_string();
        let value = inner_rules.next().map(|value| reference_name(&value));
        Ok(AssignExpr { key, value })
    }
}

/// The identifier of a `:name` symbol or a plain `name`.
fn reference_name(pair: &Pair<Rule>) -> String {
    match pair.as_rule() {
        Rule::symbol => pair
            .clone()
            .into_inner()
            .next()
            .map(|ident| ident.as_str().to_string())
            .unwrap_or_default(),
        _ => pair.as_str().to_string(),
    }
}

/// Parses `source` into a [`Program`]. Problems are reported to `handler`;
/// the first fatal one is also returned.
pub fn parse(
    source: &str,
    filename: &str,
    handler: &mut DiagnosticHandler,
) -> Result<Program, CompileError> {
    let fileid = handler.add_file(filename.to_string(), source.to_string());
    let parse_error = |message: String| CompileError::Parse {
        filename: filename.to_string(),
        message,
    };

    let pairs = match LucyParser::parse(Rule::file, source) {
        Ok(pairs) => pairs,
        Err(err) => {
            let (start, end) = match err.location {
                InputLocation::Pos(start) => (start, start),
                InputLocation::Span(span) => span,
            };
            let msg: String = format!("Lexing failed: {}", err.variant.message());
            handler.emit_diagnostic_lexing(&msg, fileid, start, end, Level::Error);
            return Err(parse_error(msg));
        }
    };

    let mut ast = Ast::new();
    let mut context = ParserContext::new(&mut ast, fileid, handler);
    for pair in pairs.flat_map(|file| file.into_inner()) {
        context.parse_item(pair).map_err(parse_error)?;
    }
    let uses_assign = context.uses_assign;

    log::info!("parsed `{}` into {} nodes", filename, ast.live_nodes());
    Ok(Program { ast, uses_assign })
}

pub fn parse_file(
    filename: impl AsRef<Path>,
    handler: &mut DiagnosticHandler,
) -> Result<Program, CompileError> {
    let name = filename.as_ref().display().to_string();
    let input = std::fs::read_to_string(filename)?;
    parse(&input, &name, handler)
}
