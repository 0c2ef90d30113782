// Copyright 2025 Cornell University
// released under MIT License

use std::fmt;
use std::io::Write;

use crate::ast::*;

/// Serializes an `Ast` to a `String`
pub fn serialize_to_string(ast: &Ast) -> std::io::Result<String> {
    let mut out = Vec::new();
    serialize(&mut out, ast)?;
    let out = String::from_utf8_lossy(&out).into_owned();
    Ok(out)
}

/// Writes the tree to `out`, one node per line, children indented by two spaces.
pub fn serialize(out: &mut impl Write, ast: &Ast) -> std::io::Result<()> {
    for root in ast.roots() {
        serialize_node(out, ast, root, 0)?;
    }
    Ok(())
}

fn serialize_node(
    out: &mut impl Write,
    ast: &Ast,
    id: NodeId,
    depth: usize,
) -> std::io::Result<()> {
    let Some(node) = ast.get(id) else {
        return Ok(());
    };
    writeln!(out, "{}{}", "  ".repeat(depth), node)?;
    for child in ast.children(id) {
        serialize_node(out, ast, child, depth + 1)?;
    }
    Ok(())
}

/// Pretty-printer for a single node, without its children
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Machine(machine) => {
                write!(f, "machine")?;
                if let Some(name) = &machine.name {
                    write!(f, " {}", name)?;
                }
                if let Some(initial) = &machine.initial {
                    write!(f, " initial={}", initial)?;
                }
                Ok(())
            }
            Node::State(state) if state.is_final => write!(f, "final state {}", state.name),
            Node::State(state) => write!(f, "state {}", state.name),
            Node::Transition(transition) => write!(f, "{}", transition),
            Node::Invoke(invoke) => write!(f, "invoke {}", invoke.call),
            Node::Import(import) => write!(f, "use '{}'", import.from),
            Node::ImportSpecifier(spec) => match &spec.local {
                Some(local) => write!(f, "{} as {}", spec.imported, local),
                None => write!(f, "{}", spec.imported),
            },
            Node::Assignment(binding) => {
                let kind = match binding.kind {
                    BindingKind::Guard => "guard",
                    BindingKind::Action => "action",
                };
                write!(f, "{} {} = {}", kind, binding.name, binding.value)
            }
        }
    }
}

/// Transitions are printed the way they are written: `go => guard(ok) => next`
impl fmt::Display for TransitionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.trigger {
            Trigger::Event(event) => write!(f, "{}", event)?,
            Trigger::Immediate => write!(f, "@immediate")?,
            Trigger::Delay(delay) => write!(f, "{}", delay)?,
        }
        for guard in &self.guards {
            match guard {
                TransitionGuard::Named(name) => write!(f, " => guard({})", name)?,
                TransitionGuard::Expr(expr) => write!(f, " => guard({})", expr)?,
            }
        }
        for action in &self.actions {
            match action {
                TransitionAction::Named(name) => write!(f, " => action({})", name)?,
                TransitionAction::Expr(expr @ Expr::Assign(_)) => write!(f, " => {}", expr)?,
                TransitionAction::Expr(expr) => write!(f, " => action({})", expr)?,
            }
        }
        write!(f, " => {}", self.target)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Identifier(name) => write!(f, "{}", name),
            Expr::Guard(raw) | Expr::Action(raw) => write!(f, ":{}", raw),
            Expr::Assign(AssignExpr { key, value: None }) => write!(f, "assign({})", key),
            Expr::Assign(AssignExpr {
                key,
                value: Some(value),
            }) => write!(f, "assign({}, {})", key, value),
            Expr::Delay(delay) => write!(f, "{}", delay),
        }
    }
}

impl fmt::Display for DelayExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delay({}ms)", self.ms)
    }
}

#[cfg(test)]
pub mod tests {
    use insta::Settings;
    use std::path::Path;
    use strip_ansi_escapes::strip_str;

    use super::*;
    use crate::ast::tests::build_toggle_machine;
    use crate::diagnostic::DiagnosticHandler;
    use crate::parser::parse_file;

    fn snap(name: &str, content: String) {
        let mut settings = Settings::clone_current();
        settings.set_snapshot_path(Path::new("../tests/snapshots"));
        settings.bind(|| {
            insta::assert_snapshot!(name, content);
        });
    }

    fn test_helper(filename: &str, snap_name: &str) {
        let mut handler = DiagnosticHandler::default();
        let result = parse_file(filename, &mut handler);

        let content = match result {
            Ok(program) => serialize_to_string(&program.ast).unwrap(),
            Err(_) => strip_str(handler.error_string()),
        };
        println!("{}", content);
        snap(snap_name, content);
    }

    #[test]
    fn test_toggle_lucy() {
        test_helper("tests/toggle.lucy", "toggle");
    }

    #[test]
    fn test_login_lucy() {
        test_helper("tests/login.lucy", "login");
    }

    #[test]
    fn test_nested_state_lucy() {
        test_helper("tests/nested_state/input.lucy", "nested_state");
    }

    #[test]
    fn hand_built_toggle() {
        let ast = build_toggle_machine();
        assert_eq!(
            serialize_to_string(&ast).unwrap(),
            "machine Toggle initial=inactive
  state inactive
    TOGGLE => active
  state active
    TOGGLE => inactive
"
        );
    }

    #[test]
    fn expressions() {
        let transition = TransitionNode::delayed(1500, "later")
            .with_guard(TransitionGuard::Expr(Expr::Guard("isReady".to_string())))
            .with_action(TransitionAction::Expr(Expr::Assign(AssignExpr {
                key: "count".to_string(),
                value: Some("increment".to_string()),
            })))
            .with_action(TransitionAction::Named("log".to_string()));
        assert_eq!(
            transition.to_string(),
            "delay(1500ms) => guard(:isReady) => assign(count, increment) => action(log) => later"
        );
        assert_eq!(Expr::Identifier("ok".to_string()).to_string(), "ok");
        assert_eq!(Expr::Action("go".to_string()).to_string(), ":go");
    }

    #[test]
    fn destroyed_nodes_are_skipped() {
        let mut ast = build_toggle_machine();
        let machine = ast.body().unwrap();
        let inactive = ast.first_child(machine).unwrap();
        ast.destroy(inactive);
        let out = serialize_to_string(&ast).unwrap();
        assert_eq!(
            out,
            "machine Toggle initial=inactive\n  state active\n    TOGGLE => inactive\n"
        );
    }
}
