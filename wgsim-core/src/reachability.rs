//! Reachability analysis over the function call graph
//!
//! Determines which user functions can run, starting from entry points.
//! Functions come back in topological order (callees before callers), which
//! is also the order resource sets are propagated in.

use crate::ast::{Expression, Function, Program};
use crate::visitor::{walk_expr_list, Visitor};
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

pub const STAGE_ATTRIBUTES: [&str; 3] = ["vertex", "fragment", "compute"];

pub fn is_entry_point(f: &Function) -> bool {
    STAGE_ATTRIBUTES.iter().any(|stage| f.attribute(stage).is_some())
}

/// Direct user-function callees of every function, in first-call order.
pub fn call_graph(program: &Program) -> HashMap<String, Vec<String>> {
    let names: HashSet<&str> = program.functions().map(|f| f.name.as_str()).collect();
    program
        .functions()
        .map(|f| (f.name.clone(), collect_callees(f, &names)))
        .collect()
}

/// Find all functions reachable from entry points, in topological order.
/// Returns a Vec with callees before callers (post-order DFS).
pub fn reachable_functions_ordered(program: &Program, calls: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();
    let mut order = Vec::new();

    for entry in program.functions().filter(|f| is_entry_point(f)) {
        dfs_postorder(&entry.name, calls, &mut visited, &mut in_stack, &mut order);
    }

    order
}

fn dfs_postorder(
    name: &str,
    calls: &HashMap<String, Vec<String>>,
    visited: &mut HashSet<String>,
    in_stack: &mut HashSet<String>,
    order: &mut Vec<String>,
) {
    if visited.contains(name) || in_stack.contains(name) {
        return;
    }

    in_stack.insert(name.to_string());

    if let Some(callees) = calls.get(name) {
        for callee in callees {
            dfs_postorder(callee, calls, visited, in_stack, order);
        }
    }

    in_stack.remove(name);
    visited.insert(name.to_string());
    order.push(name.to_string());
}

/// Find all functions reachable from entry points (unordered set).
pub fn reachable_functions(program: &Program, calls: &HashMap<String, Vec<String>>) -> HashSet<String> {
    reachable_functions_ordered(program, calls).into_iter().collect()
}

/// Every function reachable from `start`, itself included.
pub fn transitive_callees(start: &str, calls: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();
    let mut order = Vec::new();
    dfs_postorder(start, calls, &mut visited, &mut in_stack, &mut order);
    order
}

/// Visitor that collects the user functions called in a body
struct CalleeCollector<'a> {
    functions: &'a HashSet<&'a str>,
    callees: Vec<String>,
}

impl Visitor for CalleeCollector<'_> {
    type Break = ();

    fn visit_expr_call(&mut self, name: &str, args: &[Expression], _e: &Expression) -> ControlFlow<()> {
        if self.functions.contains(name) && !self.callees.iter().any(|c| c == name) {
            self.callees.push(name.to_string());
        }
        walk_expr_list(self, args)
    }
}

fn collect_callees(f: &Function, functions: &HashSet<&str>) -> Vec<String> {
    let mut collector = CalleeCollector {
        functions,
        callees: Vec::new(),
    };
    let _ = collector.visit_function(f);
    collector.callees
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    const SOURCE: &str = r#"
        fn leaf() -> f32 { return 1.0; }
        fn middle() -> f32 { return leaf() + sin(0.0); }
        fn unused() { leaf(); }
        @compute @workgroup_size(1)
        fn main() { let x = middle(); }
    "#;

    #[test]
    fn test_call_graph_excludes_builtins() {
        let program = parse_source(SOURCE).unwrap();
        let graph = call_graph(&program);
        assert_eq!(graph["middle"], vec!["leaf".to_string()]);
        assert_eq!(graph["main"], vec!["middle".to_string()]);
        assert!(graph["leaf"].is_empty());
    }

    #[test]
    fn test_reachable_in_topological_order() {
        let program = parse_source(SOURCE).unwrap();
        let graph = call_graph(&program);
        let order = reachable_functions_ordered(&program, &graph);
        assert_eq!(order, vec!["leaf", "middle", "main"]);
        assert!(!reachable_functions(&program, &graph).contains("unused"));
    }

    #[test]
    fn test_recursion_terminates() {
        let program = parse_source(
            "fn a() { b(); }
             fn b() { a(); }
             @fragment fn main() { a(); }",
        )
        .unwrap();
        let graph = call_graph(&program);
        assert_eq!(reachable_functions(&program, &graph).len(), 3);
        assert_eq!(transitive_callees("a", &graph), vec!["b", "a"]);
    }
}
