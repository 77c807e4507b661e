use std::collections::BTreeSet;

use crate::task::Task;

/// Functions declared by the task that are never the target of an operator effect.
///
/// Their ground variables keep their initial value forever: preconditions on them are checked
/// once at grounding time and omitted from ground actions.
pub fn local_static_functions(task: &Task) -> BTreeSet<String> {
    let modified = modified_functions(task);
    task.functions
        .iter()
        .map(|f| f.name.clone())
        .filter(|name| !modified.contains(name))
        .collect()
}

/// Functions appearing in at least one (literal or numeric) effect of the task's operators.
pub fn modified_functions(task: &Task) -> BTreeSet<String> {
    task.operators
        .iter()
        .flat_map(|op| {
            op.effects
                .iter()
                .map(|e| e.function.clone())
                .chain(op.numeric_effects.iter().map(|e| e.function.clone()))
        })
        .collect()
}

/// Answer of one agent on a candidate static function: it rejects it iff one of its own operators modifies it.
pub fn confirms_static(task: &Task, function: &str) -> bool {
    !modified_functions(task).contains(function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Literal, OperatorDecl};

    #[test]
    fn statics_exclude_effect_targets() {
        let mut task = Task::default();
        for name in ["road", "at", "fuel"] {
            task.functions.push(serde_json::from_str(&format!(r#"{{"name": "{name}"}}"#)).unwrap());
        }
        task.operators.push(OperatorDecl {
            name: "drive".to_string(),
            params: vec![],
            preconditions: vec![Literal::new("road", &["?a", "?b"])],
            effects: vec![Literal::new("at", &["?t", "?b"])],
            numeric_preconditions: vec![],
            numeric_effects: vec![],
        });
        let statics = local_static_functions(&task);
        assert!(statics.contains("road"));
        assert!(statics.contains("fuel"));
        assert!(!statics.contains("at"));
        assert!(!confirms_static(&task, "at"));
        assert!(confirms_static(&task, "unknown-to-me"));
    }
}
