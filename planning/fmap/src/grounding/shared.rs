//! Shareability policy: which ground facts an agent may disclose to which peer.

use crate::ids::ObjId;
use crate::task::SharedData;
use crate::types::Registry;

use super::Function;

#[derive(Clone, Debug, Default)]
pub struct SharingPolicy {
    /// `None` when the task declares no shared data, in which case everything is public.
    rules: Option<Vec<SharedData>>,
}

impl SharingPolicy {
    pub fn new(rules: Option<Vec<SharedData>>) -> Self {
        SharingPolicy { rules }
    }

    /// True if the fact `function(args) = value` may be sent to agent `dest`.
    ///
    /// A rule matches when it names the function, lists `dest` among its agents and each argument
    /// object (and the value) is compatible with the declared types. For multi-valued functions the
    /// value was folded into the trailing argument, which is matched against the value types.
    pub fn can_share(&self, reg: &Registry, function: &Function, args: &[ObjId], value: ObjId, dest: &str) -> bool {
        let Some(rules) = &self.rules else {
            return true;
        };
        let (args, value) = if function.multi && !args.is_empty() {
            (&args[..args.len() - 1], Some(args[args.len() - 1]))
        } else if function.kind == super::FunctionKind::Object {
            (args, Some(value))
        } else {
            (args, None)
        };
        rules.iter().any(|rule| {
            rule.function == function.name
                && rule.agents.iter().any(|a| a == dest)
                && (rule.params.is_empty()
                    || (rule.params.len() == args.len()
                        && rule.params.iter().zip(args).all(|(t, &o)| compatible(reg, o, t))))
                && match value {
                    Some(v) => rule.value_types.is_empty() || rule.value_types.iter().any(|t| compatible(reg, v, t)),
                    None => true,
                }
        })
    }
}

fn compatible(reg: &Registry, obj: ObjId, type_name: &str) -> bool {
    match reg.types.id(type_name) {
        Some(t) => reg.compatible(obj, t),
        None => false,
    }
}
