use crate::value::Value;

/// The result of a host call. Most calls resolve synchronously; a call like
/// "fire a weapon with a cooldown" may not be ready yet, in which case the
/// host returns `Yielded` and the VM leaves the `CALL` instruction's `ip` in
/// place so the next `run` reattempts the exact same call.
pub enum CallOutcome {
    Return(Value),
    Yielded,
}

/// The boundary between the VM and the embedding host application (§6).
///
/// `HostObject` values are opaque identities to the VM; all attribute
/// lookup and invocation on them is delegated here. The VM never writes
/// attributes on a `HostObject` — there is no `host_setattr`.
pub trait HostInterface {
    /// Invoke `object` (a `HostObject`, or a host-provided callable bound to
    /// a global name) with `args`, returning its result or `Yielded` if the
    /// host isn't ready to complete the call yet.
    fn host_call(&mut self, object: &Value, args: &[Value]) -> Result<CallOutcome, String>;

    /// Look up `name` on `object`.
    fn host_getattr(&mut self, object: &Value, name: &str) -> Result<Value, String>;
}

/// Default host installed when none is configured. Any host-bound access
/// is an error, since there is nothing behind the handle to resolve it.
pub struct NoHost;

impl HostInterface for NoHost {
    fn host_call(&mut self, _object: &Value, _args: &[Value]) -> Result<CallOutcome, String> {
        Err("no host configured: cannot call host objects".to_string())
    }

    fn host_getattr(&mut self, _object: &Value, _name: &str) -> Result<Value, String> {
        Err("no host configured: cannot read host attributes".to_string())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    /// A cheaply-cloned handle onto a `ScriptedHost`'s call counts, readable
    /// after the host itself has moved into a `VM` via `with_host` (the VM
    /// owns the `Box<dyn HostInterface>` outright, so nothing else can hold
    /// a reference into it — this is a second, independent owner of the
    /// same counter table instead).
    #[derive(Clone)]
    pub struct CallCounts(Rc<RefCell<HashMap<u64, u32>>>);

    impl CallCounts {
        pub fn get(&self, handle: &Value) -> u32 {
            match handle {
                Value::HostObject(id) => *self.0.borrow().get(id).unwrap_or(&0),
                _ => 0,
            }
        }
    }

    /// A host for tests: each installed name gets its own opaque handle
    /// (mirroring how a real host would hand the VM a `HostObject` per
    /// game entity or tool), dispatched by that handle rather than by
    /// name — the VM itself never sees host function names, only handles
    /// it got from `vars`.
    pub struct ScriptedHost {
        functions: Vec<Box<dyn Fn(&[Value]) -> Value>>,
        call_counts: Rc<RefCell<HashMap<u64, u32>>>,
    }

    impl ScriptedHost {
        pub fn new() -> Self {
            Self {
                functions: Vec::new(),
                call_counts: Rc::new(RefCell::new(HashMap::new())),
            }
        }

        /// Register a callable and return the `Value` to bind its name to
        /// in the environment passed to `VM::set_environment`.
        pub fn install(&mut self, f: impl Fn(&[Value]) -> Value + 'static) -> Value {
            let handle = self.functions.len() as u64;
            self.functions.push(Box::new(f));
            Value::HostObject(handle)
        }

        /// A handle for inspecting call counts after this host has been
        /// moved into a VM.
        pub fn call_counts(&self) -> CallCounts {
            CallCounts(self.call_counts.clone())
        }
    }

    impl HostInterface for ScriptedHost {
        fn host_call(&mut self, object: &Value, args: &[Value]) -> Result<CallOutcome, String> {
            let id = match object {
                Value::HostObject(id) => *id,
                other => return Err(format!("{} is not callable", other.type_name())),
            };
            *self.call_counts.borrow_mut().entry(id).or_insert(0) += 1;
            match self.functions.get(id as usize) {
                Some(f) => Ok(CallOutcome::Return(f(args))),
                None => Err(format!("no host function behind handle {}", id)),
            }
        }

        fn host_getattr(&mut self, object: &Value, name: &str) -> Result<Value, String> {
            Err(format!(
                "{} has no attribute '{}'",
                object.type_name(),
                name
            ))
        }
    }
}
