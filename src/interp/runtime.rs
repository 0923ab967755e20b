//! file: src/interp/runtime.rs
//! description: runtime services consumed by the interpreter.
//!
//! The interpreter only talks to the guest object model through this narrow
//! trait: literal boxing, built-in method dispatch, exception construction
//! and stringification. `CoreRuntime` ships the built-ins the core needs;
//! a host embedding the engine supplies a richer implementation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;

use crate::interp::value::RtValue;

lazy_static! {
    // Process-wide, append-only symbol table. Interning is the only piece of
    // shared mutable state across independently compiled scopes.
    static ref SYMBOLS: Mutex<HashSet<Arc<str>>> = Mutex::new(HashSet::new());
}

/// Interns `name`, returning a shared handle equal across all callers.
pub fn intern(name: &str) -> Arc<str> {
    let mut table = SYMBOLS.lock().expect("symbol table poisoned");
    if let Some(existing) = table.get(name) {
        return existing.clone();
    }
    let fresh: Arc<str> = Arc::from(name);
    table.insert(fresh.clone());
    fresh
}

pub trait Runtime {
    /// Dispatches a built-in method. `None` means the runtime does not
    /// define `name` for this receiver and the caller should try
    /// user-defined methods. `Some(Err(..))` carries a guest exception.
    fn call_builtin(
        &mut self,
        receiver: &RtValue,
        name: &str,
        args: &[RtValue],
    ) -> Option<Result<RtValue, RtValue>>;

    /// Builds a guest exception value of the named class.
    fn exception(&mut self, class_name: &str, message: String) -> RtValue {
        RtValue::exception(intern(class_name), message)
    }

    /// Guest `to_s` semantics for interpolation.
    fn stringify(&mut self, value: &RtValue) -> String {
        match value {
            RtValue::Nil => String::new(),
            value => value.to_string(),
        }
    }

    /// Boxes a string literal. The default shares nothing; runtimes with
    /// their own heap may intern or copy-on-write.
    fn box_string(&mut self, value: &str) -> RtValue {
        RtValue::str(value)
    }
}

/// The built-ins the core pipeline and its tests rely on: arithmetic and
/// comparison over numbers, string concatenation/length, basic array and
/// equality operations.
#[derive(Debug, Default)]
pub struct CoreRuntime;

impl CoreRuntime {
    pub fn new() -> CoreRuntime {
        CoreRuntime
    }

    fn numeric_pair(a: &RtValue, b: &RtValue) -> Option<(f64, f64)> {
        let fa = match a {
            RtValue::Fixnum(i) => *i as f64,
            RtValue::Float(x) => *x,
            _ => return None,
        };
        let fb = match b {
            RtValue::Fixnum(i) => *i as f64,
            RtValue::Float(x) => *x,
            _ => return None,
        };
        Some((fa, fb))
    }

    fn arith(
        &mut self,
        op: &str,
        a: &RtValue,
        b: &RtValue,
    ) -> Option<Result<RtValue, RtValue>> {
        if let (RtValue::Fixnum(x), RtValue::Fixnum(y)) = (a, b) {
            let out = match op {
                "+" => x.wrapping_add(*y),
                "-" => x.wrapping_sub(*y),
                "*" => x.wrapping_mul(*y),
                "/" | "%" => {
                    if *y == 0 {
                        return Some(Err(self.exception(
                            "ZeroDivisionError",
                            "divided by 0".to_string(),
                        )));
                    }
                    if op == "/" { x.div_euclid(*y) } else { x.rem_euclid(*y) }
                }
                _ => return None,
            };
            return Some(Ok(RtValue::Fixnum(out)));
        }
        let (x, y) = Self::numeric_pair(a, b)?;
        let out = match op {
            "+" => x + y,
            "-" => x - y,
            "*" => x * y,
            "/" => x / y,
            "%" => x % y,
            _ => return None,
        };
        Some(Ok(RtValue::Float(out)))
    }

    fn compare(op: &str, a: &RtValue, b: &RtValue) -> Option<RtValue> {
        let (x, y) = Self::numeric_pair(a, b)?;
        let out = match op {
            "<" => x < y,
            "<=" => x <= y,
            ">" => x > y,
            ">=" => x >= y,
            _ => return None,
        };
        Some(RtValue::Bool(out))
    }
}

impl Runtime for CoreRuntime {
    fn call_builtin(
        &mut self,
        receiver: &RtValue,
        name: &str,
        args: &[RtValue],
    ) -> Option<Result<RtValue, RtValue>> {
        match name {
            "+" | "-" | "*" | "/" | "%" => {
                let arg = args.first()?;
                if let (RtValue::Str(a), "+") = (receiver, name) {
                    return match arg {
                        RtValue::Str(b) => {
                            let joined = format!("{}{}", a.borrow(), b.borrow());
                            Some(Ok(RtValue::str(joined)))
                        }
                        other => Some(Err(self.exception(
                            "TypeError",
                            format!("no implicit conversion of {} into String", other.type_name()),
                        ))),
                    };
                }
                self.arith(name, receiver, arg)
            }
            "<" | "<=" | ">" | ">=" => Self::compare(name, receiver, args.first()?).map(Ok),
            "==" => Some(Ok(RtValue::Bool(receiver == args.first()?))),
            "!=" => Some(Ok(RtValue::Bool(receiver != args.first()?))),
            "equal?" => Some(Ok(RtValue::Bool(receiver.same_object(args.first()?)))),
            "to_s" => {
                let s = self.stringify(receiver);
                Some(Ok(RtValue::str(s)))
            }
            "length" | "size" => match receiver {
                RtValue::Str(s) => Some(Ok(RtValue::Fixnum(s.borrow().chars().count() as i64))),
                RtValue::Array(items) => Some(Ok(RtValue::Fixnum(items.borrow().len() as i64))),
                _ => None,
            },
            "push" | "<<" => match receiver {
                RtValue::Array(items) => {
                    for a in args {
                        items.borrow_mut().push(a.clone());
                    }
                    Some(Ok(receiver.clone()))
                }
                _ => None,
            },
            "first" => match receiver {
                RtValue::Array(items) => {
                    Some(Ok(items.borrow().first().cloned().unwrap_or(RtValue::Nil)))
                }
                RtValue::Range(r) => Some(Ok(r.begin.clone())),
                _ => None,
            },
            "nil?" => Some(Ok(RtValue::Bool(matches!(receiver, RtValue::Nil)))),
            "class" => Some(Ok(RtValue::Symbol(intern(receiver.type_name())))),
            "message" => match receiver {
                RtValue::Exception(e) => Some(Ok(RtValue::str(e.message.clone()))),
                _ => None,
            },
            "begin" => match receiver {
                RtValue::Range(r) => Some(Ok(r.begin.clone())),
                _ => None,
            },
            _ => None,
        }
    }
}
