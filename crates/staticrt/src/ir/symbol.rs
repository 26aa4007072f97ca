//! Interned operator-kind symbols.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;

/// An interned qualified kind string such as `aten::add` or `prim::Constant`.
///
/// Symbols are process-wide and cheap to copy/compare; the interner leaks the
/// backing strings so `as_str` can hand out `'static` references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

struct Interner {
    by_name: HashMap<&'static str, Symbol>,
    names: Vec<&'static str>,
}

static INTERNER: Lazy<Mutex<Interner>> = Lazy::new(|| {
    Mutex::new(Interner {
        by_name: HashMap::new(),
        names: Vec::new(),
    })
});

impl Symbol {
    /// Interns a qualified kind string.
    pub fn intern(name: &str) -> Symbol {
        let mut interner = INTERNER.lock().expect("symbol interner poisoned");
        if let Some(&sym) = interner.by_name.get(name) {
            return sym;
        }
        let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let sym = Symbol(interner.names.len() as u32);
        interner.names.push(leaked);
        interner.by_name.insert(leaked, sym);
        sym
    }

    /// Returns the qualified string for this symbol.
    pub fn as_str(self) -> &'static str {
        let interner = INTERNER.lock().expect("symbol interner poisoned");
        interner.names[self.0 as usize]
    }

    /// Namespace portion of the qualified name (`aten` in `aten::add`).
    pub fn namespace(self) -> &'static str {
        let name = self.as_str();
        name.split_once("::").map(|(ns, _)| ns).unwrap_or("")
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known node kinds used throughout the runtime.
pub mod kinds {
    use super::Symbol;

    pub fn constant() -> Symbol {
        Symbol::intern("prim::Constant")
    }

    pub fn call_function() -> Symbol {
        Symbol::intern("prim::CallFunction")
    }

    pub fn get_attr() -> Symbol {
        Symbol::intern("prim::GetAttr")
    }

    pub fn list_construct() -> Symbol {
        Symbol::intern("prim::ListConstruct")
    }

    pub fn tuple_construct() -> Symbol {
        Symbol::intern("prim::TupleConstruct")
    }

    pub fn list_unpack() -> Symbol {
        Symbol::intern("prim::ListUnpack")
    }

    /// Synthetic pure producer standing in for graph inputs during alias
    /// analysis in the copy-replacement pass.
    pub fn pure_inputs() -> Symbol {
        Symbol::intern("static_runtime::pure_inputs")
    }

    pub fn permute_copy() -> Symbol {
        Symbol::intern("static_runtime::permute_copy")
    }
}
