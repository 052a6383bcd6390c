//! Case-insensitive interning for identifier names.
//!
//! VBA identifiers compare without regard to case (`foo`, `Foo` and `FOO`
//! all denote the same name). Every name that takes part in lookup is
//! folded once and interned, so the resolver and the finder compare plain
//! `u32` handles.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::fmt;

/// An interned, case-folded identifier name.
///
/// `Name` is a lightweight handle (just a u32) that represents the folded
/// form of an identifier. The display spelling lives on the declaration or
/// reference that carries it; the folded string is stored in an [`Interner`].
///
/// Benefits:
/// - O(1) case-insensitive equality comparison
/// - 4 bytes storage vs variable-length string
/// - Cheap to copy and hash
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Name(u32);

impl Name {
    /// Create a Name from a raw index (used internally).
    #[inline]
    pub(crate) const fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.0)
    }
}

/// Fold an identifier to its comparison form.
pub fn fold(s: &str) -> SmolStr {
    if s.is_ascii() {
        SmolStr::new(s.to_ascii_lowercase())
    } else {
        SmolStr::new(s.to_lowercase())
    }
}

/// Check whether `s` is a plain identifier (letter first, then letters,
/// digits or underscores).
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if unicode_ident::is_xid_start(first) => {}
        _ => return false,
    }
    chars.all(unicode_ident::is_xid_continue)
}

/// String interner for case-folded identifier names.
///
/// Thread-safe via internal locking: declaration building runs on several
/// rayon workers at once and all of them intern through the same instance.
#[derive(Default)]
pub struct Interner {
    inner: RwLock<InternerInner>,
}

#[derive(Default)]
struct InternerInner {
    /// Map from folded string to index
    map: FxHashMap<SmolStr, u32>,
    /// Storage of all interned strings
    strings: Vec<SmolStr>,
}

impl Interner {
    /// Create a new empty interner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern an identifier, returning its case-insensitive `Name` handle.
    ///
    /// If any spelling of the identifier has been interned before, returns
    /// the existing `Name`.
    pub fn intern(&self, s: &str) -> Name {
        let folded = fold(s);

        // Fast path: check if already interned (read lock)
        {
            let inner = self.inner.read();
            if let Some(&index) = inner.map.get(&folded) {
                return Name::from_raw(index);
            }
        }

        // Slow path: need to insert (write lock)
        let mut inner = self.inner.write();

        // Double-check after acquiring write lock
        if let Some(&index) = inner.map.get(&folded) {
            return Name::from_raw(index);
        }

        let index = inner.strings.len() as u32;
        inner.strings.push(folded.clone());
        inner.map.insert(folded, index);

        Name::from_raw(index)
    }

    /// Find the `Name` of an identifier without interning it.
    ///
    /// Queries use this: a name nobody declared or referenced cannot match
    /// anything, so there is no reason to grow the table.
    pub fn get(&self, s: &str) -> Option<Name> {
        let folded = fold(s);
        self.inner.read().map.get(&folded).copied().map(Name::from_raw)
    }

    /// Look up the folded string for a `Name`.
    ///
    /// Returns `None` if the `Name` was created by a different interner.
    pub fn lookup(&self, name: Name) -> Option<SmolStr> {
        let inner = self.inner.read();
        inner.strings.get(name.0 as usize).cloned()
    }

    /// Get the number of interned strings.
    pub fn len(&self) -> usize {
        self.inner.read().strings.len()
    }

    /// Check if the interner is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Interner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Interner")
            .field("count", &inner.strings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_ignores_case() {
        let interner = Interner::new();

        let a = interner.intern("Foo");
        let b = interner.intern("FOO");
        let c = interner.intern("foo");

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_intern_different_strings() {
        let interner = Interner::new();

        let a = interner.intern("hello");
        let b = interner.intern("world");

        assert_ne!(a, b);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_get_does_not_insert() {
        let interner = Interner::new();
        interner.intern("Known");

        assert!(interner.get("KNOWN").is_some());
        assert!(interner.get("unknown").is_none());
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_lookup_returns_folded_form() {
        let interner = Interner::new();
        let name = interner.intern("MsgBox");

        assert_eq!(interner.lookup(name).as_deref(), Some("msgbox"));
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("Module1"));
        assert!(is_identifier("mod_Helpers"));
        assert!(!is_identifier("1Module"));
        assert!(!is_identifier("my module"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_name_size() {
        assert_eq!(std::mem::size_of::<Name>(), 4);
    }
}
