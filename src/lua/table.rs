//! Lua tables
//!
//! A table has an array part for the keys `1..=n` and an insertion-ordered
//! hash part for everything else. The array part never ends in `nil`, and
//! the key `n + 1` is never live in the hash part, so `n` is always a valid
//! border for the length operator.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::lua::error::{LuaError, LuaResult, RuntimeErrorKind};
use crate::lua::host::HostRef;
use crate::lua::value::{FunctionRef, LuaString, Value};

/// Largest integer key stored in the array part
const MAX_ARRAY_INDEX: f64 = 9_007_199_254_740_992.0; // 2^53

/// Hashable, normalised form of a non-nil, non-NaN key
#[derive(Clone)]
enum TableKey {
    Boolean(bool),
    Number(u64),
    String(LuaString),
    Table(TableRef),
    Function(FunctionRef),
    Host(HostRef),
}

impl TableKey {
    fn from_value(key: &Value) -> LuaResult<TableKey> {
        match key {
            Value::Nil => Err(LuaError::runtime(RuntimeErrorKind::InvalidKey, "table index is nil")),
            Value::Number(n) if n.is_nan() => {
                Err(LuaError::runtime(RuntimeErrorKind::InvalidKey, "table index is NaN"))
            }
            // -0.0 and 0.0 share a slot
            Value::Number(n) => Ok(TableKey::Number(if *n == 0.0 { 0 } else { n.to_bits() })),
            Value::Boolean(b) => Ok(TableKey::Boolean(*b)),
            Value::String(s) => Ok(TableKey::String(s.clone())),
            Value::Table(t) => Ok(TableKey::Table(t.clone())),
            Value::Function(f) => Ok(TableKey::Function(f.clone())),
            Value::HostObject(h) => Ok(TableKey::Host(h.clone())),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            TableKey::Boolean(b) => Value::Boolean(*b),
            TableKey::Number(bits) => Value::Number(f64::from_bits(*bits)),
            TableKey::String(s) => Value::String(s.clone()),
            TableKey::Table(t) => Value::Table(t.clone()),
            TableKey::Function(f) => Value::Function(f.clone()),
            TableKey::Host(h) => Value::HostObject(h.clone()),
        }
    }
}

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TableKey::Boolean(a), TableKey::Boolean(b)) => a == b,
            (TableKey::Number(a), TableKey::Number(b)) => a == b,
            (TableKey::String(a), TableKey::String(b)) => a == b,
            (TableKey::Table(a), TableKey::Table(b)) => a.ptr_eq(b),
            (TableKey::Function(a), TableKey::Function(b)) => Rc::ptr_eq(a, b),
            (TableKey::Host(a), TableKey::Host(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Eq for TableKey {}

impl Hash for TableKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            TableKey::Boolean(b) => b.hash(state),
            TableKey::Number(bits) => bits.hash(state),
            TableKey::String(s) => s.hash(state),
            TableKey::Table(t) => t.addr().hash(state),
            TableKey::Function(f) => (Rc::as_ptr(f) as *const () as usize).hash(state),
            TableKey::Host(h) => h.addr().hash(state),
        }
    }
}

/// Array index for a key, if it is a positive integral number
fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) if *n >= 1.0 && *n <= MAX_ARRAY_INDEX && n.fract() == 0.0 => Some(*n as usize),
        _ => None,
    }
}

/// Lua table
#[derive(Default)]
pub struct Table {
    /// Values for keys `1..=array.len()`; may contain interior nils
    array: Vec<Value>,

    /// Hash part entries in insertion order; removed entries keep their
    /// slot with a nil value until the next compaction
    entries: Vec<(TableKey, Value)>,

    /// Key to position in `entries`
    index: HashMap<TableKey, usize>,

    /// Number of nil-valued entries
    dead: usize,

    /// Optional metatable
    metatable: Option<TableRef>,
}

impl Table {
    /// Create a new empty table
    pub fn new() -> Self {
        Table::default()
    }

    /// Create a table with preallocated capacity
    pub fn with_capacity(array: usize, hash: usize) -> Self {
        Table {
            array: Vec::with_capacity(array),
            entries: Vec::with_capacity(hash),
            index: HashMap::with_capacity(hash),
            ..Table::default()
        }
    }

    /// Raw get (no metamethods)
    pub fn get(&self, key: &Value) -> Value {
        if let Some(i) = array_index(key) {
            if i <= self.array.len() {
                return self.array[i - 1].clone();
            }
        }
        match key {
            Value::Nil => Value::Nil,
            Value::Number(n) if n.is_nan() => Value::Nil,
            _ => match TableKey::from_value(key) {
                Ok(k) => self.index.get(&k).map_or(Value::Nil, |&pos| self.entries[pos].1.clone()),
                Err(_) => Value::Nil,
            },
        }
    }

    /// Raw get by string key
    pub fn get_str(&self, key: &str) -> Value {
        self.get(&Value::from(key))
    }

    /// Raw set (no metamethods). Storing nil removes the key.
    pub fn set(&mut self, key: Value, value: Value) -> LuaResult<()> {
        let table_key = TableKey::from_value(&key)?;

        if let Some(i) = array_index(&key) {
            let len = self.array.len();
            if i <= len {
                self.array[i - 1] = value;
                if i == len {
                    self.trim_array();
                }
                return Ok(());
            }
            if i == len + 1 {
                if value.is_nil() {
                    // Not in the array part, and never live in the hash part
                    return Ok(());
                }
                self.array.push(value);
                self.remove_entry(&table_key);
                self.migrate_from_hash();
                return Ok(());
            }
        }

        match self.index.get(&table_key) {
            Some(&pos) => {
                let slot = &mut self.entries[pos].1;
                if slot.is_nil() && !value.is_nil() {
                    self.dead -= 1;
                } else if !slot.is_nil() && value.is_nil() {
                    self.dead += 1;
                }
                *slot = value;
            }
            None => {
                if value.is_nil() {
                    return Ok(());
                }
                self.maybe_compact();
                self.index.insert(table_key.clone(), self.entries.len());
                self.entries.push((table_key, value));
            }
        }
        Ok(())
    }

    /// Set a string key (used when building library tables)
    pub fn set_str(&mut self, key: &str, value: Value) -> LuaResult<()> {
        self.set(Value::from(key), value)
    }

    /// Length (a border): `t[n]` is non-nil and `t[n + 1]` is nil
    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.entries.len() == self.dead
    }

    /// Append at `len() + 1`
    pub fn push(&mut self, value: Value) -> LuaResult<()> {
        let n = self.array.len() + 1;
        self.set(Value::Number(n as f64), value)
    }

    /// Insert at `pos` (1-based), shifting later elements up
    pub fn insert(&mut self, pos: usize, value: Value) -> LuaResult<()> {
        let len = self.array.len();
        if pos == 0 || pos > len + 1 {
            return Err(LuaError::runtime(
                RuntimeErrorKind::BadArgument,
                "bad argument #2 to 'insert' (position out of bounds)",
            ));
        }
        if pos == len + 1 {
            return self.push(value);
        }
        if value.is_nil() {
            // A nil hole inside the sequence; fall back to element-wise moves
            for i in (pos..=len).rev() {
                let moved = self.array[i - 1].clone();
                self.set(Value::Number((i + 1) as f64), moved)?;
            }
            return self.set(Value::Number(pos as f64), Value::Nil);
        }
        self.array.insert(pos - 1, value);
        let new_key = TableKey::Number(((self.array.len()) as f64).to_bits());
        self.remove_entry(&new_key);
        self.migrate_from_hash();
        Ok(())
    }

    /// Remove the element at `pos` (1-based), shifting later elements down
    pub fn remove(&mut self, pos: usize) -> Value {
        if pos == 0 || pos > self.array.len() {
            return Value::Nil;
        }
        let removed = self.array.remove(pos - 1);
        self.trim_array();
        removed
    }

    /// Iteration step: the entry after `key` (`nil` starts), or `None`
    /// when the traversal is complete.
    pub fn next(&self, key: &Value) -> LuaResult<Option<(Value, Value)>> {
        let mut array_pos = 0;
        let mut hash_pos = 0;

        match key {
            Value::Nil => {}
            _ => match array_index(key) {
                Some(i) if i <= self.array.len() => array_pos = i,
                _ => {
                    let k = TableKey::from_value(key).ok();
                    match k.and_then(|k| self.index.get(&k).copied()) {
                        Some(pos) => {
                            array_pos = self.array.len();
                            hash_pos = pos + 1;
                        }
                        // An array key cleared during traversal shrank the array
                        // part; everything after it is in the hash part
                        None if array_index(key).is_some() => {
                            array_pos = self.array.len();
                        }
                        None => {
                            return Err(LuaError::runtime(
                                RuntimeErrorKind::InvalidKey,
                                "invalid key to 'next'",
                            ));
                        }
                    }
                }
            },
        }

        while array_pos < self.array.len() {
            let value = &self.array[array_pos];
            array_pos += 1;
            if !value.is_nil() {
                return Ok(Some((Value::Number(array_pos as f64), value.clone())));
            }
        }

        while hash_pos < self.entries.len() {
            let (k, v) = &self.entries[hash_pos];
            hash_pos += 1;
            if !v.is_nil() {
                return Ok(Some((k.to_value(), v.clone())));
            }
        }

        Ok(None)
    }

    /// Get the metatable
    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.clone()
    }

    /// Set the metatable
    pub fn set_metatable(&mut self, metatable: Option<TableRef>) {
        self.metatable = metatable;
    }

    fn trim_array(&mut self) {
        while matches!(self.array.last(), Some(Value::Nil)) {
            self.array.pop();
        }
    }

    /// Kill a hash entry (used when its key moves into the array part)
    fn remove_entry(&mut self, key: &TableKey) {
        if let Some(&pos) = self.index.get(key) {
            if !self.entries[pos].1.is_nil() {
                self.entries[pos].1 = Value::Nil;
                self.dead += 1;
            }
        }
    }

    /// Pull `len + 1`, `len + 2`, ... out of the hash part
    fn migrate_from_hash(&mut self) {
        loop {
            let next_key = TableKey::Number(((self.array.len() + 1) as f64).to_bits());
            let pos = match self.index.get(&next_key) {
                Some(&pos) if !self.entries[pos].1.is_nil() => pos,
                _ => break,
            };
            let value = std::mem::replace(&mut self.entries[pos].1, Value::Nil);
            self.dead += 1;
            self.array.push(value);
        }
    }

    /// Drop dead entries once they dominate. Only runs when a new key is
    /// inserted, which is not allowed during traversal anyway.
    fn maybe_compact(&mut self) {
        if self.dead < 8 || self.dead * 2 < self.entries.len() {
            return;
        }
        self.entries.retain(|(_, v)| !v.is_nil());
        self.index.clear();
        for (pos, (k, _)) in self.entries.iter().enumerate() {
            self.index.insert(k.clone(), pos);
        }
        self.dead = 0;
    }
}

/// Shared table handle with reference semantics
#[derive(Clone, Default)]
pub struct TableRef(Rc<RefCell<Table>>);

impl TableRef {
    pub fn new() -> Self {
        TableRef(Rc::new(RefCell::new(Table::new())))
    }

    pub fn from_table(table: Table) -> Self {
        TableRef(Rc::new(RefCell::new(table)))
    }

    pub fn borrow(&self) -> Ref<'_, Table> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Table> {
        self.0.borrow_mut()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &TableRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn get(&self, key: &Value) -> Value {
        self.0.borrow().get(key)
    }

    pub fn get_str(&self, key: &str) -> Value {
        self.0.borrow().get_str(key)
    }

    pub fn set(&self, key: Value, value: Value) -> LuaResult<()> {
        self.0.borrow_mut().set(key, value)
    }

    pub fn set_str(&self, key: &str, value: Value) -> LuaResult<()> {
        self.0.borrow_mut().set_str(key, value)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn next(&self, key: &Value) -> LuaResult<Option<(Value, Value)>> {
        self.0.borrow().next(key)
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.0.borrow().metatable()
    }

    pub fn set_metatable(&self, metatable: Option<TableRef>) {
        self.0.borrow_mut().set_metatable(metatable);
    }
}
