//! Runtime values of the interpreter

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use num_bigint::{BigInt, Sign};
use num_traits::FromPrimitive;

use crate::engine::exceptions::{raise, ExcKind, ExceptionValue, Exec};
use crate::engine::generator::Generator;
use crate::engine::integer;
use crate::engine::scope::Scope;
use crate::parser::ast::FunctionDef;

/// Containers refuse to grow past this many items
pub const MAX_ITEMS: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    /// An int outside the `i64` range
    Long(Rc<BigInt>),
    Float(f64),
    Complex(f64, f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<Table>>),
    Set(Rc<RefCell<Table>>),
    FrozenSet(Rc<Table>),
    Range(RangeValue),
    Slice(Rc<SliceValue>),
    Iterator(Rc<RefCell<IterState>>),
    View(Rc<DictView>),
    Function(Rc<Function>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    Type(TypeKind),
    Exception(Rc<ExceptionValue>),
    Object(Rc<ObjectIdentity>),
    Ellipsis,
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", crate::engine::format::repr(self))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::from(items))
    }

    pub fn dict(table: Table) -> Value {
        Value::Dict(Rc::new(RefCell::new(table)))
    }

    pub fn set(table: Table) -> Value {
        Value::Set(Rc::new(RefCell::new(table)))
    }

    pub fn bytes(data: Vec<u8>) -> Value {
        Value::Bytes(Rc::from(data))
    }

    pub fn iterator(state: IterState) -> Value {
        Value::Iterator(Rc::new(RefCell::new(state)))
    }

    pub fn type_kind(&self) -> TypeKind {
        match self {
            Value::None => TypeKind::NoneType,
            Value::Bool(_) => TypeKind::Bool,
            Value::Int(_) | Value::Long(_) => TypeKind::Int,
            Value::Float(_) => TypeKind::Float,
            Value::Complex(..) => TypeKind::Complex,
            Value::Str(_) => TypeKind::Str,
            Value::Bytes(_) => TypeKind::Bytes,
            Value::List(_) => TypeKind::List,
            Value::Tuple(_) => TypeKind::Tuple,
            Value::Dict(_) => TypeKind::Dict,
            Value::Set(_) => TypeKind::Set,
            Value::FrozenSet(_) => TypeKind::FrozenSet,
            Value::Range(_) => TypeKind::Range,
            Value::Slice(_) => TypeKind::Slice,
            Value::Iterator(state) => TypeKind::Iterator(state.borrow().type_name()),
            Value::View(view) => TypeKind::Iterator(view.kind.type_name()),
            Value::Function(_) => TypeKind::Function,
            Value::Builtin(_) => TypeKind::BuiltinFunction,
            Value::Method(method) => match method.receiver {
                Value::Function(_) => TypeKind::Method,
                _ => TypeKind::BuiltinFunction,
            },
            Value::Type(_) => TypeKind::Type,
            Value::Exception(exc) => TypeKind::Exception(exc.kind),
            Value::Object(_) => TypeKind::Object,
            Value::Ellipsis => TypeKind::Ellipsis,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_kind().name()
    }

    /// Python's `is`
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) | (Value::Ellipsis, Value::Ellipsis) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => Rc::ptr_eq(a, b),
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Bytes(a), Value::Bytes(b)) => Rc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b) || (a.is_empty() && b.is_empty()),
            (Value::Dict(a), Value::Dict(b)) | (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::FrozenSet(a), Value::FrozenSet(b)) => Rc::ptr_eq(a, b),
            (Value::Slice(a), Value::Slice(b)) => Rc::ptr_eq(a, b),
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            (Value::View(a), Value::View(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// A stable identity number for `id()`
    pub fn identity(&self) -> i64 {
        fn addr<T: ?Sized>(rc: &Rc<T>) -> i64 {
            Rc::as_ptr(rc) as *const u8 as usize as i64
        }
        match self {
            Value::None => 0x1000,
            Value::Ellipsis => 0x1010,
            Value::Bool(b) => 0x1020 + *b as i64 * 16,
            Value::Int(i) => 0x10_0000_0000i64.wrapping_add(i.wrapping_mul(32)),
            Value::Long(n) => addr(n),
            Value::Float(f) => 0x20_0000_0000i64.wrapping_add((f.to_bits() >> 4) as i64),
            Value::Complex(re, im) => 0x30_0000_0000i64
                .wrapping_add((re.to_bits() >> 4) as i64 ^ (im.to_bits() >> 8) as i64),
            Value::Str(s) => addr(s),
            Value::Bytes(b) => addr(b),
            Value::List(l) => addr(l),
            Value::Tuple(t) => addr(t),
            Value::Dict(d) | Value::Set(d) => addr(d),
            Value::FrozenSet(s) => addr(s),
            Value::Range(r) => 0x40_0000_0000i64 ^ r.start ^ (r.stop << 8) ^ (r.step << 16),
            Value::Slice(s) => addr(s),
            Value::Iterator(i) => addr(i),
            Value::View(v) => addr(v),
            Value::Function(f) => addr(f),
            Value::Builtin(b) => 0x50_0000_0000i64 + b.ordinal() as i64 * 32,
            Value::Method(m) => addr(m),
            Value::Type(t) => 0x60_0000_0000i64 + t.ordinal() as i64 * 32,
            Value::Exception(e) => addr(e),
            Value::Object(o) => addr(o),
        }
    }

    /// Key used for dict and set membership
    pub fn hash_key(&self) -> Exec<HashKey> {
        let key = match self {
            Value::None => HashKey::None,
            Value::Ellipsis => HashKey::Ellipsis,
            Value::Bool(b) => HashKey::Int(*b as i64),
            Value::Int(i) => HashKey::Int(*i),
            Value::Long(n) => HashKey::Long((**n).clone()),
            Value::Float(f) => float_key(*f),
            Value::Complex(re, im) => {
                if *im == 0.0 {
                    float_key(*re)
                } else {
                    HashKey::Complex(re.to_bits(), im.to_bits())
                }
            }
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Bytes(b) => HashKey::Bytes(b.clone()),
            Value::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(Value::hash_key)
                    .collect::<Exec<Vec<_>>>()?,
            ),
            Value::FrozenSet(table) => {
                let mut keys: Vec<HashKey> = table.hash_keys().cloned().collect();
                keys.sort();
                HashKey::FrozenSet(keys)
            }
            Value::Range(r) => HashKey::Range(r.start, r.stop, r.step),
            Value::Type(kind) => HashKey::Type(*kind),
            Value::Builtin(b) => HashKey::Builtin(*b),
            Value::List(_)
            | Value::Dict(_)
            | Value::Set(_)
            | Value::Slice(_)
            | Value::View(_) => {
                return raise(
                    ExcKind::TypeError,
                    format!("unhashable type: '{}'", self.type_name()),
                )
            }
            Value::Iterator(_)
            | Value::Function(_)
            | Value::Method(_)
            | Value::Exception(_)
            | Value::Object(_) => HashKey::Identity(self.identity()),
        };
        Ok(key)
    }

    /// Python's `hash()`
    pub fn hash_value(&self) -> Exec<i64> {
        use std::hash::{Hash, Hasher};
        let key = self.hash_key()?;
        let hash = match key {
            HashKey::Int(i) => integer::hash_small(i),
            HashKey::Long(n) => integer::hash(&n),
            other => {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                other.hash(&mut hasher);
                (hasher.finish() >> 1) as i64
            }
        };
        Ok(hash)
    }
}

fn float_key(f: f64) -> HashKey {
    if f.fract() != 0.0 || !f.is_finite() {
        return HashKey::Float(f.to_bits());
    }
    if f.abs() < 9.2e18 {
        return HashKey::Int(f as i64);
    }
    match BigInt::from_f64(f) {
        Some(n) => HashKey::Long(n),
        None => HashKey::Float(f.to_bits()),
    }
}

/// Normalized key so that values comparing equal share one key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashKey {
    None,
    Ellipsis,
    Int(i64),
    Long(BigInt),
    Float(u64),
    Complex(u64, u64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Vec<HashKey>),
    FrozenSet(Vec<HashKey>),
    Range(i64, i64, i64),
    Type(TypeKind),
    Builtin(Builtin),
    Identity(i64),
}

// ============================================================================
// Ordered hash table backing dict, set and frozenset
// ============================================================================

/// Insertion-ordered table; sets store `None` as every value
#[derive(Clone, Default)]
pub struct Table {
    entries: Vec<(HashKey, Value, Value)>,
    index: HashMap<HashKey, usize>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &HashKey) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].2)
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or overwrite; an existing entry keeps its original key object
    pub fn insert(&mut self, hash: HashKey, key: Value, value: Value) {
        match self.index.get(&hash) {
            Some(&i) => self.entries[i].2 = value,
            None => {
                self.index.insert(hash.clone(), self.entries.len());
                self.entries.push((hash, key, value));
            }
        }
    }

    pub fn remove(&mut self, hash: &HashKey) -> Option<(Value, Value)> {
        let pos = self.index.remove(hash)?;
        let (_, key, value) = self.entries.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some((key, value))
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        let (hash, key, value) = self.entries.pop()?;
        self.index.remove(&hash);
        Some((key, value))
    }

    pub fn pop_first(&mut self) -> Option<(Value, Value)> {
        let hash = self.entries.first()?.0.clone();
        self.remove(&hash)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn entry_at(&self, i: usize) -> Option<(&Value, &Value)> {
        self.entries.get(i).map(|(_, k, v)| (k, v))
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &Value> {
        self.entries.iter().map(|(_, k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, _, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(_, k, v)| (k, v))
    }

    pub fn hash_keys(&self) -> impl Iterator<Item = &HashKey> {
        self.entries.iter().map(|(h, _, _)| h)
    }

    /// Add a set member
    pub fn add(&mut self, key: Value) -> Exec<()> {
        let hash = key.hash_key()?;
        if !self.contains(&hash) {
            self.insert(hash, key, Value::None);
        }
        Ok(())
    }

    pub fn from_keys(keys: impl IntoIterator<Item = Value>) -> Exec<Table> {
        let mut table = Table::new();
        for key in keys {
            table.add(key)?;
        }
        Ok(table)
    }
}

// ============================================================================
// Other value payloads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    /// Number of elements; up to `2**64 - 1`, more than `len()` may report
    pub fn count(&self) -> u64 {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let n = if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && start > stop {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };
        n as u64
    }

    /// Element count for iteration, saturated to `usize`
    pub fn len(&self) -> usize {
        usize::try_from(self.count()).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Element at a position below [`RangeValue::count`]
    pub fn get(&self, index: u64) -> i64 {
        let value = self.start as i128 + self.step as i128 * index as i128;
        // every in-bounds element lies between start and stop
        value as i64
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && (value as i128 - self.start as i128) % self.step as i128 == 0
    }
}

pub struct SliceValue {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

impl SliceValue {
    /// Resolve against a sequence length, like `slice.indices`
    pub fn indices(&self, len: usize) -> Exec<(i64, i64, i64)> {
        let (start, stop, step) = self.wide_indices(len as i128)?;
        // bounds stay within -1..=len
        Ok((start as i64, stop as i64, step as i64))
    }

    /// [`SliceValue::indices`] for lengths past `i64::MAX`, such as huge ranges
    pub fn wide_indices(&self, len: i128) -> Exec<(i128, i128, i128)> {
        let step = match slice_index(&self.step)? {
            None => 1,
            Some(0) => return raise(ExcKind::ValueError, "slice step cannot be zero"),
            Some(s) => s as i128,
        };
        let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
        let clamp = |value: Option<i64>, default: i128| -> i128 {
            match value {
                None => default,
                Some(v) if v < 0 => (v as i128 + len).max(lower),
                Some(v) => (v as i128).min(upper),
            }
        };
        let start = clamp(slice_index(&self.start)?, if step < 0 { upper } else { lower });
        let stop = clamp(slice_index(&self.stop)?, if step < 0 { lower } else { upper });
        Ok((start, stop, step))
    }
}

/// Positions selected by resolved slice bounds
pub fn slice_positions(start: i64, stop: i64, step: i64) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut i = start;
    if step > 0 {
        while i < stop {
            positions.push(i as usize);
            i += step;
        }
    } else {
        while i > stop {
            positions.push(i as usize);
            i += step;
        }
    }
    positions
}

fn slice_index(value: &Value) -> Exec<Option<i64>> {
    match value {
        Value::None => Ok(None),
        Value::Int(i) => Ok(Some(*i)),
        Value::Bool(b) => Ok(Some(*b as i64)),
        // wider than any sequence, so saturating keeps the clamped bounds
        Value::Long(n) => Ok(Some(match n.sign() {
            Sign::Minus => i64::MIN,
            _ => i64::MAX,
        })),
        _ => raise(
            ExcKind::TypeError,
            "slice indices must be integers or None or have an __index__ method",
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Keys,
    Values,
    Items,
}

impl ViewKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ViewKind::Keys => "dict_keys",
            ViewKind::Values => "dict_values",
            ViewKind::Items => "dict_items",
        }
    }
}

/// Live view over a dict
pub struct DictView {
    pub dict: Rc<RefCell<Table>>,
    pub kind: ViewKind,
}

/// A user function together with its evaluated defaults
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub qualname: String,
    pub defaults: Vec<Option<Value>>,
    pub kw_defaults: Vec<Option<Value>>,
    /// Scope of the enclosing function, if any
    pub closure: Option<Rc<Scope>>,
}

/// A method looked up on a receiver, called later
pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

/// Payload of `object()`
#[derive(Debug, Default)]
pub struct ObjectIdentity {
    _private: (),
}

/// Iterator state; advancing lives in the interpreter because some kinds call
/// back into user functions
pub enum IterState {
    Sequence { seq: Value, index: usize },
    Range { next: i64, remaining: usize, step: i64 },
    Table {
        table: Rc<RefCell<Table>>,
        index: usize,
        size: usize,
        kind: ViewKind,
        is_set: bool,
    },
    Snapshot { items: Vec<Value>, index: usize, name: &'static str },
    Enumerate { inner: Value, count: i64 },
    Map { func: Value, iters: Vec<Value> },
    Filter { func: Value, inner: Value },
    Zip { iters: Vec<Value> },
    Reversed { seq: Value, remaining: usize },
    /// A suspended call of a function whose body yields
    Generator { qualname: String, body: Rc<RefCell<Generator>> },
}

impl IterState {
    pub fn type_name(&self) -> &'static str {
        match self {
            IterState::Sequence { seq, .. } => match seq {
                Value::List(_) => "list_iterator",
                Value::Tuple(_) => "tuple_iterator",
                Value::Str(_) => "str_ascii_iterator",
                Value::Bytes(_) => "bytes_iterator",
                _ => "iterator",
            },
            IterState::Range { .. } => "range_iterator",
            IterState::Table { is_set: true, .. } => "set_iterator",
            IterState::Table { kind, .. } => match kind {
                ViewKind::Keys => "dict_keyiterator",
                ViewKind::Values => "dict_valueiterator",
                ViewKind::Items => "dict_itemiterator",
            },
            IterState::Snapshot { name, .. } => name,
            IterState::Enumerate { .. } => "enumerate",
            IterState::Map { .. } => "map",
            IterState::Filter { .. } => "filter",
            IterState::Zip { .. } => "zip",
            IterState::Generator { .. } => "generator",
            IterState::Reversed { seq, .. } => match seq {
                Value::List(_) => "list_reverseiterator",
                _ => "reversed",
            },
        }
    }
}

// ============================================================================
// Built-in functions and types
// ============================================================================

/// Built-in functions that are not types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Builtin {
    Abs,
    All,
    Any,
    Chr,
    Dir,
    Divmod,
    Enumerate,
    Filter,
    Format,
    Getattr,
    Hasattr,
    Hash,
    Hex,
    Id,
    Input,
    Isinstance,
    Issubclass,
    Iter,
    Len,
    Map,
    Max,
    Min,
    Next,
    Oct,
    Ord,
    Pow,
    Print,
    Repr,
    Reversed,
    Round,
    Sorted,
    Sum,
    Vars,
    Zip,
}

impl Builtin {
    pub const ALL: [Builtin; 34] = [
        Builtin::Abs,
        Builtin::All,
        Builtin::Any,
        Builtin::Chr,
        Builtin::Dir,
        Builtin::Divmod,
        Builtin::Enumerate,
        Builtin::Filter,
        Builtin::Format,
        Builtin::Getattr,
        Builtin::Hasattr,
        Builtin::Hash,
        Builtin::Hex,
        Builtin::Id,
        Builtin::Input,
        Builtin::Isinstance,
        Builtin::Issubclass,
        Builtin::Iter,
        Builtin::Len,
        Builtin::Map,
        Builtin::Max,
        Builtin::Min,
        Builtin::Next,
        Builtin::Oct,
        Builtin::Ord,
        Builtin::Pow,
        Builtin::Print,
        Builtin::Repr,
        Builtin::Reversed,
        Builtin::Round,
        Builtin::Sorted,
        Builtin::Sum,
        Builtin::Vars,
        Builtin::Zip,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Abs => "abs",
            Builtin::All => "all",
            Builtin::Any => "any",
            Builtin::Chr => "chr",
            Builtin::Dir => "dir",
            Builtin::Divmod => "divmod",
            Builtin::Enumerate => "enumerate",
            Builtin::Filter => "filter",
            Builtin::Format => "format",
            Builtin::Getattr => "getattr",
            Builtin::Hasattr => "hasattr",
            Builtin::Hash => "hash",
            Builtin::Hex => "hex",
            Builtin::Id => "id",
            Builtin::Input => "input",
            Builtin::Isinstance => "isinstance",
            Builtin::Issubclass => "issubclass",
            Builtin::Iter => "iter",
            Builtin::Len => "len",
            Builtin::Map => "map",
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::Next => "next",
            Builtin::Oct => "oct",
            Builtin::Ord => "ord",
            Builtin::Pow => "pow",
            Builtin::Print => "print",
            Builtin::Repr => "repr",
            Builtin::Reversed => "reversed",
            Builtin::Round => "round",
            Builtin::Sorted => "sorted",
            Builtin::Sum => "sum",
            Builtin::Vars => "vars",
            Builtin::Zip => "zip",
        }
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        Builtin::ALL.iter().copied().find(|b| b.name() == name)
    }

    fn ordinal(&self) -> usize {
        *self as usize
    }
}

/// Type objects reachable at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeKind {
    NoneType,
    Bool,
    Int,
    Float,
    Complex,
    Str,
    Bytes,
    List,
    Tuple,
    Dict,
    Set,
    FrozenSet,
    Range,
    Slice,
    Object,
    Type,
    Function,
    BuiltinFunction,
    Method,
    Ellipsis,
    Iterator(&'static str),
    Exception(ExcKind),
}

impl TypeKind {
    pub fn name(&self) -> &'static str {
        match self {
            TypeKind::NoneType => "NoneType",
            TypeKind::Bool => "bool",
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::Complex => "complex",
            TypeKind::Str => "str",
            TypeKind::Bytes => "bytes",
            TypeKind::List => "list",
            TypeKind::Tuple => "tuple",
            TypeKind::Dict => "dict",
            TypeKind::Set => "set",
            TypeKind::FrozenSet => "frozenset",
            TypeKind::Range => "range",
            TypeKind::Slice => "slice",
            TypeKind::Object => "object",
            TypeKind::Type => "type",
            TypeKind::Function => "function",
            TypeKind::BuiltinFunction => "builtin_function_or_method",
            TypeKind::Method => "method",
            TypeKind::Ellipsis => "ellipsis",
            TypeKind::Iterator(name) => name,
            TypeKind::Exception(kind) => kind.name(),
        }
    }

    /// Types that user code can name and call
    pub fn from_name(name: &str) -> Option<TypeKind> {
        let kind = match name {
            "bool" => TypeKind::Bool,
            "int" => TypeKind::Int,
            "float" => TypeKind::Float,
            "complex" => TypeKind::Complex,
            "str" => TypeKind::Str,
            "bytes" => TypeKind::Bytes,
            "list" => TypeKind::List,
            "tuple" => TypeKind::Tuple,
            "dict" => TypeKind::Dict,
            "set" => TypeKind::Set,
            "frozenset" => TypeKind::FrozenSet,
            "range" => TypeKind::Range,
            "slice" => TypeKind::Slice,
            "object" => TypeKind::Object,
            "type" => TypeKind::Type,
            other => TypeKind::Exception(ExcKind::from_name(other)?),
        };
        Some(kind)
    }

    /// Direct base class, following Python's hierarchy
    pub fn base(&self) -> Option<TypeKind> {
        match self {
            TypeKind::Object => None,
            TypeKind::Bool => Some(TypeKind::Int),
            TypeKind::Exception(kind) => Some(match kind.parent() {
                Some(parent) => TypeKind::Exception(parent),
                None => TypeKind::Object,
            }),
            _ => Some(TypeKind::Object),
        }
    }

    pub fn is_subclass_of(&self, other: &TypeKind) -> bool {
        let mut current = Some(*self);
        while let Some(kind) = current {
            if kind == *other {
                return true;
            }
            current = kind.base();
        }
        false
    }

    fn ordinal(&self) -> usize {
        match self {
            TypeKind::Iterator(name) => 100 + name.len(),
            TypeKind::Exception(kind) => 200 + *kind as usize,
            other => {
                let order = [
                    TypeKind::NoneType,
                    TypeKind::Bool,
                    TypeKind::Int,
                    TypeKind::Float,
                    TypeKind::Complex,
                    TypeKind::Str,
                    TypeKind::Bytes,
                    TypeKind::List,
                    TypeKind::Tuple,
                    TypeKind::Dict,
                    TypeKind::Set,
                    TypeKind::FrozenSet,
                    TypeKind::Range,
                    TypeKind::Slice,
                    TypeKind::Object,
                    TypeKind::Type,
                    TypeKind::Function,
                    TypeKind::BuiltinFunction,
                    TypeKind::Method,
                    TypeKind::Ellipsis,
                ];
                order.iter().position(|k| k == other).unwrap_or(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_keys_coincide() {
        let one = Value::Int(1).hash_key().unwrap();
        assert_eq!(one, Value::Float(1.0).hash_key().unwrap());
        assert_eq!(one, Value::Bool(true).hash_key().unwrap());
        assert_ne!(one, Value::Float(1.5).hash_key().unwrap());
    }

    #[test]
    fn test_wide_int_keys_coincide_with_floats() {
        let wide = integer::normalize(BigInt::from(1u128 << 70));
        let key = wide.hash_key().unwrap();
        assert_eq!(key, Value::Float(2f64.powi(70)).hash_key().unwrap());
        assert_eq!(wide.hash_value().unwrap(), Value::Float(2f64.powi(70)).hash_value().unwrap());
        assert_eq!(Value::Int(-1).hash_value().unwrap(), -2);
    }

    #[test]
    fn test_unhashable_list() {
        assert!(Value::list(vec![]).hash_key().is_err());
        assert!(Value::tuple(vec![Value::list(vec![])]).hash_key().is_err());
    }

    #[test]
    fn test_table_keeps_insertion_order() {
        let mut table = Table::new();
        for name in ["b", "a", "c"] {
            let key = Value::from(name);
            table.insert(key.hash_key().unwrap(), key, Value::Int(1));
        }
        table.remove(&Value::from("a").hash_key().unwrap());
        let keys: Vec<String> = table
            .keys()
            .map(|k| crate::engine::format::str_value(k))
            .collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert!(table.contains(&Value::from("c").hash_key().unwrap()));
    }

    #[test]
    fn test_range_len_and_contains() {
        let r = RangeValue { start: 10, stop: 0, step: -3 };
        assert_eq!(r.len(), 4);
        assert!(r.contains(4));
        assert!(!r.contains(5));
        assert_eq!(RangeValue { start: 0, stop: 0, step: 1 }.len(), 0);
    }

    #[test]
    fn test_full_width_range() {
        let r = RangeValue {
            start: i64::MIN,
            stop: i64::MAX,
            step: 1,
        };
        assert_eq!(r.count(), u64::MAX);
        assert_eq!(r.get(u64::MAX - 1), i64::MAX - 1);
        assert!(r.contains(i64::MAX - 1));
        assert!(!r.contains(i64::MAX));
        let stepped = RangeValue {
            start: i64::MAX,
            stop: i64::MIN,
            step: -3,
        };
        assert!(stepped.contains(i64::MAX - 3 * 1000));
        assert!(!stepped.contains(0));
    }

    #[test]
    fn test_slice_indices() {
        let s = SliceValue {
            start: Value::None,
            stop: Value::None,
            step: Value::Int(-1),
        };
        assert_eq!(s.indices(5).unwrap(), (4, -1, -1));
        assert_eq!(slice_positions(4, -1, -1), vec![4, 3, 2, 1, 0]);

        let s = SliceValue {
            start: Value::Int(-2),
            stop: Value::Int(100),
            step: Value::None,
        };
        assert_eq!(s.indices(5).unwrap(), (3, 5, 1));
    }

    #[test]
    fn test_bool_is_subclass_of_int() {
        assert!(TypeKind::Bool.is_subclass_of(&TypeKind::Int));
        assert!(TypeKind::Exception(ExcKind::ZeroDivisionError)
            .is_subclass_of(&TypeKind::Exception(ExcKind::Exception)));
        assert!(!TypeKind::Exception(ExcKind::SystemExit)
            .is_subclass_of(&TypeKind::Exception(ExcKind::Exception)));
    }
}
