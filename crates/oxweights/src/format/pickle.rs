//! Restricted unpickler for the pickles found inside weight archives.
//!
//! Understands the container opcodes of protocols 0-4 and calls only an allow-list of
//! globals: ordered dicts, the PyTorch tensor rebuilders and NumPy array, dtype and
//! scalar reconstruction. Anything else is refused before it can run.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Result, ZooError};
use crate::format::npy;
use crate::format::torch::TensorSpec;
use crate::weights::{DType, TensorData, WeightEntry};

pub(crate) type Shared<T> = Rc<RefCell<T>>;

#[derive(Debug, Clone)]
pub(crate) struct Global {
    pub module: String,
    pub name: String,
}

/// A PyTorch storage reference; `offset` is in elements (legacy views).
#[derive(Debug, Clone)]
pub(crate) struct Storage {
    pub dtype: DType,
    pub key: String,
    pub offset: usize,
}

/// `numpy.dtype`; BUILD fills in the byte order.
#[derive(Debug, Clone)]
pub(crate) struct NumpyDType {
    pub code: String,
    pub byteorder: char,
}

impl NumpyDType {
    fn descr(&self) -> String {
        format!("{}{}", self.byteorder, self.code)
    }
}

/// `numpy.ndarray` as left by `_reconstruct` + BUILD.
#[derive(Debug, Clone, Default)]
pub(crate) struct NumpyArray {
    pub shape: Vec<usize>,
    pub dtype: Option<NumpyDType>,
    pub fortran_order: bool,
    pub data: Option<Value>,
}

impl NumpyArray {
    pub fn to_entry(&self, name: &str) -> Result<WeightEntry> {
        if self.fortran_order {
            return Err(ZooError::Npy(format!(
                "\"{name}\": Fortran-ordered arrays are not supported"
            )));
        }
        let dtype = self
            .dtype
            .as_ref()
            .ok_or_else(|| ZooError::Pickle(format!("\"{name}\": array without dtype")))?;
        let (dtype, endian) = npy::parse_descr(&dtype.descr())?;
        let Some(Value::Bytes(raw)) = &self.data else {
            return Err(ZooError::Pickle(format!("\"{name}\": array has no raw buffer")));
        };
        let numel: usize = self.shape.iter().product();
        let data = TensorData::decode(dtype, raw, numel, endian)?;
        WeightEntry::new(name, self.shape.clone(), data)
    }

    /// Elements of an object (`|O`) array.
    pub fn objects(&self) -> Result<Vec<Value>> {
        match &self.data {
            Some(Value::List(items)) => Ok(items.borrow().clone()),
            Some(Value::Tuple(items)) => Ok(items.clone()),
            other => Err(ZooError::Pickle(format!(
                "expected object array elements, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Value {
    None,
    Bool(bool),
    Int(i64),
    /// LONG1 wider than 64 bits, little-endian two's complement.
    BigInt(Vec<u8>),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
    List(Shared<Vec<Value>>),
    Dict(Shared<Vec<(Value, Value)>>),
    Global(Global),
    Storage(Storage),
    Tensor(TensorSpec),
    DType(Shared<NumpyDType>),
    Array(Shared<NumpyArray>),
}

impl Value {
    /// Unicode strings, and Python 2 byte strings decoded as UTF-8.
    pub fn text(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    pub fn dict_get(&self, key: &str) -> Option<Value> {
        let Value::Dict(items) = self else {
            return None;
        };
        let items = items.borrow();
        items
            .iter()
            .find(|(k, _)| k.text().as_deref() == Some(key))
            .map(|(_, v)| v.clone())
    }
}

pub(crate) struct PickleMachine<'a> {
    bytes: &'a [u8],
    pos: usize,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value>,
}

/// Run one pickle up to its STOP; returns the value and the bytes it spanned.
pub(crate) fn load(bytes: &[u8]) -> Result<(Value, usize)> {
    let mut machine = PickleMachine::new(bytes);
    let value = machine.run()?;
    Ok((value, machine.pos))
}

impl<'a> PickleMachine<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn run(&mut self) -> Result<Value> {
        loop {
            let op = self.read_u8()?;
            match op {
                // PROTO
                0x80 => {
                    self.read_u8()?;
                }
                // FRAME
                0x95 => {
                    self.take(8)?;
                }
                // GLOBAL: module\nname\n
                b'c' => {
                    let module = self.read_line()?;
                    let name = self.read_line()?;
                    self.stack.push(Value::Global(Global { module, name }));
                }
                // STACK_GLOBAL
                0x93 => {
                    let name = self.pop_text()?;
                    let module = self.pop_text()?;
                    self.stack.push(Value::Global(Global { module, name }));
                }
                b'(' => self.marks.push(self.stack.len()),
                b')' => self.stack.push(Value::Tuple(Vec::new())),
                b'}' => self.stack.push(Value::Dict(Rc::default())),
                b']' => self.stack.push(Value::List(Rc::default())),
                b'N' => self.stack.push(Value::None),
                0x88 => self.stack.push(Value::Bool(true)),
                0x89 => self.stack.push(Value::Bool(false)),
                // BINUNICODE / SHORT_BINUNICODE / BINUNICODE8
                b'X' => {
                    let len = self.read_u32()? as usize;
                    let s = self.read_utf8(len)?;
                    self.stack.push(Value::String(s));
                }
                0x8c => {
                    let len = self.read_u8()? as usize;
                    let s = self.read_utf8(len)?;
                    self.stack.push(Value::String(s));
                }
                0x8d => {
                    let len = self.read_len8()?;
                    let s = self.read_utf8(len)?;
                    self.stack.push(Value::String(s));
                }
                // BINSTRING / SHORT_BINSTRING (Python 2 str) and BINBYTES variants
                b'T' | b'B' => {
                    let len = self.read_u32()? as usize;
                    let b = self.take(len)?.to_vec();
                    self.stack.push(Value::Bytes(b));
                }
                b'U' | b'C' => {
                    let len = self.read_u8()? as usize;
                    let b = self.take(len)?.to_vec();
                    self.stack.push(Value::Bytes(b));
                }
                0x8e => {
                    let len = self.read_len8()?;
                    let b = self.take(len)?.to_vec();
                    self.stack.push(Value::Bytes(b));
                }
                // BININT1 / BININT2 / BININT
                b'K' => {
                    let v = self.read_u8()?;
                    self.stack.push(Value::Int(v as i64));
                }
                b'M' => {
                    let v = u16::from_le_bytes(self.take_array()?);
                    self.stack.push(Value::Int(v as i64));
                }
                b'J' => {
                    let v = i32::from_le_bytes(self.take_array()?);
                    self.stack.push(Value::Int(v as i64));
                }
                // LONG1: little-endian two's complement
                0x8a => {
                    let n = self.read_u8()? as usize;
                    let bytes = self.take(n)?;
                    if n > 8 {
                        self.stack.push(Value::BigInt(bytes.to_vec()));
                    } else {
                        let mut buf = if bytes.last().is_some_and(|b| b & 0x80 != 0) {
                            [0xff; 8]
                        } else {
                            [0; 8]
                        };
                        buf[..n].copy_from_slice(bytes);
                        self.stack.push(Value::Int(i64::from_le_bytes(buf)));
                    }
                }
                // BINFLOAT (big-endian)
                b'G' => {
                    let v = f64::from_be_bytes(self.take_array()?);
                    self.stack.push(Value::Float(v));
                }
                b't' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Tuple(items));
                }
                0x85 => {
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a]));
                }
                0x86 => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a, b]));
                }
                0x87 => {
                    let c = self.pop()?;
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a, b, c]));
                }
                // LIST / DICT from a mark
                b'l' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::List(Rc::new(RefCell::new(items))));
                }
                b'd' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Dict(Rc::default()));
                    self.set_items(items)?;
                }
                // POP / POP_MARK / DUP
                b'0' => {
                    self.pop()?;
                }
                b'1' => {
                    self.pop_mark()?;
                }
                b'2' => {
                    let top = self.peek()?;
                    self.stack.push(top);
                }
                // PUT / BINPUT / LONG_BINPUT / MEMOIZE
                b'p' => {
                    let idx = self.read_decimal()?;
                    self.memo_put(idx)?;
                }
                b'q' => {
                    let idx = self.read_u8()? as u32;
                    self.memo_put(idx)?;
                }
                b'r' => {
                    let idx = self.read_u32()?;
                    self.memo_put(idx)?;
                }
                0x94 => {
                    let idx = self.memo.len() as u32;
                    self.memo_put(idx)?;
                }
                // GET / BINGET / LONG_BINGET
                b'g' => {
                    let idx = self.read_decimal()?;
                    self.memo_get(idx)?;
                }
                b'h' => {
                    let idx = self.read_u8()? as u32;
                    self.memo_get(idx)?;
                }
                b'j' => {
                    let idx = self.read_u32()?;
                    self.memo_get(idx)?;
                }
                // BINPERSID
                b'Q' => {
                    let pid = self.pop()?;
                    let storage = persistent_load(pid)?;
                    self.stack.push(storage);
                }
                // REDUCE
                b'R' => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    let out = reduce(callable, args)?;
                    self.stack.push(out);
                }
                // SETITEM / SETITEMS
                b's' => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.set_items(vec![key, value])?;
                }
                b'u' => {
                    let items = self.pop_mark()?;
                    self.set_items(items)?;
                }
                // APPEND / APPENDS
                b'a' => {
                    let value = self.pop()?;
                    self.append(vec![value])?;
                }
                b'e' => {
                    let items = self.pop_mark()?;
                    self.append(items)?;
                }
                // BUILD: NumPy objects take their state; anything else (tensor
                // `_metadata`, parameter flags) is dropped.
                b'b' => {
                    let state = self.pop()?;
                    match self.stack.last() {
                        Some(Value::Array(array)) => build_array(&mut array.borrow_mut(), state)?,
                        Some(Value::DType(dtype)) => build_dtype(&mut dtype.borrow_mut(), &state),
                        _ => {}
                    }
                }
                // STOP
                b'.' => return self.pop(),
                other => {
                    return Err(ZooError::Pickle(format!(
                        "unsupported opcode 0x{other:02x} at {}",
                        self.pos - 1
                    )));
                }
            }
        }
    }

    fn set_items(&mut self, items: Vec<Value>) -> Result<()> {
        if items.len() % 2 != 0 {
            return Err(ZooError::Pickle("SETITEMS with odd item count".into()));
        }
        let Some(Value::Dict(dict)) = self.stack.last() else {
            return Err(ZooError::Pickle("SETITEM target is not a dict".into()));
        };
        let mut dict = dict.borrow_mut();
        let mut items = items.into_iter();
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            dict.push((key, value));
        }
        Ok(())
    }

    fn append(&mut self, items: Vec<Value>) -> Result<()> {
        let Some(Value::List(list)) = self.stack.last() else {
            return Err(ZooError::Pickle("APPEND target is not a list".into()));
        };
        list.borrow_mut().extend(items);
        Ok(())
    }

    fn memo_put(&mut self, idx: u32) -> Result<()> {
        let top = self.peek()?;
        self.memo.insert(idx, top);
        Ok(())
    }

    fn memo_get(&mut self, idx: u32) -> Result<()> {
        let v = self
            .memo
            .get(&idx)
            .cloned()
            .ok_or_else(|| ZooError::Pickle(format!("missing memo entry {idx}")))?;
        self.stack.push(v);
        Ok(())
    }

    fn peek(&self) -> Result<Value> {
        self.stack
            .last()
            .cloned()
            .ok_or_else(|| ZooError::Pickle("empty stack".into()))
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| ZooError::Pickle("stack underflow".into()))
    }

    fn pop_text(&mut self) -> Result<String> {
        let v = self.pop()?;
        v.text()
            .ok_or_else(|| ZooError::Pickle(format!("expected string, got {v:?}")))
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        let mark = self
            .marks
            .pop()
            .ok_or_else(|| ZooError::Pickle("missing MARK".into()))?;
        if mark > self.stack.len() {
            return Err(ZooError::Pickle("MARK above stack top".into()));
        }
        Ok(self.stack.split_off(mark))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let bytes = self
            .bytes
            .get(self.pos..self.pos.saturating_add(n))
            .ok_or_else(|| ZooError::Pickle("unexpected end of pickle".into()))?;
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    fn read_len8(&mut self) -> Result<usize> {
        let len = u64::from_le_bytes(self.take_array()?);
        usize::try_from(len).map_err(|_| ZooError::Pickle(format!("length {len} overflows")))
    }

    fn read_line(&mut self) -> Result<String> {
        let rest = &self.bytes[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| ZooError::Pickle("line opcode missing newline".into()))?;
        let line = self.read_utf8(len)?;
        self.pos += 1;
        Ok(line)
    }

    fn read_decimal(&mut self) -> Result<u32> {
        let line = self.read_line()?;
        line.trim()
            .parse()
            .map_err(|e| ZooError::Pickle(format!("bad memo index {line:?}: {e}")))
    }

    fn read_utf8(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| ZooError::Pickle(format!("invalid UTF-8: {e}")))
    }
}

fn is_multiarray(module: &str) -> bool {
    matches!(module, "numpy.core.multiarray" | "numpy._core.multiarray")
}

fn reduce(callable: Value, args: Value) -> Result<Value> {
    let Value::Global(global) = callable else {
        return Err(ZooError::Pickle("REDUCE on a non-global callable".into()));
    };
    let Value::Tuple(args) = args else {
        return Err(ZooError::Pickle("REDUCE args are not a tuple".into()));
    };

    match (global.module.as_str(), global.name.as_str()) {
        ("collections", "OrderedDict") | ("builtins" | "__builtin__", "dict") => {
            Ok(Value::Dict(Rc::default()))
        }
        // (storage, storage_offset, size, stride[, requires_grad, backward_hooks, metadata])
        ("torch._utils", "_rebuild_tensor_v2") | ("torch._utils", "_rebuild_tensor") => {
            if args.len() < 4 {
                return Err(ZooError::Pickle(format!(
                    "{} expects at least 4 args, got {}",
                    global.name,
                    args.len()
                )));
            }
            let Value::Storage(storage) = &args[0] else {
                return Err(ZooError::Pickle("tensor rebuilt from a non-storage".into()));
            };
            Ok(Value::Tensor(TensorSpec {
                dtype: storage.dtype,
                shape: usize_tuple(&args[2])?,
                stride: usize_tuple(&args[3])?,
                storage_key: storage.key.clone(),
                storage_offset: storage.offset + as_usize(&args[1])?,
            }))
        }
        ("torch._utils", "_rebuild_parameter") => args
            .into_iter()
            .next()
            .ok_or_else(|| ZooError::Pickle("_rebuild_parameter without a tensor".into())),
        // `_reconstruct(ndarray, (0,), b'b')`: an empty shell filled in by BUILD
        (module, "_reconstruct") if is_multiarray(module) => Ok(Value::Array(Rc::default())),
        ("numpy", "dtype") => {
            let code = args
                .first()
                .and_then(Value::text)
                .ok_or_else(|| ZooError::Pickle("numpy.dtype without a type code".into()))?;
            Ok(Value::DType(Rc::new(RefCell::new(NumpyDType {
                code,
                byteorder: '|',
            }))))
        }
        (module, "scalar") if is_multiarray(module) => scalar(&args),
        // Python 3 writing protocol 2 spells bytes as `_codecs.encode(str, 'latin1')`.
        ("_codecs", "encode") => {
            let text = args
                .first()
                .and_then(Value::text)
                .ok_or_else(|| ZooError::Pickle("_codecs.encode without text".into()))?;
            Ok(Value::Bytes(text.chars().map(|c| c as u32 as u8).collect()))
        }
        ("builtins" | "__builtin__", "bytes") if args.is_empty() => Ok(Value::Bytes(Vec::new())),
        (module, name) => Err(ZooError::Pickle(format!(
            "refusing to call {module}.{name}"
        ))),
    }
}

/// `(version, shape, dtype, is_fortran, data)`; `version` may be absent.
fn build_array(array: &mut NumpyArray, state: Value) -> Result<()> {
    let Value::Tuple(mut items) = state else {
        return Err(ZooError::Pickle("ndarray state is not a tuple".into()));
    };
    if items.len() == 5 {
        items.remove(0);
    }
    let [shape, dtype, fortran, data]: [Value; 4] = items
        .try_into()
        .map_err(|_| ZooError::Pickle("ndarray state has the wrong arity".into()))?;
    array.shape = usize_tuple(&shape)?;
    array.dtype = match dtype {
        Value::DType(dtype) => Some(dtype.borrow().clone()),
        other => {
            return Err(ZooError::Pickle(format!("ndarray dtype is {other:?}")));
        }
    };
    array.fortran_order = matches!(fortran, Value::Bool(true) | Value::Int(1));
    array.data = Some(data);
    Ok(())
}

/// `(version, byteorder, ...)`
fn build_dtype(dtype: &mut NumpyDType, state: &Value) {
    if let Value::Tuple(items) = state {
        if let Some(order) = items.get(1).and_then(Value::text).and_then(|s| s.chars().next()) {
            dtype.byteorder = order;
        }
    }
}

/// String scalars; numeric scalars never appear as names.
fn scalar(args: &[Value]) -> Result<Value> {
    let (Some(Value::DType(dtype)), Some(Value::Bytes(raw))) = (args.first(), args.get(1)) else {
        return Err(ZooError::Pickle("numpy scalar needs (dtype, bytes)".into()));
    };
    let code = dtype.borrow().code.clone();
    let text = match code.chars().next() {
        Some('S') => {
            let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            String::from_utf8_lossy(&raw[..end]).into_owned()
        }
        Some('U') => raw
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .take_while(|&c| c != 0)
            .filter_map(char::from_u32)
            .collect(),
        _ => {
            return Err(ZooError::UnsupportedDType(format!("numpy scalar of type {code}")));
        }
    };
    Ok(Value::String(text))
}

/// `('storage', storage_type, key, location, numel[, view_metadata])`
fn persistent_load(pid: Value) -> Result<Value> {
    let Value::Tuple(items) = pid else {
        return Err(ZooError::Pickle("persistent id is not a tuple".into()));
    };
    let kind = items.first().and_then(Value::text);
    let key = items.get(2).and_then(Value::text);
    match (kind.as_deref(), items.get(1), key) {
        (Some("storage"), Some(Value::Global(storage_type)), Some(key)) => {
            let dtype = match (storage_type.module.as_str(), storage_type.name.as_str()) {
                ("torch", "FloatStorage") => DType::F32,
                ("torch", "DoubleStorage") => DType::F64,
                ("torch", "HalfStorage") => DType::F16,
                ("torch", "LongStorage") => DType::I64,
                ("torch", "IntStorage") => DType::I32,
                ("torch", "ByteStorage") => DType::U8,
                ("torch", "BoolStorage") => DType::Bool,
                (module, name) => {
                    return Err(ZooError::UnsupportedDType(format!("{module}.{name}")));
                }
            };
            // Legacy views: (view_key, offset, size) into the root storage.
            let offset = match items.get(5) {
                Some(Value::Tuple(view)) => view.get(1).map(as_usize).transpose()?.unwrap_or(0),
                _ => 0,
            };
            Ok(Value::Storage(Storage { dtype, key, offset }))
        }
        _ => Err(ZooError::Pickle(format!(
            "unsupported persistent id {items:?}"
        ))),
    }
}

pub(crate) fn as_usize(v: &Value) -> Result<usize> {
    match v {
        Value::Int(i) => usize::try_from(*i)
            .map_err(|_| ZooError::Pickle(format!("expected non-negative int, got {i}"))),
        other => Err(ZooError::Pickle(format!("expected int, got {other:?}"))),
    }
}

fn usize_tuple(v: &Value) -> Result<Vec<usize>> {
    let Value::Tuple(items) = v else {
        return Err(ZooError::Pickle(format!("expected tuple, got {v:?}")));
    };
    items.iter().map(as_usize).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Protocol-2 byte streams shaped like the ones Python writes.

    pub struct Pickler {
        out: Vec<u8>,
    }

    impl Pickler {
        pub fn new() -> Self {
            Self { out: vec![0x80, 2] }
        }

        pub fn op(&mut self, bytes: &[u8]) -> &mut Self {
            self.out.extend_from_slice(bytes);
            self
        }

        pub fn global(&mut self, module: &str, name: &str) -> &mut Self {
            self.out.push(b'c');
            self.out
                .extend_from_slice(format!("{module}\n{name}\n").as_bytes());
            self
        }

        pub fn unicode(&mut self, s: &str) -> &mut Self {
            self.out.push(b'X');
            self.out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            self.out.extend_from_slice(s.as_bytes());
            self
        }

        /// Python 2 `str`.
        pub fn bytes(&mut self, b: &[u8]) -> &mut Self {
            self.out.push(b'T');
            self.out.extend_from_slice(&(b.len() as u32).to_le_bytes());
            self.out.extend_from_slice(b);
            self
        }

        pub fn int(&mut self, v: i64) -> &mut Self {
            self.out.push(b'J');
            self.out.extend_from_slice(&(v as i32).to_le_bytes());
            self
        }

        pub fn int_tuple(&mut self, values: &[usize]) -> &mut Self {
            self.out.push(b'(');
            for &v in values {
                self.int(v as i64);
            }
            self.out.push(b't');
            self
        }

        fn dtype(&mut self, code: &str, byteorder: &str) -> &mut Self {
            self.global("numpy", "dtype")
                .bytes(code.as_bytes())
                .op(&[b'K', 0, b'K', 1, 0x87, b'R', b'('])
                .int(3)
                .bytes(byteorder.as_bytes())
                .op(b"NNN")
                .int(-1)
                .int(-1)
                .int(0)
                .op(b"tb")
        }

        fn reconstruct(&mut self) -> &mut Self {
            self.global("numpy.core.multiarray", "_reconstruct")
                .global("numpy", "ndarray")
                .op(&[b'K', 0, 0x85])
                .bytes(b"b")
                .op(&[0x87, b'R', b'('])
                .int(1)
        }

        /// `np.array(values, dtype='<f4').reshape(shape)`
        pub fn ndarray_f32(&mut self, shape: &[usize], values: &[f32]) -> &mut Self {
            let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            self.reconstruct()
                .int_tuple(shape)
                .dtype("f4", "<")
                .op(&[0x89])
                .bytes(&raw)
                .op(b"tb")
        }

        /// One-dimensional object array; `items` pushes each element.
        pub fn object_array(&mut self, len: usize, items: impl FnOnce(&mut Self)) -> &mut Self {
            self.reconstruct()
                .int_tuple(&[len])
                .dtype("O8", "|")
                .op(&[0x89, b']', b'(']);
            items(self);
            self.op(b"etb")
        }

        pub fn finish(&mut self) -> Vec<u8> {
            self.out.push(b'.');
            std::mem::take(&mut self.out)
        }
    }
}
