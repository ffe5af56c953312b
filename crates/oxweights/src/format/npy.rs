use crate::error::{Result, ZooError};
use crate::format::pickle::{self, Value};
use crate::weights::{DType, Endian, TensorData, WeightEntry};

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// What one array element is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Numeric(DType, Endian),
    /// `|O`: the payload is a pickle of the whole array.
    Object,
}

/// Decoded `.npy` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    pub element: Element,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
}

/// A `.npy` payload: a plain array, or the elements of an object array.
#[derive(Debug)]
pub(crate) enum NpyContents {
    Array(WeightEntry),
    Objects(Vec<Value>),
}

/// Parse a complete numeric `.npy` file held in memory into a named entry.
pub fn read_npy(name: &str, bytes: &[u8]) -> Result<WeightEntry> {
    match read_npy_contents(name, bytes)? {
        NpyContents::Array(entry) => Ok(entry),
        NpyContents::Objects(_) => Err(ZooError::UnsupportedDType(format!(
            "\"{name}\" is an object array"
        ))),
    }
}

pub(crate) fn read_npy_contents(name: &str, bytes: &[u8]) -> Result<NpyContents> {
    let (header, data_offset) = parse_header(bytes)?;
    if header.fortran_order {
        return Err(ZooError::Npy(format!(
            "\"{name}\": Fortran-ordered arrays are not supported"
        )));
    }
    let payload = &bytes[data_offset..];
    match header.element {
        Element::Numeric(dtype, endian) => {
            let numel: usize = header.shape.iter().product();
            let data = TensorData::decode(dtype, payload, numel, endian)?;
            WeightEntry::new(name, header.shape, data).map(NpyContents::Array)
        }
        Element::Object => {
            let (root, _) = pickle::load(payload)?;
            let items = match root {
                Value::Array(array) => array.borrow().objects()?,
                Value::List(items) => items.borrow().clone(),
                other => {
                    return Err(ZooError::Npy(format!(
                        "\"{name}\": object payload is {other:?}, not an array"
                    )));
                }
            };
            Ok(NpyContents::Objects(items))
        }
    }
}

/// Returns the header and the byte offset where array data starts.
pub fn parse_header(bytes: &[u8]) -> Result<(NpyHeader, usize)> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(ZooError::Npy("missing \\x93NUMPY magic".into()));
    }
    let major = bytes[6];
    let (len, start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(ZooError::Npy("truncated header length".into()));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        v => return Err(ZooError::Npy(format!("unsupported format version {v}"))),
    };
    let end = start + len;
    let text = bytes
        .get(start..end)
        .ok_or_else(|| ZooError::Npy("header runs past end of file".into()))?;
    let text = std::str::from_utf8(text)
        .map_err(|e| ZooError::Npy(format!("header is not UTF-8: {e}")))?;

    let descr = quoted(field(text, "descr")?)?;
    let code = descr.trim_start_matches(|c: char| matches!(c, '<' | '>' | '|' | '='));
    let element = if code == "O" {
        Element::Object
    } else {
        let (dtype, endian) = parse_descr(descr)?;
        Element::Numeric(dtype, endian)
    };
    let fortran_order = field(text, "fortran_order")?.starts_with("True");
    let shape = parse_shape(field(text, "shape")?)?;

    Ok((
        NpyHeader {
            element,
            fortran_order,
            shape,
        },
        end,
    ))
}

/// Text following `'key':` in the header dict literal.
fn field<'h>(header: &'h str, key: &str) -> Result<&'h str> {
    let quoted_key = format!("'{key}'");
    let at = header
        .find(&quoted_key)
        .ok_or_else(|| ZooError::Npy(format!("header has no '{key}'")))?;
    header[at + quoted_key.len()..]
        .trim_start()
        .strip_prefix(':')
        .map(str::trim_start)
        .ok_or_else(|| ZooError::Npy(format!("malformed '{key}' entry")))
}

fn quoted(value: &str) -> Result<&str> {
    let mut chars = value.chars();
    let quote = chars
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or_else(|| ZooError::Npy("expected a quoted descr".into()))?;
    let rest = &value[1..];
    let close = rest
        .find(quote)
        .ok_or_else(|| ZooError::Npy("unterminated descr".into()))?;
    Ok(&rest[..close])
}

pub(crate) fn parse_descr(descr: &str) -> Result<(DType, Endian)> {
    let (endian, code) = match descr.strip_prefix('>') {
        Some(code) => (Endian::Big, code),
        None => (
            Endian::Little,
            descr.trim_start_matches(|c: char| matches!(c, '<' | '|' | '=')),
        ),
    };
    let dtype = match code {
        "f2" => DType::F16,
        "f4" => DType::F32,
        "f8" => DType::F64,
        "i4" => DType::I32,
        "i8" => DType::I64,
        "u1" => DType::U8,
        "b1" => DType::Bool,
        _ => return Err(ZooError::UnsupportedDType(descr.to_string())),
    };
    Ok((dtype, endian))
}

fn parse_shape(value: &str) -> Result<Vec<usize>> {
    let inner = value
        .strip_prefix('(')
        .and_then(|v| v.find(')').map(|close| &v[..close]))
        .ok_or_else(|| ZooError::Npy(format!("malformed shape {value:?}")))?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            dim.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|e| ZooError::Npy(format!("bad dimension {dim:?}: {e}")))
        })
        .collect()
}

#[cfg(test)]
fn encode_header(descr: &str, shape: &[usize]) -> Vec<u8> {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    let shape_text = match dims.len() {
        1 => format!("({},)", dims[0]),
        _ => format!("({})", dims.join(", ")),
    };
    let mut header =
        format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape_text}, }}");
    // Pad so data starts on a 64-byte boundary, newline-terminated.
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');

    let mut out = NPY_MAGIC.to_vec();
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out
}

#[cfg(test)]
pub(crate) fn encode_f32(shape: &[usize], values: &[f32]) -> Vec<u8> {
    let mut out = encode_header("<f4", shape);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// What `np.save` writes for an object array with `allow_pickle=True`.
#[cfg(test)]
pub(crate) fn encode_objects(len: usize, pickled: &[u8]) -> Vec<u8> {
    let mut out = encode_header("|O", &[len]);
    out.extend_from_slice(pickled);
    out
}
