//! PyTorch checkpoints.
//!
//! Zip checkpoints (`torch.save` since 1.6) keep the pickled state dict in `data.pkl`
//! and each storage in `data/<key>`. Legacy checkpoints are a stream of five pickles
//! (magic number, protocol, sys info, state dict, storage keys) followed by the raw
//! storages in key order, each prefixed with its element count.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::debug;
use zip::ZipArchive;

use crate::error::{Result, ZooError};
use crate::format::pickle::{self, Value};
use crate::weights::{DType, Endian, TensorData, WeightEntry, WeightGroup};

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// `0x1950a86a20f9469cfc6c`, little-endian.
pub(crate) const LEGACY_MAGIC: [u8; 10] =
    [0x6c, 0xfc, 0x9c, 0x46, 0xf9, 0x20, 0x6a, 0xa8, 0x50, 0x19];
pub(crate) const LEGACY_PROTOCOL: i64 = 1001;

/// Where one tensor lives inside the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub stride: Vec<usize>,
    pub storage_key: String,
    pub storage_offset: usize,
}

/// Read a checkpoint's tensors in the state dict's insertion order.
pub fn read_torch(path: &Path) -> Result<Vec<WeightGroup>> {
    let mut file = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 4];
    let is_zip = match file.read_exact(&mut magic) {
        Ok(()) => &magic == ZIP_MAGIC,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e.into()),
    };
    file.rewind()?;

    if is_zip {
        let mut archive = ZipArchive::new(file)?;
        read_torch_archive(&mut archive)
    } else {
        debug!("torch: {} is not a zip, reading the legacy layout", path.display());
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        read_torch_legacy(&bytes)
    }
}

pub fn read_torch_archive<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Vec<WeightGroup>> {
    let pkl_name = archive
        .file_names()
        .find(|n| *n == "data.pkl" || n.ends_with("/data.pkl"))
        .map(str::to_string)
        .ok_or_else(|| ZooError::Pickle("checkpoint has no data.pkl".into()))?;
    let prefix = &pkl_name[..pkl_name.len() - "data.pkl".len()];

    let endian = match read_member(archive, &format!("{prefix}byteorder")) {
        Ok(bytes) => match String::from_utf8_lossy(&bytes).trim() {
            "little" => Endian::Little,
            "big" => Endian::Big,
            other => {
                return Err(ZooError::Pickle(format!("unknown byteorder {other:?}")));
            }
        },
        Err(ZooError::Zip(zip::result::ZipError::FileNotFound)) => Endian::Little,
        Err(e) => return Err(e),
    };

    let pkl = read_member(archive, &pkl_name)?;
    let (root, _) = pickle::load(&pkl)?;
    let specs = collect_tensors(&root)?;
    debug!("torch: {} tensors in {pkl_name}", specs.len());

    let mut storages: HashMap<String, Vec<u8>> = HashMap::new();
    for (_, spec) in &specs {
        if !storages.contains_key(&spec.storage_key) {
            let bytes = read_member(archive, &format!("{prefix}data/{}", spec.storage_key))?;
            storages.insert(spec.storage_key.clone(), bytes);
        }
    }
    assemble(specs, &storages, endian)
}

/// The pre-1.6 stream layout (also what Torch7-era conversions ship as `.pth`).
pub fn read_torch_legacy(bytes: &[u8]) -> Result<Vec<WeightGroup>> {
    let mut rest = bytes;

    match next_pickle(&mut rest)? {
        Value::BigInt(magic) if magic == LEGACY_MAGIC => {}
        _ => {
            return Err(ZooError::Pickle(
                "neither a zip nor a legacy PyTorch checkpoint (bad magic number)".into(),
            ));
        }
    }
    match next_pickle(&mut rest)? {
        Value::Int(LEGACY_PROTOCOL) => {}
        other => {
            return Err(ZooError::Pickle(format!(
                "unsupported legacy protocol {other:?}"
            )));
        }
    }
    let sys_info = next_pickle(&mut rest)?;
    let endian = match sys_info.dict_get("little_endian") {
        Some(Value::Bool(false)) => Endian::Big,
        _ => Endian::Little,
    };

    let root = next_pickle(&mut rest)?;
    let specs = collect_tensors(&root)?;
    let Value::List(keys) = next_pickle(&mut rest)? else {
        return Err(ZooError::Pickle("legacy checkpoint has no storage key list".into()));
    };
    let keys = keys
        .borrow()
        .iter()
        .map(|k| {
            k.text()
                .ok_or_else(|| ZooError::Pickle(format!("storage key {k:?} is not a string")))
        })
        .collect::<Result<Vec<_>>>()?;
    debug!("torch: legacy checkpoint, {} tensors over {} storages", specs.len(), keys.len());

    let dtypes: HashMap<&str, DType> = specs
        .iter()
        .map(|(_, spec)| (spec.storage_key.as_str(), spec.dtype))
        .collect();
    let mut storages: HashMap<String, Vec<u8>> = HashMap::with_capacity(keys.len());
    for key in keys {
        let dtype = dtypes.get(key.as_str()).copied().ok_or_else(|| {
            ZooError::Pickle(format!("storage {key} is not referenced by any tensor"))
        })?;
        let head = split(&mut rest, 8, &key)?;
        let numel = match endian {
            Endian::Little => LittleEndian::read_u64(head),
            Endian::Big => BigEndian::read_u64(head),
        };
        let len = usize::try_from(numel)
            .ok()
            .and_then(|n| n.checked_mul(dtype.size_bytes()))
            .ok_or_else(|| ZooError::Pickle(format!("storage {key} is too large")))?;
        let payload = split(&mut rest, len, &key)?;
        storages.insert(key, payload.to_vec());
    }
    assemble(specs, &storages, endian)
}

fn next_pickle(rest: &mut &[u8]) -> Result<Value> {
    let (value, used) = pickle::load(rest)?;
    *rest = &rest[used..];
    Ok(value)
}

fn split<'a>(rest: &mut &'a [u8], n: usize, key: &str) -> Result<&'a [u8]> {
    if rest.len() < n {
        return Err(ZooError::Pickle(format!("storage {key} is truncated")));
    }
    let (head, tail) = rest.split_at(n);
    *rest = tail;
    Ok(head)
}

fn assemble(
    specs: Vec<(String, TensorSpec)>,
    storages: &HashMap<String, Vec<u8>>,
    endian: Endian,
) -> Result<Vec<WeightGroup>> {
    specs
        .into_iter()
        .map(|(name, spec)| {
            let storage = storages.get(&spec.storage_key).ok_or_else(|| {
                ZooError::Pickle(format!(
                    "\"{name}\" references missing storage {}",
                    spec.storage_key
                ))
            })?;
            let entry = tensor_from_storage(&name, &spec, storage, endian)?;
            debug!("torch: {} {:?} {:?}", entry.name, entry.shape, entry.dtype());
            Ok(WeightGroup::single(entry))
        })
        .collect()
}

fn read_member<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut member = archive.by_name(name)?;
    let mut bytes = Vec::with_capacity(member.size() as usize);
    member.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn tensor_from_storage(
    name: &str,
    spec: &TensorSpec,
    storage: &[u8],
    endian: Endian,
) -> Result<WeightEntry> {
    let expected = contiguous_stride(&spec.shape);
    let contiguous = spec
        .shape
        .iter()
        .zip(spec.stride.iter().zip(&expected))
        .all(|(&dim, (&actual, &wanted))| dim <= 1 || actual == wanted);
    if !contiguous {
        return Err(ZooError::Pickle(format!(
            "\"{name}\" has non-contiguous strides {:?} for shape {:?}",
            spec.stride, spec.shape
        )));
    }

    let elem = spec.dtype.size_bytes();
    let numel: usize = spec.shape.iter().product();
    let begin = spec.storage_offset * elem;
    let end = begin + numel * elem;
    let bytes = storage.get(begin..end).ok_or_else(|| {
        ZooError::Pickle(format!(
            "\"{name}\" needs bytes {begin}..{end} of a {}-byte storage",
            storage.len()
        ))
    })?;
    let data = TensorData::decode(spec.dtype, bytes, numel, endian)?;
    WeightEntry::new(name, spec.shape.clone(), data)
}

fn contiguous_stride(shape: &[usize]) -> Vec<usize> {
    let mut stride = vec![0usize; shape.len()];
    let mut s = 1usize;
    for (i, &dim) in shape.iter().enumerate().rev() {
        stride[i] = s;
        s = s.saturating_mul(dim.max(1));
    }
    stride
}

/// Tensors of the root dict in insertion order, unwrapping a `state_dict`/`model` wrapper.
fn collect_tensors(root: &Value) -> Result<Vec<(String, TensorSpec)>> {
    let Value::Dict(dict) = root else {
        return Err(ZooError::Pickle("checkpoint root is not a dict".into()));
    };
    let tensors: Vec<(String, TensorSpec)> = dict
        .borrow()
        .iter()
        .filter_map(|(key, value)| match (key.text(), value) {
            (Some(key), Value::Tensor(spec)) => Some((key, spec.clone())),
            _ => None,
        })
        .collect();
    if !tensors.is_empty() {
        return Ok(tensors);
    }

    for wrapper in ["state_dict", "model"] {
        if let Some(inner @ Value::Dict(_)) = root.dict_get(wrapper) {
            return collect_tensors(&inner);
        }
    }
    Ok(tensors)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Byte streams shaped like `torch.save(state_dict)` output.

    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::{LEGACY_MAGIC, LEGACY_PROTOCOL};
    use crate::format::pickle::testing::Pickler;

    fn contiguous(shape: &[usize]) -> Vec<usize> {
        let mut stride = vec![1usize; shape.len()];
        for d in (0..shape.len().saturating_sub(1)).rev() {
            stride[d] = stride[d + 1] * shape[d + 1];
        }
        stride
    }

    pub fn state_dict_pickle(tensors: &[(&str, Vec<usize>)]) -> Vec<u8> {
        let mut p = Pickler::new();
        p.global("collections", "OrderedDict").op(&[b')', b'R', b'q', 0, b'(']);
        for (i, (name, shape)) in tensors.iter().enumerate() {
            let numel: usize = shape.iter().product();
            p.unicode(name)
                .global("torch._utils", "_rebuild_tensor_v2")
                .op(b"((")
                .unicode("storage")
                .global("torch", "FloatStorage")
                .unicode(&i.to_string())
                .unicode("cpu")
                .int(numel as i64)
                .op(b"tQ")
                .int(0)
                .int_tuple(shape)
                .int_tuple(&contiguous(shape))
                .op(&[0x89])
                .global("collections", "OrderedDict")
                .op(b")RtR");
        }
        p.op(b"u").finish()
    }

    /// Zip checkpoint whose i-th tensor holds `i*100, i*100+1, ...`.
    pub fn checkpoint(tensors: &[(&str, Vec<usize>)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();
        writer.start_file("archive/data.pkl", opts).unwrap();
        writer.write_all(&state_dict_pickle(tensors)).unwrap();
        writer.start_file("archive/byteorder", opts).unwrap();
        writer.write_all(b"little").unwrap();
        for (i, (_, shape)) in tensors.iter().enumerate() {
            let numel: usize = shape.iter().product();
            writer.start_file(format!("archive/data/{i}"), opts).unwrap();
            for k in 0..numel {
                writer.write_all(&((i * 100 + k) as f32).to_le_bytes()).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    /// Legacy stream with the same contents as [`checkpoint`], written the way
    /// Python 2 did: byte-string keys, `_rebuild_tensor` and six-element ids.
    pub fn legacy_checkpoint(tensors: &[(&str, Vec<usize>)]) -> Vec<u8> {
        let mut out = Pickler::new().op(&[0x8a, 10]).op(&LEGACY_MAGIC).finish();
        out.extend(Pickler::new().int(LEGACY_PROTOCOL).finish());
        out.extend(
            Pickler::new()
                .op(b"}(")
                .bytes(b"protocol_version")
                .int(LEGACY_PROTOCOL)
                .bytes(b"little_endian")
                .op(&[0x88])
                .op(b"u")
                .finish(),
        );

        let mut p = Pickler::new();
        p.global("collections", "OrderedDict").op(b")R(");
        for (i, (name, shape)) in tensors.iter().enumerate() {
            let numel: usize = shape.iter().product();
            p.bytes(name.as_bytes())
                .global("torch._utils", "_rebuild_tensor")
                .op(b"((")
                .bytes(b"storage")
                .global("torch", "FloatStorage")
                .bytes(i.to_string().as_bytes())
                .bytes(b"cpu")
                .int(numel as i64)
                .op(b"NtQ")
                .int(0)
                .int_tuple(shape)
                .int_tuple(&contiguous(shape))
                .op(b"tR");
        }
        out.extend(p.op(b"u").finish());

        let mut keys = Pickler::new();
        keys.op(b"](");
        for i in 0..tensors.len() {
            keys.bytes(i.to_string().as_bytes());
        }
        out.extend(keys.op(b"e").finish());

        for (i, (_, shape)) in tensors.iter().enumerate() {
            let numel: usize = shape.iter().product();
            out.extend_from_slice(&(numel as u64).to_le_bytes());
            for k in 0..numel {
                out.extend_from_slice(&((i * 100 + k) as f32).to_le_bytes());
            }
        }
        out
    }
}
