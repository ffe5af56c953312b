use byteorder::{BigEndian, ByteOrder, LittleEndian};
use half::f16;

use crate::error::{Result, ZooError};

/// Element type of a stored array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    F16,
    F32,
    F64,
    I32,
    I64,
    U8,
    Bool,
}

impl DType {
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F16 => 2,
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
            DType::U8 | DType::Bool => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Typed array payload, always held in native endianness.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F16(Vec<f16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    Bool(Vec<bool>),
}

impl TensorData {
    /// Decode `numel` elements of `dtype` from raw archive bytes.
    pub fn decode(dtype: DType, bytes: &[u8], numel: usize, endian: Endian) -> Result<Self> {
        let need = numel * dtype.size_bytes();
        if bytes.len() < need {
            return Err(ZooError::Other(format!(
                "array payload truncated: need {need} bytes, have {}",
                bytes.len()
            )));
        }
        let bytes = &bytes[..need];
        Ok(match endian {
            Endian::Little => decode_with::<LittleEndian>(dtype, bytes, numel),
            Endian::Big => decode_with::<BigEndian>(dtype, bytes, numel),
        })
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F16(_) => DType::F16,
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
            TensorData::I32(_) => DType::I32,
            TensorData::I64(_) => DType::I64,
            TensorData::U8(_) => DType::U8,
            TensorData::Bool(_) => DType::Bool,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F16(v) => v.len(),
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::U8(v) => v.len(),
            TensorData::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widen or narrow every element to f32.
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            TensorData::F16(v) => v.iter().map(|x| x.to_f32()).collect(),
            TensorData::F32(v) => v.clone(),
            TensorData::F64(v) => v.iter().map(|&x| x as f32).collect(),
            TensorData::I32(v) => v.iter().map(|&x| x as f32).collect(),
            TensorData::I64(v) => v.iter().map(|&x| x as f32).collect(),
            TensorData::U8(v) => v.iter().map(|&x| x as f32).collect(),
            TensorData::Bool(v) => v.iter().map(|&x| if x { 1.0 } else { 0.0 }).collect(),
        }
    }
}

fn decode_with<B: ByteOrder>(dtype: DType, bytes: &[u8], numel: usize) -> TensorData {
    match dtype {
        DType::F16 => {
            let mut bits = vec![0u16; numel];
            B::read_u16_into(bytes, &mut bits);
            TensorData::F16(bits.into_iter().map(f16::from_bits).collect())
        }
        DType::F32 => {
            let mut v = vec![0f32; numel];
            B::read_f32_into(bytes, &mut v);
            TensorData::F32(v)
        }
        DType::F64 => {
            let mut v = vec![0f64; numel];
            B::read_f64_into(bytes, &mut v);
            TensorData::F64(v)
        }
        DType::I32 => {
            let mut v = vec![0i32; numel];
            B::read_i32_into(bytes, &mut v);
            TensorData::I32(v)
        }
        DType::I64 => {
            let mut v = vec![0i64; numel];
            B::read_i64_into(bytes, &mut v);
            TensorData::I64(v)
        }
        DType::U8 => TensorData::U8(bytes.to_vec()),
        DType::Bool => TensorData::Bool(bytes.iter().map(|&b| b != 0).collect()),
    }
}

/// One named array read from an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightEntry {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: TensorData,
}

impl WeightEntry {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: TensorData) -> Result<Self> {
        let name = name.into();
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(ZooError::Other(format!(
                "\"{name}\": shape {shape:?} holds {numel} elements, payload has {}",
                data.len()
            )));
        }
        Ok(Self { name, shape, data })
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }
}

/// Anything the move-rule engine can relocate by name.
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for WeightEntry {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for String {
    fn name(&self) -> &str {
        self
    }
}

impl Named for &str {
    fn name(&self) -> &str {
        self
    }
}

/// A named bundle of arrays that moves as one unit.
///
/// Keras archives group a layer's kernel, bias and statistics under the layer name;
/// flat formats produce one group per array.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightGroup {
    pub name: String,
    pub entries: Vec<WeightEntry>,
}

impl WeightGroup {
    pub fn single(entry: WeightEntry) -> Self {
        Self {
            name: entry.name.clone(),
            entries: vec![entry],
        }
    }
}

impl Named for WeightGroup {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Flatten groups into the ordered weight list, preserving group and entry order.
pub fn flatten(groups: Vec<WeightGroup>) -> Vec<WeightEntry> {
    groups.into_iter().flat_map(|g| g.entries).collect()
}
