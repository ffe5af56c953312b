use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::weights::{WeightEntry, WeightGroup};

/// Hierarchical keyed container laid out the way Keras saves weights: the root lists
/// `layer_names`, each layer group lists its own `weight_names`.
pub trait KeyedStore {
    fn layer_names(&self) -> Result<Vec<String>>;
    fn weight_names(&self, layer: &str) -> Result<Vec<String>>;
    fn read(&self, layer: &str, weight: &str) -> Result<WeightEntry>;
}

/// One group per weighted layer, in `layer_names` order; layers without weights
/// (activations, pooling) are dropped.
pub fn read_layers<S: KeyedStore + ?Sized>(store: &S) -> Result<Vec<WeightGroup>> {
    let mut groups = Vec::new();
    for layer in store.layer_names()? {
        let weights = store.weight_names(&layer)?;
        if weights.is_empty() {
            continue;
        }
        let entries = weights
            .iter()
            .map(|weight| store.read(&layer, weight))
            .collect::<Result<Vec<_>>>()?;
        debug!("keras: {layer} ({} arrays)", entries.len());
        groups.push(WeightGroup {
            name: layer,
            entries,
        });
    }
    Ok(groups)
}

#[cfg(feature = "hdf5")]
pub fn read_keras(path: &Path) -> Result<Vec<WeightGroup>> {
    let store = hdf5_store::Hdf5Store::open(path)?;
    read_layers(&store)
}

#[cfg(not(feature = "hdf5"))]
pub fn read_keras(path: &Path) -> Result<Vec<WeightGroup>> {
    Err(crate::error::ZooError::UnsupportedFormat(format!(
        "{}: Keras HDF5 archives need the `hdf5` feature",
        path.display()
    )))
}

#[cfg(feature = "hdf5")]
pub mod hdf5_store {
    use std::path::Path;

    use hdf5::types::{FixedAscii, FixedUnicode, TypeDescriptor, VarLenAscii, VarLenUnicode};

    use super::KeyedStore;
    use crate::error::{Result, ZooError};
    use crate::weights::{TensorData, WeightEntry};

    pub struct Hdf5Store {
        file: hdf5::File,
        nested: bool,
    }

    impl Hdf5Store {
        pub fn open(path: &Path) -> Result<Self> {
            let file = hdf5::File::open(path)?;
            // Whole-model saves keep the weights under `model_weights`.
            let nested = file.link_exists("model_weights");
            Ok(Self { file, nested })
        }

        fn root(&self) -> Result<hdf5::Group> {
            Ok(if self.nested {
                self.file.group("model_weights")?
            } else {
                self.file.as_group()?
            })
        }
    }

    /// Longest fixed-length name read back; h5py sizes `|S` attributes to the longest name.
    const NAME_CAPACITY: usize = 1024;

    /// Keras writes `layer_names`/`weight_names` as fixed-length byte strings (`|S`);
    /// newer h5py versions may write variable-length strings instead.
    fn string_attr(group: &hdf5::Group, name: &str) -> Result<Vec<String>> {
        let attr = group.attr(name)?;
        let names = match attr.dtype()?.to_descriptor()? {
            TypeDescriptor::VarLenAscii => attr
                .read_raw::<VarLenAscii>()?
                .iter()
                .map(|v| v.as_str().to_string())
                .collect(),
            TypeDescriptor::VarLenUnicode => attr
                .read_raw::<VarLenUnicode>()?
                .iter()
                .map(|v| v.as_str().to_string())
                .collect(),
            TypeDescriptor::FixedAscii(width) | TypeDescriptor::FixedUnicode(width)
                if width > NAME_CAPACITY =>
            {
                return Err(ZooError::UnsupportedFormat(format!(
                    "\"{name}\" holds {width}-byte strings"
                )));
            }
            TypeDescriptor::FixedAscii(_) => attr
                .read_raw::<FixedAscii<NAME_CAPACITY>>()?
                .iter()
                .map(|v| v.as_str().to_string())
                .collect(),
            TypeDescriptor::FixedUnicode(_) => attr
                .read_raw::<FixedUnicode<NAME_CAPACITY>>()?
                .iter()
                .map(|v| v.as_str().to_string())
                .collect(),
            other => {
                return Err(ZooError::UnsupportedDType(format!(
                    "\"{name}\" attribute of type {other:?}"
                )));
            }
        };
        Ok(names)
    }

    impl KeyedStore for Hdf5Store {
        fn layer_names(&self) -> Result<Vec<String>> {
            string_attr(&self.root()?, "layer_names")
        }

        fn weight_names(&self, layer: &str) -> Result<Vec<String>> {
            string_attr(&self.root()?.group(layer)?, "weight_names")
        }

        fn read(&self, layer: &str, weight: &str) -> Result<WeightEntry> {
            let dataset = self.root()?.group(layer)?.dataset(weight)?;
            let shape = dataset.shape();
            let values = dataset.read_raw::<f32>()?;
            WeightEntry::new(weight, shape, TensorData::F32(values))
        }
    }
}
