pub mod keras;
pub mod npy;
pub mod npz;
mod pickle;
pub mod torch;

use std::path::Path;

use crate::error::Result;
use crate::weights::WeightGroup;

/// Serialization format of a registered archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Keras HDF5 weights: layers of named datasets.
    Keras,
    /// NumPy `.npz`: flat, order-preserving key → array bundle.
    Npz,
    /// PyTorch state dict keyed by dotted attribute paths.
    Torch,
}

impl ArchiveFormat {
    /// Parse a verified archive into groups in archive-native order.
    pub fn parse(self, path: &Path) -> Result<Vec<WeightGroup>> {
        match self {
            ArchiveFormat::Keras => keras::read_keras(path),
            ArchiveFormat::Npz => npz::read_npz(path),
            ArchiveFormat::Torch => torch::read_torch(path),
        }
    }

    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename).extension()?.to_str()?;
        match ext.to_ascii_lowercase().as_str() {
            "h5" | "hdf5" => Some(ArchiveFormat::Keras),
            "npz" => Some(ArchiveFormat::Npz),
            "pth" | "pt" => Some(ArchiveFormat::Torch),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(ArchiveFormat::from_filename("resnet50.h5"), Some(ArchiveFormat::Keras));
        assert_eq!(ArchiveFormat::from_filename("mobilenet25.npz"), Some(ArchiveFormat::Npz));
        assert_eq!(ArchiveFormat::from_filename("resnet_50_cpu.pth"), Some(ArchiveFormat::Torch));
        assert_eq!(ArchiveFormat::from_filename("weights.bin"), None);
        assert_eq!(ArchiveFormat::from_filename("noext"), None);
    }
}
