//! Ordered table of registered model families.
//!
//! Order matters: when a scope's model name has no exact entry, the first entry whose
//! name occurs inside it wins, so families that are prefixes of others (`resnet50`,
//! `resnet50v2`) resolve to whichever comes first.

use ahash::AHashSet;

use crate::cache::ArchiveDescriptor;
use crate::config::{ArchiveUrls, CACHE_SUBDIR};
use crate::error::{Result, ZooError};
use crate::format::ArchiveFormat;
use crate::rules::{MoveRule, RuleTemplate};

const CAFFE_ZOO: &str = "BAIR Caffe Model Zoo";
const TF_SLIM: &str = "TF Slim";
const KERAS: &str = "Keras";
const CAFFE_RESNETS: &str = "Caffe ResNets";
const TORCH_RESNETS: &str = "Torch ResNets";
const TORCH_RESNEXTS: &str = "Torch ResNeXts";
const TORCH_WIDERESNETS: &str = "Torch WideResNets";
const TORCH_DENSENETS: &str = "Torch DenseNets";
const CAFFE_SQUEEZENETS: &str = "Caffe SqueezeNets";

/// Everything needed to load one family's pretrained weights.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub name: String,
    pub descriptor: ArchiveDescriptor,
    pub format: ArchiveFormat,
    pub rules: Vec<MoveRule>,
    /// Where the published weights were converted from.
    pub origin: &'static str,
}

impl ModelEntry {
    pub fn new(name: impl Into<String>, descriptor: ArchiveDescriptor, format: ArchiveFormat) -> Self {
        Self {
            name: name.into(),
            descriptor,
            format,
            rules: Vec::new(),
            origin: "",
        }
    }

    pub fn with_rules(mut self, rules: Vec<MoveRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_origin(mut self, origin: &'static str) -> Self {
        self.origin = origin;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    /// The entry name was found inside the (lowercased) model name.
    Substring,
}

#[derive(Debug, Clone, Copy)]
pub enum Resolution<'a> {
    Found {
        entry: &'a ModelEntry,
        kind: MatchKind,
    },
    Missing,
}

/// Immutable after construction; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<ModelEntry>,
}

impl Registry {
    pub fn new(entries: Vec<ModelEntry>) -> Result<Self> {
        let mut seen = AHashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert(entry.name.as_str()) {
                return Err(ZooError::DuplicateModel(entry.name.clone()));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ModelEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Exact name first (case-sensitive), then the first entry in table order whose
    /// name is a substring of `model_name`, compared in lowercase.
    pub fn resolve(&self, model_name: &str) -> Resolution<'_> {
        if let Some(entry) = self.get(model_name) {
            return Resolution::Found {
                entry,
                kind: MatchKind::Exact,
            };
        }
        let lowered = model_name.to_lowercase();
        self.entries
            .iter()
            .find(|e| !e.name.is_empty() && lowered.contains(&e.name.to_lowercase()))
            .map_or(Resolution::Missing, |entry| Resolution::Found {
                entry,
                kind: MatchKind::Substring,
            })
    }

    /// The published families, in lookup order.
    ///
    /// The alternate-source entries (`keras_resnet50`, `torch_resnet50/101/152`) take part
    /// in resolution like any other: a scope named exactly `torch_resnet50` gets the
    /// PyTorch archive and its reordering rules. They sit after the native families, and
    /// each contains its native name, so a substring match never reaches them:
    /// `my_torch_resnet50` falls back to `resnet50`.
    pub fn standard(urls: &ArchiveUrls) -> Self {
        let hosted = |family: &str, filename: &str, md5: &str| {
            ArchiveDescriptor::new(
                filename,
                format!("{}{family}/{filename}", urls.models),
                CACHE_SUBDIR,
                md5,
            )
        };
        let keras = |filename: &str, md5: &str| {
            ArchiveDescriptor::new(filename, format!("{}{filename}", urls.keras), CACHE_SUBDIR, md5)
        };
        let fb_resnet = fb_resnet_torch_rules();
        let fb_block = fb_block_torch_rules();

        use ArchiveFormat::{Keras, Npz, Torch};
        let entries = vec![
            ModelEntry::new("inception1", hosted("inception", "inception1.h5", "6a212e3cb60b33f49c372906f18ae4a8"), Keras)
                .with_origin(CAFFE_ZOO),
            ModelEntry::new("inception2", hosted("inception", "inception2.npz", "0476b876a5d35a99e2747f98248d856d"), Npz)
                .with_origin(TF_SLIM),
            ModelEntry::new("inception3", hosted("inception", "inception3.h5", "7c4556613c348da3b99b633e1c430fff"), Keras)
                .with_origin(KERAS),
            ModelEntry::new("inception4", hosted("inception", "inception4.npz", "8d5a0e8cb451c85112d5c4e363d77a42"), Npz)
                .with_origin(TF_SLIM),
            ModelEntry::new(
                "inceptionresnet2",
                hosted("inception", "inception_resnet_v2_2016_08_30.npz", "32d685e68e6be6ba1da64e41f939bc49"),
                Npz,
            )
            .with_origin(TF_SLIM),
            ModelEntry::new("resnet50", hosted("resnet", "resnet50.h5", "9df0843bdadb58ed24d360564c45b119"), Keras)
                .with_origin(CAFFE_RESNETS),
            ModelEntry::new("resnet101", hosted("resnet", "resnet101.h5", "e2434bec605870fb4747e1b93f9f0e47"), Keras)
                .with_origin(CAFFE_RESNETS),
            ModelEntry::new("resnet152", hosted("resnet", "resnet152.h5", "e588285d1f919e538515c1f1b1c07b5b"), Keras)
                .with_origin(CAFFE_RESNETS),
            ModelEntry::new("resnet50v2", hosted("resnet", "resnet_v2_50.npz", "fa2ac006361fd5e79792d163c0130667"), Npz)
                .with_origin(TF_SLIM),
            ModelEntry::new("resnet101v2", hosted("resnet", "resnet_v2_101.npz", "fbc179d55c817e4656992fa582fdc460"), Npz)
                .with_origin(TF_SLIM),
            ModelEntry::new("resnet152v2", hosted("resnet", "resnet_v2_152.npz", "184c9b439e925762f006d288445997a8"), Npz)
                .with_origin(TF_SLIM),
            ModelEntry::new("resnet200v2", hosted("resnet", "resnet_200_cpu.pth", "220df3970701d3e0608eed887fb95d82"), Torch)
                .with_rules(fb_resnet.clone())
                .with_origin(TORCH_RESNETS),
            ModelEntry::new("resnext50", hosted("resnet", "resnext_50_32x4d_cpu.pth", "fdfc372bc47f7bf55313c04aebcef8ca"), Torch)
                .with_rules(fb_block.clone())
                .with_origin(TORCH_RESNEXTS),
            ModelEntry::new("resnext101", hosted("resnet", "resnext_101_32x4d_cpu.pth", "5e97757d9f898aa8174fe8bc6e59bce8"), Torch)
                .with_rules(fb_block.clone())
                .with_origin(TORCH_RESNEXTS),
            ModelEntry::new("wideresnet50", hosted("resnet", "wrn_50_2_cpu.pth", "7879cd9f3840f92593a87b6be8192206"), Torch)
                .with_rules(fb_block)
                .with_origin(TORCH_WIDERESNETS),
            ModelEntry::new("densenet121", hosted("densenet", "densenet_121_cpu.pth", "9817430b1d3634645f6b04b8c663c34f"), Torch)
                .with_origin(TORCH_DENSENETS),
            ModelEntry::new("densenet169", hosted("densenet", "densenet_169_cpu.pth", "98c5cac06124192627391adf17d66493"), Torch)
                .with_origin(TORCH_DENSENETS),
            ModelEntry::new("densenet201", hosted("densenet", "densenet_201_cpu.pth", "fa3aa0454be559b81409e92f3bafd155"), Torch)
                .with_origin(TORCH_DENSENETS),
            ModelEntry::new("mobilenet25", hosted("mobilenet", "mobilenet25.npz", "aa1f5ccfb8be3d1ef45948a396e04e0a"), Npz)
                .with_origin(TF_SLIM),
            ModelEntry::new("mobilenet50", hosted("mobilenet", "mobilenet50.npz", "0c0b667bc9d707e0e5bd4f383c5dece0"), Npz)
                .with_origin(TF_SLIM),
            ModelEntry::new("mobilenet75", hosted("mobilenet", "mobilenet75.npz", "d4557a46a44eebfeaf08c82ae33765ed"), Npz)
                .with_origin(TF_SLIM),
            ModelEntry::new("mobilenet100", hosted("mobilenet", "mobilenet100.npz", "3d14409e3e119c8881baf7dd1d54e714"), Npz)
                .with_origin(TF_SLIM),
            ModelEntry::new("squeezenet", hosted("squeezenet", "squeezenet.npz", "1d474f6540f7ec34cb56e6440419b5c5"), Npz)
                .with_origin(CAFFE_SQUEEZENETS),
            ModelEntry::new(
                "keras_resnet50",
                keras("resnet50_weights_tf_dim_ordering_tf_kernels.h5", "a7b3fe01876f51b976af0dea6bc144eb"),
                Keras,
            )
            .with_rules(keras_resnet50_rules())
            .with_origin(KERAS),
            ModelEntry::new("torch_resnet50", hosted("resnet", "resnet_50_cpu.pth", "5b38c39802c94de00b55596145d304aa"), Torch)
                .with_rules(fb_resnet_torch_rules())
                .with_origin(TORCH_RESNETS),
            ModelEntry::new("torch_resnet101", hosted("resnet", "resnet_101_cpu.pth", "cb3f0ac4687cb63d5f0861d651da844b"), Torch)
                .with_rules(fb_resnet_torch_rules())
                .with_origin(TORCH_RESNETS),
            ModelEntry::new("torch_resnet152", hosted("resnet", "resnet_152_cpu.pth", "3339f6aca7f746f8ae7f6ce577efc0c0"), Torch)
                .with_rules(fb_resnet)
                .with_origin(TORCH_RESNETS),
        ];
        Self { entries }
    }
}

/// fb.resnet.torch stores each stage's projection shortcut after the residual
/// branch; pull its conv and batch norm 18 slots forward, ahead of the branch.
pub fn fb_resnet_torch_rules() -> Vec<MoveRule> {
    RuleTemplate::new(4..8)
        .rule("{i}.0.0.1.0.weight", -18)
        .rule("{i}.0.0.1.0.bias", -18)
        .rule("{i}.0.0.1.1.weight", -18)
        .rule("{i}.0.0.1.1.bias", -18)
        .rule("{i}.0.0.1.1.running_mean", -18)
        .rule("{i}.0.0.1.1.running_var", -18)
        .expand()
}

/// ResNeXt and WideResNet checkpoints have no shortcut conv bias, so the branch is
/// three entries shorter.
pub fn fb_block_torch_rules() -> Vec<MoveRule> {
    fb_resnet_torch_rules()
        .into_iter()
        .filter(|rule| !rule.anchor.as_str().contains("1.0.bias"))
        .map(|rule| rule.with_offset(-15))
        .collect()
}

/// Keras' ResNet-50 saves each stage's last branch batch norm and shortcut after
/// the layers they precede in the target.
pub fn keras_resnet50_rules() -> Vec<MoveRule> {
    RuleTemplate::new(2..6)
        .rule("bn{i}a_branch2c", -1)
        .rule("res{i}a_branch1", -6)
        .rule("bn{i}a_branch1", -6)
        .expand()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KERAS_URL, MODEL_URL};

    fn standard() -> Registry {
        Registry::standard(&ArchiveUrls::default())
    }

    fn resolved(registry: &Registry, name: &str) -> Option<(String, MatchKind)> {
        match registry.resolve(name) {
            Resolution::Found { entry, kind } => Some((entry.name.clone(), kind)),
            Resolution::Missing => None,
        }
    }

    #[test]
    fn standard_table_is_complete_and_unique() {
        let registry = standard();
        assert_eq!(registry.len(), 27);
        let names: Vec<_> = registry.entries().iter().map(|e| e.name.clone()).collect();
        let rebuilt = Registry::new(registry.entries().to_vec()).unwrap();
        assert_eq!(rebuilt.len(), names.len());
        assert_eq!(names[0], "inception1");
        assert_eq!(names[22], "squeezenet");
        assert_eq!(names[26], "torch_resnet152");
    }

    #[test]
    fn descriptors_point_at_family_paths() {
        let registry = standard();
        let resnet = registry.get("resnet50").unwrap();
        assert_eq!(resnet.descriptor.url, format!("{MODEL_URL}resnet/resnet50.h5"));
        assert_eq!(resnet.descriptor.cache_subdir, "models");
        assert_eq!(resnet.format, ArchiveFormat::Keras);

        let keras = registry.get("keras_resnet50").unwrap();
        assert_eq!(
            keras.descriptor.url,
            format!("{KERAS_URL}resnet50_weights_tf_dim_ordering_tf_kernels.h5")
        );

        for entry in registry.entries() {
            assert_eq!(ArchiveFormat::from_filename(&entry.descriptor.filename), Some(entry.format));
            assert!(!entry.origin.is_empty(), "{} has no origin", entry.name);
        }
    }

    #[test]
    fn custom_urls_are_honoured() {
        let urls = ArchiveUrls {
            keras: "http://mirror/keras/".into(),
            models: "http://mirror/".into(),
        };
        let registry = Registry::standard(&urls);
        assert_eq!(
            registry.get("squeezenet").unwrap().descriptor.url,
            "http://mirror/squeezenet/squeezenet.npz"
        );
    }

    #[test]
    fn exact_then_substring_then_miss() {
        let registry = standard();
        assert_eq!(resolved(&registry, "resnet50"), Some(("resnet50".into(), MatchKind::Exact)));
        assert_eq!(
            resolved(&registry, "custom_resnet50_variant"),
            Some(("resnet50".into(), MatchKind::Substring))
        );
        assert_eq!(resolved(&registry, "totally_unknown_model"), None);
        assert_eq!(resolved(&registry, ""), None);
    }

    #[test]
    fn substring_fallback_takes_first_in_table_order() {
        let registry = standard();
        // `resnet50` precedes `resnet50v2` in the table.
        assert_eq!(
            resolved(&registry, "custom_resnet50v2"),
            Some(("resnet50".into(), MatchKind::Substring))
        );
        assert_eq!(
            resolved(&registry, "My_MobileNet100_Copy"),
            Some(("mobilenet100".into(), MatchKind::Substring))
        );
    }

    #[test]
    fn exact_match_is_case_sensitive() {
        let registry = standard();
        assert_eq!(
            resolved(&registry, "ResNet50"),
            Some(("resnet50".into(), MatchKind::Substring))
        );
    }

    #[test]
    fn alternate_sources_resolve_only_exactly() {
        let registry = standard();
        for name in ["keras_resnet50", "torch_resnet50", "torch_resnet101", "torch_resnet152"] {
            assert_eq!(resolved(&registry, name), Some((name.into(), MatchKind::Exact)));
        }
        assert_eq!(
            resolved(&registry, "my_torch_resnet101"),
            Some(("resnet101".into(), MatchKind::Substring))
        );
        assert_eq!(
            resolved(&registry, "keras_resnet50_finetuned"),
            Some(("resnet50".into(), MatchKind::Substring))
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let entry = standard().get("squeezenet").unwrap().clone();
        let err = Registry::new(vec![entry.clone(), entry]).unwrap_err();
        assert!(matches!(err, ZooError::DuplicateModel(name) if name == "squeezenet"));
    }

    #[test]
    fn rule_tables_expand_index_major() {
        let fb = fb_resnet_torch_rules();
        assert_eq!(fb.len(), 24);
        assert_eq!(fb[0].anchor.as_str(), "4.0.0.1.0.weight");
        assert_eq!(fb[6].anchor.as_str(), "5.0.0.1.0.weight");
        assert!(fb.iter().all(|r| r.offset == -18));

        let block = fb_block_torch_rules();
        assert_eq!(block.len(), 20);
        assert!(block.iter().all(|r| r.offset == -15));
        assert!(block.iter().all(|r| !r.anchor.as_str().ends_with("1.0.bias")));
        // Batch norm bias survives; only the conv bias is dropped.
        assert!(block.iter().any(|r| r.anchor.as_str() == "4.0.0.1.1.bias"));

        let keras = keras_resnet50_rules();
        let anchors: Vec<_> = keras.iter().take(3).map(|r| (r.anchor.as_str(), r.offset)).collect();
        assert_eq!(
            anchors,
            [("bn2a_branch2c", -1), ("res2a_branch1", -6), ("bn2a_branch1", -6)]
        );
        assert_eq!(keras.len(), 12);
    }
}
