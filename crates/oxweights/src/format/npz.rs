use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use tracing::debug;
use zip::ZipArchive;

use crate::error::{Result, ZooError};
use crate::format::npy::{self, NpyContents};
use crate::format::pickle::Value;
use crate::weights::WeightGroup;

/// Read every `.npy` member of an `.npz` bundle in stored order.
pub fn read_npz(path: &Path) -> Result<Vec<WeightGroup>> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    read_npz_archive(&mut archive)
}

/// Members come back in central-directory order. Never sort them: move-rule offsets
/// are written against this order.
///
/// Bundles that pack every array into a `values` object array (with the variable
/// names in a parallel `names` object array) are unpacked in `values` order.
pub fn read_npz_archive<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<WeightGroup>> {
    let mut groups = Vec::with_capacity(archive.len());
    let mut names = None;
    let mut values = None;
    for i in 0..archive.len() {
        let mut member = archive.by_index(i)?;
        if member.is_dir() {
            continue;
        }
        let member_name = member.name().to_string();
        let Some(key) = member_name.strip_suffix(".npy") else {
            debug!("npz: skipping non-array member {member_name}");
            continue;
        };

        let mut bytes = Vec::with_capacity(member.size() as usize);
        member.read_to_end(&mut bytes)?;
        match npy::read_npy_contents(key, &bytes)? {
            NpyContents::Array(entry) => {
                debug!("npz: {} {:?} {:?}", entry.name, entry.shape, entry.dtype());
                groups.push(WeightGroup::single(entry));
            }
            NpyContents::Objects(items) => match key {
                "names" => names = Some(items),
                "values" => values = Some(items),
                other => {
                    return Err(ZooError::UnsupportedDType(format!(
                        "npz member \"{other}\" is an object array"
                    )));
                }
            },
        }
    }

    match (names, values) {
        (names, Some(values)) => {
            if !groups.is_empty() {
                debug!("npz: ignoring {} plain arrays next to packed values", groups.len());
            }
            unpack(names, values)
        }
        (Some(_), None) => Err(ZooError::Npy("npz has \"names\" but no \"values\"".into())),
        (None, None) => Ok(groups),
    }
}

fn unpack(names: Option<Vec<Value>>, values: Vec<Value>) -> Result<Vec<WeightGroup>> {
    if let Some(names) = &names {
        if names.len() != values.len() {
            return Err(ZooError::Npy(format!(
                "npz has {} names for {} values",
                names.len(),
                values.len()
            )));
        }
    }
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let name = match &names {
                Some(names) => names[i].text().ok_or_else(|| {
                    ZooError::Npy(format!("name #{i} is {:?}, not a string", names[i]))
                })?,
                None => i.to_string(),
            };
            let Value::Array(array) = value else {
                return Err(ZooError::Npy(format!("value \"{name}\" is not an array")));
            };
            let entry = array.borrow().to_entry(&name)?;
            debug!("npz: {} {:?} {:?}", entry.name, entry.shape, entry.dtype());
            Ok(WeightGroup::single(entry))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use crate::format::npy::{encode_f32, encode_objects};
    use crate::format::pickle::testing::Pickler;
    use crate::weights::TensorData;

    fn bundle(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in members {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn keeps_stored_order() {
        let bytes = bundle(&[
            ("zeta.npy", encode_f32(&[1], &[1.0])),
            ("alpha.npy", encode_f32(&[2], &[2.0, 3.0])),
            ("mid/beta.npy", encode_f32(&[1], &[4.0])),
        ]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let groups = read_npz_archive(&mut archive).unwrap();

        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha", "mid/beta"]);
        assert_eq!(groups[1].entries[0].data, TensorData::F32(vec![2.0, 3.0]));
    }

    #[test]
    fn skips_non_array_members() {
        let bytes = bundle(&[
            ("README", b"not an array".to_vec()),
            ("w.npy", encode_f32(&[1], &[0.5])),
        ]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let groups = read_npz_archive(&mut archive).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "w");
    }

    #[test]
    fn reads_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("toy.npz");
        std::fs::write(&path, bundle(&[("w.npy", encode_f32(&[2], &[1.0, 2.0]))])).unwrap();
        let groups = read_npz(&path).unwrap();
        assert_eq!(groups[0].entries[0].shape, vec![2]);
    }

    fn packed(names: &[&str], arrays: &[(Vec<usize>, Vec<f32>)]) -> Vec<u8> {
        let names_pkl = Pickler::new()
            .object_array(names.len(), |p| {
                for name in names {
                    p.bytes(name.as_bytes());
                }
            })
            .finish();
        let values_pkl = Pickler::new()
            .object_array(arrays.len(), |p| {
                for (shape, data) in arrays {
                    p.ndarray_f32(shape, data);
                }
            })
            .finish();
        bundle(&[
            ("names.npy", encode_objects(names.len(), &names_pkl)),
            ("values.npy", encode_objects(arrays.len(), &values_pkl)),
        ])
    }

    #[test]
    fn unpacks_names_and_values() {
        let bytes = packed(
            &["conv1/weights:0", "conv1/biases:0"],
            &[(vec![1, 2], vec![1.0, 2.0]), (vec![2], vec![3.0, 4.0])],
        );
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let groups = read_npz_archive(&mut archive).unwrap();

        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["conv1/weights:0", "conv1/biases:0"]);
        assert_eq!(groups[0].entries[0].shape, vec![1, 2]);
        assert_eq!(groups[1].entries[0].data, TensorData::F32(vec![3.0, 4.0]));
    }

    #[test]
    fn values_without_names_are_numbered() {
        let values_pkl = Pickler::new()
            .object_array(2, |p| {
                p.ndarray_f32(&[1], &[7.0]).ndarray_f32(&[1], &[8.0]);
            })
            .finish();
        let bytes = bundle(&[("values.npy", encode_objects(2, &values_pkl))]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let groups = read_npz_archive(&mut archive).unwrap();
        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["0", "1"]);
    }

    #[test]
    fn mismatched_names_are_rejected() {
        let bytes = packed(&["only"], &[(vec![1], vec![1.0]), (vec![1], vec![2.0])]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let err = read_npz_archive(&mut archive).unwrap_err();
        assert!(err.to_string().contains("1 names for 2 values"));
    }
}
