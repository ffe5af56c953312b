use tracing::debug;

use crate::error::{Result, ZooError};
use crate::scope::Scope;
use crate::weights::WeightEntry;

/// What the target knows about one of its variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableSpec {
    pub name: Option<String>,
    /// `None` skips the shape check for this variable.
    pub shape: Option<Vec<usize>>,
}

impl VariableSpec {
    pub fn new(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            name: Some(name.into()),
            shape: Some(shape),
        }
    }

    pub fn shaped(shape: Vec<usize>) -> Self {
        Self {
            name: None,
            shape: Some(shape),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Assignment {
    /// The i-th weight goes to the i-th variable.
    #[default]
    Positional,
    /// Weights are handed over paired with variable names.
    Keyed,
}

/// A model that receives pretrained weights.
pub trait ModelTarget {
    /// Trainable variables under `scope`, in canonical order.
    fn variables(&self, scope: &Scope) -> Result<Vec<VariableSpec>>;

    fn assign(&mut self, scope: &Scope, index: usize, weight: WeightEntry) -> Result<()>;

    fn assignment(&self) -> Assignment {
        Assignment::Positional
    }

    fn validate(
        &self,
        scope: &Scope,
        index: usize,
        variable: &VariableSpec,
        weight: &WeightEntry,
    ) -> Result<()> {
        match &variable.shape {
            Some(expected) if *expected != weight.shape => Err(ZooError::ShapeMismatch {
                scope: scope.to_string(),
                index,
                name: variable.name.clone().unwrap_or_else(|| weight.name.clone()),
                expected: expected.clone(),
                actual: weight.shape.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn assign_keyed(&mut self, scope: &Scope, _weights: Vec<(String, WeightEntry)>) -> Result<()> {
        Err(ZooError::Other(format!(
            "target under \"{scope}\" does not accept keyed assignment"
        )))
    }

    /// Called for scopes with no registered weights.
    fn initialize(&mut self, _scope: &Scope) -> Result<()> {
        Ok(())
    }
}

/// Bind `weights` to the variables under `scope`.
///
/// Counts and shapes are all checked before the first write, so a failed call leaves
/// the target untouched.
pub fn assign_weights<T: ModelTarget + ?Sized>(
    target: &mut T,
    scope: &Scope,
    weights: Vec<WeightEntry>,
) -> Result<usize> {
    let variables = target.variables(scope)?;
    if variables.len() != weights.len() {
        return Err(ZooError::CountMismatch {
            scope: scope.to_string(),
            weights: weights.len(),
            variables: variables.len(),
        });
    }
    for (index, (variable, weight)) in variables.iter().zip(&weights).enumerate() {
        target.validate(scope, index, variable, weight)?;
    }

    let count = weights.len();
    match target.assignment() {
        Assignment::Positional => {
            for (index, weight) in weights.into_iter().enumerate() {
                target.assign(scope, index, weight)?;
            }
        }
        Assignment::Keyed => {
            let keyed = variables
                .into_iter()
                .zip(weights)
                .enumerate()
                .map(|(index, (variable, weight))| {
                    variable
                        .name
                        .map(|name| (name, weight))
                        .ok_or_else(|| ZooError::UnnamedVariable {
                            scope: scope.to_string(),
                            index,
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            target.assign_keyed(scope, keyed)?;
        }
    }
    debug!("{scope}: assigned {count} weights");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::TensorData;

    #[derive(Default)]
    struct Recorder {
        specs: Vec<VariableSpec>,
        mode: Assignment,
        positional: Vec<(usize, String)>,
        keyed: Vec<(String, String)>,
    }

    impl ModelTarget for Recorder {
        fn variables(&self, _: &Scope) -> Result<Vec<VariableSpec>> {
            Ok(self.specs.clone())
        }

        fn assign(&mut self, _: &Scope, index: usize, weight: WeightEntry) -> Result<()> {
            self.positional.push((index, weight.name));
            Ok(())
        }

        fn assignment(&self) -> Assignment {
            self.mode
        }

        fn assign_keyed(&mut self, _: &Scope, weights: Vec<(String, WeightEntry)>) -> Result<()> {
            self.keyed
                .extend(weights.into_iter().map(|(var, w)| (var, w.name)));
            Ok(())
        }
    }

    fn weight(name: &str, shape: Vec<usize>) -> WeightEntry {
        let n = shape.iter().product();
        WeightEntry::new(name, shape, TensorData::F32(vec![0.0; n])).unwrap()
    }

    #[test]
    fn positional_binding_in_order() {
        let mut target = Recorder {
            specs: vec![VariableSpec::shaped(vec![2, 2]), VariableSpec::default()],
            ..Default::default()
        };
        let n = assign_weights(
            &mut target,
            &Scope::from("net"),
            vec![weight("k", vec![2, 2]), weight("b", vec![7])],
        )
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(target.positional, [(0, "k".into()), (1, "b".into())]);
    }

    #[test]
    fn count_mismatch_assigns_nothing() {
        let mut target = Recorder {
            specs: vec![VariableSpec::default(); 3],
            ..Default::default()
        };
        let err = assign_weights(&mut target, &Scope::from("net"), vec![weight("a", vec![1])])
            .unwrap_err();
        assert!(matches!(
            err,
            ZooError::CountMismatch {
                weights: 1,
                variables: 3,
                ..
            }
        ));
        assert!(target.positional.is_empty());
    }

    #[test]
    fn shape_mismatch_is_caught_before_any_write() {
        let mut target = Recorder {
            specs: vec![
                VariableSpec::new("conv/kernel", vec![3]),
                VariableSpec::new("conv/bias", vec![4]),
            ],
            ..Default::default()
        };
        let err = assign_weights(
            &mut target,
            &Scope::from("net"),
            vec![weight("k", vec![3]), weight("b", vec![5])],
        )
        .unwrap_err();
        match err {
            ZooError::ShapeMismatch {
                index,
                name,
                expected,
                actual,
                ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(name, "conv/bias");
                assert_eq!(expected, [4]);
                assert_eq!(actual, [5]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(target.positional.is_empty());
    }

    #[test]
    fn keyed_binding_pairs_names() {
        let mut target = Recorder {
            specs: vec![
                VariableSpec::new("fc/w", vec![1]),
                VariableSpec::new("fc/b", vec![1]),
            ],
            mode: Assignment::Keyed,
            ..Default::default()
        };
        assign_weights(
            &mut target,
            &Scope::from("net"),
            vec![weight("x", vec![1]), weight("y", vec![1])],
        )
        .unwrap();
        assert_eq!(
            target.keyed,
            [("fc/w".to_string(), "x".to_string()), ("fc/b".into(), "y".into())]
        );
        assert!(target.positional.is_empty());
    }

    #[test]
    fn keyed_binding_needs_names() {
        let mut target = Recorder {
            specs: vec![VariableSpec::shaped(vec![1])],
            mode: Assignment::Keyed,
            ..Default::default()
        };
        let err = assign_weights(&mut target, &Scope::from("net"), vec![weight("x", vec![1])])
            .unwrap_err();
        assert!(matches!(err, ZooError::UnnamedVariable { index: 0, .. }));
        assert!(target.keyed.is_empty());
    }

    #[test]
    fn default_hooks_refuse_keyed_and_accept_initialize() {
        struct Positional;
        impl ModelTarget for Positional {
            fn variables(&self, _: &Scope) -> Result<Vec<VariableSpec>> {
                Ok(vec![VariableSpec::shaped(vec![1])])
            }
            fn assign(&mut self, _: &Scope, _: usize, _: WeightEntry) -> Result<()> {
                Ok(())
            }
        }

        let scope = Scope::from("net");
        let mut target = Positional;
        let err = target
            .assign_keyed(&scope, vec![("fc/w".into(), weight("x", vec![1]))])
            .unwrap_err();
        assert!(err.to_string().contains("does not accept keyed assignment"));
        assert!(target.initialize(&scope).is_ok());
    }
}
