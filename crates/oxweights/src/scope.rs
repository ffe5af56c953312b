use std::fmt;

/// Structured identifier of a target model, e.g. `resnet50` or `resnet50/conv1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope(String);

impl Scope {
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First path component: the name used for registry lookup.
    pub fn model_name(&self) -> &str {
        self.0
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Scope {
    fn from(scope: &str) -> Self {
        Self::new(scope)
    }
}

impl From<String> for Scope {
    fn from(scope: String) -> Self {
        Self(scope)
    }
}

impl From<&String> for Scope {
    fn from(scope: &String) -> Self {
        Self(scope.clone())
    }
}

/// One scope or an ordered batch of them.
pub trait IntoScopes {
    fn into_scopes(self) -> Vec<Scope>;
}

impl IntoScopes for Scope {
    fn into_scopes(self) -> Vec<Scope> {
        vec![self]
    }
}

impl IntoScopes for &str {
    fn into_scopes(self) -> Vec<Scope> {
        vec![Scope::from(self)]
    }
}

impl IntoScopes for String {
    fn into_scopes(self) -> Vec<Scope> {
        vec![Scope::from(self)]
    }
}

impl<T: Into<Scope>> IntoScopes for Vec<T> {
    fn into_scopes(self) -> Vec<Scope> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<Scope>, const N: usize> IntoScopes for [T; N] {
    fn into_scopes(self) -> Vec<Scope> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Clone + Into<Scope>> IntoScopes for &[T] {
    fn into_scopes(self) -> Vec<Scope> {
        self.iter().cloned().map(Into::into).collect()
    }
}
