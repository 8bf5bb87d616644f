//! Origin check applied to upgrade requests.

use std::fmt;
use std::sync::Arc;

/// Predicate over the request's `Origin` header (`None` when absent).
pub type OriginCheck = Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>;

/// Which browser origins may open a connection.
#[derive(Clone, Default)]
pub enum OriginPolicy {
    /// Accept every request.
    #[default]
    AllowAll,
    /// Accept only requests whose `Origin` exactly matches an entry.
    /// Requests without an `Origin` header are rejected.
    AllowList(Vec<String>),
    /// Caller-supplied predicate.
    Custom(OriginCheck),
}

impl OriginPolicy {
    /// `None` allows all origins; `Some(list)` restricts to `list`.
    pub fn from_allowed(allowed: Option<Vec<String>>) -> Self {
        allowed.map_or(Self::AllowAll, Self::AllowList)
    }

    /// Wrap a predicate.
    pub fn custom(check: impl Fn(Option<&str>) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(check))
    }

    /// Whether a request carrying `origin` may upgrade.
    pub fn permits(&self, origin: Option<&str>) -> bool {
        match self {
            Self::AllowAll => true,
            Self::AllowList(list) => origin.is_some_and(|o| list.iter().any(|a| a == o)),
            Self::Custom(check) => check(origin),
        }
    }
}

impl fmt::Debug for OriginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllowAll => f.write_str("AllowAll"),
            Self::AllowList(list) => f.debug_tuple("AllowList").field(list).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
