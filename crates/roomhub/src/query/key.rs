use std::fmt;

use chrono::NaiveDate;

/// Top-level family a cached resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Rooms,
    CurrentUser,
    Amenities,
    Categories,
    Availability,
}

impl ResourceKind {
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Rooms => "rooms",
            ResourceKind::CurrentUser => "me",
            ResourceKind::Amenities => "amenities",
            ResourceKind::Categories => "categories",
            ResourceKind::Availability => "availability",
        }
    }
}

/// Optional third component of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Qualifier {
    Reviews,
    Kind(String),
    /// Endpoints kept verbatim as ISO dates; two ranges share a key only when
    /// both endpoints are identical.
    Range { check_in: String, check_out: String },
}

impl Qualifier {
    pub fn range(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Qualifier::Range {
            check_in: check_in.format("%Y-%m-%d").to_string(),
            check_out: check_out.format("%Y-%m-%d").to_string(),
        }
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Reviews => f.write_str("reviews"),
            Qualifier::Kind(kind) => write!(f, "kind={kind}"),
            Qualifier::Range {
                check_in,
                check_out,
            } => write!(f, "{check_in}..{check_out}"),
        }
    }
}

/// `(resourceKind, resourceId?, qualifier?)`, compared structurally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    pub kind: ResourceKind,
    pub id: Option<String>,
    pub qualifier: Option<Qualifier>,
}

impl QueryKey {
    pub fn of(kind: ResourceKind) -> Self {
        Self {
            kind,
            id: None,
            qualifier: None,
        }
    }

    pub fn resource(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: Some(id.into()),
            qualifier: None,
        }
    }

    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    pub fn rooms() -> Self {
        Self::of(ResourceKind::Rooms)
    }

    pub fn room(room_pk: impl Into<String>) -> Self {
        Self::resource(ResourceKind::Rooms, room_pk)
    }

    pub fn room_reviews(room_pk: impl Into<String>) -> Self {
        Self::room(room_pk).with_qualifier(Qualifier::Reviews)
    }

    pub fn current_user() -> Self {
        Self::of(ResourceKind::CurrentUser)
    }

    pub fn amenities() -> Self {
        Self::of(ResourceKind::Amenities)
    }

    pub fn categories(kind: impl Into<String>) -> Self {
        Self::of(ResourceKind::Categories).with_qualifier(Qualifier::Kind(kind.into()))
    }

    pub fn availability(
        room_pk: impl Into<String>,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Self {
        Self::resource(ResourceKind::Availability, room_pk)
            .with_qualifier(Qualifier::range(check_in, check_out))
    }

    /// Same kind and id, any qualifier.
    pub fn is_related(&self, other: &QueryKey) -> bool {
        self.kind == other.kind && self.id == other.id
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.label())?;
        if let Some(id) = &self.id {
            write!(f, "/{id}")?;
        }
        if let Some(qualifier) = &self.qualifier {
            write!(f, "/{qualifier}")?;
        }
        Ok(())
    }
}

/// Selects cache entries for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Exactly this key.
    Exact(QueryKey),
    /// Every key of this kind, with or without id.
    Kind(ResourceKind),
    /// `(kind, id, *)`.
    Resource(ResourceKind, String),
}

impl KeyPattern {
    pub fn exact(key: QueryKey) -> Self {
        KeyPattern::Exact(key)
    }

    pub fn kind(kind: ResourceKind) -> Self {
        KeyPattern::Kind(kind)
    }

    pub fn resource(kind: ResourceKind, id: impl Into<String>) -> Self {
        KeyPattern::Resource(kind, id.into())
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            KeyPattern::Exact(expected) => expected == key,
            KeyPattern::Kind(kind) => key.kind == *kind,
            KeyPattern::Resource(kind, id) => {
                key.kind == *kind && key.id.as_deref() == Some(id.as_str())
            }
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Exact(key) => write!(f, "{key}"),
            KeyPattern::Kind(kind) => write!(f, "{}/*", kind.label()),
            KeyPattern::Resource(kind, id) => write!(f, "{}/{id}/*", kind.label()),
        }
    }
}
