use indexmap::IndexMap;

/// Shared `All` node for default-selection borrows.
pub(crate) static ALL: FieldSelection = FieldSelection::All;

///
/// FieldSelection
///
/// Which parts of a record a read should return. Leaves are include
/// (`All`) or exclude (`Exclude`); `Fields` recurses into an identified
/// value's own fields (an empty `Fields` node fetches identity only);
/// `Each` wraps the element selection for an array-typed field.
///
/// Omission semantics: a `Fields` node targets exactly the names it
/// lists. Anything else is left unfetched, which is distinct from being
/// fetched-and-empty.
///

#[derive(Clone, Debug, PartialEq)]
pub enum FieldSelection {
    All,
    Exclude,
    Fields(IndexMap<String, FieldSelection>),
    Each(Box<FieldSelection>),
}

impl FieldSelection {
    /// Start an empty `Fields` node (identity only until fields are added).
    #[must_use]
    pub fn fields() -> Self {
        Self::Fields(IndexMap::new())
    }

    /// Add a sub-selection for one field. Only meaningful on a `Fields`
    /// node; any other shape is first replaced by one.
    #[must_use]
    pub fn field(self, name: impl Into<String>, selection: Self) -> Self {
        let mut map = match self {
            Self::Fields(map) => map,
            _ => IndexMap::new(),
        };
        map.insert(name.into(), selection);
        Self::Fields(map)
    }

    /// Shorthand for a `Fields` node including the named fields whole.
    #[must_use]
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fields(names.into_iter().map(|n| (n.into(), Self::All)).collect())
    }

    /// Wrap an element selection for an array-typed field.
    #[must_use]
    pub fn each(element: Self) -> Self {
        Self::Each(Box::new(element))
    }

    #[must_use]
    pub const fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Whether a read under this selection targets nothing at all.
    #[must_use]
    pub fn is_identity_only(&self) -> bool {
        match self {
            Self::Exclude => true,
            Self::Fields(map) => map.is_empty(),
            Self::All | Self::Each(_) => false,
        }
    }

    /// The sub-selection a record-level read applies to one field, or
    /// `None` when the field is not targeted.
    #[must_use]
    pub fn narrow(&self, field: &str) -> Option<&Self> {
        match self {
            Self::All => Some(&ALL),
            Self::Exclude | Self::Each(_) => None,
            Self::Fields(map) => match map.get(field) {
                None | Some(Self::Exclude) => None,
                Some(sub) => Some(sub),
            },
        }
    }

    /// The per-element selection this node applies to an array value, or
    /// `None` when the shape does not fit an array.
    #[must_use]
    pub fn element(&self) -> Option<&Self> {
        match self {
            Self::All => Some(&ALL),
            Self::Each(inner) => Some(inner),
            Self::Exclude | Self::Fields(_) => None,
        }
    }
}

impl Default for FieldSelection {
    fn default() -> Self {
        Self::All
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_targets_every_field() {
        let sel = FieldSelection::All;
        assert_eq!(sel.narrow("title"), Some(&FieldSelection::All));
        assert_eq!(sel.narrow("year"), Some(&FieldSelection::All));
    }

    #[test]
    fn fields_node_targets_listed_names_only() {
        let sel = FieldSelection::fields().field("title", FieldSelection::All);
        assert_eq!(sel.narrow("title"), Some(&FieldSelection::All));
        assert_eq!(sel.narrow("year"), None);
    }

    #[test]
    fn excluded_field_is_untargeted() {
        let sel = FieldSelection::fields().field("title", FieldSelection::Exclude);
        assert_eq!(sel.narrow("title"), None);
    }

    #[test]
    fn empty_fields_node_is_identity_only() {
        assert!(FieldSelection::fields().is_identity_only());
        assert!(FieldSelection::Exclude.is_identity_only());
        assert!(!FieldSelection::All.is_identity_only());
        assert!(!FieldSelection::only(["title"]).is_identity_only());
    }

    #[test]
    fn element_selection_shapes() {
        let each = FieldSelection::each(FieldSelection::fields());
        assert_eq!(each.element(), Some(&FieldSelection::fields()));
        assert_eq!(FieldSelection::All.element(), Some(&FieldSelection::All));
        assert_eq!(FieldSelection::only(["x"]).element(), None);
    }
}
