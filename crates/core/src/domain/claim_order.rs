// Claim ordering

/// Columns a claim may be ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Priority,
    NextRunAt,
    LastRunAt,
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Total order used to pick one job among all eligible ones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOrder {
    keys: Vec<(SortField, SortDirection)>,
}

impl ClaimOrder {
    pub fn new(keys: Vec<(SortField, SortDirection)>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[(SortField, SortDirection)] {
        &self.keys
    }
}

impl Default for ClaimOrder {
    /// Priority descending, then earliest next run
    fn default() -> Self {
        Self::new(vec![
            (SortField::Priority, SortDirection::Desc),
            (SortField::NextRunAt, SortDirection::Asc),
        ])
    }
}
