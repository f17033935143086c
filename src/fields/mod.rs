//! Mapping taxonomy values onto tracker enum options.
//!
//! Repository names, creators, entity types and labels are stored in enum
//! custom fields. The tracker's option list is the only cache: every call
//! fetches the field once, matches by exact string, and creates whatever is
//! missing. Nothing is memoized across calls, so concurrent syncs for
//! different entities never share mutable state here.

use tracing::{debug, instrument};

use crate::hash::rolling_hash;
use crate::tracker::{FieldOption, Result, TaskService};
use crate::types::{FieldId, OptionId};

/// Colors the tracker accepts for enum options.
pub const OPTION_COLORS: [&str; 16] = [
    "none",
    "red",
    "orange",
    "yellow-orange",
    "yellow",
    "yellow-green",
    "green",
    "blue-green",
    "aqua",
    "blue",
    "indigo",
    "purple",
    "magenta",
    "hot-pink",
    "pink",
    "cool-gray",
];

/// The color for a newly created option. Depends only on `value`.
pub fn option_color(value: &str) -> &'static str {
    OPTION_COLORS[rolling_hash(value) as usize % OPTION_COLORS.len()]
}

/// Resolves option ids for enum custom fields, creating options on first
/// sight.
pub struct FieldMapper<'a, T> {
    tracker: &'a T,
}

impl<'a, T: TaskService> FieldMapper<'a, T> {
    pub fn new(tracker: &'a T) -> Self {
        FieldMapper { tracker }
    }

    /// Returns the option id for `value` on `field`.
    #[instrument(skip(self), fields(field = %field))]
    pub async fn resolve_option(&self, field: &FieldId, value: &str) -> Result<OptionId> {
        let mut options = self.tracker.get_field(field).await?.options;
        self.find_or_create(field, &mut options, value).await
    }

    /// Returns option ids for every distinct value, in first-seen order.
    ///
    /// The field is fetched once; options created during the call are reused
    /// for repeated values.
    #[instrument(skip(self, values), fields(field = %field))]
    pub async fn resolve_multi_option<'v, I>(&self, field: &FieldId, values: I) -> Result<Vec<OptionId>>
    where
        I: IntoIterator<Item = &'v str>,
    {
        let values: Vec<&str> = values.into_iter().collect();
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let mut options = self.tracker.get_field(field).await?.options;
        let mut ids: Vec<OptionId> = Vec::with_capacity(values.len());
        for value in values {
            let id = self.find_or_create(field, &mut options, value).await?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn find_or_create(
        &self,
        field: &FieldId,
        options: &mut Vec<FieldOption>,
        value: &str,
    ) -> Result<OptionId> {
        if let Some(existing) = options.iter().find(|o| o.value == value) {
            return Ok(existing.option_id.clone());
        }

        let color = option_color(value);
        debug!(value, color, "Creating enum option");
        let created = self
            .tracker
            .create_field_option(field, value, color)
            .await?;
        let id = created.option_id.clone();
        options.push(created);
        Ok(id)
    }
}
