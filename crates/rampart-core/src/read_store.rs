//! Read model storage for projections.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;
use crate::query::{Pagination, SortOrder, Sorting};

/// A denormalized view produced by a projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadModel {
    /// View identifier, unique per `model_type`.
    pub id: String,
    /// View type tag, e.g. `"UserView"`.
    pub model_type: String,
    /// Version of the source aggregate reflected in `data`.
    pub version: i64,
    /// View contents.
    pub data: Value,
    /// When the view was last written.
    pub updated_at: DateTime<Utc>,
}

impl ReadModel {
    /// Serializes `view` into a read model.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if `view` cannot be encoded.
    pub fn from_view<T: Serialize>(
        id: impl Into<String>,
        model_type: impl Into<String>,
        version: i64,
        view: &T,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            id: id.into(),
            model_type: model_type.into(),
            version,
            data: serde_json::to_value(view)?,
            updated_at,
        })
    }

    /// Decodes `data` into a typed view.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if `data` does not decode.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DomainError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Looks up a field for filtering and sorting. `id` and `version` refer
    /// to the envelope; anything else to a top-level key of `data`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "version" => Some(Value::from(self.version)),
            _ => self.data.get(name).cloned(),
        }
    }
}

/// Opaque predicate applied by the store.
pub type Predicate = Arc<dyn Fn(&ReadModel) -> bool + Send + Sync>;

/// Selection, ordering and windowing of read models.
#[derive(Clone, Default)]
pub struct Criteria {
    /// Restrict to one view type.
    pub model_type: Option<String>,
    /// Field equality filters.
    pub filters: BTreeMap<String, Value>,
    /// Handler-defined predicate.
    pub predicate: Option<Predicate>,
    /// Sort specification; ties and unsorted results order by id.
    pub sort: Option<Sorting>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Results to skip.
    pub offset: usize,
}

impl Criteria {
    /// Selects all views of `model_type`.
    #[must_use]
    pub fn for_type(model_type: impl Into<String>) -> Self {
        Self {
            model_type: Some(model_type.into()),
            ..Self::default()
        }
    }

    /// Adds an equality filter.
    #[must_use]
    pub fn filter_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    /// Adds a predicate.
    #[must_use]
    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ReadModel) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Sets the sort.
    #[must_use]
    pub fn sorted_by(mut self, sorting: Sorting) -> Self {
        self.sort = Some(sorting);
        self
    }

    /// Windows the result to one page.
    #[must_use]
    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.offset = pagination.offset();
        self.limit = Some(pagination.limit());
        self
    }

    /// Returns `true` if `model` passes type, filters and predicate.
    #[must_use]
    pub fn matches(&self, model: &ReadModel) -> bool {
        if self
            .model_type
            .as_ref()
            .is_some_and(|t| t != &model.model_type)
        {
            return false;
        }
        let filters_pass = self
            .filters
            .iter()
            .all(|(field, expected)| model.field(field).as_ref() == Some(expected));
        filters_pass && self.predicate.as_ref().is_none_or(|p| p(model))
    }

    /// Orders two models by the sort field, then by id.
    #[must_use]
    pub fn compare(&self, a: &ReadModel, b: &ReadModel) -> Ordering {
        let by_field = self.sort.as_ref().map_or(Ordering::Equal, |sort| {
            match (a.field(&sort.field), b.field(&sort.field)) {
                (Some(x), Some(y)) => {
                    let ord = compare_values(&x, &y);
                    match sort.order {
                        SortOrder::Asc => ord,
                        SortOrder::Desc => ord.reverse(),
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });
        by_field.then_with(|| a.id.cmp(&b.id))
    }

    /// Filters, sorts and windows `models`.
    pub fn apply<'a, I>(&self, models: I) -> Vec<ReadModel>
    where
        I: IntoIterator<Item = &'a ReadModel>,
    {
        let mut selected: Vec<&ReadModel> = models.into_iter().filter(|m| self.matches(m)).collect();
        selected.sort_by(|a, b| self.compare(a, b));
        selected
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

impl fmt::Debug for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Criteria")
            .field("model_type", &self.model_type)
            .field("filters", &self.filters)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .field("sort", &self.sort)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish()
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: numbers numerically, strings lexically,
/// mixed types by kind.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a)
            .cmp(&type_rank(b))
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

/// Keyed, criteria-filterable store of read models.
#[async_trait]
pub trait ReadStore: Send + Sync {
    /// Returns one view, if present.
    async fn get_by_id(&self, id: &str, model_type: &str) -> Result<Option<ReadModel>, DomainError>;

    /// Returns the views selected by `criteria`, sorted and windowed.
    async fn query(&self, criteria: &Criteria) -> Result<Vec<ReadModel>, DomainError>;

    /// Counts the views matching `criteria`, ignoring limit and offset.
    async fn count(&self, criteria: &Criteria) -> Result<usize, DomainError>;

    /// Inserts or replaces a view.
    async fn upsert(&self, model: ReadModel) -> Result<(), DomainError>;

    /// Removes a view. Returns `false` if it did not exist.
    async fn delete(&self, id: &str, model_type: &str) -> Result<bool, DomainError>;

    /// Removes every view of `model_type` and returns how many were removed.
    async fn clear(&self, model_type: &str) -> Result<usize, DomainError>;
}
