//! In-memory read model store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use rampart_core::error::DomainError;
use rampart_core::read_store::{Criteria, ReadModel, ReadStore};

type Key = (String, String);

/// Read models keyed by `(model_type, id)`.
#[derive(Debug, Default)]
pub struct InMemoryReadStore {
    models: RwLock<HashMap<Key, ReadModel>>,
}

impl InMemoryReadStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(id: &str, model_type: &str) -> Key {
    (model_type.to_owned(), id.to_owned())
}

fn poisoned() -> DomainError {
    DomainError::Infrastructure("read store lock poisoned".into())
}

#[async_trait]
impl ReadStore for InMemoryReadStore {
    async fn get_by_id(&self, id: &str, model_type: &str) -> Result<Option<ReadModel>, DomainError> {
        let models = self.models.read().map_err(|_| poisoned())?;
        Ok(models.get(&key(id, model_type)).cloned())
    }

    async fn query(&self, criteria: &Criteria) -> Result<Vec<ReadModel>, DomainError> {
        let models = self.models.read().map_err(|_| poisoned())?;
        Ok(criteria.apply(models.values()))
    }

    async fn count(&self, criteria: &Criteria) -> Result<usize, DomainError> {
        let models = self.models.read().map_err(|_| poisoned())?;
        Ok(models.values().filter(|m| criteria.matches(m)).count())
    }

    async fn upsert(&self, model: ReadModel) -> Result<(), DomainError> {
        let mut models = self.models.write().map_err(|_| poisoned())?;
        models.insert(key(&model.id, &model.model_type), model);
        Ok(())
    }

    async fn delete(&self, id: &str, model_type: &str) -> Result<bool, DomainError> {
        let mut models = self.models.write().map_err(|_| poisoned())?;
        Ok(models.remove(&key(id, model_type)).is_some())
    }

    async fn clear(&self, model_type: &str) -> Result<usize, DomainError> {
        let mut models = self.models.write().map_err(|_| poisoned())?;
        let before = models.len();
        models.retain(|(t, _), _| t != model_type);
        Ok(before - models.len())
    }
}
