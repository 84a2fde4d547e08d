//! Produce solutions: the cached list plus per-solution drafts

use std::sync::Arc;

use kaa_api::{ApiClient, IdolOption, ProduceSolution};

use crate::backend::SolutionBackend;
use crate::cache::{QueryCache, QueryKey};
use crate::document::DocumentSync;
use crate::error::Result;
use crate::mutation::OptimisticMutation;

#[derive(Clone)]
pub struct SolutionsController {
    client: ApiClient,
    cache: QueryCache,
    key: QueryKey,
    delete: OptimisticMutation<Vec<ProduceSolution>, String, ()>,
}

impl SolutionsController {
    #[must_use]
    pub fn new(client: ApiClient, cache: QueryCache) -> Self {
        let key = QueryKey::solutions();
        let delete = {
            let client = client.clone();
            OptimisticMutation::new(cache.clone(), key.clone(), move |id: String| {
                let client = client.clone();
                async move { client.delete_solution(&id).await }
            })
        }
        .with_updater(|list: &mut Vec<ProduceSolution>, id: &String| {
            list.retain(|s| &s.id != id);
        });

        Self {
            client,
            cache,
            key,
            delete,
        }
    }

    /// Fetch the list into the cache
    ///
    /// # Errors
    /// Request failure
    pub async fn list(&self) -> Result<Vec<ProduceSolution>> {
        self.cache.fetch(&self.key, self.client.list_solutions()).await
    }

    #[must_use]
    pub fn cached(&self) -> Option<Vec<ProduceSolution>> {
        self.cache.get(&self.key)
    }

    /// # Errors
    /// Request failure
    pub async fn get(&self, id: &str) -> Result<ProduceSolution> {
        self.cache
            .fetch(&QueryKey::solution(id), self.client.get_solution(id))
            .await
    }

    /// Create a solution and append it to the cached list
    ///
    /// # Errors
    /// Request failure
    pub async fn create(&self, name: &str, description: Option<&str>) -> Result<ProduceSolution> {
        self.cache.cancel_queries(&self.key);
        let created = self.client.create_solution(name, description).await?;
        tracing::info!("Created produce solution {} ({})", created.id, created.name);
        self.cache
            .update::<Vec<ProduceSolution>, _>(&self.key, |list| list.push(created.clone()));
        self.cache.invalidate(&self.key);
        Ok(created)
    }

    /// Delete a solution, removing it from the cached list right away
    ///
    /// # Errors
    /// Request failure; the list is restored first
    pub async fn delete(&self, id: &str) -> Result<()> {
        tracing::info!("Deleting produce solution {}", id);
        self.delete.mutate(id.to_string()).await?;
        self.cache.remove(&QueryKey::solution(id));
        Ok(())
    }

    /// Editable draft of one solution's `data`
    ///
    /// The draft is not loaded yet; call [`DocumentSync::load`].
    #[must_use]
    pub fn draft(&self, id: &str) -> DocumentSync {
        DocumentSync::new(Arc::new(SolutionBackend::new(self.client.clone(), id)))
    }

    /// Idol choices for the solution editor, cached until invalidated
    ///
    /// # Errors
    /// Request failure
    pub async fn idols(&self) -> Result<Vec<IdolOption>> {
        self.cache
            .ensure(&QueryKey::idols(), || self.client.list_idols())
            .await
    }
}
