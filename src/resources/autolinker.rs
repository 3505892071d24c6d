//! Gap filling
//!
//! Lookups that miss mark the value in a fetch tracker and raise the shared
//! dirty flag. The autolinker wakes on the flag (or its interval), drains the
//! missing filters of every collection and fetches them.

use crate::collection::{CollectionIndex, MissingFilter};
use crate::model::{Filter, Reference, Value};
use crate::resources::{ResourceManager, ResourceResult};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info};

impl ResourceManager {
    /// Start the background gap-filling task
    pub fn start_autolinker(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            info!(interval_ms = period.as_millis() as u64, "Autolinker started");
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = manager.dirty.wait() => {}
                }

                if *manager.shutdown.read().await {
                    break;
                }

                if manager.dirty.take() {
                    let issued = manager.autolink_once().await;
                    debug!(issued, "Autolinker pass");
                }
            }

            info!("Autolinker stopped");
        })
    }

    /// Stop the background task; it exits on its next wake-up
    pub async fn stop_autolinker(&self) {
        *self.shutdown.write().await = true;
        self.dirty.touch();
    }

    /// One gap-filling pass over every collection
    ///
    /// Returns how many fetches were issued. Failures are logged; the values
    /// involved stay marked as requested.
    pub async fn autolink_once(&self) -> usize {
        let mut issued = 0;
        for (resource, collection) in self.collection_handles().await {
            let missing = collection.write().await.missing_filters();
            for miss in missing {
                issued += 1;
                let result = match miss {
                    MissingFilter::Records(filter) => {
                        debug!(resource = %resource, filter = %filter.cache_key(), "Filling missing records");
                        self.query(&resource, &filter).await.map(|_| ())
                    }
                    MissingFilter::Links {
                        attribute,
                        keys,
                        reference,
                    } => {
                        self.fetch_links(&resource, &attribute, &keys, reference.as_ref())
                            .await
                    }
                };
                if let Err(e) = result {
                    error!(resource = %resource, error = %e, "Autolinker fetch failed");
                }
            }
        }
        issued
    }

    /// Fetch the links of `keys`, then the records they point to
    async fn fetch_links(
        &self,
        resource: &str,
        attribute: &str,
        keys: &[Value],
        reference: Option<&Reference>,
    ) -> ResourceResult<()> {
        debug!(resource = %resource, attribute, keys = keys.len(), "Filling missing links");
        let data = self.remote().m2m(resource, attribute, keys).await?;
        self.apply(data).await;

        let remotes: BTreeSet<Value> = {
            let collection = self.existing_collection(resource).await?;
            let mut collection = collection.write().await;
            for key in keys {
                collection.touch_links(attribute, key.clone());
            }
            match collection.get_index(attribute) {
                Some(CollectionIndex::ManyToMany(m2m)) => m2m.linked(keys),
                _ => BTreeSet::new(),
            }
        };

        let Some(reference) = reference else {
            return Ok(());
        };
        if remotes.is_empty() {
            return Ok(());
        }
        let filter = Filter::new().any_of(reference.foreign_attribute.clone(), remotes);
        self.query(&reference.resource, &filter).await?;
        Ok(())
    }
}
