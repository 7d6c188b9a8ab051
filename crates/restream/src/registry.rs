use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::{RestreamConfig, RestreamError, Restreamer, Result, create_client};

/// Concurrent map of media source id to its restream session.
///
/// The first consumer of a media source creates the session; later consumers
/// share it. Sessions stay registered until explicitly closed.
pub struct RestreamRegistry {
    sessions: DashMap<String, Arc<Restreamer>>,
    client: Client,
    config: RestreamConfig,
}

impl RestreamRegistry {
    pub fn new(config: RestreamConfig) -> Result<Self> {
        config.validate()?;
        let client = create_client(&config)?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: RestreamConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            client,
            config,
        }
    }

    pub fn config(&self) -> &RestreamConfig {
        &self.config
    }

    /// Return the session for `source_id`, creating it for `url` if absent.
    ///
    /// An existing session keeps its original URL.
    pub fn get_or_create(&self, source_id: &str, url: &str) -> Result<Arc<Restreamer>> {
        match self.sessions.entry(source_id.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let session = Arc::new(Restreamer::new(
                    url,
                    self.client.clone(),
                    self.config.clone(),
                )?);
                debug!(
                    source_id,
                    session = %session.session_id(),
                    "Created restream session"
                );
                entry.insert(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<Restreamer>> {
        self.sessions.get(source_id).map(|s| Arc::clone(s.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove the session and wait for its copy task to stop.
    ///
    /// A session that never connected is removed without error.
    pub async fn close(&self, source_id: &str) -> Result<()> {
        let Some((_, session)) = self.sessions.remove(source_id) else {
            return Ok(());
        };

        match session.close().await {
            Ok(()) | Err(RestreamError::NotOpened) => {
                info!(source_id, session = %session.session_id(), "Restream session removed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Close every registered session.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Err(e) = self.close(&id).await {
                warn!(source_id = %id, error = %e, "Failed to close restream session");
            }
        }
    }
}
