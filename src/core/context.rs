use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::Config;
use crate::core::io::Storage;
use crate::core::model::CharacterReference;
use crate::render::text::Typeface;

/// Process-wide resources, built once at startup and handed to constructors.
pub struct AppContext {
    pub config: Config,
    pub http: reqwest::Client,
    pub typeface: Arc<Typeface>,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        // Slightly above the per-call timeout so the chain's own timeout fires first.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.image.timeout_seconds + 5))
            .build()
            .context("Failed to build HTTP client")?;

        let typeface = Arc::new(Typeface::load(
            config.layout.font_path.as_deref(),
            config.layout.font_family.as_deref(),
        ));

        Ok(Self {
            config,
            http,
            typeface,
        })
    }

    /// Character references from config. Unreadable reference images are skipped.
    pub async fn load_characters(&self, storage: &dyn Storage) -> Vec<CharacterReference> {
        let mut characters = Vec::with_capacity(self.config.characters.len());
        for entry in &self.config.characters {
            let image = match &entry.image_path {
                Some(path) => match storage.read(path).await {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!("Reference image for {} unavailable: {:#}", entry.name, e);
                        None
                    }
                },
                None => None,
            };
            characters.push(CharacterReference {
                name: entry.name.clone(),
                description: entry.description.clone(),
                image,
            });
        }
        characters
    }

    pub fn shutdown(self) {
        info!("Releasing HTTP client and font resources");
        drop(self.http);
        drop(self.typeface);
    }
}
