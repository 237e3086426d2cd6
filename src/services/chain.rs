use image::DynamicImage;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::ImageConfig;
use crate::core::model::{AspectRatio, CharacterReference, ImageSource, PanelDescriptor, PanelImage};
use crate::render::placeholder::PlaceholderRenderer;
use crate::render::text::Typeface;
use crate::services::prompt::{mentioned_characters, PromptBuilder};
use crate::services::providers::{GenerationRequest, ImageProvider, ProviderError};
use crate::utils::compress::ByteBudgetCompressor;

/// Ordered image generators with the placeholder as the last, infallible step.
pub struct ProviderChain {
    providers: Vec<Box<dyn ImageProvider>>,
    placeholder: PlaceholderRenderer,
    compressor: ByteBudgetCompressor,
    prompts: PromptBuilder,
    call_timeout: Duration,
    seed: u64,
}

impl ProviderChain {
    pub fn new(providers: Vec<Box<dyn ImageProvider>>, typeface: Arc<Typeface>, config: &ImageConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        debug!("Provider chain seed: {}", seed);
        Self {
            providers,
            placeholder: PlaceholderRenderer::new(typeface),
            compressor: ByteBudgetCompressor::with_budget(config.max_bytes, config.min_quality),
            prompts: PromptBuilder::new(config.negative_prompt.clone()),
            call_timeout: Duration::from_secs(config.timeout_seconds),
            seed,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Tries each provider once, in order, and never fails.
    pub async fn resolve(
        &self,
        panel: &PanelDescriptor,
        style: &str,
        aspect: AspectRatio,
        characters: &[CharacterReference],
    ) -> PanelImage {
        let reference_image = mentioned_characters(panel, characters).find_map(|c| c.image.clone());
        if reference_image.is_some() {
            debug!("Panel {}: sending a character reference image", panel.panel);
        }

        for provider in &self.providers {
            let prompt = self
                .prompts
                .build(panel, style, characters, provider.max_prompt_chars());
            let request = GenerationRequest {
                prompt: prompt.positive,
                negative_prompt: prompt.negative,
                aspect_ratio: aspect,
                seed: self.seed.wrapping_add(panel.panel as u64),
                reference_image: reference_image.clone(),
            };

            match self.attempt(provider.as_ref(), &request).await {
                Ok(image) => {
                    info!("Panel {} generated by {}", panel.panel, provider.name());
                    return image;
                }
                Err(e) => warn!("Panel {}: provider {} failed: {}", panel.panel, provider.name(), e),
            }
        }

        warn!("Panel {}: no provider succeeded, drawing placeholder", panel.panel);
        self.fallback(panel, style, aspect)
    }

    async fn attempt(
        &self,
        provider: &dyn ImageProvider,
        request: &GenerationRequest,
    ) -> Result<PanelImage, ProviderError> {
        let bytes = tokio::time::timeout(self.call_timeout, provider.generate(request))
            .await
            .map_err(|_| ProviderError::Timeout(self.call_timeout.as_secs()))??;
        if bytes.is_empty() {
            return Err(ProviderError::EmptyPayload);
        }

        let decoded = image::load_from_memory(&bytes).map_err(|e| ProviderError::Decode(e.to_string()))?;
        let compressed = self
            .compressor
            .compress(&decoded)
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        // The raster is what the bytes decode to, including any downscale.
        let raster = image::load_from_memory(&compressed.bytes)
            .map_err(|e| ProviderError::Decode(e.to_string()))?
            .to_rgba8();

        Ok(PanelImage {
            raster: Arc::new(raster),
            bytes: compressed.bytes,
            source: ImageSource::Provider(provider.name().to_string()),
            within_budget: compressed.within_budget,
        })
    }

    /// The placeholder render for `panel`, encoded under the same budget.
    pub fn fallback(&self, panel: &PanelDescriptor, style: &str, aspect: AspectRatio) -> PanelImage {
        let text = if panel.scene.trim().is_empty() {
            panel.dialogue.as_str()
        } else {
            panel.scene.as_str()
        };
        let raster = self
            .placeholder
            .render(text, panel.panel, style, aspect.panel_size());

        let (raster, bytes, within_budget) = match self
            .compressor
            .compress(&DynamicImage::ImageRgba8(raster.clone()))
        {
            Ok(compressed) => match image::load_from_memory(&compressed.bytes) {
                Ok(decoded) => (decoded.to_rgba8(), compressed.bytes, compressed.within_budget),
                Err(e) => {
                    warn!("Panel {}: encoded placeholder does not decode: {}", panel.panel, e);
                    (raster, Vec::new(), false)
                }
            },
            Err(e) => {
                warn!("Panel {}: placeholder could not be encoded: {}", panel.panel, e);
                (raster, Vec::new(), false)
            }
        };

        PanelImage {
            raster: Arc::new(raster),
            bytes,
            source: ImageSource::Placeholder,
            within_budget,
        }
    }
}
