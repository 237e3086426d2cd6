use anyhow::Result;
use log::info;
use std::sync::Arc;

use story2comic::core::config::Config;
use story2comic::core::context::AppContext;
use story2comic::core::io::{NativeStorage, Storage};
use story2comic::render::layout::LayoutEngine;
use story2comic::services::chain::ProviderChain;
use story2comic::services::llm::create_llm;
use story2comic::services::providers::create_providers;
use story2comic::services::story::StoryParser;
use story2comic::services::workflow::ComicWorkflow;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load Config
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM settings.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    // 2. Shared resources
    let ctx = AppContext::new(config.clone())?;
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let characters = ctx.load_characters(storage.as_ref()).await;

    // 3. Initialize LLM
    let llm = create_llm(&config.llm, ctx.http.clone())?;
    let parser = StoryParser::new(llm, &config.llm, config.comic.max_panels);

    // 4. Initialize image providers
    let providers = create_providers(&config.image, ctx.http.clone())?;
    let chain = ProviderChain::new(providers, ctx.typeface.clone(), &config.image);
    info!("Image providers: {:?}", chain.provider_names());

    let layout = LayoutEngine::new(ctx.typeface.clone(), config.layout.output_max_bytes);

    // 5. Initialize and Run Workflow
    let mut workflow = ComicWorkflow::new(config, parser, chain, layout, characters, storage).await?;
    let result = workflow.run().await;

    drop(workflow);
    ctx.shutdown();
    result
}
