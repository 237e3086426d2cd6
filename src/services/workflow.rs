use anyhow::{Context, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::Config;
use crate::core::io::Storage;
use crate::core::model::{
    AspectRatio, CharacterReference, Comic, ComicRecord, PanelDescriptor, ResolvedPanel,
};
use crate::core::state::WorkflowState;
use crate::render::layout::LayoutEngine;
use crate::services::chain::ProviderChain;
use crate::services::story::StoryParser;

/// Title from a leading `# Heading` line, else the file stem. Returns the title and the story body.
pub fn split_title<'a>(text: &'a str, stem: &str) -> (String, &'a str) {
    let trimmed = text.trim_start();
    let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));
    if first.trim_start().starts_with('#') {
        let title = first.trim().trim_start_matches('#').trim();
        if !title.is_empty() {
            return (title.to_string(), rest.trim());
        }
    }
    (stem.to_string(), text.trim())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub struct ComicWorkflow {
    config: Config,
    parser: StoryParser,
    chain: ProviderChain,
    layout: LayoutEngine,
    characters: Vec<CharacterReference>,
    state: WorkflowState,
    storage: Arc<dyn Storage>,
    deadline: Duration,
}

impl ComicWorkflow {
    pub async fn new(
        config: Config,
        parser: StoryParser,
        chain: ProviderChain,
        layout: LayoutEngine,
        characters: Vec<CharacterReference>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        let state = Self::load_state(&config.build_folder, storage.as_ref()).await?;
        let deadline = Duration::from_secs(config.image.deadline_seconds);
        Ok(Self {
            config,
            parser,
            chain,
            layout,
            characters,
            state,
            storage,
            deadline,
        })
    }

    /// Overrides the per-comic deadline from `image.deadline_seconds`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    async fn load_state(build_dir: &str, storage: &dyn Storage) -> Result<WorkflowState> {
        let path = path_string(&Path::new(build_dir).join("state.json"));
        if storage.exists(&path).await? {
            let content = storage.read_to_string(&path).await?;
            Ok(serde_json::from_str(&content).context("Failed to parse state.json")?)
        } else {
            Ok(WorkflowState::default())
        }
    }

    async fn save_state(&self) -> Result<()> {
        let path = path_string(&Path::new(&self.config.build_folder).join("state.json"));
        let content = serde_json::to_string_pretty(&self.state)?;
        self.storage.write(&path, content.as_bytes()).await?;
        Ok(())
    }

    pub async fn run(&mut self) -> Result<()> {
        let entries = self.storage.list(&self.config.input_folder).await?;
        let mut txt_entries: Vec<String> = entries
            .into_iter()
            .filter(|e| e.ends_with(".txt"))
            .collect();
        txt_entries.sort();

        for path_str in &txt_entries {
            let filename = Path::new(path_str)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path_str.clone());

            if self.state.completed_stories.contains(&filename) {
                println!("Skipping completed story: {}", filename);
                continue;
            }

            println!("Processing story: {}", filename);
            self.process_story(path_str, &filename).await?;

            self.state.completed_stories.push(filename);
            self.save_state().await?;
        }

        println!("All stories processed!");
        Ok(())
    }

    async fn process_story(&self, path_str: &str, filename: &str) -> Result<()> {
        let text = self.storage.read_to_string(path_str).await?;
        let stem = Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| filename.to_string());
        let (title, story) = split_title(&text, &stem);

        let build_dir = Path::new(&self.config.build_folder).join(&stem);
        let panels = self.load_or_parse_panels(story, &build_dir).await?;

        let style = self.config.comic.style.as_str();
        let aspect = self.config.comic.aspect_ratio;
        println!("Resolving images ({} panels)...", panels.len());
        let resolved = self.resolve_panels(&panels, style, aspect).await;

        let comic = Comic::new(title, style, aspect, resolved)?;
        println!("Composing \"{}\"...", comic.title);
        let composite = self.layout.compose(&comic)?;
        if !composite.within_budget {
            warn!(
                "Composite for {} is {} bytes, above the configured limit",
                filename,
                composite.bytes.len()
            );
        }

        let output_dir = Path::new(&self.config.output_folder);
        let image_path = path_string(&output_dir.join(format!("{}.{}", stem, composite.format.extension())));
        self.storage.write(&image_path, &composite.bytes).await?;

        let record = ComicRecord::from_comic(&comic);
        let record_path = path_string(&output_dir.join(format!("{}.json", stem)));
        self.storage
            .write(&record_path, serde_json::to_string_pretty(&record)?.as_bytes())
            .await?;

        println!("Comic complete: {}", image_path);
        Ok(())
    }

    async fn load_or_parse_panels(&self, story: &str, build_dir: &Path) -> Result<Vec<PanelDescriptor>> {
        let panels_path = path_string(&build_dir.join("panels.json"));
        if self.storage.exists(&panels_path).await? {
            println!("Loading cached panels from {}", panels_path);
            let content = self.storage.read_to_string(&panels_path).await?;
            return serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", panels_path));
        }

        println!("Splitting story into panels...");
        let panels = self.parser.parse(story).await;
        self.storage
            .write(&panels_path, serde_json::to_string_pretty(&panels)?.as_bytes())
            .await?;
        Ok(panels)
    }

    /// Resolves every panel concurrently. Panels still pending at the deadline get the
    /// placeholder. Output is in panel order.
    pub async fn resolve_panels(
        &self,
        panels: &[PanelDescriptor],
        style: &str,
        aspect: AspectRatio,
    ) -> Vec<ResolvedPanel> {
        let pb = ProgressBar::new(panels.len() as u64);
        if let Ok(bar_style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(bar_style.progress_chars("#>-"));
        }

        let deadline = tokio::time::Instant::now() + self.deadline;
        let chain = &self.chain;
        let characters = self.characters.as_slice();

        let mut resolved: Vec<ResolvedPanel> = futures_util::stream::iter(panels.iter())
            .map(|panel| {
                let pb = pb.clone();
                async move {
                    let image = match tokio::time::timeout_at(
                        deadline,
                        chain.resolve(panel, style, aspect, characters),
                    )
                    .await
                    {
                        Ok(image) => image,
                        Err(_) => {
                            warn!("Panel {} missed the comic deadline, drawing placeholder", panel.panel);
                            chain.fallback(panel, style, aspect)
                        }
                    };
                    pb.inc(1);
                    ResolvedPanel {
                        descriptor: panel.clone(),
                        image: Some(image),
                    }
                }
            })
            .buffer_unordered(self.config.image.effective_concurrency())
            .collect()
            .await;

        pb.finish_with_message("Images resolved");
        resolved.sort_by_key(|p| p.index());

        for panel in &resolved {
            if let Some(image) = &panel.image {
                info!("Panel {} image from {}", panel.index(), image.source);
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::model::ImageSource;
    use crate::render::text::Typeface;
    use crate::services::llm::LlmClient;
    use crate::services::providers::{GenerationRequest, ImageProvider, ProviderError};
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct MockLlmClient {
        call_count: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
            *self.call_count.lock().unwrap() += 1;
            Ok(r#"```json
[
  {"panel": 1, "scene": "A quiet village at dawn", "dialogue": "Wake up, Jamie!"},
  {"panel": 2, "scene": "A dragon over the hills", "dialogue": "Run!", "mood": "urgent"}
]
```"#
                .to_string())
        }
    }

    struct DownProvider;

    #[async_trait]
    impl ImageProvider for DownProvider {
        fn name(&self) -> &str {
            "down"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<Vec<u8>, ProviderError> {
            Err(ProviderError::Unavailable("connection refused".to_string()))
        }
    }

    struct StallingProvider;

    #[async_trait]
    impl ImageProvider for StallingProvider {
        fn name(&self) -> &str {
            "stalling"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<Vec<u8>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(ProviderError::EmptyPayload)
        }
    }

    fn test_config(root: &Path) -> Config {
        Config::from_yaml_str(&format!(
            r#"
input_folder: {}
output_folder: {}
build_folder: {}
llm:
  provider: ollama
  retry_count: 0
  retry_delay_seconds: 0
comic:
  style: Ink
  aspect_ratio: "4:5"
image:
  seed: 1
layout:
  output_max_bytes: 8000000
"#,
            root.join("input").display(),
            root.join("output").display(),
            root.join("build").display(),
        ))
        .unwrap()
    }

    async fn workflow(
        config: Config,
        providers: Vec<Box<dyn ImageProvider>>,
        llm_calls: Arc<Mutex<usize>>,
    ) -> Result<ComicWorkflow> {
        let typeface = Arc::new(Typeface::builtin());
        let llm = MockLlmClient {
            call_count: llm_calls,
        };
        let parser = StoryParser::new(Box::new(llm), &config.llm, config.comic.max_panels);
        let chain = ProviderChain::new(providers, typeface.clone(), &config.image)
            .with_call_timeout(Duration::from_secs(60));
        let layout = LayoutEngine::new(typeface, config.layout.output_max_bytes);
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
        ComicWorkflow::new(config, parser, chain, layout, Vec::new(), storage).await
    }

    #[test]
    fn test_split_title() {
        assert_eq!(
            split_title("# The Lost Key\nOnce upon a time.", "story"),
            ("The Lost Key".to_string(), "Once upon a time.")
        );
        assert_eq!(
            split_title("Once upon a time.\nThe end.", "story"),
            ("story".to_string(), "Once upon a time.\nThe end.")
        );
        assert_eq!(split_title("#\nBody", "fallback").0, "fallback");
    }

    #[tokio::test]
    async fn test_run_writes_comic_and_skips_completed() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("input"))?;
        fs::write(root.join("input/tale.txt"), "# Dawn Raid\nA dragon wakes the village.")?;

        let calls = Arc::new(Mutex::new(0));
        let config = test_config(root);
        let mut wf = workflow(config.clone(), vec![Box::new(DownProvider)], calls.clone()).await?;
        wf.run().await?;

        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(root.join("build/tale/panels.json").exists());
        let png = fs::read(root.join("output/tale.png"))?;
        let decoded = image::load_from_memory(&png)?;
        assert_eq!((decoded.width(), decoded.height()), (1080, 1350));

        let record: ComicRecord = serde_json::from_str(&fs::read_to_string(root.join("output/tale.json"))?)?;
        assert_eq!(record.title, "Dawn Raid");
        assert_eq!(record.style, "Ink");
        assert_eq!(record.panels.len(), 2);
        assert!(record
            .panels
            .iter()
            .all(|p| p.image_source == Some(ImageSource::Placeholder) && p.image_base64.is_some()));

        let state: WorkflowState = serde_json::from_str(&fs::read_to_string(root.join("build/state.json"))?)?;
        assert_eq!(state.completed_stories, vec!["tale.txt"]);

        // A fresh run sees the state file and does nothing.
        let mut again = workflow(config, vec![Box::new(DownProvider)], calls.clone()).await?;
        again.run().await?;
        assert_eq!(*calls.lock().unwrap(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_cached_panels_skip_the_llm() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("input"))?;
        fs::create_dir_all(root.join("build/cached"))?;
        fs::write(root.join("input/cached.txt"), "Anything at all.")?;
        let panels = vec![PanelDescriptor::new(1, "Cached scene", "Hi")];
        fs::write(
            root.join("build/cached/panels.json"),
            serde_json::to_string(&panels)?,
        )?;

        let calls = Arc::new(Mutex::new(0));
        let mut wf = workflow(test_config(root), Vec::new(), calls.clone()).await?;
        wf.run().await?;

        assert_eq!(*calls.lock().unwrap(), 0);
        let record: ComicRecord =
            serde_json::from_str(&fs::read_to_string(root.join("output/cached.json"))?)?;
        assert_eq!(record.title, "cached");
        assert_eq!(record.panels[0].descriptor.scene, "Cached scene");
        Ok(())
    }

    #[tokio::test]
    async fn test_deadline_forces_placeholders_in_order() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let calls = Arc::new(Mutex::new(0));
        let wf = workflow(test_config(temp_dir.path()), vec![Box::new(StallingProvider)], calls)
            .await?
            .with_deadline(Duration::from_millis(100));

        let panels: Vec<PanelDescriptor> = (1..=4)
            .map(|i| PanelDescriptor::new(i, format!("Scene {}", i), ""))
            .collect();
        let started = std::time::Instant::now();
        let resolved = wf.resolve_panels(&panels, "Ink", AspectRatio::Square).await;

        assert!(started.elapsed() < Duration::from_secs(25));
        let order: Vec<u32> = resolved.iter().map(|p| p.index()).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert!(resolved
            .iter()
            .all(|p| p.image.as_ref().map(|i| &i.source) == Some(&ImageSource::Placeholder)));
        Ok(())
    }
}
