//! Document analysis pipeline.
//!
//! Each page runs its own workflow: visual and text extraction in parallel,
//! then three parameter stages that combine both extractions. The document
//! workflow runs one component per page, all bound to a shared limiter, and
//! a final aggregation once every page has finished.

use crate::config::{FanoutConfig, StageConfig};
use anyhow::{bail, Context, Result};
use fanout_core::{
    CancellationToken, Component, ConcurrencyLimiter, DataTracker, Execution, Workflow,
};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PageInput {
    pub number: usize,
    pub content: Vec<u8>,
    pub stages: StageConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageAnalysis {
    pub visual: Vec<String>,
    pub text: Vec<String>,
    pub parameter1: String,
    pub parameter2: String,
    pub parameter3: String,
}

#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub pages: Vec<Vec<u8>>,
    pub stages: StageConfig,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentAnalysis {
    pub pages: Vec<Option<PageAnalysis>>,
    pub complete: bool,
}

impl DocumentAnalysis {
    pub fn pages_completed(&self) -> usize {
        self.pages.iter().filter(|p| p.is_some()).count()
    }
}

type PageTracker = DataTracker<PageInput, PageAnalysis>;
type DocumentTracker = DataTracker<DocumentInput, DocumentAnalysis>;

/// Stand-in page payloads for a document of `count` pages.
pub fn synthetic_pages(count: usize) -> Vec<Vec<u8>> {
    (1..=count)
        .map(|n| format!("%PDF page {}", n).into_bytes())
        .collect()
}

/// Sleep for `ms`, giving up early if `cancel` fires.
async fn simulate(cancel: &CancellationToken, stage: &str, ms: u64) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => bail!("{} interrupted by cancellation", stage),
        _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
    }
}

#[derive(Debug, Clone, Copy)]
enum Extraction {
    Visual,
    Text,
}

fn extraction(name: &'static str, kind: Extraction) -> Component<PageInput, PageAnalysis> {
    Component::new(name, kind, move |cancel, kind: Extraction, dt: PageTracker| async move {
        let (ms, prefix) = match kind {
            Extraction::Visual => (dt.config().stages.visual_extraction_ms, "visual"),
            Extraction::Text => (dt.config().stages.text_extraction_ms, "text"),
        };
        simulate(&cancel, name, ms).await?;

        if dt.config().content.is_empty() {
            bail!("page {} has no content", dt.config().number);
        }

        let values: Vec<String> = (1..=3).map(|i| format!("{}{}", prefix, i)).collect();
        dt.update(|d| match kind {
            Extraction::Visual => d.visual = values,
            Extraction::Text => d.text = values,
        });
        Ok(())
    })
}

fn parameter(name: &'static str, slot: usize) -> Component<PageInput, PageAnalysis> {
    Component::new(name, slot, move |cancel, slot: usize, dt: PageTracker| async move {
        let stages = &dt.config().stages;
        let ms = match slot {
            0 => stages.parameter1_ms,
            1 => stages.parameter2_ms,
            _ => stages.parameter3_ms,
        };
        simulate(&cancel, name, ms).await?;

        dt.try_update(|d| -> anyhow::Result<()> {
            let value = format!(
                "{}{}",
                d.visual.get(slot).context("visual information missing")?,
                d.text.get(slot).context("extracted text missing")?
            );
            match slot {
                0 => d.parameter1 = value,
                1 => d.parameter2 = value,
                _ => d.parameter3 = value,
            }
            Ok(())
        })
    })
}

/// Run the per-page workflow.
pub async fn analyze_page(cancel: CancellationToken, input: PageInput) -> Execution<PageAnalysis> {
    let mut workflow = Workflow::new(format!("page-{}", input.number));

    let visual =
        workflow.add_component(extraction("VisualInformationExtraction", Extraction::Visual));
    let text = workflow.add_component(extraction("TextExtractor", Extraction::Text));

    for (slot, name) in ["Parameter1", "Parameter2", "Parameter3"].into_iter().enumerate() {
        let handle = workflow.add_component(parameter(name, slot));
        workflow.add_dependencies(handle, [visual, text]);
    }

    workflow.execute(cancel, input, PageAnalysis::default()).await
}

/// Run the document workflow with page analyses bounded by
/// `config.max_concurrency`.
pub async fn analyze_document(
    cancel: CancellationToken,
    config: &FanoutConfig,
    pages: Vec<Vec<u8>>,
) -> Result<Execution<DocumentAnalysis>> {
    let limiter = ConcurrencyLimiter::new(config.max_concurrency)
        .context("Failed to create page limiter")?;
    let mut workflow = Workflow::new("document-analysis");

    let aggregate = workflow.add_component(Component::without_input(
        "FinalAggregation",
        |_cancel, dt: DocumentTracker| async move {
            let complete = dt.read(|d| d.pages.iter().all(Option::is_some));
            if !complete {
                bail!("not every page was analyzed");
            }
            dt.update(|d| d.complete = true);
            Ok(())
        },
    ));

    for index in 0..pages.len() {
        let mut component = Component::new(
            "PageAnalysis",
            index,
            |cancel, index: usize, dt: DocumentTracker| async move {
                let input = PageInput {
                    number: index + 1,
                    content: dt.config().pages[index].clone(),
                    stages: dt.config().stages.clone(),
                };
                let analysis = analyze_page(cancel, input)
                    .await
                    .into_result()
                    .with_context(|| format!("page {} analysis failed", index + 1))?;

                tracing::debug!("Page {} analyzed", index + 1);
                dt.update(|d| d.pages[index] = Some(analysis));
                Ok(())
            },
        )
        .with_limiter(limiter.clone());

        if let Some(timeout) = config.stages.page_timeout() {
            component = component.with_timeout(timeout);
        }

        let page = workflow.add_component(component);
        workflow.add_dependencies(aggregate, [page]);
    }

    let data = DocumentAnalysis {
        pages: vec![None; pages.len()],
        complete: false,
    };
    let input = DocumentInput {
        pages,
        stages: config.stages.clone(),
    };

    Ok(workflow.execute(cancel, input, data).await)
}
