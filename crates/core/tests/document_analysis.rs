//! Page-level fan-out/fan-in nested inside a document-level fan-in, with a
//! limiter shared across every page.

use anyhow::{bail, Context};
use fanout_core::{
    CancellationToken, Component, ConcurrencyLimiter, DataTracker, Execution, Status, Workflow,
};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct PageConfig {
    #[allow(dead_code)]
    page: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct PageData {
    visual: Vec<String>,
    text: Vec<String>,
    parameter1: String,
    parameter2: String,
    parameter3: String,
}

type PageTracker = DataTracker<PageConfig, PageData>;

fn extraction(name: &str, prefix: &'static str, text: bool) -> Component<PageConfig, PageData> {
    Component::without_input(name, move |_cancel, dt: PageTracker| async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let values: Vec<String> = (1..=3).map(|i| format!("{}{}", prefix, i)).collect();
        dt.update(|d| {
            if text {
                d.text = values;
            } else {
                d.visual = values;
            }
        });
        Ok(())
    })
}

fn parameter(name: &str, slot: usize, secs: u64) -> Component<PageConfig, PageData> {
    Component::new(name, slot, move |_cancel, slot: usize, dt: PageTracker| async move {
        tokio::time::sleep(Duration::from_secs(secs)).await;
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

async fn analyze_page(cancel: CancellationToken, page: Vec<u8>) -> Execution<PageData> {
    let mut workflow = Workflow::new("page-analysis");

    let visual = workflow.add_component(extraction("VisualInformationExtraction", "visual", false));
    let text = workflow.add_component(extraction("TextExtractor", "text", true));

    for (name, slot, secs) in [("Parameter1", 0, 1), ("Parameter2", 1, 4), ("Parameter3", 2, 3)] {
        let handle = workflow.add_component(parameter(name, slot, secs));
        workflow.add_dependencies(handle, [visual, text]);
    }

    workflow
        .execute(cancel, PageConfig { page }, PageData::default())
        .await
}

#[derive(Debug, Clone)]
struct DocumentConfig {
    pages: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
struct DocumentData {
    pages: Vec<Option<PageData>>,
    all_pages_done: bool,
}

type DocumentTracker = DataTracker<DocumentConfig, DocumentData>;

async fn analyze_document(pages: Vec<Vec<u8>>, max_concurrency: usize) -> Execution<DocumentData> {
    let limiter = ConcurrencyLimiter::new(max_concurrency).unwrap();
    let mut workflow = Workflow::new("document-analysis");

    let aggregate = workflow.add_component(Component::without_input(
        "FinalAggregation",
        |_cancel, dt: DocumentTracker| async move {
            let all_done = dt.read(|d| d.pages.iter().all(Option::is_some));
            dt.update(|d| d.all_pages_done = all_done);
            Ok(())
        },
    ));

    for index in 0..pages.len() {
        let page = workflow.add_component(
            Component::new(
                "PageAnalysis",
                index,
                |cancel, index: usize, dt: DocumentTracker| async move {
                    let execution = analyze_page(cancel, dt.config().pages[index].clone()).await;
                    if execution.status != Status::Done {
                        bail!("page {} analysis failed", index);
                    }
                    dt.update(|d| d.pages[index] = Some(execution.data));
                    Ok(())
                },
            )
            .with_limiter(limiter.clone()),
        );
        workflow.add_dependencies(aggregate, [page]);
    }

    let data = DocumentData {
        pages: vec![None; pages.len()],
        all_pages_done: false,
    };
    workflow
        .execute(CancellationToken::new(), DocumentConfig { pages }, data)
        .await
}

fn assert_close(elapsed: Duration, expected: Duration) {
    let tolerance = Duration::from_millis(100);
    assert!(
        elapsed >= expected && elapsed <= expected + tolerance,
        "expected about {:?}, took {:?}",
        expected,
        elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn test_single_page_runs_in_critical_path_time() {
    let start = Instant::now();
    let execution = analyze_page(CancellationToken::new(), b"pdf page content".to_vec()).await;

    // max(1, 1) for extraction, then max(1, 4, 3) for parameters
    assert_close(start.elapsed(), Duration::from_secs(5));
    assert_eq!(execution.status, Status::Done);
    assert!(execution.error.is_none());

    let data = execution.into_result().unwrap();
    assert_eq!(data.parameter1, "visual1text1");
    assert_eq!(data.parameter2, "visual2text2");
    assert_eq!(data.parameter3, "visual3text3");
}

#[tokio::test(start_paused = true)]
async fn test_dependents_start_after_dependencies_finish() {
    let execution = analyze_page(CancellationToken::new(), Vec::new()).await;

    let visual = execution.node("VisualInformationExtraction").unwrap();
    let text = execution.node("TextExtractor").unwrap();
    let upstream_done = visual.completed_at.max(text.completed_at).unwrap();

    for name in ["Parameter1", "Parameter2", "Parameter3"] {
        let report = execution.node(name).unwrap();
        assert!(report.started_at.unwrap() >= upstream_done, "{} started early", name);
    }
    assert_close(
        execution.node("Parameter2").unwrap().duration.unwrap(),
        Duration::from_secs(4),
    );
}

#[tokio::test(start_paused = true)]
async fn test_document_with_shared_limiter() {
    let pages = vec![b"pdf page content".to_vec(); 100];

    let start = Instant::now();
    let execution = analyze_document(pages, 50).await;

    // ceil(100 / 50) batches of a 5 second page
    assert_close(start.elapsed(), Duration::from_secs(10));
    assert_eq!(execution.status, Status::Done);
    assert!(execution.error.is_none());
    assert!(execution.data.all_pages_done);
    assert_eq!(execution.data.pages.len(), 100);
    assert!(execution
        .data
        .pages
        .iter()
        .all(|p| p.as_ref().map(|d| d.parameter2.as_str()) == Some("visual2text2")));
}

#[tokio::test(start_paused = true)]
async fn test_document_limiter_of_one_serializes_pages() {
    let start = Instant::now();
    let execution = analyze_document(vec![Vec::new(); 3], 1).await;

    assert_close(start.elapsed(), Duration::from_secs(15));
    assert!(execution.is_done());
}
