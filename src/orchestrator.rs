//! Concurrent fan-out of one generation run.
//!
//! Every variation of a [`GenerationRequest`] is sent to the [`ImageGenerator`]
//! at once. Settlements are folded into a [`RunCollector`] owned by the calling
//! task, so the result list, the completed counter and the token sums never need
//! a lock. A failing variation is recorded and the others keep going.

use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::{
    error::{GenError, Result},
    gemini::traits::{ImageGenerator, VariationResponse},
    models::{AggregateUsage, GeneratedImage, GenerationRequest, TokenTotals, UsageRecord},
    pricing::PricingTable,
};

pub const NO_IMAGE_MESSAGE: &str = "No image was generated. Try adjusting the prompt or retry later.";

pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// How a single variation settled.
#[derive(Debug, Clone)]
pub enum VariationOutcome {
    Image {
        image: GeneratedImage,
        usage: Option<UsageRecord>,
    },
    /// The call succeeded but carried no image part.
    Empty { usage: Option<UsageRecord> },
    Failed { message: String },
}

impl VariationOutcome {
    pub fn from_result(index: usize, result: Result<VariationResponse>) -> Self {
        match result {
            Ok(VariationResponse {
                image: Some(image),
                usage,
                ..
            }) => VariationOutcome::Image { image, usage },
            Ok(VariationResponse { usage, .. }) => VariationOutcome::Empty { usage },
            Err(err) => VariationOutcome::Failed {
                message: describe_failure(index, &err),
            },
        }
    }

    pub fn usage(&self) -> Option<&UsageRecord> {
        match self {
            VariationOutcome::Image { usage, .. } | VariationOutcome::Empty { usage } => {
                usage.as_ref()
            }
            VariationOutcome::Failed { .. } => None,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            VariationOutcome::Image { .. } => OutcomeKind::Image,
            VariationOutcome::Empty { .. } => OutcomeKind::Empty,
            VariationOutcome::Failed { .. } => OutcomeKind::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Image,
    Empty,
    Failed,
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        run_id: String,
        total: usize,
    },
    ImageReady {
        variation: usize,
        image: GeneratedImage,
    },
    Settled {
        variation: usize,
        completed: usize,
        total: usize,
        outcome: OutcomeKind,
    },
}

impl ProgressEvent {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ProgressEvent::Started { .. } => "started",
            ProgressEvent::ImageReady { .. } => "image-ready",
            ProgressEvent::Settled { .. } => "settled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationFailure {
    pub variation: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub model: String,
    pub requested: usize,
    pub completed: usize,
    /// In settlement order, not variation order.
    pub images: Vec<GeneratedImage>,
    pub empty_variations: usize,
    pub failures: Vec<VariationFailure>,
    pub error: Option<String>,
    pub usage: Option<AggregateUsage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        self.has_images() && !self.failures.is_empty()
    }
}

struct RunCollector {
    total: usize,
    completed: usize,
    images: Vec<GeneratedImage>,
    empty_variations: usize,
    failures: Vec<VariationFailure>,
    totals: TokenTotals,
}

impl RunCollector {
    fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            images: Vec::with_capacity(total),
            empty_variations: 0,
            failures: Vec::new(),
            totals: TokenTotals::default(),
        }
    }

    fn record(&mut self, index: usize, outcome: VariationOutcome) {
        self.completed += 1;
        if let Some(usage) = outcome.usage() {
            self.totals.add(usage);
        }
        match outcome {
            VariationOutcome::Image { image, .. } => self.images.push(image),
            VariationOutcome::Empty { .. } => self.empty_variations += 1,
            VariationOutcome::Failed { message } => self.failures.push(VariationFailure {
                variation: index + 1,
                message,
            }),
        }
    }

    fn error_text(&self) -> Option<String> {
        if self.images.is_empty() && self.failures.is_empty() {
            Some(NO_IMAGE_MESSAGE.to_string())
        } else if !self.failures.is_empty() {
            Some(
                self.failures
                    .iter()
                    .map(|failure| failure.message.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        } else {
            None
        }
    }

    fn finish(
        self,
        run_id: String,
        model: &str,
        pricing: &PricingTable,
        started_at: DateTime<Utc>,
    ) -> RunReport {
        let error = self.error_text();
        let usage = pricing.aggregate(model, &self.totals, self.images.len());
        RunReport {
            run_id,
            model: model.to_string(),
            requested: self.total,
            completed: self.completed,
            images: self.images,
            empty_variations: self.empty_variations,
            failures: self.failures,
            error,
            usage,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct GenerationOrchestrator {
    generator: Arc<dyn ImageGenerator>,
    pricing: Arc<PricingTable>,
}

impl GenerationOrchestrator {
    pub fn new(generator: Arc<dyn ImageGenerator>, pricing: PricingTable) -> Self {
        Self {
            generator,
            pricing: Arc::new(pricing),
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Waits for every variation to settle.
    pub async fn run(&self, request: &GenerationRequest) -> Result<RunReport> {
        self.run_with_progress(request, None).await
    }

    pub async fn run_with_progress(
        &self,
        request: &GenerationRequest,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Result<RunReport> {
        request.validate()?;

        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let total = request.count;
        let _timer = crate::logger::timer(&format!("generation run {}", run_id));

        log::info!(
            "Starting run {} with model {} ({} variation(s), aspect {}, {} reference image(s))",
            run_id,
            request.model,
            total,
            request.aspect_ratio,
            request.reference_images.len()
        );
        notify(
            &progress,
            ProgressEvent::Started {
                run_id: run_id.clone(),
                total,
            },
        );

        let mut pending: FuturesUnordered<_> = request
            .variations()
            .into_iter()
            .map(|variation| {
                let generator = Arc::clone(&self.generator);
                async move {
                    let result = generator.generate(&variation).await;
                    (variation.index, result)
                }
            })
            .collect();

        let mut collector = RunCollector::new(total);
        while let Some((index, result)) = pending.next().await {
            let outcome = VariationOutcome::from_result(index, result);
            let kind = outcome.kind();

            match &outcome {
                VariationOutcome::Image { image, .. } => {
                    log::info!("Variation {} produced an image", index + 1);
                    notify(
                        &progress,
                        ProgressEvent::ImageReady {
                            variation: index,
                            image: image.clone(),
                        },
                    );
                }
                VariationOutcome::Empty { .. } => {
                    log::warn!("Variation {} returned no image", index + 1)
                }
                VariationOutcome::Failed { message } => log::error!("{}", message),
            }

            collector.record(index, outcome);
            notify(
                &progress,
                ProgressEvent::Settled {
                    variation: index,
                    completed: collector.completed,
                    total,
                    outcome: kind,
                },
            );
        }

        let report = collector.finish(run_id, &request.model, &self.pricing, started_at);
        log::info!(
            "Run {} finished: {}/{} image(s), {} failure(s)",
            report.run_id,
            report.images.len(),
            report.requested,
            report.failures.len()
        );
        Ok(report)
    }

    /// Spawns the run and hands back its progress events as a stream; the
    /// join handle resolves to the final report.
    pub fn run_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<(ProgressStream, JoinHandle<Result<RunReport>>)> {
        request.validate()?;

        // Started + one Settled per variation + at most one ImageReady per variation,
        // so no event is ever dropped for lack of room.
        let (tx, rx) = mpsc::channel(request.count * 2 + 1);
        let orchestrator = self.clone();
        let handle =
            tokio::spawn(async move { orchestrator.run_with_progress(&request, Some(tx)).await });

        Ok((Box::pin(ReceiverStream::new(rx)), handle))
    }
}

/// Never waits on the receiver: pending calls are only polled by this task.
fn notify(progress: &Option<mpsc::Sender<ProgressEvent>>, event: ProgressEvent) {
    let Some(tx) = progress else {
        return;
    };
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            log::debug!("Progress channel full, dropping {} event", event.kind_name())
        }
        Err(TrySendError::Closed(_)) => {
            log::debug!("Progress receiver dropped, continuing without it")
        }
    }
}

fn describe_failure(index: usize, err: &GenError) -> String {
    let mut message = format!("Variation {} failed: {}", index + 1, err);
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(&format!("\n    caused by: {}", cause));
        source = std::error::Error::source(cause);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AspectRatio, ReferenceImage, VariationRequest};
    use crate::pricing::ModelPricing;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone)]
    enum Step {
        Image { delay_ms: u64, usage: Option<UsageRecord> },
        Empty { usage: Option<UsageRecord> },
        Fail(&'static str),
        Io(&'static str),
    }

    struct ScriptedGenerator {
        steps: Vec<Step>,
        calls: Mutex<Vec<VariationRequest>>,
    }

    impl ScriptedGenerator {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            let mut calls = self.calls.lock().unwrap().clone();
            calls.sort_by_key(|call| call.index);
            calls.into_iter().map(|call| call.prompt).collect()
        }
    }

    #[async_trait]
    impl ImageGenerator for ScriptedGenerator {
        async fn generate(&self, request: &VariationRequest) -> Result<VariationResponse> {
            self.calls.lock().unwrap().push(request.clone());
            match self.steps[request.index].clone() {
                Step::Image { delay_ms, usage } => {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    Ok(VariationResponse {
                        image: Some(GeneratedImage {
                            data: format!("image-{}", request.index),
                            mime_type: "image/png".into(),
                        }),
                        usage,
                        text: None,
                    })
                }
                Step::Empty { usage } => Ok(VariationResponse {
                    image: None,
                    usage,
                    text: Some("no picture today".into()),
                }),
                Step::Fail(status_body) => Err(GenError::ServiceError {
                    status: 500,
                    body: status_body.to_string(),
                }),
                Step::Io(reason) => Err(GenError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    reason,
                ))),
            }
        }
    }

    fn usage(prompt: u64, candidate: u64) -> Option<UsageRecord> {
        Some(UsageRecord {
            prompt_tokens: prompt,
            candidate_tokens: candidate,
            total_tokens: prompt + candidate,
        })
    }

    fn image(delay_ms: u64) -> Step {
        Step::Image {
            delay_ms,
            usage: None,
        }
    }

    fn orchestrator(generator: Arc<ScriptedGenerator>) -> GenerationOrchestrator {
        GenerationOrchestrator::new(generator, PricingTable::default())
    }

    #[tokio::test]
    async fn test_all_success_for_every_count() {
        for count in 1..=4 {
            let generator = ScriptedGenerator::new(vec![image(0); count]);
            let report = orchestrator(generator)
                .run(&GenerationRequest::new("a cat").with_count(count))
                .await
                .unwrap();

            assert_eq!(report.images.len(), count);
            assert_eq!(report.completed, count);
            assert_eq!(report.requested, count);
            assert!(report.error.is_none());
            assert!(report.failures.is_empty());
        }
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successes_and_lists_each_error() {
        let generator = ScriptedGenerator::new(vec![
            image(5),
            Step::Fail("backend unavailable"),
            image(0),
            Step::Fail("quota exceeded"),
        ]);
        let report = orchestrator(generator)
            .run(&GenerationRequest::new("a cat").with_count(4))
            .await
            .unwrap();

        assert_eq!(report.images.len(), 2);
        assert_eq!(report.completed, 4);
        assert!(report.is_partial());
        assert_eq!(report.failures.len(), 2);

        let error = report.error.unwrap();
        let entries: Vec<&str> = error
            .lines()
            .filter(|line| line.starts_with("Variation "))
            .collect();
        assert_eq!(entries.len(), 2);
        assert!(error.contains("Variation 2 failed: Gemini service error (HTTP 500): backend unavailable"));
        assert!(error.contains("Variation 4 failed: Gemini service error (HTTP 500): quota exceeded"));
    }

    #[tokio::test]
    async fn test_all_empty_reports_generic_message() {
        let generator = ScriptedGenerator::new(vec![
            Step::Empty { usage: None },
            Step::Empty { usage: None },
            Step::Empty { usage: None },
        ]);
        let report = orchestrator(generator)
            .run(&GenerationRequest::new("a cat").with_count(3))
            .await
            .unwrap();

        assert!(report.images.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(report.empty_variations, 3);
        assert_eq!(report.completed, 3);
        assert_eq!(report.error.as_deref(), Some(NO_IMAGE_MESSAGE));
    }

    #[tokio::test]
    async fn test_empty_slot_is_not_an_error() {
        let generator = ScriptedGenerator::new(vec![image(0), Step::Empty { usage: None }]);
        let report = orchestrator(generator)
            .run(&GenerationRequest::new("a cat").with_count(2))
            .await
            .unwrap();

        assert_eq!(report.images.len(), 1);
        assert_eq!(report.empty_variations, 1);
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn test_all_failed_lists_errors_not_generic_message() {
        let generator = ScriptedGenerator::new(vec![Step::Fail("a"), Step::Fail("b")]);
        let report = orchestrator(generator)
            .run(&GenerationRequest::new("a cat").with_count(2))
            .await
            .unwrap();

        let error = report.error.unwrap();
        assert_ne!(error, NO_IMAGE_MESSAGE);
        assert_eq!(error.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_failure_trace_includes_source_chain() {
        let generator = ScriptedGenerator::new(vec![Step::Io("connection reset")]);
        let report = orchestrator(generator)
            .run(&GenerationRequest::new("a cat"))
            .await
            .unwrap();

        let message = &report.failures[0].message;
        assert!(message.starts_with("Variation 1 failed: I/O error: connection reset"));
        assert!(message.contains("\n    caused by: connection reset"));
    }

    #[tokio::test]
    async fn test_fast_failure_does_not_cancel_slow_sibling() {
        let generator = ScriptedGenerator::new(vec![Step::Fail("boom"), image(30)]);
        let report = orchestrator(generator)
            .run(&GenerationRequest::new("a cat").with_count(2))
            .await
            .unwrap();

        assert_eq!(report.images.len(), 1);
        assert_eq!(report.images[0].data, "image-1");
        assert_eq!(report.completed, 2);
    }

    #[tokio::test]
    async fn test_images_follow_settlement_order() {
        let generator = ScriptedGenerator::new(vec![image(40), image(20), image(0)]);
        let report = orchestrator(generator)
            .run(&GenerationRequest::new("a cat").with_count(3))
            .await
            .unwrap();

        let order: Vec<&str> = report.images.iter().map(|i| i.data.as_str()).collect();
        assert_eq!(order, vec!["image-2", "image-1", "image-0"]);
    }

    #[tokio::test]
    async fn test_cost_is_order_independent_sum() {
        let model = "priced-model";
        let pricing = PricingTable::empty().with_model(model, ModelPricing::new(0.5, 99.0, 40.0));
        let steps = vec![
            Step::Image { delay_ms: 30, usage: usage(100, 1290) },
            Step::Image { delay_ms: 0, usage: usage(120, 1300) },
            Step::Empty { usage: usage(80, 10) },
            Step::Fail("no usage on failure"),
        ];
        let generator = ScriptedGenerator::new(steps);
        let report = GenerationOrchestrator::new(generator, pricing)
            .run(&GenerationRequest::new("a cat").with_model(model).with_count(4))
            .await
            .unwrap();

        let usage = report.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 300);
        assert_eq!(usage.candidate_tokens, 2600);
        assert_eq!(usage.total_tokens, 2900);
        assert_eq!(usage.image_count, 2);
        let expected = (300.0 / 1e6) * 0.5 + (2600.0 / 1e6) * 40.0;
        assert!((usage.estimated_cost_usd - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_no_usage_without_pricing_or_tokens() {
        let generator = ScriptedGenerator::new(vec![Step::Image {
            delay_ms: 0,
            usage: usage(10, 10),
        }]);
        let report = orchestrator(generator)
            .run(&GenerationRequest::new("a cat").with_model("unpriced-model"))
            .await
            .unwrap();
        assert!(report.usage.is_none());

        let generator = ScriptedGenerator::new(vec![image(0)]);
        let report = orchestrator(generator)
            .run(&GenerationRequest::new("a cat"))
            .await
            .unwrap();
        assert!(report.usage.is_none());
    }

    #[tokio::test]
    async fn test_single_call_prompt_is_exact() {
        let generator = ScriptedGenerator::new(vec![image(0)]);
        orchestrator(Arc::clone(&generator))
            .run(&GenerationRequest::new("a cat").with_aspect_ratio(AspectRatio::Square))
            .await
            .unwrap();

        assert_eq!(generator.prompts(), vec!["a cat"]);
    }

    #[tokio::test]
    async fn test_variation_prompts_sent() {
        let generator = ScriptedGenerator::new(vec![image(0), image(0)]);
        orchestrator(Arc::clone(&generator))
            .run(
                &GenerationRequest::new("a cat")
                    .with_aspect_ratio(AspectRatio::Landscape)
                    .with_count(2),
            )
            .await
            .unwrap();

        assert_eq!(
            generator.prompts(),
            vec![
                "a cat (aspect ratio: 16:9) (variation 1)",
                "a cat (aspect ratio: 16:9) (variation 2)",
            ]
        );
    }

    #[tokio::test]
    async fn test_reference_images_reach_every_call() {
        let generator = ScriptedGenerator::new(vec![image(0), image(0)]);
        let reference = ReferenceImage {
            data: "AAAA".into(),
            mime_type: "image/webp".into(),
        };
        orchestrator(Arc::clone(&generator))
            .run(
                &GenerationRequest::new("restyle")
                    .with_count(2)
                    .with_reference_image(reference.clone()),
            )
            .await
            .unwrap();

        let calls = generator.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|call| call.reference_images[..] == [reference.clone()]));
    }

    #[tokio::test]
    async fn test_invalid_request_makes_no_calls() {
        let generator = ScriptedGenerator::new(vec![image(0)]);
        let err = orchestrator(Arc::clone(&generator))
            .run(&GenerationRequest::new(""))
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert!(generator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_progress_events() {
        let generator = ScriptedGenerator::new(vec![image(10), Step::Fail("x"), image(0)]);
        let (tx, mut rx) = mpsc::channel(16);
        let report = orchestrator(generator)
            .run_with_progress(&GenerationRequest::new("a cat").with_count(3), Some(tx))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(matches!(&events[0], ProgressEvent::Started { total: 3, run_id } if *run_id == report.run_id));
        let completed: Vec<usize> = events
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Settled { completed, total, .. } => {
                    assert_eq!(*total, 3);
                    Some(*completed)
                }
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![1, 2, 3]);

        let ready = events
            .iter()
            .filter(|event| matches!(event, ProgressEvent::ImageReady { .. }))
            .count();
        assert_eq!(ready, 2);
    }

    #[tokio::test]
    async fn test_full_progress_channel_does_not_stall_run() {
        let generator = ScriptedGenerator::new(vec![image(0), image(0)]);
        let (tx, mut rx) = mpsc::channel(1);
        let report = tokio::time::timeout(
            Duration::from_secs(2),
            orchestrator(generator)
                .run_with_progress(&GenerationRequest::new("a cat").with_count(2), Some(tx)),
        )
        .await
        .expect("run stalled on a full progress channel")
        .unwrap();

        assert_eq!(report.images.len(), 2);
        assert_eq!(report.completed, 2);
        assert!(matches!(rx.recv().await, Some(ProgressEvent::Started { total: 2, .. })));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_fail_run() {
        let generator = ScriptedGenerator::new(vec![image(0), Step::Fail("x")]);
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let report = orchestrator(generator)
            .run_with_progress(&GenerationRequest::new("a cat").with_count(2), Some(tx))
            .await
            .unwrap();

        assert_eq!(report.completed, 2);
        assert_eq!(report.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_run_stream() {
        let generator = ScriptedGenerator::new(vec![image(0), Step::Empty { usage: None }]);
        let (stream, handle) = orchestrator(generator)
            .run_stream(GenerationRequest::new("a cat").with_count(2))
            .unwrap();

        let events: Vec<ProgressEvent> = stream.collect().await;
        let report = handle.await.unwrap().unwrap();

        assert_eq!(events.len(), 4);
        assert_eq!(report.images.len(), 1);
        assert_eq!(report.completed, 2);
    }

    #[tokio::test]
    async fn test_run_stream_rejects_bad_count() {
        let generator = ScriptedGenerator::new(vec![]);
        let result = orchestrator(generator).run_stream(GenerationRequest::new("a cat").with_count(9));
        assert!(result.is_err());
    }
}
