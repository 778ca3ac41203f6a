// End-to-end tests for the page pipeline.
//
// Each test builds a Document, an InMemoryBackend around a scripted scorer,
// and a PageRuntime, then drives it on tokio's paused clock so debounce,
// pacing and slow classifier calls run instantly and deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use shroud::bridge::memory::InMemoryBackend;
use shroud::bridge::{Messenger, PushMessage};
use shroud::config::PipelineTuning;
use shroud::dom::{ContentSurface, Document, NodeId, NodeSpec};
use shroud::pipeline::{ClickTarget, Moderator, PageEvent, PageRuntime, RedactionState};
use shroud::settings::{BlurStrength, Settings};
use shroud::toxicity::traits::{
    Category, Classification, ClassificationResult, MissingApiKey, RateLimited, ToxicityScorer,
};
use shroud::pipeline::toast::ToastKind;

// ============================================================
// Fixtures
// ============================================================

#[derive(Clone, Copy)]
enum Behavior {
    Score,
    Fail,
    NoKey,
    RateLimited,
    Slow(Duration),
}

/// Scores text by keyword and logs every batch it receives.
struct ScriptedScorer {
    rules: Vec<(&'static str, Category, f64)>,
    behavior: Behavior,
    calls: Arc<Mutex<Vec<(Instant, Vec<String>)>>>,
}

impl ScriptedScorer {
    fn new(behavior: Behavior) -> Self {
        Self {
            rules: vec![
                ("where you live", Category::Threat, 0.82),
                ("mildly rude", Category::Insult, 0.4),
                ("borderline", Category::Toxicity, 0.6),
            ],
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn classify(&self, text: &str) -> Classification {
        if text.contains("unsupported") {
            return Classification::failed("language not supported");
        }
        let scores = self
            .rules
            .iter()
            .filter(|(keyword, _, _)| text.contains(keyword))
            .map(|(_, category, score)| (*category, *score));
        Classification::Scored(ClassificationResult::from_scores(scores))
    }
}

#[async_trait]
impl ToxicityScorer for ScriptedScorer {
    async fn score_text(&self, text: &str) -> Result<Classification> {
        Ok(self.classify(text))
    }

    async fn score_batch(&self, texts: &[String]) -> Result<Vec<Classification>> {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), texts.to_vec()));
        match self.behavior {
            Behavior::Score => {}
            Behavior::Fail => anyhow::bail!("classifier returned 503"),
            Behavior::NoKey => return Err(MissingApiKey.into()),
            Behavior::RateLimited => return Err(RateLimited.into()),
            Behavior::Slow(delay) => sleep(delay).await,
        }
        Ok(texts.iter().map(|t| self.classify(t)).collect())
    }
}

struct Page {
    backend: Arc<InMemoryBackend>,
    calls: Arc<Mutex<Vec<(Instant, Vec<String>)>>>,
    events: mpsc::UnboundedSender<PageEvent<Document>>,
    task: JoinHandle<Moderator<Document>>,
}

impl Page {
    async fn open(doc: Document, behavior: Behavior, settings: Settings) -> Self {
        let scorer = ScriptedScorer::new(behavior);
        let calls = scorer.calls.clone();
        let backend = Arc::new(InMemoryBackend::new(Box::new(scorer), settings));
        let (events, rx) = mpsc::unbounded_channel();
        let runtime = PageRuntime::connect(
            doc,
            PipelineTuning::default(),
            Messenger::new(backend.clone()),
            rx,
        )
        .await;
        Self {
            backend,
            calls,
            events,
            task: tokio::spawn(runtime.run()),
        }
    }

    fn send(&self, event: PageEvent<Document>) {
        self.events.send(event).unwrap();
    }

    async fn close(self) -> (Moderator<Document>, Arc<InMemoryBackend>) {
        self.send(PageEvent::Shutdown);
        (self.task.await.unwrap(), self.backend)
    }

    fn submitted(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, texts)| texts.clone())
            .collect()
    }
}

fn comments(texts: &[&str]) -> (Document, Vec<NodeId>) {
    let mut doc = Document::new("https://forum.example/thread/42");
    let root = doc.root();
    let nodes = texts
        .iter()
        .map(|text| {
            doc.insert_spec(root, &NodeSpec::element("div").with_class("comment").with_text(text))
                .unwrap()
        })
        .collect();
    doc.take_mutations();
    (doc, nodes)
}

fn comment(text: &str) -> NodeSpec {
    NodeSpec::element("div").with_class("comment").with_text(text)
}

// ============================================================
// Detection scenarios
// ============================================================

#[tokio::test(start_paused = true)]
async fn threat_above_threshold_is_blurred_and_reported() {
    let (doc, nodes) = comments(&[
        "I know where you live and you will regret it",
        "that was a mildly rude thing to say",
    ]);
    let page = Page::open(doc, Behavior::Score, Settings::default()).await;
    sleep(Duration::from_secs(2)).await;
    let (moderator, backend) = page.close().await;

    assert_eq!(moderator.redaction_state(nodes[0]), RedactionState::Blurred);
    assert_eq!(
        moderator.surface().badge_text(nodes[0]).as_deref(),
        Some("Threat · High · 82%")
    );

    // 0.4 < 0.7: untouched, no event.
    assert_eq!(moderator.redaction_state(nodes[1]), RedactionState::Unredacted);
    assert!(moderator.surface().overlay_of(nodes[1]).is_none());

    let stats = backend.stats().await;
    assert_eq!(stats.scanned, 2);
    assert_eq!(stats.detections, 1);
    assert_eq!(stats.by_category.get("threat"), Some(&1));
    assert_eq!(stats.recent[0].score, 82);
    assert_eq!(stats.recent[0].url, "https://forum.example/thread/42");

    assert_eq!(moderator.toasts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn notifications_can_be_turned_off() {
    let (doc, _) = comments(&["I know where you live and you will regret it"]);
    let settings = Settings {
        notifications_enabled: false,
        ..Settings::default()
    };
    let page = Page::open(doc, Behavior::Score, settings).await;
    sleep(Duration::from_secs(2)).await;
    let (moderator, backend) = page.close().await;

    assert_eq!(moderator.overlays().len(), 1);
    assert!(moderator.toasts().is_empty());
    assert_eq!(backend.stats().await.detections, 1);
}

// ============================================================
// Batching
// ============================================================

#[tokio::test(start_paused = true)]
async fn flushes_are_bounded_and_paced() {
    let texts: Vec<String> = (0..25)
        .map(|i| format!("ordinary comment number {i} about the match"))
        .collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let (doc, _) = comments(&refs);
    let page = Page::open(doc, Behavior::Score, Settings::default()).await;
    sleep(Duration::from_secs(5)).await;

    let calls = page.calls.lock().unwrap().clone();
    let sizes: Vec<usize> = calls.iter().map(|(_, texts)| texts.len()).collect();
    assert_eq!(sizes, vec![10, 10, 5]);
    for pair in calls.windows(2) {
        assert!(pair[1].0 - pair[0].0 >= Duration::from_secs(1));
    }
    // FIFO across batches.
    assert_eq!(calls[1].1[0], texts[10]);

    let (_, backend) = page.close().await;
    assert_eq!(backend.stats().await.scanned, 25);
}

#[tokio::test(start_paused = true)]
async fn bursts_of_mutations_are_debounced() {
    let (doc, _) = comments(&[]);
    let page = Page::open(doc, Behavior::Score, Settings::default()).await;

    // A new comment every 300ms keeps pushing the flush out.
    for i in 0..5 {
        page.send(PageEvent::mutate(move |doc: &mut Document| {
            let root = doc.root();
            doc.insert_spec(root, &comment(&format!("live reply number {i} just arrived")))
                .unwrap();
        }));
        sleep(Duration::from_millis(300)).await;
    }
    assert!(page.calls.lock().unwrap().is_empty());

    sleep(Duration::from_secs(1)).await;
    let calls = page.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.len(), 5);
    page.close().await;
}

#[tokio::test(start_paused = true)]
async fn nodes_are_submitted_once_until_rescan() {
    let (doc, _) = comments(&["a perfectly pleasant remark about gardening"]);
    let page = Page::open(doc, Behavior::Score, Settings::default()).await;
    sleep(Duration::from_secs(2)).await;

    page.send(PageEvent::DomChanged);
    page.send(PageEvent::DomChanged);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(page.submitted().len(), 1);

    page.send(PageEvent::Rescan);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(page.submitted().len(), 2);
    page.close().await;
}

#[tokio::test(start_paused = true)]
async fn removed_before_flush_is_not_submitted() {
    let (doc, _) = comments(&[]);
    let page = Page::open(doc, Behavior::Score, Settings::default()).await;

    page.send(PageEvent::mutate(|doc: &mut Document| {
        let root = doc.root();
        let node = doc
            .insert_spec(root, &comment("a comment that gets deleted immediately"))
            .unwrap();
        doc.remove(node).unwrap();
    }));
    sleep(Duration::from_secs(2)).await;
    assert!(page.submitted().is_empty());
    page.close().await;
}

// ============================================================
// Failure handling
// ============================================================

#[tokio::test(start_paused = true)]
async fn classifier_failure_fails_open() {
    let (doc, nodes) = comments(&["I know where you live and you will regret it"]);
    let page = Page::open(doc, Behavior::Fail, Settings::default()).await;
    sleep(Duration::from_secs(3)).await;
    let (moderator, backend) = page.close().await;

    assert_eq!(moderator.redaction_state(nodes[0]), RedactionState::Unredacted);
    let stats = backend.stats().await;
    assert_eq!(stats.detections, 0);
    assert_eq!(stats.scanned, 1);
    // Not retried on its own.
    assert!(moderator.is_processed(nodes[0]));
}

#[tokio::test(start_paused = true)]
async fn missing_api_key_notice_appears_once() {
    let texts: Vec<String> = (0..15)
        .map(|i| format!("some comment text number {i}"))
        .collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let (doc, _) = comments(&refs);
    let page = Page::open(doc, Behavior::NoKey, Settings::default()).await;

    // Both batches are rejected; the user is told once.
    sleep(Duration::from_millis(1600)).await;
    assert_eq!(page.calls.lock().unwrap().len(), 2);
    let (moderator, backend) = page.close().await;

    assert_eq!(moderator.toasts().len(), 1);
    assert!(moderator.toasts()[0].message.contains("API key"));
    assert_eq!(moderator.overlays().len(), 0);
    assert_eq!(backend.stats().await.detections, 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_warns_once() {
    let texts: Vec<String> = (0..15)
        .map(|i| format!("I know where you live, comment {i}"))
        .collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let (doc, nodes) = comments(&refs);
    let page = Page::open(doc, Behavior::RateLimited, Settings::default()).await;

    sleep(Duration::from_millis(1600)).await;
    assert_eq!(page.calls.lock().unwrap().len(), 2);
    let (moderator, backend) = page.close().await;

    assert_eq!(moderator.toasts().len(), 1);
    assert_eq!(moderator.toasts()[0].kind, ToastKind::Warning);
    assert!(moderator.toasts()[0].message.contains("rate limited"));
    // Fail open: nothing hidden, nothing retried.
    assert_eq!(moderator.overlays().len(), 0);
    assert!(nodes.iter().all(|n| moderator.is_processed(*n)));
    let stats = backend.stats().await;
    assert_eq!(stats.scanned, 15);
    assert_eq!(stats.detections, 0);
}

#[tokio::test(start_paused = true)]
async fn one_unscorable_text_does_not_sink_the_batch() {
    let (doc, nodes) = comments(&[
        "I know where you live and you will regret it",
        "an unsupported language the classifier rejects",
    ]);
    let page = Page::open(doc, Behavior::Score, Settings::default()).await;
    sleep(Duration::from_secs(2)).await;
    let (moderator, backend) = page.close().await;

    assert_eq!(moderator.redaction_state(nodes[0]), RedactionState::Blurred);
    assert_eq!(moderator.redaction_state(nodes[1]), RedactionState::Unredacted);
    assert_eq!(backend.stats().await.detections, 1);
}

#[tokio::test(start_paused = true)]
async fn results_arriving_after_disable_are_ignored() {
    let (doc, nodes) = comments(&["I know where you live and you will regret it"]);
    let page = Page::open(doc, Behavior::Slow(Duration::from_secs(5)), Settings::default()).await;

    // Batch is in flight at 0.5s; disable while it's outstanding.
    sleep(Duration::from_secs(1)).await;
    assert_eq!(page.calls.lock().unwrap().len(), 1);
    page.send(
        PushMessage::SettingsUpdated {
            settings: Settings {
                enabled: false,
                ..Settings::default()
            },
        }
        .into(),
    );

    sleep(Duration::from_secs(10)).await;
    let (moderator, backend) = page.close().await;
    assert_eq!(moderator.redaction_state(nodes[0]), RedactionState::Unredacted);
    assert!(moderator.surface().overlay_of(nodes[0]).is_none());
    assert_eq!(backend.stats().await.detections, 0);
}

// ============================================================
// Settings changes
// ============================================================

#[tokio::test(start_paused = true)]
async fn disable_reverts_and_enable_rescans() {
    let (doc, nodes) = comments(&["I know where you live and you will regret it"]);
    let page = Page::open(doc, Behavior::Score, Settings::default()).await;
    sleep(Duration::from_secs(2)).await;

    page.send(PageEvent::SettingsUpdated(Settings {
        enabled: false,
        ..Settings::default()
    }));
    sleep(Duration::from_secs(1)).await;

    page.send(PageEvent::SettingsUpdated(Settings::default()));
    sleep(Duration::from_secs(2)).await;

    // Submitted again after re-enable and redacted again.
    assert_eq!(page.submitted().len(), 2);
    let (moderator, _) = page.close().await;
    assert_eq!(moderator.redaction_state(nodes[0]), RedactionState::Blurred);
}

#[tokio::test(start_paused = true)]
async fn threshold_applies_to_later_results() {
    let (doc, _) = comments(&[]);
    let page = Page::open(doc, Behavior::Score, Settings::default()).await;

    // Raising the threshold past 0.82 stops new threat redactions.
    page.send(PageEvent::SettingsUpdated(Settings {
        sensitivity_threshold: 0.9,
        ..Settings::default()
    }));
    page.send(PageEvent::mutate(|doc: &mut Document| {
        let root = doc.root();
        doc.insert_spec(root, &comment("I know where you live, watch out"))
            .unwrap();
    }));
    sleep(Duration::from_secs(2)).await;

    // Lowering it to 0.5 catches a 0.6 comment.
    page.send(PageEvent::SettingsUpdated(Settings {
        sensitivity_threshold: 0.5,
        ..Settings::default()
    }));
    page.send(PageEvent::mutate(|doc: &mut Document| {
        let root = doc.root();
        doc.insert_spec(root, &comment("this one is borderline at best"))
            .unwrap();
    }));
    sleep(Duration::from_secs(2)).await;

    let (moderator, _) = page.close().await;
    let redacted: Vec<String> = moderator
        .overlays()
        .redactions()
        .iter()
        .map(|r| r.text.clone())
        .collect();
    assert_eq!(redacted, vec!["this one is borderline at best".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn blur_change_restyles_existing_overlays() {
    let (doc, nodes) = comments(&["I know where you live and you will regret it"]);
    let page = Page::open(doc, Behavior::Score, Settings::default()).await;
    sleep(Duration::from_secs(2)).await;

    page.send(PageEvent::SettingsUpdated(Settings {
        blur_strength: BlurStrength::Heavy,
        ..Settings::default()
    }));
    sleep(Duration::from_millis(10)).await;
    let (moderator, _) = page.close().await;

    let parts = moderator.surface().overlay_of(nodes[0]).unwrap();
    let blur = moderator.surface().element(parts.blur).unwrap();
    assert!(blur.has_class("shroud-blur-heavy"));
    assert!(!blur.has_class("shroud-blur-medium"));
}

// ============================================================
// Reveal and evidence
// ============================================================

#[tokio::test(start_paused = true)]
async fn reveal_and_hide_without_parental_lock() {
    let (doc, nodes) = comments(&["I know where you live and you will regret it"]);
    let page = Page::open(doc, Behavior::Score, Settings::default()).await;
    sleep(Duration::from_secs(2)).await;

    page.send(PageEvent::Click {
        node: nodes[0],
        target: ClickTarget::RevealControl,
    });
    page.send(PageEvent::Click {
        node: nodes[0],
        target: ClickTarget::BlurLayer,
    });
    sleep(Duration::from_millis(10)).await;
    let (moderator, backend) = page.close().await;

    assert_eq!(moderator.redaction_state(nodes[0]), RedactionState::Revealed);
    assert_eq!(backend.verify_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn removed_redactions_are_forgotten() {
    let (doc, nodes) = comments(&[
        "I know where you live and you will regret it",
        "and I also know where you live, just so you know",
    ]);
    let page = Page::open(doc, Behavior::Score, Settings::default()).await;
    sleep(Duration::from_secs(2)).await;

    let gone = nodes[0];
    page.send(PageEvent::mutate(move |doc: &mut Document| {
        let wrapper = doc.overlay_of(gone).unwrap().wrapper;
        doc.remove(wrapper).unwrap();
    }));
    sleep(Duration::from_millis(10)).await;
    let (moderator, _) = page.close().await;

    assert_eq!(moderator.overlays().len(), 1);
    assert_eq!(moderator.redaction_state(gone), RedactionState::Unredacted);
    assert_eq!(moderator.redaction_state(nodes[1]), RedactionState::Blurred);
}

#[tokio::test(start_paused = true)]
async fn toasts_can_be_dismissed() {
    let (doc, _) = comments(&["I know where you live and you will regret it"]);
    let page = Page::open(doc, Behavior::Score, Settings::default()).await;
    sleep(Duration::from_secs(1)).await;

    // Toast ids start at 1 on every page.
    page.send(PageEvent::DismissToast(1));
    sleep(Duration::from_millis(10)).await;
    let (moderator, backend) = page.close().await;

    assert!(moderator.toasts().is_empty());
    assert_eq!(backend.stats().await.detections, 1);
}

#[tokio::test(start_paused = true)]
async fn evidence_is_captured_once() {
    let (doc, nodes) = comments(&["I know where you live and you will regret it"]);
    let settings = Settings {
        evidence_mode: true,
        ..Settings::default()
    };
    let page = Page::open(doc, Behavior::Score, settings).await;
    sleep(Duration::from_secs(2)).await;

    page.send(PageEvent::CaptureEvidence(nodes[0]));
    page.send(PageEvent::CaptureEvidence(nodes[0]));
    sleep(Duration::from_millis(10)).await;
    let (_, backend) = page.close().await;

    let evidence = backend.evidence().await;
    assert_eq!(evidence.len(), 1);
    assert_eq!(evidence[0].text, "I know where you live and you will regret it");
    assert_eq!(evidence[0].scores.get(&Category::Threat), Some(&0.82));
    assert_eq!(evidence[0].url, "https://forum.example/thread/42");
}
