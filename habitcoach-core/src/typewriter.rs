//! Character-by-character reveal of AI replies, with tap-to-complete.
//!
//! The reveal runs as a `tokio::spawn` task publishing the visible prefix
//! through a `watch` channel. Whichever of natural completion or [`skip`]
//! comes first commits the full text; the other finds the commit slot empty.
//!
//! [`skip`]: TypewriterHandle::skip

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::TypewriterConfig;

type CommitFn = Box<dyn FnOnce(String) + Send>;

/// Take-once holder for the commit callback.
#[derive(Clone)]
struct CommitSlot {
    callback: Arc<Mutex<Option<CommitFn>>>,
    committed: Arc<AtomicBool>,
}

impl CommitSlot {
    fn new(callback: CommitFn) -> Self {
        Self {
            callback: Arc::new(Mutex::new(Some(callback))),
            committed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn take(&self) -> Option<CommitFn> {
        self.callback.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Run the callback if nobody has yet. Returns whether it ran.
    fn fire(&self, text: &str) -> bool {
        match self.take() {
            Some(callback) => {
                self.committed.store(true, Ordering::SeqCst);
                callback(text.to_string());
                true
            }
            None => false,
        }
    }

    fn disarm(&self) {
        drop(self.take());
    }
}

/// Reveals text at a fixed per-character pace.
#[derive(Debug, Clone, Copy)]
pub struct Typewriter {
    interval: Duration,
}

impl Typewriter {
    pub fn new(speed_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(speed_ms.max(1)),
        }
    }

    pub fn from_config(config: &TypewriterConfig) -> Self {
        Self::new(config.speed_ms)
    }

    /// Start revealing `text`. `on_commit` receives the full text exactly
    /// once, unless the animation is cancelled first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn animate<F>(&self, text: impl Into<String>, on_commit: F) -> TypewriterHandle
    where
        F: FnOnce(String) + Send + 'static,
    {
        let text = text.into();
        let (tx, rx) = watch::channel(String::new());
        let tx = Arc::new(tx);
        let commit = CommitSlot::new(Box::new(on_commit));
        let stop = CancellationToken::new();

        let task = tokio::spawn(reveal(
            text.clone(),
            self.interval,
            tx.clone(),
            commit.clone(),
            stop.clone(),
        ));

        TypewriterHandle {
            text,
            tx,
            rx,
            commit,
            stop,
            task: Some(task),
        }
    }
}

impl Default for Typewriter {
    fn default() -> Self {
        Self::from_config(&TypewriterConfig::default())
    }
}

async fn reveal(
    text: String,
    interval: Duration,
    tx: Arc<watch::Sender<String>>,
    commit: CommitSlot,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut shown = String::with_capacity(text.len());

    for ch in text.chars() {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }
        shown.push(ch);
        // A skip that lands between ticks owns the channel from then on.
        tx.send_if_modified(|current| {
            if stop.is_cancelled() {
                return false;
            }
            current.clone_from(&shown);
            true
        });
    }

    if commit.fire(&text) {
        debug!(chars = shown.chars().count(), "Typewriter finished");
    }
}

/// Control surface for one running animation.
pub struct TypewriterHandle {
    text: String,
    tx: Arc<watch::Sender<String>>,
    rx: watch::Receiver<String>,
    commit: CommitSlot,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TypewriterHandle {
    /// The complete text being revealed.
    pub fn full_text(&self) -> &str {
        &self.text
    }

    /// The currently visible prefix.
    pub fn visible(&self) -> String {
        self.rx.borrow().clone()
    }

    /// Watch the visible prefix as it grows.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.rx.clone()
    }

    /// Whether the full text has been handed to the commit callback.
    pub fn is_committed(&self) -> bool {
        self.commit.committed.load(Ordering::SeqCst)
    }

    /// Tap-to-complete: show everything now and commit immediately.
    pub fn skip(&self) {
        self.stop.cancel();
        self.tx.send_replace(self.text.clone());
        if self.commit.fire(&self.text) {
            debug!("Typewriter skipped to full text");
        }
    }

    /// Stop the reveal without committing.
    pub fn cancel(&self) {
        self.commit.disarm();
        self.stop.cancel();
    }

    /// Wait for the reveal task to end, by completion, skip or cancel.
    pub async fn finished(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_commit() -> (Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>, impl FnOnce(String) + Send) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (c, s) = (count.clone(), seen.clone());
        let callback = move |text: String| {
            c.fetch_add(1, Ordering::SeqCst);
            s.lock().unwrap().push(text);
        };
        (count, seen, callback)
    }

    #[tokio::test]
    async fn test_natural_completion_commits_once() {
        let (count, seen, callback) = counting_commit();
        let mut handle = Typewriter::new(1).animate("안녕하세요!", callback);
        handle.finished().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap().as_slice(), ["안녕하세요!".to_string()]);
        assert_eq!(handle.visible(), "안녕하세요!");
        assert!(handle.is_committed());
    }

    #[tokio::test]
    async fn test_skip_commits_immediately_and_once() {
        let (count, _seen, callback) = counting_commit();
        let text = "정리해볼게요! 매일 아침 7시에 30분씩 걷기로 했어요.";
        let mut handle = Typewriter::new(50).animate(text, callback);

        handle.skip();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(handle.visible(), text);

        handle.finished().await;
        handle.skip();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(handle.visible(), text);
    }

    #[tokio::test]
    async fn test_skip_after_completion_does_not_double_commit() {
        let (count, _seen, callback) = counting_commit();
        let mut handle = Typewriter::new(1).animate("좋아요", callback);
        handle.finished().await;
        handle.skip();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_never_commits() {
        let (count, _seen, callback) = counting_commit();
        let mut handle = Typewriter::new(50).animate("홈에서 봐요!", callback);
        handle.cancel();
        handle.finished().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!handle.is_committed());
        assert_ne!(handle.visible(), "홈에서 봐요!");
    }

    #[tokio::test]
    async fn test_prefixes_are_whole_characters() {
        let text = "목표는 매일 운동하기";
        let handle = Typewriter::new(1).animate(text, |_| {});
        let mut rx = handle.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            assert!(text.starts_with(&current));
            if current == text {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        assert_eq!(handle.visible(), text);
    }

    #[test]
    fn test_zero_speed_is_clamped() {
        let typewriter = Typewriter::new(0);
        assert_eq!(typewriter.interval, Duration::from_millis(1));
    }
}
