//! Incremental on-screen reveal of answer text
//!
//! One shared scheduler per host. Starting a new reveal supersedes the previous
//! one: the run id is bumped under the display lock, and every tick writes only
//! while its own run id is still current, so two reveals can never interleave
//! writes to the display buffer.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// What the display currently shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reveal {
    /// Incremented by every start and cancel
    pub run: u64,
    /// Revealed prefix of the target text
    pub text: String,
    /// Length of the target in characters
    pub target_chars: usize,
    /// The whole target has been revealed
    pub done: bool,
}

/// Pure reveal position over a target string, one character per step
#[derive(Debug, Clone)]
pub struct RevealCursor {
    target: String,
    /// Byte offset where each character ends
    ends: Vec<usize>,
    offset: usize,
}

impl RevealCursor {
    pub fn new(target: &str) -> Self {
        let ends = target
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .collect();
        Self {
            target: target.to_string(),
            ends,
            offset: 0,
        }
    }

    /// Reveal one more character; `None` once everything is shown
    pub fn tick(&mut self) -> Option<&str> {
        if self.is_done() {
            return None;
        }
        self.offset += 1;
        Some(self.revealed())
    }

    pub fn revealed(&self) -> &str {
        let end = match self.offset {
            0 => 0,
            n => self.ends[n - 1],
        };
        self.target.get(..end).unwrap_or_default()
    }

    /// Revealed length in characters
    #[cfg(test)]
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn target_chars(&self) -> usize {
        self.ends.len()
    }

    pub fn is_done(&self) -> bool {
        self.offset >= self.ends.len()
    }
}

/// Restartable, cancellable reveal timer
pub struct TypewriterScheduler {
    interval: Duration,
    display: Arc<watch::Sender<Reveal>>,
    active: Option<CancellationToken>,
}

impl TypewriterScheduler {
    pub fn new(interval: Duration) -> Self {
        let (display, _) = watch::channel(Reveal::default());
        Self {
            interval,
            display: Arc::new(display),
            active: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Reveal> {
        self.display.subscribe()
    }

    /// Cancel any prior run and reveal `full_text` from offset 0
    pub fn start(&mut self, full_text: &str) {
        self.stop_ticker();

        let cursor = RevealCursor::new(full_text);
        self.display.send_modify(|reveal| {
            reveal.run += 1;
            reveal.text.clear();
            reveal.target_chars = cursor.target_chars();
            reveal.done = cursor.is_done();
        });
        // Tickers never change the run id, so this is the one just written
        let run = self.display.borrow().run;

        if cursor.is_done() {
            return;
        }

        let cancel = CancellationToken::new();
        self.active = Some(cancel.clone());
        tokio::spawn(tick_loop(
            cursor,
            run,
            self.interval,
            self.display.clone(),
            cancel,
        ));
    }

    /// Stop the current run and clear the display
    pub fn cancel(&mut self) {
        self.stop_ticker();
        self.display.send_modify(|reveal| {
            reveal.run += 1;
            reveal.text.clear();
            reveal.target_chars = 0;
            reveal.done = false;
        });
    }

    fn stop_ticker(&mut self) {
        if let Some(cancel) = self.active.take() {
            cancel.cancel();
        }
    }
}

impl Drop for TypewriterScheduler {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

async fn tick_loop(
    mut cursor: RevealCursor,
    run: u64,
    interval: Duration,
    display: Arc<watch::Sender<Reveal>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => return,

            () = tokio::time::sleep(interval) => {}
        }

        if cursor.tick().is_none() {
            return;
        }
        let done = cursor.is_done();
        let prefix = cursor.revealed();

        let current = display.send_if_modified(|reveal| {
            if reveal.run != run {
                return false;
            }
            reveal.text.clear();
            reveal.text.push_str(prefix);
            reveal.done = done;
            true
        });

        if !current || done {
            return;
        }
    }
}
