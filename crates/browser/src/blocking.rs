//! Blocking adapter over the async browser core.
//!
//! Some call sites are synchronous; rather than duplicating transport
//! logic per calling style, a dedicated worker thread runs its own
//! single-threaded runtime and owns the [`Browser`]. Public methods post a
//! job to the worker and block on its reply, which also guarantees the
//! single-in-flight-call contract: jobs execute strictly one at a time.

use std::sync::mpsc;
use std::thread::JoinHandle;
use tokio::runtime::Runtime;
use tracing::debug;
use webpilot_core::{Config, Error, Paths, Result};

use crate::action::{Action, ActionOutcome};
use crate::facade::{Browser, ScrollDirection};

type Job = Box<dyn FnOnce(&mut Browser, &Runtime) + Send>;

pub struct BlockingBrowser {
    tx: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl BlockingBrowser {
    pub fn new(config: Config, paths: Paths) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let worker = std::thread::Builder::new()
            .name("webpilot-browser".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(Error::Other(format!(
                            "failed to build browser runtime: {}",
                            e
                        ))));
                        return;
                    }
                };
                let mut browser = match Browser::new(config, paths) {
                    Ok(browser) => browser,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                while let Ok(job) = rx.recv() {
                    job(&mut browser, &runtime);
                }
                debug!("browser worker draining");
                runtime.block_on(browser.stop());
            })
            .map_err(|e| Error::Other(format!("failed to spawn browser worker: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| Error::Other("browser worker died during startup".into()))??;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    fn execute<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Browser, &Runtime) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let job: Job = Box::new(move |browser, runtime| {
            let _ = tx.send(f(browser, runtime));
        });
        self.tx
            .as_ref()
            .ok_or_else(|| Error::Other("browser worker stopped".into()))?
            .send(job)
            .map_err(|_| Error::Other("browser worker stopped".into()))?;
        rx.recv()
            .map_err(|_| Error::Other("browser worker dropped the job".into()))
    }

    fn run_outcome<F>(&self, f: F) -> ActionOutcome
    where
        F: FnOnce(&mut Browser, &Runtime) -> ActionOutcome + Send + 'static,
    {
        match self.execute(f) {
            Ok(outcome) => outcome,
            Err(e) => ActionOutcome::from(&e),
        }
    }

    pub fn start(&self) -> Result<bool> {
        self.execute(|browser, runtime| runtime.block_on(browser.start()))?
    }

    pub fn stop(&self) {
        let _ = self.execute(|browser, runtime| runtime.block_on(browser.stop()));
    }

    pub fn navigate(&self, url: &str) -> ActionOutcome {
        let url = url.to_string();
        self.run_outcome(move |browser, runtime| runtime.block_on(browser.navigate(&url)))
    }

    pub fn click(&self, action: Action) -> ActionOutcome {
        self.run_outcome(move |browser, runtime| runtime.block_on(browser.click(&action)))
    }

    pub fn type_text(&self, action: Action) -> ActionOutcome {
        self.run_outcome(move |browser, runtime| runtime.block_on(browser.type_text(&action)))
    }

    pub fn hover(&self, action: Action) -> ActionOutcome {
        self.run_outcome(move |browser, runtime| runtime.block_on(browser.hover(&action)))
    }

    pub fn scroll(&self, direction: ScrollDirection) -> ActionOutcome {
        self.run_outcome(move |browser, runtime| runtime.block_on(browser.scroll(direction)))
    }

    pub fn press_key(&self, key: &str) -> ActionOutcome {
        let key = key.to_string();
        self.run_outcome(move |browser, runtime| runtime.block_on(browser.press_key(&key)))
    }

    pub fn wait(&self, seconds: u64) -> ActionOutcome {
        self.run_outcome(move |browser, runtime| runtime.block_on(browser.wait(seconds)))
    }

    pub fn screenshot(&self) -> ActionOutcome {
        self.run_outcome(|browser, runtime| runtime.block_on(browser.screenshot()))
    }

    pub fn snapshot(&self) -> ActionOutcome {
        self.run_outcome(|browser, runtime| runtime.block_on(browser.snapshot()))
    }

    pub fn extract_text(&self) -> ActionOutcome {
        self.run_outcome(|browser, runtime| runtime.block_on(browser.extract_text()))
    }
}

impl Drop for BlockingBrowser {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop, which stops the
        // browser before the thread exits.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::OutcomeStatus;
    use tempfile::TempDir;

    #[test]
    fn test_blocking_calls_on_disabled_browser() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.browser.enabled = false;
        let paths = Paths::with_base(dir.path().to_path_buf());

        let browser = BlockingBrowser::new(config, paths).unwrap();
        assert!(!browser.start().unwrap());
        assert_eq!(
            browser.navigate("https://example.com").status,
            OutcomeStatus::Disabled
        );
        assert_eq!(
            browser.click(Action::click("anything")).status,
            OutcomeStatus::Disabled
        );
    }
}
