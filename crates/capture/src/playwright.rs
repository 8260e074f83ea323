//! Playwright browser driver
//!
//! Each session is a long-lived `node` process running a small driver
//! script. Commands and replies are JSON lines over stdin/stdout, matched
//! by id, so several commands may be in flight against the same page.

use async_trait::async_trait;
use base64::Engine as _;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStderr, ChildStdout, Command as TokioCommand};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::browser::{BrowserLauncher, CaptureSession, EnvironmentProfile, PageText};
use crate::config::{Browser, CaptureConfig};
use crate::error::{CaptureError, CaptureResult};

/// Extra time a reply may take beyond the command's own timeout, which the
/// driver also enforces on the Playwright side.
const REPLY_SLACK: Duration = Duration::from_secs(2);

const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Driver script. Launch options arrive as JSON in argv[2].
const DRIVER_SCRIPT: &str = r#"
const readline = require('readline');
const playwright = require('playwright');

const options = JSON.parse(process.argv[2]);

function send(message, done) {
  process.stdout.write(JSON.stringify(message) + '\n', done);
}

(async () => {
  let browser;
  let page;
  try {
    browser = await playwright[options.browser].launch({ headless: true });
    const context = await browser.newContext({
      viewport: { width: options.viewportWidth, height: options.viewportHeight },
      locale: options.locale,
      timezoneId: options.timezone,
    });
    page = await context.newPage();
  } catch (error) {
    send({ event: 'error', error: error.message }, () => process.exit(1));
    return;
  }

  const handlers = {
    navigate: async (cmd) => {
      await page.goto(cmd.url, { waitUntil: 'domcontentloaded', timeout: cmd.timeout_ms });
      return {};
    },
    screenshot: async (cmd) => {
      const buffer = await page.screenshot({ fullPage: cmd.full_page, timeout: cmd.timeout_ms, type: 'png' });
      return { data: buffer.toString('base64') };
    },
    extract_text: async () => {
      // innerText skips hidden nodes and breaks lines between block elements.
      const text = await page.evaluate(() => (document.body ? document.body.innerText || '' : ''));
      return { text, title: await page.title() };
    },
    close: async () => {
      await browser.close();
      return {};
    },
  };

  const input = readline.createInterface({ input: process.stdin });
  input.on('line', async (line) => {
    let cmd;
    try {
      cmd = JSON.parse(line);
    } catch (error) {
      return;
    }
    const handler = handlers[cmd.cmd];
    if (!handler) {
      send({ id: cmd.id, ok: false, error: 'unknown command: ' + cmd.cmd });
      return;
    }
    try {
      const result = await handler(cmd);
      send({ id: cmd.id, ok: true, result }, cmd.cmd === 'close' ? () => process.exit(0) : undefined);
    } catch (error) {
      send({ id: cmd.id, ok: false, error: error.message });
    }
  });
  input.on('close', async () => {
    try { await browser.close(); } catch (error) {}
    process.exit(0);
  });

  send({ event: 'ready' });
})();
"#;

#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum DriverCommand<'a> {
    Navigate { url: &'a str, timeout_ms: u64 },
    Screenshot { full_page: bool, timeout_ms: u64 },
    ExtractText { timeout_ms: u64 },
    Close,
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    command: DriverCommand<'a>,
}

#[derive(Debug, Serialize)]
struct LaunchOptions<'a> {
    browser: &'static str,
    #[serde(flatten)]
    profile: &'a EnvironmentProfile,
}

/// One line of driver output: either an event or a reply to a command.
#[derive(Debug, Deserialize)]
struct DriverMessage {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScreenshotReply {
    data: String,
}

#[derive(Debug, Deserialize)]
struct TextReply {
    #[serde(default)]
    text: String,
    #[serde(default)]
    title: String,
}

type Reply = Result<Value, String>;
type Pending = DashMap<u64, oneshot::Sender<Reply>>;
type ReadySender = oneshot::Sender<Result<(), String>>;

/// Route one line of driver output to whoever is waiting on it.
fn dispatch(line: &str, pending: &Pending, ready: &mut Option<ReadySender>) {
    let message: DriverMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(_) => {
            debug!("driver: {}", line);
            return;
        }
    };

    if let Some(event) = message.event.as_deref() {
        match event {
            "ready" => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            "error" => {
                let reason = message
                    .error
                    .unwrap_or_else(|| "browser driver failed".to_string());
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(reason));
                    }
                    None => warn!("Browser driver error: {}", reason),
                }
            }
            other => debug!("Ignoring driver event: {}", other),
        }
        return;
    }

    let Some(id) = message.id else {
        return;
    };
    if let Some((_, tx)) = pending.remove(&id) {
        let reply = if message.ok {
            Ok(message.result)
        } else {
            Err(message
                .error
                .unwrap_or_else(|| "unknown driver error".to_string()))
        };
        let _ = tx.send(reply);
    }
}

async fn read_replies(stdout: ChildStdout, pending: Arc<Pending>, ready: ReadySender) {
    let mut ready = Some(ready);
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch(&line, &pending, &mut ready),
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read browser driver output: {}", e);
                break;
            }
        }
    }
    // Dropping the senders wakes every waiter with an error.
    pending.clear();
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("driver stderr: {}", line);
    }
}

/// Launches Playwright-driven browsers through Node.js
pub struct PlaywrightLauncher {
    node_binary: String,
    node_path: Option<PathBuf>,
    browser: Browser,
}

impl PlaywrightLauncher {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            node_binary: config.node_binary.clone(),
            node_path: config.node_path.clone(),
            browser: config.browser,
        }
    }
}

#[async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    async fn launch(&self, profile: &EnvironmentProfile) -> CaptureResult<Box<dyn CaptureSession>> {
        let workdir = tempfile::tempdir()?;
        let script_path = workdir.path().join("driver.js");
        tokio::fs::write(&script_path, DRIVER_SCRIPT).await?;

        let options = serde_json::to_string(&LaunchOptions {
            browser: self.browser.as_str(),
            profile,
        })?;

        let mut command = TokioCommand::new(&self.node_binary);
        command
            .arg(&script_path)
            .arg(options)
            .current_dir(workdir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(node_path) = &self.node_path {
            command.env("NODE_PATH", node_path);
        }

        debug!(
            "Starting {} driver ({}, {})",
            self.browser.as_str(),
            profile.locale,
            profile.timezone
        );
        let mut child = command.spawn().map_err(|e| {
            CaptureError::EnvironmentUnavailable(format!(
                "failed to start {}: {}",
                self.node_binary, e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CaptureError::Browser("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Browser("driver stdout unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr));
        }

        let pending = Arc::new(Pending::new());
        let (ready_tx, ready_rx) = oneshot::channel();
        let reader = tokio::spawn(read_replies(stdout, pending.clone(), ready_tx));

        let session = PlaywrightSession {
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            reader,
            _workdir: workdir,
        };

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::new(session)),
            Ok(Err(reason)) => Err(CaptureError::EnvironmentUnavailable(reason)),
            Err(_) => Err(CaptureError::EnvironmentUnavailable(
                "browser driver exited before it was ready".to_string(),
            )),
        }
    }
}

/// A running driver process. Dropping it kills the process.
pub struct PlaywrightSession {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    pending: Arc<Pending>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    _workdir: TempDir,
}

impl PlaywrightSession {
    async fn request(&self, command: DriverCommand<'_>, timeout: Duration) -> CaptureResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&Envelope { id, command })?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.pending.remove(&id);
            return Err(CaptureError::Browser(format!(
                "failed to send driver command: {}",
                e
            )));
        }

        match tokio::time::timeout(timeout + REPLY_SLACK, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(reason))) => Err(CaptureError::Browser(reason)),
            Ok(Err(_)) => Err(CaptureError::Browser("browser driver exited".to_string())),
            Err(_) => {
                self.pending.remove(&id);
                Err(CaptureError::Browser(format!(
                    "no driver reply within {:?}",
                    timeout
                )))
            }
        }
    }
}

/// Re-label a driver failure with the step it happened in.
fn during(step: fn(String) -> CaptureError) -> impl Fn(CaptureError) -> CaptureError {
    move |err| match err {
        CaptureError::Browser(reason) => step(reason),
        other => other,
    }
}

#[async_trait]
impl CaptureSession for PlaywrightSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> CaptureResult<()> {
        self.request(
            DriverCommand::Navigate {
                url,
                timeout_ms: timeout.as_millis() as u64,
            },
            timeout,
        )
        .await
        .map_err(during(CaptureError::Navigation))?;
        Ok(())
    }

    async fn screenshot(&self, full_page: bool, timeout: Duration) -> CaptureResult<Vec<u8>> {
        let value = self
            .request(
                DriverCommand::Screenshot {
                    full_page,
                    timeout_ms: timeout.as_millis() as u64,
                },
                timeout,
            )
            .await
            .map_err(during(CaptureError::Capture))?;
        let reply: ScreenshotReply = serde_json::from_value(value)?;
        base64::engine::general_purpose::STANDARD
            .decode(reply.data)
            .map_err(|e| CaptureError::Capture(format!("invalid screenshot encoding: {}", e)))
    }

    async fn extract_text(&self, timeout: Duration) -> CaptureResult<PageText> {
        let value = self
            .request(
                DriverCommand::ExtractText {
                    timeout_ms: timeout.as_millis() as u64,
                },
                timeout,
            )
            .await
            .map_err(during(CaptureError::Capture))?;
        let reply: TextReply = serde_json::from_value(value)?;
        Ok(PageText {
            text: reply.text,
            title: reply.title,
        })
    }

    async fn close(&self) -> CaptureResult<()> {
        let result = self.request(DriverCommand::Close, CLOSE_TIMEOUT).await;
        let mut child = self.child.lock().await;
        if result.is_err() {
            let _ = child.start_kill();
        }
        child.wait().await?;
        result.map(|_| ())
    }
}

impl Drop for PlaywrightSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
