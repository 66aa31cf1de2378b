//! Installation scenario: search, install, verify, diff
//!
//! ```text
//! Init ─► Searching ─► AwaitingSearchResponse ─► Installing
//!                                │                    │
//!                          (checks failed)            ▼
//!                                │        AwaitingInstallSettled ─► VerifyingInstall ─► Done
//!                                ▼                                         │
//!                              Failed ◄──────────── any fatal error ───────┘
//! ```

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::assets::{diff, AssetCapture, AssetDescriptor, AssetDiff, AssetSnapshot};
use crate::check::{ensure, ensure_eq, CheckResult, Checks};
use crate::config::{ScenarioConfig, ScenarioInputs};
use crate::correlate::{ResponseCorrelator, ResponseMatcher};
use crate::error::{HarnessError, HarnessResult};
use crate::network::NetworkActivityMonitor;
use crate::output::OutputChannel;
use crate::page::{EditorPage, PluginAdmin, ScreenshotTarget};
use crate::page_error::{PageErrorObserver, PageErrorRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScenarioState {
    Init,
    Searching,
    AwaitingSearchResponse,
    Installing,
    AwaitingInstallSettled,
    VerifyingInstall,
    Done,
    Failed,
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A captured PNG
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub target: ScreenshotTarget,
    pub png: Vec<u8>,
}

/// Result of one scenario iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub run_id: Uuid,
    pub search_term: String,
    pub plugin_slug: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,

    /// Most specific diagnostic available when `success` is false
    pub error: Option<String>,

    /// Every state entered, in order
    pub states: Vec<ScenarioState>,
    pub checks: Vec<CheckResult>,

    /// Scripts and styles added by the installation (partial on failure)
    pub assets: AssetDiff,

    /// Third-party blocks added by the installation
    pub blocks: Vec<AssetDescriptor>,

    #[serde(skip)]
    pub screenshots: Vec<Screenshot>,
}

impl ScenarioReport {
    pub fn final_state(&self) -> Option<ScenarioState> {
        self.states.last().copied()
    }

    /// Write the report as `scenario-report.json` under `dir`
    pub fn write_json(&self, dir: &Path) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join("scenario-report.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Report written to: {}", path.display());
        Ok(path)
    }
}

enum Flow {
    Completed,
    /// A blocking check failed; later steps were skipped
    Blocked,
}

/// Mutable state of one iteration
#[derive(Default)]
struct Iteration {
    states: Vec<ScenarioState>,
    checks: Checks,
    before: Option<AssetCapture>,
    blocks_before: Option<AssetSnapshot>,
    assets: Option<AssetDiff>,
    blocks: Vec<AssetDescriptor>,
    screenshots: Vec<Screenshot>,
}

impl Iteration {
    fn enter(&mut self, state: ScenarioState) {
        match self.states.last() {
            Some(from) => info!(%from, to = %state, "scenario transition"),
            None => info!(to = %state, "scenario start"),
        }
        self.states.push(state);
    }
}

/// Drives one block through search, installation and verification on a single page
pub struct InstallationScenario<P> {
    page: P,
    config: ScenarioConfig,
    inputs: ScenarioInputs,
    page_errors: PageErrorRecord,
}

impl<P: EditorPage> InstallationScenario<P> {
    pub fn new(page: P, config: ScenarioConfig, inputs: ScenarioInputs) -> Self {
        Self {
            page,
            config,
            inputs,
            page_errors: PageErrorRecord::new(),
        }
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn inputs(&self) -> &ScenarioInputs {
        &self.inputs
    }

    /// Run one iteration, publish its outputs, and fail if it failed
    pub async fn run(&self, output: &dyn OutputChannel) -> HarnessResult<ScenarioReport> {
        let report = self.execute().await;
        self.publish(&report, output)?;

        match &report.error {
            None => Ok(report),
            Some(message) => {
                output.set_failed(message)?;
                Err(HarnessError::ScenarioFailed(message.clone()))
            }
        }
    }

    /// Run one iteration without publishing anything
    pub async fn execute(&self) -> ScenarioReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, term = %self.inputs.search_term, "starting installation scenario");

        let mut run = Iteration::default();
        run.enter(ScenarioState::Init);

        if let Some(stale) = self.page_errors.reset() {
            debug!(%stale, "cleared page error from previous iteration");
        }
        let _observer = PageErrorObserver::attach(self.page.events(), self.page_errors.clone());
        let monitor = NetworkActivityMonitor::attach(self.page.events(), self.config.quiet_window());
        let correlator = ResponseCorrelator::attach(self.page.events());

        let outcome = self.drive(&mut run, &monitor, &correlator).await;

        let fatal = match outcome {
            Ok(Flow::Completed) => None,
            Ok(Flow::Blocked) => {
                run.enter(ScenarioState::Failed);
                None
            }
            Err(e) => {
                error!(error = %e, "scenario failed");
                if run.states.last() != Some(&ScenarioState::Failed) {
                    run.enter(ScenarioState::Failed);
                }
                self.capture_partial_assets(&mut run).await;
                Some(e)
            }
        };

        let soft = run.checks.failures().collect::<Vec<_>>().join("\n");
        let error = self
            .page_errors
            .get()
            .or_else(|| fatal.map(|e| match e {
                HarnessError::PageRuntime(message) => message,
                other => other.to_string(),
            }))
            .or_else(|| (!soft.is_empty()).then_some(soft));

        let success = error.is_none();
        if success {
            info!(%run_id, "installation scenario passed");
        } else {
            warn!(%run_id, error = error.as_deref().unwrap_or_default(), "installation scenario failed");
        }

        ScenarioReport {
            run_id,
            search_term: self.inputs.search_term.clone(),
            plugin_slug: self.inputs.plugin_slug.clone(),
            started_at,
            finished_at: Utc::now(),
            success,
            error,
            states: run.states,
            checks: run.checks.into_results(),
            assets: run.assets.unwrap_or_default(),
            blocks: run.blocks,
            screenshots: run.screenshots,
        }
    }

    async fn drive(
        &self,
        run: &mut Iteration,
        monitor: &NetworkActivityMonitor,
        correlator: &ResponseCorrelator,
    ) -> HarnessResult<Flow> {
        let term = self.inputs.search_term.as_str();
        let action = self.config.action_timeout();

        // Init
        bounded("new post", action, self.page.create_new_post()).await?;
        bounded("remove all blocks", action, self.page.remove_all_blocks()).await?;
        run.before = Some(self.capture_assets().await?);
        run.blocks_before = Some(self.capture_blocks().await?);

        run.enter(ScenarioState::Searching);
        let pending = correlator.arm(ResponseMatcher::get(self.config.search_endpoint.as_str()));
        bounded("block search", action, self.page.search_for_block(term)).await?;

        run.enter(ScenarioState::AwaitingSearchResponse);
        let response = pending.wait(self.config.search_timeout()).await?;
        let body: Value = match response.json() {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, url = %response.url, "search response body is not JSON");
                Value::Null
            }
        };

        let search = search_checks(term, &body);
        let search_passed = search.passed();
        run.checks.extend(search);
        if !search_passed {
            return Ok(Flow::Blocked);
        }
        self.capture_screenshot(ScreenshotTarget::SearchResults, run).await;

        run.enter(ScenarioState::Installing);
        bounded(
            "install button",
            self.config.install_trigger_timeout(),
            self.page.wait_for_install_trigger(),
        )
        .await?;
        bounded("install click", action, self.page.click_install_trigger()).await?;

        run.enter(ScenarioState::AwaitingInstallSettled);
        self.wait_for_install_settled(monitor).await?;

        run.enter(ScenarioState::VerifyingInstall);
        let notice = bounded("error notice", action, self.page.installation_error_notice()).await?;
        let notice_message = notice.clone().unwrap_or_default();
        run.checks.run(
            || match notice {
                Some(text) => Err(HarnessError::AssertionFailed(text)),
                None => Ok(()),
            },
            notice_message,
        );

        let blocks_after = self.capture_blocks().await?;
        let blocks_before = run.blocks_before.clone().unwrap_or_default();
        run.checks.run(
            || ensure(
                blocks_after.len() > blocks_before.len(),
                format!(
                    "{} third-party blocks before, {} after",
                    blocks_before.len(),
                    blocks_after.len()
                ),
            ),
            format!("Installing \"{}\" did not register any new third-party block.", term),
        );
        run.blocks = diff(&blocks_before, &blocks_after);

        if let Some(message) = self.page_errors.get() {
            return Err(HarnessError::PageRuntime(message));
        }

        let after = self.capture_assets().await?;
        let before = run.before.clone().unwrap_or_default();
        let added = after.diff_since(&before);
        info!(
            scripts = added.scripts.len(),
            styles = added.styles.len(),
            blocks = run.blocks.len(),
            "installation added assets"
        );
        run.assets = Some(added);
        self.capture_screenshot(ScreenshotTarget::InsertedBlock, run).await;

        run.enter(if run.checks.passed() {
            ScenarioState::Done
        } else {
            ScenarioState::Failed
        });
        Ok(Flow::Completed)
    }

    /// Join the busy-indicator cycle with network idle
    ///
    /// Some install paths never render the busy state, so that watch is only
    /// logged when it fails. Network idle is required; its failure drops the
    /// busy watch.
    // TODO: drop the busy-indicator watch once every install path renders it or none do.
    async fn wait_for_install_settled(&self, monitor: &NetworkActivityMonitor) -> HarnessResult<()> {
        let grace = self.config.busy_indicator_grace();
        let busy = async {
            match tokio::time::timeout(grace, self.page.wait_for_busy_cycle()).await {
                Ok(Ok(())) => debug!("install busy indicator cycled"),
                Ok(Err(e)) => warn!(error = %e, "busy indicator watch failed, continuing"),
                Err(_) => warn!(
                    grace_ms = grace.as_millis() as u64,
                    "busy indicator not observed within grace period, continuing"
                ),
            }
            Ok::<(), HarnessError>(())
        };
        let idle = monitor.wait_for_idle(self.config.idle_mode, self.config.network_idle_timeout());

        tokio::try_join!(busy, idle)?;
        Ok(())
    }

    /// Checks that every asset the installation added is still loaded
    ///
    /// Runs against the same page after [`InstallationScenario::run`] without
    /// installing again.
    pub async fn verify_assets(&self, report: &ScenarioReport) -> HarnessResult<Checks> {
        let current = self.capture_assets().await?;
        let mut checks = Checks::new();

        for script in &report.assets.scripts {
            checks.run(
                || ensure(current.scripts.contains(&script.id), format!("script {} missing", script.id)),
                format!("Script \"{}\" added by the block is no longer loaded.", script.id),
            );
        }
        for style in &report.assets.styles {
            checks.run(
                || ensure(current.styles.contains(&style.id), format!("style {} missing", style.id)),
                format!("Style \"{}\" added by the block is no longer loaded.", style.id),
            );
        }

        if let Some(message) = self.page_errors.get() {
            return Err(HarnessError::PageRuntime(message));
        }
        Ok(checks)
    }

    /// Deactivate and uninstall the plugin that was installed
    pub async fn cleanup(&self, admin: &dyn PluginAdmin) -> HarnessResult<()> {
        let slug = self.inputs.plugin_slug.as_str();
        let action = self.config.action_timeout();

        info!(%slug, "removing installed plugin");
        bounded("plugin deactivation", action, admin.deactivate_plugin(slug))
            .await
            .map_err(|e| {
                warn!(%slug, error = %e, "failed to deactivate plugin");
                e
            })?;
        bounded("plugin uninstall", action, admin.uninstall_plugin(slug))
            .await
            .map_err(|e| {
                warn!(%slug, error = %e, "failed to uninstall plugin");
                e
            })
    }

    fn publish(&self, report: &ScenarioReport, output: &dyn OutputChannel) -> HarnessResult<()> {
        output.set_output("success", if report.success { "true" } else { "false" })?;
        output.set_output("error", report.error.as_deref().unwrap_or_default())?;
        output.set_output("scripts", &serde_json::to_string(&report.assets.scripts)?)?;
        output.set_output("styles", &serde_json::to_string(&report.assets.styles)?)?;
        output.set_output("blocks", &serde_json::to_string(&report.blocks)?)?;

        for shot in &report.screenshots {
            let encoded = STANDARD.encode(&shot.png);
            if let Err(e) = output.set_output(shot.target.output_key(), &encoded) {
                warn!(key = shot.target.output_key(), error = %e, "failed to publish screenshot");
            }
        }

        output.info(&format!(
            "{} \"{}\": {} scripts, {} styles, {} blocks added",
            if report.success { "Installed" } else { "Failed to install" },
            report.search_term,
            report.assets.scripts.len(),
            report.assets.styles.len(),
            report.blocks.len(),
        ))?;
        Ok(())
    }

    async fn capture_assets(&self) -> HarnessResult<AssetCapture> {
        let action = self.config.action_timeout();
        let scripts = bounded("loaded scripts", action, self.page.loaded_scripts()).await?;
        let styles = bounded("loaded styles", action, self.page.loaded_styles()).await?;
        Ok(AssetCapture {
            scripts: AssetSnapshot::new(scripts),
            styles: AssetSnapshot::new(styles),
        })
    }

    async fn capture_blocks(&self) -> HarnessResult<AssetSnapshot> {
        let blocks = bounded(
            "third-party blocks",
            self.config.action_timeout(),
            self.page.third_party_blocks(),
        )
        .await?;
        Ok(AssetSnapshot::new(blocks))
    }

    /// Diff whatever loaded so far, for debugging a failed run
    async fn capture_partial_assets(&self, run: &mut Iteration) {
        let Some(before) = run.before.clone() else {
            return;
        };
        if run.assets.is_some() {
            return;
        }
        match self.capture_assets().await {
            Ok(after) => run.assets = Some(after.diff_since(&before)),
            Err(e) => debug!(error = %e, "no partial asset diff"),
        }
    }

    async fn capture_screenshot(&self, target: ScreenshotTarget, run: &mut Iteration) {
        if !self.config.screenshots {
            return;
        }
        match bounded("screenshot", self.config.action_timeout(), self.page.screenshot(target)).await {
            Ok(png) => run.screenshots.push(Screenshot { target, png }),
            Err(e) => warn!(?target, error = %e, "screenshot failed, continuing"),
        }
    }
}

/// The three search-shape checks, all of which always run
fn search_checks(term: &str, body: &Value) -> Checks {
    let mut checks = Checks::new();
    let results = body.as_array();
    let count = results.map_or(0, Vec::len);

    checks.run(
        || ensure(results.is_some(), format!("search response was {}", body)),
        format!("The block directory search for \"{}\" did not return a list of blocks.", term),
    );
    checks.run(
        || ensure(count < 2, format!("{} results", count)),
        format!("We found more than one matching block for \"{}\" in the directory.", term),
    );

    let exact = if count == 0 {
        format!("We found no matching blocks for \"{}\" in the directory.", term)
    } else {
        format!("Expected exactly one matching block for \"{}\", found {}.", term, count)
    };
    checks.run(|| ensure_eq(count, 1, "search result count"), exact);
    checks
}

async fn bounded<T, F>(what: &str, limit: Duration, fut: F) -> HarnessResult<T>
where
    F: Future<Output = HarnessResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(HarnessError::timeout(what, limit)),
    }
}
