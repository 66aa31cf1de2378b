//! Block install verification harness
//!
//! Confirms that a block found through the block-directory search API can be
//! installed from the editor at runtime, and reports which scripts and styles
//! the installation injected without tripping an uncaught page error.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  InstallationScenario                        │
//! │    ├── execute() -> ScenarioReport                           │
//! │    ├── run(output) -> publish outputs, fail on error         │
//! │    ├── verify_assets(report) -> Checks                       │
//! │    └── cleanup(admin)                                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  check       soft assertions collected per step              │
//! │  network     in-flight request tracking, idle detection      │
//! │  correlate   arm-then-trigger response matching              │
//! │  assets      script/style snapshots and diffs                │
//! │  page_error  single-slot uncaught error record               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  EditorPage / PluginAdmin   (browser driver, supplied)       │
//! │  OutputChannel              (CI outputs, supplied)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod assets;
pub mod check;
pub mod config;
pub mod correlate;
pub mod error;
pub mod network;
pub mod output;
pub mod page;
pub mod page_error;
pub mod scenario;

pub use assets::{diff, AssetCapture, AssetDescriptor, AssetDiff, AssetSnapshot};
pub use check::{run_check, CheckResult, Checks};
pub use config::{ScenarioConfig, ScenarioInputs};
pub use correlate::{ResponseCorrelator, ResponseMatcher};
pub use error::{HarnessError, HarnessResult};
pub use network::{IdleMode, NetworkActivityMonitor};
pub use output::{GithubActionsOutput, OutputChannel, RecordingOutput};
pub use page::{EditorPage, NetworkResponse, PageEvent, PluginAdmin, ResponseBody, ScreenshotTarget};
pub use page_error::PageErrorRecord;
pub use scenario::{InstallationScenario, ScenarioReport, ScenarioState};
