//! Browser page collaborators
//!
//! The harness never drives a browser itself. A driver implements
//! [`EditorPage`] (and [`PluginAdmin`] for cleanup) and publishes what happens
//! on the page as [`PageEvent`]s on a broadcast channel.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::assets::AssetDescriptor;
use crate::error::HarnessResult;

/// Something observed on the page's network or runtime
#[derive(Debug, Clone)]
pub enum PageEvent {
    RequestStarted {
        request_id: String,
        method: String,
        url: String,
    },
    RequestFinished {
        request_id: String,
    },
    /// Failed or aborted request
    RequestFailed {
        request_id: String,
        reason: String,
    },
    Response(NetworkResponse),
    /// Uncaught error thrown inside the page
    PageError(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseBody {
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

/// A completed HTTP response seen by the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkResponse {
    pub request_id: String,
    pub url: String,
    pub status: u16,
    pub method: String,
    pub body: ResponseBody,
}

impl NetworkResponse {
    /// Decode the body as `T`
    pub fn json<T: DeserializeOwned>(&self) -> HarnessResult<T> {
        let value = match &self.body {
            ResponseBody::Json(value) => serde_json::from_value(value.clone())?,
            ResponseBody::Bytes(bytes) => serde_json::from_slice(bytes)?,
        };
        Ok(value)
    }
}

/// Parts of the page that can be captured as an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotTarget {
    SearchResults,
    InsertedBlock,
}

impl ScreenshotTarget {
    pub fn output_key(&self) -> &'static str {
        match self {
            ScreenshotTarget::SearchResults => "screenshotSearchResults",
            ScreenshotTarget::InsertedBlock => "screenshotBlock",
        }
    }
}

/// The block editor as seen through a browser driver
#[async_trait]
pub trait EditorPage: Send + Sync {
    /// Subscribe to page events from this point forward
    fn events(&self) -> broadcast::Receiver<PageEvent>;

    async fn create_new_post(&self) -> HarnessResult<()>;

    async fn remove_all_blocks(&self) -> HarnessResult<()>;

    /// Type `term` into the inserter search field
    async fn search_for_block(&self, term: &str) -> HarnessResult<()>;

    /// Resolves once the install button for the search result exists
    async fn wait_for_install_trigger(&self) -> HarnessResult<()>;

    async fn click_install_trigger(&self) -> HarnessResult<()>;

    /// Resolves once the install control has shown and then cleared its busy state
    async fn wait_for_busy_cycle(&self) -> HarnessResult<()>;

    /// Text of the installation error notice, if one is shown
    async fn installation_error_notice(&self) -> HarnessResult<Option<String>>;

    /// Registered blocks that are not part of the core set
    async fn third_party_blocks(&self) -> HarnessResult<Vec<AssetDescriptor>>;

    async fn loaded_scripts(&self) -> HarnessResult<Vec<AssetDescriptor>>;

    async fn loaded_styles(&self) -> HarnessResult<Vec<AssetDescriptor>>;

    /// PNG bytes
    async fn screenshot(&self, target: ScreenshotTarget) -> HarnessResult<Vec<u8>>;
}

/// Admin-side plugin management used to undo an installation
#[async_trait]
pub trait PluginAdmin: Send + Sync {
    async fn deactivate_plugin(&self, slug: &str) -> HarnessResult<()>;

    async fn uninstall_plugin(&self, slug: &str) -> HarnessResult<()>;
}
