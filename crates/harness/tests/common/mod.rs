//! Scripted editor page shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use blockcheck_harness::{
    AssetDescriptor, EditorPage, HarnessError, HarnessResult, NetworkResponse, PageEvent,
    PluginAdmin, ResponseBody, ScreenshotTarget,
};

pub const SEARCH_URL: &str = "http://localhost:8889/wp-json/wp/v2/block-directory/search?term=foo-block";
pub const ENCODED_SEARCH_URL: &str =
    "http://localhost:8889/?rest_route=%2Fwp%2Fv2%2Fblock-directory%2Fsearch&term=foo-block";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// How the fake page behaves
#[derive(Debug, Clone)]
pub struct PageScript {
    pub search_url: String,
    pub search_body: Value,
    /// Send a CORS pre-flight response for the search before the real one
    pub preflight: bool,
    /// Render the busy state on the install button
    pub busy_cycle: bool,
    pub install_duration: Duration,
    /// The install request never completes
    pub install_hangs: bool,
    pub installed_block: Option<AssetDescriptor>,
    pub added_scripts: Vec<AssetDescriptor>,
    pub added_styles: Vec<AssetDescriptor>,
    pub error_notice: Option<String>,
    /// Uncaught error thrown while the block's assets load, once
    pub page_error: Option<String>,
    pub screenshots_fail: bool,
}

impl Default for PageScript {
    fn default() -> Self {
        Self {
            search_url: SEARCH_URL.to_string(),
            search_body: json!([{ "name": "foo/foo-block", "title": "Foo Block" }]),
            preflight: false,
            busy_cycle: true,
            install_duration: Duration::from_millis(200),
            install_hangs: false,
            installed_block: Some(AssetDescriptor::new("foo/foo-block")),
            added_scripts: vec![AssetDescriptor::with_url(
                "foo-block-editor",
                "http://localhost:8889/wp-content/plugins/foo-block/build/index.js",
            )],
            added_styles: vec![AssetDescriptor::with_url(
                "foo-block-style",
                "http://localhost:8889/wp-content/plugins/foo-block/build/style.css",
            )],
            error_notice: None,
            page_error: None,
            screenshots_fail: false,
        }
    }
}

#[derive(Debug, Default)]
struct PageState {
    installed: bool,
    searches: Vec<String>,
    install_clicks: usize,
    pending_page_error: Option<String>,
}

pub struct ScriptedPage {
    events: broadcast::Sender<PageEvent>,
    state: Arc<Mutex<PageState>>,
    script: PageScript,
}

impl ScriptedPage {
    pub fn new(script: PageScript) -> Self {
        let (events, _) = broadcast::channel(256);
        let state = PageState {
            pending_page_error: script.page_error.clone(),
            ..Default::default()
        };
        Self {
            events,
            state: Arc::new(Mutex::new(state)),
            script,
        }
    }

    pub fn searches(&self) -> Vec<String> {
        self.state.lock().searches.clone()
    }

    pub fn install_clicks(&self) -> usize {
        self.state.lock().install_clicks
    }

    fn emit(&self, event: PageEvent) {
        let _ = self.events.send(event);
    }

    fn result_count(&self) -> usize {
        self.script.search_body.as_array().map_or(0, Vec::len)
    }

    fn base_scripts() -> Vec<AssetDescriptor> {
        vec![
            AssetDescriptor::with_url("wp-blocks", "http://localhost:8889/wp-includes/js/dist/blocks.min.js"),
            AssetDescriptor::with_url("wp-element", "http://localhost:8889/wp-includes/js/dist/element.min.js"),
        ]
    }

    fn base_styles() -> Vec<AssetDescriptor> {
        vec![AssetDescriptor::with_url(
            "wp-edit-blocks",
            "http://localhost:8889/wp-includes/css/dist/block-library/editor.min.css",
        )]
    }
}

#[async_trait]
impl EditorPage for ScriptedPage {
    fn events(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    async fn create_new_post(&self) -> HarnessResult<()> {
        // Each new post starts from an environment without the plugin.
        self.state.lock().installed = false;
        Ok(())
    }

    async fn remove_all_blocks(&self) -> HarnessResult<()> {
        Ok(())
    }

    async fn search_for_block(&self, term: &str) -> HarnessResult<()> {
        self.state.lock().searches.push(term.to_string());

        self.emit(PageEvent::RequestStarted {
            request_id: "search".to_string(),
            method: "GET".to_string(),
            url: self.script.search_url.clone(),
        });
        if self.script.preflight {
            self.emit(PageEvent::Response(NetworkResponse {
                request_id: "search-preflight".to_string(),
                url: self.script.search_url.clone(),
                status: 200,
                method: "OPTIONS".to_string(),
                body: ResponseBody::Bytes(Vec::new()),
            }));
        }
        self.emit(PageEvent::Response(NetworkResponse {
            request_id: "search".to_string(),
            url: self.script.search_url.clone(),
            status: 200,
            method: "GET".to_string(),
            body: ResponseBody::Bytes(serde_json::to_vec(&self.script.search_body)?),
        }));
        self.emit(PageEvent::RequestFinished {
            request_id: "search".to_string(),
        });
        Ok(())
    }

    async fn wait_for_install_trigger(&self) -> HarnessResult<()> {
        if self.result_count() == 1 {
            Ok(())
        } else {
            std::future::pending().await
        }
    }

    async fn click_install_trigger(&self) -> HarnessResult<()> {
        let page_error = {
            let mut state = self.state.lock();
            state.install_clicks += 1;
            state.pending_page_error.take()
        };

        self.emit(PageEvent::RequestStarted {
            request_id: "install".to_string(),
            method: "POST".to_string(),
            url: "http://localhost:8889/wp-json/wp/v2/plugins".to_string(),
        });

        let events = self.events.clone();
        let state = self.state.clone();
        let duration = self.script.install_duration;
        let hangs = self.script.install_hangs;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if hangs {
                return;
            }
            state.lock().installed = true;
            if let Some(message) = page_error {
                let _ = events.send(PageEvent::PageError(message));
            }
            let _ = events.send(PageEvent::RequestFinished {
                request_id: "install".to_string(),
            });
        });
        Ok(())
    }

    async fn wait_for_busy_cycle(&self) -> HarnessResult<()> {
        if !self.script.busy_cycle {
            return std::future::pending().await;
        }
        loop {
            let installed = self.state.lock().installed;
            if installed {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn installation_error_notice(&self) -> HarnessResult<Option<String>> {
        Ok(self.script.error_notice.clone())
    }

    async fn third_party_blocks(&self) -> HarnessResult<Vec<AssetDescriptor>> {
        let installed = self.state.lock().installed;
        Ok(match (&self.script.installed_block, installed) {
            (Some(block), true) => vec![block.clone()],
            _ => Vec::new(),
        })
    }

    async fn loaded_scripts(&self) -> HarnessResult<Vec<AssetDescriptor>> {
        let mut scripts = Self::base_scripts();
        if self.state.lock().installed {
            scripts.extend(self.script.added_scripts.iter().cloned());
        }
        Ok(scripts)
    }

    async fn loaded_styles(&self) -> HarnessResult<Vec<AssetDescriptor>> {
        let mut styles = Self::base_styles();
        if self.state.lock().installed {
            styles.extend(self.script.added_styles.iter().cloned());
        }
        Ok(styles)
    }

    async fn screenshot(&self, _target: ScreenshotTarget) -> HarnessResult<Vec<u8>> {
        if self.script.screenshots_fail {
            return Err(HarnessError::Driver("element is not visible".to_string()));
        }
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}

/// Records admin calls in order
#[derive(Default)]
pub struct RecordingAdmin {
    pub calls: Mutex<Vec<String>>,
    pub fail_deactivate: bool,
}

#[async_trait]
impl PluginAdmin for RecordingAdmin {
    async fn deactivate_plugin(&self, slug: &str) -> HarnessResult<()> {
        self.calls.lock().push(format!("deactivate:{}", slug));
        if self.fail_deactivate {
            return Err(HarnessError::Driver(format!("plugin {} is not active", slug)));
        }
        Ok(())
    }

    async fn uninstall_plugin(&self, slug: &str) -> HarnessResult<()> {
        self.calls.lock().push(format!("uninstall:{}", slug));
        Ok(())
    }
}
