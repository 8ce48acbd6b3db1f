//! Shared fixtures: a shell script standing in for the effect renderer, an
//! effect catalog pointing at it, and a merger stub.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reel_media::{ClipMerger, MediaError, MediaResult, MergeRequest};
use reel_models::{EffectCatalog, JobId, JobRecord};
use reel_worker::{JobStore, WorkerConfig};
use tempfile::TempDir;
use tokio::sync::watch;

/// Invoked as `sh renderer.sh <entry> <composition> <output> --props=.. --frames=..`.
const RENDERER_SCRIPT: &str = r#"
echo "$2" >> "$(dirname "$0")/invocations.log"
case "$2" in
  Fail)
    echo "render failed: composition Fail crashed" >&2
    exit 3
    ;;
  Slow)
    echo "Rendering 5%"
    exec sleep 30
    ;;
esac
echo "Bundling"
echo "Rendering 10%"
echo "Rendering 50%"
echo "Rendering 100%"
printf 'clip-%s' "$2" > "$3"
"#;

pub struct Fixture {
    pub root: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("renderer.sh"), RENDERER_SCRIPT).unwrap();
        Self { root }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path().join("output")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.path().join("tmp")
    }

    pub fn config(&self) -> WorkerConfig {
        WorkerConfig {
            output_dir: self.output_dir(),
            temp_dir: self.temp_dir(),
            renderer_program: "sh".to_string(),
            renderer_args: vec![self.path().join("renderer.sh").to_string_lossy().to_string()],
            max_concurrent_jobs: 4,
            job_timeout: Duration::from_secs(30),
            ..Default::default()
        }
    }

    pub fn catalog(&self) -> EffectCatalog {
        let json = serde_json::json!({
            "effects": [
                {"id": "title", "composition_id": "Title", "working_dir": ".",
                 "width": 720, "height": 1280, "duration_secs": 1, "required_fields": ["text"]},
                {"id": "stars", "composition_id": "Stars", "working_dir": ".",
                 "width": 720, "height": 1280, "duration_secs": 2},
                {"id": "broken", "composition_id": "Fail", "working_dir": ".",
                 "width": 720, "height": 1280},
                {"id": "slow", "composition_id": "Slow", "working_dir": ".",
                 "width": 720, "height": 1280}
            ]
        });
        EffectCatalog::from_json_str(&json.to_string(), self.path()).unwrap()
    }

    /// Compositions the renderer was launched for, in order.
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(self.path().join("invocations.log"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Entries left in the temp directory (props files, work dirs).
    pub fn temp_entries(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.temp_dir())
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }
}

/// Poll until the job reaches a terminal state.
pub async fn wait_for_terminal(store: &JobStore, id: &JobId) -> JobRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let record = store.get(id).expect("job record exists");
        if record.is_terminal() {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} stuck in {}",
            id,
            record.state
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Merger that concatenates input bytes and records what it was asked.
#[derive(Default)]
pub struct StubMerger {
    pub requests: Mutex<Vec<MergeRequest>>,
    pub fail: bool,
}

impl StubMerger {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ClipMerger for StubMerger {
    async fn merge(
        &self,
        request: &MergeRequest,
        _cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<PathBuf> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            tokio::fs::write(&request.output, b"partial").await?;
            return Err(MediaError::ffmpeg_failed("merge exploded", None, Some(1)));
        }

        let mut merged = Vec::new();
        for input in &request.inputs {
            merged.extend(tokio::fs::read(&input.path).await?);
            merged.push(b'|');
        }
        tokio::fs::write(&request.output, merged).await?;
        Ok(request.output.clone())
    }
}

pub fn stub_merger() -> Arc<StubMerger> {
    Arc::new(StubMerger::default())
}
