//! 디렉토리 감시 -- 새 플로우 파일을 작업 큐에 넣습니다.
//!
//! 감시 디렉토리(비재귀)에 파일이 생성되거나 rename으로 들어오면 [`IngestFilter`]를
//! 거쳐 [`QueueItem::Process`]로 큐에 넣습니다. 같은 경로는 프로세스 수명 동안
//! 한 번만 받아들입니다. 플로우 파일은 `.part` 임시 파일로 쓴 뒤 rename되므로
//! rename 대상 경로도 생성으로 취급합니다.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use flowwatch_core::metrics as m;

use crate::error::ClassifierError;
use crate::queue::{QueueItem, QueueSender};

/// 접미어 검사와 중복 제거
#[derive(Debug)]
pub struct IngestFilter {
    suffix: String,
    seen: Mutex<HashSet<PathBuf>>,
}

impl IngestFilter {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// 처음 보는 대상 파일이면 기록하고 true를 반환합니다.
    pub fn admit(&self, path: &Path) -> bool {
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(&self.suffix));
        if !matches {
            return false;
        }

        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if !seen.insert(path.to_path_buf()) {
            metrics::counter!(m::CLASSIFIER_DUPLICATES_TOTAL).increment(1);
            debug!(path = %path.display(), "duplicate file notification ignored");
            return false;
        }
        metrics::gauge!(m::CLASSIFIER_SEEN_PATHS).set(seen.len() as f64);
        true
    }

    /// 큐에 넣지 못한 경로를 다시 받아들일 수 있게 기록에서 지웁니다.
    fn forget(&self, path: &Path) {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.remove(path);
        metrics::gauge!(m::CLASSIFIER_SEEN_PATHS).set(seen.len() as f64);
    }

    /// 지금까지 받아들인 경로 수
    pub fn seen_count(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// 파일 생성으로 취급할 이벤트의 대상 경로
fn created_path(event: &Event) -> Option<&Path> {
    let path = match event.kind {
        EventKind::Create(_) => event.paths.first(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.first(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.get(1),
        _ => None,
    };
    path.map(PathBuf::as_path)
}

/// 필터를 통과한 경로를 큐에 넣습니다.
fn enqueue(filter: &IngestFilter, queue: &QueueSender, path: &Path) -> bool {
    if !filter.admit(path) {
        return false;
    }
    match queue.push(QueueItem::Process(path.to_path_buf())) {
        Ok(()) => {
            metrics::counter!(m::CLASSIFIER_FILES_ENQUEUED_TOTAL).increment(1);
            info!(path = %path.display(), depth = queue.depth(), "flow file enqueued");
            true
        }
        Err(e) => {
            filter.forget(path);
            warn!(path = %path.display(), error = %e, "failed to enqueue flow file");
            false
        }
    }
}

/// 감시 디렉토리 감시기
pub struct IngestWatcher {
    filter: Arc<IngestFilter>,
    queue: QueueSender,
    watcher: Option<RecommendedWatcher>,
    dir: Option<PathBuf>,
}

impl IngestWatcher {
    pub fn new(filter: Arc<IngestFilter>, queue: QueueSender) -> Self {
        Self {
            filter,
            queue,
            watcher: None,
            dir: None,
        }
    }

    /// `dir` 감시를 시작합니다.
    ///
    /// # 에러
    /// 디렉토리가 없거나 OS 감시 등록에 실패한 경우
    pub fn start(&mut self, dir: &Path) -> Result<(), ClassifierError> {
        let watch_err = |e: notify::Error| ClassifierError::Watch {
            path: dir.display().to_string(),
            reason: e.to_string(),
        };

        let filter = Arc::clone(&self.filter);
        let queue = self.queue.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if let Some(path) = created_path(&event) {
                        enqueue(&filter, &queue, path);
                    }
                }
                Err(e) => warn!(error = %e, "file watcher error"),
            },
            Config::default(),
        )
        .map_err(watch_err)?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(watch_err)?;

        info!(dir = %dir.display(), suffix = %self.filter.suffix, "watching for flow files");
        self.watcher = Some(watcher);
        self.dir = Some(dir.to_path_buf());
        Ok(())
    }

    /// 이벤트 없이 경로를 직접 제출합니다. 필터를 통과해 큐에 들어가면 true.
    pub fn submit(&self, path: &Path) -> bool {
        enqueue(&self.filter, &self.queue, path)
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// 감시를 해제합니다. 이미 큐에 들어간 항목은 그대로 남습니다.
    pub fn stop(&mut self) {
        if let (Some(mut watcher), Some(dir)) = (self.watcher.take(), self.dir.take()) {
            if let Err(e) = watcher.unwatch(&dir) {
                debug!(error = %e, "unwatch failed");
            }
            info!(dir = %dir.display(), "stopped watching");
        }
    }
}

impl Drop for IngestWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
