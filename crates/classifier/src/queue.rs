//! 작업 큐 -- 감시기와 워커 사이의 FIFO 채널
//!
//! 감시기 콜백(notify 스레드)과 워커(blocking 스레드) 양쪽에서 동기적으로 쓰기 때문에
//! 무제한 `tokio::sync::mpsc` 채널을 사용합니다. 현재 깊이는 공유 카운터로 추적하여
//! health 판정과 `flowwatch_classifier_queue_depth` gauge에 사용합니다.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use flowwatch_core::metrics as m;

use crate::error::ClassifierError;

/// 큐 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    /// 분류할 파일
    Process(PathBuf),
    /// 워커 종료 신호. 앞서 들어온 항목을 모두 처리한 뒤 워커가 종료됩니다.
    Shutdown,
}

/// 큐 송신측 (복제 가능)
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<QueueItem>,
    depth: Arc<AtomicUsize>,
}

/// 큐 수신측 (워커 전용)
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<QueueItem>,
    depth: Arc<AtomicUsize>,
}

/// 새 작업 큐를 생성합니다.
pub fn work_queue() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        QueueSender {
            tx,
            depth: Arc::clone(&depth),
        },
        QueueReceiver { rx, depth },
    )
}

impl QueueSender {
    /// 항목을 큐 끝에 넣습니다.
    ///
    /// # 에러
    /// 수신측(워커)이 이미 종료된 경우
    pub fn push(&self, item: QueueItem) -> Result<(), ClassifierError> {
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        if self.tx.send(item).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(ClassifierError::Channel("work queue closed".to_owned()));
        }
        metrics::gauge!(m::CLASSIFIER_QUEUE_DEPTH).set(depth as f64);
        Ok(())
    }

    /// 현재 큐에 남은 항목 수
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl QueueReceiver {
    /// 다음 항목을 기다립니다 (blocking 스레드 전용).
    ///
    /// 모든 송신측이 사라지면 `None`을 반환합니다.
    pub fn blocking_recv(&mut self) -> Option<QueueItem> {
        let item = self.rx.blocking_recv()?;
        self.mark_taken();
        Some(item)
    }

    /// 다음 항목을 비동기로 기다립니다.
    pub async fn recv(&mut self) -> Option<QueueItem> {
        let item = self.rx.recv().await?;
        self.mark_taken();
        Some(item)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    fn mark_taken(&self) {
        let depth = self
            .depth
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1);
        metrics::gauge!(m::CLASSIFIER_QUEUE_DEPTH).set(depth as f64);
    }
}
