//! 플로우 파일 내보내기
//!
//! 드레인한 레코드를 분류 파이프라인이 읽는 CSV 형식으로 기록합니다.
//! 파일은 임시 파일에 쓴 뒤 rename하므로 감시자는 완성된 파일만 보게 됩니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info};

use flowwatch_core::fs::{FileSystem, FsError};
use flowwatch_core::metrics as m;
use flowwatch_core::table::FlowTable;
use flowwatch_core::types::ConnectionKey;

use crate::rates::FlowRates;
use crate::tracker::FlowRecord;

/// 플로우 파일 헤더 (순서 고정)
pub const FLOW_COLUMNS: [&str; 16] = [
    "Src IP",
    "Dst IP",
    "Src Port",
    "Dst Port",
    "Protocol",
    "Duration (s)",
    "Out Bytes",
    "In Bytes",
    "Total Packets",
    "Total Bytes",
    "Bytes/sec",
    "Bytes/pkt",
    "Pkts/sec",
    "Ratio Out/In",
    "State Flags",
    "Direction",
];

/// 같은 이름의 파일이 있을 때 붙여볼 최대 접미 번호
const MAX_NAME_SUFFIX: u32 = 1000;

/// 플로우 파일 기록기
#[derive(Clone)]
pub struct FlowSink {
    fs: Arc<dyn FileSystem>,
    output_dir: PathBuf,
    prefix: String,
}

impl FlowSink {
    /// 새 기록기를 생성합니다.
    pub fn new(fs: Arc<dyn FileSystem>, output_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            fs,
            output_dir: output_dir.into(),
            prefix: prefix.into(),
        }
    }

    /// 출력 디렉토리
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 레코드를 새 플로우 파일로 기록하고 경로를 반환합니다.
    ///
    /// 레코드가 없어도 헤더만 있는 파일을 만듭니다.
    pub fn export(&self, records: &[(ConnectionKey, FlowRecord)]) -> Result<PathBuf, FsError> {
        let table = render(records);
        let path = self.next_path();
        self.fs.write_atomic(&path, table.to_csv().as_bytes())?;

        metrics::counter!(m::CAPTURE_FILES_EXPORTED_TOTAL).increment(1);
        metrics::counter!(m::CAPTURE_RECORDS_EXPORTED_TOTAL).increment(table.len() as u64);
        info!(
            path = %path.display(),
            records = table.len(),
            "flow file exported"
        );
        Ok(path)
    }

    fn next_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let base = format!("{}_{}", self.prefix, stamp);
        let first = self.output_dir.join(format!("{base}.csv"));
        if !self.fs.exists(&first) {
            return first;
        }
        for n in 1..=MAX_NAME_SUFFIX {
            let candidate = self.output_dir.join(format!("{base}_{n}.csv"));
            if !self.fs.exists(&candidate) {
                debug!(path = %candidate.display(), "flow file name taken, using suffix");
                return candidate;
            }
        }
        // 초당 천 개를 넘는 내보내기는 없으므로 마지막 후보를 덮어씁니다.
        self.output_dir.join(format!("{base}_{MAX_NAME_SUFFIX}.csv"))
    }
}

/// 레코드를 플로우 테이블로 변환합니다. `start_time`이 없는 레코드는 제외합니다.
pub fn render(records: &[(ConnectionKey, FlowRecord)]) -> FlowTable {
    let mut table = FlowTable::new(FLOW_COLUMNS);
    for (key, record) in records {
        let Some(rates) = FlowRates::compute(record) else {
            continue;
        };
        let row = vec![
            key.src_ip.to_string(),
            key.dst_ip.to_string(),
            port_field(key.src_port),
            port_field(key.dst_port),
            key.protocol.to_string(),
            format!("{:.2}", rates.duration),
            record.out_bytes.to_string(),
            record.in_bytes.to_string(),
            record.total_packets.to_string(),
            rates.total_bytes.to_string(),
            format!("{:.2}", rates.bytes_per_sec),
            format!("{:.2}", rates.bytes_per_pkt),
            format!("{:.2}", rates.pkts_per_sec),
            rates.ratio_out_in.to_string(),
            record.state_flags.to_string(),
            "->".to_owned(),
        ];
        // 행 너비는 헤더와 항상 같습니다.
        let _ = table.push_row(row);
    }
    table
}

fn port_field(port: Option<u16>) -> String {
    port.map(|p| p.to_string()).unwrap_or_default()
}
