//! 특성 변환 -- 플로우 파일 행을 분류기 입력 벡터로 변환
//!
//! 플로우 파일 컬럼 이름을 학습 데이터 이름으로 바꾸고, 범주형 값을 정규화한 뒤
//! 인코더 메타데이터의 인덱스로 인코딩합니다.
//!
//! # 출력 순서
//! `Dur, Proto, Sport, Dport, State, sTos, dTos, TotPkts, TotBytes, SrcBytes`

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use flowwatch_core::error::{ClassificationError, SchemaError};
use flowwatch_core::table::{FlowTable, Record};

use crate::error::ClassifierError;
use crate::model::CategoryEncoders;

/// 특성 개수
pub const FEATURE_COUNT: usize = 10;

/// 특성 이름 (출력 순서)
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "Dur", "Proto", "Sport", "Dport", "State", "sTos", "dTos", "TotPkts", "TotBytes", "SrcBytes",
];

/// 범주형 특성 (인코더 필요)
pub const CATEGORICAL_FEATURES: [&str; 4] = ["Proto", "State", "Sport", "Dport"];

/// 분류기 입력 벡터
pub type FeatureVector = [f64; FEATURE_COUNT];

/// 플로우 파일 컬럼 → 학습 데이터 컬럼
const RENAMES: [(&str, &str); 9] = [
    ("Dst Port", "Dport"),
    ("Src Port", "Sport"),
    ("Protocol", "Proto"),
    ("State Flags", "State"),
    ("Duration (s)", "Dur"),
    ("Out Bytes", "SrcBytes"),
    ("In Bytes", "DstBytes"),
    ("Total Packets", "TotPkts"),
    ("Total Bytes", "TotBytes"),
];

/// 없으면 에러인 특성
const REQUIRED: [&str; 5] = ["Dur", "Proto", "Sport", "Dport", "State"];

/// 학습 데이터에 등장하는 포트 토큰
const KNOWN_PORTS: [&str; 37] = [
    "0", "nfs", "2050", "2051", "2048", "2052", "netbios-ns", "1025", "1027", "netbios-dgm",
    "1035", "1039", "1040", "1041", "1042", "1044", "1045", "1046", "1047", "1049", "ftp",
    "domain", "http", "1900", "65520", "2012", "888", "82", "netbios-ssn", "81", "https", "3128",
    "ircd", "smtp", "65500", "9381", "8399",
];

/// argus 연결 상태 토큰
const ARGUS_STATES: [&str; 15] = [
    "CON", "RST", "FIN", "INT", "REQ", "RSP", "ECO", "CLO", "ACC", "TST", "TXD", "URP", "URN",
    "MAS", "PAR",
];

/// TCP 플래그 → 상태 (앞에서부터 처음 일치하는 항목 사용)
const FLAG_STATES: [(&str, &str); 6] = [
    ("ACK", "CON"),
    ("SYN", "CON"),
    ("FIN", "FIN"),
    ("RST", "RST"),
    ("PSH", "CON"),
    ("URG", "CON"),
];

/// IP 프로토콜 번호 → 이름
const PROTOCOLS: [(u8, &str); 9] = [
    (1, "icmp"),
    (2, "igmp"),
    (6, "tcp"),
    (17, "udp"),
    (47, "gre"),
    (50, "esp"),
    (51, "ah"),
    (89, "ospf"),
    (132, "sctp"),
];

/// 포트 정규화 정책
///
/// 사용하는 인코더 아티팩트가 어떤 포트 표현으로 학습됐는지에 맞춰 선택합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortPolicy {
    /// 알려진 포트 토큰만 유지, 나머지는 `"0"`
    #[default]
    AllowList,
    /// `0x{port:04x}` 16진수 표기
    Hex,
}

impl PortPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllowList => "allow_list",
            Self::Hex => "hex",
        }
    }
}

impl fmt::Display for PortPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow_list" => Ok(Self::AllowList),
            "hex" => Ok(Self::Hex),
            other => Err(format!("unknown port policy '{other}', expected allow_list or hex")),
        }
    }
}

fn parse_port(raw: &str) -> Option<u16> {
    let value: f64 = raw.parse().ok()?;
    if !value.is_finite() || value.fract() != 0.0 || !(1.0..=65535.0).contains(&value) {
        return None;
    }
    Some(value as u16)
}

/// 포트 값을 정책에 맞는 범주 토큰으로 바꿉니다.
pub fn normalize_port(raw: &str, policy: PortPolicy) -> String {
    let raw = raw.trim();
    match policy {
        PortPolicy::AllowList => {
            let lower = raw.to_lowercase();
            if KNOWN_PORTS.contains(&lower.as_str()) && lower.parse::<f64>().is_err() {
                return lower;
            }
            match parse_port(raw) {
                Some(port) => {
                    let token = port.to_string();
                    if KNOWN_PORTS.contains(&token.as_str()) {
                        token
                    } else {
                        "0".to_owned()
                    }
                }
                None => "0".to_owned(),
            }
        }
        PortPolicy::Hex => match parse_port(raw) {
            Some(port) => format!("0x{port:04x}"),
            None => "0".to_owned(),
        },
    }
}

/// 프로토콜 번호나 이름을 소문자 이름으로 바꿉니다. 알 수 없으면 `man`.
pub fn normalize_protocol(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(number) = raw.parse::<u8>() {
        return PROTOCOLS
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, name)| (*name).to_owned())
            .unwrap_or_else(|| "man".to_owned());
    }
    let lower = raw.to_lowercase();
    if PROTOCOLS.iter().any(|(_, name)| *name == lower) {
        lower
    } else {
        "man".to_owned()
    }
}

/// 상태 문자열을 argus 상태 토큰으로 바꿉니다.
pub fn normalize_state(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    if ARGUS_STATES.contains(&upper.as_str()) {
        return upper;
    }
    FLAG_STATES
        .iter()
        .find(|(flag, _)| upper.contains(flag))
        .map(|(_, state)| (*state).to_owned())
        .unwrap_or_else(|| "CON".to_owned())
}

/// 특성 이름별로 읽을 원본 컬럼 인덱스
#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    columns: [Option<usize>; FEATURE_COUNT],
}

impl ColumnMap {
    fn resolve(table: &FlowTable) -> Result<Self, SchemaError> {
        let mut columns = [None; FEATURE_COUNT];
        for (slot, feature) in columns.iter_mut().zip(FEATURE_NAMES) {
            let original = RENAMES
                .iter()
                .find(|(_, renamed)| *renamed == feature)
                .and_then(|(from, _)| table.column(from));
            *slot = original.or_else(|| table.column(feature));
        }
        for (i, feature) in FEATURE_NAMES.iter().enumerate() {
            if columns[i].is_none() && REQUIRED.contains(feature) {
                return Err(SchemaError::MissingColumn {
                    column: (*feature).to_owned(),
                });
            }
        }
        Ok(Self { columns })
    }
}

/// 플로우 파일 행 → 특성 벡터 변환기
#[derive(Debug, Clone)]
pub struct FeatureAdapter {
    port_policy: PortPolicy,
    encoders: Arc<CategoryEncoders>,
}

impl FeatureAdapter {
    /// 새 변환기를 생성합니다.
    pub fn new(port_policy: PortPolicy, encoders: Arc<CategoryEncoders>) -> Self {
        Self {
            port_policy,
            encoders,
        }
    }

    pub fn port_policy(&self) -> PortPolicy {
        self.port_policy
    }

    /// 테이블의 모든 행을 변환합니다.
    ///
    /// 필수 컬럼이 없거나 숫자 컬럼에 숫자가 아닌 값이 있으면 파일 전체가 실패합니다.
    pub fn convert_table(&self, table: &FlowTable) -> Result<Vec<FeatureVector>, ClassifierError> {
        let map = ColumnMap::resolve(table)?;
        table
            .records()
            .enumerate()
            .map(|(row, record)| self.convert_with(&map, &record, row + 1))
            .collect()
    }

    /// 행 하나를 변환합니다.
    pub fn convert(&self, table: &FlowTable, row: usize) -> Result<FeatureVector, ClassifierError> {
        let map = ColumnMap::resolve(table)?;
        let record = table.record(row).ok_or_else(|| SchemaError::RowWidth {
            row: row + 1,
            expected: table.headers().len(),
            actual: 0,
        })?;
        self.convert_with(&map, &record, row + 1)
    }

    fn convert_with(
        &self,
        map: &ColumnMap,
        record: &Record<'_>,
        row: usize,
    ) -> Result<FeatureVector, ClassifierError> {
        let mut out = [0.0; FEATURE_COUNT];
        for (i, feature) in FEATURE_NAMES.iter().enumerate() {
            let raw = map.columns[i]
                .and_then(|c| record.fields().get(c))
                .map(String::as_str)
                .unwrap_or("");
            out[i] = match *feature {
                "Proto" => self.encode(feature, normalize_protocol(raw))?,
                "State" => self.encode(feature, normalize_state(raw))?,
                "Sport" | "Dport" => self.encode(feature, normalize_port(raw, self.port_policy))?,
                _ => parse_numeric(feature, raw, row)?,
            };
        }
        Ok(out)
    }

    fn encode(&self, column: &str, value: String) -> Result<f64, ClassificationError> {
        self.encoders.encode(column, &value).map(|idx| idx as f64)
    }
}

fn parse_numeric(column: &str, raw: &str, row: usize) -> Result<f64, SchemaError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0.0);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        // `inf`는 숫자로 파싱되지만 모델 입력으로는 쓸 수 없습니다.
        _ => Err(SchemaError::InvalidValue {
            column: column.to_owned(),
            row,
            value: raw.to_owned(),
        }),
    }
}
