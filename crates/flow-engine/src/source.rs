//! 패킷 소스 -- 고정 길이 윈도우 단위로 패킷 이벤트를 공급
//!
//! 캡처 루프는 [`PacketSource::capture_window`]를 반복 호출하고, 각 호출은
//! 최대 한 윈도우 동안만 블로킹합니다. 정지 요청은 윈도우 경계에서 반영됩니다.
//!
//! # 구현체
//! - [`ChannelSource`]: 프로세스 내 채널로 이벤트/프레임을 주입 (임베딩, 테스트)
//! - `PcapSource`: libpcap 라이브 캡처 또는 파일 재생 (`pcap` feature)

use std::sync::mpsc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use flowwatch_core::error::CaptureError;
use flowwatch_core::types::PacketEvent;

use crate::config::EngineConfig;
use crate::decode;

/// 패킷 이벤트 공급자
///
/// 블로킹 스레드에서 호출됩니다.
pub trait PacketSource: Send + 'static {
    /// 소스 이름 (로그용)
    fn name(&self) -> &str;

    /// 캡처 장치를 엽니다. 실패는 캡처 시작 호출자에게 그대로 전달됩니다.
    fn open(&mut self) -> Result<(), CaptureError>;

    /// 최대 `window` 동안 패킷을 받아 `on_packet`에 전달하고 전달한 개수를 반환합니다.
    fn capture_window(
        &mut self,
        window: Duration,
        on_packet: &mut dyn FnMut(PacketEvent),
    ) -> Result<usize, CaptureError>;
}

impl PacketSource for Box<dyn PacketSource> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        (**self).open()
    }

    fn capture_window(
        &mut self,
        window: Duration,
        on_packet: &mut dyn FnMut(PacketEvent),
    ) -> Result<usize, CaptureError> {
        (**self).capture_window(window, on_packet)
    }
}

/// [`ChannelSource`]에 주입하는 입력
#[derive(Debug, Clone)]
pub enum CaptureInput {
    /// 이미 파싱된 패킷 이벤트
    Packet(PacketEvent),
    /// 디코딩 전 Ethernet 프레임
    Frame {
        data: Bytes,
        timestamp: DateTime<Utc>,
    },
}

/// 채널 기반 패킷 소스
///
/// 송신측이 모두 닫히면 남은 윈도우 시간만큼 대기한 뒤 빈 윈도우를 반환합니다.
/// 캡처 루프의 주기는 입력이 끊겨도 윈도우 길이로 유지됩니다.
pub struct ChannelSource {
    rx: mpsc::Receiver<CaptureInput>,
    exhausted: bool,
}

/// [`ChannelSource`]의 송신 핸들
pub type CaptureSender = mpsc::Sender<CaptureInput>;

impl ChannelSource {
    /// 소스와 송신 핸들을 생성합니다.
    pub fn new() -> (Self, CaptureSender) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                rx,
                exhausted: false,
            },
            tx,
        )
    }
}

impl PacketSource for ChannelSource {
    fn name(&self) -> &str {
        "channel"
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn capture_window(
        &mut self,
        window: Duration,
        on_packet: &mut dyn FnMut(PacketEvent),
    ) -> Result<usize, CaptureError> {
        let deadline = Instant::now() + window;
        let mut delivered = 0;

        while !self.exhausted {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(CaptureInput::Packet(event)) => {
                    on_packet(event);
                    delivered += 1;
                }
                Ok(CaptureInput::Frame { data, timestamp }) => {
                    match decode::decode_ethernet(&data, timestamp) {
                        Some(event) => {
                            on_packet(event);
                            delivered += 1;
                        }
                        None => trace!(len = data.len(), "skipping non-IP frame"),
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    debug!("capture channel closed, idling until stop");
                    self.exhausted = true;
                }
            }
        }

        if self.exhausted {
            std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
        }
        Ok(delivered)
    }
}

/// 설정에 맞는 libpcap 소스를 생성합니다.
///
/// `pcap` feature 없이 빌드된 경우 [`CaptureError::Unavailable`]을 반환합니다.
pub fn pcap_source(config: &EngineConfig) -> Result<Box<dyn PacketSource>, CaptureError> {
    #[cfg(feature = "pcap")]
    {
        Ok(Box::new(pcap_impl::PcapSource::new(config)))
    }
    #[cfg(not(feature = "pcap"))]
    {
        let _ = config;
        Err(CaptureError::Unavailable(
            "built without the `pcap` feature".to_owned(),
        ))
    }
}

#[cfg(feature = "pcap")]
mod pcap_impl {
    use super::*;
    use crate::config::CaptureTarget;

    /// 캡처 읽기 타임아웃. 윈도우 종료 확인 주기가 됩니다.
    const READ_TIMEOUT_MS: i32 = 250;

    /// libpcap 패킷 소스
    pub struct PcapSource {
        target: CaptureTarget,
        snaplen: i32,
        promiscuous: bool,
        name: String,
        capture: Option<pcap::Capture<dyn pcap::Activated>>,
        exhausted: bool,
    }

    impl PcapSource {
        pub fn new(config: &EngineConfig) -> Self {
            let name = match &config.target {
                CaptureTarget::Interface(iface) => format!("pcap:{iface}"),
                CaptureTarget::File(path) => format!("pcap-file:{}", path.display()),
            };
            Self {
                target: config.target.clone(),
                snaplen: config.snaplen,
                promiscuous: config.promiscuous,
                name,
                capture: None,
                exhausted: false,
            }
        }
    }

    fn map_open_error(err: pcap::Error) -> CaptureError {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("permission") || lower.contains("not permitted") {
            CaptureError::PermissionDenied(msg)
        } else {
            CaptureError::Unavailable(msg)
        }
    }

    fn packet_time(header: &pcap::PacketHeader) -> DateTime<Utc> {
        let nanos = (header.ts.tv_usec as u32).saturating_mul(1_000);
        DateTime::from_timestamp(header.ts.tv_sec as i64, nanos).unwrap_or_else(Utc::now)
    }

    impl PacketSource for PcapSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn open(&mut self) -> Result<(), CaptureError> {
            let capture: pcap::Capture<dyn pcap::Activated> = match &self.target {
                CaptureTarget::Interface(iface) => pcap::Capture::from_device(iface.as_str())
                    .map_err(map_open_error)?
                    .promisc(self.promiscuous)
                    .snaplen(self.snaplen)
                    .timeout(READ_TIMEOUT_MS)
                    .open()
                    .map_err(map_open_error)?
                    .into(),
                CaptureTarget::File(path) => pcap::Capture::from_file(path)
                    .map_err(map_open_error)?
                    .into(),
            };
            self.capture = Some(capture);
            self.exhausted = false;
            Ok(())
        }

        fn capture_window(
            &mut self,
            window: Duration,
            on_packet: &mut dyn FnMut(PacketEvent),
        ) -> Result<usize, CaptureError> {
            let deadline = Instant::now() + window;
            let mut delivered = 0;
            let capture = self
                .capture
                .as_mut()
                .ok_or_else(|| CaptureError::Device("capture not opened".to_owned()))?;

            while !self.exhausted && Instant::now() < deadline {
                match capture.next_packet() {
                    Ok(packet) => {
                        let ts = packet_time(packet.header);
                        match decode::decode_ethernet(packet.data, ts) {
                            Some(event) => {
                                on_packet(event);
                                delivered += 1;
                            }
                            None => trace!(len = packet.data.len(), "skipping non-IP frame"),
                        }
                    }
                    Err(pcap::Error::TimeoutExpired) => {}
                    Err(pcap::Error::NoMorePackets) => {
                        debug!(source = %self.name, "capture file exhausted");
                        self.exhausted = true;
                    }
                    Err(e) => return Err(CaptureError::Device(e.to_string())),
                }
            }

            if self.exhausted {
                std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
            }
            Ok(delivered)
        }
    }
}

#[cfg(feature = "pcap")]
pub use pcap_impl::PcapSource;
