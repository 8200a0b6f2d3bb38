//! 파일시스템 추상화
//!
//! 플로우 파일 내보내기, 분류 워커의 읽기/쓰기, 알림 집계의 디렉토리 스캔이
//! 모두 [`FileSystem`] trait을 거칩니다. 테스트에서는 [`MemoryFileSystem`]으로
//! 잠긴 파일 등 재현하기 어려운 상황을 주입합니다.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// 파일시스템 에러
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    Encoding { path: PathBuf },
}

impl FsError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// 다른 프로세스가 파일을 잡고 있어 접근이 거부된 경우 true
    ///
    /// 권한 거부와 공유 위반(sharing violation)을 모두 잠김으로 취급합니다.
    pub fn is_locked(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy
            ),
            Self::Encoding { .. } => false,
        }
    }

    /// 파일이나 디렉토리가 없는 경우 true
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// 파일시스템 연산 trait
pub trait FileSystem: Send + Sync {
    /// 임시 파일에 쓴 뒤 rename하여 원자적으로 기록합니다.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), FsError>;

    /// 파일 전체를 문자열로 읽습니다.
    fn read_to_string(&self, path: &Path) -> Result<String, FsError>;

    /// 디렉토리에서 `suffix`로 끝나는 일반 파일을 이름 순으로 나열합니다.
    fn list_files(&self, dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, FsError>;

    fn remove_file(&self, path: &Path) -> Result<(), FsError>;

    fn exists(&self, path: &Path) -> bool;

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError>;

    /// 디렉토리 안의 모든 일반 파일을 삭제하고 삭제한 개수를 반환합니다.
    ///
    /// 디렉토리가 없으면 0을 반환합니다.
    fn clear_dir(&self, dir: &Path) -> Result<usize, FsError> {
        if !self.exists(dir) {
            return Ok(0);
        }
        let files = self.list_files(dir, "")?;
        for file in &files {
            self.remove_file(file)?;
        }
        Ok(files.len())
    }
}

/// 임시 파일 경로: `name.csv` -> `name.csv.part`
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// 설정의 디렉토리 문자열을 현재 작업 디렉토리 기준 절대 경로로 바꿉니다.
///
/// 파일시스템에 접근하지 않으므로 아직 없는 디렉토리도 변환됩니다.
/// 빈 문자열은 빈 경로 그대로 둡니다.
pub fn absolute_dir(dir: &str) -> PathBuf {
    if dir.is_empty() {
        return PathBuf::new();
    }
    std::path::absolute(dir).unwrap_or_else(|_| PathBuf::from(dir))
}

/// 실제 파일시스템 구현
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| FsError::io("mkdir", parent, e))?;
            }
        }
        let temp = partial_path(path);
        std::fs::write(&temp, data).map_err(|e| FsError::io("write", &temp, e))?;
        if let Err(e) = std::fs::rename(&temp, path) {
            let _ = std::fs::remove_file(&temp);
            return Err(FsError::io("rename", path, e));
        }
        Ok(())
    }

    fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        let bytes = std::fs::read(path).map_err(|e| FsError::io("read", path, e))?;
        String::from_utf8(bytes).map_err(|_| FsError::Encoding {
            path: path.to_path_buf(),
        })
    }

    fn list_files(&self, dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, FsError> {
        let entries = std::fs::read_dir(dir).map_err(|e| FsError::io("list", dir, e))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FsError::io("list", dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(suffix));
            if matches {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        std::fs::remove_file(path).map_err(|e| FsError::io("remove", path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        std::fs::create_dir_all(path).map_err(|e| FsError::io("mkdir", path, e))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: HashSet<PathBuf>,
    /// 경로별 남은 잠김 횟수
    locks: HashMap<PathBuf, usize>,
    reads: HashMap<PathBuf, usize>,
}

/// 메모리 기반 파일시스템 (테스트용)
///
/// 복제본은 같은 저장소를 공유합니다. [`MemoryFileSystem::lock`]으로
/// 지정한 횟수만큼 읽기를 `PermissionDenied`로 실패시킬 수 있습니다.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 파일을 직접 추가합니다.
    pub fn add_file(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        self.write_state().files.insert(path.into(), data.into());
    }

    /// 파일 내용을 문자열로 가져옵니다.
    pub fn contents(&self, path: &Path) -> Option<String> {
        self.read_state()
            .files
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// 다음 `times`번의 읽기를 잠김 에러로 실패시킵니다.
    pub fn lock(&self, path: impl Into<PathBuf>, times: usize) {
        self.write_state().locks.insert(path.into(), times);
    }

    /// 지금까지 시도된 읽기 횟수 (실패 포함)
    pub fn read_attempts(&self, path: &Path) -> usize {
        self.read_state().reads.get(path).copied().unwrap_or(0)
    }

    /// 저장된 모든 파일 경로
    pub fn paths(&self) -> Vec<PathBuf> {
        self.read_state().files.keys().cloned().collect()
    }
}

impl FileSystem for MemoryFileSystem {
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        self.write_state()
            .files
            .insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        let mut state = self.write_state();
        *state.reads.entry(path.to_path_buf()).or_insert(0) += 1;

        if let Some(remaining) = state.locks.get_mut(path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FsError::io(
                    "read",
                    path,
                    io::Error::new(io::ErrorKind::PermissionDenied, "file is locked"),
                ));
            }
        }

        match state.files.get(path) {
            Some(data) => String::from_utf8(data.clone()).map_err(|_| FsError::Encoding {
                path: path.to_path_buf(),
            }),
            None => Err(FsError::io(
                "read",
                path,
                io::Error::new(io::ErrorKind::NotFound, "no such file"),
            )),
        }
    }

    fn list_files(&self, dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, FsError> {
        let state = self.read_state();
        if !state.dirs.contains(dir) && !state.files.keys().any(|p| p.parent() == Some(dir)) {
            return Err(FsError::io(
                "list",
                dir,
                io::Error::new(io::ErrorKind::NotFound, "no such directory"),
            ));
        }
        Ok(state
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(suffix))
            })
            .cloned()
            .collect())
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        match self.write_state().files.remove(path) {
            Some(_) => Ok(()),
            None => Err(FsError::io(
                "remove",
                path,
                io::Error::new(io::ErrorKind::NotFound, "no such file"),
            )),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.read_state();
        state.files.contains_key(path)
            || state.dirs.contains(path)
            || state.files.keys().any(|p| p.parent() == Some(path))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        self.write_state().dirs.insert(path.to_path_buf());
        Ok(())
    }
}
