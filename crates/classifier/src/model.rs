//! 모델 아티팩트 -- 카테고리 인코더와 결정 포레스트
//!
//! 두 아티팩트 모두 JSON 파일이며 시작 시 한 번 로드합니다. 어느 쪽이든 없거나
//! 손상되었으면 [`ClassificationError`]로 시작을 중단합니다.
//!
//! # 인코더 파일
//! ```json
//! { "Proto": ["tcp", "udp"], "State": ["CON"], "Sport": ["0"], "Dport": ["0"] }
//! ```
//!
//! # 모델 파일
//! ```json
//! { "classes": [0, 1],
//!   "trees": [ { "nodes": [
//!       { "feature": 0, "threshold": 1.5, "left": 1, "right": 2 },
//!       { "value": [10.0, 0.0] },
//!       { "value": [1.0, 4.0] } ] } ] }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use flowwatch_core::error::ClassificationError;
use flowwatch_core::fs::FileSystem;

use crate::feature::{CATEGORICAL_FEATURES, FEATURE_COUNT, FeatureVector};

/// 분류기 trait
///
/// 다른 모델 백엔드를 연결할 수 있도록 trait으로 분리되어 있습니다.
pub trait Classifier: Send + Sync {
    /// 각 입력 벡터의 예측 레이블을 반환합니다. 출력 길이는 입력 길이와 같습니다.
    fn predict(&self, features: &[FeatureVector]) -> Result<Vec<String>, ClassificationError>;

    /// 모델이 낼 수 있는 레이블 목록
    fn classes(&self) -> &[String];
}

/// JSON에서 숫자/문자열 어느 쪽으로 와도 받는 레이블
#[derive(Deserialize)]
#[serde(untagged)]
enum Label {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        match label {
            Label::Int(v) => v.to_string(),
            Label::Float(v) => v.to_string(),
            Label::Text(v) => v,
        }
    }
}

fn labels(raw: Vec<Label>) -> Vec<String> {
    raw.into_iter().map(String::from).collect()
}

/// 범주형 컬럼별 알려진 값 목록
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryEncoders {
    columns: HashMap<String, Vec<String>>,
}

impl CategoryEncoders {
    /// 컬럼별 값 목록으로 인코더를 만듭니다.
    ///
    /// 네 개의 범주형 컬럼이 모두 있고 각각 비어 있지 않아야 합니다.
    pub fn new(columns: HashMap<String, Vec<String>>) -> Result<Self, ClassificationError> {
        for column in CATEGORICAL_FEATURES {
            match columns.get(column) {
                None => {
                    return Err(ClassificationError::EncoderMissing {
                        column: column.to_owned(),
                    });
                }
                Some(values) if values.is_empty() => {
                    return Err(ClassificationError::ArtifactInvalid {
                        path: "encoders".to_owned(),
                        reason: format!("encoder for '{column}' has no categories"),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(Self { columns })
    }

    /// JSON 문서에서 인코더를 읽습니다.
    pub fn from_json(text: &str, path: &Path) -> Result<Self, ClassificationError> {
        let raw: HashMap<String, Vec<Label>> =
            serde_json::from_str(text).map_err(|e| invalid(path, e.to_string()))?;
        let columns = raw.into_iter().map(|(k, v)| (k, labels(v))).collect();
        Self::new(columns).map_err(|e| match e {
            ClassificationError::ArtifactInvalid { reason, .. } => invalid(path, reason),
            other => other,
        })
    }

    /// 값의 인덱스를 반환합니다. 목록에 없는 값은 첫 번째 범주(인덱스 0)로 취급합니다.
    pub fn encode(&self, column: &str, value: &str) -> Result<usize, ClassificationError> {
        let values = self
            .columns
            .get(column)
            .ok_or_else(|| ClassificationError::EncoderMissing {
                column: column.to_owned(),
            })?;
        Ok(values.iter().position(|v| v == value).unwrap_or(0))
    }

    /// 컬럼의 알려진 범주 목록
    pub fn categories(&self, column: &str) -> Option<&[String]> {
        self.columns.get(column).map(Vec::as_slice)
    }
}

/// 결정 트리 노드
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Node {
    /// `x[feature] <= threshold`이면 left, 아니면 right
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// 클래스별 가중치
    Leaf { value: Vec<f64> },
}

/// 결정 트리 (노드 0이 루트)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<Node>,
}

impl DecisionTree {
    /// 자식 인덱스는 항상 부모보다 커야 하므로 순회는 반드시 끝납니다.
    fn validate(&self, tree: usize, classes: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err(format!("tree {tree} has no nodes"));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= FEATURE_COUNT {
                        return Err(format!("tree {tree} node {i}: feature {feature} out of range"));
                    }
                    for child in [left, right] {
                        if *child <= i || *child >= self.nodes.len() {
                            return Err(format!("tree {tree} node {i}: invalid child {child}"));
                        }
                    }
                }
                Node::Leaf { value } => {
                    if value.len() != classes {
                        return Err(format!(
                            "tree {tree} node {i}: leaf has {} weights, expected {classes}",
                            value.len()
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn leaf(&self, x: &FeatureVector) -> &[f64] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if x[*feature] <= *threshold { *left } else { *right };
                }
                Node::Leaf { value } => return value,
            }
        }
    }
}

#[derive(Deserialize)]
struct ForestFile {
    classes: Vec<Label>,
    trees: Vec<DecisionTree>,
}

/// 결정 포레스트 분류기
///
/// 각 트리의 리프 가중치를 비율로 정규화해 합산하고 가장 큰 클래스를 고릅니다.
/// 동점이면 앞쪽 클래스를 선택합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomForest {
    classes: Vec<String>,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// 클래스와 트리로 포레스트를 만들고 구조를 검증합니다.
    pub fn new(classes: Vec<String>, trees: Vec<DecisionTree>) -> Result<Self, String> {
        if classes.is_empty() {
            return Err("forest has no classes".to_owned());
        }
        if trees.is_empty() {
            return Err("forest has no trees".to_owned());
        }
        for (i, tree) in trees.iter().enumerate() {
            tree.validate(i, classes.len())?;
        }
        Ok(Self { classes, trees })
    }

    /// JSON 문서에서 포레스트를 읽습니다.
    pub fn from_json(text: &str, path: &Path) -> Result<Self, ClassificationError> {
        let file: ForestFile =
            serde_json::from_str(text).map_err(|e| invalid(path, e.to_string()))?;
        Self::new(labels(file.classes), file.trees).map_err(|reason| invalid(path, reason))
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    fn predict_one(&self, x: &FeatureVector) -> usize {
        let mut votes = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let leaf = tree.leaf(x);
            let total: f64 = leaf.iter().sum();
            let scale = if total > 0.0 { total } else { 1.0 };
            for (vote, weight) in votes.iter_mut().zip(leaf) {
                *vote += weight / scale;
            }
        }
        votes
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
            .0
    }
}

impl Classifier for RandomForest {
    fn predict(&self, features: &[FeatureVector]) -> Result<Vec<String>, ClassificationError> {
        features
            .iter()
            .map(|x| {
                if x.iter().any(|v| !v.is_finite()) {
                    return Err(ClassificationError::Predict(
                        "feature vector contains a non-finite value".to_owned(),
                    ));
                }
                Ok(self.classes[self.predict_one(x)].clone())
            })
            .collect()
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }
}

/// 시작 시 로드하는 모델 아티팩트 묶음
#[derive(Clone)]
pub struct ModelArtifacts {
    pub classifier: Arc<dyn Classifier>,
    pub encoders: Arc<CategoryEncoders>,
}

impl std::fmt::Debug for ModelArtifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifacts")
            .field("classes", &self.classifier.classes())
            .field("encoders", &self.encoders)
            .finish()
    }
}

impl ModelArtifacts {
    /// 이미 만들어진 분류기와 인코더로 묶음을 만듭니다.
    pub fn new(classifier: Arc<dyn Classifier>, encoders: Arc<CategoryEncoders>) -> Self {
        Self {
            classifier,
            encoders,
        }
    }

    /// 모델 디렉토리에서 포레스트와 인코더를 로드합니다.
    ///
    /// # 에러
    /// - `ArtifactMissing`: 파일이 없음
    /// - `ArtifactInvalid`: JSON 형식 또는 구조 오류
    /// - `EncoderMissing`: 범주형 컬럼 인코더 누락
    pub fn load(
        fs: &dyn FileSystem,
        model_dir: &Path,
        model_file: &str,
        encoders_file: &str,
    ) -> Result<Self, ClassificationError> {
        let model_path = model_dir.join(model_file);
        let encoders_path = model_dir.join(encoders_file);

        let forest = RandomForest::from_json(&read_artifact(fs, &model_path)?, &model_path)?;
        let encoders =
            CategoryEncoders::from_json(&read_artifact(fs, &encoders_path)?, &encoders_path)?;

        info!(
            model = %model_path.display(),
            trees = forest.tree_count(),
            classes = ?forest.classes(),
            "model artifacts loaded"
        );

        Ok(Self {
            classifier: Arc::new(forest),
            encoders: Arc::new(encoders),
        })
    }
}

fn read_artifact(fs: &dyn FileSystem, path: &Path) -> Result<String, ClassificationError> {
    fs.read_to_string(path).map_err(|e| {
        if e.is_not_found() {
            ClassificationError::ArtifactMissing {
                path: path.display().to_string(),
            }
        } else {
            invalid(path, e.to_string())
        }
    })
}

fn invalid(path: &Path, reason: impl Into<String>) -> ClassificationError {
    ClassificationError::ArtifactInvalid {
        path: PathBuf::from(path).display().to_string(),
        reason: reason.into(),
    }
}
