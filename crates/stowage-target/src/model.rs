//! Model-weight targets.
//!
//! A model is written to a local file by a [`ModelSerializer`], and that
//! file is what gets uploaded when the target is remote. Two serializers
//! ship here: a compressed tensor map ([`StateDictSerializer`], `.pth`) and a
//! JSON document carrying configuration plus weights
//! ([`SavedModelSerializer`], `.model`).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bincode::Options;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use stowage_core::error::StowError;
use stowage_core::format::Format;
use stowage_core::value::{Metadata, Payload};
use stowage_core::Result;

use crate::context::{TargetContext, TaskIdentity};
use crate::persistence::Artifact;
use crate::target::Target;

/// A dense tensor: shape plus row-major values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl TensorData {
    /// Build a tensor, checking that `values` fills `shape`.
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(StowError::codec_msg(format!(
                "tensor of shape {shape:?} needs {expected} values, got {}",
                values.len()
            )));
        }
        Ok(Self { shape, values })
    }
}

/// Named parameters of a model, e.g. `layer1.weight`.
pub type StateDict = BTreeMap<String, TensorData>;

/// A model with its architecture description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedModel {
    pub name: String,
    pub architecture: String,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    pub weights: StateDict,
}

/// Writes a model to a local file and reads it back.
pub trait ModelSerializer: Send + Sync + 'static {
    type Model: Send + Sync + 'static;

    /// File extension of the artifact.
    const EXTENSION: &'static str;

    fn save(model: &Self::Model, path: &Path) -> Result<()>;

    fn load(path: &Path) -> Result<Self::Model>;
}

fn create_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StowError::storage(format!("Failed to create {}", parent.display()), e))?;
    }
    File::create(path).map_err(|e| StowError::storage(format!("Failed to create {}", path.display()), e))
}

fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        let key = path.display().to_string();
        StowError::from_io(&key, format!("Failed to open {key}"), e)
    })
}

/// Gzip-compressed bincode tensor map.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateDictSerializer;

impl ModelSerializer for StateDictSerializer {
    type Model = StateDict;
    const EXTENSION: &'static str = "pth";

    fn save(model: &StateDict, path: &Path) -> Result<()> {
        let file = create_file(path)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        bincode::options()
            .serialize_into(&mut encoder, model)
            .map_err(|e| StowError::codec("Failed to encode state dict", e))?;
        let mut writer = encoder
            .finish()
            .map_err(|e| StowError::codec("Failed to compress state dict", e))?;
        writer
            .flush()
            .map_err(|e| StowError::storage(format!("Failed to write {}", path.display()), e))
    }

    fn load(path: &Path) -> Result<StateDict> {
        let decoder = GzDecoder::new(BufReader::new(open_file(path)?));
        bincode::options()
            .deserialize_from(decoder)
            .map_err(|e| StowError::codec("Failed to decode state dict", e))
    }
}

/// Pretty-printed JSON [`SavedModel`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SavedModelSerializer;

impl ModelSerializer for SavedModelSerializer {
    type Model = SavedModel;
    const EXTENSION: &'static str = "model";

    fn save(model: &SavedModel, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(create_file(path)?);
        serde_json::to_writer_pretty(&mut writer, model)
            .map_err(|e| StowError::codec("Failed to encode saved model", e))?;
        writer
            .flush()
            .map_err(|e| StowError::storage(format!("Failed to write {}", path.display()), e))
    }

    fn load(path: &Path) -> Result<SavedModel> {
        serde_json::from_reader(BufReader::new(open_file(path)?))
            .map_err(|e| StowError::codec("Failed to decode saved model", e))
    }
}

/// A model serialized to a local file, then stored as a `file` artifact.
pub struct ModelTarget<S: ModelSerializer> {
    artifact: Artifact,
    _serializer: PhantomData<fn() -> S>,
}

/// Tensor map weights (`.pth`).
pub type PytorchTarget = ModelTarget<StateDictSerializer>;

/// Configuration plus weights (`.model`).
pub type KerasTarget = ModelTarget<SavedModelSerializer>;

impl<S: ModelSerializer> std::fmt::Debug for ModelTarget<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelTarget")
            .field("extension", &S::EXTENSION)
            .field("artifact", &self.artifact)
            .finish()
    }
}

impl<S: ModelSerializer> Clone for ModelTarget<S> {
    fn clone(&self) -> Self {
        Self {
            artifact: self.artifact.clone(),
            _serializer: PhantomData,
        }
    }
}

impl<S: ModelSerializer> ModelTarget<S> {
    /// A model target for task `identity`, named after `S::EXTENSION`.
    pub fn new(context: &TargetContext, identity: &TaskIdentity) -> Self {
        Self {
            artifact: Artifact::new(context, identity, S::EXTENSION),
            _serializer: PhantomData,
        }
    }

    /// A local model target at `path`.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            artifact: Artifact::at_path(path),
            _serializer: PhantomData,
        }
    }

    /// The backing artifact.
    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StowError::Internal {
            message: format!("Blocking task panicked: {e}"),
        })?
}

#[async_trait]
impl<S: ModelSerializer> Target for ModelTarget<S> {
    type Value = S::Model;

    async fn exists(&self) -> Result<bool> {
        self.artifact.exists().await
    }

    async fn load(&self) -> Result<S::Model> {
        let path = self.artifact.load(Format::File, None).await?.into_file()?;
        let model = blocking({
            let path = path.clone();
            move || S::load(&path)
        })
        .await;

        // A remote load downloads a private copy; the local artifact stays.
        if self.artifact.is_remote() {
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove downloaded model copy");
            }
        }
        model
    }

    async fn dump(&self, model: S::Model) -> Result<()> {
        let path = self.artifact.local_path().to_path_buf();
        blocking({
            let path = path.clone();
            move || S::save(&model, &path)
        })
        .await?;
        debug!(path = %path.display(), extension = S::EXTENSION, "Serialized model");
        self.artifact.save(&Payload::File(path), Format::File).await
    }

    async fn remove(&self) -> Result<()> {
        self.artifact.remove().await
    }

    async fn dump_metadata(&self, metadata: &Metadata) -> Result<()> {
        self.artifact.save_metadata(metadata).await
    }

    async fn load_metadata(&self) -> Result<Metadata> {
        self.artifact.load_metadata().await
    }

    async fn remove_metadata(&self) -> Result<()> {
        self.artifact.remove_metadata().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state_dict() -> StateDict {
        let mut dict = StateDict::new();
        dict.insert(
            "layer1.weight".to_string(),
            TensorData::new(vec![2, 2], vec![0.1, -0.2, 0.3, 0.4]).unwrap(),
        );
        dict.insert(
            "layer1.bias".to_string(),
            TensorData::new(vec![2], vec![0.0, 1.0]).unwrap(),
        );
        dict
    }

    #[test]
    fn test_tensor_shape_is_checked() {
        assert!(TensorData::new(vec![3, 2], vec![1.0; 5]).is_err());
    }

    #[test]
    fn test_state_dict_file_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/weights.pth");
        StateDictSerializer::save(&state_dict(), &path).unwrap();
        assert_eq!(StateDictSerializer::load(&path).unwrap(), state_dict());
    }

    #[test]
    fn test_saved_model_file_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("clf.model");
        let mut config = BTreeMap::new();
        config.insert("hidden".to_string(), serde_json::json!(64));
        let model = SavedModel {
            name: "clf".into(),
            architecture: "mlp".into(),
            config,
            weights: state_dict(),
        };
        SavedModelSerializer::save(&model, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"architecture\": \"mlp\""));
        assert_eq!(SavedModelSerializer::load(&path).unwrap(), model);
    }

    #[tokio::test]
    async fn test_local_model_target() {
        let tmp = TempDir::new().unwrap();
        let ctx = TargetContext::local(tmp.path());
        let target = PytorchTarget::new(&ctx, &TaskIdentity::new("train", "train.Fit_1"));
        assert!(!target.exists().await.unwrap());

        target.dump(state_dict()).await.unwrap();
        assert!(tmp.path().join("train/Fit_1.pth").is_file());
        assert_eq!(target.load().await.unwrap(), state_dict());

        target.remove().await.unwrap();
        assert!(!target.exists().await.unwrap());
    }

    #[test]
    fn test_corrupt_state_dict() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.pth");
        std::fs::write(&path, b"not gzip").unwrap();
        assert!(matches!(
            StateDictSerializer::load(&path),
            Err(StowError::Codec { .. })
        ));
    }
}
