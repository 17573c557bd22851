//! Task output targets for stowage.
//!
//! A [`Target`] is what a pipeline orchestrator reads and writes for one
//! task output. Every target is built from a [`TargetContext`] and a
//! [`TaskIdentity`]; the context decides once whether the output lives on
//! the local filesystem or in a configured
//! [`Storage`](stowage_storage::Storage).
//!
//! | target            | value         | extension   |
//! |-------------------|---------------|-------------|
//! | [`FileTarget`]    | `PathBuf`     | `file`      |
//! | [`PickleTarget`]  | `Payload`     | `pkl`       |
//! | [`ParquetTarget`] | `RecordBatch` | `parquet`   |
//! | [`JsonTarget`]    | `RecordBatch` | `json`      |
//! | [`ModelTarget`]   | model         | per serializer |
//! | [`DummyTarget`]   | any `Clone`   | none        |

pub mod context;
pub mod dummy;
pub mod file;
pub mod model;
pub mod persistence;
pub mod pickle;
pub mod table;
pub mod target;

pub use context::{TargetContext, TaskIdentity};
pub use dummy::DummyTarget;
pub use file::FileTarget;
pub use model::{
    KerasTarget, ModelSerializer, ModelTarget, PytorchTarget, SavedModel, SavedModelSerializer,
    StateDict, StateDictSerializer, TensorData,
};
pub use persistence::Artifact;
pub use pickle::PickleTarget;
pub use table::{JsonTarget, ParquetTarget};
pub use target::Target;
