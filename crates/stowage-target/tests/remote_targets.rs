//! Integration test: targets persisted through a remote storage.
//!
//! The storage runs on an in-memory object store, so the full path
//! (codec → staging → object store → staging → codec) is exercised without a
//! network.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use stowage_core::retry::RetryPolicy;
use stowage_core::{Metadata, Payload, StorageBackend, StowError, Value};
use stowage_storage::{ObjectStoreBackend, Storage};
use stowage_target::{
    FileTarget, JsonTarget, KerasTarget, ParquetTarget, PickleTarget, SavedModel, Target,
    TargetContext, TaskIdentity, TensorData,
};

struct Fixture {
    backend: Arc<ObjectStoreBackend>,
    context: TargetContext,
    tmp: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let tmp = tempfile::TempDir::new().unwrap();
    let backend = Arc::new(ObjectStoreBackend::in_memory());
    let storage = Storage::new(backend.clone())
        .with_parent_folder("pipeline")
        .with_staging_dir(tmp.path().join("staging"))
        .with_retry(RetryPolicy::immediate(5));
    let context = TargetContext::remote(tmp.path().join("targets"), Arc::new(storage));
    Fixture {
        backend,
        context,
        tmp,
    }
}

fn identity(name: &str) -> TaskIdentity {
    TaskIdentity::new("sales", format!("sales.{name}"))
}

fn sales() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("store", DataType::Utf8, true),
        Field::new("units", DataType::Int64, true),
        Field::new("revenue", DataType::Float64, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(vec!["north", "south", "east"])),
            Arc::new(Int64Array::from(vec![10, 4, 7])),
            Arc::new(Float64Array::from(vec![99.5, 40.0, 70.25])),
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn test_pickle_target_uses_pipeline_key() {
    let fx = fixture();
    let target = PickleTarget::new(&fx.context, &identity("Aggregate_1"));
    assert!(!target.exists().await.unwrap());
    assert!(!target.complete().await.unwrap());

    let mut map = BTreeMap::new();
    map.insert("total".to_string(), Value::from(21i64));
    let payload = Payload::Object(Value::Map(map));
    target.dump(payload.clone()).await.unwrap();

    assert!(target.complete().await.unwrap());
    assert!(fx
        .backend
        .exists("pipeline/sales/Aggregate_1.pkl")
        .await
        .unwrap());
    assert_eq!(target.load().await.unwrap(), payload);

    target.remove().await.unwrap();
    target.remove().await.unwrap();
    assert!(!target.exists().await.unwrap());
}

#[tokio::test]
async fn test_parquet_target_projection() {
    let fx = fixture();
    let target = ParquetTarget::new(&fx.context, &identity("Clean_1"));
    target.dump(sales()).await.unwrap();

    assert_eq!(target.load().await.unwrap(), sales());

    let columns = vec!["revenue".to_string(), "store".to_string()];
    let projected = target.load_columns(&columns).await.unwrap();
    let names: Vec<_> = projected
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    assert_eq!(names, columns);

    let err = target
        .load_columns(&["missing".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, StowError::Schema { .. }));
}

#[tokio::test]
async fn test_json_target_round_trip() {
    let fx = fixture();
    let target = JsonTarget::new(&fx.context, &identity("Report_1"));
    target.dump(sales()).await.unwrap();
    let loaded = target.load().await.unwrap();
    assert_eq!(loaded.num_rows(), 3);
    let names: Vec<_> = loaded
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    assert_eq!(names, vec!["store", "units", "revenue"]);
    for idx in 0..3 {
        assert_eq!(loaded.column(idx).as_ref(), sales().column(idx).as_ref());
    }
}

#[tokio::test]
async fn test_file_target_consumes_source() {
    let fx = fixture();
    let target = FileTarget::new(&fx.context, &identity("Export_1"));
    let source = fx.tmp.path().join("export.csv");
    std::fs::write(&source, "store,units\nnorth,10\n").unwrap();

    target.dump(source.clone()).await.unwrap();
    assert!(!source.exists(), "source file is removed after upload");

    let local_copy = target.load().await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&local_copy).unwrap(),
        "store,units\nnorth,10\n"
    );

    target.remove().await.unwrap();
    assert!(!local_copy.exists());
}

#[tokio::test]
async fn test_model_target_round_trip() {
    let fx = fixture();
    let target = KerasTarget::new(&fx.context, &identity("Train_1"));
    let mut weights = BTreeMap::new();
    weights.insert(
        "dense.kernel".to_string(),
        TensorData::new(vec![1, 3], vec![0.5, 0.25, -1.0]).unwrap(),
    );
    let model = SavedModel {
        name: "forecaster".into(),
        architecture: "dense".into(),
        config: BTreeMap::new(),
        weights,
    };

    target.dump(model.clone()).await.unwrap();
    assert!(fx.backend.exists("pipeline/sales/Train_1.model").await.unwrap());
    assert_eq!(target.load().await.unwrap(), model);
}

#[tokio::test]
async fn test_metadata_lifecycle_is_independent() {
    let fx = fixture();
    let target = PickleTarget::new(&fx.context, &identity("Aggregate_2"));
    let mut meta = Metadata::new();
    meta.insert("rows".to_string(), Value::from(3i64));
    meta.insert("source".to_string(), Value::from("erp"));

    target.dump(Payload::Table(sales())).await.unwrap();
    target.dump_metadata(&meta).await.unwrap();
    assert!(fx
        .backend
        .exists("pipeline/sales/Aggregate_2.pkl.metadata")
        .await
        .unwrap());

    // Removing the artifact leaves the metadata.
    target.remove().await.unwrap();
    assert_eq!(target.load_metadata().await.unwrap(), meta);

    // And removing the metadata leaves a fresh artifact alone.
    target.dump(Payload::Table(sales())).await.unwrap();
    target.remove_metadata().await.unwrap();
    assert!(target.exists().await.unwrap());
    assert!(target.load_metadata().await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_pickle_target_rejects_file_payload() {
    let fx = fixture();
    let target = PickleTarget::new(&fx.context, &identity("Bad_1"));
    let err = target
        .dump(Payload::File(fx.tmp.path().join("x")))
        .await
        .unwrap_err();
    assert!(matches!(err, StowError::TypeMismatch { .. }));
    assert!(!target.exists().await.unwrap());
}
