use crate::encoding::FeatureEncoder;
use crate::error::{PipelineError, PipelineResult};
use crate::model::{ForestSequenceModel, SequenceModel};
use crate::scaler::{FeatureScaler, TargetScaler};
use crate::schema::TableSchema;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use uuid::Uuid;

const ARTIFACT_VERSION: u32 = 1;

pub const MODEL_FILE: &str = "model.bin";
pub const FEATURE_SCALER_FILE: &str = "feature_scaler.bin";
pub const TARGET_SCALER_FILE: &str = "target_scaler.bin";
pub const ENCODER_FILE: &str = "encoder.bin";
/// Training summary written next to the artifacts by the train command.
pub const SUMMARY_FILE: &str = "training_summary.json";
pub const ARTIFACT_FILES: [&str; 4] = [
    MODEL_FILE,
    FEATURE_SCALER_FILE,
    TARGET_SCALER_FILE,
    ENCODER_FILE,
];

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactEnvelope<T> {
    version: u32,
    bundle_id: Uuid,
    created_at: DateTime<Utc>,
    payload: T,
}

/// Model, encoder and both scalers from one training run.
///
/// Construction checks that the four pieces agree on the feature layout, so a
/// bundle that exists is always usable for inference.
#[derive(Debug, Clone)]
pub struct TrainedArtifactBundle<M = ForestSequenceModel> {
    id: Uuid,
    created_at: DateTime<Utc>,
    model: M,
    encoder: FeatureEncoder,
    feature_scaler: FeatureScaler,
    target_scaler: TargetScaler,
}

impl<M: SequenceModel> TrainedArtifactBundle<M> {
    pub fn new(
        model: M,
        encoder: FeatureEncoder,
        feature_scaler: FeatureScaler,
        target_scaler: TargetScaler,
    ) -> PipelineResult<Self> {
        Self::assemble(
            Uuid::new_v4(),
            Utc::now(),
            model,
            encoder,
            feature_scaler,
            target_scaler,
        )
    }

    fn assemble(
        id: Uuid,
        created_at: DateTime<Utc>,
        model: M,
        encoder: FeatureEncoder,
        feature_scaler: FeatureScaler,
        target_scaler: TargetScaler,
    ) -> PipelineResult<Self> {
        let layout = encoder.layout();
        let feature_columns = feature_scaler.column_names()?;
        if feature_columns != layout.columns() {
            return Err(PipelineError::BundleMismatch(format!(
                "feature scaler columns [{}] differ from encoder layout [{}]",
                feature_columns.join(", "),
                layout.columns().join(", ")
            )));
        }
        let target_columns = target_scaler.column_names()?;
        if target_columns.len() != 1 || target_columns[0] != layout.target() {
            return Err(PipelineError::BundleMismatch(format!(
                "target scaler columns [{}] do not match target {}",
                target_columns.join(", "),
                layout.target()
            )));
        }
        if model.feature_width() != layout.width() {
            return Err(PipelineError::BundleMismatch(format!(
                "model expects {} features per row, layout has {}",
                model.feature_width(),
                layout.width()
            )));
        }
        if model.window_length() == 0 {
            return Err(PipelineError::BundleMismatch(
                "model window length is zero".to_string(),
            ));
        }

        Ok(Self {
            id,
            created_at,
            model,
            encoder,
            feature_scaler,
            target_scaler,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn encoder(&self) -> &FeatureEncoder {
        &self.encoder
    }

    pub fn schema(&self) -> &TableSchema {
        self.encoder.schema()
    }

    pub fn feature_scaler(&self) -> &FeatureScaler {
        &self.feature_scaler
    }

    pub fn target_scaler(&self) -> &TargetScaler {
        &self.target_scaler
    }

    pub fn window_length(&self) -> usize {
        self.model.window_length()
    }
}

impl<M: SequenceModel + Serialize + DeserializeOwned> TrainedArtifactBundle<M> {
    /// Writes all four artifacts into a staging directory next to `dir` and
    /// renames it into place. An existing bundle is moved aside and removed
    /// only after the new one is in place. A directory holding anything other
    /// than bundle files is never replaced.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> PipelineResult<()> {
        let dir = dir.as_ref();
        let name = dir.file_name().ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "bundle path {} has no directory name",
                dir.display()
            ))
        })?;
        let name = name.to_string_lossy();
        if dir.exists() {
            ensure_replaceable(dir)?;
        }

        let staging = dir.with_file_name(format!(".{name}.staging-{}", self.id));
        if let Some(parent) = staging.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
            }
        }
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|err| PipelineError::io(&staging, err))?;
        }
        fs::create_dir(&staging).map_err(|err| PipelineError::io(&staging, err))?;

        if let Err(err) = self.write_artifacts(&staging) {
            discard(&staging);
            return Err(err);
        }
        let retired = dir.with_file_name(format!(".{name}.retired-{}", self.id));
        if let Err(err) = swap_into_place(&staging, dir, &retired) {
            discard(&staging);
            return Err(err);
        }
        info!("Saved artifact bundle {} to {}", self.id, dir.display());
        Ok(())
    }

    /// Loads a bundle only when all four artifacts exist, share one bundle id
    /// and carry the current format version.
    pub fn load<P: AsRef<Path>>(dir: P) -> PipelineResult<Self> {
        let dir = dir.as_ref();
        let missing: Vec<&str> = ARTIFACT_FILES
            .iter()
            .copied()
            .filter(|file| !dir.join(file).is_file())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::not_fitted(format!(
                "artifact bundle at {} (missing {})",
                dir.display(),
                missing.join(", ")
            )));
        }

        let model: ArtifactEnvelope<M> = read_artifact(&dir.join(MODEL_FILE))?;
        let feature_scaler: ArtifactEnvelope<FeatureScaler> =
            read_artifact(&dir.join(FEATURE_SCALER_FILE))?;
        let target_scaler: ArtifactEnvelope<TargetScaler> =
            read_artifact(&dir.join(TARGET_SCALER_FILE))?;
        let encoder: ArtifactEnvelope<FeatureEncoder> = read_artifact(&dir.join(ENCODER_FILE))?;

        let bundle_id = model.bundle_id;
        for (file, id) in [
            (FEATURE_SCALER_FILE, feature_scaler.bundle_id),
            (TARGET_SCALER_FILE, target_scaler.bundle_id),
            (ENCODER_FILE, encoder.bundle_id),
        ] {
            if id != bundle_id {
                return Err(PipelineError::BundleMismatch(format!(
                    "{file} belongs to bundle {id}, {MODEL_FILE} to bundle {bundle_id}"
                )));
            }
        }

        let bundle = Self::assemble(
            bundle_id,
            model.created_at,
            model.payload,
            encoder.payload,
            feature_scaler.payload,
            target_scaler.payload,
        )?;
        info!("Loaded artifact bundle {} from {}", bundle.id, dir.display());
        Ok(bundle)
    }

    fn write_artifacts(&self, staging: &Path) -> PipelineResult<()> {
        self.write_artifact(&staging.join(MODEL_FILE), &self.model)?;
        self.write_artifact(&staging.join(FEATURE_SCALER_FILE), &self.feature_scaler)?;
        self.write_artifact(&staging.join(TARGET_SCALER_FILE), &self.target_scaler)?;
        self.write_artifact(&staging.join(ENCODER_FILE), &self.encoder)
    }

    fn write_artifact<T: Serialize>(&self, path: &Path, payload: &T) -> PipelineResult<()> {
        let file = File::create(path).map_err(|err| PipelineError::io(path, err))?;
        let mut writer = BufWriter::new(file);
        let envelope = ArtifactEnvelope {
            version: ARTIFACT_VERSION,
            bundle_id: self.id,
            created_at: self.created_at,
            payload,
        };
        bincode::serialize_into(&mut writer, &envelope)
            .map_err(|err| PipelineError::codec(path, err))?;
        writer.flush().map_err(|err| PipelineError::io(path, err))
    }
}

/// Only an empty directory or a previous bundle (plus its training summary)
/// may be replaced.
fn ensure_replaceable(dir: &Path) -> PipelineResult<()> {
    if !dir.is_dir() {
        return Err(PipelineError::InvalidConfig(format!(
            "bundle path {} exists and is not a directory",
            dir.display()
        )));
    }
    let entries = fs::read_dir(dir).map_err(|err| PipelineError::io(dir, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::io(dir, err))?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let is_file = entry
            .file_type()
            .map_err(|err| PipelineError::io(entry.path(), err))?
            .is_file();
        let known = ARTIFACT_FILES.contains(&&*file_name) || file_name == SUMMARY_FILE;
        if !(known && is_file) {
            return Err(PipelineError::InvalidConfig(format!(
                "refusing to replace {}: {file_name} is not part of an artifact bundle",
                dir.display()
            )));
        }
    }
    Ok(())
}

/// Moves `dir` (if any) to `retired`, renames `staging` to `dir`, then deletes
/// `retired`. A failed rename puts the previous bundle back.
fn swap_into_place(staging: &Path, dir: &Path, retired: &Path) -> PipelineResult<()> {
    let replacing = dir.exists();
    if replacing {
        if retired.exists() {
            fs::remove_dir_all(retired).map_err(|err| PipelineError::io(retired, err))?;
        }
        fs::rename(dir, retired).map_err(|err| PipelineError::io(dir, err))?;
    }
    if let Err(err) = fs::rename(staging, dir) {
        if replacing {
            if let Err(restore) = fs::rename(retired, dir) {
                warn!(
                    "Could not restore previous bundle from {}: {restore}",
                    retired.display()
                );
            }
        }
        return Err(PipelineError::io(dir, err));
    }
    if replacing {
        if let Err(err) = fs::remove_dir_all(retired) {
            warn!(
                "Could not remove previous bundle at {}: {err}",
                retired.display()
            );
        }
    }
    Ok(())
}

fn discard(staging: &Path) {
    if let Err(err) = fs::remove_dir_all(staging) {
        warn!("Could not remove staging directory {}: {err}", staging.display());
    }
}

fn read_artifact<T: DeserializeOwned>(path: &Path) -> PipelineResult<ArtifactEnvelope<T>> {
    let file = File::open(path).map_err(|err| PipelineError::io(path, err))?;
    let envelope: ArtifactEnvelope<T> = bincode::deserialize_from(BufReader::new(file))
        .map_err(|err| PipelineError::codec(path, err))?;
    if envelope.version != ARTIFACT_VERSION {
        return Err(PipelineError::BundleMismatch(format!(
            "{} has format version {}, expected {ARTIFACT_VERSION}",
            path.display(),
            envelope.version
        )));
    }
    Ok(envelope)
}
