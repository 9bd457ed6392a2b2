//! Fitted-model serialization and deserialization.
//!
//! Uses bincode for compact binary files.
//! Format: magic bytes (MXRG) + version (u32) + bincode payload.
//! Optional JSON sidecar for human inspection.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::fit::model::{FitDetails, FittedModel};

pub const MAGIC: [u8; 4] = *b"MXRG";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct ModelFileRef<'a> {
    magic: [u8; 4],
    version: u32,
    model: &'a FittedModel,
}

#[derive(Deserialize)]
struct ModelFile {
    magic: [u8; 4],
    version: u32,
    model: FittedModel,
}

fn io_error(path: &Path, e: std::io::Error) -> ModelError {
    ModelError::Serialization(format!("{}: {}", path.display(), e))
}

/// Save a fitted model to a binary file (.mixreg.model).
pub fn save_model(model: &FittedModel, path: &Path) -> Result<()> {
    let encoded = bincode::serialize(&ModelFileRef {
        magic: MAGIC,
        version: FORMAT_VERSION,
        model,
    })
    .map_err(|e| ModelError::Serialization(e.to_string()))?;
    std::fs::write(path, encoded).map_err(|e| io_error(path, e))
}

/// Load a fitted model from a binary file (.mixreg.model).
pub fn load_model(path: &Path) -> Result<FittedModel> {
    let data = std::fs::read(path).map_err(|e| io_error(path, e))?;
    if data.len() < MAGIC.len() || data[..MAGIC.len()] != MAGIC {
        return Err(ModelError::Serialization(format!(
            "{}: not a mixreg model file",
            path.display()
        )));
    }
    let file: ModelFile =
        bincode::deserialize(&data).map_err(|e| ModelError::Serialization(e.to_string()))?;
    if file.magic != MAGIC || file.version != FORMAT_VERSION {
        return Err(ModelError::Serialization(format!(
            "{}: unsupported model format version {}",
            path.display(),
            file.version
        )));
    }
    Ok(file.model)
}

/// Save a JSON sidecar for inspection (.mixreg.model.json).
pub fn save_model_json(model: &FittedModel, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(model)
        .map_err(|e| ModelError::Serialization(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| io_error(path, e))
}

/// Summary of a fitted model (for display).
pub fn model_summary(model: &FittedModel) -> String {
    let mut out = format!(
        "mixreg model v{}\n\
         Family: {}\n\
         Response: {}\n\
         Terms: {}\n\
         Method: {}\n\
         Observations: {}\n\
         Clusters: {}\n\
         Parameters: {}\n\
         logLik: {:.4}\n\
         AIC: {:.4}\n\
         BIC: {:.4}",
        FORMAT_VERSION,
        model.family_name(),
        model.spec.response,
        model.spec.term_labels().into_iter().collect::<Vec<_>>().join(", "),
        model.method,
        model.n_obs,
        model.n_clusters(),
        model.n_params,
        model.log_likelihood,
        model.aic(),
        model.bic(),
    );
    match &model.details {
        FitDetails::Gls(d) => {
            if let Some(rho) = d.params.correlation {
                let _ = write!(out, "\nCorrelation: {:.4}", rho);
            }
            for (level, ratio) in &d.params.variance_ratios {
                let _ = write!(out, "\nSD ratio [{}]: {:.4}", level, ratio);
            }
            let _ = write!(out, "\nResidual SD: {:.4}", d.marginal.sigma2.sqrt());
        }
        FitDetails::LinearMixed(d) => {
            for (name, sd) in d.effect_names.iter().zip(d.effect_sd()) {
                let _ = write!(out, "\nRandom SD [{}]: {:.4}", name, sd);
            }
            let _ = write!(out, "\nResidual SD: {:.4}", d.residual_variance().sqrt());
        }
        FitDetails::Logistic(d) => {
            let _ = write!(
                out,
                "\nDeviance: {:.4}\nNull deviance: {:.4}",
                d.deviance, d.null_deviance
            );
        }
    }
    for w in &model.warnings {
        let _ = write!(out, "\nWarning: {}", w);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::logistic::{fit_logistic_regression, LogisticOptions};
    use crate::spec::ModelSpec;
    use mixreg_data::{Column, Table};

    fn model() -> FittedModel {
        let y = vec![0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0];
        let x = vec![0.1, 0.4, 0.3, 0.9, 0.5, 0.2, 0.8, 0.35];
        let table = Table::new(vec![
            ("admit".into(), Column::Numeric(y)),
            ("gpa".into(), Column::Numeric(x)),
        ])
        .unwrap();
        let spec = ModelSpec::builder("admit").term("gpa").build().unwrap();
        fit_logistic_regression(&table, &spec, &LogisticOptions::default()).unwrap()
    }

    #[test]
    fn test_save_load_roundtrip() {
        let model = model();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.mixreg.model");

        save_model(&model, &path).unwrap();
        let loaded = load_model(&path).unwrap();

        assert_eq!(loaded.coefficient_names, model.coefficient_names);
        assert_eq!(loaded.coefficients, model.coefficients);
        assert_eq!(loaded.data.fingerprint, model.data.fingerprint);
        assert_eq!(loaded.covariance.get(1, 1), model.covariance.get(1, 1));
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.bin");
        std::fs::write(&path, b"SGMD\x01\x00\x00\x00").unwrap();
        assert!(matches!(
            load_model(&path),
            Err(ModelError::Serialization(_))
        ));
    }

    #[test]
    fn test_json_sidecar_and_summary() {
        let model = model();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.mixreg.model.json");
        save_model_json(&model, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"coefficient_names\""));

        let summary = model_summary(&model);
        assert!(summary.contains("Family: logistic"));
        assert!(summary.contains("Deviance:"));
    }
}
