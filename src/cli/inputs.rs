// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Run inputs from a file and `--input key=value` pairs

use std::path::Path;

use crate::errors::{GenflowError, GenflowResult};
use crate::pipeline::Inputs;

/// Merge the input file (if any) with command-line pairs; pairs win.
pub fn load_inputs(file: Option<&Path>, pairs: &[String]) -> GenflowResult<Inputs> {
    let mut inputs = match file {
        Some(path) => read_inputs_file(path)?,
        None => Inputs::new(),
    };

    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| GenflowError::InvalidInput {
            reason: format!("input '{}' is not in KEY=VALUE form", pair),
            help: Some("Pass inputs as --input module_name=accounts.py".into()),
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(GenflowError::InvalidInput {
                reason: format!("input '{}' has an empty key", pair),
                help: None,
            });
        }
        inputs.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    }

    Ok(inputs)
}

fn read_inputs_file(path: &Path) -> GenflowResult<Inputs> {
    let content = std::fs::read_to_string(path).map_err(|e| GenflowError::FileReadError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();

    match extension.as_str() {
        "toml" => Ok(toml::from_str(&content)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(&content)?),
        "json" => Ok(serde_json::from_str(&content)?),
        other => Err(GenflowError::InvalidInput {
            reason: format!("unsupported input file type '.{}'", other),
            help: Some("Use a .toml, .yaml, .yml or .json file".into()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pairs_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inputs.toml");
        std::fs::write(
            &path,
            "requirements = \"A simple account system\"\nmodule_name = \"backend.py\"\ncurrent_year = 2026\n",
        )
        .unwrap();

        let inputs = load_inputs(Some(&path), &["module_name=accounts.py".into()]).unwrap();

        assert_eq!(inputs["module_name"], json!("accounts.py"));
        assert_eq!(inputs["requirements"], json!("A simple account system"));
        assert_eq!(inputs["current_year"], json!(2026));
    }

    #[test]
    fn test_yaml_and_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("inputs.yml");
        std::fs::write(&yaml, "module_name: backend.py\n").unwrap();
        let json_path = dir.path().join("inputs.json");
        std::fs::write(&json_path, r#"{"requirements": "ledger"}"#).unwrap();

        assert_eq!(load_inputs(Some(&yaml), &[]).unwrap()["module_name"], json!("backend.py"));
        assert_eq!(
            load_inputs(Some(&json_path), &[]).unwrap()["requirements"],
            json!("ledger")
        );
    }

    #[test]
    fn test_value_may_contain_equals() {
        let inputs = load_inputs(None, &["requirements=a=b".into()]).unwrap();
        assert_eq!(inputs["requirements"], json!("a=b"));
    }

    #[test]
    fn test_malformed_pair_rejected() {
        for pair in ["no-equals", "=value"] {
            let err = load_inputs(None, &[pair.into()]).unwrap_err();
            assert!(
                matches!(err, GenflowError::InvalidInput { .. }),
                "{pair}: {err:?}"
            );
            assert!(err.to_string().starts_with("Invalid run input"));
        }
    }

    #[test]
    fn test_unsupported_input_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inputs.ini");
        std::fs::write(&path, "module_name=backend.py\n").unwrap();

        match load_inputs(Some(&path), &[]).unwrap_err() {
            GenflowError::InvalidInput { reason, help } => {
                assert!(reason.contains(".ini"));
                assert!(help.is_some());
            }
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
    }
}
