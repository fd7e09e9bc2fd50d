//! Worker command-line construction.
//!
//! The flag order below is part of the contract with the worker's argument parser.
//! Reordering is a breaking change.

use crate::config::TrainingConfiguration;
use crate::run::RunId;
use std::path::Path;

/// Build the worker argument vector: script path first, then `--flag value` pairs.
///
/// Boolean flags are presence-only. No validation happens here; an empty dataset path
/// is passed through as an empty argument.
#[must_use]
pub fn build_worker_args(
    config: &TrainingConfiguration,
    script: &Path,
    run_id: &RunId,
) -> Vec<String> {
    let mut args = vec![
        script.to_string_lossy().into_owned(),
        "--path".to_string(),
        config.dataset_path.to_string_lossy().into_owned(),
        "--epochs".to_string(),
        config.epochs.to_string(),
        "--batch_size".to_string(),
        config.batch_size.to_string(),
        "--model".to_string(),
        config.model.id().to_string(),
        "--learning_rate".to_string(),
        config.learning_rate.to_string(),
        "--experiment_id".to_string(),
        run_id.to_string(),
    ];

    if !config.save_path.trim().is_empty() {
        args.push("--save_path".to_string());
        args.push(config.save_path.clone());
    }

    args.push("--num_workers".to_string());
    args.push(config.num_workers.to_string());

    if config.generate_archive {
        args.push("--zip_dataset".to_string());
    }
    if config.archive_only {
        args.push("--only_zip".to_string());
    }

    args.push("--patience".to_string());
    args.push(config.patience.to_string());

    if let Some(resume) = &config.resume_checkpoint {
        args.push("--resume".to_string());
        args.push(resume.to_string_lossy().into_owned());
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelArch;
    use std::path::PathBuf;

    fn base_config() -> TrainingConfiguration {
        TrainingConfiguration {
            dataset_path: PathBuf::from("/data/flowers"),
            model: ModelArch::EfficientnetB0,
            epochs: 5,
            batch_size: 16,
            learning_rate: 0.0005,
            num_workers: -1,
            patience: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_minimal_args_in_contract_order() {
        let args = build_worker_args(&base_config(), Path::new("train.py"), &RunId::from("exp_1"));
        assert_eq!(
            args,
            vec![
                "train.py",
                "--path",
                "/data/flowers",
                "--epochs",
                "5",
                "--batch_size",
                "16",
                "--model",
                "efficientnet_b0",
                "--learning_rate",
                "0.0005",
                "--experiment_id",
                "exp_1",
                "--num_workers",
                "-1",
                "--patience",
                "3",
            ]
        );
    }

    #[test]
    fn test_optional_flags_are_placed_and_presence_based() {
        let config = TrainingConfiguration {
            save_path: "/models/out".to_string(),
            generate_archive: true,
            archive_only: true,
            resume_checkpoint: Some(PathBuf::from("/models/last.pth")),
            num_workers: 0,
            ..base_config()
        };
        let args = build_worker_args(&config, Path::new("train.py"), &RunId::from("exp_2"));
        let tail: Vec<&str> = args[13..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "--save_path",
                "/models/out",
                "--num_workers",
                "0",
                "--zip_dataset",
                "--only_zip",
                "--patience",
                "3",
                "--resume",
                "/models/last.pth",
            ]
        );
    }

    #[test]
    fn test_blank_save_path_is_omitted() {
        let config = TrainingConfiguration { save_path: "   ".to_string(), ..base_config() };
        let args = build_worker_args(&config, Path::new("train.py"), &RunId::from("exp_3"));
        assert!(!args.iter().any(|a| a == "--save_path"));
    }

    #[test]
    fn test_output_is_stable_apart_from_run_id() {
        let config = base_config();
        let a = build_worker_args(&config, Path::new("train.py"), &RunId::from("exp_a"));
        let b = build_worker_args(&config, Path::new("train.py"), &RunId::from("exp_b"));
        assert_eq!(a.len(), b.len());
        let differing: Vec<usize> = (0..a.len()).filter(|&i| a[i] != b[i]).collect();
        assert_eq!(differing, vec![12]);
    }
}
