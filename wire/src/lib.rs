//! JSON contract of the gateway's HTTP surface.
//!
//! Field names are the compatibility surface and must not be renamed. Both the
//! server and the command-line client depend on this crate, so a request that
//! passes `validate` on one side passes it on the other.

use serde::{Deserialize, Deserializer, Serialize};

/// Body of `POST /preprocess`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessRequest {
    /// Remote URI of the driving video.
    pub video_path: String,
    /// Remote URI of the reference image.
    pub refer_path: String,
    /// Target resolution area, exactly two integers.
    pub resolution_area: Vec<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub retarget_flag: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub use_flux: bool,
    #[serde(default)]
    pub iterations: Option<u32>,
    #[serde(default)]
    pub k: Option<u32>,
    #[serde(default)]
    pub w_len: Option<u32>,
    #[serde(default)]
    pub h_len: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub replace_flag: bool,
}

/// Body of `POST /generate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Task name, e.g. `animate-14B`.
    pub task: String,
    /// Remote URI of the folder holding the preprocessed source data.
    pub src_root_path: String,
    #[serde(default = "one")]
    pub refert_num: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub replace_flag: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub use_relighting_lora: bool,
    #[serde(default = "one")]
    pub nproc_per_node: u32,
    #[serde(default = "one")]
    pub nnodes: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dit_fsdp: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub t5_fsdp: bool,
    #[serde(default)]
    pub ulysses_size: Option<u32>,
}

impl Default for GenerateRequest {
    fn default() -> Self {
        Self {
            task: String::new(),
            src_root_path: String::new(),
            refert_num: 1,
            replace_flag: false,
            use_relighting_lora: false,
            nproc_per_node: 1,
            nnodes: 1,
            dit_fsdp: false,
            t5_fsdp: false,
            ulysses_size: None,
        }
    }
}

/// One uploaded artifact as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub file: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessResponse {
    pub message: String,
    pub output_s3_paths: Vec<OutputFile>,
    pub file_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub message: String,
    pub output_s3_paths: Vec<OutputFile>,
}

/// Error body returned with every non-2xx status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub busy: bool,
    pub version: String,
}

impl PreprocessRequest {
    /// Check the cross-field constraints, reporting every violation at once.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();
        if self.resolution_area.len() != 2 {
            violations.push(format!(
                "`resolution_area` must contain exactly two integers, got {}.",
                self.resolution_area.len()
            ));
        }
        if self.replace_flag && self.use_flux {
            violations
                .push("`replace_flag` and `use_flux` cannot be True simultaneously.".to_string());
        }
        if self.replace_flag {
            let required = [
                ("iterations", self.iterations),
                ("k", self.k),
                ("w_len", self.w_len),
                ("h_len", self.h_len),
            ];
            for (name, value) in required {
                if value.is_none() {
                    violations.push(format!(
                        "`{name}` is required when `replace_flag` is True."
                    ));
                }
            }
        }
        if self.use_flux && !self.retarget_flag {
            violations.push("`retarget_flag` must be True when `use_flux` is True.".to_string());
        }
        into_result(violations)
    }
}

impl GenerateRequest {
    /// Check the cross-field constraints, reporting every violation at once.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();
        if self.task.trim().is_empty() {
            violations.push("`task` must not be empty.".to_string());
        }
        if self.replace_flag && !self.use_relighting_lora {
            violations.push(
                "`use_relighting_lora` is required when `replace_flag` is True for generation."
                    .to_string(),
            );
        }
        if self.nproc_per_node == 0 || self.nnodes == 0 {
            violations.push("`nproc_per_node` and `nnodes` must be at least 1.".to_string());
        }
        if self.nproc_per_node > 1
            && (!self.dit_fsdp || !self.t5_fsdp || self.ulysses_size.is_none())
        {
            violations.push(
                "`dit_fsdp`, `t5_fsdp`, and `ulysses_size` are required for multi-card generation."
                    .to_string(),
            );
        }
        into_result(violations)
    }
}

fn into_result(violations: Vec<String>) -> Result<(), Vec<String>> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn one() -> u32 {
    1
}

// Optional booleans may arrive as explicit `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preprocess() -> PreprocessRequest {
        PreprocessRequest {
            video_path: "s3://bucket/video.mp4".into(),
            refer_path: "s3://bucket/ref.png".into(),
            resolution_area: vec![1280, 720],
            ..Default::default()
        }
    }

    #[test]
    fn generate_defaults_apply() {
        let req: GenerateRequest = serde_json::from_str(
            r#"{"task":"animate-14B","src_root_path":"s3://b/src","replace_flag":null}"#,
        )
        .unwrap();
        assert_eq!(req.refert_num, 1);
        assert_eq!(req.nproc_per_node, 1);
        assert_eq!(req.nnodes, 1);
        assert!(!req.replace_flag);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn replace_requires_all_numerics() {
        let req = PreprocessRequest {
            replace_flag: true,
            iterations: Some(3),
            ..preprocess()
        };
        let violations = req.validate().unwrap_err();
        assert_eq!(violations.len(), 3);
        assert!(violations.iter().any(|v| v.contains("`k`")));
    }

    #[test]
    fn replace_and_flux_are_exclusive() {
        let req = PreprocessRequest {
            replace_flag: true,
            use_flux: true,
            retarget_flag: true,
            iterations: Some(1),
            k: Some(1),
            w_len: Some(1),
            h_len: Some(1),
            ..preprocess()
        };
        let violations = req.validate().unwrap_err();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("simultaneously"));
    }

    #[test]
    fn flux_requires_retarget() {
        let req = PreprocessRequest {
            use_flux: true,
            ..preprocess()
        };
        assert!(req.validate().is_err());
        let req = PreprocessRequest {
            use_flux: true,
            retarget_flag: true,
            ..preprocess()
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn resolution_area_needs_two_values() {
        let req = PreprocessRequest {
            resolution_area: vec![512],
            ..preprocess()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn multi_card_requires_sharding_flags() {
        let req = GenerateRequest {
            task: "animate-14B".into(),
            src_root_path: "s3://b/src".into(),
            nproc_per_node: 4,
            dit_fsdp: true,
            t5_fsdp: true,
            ..Default::default()
        };
        assert!(req.validate().is_err());
        let req = GenerateRequest {
            ulysses_size: Some(2),
            ..req
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn replace_requires_relighting_lora() {
        let req = GenerateRequest {
            task: "animate-14B".into(),
            src_root_path: "s3://b/src".into(),
            replace_flag: true,
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }
}
