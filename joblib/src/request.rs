//! Validated job requests.
//!
//! Conversion from the wire types runs every cross-field check in one pass and parses the remote
//! locations, so a `JobRequest` that exists is always executable. Nothing here touches the gate,
//! the filesystem or the network.

use crate::errors::{JobError, Result};
use crate::location::RemoteLocation;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobRequest {
    Preprocess(PreprocessJob),
    Generate(GenerateJob),
}

impl JobRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            JobRequest::Preprocess(_) => "preprocess",
            JobRequest::Generate(_) => "generate",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreprocessJob {
    pub video: RemoteLocation,
    pub refer: RemoteLocation,
    pub resolution_area: (u32, u32),
    pub mode: PreprocessMode,
}

/// The replace and flux-retarget extensions exclude each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreprocessMode {
    Standard,
    Replace {
        iterations: u32,
        k: u32,
        w_len: u32,
        h_len: u32,
    },
    FluxRetarget,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateJob {
    pub task: String,
    pub src_root: RemoteLocation,
    pub refert_num: u32,
    /// Replace mode; always runs with the relighting adapter.
    pub replace: bool,
    pub launch: Launch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Launch {
    Single,
    /// Several worker processes with sharded model weights.
    Distributed {
        nnodes: u32,
        nproc_per_node: u32,
        ulysses_size: u32,
    },
}

impl TryFrom<wire::PreprocessRequest> for PreprocessJob {
    type Error = JobError;

    fn try_from(request: wire::PreprocessRequest) -> Result<Self> {
        request.validate().map_err(JobError::Validation)?;

        let mode = match (request.replace_flag, request.use_flux) {
            (true, _) => PreprocessMode::Replace {
                iterations: required(request.iterations, "iterations")?,
                k: required(request.k, "k")?,
                w_len: required(request.w_len, "w_len")?,
                h_len: required(request.h_len, "h_len")?,
            },
            (false, true) => PreprocessMode::FluxRetarget,
            (false, false) => PreprocessMode::Standard,
        };
        let resolution_area = match request.resolution_area[..] {
            [width, height] => (width, height),
            _ => {
                return Err(JobError::Validation(vec![
                    "`resolution_area` must contain exactly two integers.".to_string(),
                ]))
            }
        };

        Ok(Self {
            video: RemoteLocation::parse(&request.video_path)?,
            refer: RemoteLocation::parse(&request.refer_path)?,
            resolution_area,
            mode,
        })
    }
}

impl TryFrom<wire::GenerateRequest> for GenerateJob {
    type Error = JobError;

    fn try_from(request: wire::GenerateRequest) -> Result<Self> {
        request.validate().map_err(JobError::Validation)?;

        let launch = if request.nproc_per_node > 1 {
            Launch::Distributed {
                nnodes: request.nnodes,
                nproc_per_node: request.nproc_per_node,
                ulysses_size: required(request.ulysses_size, "ulysses_size")?,
            }
        } else {
            Launch::Single
        };

        Ok(Self {
            src_root: RemoteLocation::parse(&request.src_root_path)?,
            task: request.task,
            refert_num: request.refert_num,
            replace: request.replace_flag,
            launch,
        })
    }
}

impl TryFrom<wire::PreprocessRequest> for JobRequest {
    type Error = JobError;

    fn try_from(request: wire::PreprocessRequest) -> Result<Self> {
        PreprocessJob::try_from(request).map(JobRequest::Preprocess)
    }
}

impl TryFrom<wire::GenerateRequest> for JobRequest {
    type Error = JobError;

    fn try_from(request: wire::GenerateRequest) -> Result<Self> {
        GenerateJob::try_from(request).map(JobRequest::Generate)
    }
}

fn required(value: Option<u32>, name: &str) -> Result<u32> {
    value.ok_or_else(|| JobError::Validation(vec![format!("`{name}` is required.")]))
}
