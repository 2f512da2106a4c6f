//! Argument vectors and environments for the external compute scripts.

use crate::request::{GenerateJob, Launch, PreprocessJob, PreprocessMode};
use crate::types::{Args, Dir, Envs, Program};
use std::fmt;
use std::path::{Path, PathBuf};

const SEARCH_PATH_VAR: &str = "PYTHONPATH";
const INTERPRETER_VAR: &str = "PYTHON";
const SEARCH_PATH_SEPARATOR: &str = ":";

/// Everything needed to start one child process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: Program,
    pub args: Args,
    /// Overrides on top of the inherited environment.
    pub envs: Envs,
    pub dir: Dir,
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Fixed, startup-time inputs to command construction.
#[derive(Clone, Debug)]
pub struct CommandSettings {
    /// Interpreter that runs the scripts and that nested launchers must reuse.
    pub python: PathBuf,
    /// Root of the compute project; working directory and search-path entry for every script.
    pub project_root: PathBuf,
    /// Search path inherited by the gateway at startup.
    pub inherited_pythonpath: Option<String>,
    pub preprocess_script: PathBuf,
    pub generate_script: PathBuf,
    pub preprocess_ckpt_path: String,
    pub inference_ckpt_path: String,
}

impl CommandSettings {
    pub fn preprocess(
        &self,
        job: &PreprocessJob,
        video: &Path,
        refer: &Path,
        save_dir: &Path,
    ) -> CommandSpec {
        let (width, height) = job.resolution_area;
        let mut args = vec![
            display(&self.preprocess_script),
            "--ckpt_path".into(),
            self.preprocess_ckpt_path.clone(),
            "--video_path".into(),
            display(video),
            "--refer_path".into(),
            display(refer),
            "--save_path".into(),
            display(save_dir),
            "--resolution_area".into(),
            width.to_string(),
            height.to_string(),
        ];

        match job.mode {
            PreprocessMode::Standard => {}
            PreprocessMode::Replace {
                iterations,
                k,
                w_len,
                h_len,
            } => args.extend([
                "--iterations".into(),
                iterations.to_string(),
                "--k".into(),
                k.to_string(),
                "--w_len".into(),
                w_len.to_string(),
                "--h_len".into(),
                h_len.to_string(),
                "--replace_flag".into(),
            ]),
            PreprocessMode::FluxRetarget => {
                args.extend(["--retarget_flag".into(), "--use_flux".into()])
            }
        }

        self.spec(args)
    }

    pub fn generate(&self, job: &GenerateJob, src_root: &Path, save_file: &Path) -> CommandSpec {
        let mut base = vec![
            display(&self.generate_script),
            "--task".into(),
            job.task.clone(),
            "--ckpt_dir".into(),
            self.inference_ckpt_path.clone(),
            "--src_root_path".into(),
            display(src_root),
            "--refert_num".into(),
            job.refert_num.to_string(),
            "--save_file".into(),
            display(save_file),
        ];
        if job.replace {
            base.extend(["--replace_flag".into(), "--use_relighting_lora".into()]);
        }

        let args = match job.launch {
            Launch::Single => base,
            Launch::Distributed {
                nnodes,
                nproc_per_node,
                ulysses_size,
            } => {
                let mut args: Args = vec![
                    "-m".into(),
                    "torch.distributed.run".into(),
                    "--nnodes".into(),
                    nnodes.to_string(),
                    "--nproc_per_node".into(),
                    nproc_per_node.to_string(),
                ];
                args.extend(base);
                args.extend([
                    "--dit_fsdp".into(),
                    "--t5_fsdp".into(),
                    "--ulysses_size".into(),
                    ulysses_size.to_string(),
                ]);
                args
            }
        };

        self.spec(args)
    }

    fn spec(&self, args: Args) -> CommandSpec {
        CommandSpec {
            program: display(&self.python),
            args,
            envs: shape_env(
                &self.project_root,
                &self.python,
                self.inherited_pythonpath.as_deref(),
            ),
            dir: self.project_root.clone(),
        }
    }
}

/// Environment overrides for a script run: the project root joins the module search path (once),
/// and the interpreter variable is pinned so a nested distributed launcher starts the same
/// interpreter.
pub fn shape_env(project_root: &Path, python: &Path, inherited_pythonpath: Option<&str>) -> Envs {
    let root = display(project_root);
    let inherited = inherited_pythonpath.unwrap_or_default();
    let present = inherited
        .split(SEARCH_PATH_SEPARATOR)
        .any(|entry| entry == root);

    let search_path = if present {
        inherited.to_string()
    } else {
        std::iter::once(root.as_str())
            .chain(inherited.split(SEARCH_PATH_SEPARATOR))
            .filter(|entry| !entry.is_empty())
            .collect::<Vec<_>>()
            .join(SEARCH_PATH_SEPARATOR)
    };

    Envs::from([
        (SEARCH_PATH_VAR.to_string(), search_path),
        (INTERPRETER_VAR.to_string(), display(python)),
    ])
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
