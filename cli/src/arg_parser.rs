use clap::{Parser, Subcommand};

/// Submit jobs to a running media gateway
#[derive(Debug, Parser)]
#[clap(version)]
pub struct ArgParser {
    /// Base URL of the gateway, e.g. http://localhost:8000
    #[clap(
        short = 's',
        long = "server",
        env = "GATEWAY_URL",
        default_value = "http://localhost:8000"
    )]
    pub server: String,
    /// The sub-command to use
    #[clap(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
pub enum SubCommand {
    /// extract pose and face data from a driving video and a reference image
    Preprocess {
        #[clap(long)]
        /// remote URI of the driving video
        video_path: String,

        #[clap(long)]
        /// remote URI of the reference image
        refer_path: String,

        #[clap(long, number_of_values = 2, required = true)]
        /// target resolution area as WIDTH HEIGHT
        resolution_area: Vec<u32>,

        #[clap(long = "retarget")]
        retarget_flag: bool,

        #[clap(long)]
        /// requires --retarget
        use_flux: bool,

        #[clap(long = "replace")]
        /// requires --iterations, --k, --w-len and --h-len
        replace_flag: bool,

        #[clap(long)]
        iterations: Option<u32>,
        #[clap(long)]
        k: Option<u32>,
        #[clap(long)]
        w_len: Option<u32>,
        #[clap(long)]
        h_len: Option<u32>,
    },
    /// render a video from preprocessed source data
    Generate {
        #[clap(long)]
        /// task name, e.g. animate-14B
        task: String,

        #[clap(long)]
        /// remote URI of the folder produced by preprocessing
        src_root_path: String,

        #[clap(long, default_value = "1")]
        refert_num: u32,

        #[clap(long = "replace")]
        /// requires --use-relighting-lora
        replace_flag: bool,

        #[clap(long)]
        use_relighting_lora: bool,

        #[clap(long, default_value = "1")]
        /// more than one requires --dit-fsdp, --t5-fsdp and --ulysses-size
        nproc_per_node: u32,

        #[clap(long, default_value = "1")]
        nnodes: u32,

        #[clap(long)]
        dit_fsdp: bool,

        #[clap(long)]
        t5_fsdp: bool,

        #[clap(long)]
        ulysses_size: Option<u32>,
    },
    /// check whether the gateway is up and whether it is running a job
    Health,
}

/// A job submission ready to be sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    Preprocess(wire::PreprocessRequest),
    Generate(wire::GenerateRequest),
}

impl SubCommand {
    /// The request body for job sub-commands; `None` for `health`.
    pub fn submission(self) -> Option<Submission> {
        match self {
            SubCommand::Preprocess {
                video_path,
                refer_path,
                resolution_area,
                retarget_flag,
                use_flux,
                replace_flag,
                iterations,
                k,
                w_len,
                h_len,
            } => Some(Submission::Preprocess(wire::PreprocessRequest {
                video_path,
                refer_path,
                resolution_area,
                retarget_flag,
                use_flux,
                iterations,
                k,
                w_len,
                h_len,
                replace_flag,
            })),
            SubCommand::Generate {
                task,
                src_root_path,
                refert_num,
                replace_flag,
                use_relighting_lora,
                nproc_per_node,
                nnodes,
                dit_fsdp,
                t5_fsdp,
                ulysses_size,
            } => Some(Submission::Generate(wire::GenerateRequest {
                task,
                src_root_path,
                refert_num,
                replace_flag,
                use_relighting_lora,
                nproc_per_node,
                nnodes,
                dit_fsdp,
                t5_fsdp,
                ulysses_size,
            })),
            SubCommand::Health => None,
        }
    }
}
