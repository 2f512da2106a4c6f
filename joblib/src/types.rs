use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

pub type Program = String;
pub type Args = Vec<String>;
pub type Dir = PathBuf;
pub type Envs = HashMap<String, String>;
pub type JobId = Uuid;
pub type OutputLine = String;
