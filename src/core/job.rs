use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Which timestamp names a frame file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NamingScheme {
    /// Time the record was logged into the bag.
    #[default]
    LogTime,
    /// `header.stamp` of the image message.
    HeaderStamp,
}

fn default_cores() -> usize {
    num_cpus::get()
}

/// Everything needed to run one extraction, loadable from a JSON job file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionJob {
    pub bag: PathBuf,
    pub output_dir: PathBuf,
    pub topics: Vec<String>,
    #[serde(default = "default_cores")]
    pub cores: usize,
    #[serde(default)]
    pub skip_existing: bool,
    #[serde(default)]
    pub naming: NamingScheme,
}

/// Command line values that take precedence over a job file.
#[derive(Debug, Clone, Default)]
pub struct JobOverrides {
    pub bag: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub topics: Vec<String>,
    pub cores: Option<usize>,
    pub skip_existing: bool,
    pub naming: Option<NamingScheme>,
}

impl ExtractionJob {
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read job file {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("invalid job file {}", path.display()))
    }

    pub fn resolve(job_file: Option<&Path>, overrides: JobOverrides) -> Result<Self> {
        let mut job = match job_file {
            Some(path) => Self::load(path)?,
            None => Self {
                bag: overrides
                    .bag
                    .clone()
                    .context("--bag is required when no --job file is given")?,
                output_dir: overrides
                    .output_dir
                    .clone()
                    .context("--output-dir is required when no --job file is given")?,
                topics: Vec::new(),
                cores: default_cores(),
                skip_existing: false,
                naming: NamingScheme::default(),
            },
        };

        if let Some(bag) = overrides.bag {
            job.bag = bag;
        }
        if let Some(output_dir) = overrides.output_dir {
            job.output_dir = output_dir;
        }
        if !overrides.topics.is_empty() {
            job.topics = overrides.topics;
        }
        if let Some(cores) = overrides.cores {
            job.cores = cores;
        }
        if overrides.skip_existing {
            job.skip_existing = true;
        }
        if let Some(naming) = overrides.naming {
            job.naming = naming;
        }

        job.validate()?;
        Ok(job)
    }

    pub fn validate(&self) -> Result<()> {
        if self.topics.is_empty() {
            bail!("no topics selected for extraction");
        }
        if self.cores == 0 {
            bail!("cores must be at least 1");
        }
        Ok(())
    }
}

/// Outcome of `ImageExtractor::extract`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionSummary {
    pub output_dir: PathBuf,
    pub written: u64,
    pub skipped: u64,
    pub per_topic: BTreeMap<String, u64>,
    pub elapsed_secs: f64,
}
