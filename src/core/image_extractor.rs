use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tqdm::tqdm;

use super::extractor::BaseExtractor;
use super::job::{ExtractionJob, ExtractionSummary, NamingScheme};
use super::write_pool::WritePool;
use crate::bag::{BagError, Record};
use crate::decoder::{self, ImageMessage, MessageKind};
use crate::shared::constants;
use crate::utils::file_utils;
use crate::utils::time_utils::Timer;

/// One record on its way from the bag reader to a writer thread.
struct FrameJob {
    topic: String,
    msgtype: String,
    timestamp: u64,
    target_dir: Arc<PathBuf>,
    payload: Vec<u8>,
}

#[derive(Default)]
struct Counters {
    written: AtomicU64,
    skipped: AtomicU64,
    per_topic: Mutex<BTreeMap<String, u64>>,
    /// Files named by header stamp so far in this run.
    claimed: Mutex<HashSet<PathBuf>>,
}

impl Counters {
    fn record_written(&self, topic: &str) {
        self.written.fetch_add(1, Ordering::SeqCst);
        let mut per_topic = match self.per_topic.lock() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        };
        *per_topic.entry(topic.to_string()).or_insert(0) += 1;
    }

    fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    /// False when another frame of this run already took `path`.
    fn claim(&self, path: &Path) -> bool {
        let mut claimed = match self.claimed.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        claimed.insert(path.to_path_buf())
    }
}

/// Decodes image topics of a bag into `<img_save_path>/<sanitized topic>/<timestamp>.png`.
pub struct ImageExtractor {
    base: BaseExtractor,
    img_save_path: PathBuf,
    skip_existing: bool,
    naming: NamingScheme,
    cancel: Arc<AtomicBool>,
    show_progress: bool,
}

impl ImageExtractor {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(ros_bag: P, cores: usize, img_save_path: Q) -> Result<Self> {
        let img_save_path = img_save_path.into();
        file_utils::ensure_dir(&img_save_path)?;
        Ok(Self {
            base: BaseExtractor::new(ros_bag, cores),
            img_save_path,
            skip_existing: false,
            naming: NamingScheme::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            show_progress: std::io::stdout().is_terminal(),
        })
    }

    pub fn from_job(job: &ExtractionJob) -> Result<Self> {
        Ok(Self::new(&job.bag, job.cores, &job.output_dir)?
            .skip_existing(job.skip_existing)
            .naming(job.naming))
    }

    /// Leave frames whose file already exists untouched, so an interrupted run can continue.
    pub fn skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    pub fn naming(mut self, naming: NamingScheme) -> Self {
        self.naming = naming;
        self
    }

    /// Setting the flag stops reading new records; queued frames are still written.
    pub fn cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn extract<S: AsRef<str>>(&self, topics: &[S]) -> Result<ExtractionSummary> {
        let timer = Timer::new();

        let mut topic_dict: HashMap<String, Arc<PathBuf>> = HashMap::new();
        for topic in topics {
            let topic = topic.as_ref();
            let dir = file_utils::topic_dir(&self.img_save_path, topic);
            file_utils::ensure_dir(&dir)?;
            topic_dict.insert(topic.to_string(), Arc::new(dir));
        }

        let reader = self.base.open()?;
        let bag_topics = reader.topics();
        for topic in topic_dict.keys() {
            if !bag_topics.contains(topic) {
                crate::utils::logger::warn(&format!("topic {} is not in {}", topic, reader.path().display()));
            }
        }

        let filter = BaseExtractor::topics_filter(topics);
        let unsupported: Vec<String> = reader
            .connections()
            .iter()
            .filter(|c| filter(c))
            .filter(|c| {
                !MessageKind::from_msgtype(&c.msgtype).is_image() || c.message_encoding != constants::CDR_ENCODING
            })
            .map(|c| format!("{} ({}, {})", c.topic, c.msgtype, c.message_encoding))
            .collect();
        if !unsupported.is_empty() {
            bail!("cannot extract images from: {}", unsupported.join(", "));
        }

        let total = reader.message_count(&filter);
        crate::utils::logger::info(&format!(
            "extracting {} record(s) from {} topic(s) of {} with {} writer(s)",
            total,
            topic_dict.len(),
            reader.path().display(),
            self.base.cores()
        ));

        let counters = Counters::default();
        let interrupted = AtomicBool::new(false);
        let pool = WritePool::new(self.base.cores());

        pool.run(
            |feeder| {
                let records = reader.messages(&filter);
                let iter: Box<dyn Iterator<Item = Result<Record<'_>, BagError>> + '_> = if self.show_progress {
                    Box::new(
                        tqdm(records)
                            .desc(Some("Extracting frames"))
                            .total(Some(total as usize)),
                    )
                } else {
                    Box::new(records)
                };

                let mut last_perc = 0.0;
                for (ctr, record) in iter.enumerate() {
                    if self.cancel.load(Ordering::SeqCst) {
                        interrupted.store(true, Ordering::SeqCst);
                        break;
                    }
                    if !self.show_progress && total > 0 {
                        let perc = (10.0 * (ctr as f64 / total as f64)).floor();
                        if perc != last_perc {
                            crate::utils::logger::info(&format!("Reached {}0 %", perc));
                            last_perc = perc;
                        }
                    }

                    let record = record?;
                    let target_dir = topic_dict
                        .get(&record.connection.topic)
                        .with_context(|| format!("no output directory for {}", record.connection.topic))?;

                    if self.skip_existing
                        && self.naming == NamingScheme::LogTime
                        && file_utils::frame_path(target_dir, record.timestamp).exists()
                    {
                        counters.record_skipped();
                        continue;
                    }

                    let job = FrameJob {
                        topic: record.connection.topic.clone(),
                        msgtype: record.connection.msgtype.clone(),
                        timestamp: record.timestamp,
                        target_dir: Arc::clone(target_dir),
                        payload: record.data.into_owned(),
                    };
                    if !feeder.send(job) {
                        break;
                    }
                }
                Ok(())
            },
            |job| self.write_frame(job, &counters),
        )?;

        let per_topic = match counters.per_topic.into_inner() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        };
        let summary = ExtractionSummary {
            output_dir: self.img_save_path.clone(),
            written: counters.written.load(Ordering::SeqCst),
            skipped: counters.skipped.load(Ordering::SeqCst),
            per_topic,
            elapsed_secs: timer.elapsed().as_secs_f64(),
        };

        if interrupted.load(Ordering::SeqCst) {
            bail!(
                "extraction interrupted after {} frame(s); rerun with --skip-existing to resume",
                summary.written
            );
        }

        crate::utils::logger::info(&format!(
            "wrote {} frame(s), skipped {} in {:.2}s",
            summary.written, summary.skipped, summary.elapsed_secs
        ));
        Ok(summary)
    }

    fn write_frame(&self, job: FrameJob, counters: &Counters) -> Result<()> {
        let context = || format!("{} record at {}", job.topic, job.timestamp);

        match self.naming {
            NamingScheme::LogTime => {
                let file_name = file_utils::frame_path(&job.target_dir, job.timestamp);
                Self::save_img(&job.payload, &job.msgtype, &file_name).with_context(context)?;
            }
            NamingScheme::HeaderStamp => {
                let message = ImageMessage::from_cdr(&job.payload, &job.msgtype).with_context(context)?;
                let file_name = file_utils::frame_path(&job.target_dir, message.header_stamp_ns());
                // header stamps can repeat; only the first frame to claim a name is written
                if !counters.claim(&file_name) {
                    crate::utils::logger::warn(&format!(
                        "{}: header stamp {} already written in this run, frame dropped",
                        context(),
                        message.header_stamp_ns()
                    ));
                    counters.record_skipped();
                    return Ok(());
                }
                if self.skip_existing && file_name.exists() {
                    counters.record_skipped();
                    return Ok(());
                }
                let mat = message.to_mat().with_context(context)?;
                decoder::write_png(&file_name, &mat).with_context(context)?;
            }
        }

        counters.record_written(&job.topic);
        Ok(())
    }

    /// Decodes one serialized image message and writes it as `file_name`.
    pub fn save_img(raw: &[u8], msgtype: &str, file_name: &Path) -> Result<()> {
        let img_data = decoder::decode(raw, msgtype)?;
        decoder::write_png(file_name, &img_data)
    }
}
