use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;

use crate::bag::{BagReader, Connection, Record};
use crate::decoder;
use crate::shared::constants::PARALLEL_BATCH_SIZE;

/// Bag traversal shared by every extractor: open, filter connections, walk records.
pub struct BaseExtractor {
    bag_path: PathBuf,
    cores: usize,
}

impl BaseExtractor {
    pub fn new<P: Into<PathBuf>>(bag_path: P, cores: usize) -> Self {
        Self {
            bag_path: bag_path.into(),
            cores: cores.max(1),
        }
    }

    pub fn cores(&self) -> usize {
        self.cores
    }

    pub fn open(&self) -> Result<BagReader> {
        BagReader::open(&self.bag_path).with_context(|| format!("failed to open bag {}", self.bag_path.display()))
    }

    /// Accepts connections whose topic is one of `topics`.
    pub fn topics_filter<S: AsRef<str>>(topics: &[S]) -> impl Fn(&Connection) -> bool + Send + Sync + Clone {
        let topics: HashSet<String> = topics.iter().map(|t| t.as_ref().to_string()).collect();
        move |connection: &Connection| topics.contains(&connection.topic)
    }

    /// `action` applied to every selected record, in bag order.
    pub fn loop_records<F, A, T>(&self, filter: F, mut action: A) -> Result<Vec<T>>
    where
        F: Fn(&Connection) -> bool,
        A: FnMut(&Record<'_>) -> Result<T>,
    {
        let reader = self.open()?;
        let mut results = Vec::new();
        for record in reader.messages(filter) {
            results.push(action(&record?)?);
        }
        Ok(results)
    }

    /// Like `loop_records`, but `action` runs on a pool of `cores` threads.
    pub fn loop_parallel<F, A, T>(&self, filter: F, action: A) -> Result<Vec<T>>
    where
        F: Fn(&Connection) -> bool,
        A: Fn(&Record<'_>) -> Result<T> + Sync,
        T: Send,
    {
        let mut results = Vec::new();
        self.for_each_parallel_batch(filter, action, |batch| {
            results.extend(batch);
            Ok(())
        })?;
        Ok(results)
    }

    /// Holds at most `PARALLEL_BATCH_SIZE` records at a time; `sink` sees results in bag order.
    pub fn for_each_parallel_batch<F, A, T, S>(&self, filter: F, action: A, mut sink: S) -> Result<()>
    where
        F: Fn(&Connection) -> bool,
        A: Fn(&Record<'_>) -> Result<T> + Sync,
        T: Send,
        S: FnMut(Vec<T>) -> Result<()>,
    {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(self.cores).build()?;
        let reader = self.open()?;
        let mut records = reader.messages(filter);

        loop {
            let batch = records
                .by_ref()
                .take(PARALLEL_BATCH_SIZE)
                .collect::<Result<Vec<_>, _>>()?;
            if batch.is_empty() {
                return Ok(());
            }
            let mapped = pool.install(|| batch.par_iter().map(|record| action(record)).collect::<Result<Vec<T>>>())?;
            sink(mapped)?;
        }
    }

    pub fn get_timestamps<F>(&self, filter: F) -> Result<Vec<(String, u64)>>
    where
        F: Fn(&Connection) -> bool,
    {
        let stamp = |record: &Record<'_>| -> Result<(String, u64)> {
            Ok((record.connection.topic.clone(), record.timestamp))
        };
        if self.cores > 1 {
            self.loop_parallel(filter, stamp)
        } else {
            self.loop_records(filter, stamp)
        }
    }

    pub fn get_connections(&self) -> Result<Vec<Connection>> {
        Ok(self.open()?.connections().iter().map(|c| c.as_ref().clone()).collect())
    }

    pub fn get_topics(&self) -> Result<Vec<String>> {
        Ok(self.open()?.topics())
    }

    pub fn print_topics(&self) -> Result<()> {
        let topics = self.get_topics()?;
        println!("Topics in the Bag are : ");
        for topic in topics {
            println!("{}", topic);
        }
        Ok(())
    }

    pub fn write_info<W: Write>(&self, out: &mut W) -> Result<()> {
        let reader = self.open()?;
        writeln!(out, "General Info: \n Topic \t| msgtype \t| msg_count \t")?;
        for connection in reader.connections() {
            writeln!(out, "{}", Self::connection_info(connection))?;
        }
        Ok(())
    }

    pub fn print_info(&self) -> Result<()> {
        self.write_info(&mut std::io::stdout().lock())
    }

    pub fn connection_info(connection: &Connection) -> String {
        format!("{}|{}|{}", connection.topic, connection.msgtype, connection.msgcount)
    }

    /// One line per selected record, summaries decoded on the pool.
    pub fn write_messages<F, W>(&self, filter: F, out: &mut W) -> Result<()>
    where
        F: Fn(&Connection) -> bool,
        W: Write,
    {
        self.for_each_parallel_batch(
            filter,
            |record| {
                let summary = decoder::summarize(&record.data, &record.connection.msgtype)
                    .with_context(|| format!("{} record at {}", record.connection.topic, record.timestamp))?;
                Ok(format!("topic : {}| msg : {}|", record.connection.topic, summary))
            },
            |lines| {
                for line in lines {
                    writeln!(out, "{}", line)?;
                }
                Ok(())
            },
        )
    }

    pub fn print_messages<F>(&self, filter: F) -> Result<()>
    where
        F: Fn(&Connection) -> bool,
    {
        self.write_messages(filter, &mut std::io::stdout().lock())
    }
}
