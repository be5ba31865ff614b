//! Run orchestration.
//!
//! ```text
//!  reader thread                    worker pool                calling thread
//!  lines -> segment -> submit ───> transform(block) ───┐
//!              │                                       │
//!              └─ handle ─> [ delivery queue ] ─> wait ┴─> sink.add ... commit
//! ```
//!
//! The reader thread is the only one touching the source. Result handles
//! travel through the delivery queue in submission order, so the sink sees
//! documents in source order no matter which worker finished first. Both
//! queues are bounded: a slow sink stalls the reader through the delivery
//! queue, slow workers stall it through the admission queue.

use std::fmt;
use std::io::BufRead;
use std::ops::AddAssign;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Sender, bounded};
use log::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::dispatch::DispatchTable;
use crate::document::Document;
use crate::error::{AdmissionError, ConfigError, PipelineError, RecordError, Result};
use crate::lookup::AuthorityLookup;
use crate::pool::{Interrupt, ResultHandle, ShutdownOutcome, WorkerPool};
use crate::segment::{Delimiters, segment};
use crate::sink::DocumentSink;
use crate::transform::RecordTransformer;

type Outcome = std::result::Result<Document, RecordError>;

/// A submitted block waiting for delivery.
struct Pending {
    line: usize,
    handle: ResultHandle<Outcome>,
}

/// Counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Blocks segmented and delivered.
    pub blocks: usize,
    /// Documents handed to the sink.
    pub emitted: usize,
    /// Blocks dropped by validation.
    pub rejected: usize,
    /// Blocks with broken markup.
    pub malformed: usize,
    /// Transformations that panicked or were abandoned.
    pub failed: usize,
    /// Documents the sink refused.
    pub sink_errors: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} blocks: {} emitted, {} rejected, {} malformed, {} failed, {} sink errors",
            self.blocks, self.emitted, self.rejected, self.malformed, self.failed, self.sink_errors
        )
    }
}

impl AddAssign for RunSummary {
    fn add_assign(&mut self, other: Self) {
        self.blocks += other.blocks;
        self.emitted += other.emitted;
        self.rejected += other.rejected;
        self.malformed += other.malformed;
        self.failed += other.failed;
        self.sink_errors += other.sink_errors;
    }
}

/// A configured ingestion pipeline. One instance can run several sources
/// one after another.
pub struct Pipeline {
    config: PipelineConfig,
    delimiters: Delimiters,
    transformer: RecordTransformer,
    interrupt: Interrupt,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, table: DispatchTable) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let delimiters = config.delimiters()?;
        let transformer =
            RecordTransformer::new(Arc::new(table)).keep_full_record(config.keep_full_record);
        Ok(Self {
            config,
            delimiters,
            transformer,
            interrupt: Interrupt::new(),
        })
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn AuthorityLookup>) -> Self {
        self.transformer = self.transformer.with_lookup(lookup);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token that stops a running ingest. Raising it makes the reader stop
    /// submitting and turns the final pool shutdown into a hard stop. It is
    /// only ever raised by the caller; a run aborted on a task failure uses
    /// its own stop token.
    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Ingest every record of `reader` into `sink`.
    ///
    /// Per-record problems are counted in the summary. Reading errors,
    /// interrupts, commit failures and (if configured) task failures end
    /// the run with an error once the blocks already submitted have been
    /// delivered; the sink is only committed after a clean run.
    pub fn run<R, S>(&self, reader: R, sink: &mut S) -> Result<RunSummary>
    where
        R: BufRead + Send,
        S: DocumentSink + ?Sized,
    {
        let workers = self.config.effective_workers();
        let pool = WorkerPool::new(
            self.config.pool_name.as_str(),
            workers,
            self.config.admission_capacity,
        )?
        .with_interrupt(self.interrupt.clone())
        .with_log_interval(self.config.shutdown_log_interval());
        info!(
            "{}: ingesting with {workers} workers, admission capacity {}",
            self.config.pool_name, self.config.admission_capacity
        );

        let (delivery_tx, delivery_rx) = bounded::<Pending>(self.config.delivery_capacity);
        // stops this run's reader after a fatal delivery
        let stop = Interrupt::new();

        let (summary, fatal, read_result) = thread::scope(|scope| -> Result<_> {
            let pool = &pool;
            let stop_reader = stop.clone();
            let reader_thread = thread::Builder::new()
                .name(format!("{}-reader", self.config.pool_name))
                .spawn_scoped(scope, move || {
                    self.read(reader, pool, delivery_tx, &stop_reader)
                })?;

            let mut summary = RunSummary::default();
            let mut fatal = None;
            for pending in delivery_rx.iter() {
                summary.blocks += 1;
                if let Err(e) = self.deliver(pending, sink, &mut summary)
                    && fatal.is_none()
                {
                    warn!(
                        "{}: {e}; delivering blocks already submitted, then stopping",
                        self.config.pool_name
                    );
                    fatal = Some(e);
                    stop.raise();
                }
                let interval = self.config.progress_interval;
                if interval > 0 && summary.blocks % interval == 0 {
                    info!("{}: {summary}", self.config.pool_name);
                }
            }

            let read_result = reader_thread
                .join()
                .map_err(|_| PipelineError::ReaderPanicked)?;
            Ok((summary, fatal, read_result))
        })?;

        match pool.shutdown() {
            ShutdownOutcome::Interrupted { abandoned } => {
                warn!("{}: {abandoned} queued records abandoned", self.config.pool_name)
            }
            ShutdownOutcome::Completed | ShutdownOutcome::AlreadyShutDown => {}
        }

        info!("{}: {summary}", self.config.pool_name);
        if let Some(e) = fatal {
            return Err(e);
        }
        let lines = read_result?;
        sink.commit()?;
        debug!("{}: {lines} lines read, sink committed", self.config.pool_name);
        Ok(summary)
    }

    /// Reader thread body: segment the source and submit one task per block.
    fn read<R: BufRead>(
        &self,
        reader: R,
        pool: &WorkerPool<Outcome>,
        delivery: Sender<Pending>,
        stop: &Interrupt,
    ) -> Result<usize> {
        let mut io_error = None;
        let lines = reader.lines().map_while(|line| match line {
            Ok(line) => Some(line),
            Err(e) => {
                io_error = Some(e);
                None
            }
        });
        let mut blocks = segment(
            lines,
            |line| self.delimiters.is_start(line),
            |line| self.delimiters.is_end(line),
        )
        .with_trailing(self.config.trailing_block);

        while let Some(block) = blocks.next() {
            if self.interrupt.is_raised() {
                return Err(PipelineError::Interrupted);
            }
            let line = block.first_line();
            if stop.is_raised() {
                debug!("run aborted, reader exits before line {line}");
                return Ok(blocks.lines_read());
            }
            let transformer = self.transformer.clone();
            let handle = pool
                .submit(move || transformer.transform(&block))
                .map_err(|e| match e {
                    AdmissionError::Interrupted(_) => PipelineError::Interrupted,
                    other => other.into(),
                })?;
            if delivery.send(Pending { line, handle }).is_err() {
                debug!("delivery stopped, reader exits at line {line}");
                return Ok(blocks.lines_read());
            }
        }
        let lines = blocks.lines_read();
        drop(blocks);

        match io_error {
            Some(e) => {
                error!("read error after line {lines}: {e}");
                Err(e.into())
            }
            None => Ok(lines),
        }
    }

    /// Wait for one result and hand it to the sink. Only a task failure
    /// under `abort_on_task_failure` is returned as an error.
    fn deliver<S: DocumentSink + ?Sized>(
        &self,
        pending: Pending,
        sink: &mut S,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let Pending { line, handle } = pending;
        match handle.wait() {
            Ok(Ok(doc)) => match sink.add(doc) {
                Ok(()) => summary.emitted += 1,
                Err(e) => {
                    warn!("record at line {line} not stored: {e}");
                    summary.sink_errors += 1;
                }
            },
            Ok(Err(RecordError::Validation(e))) => {
                warn!("record at line {line} rejected: {e}");
                summary.rejected += 1;
            }
            Ok(Err(e)) => {
                warn!("{e}");
                summary.malformed += 1;
            }
            Err(e) => {
                error!("record at line {line} failed: {e}");
                summary.failed += 1;
                if self.config.abort_on_task_failure {
                    return Err(PipelineError::Task { line, source: e });
                }
            }
        }
        Ok(())
    }
}
