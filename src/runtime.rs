//! One worker thread per camera source, all feeding one shared sink.

use anyhow::{anyhow, Result};
use std::thread::JoinHandle;

use crate::config::KernelConfig;
use crate::ingest::{open_feed, DetectionFeed};
use crate::pipeline::{SourcePipeline, SourceStats, StopHandle};
use crate::sink::SharedAlertSink;

struct Worker {
    source_id: String,
    join: JoinHandle<Result<SourceStats>>,
}

/// Owns the per-source workers and their common stop signal.
pub struct MultiSourceRuntime {
    stop: StopHandle,
    workers: Vec<Worker>,
}

impl Default for MultiSourceRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiSourceRuntime {
    pub fn new() -> Self {
        Self {
            stop: StopHandle::new(),
            workers: Vec::new(),
        }
    }

    /// Open every configured source and start its worker.
    /// Any invalid source aborts startup before a thread is spawned.
    pub fn start(config: &KernelConfig, sink: SharedAlertSink) -> Result<Self> {
        config.validate()?;
        let mut prepared = Vec::with_capacity(config.sources.len());
        for source in &config.sources {
            let pipeline = SourcePipeline::new(&source.id, config)?;
            let feed = open_feed(&source.feed)?;
            prepared.push((pipeline, feed));
        }
        let mut runtime = Self::new();
        for (pipeline, feed) in prepared {
            runtime.spawn(pipeline, feed, sink.clone())?;
        }
        Ok(runtime)
    }

    /// Run `pipeline` on its own thread. The pipeline is bound to this runtime's stop signal.
    pub fn spawn(
        &mut self,
        pipeline: SourcePipeline,
        mut feed: Box<dyn DetectionFeed>,
        sink: SharedAlertSink,
    ) -> Result<()> {
        let source_id = pipeline.source_id().to_string();
        let pipeline = pipeline.with_stop(self.stop.clone());
        let join = std::thread::Builder::new()
            .name(format!("source-{}", source_id))
            .spawn(move || pipeline.run(feed.as_mut(), &sink))
            .map_err(|e| anyhow!("failed to spawn worker for {}: {}", source_id, e))?;
        log::info!("{}: worker started", source_id);
        self.workers.push(Worker { source_id, join });
        Ok(())
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn source_count(&self) -> usize {
        self.workers.len()
    }

    /// Raise the stop signal for every source.
    pub fn stop(&self) {
        log::info!("stopping {} source(s)", self.workers.len());
        self.stop.raise();
    }

    /// Wait for every worker. All workers are joined even if one fails;
    /// the first failure is returned.
    pub fn join(self) -> Result<Vec<(String, SourceStats)>> {
        let mut out = Vec::with_capacity(self.workers.len());
        let mut first_err = None;
        for worker in self.workers {
            match worker.join.join() {
                Ok(Ok(stats)) => out.push((worker.source_id, stats)),
                Ok(Err(e)) => {
                    log::error!("{}: worker failed: {}", worker.source_id, e);
                    first_err.get_or_insert(e);
                }
                Err(_) => {
                    let e = anyhow!("{}: worker thread panicked", worker.source_id);
                    log::error!("{}", e);
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceSettings;
    use crate::sink::InMemoryAlertSink;

    #[test]
    fn bad_feed_aborts_startup() {
        let mut cfg = KernelConfig::default();
        cfg.sources = vec![SourceSettings {
            id: "camera:a".to_string(),
            feed: "rtsp://10.0.0.9/live".to_string(),
        }];
        let sink = SharedAlertSink::new(InMemoryAlertSink::new());
        assert!(MultiSourceRuntime::start(&cfg, sink).is_err());
    }

    #[test]
    fn default_source_runs_to_completion() {
        let memory = InMemoryAlertSink::new();
        let runtime =
            MultiSourceRuntime::start(&KernelConfig::default(), SharedAlertSink::new(memory.clone()))
                .unwrap();
        assert_eq!(runtime.source_count(), 1);
        let results = runtime.join().unwrap();
        assert_eq!(results[0].0, "camera:front");
        assert_eq!(results[0].1.alerts, 1);
        assert_eq!(memory.len(), 2);
    }
}
