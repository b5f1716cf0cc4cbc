//! Single-consumer fusion worker
//!
//! GPS and IMU drivers usually run on their own threads. The estimator is
//! not synchronized, so every producer sends into one channel and a single
//! worker thread owns the estimator and calls `update()` in arrival order.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::error::{FusionError, FusionResult};
use crate::estimator::{Estimator, FusionOutput};
use crate::types::{GpsFix, ImuReading};

/// Default capacity of the output channel
pub const DEFAULT_OUTPUT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum PipelineCommand {
    Fix(GpsFix),
    Reading(ImuReading),
    StartInitialization,
    Shutdown,
}

/// Cloneable producer side; hand one to each driver thread.
#[derive(Clone, Debug)]
pub struct PipelineHandle {
    tx: Sender<PipelineCommand>,
}

impl PipelineHandle {
    pub fn send_fix(&self, fix: GpsFix) -> FusionResult<()> {
        self.send(PipelineCommand::Fix(fix))
    }

    pub fn send_reading(&self, reading: ImuReading) -> FusionResult<()> {
        self.send(PipelineCommand::Reading(reading))
    }

    pub fn start_initialization(&self) -> FusionResult<()> {
        self.send(PipelineCommand::StartInitialization)
    }

    fn send(&self, cmd: PipelineCommand) -> FusionResult<()> {
        self.tx.send(cmd).map_err(|_| FusionError::PipelineClosed)
    }
}

pub struct FusionPipeline {
    handle: PipelineHandle,
    outputs: Receiver<FusionOutput>,
    worker: Option<JoinHandle<Estimator>>,
}

impl FusionPipeline {
    /// Move `estimator` onto a worker thread.
    pub fn spawn(estimator: Estimator) -> Self {
        Self::spawn_with_capacity(estimator, DEFAULT_OUTPUT_CAPACITY)
    }

    pub fn spawn_with_capacity(estimator: Estimator, output_capacity: usize) -> Self {
        let (cmd_tx, cmd_rx) = channel::unbounded::<PipelineCommand>();
        let (out_tx, out_rx) = channel::bounded::<FusionOutput>(output_capacity.max(1));

        let worker = thread::spawn(move || run_worker(estimator, cmd_rx, out_tx));

        Self {
            handle: PipelineHandle { tx: cmd_tx },
            outputs: out_rx,
            worker: Some(worker),
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Fused snapshots in update order.
    pub fn outputs(&self) -> &Receiver<FusionOutput> {
        &self.outputs
    }

    /// Drain queued commands, stop the worker and hand the estimator back.
    pub fn shutdown(mut self) -> FusionResult<Estimator> {
        self.stop().ok_or(FusionError::PipelineClosed)
    }

    fn stop(&mut self) -> Option<Estimator> {
        let worker = self.worker.take()?;
        // The worker may already be gone; joining reports that.
        let _ = self.handle.tx.send(PipelineCommand::Shutdown);
        match worker.join() {
            Ok(estimator) => Some(estimator),
            Err(_) => {
                log::error!("Fusion worker panicked");
                None
            }
        }
    }
}

impl Drop for FusionPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    mut estimator: Estimator,
    commands: Receiver<PipelineCommand>,
    outputs: Sender<FusionOutput>,
) -> Estimator {
    let mut dropped = 0u64;

    for cmd in commands.iter() {
        let output = match cmd {
            PipelineCommand::Fix(fix) => estimator.update(Some(&fix), None),
            PipelineCommand::Reading(reading) => estimator.update(None, Some(&reading)),
            PipelineCommand::StartInitialization => {
                estimator.start_initialization();
                None
            }
            PipelineCommand::Shutdown => break,
        };

        let Some(output) = output else {
            continue;
        };
        match outputs.try_send(output) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // Never block the fusion loop on a slow consumer
                dropped += 1;
                log::debug!("Output channel full, dropped {} snapshots", dropped);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    log::info!("Fusion worker stopped ({} outputs dropped)", dropped);
    estimator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationState;
    use crate::clock::ManualClock;
    use crate::config::FusionConfig;

    #[test]
    fn test_pipeline_processes_in_order() {
        let clock = ManualClock::new(50.0);
        let estimator = Estimator::with_clock(FusionConfig::default(), clock).unwrap();
        let pipeline = FusionPipeline::spawn(estimator);
        let handle = pipeline.handle();

        handle.send_fix(GpsFix::new(50.0, 34.0, -118.0, 0.0, 0.0)).unwrap();
        handle.send_fix(GpsFix::new(50.0, 34.0001, -118.0, 1.0, 0.0)).unwrap();

        let first = pipeline.outputs().recv().unwrap();
        let second = pipeline.outputs().recv().unwrap();
        assert_eq!(first.position, (0.0, 0.0, 0.0));
        assert!(second.position.1 > 0.0);

        let estimator = pipeline.shutdown().unwrap();
        assert_eq!(estimator.get_status().gps_updates, 2);
    }

    #[test]
    fn test_multiple_producers() {
        let clock = ManualClock::new(0.0);
        let config = FusionConfig {
            init_duration_secs: 0.0,
            ..FusionConfig::default()
        };
        let estimator = Estimator::with_clock(config, clock).unwrap();
        let pipeline = FusionPipeline::spawn(estimator);

        pipeline.handle().start_initialization().unwrap();
        pipeline
            .handle()
            .send_fix(GpsFix::new(0.0, 10.0, 10.0, 0.0, 0.0))
            .unwrap();

        let gps = pipeline.handle();
        let imu = pipeline.handle();
        let gps_thread = thread::spawn(move || {
            for _ in 0..5 {
                gps.send_fix(GpsFix::new(0.0, 10.0, 10.0, 0.0, 0.0)).unwrap();
            }
        });
        let imu_thread = thread::spawn(move || {
            for _ in 0..5 {
                imu.send_reading(ImuReading::new(0.0, (0.5, 0.0, 0.0), (0.0, 0.0, 0.0)))
                    .unwrap();
            }
        });
        gps_thread.join().unwrap();
        imu_thread.join().unwrap();

        let estimator = pipeline.shutdown().unwrap();
        let status = estimator.get_status();
        assert_eq!(status.gps_updates, 6);
        assert_eq!(status.state, CalibrationState::Active);
        assert_eq!(status.imu_predictions, 5);
    }

    #[test]
    fn test_send_after_shutdown_fails() {
        let estimator = Estimator::with_clock(FusionConfig::default(), ManualClock::new(0.0)).unwrap();
        let pipeline = FusionPipeline::spawn(estimator);
        let handle = pipeline.handle();
        pipeline.shutdown().unwrap();

        assert_eq!(
            handle.send_fix(GpsFix::new(0.0, 1.0, 1.0, 0.0, 0.0)),
            Err(FusionError::PipelineClosed)
        );
        assert_eq!(handle.start_initialization(), Err(FusionError::PipelineClosed));
    }

    #[test]
    fn test_full_output_channel_does_not_block() {
        let clock = ManualClock::new(0.0);
        let estimator = Estimator::with_clock(FusionConfig::default(), clock).unwrap();
        let pipeline = FusionPipeline::spawn_with_capacity(estimator, 1);
        let handle = pipeline.handle();

        for _ in 0..10 {
            handle.send_fix(GpsFix::new(0.0, 1.0, 1.0, 0.0, 0.0)).unwrap();
        }

        let estimator = pipeline.shutdown().unwrap();
        assert_eq!(estimator.get_status().gps_updates, 10);
    }
}
