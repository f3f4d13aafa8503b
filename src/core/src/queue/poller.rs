use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::error_handling::types::PipelineError;
use crate::pipeline::prediction::PredictionPipeline;
use crate::queue::types::{CallbackPayload, MessageQueue, Notifier, QueueMessage, ReceivedMessage};

#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    pub max_messages: usize,
    pub wait: Duration,
    /// Pause after a receive that returned nothing
    pub idle_delay: Duration,
    /// Pause after an iteration with any failure
    pub error_delay: Duration,
    /// Pause between publishing the annotated image and the callback
    pub notify_delay: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_messages: 5,
            wait: Duration::from_secs(20),
            idle_delay: Duration::from_secs(1),
            error_delay: Duration::from_secs(5),
            notify_delay: Duration::from_millis(1500),
        }
    }
}

/// What one receive-and-process iteration did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub received: usize,
    pub processed: usize,
    pub failed: usize,
}

pub struct QueuePoller {
    queue: Arc<dyn MessageQueue>,
    notifier: Arc<dyn Notifier>,
    pipeline: Arc<PredictionPipeline>,
    settings: PollSettings,
}

impl QueuePoller {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        notifier: Arc<dyn Notifier>,
        pipeline: Arc<PredictionPipeline>,
        settings: PollSettings,
    ) -> Self {
        Self {
            queue,
            notifier,
            pipeline,
            settings,
        }
    }

    /// Receives one batch and processes every message of it.
    ///
    /// A message is deleted only after its prediction is stored and
    /// published; a failed one stays on the queue for redelivery. A failed
    /// callback does not keep the message.
    pub fn poll_once(&self) -> Result<PollReport, PipelineError> {
        let messages = self
            .queue
            .receive(self.settings.max_messages, self.settings.wait)?;
        let mut report = PollReport {
            received: messages.len(),
            ..Default::default()
        };

        for message in &messages {
            match self.handle(message) {
                Ok(()) => report.processed += 1,
                Err(e) => {
                    error!("Queue message {} failed: {}", message.receipt_handle, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    fn handle(&self, message: &ReceivedMessage) -> Result<(), PipelineError> {
        let request = QueueMessage::parse(&message.body)?;
        let summary = self.pipeline.run(&request.s3_key)?;

        if !self.settings.notify_delay.is_zero() {
            thread::sleep(self.settings.notify_delay);
        }
        let payload = CallbackPayload {
            uid: summary.prediction_uid,
            chat_id: request.chat_id,
            file_path: request.file_path,
            image_url: summary.published_key,
        };
        if let Err(e) = self.notifier.notify(&payload) {
            warn!("Callback for prediction {} failed: {}", payload.uid, e);
        }

        self.queue.delete(&message.receipt_handle)?;
        debug!("Deleted queue message {}", message.receipt_handle);
        Ok(())
    }

    /// Polls until `stop` is set.
    pub fn run(&self, stop: &AtomicBool) {
        info!("Queue poller started");
        while !stop.load(Ordering::SeqCst) {
            let pause = match self.poll_once() {
                Ok(report) if report.failed > 0 => self.settings.error_delay,
                Ok(report) if report.received == 0 => self.settings.idle_delay,
                Ok(_) => Duration::ZERO,
                Err(e) => {
                    error!("Queue polling error: {}", e);
                    self.settings.error_delay
                }
            };
            sleep_unless_stopped(pause, stop);
        }
        info!("Queue poller stopped");
    }

    /// Runs the poller on a dedicated thread.
    pub fn spawn(self: Arc<Self>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        thread::spawn(move || self.run(&stop))
    }
}

fn sleep_unless_stopped(pause: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + pause;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(100)));
    }
}
