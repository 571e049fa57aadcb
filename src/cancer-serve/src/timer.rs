use chrono::{DateTime, Duration, Utc};
use log::{debug, info};

/// Wall-clock timer for one pipeline stage; logs when started and stopped.
pub struct Timer {
    stage: String,
    started: Option<DateTime<Utc>>,
}

impl Timer {
    pub fn new(stage: &str) -> Self {
        Timer {
            stage: stage.to_owned(),
            started: None,
        }
    }

    pub fn new_start(stage: &str) -> Self {
        let mut t = Timer::new(stage);
        t.start();
        t
    }

    pub fn start(&mut self) {
        debug!("{}: starting", self.stage);

        self.started = Some(Utc::now());
    }

    /// Logs and returns the elapsed time, `None` if the timer was not running.
    pub fn stop(&mut self) -> Option<Duration> {
        let started = match self.started.take() {
            Some(started) => started,
            None => {
                debug!("{}: not running!", self.stage);
                return None;
            }
        };

        let d = Utc::now() - started;
        info!("{} duration: {} msec", self.stage, d.num_milliseconds());
        Some(d)
    }
}
