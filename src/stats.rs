use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CommandStats {
    pub frames: u64,
    pub samples: u64,
    pub bytes: u64,
    pub retries: u64,
    t0: Instant,
}

impl CommandStats {
    pub fn new() -> Self {
        Self {
            frames: 0,
            samples: 0,
            bytes: 0,
            retries: 0,
            t0: Instant::now(),
        }
    }
    pub fn add_bytes(&mut self, n: usize) {
        self.bytes += n as u64;
    }
    pub fn add_frame(&mut self, samples: usize) {
        self.frames += 1;
        self.samples += samples as u64;
    }
    pub fn inc_retry(&mut self) {
        self.retries += 1;
    }
    pub fn elapsed(&self) -> Duration {
        self.t0.elapsed()
    }

    pub fn log(&self, label: &str) {
        let dur = self.elapsed().as_secs_f64().max(1e-3);
        log::info!(
            "[agent] {} frames={} samples={} bytes={} retries={} over {:.1}s => {:.1}kB/s",
            label,
            self.frames,
            self.samples,
            self.bytes,
            self.retries,
            dur,
            (self.bytes as f64) / dur / 1000.0,
        );
    }
}

impl Default for CommandStats {
    fn default() -> Self {
        Self::new()
    }
}
