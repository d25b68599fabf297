/// Receives download progress; `fraction` is in `0.0..=1.0`.
pub trait ProgressNotify {
    fn progress(&mut self, fraction: f32, message: &str);
}

/// Writes progress to the log.
#[derive(Debug, Default)]
pub struct LogProgress {
    last_percent: Option<u32>,
}

impl ProgressNotify for LogProgress {
    fn progress(&mut self, fraction: f32, message: &str) {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0) as u32;
        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            log::info!("{} ({}%)", message, percent);
        }
    }
}

impl<F: FnMut(f32, &str)> ProgressNotify for F {
    fn progress(&mut self, fraction: f32, message: &str) {
        self(fraction, message)
    }
}
