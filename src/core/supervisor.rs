//! Job supervisor: one active wipe per device identity.
//!
//! The registry is the only shared mutable state in the daemon. All
//! operations hold a single mutex, and the mutex is never held across
//! I/O; control is delivered to jobs through their cancellation token
//! and pause signal.

use crate::error::WipeError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Paused,
    Aborting,
    Completed,
    Failed,
}

/// Handles the engine polls while running a job.
#[derive(Debug)]
pub struct JobControls {
    pub cancel: CancellationToken,
    pub pause: watch::Receiver<bool>,
}

impl JobControls {
    /// Wait here while the job is paused. Writes and the progress
    /// clock both stop until a resume arrives.
    pub async fn wait_if_paused(&mut self) {
        while *self.pause.borrow() {
            if self.pause.changed().await.is_err() {
                break;
            }
        }
    }
}

struct JobEntry {
    method_id: String,
    state: JobState,
    cancel: CancellationToken,
    pause_tx: watch::Sender<bool>,
    started_at: Instant,
}

#[derive(Default)]
pub struct JobSupervisor {
    jobs: Mutex<HashMap<String, JobEntry>>,
}

impl JobSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a job for a device identity. Exactly one job may exist
    /// per identity; a second registration is rejected.
    pub fn register(&self, device_id: &str, method_id: &str) -> Result<JobControls, WipeError> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(device_id) {
            return Err(WipeError::JobActive(device_id.to_string()));
        }

        let cancel = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);

        jobs.insert(
            device_id.to_string(),
            JobEntry {
                method_id: method_id.to_string(),
                state: JobState::Pending,
                cancel: cancel.clone(),
                pause_tx,
                started_at: Instant::now(),
            },
        );

        Ok(JobControls {
            cancel,
            pause: pause_rx,
        })
    }

    pub fn set_state(&self, device_id: &str, state: JobState) {
        if let Some(entry) = self.jobs.lock().unwrap().get_mut(device_id) {
            entry.state = state;
        }
    }

    /// Toggle the paused flag and signal the job. Returns the new
    /// paused state.
    pub fn pause(&self, device_id: &str) -> Result<bool, WipeError> {
        let mut jobs = self.jobs.lock().unwrap();
        let entry = jobs
            .get_mut(device_id)
            .ok_or_else(|| WipeError::NotFound(format!("active wipe for {device_id}")))?;

        let paused = !*entry.pause_tx.borrow();
        let _ = entry.pause_tx.send(paused);
        entry.state = if paused {
            JobState::Paused
        } else {
            JobState::Running
        };
        Ok(paused)
    }

    pub fn resume(&self, device_id: &str) -> Result<(), WipeError> {
        let mut jobs = self.jobs.lock().unwrap();
        let entry = jobs
            .get_mut(device_id)
            .ok_or_else(|| WipeError::NotFound(format!("active wipe for {device_id}")))?;

        let _ = entry.pause_tx.send(false);
        entry.state = JobState::Running;
        Ok(())
    }

    /// Signal cancellation; the job terminates at its next I/O
    /// boundary. A paused job is released first so it can observe the
    /// cancellation.
    pub fn abort(&self, device_id: &str) -> Result<(), WipeError> {
        let mut jobs = self.jobs.lock().unwrap();
        let entry = jobs
            .get_mut(device_id)
            .ok_or_else(|| WipeError::NotFound(format!("active wipe for {device_id}")))?;

        let _ = entry.pause_tx.send(false);
        entry.cancel.cancel();
        entry.state = JobState::Aborting;
        Ok(())
    }

    /// Remove the entry once the terminal event has been delivered.
    pub fn unregister(&self, device_id: &str) {
        self.jobs.lock().unwrap().remove(device_id);
    }

    pub fn state(&self, device_id: &str) -> Option<JobState> {
        self.jobs.lock().unwrap().get(device_id).map(|e| e.state)
    }

    pub fn active_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn method_of(&self, device_id: &str) -> Option<String> {
        self.jobs
            .lock()
            .unwrap()
            .get(device_id)
            .map(|e| e.method_id.clone())
    }

    pub fn elapsed(&self, device_id: &str) -> Option<std::time::Duration> {
        self.jobs
            .lock()
            .unwrap()
            .get(device_id)
            .map(|e| e.started_at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_registration_is_rejected_until_unregister() {
        let supervisor = JobSupervisor::new();

        supervisor.register("/dev/sdx", "overwrite_1_pass").unwrap();
        let err = supervisor
            .register("/dev/sdx", "overwrite_3_pass")
            .unwrap_err();
        assert!(matches!(err, WipeError::JobActive(_)));

        supervisor.unregister("/dev/sdx");
        supervisor.register("/dev/sdx", "overwrite_3_pass").unwrap();
    }

    #[test]
    fn pause_toggles_and_resume_clears() {
        let supervisor = JobSupervisor::new();
        let controls = supervisor.register("/dev/sdx", "overwrite_1_pass").unwrap();

        assert!(supervisor.pause("/dev/sdx").unwrap());
        assert!(*controls.pause.borrow());
        assert_eq!(supervisor.state("/dev/sdx"), Some(JobState::Paused));

        assert!(!supervisor.pause("/dev/sdx").unwrap());
        assert!(!*controls.pause.borrow());

        supervisor.pause("/dev/sdx").unwrap();
        supervisor.resume("/dev/sdx").unwrap();
        assert!(!*controls.pause.borrow());
        assert_eq!(supervisor.state("/dev/sdx"), Some(JobState::Running));
    }

    #[test]
    fn abort_cancels_and_releases_pause() {
        let supervisor = JobSupervisor::new();
        let controls = supervisor.register("/dev/sdx", "overwrite_1_pass").unwrap();
        supervisor.pause("/dev/sdx").unwrap();

        supervisor.abort("/dev/sdx").unwrap();

        assert!(controls.cancel.is_cancelled());
        assert!(!*controls.pause.borrow());
        assert_eq!(supervisor.state("/dev/sdx"), Some(JobState::Aborting));
    }

    #[test]
    fn control_of_unknown_device_is_not_found() {
        let supervisor = JobSupervisor::new();
        assert!(matches!(
            supervisor.pause("/dev/ghost"),
            Err(WipeError::NotFound(_))
        ));
        assert!(matches!(
            supervisor.abort("/dev/ghost"),
            Err(WipeError::NotFound(_))
        ));
    }
}
