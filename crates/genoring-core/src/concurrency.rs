use crate::CoreError;
use fs2::FileExt;
use genoring_store::ProjectLayout;
use std::fs::{File, OpenOptions};
use std::io::{Seek, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// Advisory exclusive lock on a project's `config/.lock`, held for the
/// duration of a mutating verb so that two `genoring` processes never
/// interleave on the same project. The holder writes its PID into the file.
pub struct ProjectLock {
    lock_file: File,
}

fn open_lock_file(layout: &ProjectLayout) -> Result<File, CoreError> {
    std::fs::create_dir_all(layout.config_dir())?;
    Ok(OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(layout.lock_file())?)
}

impl ProjectLock {
    /// Block until the project is free.
    pub fn acquire(layout: &ProjectLayout) -> Result<Self, CoreError> {
        let file = open_lock_file(layout)?;
        file.lock_exclusive()
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, e)))?;
        Self::claim(file)
    }

    /// `None` when another process is working on the project.
    pub fn try_acquire(layout: &ProjectLayout) -> Result<Option<Self>, CoreError> {
        let file = open_lock_file(layout)?;
        match file.try_lock_exclusive() {
            Ok(()) => Self::claim(file).map(Some),
            Err(_) => Ok(None),
        }
    }

    fn claim(mut file: File) -> Result<Self, CoreError> {
        file.set_len(0)?;
        file.rewind()?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { lock_file: file })
    }

    /// PID recorded by the last process that took the lock, if any.
    pub fn holder(layout: &ProjectLayout) -> Option<u32> {
        std::fs::read_to_string(layout.lock_file())
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C records a shutdown request that the running transaction
/// checks between steps; a second one exits immediately.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(130);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\ninterrupt received, rolling back after the current step...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_lives_in_the_project_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        let _lock = ProjectLock::acquire(&layout).unwrap();
        assert!(dir.path().join("config/.lock").is_file());
        assert_eq!(ProjectLock::holder(&layout), Some(std::process::id()));
    }

    #[test]
    fn second_genoring_run_on_the_same_project_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        let _lock = ProjectLock::acquire(&layout).unwrap();
        assert!(ProjectLock::try_acquire(&layout).unwrap().is_none());

        let other = tempfile::tempdir().unwrap();
        assert!(ProjectLock::try_acquire(&ProjectLayout::new(other.path()))
            .unwrap()
            .is_some());
    }

    #[test]
    fn project_is_free_again_after_the_verb() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        {
            let _lock = ProjectLock::acquire(&layout).unwrap();
        }
        assert!(ProjectLock::try_acquire(&layout).unwrap().is_some());
    }
}
