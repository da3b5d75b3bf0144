//! Shared CPU-kernel-then-upload stage used by the copying strategies

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::error;

use crate::convert::worker::{Executor, Pending};
use crate::error::{Error, Result};
use crate::texture::{OutputTexture, TextureBackend, TextureDesc};

/// Everything a job owns travels back through it, even when the kernel fails
struct UploadJob {
    target: OutputTexture,
    scratch: Vec<u8>,
    outcome: Result<()>,
}

/// Runs a kernel into a cached RGBA scratch buffer, then uploads it
pub(crate) struct UploadStage {
    backend: Arc<dyn TextureBackend>,
    executor: Executor,
    scratch: Option<Vec<u8>>,
    in_flight: Option<Pending<UploadJob>>,
    /// Target of the last failed conversion, waiting to be reclaimed
    recovered: Option<OutputTexture>,
}

impl std::fmt::Debug for UploadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadStage")
            .field("backend", &self.backend.name())
            .field("deferred", &self.executor.is_deferred())
            .field("in_flight", &self.in_flight.is_some())
            .field("recovered", &self.recovered.as_ref().map(OutputTexture::id))
            .finish()
    }
}

impl UploadStage {
    pub fn new(backend: Arc<dyn TextureBackend>, executor: Executor) -> Self {
        Self {
            backend,
            executor,
            scratch: None,
            in_flight: None,
            recovered: None,
        }
    }

    /// Hand back `existing` when it already matches `desc`, otherwise replace it
    pub fn reuse_or_create(
        &self,
        desc: TextureDesc,
        existing: Option<OutputTexture>,
    ) -> Result<OutputTexture> {
        reuse_or_create(self.backend.as_ref(), desc, existing)
    }

    pub fn start<K>(&mut self, mut target: OutputTexture, kernel: K) -> Result<()>
    where
        K: FnOnce(&mut Vec<u8>) -> Result<()> + Send + 'static,
    {
        if self.in_flight.is_some() {
            self.backend.destroy(target);
            return Err(Error::Conversion("a conversion is already in flight".into()));
        }

        let mut scratch = self.scratch.take().unwrap_or_default();
        let backend = self.backend.clone();
        let pending = self.executor.run(move || {
            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                kernel(&mut scratch).and_then(|()| backend.write(&mut target, &scratch))
            }))
            .unwrap_or_else(|_| {
                error!(texture = %target.id(), "conversion kernel panicked");
                Err(Error::Conversion("conversion kernel panicked".into()))
            });
            metrics::histogram!("frameflow_convert_time_us")
                .record(started.elapsed().as_micros() as f64);
            UploadJob {
                target,
                scratch,
                outcome,
            }
        })?;
        self.in_flight = Some(pending);
        Ok(())
    }

    /// Return an unused target to the backend
    pub fn discard(&self, target: OutputTexture) {
        self.backend.destroy(target);
    }

    pub fn is_done(&self) -> bool {
        self.in_flight.as_ref().map_or(true, Pending::is_done)
    }

    /// Wait for the job. On failure the target is kept for [`UploadStage::take_recovered`].
    pub fn finish(&mut self) -> Result<OutputTexture> {
        let job = self.in_flight.take().ok_or(Error::NotConverting)?.wait()?;
        self.scratch = Some(job.scratch);
        match job.outcome {
            Ok(()) => Ok(job.target),
            Err(e) => {
                if let Some(stale) = self.recovered.replace(job.target) {
                    self.backend.destroy(stale);
                }
                Err(e)
            }
        }
    }

    pub fn take_recovered(&mut self) -> Option<OutputTexture> {
        self.recovered.take()
    }

    pub fn scratch_capacity(&self) -> usize {
        self.scratch.as_ref().map_or(0, Vec::capacity)
    }

    pub fn dispose(&mut self) {
        // Wait out a running job so nothing still writes into the target
        if let Some(pending) = self.in_flight.take() {
            if let Ok(job) = pending.wait() {
                self.backend.destroy(job.target);
            }
        }
        if let Some(texture) = self.recovered.take() {
            self.backend.destroy(texture);
        }
        self.scratch = None;
    }
}

pub(crate) fn reuse_or_create(
    backend: &dyn TextureBackend,
    desc: TextureDesc,
    existing: Option<OutputTexture>,
) -> Result<OutputTexture> {
    match existing {
        Some(texture) if texture.desc() == desc => Ok(texture),
        Some(texture) => {
            backend.destroy(texture);
            backend.create(desc)
        }
        None => backend.create(desc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::WorkerPool;
    use crate::texture::HostBackend;

    fn stage(executor: Executor) -> (UploadStage, Arc<HostBackend>) {
        let backend = Arc::new(HostBackend::new());
        (UploadStage::new(backend.clone(), executor), backend)
    }

    #[test]
    fn failed_kernel_keeps_its_target() {
        let (mut stage, backend) = stage(Executor::Inline);
        let target = stage.reuse_or_create(TextureDesc::rgba(2, 2), None).unwrap();
        let id = target.id();

        stage
            .start(target, |_| Err(Error::Conversion("bad plane".into())))
            .unwrap();
        assert!(matches!(stage.finish(), Err(Error::Conversion(_))));

        let recovered = stage.take_recovered().expect("target kept after failure");
        assert_eq!(recovered.id(), id);
        assert_eq!(backend.live(), 1);
        stage.discard(recovered);
        assert_eq!(backend.live(), 0);
    }

    #[test]
    fn panicking_kernel_is_contained() {
        for executor in [Executor::Inline, Executor::Deferred(Arc::new(WorkerPool::new(1).unwrap()))] {
            let (mut stage, backend) = stage(executor);
            let target = stage.reuse_or_create(TextureDesc::rgba(2, 2), None).unwrap();

            stage.start(target, |_| panic!("kernel bug")).unwrap();
            assert!(matches!(stage.finish(), Err(Error::Conversion(_))));

            // Nothing leaks once the stage is disposed
            stage.dispose();
            assert_eq!(backend.live(), 0);
        }
    }

    #[test]
    fn successful_upload_reuses_scratch() {
        let (mut stage, backend) = stage(Executor::Inline);
        let target = stage.reuse_or_create(TextureDesc::rgba(1, 1), None).unwrap();
        stage
            .start(target, |rgba| {
                rgba.clear();
                rgba.extend_from_slice(&[1, 2, 3, 4]);
                Ok(())
            })
            .unwrap();
        let texture = stage.finish().unwrap();
        assert_eq!(texture.host_pixels(), Some(&[1u8, 2, 3, 4][..]));
        assert!(stage.scratch_capacity() >= 4);
        assert!(stage.take_recovered().is_none());
        backend.destroy(texture);
    }
}
