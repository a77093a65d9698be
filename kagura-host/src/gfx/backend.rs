//! Backend selection and asynchronous GPU acquisition.
//!
//! GPU acquisition runs out-of-band: the first `try_initialize(GpuPreferred)`
//! asks the [`DeviceSource`] for a device and returns `false`; every later
//! call polls the pending result without blocking. Readiness is level
//! triggered, so the guest simply keeps asking once per frame.
//!
//! ```text
//! Uninitialized -> AdapterRequested -> DeviceReady
//!                                   \-> DeviceFailed (terminal until shutdown)
//! ```

use std::sync::mpsc::{Receiver, TryRecvError};

use crate::error::{InitError, RenderError};
use crate::gfx::recorder::FrameState;
use crate::gfx::texture::{TextureRecord, TextureRegistry};
use crate::gfx::{BackendKind, BackendMode};

/// A rendering device produced by a [`DeviceSource`].
pub trait GpuBackend {
    /// Render one frame into a `width` x `height` offscreen target.
    fn render(
        &mut self,
        frame: &FrameState,
        textures: &TextureRegistry,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError>;

    /// Read back an RGBA8 region of the last rendered target. Texels outside
    /// the target read as transparent black.
    fn read_pixels(&mut self, x: i32, y: i32, width: u32, height: u32) -> Result<Vec<u8>, RenderError>;

    /// A texture was committed; mirror it if the device keeps its own copy.
    fn texture_committed(&mut self, image_id: u32, record: &TextureRecord);

    /// Destroy every device resource. The device is not used afterwards.
    fn release(&mut self);

    fn describe(&self) -> String {
        String::from("gpu")
    }
}

/// Starts a one-shot device acquisition and hands back the channel its
/// outcome will arrive on.
pub trait DeviceSource {
    type Device: GpuBackend;

    fn request(&mut self) -> Receiver<Result<Self::Device, InitError>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionState {
    Uninitialized,
    AdapterRequested,
    DeviceReady,
    DeviceFailed,
}

enum GpuSlot<D> {
    Uninitialized,
    Pending(Receiver<Result<D, InitError>>),
    Ready(D),
    Failed(InitError),
}

pub struct BackendSelector<S: DeviceSource> {
    source: S,
    force_fallback: bool,
    gpu: GpuSlot<S::Device>,
    mode: BackendMode,
    requests: u32,
}

impl<S: DeviceSource> BackendSelector<S> {
    pub fn new(source: S, force_fallback: bool) -> Self {
        Self {
            source,
            force_fallback,
            gpu: GpuSlot::Uninitialized,
            mode: BackendMode::None,
            requests: 0,
        }
    }

    pub fn try_initialize(&mut self, kind: i32, width: i32, height: i32) -> bool {
        tracing::trace!(kind, width, height, "gfx_try_initialize");
        match BackendKind::from_code(kind) {
            Some(BackendKind::RasterOnly) => {
                self.set_mode(BackendMode::Raster);
                true
            }
            Some(BackendKind::GpuPreferred) if self.force_fallback => {
                if self.mode != BackendMode::Raster {
                    tracing::info!("forced fallback: skipping GPU acquisition");
                }
                self.set_mode(BackendMode::Raster);
                true
            }
            Some(BackendKind::GpuPreferred) => match self.poll() {
                AcquisitionState::Uninitialized => {
                    tracing::info!("requesting GPU adapter");
                    self.requests += 1;
                    self.gpu = GpuSlot::Pending(self.source.request());
                    false
                }
                AcquisitionState::AdapterRequested => false,
                AcquisitionState::DeviceReady => {
                    self.set_mode(BackendMode::Gpu);
                    true
                }
                AcquisitionState::DeviceFailed => {
                    self.set_mode(BackendMode::Raster);
                    true
                }
            },
            None => {
                tracing::warn!(kind, "unknown backend kind");
                false
            }
        }
    }

    /// Observe a pending acquisition without blocking.
    pub fn poll(&mut self) -> AcquisitionState {
        if let GpuSlot::Pending(rx) = &self.gpu {
            let next = match rx.try_recv() {
                Ok(Ok(device)) => {
                    tracing::info!(device = %device.describe(), "GPU device ready");
                    GpuSlot::Ready(device)
                }
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "GPU acquisition failed; using raster for this session");
                    GpuSlot::Failed(err)
                }
                Err(TryRecvError::Empty) => return AcquisitionState::AdapterRequested,
                Err(TryRecvError::Disconnected) => {
                    tracing::warn!("GPU acquisition abandoned; using raster for this session");
                    GpuSlot::Failed(InitError::AcquisitionAbandoned)
                }
            };
            self.gpu = next;
        }
        self.state()
    }

    pub fn state(&self) -> AcquisitionState {
        match self.gpu {
            GpuSlot::Uninitialized => AcquisitionState::Uninitialized,
            GpuSlot::Pending(_) => AcquisitionState::AdapterRequested,
            GpuSlot::Ready(_) => AcquisitionState::DeviceReady,
            GpuSlot::Failed(_) => AcquisitionState::DeviceFailed,
        }
    }

    pub fn failure(&self) -> Option<&InitError> {
        match &self.gpu {
            GpuSlot::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    pub fn force_fallback(&self) -> bool {
        self.force_fallback
    }

    pub fn set_force_fallback(&mut self, force: bool) {
        self.force_fallback = force;
        if force && self.mode == BackendMode::Gpu {
            self.set_mode(BackendMode::Raster);
        }
    }

    /// Number of acquisitions started since construction.
    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// The backend a frame of `kind` should render with first.
    pub fn primary_for(&mut self, kind: i32) -> BackendMode {
        let wants_gpu = BackendKind::from_code(kind) == Some(BackendKind::GpuPreferred);
        if wants_gpu && !self.force_fallback && self.poll() == AcquisitionState::DeviceReady {
            BackendMode::Gpu
        } else {
            BackendMode::Raster
        }
    }

    pub fn device_mut(&mut self) -> Option<&mut S::Device> {
        match &mut self.gpu {
            GpuSlot::Ready(device) if !self.force_fallback => Some(device),
            _ => None,
        }
    }

    /// Release the device (if any) and return to `Uninitialized`.
    pub fn shutdown(&mut self) {
        if let GpuSlot::Ready(device) = &mut self.gpu {
            device.release();
        }
        self.gpu = GpuSlot::Uninitialized;
        self.mode = BackendMode::None;
    }

    fn set_mode(&mut self, mode: BackendMode) {
        if self.mode != mode {
            tracing::debug!(from = %self.mode, to = %mode, "backend mode changed");
            self.mode = mode;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gfx::raster::RasterTarget;
    use std::sync::mpsc::{self, Sender};

    /// A GPU stand-in that renders with the raster code and can be told to fail.
    #[derive(Default)]
    pub(crate) struct FakeGpu {
        pub target: RasterTarget,
        pub fail_render: bool,
        pub frames: u32,
        pub committed: Vec<(u32, u64)>,
        pub released: bool,
    }

    impl GpuBackend for FakeGpu {
        fn render(
            &mut self,
            frame: &FrameState,
            textures: &TextureRegistry,
            width: u32,
            height: u32,
        ) -> Result<(), RenderError> {
            if self.fail_render {
                return Err(RenderError::Validation("injected failure".into()));
            }
            self.frames += 1;
            self.target.render(frame, textures, width, height)
        }

        fn read_pixels(&mut self, x: i32, y: i32, width: u32, height: u32) -> Result<Vec<u8>, RenderError> {
            Ok(self.target.read_region(x, y, width, height))
        }

        fn texture_committed(&mut self, image_id: u32, record: &TextureRecord) {
            self.committed.push((image_id, record.revision));
        }

        fn release(&mut self) {
            self.released = true;
        }
    }

    /// How a [`FakeSource`] resolves its acquisitions.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) enum Outcome {
        /// Resolve immediately with a device.
        Ready,
        /// Resolve immediately with a device whose renders fail.
        Broken,
        /// Resolve immediately with `AdapterNotFound`.
        NoAdapter,
        /// Stay pending until [`FakeSource::resolve`] is called.
        Deferred,
    }

    pub(crate) struct FakeSource {
        outcome: Outcome,
        pending: Option<Sender<Result<FakeGpu, InitError>>>,
        pub calls: u32,
    }

    impl FakeSource {
        pub fn new(outcome: Outcome) -> Self {
            Self {
                outcome,
                pending: None,
                calls: 0,
            }
        }

        pub fn resolve(&mut self, result: Result<FakeGpu, InitError>) {
            if let Some(tx) = self.pending.take() {
                let _ = tx.send(result);
            }
        }
    }

    impl DeviceSource for FakeSource {
        type Device = FakeGpu;

        fn request(&mut self) -> Receiver<Result<FakeGpu, InitError>> {
            self.calls += 1;
            let (tx, rx) = mpsc::channel();
            match self.outcome {
                Outcome::Ready => {
                    let _ = tx.send(Ok(FakeGpu::default()));
                }
                Outcome::Broken => {
                    let _ = tx.send(Ok(FakeGpu {
                        fail_render: true,
                        ..FakeGpu::default()
                    }));
                }
                Outcome::NoAdapter => {
                    let _ = tx.send(Err(InitError::AdapterNotFound));
                }
                Outcome::Deferred => self.pending = Some(tx),
            }
            rx
        }
    }

    #[test]
    fn first_gpu_request_returns_false_then_ready() {
        let mut sel = BackendSelector::new(FakeSource::new(Outcome::Ready), false);
        assert!(!sel.try_initialize(1, 64, 64));
        assert!(sel.try_initialize(1, 64, 64));
        assert_eq!(sel.state(), AcquisitionState::DeviceReady);
        assert_eq!(sel.mode(), BackendMode::Gpu);
        assert_eq!(sel.requests(), 1);
    }

    #[test]
    fn pending_acquisition_keeps_returning_false() {
        let mut sel = BackendSelector::new(FakeSource::new(Outcome::Deferred), false);
        assert!(!sel.try_initialize(1, 8, 8));
        assert!(!sel.try_initialize(1, 8, 8));
        assert_eq!(sel.state(), AcquisitionState::AdapterRequested);
        sel.source.resolve(Ok(FakeGpu::default()));
        assert!(sel.try_initialize(1, 8, 8));
        assert_eq!(sel.source.calls, 1);
    }

    #[test]
    fn adapter_failure_is_terminal_and_falls_back_to_raster() {
        let mut sel = BackendSelector::new(FakeSource::new(Outcome::NoAdapter), false);
        assert!(!sel.try_initialize(1, 8, 8));
        assert!(sel.try_initialize(1, 8, 8));
        assert_eq!(sel.state(), AcquisitionState::DeviceFailed);
        assert_eq!(sel.mode(), BackendMode::Raster);
        assert!(matches!(sel.failure(), Some(InitError::AdapterNotFound)));
        for _ in 0..3 {
            assert!(sel.try_initialize(1, 8, 8));
        }
        assert_eq!(sel.source.calls, 1);
    }

    #[test]
    fn dropped_sender_counts_as_failure() {
        let mut sel = BackendSelector::new(FakeSource::new(Outcome::Deferred), false);
        assert!(!sel.try_initialize(1, 8, 8));
        sel.source.pending = None;
        assert!(sel.try_initialize(1, 8, 8));
        assert!(matches!(sel.failure(), Some(InitError::AcquisitionAbandoned)));
    }

    #[test]
    fn forced_fallback_never_activates_gpu() {
        let mut sel = BackendSelector::new(FakeSource::new(Outcome::Ready), true);
        for _ in 0..4 {
            assert!(sel.try_initialize(1, 32, 32));
            assert_eq!(sel.mode(), BackendMode::Raster);
            assert_eq!(sel.primary_for(1), BackendMode::Raster);
        }
        assert_eq!(sel.source.calls, 0);
        assert!(sel.device_mut().is_none());
    }

    #[test]
    fn raster_kind_never_requests_a_device() {
        let mut sel = BackendSelector::new(FakeSource::new(Outcome::Ready), false);
        assert!(sel.try_initialize(2, 32, 32));
        assert_eq!(sel.mode(), BackendMode::Raster);
        assert_eq!(sel.state(), AcquisitionState::Uninitialized);
        assert!(!sel.try_initialize(7, 32, 32));
    }

    #[test]
    fn shutdown_releases_device_and_allows_retry() {
        let mut sel = BackendSelector::new(FakeSource::new(Outcome::NoAdapter), false);
        sel.try_initialize(1, 8, 8);
        sel.try_initialize(1, 8, 8);
        assert_eq!(sel.state(), AcquisitionState::DeviceFailed);
        sel.shutdown();
        assert_eq!(sel.state(), AcquisitionState::Uninitialized);
        assert_eq!(sel.mode(), BackendMode::None);
        assert!(!sel.try_initialize(1, 8, 8));
        assert_eq!(sel.source.calls, 2);
    }
}
