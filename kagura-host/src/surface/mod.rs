//! Surface manager.
//!
//! Resolves the configured canvas through the [`Document`] seam, sizes its
//! backing store from CSS size and device pixel ratio, and hands out a stable
//! per-canvas identifier. Without a document (headless or off-DOM) the
//! surface runs in degraded mode: synthetic dimensions and no canvas.

mod canvas;

pub use canvas::{Canvas, CanvasContext, Document, MemoryDocument};

use crate::config::SurfaceConfig;
use crate::error::InitError;
use crate::gfx::BackendMode;

/// Identifiers at or below this value are reserved for the embedder.
pub const RESERVED_SURFACE_IDS: u32 = 1000;

/// Largest backing-store edge, in physical pixels.
pub const MAX_SURFACE_DIMENSION: u32 = 8192;

/// The drawable target and its sizing/identity metadata.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Surface {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub dpr: f64,
    pub backend_mode: BackendMode,
    /// True when no backing canvas exists.
    pub degraded: bool,
    /// Bumped whenever the backing pixel size changes.
    pub generation: u64,
}

pub struct SurfaceManager {
    document: Option<Box<dyn Document>>,
    selector: String,
    next_id: u32,
    degraded_id: Option<u32>,
    surface: Option<Surface>,
    /// CSS-pixel size the guest asked for, reused by [`SurfaceManager::revalidate`].
    fallback: Option<(u32, u32)>,
}

impl SurfaceManager {
    pub fn new(document: Option<Box<dyn Document>>, selector: impl Into<String>) -> Self {
        Self {
            document,
            selector: selector.into(),
            next_id: RESERVED_SURFACE_IDS + 1,
            degraded_id: None,
            surface: None,
            fallback: None,
        }
    }

    /// Build a manager from configuration, creating an in-memory document
    /// with a single canvas unless the config asks for headless mode.
    pub fn from_config(cfg: &SurfaceConfig) -> Self {
        let document: Option<Box<dyn Document>> = if cfg.headless {
            None
        } else {
            let mut doc = MemoryDocument::new(cfg.device_pixel_ratio);
            doc.insert(
                Canvas::new(&cfg.selector, cfg.css_width, cfg.css_height)
                    .with_capabilities(cfg.gpu_capable, cfg.raster_capable),
            );
            Some(Box::new(doc))
        };
        Self::new(document, cfg.selector.clone())
    }

    /// Resolve and size the surface. See [`SurfaceManager::try_prepare`].
    pub fn prepare(&mut self, fallback_width: i32, fallback_height: i32) -> bool {
        match self.try_prepare(fallback_width, fallback_height) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "prepare_surface failed");
                false
            }
        }
    }

    /// Re-run sizing against the current CSS size and dpr, reusing the
    /// fallback from the last guest `prepare`. No-op before the first one.
    pub fn revalidate(&mut self) -> bool {
        let Some((w, h)) = self.fallback else {
            return false;
        };
        match self.resolve(w, h) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "surface revalidation failed");
                false
            }
        }
    }

    pub fn try_prepare(&mut self, fallback_width: i32, fallback_height: i32) -> Result<(), InitError> {
        let fallback_w = clamp_dimension(fallback_width.max(1) as u32);
        let fallback_h = clamp_dimension(fallback_height.max(1) as u32);
        if fallback_w != fallback_width.max(1) as u32 || fallback_h != fallback_height.max(1) as u32 {
            tracing::warn!(fallback_width, fallback_height, "requested surface size clamped");
        }
        self.fallback = Some((fallback_w, fallback_h));
        self.resolve(fallback_w, fallback_h)
    }

    fn resolve(&mut self, fallback_w: u32, fallback_h: u32) -> Result<(), InitError> {
        let previous = self.surface;
        let backend_mode = previous.map_or(BackendMode::None, |s| s.backend_mode);

        let Some(document) = self.document.as_mut() else {
            let id = match self.degraded_id {
                Some(id) => id,
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.degraded_id = Some(id);
                    tracing::info!(id, fallback_w, fallback_h, "no document; surface is degraded");
                    id
                }
            };
            self.surface = Some(Surface {
                id,
                width: fallback_w,
                height: fallback_h,
                dpr: 1.0,
                backend_mode,
                degraded: true,
                generation: next_generation(previous, fallback_w, fallback_h),
            });
            return Ok(());
        };

        let dpr = sanitize_dpr(document.device_pixel_ratio());
        let next_id = &mut self.next_id;
        let canvas = document
            .query_canvas(&self.selector)
            .ok_or_else(|| InitError::CanvasNotFound(self.selector.clone()))?;
        if !canvas.gpu_capable && !canvas.raster_capable {
            return Err(InitError::NoContextCapability(self.selector.clone()));
        }

        let css_w = if canvas.css_width > 0.0 { canvas.css_width } else { fallback_w as f64 };
        let css_h = if canvas.css_height > 0.0 { canvas.css_height } else { fallback_h as f64 };
        let width = backing_size(css_w, dpr);
        let height = backing_size(css_h, dpr);
        if canvas.width != width || canvas.height != height {
            tracing::debug!(
                from_w = canvas.width,
                from_h = canvas.height,
                width,
                height,
                dpr,
                "resizing canvas backing store"
            );
            canvas.width = width;
            canvas.height = height;
        }

        let id = *canvas.bridge_id.get_or_insert_with(|| {
            let id = *next_id;
            *next_id += 1;
            id
        });

        self.surface = Some(Surface {
            id,
            width,
            height,
            dpr,
            backend_mode,
            degraded: false,
            generation: next_generation(previous, width, height),
        });
        Ok(())
    }

    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    pub fn set_backend_mode(&mut self, mode: BackendMode) {
        if let Some(surface) = self.surface.as_mut() {
            surface.backend_mode = mode;
        }
    }

    /// Record which backend owns the canvas. Configuring one context
    /// supersedes the other.
    pub fn configure_context(&mut self, context: CanvasContext) {
        if let Some(canvas) = self.canvas_mut() {
            if canvas.context != context {
                tracing::debug!(from = ?canvas.context, to = ?context, "canvas context switched");
                canvas.context = context;
            }
        }
    }

    pub fn context(&mut self) -> CanvasContext {
        self.canvas_mut()
            .map_or(CanvasContext::Unconfigured, |c| c.context)
    }

    /// Mutable access to the document, e.g. to simulate a CSS resize.
    pub fn document_mut(&mut self) -> Option<&mut (dyn Document + 'static)> {
        self.document.as_deref_mut()
    }

    /// Forget the resolved surface and unconfigure the canvas context.
    /// Identifiers already attached to canvases stay attached.
    pub fn shutdown(&mut self) {
        self.configure_context(CanvasContext::Unconfigured);
        self.surface = None;
    }

    fn canvas_mut(&mut self) -> Option<&mut Canvas> {
        let selector = self.selector.as_str();
        self.document.as_mut()?.query_canvas(selector)
    }
}

fn sanitize_dpr(dpr: f64) -> f64 {
    if dpr.is_finite() && dpr > 0.0 { dpr } else { 1.0 }
}

fn backing_size(css: f64, dpr: f64) -> u32 {
    let px = (css * dpr).round();
    if px.is_finite() && px >= 1.0 { px.min(MAX_SURFACE_DIMENSION as f64) as u32 } else { 1 }
}

fn clamp_dimension(px: u32) -> u32 {
    px.min(MAX_SURFACE_DIMENSION)
}

fn next_generation(previous: Option<Surface>, width: u32, height: u32) -> u64 {
    match previous {
        Some(prev) if prev.width == width && prev.height == height => prev.generation,
        Some(prev) => prev.generation + 1,
        None => 1,
    }
}
