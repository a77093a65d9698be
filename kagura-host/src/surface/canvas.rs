/// Which backend currently owns the canvas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CanvasContext {
    #[default]
    Unconfigured,
    Gpu,
    Raster,
}

/// A canvas element: CSS size, backing-store size and the identifier the
/// bridge attaches to it on first resolution.
#[derive(Clone, Debug)]
pub struct Canvas {
    pub selector: String,
    pub css_width: f64,
    pub css_height: f64,
    /// Backing-store size in physical pixels.
    pub width: u32,
    pub height: u32,
    pub gpu_capable: bool,
    pub raster_capable: bool,
    pub context: CanvasContext,
    pub(crate) bridge_id: Option<u32>,
}

impl Canvas {
    pub fn new(selector: impl Into<String>, css_width: f64, css_height: f64) -> Self {
        Self {
            selector: selector.into(),
            css_width,
            css_height,
            width: 300,
            height: 150,
            gpu_capable: true,
            raster_capable: true,
            context: CanvasContext::Unconfigured,
            bridge_id: None,
        }
    }

    pub fn with_capabilities(mut self, gpu: bool, raster: bool) -> Self {
        self.gpu_capable = gpu;
        self.raster_capable = raster;
        self
    }

    pub fn set_css_size(&mut self, css_width: f64, css_height: f64) {
        self.css_width = css_width;
        self.css_height = css_height;
    }

    /// The identifier attached by the bridge, if it has resolved this canvas.
    pub fn bridge_id(&self) -> Option<u32> {
        self.bridge_id
    }
}

/// The page the canvas lives in.
pub trait Document {
    fn query_canvas(&mut self, selector: &str) -> Option<&mut Canvas>;
    fn device_pixel_ratio(&self) -> f64;
}

/// An in-memory document holding canvases by selector.
#[derive(Debug, Default)]
pub struct MemoryDocument {
    canvases: Vec<Canvas>,
    dpr: f64,
}

impl MemoryDocument {
    pub fn new(dpr: f64) -> Self {
        Self {
            canvases: Vec::new(),
            dpr,
        }
    }

    pub fn insert(&mut self, canvas: Canvas) {
        self.canvases.retain(|c| c.selector != canvas.selector);
        self.canvases.push(canvas);
    }

    pub fn set_device_pixel_ratio(&mut self, dpr: f64) {
        self.dpr = dpr;
    }
}

impl Document for MemoryDocument {
    fn query_canvas(&mut self, selector: &str) -> Option<&mut Canvas> {
        self.canvases.iter_mut().find(|c| c.selector == selector)
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.dpr
    }
}
