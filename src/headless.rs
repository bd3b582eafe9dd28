//! A canvas with no window behind it.
//!
//! Backs the `headless` CLI command and the lifecycle tests: it renders with
//! a [`SoftwareDevice`], keeps its layout size under the caller's control and
//! records the frame requests the scheduler makes so a test can fire them.

use crate::FluidError;
use crate::scheduler::{Canvas, FrameRequest};
use crate::software::{SoftwareDevice, SoftwareLimits};

#[derive(Debug, Clone)]
pub struct HeadlessCanvas {
    client_width: f32,
    client_height: f32,
    pixel_ratio: f32,
    backing: (u32, u32),
    visible: bool,
    limits: SoftwareLimits,
    next_request: u64,
    pending: Option<FrameRequest>,
    cancelled: Vec<FrameRequest>,
    devices_created: u32,
    frames_requested: u64,
}

impl HeadlessCanvas {
    pub fn new(client_width: f32, client_height: f32) -> Self {
        Self {
            client_width,
            client_height,
            pixel_ratio: 1.0,
            backing: (0, 0),
            visible: false,
            limits: SoftwareLimits::default(),
            next_request: 1,
            pending: None,
            cancelled: Vec::new(),
            devices_created: 0,
            frames_requested: 0,
        }
    }

    pub fn with_pixel_ratio(mut self, pixel_ratio: f32) -> Self {
        self.pixel_ratio = pixel_ratio;
        self
    }

    pub fn with_limits(mut self, limits: SoftwareLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Changes the layout size, as a window resize would.
    pub fn set_client_size(&mut self, width: f32, height: f32) {
        self.client_width = width;
        self.client_height = height;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// The outstanding refresh request, if the scheduler has one.
    pub fn pending_request(&self) -> Option<FrameRequest> {
        self.pending
    }

    /// Fires the outstanding request: the caller then runs `animation_frame`.
    pub fn take_pending_request(&mut self) -> Option<FrameRequest> {
        self.pending.take()
    }

    pub fn cancelled_requests(&self) -> &[FrameRequest] {
        &self.cancelled
    }

    pub fn devices_created(&self) -> u32 {
        self.devices_created
    }

    pub fn frames_requested(&self) -> u64 {
        self.frames_requested
    }
}

impl Canvas for HeadlessCanvas {
    type Device = SoftwareDevice;

    fn create_device(&mut self) -> Result<SoftwareDevice, FluidError> {
        self.devices_created += 1;
        log::debug!("Headless canvas created software device #{}", self.devices_created);
        Ok(SoftwareDevice::with_limits(self.limits.clone()))
    }

    fn client_size(&self) -> (f32, f32) {
        (self.client_width, self.client_height)
    }

    fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    fn backing_size(&self) -> (u32, u32) {
        self.backing
    }

    fn set_backing_size(&mut self, width: u32, height: u32) {
        self.backing = (width, height);
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn request_frame(&mut self) -> FrameRequest {
        let request = FrameRequest(self.next_request);
        self.next_request += 1;
        self.frames_requested += 1;
        self.pending = Some(request);
        request
    }

    fn cancel_frame(&mut self, request: FrameRequest) {
        if self.pending == Some(request) {
            self.pending = None;
        }
        self.cancelled.push(request);
    }
}
