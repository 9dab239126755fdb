//! Queries against the window server: compositor descriptors, spaces,
//! window levels, and surface capture.
//!
//! The descriptor list (`CGWindowListCopyWindowInfo`) and the space queries
//! (CGS) are two of the three views the engine reconciles; the third is the
//! accessibility tree in [`crate::sys::axuielement`].

use std::ffi::c_void;
use std::ptr::NonNull;

use objc2_core_foundation::{
    CFArray, CFBoolean, CFDictionary, CFNumber, CFRetained, CFString, CFType, CGPoint, CGRect,
    CGSize,
};
use objc2_core_graphics::{
    CGBitmapInfo, CGColorSpace, CGContext, CGImage, CGInterpolationQuality,
    CGWindowListCopyWindowInfo, CGWindowListOption, kCGNullWindowID, kCGWindowAlpha,
    kCGWindowBounds, kCGWindowIsOnscreen, kCGWindowLayer, kCGWindowName, kCGWindowNumber,
    kCGWindowOwnerPID,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sys::app::pid_t;
use crate::sys::axuielement::AXUIElement;
use crate::sys::skylight::{
    _AXUIElementGetWindow, CGRectMakeWithDictionaryRepresentation, CGSCopySpaces, CGSSpaceMask,
    G_CONNECTION, SLSCopySpacesForWindows, SLSGetWindowLevel, SLSHWCaptureWindowList,
};

/// The compositor's 32-bit window identifier. Unique within the live system
/// at any instant and stable for the window's lifetime.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowId(pub u32);

impl WindowId {
    #[inline]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<WindowId> for u32 {
    #[inline]
    fn from(id: WindowId) -> Self {
        id.0
    }
}

/// A virtual desktop identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SpaceId(u64);

impl SpaceId {
    pub fn new(id: u64) -> SpaceId {
        SpaceId(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// What the compositor knows about one window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowDescriptor {
    pub id: WindowId,
    pub title: Option<String>,
    pub bounds: CGRect,
    pub owner_pid: pid_t,
    pub layer: i32,
    pub alpha: f64,
    pub on_screen: bool,
}

/// Resolves a window id directly from an accessibility handle via the
/// private call. `None` means the call failed or reported id zero.
pub fn window_id_for_element(elem: &AXUIElement) -> Option<WindowId> {
    let mut id = 0;
    let res = unsafe { _AXUIElementGetWindow(elem.raw_ptr().as_ptr(), &mut id) };
    if res == objc2_application_services::AXError::Success && id != 0 {
        Some(WindowId(id))
    } else {
        None
    }
}

#[cfg(not(test))]
pub fn descriptors_for_pid(pid: pid_t) -> Vec<WindowDescriptor> {
    copy_window_info(CGWindowListOption::OptionAll | CGWindowListOption::ExcludeDesktopElements)
        .into_iter()
        .filter(|d| d.owner_pid == pid)
        .collect()
}

/// Descriptors for the windows currently composited on screen. This doubles
/// as the capture-surface enumeration: a window with an on-screen surface is
/// one the capture call can produce pixels for.
#[cfg(not(test))]
pub fn on_screen_descriptors() -> Vec<WindowDescriptor> {
    copy_window_info(
        CGWindowListOption::OptionOnScreenOnly | CGWindowListOption::ExcludeDesktopElements,
    )
}

#[allow(dead_code)]
fn copy_window_info(options: CGWindowListOption) -> Vec<WindowDescriptor> {
    let windows: CFRetained<CFArray<CFDictionary<CFString, CFType>>> = unsafe {
        match CGWindowListCopyWindowInfo(options, kCGNullWindowID) {
            Some(windows) => CFRetained::cast_unchecked(windows),
            None => return Vec::new(),
        }
    };
    windows.iter().filter_map(|win| make_descriptor(&win)).collect()
}

fn make_descriptor(win: &CFDictionary<CFString, CFType>) -> Option<WindowDescriptor> {
    let id = get_num(win, unsafe { kCGWindowNumber })?;
    let owner_pid = get_num(win, unsafe { kCGWindowOwnerPID })?;
    let layer = get_num(win, unsafe { kCGWindowLayer })?.try_into().ok()?;
    // Alpha and the on-screen flag are optional in the dictionary; a missing
    // alpha means fully opaque, a missing flag means off screen.
    let alpha = win
        .get(unsafe { kCGWindowAlpha })
        .and_then(|v| v.downcast::<CFNumber>().ok())
        .and_then(|n| n.as_f64())
        .unwrap_or(1.0);
    let on_screen = win
        .get(unsafe { kCGWindowIsOnscreen })
        .and_then(|v| v.downcast::<CFBoolean>().ok())
        .map(|b| b.value())
        .unwrap_or(false);
    let title = win
        .get(unsafe { kCGWindowName })
        .and_then(|v| v.downcast::<CFString>().ok())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty());

    let dict = win.get(unsafe { kCGWindowBounds })?.downcast::<CFDictionary>().ok()?;
    let mut bounds = CGRect::default();
    unsafe {
        CGRectMakeWithDictionaryRepresentation(
            CFRetained::<CFDictionary<_, _>>::as_ptr(&dict).as_ptr(),
            &mut bounds,
        )
    };

    Some(WindowDescriptor {
        id: WindowId(u32::try_from(id).ok()?),
        title,
        bounds,
        owner_pid: owner_pid.try_into().ok()?,
        layer,
        alpha,
        on_screen,
    })
}

fn get_num(dict: &CFDictionary<CFString, CFType>, key: &'static CFString) -> Option<i64> {
    dict.get(key)?.downcast::<CFNumber>().ok()?.as_i64()
}

#[inline]
#[allow(dead_code)]
fn cf_array_from_ids(ids: &[WindowId]) -> CFRetained<CFArray<CFNumber>> {
    let nums: Vec<CFRetained<CFNumber>> =
        ids.iter().map(|w| CFNumber::new_i64(w.as_u32() as i64)).collect();
    CFArray::from_retained_objects(&nums)
}

#[cfg(not(test))]
pub fn window_spaces(id: WindowId) -> Vec<SpaceId> {
    let cf_windows = cf_array_from_ids(&[id]);
    let space_list_ref = unsafe {
        SLSCopySpacesForWindows(*G_CONNECTION, 0x7, CFRetained::as_ptr(&cf_windows).as_ptr())
    };
    let Some(space_list_ref) = NonNull::new(space_list_ref) else {
        return Vec::new();
    };

    let spaces_cf: CFRetained<CFArray<CFNumber>> = unsafe { CFRetained::from_raw(space_list_ref) };
    spaces_cf
        .iter()
        .filter_map(|num| num.as_i64())
        .filter_map(|value| u64::try_from(value).ok())
        .filter(|&value| value != 0)
        .map(SpaceId::new)
        .collect()
}

/// The spaces currently visible across all displays. May legitimately come
/// back empty mid space-switch; callers treat that as "unknown", not "none".
#[cfg(not(test))]
pub fn active_space_ids() -> std::collections::HashSet<SpaceId> {
    let spaces = unsafe { CGSCopySpaces(*G_CONNECTION, CGSSpaceMask::ALL_VISIBLE_SPACES) };
    let Some(spaces) = NonNull::new(spaces) else {
        return Default::default();
    };
    let spaces_cf: CFRetained<CFArray<CFNumber>> = unsafe { CFRetained::from_raw(spaces) };
    spaces_cf
        .iter()
        .filter_map(|num| num.as_i64())
        .filter_map(|value| u64::try_from(value).ok())
        .filter(|&value| value != 0)
        .map(SpaceId::new)
        .collect()
}

#[cfg(not(test))]
pub fn window_level(id: WindowId) -> Option<i32> {
    let mut level = 0;
    let res = unsafe { SLSGetWindowLevel(*G_CONNECTION, id.as_u32(), &mut level) };
    (res == 0).then_some(level)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("screen capture permission has not been granted")]
    PermissionDenied,
    #[error("the window server returned no image for window {0:?}")]
    CaptureFailure(WindowId),
    #[error("window {0:?} no longer exists")]
    InvalidWindow(WindowId),
    #[error("capture timed out")]
    Timeout,
}

/// A captured window surface, downscaled for preview use.
#[derive(Clone)]
pub struct PreviewImage(CFRetained<CGImage>);

// SAFETY: CGImage is immutable and documented thread-safe; the wrapper only
// carries a retained reference.
unsafe impl Send for PreviewImage {}
unsafe impl Sync for PreviewImage {}

impl PreviewImage {
    #[inline]
    pub fn cg_image(&self) -> &CGImage {
        self.0.as_ref()
    }

    pub fn width(&self) -> usize {
        unsafe { CGImage::width(Some(self.cg_image())) }
    }

    pub fn height(&self) -> usize {
        unsafe { CGImage::height(Some(self.cg_image())) }
    }
}

impl std::fmt::Debug for PreviewImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

pub const PREVIEW_MAX_WIDTH: usize = 640;
pub const PREVIEW_MAX_HEIGHT: usize = 400;

#[cfg(not(test))]
pub fn capture_window_image(id: WindowId) -> Result<PreviewImage, CaptureError> {
    let img = capture_window(id).ok_or(CaptureError::CaptureFailure(id))?;
    downscale_to_fit(img.cg_image(), PREVIEW_MAX_WIDTH, PREVIEW_MAX_HEIGHT)
        .ok_or(CaptureError::CaptureFailure(id))
}

#[allow(dead_code)]
fn capture_window(id: WindowId) -> Option<PreviewImage> {
    unsafe {
        let imgs_ref = SLSHWCaptureWindowList(
            *G_CONNECTION,
            &id.as_u32() as *const u32,
            1,
            (1 << 11) | (1 << 9) | (1 << 19),
        );
        let imgs_ref = NonNull::new(imgs_ref)?;
        let imgs: CFRetained<CFArray<CGImage>> = CFRetained::from_raw(imgs_ref);
        imgs.get(0).map(PreviewImage)
    }
}

#[allow(dead_code)]
fn downscale_to_fit(src: &CGImage, max_w: usize, max_h: usize) -> Option<PreviewImage> {
    unsafe {
        let src_w = CGImage::width(Some(src)) as f64;
        let src_h = CGImage::height(Some(src)) as f64;
        if src_w <= 0.0 || src_h <= 0.0 {
            return None;
        }

        let bound_w = (max_w.max(1) as f64).min(src_w);
        let bound_h = (max_h.max(1) as f64).min(src_h);
        let scale = (bound_w / src_w).min(bound_h / src_h);
        let dst_w = (src_w * scale).round().max(1.0) as usize;
        let dst_h = (src_h * scale).round().max(1.0) as usize;

        let ctx = bitmap_context(dst_w, dst_h)?;
        CGContext::set_interpolation_quality(Some(ctx.as_ref()), CGInterpolationQuality::Low);

        let dst = CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(dst_w as f64, dst_h as f64));
        CGContext::draw_image(Some(ctx.as_ref()), dst, Some(src));

        let out = CGBitmapContextCreateImage(CFRetained::as_ptr(&ctx).as_ptr());
        NonNull::new(out).map(|p| PreviewImage(CFRetained::from_raw(p)))
    }
}

unsafe fn bitmap_context(w: usize, h: usize) -> Option<CFRetained<CGContext>> {
    unsafe {
        let cs = CGColorSpace::new_device_rgb()?;
        let ctx = CGBitmapContextCreate(
            std::ptr::null_mut(),
            w,
            h,
            8,
            0,
            CFRetained::as_ptr(&cs).as_ptr(),
            // kCGImageAlphaPremultipliedFirst = 2
            // kCGBitmapByteOrder32Little = 2 << 12
            CGBitmapInfo(2u32 | 2 << 12),
        );
        NonNull::new(ctx).map(|p| CFRetained::from_raw(p))
    }
}

#[link(name = "CoreGraphics", kind = "framework")]
unsafe extern "C" {
    fn CGBitmapContextCreate(
        data: *mut c_void,
        width: usize,
        height: usize,
        bits_per_component: usize,
        bytes_per_row: usize,
        space: *mut CGColorSpace,
        bitmap_info: CGBitmapInfo,
    ) -> *mut CGContext;

    fn CGBitmapContextCreateImage(c: *mut CGContext) -> *mut CGImage;
}

// Test builds stub the window-server queries so unit tests are deterministic
// and do not depend on the desktop the tests happen to run on.

#[cfg(test)]
pub fn descriptors_for_pid(_pid: pid_t) -> Vec<WindowDescriptor> {
    Vec::new()
}

#[cfg(test)]
pub fn on_screen_descriptors() -> Vec<WindowDescriptor> {
    Vec::new()
}

#[cfg(test)]
pub fn window_spaces(_id: WindowId) -> Vec<SpaceId> {
    Vec::new()
}

#[cfg(test)]
pub fn active_space_ids() -> std::collections::HashSet<SpaceId> {
    Default::default()
}

#[cfg(test)]
pub fn window_level(_id: WindowId) -> Option<i32> {
    Some(0)
}

#[cfg(test)]
pub fn capture_window_image(_id: WindowId) -> Result<PreviewImage, CaptureError> {
    PreviewImage::blank(4, 4).ok_or(CaptureError::CaptureFailure(_id))
}

#[cfg(test)]
impl PreviewImage {
    /// A solid image drawn through the same bitmap path the downscaler uses.
    pub fn blank(w: usize, h: usize) -> Option<PreviewImage> {
        unsafe {
            let ctx = bitmap_context(w, h)?;
            let out = CGBitmapContextCreateImage(CFRetained::as_ptr(&ctx).as_ptr());
            NonNull::new(out).map(|p| PreviewImage(CFRetained::from_raw(p)))
        }
    }
}
