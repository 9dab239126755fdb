// Private SkyLight/CGS symbol declarations, collected from
// https://github.com/asmagill/hs._asm.undocumented.spaces/blob/master/CGSSpace.h
// and https://github.com/koekeishiya/yabai/blob/master/src/misc/extern.h.

use std::ffi::c_int;

use bitflags::bitflags;
use objc2_application_services::{AXError, AXUIElement};
use objc2_core_foundation::{CFArray, CFData, CFDictionary, CFNumber, CFType, CGRect};
use objc2_core_graphics::{CGImage, CGWindowID};
use once_cell::sync::Lazy;

pub static G_CONNECTION: Lazy<cid_t> = Lazy::new(|| unsafe { SLSMainConnectionID() });

#[allow(non_camel_case_types)]
pub type cid_t = i32;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct CGSSpaceMask: c_int {
        const INCLUDE_CURRENT = 1 << 0;
        const INCLUDE_OTHERS  = 1 << 1;
        const INCLUDE_USER    = 1 << 2;
        const INCLUDE_OS      = 1 << 3;
        const VISIBLE         = 1 << 16;

        const ALL_SPACES =
            Self::INCLUDE_USER.bits() | Self::INCLUDE_OTHERS.bits() | Self::INCLUDE_CURRENT.bits();
        const ALL_VISIBLE_SPACES = Self::ALL_SPACES.bits() | Self::VISIBLE.bits();
    }
}

unsafe extern "C" {
    #[allow(clashing_extern_declarations)]
    pub fn CFRelease(cf: *mut CFType);
    pub fn CGRectMakeWithDictionaryRepresentation(
        dict: *mut CFDictionary,
        rect: *mut CGRect,
    ) -> bool;

    pub fn _AXUIElementGetWindow(elem: *mut AXUIElement, wid: *mut CGWindowID) -> AXError;
    pub fn _AXUIElementCreateWithRemoteToken(data: *mut CFData) -> *mut AXUIElement;

    pub fn SLSMainConnectionID() -> cid_t;
    pub fn CGSGetWindowBounds(cid: cid_t, wid: u32, frame: *mut CGRect) -> i32;
    pub fn CGSGetActiveSpace(cid: c_int) -> u64;
    pub fn CGSCopySpaces(cid: c_int, mask: CGSSpaceMask) -> *mut CFArray<CFNumber>;
    pub fn SLSGetWindowLevel(cid: cid_t, wid: u32, level: *mut i32) -> i32;
    pub fn SLSCopySpacesForWindows(
        cid: cid_t,
        selector: u32,
        windows: *mut CFArray<CFNumber>,
    ) -> *mut CFArray<CFNumber>;
    pub fn SLSHWCaptureWindowList(
        cid: cid_t,
        window_list: *const u32,
        window_count: c_int,
        options: u32,
    ) -> *mut CFArray<CGImage>;

    pub fn AXIsProcessTrusted() -> bool;
    pub fn CGPreflightScreenCaptureAccess() -> bool;
}
